//! Filter definitions and the filter-set registry.
//!
//! This module defines the schema side of the engine: what kinds of filters
//! exist, how a single filter is declared, how filters depend on each other,
//! and the [`FilterSet`] registry that one engine instance is built from.
//!
//! ## Filter Kinds
//!
//! | Kind | Tag | Value variant | Empty value |
//! |------|-----|---------------|-------------|
//! | `Text` | `text` | `String` | `Null` |
//! | `Select` | `select` | `String` | `Null` |
//! | `MultiSelect` | `multi-select` | `StringList` | `[]` |
//! | `Number` | `number` | `Number` | `Null` |
//! | `NumberRange` | `number-range` | `NumberRange` | `Null` |
//! | `Date` | `date` | `Date` | `Null` |
//! | `DateRange` | `date-range` | `DateRange` | `Null` |
//! | `Boolean` | `boolean` | `Bool` | `Null` |
//!
//! ## Declaring Filters
//!
//! ```ignore
//! let filters = FilterSet::new([
//!     FilterDefinition::select("status", "Status").options(vec![
//!         FilterOption::new("active", "Active"),
//!         FilterOption::new("archived", "Archived"),
//!     ]),
//!     FilterDefinition::multi_select("category", "Category")
//!         .depends_on(FilterDependency::show_when("status").reset_on_change())
//!         .loader(CategoryLoader::new(client)),
//! ]);
//! ```

use crate::error::SiftError;
use crate::options::{FilterOption, OptionsLoader, OptionsSource};
use crate::value::{FilterValue, ValueMap};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Overrides the default emptiness rule for one filter.
pub type EmptinessHook = Arc<dyn Fn(&FilterValue) -> bool + Send + Sync>;

/// Custom validation; receives the filter's value and all working values.
/// Returns an error message when the value is invalid.
pub type ValidationHook = Arc<dyn Fn(&FilterValue, &ValueMap) -> Option<String> + Send + Sync>;

/// Custom formatting of a value for active-filter summaries.
pub type FormatHook = Arc<dyn Fn(&FilterValue) -> String + Send + Sync>;

/// Custom dependency predicate over the source fields' current values,
/// passed in the order the fields were declared.
pub type DependencyPredicate = Arc<dyn Fn(&[FilterValue]) -> bool + Send + Sync>;

/// The kind of a filter.
///
/// The kind decides which value variant the filter accepts and how its value
/// is encoded into query parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilterKind {
    Text,
    Select,
    MultiSelect,
    Number,
    NumberRange,
    Date,
    DateRange,
    Boolean,
}

impl FilterKind {
    pub const ALL: [FilterKind; 8] = [
        FilterKind::Text,
        FilterKind::Select,
        FilterKind::MultiSelect,
        FilterKind::Number,
        FilterKind::NumberRange,
        FilterKind::Date,
        FilterKind::DateRange,
        FilterKind::Boolean,
    ];

    /// The string tag used in manifests and logs.
    pub fn tag(&self) -> &'static str {
        match self {
            FilterKind::Text => "text",
            FilterKind::Select => "select",
            FilterKind::MultiSelect => "multi-select",
            FilterKind::Number => "number",
            FilterKind::NumberRange => "number-range",
            FilterKind::Date => "date",
            FilterKind::DateRange => "date-range",
            FilterKind::Boolean => "boolean",
        }
    }

    /// The value a cleared filter of this kind holds.
    pub fn empty_value(&self) -> FilterValue {
        match self {
            FilterKind::MultiSelect => FilterValue::StringList(Vec::new()),
            _ => FilterValue::Null,
        }
    }

    /// Check whether a value may be stored in a filter of this kind.
    ///
    /// `Null` is accepted by every kind. Non-finite numbers are rejected
    /// everywhere since they can neither be compared nor encoded.
    pub fn accepts(&self, value: &FilterValue) -> bool {
        fn finite(n: &Option<f64>) -> bool {
            n.map_or(true, f64::is_finite)
        }

        match (self, value) {
            (_, FilterValue::Null) => true,
            (FilterKind::Text | FilterKind::Select, FilterValue::String(_)) => true,
            (FilterKind::MultiSelect, FilterValue::StringList(_)) => true,
            (FilterKind::Number, FilterValue::Number(n)) => n.is_finite(),
            (FilterKind::NumberRange, FilterValue::NumberRange { min, max }) => {
                finite(min) && finite(max)
            }
            (FilterKind::Date, FilterValue::Date(_)) => true,
            (FilterKind::DateRange, FilterValue::DateRange { .. }) => true,
            (FilterKind::Boolean, FilterValue::Bool(_)) => true,
            _ => false,
        }
    }

    /// Whether filters of this kind pick from an option list.
    pub fn uses_options(&self) -> bool {
        matches!(self, FilterKind::Select | FilterKind::MultiSelect)
    }
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for FilterKind {
    type Err = SiftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "search" => Ok(FilterKind::Text),
            "select" | "radio" => Ok(FilterKind::Select),
            "multi-select" | "multiselect" | "multi_select" | "checkbox-group" => {
                Ok(FilterKind::MultiSelect)
            }
            "number" => Ok(FilterKind::Number),
            "number-range" | "range" => Ok(FilterKind::NumberRange),
            "date" => Ok(FilterKind::Date),
            "date-range" | "daterange" => Ok(FilterKind::DateRange),
            "boolean" | "bool" | "toggle" | "checkbox" => Ok(FilterKind::Boolean),
            other => Err(SiftError::UnknownKind(other.to_string())),
        }
    }
}

/// What a dependency does to the dependent filter when its condition holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DependencyAction {
    /// Visible only while the condition holds.
    Show,
    /// Hidden while the condition holds.
    Hide,
    /// Enabled only while the condition holds.
    Enable,
    /// Disabled while the condition holds.
    Disable,
    /// Options are reloaded when the source fields change.
    ReloadOptions,
}

/// A dependency of one filter on the values of other filters.
#[derive(Clone)]
pub struct FilterDependency {
    /// Source filter ids whose values feed the condition.
    pub fields: Vec<String>,
    pub action: DependencyAction,
    /// Reset the dependent filter when any source value changes.
    pub reset_on_change: bool,
    /// Custom condition; `None` means "every source value is non-empty".
    pub condition: Option<DependencyPredicate>,
}

impl FilterDependency {
    pub fn new<I, S>(action: DependencyAction, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            action,
            reset_on_change: false,
            condition: None,
        }
    }

    /// Visible while `field` has a value.
    pub fn show_when(field: impl Into<String>) -> Self {
        Self::new(DependencyAction::Show, [field.into()])
    }

    /// Hidden while `field` has a value.
    pub fn hide_when(field: impl Into<String>) -> Self {
        Self::new(DependencyAction::Hide, [field.into()])
    }

    /// Enabled while `field` has a value.
    pub fn enable_when(field: impl Into<String>) -> Self {
        Self::new(DependencyAction::Enable, [field.into()])
    }

    /// Disabled while `field` has a value.
    pub fn disable_when(field: impl Into<String>) -> Self {
        Self::new(DependencyAction::Disable, [field.into()])
    }

    /// Options reload whenever `field` changes.
    pub fn reload_on(field: impl Into<String>) -> Self {
        Self::new(DependencyAction::ReloadOptions, [field.into()])
    }

    /// Replace the default "all non-empty" condition.
    pub fn when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&[FilterValue]) -> bool + Send + Sync + 'static,
    {
        self.condition = Some(Arc::new(predicate));
        self
    }

    pub fn reset_on_change(mut self) -> Self {
        self.reset_on_change = true;
        self
    }
}

impl fmt::Debug for FilterDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterDependency")
            .field("fields", &self.fields)
            .field("action", &self.action)
            .field("reset_on_change", &self.reset_on_change)
            .field("custom_condition", &self.condition.is_some())
            .finish()
    }
}

/// Per-filter overrides for option loading. `None` falls back to the engine config.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptionsOverrides {
    pub debounce: Option<Duration>,
    pub page_size: Option<usize>,
    pub cache_ttl: Option<Duration>,
    /// `false` disables caching for this filter.
    pub cache: Option<bool>,
}

/// Declarative description of one filterable field.
#[derive(Clone)]
pub struct FilterDefinition {
    /// Unique key within the filter set; also the query-parameter suffix.
    pub id: String,
    pub kind: FilterKind,
    pub label: String,
    /// Compact label for chips and summaries.
    pub short_label: Option<String>,
    pub placeholder: Option<String>,
    pub description: Option<String>,
    /// Value restored by `clear_filter` and used at construction.
    pub default_value: Option<FilterValue>,
    pub options: OptionsSource,
    pub dependencies: Vec<FilterDependency>,
    pub required: bool,
    pub disabled: bool,
    pub hidden: bool,
    pub group: Option<String>,
    pub is_empty_hook: Option<EmptinessHook>,
    pub validate_hook: Option<ValidationHook>,
    pub format_hook: Option<FormatHook>,
    pub options_overrides: OptionsOverrides,
}

impl FilterDefinition {
    pub fn new(id: impl Into<String>, kind: FilterKind, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            label: label.into(),
            short_label: None,
            placeholder: None,
            description: None,
            default_value: None,
            options: OptionsSource::None,
            dependencies: Vec::new(),
            required: false,
            disabled: false,
            hidden: false,
            group: None,
            is_empty_hook: None,
            validate_hook: None,
            format_hook: None,
            options_overrides: OptionsOverrides::default(),
        }
    }

    pub fn text(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(id, FilterKind::Text, label)
    }

    pub fn select(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(id, FilterKind::Select, label)
    }

    pub fn multi_select(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(id, FilterKind::MultiSelect, label)
    }

    pub fn number(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(id, FilterKind::Number, label)
    }

    pub fn number_range(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(id, FilterKind::NumberRange, label)
    }

    pub fn date(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(id, FilterKind::Date, label)
    }

    pub fn date_range(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(id, FilterKind::DateRange, label)
    }

    pub fn boolean(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(id, FilterKind::Boolean, label)
    }

    pub fn short_label(mut self, label: impl Into<String>) -> Self {
        self.short_label = Some(label.into());
        self
    }

    pub fn placeholder(mut self, text: impl Into<String>) -> Self {
        self.placeholder = Some(text.into());
        self
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    pub fn default_value(mut self, value: impl Into<FilterValue>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Static options. These take precedence over any loader.
    pub fn options(mut self, options: Vec<FilterOption>) -> Self {
        self.options = OptionsSource::Static(options);
        self
    }

    /// Async option source. Ignored when static options are already set.
    pub fn loader<L: OptionsLoader + 'static>(mut self, loader: L) -> Self {
        if matches!(self.options, OptionsSource::Static(_)) {
            warn!(filter = %self.id, "static options already set, ignoring loader");
            return self;
        }
        self.options = OptionsSource::Loader(Arc::new(loader));
        self
    }

    pub fn depends_on(mut self, dependency: FilterDependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn is_empty_with<F>(mut self, hook: F) -> Self
    where
        F: Fn(&FilterValue) -> bool + Send + Sync + 'static,
    {
        self.is_empty_hook = Some(Arc::new(hook));
        self
    }

    pub fn validate_with<F>(mut self, hook: F) -> Self
    where
        F: Fn(&FilterValue, &ValueMap) -> Option<String> + Send + Sync + 'static,
    {
        self.validate_hook = Some(Arc::new(hook));
        self
    }

    pub fn format_with<F>(mut self, hook: F) -> Self
    where
        F: Fn(&FilterValue) -> String + Send + Sync + 'static,
    {
        self.format_hook = Some(Arc::new(hook));
        self
    }

    pub fn debounce(mut self, debounce: Duration) -> Self {
        self.options_overrides.debounce = Some(debounce);
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.options_overrides.page_size = Some(page_size);
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.options_overrides.cache_ttl = Some(ttl);
        self
    }

    pub fn no_cache(mut self) -> Self {
        self.options_overrides.cache = Some(false);
        self
    }

    /// Label for compact displays: the short label when present.
    pub fn display_label(&self) -> &str {
        self.short_label.as_deref().unwrap_or(&self.label)
    }

    /// The declared default, or the kind's empty value.
    pub fn default_or_empty(&self) -> FilterValue {
        self.default_value
            .clone()
            .unwrap_or_else(|| self.kind.empty_value())
    }

    /// Emptiness under this filter's rule (custom hook or the default rule).
    pub fn is_value_empty(&self, value: &FilterValue) -> bool {
        match &self.is_empty_hook {
            Some(hook) => hook(value),
            None => value.is_empty(),
        }
    }

    pub fn format_value(&self, value: &FilterValue) -> String {
        match &self.format_hook {
            Some(hook) => hook(value),
            None => value.display(),
        }
    }

    /// Every source field referenced by this filter's dependencies, deduplicated,
    /// in first-reference order.
    pub fn dependency_fields(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.dependencies
            .iter()
            .flat_map(|dep| dep.fields.iter())
            .filter(|field| seen.insert(field.as_str()))
            .map(String::as_str)
            .collect()
    }
}

impl fmt::Debug for FilterDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterDefinition")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("label", &self.label)
            .field("default_value", &self.default_value)
            .field("options", &self.options)
            .field("dependencies", &self.dependencies)
            .field("required", &self.required)
            .field("disabled", &self.disabled)
            .field("hidden", &self.hidden)
            .field("group", &self.group)
            .finish_non_exhaustive()
    }
}

/// A group of filters sharing a group id, in declaration order.
#[derive(Debug)]
pub struct FilterGroup<'a> {
    pub id: Option<&'a str>,
    pub filters: Vec<&'a FilterDefinition>,
}

/// Registry of the filters of one collection view.
///
/// This is the single source of truth for one engine instance. Construction
/// never fails: misconfigured entries are logged and degraded so one bad
/// filter cannot take down the whole set.
#[derive(Debug, Clone, Default)]
pub struct FilterSet {
    filters: Vec<FilterDefinition>,
    index: HashMap<String, usize>,
}

impl FilterSet {
    pub fn new(definitions: impl IntoIterator<Item = FilterDefinition>) -> Self {
        let mut set = FilterSet::default();
        for mut definition in definitions {
            if set.index.contains_key(&definition.id) {
                warn!(filter = %definition.id, "duplicate filter id, keeping the first declaration");
                continue;
            }
            if let Some(default) = &definition.default_value {
                if !definition.kind.accepts(default) {
                    warn!(
                        filter = %definition.id,
                        kind = %definition.kind,
                        value = default.variant_name(),
                        "default value does not match filter kind, ignoring it"
                    );
                    definition.default_value = None;
                }
            }
            if !definition.options.is_none() && !definition.kind.uses_options() {
                warn!(
                    filter = %definition.id,
                    kind = %definition.kind,
                    "options declared on a filter kind without an option list, ignoring them"
                );
                definition.options = OptionsSource::None;
            }
            set.index.insert(definition.id.clone(), set.filters.len());
            set.filters.push(definition);
        }

        for definition in &set.filters {
            for field in definition.dependency_fields() {
                if !set.index.contains_key(field) {
                    warn!(
                        filter = %definition.id,
                        source = field,
                        "dependency references an undeclared filter; it will read as empty"
                    );
                }
            }
        }
        set
    }

    pub fn get(&self, id: &str) -> Option<&FilterDefinition> {
        self.index.get(id).map(|&i| &self.filters[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FilterDefinition> {
        self.filters.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.filters.iter().map(|f| f.id.as_str())
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Groups in order of first appearance; ungrouped filters share the `None` group.
    pub fn groups(&self) -> Vec<FilterGroup<'_>> {
        let mut groups: Vec<FilterGroup<'_>> = Vec::new();
        for filter in &self.filters {
            let id = filter.group.as_deref();
            match groups.iter_mut().find(|g| g.id == id) {
                Some(group) => group.filters.push(filter),
                None => groups.push(FilterGroup {
                    id,
                    filters: vec![filter],
                }),
            }
        }
        groups
    }

    /// Emptiness of `value` under the rule of filter `id`.
    ///
    /// Undeclared ids fall back to the default rule.
    pub fn is_value_empty(&self, id: &str, value: &FilterValue) -> bool {
        match self.get(id) {
            Some(definition) => definition.is_value_empty(value),
            None => value.is_empty(),
        }
    }

    /// Every filter at its kind's empty value.
    pub fn empty_values(&self) -> ValueMap {
        self.filters
            .iter()
            .map(|f| (f.id.clone(), f.kind.empty_value()))
            .collect()
    }

    /// Every filter at its declared default (or empty value).
    pub fn default_values(&self) -> ValueMap {
        self.filters
            .iter()
            .map(|f| (f.id.clone(), f.default_or_empty()))
            .collect()
    }
}
