//! # Filter Manifests
//!
//! A manifest declares a filter set as data, in TOML:
//!
//! ```toml
//! [[filters]]
//! id = "status"
//! type = "select"
//! label = "Status"
//! default = "active"
//! options = [
//!     { value = "active", label = "Active" },
//!     { value = "archived", label = "Archived" },
//! ]
//!
//! [[filters]]
//! id = "category"
//! type = "multi-select"
//! label = "Category"
//!
//! [[filters.dependencies]]
//! fields = ["status"]
//! action = "show"
//! reset_on_change = true
//! ```
//!
//! Defaults may be given as TOML scalars or as parameter text
//! (`default = "10..50"` for a number range), decoded like a query parameter.
//!
//! Manifests cannot carry loaders or hooks; those are attached in code.
//! A filter with an unknown `type` or an undecodable default is logged and
//! skipped (or loses its default), the rest of the manifest still loads.

use crate::codec::ParamCodec;
use crate::definition::{DependencyAction, FilterDefinition, FilterDependency, FilterKind, FilterSet};
use crate::error::{Result, SiftError};
use crate::options::FilterOption;
use crate::value::FilterValue;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterManifest {
    #[serde(default)]
    pub filters: Vec<FilterEntry>,
}

/// One `[[filters]]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub label: Option<String>,
    pub short_label: Option<String>,
    pub placeholder: Option<String>,
    pub description: Option<String>,
    pub default: Option<toml::Value>,
    #[serde(default)]
    pub options: Vec<FilterOption>,
    #[serde(default)]
    pub dependencies: Vec<DependencyEntry>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub hidden: bool,
    pub group: Option<String>,
    pub debounce_ms: Option<u64>,
    pub page_size: Option<usize>,
    pub cache_ttl_secs: Option<u64>,
    pub cache: Option<bool>,
}

/// One `[[filters.dependencies]]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyEntry {
    pub fields: Vec<String>,
    pub action: DependencyAction,
    #[serde(default)]
    pub reset_on_change: bool,
}

impl FilterManifest {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let manifest: FilterManifest = toml::from_str(source)?;
        if manifest.filters.is_empty() {
            return Err(SiftError::Manifest("manifest declares no filters".to_string()));
        }
        Ok(manifest)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let source = fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Build the filter set. `codec` decodes textual defaults.
    pub fn into_filter_set(self, codec: &ParamCodec) -> FilterSet {
        FilterSet::new(
            self.filters
                .into_iter()
                .filter_map(|entry| entry.into_definition(codec)),
        )
    }
}

impl FilterEntry {
    fn into_definition(self, codec: &ParamCodec) -> Option<FilterDefinition> {
        let kind = match self.kind.parse::<FilterKind>() {
            Ok(kind) => kind,
            Err(err) => {
                warn!(filter = %self.id, error = %err, "skipping filter with unknown type");
                return None;
            }
        };

        let label = self.label.clone().unwrap_or_else(|| self.id.clone());
        let mut definition = FilterDefinition::new(self.id.clone(), kind, label);
        definition.short_label = self.short_label;
        definition.placeholder = self.placeholder;
        definition.description = self.description;
        definition.required = self.required;
        definition.disabled = self.disabled;
        definition.hidden = self.hidden;
        definition.group = self.group;

        if let Some(raw) = &self.default {
            match default_value(&definition, raw, codec) {
                Ok(value) => definition.default_value = Some(value),
                Err(reason) => {
                    warn!(filter = %definition.id, %reason, "ignoring undecodable default")
                }
            }
        }
        if !self.options.is_empty() {
            definition = definition.options(self.options);
        }
        for dependency in self.dependencies {
            let mut declared = FilterDependency::new(dependency.action, dependency.fields);
            declared.reset_on_change = dependency.reset_on_change;
            definition = definition.depends_on(declared);
        }

        let overrides = &mut definition.options_overrides;
        overrides.debounce = self.debounce_ms.map(Duration::from_millis);
        overrides.page_size = self.page_size;
        overrides.cache_ttl = self.cache_ttl_secs.map(Duration::from_secs);
        overrides.cache = self.cache;
        Some(definition)
    }
}

fn default_value(
    definition: &FilterDefinition,
    raw: &toml::Value,
    codec: &ParamCodec,
) -> std::result::Result<FilterValue, String> {
    match raw {
        toml::Value::String(text) => codec
            .decode_value(definition, text)
            .map_err(|err| err.to_string()),
        toml::Value::Integer(n) => Ok(FilterValue::Number(*n as f64)),
        toml::Value::Float(n) => Ok(FilterValue::Number(*n)),
        toml::Value::Boolean(b) => Ok(FilterValue::Bool(*b)),
        toml::Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| "list defaults must contain strings".to_string())
            })
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(FilterValue::StringList),
        other => Err(format!("unsupported default {}", other.type_str())),
    }
}
