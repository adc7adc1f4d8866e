//! # Dependency Evaluation
//!
//! Filters can depend on the values of other filters. This module has two
//! separate halves:
//!
//! - [`evaluate`] is a pure function from a definition and the current values
//!   to the derived flags (visible, enabled, reload). It keeps no state and
//!   can be called any number of times.
//! - [`DependencyTracker`] remembers the last-seen value of every dependency
//!   field, per dependent filter, and reports *changes*. Only changes trigger
//!   side effects (resetting a dependent, reloading its options).
//!
//! ## Composition
//!
//! Dependencies are applied in declaration order and can only downgrade a
//! flag. A `hidden` filter stays hidden no matter what its dependencies say,
//! and once a `Show` dependency fails nothing later makes the filter visible
//! again.
//!
//! | Action | Condition met | Condition not met |
//! |--------|---------------|-------------------|
//! | `Show` | - | visible = false |
//! | `Hide` | visible = false | - |
//! | `Enable` | - | enabled = false |
//! | `Disable` | enabled = false | - |
//! | `ReloadOptions` | reload = true | - |
//!
//! ## No Reset On Mount
//!
//! The tracker only fires when it already held a value for the field. The
//! first observation of a filter (construction, or a re-seed after a bulk
//! replacement) records values silently.

use crate::definition::{DependencyAction, FilterDefinition, FilterDependency, FilterSet};
use crate::value::{FilterValue, ValueMap};
use std::collections::HashMap;

/// Derived flags of one filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    pub visible: bool,
    pub enabled: bool,
    /// A met `ReloadOptions` dependency asks for fresh options.
    pub reload: bool,
}

/// Compute the derived flags of `definition` against `values`.
///
/// Source fields missing from `values` (or not declared at all) read as `Null`.
pub fn evaluate(definition: &FilterDefinition, values: &ValueMap, filters: &FilterSet) -> Evaluation {
    let mut evaluation = Evaluation {
        visible: !definition.hidden,
        enabled: !definition.disabled,
        reload: false,
    };

    for dependency in &definition.dependencies {
        let met = condition_met(dependency, values, filters);
        match dependency.action {
            DependencyAction::Show if !met => evaluation.visible = false,
            DependencyAction::Hide if met => evaluation.visible = false,
            DependencyAction::Enable if !met => evaluation.enabled = false,
            DependencyAction::Disable if met => evaluation.enabled = false,
            DependencyAction::ReloadOptions if met => evaluation.reload = true,
            _ => {}
        }
    }
    evaluation
}

/// Evaluate one dependency's condition.
///
/// The default condition holds when every source value is non-empty under
/// the source filter's own emptiness rule.
pub fn condition_met(dependency: &FilterDependency, values: &ValueMap, filters: &FilterSet) -> bool {
    let sources: Vec<FilterValue> = dependency
        .fields
        .iter()
        .map(|field| source_value(field, values, filters))
        .collect();

    match &dependency.condition {
        Some(predicate) => predicate(&sources),
        None => dependency
            .fields
            .iter()
            .zip(&sources)
            .all(|(field, value)| !filters.is_value_empty(field, value)),
    }
}

fn source_value(field: &str, values: &ValueMap, filters: &FilterSet) -> FilterValue {
    if !filters.contains(field) {
        return FilterValue::Null;
    }
    values.get(field).cloned().unwrap_or_default()
}

/// What changed for one dependent filter since its last observation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSignals {
    /// A `reset_on_change` dependency saw a change.
    pub reset: bool,
    /// A `ReloadOptions` dependency saw a change.
    pub reload: bool,
    /// Source fields whose value changed.
    pub changed: Vec<String>,
}

impl ChangeSignals {
    pub fn is_quiet(&self) -> bool {
        self.changed.is_empty()
    }
}

/// Retains prior dependency values and reports real changes.
#[derive(Debug, Clone, Default)]
pub struct DependencyTracker {
    /// dependent filter id -> source field -> last seen value
    retained: HashMap<String, HashMap<String, FilterValue>>,
}

impl DependencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the current dependency values of every filter without firing.
    pub fn seed(&mut self, filters: &FilterSet, values: &ValueMap) {
        self.retained.clear();
        for definition in filters.iter() {
            self.observe(definition, values);
        }
    }

    /// Compare the dependency values of `definition` with the retained ones,
    /// then retain the new values.
    pub fn observe(&mut self, definition: &FilterDefinition, values: &ValueMap) -> ChangeSignals {
        let fields = definition.dependency_fields();
        if fields.is_empty() {
            return ChangeSignals::default();
        }

        let retained = self.retained.entry(definition.id.clone()).or_default();
        let mut signals = ChangeSignals::default();
        for field in fields {
            let current = values.get(field).cloned().unwrap_or_default();
            match retained.get(field) {
                Some(prior) if *prior != current => signals.changed.push(field.to_string()),
                _ => {}
            }
            retained.insert(field.to_string(), current);
        }

        for dependency in &definition.dependencies {
            let touched = dependency
                .fields
                .iter()
                .any(|field| signals.changed.iter().any(|c| c == field));
            if !touched {
                continue;
            }
            if dependency.reset_on_change {
                signals.reset = true;
            }
            if dependency.action == DependencyAction::ReloadOptions {
                signals.reload = true;
            }
        }
        signals
    }
}
