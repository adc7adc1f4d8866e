//! # Value Store
//!
//! The store owns the values of one filter set and the bookkeeping around
//! them. It knows nothing about dependencies or options; the engine drives it
//! and feeds cascade resets back in through [`ValueStore::write_reset`].
//!
//! ## Layers
//!
//! ```text
//!   initial ──► committed ──► (+ pending) ──► working
//! ```
//!
//! - **initial**: snapshot taken at construction (defaults overlaid with the
//!   initial values). `reset` restores it and `dirty` compares against it.
//! - **committed**: what the rest of the application sees. Active-filter
//!   accounting is computed from committed values only.
//! - **pending**: in [`ApplyMode::Deferred`] writes are buffered here until
//!   `apply`. Widgets display the working values (committed + pending).
//!
//! ## Invariants
//!
//! - Every key in values, errors and touched is a declared filter id.
//! - Every declared filter has a committed value.
//! - `active_count()` equals the number of filters whose committed value is
//!   non-empty under the filter's emptiness rule.

use crate::definition::{FilterDefinition, FilterSet};
use crate::value::{FilterValue, ValueMap};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::warn;

/// When writes become visible to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApplyMode {
    /// Every write is committed at once.
    #[default]
    Immediate,
    /// Writes are buffered until `apply`.
    Deferred,
}

/// Point-in-time view of the whole store.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct FilterState {
    pub values: ValueMap,
    pub pending: ValueMap,
    /// Filters whose options are loading.
    pub loading: BTreeSet<String>,
    pub errors: BTreeMap<String, String>,
    pub touched: BTreeSet<String>,
    pub dirty: bool,
    pub active_count: usize,
    pub has_pending_changes: bool,
}

/// Check a value against the built-in rules and the definition's hook.
///
/// `values` are the working values of the whole set, passed to custom hooks.
pub fn validate_value(
    definition: &FilterDefinition,
    value: &FilterValue,
    values: &ValueMap,
) -> Option<String> {
    if definition.required && definition.is_value_empty(value) {
        return Some(format!("{} is required", definition.label));
    }
    match value {
        FilterValue::NumberRange {
            min: Some(min),
            max: Some(max),
        } if min > max => {
            return Some(format!(
                "{}: minimum must not exceed maximum",
                definition.label
            ))
        }
        FilterValue::DateRange {
            start: Some(start),
            end: Some(end),
        } if start > end => {
            return Some(format!(
                "{}: start date must not be after end date",
                definition.label
            ))
        }
        _ => {}
    }
    definition
        .validate_hook
        .as_ref()
        .and_then(|hook| hook(value, values))
}

#[derive(Debug, Clone)]
pub struct ValueStore {
    filters: Arc<FilterSet>,
    mode: ApplyMode,
    initial: ValueMap,
    committed: ValueMap,
    pending: ValueMap,
    touched: BTreeSet<String>,
    errors: BTreeMap<String, String>,
}

impl ValueStore {
    /// Build a store at the declared defaults, overlaid with `initial`.
    ///
    /// Entries of `initial` for undeclared ids or with a mismatched variant
    /// are logged and dropped.
    pub fn new(filters: Arc<FilterSet>, mode: ApplyMode, initial: ValueMap) -> Self {
        let mut values = filters.default_values();
        for (id, value) in initial {
            if accepts(&filters, &id, &value) {
                values.insert(id, value);
            }
        }
        Self {
            filters,
            mode,
            initial: values.clone(),
            committed: values,
            pending: ValueMap::new(),
            touched: BTreeSet::new(),
            errors: BTreeMap::new(),
        }
    }

    pub fn filters(&self) -> &Arc<FilterSet> {
        &self.filters
    }

    pub fn mode(&self) -> ApplyMode {
        self.mode
    }

    /// Write one value. Returns `true` when the working value changed.
    ///
    /// In deferred mode the write lands in the pending buffer.
    pub fn set_value(&mut self, id: &str, value: FilterValue) -> bool {
        if !accepts(&self.filters, id, &value) {
            return false;
        }
        self.touched.insert(id.to_string());
        self.write(id, value)
    }

    /// Write several values. Returns the ids whose working value changed.
    pub fn set_values(&mut self, values: ValueMap) -> Vec<String> {
        values
            .into_iter()
            .filter_map(|(id, value)| self.set_value(&id, value).then_some(id))
            .collect()
    }

    /// Restore one filter to its declared default (or empty value).
    ///
    /// Always immediate: the committed value is written and any pending
    /// entry for the filter is dropped, whatever the apply mode.
    pub fn clear_filter(&mut self, id: &str) -> bool {
        let Some(definition) = self.filters.get(id) else {
            warn!(filter = id, "clear_filter on undeclared filter ignored");
            return false;
        };
        let before = self.value(id).cloned();
        let cleared = definition.default_or_empty();
        self.pending.remove(id);
        self.committed.insert(id.to_string(), cleared);
        self.touched.insert(id.to_string());
        before.as_ref() != self.value(id)
    }

    /// Every filter to its kind's empty value; declared defaults are ignored.
    pub fn clear_all(&mut self) -> bool {
        let before = self.working_values();
        self.committed = self.filters.empty_values();
        self.pending.clear();
        self.errors.clear();
        before != self.committed
    }

    /// Restore the initial snapshot and forget touched filters and errors.
    pub fn reset(&mut self) -> bool {
        let before = self.working_values();
        self.committed = self.initial.clone();
        self.pending.clear();
        self.touched.clear();
        self.errors.clear();
        before != self.committed
    }

    /// Commit the pending buffer. Returns the full committed map, or `None`
    /// when there was nothing to commit.
    pub fn apply(&mut self) -> Option<ValueMap> {
        if self.pending.is_empty() {
            return None;
        }
        let pending = std::mem::take(&mut self.pending);
        self.committed.extend(pending);
        Some(self.committed.clone())
    }

    /// Drop the pending buffer. Returns `true` if anything was dropped.
    pub fn discard_pending(&mut self) -> bool {
        let had_pending = !self.pending.is_empty();
        self.pending.clear();
        had_pending
    }

    /// Replace every committed value. Filters absent from `values` take their
    /// kind's empty value; the pending buffer is dropped.
    pub fn replace_all(&mut self, values: ValueMap) -> bool {
        let before = self.working_values();
        self.replace_committed(values);
        self.pending.clear();
        before != self.committed
    }

    /// Replace every committed value like [`replace_all`](Self::replace_all),
    /// keeping pending entries of filters whose committed value did not move.
    pub fn adopt_committed(&mut self, values: ValueMap) -> bool {
        let before = self.working_values();
        let previous = self.replace_committed(values);
        let committed = &self.committed;
        self.pending.retain(|id, value| {
            let current = committed.get(id);
            previous.get(id) == current && current != Some(value)
        });
        before != self.working_values()
    }

    fn replace_committed(&mut self, values: ValueMap) -> ValueMap {
        let mut next = self.filters.empty_values();
        for (id, value) in values {
            if accepts(&self.filters, &id, &value) {
                next.insert(id, value);
            }
        }
        std::mem::replace(&mut self.committed, next)
    }

    /// Reset a dependent filter after one of its sources changed.
    ///
    /// Writes the kind's empty value into the working layer (pending in
    /// deferred mode). Returns `true` when the working value changed.
    pub fn write_reset(&mut self, id: &str) -> bool {
        match self.filters.get(id) {
            Some(definition) => {
                let empty = definition.kind.empty_value();
                self.write(id, empty)
            }
            None => false,
        }
    }

    /// Like [`write_reset`](Self::write_reset), but always writes the
    /// committed layer and drops any pending entry for the filter.
    pub fn commit_reset(&mut self, id: &str) -> bool {
        let Some(definition) = self.filters.get(id) else {
            return false;
        };
        let empty = definition.kind.empty_value();
        let changed = self.value(id) != Some(&empty);
        self.pending.remove(id);
        self.committed.insert(id.to_string(), empty);
        changed
    }

    /// Working value: pending overlaid on committed.
    pub fn value(&self, id: &str) -> Option<&FilterValue> {
        self.pending.get(id).or_else(|| self.committed.get(id))
    }

    pub fn committed_value(&self, id: &str) -> Option<&FilterValue> {
        self.committed.get(id)
    }

    pub fn committed_values(&self) -> &ValueMap {
        &self.committed
    }

    pub fn pending_values(&self) -> &ValueMap {
        &self.pending
    }

    pub fn working_values(&self) -> ValueMap {
        let mut values = self.committed.clone();
        values.extend(self.pending.iter().map(|(k, v)| (k.clone(), v.clone())));
        values
    }

    pub fn initial_values(&self) -> &ValueMap {
        &self.initial
    }

    /// Whether the committed value of `id` is non-empty.
    pub fn is_filter_active(&self, id: &str) -> bool {
        match (self.filters.get(id), self.committed.get(id)) {
            (Some(definition), Some(value)) => !definition.is_value_empty(value),
            _ => false,
        }
    }

    pub fn active_count(&self) -> usize {
        self.filters
            .ids()
            .filter(|id| self.is_filter_active(id))
            .count()
    }

    /// Working values differ from the initial snapshot.
    pub fn is_dirty(&self) -> bool {
        self.working_values() != self.initial
    }

    pub fn has_pending_changes(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn is_touched(&self, id: &str) -> bool {
        self.touched.contains(id)
    }

    pub fn touched(&self) -> &BTreeSet<String> {
        &self.touched
    }

    pub fn error(&self, id: &str) -> Option<&str> {
        self.errors.get(id).map(String::as_str)
    }

    pub fn errors(&self) -> &BTreeMap<String, String> {
        &self.errors
    }

    /// Record or clear the validation error of one filter.
    pub fn set_error(&mut self, id: &str, error: Option<String>) {
        if !self.filters.contains(id) {
            return;
        }
        match error {
            Some(message) => {
                self.errors.insert(id.to_string(), message);
            }
            None => {
                self.errors.remove(id);
            }
        }
    }

    /// Validate one filter against its working value.
    ///
    /// `enforce` is false for hidden or disabled filters, which never carry
    /// an error.
    pub fn validate(&mut self, id: &str, enforce: bool) {
        let error = match (enforce, self.filters.get(id), self.value(id)) {
            (true, Some(definition), Some(value)) => {
                validate_value(definition, value, &self.working_values())
            }
            _ => None,
        };
        self.set_error(id, error);
    }

    pub fn snapshot(&self, loading: BTreeSet<String>) -> FilterState {
        FilterState {
            values: self.committed.clone(),
            pending: self.pending.clone(),
            loading,
            errors: self.errors.clone(),
            touched: self.touched.clone(),
            dirty: self.is_dirty(),
            active_count: self.active_count(),
            has_pending_changes: self.has_pending_changes(),
        }
    }

    fn write(&mut self, id: &str, value: FilterValue) -> bool {
        if self.value(id) == Some(&value) {
            return false;
        }
        match self.mode {
            ApplyMode::Immediate => {
                self.committed.insert(id.to_string(), value);
            }
            ApplyMode::Deferred => {
                if self.committed.get(id) == Some(&value) {
                    self.pending.remove(id);
                } else {
                    self.pending.insert(id.to_string(), value);
                }
            }
        }
        true
    }
}

fn accepts(filters: &FilterSet, id: &str, value: &FilterValue) -> bool {
    let Some(definition) = filters.get(id) else {
        warn!(filter = id, "value for undeclared filter ignored");
        return false;
    };
    if !definition.kind.accepts(value) {
        warn!(
            filter = id,
            kind = %definition.kind,
            value = value.variant_name(),
            "value does not match filter kind, ignored"
        );
        return false;
    }
    true
}
