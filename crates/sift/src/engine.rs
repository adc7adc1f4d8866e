//! # Filter Engine
//!
//! The engine is the single entry point for one filter set. Rendering
//! widgets read derived state from it and call its mutators; it drives the
//! value store, the dependency tracker and the option resolvers, and notifies
//! the outside world.
//!
//! ## Mutation Pipeline
//!
//! Every mutator runs the same steps:
//!
//! ```text
//!   mutator ──► store write ──► cascade ──► derived flags ──► validation
//!                                  │                              │
//!                                  ▼                              ▼
//!                           option reloads                on_change / sink
//! ```
//!
//! 1. The store applies the write (committed, or pending in deferred mode).
//! 2. The cascade observes dependency changes and writes resets until no
//!    reset fires, so `A -> B -> C` settles within one call. It is bounded by
//!    the number of filters; a cycle is logged and broken.
//! 3. Visibility and enablement are recomputed from the working values.
//! 4. Touched and reset filters are validated.
//! 5. Resolvers whose dependencies changed refresh their options: a
//!    `ReloadOptions` change invalidates the filter's cache entries, and any
//!    resolver that was already in use reloads eagerly.
//! 6. If committed values changed, `on_change` fires and the param sink (when
//!    `sync_url` is on) receives the encoded state.
//!
//! Bulk replacements (`clear_all_filters`, `reset_filters`, `from_params`,
//! `discard_pending`) re-seed the tracker instead of cascading: replacing
//! everything at once is not a change *to* a dependency.
//!
//! ## Controlled Mode
//!
//! With [`EngineBuilder::controlled`] the values belong to the caller.
//! Mutators compute the proposed map (cascade resets included) on a scratch
//! copy and hand it to `on_change`; local committed values only move on
//! [`FilterEngine::sync_controlled`]. In deferred mode pending edits stay
//! local and `apply_filters` emits the proposal; a later sync keeps the
//! pending edits of filters the owner did not move.
//!
//! ## Shared References
//!
//! [`EngineRef`] is the handle consumers pass around. A detached reference
//! models "no engine here" and fails every call with
//! [`SiftError::NotInitialized`].

use crate::codec::{to_query_string, ParamCodec, Params};
use crate::config::EngineConfig;
use crate::definition::{FilterDefinition, FilterGroup, FilterKind, FilterSet};
use crate::dependency::{evaluate, DependencyTracker, Evaluation};
use crate::error::{Result, SiftError};
use crate::options::{OptionsCache, OptionsResolver, OptionsSettings, OptionsState};
use crate::store::{ApplyMode, FilterState, ValueStore};
use crate::sync::ParamSink;
use crate::value::{FilterValue, ValueMap};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Callback receiving a full value map.
pub type ValuesCallback = Box<dyn FnMut(&ValueMap) + Send>;

/// Derived state of one filter, as a widget needs it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterView {
    pub id: String,
    pub label: String,
    pub kind: FilterKind,
    pub group: Option<String>,
    /// Working value (pending overlaid on committed).
    pub value: FilterValue,
    pub visible: bool,
    pub enabled: bool,
    pub required: bool,
    /// Committed value is non-empty.
    pub active: bool,
    pub touched: bool,
    pub error: Option<String>,
}

/// One entry of an active-filter summary (a chip row).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveFilter {
    pub id: String,
    pub label: String,
    pub value: FilterValue,
    /// Value formatted by the filter's format hook or the default display.
    pub display: String,
}

#[derive(Debug, Default)]
struct Cascade {
    reset: Vec<String>,
    reload: BTreeSet<String>,
}

/// How dependents follow a store write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Follow {
    /// Resets land in the working layer (pending in deferred mode).
    Cascade,
    /// Resets land in committed values, as the write itself did.
    CascadeCommitted,
    /// Bulk replacement: re-seed the tracker without resets.
    Reseed,
}

/// Observe dependency changes and write resets until the values settle.
fn run_cascade(
    engine_id: &Uuid,
    filters: &FilterSet,
    store: &mut ValueStore,
    tracker: &mut DependencyTracker,
    commit: bool,
) -> Cascade {
    let mut cascade = Cascade::default();
    for _ in 0..=filters.len() {
        let values = store.working_values();
        let resets: Vec<String> = filters
            .iter()
            .filter_map(|definition| {
                let signals = tracker.observe(definition, &values);
                if signals.reload {
                    cascade.reload.insert(definition.id.clone());
                }
                signals.reset.then(|| definition.id.clone())
            })
            .collect();

        let mut wrote = false;
        for id in resets {
            let changed = if commit {
                store.commit_reset(&id)
            } else {
                store.write_reset(&id)
            };
            if changed {
                debug!(engine = %engine_id, filter = %id, "dependency changed, filter reset");
                cascade.reset.push(id);
                wrote = true;
            }
        }
        if !wrote {
            return cascade;
        }
    }
    warn!(engine = %engine_id, "dependency cascade did not settle, stopping (cyclic resets?)");
    cascade
}

/// Values of the dependency fields of `definition`.
fn dependency_snapshot(definition: &FilterDefinition, values: &ValueMap) -> ValueMap {
    definition
        .dependency_fields()
        .into_iter()
        .map(|field| (field.to_string(), values.get(field).cloned().unwrap_or_default()))
        .collect()
}

pub struct EngineBuilder {
    filters: FilterSet,
    config: EngineConfig,
    initial_values: ValueMap,
    initial_params: Option<Params>,
    controlled: Option<ValueMap>,
    deferred_apply: Option<bool>,
    sync_url: Option<bool>,
    on_change: Option<ValuesCallback>,
    on_apply: Option<ValuesCallback>,
    sink: Option<Box<dyn ParamSink>>,
    cache: Option<OptionsCache>,
}

impl EngineBuilder {
    fn new(filters: FilterSet) -> Self {
        Self {
            filters,
            config: EngineConfig::default(),
            initial_values: ValueMap::new(),
            initial_params: None,
            controlled: None,
            deferred_apply: None,
            sync_url: None,
            on_change: None,
            on_apply: None,
            sink: None,
            cache: None,
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Values overlaid on the declared defaults at construction.
    pub fn initial_values(mut self, values: ValueMap) -> Self {
        self.initial_values = values;
        self
    }

    /// Encoded parameters (e.g. from the current URL) overlaid on the
    /// initial values.
    pub fn initial_params(mut self, params: Params) -> Self {
        self.initial_params = Some(params);
        self
    }

    /// Values owned by the caller; see the module docs.
    pub fn controlled(mut self, values: ValueMap) -> Self {
        self.controlled = Some(values);
        self
    }

    pub fn deferred_apply(mut self, deferred: bool) -> Self {
        self.deferred_apply = Some(deferred);
        self
    }

    pub fn sync_url(mut self, sync: bool) -> Self {
        self.sync_url = Some(sync);
        self
    }

    pub fn on_change<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&ValueMap) + Send + 'static,
    {
        self.on_change = Some(Box::new(callback));
        self
    }

    pub fn on_apply<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&ValueMap) + Send + 'static,
    {
        self.on_apply = Some(Box::new(callback));
        self
    }

    pub fn param_sink<S: ParamSink + 'static>(mut self, sink: S) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    /// Use `cache` instead of the process-wide options cache.
    pub fn options_cache(mut self, cache: OptionsCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn build(self) -> FilterEngine {
        let id = Uuid::new_v4();
        let filters = Arc::new(self.filters);
        let mut config = self.config;
        if let Some(deferred) = self.deferred_apply {
            config.deferred_apply = deferred;
        }
        if let Some(sync) = self.sync_url {
            config.sync_url = sync;
        }
        let codec = ParamCodec::from_config(&config);
        let cache = self.cache.unwrap_or_else(OptionsCache::global);

        let controlled = self.controlled.is_some();
        let initial = match self.controlled {
            Some(values) => values,
            None => {
                let mut values = self.initial_values;
                if let Some(params) = &self.initial_params {
                    values.extend(codec.from_params(&filters, params));
                }
                values
            }
        };
        let store = ValueStore::new(filters.clone(), config.apply_mode(), initial);

        let mut tracker = DependencyTracker::new();
        tracker.seed(&filters, &store.working_values());

        let resolvers = filters
            .iter()
            .filter(|definition| !definition.options.is_none())
            .map(|definition| {
                let resolver = OptionsResolver::new(
                    definition.id.clone(),
                    definition.options.clone(),
                    resolver_settings(&config, definition),
                    cache.clone(),
                );
                resolver.set_dependencies(dependency_snapshot(definition, &store.working_values()));
                (definition.id.clone(), resolver)
            })
            .collect();

        info!(
            engine = %id,
            filters = filters.len(),
            controlled,
            mode = ?config.apply_mode(),
            "filter engine created"
        );

        let mut engine = FilterEngine {
            id,
            filters,
            config,
            codec,
            store,
            tracker,
            derived: HashMap::new(),
            resolvers,
            cache,
            controlled,
            on_change: self.on_change,
            on_apply: self.on_apply,
            sink: self.sink,
        };
        engine.recompute_derived();
        engine
    }
}

fn resolver_settings(config: &EngineConfig, definition: &FilterDefinition) -> OptionsSettings {
    let overrides = &definition.options_overrides;
    OptionsSettings {
        debounce: overrides.debounce.unwrap_or_else(|| config.debounce()),
        page_size: overrides.page_size.unwrap_or_else(|| config.page_size()).max(1),
        cache_enabled: overrides.cache.unwrap_or(true),
        cache_ttl: overrides.cache_ttl.unwrap_or_else(|| config.cache_ttl()),
    }
}

/// Runtime for one filter set.
pub struct FilterEngine {
    id: Uuid,
    filters: Arc<FilterSet>,
    config: EngineConfig,
    codec: ParamCodec,
    store: ValueStore,
    tracker: DependencyTracker,
    derived: HashMap<String, Evaluation>,
    resolvers: HashMap<String, OptionsResolver>,
    cache: OptionsCache,
    controlled: bool,
    on_change: Option<ValuesCallback>,
    on_apply: Option<ValuesCallback>,
    sink: Option<Box<dyn ParamSink>>,
}

impl FilterEngine {
    pub fn builder(filters: FilterSet) -> EngineBuilder {
        EngineBuilder::new(filters)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn filters(&self) -> &FilterSet {
        &self.filters
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn codec(&self) -> &ParamCodec {
        &self.codec
    }

    pub fn apply_mode(&self) -> ApplyMode {
        self.store.mode()
    }

    pub fn is_controlled(&self) -> bool {
        self.controlled
    }

    // --- per filter -------------------------------------------------------

    pub fn view(&self, id: &str) -> Option<FilterView> {
        let definition = self.filters.get(id)?;
        let evaluation = self.evaluation(id);
        Some(FilterView {
            id: definition.id.clone(),
            label: definition.label.clone(),
            kind: definition.kind,
            group: definition.group.clone(),
            value: self.store.value(id).cloned().unwrap_or_default(),
            visible: evaluation.visible,
            enabled: evaluation.enabled,
            required: definition.required,
            active: self.store.is_filter_active(id),
            touched: self.store.is_touched(id),
            error: self.store.error(id).map(str::to_string),
        })
    }

    /// Working value of one filter.
    pub fn value(&self, id: &str) -> Option<&FilterValue> {
        self.store.value(id)
    }

    pub fn is_visible(&self, id: &str) -> bool {
        self.filters.contains(id) && self.evaluation(id).visible
    }

    pub fn is_enabled(&self, id: &str) -> bool {
        self.filters.contains(id) && self.evaluation(id).enabled
    }

    pub fn is_filter_active(&self, id: &str) -> bool {
        self.store.is_filter_active(id)
    }

    pub fn error(&self, id: &str) -> Option<&str> {
        self.store.error(id)
    }

    pub fn set_value(&mut self, id: &str, value: impl Into<FilterValue>) {
        if !self.filters.contains(id) {
            warn!(engine = %self.id, filter = id, "set_value on undeclared filter ignored");
            return;
        }
        let value = value.into();
        let touched = vec![id.to_string()];
        self.mutate(touched, Follow::Cascade, |store| store.set_value(id, value));
    }

    pub fn set_values(&mut self, values: ValueMap) {
        let touched: Vec<String> = values
            .keys()
            .filter(|id| self.filters.contains(id))
            .cloned()
            .collect();
        self.mutate(touched, Follow::Cascade, |store| {
            !store.set_values(values).is_empty()
        });
    }

    /// Restore one filter to its default. Immediate even in deferred mode.
    pub fn clear_filter(&mut self, id: &str) {
        if !self.filters.contains(id) {
            warn!(engine = %self.id, filter = id, "clear_filter on undeclared filter ignored");
            return;
        }
        self.mutate(vec![id.to_string()], Follow::CascadeCommitted, |store| {
            store.clear_filter(id)
        });
    }

    /// Options of one filter. Triggers a load when the list is not loaded
    /// (or loading) for the current search and dependency values.
    pub fn options(&self, id: &str) -> Option<OptionsState> {
        let resolver = self.resolvers.get(id)?;
        resolver.ensure_loaded();
        Some(resolver.state())
    }

    pub fn search(&self, id: &str, text: impl Into<String>) {
        match self.resolvers.get(id) {
            Some(resolver) => resolver.search(text),
            None => debug!(engine = %self.id, filter = id, "search on filter without options"),
        }
    }

    pub fn load_more(&self, id: &str) {
        if let Some(resolver) = self.resolvers.get(id) {
            resolver.load_more();
        }
    }

    /// Invalidate cached pages of one filter and load page 1 again.
    pub fn reload_options(&self, id: &str) {
        if let Some(resolver) = self.resolvers.get(id) {
            resolver.spawn_reload();
        }
    }

    pub fn subscribe_options(&self, id: &str) -> Option<watch::Receiver<OptionsState>> {
        self.resolvers.get(id).map(OptionsResolver::subscribe)
    }

    /// Shared handle to a filter's resolver, e.g. to await it outside the engine.
    pub fn options_resolver(&self, id: &str) -> Option<OptionsResolver> {
        self.resolvers.get(id).cloned()
    }

    // --- aggregate --------------------------------------------------------

    /// Committed values.
    pub fn values(&self) -> &ValueMap {
        self.store.committed_values()
    }

    /// Committed values overlaid with pending ones.
    pub fn working_values(&self) -> ValueMap {
        self.store.working_values()
    }

    pub fn active_count(&self) -> usize {
        self.store.active_count()
    }

    pub fn has_pending_changes(&self) -> bool {
        self.store.has_pending_changes()
    }

    pub fn is_dirty(&self) -> bool {
        self.store.is_dirty()
    }

    /// Commit pending changes. Returns `false` when there was nothing to apply.
    pub fn apply_filters(&mut self) -> bool {
        if !self.store.has_pending_changes() {
            return false;
        }

        if self.controlled {
            let proposal = self.store.working_values();
            debug!(engine = %self.id, "controlled apply requested");
            self.emit(&proposal);
            if let Some(callback) = self.on_apply.as_mut() {
                callback(&proposal);
            }
            return true;
        }

        let before = self.store.committed_values().clone();
        let Some(committed) = self.store.apply() else {
            return false;
        };
        self.validate_all();
        if committed != before {
            self.notify_change();
        }
        if let Some(callback) = self.on_apply.as_mut() {
            callback(&committed);
        }
        true
    }

    /// Drop pending changes without committing them.
    pub fn discard_pending(&mut self) {
        if self.store.discard_pending() {
            self.tracker.seed(&self.filters, &self.store.working_values());
            self.refresh(&[], &Cascade::default());
        }
    }

    /// Every filter to its kind's empty value ("no filters active").
    pub fn clear_all_filters(&mut self) {
        self.mutate(Vec::new(), Follow::Reseed, |store| store.clear_all());
    }

    /// Back to the values the engine was built with.
    pub fn reset_filters(&mut self) {
        self.mutate(Vec::new(), Follow::Reseed, |store| store.reset());
    }

    /// Encoded committed values.
    pub fn to_params(&self) -> Params {
        self.codec.to_params(&self.filters, self.store.committed_values())
    }

    pub fn query_string(&self) -> String {
        to_query_string(&self.to_params())
    }

    /// Replace every value from encoded parameters. Filters absent from
    /// `params` take their kind's empty value.
    pub fn from_params(&mut self, params: &Params) {
        let values = self.codec.from_params(&self.filters, params);
        self.mutate(Vec::new(), Follow::Reseed, |store| store.replace_all(values));
    }

    /// Adopt values supplied by the owner of a controlled engine.
    ///
    /// Dependency changes between the previous and the new values cascade
    /// into committed values; if resets alter the supplied values, the
    /// corrected map is proposed through `on_change`. Pending edits survive
    /// for filters whose committed value did not move.
    pub fn sync_controlled(&mut self, values: ValueMap) {
        if !self.store.adopt_committed(values) {
            return;
        }
        let before = self.store.committed_values().clone();
        let cascade = run_cascade(
            &self.id,
            &self.filters,
            &mut self.store,
            &mut self.tracker,
            true,
        );
        self.refresh(&[], &cascade);
        if let Some(sink) = self.sink.as_mut().filter(|_| self.config.sync_url) {
            sink.write_params(
                self.codec.prefix(),
                &self.codec.to_params(&self.filters, self.store.committed_values()),
            );
        }
        if *self.store.committed_values() != before {
            let corrected = self.store.committed_values().clone();
            self.emit(&corrected);
        }
    }

    /// Validate every filter. Returns `true` when no filter has an error.
    pub fn validate_all(&mut self) -> bool {
        let ids: Vec<String> = self.filters.ids().map(str::to_string).collect();
        for id in &ids {
            self.validate(id);
        }
        self.store.errors().is_empty()
    }

    pub fn state(&self) -> FilterState {
        let loading = self
            .resolvers
            .iter()
            .filter(|(_, resolver)| resolver.state().loading)
            .map(|(id, _)| id.clone())
            .collect();
        self.store.snapshot(loading)
    }

    /// Active filters in declaration order.
    pub fn active_filters(&self) -> Vec<ActiveFilter> {
        self.filters
            .iter()
            .filter(|definition| self.store.is_filter_active(&definition.id))
            .filter_map(|definition| {
                let value = self.store.committed_value(&definition.id)?.clone();
                Some(ActiveFilter {
                    id: definition.id.clone(),
                    label: definition.display_label().to_string(),
                    display: definition.format_value(&value),
                    value,
                })
            })
            .collect()
    }

    pub fn visible_filters(&self) -> Vec<FilterView> {
        self.filters
            .ids()
            .filter(|id| self.is_visible(id))
            .filter_map(|id| self.view(id))
            .collect()
    }

    pub fn views(&self) -> Vec<FilterView> {
        self.filters.ids().filter_map(|id| self.view(id)).collect()
    }

    pub fn groups(&self) -> Vec<FilterGroup<'_>> {
        self.filters.groups()
    }

    // --- internals --------------------------------------------------------

    fn evaluation(&self, id: &str) -> Evaluation {
        self.derived.get(id).copied().unwrap_or(Evaluation {
            visible: true,
            enabled: true,
            reload: false,
        })
    }

    /// Run one write through the pipeline described in the module docs.
    ///
    /// `follow` says where cascade resets land, or that the write is a bulk
    /// replacement that re-seeds the tracker instead.
    fn mutate<F>(&mut self, touched: Vec<String>, follow: Follow, write: F)
    where
        F: FnOnce(&mut ValueStore) -> bool,
    {
        if self.controlled {
            self.propose(touched, follow, write);
            return;
        }

        let before = self.store.committed_values().clone();
        if !write(&mut self.store) {
            return;
        }
        let cascade = match follow {
            Follow::Reseed => {
                self.tracker.seed(&self.filters, &self.store.working_values());
                Cascade::default()
            }
            Follow::Cascade | Follow::CascadeCommitted => run_cascade(
                &self.id,
                &self.filters,
                &mut self.store,
                &mut self.tracker,
                follow == Follow::CascadeCommitted,
            ),
        };
        self.refresh(&touched, &cascade);

        if *self.store.committed_values() != before {
            self.notify_change();
        }
    }

    /// Controlled-mode counterpart of `mutate`: committed changes become a
    /// proposal, pending-only changes stay local.
    fn propose<F>(&mut self, touched: Vec<String>, follow: Follow, write: F)
    where
        F: FnOnce(&mut ValueStore) -> bool,
    {
        let mut store = self.store.clone();
        let mut tracker = self.tracker.clone();
        if !write(&mut store) {
            return;
        }
        let cascade = match follow {
            Follow::Reseed => {
                tracker.seed(&self.filters, &store.working_values());
                Cascade::default()
            }
            Follow::Cascade | Follow::CascadeCommitted => run_cascade(
                &self.id,
                &self.filters,
                &mut store,
                &mut tracker,
                follow == Follow::CascadeCommitted,
            ),
        };

        if store.committed_values() != self.store.committed_values() {
            let proposal = store.committed_values().clone();
            debug!(engine = %self.id, "controlled change requested");
            self.emit(&proposal);
            return;
        }

        self.store = store;
        self.tracker = tracker;
        self.refresh(&touched, &cascade);
    }

    /// Recompute derived state after the store moved.
    fn refresh(&mut self, touched: &[String], cascade: &Cascade) {
        self.recompute_derived();
        for id in touched.iter().chain(&cascade.reset) {
            self.validate(id);
        }
        self.refresh_options(&cascade.reload);
    }

    fn recompute_derived(&mut self) {
        let values = self.store.working_values();
        self.derived = self
            .filters
            .iter()
            .map(|definition| {
                (
                    definition.id.clone(),
                    evaluate(definition, &values, &self.filters),
                )
            })
            .collect();
    }

    fn validate(&mut self, id: &str) {
        let evaluation = self.evaluation(id);
        self.store
            .validate(id, evaluation.visible && evaluation.enabled);
    }

    fn refresh_options(&self, reload: &BTreeSet<String>) {
        let values = self.store.working_values();
        for (id, resolver) in &self.resolvers {
            let Some(definition) = self.filters.get(id) else {
                continue;
            };
            let moved = resolver.set_dependencies(dependency_snapshot(definition, &values));
            if reload.contains(id) {
                if resolver.is_active() {
                    resolver.spawn_reload();
                } else {
                    self.cache.invalidate(id);
                }
            } else if moved && resolver.is_active() {
                resolver.spawn_load(false);
            }
        }
    }

    /// Committed values changed: tell the owner and the sink.
    fn notify_change(&mut self) {
        let committed = self.store.committed_values().clone();
        self.emit(&committed);
        if let Some(sink) = self.sink.as_mut().filter(|_| self.config.sync_url) {
            sink.write_params(
                self.codec.prefix(),
                &self.codec.to_params(&self.filters, &committed),
            );
        }
    }

    fn emit(&mut self, values: &ValueMap) {
        if let Some(callback) = self.on_change.as_mut() {
            callback(values);
        }
    }
}

impl Drop for FilterEngine {
    fn drop(&mut self) {
        for resolver in self.resolvers.values() {
            resolver.cancel();
        }
        debug!(engine = %self.id, "filter engine dropped");
    }
}

impl std::fmt::Debug for FilterEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterEngine")
            .field("id", &self.id)
            .field("filters", &self.filters.len())
            .field("values", self.store.committed_values())
            .field("controlled", &self.controlled)
            .finish_non_exhaustive()
    }
}

/// Cloneable handle to an engine, or to nothing.
#[derive(Clone, Default)]
pub struct EngineRef {
    inner: Option<Arc<Mutex<FilterEngine>>>,
}

impl EngineRef {
    pub fn new(engine: FilterEngine) -> Self {
        Self {
            inner: Some(Arc::new(Mutex::new(engine))),
        }
    }

    /// A reference that holds no engine.
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn is_attached(&self) -> bool {
        self.inner.is_some()
    }

    /// Run `f` with shared access to the engine.
    ///
    /// Callbacks fire while the engine is locked; they must not call back
    /// into the same reference.
    pub fn with<R>(&self, f: impl FnOnce(&FilterEngine) -> R) -> Result<R> {
        let inner = self.inner.as_ref().ok_or(SiftError::NotInitialized)?;
        let engine = inner.lock();
        Ok(f(&engine))
    }

    pub fn with_mut<R>(&self, f: impl FnOnce(&mut FilterEngine) -> R) -> Result<R> {
        let inner = self.inner.as_ref().ok_or(SiftError::NotInitialized)?;
        let mut engine = inner.lock();
        Ok(f(&mut engine))
    }

    pub fn view(&self, id: &str) -> Result<FilterView> {
        self.with(|engine| engine.view(id))?
            .ok_or_else(|| SiftError::UnknownFilter(id.to_string()))
    }

    pub fn set_value(&self, id: &str, value: impl Into<FilterValue>) -> Result<()> {
        let value = value.into();
        self.with_mut(|engine| engine.set_value(id, value))
    }

    pub fn options(&self, id: &str) -> Result<Option<OptionsState>> {
        self.with(|engine| engine.options(id))
    }

    pub fn active_count(&self) -> Result<usize> {
        self.with(FilterEngine::active_count)
    }

    pub fn has_pending_changes(&self) -> Result<bool> {
        self.with(FilterEngine::has_pending_changes)
    }

    pub fn apply_filters(&self) -> Result<bool> {
        self.with_mut(FilterEngine::apply_filters)
    }

    pub fn clear_all_filters(&self) -> Result<()> {
        self.with_mut(FilterEngine::clear_all_filters)
    }

    pub fn reset_filters(&self) -> Result<()> {
        self.with_mut(FilterEngine::reset_filters)
    }

    pub fn to_params(&self) -> Result<Params> {
        self.with(FilterEngine::to_params)
    }

    pub fn from_params(&self, params: &Params) -> Result<()> {
        self.with_mut(|engine| engine.from_params(params))
    }
}

impl std::fmt::Debug for EngineRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            Some(inner) => f.debug_tuple("EngineRef").field(&inner.lock().id).finish(),
            None => f.write_str("EngineRef(detached)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{DependencyAction, FilterDependency};
    use crate::sync::RecordingSink;
    use crate::test_utils::{catalog_filters, option_values, RecordingLoader};
    use std::time::Duration;

    fn recorder() -> (Arc<Mutex<Vec<ValueMap>>>, impl FnMut(&ValueMap) + Send + 'static) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        (log, move |values: &ValueMap| sink.lock().push(values.clone()))
    }

    fn catalog() -> FilterEngine {
        FilterEngine::builder(catalog_filters(RecordingLoader::echo()))
            .options_cache(OptionsCache::new())
            .build()
    }

    fn chain() -> FilterSet {
        FilterSet::new([
            FilterDefinition::select("a", "A"),
            FilterDefinition::select("b", "B")
                .depends_on(FilterDependency::show_when("a").reset_on_change()),
            FilterDefinition::select("c", "C")
                .depends_on(FilterDependency::show_when("b").reset_on_change()),
        ])
    }

    #[test]
    fn status_category_scenario() {
        let mut engine = catalog();
        assert!(!engine.is_visible("category"));

        engine.set_value("status", "active");
        assert!(engine.is_visible("category"));

        engine.set_value("category", FilterValue::list(["books"]));
        assert_eq!(engine.active_count(), 2);

        engine.set_value("status", "");
        assert!(!engine.is_visible("category"));
        assert_eq!(engine.value("category"), Some(&FilterValue::list(Vec::<String>::new())));

        engine.set_value("status", "archived");
        assert!(engine.is_visible("category"));
        engine.set_value("category", FilterValue::list(["music"]));
        engine.set_value("status", "archived");
        assert_eq!(engine.value("category"), Some(&FilterValue::list(["music"])));
    }

    #[test]
    fn no_reset_on_construction() {
        let mut initial = ValueMap::new();
        initial.insert("status".into(), FilterValue::from("active"));
        initial.insert("category".into(), FilterValue::list(["books"]));
        let engine = FilterEngine::builder(catalog_filters(RecordingLoader::echo()))
            .initial_values(initial)
            .options_cache(OptionsCache::new())
            .build();

        assert_eq!(engine.value("category"), Some(&FilterValue::list(["books"])));
        assert_eq!(engine.active_count(), 2);
    }

    #[test]
    fn multi_hop_cascade_settles_in_one_call() {
        let mut engine = FilterEngine::builder(chain()).build();
        engine.set_value("a", "1");
        engine.set_value("b", "2");
        engine.set_value("c", "3");

        engine.set_value("a", "changed");

        assert_eq!(engine.value("b"), Some(&FilterValue::Null));
        assert_eq!(engine.value("c"), Some(&FilterValue::Null));
        assert!(!engine.is_visible("c"));
    }

    #[test]
    fn cyclic_resets_terminate() {
        let filters = FilterSet::new([
            FilterDefinition::select("a", "A")
                .depends_on(FilterDependency::new(DependencyAction::Show, ["b"]).when(|_| true).reset_on_change()),
            FilterDefinition::select("b", "B")
                .depends_on(FilterDependency::new(DependencyAction::Show, ["a"]).when(|_| true).reset_on_change()),
        ]);
        let mut engine = FilterEngine::builder(filters).build();
        engine.set_value("a", "x");
        assert_eq!(engine.value("b"), Some(&FilterValue::Null));
        engine.set_value("b", "y");
        assert_eq!(engine.value("a"), Some(&FilterValue::Null));
    }

    #[test]
    fn on_change_fires_for_committed_changes() {
        let (log, callback) = recorder();
        let mut engine = FilterEngine::builder(catalog_filters(RecordingLoader::echo()))
            .options_cache(OptionsCache::new())
            .on_change(callback)
            .build();

        engine.set_value("status", "active");
        engine.set_value("status", "active");
        engine.set_value("ghost", "x");

        let log = log.lock();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0]["status"], FilterValue::from("active"));
    }

    #[test]
    fn deferred_apply_buffers_until_apply() {
        let (changes, on_change) = recorder();
        let (applies, on_apply) = recorder();
        let mut engine = FilterEngine::builder(catalog_filters(RecordingLoader::echo()))
            .deferred_apply(true)
            .options_cache(OptionsCache::new())
            .on_change(on_change)
            .on_apply(on_apply)
            .build();

        engine.set_value("status", "active");
        assert!(engine.has_pending_changes());
        assert_eq!(engine.active_count(), 0);
        // Dependencies follow the working values
        assert!(engine.is_visible("category"));
        assert!(changes.lock().is_empty());

        assert!(engine.apply_filters());
        assert!(!engine.has_pending_changes());
        assert_eq!(engine.active_count(), 1);
        assert_eq!(changes.lock().len(), 1);
        assert_eq!(applies.lock().len(), 1);
        assert_eq!(applies.lock()[0]["status"], FilterValue::from("active"));

        assert!(!engine.apply_filters());
        assert_eq!(applies.lock().len(), 1);
    }

    #[test]
    fn deferred_clear_filter_is_immediate() {
        let mut initial = ValueMap::new();
        initial.insert("status".into(), FilterValue::from("active"));
        let mut engine = FilterEngine::builder(catalog_filters(RecordingLoader::echo()))
            .initial_values(initial)
            .deferred_apply(true)
            .options_cache(OptionsCache::new())
            .build();

        engine.set_value("status", "archived");
        engine.clear_filter("status");

        assert!(!engine.has_pending_changes());
        assert_eq!(engine.values()["status"], FilterValue::Null);
    }

    #[test]
    fn deferred_clear_filter_commits_dependent_resets() {
        let (log, callback) = recorder();
        let mut initial = ValueMap::new();
        initial.insert("status".into(), FilterValue::from("active"));
        initial.insert("category".into(), FilterValue::list(["books"]));
        let mut engine = FilterEngine::builder(catalog_filters(RecordingLoader::echo()))
            .initial_values(initial)
            .deferred_apply(true)
            .options_cache(OptionsCache::new())
            .on_change(callback)
            .build();

        engine.set_value("category", FilterValue::list(["music"]));
        engine.clear_filter("status");

        assert_eq!(engine.values()["category"], FilterValue::list(Vec::<String>::new()));
        assert!(!engine.has_pending_changes());
        assert_eq!(engine.active_count(), 0);
        let log = log.lock();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0]["category"], FilterValue::list(Vec::<String>::new()));
    }

    #[test]
    fn discard_pending_restores_working_values() {
        let mut engine = FilterEngine::builder(catalog_filters(RecordingLoader::echo()))
            .deferred_apply(true)
            .options_cache(OptionsCache::new())
            .build();
        engine.set_value("status", "active");
        engine.discard_pending();
        assert!(!engine.has_pending_changes());
        assert!(!engine.is_visible("category"));
    }

    #[test]
    fn clear_all_ignores_defaults_and_reset_restores_them() {
        let filters = FilterSet::new([
            FilterDefinition::select("status", "Status").default_value("active"),
            FilterDefinition::boolean("archived", "Archived"),
        ]);
        let mut engine = FilterEngine::builder(filters).build();
        engine.set_value("archived", false);
        assert_eq!(engine.active_count(), 2);

        engine.clear_all_filters();
        assert_eq!(engine.active_count(), 0);

        engine.reset_filters();
        assert_eq!(engine.active_count(), 1);
        assert_eq!(engine.values()["status"], FilterValue::from("active"));
        assert!(!engine.is_dirty());
    }

    #[test]
    fn required_filter_validation_skips_hidden_filters() {
        let filters = FilterSet::new([
            FilterDefinition::select("status", "Status"),
            FilterDefinition::text("reason", "Reason")
                .required()
                .depends_on(FilterDependency::show_when("status")),
        ]);
        let mut engine = FilterEngine::builder(filters).build();
        assert!(engine.validate_all());

        engine.set_value("status", "closed");
        assert!(!engine.validate_all());
        assert_eq!(engine.error("reason"), Some("Reason is required"));

        engine.set_value("reason", "duplicate");
        assert_eq!(engine.error("reason"), None);
    }

    #[test]
    fn params_use_replace_semantics() {
        let mut engine = catalog();
        engine.set_value("status", "active");
        engine.set_value("category", FilterValue::list(["books", "music"]));

        let params = engine.to_params();
        assert_eq!(params["filter_category"], "books,music");
        assert_eq!(engine.query_string(), "filter_category=books%2Cmusic&filter_status=active");

        let mut other = catalog();
        other.set_value("status", "draft");
        other.from_params(&params);
        assert_eq!(other.values(), engine.values());

        let mut empty = Params::new();
        empty.insert("unrelated".into(), "1".into());
        other.from_params(&empty);
        assert_eq!(other.active_count(), 0);
    }

    #[test]
    fn initial_params_seed_values() {
        let mut params = Params::new();
        params.insert("filter_status".into(), "archived".into());
        params.insert("filter_category".into(), "a,b".into());
        let engine = FilterEngine::builder(catalog_filters(RecordingLoader::echo()))
            .initial_params(params)
            .options_cache(OptionsCache::new())
            .build();

        assert_eq!(engine.value("category"), Some(&FilterValue::list(["a", "b"])));
        assert!(!engine.is_dirty());
    }

    #[test]
    fn url_sync_writes_committed_state() {
        let sink = RecordingSink::new();
        let mut engine = FilterEngine::builder(catalog_filters(RecordingLoader::echo()))
            .sync_url(true)
            .param_sink(sink.clone())
            .options_cache(OptionsCache::new())
            .build();

        engine.set_value("status", "active");
        engine.clear_all_filters();

        let writes = sink.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0]["filter_status"], "active");
        assert!(writes[1].is_empty());
    }

    #[test]
    fn url_sync_is_off_by_default() {
        let sink = RecordingSink::new();
        let mut engine = FilterEngine::builder(catalog_filters(RecordingLoader::echo()))
            .param_sink(sink.clone())
            .options_cache(OptionsCache::new())
            .build();
        engine.set_value("status", "active");
        assert!(sink.writes().is_empty());
    }

    #[test]
    fn controlled_mode_requests_changes() {
        let (log, callback) = recorder();
        let mut controlled = ValueMap::new();
        controlled.insert("status".into(), FilterValue::from("active"));
        controlled.insert("category".into(), FilterValue::list(["books"]));
        let mut engine = FilterEngine::builder(catalog_filters(RecordingLoader::echo()))
            .controlled(controlled)
            .options_cache(OptionsCache::new())
            .on_change(callback)
            .build();

        engine.set_value("status", "archived");

        // Local values are untouched; the proposal carries the cascade reset
        assert_eq!(engine.values()["status"], FilterValue::from("active"));
        let proposal = log.lock()[0].clone();
        assert_eq!(proposal["status"], FilterValue::from("archived"));
        assert_eq!(proposal["category"], FilterValue::list(Vec::<String>::new()));

        engine.sync_controlled(proposal.clone());
        assert_eq!(engine.values(), &proposal);
        // Already consistent: no further request
        assert_eq!(log.lock().len(), 1);
    }

    #[test]
    fn sync_controlled_reports_cascade_corrections() {
        let (log, callback) = recorder();
        let mut controlled = ValueMap::new();
        controlled.insert("status".into(), FilterValue::from("active"));
        controlled.insert("category".into(), FilterValue::list(["books"]));
        let mut engine = FilterEngine::builder(catalog_filters(RecordingLoader::echo()))
            .controlled(controlled)
            .options_cache(OptionsCache::new())
            .on_change(callback)
            .build();

        let mut next = engine.values().clone();
        next.insert("status".into(), FilterValue::from("draft"));
        engine.sync_controlled(next);

        assert_eq!(engine.value("category"), Some(&FilterValue::list(Vec::<String>::new())));
        assert_eq!(log.lock().len(), 1);
    }

    #[test]
    fn controlled_deferred_keeps_pending_local_until_apply() {
        let (log, callback) = recorder();
        let mut engine = FilterEngine::builder(catalog_filters(RecordingLoader::echo()))
            .controlled(ValueMap::new())
            .deferred_apply(true)
            .options_cache(OptionsCache::new())
            .on_change(callback)
            .build();

        engine.set_value("status", "active");
        assert!(engine.has_pending_changes());
        assert!(log.lock().is_empty());

        assert!(engine.apply_filters());
        assert_eq!(log.lock()[0]["status"], FilterValue::from("active"));

        let proposal = log.lock()[0].clone();
        engine.sync_controlled(proposal);
        assert!(!engine.has_pending_changes());
        assert_eq!(engine.active_count(), 1);
    }

    #[test]
    fn sync_controlled_keeps_pending_edits_of_unmoved_filters() {
        let filters = FilterSet::new([
            FilterDefinition::text("q", "Search"),
            FilterDefinition::select("status", "Status"),
        ]);
        let mut engine = FilterEngine::builder(filters)
            .controlled(ValueMap::new())
            .deferred_apply(true)
            .build();

        engine.set_value("q", "shoes");
        let mut owner = ValueMap::new();
        owner.insert("status".into(), FilterValue::from("active"));
        engine.sync_controlled(owner);

        assert!(engine.has_pending_changes());
        assert_eq!(engine.value("q"), Some(&FilterValue::from("shoes")));
        assert_eq!(engine.values()["status"], FilterValue::from("active"));
    }

    #[test]
    fn active_filters_use_short_labels_and_format_hooks() {
        let filters = FilterSet::new([
            FilterDefinition::number_range("price", "Price range")
                .short_label("Price")
                .format_with(|v| format!("${}", v.display())),
            FilterDefinition::boolean("archived", "Archived"),
            FilterDefinition::text("q", "Search"),
        ]);
        let mut engine = FilterEngine::builder(filters).build();
        engine.set_value("price", FilterValue::number_range(Some(10.0), Some(50.0)));
        engine.set_value("archived", false);

        let active = engine.active_filters();
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].label, "Price");
        assert_eq!(active[0].display, "$10 - 50");
        assert_eq!(active[1].display, "No");
    }

    #[test]
    fn state_snapshot() {
        let mut engine = catalog();
        engine.set_value("status", "active");
        let state = engine.state();
        assert_eq!(state.active_count, 1);
        assert!(state.touched.contains("status"));
        assert!(state.dirty);
        assert!(state.loading.is_empty());
    }

    #[test]
    fn detached_reference_fails() {
        let detached = EngineRef::detached();
        assert!(!detached.is_attached());
        assert!(matches!(detached.active_count(), Err(SiftError::NotInitialized)));
        assert!(matches!(
            detached.set_value("status", "x"),
            Err(SiftError::NotInitialized)
        ));
    }

    #[test]
    fn attached_reference_shares_one_engine() {
        let handle = EngineRef::new(catalog());
        let other = handle.clone();
        handle.set_value("status", "active").unwrap();
        assert_eq!(other.active_count().unwrap(), 1);
        assert!(other.view("category").unwrap().visible);
        assert!(matches!(other.view("ghost"), Err(SiftError::UnknownFilter(_))));
    }

    #[tokio::test]
    async fn options_load_lazily_with_dependency_snapshot() {
        let loader = RecordingLoader::echo();
        let mut engine = FilterEngine::builder(catalog_filters(loader.clone()))
            .options_cache(OptionsCache::new())
            .build();
        engine.set_value("status", "active");
        assert_eq!(loader.call_count(), 0);

        let first = engine.options("category").unwrap();
        assert!(first.loading);
        engine.options_resolver("category").unwrap().wait_idle().await;

        let state = engine.options("category").unwrap();
        assert_eq!(option_values(&state), vec!["active::1"]);
        assert_eq!(loader.call_count(), 1);
    }

    #[tokio::test]
    async fn active_resolver_refreshes_when_dependencies_move() {
        let loader = RecordingLoader::echo();
        let mut engine = FilterEngine::builder(catalog_filters(loader.clone()))
            .options_cache(OptionsCache::new())
            .build();
        engine.set_value("status", "active");
        engine.options("category");
        let resolver = engine.options_resolver("category").unwrap();
        resolver.wait_idle().await;

        engine.set_value("status", "draft");
        resolver.wait_idle().await;

        assert_eq!(option_values(&resolver.state()), vec!["draft::1"]);
        assert_eq!(loader.call_count(), 2);
    }

    #[tokio::test]
    async fn reload_dependency_invalidates_cache() {
        let loader = RecordingLoader::echo();
        let filters = FilterSet::new([
            FilterDefinition::select("region", "Region"),
            FilterDefinition::select("store", "Store")
                .depends_on(FilterDependency::reload_on("region"))
                .loader(loader.clone()),
        ]);
        let cache = OptionsCache::new();
        let mut engine = FilterEngine::builder(filters)
            .options_cache(cache.clone())
            .build();

        engine.set_value("region", "north");
        engine.options("store");
        let resolver = engine.options_resolver("store").unwrap();
        resolver.wait_idle().await;
        engine.set_value("region", "south");
        resolver.wait_idle().await;
        // Going back to a seen snapshot still hits the loader: the reload
        // signal dropped every cached page of the filter
        engine.set_value("region", "north");
        resolver.wait_idle().await;

        assert_eq!(loader.call_count(), 3);
        assert_eq!(option_values(&resolver.state()), vec!["north::1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn search_through_engine_is_debounced() {
        let loader = RecordingLoader::echo();
        let filters = FilterSet::new([FilterDefinition::select("city", "City")
            .loader(loader.clone())
            .debounce(Duration::from_millis(100))]);
        let engine = FilterEngine::builder(filters)
            .options_cache(OptionsCache::new())
            .build();

        engine.search("city", "l");
        engine.search("city", "ly");
        engine.search("city", "lyo");
        engine.options_resolver("city").unwrap().wait_idle().await;

        assert_eq!(loader.call_count(), 1);
        assert_eq!(loader.calls()[0].search, "lyo");
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_engine_cancels_loads() {
        let loader = RecordingLoader::echo().with_delay(Duration::from_secs(5));
        let filters = FilterSet::new([FilterDefinition::select("city", "City").loader(loader.clone())]);
        let engine = FilterEngine::builder(filters)
            .options_cache(OptionsCache::new())
            .build();

        engine.options("city");
        let resolver = engine.options_resolver("city").unwrap();
        drop(engine);

        resolver.wait_idle().await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!resolver.state().loaded);
    }
}
