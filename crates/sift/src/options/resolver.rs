//! Per-filter option resolution.
//!
//! An [`OptionsResolver`] owns the option list of one filter: it decides
//! between static and loaded options, debounces search input, paginates,
//! consults the shared [`OptionsCache`], and makes sure a superseded request
//! never writes over the result of a newer one.
//!
//! ## Request Ordering
//!
//! Every load bumps a generation counter and aborts the previously spawned
//! task. A response is applied only if its generation is still current when it
//! arrives, so state always reflects the most recently *issued* request, not
//! the most recently *completed* one.
//!
//! ```text
//! load A (gen 1) ──────────────────────────► resolves late → discarded
//!        load B (gen 2) ──────► resolves → applied
//! ```
//!
//! ## State Observation
//!
//! State lives in a `tokio::sync::watch` channel. Widgets read a snapshot with
//! [`OptionsResolver::state`] or [`OptionsResolver::subscribe`] to be woken on
//! every change.

use super::cache::{snapshot_key, CacheKey, OptionsCache, DEFAULT_CACHE_TTL};
use super::loader::{FilterOption, LoadError, LoadRequest, OptionsLoader, OptionsPage, OptionsSource};
use crate::value::ValueMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Loading behaviour of one resolver.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionsSettings {
    pub debounce: Duration,
    pub page_size: usize,
    pub cache_enabled: bool,
    pub cache_ttl: Duration,
}

impl Default for OptionsSettings {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            page_size: DEFAULT_PAGE_SIZE,
            cache_enabled: true,
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }
}

/// Snapshot of a filter's options, as widgets see it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OptionsState {
    pub options: Vec<FilterOption>,
    pub loading: bool,
    pub error: Option<String>,
    pub has_more: bool,
    pub total_count: Option<usize>,
    /// Last loaded page; 0 until something was loaded.
    pub page: usize,
    /// Search text as typed (before debounce).
    pub search: String,
    /// A search is waiting out its debounce window.
    pub debouncing: bool,
    /// At least one load completed successfully.
    pub loaded: bool,
}

impl OptionsState {
    pub fn is_idle(&self) -> bool {
        !self.loading && !self.debouncing
    }
}

#[derive(Default)]
struct Control {
    generation: u64,
    search_generation: u64,
    inflight: Option<JoinHandle<()>>,
    debounce: Option<JoinHandle<()>>,
    /// Effective (debounced) search text.
    search: String,
    dependencies: ValueMap,
    /// (search, dependency snapshot) of the current list or in-flight load.
    requested_for: Option<(String, String)>,
}

impl Control {
    fn abort_inflight(&mut self) {
        self.generation += 1;
        if let Some(task) = self.inflight.take() {
            task.abort();
        }
    }

    fn abort_debounce(&mut self) {
        self.search_generation += 1;
        if let Some(task) = self.debounce.take() {
            task.abort();
        }
    }

    fn current_pair(&self) -> (String, String) {
        (self.search.trim().to_string(), snapshot_key(&self.dependencies))
    }
}

struct LoadPlan {
    generation: u64,
    load_more: bool,
    key: CacheKey,
    request: LoadRequest,
    loader: Arc<dyn OptionsLoader>,
}

enum Begin {
    /// Nothing to run: no source, a no-op load-more, or state already settled.
    Settled,
    Run(LoadPlan),
}

struct Inner {
    filter_id: String,
    source: OptionsSource,
    settings: OptionsSettings,
    cache: OptionsCache,
    state: watch::Sender<OptionsState>,
    control: Mutex<Control>,
}

/// Option resolution for one filter. Clones share state.
#[derive(Clone)]
pub struct OptionsResolver {
    inner: Arc<Inner>,
}

impl OptionsResolver {
    pub fn new(
        filter_id: impl Into<String>,
        source: OptionsSource,
        settings: OptionsSettings,
        cache: OptionsCache,
    ) -> Self {
        let (state, _) = watch::channel(OptionsState::default());
        let resolver = Self {
            inner: Arc::new(Inner {
                filter_id: filter_id.into(),
                source,
                settings,
                cache,
                state,
                control: Mutex::new(Control::default()),
            }),
        };
        if let OptionsSource::Static(options) = &resolver.inner.source {
            resolver.apply_static(options, "");
        }
        resolver
    }

    pub fn filter_id(&self) -> &str {
        &self.inner.filter_id
    }

    pub fn settings(&self) -> &OptionsSettings {
        &self.inner.settings
    }

    pub fn is_static(&self) -> bool {
        matches!(self.inner.source, OptionsSource::Static(_))
    }

    pub fn state(&self) -> OptionsState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<OptionsState> {
        self.inner.state.subscribe()
    }

    pub fn dependencies(&self) -> ValueMap {
        self.inner.control.lock().dependencies.clone()
    }

    /// Record the dependency snapshot future loads are keyed by.
    ///
    /// Returns `true` when the snapshot changed. The next fresh load starts
    /// again from page 1.
    pub fn set_dependencies(&self, dependencies: ValueMap) -> bool {
        let mut control = self.inner.control.lock();
        if control.dependencies == dependencies {
            return false;
        }
        control.dependencies = dependencies;
        true
    }

    /// Whether anything was ever requested from this resolver.
    pub fn is_active(&self) -> bool {
        self.inner.control.lock().requested_for.is_some()
    }

    /// Whether the current list does not match the current (search, dependencies) pair.
    pub fn needs_load(&self) -> bool {
        if !matches!(self.inner.source, OptionsSource::Loader(_)) {
            return false;
        }
        if self.inner.state.borrow().debouncing {
            return false;
        }
        let control = self.inner.control.lock();
        control.requested_for.as_ref() != Some(&control.current_pair())
    }

    /// Lazy path: load only if not loaded or loading for the current pair.
    pub fn ensure_loaded(&self) {
        if self.needs_load() {
            self.spawn_load(false);
        }
    }

    /// Load and wait for the result.
    ///
    /// `load_more` fetches the next page and appends; otherwise page 1 is
    /// loaded and replaces the list.
    pub async fn load(&self, load_more: bool) {
        if let Begin::Run(plan) = self.begin(load_more) {
            self.run(plan).await;
        }
    }

    /// Drop this filter's cache entries and load page 1 again.
    pub async fn reload(&self) {
        let removed = self.inner.cache.invalidate(&self.inner.filter_id);
        debug!(filter = %self.inner.filter_id, removed, "reloading options");
        self.load(false).await;
    }

    /// Start a load on the ambient runtime without waiting for it.
    pub fn spawn_load(&self, load_more: bool) {
        let Begin::Run(plan) = self.begin(load_more) else {
            return;
        };
        let generation = plan.generation;
        let Ok(handle) = Handle::try_current() else {
            self.fail_without_runtime(generation);
            return;
        };
        let this = self.clone();
        let task = handle.spawn(async move { this.run(plan).await });

        let mut control = self.inner.control.lock();
        if control.generation == generation {
            control.inflight = Some(task);
        } else {
            task.abort();
        }
    }

    pub fn spawn_reload(&self) {
        self.inner.cache.invalidate(&self.inner.filter_id);
        self.spawn_load(false);
    }

    /// Fetch the next page. No-op while loading or when there is nothing more.
    pub fn load_more(&self) {
        self.spawn_load(true);
    }

    /// Update the search text.
    ///
    /// The outstanding request and any pending debounce timer are cancelled
    /// immediately; the load for the new text starts once the debounce window
    /// passes without another call.
    pub fn search(&self, text: impl Into<String>) {
        let text = text.into();

        if let OptionsSource::Static(options) = &self.inner.source {
            self.inner.control.lock().search = text.clone();
            self.apply_static(options, &text);
            return;
        }

        let token = {
            let mut control = self.inner.control.lock();
            control.abort_debounce();
            control.abort_inflight();
            control.search_generation
        };
        self.inner.state.send_modify(|state| {
            state.search = text.clone();
            state.debouncing = true;
            state.loading = false;
        });

        let Ok(handle) = Handle::try_current() else {
            warn!(filter = %self.inner.filter_id, "no async runtime; search applied without loading");
            self.commit_search(token, &text);
            self.end_debounce(token);
            return;
        };

        let this = self.clone();
        let delay = self.inner.settings.debounce;
        let task = handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if !this.commit_search(token, &text) {
                return;
            }
            this.load(false).await;
            this.end_debounce(token);
        });

        let mut control = self.inner.control.lock();
        if control.search_generation == token {
            control.debounce = Some(task);
        } else {
            task.abort();
        }
    }

    /// Abort pending timers and requests. State keeps its last settled list.
    pub fn cancel(&self) {
        {
            let mut control = self.inner.control.lock();
            control.abort_debounce();
            control.abort_inflight();
        }
        self.inner.state.send_if_modified(|state| {
            let busy = state.loading || state.debouncing;
            state.loading = false;
            state.debouncing = false;
            busy
        });
    }

    /// Resolve once neither a load nor a debounce is outstanding.
    pub async fn wait_idle(&self) {
        let mut rx = self.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(OptionsState::is_idle).await;
    }

    fn begin(&self, load_more: bool) -> Begin {
        let loader = match &self.inner.source {
            OptionsSource::Loader(loader) => loader.clone(),
            OptionsSource::Static(_) | OptionsSource::None => return Begin::Settled,
        };

        let mut control = self.inner.control.lock();
        let (page, has_more, loading) = {
            let state = self.inner.state.borrow();
            (state.page, state.has_more, state.loading)
        };
        if load_more && (loading || !has_more) {
            return Begin::Settled;
        }

        control.abort_inflight();
        let target_page = if load_more { page + 1 } else { 1 };
        let search = control.search.trim().to_string();
        let key = CacheKey::new(&self.inner.filter_id, &search, &control.dependencies, target_page);
        control.requested_for = Some(control.current_pair());

        if !load_more && self.inner.settings.cache_enabled {
            if let Some(hit) = self.inner.cache.get(&key, self.inner.settings.cache_ttl) {
                debug!(filter = %self.inner.filter_id, search = %search, "options served from cache");
                self.inner.state.send_modify(|state| {
                    state.options = hit.options;
                    state.has_more = hit.has_more.unwrap_or(false);
                    state.total_count = hit.total_count;
                    state.page = target_page;
                    state.loading = false;
                    state.error = None;
                    state.loaded = true;
                });
                return Begin::Settled;
            }
        }

        self.inner.state.send_modify(|state| {
            state.loading = true;
            state.error = None;
        });

        Begin::Run(LoadPlan {
            generation: control.generation,
            load_more,
            request: LoadRequest {
                filter_id: self.inner.filter_id.clone(),
                search,
                page: target_page,
                page_size: self.inner.settings.page_size.max(1),
                dependencies: control.dependencies.clone(),
            },
            key,
            loader,
        })
    }

    async fn run(&self, plan: LoadPlan) {
        let result = plan.loader.load(plan.request.clone()).await;
        self.finish(plan, result);
    }

    fn finish(&self, plan: LoadPlan, result: Result<OptionsPage, LoadError>) {
        let control = self.inner.control.lock();
        if control.generation != plan.generation {
            debug!(
                filter = %self.inner.filter_id,
                page = plan.request.page,
                "discarding superseded options response"
            );
            return;
        }

        match result {
            Ok(page) => {
                if self.inner.settings.cache_enabled {
                    self.inner.cache.insert(plan.key, page.clone());
                }
                self.inner.state.send_modify(|state| {
                    if plan.load_more {
                        state.options.extend(page.options);
                    } else {
                        state.options = page.options;
                    }
                    state.has_more = page.has_more.unwrap_or(false);
                    state.total_count = page.total_count;
                    state.page = plan.request.page;
                    state.loading = false;
                    state.error = None;
                    state.loaded = true;
                });
            }
            Err(LoadError::Cancelled) => {
                debug!(filter = %self.inner.filter_id, "options load cancelled");
                self.inner.state.send_modify(|state| state.loading = false);
            }
            Err(LoadError::Failed(message)) => {
                warn!(filter = %self.inner.filter_id, error = %message, "options load failed");
                self.inner.state.send_modify(|state| {
                    state.loading = false;
                    state.error = Some(message);
                });
            }
        }
    }

    /// Make `text` the effective search if `token` is still the latest search.
    fn commit_search(&self, token: u64, text: &str) -> bool {
        let mut control = self.inner.control.lock();
        if control.search_generation != token {
            return false;
        }
        control.search = text.to_string();
        true
    }

    fn end_debounce(&self, token: u64) {
        let control = self.inner.control.lock();
        if control.search_generation == token {
            self.inner.state.send_modify(|state| state.debouncing = false);
        }
    }

    fn fail_without_runtime(&self, generation: u64) {
        let control = self.inner.control.lock();
        if control.generation != generation {
            return;
        }
        warn!(filter = %self.inner.filter_id, "no async runtime; options cannot be loaded");
        self.inner.state.send_modify(|state| {
            state.loading = false;
            state.error = Some("options cannot be loaded outside an async runtime".to_string());
        });
    }

    fn apply_static(&self, options: &[FilterOption], search: &str) {
        let needle = search.trim().to_lowercase();
        let matching: Vec<FilterOption> = if needle.is_empty() {
            options.to_vec()
        } else {
            options
                .iter()
                .filter(|o| o.label.to_lowercase().contains(&needle))
                .cloned()
                .collect()
        };
        self.inner.state.send_modify(|state| {
            state.total_count = Some(matching.len());
            state.options = matching;
            state.search = search.to_string();
            state.has_more = false;
            state.page = 1;
            state.loading = false;
            state.debouncing = false;
            state.error = None;
            state.loaded = true;
        });
    }
}

impl std::fmt::Debug for OptionsResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptionsResolver")
            .field("filter_id", &self.inner.filter_id)
            .field("source", &self.inner.source)
            .field("state", &*self.inner.state.borrow())
            .finish()
    }
}
