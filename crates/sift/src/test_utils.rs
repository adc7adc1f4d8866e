//! Fixtures for tests: a recording options loader and a small catalog filter set.

use crate::definition::{FilterDefinition, FilterDependency, FilterSet};
use crate::options::{
    FilterOption, LoadError, LoadRequest, OptionsLoader, OptionsPage, OptionsState,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

type Responder = Arc<dyn Fn(&LoadRequest) -> Result<OptionsPage, LoadError> + Send + Sync>;
type DelayFn = Arc<dyn Fn(&LoadRequest) -> Duration + Send + Sync>;

/// Loader that records every request and answers through a closure,
/// optionally after a delay.
#[derive(Clone)]
pub struct RecordingLoader {
    calls: Arc<Mutex<Vec<LoadRequest>>>,
    respond: Responder,
    delay: DelayFn,
}

impl RecordingLoader {
    pub fn new<F>(respond: F) -> Self
    where
        F: Fn(&LoadRequest) -> Result<OptionsPage, LoadError> + Send + Sync + 'static,
    {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            respond: Arc::new(respond),
            delay: Arc::new(|_| Duration::ZERO),
        }
    }

    /// Answers with a single option describing the request:
    /// `"<dependency values>:<search>:<page>"`, or `"<search>:<page>"` without
    /// dependency values. Reports more pages up to page 3.
    pub fn echo() -> Self {
        Self::new(|request| {
            let value = describe(request);
            Ok(OptionsPage::new(vec![FilterOption::new(value.clone(), value)])
                .with_more(request.page < 3)
                .with_total(3))
        })
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        self.with_delay_fn(move |_| delay)
    }

    pub fn with_delay_fn<F>(mut self, delay: F) -> Self
    where
        F: Fn(&LoadRequest) -> Duration + Send + Sync + 'static,
    {
        self.delay = Arc::new(delay);
        self
    }

    pub fn calls(&self) -> Vec<LoadRequest> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl OptionsLoader for RecordingLoader {
    async fn load(&self, request: LoadRequest) -> Result<OptionsPage, LoadError> {
        self.calls.lock().push(request.clone());
        let delay = (self.delay)(&request);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        (self.respond)(&request)
    }
}

fn describe(request: &LoadRequest) -> String {
    let scope: Vec<String> = request
        .dependencies
        .values()
        .map(|v| v.display())
        .filter(|s| !s.is_empty())
        .collect();
    if scope.is_empty() {
        format!("{}:{}", request.search, request.page)
    } else {
        format!("{}:{}:{}", scope.join("+"), request.search, request.page)
    }
}

/// Option values of a state, in order.
pub fn option_values(state: &OptionsState) -> Vec<String> {
    state.options.iter().map(|o| o.value.clone()).collect()
}

pub fn status_options() -> Vec<FilterOption> {
    vec![
        FilterOption::new("active", "Active"),
        FilterOption::new("archived", "Archived"),
        FilterOption::new("draft", "Draft"),
    ]
}

/// `status` (static select) and `category` (loaded multi-select shown only
/// while a status is chosen, reset when the status changes).
pub fn catalog_filters(categories: RecordingLoader) -> FilterSet {
    FilterSet::new([
        FilterDefinition::select("status", "Status").options(status_options()),
        FilterDefinition::multi_select("category", "Category")
            .depends_on(FilterDependency::show_when("status").reset_on_change())
            .loader(categories),
    ])
}
