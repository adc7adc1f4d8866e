//! Option lists and the loader contract.

use crate::value::ValueMap;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// One selectable option of a select or multi-select filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterOption {
    pub value: String,
    pub label: String,
    #[serde(default)]
    pub disabled: bool,
    /// Number of matching records, when the backend reports facet counts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

impl FilterOption {
    pub fn new(value: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
            disabled: false,
            count: None,
            group: None,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    pub fn with_count(mut self, count: u64) -> Self {
        self.count = Some(count);
        self
    }

    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }
}

/// Parameters handed to an [`OptionsLoader`].
#[derive(Debug, Clone, PartialEq)]
pub struct LoadRequest {
    pub filter_id: String,
    /// Debounced search text, trimmed.
    pub search: String,
    /// 1-based page number.
    pub page: usize,
    pub page_size: usize,
    /// Current values of the filter's dependency fields.
    pub dependencies: ValueMap,
}

/// One page of loaded options.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OptionsPage {
    pub options: Vec<FilterOption>,
    /// `None` is read as "no more pages".
    pub has_more: Option<bool>,
    pub total_count: Option<usize>,
}

impl OptionsPage {
    pub fn new(options: Vec<FilterOption>) -> Self {
        Self {
            options,
            has_more: None,
            total_count: None,
        }
    }

    pub fn with_more(mut self, has_more: bool) -> Self {
        self.has_more = Some(has_more);
        self
    }

    pub fn with_total(mut self, total: usize) -> Self {
        self.total_count = Some(total);
        self
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    /// The request was superseded or aborted. Never surfaced to users.
    #[error("load was cancelled")]
    Cancelled,

    #[error("{0}")]
    Failed(String),
}

impl LoadError {
    pub fn failed(message: impl Into<String>) -> Self {
        LoadError::Failed(message.into())
    }
}

/// Asynchronous source of options for one filter.
#[async_trait]
pub trait OptionsLoader: Send + Sync {
    async fn load(&self, request: LoadRequest) -> Result<OptionsPage, LoadError>;
}

/// Adapter turning an async closure into an [`OptionsLoader`]. See [`loader_fn`].
pub struct FnLoader<F>(F);

#[async_trait]
impl<F, Fut> OptionsLoader for FnLoader<F>
where
    F: Fn(LoadRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<OptionsPage, LoadError>> + Send + 'static,
{
    async fn load(&self, request: LoadRequest) -> Result<OptionsPage, LoadError> {
        (self.0)(request).await
    }
}

/// Build a loader from an async closure.
///
/// ```ignore
/// let loader = loader_fn(|req: LoadRequest| async move {
///     let rows = api.search_categories(&req.search, req.page).await?;
///     Ok(OptionsPage::new(rows).with_more(rows.len() == req.page_size))
/// });
/// ```
pub fn loader_fn<F, Fut>(f: F) -> FnLoader<F>
where
    F: Fn(LoadRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<OptionsPage, LoadError>> + Send + 'static,
{
    FnLoader(f)
}

/// Where a filter's options come from.
#[derive(Clone, Default)]
pub enum OptionsSource {
    /// The filter has no option list (text, number, date...).
    #[default]
    None,
    /// Options declared up front; never cached, searched locally.
    Static(Vec<FilterOption>),
    Loader(Arc<dyn OptionsLoader>),
}

impl OptionsSource {
    pub fn is_none(&self) -> bool {
        matches!(self, OptionsSource::None)
    }
}

impl fmt::Debug for OptionsSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionsSource::None => f.write_str("None"),
            OptionsSource::Static(options) => f.debug_tuple("Static").field(&options.len()).finish(),
            OptionsSource::Loader(_) => f.write_str("Loader"),
        }
    }
}
