//! URL synchronization.
//!
//! When `sync_url` is on, the engine pushes its encoded parameters to a
//! [`ParamSink`] after every committed change. [`UrlSink`] keeps a
//! [`url::Url`] in step: parameters outside the engine's prefix are left
//! alone, prefixed ones are replaced wholesale.

use crate::codec::Params;
use parking_lot::Mutex;
use std::sync::Arc;
use url::Url;

/// Receives the encoded filter state after each committed change.
pub trait ParamSink: Send {
    /// `prefix` is the codec's parameter prefix; `params` holds every
    /// parameter the engine currently owns.
    fn write_params(&mut self, prefix: &str, params: &Params);
}

/// Sink writing into a shared URL.
#[derive(Debug, Clone)]
pub struct UrlSink {
    url: Arc<Mutex<Url>>,
}

impl UrlSink {
    pub fn new(url: Url) -> Self {
        Self {
            url: Arc::new(Mutex::new(url)),
        }
    }

    /// Current URL.
    pub fn url(&self) -> Url {
        self.url.lock().clone()
    }
}

impl ParamSink for UrlSink {
    fn write_params(&mut self, prefix: &str, params: &Params) {
        let mut url = self.url.lock();
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .into_owned()
            .filter(|(key, _)| !key.starts_with(prefix))
            .collect();

        if kept.is_empty() && params.is_empty() {
            url.set_query(None);
            return;
        }
        url.query_pairs_mut()
            .clear()
            .extend_pairs(kept.iter())
            .extend_pairs(params.iter());
    }
}

/// Sink recording every write; handy in tests and for custom routers.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    writes: Arc<Mutex<Vec<Params>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> Vec<Params> {
        self.writes.lock().clone()
    }

    pub fn last(&self) -> Option<Params> {
        self.writes.lock().last().cloned()
    }
}

impl ParamSink for RecordingSink {
    fn write_params(&mut self, _prefix: &str, params: &Params) {
        self.writes.lock().push(params.clone());
    }
}
