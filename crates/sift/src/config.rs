//! # Configuration
//!
//! Engine configuration is managed by [`confique`], layered in priority order:
//!
//! 1. **Environment variables**: `SIFT_PARAM_PREFIX`, `SIFT_DEBOUNCE_MS`, etc.
//! 2. **Config file**: a TOML file, when one is given (the CLI passes
//!    `--config` or `sift.toml` in the platform config directory).
//! 3. **Compiled defaults**: via `#[config(default = ...)]`.
//!
//! Builders can still override any of this per engine.
//!
//! ## Available Settings
//!
//! | Key | Default | Description |
//! |-----|---------|-------------|
//! | `param_prefix` | `filter_` | Prefix of every encoded query parameter |
//! | `array_delimiter` | `,` | Separator of multi-select elements |
//! | `range_delimiter` | `..` | Separator of range bounds |
//! | `debounce_ms` | `300` | Search debounce window |
//! | `page_size` | `20` | Options requested per page |
//! | `cache_ttl_secs` | `300` | Lifetime of cached option pages |
//! | `deferred_apply` | `false` | Buffer writes until `apply_filters` |
//! | `sync_url` | `false` | Push committed state to the installed param sink |

use crate::error::Result;
use crate::store::ApplyMode;
use confique::Config;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Config, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    #[config(default = "filter_", env = "SIFT_PARAM_PREFIX")]
    pub param_prefix: String,

    /// Only the first character is used.
    #[config(default = ",", env = "SIFT_ARRAY_DELIMITER")]
    pub array_delimiter: String,

    #[config(default = "..", env = "SIFT_RANGE_DELIMITER")]
    pub range_delimiter: String,

    #[config(default = 300, env = "SIFT_DEBOUNCE_MS")]
    pub debounce_ms: u64,

    #[config(default = 20, env = "SIFT_PAGE_SIZE")]
    pub page_size: usize,

    #[config(default = 300, env = "SIFT_CACHE_TTL_SECS")]
    pub cache_ttl_secs: u64,

    #[config(default = false, env = "SIFT_DEFERRED_APPLY")]
    pub deferred_apply: bool,

    #[config(default = false, env = "SIFT_SYNC_URL")]
    pub sync_url: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            param_prefix: "filter_".to_string(),
            array_delimiter: ",".to_string(),
            range_delimiter: "..".to_string(),
            debounce_ms: 300,
            page_size: 20,
            cache_ttl_secs: 300,
            deferred_apply: false,
            sync_url: false,
        }
    }
}

impl EngineConfig {
    /// Load from the environment, then `path` if it exists, then defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = EngineConfig::builder().env();
        if let Some(path) = path {
            builder = builder.file(path);
        }
        Ok(builder.load()?)
    }

    pub fn array_delimiter(&self) -> char {
        self.array_delimiter.chars().next().unwrap_or(',')
    }

    /// Range separator; an empty setting falls back to `..`.
    pub fn range_delimiter(&self) -> &str {
        if self.range_delimiter.is_empty() {
            ".."
        } else {
            &self.range_delimiter
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Page size, never zero.
    pub fn page_size(&self) -> usize {
        self.page_size.max(1)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn apply_mode(&self) -> ApplyMode {
        if self.deferred_apply {
            ApplyMode::Deferred
        } else {
            ApplyMode::Immediate
        }
    }
}
