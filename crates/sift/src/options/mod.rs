//! # Options
//!
//! Option lists of select-like filters, and how they are obtained.
//!
//! A filter's options come from one of two places:
//!
//! - **Static options** declared on the definition. They are always present,
//!   searched locally and never cached.
//! - **An [`OptionsLoader`]**, called with the search text, page and the
//!   current values of the filter's dependency fields.
//!
//! Loaded pages go through a process-wide [`OptionsCache`] keyed by
//! `(filter id, search, dependency snapshot, page)`. Each filter gets one
//! [`OptionsResolver`] that owns the debounce timer, the pagination cursor
//! and the in-flight request.
//!
//! ```text
//!   search("par") ──► debounce ──► cache? ──hit──► state
//!                                     │
//!                                    miss
//!                                     ▼
//!                               loader.load() ──► cache + state
//! ```

pub mod cache;
pub mod loader;
pub mod resolver;

pub use cache::{invalidate_options_cache, snapshot_key, CacheKey, OptionsCache, DEFAULT_CACHE_TTL};
pub use loader::{
    loader_fn, FilterOption, FnLoader, LoadError, LoadRequest, OptionsLoader, OptionsPage,
    OptionsSource,
};
pub use resolver::{OptionsResolver, OptionsSettings, OptionsState};
