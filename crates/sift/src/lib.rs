//! # sift
//!
//! A declarative filter engine for collection views: a set of typed filter
//! definitions goes in, and out come current values, derived visibility and
//! enablement, option lists for select-like filters, and a URL-parameter
//! encoding of the state.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────────────────────┐
//!   widgets ────► │        FilterEngine          │ ────► on_change / on_apply
//!                 │  (engine.rs, EngineRef)      │ ────► ParamSink (sync.rs)
//!                 └──────┬──────────┬────────┬───┘
//!                        │          │        │
//!                 ┌──────▼───┐ ┌────▼─────┐ ┌▼──────────────┐
//!                 │ValueStore│ │Dependency│ │OptionsResolver│
//!                 │ store.rs │ │  Tracker │ │  options/     │
//!                 └──────────┘ └──────────┘ └───────────────┘
//!                        │                         │
//!                 ┌──────▼───┐              ┌──────▼──────┐
//!                 │ParamCodec│              │OptionsCache │
//!                 │ codec.rs │              │ (shared)    │
//!                 └──────────┘              └─────────────┘
//! ```
//!
//! | Module         | Role                                                     |
//! |----------------|----------------------------------------------------------|
//! | [`value`]      | The tagged [`FilterValue`] and its emptiness rule        |
//! | [`definition`] | Filter kinds, definitions, dependencies, [`FilterSet`]   |
//! | [`store`]      | Committed and pending values, touched flags, validation  |
//! | [`dependency`] | Visibility/enablement and change detection               |
//! | [`options`]    | Async option loading: cache, debounce, cancellation      |
//! | [`codec`]      | Values to and from query parameters                      |
//! | [`engine`]     | The orchestrator tying the above together                |
//! | [`manifest`]   | Filter sets declared in TOML                             |
//! | [`config`]     | Engine settings from file and environment                |
//! | [`sync`]       | Pushing encoded state into a URL                         |
//!
//! ## Quick Start
//!
//! ```
//! use sift::{FilterDefinition, FilterDependency, FilterEngine, FilterSet, FilterValue};
//!
//! let filters = FilterSet::new([
//!     FilterDefinition::select("status", "Status"),
//!     FilterDefinition::multi_select("category", "Category")
//!         .depends_on(FilterDependency::show_when("status").reset_on_change()),
//! ]);
//! let mut engine = FilterEngine::builder(filters).build();
//!
//! engine.set_value("status", "active");
//! engine.set_value("category", FilterValue::list(["books"]));
//! assert_eq!(engine.active_count(), 2);
//!
//! // Changing the status clears the category
//! engine.set_value("status", "archived");
//! assert_eq!(engine.active_count(), 1);
//! assert_eq!(engine.query_string(), "filter_status=archived");
//! ```
//!
//! ## Async
//!
//! Option loads run on the ambient tokio runtime. Without one, loads fail
//! with an error on the option state; everything else works synchronously.

pub mod codec;
pub mod config;
pub mod definition;
pub mod dependency;
pub mod engine;
pub mod error;
pub mod manifest;
pub mod options;
pub mod store;
pub mod sync;
pub mod value;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

pub use codec::{params_from_url, parse_query_string, to_query_string, ParamCodec, Params};
pub use config::EngineConfig;
pub use definition::{
    DependencyAction, FilterDefinition, FilterDependency, FilterGroup, FilterKind, FilterSet,
};
pub use dependency::{evaluate, DependencyTracker, Evaluation};
pub use engine::{ActiveFilter, EngineBuilder, EngineRef, FilterEngine, FilterView};
pub use error::{Result, SiftError};
pub use manifest::FilterManifest;
pub use options::{
    invalidate_options_cache, loader_fn, FilterOption, LoadError, LoadRequest, OptionsCache,
    OptionsLoader, OptionsPage, OptionsResolver, OptionsSettings, OptionsSource, OptionsState,
};
pub use store::{ApplyMode, FilterState, ValueStore};
pub use sync::{ParamSink, RecordingSink, UrlSink};
pub use value::{FilterValue, ValueMap};
