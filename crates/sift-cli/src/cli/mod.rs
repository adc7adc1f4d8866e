//! # CLI Behavior
//!
//! Every command takes a manifest (`--manifest filters.toml`) and builds an
//! engine from it.
//!
//! - `sift inspect` prints every filter with its value and derived flags.
//!   Values come from `--query` (a query string, leading `?` optional),
//!   then each `--set id=text`, applied in order so dependency resets run
//!   exactly as they would in an interactive session.
//! - `sift encode` prints the query string for the resulting state.
//! - `sift decode` prints the values a query string decodes to.
//! - `sift options` lists a filter's static options, optionally searched.
//!
//! `--json` switches any command to machine-readable output.
//!
//! ## Module Structure
//!
//! - `setup`: argument parsing via clap
//! - `commands`: configuration, logging and dispatch
//! - `render`: tables and JSON
//! - `styles`: terminal styles

mod commands;
mod render;
pub mod setup;
mod styles;

pub use commands::run;
