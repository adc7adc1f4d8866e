//! # sift CLI
//!
//! A thin command-line client for the `sift` library. It loads a filter
//! manifest, drives a [`sift::FilterEngine`] with values from a query string
//! and `--set` arguments, and prints the resulting state.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  CLI Layer (src/cli/)                        │
//! │  - clap argument parsing (setup.rs)          │
//! │  - engine wiring + dispatch (commands.rs)    │
//! │  - tables and JSON output (render.rs)        │
//! └──────────────────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌──────────────────────────────────────────────┐
//! │  Library (crates/sift)                       │
//! │  - manifest, codec, engine                   │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! The library never touches stdout, stderr or exit codes; everything
//! user-facing lives here.

mod cli;

fn main() {
    if let Err(e) = cli::run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
