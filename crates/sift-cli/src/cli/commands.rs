//! # CLI Layer
//!
//! The only place that:
//! - knows about stdout and stderr
//! - installs the tracing subscriber
//! - resolves the config file location
//!
//! Each command builds a fresh engine from the manifest and prints a rendered
//! string; nothing persists between runs.

use super::render;
use super::setup::{parse_assignment, Cli, Commands, StateArgs};
use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use directories::ProjectDirs;
use serde_json::json;
use sift::{parse_query_string, EngineConfig, FilterEngine, FilterManifest, FilterSet, ParamCodec};
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::EnvFilter;

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config_path = config_path(cli.config.as_deref());
    debug!(path = ?config_path, "loading engine config");
    let config = EngineConfig::load(config_path.as_deref()).context("loading config")?;

    let output = match &cli.command {
        Commands::Inspect(args) => inspect(&config, args, cli.json)?,
        Commands::Encode(args) => encode(&config, args, cli.json)?,
        Commands::Decode { manifest, query } => {
            decode(&config, &manifest.manifest, query, cli.json)?
        }
        Commands::Options {
            manifest,
            filter,
            search,
        } => options(&config, &manifest.manifest, filter, search.as_deref(), cli.json)?,
    };
    print!("{}", output);
    Ok(())
}

/// `RUST_LOG` wins; otherwise `-v` raises the level from `warn`.
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// An explicit `--config`, else `sift.toml` in the platform config dir.
fn config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    ProjectDirs::from("", "", "sift")
        .map(|dirs| dirs.config_dir().join("sift.toml"))
        .filter(|path| path.exists())
}

fn load_filters(config: &EngineConfig, path: &Path) -> Result<FilterSet> {
    let manifest = FilterManifest::from_path(path)
        .with_context(|| format!("reading manifest {}", path.display()))?;
    Ok(manifest.into_filter_set(&ParamCodec::from_config(config)))
}

/// Engine seeded from `--query`, then driven by each `--set` in order.
fn build_engine(config: &EngineConfig, args: &StateArgs) -> Result<FilterEngine> {
    let filters = load_filters(config, &args.manifest.manifest)?;
    let mut builder = FilterEngine::builder(filters).config(config.clone());
    if let Some(query) = &args.query {
        builder = builder.initial_params(parse_query_string(query));
    }
    let mut engine = builder.build();

    for raw in &args.sets {
        let (id, text) =
            parse_assignment(raw).ok_or_else(|| anyhow!("expected ID=TEXT, got '{}'", raw))?;
        let definition = engine
            .filters()
            .get(id)
            .ok_or_else(|| anyhow!("unknown filter '{}'", id))?;
        let value = engine.codec().decode_value(definition, text)?;
        engine.set_value(id, value);
    }
    engine.validate_all();
    Ok(engine)
}

fn inspect(config: &EngineConfig, args: &StateArgs, as_json: bool) -> Result<String> {
    let engine = build_engine(config, args)?;
    if as_json {
        return render::render_json(&json!({
            "filters": engine.views(),
            "active": engine.active_filters(),
            "active_count": engine.active_count(),
            "params": engine.to_params(),
            "query": engine.query_string(),
        }));
    }
    Ok(render::render_state(
        &engine.views(),
        &engine.active_filters(),
        &engine.query_string(),
    ))
}

fn encode(config: &EngineConfig, args: &StateArgs, as_json: bool) -> Result<String> {
    let engine = build_engine(config, args)?;
    if as_json {
        return render::render_json(&json!(engine.to_params()));
    }
    Ok(format!("{}\n", engine.query_string()))
}

fn decode(config: &EngineConfig, manifest: &Path, query: &str, as_json: bool) -> Result<String> {
    let filters = load_filters(config, manifest)?;
    let codec = ParamCodec::from_config(config);
    let values = codec.from_params(&filters, &parse_query_string(query));
    if as_json {
        return render::render_json(&json!(values));
    }
    Ok(render::render_values(&render::displayed_values(&filters, &values)))
}

fn options(
    config: &EngineConfig,
    manifest: &Path,
    filter: &str,
    search: Option<&str>,
    as_json: bool,
) -> Result<String> {
    let filters = load_filters(config, manifest)?;
    if !filters.contains(filter) {
        bail!("unknown filter '{}'", filter);
    }
    let engine = FilterEngine::builder(filters).config(config.clone()).build();
    if let Some(text) = search {
        engine.search(filter, text);
    }
    let state = engine
        .options(filter)
        .ok_or_else(|| anyhow!("filter '{}' has no options", filter))?;
    if as_json {
        return render::render_json(&json!(state.options));
    }
    Ok(render::render_options(&state))
}
