use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Returns the version string, including git hash and commit date for non-release builds.
fn get_version() -> &'static str {
    const VERSION: &str = env!("CARGO_PKG_VERSION");
    const GIT_HASH: &str = env!("GIT_HASH");
    const GIT_COMMIT_DATE: &str = env!("GIT_COMMIT_DATE");
    const IS_RELEASE: &str = env!("IS_RELEASE");

    use std::sync::OnceLock;
    static VERSION_STRING: OnceLock<String> = OnceLock::new();

    VERSION_STRING.get_or_init(|| {
        if IS_RELEASE == "true" || GIT_HASH.is_empty() {
            format!("v{}", VERSION)
        } else {
            format!("v{}\ndev: {} {}", VERSION, GIT_HASH, GIT_COMMIT_DATE)
        }
    })
}

#[derive(Parser, Debug)]
#[command(
    name = "sift",
    bin_name = "sift",
    version = get_version(),
    disable_help_subcommand = true
)]
#[command(about = "Inspect, encode and decode declarative filter sets", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Engine config file (defaults to sift.toml in the platform config dir)
    #[arg(long, global = true, help_heading = "Options")]
    pub config: Option<PathBuf>,

    /// Verbose output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count, help_heading = "Options")]
    pub verbose: u8,

    /// Print JSON instead of tables
    #[arg(long, global = true, help_heading = "Options")]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show every filter with its value, visibility and errors
    #[command(alias = "i")]
    Inspect(StateArgs),

    /// Print the query string for the given values
    #[command(alias = "e")]
    Encode(StateArgs),

    /// Decode a query string into filter values
    #[command(alias = "d")]
    Decode {
        #[command(flatten)]
        manifest: ManifestArg,

        /// Query string to decode
        #[arg(long, short)]
        query: String,
    },

    /// List the static options of a filter
    Options {
        #[command(flatten)]
        manifest: ManifestArg,

        /// Filter id
        filter: String,

        /// Case-insensitive label search
        #[arg(long, short)]
        search: Option<String>,
    },
}

#[derive(Args, Debug)]
pub struct ManifestArg {
    /// Filter manifest (TOML)
    #[arg(long, short)]
    pub manifest: PathBuf,
}

#[derive(Args, Debug)]
pub struct StateArgs {
    #[command(flatten)]
    pub manifest: ManifestArg,

    /// Starting state as a query string
    #[arg(long, short)]
    pub query: Option<String>,

    /// Set a value as `id=text`, in parameter syntax (repeatable)
    #[arg(long = "set", short = 's', value_name = "ID=TEXT")]
    pub sets: Vec<String>,
}

/// Split `id=text` at the first `=`.
pub fn parse_assignment(raw: &str) -> Option<(&str, &str)> {
    raw.split_once('=').filter(|(id, _)| !id.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_inspect_with_sets() {
        let cli = Cli::try_parse_from([
            "sift",
            "inspect",
            "-m",
            "filters.toml",
            "--set",
            "status=active",
            "-s",
            "price=10..",
            "--json",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Inspect(args) => {
                assert_eq!(args.manifest.manifest, PathBuf::from("filters.toml"));
                assert_eq!(args.sets, vec!["status=active", "price=10.."]);
                assert!(args.query.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_verbose_counts() {
        let cli = Cli::try_parse_from(["sift", "-vv", "decode", "-m", "f.toml", "-q", "a=b"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_manifest_is_required() {
        assert!(Cli::try_parse_from(["sift", "encode"]).is_err());
    }

    #[test]
    fn test_parse_assignment() {
        assert_eq!(parse_assignment("price=10..50"), Some(("price", "10..50")));
        assert_eq!(parse_assignment("q=a=b"), Some(("q", "a=b")));
        assert_eq!(parse_assignment("status="), Some(("status", "")));
        assert_eq!(parse_assignment("=x"), None);
        assert_eq!(parse_assignment("status"), None);
    }
}
