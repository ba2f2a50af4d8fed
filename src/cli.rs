//! Command-line interface argument parsing.
//!
//! Every connection setting can come from a flag, an environment variable
//! (also read from `.env`) or the config file, in that order of precedence.

use crate::config::{AuthMode, ReferenceScope};
use clap::Parser;
use std::path::PathBuf;

/// vestro-sync - batch integration job for the Vestro fuel management API
///
/// Fetches supplies, product sales and reference data for every subject
/// awaiting integration and delivers one payload per subject downstream.
///
/// Examples:
///   vestro-sync
///   vestro-sync --auth-mode per-subject --fetch-since-hours 48
///   vestro-sync --summary last-run.json --format json
///   vestro-sync --dry-run
///   vestro-sync --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Path to configuration file
    ///
    /// If not specified, looks for .vestro-sync.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Base URL of the Vestro API
    #[arg(long, value_name = "URL", env = "VESTRO_API_URL")]
    pub api_url: Option<String>,

    /// Login for the shared Vestro session
    #[arg(long, env = "VESTRO_LOGIN")]
    pub login: Option<String>,

    /// Password for the shared Vestro session
    #[arg(long, env = "VESTRO_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// How sessions are obtained: one shared session, or one per subject
    #[arg(long, value_name = "MODE", env = "VESTRO_AUTH_MODE")]
    pub auth_mode: Option<AuthMode>,

    /// Endpoint listing the subjects awaiting integration
    ///
    /// AGRIWIN_USERS_URL is read when neither this flag nor SUBJECTS_URL is set.
    #[arg(long, value_name = "URL", env = "SUBJECTS_URL")]
    pub subjects_url: Option<String>,

    /// Endpoint receiving one payload per subject
    ///
    /// GRAILS_APP_URL is read when neither this flag nor DELIVERY_URL is set.
    #[arg(long, value_name = "URL", env = "DELIVERY_URL")]
    pub delivery_url: Option<String>,

    /// Oldest checkpoint honoured, in hours before now
    #[arg(long, value_name = "HOURS", env = "FETCH_DATA_SINCE_HOURS")]
    pub fetch_since_hours: Option<u64>,

    /// Fetch reference data once per run instead of once per subject
    ///
    /// Requires the shared authentication mode.
    #[arg(long, value_name = "SCOPE")]
    pub reference_scope: Option<ReferenceScope>,

    /// Write a run summary to this file
    #[arg(short, long, value_name = "FILE")]
    pub summary: Option<PathBuf>,

    /// Summary format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Dry run: list subjects and their checkpoints without fetching
    #[arg(long)]
    pub dry_run: bool,

    /// Generate a default .vestro-sync.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    ///
    /// Connection settings are checked later, once merged with the config file.
    pub fn validate(&self) -> Result<(), String> {
        if self.init_config {
            return Ok(());
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if self.fetch_since_hours == Some(0) {
            return Err("Fetch-since window must be at least 1 hour".to_string());
        }

        if let Some(ref path) = self.summary {
            if path.is_dir() {
                return Err(format!("Summary path is a directory: {}", path.display()));
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
