//! Configuration file handling.
//!
//! This module handles loading configuration from `.vestro-sync.toml`
//! files, merging CLI/environment overrides on top, and checking that the
//! result is complete enough to start a run.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = ".vestro-sync.toml";

/// Older name of `SUBJECTS_URL`, still honoured.
const LEGACY_SUBJECTS_URL_ENV: &str = "AGRIWIN_USERS_URL";

/// Older name of `DELIVERY_URL`, still honoured.
const LEGACY_DELIVERY_URL_ENV: &str = "GRAILS_APP_URL";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Vestro API settings.
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Subject source settings.
    #[serde(default)]
    pub source: SourceConfig,

    /// Delivery channel settings.
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Run behaviour.
    #[serde(default)]
    pub sync: SyncConfig,
}

/// How session tokens are obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    /// One session per run, using the run-level credentials.
    #[default]
    Shared,
    /// One session per subject, using the subject's own credentials.
    PerSubject,
}

/// Where reference categories are fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ReferenceScope {
    /// All seven categories are fetched for every subject.
    #[default]
    PerSubject,
    /// Reference categories are fetched once and shared by all subjects.
    PerRun,
}

/// Vestro API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// API base URL, without trailing slash.
    #[serde(default)]
    pub base_url: String,

    /// Run-level login (shared mode).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login: Option<String>,

    /// Run-level password (shared mode).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Authentication strategy.
    #[serde(default)]
    pub auth_mode: AuthMode,

    /// Record property matched against a subject's identity.
    #[serde(default = "default_identity_property")]
    pub identity_property: String,

    /// Timeout for the sessions endpoint, in seconds.
    #[serde(default = "default_remote_timeout")]
    pub auth_timeout_seconds: u64,

    /// Timeout for each page request, in seconds.
    #[serde(default = "default_remote_timeout")]
    pub fetch_timeout_seconds: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            login: None,
            password: None,
            auth_mode: AuthMode::default(),
            identity_property: default_identity_property(),
            auth_timeout_seconds: default_remote_timeout(),
            fetch_timeout_seconds: default_remote_timeout(),
        }
    }
}

fn default_identity_property() -> String {
    "company".to_string()
}

fn default_remote_timeout() -> u64 {
    30
}

/// Subject source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// URL returning the subjects to integrate.
    #[serde(default)]
    pub url: String,

    /// Request timeout in seconds.
    #[serde(default = "default_remote_timeout")]
    pub timeout_seconds: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout_seconds: default_remote_timeout(),
        }
    }
}

/// Delivery channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// URL receiving each payload.
    #[serde(default)]
    pub url: String,

    /// Optional `Authorization` header value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_header: Option<String>,

    /// Request timeout in seconds. Payloads can be large.
    #[serde(default = "default_delivery_timeout")]
    pub timeout_seconds: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            auth_header: None,
            timeout_seconds: default_delivery_timeout(),
        }
    }
}

fn default_delivery_timeout() -> u64 {
    45
}

/// Run behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Oldest checkpoint honoured, in hours before now.
    #[serde(default = "default_fetch_since_hours")]
    pub fetch_since_hours: u64,

    /// Where reference categories are fetched.
    #[serde(default)]
    pub reference_scope: ReferenceScope,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fetch_since_hours: default_fetch_since_hours(),
            reference_scope: ReferenceScope::default(),
        }
    }
}

fn default_fetch_since_hours() -> u64 {
    24
}

impl SyncConfig {
    /// The fetch-since window as a signed duration.
    ///
    /// Capped at a century so the subtraction from "now" cannot overflow.
    pub fn fetch_since(&self) -> chrono::Duration {
        const MAX_HOURS: u64 = 100 * 366 * 24;
        chrono::Duration::hours(self.fetch_since_hours.min(MAX_HOURS) as i64)
    }
}

impl RemoteConfig {
    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_seconds)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_seconds)
    }
}

fn check_url(name: &str, url: &str) -> Result<()> {
    if url.is_empty() {
        bail!("{} is not set", name);
    }
    if !url.starts_with("http://") && !url.starts_with("https://") {
        bail!("{} must start with 'http://' or 'https://': {}", name, url);
    }
    Ok(())
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(DEFAULT_CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments (and the environment
    /// variables clap folded into them).
    ///
    /// Only values that were actually provided override the file.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        self.merge_with(args, |name| {
            std::env::var(name).ok().filter(|v| !v.trim().is_empty())
        });
    }

    /// [`Config::merge_with_args`] with an explicit lookup for the
    /// deployment-era environment names (`AGRIWIN_USERS_URL`,
    /// `GRAILS_APP_URL`). Those only apply when the current flag or
    /// variable is absent.
    fn merge_with(
        &mut self,
        args: &crate::cli::Args,
        legacy_env: impl Fn(&str) -> Option<String>,
    ) {
        if let Some(ref url) = args.api_url {
            self.remote.base_url = url.clone();
        }
        if let Some(ref login) = args.login {
            self.remote.login = Some(login.clone());
        }
        if let Some(ref password) = args.password {
            self.remote.password = Some(password.clone());
        }
        if let Some(mode) = args.auth_mode {
            self.remote.auth_mode = mode;
        }
        let legacy = |name: &str| {
            let value = legacy_env(name);
            if value.is_some() {
                debug!("Using {} from the environment", name);
            }
            value
        };
        if let Some(url) = args
            .subjects_url
            .clone()
            .or_else(|| legacy(LEGACY_SUBJECTS_URL_ENV))
        {
            self.source.url = url;
        }
        if let Some(url) = args
            .delivery_url
            .clone()
            .or_else(|| legacy(LEGACY_DELIVERY_URL_ENV))
        {
            self.delivery.url = url;
        }
        if let Some(hours) = args.fetch_since_hours {
            self.sync.fetch_since_hours = hours;
        }
        if let Some(scope) = args.reference_scope {
            self.sync.reference_scope = scope;
        }

        self.remote.base_url = self.remote.base_url.trim_end_matches('/').to_string();
    }

    /// Check that the configuration is complete enough to start a run.
    pub fn validate(&self) -> Result<()> {
        check_url("Vestro API URL", &self.remote.base_url)?;
        check_url("subject source URL", &self.source.url)?;
        check_url("delivery URL", &self.delivery.url)?;

        if self.remote.auth_mode == AuthMode::Shared {
            let login = self.remote.login.as_deref().unwrap_or("");
            let password = self.remote.password.as_deref().unwrap_or("");
            if login.is_empty() || password.is_empty() {
                bail!("shared authentication needs a Vestro login and password");
            }
        }

        if self.sync.reference_scope == ReferenceScope::PerRun
            && self.remote.auth_mode != AuthMode::Shared
        {
            bail!("per-run reference data requires the shared authentication mode");
        }

        if self.sync.fetch_since_hours == 0 {
            bail!("fetch-since window must be at least 1 hour");
        }

        if self.remote.auth_timeout_seconds == 0
            || self.remote.fetch_timeout_seconds == 0
            || self.source.timeout_seconds == 0
            || self.delivery.timeout_seconds == 0
        {
            bail!("timeouts must be at least 1 second");
        }

        Ok(())
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
