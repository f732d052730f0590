//! On-disk configuration for fwenforcer.
//!
//! TOML file + `FWENFORCER_` environment overlay, access-token resolution
//! (env + keyring + plaintext), and translation to the runtime configs
//! of `fwenforcer-core` and `fwenforcer-api`. The CLI layers its flags on
//! top of what this crate produces.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use fwenforcer_api::compute::DEFAULT_COMPUTE_ENDPOINT;
use fwenforcer_api::storage::DEFAULT_STORAGE_ENDPOINT;
use fwenforcer_api::{TlsMode, TransportConfig};
use fwenforcer_core::EnforcerConfig;
use fwenforcer_core::config::{
    DEFAULT_CONCURRENT_WORKERS, DEFAULT_MAX_RUNNING_OPERATIONS, DEFAULT_MAX_WRITE_PROJECTS,
    DEFAULT_MAXIMUM_RETRIES, DEFAULT_OPERATION_TIMEOUT,
};

/// Keyring service name for stored access tokens.
pub const KEYRING_SERVICE: &str = "fwenforcer";
const KEYRING_TOKEN_USER: &str = "access-token";

/// Environment variable consulted for the access token unless the config
/// names another one.
pub const DEFAULT_ACCESS_TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no access token found in ${env_var}, the system keyring, or compute.access_token")]
    NoCredentials { env_var: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub defaults: Defaults,

    /// Batch and per-project enforcement knobs.
    #[serde(default)]
    pub enforcer: EnforcerSection,

    /// Compute and storage API access.
    #[serde(default)]
    pub compute: ComputeSection,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    /// Output format for `enforce` results.
    #[serde(default = "default_output")]
    pub output: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}

#[derive(Debug, Deserialize, Serialize)]
pub struct EnforcerSection {
    /// Projects enforced in parallel.
    #[serde(default = "default_concurrent_threads")]
    pub concurrent_threads: usize,

    /// Projects allowed to write at the same time (0 = unbounded).
    #[serde(default = "default_project_writers")]
    pub maximum_project_writer_threads: usize,

    /// Write operations in flight per project (0 = unbounded).
    #[serde(default = "default_write_operations")]
    pub maximum_firewall_write_operations: usize,

    #[serde(default = "default_maximum_retries")]
    pub maximum_retries: u32,

    #[serde(default)]
    pub retry_on_dry_run: bool,

    #[serde(default)]
    pub allow_empty_ruleset: bool,

    /// Seconds to wait for one write operation.
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout: u64,

    /// Restrict enforcement to these networks. Empty means every network
    /// in the project.
    #[serde(default)]
    pub networks: Vec<String>,
}

impl Default for EnforcerSection {
    fn default() -> Self {
        Self {
            concurrent_threads: default_concurrent_threads(),
            maximum_project_writer_threads: default_project_writers(),
            maximum_firewall_write_operations: default_write_operations(),
            maximum_retries: default_maximum_retries(),
            retry_on_dry_run: false,
            allow_empty_ruleset: false,
            operation_timeout: default_operation_timeout(),
            networks: Vec::new(),
        }
    }
}

fn default_concurrent_threads() -> usize {
    DEFAULT_CONCURRENT_WORKERS
}
fn default_project_writers() -> usize {
    DEFAULT_MAX_WRITE_PROJECTS
}
fn default_write_operations() -> usize {
    DEFAULT_MAX_RUNNING_OPERATIONS
}
fn default_maximum_retries() -> u32 {
    DEFAULT_MAXIMUM_RETRIES
}
fn default_operation_timeout() -> u64 {
    DEFAULT_OPERATION_TIMEOUT.as_secs()
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ComputeSection {
    /// Compute API base URL (defaults to the public endpoint).
    pub endpoint: Option<String>,

    /// Storage API base URL, used for `gs://` policy files.
    pub storage_endpoint: Option<String>,

    /// HTTP request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Access token in plaintext. Prefer the keyring or an env var.
    pub access_token: Option<String>,

    /// Environment variable name containing the access token.
    #[serde(default = "default_access_token_env")]
    pub access_token_env: String,

    /// Path to a custom CA certificate.
    pub ca_cert: Option<PathBuf>,
}

impl Default for ComputeSection {
    fn default() -> Self {
        Self {
            endpoint: None,
            storage_endpoint: None,
            timeout: default_timeout(),
            access_token: None,
            access_token_env: default_access_token_env(),
            ca_cert: None,
        }
    }
}

fn default_timeout() -> u64 {
    30
}
fn default_access_token_env() -> String {
    DEFAULT_ACCESS_TOKEN_ENV.into()
}

// ── Validation ──────────────────────────────────────────────────────

impl Config {
    /// Reject values that would only fail later, mid-batch.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enforcer.concurrent_threads == 0 {
            return Err(ConfigError::Validation {
                field: "enforcer.concurrent_threads".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.compute.timeout == 0 {
            return Err(ConfigError::Validation {
                field: "compute.timeout".into(),
                reason: "must be at least 1 second".into(),
            });
        }
        let endpoints = [
            ("compute.endpoint", &self.compute.endpoint),
            ("compute.storage_endpoint", &self.compute.storage_endpoint),
        ];
        for (field, value) in endpoints
            .into_iter()
            .filter_map(|(field, value)| value.as_deref().map(|v| (field, v)))
        {
            value
                .parse::<url::Url>()
                .map_err(|_| ConfigError::Validation {
                    field: field.into(),
                    reason: format!("invalid URL: {value}"),
                })?;
        }
        Ok(())
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "fwenforcer", "fwenforcer").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("fwenforcer");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from file + environment.
///
/// `path` overrides the platform location. A missing file is not an
/// error; the defaults and environment still apply.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.map_or_else(config_path, Path::to_path_buf);

    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(&path))
        .merge(Env::prefixed("FWENFORCER_").split("__"));

    let config: Config = figment.extract()?;
    config.validate()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`.
pub fn save_config(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve the API access token without CLI flags.
pub fn resolve_access_token(compute: &ComputeSection) -> Result<SecretString, ConfigError> {
    // 1. Named env var
    if let Ok(val) = std::env::var(&compute.access_token_env) {
        if !val.is_empty() {
            return Ok(SecretString::from(val));
        }
    }

    // 2. System keyring
    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, KEYRING_TOKEN_USER) {
        if let Ok(secret) = entry.get_password() {
            return Ok(SecretString::from(secret));
        }
    }

    // 3. Plaintext in config
    if let Some(ref token) = compute.access_token {
        return Ok(SecretString::from(token.clone()));
    }

    Err(ConfigError::NoCredentials {
        env_var: compute.access_token_env.clone(),
    })
}

/// Store an access token in the system keyring.
pub fn store_access_token(token: &SecretString) -> Result<(), ConfigError> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, KEYRING_TOKEN_USER)?;
    entry.set_password(token.expose_secret())?;
    Ok(())
}

// ── Runtime translation ─────────────────────────────────────────────

impl EnforcerSection {
    /// The batch runtime config. Dry-run and networks come from the CLI.
    pub fn to_enforcer_config(&self) -> EnforcerConfig {
        EnforcerConfig::default()
            .with_concurrent_workers(self.concurrent_threads)
            .with_max_write_projects(self.maximum_project_writer_threads)
            .with_max_running_operations(self.maximum_firewall_write_operations)
            .with_maximum_retries(self.maximum_retries)
            .with_retry_on_dry_run(self.retry_on_dry_run)
            .with_allow_empty_ruleset(self.allow_empty_ruleset)
            .with_networks(self.networks.clone())
            .with_operation_timeout(Duration::from_secs(self.operation_timeout))
    }
}

impl ComputeSection {
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            tls: self
                .ca_cert
                .clone()
                .map_or(TlsMode::System, TlsMode::CustomCa),
            timeout: Duration::from_secs(self.timeout),
        }
    }

    pub fn compute_endpoint(&self) -> &str {
        self.endpoint.as_deref().unwrap_or(DEFAULT_COMPUTE_ENDPOINT)
    }

    pub fn storage_endpoint(&self) -> &str {
        self.storage_endpoint
            .as_deref()
            .unwrap_or(DEFAULT_STORAGE_ENDPOINT)
    }
}
