//! CLI error types with miette diagnostics.
//!
//! Maps config, policy and API failures into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use fwenforcer_config::ConfigError;
use fwenforcer_core::{BatchError, PolicyError};

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const POLICY: i32 = 4;
    pub const CONNECTION: i32 = 5;
    pub const ENFORCEMENT: i32 = 6;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Authentication ───────────────────────────────────────────────

    #[error("No access token configured")]
    #[diagnostic(
        code(fwenforcer::no_credentials),
        help(
            "Set ${env_var}, pass --access-token, or store one with: fwenforcer config set-token"
        )
    )]
    NoCredentials { env_var: String },

    // ── Policy ───────────────────────────────────────────────────────

    #[error(transparent)]
    #[diagnostic(
        code(fwenforcer::policy),
        help("The policy file must be a JSON or YAML list of firewall rules.")
    )]
    Policy(#[from] PolicyError),

    // ── API client ───────────────────────────────────────────────────

    #[error("Could not set up the API client: {0}")]
    #[diagnostic(
        code(fwenforcer::client),
        help("Check compute.endpoint, compute.storage_endpoint and compute.ca_cert.")
    )]
    Client(#[from] fwenforcer_api::Error),

    // ── Enforcement ──────────────────────────────────────────────────

    #[error("Enforcement failed on {failed} of {total} project(s)")]
    #[diagnostic(
        code(fwenforcer::enforcement_failed),
        help("See status_reason on each failed result. Re-run with -v for details.")
    )]
    EnforcementFailed { failed: usize, total: usize },

    #[error(transparent)]
    #[diagnostic(code(fwenforcer::batch))]
    Batch(#[from] BatchError),

    // ── Validation ───────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(fwenforcer::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error(transparent)]
    #[diagnostic(
        code(fwenforcer::config),
        help("Run `fwenforcer config path` to find the config file in use.")
    )]
    Config(ConfigError),

    // ── IO / Serialization ────────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NoCredentials { env_var } => Self::NoCredentials { env_var },
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            other => Self::Config(other),
        }
    }
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NoCredentials { .. } => exit_code::AUTH,
            Self::Policy(_) => exit_code::POLICY,
            Self::Client(_) => exit_code::CONNECTION,
            Self::EnforcementFailed { .. } => exit_code::ENFORCEMENT,
            Self::Validation { .. } => exit_code::USAGE,
            Self::Batch(_) | Self::Config(_) | Self::Io(_) => exit_code::GENERAL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_map_to_specific_variants() {
        let err = CliError::from(ConfigError::NoCredentials {
            env_var: "GOOGLE_OAUTH_ACCESS_TOKEN".into(),
        });
        assert_eq!(err.exit_code(), exit_code::AUTH);

        let err = CliError::from(ConfigError::Validation {
            field: "compute.endpoint".into(),
            reason: "invalid URL".into(),
        });
        assert_eq!(err.exit_code(), exit_code::USAGE);
    }

    #[test]
    fn failed_projects_exit_with_enforcement_code() {
        let err = CliError::EnforcementFailed {
            failed: 1,
            total: 3,
        };
        assert_eq!(err.exit_code(), 6);
        assert_eq!(err.to_string(), "Enforcement failed on 1 of 3 project(s)");
    }
}
