//! CLI configuration: a thin wrapper around `fwenforcer_config`.
//!
//! Adds the resolution steps that respect `GlobalOpts` and `enforce` flag
//! overrides (--access-token, --concurrent_threads, etc.).

use secrecy::SecretString;

use fwenforcer_core::EnforcerConfig;

use crate::cli::{EnforceArgs, GlobalOpts, OutputFormat};
use crate::error::CliError;

pub use fwenforcer_config::{Config, config_path};

/// Load the config file named by `--config`, or the platform default.
pub fn load(global: &GlobalOpts) -> Result<Config, CliError> {
    Ok(fwenforcer_config::load_config(global.config.as_deref())?)
}

/// The path `load` reads from.
pub fn active_path(global: &GlobalOpts) -> std::path::PathBuf {
    global.config.clone().unwrap_or_else(config_path)
}

/// `--output` flag > `defaults.output` > table.
pub fn output_format(global: &GlobalOpts, cfg: &Config) -> Result<OutputFormat, CliError> {
    if let Some(format) = global.output {
        return Ok(format);
    }
    <OutputFormat as clap::ValueEnum>::from_str(&cfg.defaults.output, true).map_err(|_| {
        CliError::Validation {
            field: "defaults.output".into(),
            reason: format!(
                "expected table, json, json-compact or yaml, got '{}'",
                cfg.defaults.output
            ),
        }
    })
}

/// `--access-token` flag, then the shared credential chain.
pub fn resolve_access_token(global: &GlobalOpts, cfg: &Config) -> Result<SecretString, CliError> {
    if let Some(ref token) = global.access_token {
        return Ok(SecretString::from(token.clone()));
    }
    Ok(fwenforcer_config::resolve_access_token(&cfg.compute)?)
}

/// Translate the `[enforcer]` section + `enforce` flags into an
/// `EnforcerConfig`. Flags win; boolean flags can only switch a setting on.
pub fn enforcer_config(cfg: &Config, args: &EnforceArgs) -> EnforcerConfig {
    let section = &cfg.enforcer;
    let mut config = section.to_enforcer_config().with_dry_run(args.dry_run);

    if let Some(n) = args.concurrent_threads {
        config = config.with_concurrent_workers(n);
    }
    if let Some(n) = args.maximum_project_writer_threads {
        config = config.with_max_write_projects(n);
    }
    if let Some(n) = args.maximum_firewall_write_operations {
        config = config.with_max_running_operations(n);
    }
    if let Some(n) = args.maximum_retries {
        config = config.with_maximum_retries(n);
    }
    if !args.networks.is_empty() {
        config = config.with_networks(args.networks.clone());
    }
    config
        .with_allow_empty_ruleset(args.allow_empty_ruleset || section.allow_empty_ruleset)
        .with_retry_on_dry_run(args.retry_on_dry_run || section.retry_on_dry_run)
}
