//! Config subcommand handlers.

use std::io::BufRead;

use secrecy::SecretString;

use fwenforcer_config::ConfigError;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config::{self, Config};
use crate::error::CliError;
use crate::output;

// ── Helpers ─────────────────────────────────────────────────────────

/// Mask secrets before anything is displayed.
fn redact(cfg: &mut Config) {
    if cfg.compute.access_token.is_some() {
        cfg.compute.access_token = Some("****".into());
    }
}

fn read_token(from_stdin: bool) -> Result<String, CliError> {
    let token = if from_stdin {
        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line)?;
        line
    } else {
        rpassword::prompt_password("Access token: ")?
    };
    let token = token.trim().to_owned();
    if token.is_empty() {
        return Err(CliError::Validation {
            field: "access token".into(),
            reason: "value cannot be empty".into(),
        });
    }
    Ok(token)
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Show => {
            let mut cfg = config::load(global)?;
            let format = config::output_format(global, &cfg)?;
            redact(&mut cfg);
            let toml = toml::to_string_pretty(&cfg).map_err(ConfigError::from)?;
            let out = output::render(format, &cfg, |_| toml.trim_end().to_owned())?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ConfigCommand::Path => {
            println!("{}", config::active_path(global).display());
            Ok(())
        }

        ConfigCommand::SetToken { stdin } => {
            let token = SecretString::from(read_token(stdin)?);
            fwenforcer_config::store_access_token(&token)?;
            if !global.quiet {
                eprintln!("✓ Access token stored in system keyring");
            }
            Ok(())
        }
    }
}
