//! Clap derive structures for the `fwenforcer` CLI.
//!
//! Long flags keep their historical snake_case spelling; each one also
//! accepts the kebab-case form.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// fwenforcer -- declarative firewall policy enforcement for cloud projects
#[derive(Debug, Parser)]
#[command(
    name = "fwenforcer",
    version,
    about = "Enforce a firewall policy across cloud compute projects",
    long_about = "Reconciles the firewall rules of one or more projects with a policy file.\n\n\
        Rules missing from a project are inserted, rules that differ are updated,\n\
        and managed rules absent from the policy are deleted.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "FWENFORCER_CONFIG", global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Access token (overrides env var, keyring and config file)
    #[arg(
        long,
        env = "FWENFORCER_ACCESS_TOKEN",
        global = true,
        hide_env_values = true
    )]
    pub access_token: Option<String>,

    /// Output format [default: from config, else table]
    #[arg(long, short = 'o', env = "FWENFORCER_OUTPUT", global = true)]
    pub output: Option<OutputFormat>,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Enforce a firewall policy on one or more projects
    Enforce(EnforceArgs),

    /// Inspect configuration and store credentials
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  ENFORCE
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct EnforceArgs {
    /// Project to enforce the policy on (repeatable)
    #[arg(
        long = "enforce_project",
        visible_alias = "enforce-project",
        value_name = "PROJECT_ID",
        required = true
    )]
    pub projects: Vec<String>,

    /// Policy file: a local path or gs://bucket/object (JSON or YAML)
    #[arg(long = "policy_file", visible_alias = "policy-file", value_name = "PATH")]
    pub policy_file: String,

    /// Compute the changes without writing them
    #[arg(long = "dry_run", visible_alias = "dry-run")]
    pub dry_run: bool,

    /// Projects enforced in parallel
    #[arg(
        long = "concurrent_threads",
        visible_alias = "concurrent-threads",
        value_name = "N"
    )]
    pub concurrent_threads: Option<usize>,

    /// Write operations in flight per project (0 = unbounded)
    #[arg(
        long = "maximum_firewall_write_operations",
        visible_alias = "maximum-firewall-write-operations",
        value_name = "N"
    )]
    pub maximum_firewall_write_operations: Option<usize>,

    /// Projects writing at the same time (0 = unbounded)
    #[arg(
        long = "maximum_project_writer_threads",
        visible_alias = "maximum-project-writer-threads",
        value_name = "N"
    )]
    pub maximum_project_writer_threads: Option<usize>,

    /// Extra apply passes when a project does not converge
    #[arg(
        long = "maximum_retries",
        visible_alias = "maximum-retries",
        value_name = "N"
    )]
    pub maximum_retries: Option<u32>,

    /// Only enforce on this network (repeatable; default: every network)
    #[arg(long = "network", value_name = "NAME")]
    pub networks: Vec<String>,

    /// Allow a policy with no rules, deleting every managed rule
    #[arg(long = "allow_empty_ruleset", visible_alias = "allow-empty-ruleset")]
    pub allow_empty_ruleset: bool,

    /// Re-check convergence in dry-run mode as well
    #[arg(long = "retry_on_dry_run", visible_alias = "retry-on-dry-run")]
    pub retry_on_dry_run: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  CONFIG
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display the resolved configuration (secrets masked)
    Show,

    /// Print the config file location
    Path,

    /// Store an access token in the system keyring
    SetToken {
        /// Read the token from stdin instead of prompting
        #[arg(long)]
        stdin: bool,
    },
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
