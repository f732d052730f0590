//! `enforce` command handler.

use std::collections::HashSet;
use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use tabled::Tabled;
use tracing::{debug, info};

use fwenforcer_api::storage::is_gcs_path;
use fwenforcer_api::{ComputeClient, ComputeFirewallApi, StorageClient};
use fwenforcer_core::{
    BatchEnforcementLog, BatchFirewallEnforcer, EnforceOptions, EnforcementResult,
    EnforcementStatus, EnforcerConfig, FirewallPolicy, ProjectEnforcer, RunContext, Summary,
    load_policy, next_batch_id,
};

use crate::cli::{EnforceArgs, GlobalOpts};
use crate::config;
use crate::error::CliError;
use crate::output;

// ── Table rows ──────────────────────────────────────────────────────

#[derive(Tabled)]
struct ResultRow {
    #[tabled(rename = "Project")]
    project: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Added")]
    added: usize,
    #[tabled(rename = "Removed")]
    removed: usize,
    #[tabled(rename = "Updated")]
    updated: usize,
    #[tabled(rename = "Unchanged")]
    unchanged: usize,
    #[tabled(rename = "Reason")]
    reason: String,
}

const REASON_WIDTH: usize = 60;

impl From<&EnforcementResult> for ResultRow {
    fn from(r: &EnforcementResult) -> Self {
        let record = &r.gce_firewall_enforcement;
        let first_line = r.status_reason.lines().next().unwrap_or_default();
        let reason = if first_line.chars().count() > REASON_WIDTH {
            let cut: String = first_line.chars().take(REASON_WIDTH - 3).collect();
            format!("{cut}...")
        } else {
            first_line.to_owned()
        };
        Self {
            project: r.project_id.clone(),
            status: r.status.to_string(),
            added: record.rules_added.len(),
            removed: record.rules_removed.len(),
            updated: record.rules_updated.len(),
            unchanged: record.rules_unchanged.len(),
            reason,
        }
    }
}

fn summary_line(summary: &Summary, color: bool) -> String {
    let elapsed = (summary.timestamp_end - summary.timestamp_start)
        .to_std()
        .unwrap_or_default();
    // Millisecond precision is plenty for a human summary.
    let elapsed = Duration::from_millis(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX));
    let counts = format!(
        "{} project(s): {} succeeded, {} failed, {} changed, {} unchanged in {}",
        summary.projects_total,
        summary.projects_success,
        summary.projects_error,
        summary.projects_changed,
        summary.projects_unchanged,
        humantime::format_duration(elapsed),
    );
    let batch = format!("batch {}", summary.batch_id);
    match (color, summary.projects_error) {
        (false, _) => format!("{batch}: {counts}"),
        (true, 0) => format!("{}: {}", batch.dimmed(), counts.green()),
        (true, _) => format!("{}: {}", batch.dimmed(), counts.red()),
    }
}

fn log_table(log: &BatchEnforcementLog, color: bool) -> String {
    let mut rows: Vec<ResultRow> = log.results.iter().map(ResultRow::from).collect();
    rows.sort_by(|a, b| a.project.cmp(&b.project));
    format!(
        "{}\n{}",
        output::render_table(&rows),
        summary_line(&log.summary, color)
    )
}

// ── Progress ────────────────────────────────────────────────────────

fn progress_bar(projects: usize, global: &GlobalOpts) -> ProgressBar {
    if global.quiet || projects < 2 || !std::io::stderr().is_terminal() {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(u64::try_from(projects).unwrap_or(u64::MAX));
    if let Ok(style) =
        ProgressStyle::with_template("{spinner} [{bar:30}] {pos}/{len} projects {msg}")
    {
        bar.set_style(style.progress_chars("=> "));
    }
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

// ── Enforcement paths ───────────────────────────────────────────────

/// One project: no worker pool, results stamped `ENFORCER_ONE_PROJECT`.
async fn enforce_one(
    api: Arc<dyn ComputeFirewallApi>,
    config: &EnforcerConfig,
    project_id: String,
    policy: &FirewallPolicy,
) -> BatchEnforcementLog {
    let batch_id = next_batch_id();
    let timestamp_start = Utc::now();

    let enforcer = ProjectEnforcer::new(project_id, api)
        .with_dry_run(config.dry_run)
        .with_max_running_operations(config.max_running_operations)
        .with_operation_timeout(config.operation_timeout);
    let options = EnforceOptions {
        networks: config.networks.clone(),
        allow_empty_ruleset: config.allow_empty_ruleset,
        retry_on_dry_run: config.retry_on_dry_run,
        maximum_retries: config.maximum_retries,
        ..EnforceOptions::default()
    };

    let mut result = enforcer.enforce_firewall_policy(policy, &options).await;
    result.batch_id = Some(batch_id);
    result.run_context = RunContext::EnforcerOneProject;

    let summary = Summary::from_results(
        batch_id,
        1,
        std::slice::from_ref(&result),
        timestamp_start,
        Utc::now(),
    );
    BatchEnforcementLog {
        batch_id,
        results: vec![result],
        summary,
    }
}

async fn enforce_batch(
    api: Arc<dyn ComputeFirewallApi>,
    config: EnforcerConfig,
    projects: Vec<String>,
    policy: &FirewallPolicy,
    progress: &ProgressBar,
) -> Result<BatchEnforcementLog, CliError> {
    let enforcer = BatchFirewallEnforcer::new(api, config);
    let mut on_result = |result: &EnforcementResult| {
        progress.inc(1);
        progress.set_message(result.project_id.clone());
        if result.status == EnforcementStatus::Error {
            progress.println(format!("{}: {}", result.project_id, result.status_reason));
        }
    };
    let callback: &mut (dyn FnMut(&EnforcementResult) + Send) = &mut on_result;

    let pairs = projects.into_iter().map(|p| (p, policy.clone()));
    Ok(enforcer.run(pairs, None, Some(callback)).await?)
}

/// Keep the first occurrence of each project id.
fn dedup_projects(projects: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    projects
        .into_iter()
        .filter(|p| seen.insert(p.clone()))
        .collect()
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(args: EnforceArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = config::load(global)?;
    let format = config::output_format(global, &cfg)?;
    let token = config::resolve_access_token(global, &cfg)?;
    let transport = cfg.compute.transport_config();

    let storage = if is_gcs_path(&args.policy_file) {
        Some(StorageClient::new(
            cfg.compute.storage_endpoint(),
            &token,
            &transport,
        )?)
    } else {
        None
    };
    let policy = load_policy(&args.policy_file, storage.as_ref()).await?;
    info!(path = %args.policy_file, rules = policy.len(), "loaded policy");

    let api: Arc<dyn ComputeFirewallApi> = Arc::new(ComputeClient::new(
        cfg.compute.compute_endpoint(),
        &token,
        &transport,
    )?);
    let enforcer_config = config::enforcer_config(&cfg, &args);
    debug!(config = ?enforcer_config, "resolved enforcer config");

    let projects = dedup_projects(args.projects);
    let total = projects.len();
    let progress = progress_bar(total, global);

    let mut log = match <[String; 1]>::try_from(projects) {
        Ok([project_id]) => enforce_one(api, &enforcer_config, project_id, &policy).await,
        Err(projects) => {
            enforce_batch(api, enforcer_config, projects, &policy, &progress).await?
        }
    };
    progress.finish_and_clear();

    for result in &mut log.results {
        result.gce_firewall_enforcement.policy_path = Some(args.policy_file.clone());
    }

    let color = output::should_color(global.color);
    let out = output::render(format, &log, |log| log_table(log, color))?;
    output::print_output(&out, global.quiet);

    if log.has_errors() {
        return Err(CliError::EnforcementFailed {
            failed: log.summary.projects_error,
            total,
        });
    }
    Ok(())
}
