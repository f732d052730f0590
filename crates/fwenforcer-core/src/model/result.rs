// ── Enforcement result / audit records ──
//
// Field names are part of the downstream audit schema; keep them stable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use strum::{Display, EnumString};

/// Terminal status of one project's enforcement.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum EnforcementStatus {
    #[default]
    EnforcementStatusUnspecified,
    Success,
    Error,
    Skipped,
    /// The project is gone, pending deletion, or has the compute API
    /// disabled. Not an enforcement failure.
    ProjectDeleted,
}

/// Which entry point produced a result.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RunContext {
    #[default]
    RunContextUnspecified,
    EnforcerBatch,
    EnforcerOneProject,
}

/// A serialized rule set plus its sha256, kept for audit and rollback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSnapshot {
    pub json: String,
    pub hash: String,
}

impl RuleSnapshot {
    pub fn new(json: String) -> Self {
        let hash = sha256_hex(&json);
        Self { json, hash }
    }
}

pub(crate) fn sha256_hex(data: &str) -> String {
    hex::encode(Sha256::digest(data.as_bytes()))
}

/// The change record nested under each project result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallEnforcementRecord {
    pub rules_added: Vec<String>,
    pub rules_removed: Vec<String>,
    pub rules_updated: Vec<String>,
    pub rules_unchanged: Vec<String>,
    pub rules_modified_count: usize,
    pub all_rules_changed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules_before: Option<RuleSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules_after: Option<RuleSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_path: Option<String>,
}

/// Outcome of enforcing one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnforcementResult {
    pub project_id: String,
    pub status: EnforcementStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status_reason: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<i64>,
    #[serde(default)]
    pub run_context: RunContext,
    pub gce_firewall_enforcement: FirewallEnforcementRecord,
}

impl EnforcementResult {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            status: EnforcementStatus::EnforcementStatusUnspecified,
            status_reason: String::new(),
            timestamp: Utc::now(),
            batch_id: None,
            run_context: RunContext::RunContextUnspecified,
            gce_firewall_enforcement: FirewallEnforcementRecord::default(),
        }
    }

    pub fn rules_modified_count(&self) -> usize {
        self.gce_firewall_enforcement.rules_modified_count
    }

    pub fn is_changed(&self) -> bool {
        self.rules_modified_count() > 0
    }
}

/// Aggregate counters over one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub batch_id: i64,
    pub projects_total: usize,
    pub projects_success: usize,
    pub projects_error: usize,
    pub projects_changed: usize,
    pub projects_unchanged: usize,
    pub timestamp_start: DateTime<Utc>,
    pub timestamp_end: DateTime<Utc>,
}

impl Summary {
    /// Count outcomes. A deleted project counts as a success, and
    /// `projects_unchanged` is always `projects_total - projects_changed`.
    pub fn from_results(
        batch_id: i64,
        projects_total: usize,
        results: &[EnforcementResult],
        timestamp_start: DateTime<Utc>,
        timestamp_end: DateTime<Utc>,
    ) -> Self {
        let mut summary = Self {
            batch_id,
            projects_total,
            projects_success: 0,
            projects_error: 0,
            projects_changed: 0,
            projects_unchanged: 0,
            timestamp_start,
            timestamp_end,
        };

        for result in results {
            match result.status {
                EnforcementStatus::Error => summary.projects_error += 1,
                EnforcementStatus::Success | EnforcementStatus::ProjectDeleted => {
                    summary.projects_success += 1;
                }
                EnforcementStatus::EnforcementStatusUnspecified | EnforcementStatus::Skipped => {}
            }
            if result.is_changed() {
                summary.projects_changed += 1;
            }
        }

        summary.projects_unchanged = projects_total.saturating_sub(summary.projects_changed);
        summary
    }
}

/// Everything one batch run produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchEnforcementLog {
    pub batch_id: i64,
    /// In completion order, not submission order.
    pub results: Vec<EnforcementResult>,
    pub summary: Summary,
}

impl BatchEnforcementLog {
    pub fn has_errors(&self) -> bool {
        self.summary.projects_error > 0
    }
}
