// ── Core error types ──
//
// `RuleError` covers rule validation, `ApplyError` the write step, and
// `EnforcementError` the terminal classification a `ProjectEnforcer`
// records on its result. Raw `fwenforcer_api::Error`s are classified here,
// never surfaced to batch callers.

use fwenforcer_api::Error as ApiError;
use strum::Display;
use thiserror::Error;

use crate::model::EnforcementStatus;

// ── Rules ────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("{0}")]
    InvalidFirewallRule(String),

    #[error("Rule {name} already defined in rules: {existing}")]
    DuplicateFirewallRuleName { name: String, existing: String },

    #[error("Invalid rule JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure while loading current rules from the API.
#[derive(Debug, Error)]
pub enum FetchRulesError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Rule(#[from] RuleError),
}

// ── Apply ────────────────────────────────────────────────────────────

/// Failure of `FirewallEnforcer::apply_firewall`. Not retried.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("No rules defined in the expected rules.")]
    EmptyProposedRuleSet,

    #[error(
        "The rule {rule_name} is in the rules to insert set, but the same rule name \
         already exists on project {project_id}. It may be used on a different network."
    )]
    RuleValidation {
        rule_name: String,
        project_id: String,
    },

    #[error(
        "The rule {rule_name} is in the rules to update set, but it is currently on a \
         network, \"{network}\", that is not in the allowed networks list for project \
         {project_id}: \"{allowed}\"."
    )]
    NetworkImpact {
        rule_name: String,
        network: String,
        project_id: String,
        allowed: String,
    },

    #[error(
        "Firewall enforcement cannot update the policy for project {project_id} without \
         exceeding the current firewalls quota: {limit}"
    )]
    QuotaExceeded { project_id: String, limit: f64 },

    #[error(
        "Firewall enforcement failed while inserting rules for project {project_id}. \
         The following errors were encountered: {}", .errors.join("; ")
    )]
    InsertFailed {
        project_id: String,
        errors: Vec<String>,
    },

    #[error(
        "Firewall enforcement failed while deleting rules for project {project_id}. \
         The following errors were encountered: {}", .errors.join("; ")
    )]
    DeleteFailed {
        project_id: String,
        errors: Vec<String>,
    },

    #[error(
        "Firewall enforcement failed while updating rules for project {project_id}. \
         The following errors were encountered: {}", .errors.join("; ")
    )]
    UpdateFailed {
        project_id: String,
        errors: Vec<String>,
    },

    #[error("Failed to refresh current rules: {0}")]
    Fetch(#[from] FetchRulesError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Project write semaphore closed")]
    SemaphoreClosed(#[from] tokio::sync::AcquireError),
}

// ── Enforcement ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum EnforcementErrorKind {
    NoNetworks,
    InvalidPolicy,
    ApiFailure,
    ProjectDeleted,
    ApiDisabled,
    ApplyFailed,
    RetryExhausted,
}

/// A terminal, classified failure for one project.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {reason}")]
pub struct EnforcementError {
    pub kind: EnforcementErrorKind,
    pub reason: String,
}

impl EnforcementError {
    pub fn new(kind: EnforcementErrorKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }

    /// Deleted projects and disabled APIs share `PROJECT_DELETED`: both
    /// mean stop enforcing and let the project be archived.
    pub fn status(&self) -> EnforcementStatus {
        match self.kind {
            EnforcementErrorKind::ProjectDeleted | EnforcementErrorKind::ApiDisabled => {
                EnforcementStatus::ProjectDeleted
            }
            _ => EnforcementStatus::Error,
        }
    }

    pub fn no_networks() -> Self {
        Self::new(EnforcementErrorKind::NoNetworks, "no networks found for project")
    }

    pub fn invalid_policy(err: &RuleError) -> Self {
        Self::new(
            EnforcementErrorKind::InvalidPolicy,
            format!("error adding the expected firewall rules from the policy: {err}"),
        )
    }

    pub fn apply_failed(err: &ApplyError) -> Self {
        Self::new(
            EnforcementErrorKind::ApplyFailed,
            format!("error enforcing firewall for project: {err}"),
        )
    }

    pub fn retry_exhausted() -> Self {
        Self::new(
            EnforcementErrorKind::RetryExhausted,
            "New firewall rules do not match the expected rules enforced by the policy",
        )
    }

    /// Classify a failure while listing networks.
    pub fn from_networks_error(err: &ApiError) -> Self {
        Self::classify_api(err, "error getting current networks from API")
    }

    /// Classify a failure while loading current firewall rules.
    pub fn from_fetch_error(err: &FetchRulesError) -> Self {
        const CONTEXT: &str = "error getting current firewall rules from API";
        match err {
            FetchRulesError::Api(e) => Self::classify_api(e, CONTEXT),
            FetchRulesError::Rule(e) => {
                Self::new(EnforcementErrorKind::ApiFailure, format!("{CONTEXT}: {e}"))
            }
        }
    }

    fn classify_api(err: &ApiError, context: &str) -> Self {
        if err.is_api_disabled() {
            Self::new(
                EnforcementErrorKind::ApiDisabled,
                format!("Project has GCE API disabled: {err}"),
            )
        } else if err.is_project_deleted() {
            Self::new(
                EnforcementErrorKind::ProjectDeleted,
                format!("Project scheduled for deletion: {err}"),
            )
        } else {
            Self::new(EnforcementErrorKind::ApiFailure, format!("{context}: {err}"))
        }
    }
}

// ── Policy files ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("Failed to read policy file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to download policy file {path}: {source}")]
    Download {
        path: String,
        #[source]
        source: ApiError,
    },

    #[error("No storage client configured to read {path}")]
    NoStorageClient { path: String },

    #[error("Failed to parse policy file {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Invalid parsed policy file: found {found} expected list")]
    InvalidParsedPolicyFile { found: &'static str },
}

// ── Batch ────────────────────────────────────────────────────────────

/// Worker-pool failures. Panics inside a worker are resumed on the caller.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Enforcement worker was cancelled: {0}")]
    WorkerCancelled(String),
}
