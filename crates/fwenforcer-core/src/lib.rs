//! Firewall policy enforcement on top of `fwenforcer-api`.
//!
//! This crate owns the domain model and the reconciliation logic:
//!
//! - **[`BatchFirewallEnforcer`]**: Runs a policy per project over a bounded
//!   set of tokio tasks and folds the results into a
//!   [`BatchEnforcementLog`] with a [`Summary`]. One result per submitted
//!   project, always.
//!
//! - **[`ProjectEnforcer`]**: The per-project state machine: resolve
//!   networks, build expected and current [`FirewallRuleSet`]s, apply,
//!   re-fetch, compare, retry. Failures are classified into
//!   [`EnforcementError`] and recorded on the [`EnforcementResult`].
//!
//! - **[`FirewallEnforcer`]**: Computes the delete / insert / update change
//!   set for one project and applies it under the project-level and
//!   operation-level semaphores.
//!
//! - **Domain model** ([`model`]): [`FirewallRule`], [`FirewallPolicy`],
//!   [`FirewallRuleSet`] and the audit records.

pub mod config;
pub mod convert;
pub mod enforcer;
pub mod error;
pub mod model;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::EnforcerConfig;
pub use enforcer::{
    BatchFirewallEnforcer, EnforceOptions, FirewallEnforcer, PrechangeCallback, ProjectEnforcer,
    ProposedChanges, next_batch_id,
};
pub use error::{
    ApplyError, BatchError, EnforcementError, EnforcementErrorKind, FetchRulesError, PolicyError,
    RuleError,
};
pub use model::{
    AddRuleCallback, BatchEnforcementLog, Direction, EnforcementResult, EnforcementStatus,
    FirewallEnforcementRecord, FirewallPolicy, FirewallRule, FirewallRuleSet, IpPermission,
    RuleSnapshot, RunContext, Summary, load_policy, parse_policy,
};
