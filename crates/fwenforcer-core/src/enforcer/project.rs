// ── ProjectEnforcer ──
//
// The enforcement state machine for a single project:
//
//   networks -> expected + current rules -> apply -> re-fetch -> compare
//                                             ^                     |
//                                             +------ retry --------+
//
// Every failure is classified into an `EnforcementError` and folded into
// the returned `EnforcementResult`; nothing escapes to the caller.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use fwenforcer_api::ComputeFirewallApi;

use super::firewall::{FirewallEnforcer, PrechangeCallback};
use crate::config::{DEFAULT_MAXIMUM_RETRIES, DEFAULT_OPERATION_TIMEOUT};
use crate::error::{EnforcementError, EnforcementErrorKind};
use crate::model::policy::FirewallPolicy;
use crate::model::result::{
    EnforcementResult, EnforcementStatus, FirewallEnforcementRecord, RuleSnapshot,
};
use crate::model::rule::FirewallRule;
use crate::model::rule_set::{AddRuleCallback, FirewallRuleSet, network_name_from_url};

/// Per-run knobs for [`ProjectEnforcer::enforce_firewall_policy`].
#[derive(Clone)]
pub struct EnforceOptions {
    /// Networks to enforce on. Empty = discover every network.
    pub networks: Vec<String>,
    pub allow_empty_ruleset: bool,
    pub prechange_callback: Option<PrechangeCallback>,
    pub add_rule_callback: Option<AddRuleCallback>,
    pub retry_on_dry_run: bool,
    pub maximum_retries: u32,
}

impl Default for EnforceOptions {
    fn default() -> Self {
        Self {
            networks: Vec::new(),
            allow_empty_ruleset: false,
            prechange_callback: None,
            add_rule_callback: None,
            retry_on_dry_run: false,
            maximum_retries: DEFAULT_MAXIMUM_RETRIES,
        }
    }
}

/// State collected while enforcing, read back when filling the result.
#[derive(Default)]
struct EnforcementState {
    rules_before: Option<FirewallRuleSet>,
    rules_after: Option<FirewallRuleSet>,
    enforcer: Option<FirewallEnforcer>,
}

pub struct ProjectEnforcer {
    project_id: String,
    api: Arc<dyn ComputeFirewallApi>,
    dry_run: bool,
    project_sema: Option<Arc<Semaphore>>,
    max_running_operations: Option<usize>,
    operation_timeout: Duration,
}

impl ProjectEnforcer {
    pub fn new(project_id: impl Into<String>, api: Arc<dyn ComputeFirewallApi>) -> Self {
        Self {
            project_id: project_id.into(),
            api,
            dry_run: false,
            project_sema: None,
            max_running_operations: None,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Semaphore shared by every project in a batch, held for the whole
    /// write step.
    #[must_use]
    pub fn with_project_sema(mut self, sema: Option<Arc<Semaphore>>) -> Self {
        self.project_sema = sema;
        self
    }

    /// Bound on in-flight write operations within this project. 0 = unbounded.
    #[must_use]
    pub fn with_max_running_operations(mut self, operations: usize) -> Self {
        self.max_running_operations = (operations > 0).then_some(operations);
        self
    }

    #[must_use]
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Converge the project's firewall to `policy` and report what happened.
    pub async fn enforce_firewall_policy(
        &self,
        policy: &FirewallPolicy,
        options: &EnforceOptions,
    ) -> EnforcementResult {
        let mut result = EnforcementResult::new(&self.project_id);
        let mut state = EnforcementState::default();

        match self.enforce(policy, options, &mut state).await {
            Ok(()) => result.status = EnforcementStatus::Success,
            Err(err) => {
                match err.kind {
                    EnforcementErrorKind::ProjectDeleted | EnforcementErrorKind::ApiDisabled => {
                        warn!(project_id = %self.project_id, reason = %err.reason, "{}", err.kind);
                    }
                    _ => {
                        error!(project_id = %self.project_id, reason = %err.reason, "{}", err.kind);
                    }
                }
                result.status = err.status();
                result.status_reason = err.reason;
            }
        }

        result.gce_firewall_enforcement = self.build_record(&result, &state);
        info!(
            project_id = %self.project_id,
            status = %result.status,
            modified = result.rules_modified_count(),
            "project enforcement finished"
        );
        result
    }

    async fn enforce(
        &self,
        policy: &FirewallPolicy,
        options: &EnforceOptions,
        state: &mut EnforcementState,
    ) -> Result<(), EnforcementError> {
        let networks = self.resolve_networks(&options.networks).await?;

        let mut expected = FirewallRuleSet::new(self.project_id.clone())
            .with_add_rule_callback(options.add_rule_callback.clone());
        for network in &networks {
            expected
                .add_rules(policy, Some(network))
                .map_err(|e| EnforcementError::invalid_policy(&e))?;
        }

        let mut enforcer =
            FirewallEnforcer::new(self.project_id.clone(), Arc::clone(&self.api), expected)
                .with_add_rule_callback(options.add_rule_callback.clone())
                .with_dry_run(self.dry_run)
                .with_project_sema(self.project_sema.clone())
                .with_operation_sema(
                    self.max_running_operations
                        .map(|n| Arc::new(Semaphore::new(n))),
                )
                .with_operation_timeout(self.operation_timeout);
        enforcer
            .refresh_current_rules()
            .await
            .map_err(|e| EnforcementError::from_fetch_error(&e))?;
        state.rules_before = enforcer.current_rules().cloned();
        let enforcer = state.enforcer.insert(enforcer);

        let mut retry_count = 0;
        loop {
            let applied = enforcer
                .apply_firewall(
                    options.prechange_callback.as_ref(),
                    &networks,
                    options.allow_empty_ruleset,
                )
                .await;
            let change_count = match applied {
                Ok(count) => count,
                Err(e) => {
                    // Some writes may have landed; record what the project holds now.
                    let err = EnforcementError::apply_failed(&e);
                    state.rules_after = match self
                        .fetch_current_rules(options.add_rule_callback.clone())
                        .await
                    {
                        Ok(after) => Some(after),
                        Err(fetch_err) => {
                            warn!(
                                project_id = %self.project_id,
                                reason = %fetch_err.reason,
                                "could not fetch rules after a failed apply"
                            );
                            None
                        }
                    };
                    return Err(err);
                }
            };

            state.rules_after = None;
            let after = self
                .fetch_current_rules(options.add_rule_callback.clone())
                .await?;
            let converged = after.filtered_by_networks(&networks)
                == enforcer.expected_rules().filtered_by_networks(&networks);
            state.rules_after = Some(after);

            // Nothing was written, so there is nothing to verify.
            if change_count == 0 {
                break;
            }
            if self.dry_run && !options.retry_on_dry_run {
                break;
            }
            if converged {
                break;
            }

            retry_count += 1;
            if retry_count > options.maximum_retries {
                return Err(EnforcementError::retry_exhausted());
            }
            warn!(
                project_id = %self.project_id,
                attempt = retry_count,
                maximum_retries = options.maximum_retries,
                "rules do not match the policy after enforcement, retrying"
            );
            enforcer
                .refresh_current_rules()
                .await
                .map_err(|e| EnforcementError::from_fetch_error(&e))?;
        }

        Ok(())
    }

    /// Sorted explicit networks, or every network in the project.
    async fn resolve_networks(&self, networks: &[String]) -> Result<Vec<String>, EnforcementError> {
        let resolved: BTreeSet<String> = if networks.is_empty() {
            self.api
                .list_networks(&self.project_id)
                .await
                .map_err(|e| EnforcementError::from_networks_error(&e))?
                .into_iter()
                .map(|n| match n.self_link.as_deref() {
                    Some(link) => network_name_from_url(link).to_owned(),
                    None => n.name,
                })
                .collect()
        } else {
            networks.iter().cloned().collect()
        };

        if resolved.is_empty() {
            return Err(EnforcementError::no_networks());
        }
        debug!(project_id = %self.project_id, networks = ?resolved, "enforcing on networks");
        Ok(resolved.into_iter().collect())
    }

    async fn fetch_current_rules(
        &self,
        add_rule_callback: Option<AddRuleCallback>,
    ) -> Result<FirewallRuleSet, EnforcementError> {
        let mut rules =
            FirewallRuleSet::new(self.project_id.clone()).with_add_rule_callback(add_rule_callback);
        rules
            .add_rules_from_api(self.api.as_ref())
            .await
            .map_err(|e| EnforcementError::from_fetch_error(&e))?;
        Ok(rules)
    }

    /// Fill the change record.
    ///
    /// On a live run with a known after-state the change lists are the
    /// name-level difference between before and after. In dry-run, or when
    /// the after-state is unknown, they come from what the enforcer applied
    /// (or would have applied).
    fn build_record(
        &self,
        result: &EnforcementResult,
        state: &EnforcementState,
    ) -> FirewallEnforcementRecord {
        let mut record = FirewallEnforcementRecord::default();
        let Some(before) = state.rules_before.as_ref() else {
            return record;
        };
        let after = state.rules_after.as_ref();

        match (after, self.dry_run) {
            (Some(after), false) => {
                for (name, rule) in after.rules() {
                    match before.get(name) {
                        None => record.rules_added.push(name.clone()),
                        Some(old) if old != rule => record.rules_updated.push(name.clone()),
                        Some(_) => record.rules_unchanged.push(name.clone()),
                    }
                }
                record.rules_removed = before
                    .names()
                    .filter(|name| !after.contains(name))
                    .map(str::to_owned)
                    .collect();
            }
            _ => {
                if let Some(enforcer) = state.enforcer.as_ref() {
                    record.rules_added = rule_names(enforcer.inserted_rules());
                    record.rules_removed = rule_names(enforcer.deleted_rules());
                    record.rules_updated = rule_names(enforcer.updated_rules());
                }
                let touched: BTreeSet<&String> = record
                    .rules_removed
                    .iter()
                    .chain(&record.rules_updated)
                    .collect();
                let reference = after.unwrap_or(before);
                record.rules_unchanged = reference
                    .rules()
                    .iter()
                    .filter(|(name, rule)| {
                        !touched.contains(name) && before.get(name.as_str()) == Some(*rule)
                    })
                    .map(|(name, _)| name.clone())
                    .collect();
            }
        }

        record.rules_modified_count =
            record.rules_added.len() + record.rules_removed.len() + record.rules_updated.len();

        match after {
            None => {
                record.rules_before = Some(RuleSnapshot::new(before.as_json()));
            }
            Some(after) if after != before => {
                record.rules_before = Some(RuleSnapshot::new(before.as_json()));
                record.rules_after = Some(RuleSnapshot::new(after.as_json()));
                record.all_rules_changed = result.status == EnforcementStatus::Success
                    && record.rules_modified_count > 0
                    && record.rules_updated.is_empty()
                    && record.rules_unchanged.is_empty()
                    && record.rules_removed.len() >= before.len()
                    && record.rules_added.len() == after.len();
            }
            Some(_) => {}
        }

        record
    }
}

/// Unique rule names in first-seen order.
fn rule_names(rules: &[FirewallRule]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    rules
        .iter()
        .map(|rule| rule.name().to_owned())
        .filter(|name| seen.insert(name.clone()))
        .collect()
}
