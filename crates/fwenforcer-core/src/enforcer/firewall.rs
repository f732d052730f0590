// ── FirewallEnforcer ──
//
// Converges one project's live rules to an expected rule set: builds the
// delete / insert / update change set, picks a write order that fits the
// firewall quota, and issues the writes with bounded concurrency.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use strum::Display;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use fwenforcer_api::ComputeFirewallApi;
use fwenforcer_api::types::{Firewall, Operation};

use crate::config::DEFAULT_OPERATION_TIMEOUT;
use crate::error::{ApplyError, FetchRulesError};
use crate::model::rule::FirewallRule;
use crate::model::rule_set::{AddRuleCallback, FirewallRuleSet, network_name_from_url};

/// Operation error codes that do not fail a write.
const IGNORED_OPERATION_ERRORS: [&str; 2] = ["RESOURCE_ALREADY_EXISTS", "INVALID_FIELD_VALUE"];

/// What a pending apply is about to do, handed to the prechange callback.
#[derive(Debug)]
pub struct ProposedChanges<'a> {
    pub project_id: &'a str,
    pub rules_to_delete: &'a [String],
    pub rules_to_insert: &'a [String],
    pub rules_to_update: &'a [String],
    pub current_rules: &'a FirewallRuleSet,
    pub expected_rules: &'a FirewallRuleSet,
}

/// Called once per apply, before any write. Returning `false` vetoes the
/// writes for that attempt.
pub type PrechangeCallback = Arc<dyn Fn(&ProposedChanges<'_>) -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
enum ChangeAction {
    Insert,
    Delete,
    Update,
}

impl ChangeAction {
    fn operation_type(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Delete => "delete",
            Self::Update => "update",
        }
    }
}

/// An operation succeeded if it has no error, or only ignorable ones.
fn is_successful(operation: &Operation) -> bool {
    match &operation.error {
        None => true,
        Some(errors) if errors.errors.is_empty() => false,
        Some(errors) => errors
            .errors
            .iter()
            .all(|e| IGNORED_OPERATION_ERRORS.contains(&e.code.as_str())),
    }
}

fn describe_operation_errors(operation: &Operation) -> String {
    let errors = operation.errors();
    if errors.is_empty() {
        return format!("operation {} reported an error without details", operation.name);
    }
    errors
        .iter()
        .map(|e| format!("{}: {}", e.code, e.message))
        .collect::<Vec<_>>()
        .join(", ")
}

pub struct FirewallEnforcer {
    project_id: String,
    api: Arc<dyn ComputeFirewallApi>,
    expected_rules: FirewallRuleSet,
    current_rules: Option<FirewallRuleSet>,
    add_rule_callback: Option<AddRuleCallback>,
    dry_run: bool,
    project_sema: Option<Arc<Semaphore>>,
    operation_sema: Option<Arc<Semaphore>>,
    operation_timeout: Duration,

    rules_to_delete: Vec<String>,
    rules_to_insert: Vec<String>,
    rules_to_update: Vec<String>,

    deleted_rules: Vec<FirewallRule>,
    inserted_rules: Vec<FirewallRule>,
    updated_rules: Vec<FirewallRule>,
}

impl FirewallEnforcer {
    pub fn new(
        project_id: impl Into<String>,
        api: Arc<dyn ComputeFirewallApi>,
        expected_rules: FirewallRuleSet,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            api,
            expected_rules,
            current_rules: None,
            add_rule_callback: None,
            dry_run: false,
            project_sema: None,
            operation_sema: None,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            rules_to_delete: Vec::new(),
            rules_to_insert: Vec::new(),
            rules_to_update: Vec::new(),
            deleted_rules: Vec::new(),
            inserted_rules: Vec::new(),
            updated_rules: Vec::new(),
        }
    }

    // ── Builders ─────────────────────────────────────────────────────

    #[must_use]
    pub fn with_add_rule_callback(mut self, callback: Option<AddRuleCallback>) -> Self {
        self.add_rule_callback = callback;
        self
    }

    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    #[must_use]
    pub fn with_project_sema(mut self, sema: Option<Arc<Semaphore>>) -> Self {
        self.project_sema = sema;
        self
    }

    #[must_use]
    pub fn with_operation_sema(mut self, sema: Option<Arc<Semaphore>>) -> Self {
        self.operation_sema = sema;
        self
    }

    #[must_use]
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn expected_rules(&self) -> &FirewallRuleSet {
        &self.expected_rules
    }

    pub fn current_rules(&self) -> Option<&FirewallRuleSet> {
        self.current_rules.as_ref()
    }

    /// Rules inserted so far, across every apply.
    pub fn inserted_rules(&self) -> &[FirewallRule] {
        &self.inserted_rules
    }

    pub fn deleted_rules(&self) -> &[FirewallRule] {
        &self.deleted_rules
    }

    pub fn updated_rules(&self) -> &[FirewallRule] {
        &self.updated_rules
    }

    /// Replace the cached current rules with a fresh fetch.
    pub async fn refresh_current_rules(&mut self) -> Result<(), FetchRulesError> {
        let mut current = FirewallRuleSet::new(self.project_id.clone())
            .with_add_rule_callback(self.add_rule_callback.clone());
        current.add_rules_from_api(self.api.as_ref()).await?;
        debug!(
            project_id = %self.project_id,
            rules = current.len(),
            "refreshed current firewall rules"
        );
        self.current_rules = Some(current);
        Ok(())
    }

    // ── Apply ────────────────────────────────────────────────────────

    /// Push the changes needed to make the current rules match the
    /// expected ones and return how many rules were changed.
    ///
    /// With `networks`, only rules on those networks are compared and
    /// changed. An empty expected set is refused unless
    /// `allow_empty_ruleset`, since it would delete every managed rule.
    pub async fn apply_firewall(
        &mut self,
        prechange_callback: Option<&PrechangeCallback>,
        networks: &[String],
        allow_empty_ruleset: bool,
    ) -> Result<usize, ApplyError> {
        if self.current_rules.as_ref().is_none_or(FirewallRuleSet::is_empty) {
            self.refresh_current_rules().await?;
        }

        if self.expected_rules.is_empty() && !allow_empty_ruleset {
            return Err(ApplyError::EmptyProposedRuleSet);
        }

        let (current, expected) = self.compared_rules(networks);
        if current == expected {
            info!(
                project_id = %self.project_id,
                "current and expected rules match, no changes needed"
            );
            return Ok(0);
        }

        self.build_change_set(&current, &expected);
        self.validate_change_set(networks)?;
        let delete_before_insert = self.check_change_operation_order().await?;

        let _permit = match &self.project_sema {
            Some(sema) => Some(Arc::clone(sema).acquire_owned().await?),
            None => None,
        };

        if let Some(callback) = prechange_callback {
            let proposed = ProposedChanges {
                project_id: &self.project_id,
                rules_to_delete: &self.rules_to_delete,
                rules_to_insert: &self.rules_to_insert,
                rules_to_update: &self.rules_to_update,
                current_rules: self.current_rules.as_ref().unwrap_or(&self.expected_rules),
                expected_rules: &self.expected_rules,
            };
            if !callback(&proposed) {
                warn!(
                    project_id = %self.project_id,
                    "prechange callback declined the change set, no changes made"
                );
                return Ok(0);
            }
        }

        self.apply_change_set(delete_before_insert).await
    }

    fn compared_rules(
        &self,
        networks: &[String],
    ) -> (BTreeMap<String, FirewallRule>, BTreeMap<String, FirewallRule>) {
        let empty = FirewallRuleSet::default();
        let current = self.current_rules.as_ref().unwrap_or(&empty);
        if networks.is_empty() {
            (current.rules().clone(), self.expected_rules.rules().clone())
        } else {
            (
                current.filtered_by_networks(networks),
                self.expected_rules.filtered_by_networks(networks),
            )
        }
    }

    fn build_change_set(
        &mut self,
        current: &BTreeMap<String, FirewallRule>,
        expected: &BTreeMap<String, FirewallRule>,
    ) {
        self.rules_to_delete = current
            .keys()
            .filter(|name| !expected.contains_key(*name))
            .cloned()
            .collect();
        self.rules_to_insert = expected
            .keys()
            .filter(|name| !current.contains_key(*name))
            .cloned()
            .collect();
        self.rules_to_update = expected
            .iter()
            .filter(|(name, rule)| current.get(*name).is_some_and(|c| c != *rule))
            .map(|(name, _)| name.clone())
            .collect();

        debug!(
            project_id = %self.project_id,
            delete = ?self.rules_to_delete,
            insert = ?self.rules_to_insert,
            update = ?self.rules_to_update,
            "built change set"
        );
    }

    /// An insert must not collide with a rule that exists outside the
    /// compared networks, and an update must stay inside them.
    fn validate_change_set(&self, networks: &[String]) -> Result<(), ApplyError> {
        let Some(current) = self.current_rules.as_ref() else {
            return Ok(());
        };

        for name in &self.rules_to_insert {
            if current.contains(name) && !self.rules_to_delete.contains(name) {
                return Err(ApplyError::RuleValidation {
                    rule_name: name.clone(),
                    project_id: self.project_id.clone(),
                });
            }
        }

        if networks.is_empty() {
            return Ok(());
        }

        for name in &self.rules_to_update {
            let network = current
                .get(name)
                .and_then(|rule| rule.network.as_deref())
                .map(network_name_from_url)
                .unwrap_or_default();
            if !networks.iter().any(|n| n == network) {
                return Err(ApplyError::NetworkImpact {
                    rule_name: name.clone(),
                    network: network.to_owned(),
                    project_id: self.project_id.clone(),
                    allowed: networks.join(", "),
                });
            }
        }
        Ok(())
    }

    /// Deletes go first when the inserts would not fit in the quota
    /// alongside the rules being deleted, or when the quota is unknown.
    async fn check_change_operation_order(&self) -> Result<bool, ApplyError> {
        let Some(quota) = self.api.get_firewalls_quota(&self.project_id).await? else {
            debug!(project_id = %self.project_id, "no firewall quota reported, deleting first");
            return Ok(true);
        };

        #[allow(clippy::cast_precision_loss, clippy::as_conversions)]
        let (inserts, deletes) = (
            self.rules_to_insert.len() as f64,
            self.rules_to_delete.len() as f64,
        );

        if quota.usage + inserts <= quota.limit {
            return Ok(false);
        }
        if quota.usage - deletes + inserts > quota.limit {
            return Err(ApplyError::QuotaExceeded {
                project_id: self.project_id.clone(),
                limit: quota.limit,
            });
        }
        info!(
            project_id = %self.project_id,
            usage = quota.usage,
            limit = quota.limit,
            "inserts would exceed the firewall quota, deleting rules first"
        );
        Ok(true)
    }

    async fn apply_change_set(&mut self, delete_before_insert: bool) -> Result<usize, ApplyError> {
        if self.rules_to_delete.is_empty()
            && self.rules_to_insert.is_empty()
            && self.rules_to_update.is_empty()
        {
            return Ok(0);
        }

        let mut change_count = 0;
        if delete_before_insert {
            change_count += self.delete_rules().await?;
            change_count += self.insert_rules().await?;
        } else {
            change_count += self.insert_rules().await?;
            change_count += self.delete_rules().await?;
        }
        change_count += self.update_rules().await?;
        Ok(change_count)
    }

    async fn insert_rules(&mut self) -> Result<usize, ApplyError> {
        let rules = pick(&self.expected_rules, &self.rules_to_insert);
        if rules.is_empty() {
            return Ok(0);
        }
        info!(project_id = %self.project_id, rules = ?self.rules_to_insert, "inserting rules");

        let (applied, errors) = self.apply_change(ChangeAction::Insert, &rules).await;
        let count = applied.len();
        self.inserted_rules.extend(applied);
        if errors.is_empty() {
            Ok(count)
        } else {
            Err(ApplyError::InsertFailed {
                project_id: self.project_id.clone(),
                errors,
            })
        }
    }

    async fn delete_rules(&mut self) -> Result<usize, ApplyError> {
        let rules = match &self.current_rules {
            Some(current) => pick(current, &self.rules_to_delete),
            None => Vec::new(),
        };
        if rules.is_empty() {
            return Ok(0);
        }
        info!(project_id = %self.project_id, rules = ?self.rules_to_delete, "deleting rules");

        let (applied, errors) = self.apply_change(ChangeAction::Delete, &rules).await;
        let count = applied.len();
        self.deleted_rules.extend(applied);
        if errors.is_empty() {
            Ok(count)
        } else {
            Err(ApplyError::DeleteFailed {
                project_id: self.project_id.clone(),
                errors,
            })
        }
    }

    async fn update_rules(&mut self) -> Result<usize, ApplyError> {
        let rules = pick(&self.expected_rules, &self.rules_to_update);
        if rules.is_empty() {
            return Ok(0);
        }
        info!(project_id = %self.project_id, rules = ?self.rules_to_update, "updating rules");

        let (applied, errors) = self.apply_change(ChangeAction::Update, &rules).await;
        let count = applied.len();
        self.updated_rules.extend(applied);
        if errors.is_empty() {
            Ok(count)
        } else {
            Err(ApplyError::UpdateFailed {
                project_id: self.project_id.clone(),
                errors,
            })
        }
    }

    /// Run one action over `rules` concurrently. Returns the rules that
    /// were applied and one message per rule that failed.
    async fn apply_change(
        &self,
        action: ChangeAction,
        rules: &[FirewallRule],
    ) -> (Vec<FirewallRule>, Vec<String>) {
        let outcomes = join_all(rules.iter().map(|rule| self.apply_one(action, rule))).await;

        let mut applied = Vec::new();
        let mut errors = Vec::new();
        for (rule, outcome) in rules.iter().zip(outcomes) {
            match outcome {
                Ok(()) => applied.push(rule.clone()),
                Err(message) => {
                    error!(
                        project_id = %self.project_id,
                        %action,
                        rule = rule.name(),
                        error = %message,
                        "firewall rule change failed"
                    );
                    errors.push(format!("Rule: {}\nError: {message}", rule.name()));
                }
            }
        }
        (applied, errors)
    }

    async fn apply_one(&self, action: ChangeAction, rule: &FirewallRule) -> Result<(), String> {
        let _permit = match &self.operation_sema {
            Some(sema) => Some(sema.acquire().await.map_err(|e| e.to_string())?),
            None => None,
        };

        info!(
            project_id = %self.project_id,
            %action,
            dry_run = self.dry_run,
            rule = %rule,
            "applying firewall rule change"
        );

        let operation = if self.dry_run {
            Operation::done(rule.name(), action.operation_type())
        } else {
            let firewall = Firewall::from(rule);
            let issued = match action {
                ChangeAction::Insert => {
                    self.api
                        .insert_firewall_rule(&self.project_id, &firewall)
                        .await
                }
                ChangeAction::Update => {
                    self.api
                        .update_firewall_rule(&self.project_id, &firewall)
                        .await
                }
                ChangeAction::Delete => {
                    self.api
                        .delete_firewall_rule(&self.project_id, rule.name())
                        .await
                }
            }
            .map_err(|e| e.to_string())?;

            self.api
                .wait_for_operation(&self.project_id, issued, self.operation_timeout)
                .await
                .map_err(|e| e.to_string())?
        };

        if is_successful(&operation) {
            Ok(())
        } else {
            Err(describe_operation_errors(&operation))
        }
    }
}

/// Clone the named rules out of `set`, in name order.
fn pick(set: &FirewallRuleSet, names: &[String]) -> Vec<FirewallRule> {
    names.iter().filter_map(|n| set.get(n).cloned()).collect()
}
