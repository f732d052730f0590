// ── FirewallRuleSet ──
//
// A validated, name-keyed collection of rules for one project. Equality is
// over the name -> rule map, never list order.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use fwenforcer_api::ComputeFirewallApi;
use fwenforcer_api::types;

use super::result::sha256_hex;
use super::rule::FirewallRule;
use crate::error::{FetchRulesError, RuleError};

/// Root of network self-links built for policy rules.
pub const NETWORK_URL_ROOT: &str = "https://www.googleapis.com/compute/beta";

/// Decides whether a rule is managed at all. Rules for which it returns
/// `false` are left out of both expected and current sets.
pub type AddRuleCallback = Arc<dyn Fn(&FirewallRule) -> bool + Send + Sync>;

/// The last path segment of a network URL (or the input, if it has none).
pub fn network_name_from_url(network_url: &str) -> &str {
    network_url.rsplit('/').next().unwrap_or(network_url)
}

pub fn build_network_url(project_id: &str, network: &str) -> String {
    format!("{NETWORK_URL_ROOT}/projects/{project_id}/global/networks/{network}")
}

#[derive(Clone, Default)]
pub struct FirewallRuleSet {
    project_id: String,
    rules: BTreeMap<String, FirewallRule>,
    add_rule_callback: Option<AddRuleCallback>,
}

impl PartialEq for FirewallRuleSet {
    fn eq(&self, other: &Self) -> bool {
        self.rules == other.rules
    }
}

impl Eq for FirewallRuleSet {}

impl fmt::Debug for FirewallRuleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FirewallRuleSet")
            .field("project_id", &self.project_id)
            .field("rules", &self.rules.keys().collect::<Vec<_>>())
            .field("add_rule_callback", &self.add_rule_callback.is_some())
            .finish()
    }
}

impl FirewallRuleSet {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            rules: BTreeMap::new(),
            add_rule_callback: None,
        }
    }

    pub fn with_add_rule_callback(mut self, callback: Option<AddRuleCallback>) -> Self {
        self.add_rule_callback = callback;
        self
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn rules(&self) -> &BTreeMap<String, FirewallRule> {
        &self.rules
    }

    pub fn get(&self, name: &str) -> Option<&FirewallRule> {
        self.rules.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.rules.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(String::as_str)
    }

    // ── Building ─────────────────────────────────────────────────────

    /// Add every rule of a policy, scoped to `network_name` when given.
    pub fn add_rules<'a>(
        &mut self,
        rules: impl IntoIterator<Item = &'a FirewallRule>,
        network_name: Option<&str>,
    ) -> Result<(), RuleError> {
        for rule in rules {
            self.add_rule(rule, network_name)?;
        }
        Ok(())
    }

    /// Validate and add one rule.
    ///
    /// With `network_name`, a rule pinned to another network is skipped. A
    /// rule with no network is bound to `network_name` and its name gets the
    /// network as a prefix (a policy rule without a name first gets one
    /// derived from its content).
    pub fn add_rule(
        &mut self,
        rule: &FirewallRule,
        network_name: Option<&str>,
    ) -> Result<(), RuleError> {
        let mut rule = rule.normalized();

        if let Some(network_name) = network_name {
            if let Some(network) = rule.network.as_deref() {
                let rule_network = network_name_from_url(network);
                if rule_network != network_name {
                    info!(
                        project_id = %self.project_id,
                        network = rule_network,
                        rule = %rule,
                        "firewall rule does not apply to network, skipping"
                    );
                    return Ok(());
                }
            } else {
                let base_name = match rule.name.take() {
                    Some(name) => name,
                    None => generated_rule_name(&rule),
                };
                rule.network = Some(build_network_url(&self.project_id, network_name));
                rule.name = Some(self.scoped_name(network_name, &base_name));
            }
        }

        let rule = rule.with_defaults();
        if self.check_rule_before_adding(&rule)? {
            self.rules.insert(rule.name().to_owned(), rule);
        }
        Ok(())
    }

    /// `"{network}-{name}"`, truncating the network so the result fits in
    /// 63 characters. On a collision the network part is replaced with a
    /// hashed form until the name is unique.
    fn scoped_name(&self, network_name: &str, name: &str) -> String {
        let keep = 62usize.saturating_sub(name.chars().count());
        let mut prefix = network_name.to_owned();
        let mut last_truncated: Option<String> = None;
        loop {
            let truncated: String = prefix.chars().take(keep).collect();
            let candidate = format!("{truncated}-{name}");
            if !self.rules.contains_key(&candidate) {
                return candidate;
            }
            // Nothing left to vary; let the duplicate check report it.
            if last_truncated.as_deref() == Some(truncated.as_str()) {
                return candidate;
            }
            last_truncated = Some(truncated);
            // Names must start with a letter, hex digests may not.
            prefix = format!("hn-{}", &sha256_hex(&prefix)[..32]);
        }
    }

    fn check_rule_before_adding(&self, rule: &FirewallRule) -> Result<bool, RuleError> {
        rule.validate()?;

        if self.rules.contains_key(rule.name()) {
            return Err(RuleError::DuplicateFirewallRuleName {
                name: rule.name().to_owned(),
                existing: self.names().collect::<Vec<_>>().join(", "),
            });
        }

        if let Some(callback) = &self.add_rule_callback {
            return Ok(callback(rule));
        }
        Ok(true)
    }

    /// Load the project's live rules. A set that already holds rules is
    /// left untouched.
    pub async fn add_rules_from_api(
        &mut self,
        api: &dyn ComputeFirewallApi,
    ) -> Result<(), FetchRulesError> {
        if !self.rules.is_empty() {
            warn!(
                project_id = %self.project_id,
                "cannot import rules from the API into a rule set with rules already added"
            );
            return Ok(());
        }

        let firewalls = api.list_firewalls(&self.project_id).await?;
        for firewall in firewalls {
            let rule = FirewallRule::try_from(firewall)?;
            self.add_rule(&rule, None)?;
        }
        Ok(())
    }

    /// Import rules exported by [`as_json`](Self::as_json). The legacy
    /// `{"items": [...]}` envelope is accepted too; its entries are filtered
    /// to the known rule fields.
    pub fn add_rules_from_json(&mut self, json: &str) -> Result<(), RuleError> {
        if !self.rules.is_empty() {
            warn!(
                project_id = %self.project_id,
                "cannot import JSON into a rule set with rules already added"
            );
            return Ok(());
        }

        match serde_json::from_str::<Value>(json)? {
            Value::Array(items) => {
                for item in items {
                    let rule: FirewallRule = serde_json::from_value(item)?;
                    self.add_rule(&rule, None)?;
                }
            }
            Value::Object(mut envelope) => {
                if let Some(items) = envelope.remove("items") {
                    let firewalls: Vec<types::Firewall> = serde_json::from_value(items)?;
                    for firewall in firewalls {
                        let rule = FirewallRule::try_from(firewall)?;
                        self.add_rule(&rule, None)?;
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    // ── Views ────────────────────────────────────────────────────────

    /// The rules whose network is one of `networks`.
    pub fn filtered_by_networks(&self, networks: &[String]) -> BTreeMap<String, FirewallRule> {
        self.rules
            .iter()
            .filter(|(_, rule)| {
                rule.network
                    .as_deref()
                    .is_some_and(|n| networks.iter().any(|w| w == network_name_from_url(n)))
            })
            .map(|(name, rule)| (name.clone(), rule.clone()))
            .collect()
    }

    /// Rules as a JSON array sorted by (network, name) with sorted keys.
    pub fn as_json(&self) -> String {
        let mut rules: Vec<&FirewallRule> = self.rules.values().collect();
        rules.sort_by(|a, b| (&a.network, &a.name).cmp(&(&b.network, &b.name)));
        let values: Vec<Value> = rules
            .into_iter()
            .map(|rule| canonical(serde_json::to_value(rule).unwrap_or(Value::Null)))
            .collect();
        Value::Array(values).to_string()
    }

    /// sha256 hex digest of [`as_json`](Self::as_json).
    pub fn hash(&self) -> String {
        sha256_hex(&self.as_json())
    }
}

/// Rebuild objects with keys in sorted order, whatever map type backs
/// `serde_json::Map`.
fn canonical(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, canonical(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonical).collect()),
        other => other,
    }
}

/// `rule-` plus a digest of the rule body, stable across runs.
fn generated_rule_name(rule: &FirewallRule) -> String {
    let body = canonical(serde_json::to_value(rule).unwrap_or(Value::Null)).to_string();
    format!("rule-{}", &sha256_hex(&body)[..16])
}
