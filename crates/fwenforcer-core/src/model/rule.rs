// ── Firewall rule domain type ──
//
// One type serves both policy entries (where `name` and `network` may be
// filled in later by network scoping) and materialized rules fetched from
// the API. Policy files are strict: unknown keys are rejected.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::RuleError;

pub const DEFAULT_PRIORITY: i64 = 1000;
pub const MAX_RULE_NAME_LEN: usize = 63;
pub const MAX_LIST_VALUES: usize = 256;
pub const MAX_PRIORITY: i64 = 65535;

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum Direction {
    #[default]
    Ingress,
    Egress,
}

/// One `allowed` or `denied` entry: a protocol and optional port list.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IpPermission {
    #[serde(
        rename = "IPProtocol",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub ip_protocol: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
}

impl IpPermission {
    pub fn new(protocol: impl Into<String>, ports: &[&str]) -> Self {
        Self {
            ip_protocol: Some(protocol.into()),
            ports: ports.iter().map(|p| (*p).to_owned()).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FirewallRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ranges: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_ranges: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_service_accounts: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_service_accounts: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<IpPermission>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denied: Option<Vec<IpPermission>>,
}

impl FirewallRule {
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }

    /// A copy with every list sorted, so rules that differ only in list
    /// order compare equal.
    pub fn normalized(&self) -> Self {
        fn sort(list: Option<&Vec<String>>) -> Option<Vec<String>> {
            list.map(|values| {
                let mut values = values.clone();
                values.sort();
                values
            })
        }
        fn sort_permissions(list: Option<&Vec<IpPermission>>) -> Option<Vec<IpPermission>> {
            list.map(|perms| {
                let mut perms: Vec<IpPermission> = perms
                    .iter()
                    .map(|p| {
                        let mut p = p.clone();
                        p.ports.sort();
                        p
                    })
                    .collect();
                perms.sort();
                perms
            })
        }

        Self {
            name: self.name.clone(),
            network: self.network.clone(),
            description: self.description.clone(),
            direction: self.direction,
            priority: self.priority,
            source_ranges: sort(self.source_ranges.as_ref()),
            destination_ranges: sort(self.destination_ranges.as_ref()),
            source_tags: sort(self.source_tags.as_ref()),
            target_tags: sort(self.target_tags.as_ref()),
            source_service_accounts: sort(self.source_service_accounts.as_ref()),
            target_service_accounts: sort(self.target_service_accounts.as_ref()),
            allowed: sort_permissions(self.allowed.as_ref()),
            denied: sort_permissions(self.denied.as_ref()),
        }
    }

    /// Fill in the default priority and direction when absent.
    pub fn with_defaults(mut self) -> Self {
        self.priority.get_or_insert(DEFAULT_PRIORITY);
        self.direction.get_or_insert(Direction::Ingress);
        self
    }

    /// Check the rule against the firewall resource constraints.
    ///
    /// Duplicate names are a rule-set concern and are checked there.
    pub fn validate(&self) -> Result<(), RuleError> {
        let invalid = |msg: String| Err(RuleError::InvalidFirewallRule(msg));

        if self.name.is_none() {
            return invalid(format!("Rule missing required field \"name\": \"{self}\"."));
        }
        if self.network.is_none() {
            return invalid(format!("Rule missing required field \"network\": \"{self}\"."));
        }

        match self.direction.unwrap_or_default() {
            Direction::Ingress => {
                if self.source_ranges.is_none()
                    && self.source_tags.is_none()
                    && self.source_service_accounts.is_none()
                {
                    return invalid(format!(
                        "Ingress rule missing required field oneof \"sourceRanges\", \
                         \"sourceTags\" or \"sourceServiceAccounts\": \"{self}\"."
                    ));
                }
                if self.destination_ranges.is_some() {
                    return invalid(format!(
                        "Ingress rules cannot include \"destinationRanges\": \"{self}\"."
                    ));
                }
            }
            Direction::Egress => {
                if self.source_ranges.is_some()
                    || self.source_tags.is_some()
                    || self.source_service_accounts.is_some()
                {
                    return invalid(format!(
                        "Egress rules cannot include \"sourceRanges\", \"sourceTags\" or \
                         \"sourceServiceAccounts\": \"{self}\"."
                    ));
                }
                if self.destination_ranges.is_none() {
                    return invalid(format!(
                        "Egress rule missing required field \"destinationRanges\": \"{self}\"."
                    ));
                }
            }
        }

        if self.source_tags.is_some() && self.source_service_accounts.is_some() {
            return invalid(format!(
                "Rule cannot mix \"sourceTags\" and \"sourceServiceAccounts\": \"{self}\"."
            ));
        }
        if self.target_tags.is_some() && self.target_service_accounts.is_some() {
            return invalid(format!(
                "Rule cannot mix \"targetTags\" and \"targetServiceAccounts\": \"{self}\"."
            ));
        }

        for (key, values) in [
            ("sourceRanges", &self.source_ranges),
            ("sourceTags", &self.source_tags),
            ("targetTags", &self.target_tags),
            ("destinationRanges", &self.destination_ranges),
        ] {
            if values.as_ref().is_some_and(|v| v.len() > MAX_LIST_VALUES) {
                return invalid(format!(
                    "Rule entry \"{key}\" must contain {MAX_LIST_VALUES} or fewer values: \
                     \"{self}\"."
                ));
            }
        }

        match (&self.allowed, &self.denied) {
            (Some(perms), None) | (None, Some(perms)) => {
                let kind = if self.allowed.is_some() { "Allow" } else { "Deny" };
                if let Some(perm) = perms.iter().find(|p| p.ip_protocol.is_none()) {
                    let perm = serde_json::to_string(perm).unwrap_or_default();
                    return invalid(format!(
                        "{kind} rule in {} missing required field \"IPProtocol\": \"{perm}\".",
                        self.name()
                    ));
                }
            }
            _ => {
                return invalid(format!(
                    "Rule must contain oneof \"allowed\" or \"denied\" entries: \"{self}\"."
                ));
            }
        }

        if let Some(priority) = self.priority {
            if !(0..=MAX_PRIORITY).contains(&priority) {
                return invalid(format!(
                    "Rule \"priority\" out of range 0-{MAX_PRIORITY}: \"{self}\"."
                ));
            }
        }

        if self.name().chars().count() > MAX_RULE_NAME_LEN {
            return invalid(format!(
                "Rule name exceeds length limit of {MAX_RULE_NAME_LEN} chars: \"{}\".",
                self.name()
            ));
        }

        Ok(())
    }
}

impl fmt::Display for FirewallRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}
