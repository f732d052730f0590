// ── API-to-domain type conversions ──
//
// Bridges raw `fwenforcer_api::types::Firewall` resources and the
// `FirewallRule` domain type. Fields the domain type does not model
// (`id`, `selfLink`, `kind`, ...) are dropped by the wire type already;
// direction strings are parsed into the strong enum here.

use std::str::FromStr;

use fwenforcer_api::types::{Firewall, FirewallPermission};

use crate::error::RuleError;
use crate::model::rule::{Direction, FirewallRule, IpPermission};

// ── Permissions ──────────────────────────────────────────────────────

impl From<FirewallPermission> for IpPermission {
    fn from(p: FirewallPermission) -> Self {
        Self {
            ip_protocol: p.ip_protocol,
            ports: p.ports,
        }
    }
}

impl From<&IpPermission> for FirewallPermission {
    fn from(p: &IpPermission) -> Self {
        Self {
            ip_protocol: p.ip_protocol.clone(),
            ports: p.ports.clone(),
        }
    }
}

fn permissions_to_domain(list: Option<Vec<FirewallPermission>>) -> Option<Vec<IpPermission>> {
    list.map(|perms| perms.into_iter().map(IpPermission::from).collect())
}

fn permissions_to_wire(list: Option<&Vec<IpPermission>>) -> Option<Vec<FirewallPermission>> {
    list.map(|perms| perms.iter().map(FirewallPermission::from).collect())
}

// ── Rules ────────────────────────────────────────────────────────────

impl TryFrom<Firewall> for FirewallRule {
    type Error = RuleError;

    fn try_from(fw: Firewall) -> Result<Self, Self::Error> {
        let direction = fw
            .direction
            .as_deref()
            .map(|d| {
                Direction::from_str(d).map_err(|_| {
                    RuleError::InvalidFirewallRule(format!(
                        "Rule {} has an unknown direction: {d}",
                        fw.name.as_deref().unwrap_or("<unnamed>")
                    ))
                })
            })
            .transpose()?;

        Ok(Self {
            name: fw.name,
            network: fw.network,
            description: fw.description,
            direction,
            priority: fw.priority,
            source_ranges: fw.source_ranges,
            destination_ranges: fw.destination_ranges,
            source_tags: fw.source_tags,
            target_tags: fw.target_tags,
            source_service_accounts: fw.source_service_accounts,
            target_service_accounts: fw.target_service_accounts,
            allowed: permissions_to_domain(fw.allowed),
            denied: permissions_to_domain(fw.denied),
        })
    }
}

impl From<&FirewallRule> for Firewall {
    fn from(rule: &FirewallRule) -> Self {
        Self {
            name: rule.name.clone(),
            network: rule.network.clone(),
            description: rule.description.clone(),
            direction: rule.direction.map(|d| d.to_string()),
            priority: rule.priority,
            source_ranges: rule.source_ranges.clone(),
            destination_ranges: rule.destination_ranges.clone(),
            source_tags: rule.source_tags.clone(),
            target_tags: rule.target_tags.clone(),
            source_service_accounts: rule.source_service_accounts.clone(),
            target_service_accounts: rule.target_service_accounts.clone(),
            allowed: permissions_to_wire(rule.allowed.as_ref()),
            denied: permissions_to_wire(rule.denied.as_ref()),
        }
    }
}
