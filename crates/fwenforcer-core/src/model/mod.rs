// ── Domain model ──

pub mod policy;
pub mod result;
pub mod rule;
pub mod rule_set;

pub use policy::{FirewallPolicy, load_policy, parse_policy};
pub use result::{
    BatchEnforcementLog, EnforcementResult, EnforcementStatus, FirewallEnforcementRecord,
    RuleSnapshot, RunContext, Summary,
};
pub use rule::{Direction, FirewallRule, IpPermission};
pub use rule_set::{AddRuleCallback, FirewallRuleSet, build_network_url, network_name_from_url};
