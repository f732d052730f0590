// ── Enforcement ──
//
// `batch` fans projects out, `project` runs the per-project state machine,
// and `firewall` computes and applies one project's change set.

pub mod batch;
pub mod firewall;
pub mod project;

pub use batch::{BatchFirewallEnforcer, next_batch_id};
pub use firewall::{FirewallEnforcer, PrechangeCallback, ProposedChanges};
pub use project::{EnforceOptions, ProjectEnforcer};
