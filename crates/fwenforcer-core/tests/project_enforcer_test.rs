#![allow(clippy::unwrap_used)]

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use pretty_assertions::assert_eq;

use fwenforcer_api::ComputeFirewallApi;
use fwenforcer_core::{
    AddRuleCallback, EnforceOptions, EnforcementResult, EnforcementStatus,
    FirewallEnforcementRecord, FirewallPolicy, FirewallRule, IpPermission, PrechangeCallback,
    ProjectEnforcer, ProposedChanges,
};

use common::{FakeComputeApi, live_rule, policy_rule, ssh_policy};

fn enforcer(api: &Arc<FakeComputeApi>) -> ProjectEnforcer {
    let api: Arc<dyn ComputeFirewallApi> = api.clone();
    ProjectEnforcer::new("p1", api)
}

async fn enforce(api: &Arc<FakeComputeApi>, policy: &FirewallPolicy) -> EnforcementResult {
    enforcer(api)
        .enforce_firewall_policy(policy, &EnforceOptions::default())
        .await
}

fn one_project() -> FakeComputeApi {
    FakeComputeApi::new().with_project("p1", &["default"])
}

fn legacy_project() -> FakeComputeApi {
    one_project().with_firewall("p1", live_rule("p1", "default", "legacy", "80"))
}

// ── Convergence ─────────────────────────────────────────────────────

#[tokio::test]
async fn unnamed_ssh_rule_is_added_to_empty_project() {
    let api = Arc::new(one_project());

    let result = enforce(&api, &ssh_policy()).await;

    assert_eq!(result.status, EnforcementStatus::Success);
    assert!(result.status_reason.is_empty());
    let record = &result.gce_firewall_enforcement;
    assert_eq!(record.rules_added.len(), 1);
    assert!(record.rules_added[0].starts_with("default-rule-"));
    assert!(record.rules_removed.is_empty());
    assert_eq!(record.rules_modified_count, 1);
    assert_eq!(api.inserts(), 1);
    assert_eq!(api.firewall_names("p1"), record.rules_added);

    let before = record.rules_before.as_ref().unwrap();
    let after = record.rules_after.as_ref().unwrap();
    assert_eq!(before.json, "[]");
    assert_ne!(before.hash, after.hash);
}

#[tokio::test]
async fn second_run_on_converged_project_changes_nothing() {
    let api = Arc::new(one_project());
    let first = enforce(&api, &ssh_policy()).await;
    let second = enforce(&api, &ssh_policy()).await;

    assert_eq!(second.status, EnforcementStatus::Success);
    assert_eq!(second.rules_modified_count(), 0);
    assert_eq!(
        second.gce_firewall_enforcement.rules_unchanged,
        first.gce_firewall_enforcement.rules_added
    );
    assert!(second.gce_firewall_enforcement.rules_before.is_none());
    assert_eq!(api.writes(), 1);
}

#[tokio::test]
async fn inserts_updates_and_deletes_by_name() {
    let api = Arc::new(
        one_project()
            .with_firewall("p1", live_rule("p1", "default", "allow-ssh", "2222"))
            .with_firewall("p1", live_rule("p1", "default", "legacy", "80")),
    );
    let policy = FirewallPolicy::new(vec![
        policy_rule("allow-ssh", "22"),
        policy_rule("allow-https", "443"),
    ]);

    let result = enforce(&api, &policy).await;

    assert_eq!(result.status, EnforcementStatus::Success);
    let record = &result.gce_firewall_enforcement;
    assert_eq!(record.rules_added, vec!["default-allow-https"]);
    assert_eq!(record.rules_removed, vec!["default-legacy"]);
    assert_eq!(record.rules_updated, vec!["default-allow-ssh"]);
    assert!(record.rules_unchanged.is_empty());
    assert_eq!(record.rules_modified_count, 3);
    assert!(!record.all_rules_changed);
    assert_eq!(
        api.write_log(),
        vec![
            "delete:default-legacy",
            "insert:default-allow-https",
            "update:default-allow-ssh"
        ]
    );
}

#[tokio::test]
async fn full_replacement_is_flagged() {
    let api = Arc::new(
        one_project()
            .with_firewall("p1", live_rule("p1", "default", "old-a", "80"))
            .with_firewall("p1", live_rule("p1", "default", "old-b", "81")),
    );
    let policy = FirewallPolicy::new(vec![policy_rule("new", "22")]);

    let result = enforce(&api, &policy).await;

    let record = &result.gce_firewall_enforcement;
    assert_eq!(record.rules_removed, vec!["default-old-a", "default-old-b"]);
    assert_eq!(record.rules_added, vec!["default-new"]);
    assert!(record.all_rules_changed);
}

#[tokio::test]
async fn explicit_networks_leave_other_networks_alone() {
    let api = Arc::new(
        FakeComputeApi::new()
            .with_project("p1", &["default", "prod"])
            .with_firewall("p1", live_rule("p1", "default", "keep", "80")),
    );
    let options = EnforceOptions {
        networks: vec!["prod".into()],
        ..EnforceOptions::default()
    };
    let policy = FirewallPolicy::new(vec![policy_rule("web", "443")]);

    let result = enforcer(&api)
        .enforce_firewall_policy(&policy, &options)
        .await;

    assert_eq!(result.status, EnforcementStatus::Success);
    let record = &result.gce_firewall_enforcement;
    assert_eq!(record.rules_added, vec!["prod-web"]);
    assert_eq!(record.rules_unchanged, vec!["default-keep"]);
    assert!(record.rules_removed.is_empty());
    assert_eq!(api.deletes(), 0);
}

#[tokio::test]
async fn unmanaged_rules_are_ignored() {
    let api = Arc::new(
        one_project().with_firewall("p1", live_rule("p1", "default", "gke-node", "10250")),
    );
    let managed: AddRuleCallback = Arc::new(|rule: &FirewallRule| {
        !rule.name().starts_with("default-gke-")
    });
    let options = EnforceOptions {
        add_rule_callback: Some(managed),
        ..EnforceOptions::default()
    };

    let result = enforcer(&api)
        .enforce_firewall_policy(&ssh_policy(), &options)
        .await;

    assert_eq!(result.status, EnforcementStatus::Success);
    assert_eq!(api.deletes(), 0);
    assert!(
        api.firewall_names("p1")
            .contains(&"default-gke-node".to_owned())
    );
}

// ── Safety switches ─────────────────────────────────────────────────

#[tokio::test]
async fn empty_policy_is_refused_without_deleting() {
    let api = Arc::new(legacy_project());

    let result = enforce(&api, &FirewallPolicy::default()).await;

    assert_eq!(result.status, EnforcementStatus::Error);
    assert!(result.status_reason.contains("No rules defined in the expected rules"));
    assert_eq!(api.writes(), 0);
    // The live rules were re-read and match what was there before.
    let record = &result.gce_firewall_enforcement;
    assert!(record.rules_before.is_none());
    assert!(record.rules_after.is_none());
    assert_eq!(record.rules_unchanged, vec!["default-legacy"]);
}

#[tokio::test]
async fn empty_policy_deletes_everything_when_allowed() {
    let api = Arc::new(legacy_project());
    let options = EnforceOptions {
        allow_empty_ruleset: true,
        ..EnforceOptions::default()
    };

    let result = enforcer(&api)
        .enforce_firewall_policy(&FirewallPolicy::default(), &options)
        .await;

    assert_eq!(result.status, EnforcementStatus::Success);
    assert_eq!(result.gce_firewall_enforcement.rules_removed, vec!["default-legacy"]);
    assert!(api.firewall_names("p1").is_empty());
}

#[tokio::test]
async fn dry_run_reports_changes_without_writing() {
    let api = Arc::new(legacy_project());

    let result = enforcer(&api)
        .with_dry_run(true)
        .enforce_firewall_policy(&ssh_policy(), &EnforceOptions::default())
        .await;

    assert_eq!(result.status, EnforcementStatus::Success);
    assert_eq!(api.writes(), 0);
    assert_eq!(api.firewall_names("p1"), vec!["default-legacy"]);
    let record = &result.gce_firewall_enforcement;
    assert_eq!(record.rules_added.len(), 1);
    assert_eq!(record.rules_removed, vec!["default-legacy"]);
    assert_eq!(record.rules_modified_count, 2);
    assert!(record.rules_unchanged.is_empty());
}

#[tokio::test]
async fn dry_run_with_verification_never_converges() {
    let api = Arc::new(one_project());
    let options = EnforceOptions {
        retry_on_dry_run: true,
        ..EnforceOptions::default()
    };

    let result = enforcer(&api)
        .with_dry_run(true)
        .enforce_firewall_policy(&ssh_policy(), &options)
        .await;

    assert_eq!(result.status, EnforcementStatus::Error);
    assert!(result.status_reason.contains("do not match the expected rules"));
    assert_eq!(api.writes(), 0);
    assert_eq!(result.gce_firewall_enforcement.rules_added.len(), 1);
}

// ── Retry ───────────────────────────────────────────────────────────

#[tokio::test]
async fn gives_up_after_the_retry_budget() {
    let api = Arc::new(one_project().drop_inserts("p1"));

    let result = enforce(&api, &ssh_policy()).await;

    assert_eq!(result.status, EnforcementStatus::Error);
    assert_eq!(
        result.status_reason,
        "New firewall rules do not match the expected rules enforced by the policy"
    );
    // One attempt plus three retries.
    assert_eq!(api.inserts(), 4);
    assert_eq!(result.rules_modified_count(), 0);
}

#[tokio::test]
async fn retry_budget_is_configurable() {
    let api = Arc::new(one_project().drop_inserts("p1"));
    let options = EnforceOptions {
        maximum_retries: 1,
        ..EnforceOptions::default()
    };

    let result = enforcer(&api)
        .enforce_firewall_policy(&ssh_policy(), &options)
        .await;

    assert_eq!(result.status, EnforcementStatus::Error);
    assert_eq!(api.inserts(), 2);
}

// ── Prechange callback ──────────────────────────────────────────────

#[tokio::test]
async fn prechange_callback_sees_the_change_set_once() {
    let api = Arc::new(legacy_project());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&seen);
    let callback: PrechangeCallback = Arc::new(move |changes: &ProposedChanges<'_>| {
        recorder.lock().unwrap().push((
            changes.rules_to_delete.to_vec(),
            changes.rules_to_insert.len(),
            changes.current_rules.len(),
            changes.expected_rules.len(),
        ));
        true
    });
    let options = EnforceOptions {
        prechange_callback: Some(callback),
        ..EnforceOptions::default()
    };

    let result = enforcer(&api)
        .enforce_firewall_policy(&ssh_policy(), &options)
        .await;

    assert_eq!(result.status, EnforcementStatus::Success);
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0], (vec!["default-legacy".to_owned()], 1, 1, 1));
}

/// A vetoed apply reports zero changes, and zero changes skip the
/// convergence check, so the project ends SUCCESS while still drifted.
#[tokio::test]
async fn vetoed_changes_end_successful_without_convergence_check() {
    let api = Arc::new(one_project());
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let callback: PrechangeCallback = Arc::new(move |_: &ProposedChanges<'_>| {
        counter.fetch_add(1, Ordering::SeqCst);
        false
    });
    let options = EnforceOptions {
        prechange_callback: Some(callback),
        ..EnforceOptions::default()
    };

    let result = enforcer(&api)
        .enforce_firewall_policy(&ssh_policy(), &options)
        .await;

    assert_eq!(result.status, EnforcementStatus::Success);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(api.writes(), 0);
    assert_eq!(result.rules_modified_count(), 0);
    assert!(api.firewall_names("p1").is_empty());
}

// ── Failure classification ──────────────────────────────────────────

#[tokio::test]
async fn missing_project_is_project_deleted() {
    let api = Arc::new(one_project().fail_listing("p1", 404, "Failed to find project p1"));

    let result = enforce(&api, &ssh_policy()).await;

    assert_eq!(result.status, EnforcementStatus::ProjectDeleted);
    assert!(result.status_reason.starts_with("Project scheduled for deletion: "));
    assert_eq!(
        result.gce_firewall_enforcement,
        FirewallEnforcementRecord::default()
    );
}

#[tokio::test]
async fn disabled_api_is_project_deleted() {
    let api = Arc::new(one_project().fail_listing(
        "p1",
        403,
        "Compute Engine API has not been used in project 123 before or it is disabled.",
    ));

    let result = enforce(&api, &ssh_policy()).await;

    assert_eq!(result.status, EnforcementStatus::ProjectDeleted);
    assert!(result.status_reason.starts_with("Project has GCE API disabled: "));
}

#[tokio::test]
async fn other_api_failures_are_errors() {
    let api = Arc::new(one_project().fail_listing("p1", 500, "backend error"));

    let result = enforce(&api, &ssh_policy()).await;

    assert_eq!(result.status, EnforcementStatus::Error);
    assert!(
        result
            .status_reason
            .starts_with("error getting current networks from API")
    );
}

#[tokio::test]
async fn project_without_networks_is_an_error() {
    let api = Arc::new(FakeComputeApi::new().with_project("p1", &[]));

    let result = enforce(&api, &ssh_policy()).await;

    assert_eq!(result.status, EnforcementStatus::Error);
    assert_eq!(result.status_reason, "no networks found for project");
}

#[tokio::test]
async fn malformed_policy_is_an_error() {
    let api = Arc::new(one_project());
    let mut rule = policy_rule("both", "22");
    rule.denied = Some(vec![IpPermission::new("udp", &[])]);

    let result = enforce(&api, &FirewallPolicy::new(vec![rule])).await;

    assert_eq!(result.status, EnforcementStatus::Error);
    assert!(result.status_reason.starts_with(
        "error adding the expected firewall rules from the policy: Rule must contain oneof"
    ));
    assert_eq!(api.writes(), 0);
}

#[tokio::test]
async fn failed_operations_fail_the_project() {
    let api = Arc::new(one_project().fail_writes("p1", "QUOTA_EXCEEDED"));

    let result = enforce(&api, &ssh_policy()).await;

    assert_eq!(result.status, EnforcementStatus::Error);
    assert!(result.status_reason.contains("failed while inserting rules for project p1"));
    assert!(result.status_reason.contains("Rule: default-rule-"));
    assert!(result.status_reason.contains("QUOTA_EXCEEDED"));
    assert_eq!(api.inserts(), 1);
}

#[tokio::test]
async fn partial_apply_records_the_state_it_left_behind() {
    let api = Arc::new(legacy_project().fail_inserts("p1", "QUOTA_EXCEEDED"));

    let result = enforce(&api, &ssh_policy()).await;

    assert_eq!(result.status, EnforcementStatus::Error);
    assert!(result.status_reason.contains("QUOTA_EXCEEDED"));
    assert!(api.firewall_names("p1").is_empty());

    let record = &result.gce_firewall_enforcement;
    assert_eq!(record.rules_removed, vec!["default-legacy"]);
    assert!(record.rules_added.is_empty());
    assert!(record.rules_updated.is_empty());
    assert_eq!(record.rules_modified_count, 1);
    assert!(!record.all_rules_changed);

    let before = record.rules_before.as_ref().unwrap();
    let after = record.rules_after.as_ref().unwrap();
    assert!(before.json.contains("default-legacy"));
    assert_eq!(after.json, "[]");
}

// ── Quota ───────────────────────────────────────────────────────────

#[tokio::test]
async fn quota_too_small_for_the_policy() {
    let api = Arc::new(one_project().with_quota("p1", 1.0, 1.0));

    let result = enforce(&api, &ssh_policy()).await;

    assert_eq!(result.status, EnforcementStatus::Error);
    assert!(result.status_reason.contains("exceeding the current firewalls quota: 1"));
    assert_eq!(api.writes(), 0);
}

#[tokio::test]
async fn inserts_go_first_with_quota_headroom() {
    let api = Arc::new(
        one_project()
            .with_quota("p1", 10.0, 1.0)
            .with_firewall("p1", live_rule("p1", "default", "legacy", "80")),
    );

    enforce(&api, &ssh_policy()).await;

    let log = api.write_log();
    assert!(log[0].starts_with("insert:"), "{log:?}");
    assert_eq!(log[1], "delete:default-legacy");
}

#[tokio::test]
async fn deletes_go_first_at_the_quota_limit() {
    let api = Arc::new(
        one_project()
            .with_quota("p1", 2.0, 2.0)
            .with_firewall("p1", live_rule("p1", "default", "legacy", "80")),
    );

    let result = enforce(&api, &ssh_policy()).await;

    assert_eq!(result.status, EnforcementStatus::Success);
    let log = api.write_log();
    assert_eq!(log[0], "delete:default-legacy");
    assert!(log[1].starts_with("insert:"), "{log:?}");
}
