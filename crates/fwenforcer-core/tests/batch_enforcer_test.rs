#![allow(clippy::unwrap_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use fwenforcer_api::ComputeFirewallApi;
use fwenforcer_core::{
    BatchFirewallEnforcer, EnforcementResult, EnforcementStatus, EnforcerConfig, FirewallPolicy,
    RunContext,
};

use common::{FakeComputeApi, policy_rule, ssh_policy};

fn batch(api: &Arc<FakeComputeApi>, config: EnforcerConfig) -> BatchFirewallEnforcer {
    let api: Arc<dyn ComputeFirewallApi> = api.clone();
    BatchFirewallEnforcer::new(api, config)
}

fn policies(projects: &[&str], policy: &FirewallPolicy) -> Vec<(String, FirewallPolicy)> {
    projects
        .iter()
        .map(|p| ((*p).to_owned(), policy.clone()))
        .collect()
}

#[tokio::test]
async fn every_project_yields_one_result() {
    let api = Arc::new(
        FakeComputeApi::new()
            .with_project("p-ok", &["default"])
            .with_project("p-converged", &["default"])
            .fail_listing("p-gone", 404, "Failed to find project p-gone")
            .with_project("p-no-networks", &[]),
    );
    let enforcer = batch(&api, EnforcerConfig::default());
    let input = policies(
        &["p-ok", "p-converged", "p-gone", "p-no-networks"],
        &ssh_policy(),
    );

    // Converge one project up front so the batch leaves it unchanged.
    enforcer
        .run(policies(&["p-converged"], &ssh_policy()), None, None)
        .await
        .unwrap();

    let mut seen = Vec::new();
    let mut on_result = |result: &EnforcementResult| seen.push(result.project_id.clone());
    let log = enforcer.run(input, None, Some(&mut on_result)).await.unwrap();

    assert_eq!(log.results.len(), 4);
    assert_eq!(seen.len(), 4);
    for result in &log.results {
        assert_eq!(result.batch_id, Some(log.batch_id));
        assert_eq!(result.run_context, RunContext::EnforcerBatch);
    }

    let status_of = |project: &str| {
        log.results
            .iter()
            .find(|r| r.project_id == project)
            .map(|r| r.status)
            .unwrap()
    };
    assert_eq!(status_of("p-ok"), EnforcementStatus::Success);
    assert_eq!(status_of("p-converged"), EnforcementStatus::Success);
    assert_eq!(status_of("p-gone"), EnforcementStatus::ProjectDeleted);
    assert_eq!(status_of("p-no-networks"), EnforcementStatus::Error);

    let summary = &log.summary;
    assert_eq!(summary.batch_id, log.batch_id);
    assert_eq!(summary.projects_total, 4);
    assert_eq!(summary.projects_success, 3);
    assert_eq!(summary.projects_error, 1);
    assert_eq!(summary.projects_changed, 1);
    assert_eq!(
        summary.projects_unchanged,
        summary.projects_total - summary.projects_changed
    );
    assert!(summary.timestamp_start <= summary.timestamp_end);
    assert!(log.has_errors());
}

#[tokio::test]
async fn empty_batch_is_valid() {
    let api = Arc::new(FakeComputeApi::new());
    let log = batch(&api, EnforcerConfig::default())
        .run(Vec::new(), None, None)
        .await
        .unwrap();

    assert!(log.results.is_empty());
    assert_eq!(log.summary.projects_total, 0);
    assert_eq!(log.summary.projects_unchanged, 0);
    assert!(!log.has_errors());
}

#[tokio::test]
async fn dry_run_batch_never_writes() {
    let api = Arc::new(
        FakeComputeApi::new()
            .with_project("p1", &["default"])
            .with_project("p2", &["default"]),
    );
    let log = batch(&api, EnforcerConfig::default().with_dry_run(true))
        .run(policies(&["p1", "p2"], &ssh_policy()), None, None)
        .await
        .unwrap();

    assert_eq!(api.writes(), 0);
    assert_eq!(log.summary.projects_changed, 2);
    assert!(
        log.results
            .iter()
            .all(|r| r.gce_firewall_enforcement.rules_added.len() == 1)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_batches_get_distinct_ids_and_serialize_writes() {
    let api = Arc::new(
        ["a1", "a2", "b1", "b2"]
            .iter()
            .fold(FakeComputeApi::new(), |api, p| api.with_project(p, &["default"]))
            .with_write_delay(Duration::from_millis(5)),
    );
    let config = EnforcerConfig::default()
        .with_concurrent_workers(4)
        .with_max_write_projects(1)
        .with_max_running_operations(1);
    let enforcer = batch(&api, config);
    let policy = FirewallPolicy::new(vec![policy_rule("a", "22"), policy_rule("b", "443")]);

    let (first, second) = tokio::join!(
        enforcer.run(policies(&["a1", "a2"], &policy), None, None),
        enforcer.run(policies(&["b1", "b2"], &policy), None, None),
    );
    let (first, second) = (first.unwrap(), second.unwrap());

    assert_ne!(first.batch_id, second.batch_id);
    assert_eq!(first.summary.projects_success, 2);
    assert_eq!(second.summary.projects_success, 2);
    assert_eq!(api.inserts(), 8);
    assert_eq!(api.max_in_flight(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn operations_within_a_project_are_bounded() {
    let api = Arc::new(
        FakeComputeApi::new()
            .with_project("p1", &["default"])
            .with_write_delay(Duration::from_millis(10)),
    );
    let policy = FirewallPolicy::new(
        (0..6)
            .map(|i| policy_rule(&format!("r{i}"), "22"))
            .collect(),
    );

    let log = batch(&api, EnforcerConfig::default().with_max_running_operations(2))
        .run(policies(&["p1"], &policy), None, None)
        .await
        .unwrap();

    assert_eq!(log.results[0].status, EnforcementStatus::Success);
    assert_eq!(api.inserts(), 6);
    assert!(api.max_in_flight() <= 2, "max in flight {}", api.max_in_flight());
}

#[tokio::test]
#[should_panic(expected = "fake compute api exploded")]
async fn worker_panics_reach_the_caller() {
    let api = Arc::new(
        FakeComputeApi::new()
            .with_project("p1", &["default"])
            .panic_on_list("p1"),
    );
    let _ = batch(&api, EnforcerConfig::default())
        .run(policies(&["p1"], &ssh_policy()), None, None)
        .await;
}
