// In-memory stand-in for the compute API, shared by the enforcer tests.

#![allow(clippy::unwrap_used, dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use fwenforcer_api::types::{
    Firewall, Network, Operation, OperationError, OperationErrors, Quota,
};
use fwenforcer_api::{ComputeFirewallApi, Error};
use fwenforcer_core::model::build_network_url;
use fwenforcer_core::{FirewallPolicy, FirewallRule, IpPermission, parse_policy};

pub const SSH_POLICY: &str = r#"[{
    "allowed": [{"IPProtocol": "tcp", "ports": ["22"]}],
    "direction": "INGRESS",
    "sourceRanges": ["0.0.0.0/0"]
}]"#;

pub fn ssh_policy() -> FirewallPolicy {
    parse_policy(SSH_POLICY, "policy.json").unwrap()
}

/// A named ingress rule allowing tcp on `port`, as it appears in a policy.
pub fn policy_rule(name: &str, port: &str) -> FirewallRule {
    FirewallRule {
        name: Some(name.into()),
        source_ranges: Some(vec!["10.0.0.0/8".into()]),
        allowed: Some(vec![IpPermission::new("tcp", &[port])]),
        ..FirewallRule::default()
    }
}

/// The live form of `policy_rule(name, port)` scoped to `network`.
pub fn live_rule(project_id: &str, network: &str, name: &str, port: &str) -> Firewall {
    let mut rule = policy_rule(&format!("{network}-{name}"), port);
    rule.network = Some(build_network_url(project_id, network));
    Firewall::from(&rule.with_defaults())
}

struct WriteError {
    code: String,
    /// Only this action fails; `None` fails every write.
    action: Option<&'static str>,
}

#[derive(Default)]
struct ProjectState {
    networks: Vec<String>,
    firewalls: BTreeMap<String, Firewall>,
    list_error: Option<(u16, String)>,
    panic_on_list: bool,
    drop_inserts: bool,
    write_error: Option<WriteError>,
    quota: Option<Quota>,
}

#[derive(Default)]
pub struct FakeComputeApi {
    projects: Mutex<HashMap<String, ProjectState>>,
    write_log: Mutex<Vec<String>>,
    inserts: AtomicUsize,
    deletes: AtomicUsize,
    updates: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    write_delay: Duration,
}

impl FakeComputeApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = delay;
        self
    }

    pub fn with_project(self, project_id: &str, networks: &[&str]) -> Self {
        self.update(project_id, |p| {
            p.networks = networks.iter().map(|n| (*n).to_owned()).collect();
        });
        self
    }

    fn update(&self, project_id: &str, f: impl FnOnce(&mut ProjectState)) {
        let mut projects = self.projects.lock().unwrap();
        f(projects.entry(project_id.to_owned()).or_default());
    }

    pub fn with_firewall(self, project_id: &str, firewall: Firewall) -> Self {
        self.update(project_id, |p| {
            p.firewalls
                .insert(firewall.name.clone().unwrap_or_default(), firewall);
        });
        self
    }

    /// Listing networks and firewalls fails with this HTTP error.
    pub fn fail_listing(self, project_id: &str, status: u16, message: &str) -> Self {
        self.update(project_id, |p| p.list_error = Some((status, message.to_owned())));
        self
    }

    pub fn panic_on_list(self, project_id: &str) -> Self {
        self.update(project_id, |p| p.panic_on_list = true);
        self
    }

    /// Inserts report success but never land.
    pub fn drop_inserts(self, project_id: &str) -> Self {
        self.update(project_id, |p| p.drop_inserts = true);
        self
    }

    /// Every write operation finishes with this error code.
    pub fn fail_writes(self, project_id: &str, code: &str) -> Self {
        self.update(project_id, |p| {
            p.write_error = Some(WriteError {
                code: code.to_owned(),
                action: None,
            });
        });
        self
    }

    /// Inserts finish with this error code, other writes land.
    pub fn fail_inserts(self, project_id: &str, code: &str) -> Self {
        self.update(project_id, |p| {
            p.write_error = Some(WriteError {
                code: code.to_owned(),
                action: Some("insert"),
            });
        });
        self
    }

    pub fn with_quota(self, project_id: &str, limit: f64, usage: f64) -> Self {
        self.update(project_id, |p| {
            p.quota = Some(Quota {
                metric: "FIREWALLS".into(),
                limit,
                usage,
            });
        });
        self
    }

    // ── Observations ─────────────────────────────────────────────────

    pub fn inserts(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.inserts() + self.deletes() + self.updates()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// `"{action}:{rule}"` per write, in call order.
    pub fn write_log(&self) -> Vec<String> {
        self.write_log.lock().unwrap().clone()
    }

    pub fn firewall_names(&self, project_id: &str) -> Vec<String> {
        self.projects
            .lock()
            .unwrap()
            .get(project_id)
            .map(|p| p.firewalls.keys().cloned().collect())
            .unwrap_or_default()
    }

    // ── Internals ────────────────────────────────────────────────────

    fn check_listing(&self, project_id: &str) -> Result<(), Error> {
        let projects = self.projects.lock().unwrap();
        let Some(project) = projects.get(project_id) else {
            return Ok(());
        };
        assert!(!project.panic_on_list, "fake compute api exploded");
        match &project.list_error {
            Some((status, message)) => Err(Error::Http {
                status: *status,
                message: message.clone(),
                reasons: Vec::new(),
            }),
            None => Ok(()),
        }
    }

    async fn track_write(&self, action: &str, name: &str) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.write_log.lock().unwrap().push(format!("{action}:{name}"));
        if !self.write_delay.is_zero() {
            tokio::time::sleep(self.write_delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn finish(&self, project_id: &str, name: &str, action: &str) -> Operation {
        let mut operation = Operation::done(format!("op-{action}-{name}"), action);
        if let Some(code) = self.write_error_code(project_id, action) {
            operation.error = Some(OperationErrors {
                errors: vec![OperationError {
                    code,
                    message: format!("{action} of {name} failed"),
                    location: None,
                }],
            });
        }
        operation
    }

    fn write_error_code(&self, project_id: &str, action: &str) -> Option<String> {
        self.projects
            .lock()
            .unwrap()
            .get(project_id)
            .and_then(|p| p.write_error.as_ref())
            .filter(|e| e.action.is_none_or(|a| a == action))
            .map(|e| e.code.clone())
    }

    fn write_fails(&self, project_id: &str, action: &str) -> bool {
        self.write_error_code(project_id, action).is_some()
    }
}

#[async_trait]
impl ComputeFirewallApi for FakeComputeApi {
    async fn list_networks(&self, project_id: &str) -> Result<Vec<Network>, Error> {
        self.check_listing(project_id)?;
        let projects = self.projects.lock().unwrap();
        Ok(projects
            .get(project_id)
            .map(|p| {
                p.networks
                    .iter()
                    .map(|n| Network {
                        name: n.clone(),
                        self_link: Some(build_network_url(project_id, n)),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list_firewalls(&self, project_id: &str) -> Result<Vec<Firewall>, Error> {
        self.check_listing(project_id)?;
        let projects = self.projects.lock().unwrap();
        Ok(projects
            .get(project_id)
            .map(|p| p.firewalls.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_firewalls_quota(&self, project_id: &str) -> Result<Option<Quota>, Error> {
        let projects = self.projects.lock().unwrap();
        Ok(projects.get(project_id).and_then(|p| p.quota.clone()))
    }

    async fn insert_firewall_rule(
        &self,
        project_id: &str,
        rule: &Firewall,
    ) -> Result<Operation, Error> {
        let name = rule.name.clone().unwrap_or_default();
        self.inserts.fetch_add(1, Ordering::SeqCst);
        self.track_write("insert", &name).await;
        if !self.write_fails(project_id, "insert") {
            self.update(project_id, |p| {
                if !p.drop_inserts {
                    p.firewalls.insert(name.clone(), rule.clone());
                }
            });
        }
        Ok(self.finish(project_id, &name, "insert"))
    }

    async fn update_firewall_rule(
        &self,
        project_id: &str,
        rule: &Firewall,
    ) -> Result<Operation, Error> {
        let name = rule.name.clone().unwrap_or_default();
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.track_write("update", &name).await;
        if !self.write_fails(project_id, "update") {
            self.update(project_id, |p| {
                p.firewalls.insert(name.clone(), rule.clone());
            });
        }
        Ok(self.finish(project_id, &name, "update"))
    }

    async fn delete_firewall_rule(
        &self,
        project_id: &str,
        rule_name: &str,
    ) -> Result<Operation, Error> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.track_write("delete", rule_name).await;
        if !self.write_fails(project_id, "delete") {
            self.update(project_id, |p| {
                p.firewalls.remove(rule_name);
            });
        }
        Ok(self.finish(project_id, rule_name, "delete"))
    }

    async fn get_operation(
        &self,
        _project_id: &str,
        operation_name: &str,
    ) -> Result<Operation, Error> {
        Ok(Operation::done(operation_name, "get"))
    }

    fn operation_poll_interval(&self) -> Duration {
        Duration::from_millis(1)
    }
}
