// ── BatchFirewallEnforcer ──
//
// Fans (project, policy) pairs out to a bounded set of tokio tasks and
// folds their results into one `BatchEnforcementLog`. Results are
// collected on the caller's task only.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use fwenforcer_api::ComputeFirewallApi;

use super::firewall::PrechangeCallback;
use super::project::{EnforceOptions, ProjectEnforcer};
use crate::config::EnforcerConfig;
use crate::error::BatchError;
use crate::model::policy::FirewallPolicy;
use crate::model::result::{BatchEnforcementLog, EnforcementResult, RunContext, Summary};
use crate::model::rule_set::AddRuleCallback;

static LAST_BATCH_ID: AtomicI64 = AtomicI64::new(0);

/// A microsecond timestamp, strictly increasing within the process.
pub fn next_batch_id() -> i64 {
    let now = Utc::now().timestamp_micros();
    let previous = LAST_BATCH_ID
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
            Some(now.max(last + 1))
        })
        .unwrap_or_else(|last| last);
    now.max(previous + 1)
}

pub struct BatchFirewallEnforcer {
    api: Arc<dyn ComputeFirewallApi>,
    config: EnforcerConfig,
    add_rule_callback: Option<AddRuleCallback>,
    project_sema: Option<Arc<Semaphore>>,
}

impl BatchFirewallEnforcer {
    pub fn new(api: Arc<dyn ComputeFirewallApi>, config: EnforcerConfig) -> Self {
        let project_sema = (config.max_write_projects > 0)
            .then(|| Arc::new(Semaphore::new(config.max_write_projects)));
        Self {
            api,
            config,
            add_rule_callback: None,
            project_sema,
        }
    }

    /// Only rules accepted by `callback` are managed, in every project.
    #[must_use]
    pub fn with_add_rule_callback(mut self, callback: AddRuleCallback) -> Self {
        self.add_rule_callback = Some(callback);
        self
    }

    pub fn config(&self) -> &EnforcerConfig {
        &self.config
    }

    /// Enforce each policy on its project.
    ///
    /// Every submitted project yields exactly one result, in completion
    /// order. `new_result_callback` sees each one as it arrives. A panic in
    /// a worker is resumed here rather than reported as a result.
    pub async fn run<I>(
        &self,
        project_policies: I,
        prechange_callback: Option<PrechangeCallback>,
        mut new_result_callback: Option<&mut (dyn FnMut(&EnforcementResult) + Send)>,
    ) -> Result<BatchEnforcementLog, BatchError>
    where
        I: IntoIterator<Item = (String, FirewallPolicy)>,
    {
        let batch_id = next_batch_id();
        let timestamp_start = Utc::now();

        let workers = Arc::new(Semaphore::new(self.config.concurrent_workers.max(1)));
        let options = Arc::new(EnforceOptions {
            networks: self.config.networks.clone(),
            allow_empty_ruleset: self.config.allow_empty_ruleset,
            prechange_callback,
            add_rule_callback: self.add_rule_callback.clone(),
            retry_on_dry_run: self.config.retry_on_dry_run,
            maximum_retries: self.config.maximum_retries,
        });

        let mut tasks = JoinSet::new();
        let mut projects_total = 0;
        for (project_id, policy) in project_policies {
            projects_total += 1;
            let enforcer = ProjectEnforcer::new(project_id, Arc::clone(&self.api))
                .with_dry_run(self.config.dry_run)
                .with_project_sema(self.project_sema.clone())
                .with_max_running_operations(self.config.max_running_operations)
                .with_operation_timeout(self.config.operation_timeout);
            let workers = Arc::clone(&workers);
            let options = Arc::clone(&options);

            tasks.spawn(async move {
                // The semaphore is never closed.
                let _permit = workers.acquire_owned().await.ok();
                enforcer.enforce_firewall_policy(&policy, &options).await
            });
        }

        info!(
            batch_id,
            projects = projects_total,
            workers = self.config.concurrent_workers,
            dry_run = self.config.dry_run,
            "starting batch enforcement"
        );

        let mut results = Vec::with_capacity(projects_total);
        while let Some(joined) = tasks.join_next().await {
            let mut result = match joined {
                Ok(result) => result,
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(e) => return Err(BatchError::WorkerCancelled(e.to_string())),
            };
            result.batch_id = Some(batch_id);
            result.run_context = RunContext::EnforcerBatch;
            if let Some(callback) = new_result_callback.as_deref_mut() {
                callback(&result);
            }
            results.push(result);
        }

        if results.is_empty() {
            warn!(batch_id, "No projects enforced in the last run");
        }

        let summary = Summary::from_results(
            batch_id,
            projects_total,
            &results,
            timestamp_start,
            Utc::now(),
        );
        info!(
            batch_id,
            total = summary.projects_total,
            success = summary.projects_success,
            error = summary.projects_error,
            changed = summary.projects_changed,
            "batch enforcement finished"
        );

        Ok(BatchEnforcementLog {
            batch_id,
            results,
            summary,
        })
    }
}
