// ── Runtime enforcement configuration ──
//
// These types describe *how* a batch is enforced: concurrency limits,
// retry budget, and safety switches. They never touch disk; the CLI
// builds an `EnforcerConfig` from its config layers and hands it in.

use std::time::Duration;

pub const DEFAULT_CONCURRENT_WORKERS: usize = 10;
pub const DEFAULT_MAX_WRITE_PROJECTS: usize = 1;
pub const DEFAULT_MAX_RUNNING_OPERATIONS: usize = 10;
pub const DEFAULT_MAXIMUM_RETRIES: u32 = 3;
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(600);

/// Configuration for one `BatchFirewallEnforcer`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnforcerConfig {
    /// Compute the changes but never call the write endpoints.
    pub dry_run: bool,
    /// Projects processed at once (fetching, diffing or writing).
    pub concurrent_workers: usize,
    /// Projects allowed to be writing at once. 0 = unbounded.
    pub max_write_projects: usize,
    /// In-flight write operations per project. 0 = unbounded.
    pub max_running_operations: usize,
    /// Apply attempts after the first when rules do not converge.
    pub maximum_retries: u32,
    /// Verify convergence (and retry) in dry-run too.
    pub retry_on_dry_run: bool,
    /// Permit a policy with no rules, deleting every managed rule.
    pub allow_empty_ruleset: bool,
    /// Networks to enforce on. Empty = every network in the project.
    pub networks: Vec<String>,
    /// How long to wait for each write operation to finish.
    pub operation_timeout: Duration,
}

impl Default for EnforcerConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            concurrent_workers: DEFAULT_CONCURRENT_WORKERS,
            max_write_projects: DEFAULT_MAX_WRITE_PROJECTS,
            max_running_operations: DEFAULT_MAX_RUNNING_OPERATIONS,
            maximum_retries: DEFAULT_MAXIMUM_RETRIES,
            retry_on_dry_run: false,
            allow_empty_ruleset: false,
            networks: Vec::new(),
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }
}

impl EnforcerConfig {
    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    #[must_use]
    pub fn with_concurrent_workers(mut self, workers: usize) -> Self {
        self.concurrent_workers = workers;
        self
    }

    #[must_use]
    pub fn with_max_write_projects(mut self, projects: usize) -> Self {
        self.max_write_projects = projects;
        self
    }

    #[must_use]
    pub fn with_max_running_operations(mut self, operations: usize) -> Self {
        self.max_running_operations = operations;
        self
    }

    #[must_use]
    pub fn with_maximum_retries(mut self, retries: u32) -> Self {
        self.maximum_retries = retries;
        self
    }

    #[must_use]
    pub fn with_networks(mut self, networks: Vec<String>) -> Self {
        self.networks = networks;
        self
    }

    #[must_use]
    pub fn with_allow_empty_ruleset(mut self, allow: bool) -> Self {
        self.allow_empty_ruleset = allow;
        self
    }

    #[must_use]
    pub fn with_retry_on_dry_run(mut self, retry: bool) -> Self {
        self.retry_on_dry_run = retry;
        self
    }

    #[must_use]
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }
}
