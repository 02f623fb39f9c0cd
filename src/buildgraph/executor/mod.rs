//! Executor registry and dispatcher (§4.13).
//!
//! Multiple executors can claim the ability to run the same operation
//! (e.g. a native helper and a VM-backed fallback); the dispatcher
//! scores every registered executor against a node and picks the
//! highest scorer, falling back deterministically on ties by
//! registration order.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::error::{Error, Result};

use crate::buildgraph::ir::{ExecOperation, Operation};

/// The minimum host resources an executor needs to be available before
/// it can be scheduled against.
#[derive(Debug, Clone, Default)]
pub struct ResourceMinimums {
    /// Minimum free memory, in MiB.
    pub memory_mb: u64,
    /// Minimum free disk, in MiB.
    pub disk_mb: u64,
    /// Required CPU architecture (the second component of a
    /// `"os/arch"` platform string), e.g. `"arm64"`. `None` means any.
    pub cpu_arch: Option<String>,
}

/// What an executor can run and how well, advertised once at
/// registration time.
#[derive(Debug, Clone)]
pub struct ExecutorCapabilities {
    /// Operation kinds this executor can run, from [`Operation::kind`].
    pub supported_kinds: Vec<&'static str>,
    /// Platforms this executor can target, e.g. `"linux/amd64"`. An
    /// empty list means any platform.
    pub platforms: Vec<String>,
    /// Whether this executor can run privileged (`Insecure`-mode) work.
    pub privileged: bool,
    /// Minimum host resources this executor needs.
    pub resource_minimums: ResourceMinimums,
    /// Maximum concurrent executions this executor will accept.
    pub max_concurrency: usize,
}

/// Runs one node's operation to completion, writing its filesystem
/// output (if any) into `workdir` so the caller can seal it into a
/// snapshot.
#[async_trait]
pub trait Executor: Send + Sync {
    /// A stable, human-readable name for logging and scoring ties.
    fn name(&self) -> &str;

    /// What this executor supports.
    fn capabilities(&self) -> &ExecutorCapabilities;

    /// Execute `operation` against `platform`, writing any filesystem
    /// mutation the operation performs under `workdir`.
    async fn execute(&self, operation: &Operation, platform: &str, workdir: &Path) -> Result<()>;
}

fn requires_privileged(operation: &Operation) -> bool {
    matches!(
        operation,
        Operation::Exec(ExecOperation { security, .. })
            if matches!(security, crate::buildgraph::ir::SecurityMode::Insecure)
    )
}

fn cpu_arch_of(platform: &str) -> Option<&str> {
    platform.split('/').nth(1)
}

/// Score one executor's fitness for running `operation` on `platform`.
/// Disqualified (kind mismatch, platform mismatch against a non-empty
/// allowlist, a privileged request an unprivileged executor can't
/// serve, an unmet CPU architecture minimum, or no concurrency
/// headroom left) returns `None`. Otherwise higher is better, per the
/// literal additive rule:
///
/// - `+100` declared kind support
/// - `+50` explicit platform match, or `+25` if the executor declares
///   no platform allowlist (any-platform)
/// - `+10` a privileged request matched by a privileged-capable
///   executor
#[must_use]
pub fn score(executor: &dyn Executor, operation: &Operation, platform: &str, in_flight: usize) -> Option<u32> {
    let caps = executor.capabilities();
    if !caps.supported_kinds.contains(&operation.kind()) {
        return None;
    }
    if in_flight >= caps.max_concurrency {
        return None;
    }
    if requires_privileged(operation) && !caps.privileged {
        return None;
    }
    if let (Some(required), Some(available)) = (&caps.resource_minimums.cpu_arch, cpu_arch_of(platform)) {
        if required != available {
            return None;
        }
    }

    let mut total = 100u32;
    if caps.platforms.iter().any(|p| p == platform) {
        total += 50;
    } else if caps.platforms.is_empty() {
        total += 25;
    } else {
        return None;
    }
    if requires_privileged(operation) && caps.privileged {
        total += 10;
    }
    Some(total)
}

struct RegisteredExecutor {
    executor: Arc<dyn Executor>,
    semaphore: Arc<Semaphore>,
}

/// Holds every known executor and dispatches nodes to the best-scoring
/// one with available capacity.
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: Vec<RegisteredExecutor>,
}

impl ExecutorRegistry {
    /// Construct an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self { executors: Vec::new() }
    }

    /// Register an executor, in priority order for tie-breaking.
    pub fn register(&mut self, executor: Arc<dyn Executor>) {
        let permits = executor.capabilities().max_concurrency.max(1);
        self.executors.push(RegisteredExecutor { executor, semaphore: Arc::new(Semaphore::new(permits)) });
    }

    /// Pick the best-scoring executor with available capacity for
    /// `operation` on `platform`, acquire a concurrency permit, and run
    /// it against `workdir`. The permit is released automatically when
    /// the returned guard-holding future completes, on every exit path.
    pub async fn dispatch(&self, operation: &Operation, platform: &str, workdir: &Path) -> Result<()> {
        let mut best: Option<(usize, u32)> = None;
        for (idx, registered) in self.executors.iter().enumerate() {
            let in_flight = registered.semaphore.available_permits();
            let max = registered.executor.capabilities().max_concurrency.max(1);
            let used = max.saturating_sub(in_flight);
            if let Some(points) = score(registered.executor.as_ref(), operation, platform, used) {
                if best.map(|(_, best_score)| points > best_score).unwrap_or(true) {
                    best = Some((idx, points));
                }
            }
        }

        let (idx, _) = best.ok_or_else(|| {
            Error::unsupported(format!(
                "no registered executor can run a {} operation on {platform}",
                operation.kind()
            ))
        })?;
        let registered = &self.executors[idx];
        let _permit = registered
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| Error::internal_with("executor semaphore closed", e))?;
        registered.executor.execute(operation, platform, workdir).await
    }
}
