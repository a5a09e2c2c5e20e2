//! Plan execution against a resource provider.
//!
//! Batches run strictly in order. Units within a batch run concurrently,
//! bounded by the worker count. Units whose content hash matches the state
//! snapshot are skipped without a provider call.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::{ContentHasher, EngineConfig};
use crate::error::{ApplyError, ProviderError, Result, StrataError};
use crate::provider::{ProviderResult, ResourceProvider};
use crate::state::{AppliedState, ProviderHandle, StateSnapshot, StateStore, take_snapshot};

use super::plan::{Plan, PlannedUnit};
use super::report::{ApplyReport, DecommissionReport, UnitReport, UnitStatus};

/// Tuning of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    /// Maximum units applied concurrently within a batch.
    pub workers: usize,
    /// Retries after the first attempt for transient failures.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound on any retry delay.
    pub max_backoff: Duration,
    /// Keep running later batches after a failure, blocking only dependents.
    pub continue_independent: bool,
    /// Ask the provider to roll back failed units.
    pub rollback_on_failure: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for EngineOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            workers: config.workers.max(1),
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            continue_independent: config.continue_independent,
            rollback_on_failure: config.rollback_on_failure,
        }
    }
}

impl EngineOptions {
    /// Returns the delay before retry number `attempt` (1-based).
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

/// Cancellation flag shared with the workers.
#[derive(Debug, Clone, Default)]
struct CancelSignal(Option<watch::Receiver<bool>>);

impl CancelSignal {
    fn is_cancelled(&self) -> bool {
        self.0.as_ref().is_some_and(|rx| *rx.borrow())
    }
}

/// Outcome of a provider call after retries.
enum CallOutcome<T> {
    Succeeded(T),
    Failed(ProviderError),
    Cancelled,
}

/// Calls the provider, retrying transient failures with exponential backoff.
///
/// Returns the outcome and the number of attempts made.
async fn call_with_retry<T, F, Fut>(
    options: &EngineOptions,
    cancel: &CancelSignal,
    calls: &AtomicU32,
    unit_id: &str,
    mut call: F,
) -> (CallOutcome<T>, u32)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ProviderResult<T>>,
{
    let mut attempt = 0;
    loop {
        if cancel.is_cancelled() {
            return (CallOutcome::Cancelled, attempt);
        }

        attempt += 1;
        calls.fetch_add(1, Ordering::SeqCst);

        match call().await {
            Ok(value) => return (CallOutcome::Succeeded(value), attempt),
            Err(e) if e.is_transient() && attempt <= options.max_retries => {
                let delay = options.backoff_for(attempt);
                warn!(
                    unit = %unit_id,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Transient provider failure, retrying: {e}"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return (CallOutcome::Failed(e), attempt),
        }
    }
}

/// Final outcome of one worker.
struct UnitOutcome {
    unit_id: String,
    status: UnitStatus,
    attempts: u32,
    error: Option<String>,
    handle: Option<ProviderHandle>,
}

/// Everything a worker task needs, owned so the task is `'static`.
#[derive(Clone)]
struct Worker {
    provider: Arc<dyn ResourceProvider>,
    store: Arc<dyn StateStore>,
    options: EngineOptions,
    cancel: CancelSignal,
    calls: Arc<AtomicU32>,
    permits: Arc<Semaphore>,
}

impl Worker {
    async fn run(self, planned: PlannedUnit, previous: Option<AppliedState>) -> Result<UnitOutcome> {
        let _permit = Arc::clone(&self.permits).acquire_owned().await.map_err(|e| {
            StrataError::Apply(ApplyError::Aborted {
                reason: format!("worker pool closed: {e}"),
            })
        })?;

        let unit = &planned.unit;
        let key = unit.key();
        info!(
            unit = %unit.id,
            region = %unit.region,
            change = %planned.change,
            hash = %ContentHasher::short_hash(&planned.content_hash),
            "Applying unit"
        );

        let provider = &self.provider;
        let (outcome, attempts) = call_with_retry(
            &self.options,
            &self.cancel,
            &self.calls,
            &unit.id,
            || provider.apply(unit),
        )
        .await;

        match outcome {
            CallOutcome::Succeeded(handle) => {
                let mut record = AppliedState::new(
                    &key,
                    &unit.account,
                    &planned.content_hash,
                    unit.descriptor_ids(),
                )
                .with_handle(handle.clone());
                record.record(previous.as_ref(), attempts);
                self.store.save(&key, &record).await?;

                info!(unit = %unit.id, attempts, "Unit applied");
                Ok(UnitOutcome {
                    unit_id: unit.id.clone(),
                    status: UnitStatus::Applied,
                    attempts,
                    error: None,
                    handle: Some(handle),
                })
            }
            CallOutcome::Cancelled => {
                info!(unit = %unit.id, "Unit cancelled before provider call");
                Ok(UnitOutcome {
                    unit_id: unit.id.clone(),
                    status: UnitStatus::Cancelled,
                    attempts,
                    error: None,
                    handle: None,
                })
            }
            CallOutcome::Failed(err) => {
                error!(unit = %unit.id, attempts, "Unit failed: {err}");
                let status = if self.options.rollback_on_failure {
                    self.rollback(&planned).await
                } else {
                    UnitStatus::Failed
                };
                Ok(UnitOutcome {
                    unit_id: unit.id.clone(),
                    status,
                    attempts,
                    error: Some(err.to_string()),
                    handle: None,
                })
            }
        }
    }

    /// Best-effort rollback; the unit stays Failed if it does not succeed.
    async fn rollback(&self, planned: &PlannedUnit) -> UnitStatus {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.provider.rollback(&planned.unit).await {
            Ok(()) => {
                info!(unit = %planned.unit.id, "Unit rolled back");
                UnitStatus::RolledBack
            }
            Err(ProviderError::Unsupported { .. }) => {
                debug!(unit = %planned.unit.id, "Provider does not support rollback");
                UnitStatus::Failed
            }
            Err(e) => {
                warn!(unit = %planned.unit.id, "Rollback failed: {e}");
                UnitStatus::Failed
            }
        }
    }
}

/// Applies plans against a provider and a state store.
pub struct Orchestrator {
    provider: Arc<dyn ResourceProvider>,
    store: Arc<dyn StateStore>,
    options: EngineOptions,
    cancel: CancelSignal,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("provider", &self.provider.name())
            .field("store", &self.store.backend_type())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates a new orchestrator.
    #[must_use]
    pub fn new(
        provider: Arc<dyn ResourceProvider>,
        store: Arc<dyn StateStore>,
        options: EngineOptions,
    ) -> Self {
        Self {
            provider,
            store,
            options,
            cancel: CancelSignal::default(),
        }
    }

    /// Sets the cancellation signal. Sending `true` stops the run at the
    /// next checkpoint; in-flight provider calls complete.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = CancelSignal(Some(cancel));
        self
    }

    /// Returns the run options.
    #[must_use]
    pub const fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Applies a plan.
    ///
    /// Provider failures are isolated per unit and reported in the
    /// returned report.
    ///
    /// # Errors
    ///
    /// Returns an error if the state store fails or a worker terminates
    /// abnormally. Both abort the run.
    pub async fn apply(&self, plan: &Plan) -> Result<ApplyReport> {
        let started_at = Utc::now();
        info!(
            "Applying plan {} ({} units in {} batches, {} workers)",
            ContentHasher::short_hash(&plan.plan_hash),
            plan.unit_count(),
            plan.batch_count(),
            self.options.workers
        );

        let snapshot = take_snapshot(self.store.as_ref()).await?;
        let calls = Arc::new(AtomicU32::new(0));
        let worker = Worker {
            provider: Arc::clone(&self.provider),
            store: Arc::clone(&self.store),
            options: self.options.clone(),
            cancel: self.cancel.clone(),
            calls: Arc::clone(&calls),
            permits: Arc::new(Semaphore::new(self.options.workers.max(1))),
        };

        let mut reports: BTreeMap<String, UnitReport> = plan
            .ordered_units()
            .map(|p| {
                (
                    p.unit.id.clone(),
                    UnitReport::pending(&p.unit.id, &p.unit.region, p.batch),
                )
            })
            .collect();
        let mut blocked_by: BTreeMap<String, String> = BTreeMap::new();
        let mut halted = false;
        let mut cancelled = false;

        for (index, batch) in plan.batches.iter().enumerate() {
            if halted || cancelled {
                break;
            }
            debug!("Starting batch {}/{}", index + 1, plan.batch_count());

            let mut tasks = JoinSet::new();
            for id in batch {
                let (Some(planned), Some(report)) = (plan.unit(id), reports.get_mut(id)) else {
                    continue;
                };

                if let Some(ancestor) = blocked_by.get(id) {
                    report.blocked_by = Some(ancestor.clone());
                    report.transition(UnitStatus::Blocked);
                    continue;
                }

                if Self::is_unchanged(&snapshot, planned) {
                    info!(unit = %id, "Unit unchanged, skipping");
                    report.transition(UnitStatus::Skipped);
                    continue;
                }

                if self.cancel.is_cancelled() {
                    cancelled = true;
                    report.transition(UnitStatus::Cancelled);
                    continue;
                }

                report.transition(UnitStatus::InProgress);
                let previous = snapshot.get(&planned.unit.key()).cloned();
                tasks.spawn(worker.clone().run(planned.clone(), previous));
            }

            let mut fatal: Option<StrataError> = None;
            while let Some(joined) = tasks.join_next().await {
                let outcome = match joined {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(e)) => {
                        error!("Aborting run: {e}");
                        fatal.get_or_insert(e);
                        continue;
                    }
                    Err(e) => {
                        fatal.get_or_insert(StrataError::Apply(ApplyError::WorkerPanicked {
                            unit: format!("batch {}", index + 1),
                            message: e.to_string(),
                        }));
                        continue;
                    }
                };

                if outcome.status == UnitStatus::Cancelled {
                    cancelled = true;
                }
                if let Some(failed) = Self::record_outcome(&mut reports, outcome) {
                    for dependent in plan.transitive_dependents(&failed) {
                        blocked_by.entry(dependent).or_insert_with(|| failed.clone());
                    }
                    if !self.options.continue_independent {
                        halted = true;
                    }
                }
            }

            if let Some(e) = fatal {
                return Err(e);
            }
        }

        for report in reports.values_mut().filter(|r| r.status == UnitStatus::Pending) {
            if cancelled {
                report.transition(UnitStatus::Cancelled);
            } else {
                report.blocked_by = blocked_by.get(&report.unit_id).cloned();
                report.transition(UnitStatus::Blocked);
            }
        }

        let all_succeeded = !cancelled && reports.values().all(|r| r.status.is_success());
        let decommissioned = if all_succeeded {
            self.decommission(plan, &worker).await?
        } else {
            if !plan.decommissioned.is_empty() {
                warn!(
                    "Skipping decommission of {} units after an incomplete run",
                    plan.decommissioned.len()
                );
            }
            Vec::new()
        };

        let mut units: Vec<UnitReport> = reports.into_values().collect();
        units.sort_by(|a, b| a.batch.cmp(&b.batch).then_with(|| a.unit_id.cmp(&b.unit_id)));

        let report = ApplyReport {
            plan_hash: plan.plan_hash.clone(),
            started_at,
            finished_at: Utc::now(),
            units,
            decommissioned,
            provider_calls: calls.load(Ordering::SeqCst),
            cancelled: cancelled || self.cancel.is_cancelled(),
        };

        info!(
            "Run finished: {} applied, {} skipped, {} failed, {} blocked ({} provider calls)",
            report.count(UnitStatus::Applied),
            report.count(UnitStatus::Skipped),
            report.count(UnitStatus::Failed) + report.count(UnitStatus::RolledBack),
            report.count(UnitStatus::Blocked),
            report.provider_calls
        );

        Ok(report)
    }

    /// Returns true if the stored hash matches the planned one.
    fn is_unchanged(snapshot: &StateSnapshot, planned: &PlannedUnit) -> bool {
        snapshot
            .content_hash(&planned.unit.key())
            .is_some_and(|stored| ContentHasher::hashes_match(stored, &planned.content_hash))
    }

    /// Applies a worker outcome to its report.
    ///
    /// Returns the unit id if the unit failed.
    fn record_outcome(reports: &mut BTreeMap<String, UnitReport>, outcome: UnitOutcome) -> Option<String> {
        let report = reports.get_mut(&outcome.unit_id)?;
        report.attempts = outcome.attempts;
        report.error = outcome.error;
        report.handle = outcome.handle;

        match outcome.status {
            UnitStatus::RolledBack => {
                report.transition(UnitStatus::Failed);
                report.transition(UnitStatus::RolledBack);
            }
            status => {
                report.transition(status);
            }
        }

        report.status.is_failure().then_some(outcome.unit_id)
    }

    /// Removes units that are no longer declared.
    async fn decommission(&self, plan: &Plan, worker: &Worker) -> Result<Vec<DecommissionReport>> {
        let mut results = Vec::new();

        for key in &plan.decommissioned {
            info!(unit = %key, "Decommissioning unit");
            let unit_id = key.to_string();
            let provider = &self.provider;
            let (outcome, _) = call_with_retry(
                &self.options,
                &worker.cancel,
                &worker.calls,
                &unit_id,
                || provider.decommission(key),
            )
            .await;

            let report = match outcome {
                CallOutcome::Succeeded(()) => {
                    self.store.delete(key).await?;
                    DecommissionReport {
                        key: key.clone(),
                        removed: true,
                        error: None,
                    }
                }
                CallOutcome::Failed(e) => {
                    warn!(unit = %key, "Decommission failed: {e}");
                    DecommissionReport {
                        key: key.clone(),
                        removed: false,
                        error: Some(e.to_string()),
                    }
                }
                CallOutcome::Cancelled => DecommissionReport {
                    key: key.clone(),
                    removed: false,
                    error: Some(String::from("cancelled")),
                },
            };
            results.push(report);
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ResourceDescriptor, ResourceKind};
    use crate::error::{EXIT_PARTIAL_FAILURE, EXIT_SUCCESS, StateError};
    use crate::planner::{DependencyGraph, DeploymentUnit, PlanCompiler};
    use crate::provider::MockResourceProvider;
    use crate::state::{MemoryStateStore, MockStateStore, UnitKey};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    /// Provider that replays scripted failures and counts calls.
    #[derive(Default)]
    struct ScriptedProvider {
        failures: Mutex<HashMap<String, VecDeque<ProviderError>>>,
        applied: Mutex<Vec<String>>,
        apply_calls: AtomicU32,
        rollback_calls: AtomicU32,
        decommissioned: Mutex<Vec<UnitKey>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        delay: Option<Duration>,
    }

    impl ScriptedProvider {
        fn failing(unit: &str, errors: Vec<ProviderError>) -> Self {
            let provider = Self::default();
            provider
                .failures
                .lock()
                .unwrap()
                .insert(unit.to_string(), errors.into());
            provider
        }
    }

    #[async_trait]
    impl ResourceProvider for ScriptedProvider {
        async fn apply(&self, unit: &DeploymentUnit) -> ProviderResult<ProviderHandle> {
            self.apply_calls.fetch_add(1, Ordering::SeqCst);
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let scripted = self
                .failures
                .lock()
                .unwrap()
                .get_mut(&unit.id)
                .and_then(VecDeque::pop_front);
            if let Some(err) = scripted {
                return Err(err);
            }

            self.applied.lock().unwrap().push(unit.id.clone());
            Ok(ProviderHandle::new(format!("ref:{}", unit.id)))
        }

        async fn rollback(&self, _unit: &DeploymentUnit) -> ProviderResult<()> {
            self.rollback_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn decommission(&self, key: &UnitKey) -> ProviderResult<()> {
            self.decommissioned.lock().unwrap().push(key.clone());
            Ok(())
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    fn descriptor(id: &str, kind: ResourceKind, refs: &[&str]) -> ResourceDescriptor {
        let mut d = ResourceDescriptor::new(id, kind, "us-west-1").with_property("name", json!(id));
        for r in refs {
            d = d.with_reference(*r);
        }
        d
    }

    fn vault_scenario() -> DependencyGraph {
        DependencyGraph::build(
            "370926141865",
            &[
                descriptor("vaultPrimary", ResourceKind::Vault, &[]),
                descriptor("keyReplica", ResourceKind::Key, &["vaultPrimary"]),
                descriptor("backupPlan", ResourceKind::BackupPlan, &["vaultPrimary", "keyReplica"]),
            ],
        )
        .unwrap()
    }

    fn fast_options() -> EngineOptions {
        EngineOptions {
            workers: 4,
            max_retries: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            continue_independent: false,
            rollback_on_failure: true,
        }
    }

    fn orchestrator(
        provider: &Arc<ScriptedProvider>,
        store: &Arc<MemoryStateStore>,
        options: EngineOptions,
    ) -> Orchestrator {
        let provider: Arc<dyn ResourceProvider> = provider.clone();
        let store: Arc<dyn StateStore> = store.clone();
        Orchestrator::new(provider, store, options)
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let options = EngineOptions {
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_millis(3000),
            ..EngineOptions::default()
        };

        assert_eq!(options.backoff_for(1), Duration::from_millis(500));
        assert_eq!(options.backoff_for(2), Duration::from_millis(1000));
        assert_eq!(options.backoff_for(3), Duration::from_millis(2000));
        assert_eq!(options.backoff_for(4), Duration::from_millis(3000));
        assert_eq!(options.backoff_for(40), Duration::from_millis(3000));
    }

    #[tokio::test]
    async fn test_fresh_apply_runs_in_batch_order() {
        let provider = Arc::new(ScriptedProvider::default());
        let store = Arc::new(MemoryStateStore::new());
        let plan = PlanCompiler::new().compile(&vault_scenario());

        let report = orchestrator(&provider, &store, fast_options())
            .apply(&plan)
            .await
            .unwrap();

        assert_eq!(report.exit_code(), EXIT_SUCCESS);
        assert_eq!(report.count(UnitStatus::Applied), 3);
        assert_eq!(
            *provider.applied.lock().unwrap(),
            vec!["vaultPrimary", "keyReplica", "backupPlan"]
        );
        assert_eq!(report.provider_calls, 3);
        assert_eq!(store.len().await, 3);

        let saved = store
            .load(&UnitKey::new("us-west-1", "keyReplica"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(saved.content_hash, plan.unit("keyReplica").unwrap().content_hash);
        assert_eq!(saved.handle.unwrap().reference, "ref:keyReplica");
    }

    #[tokio::test]
    async fn test_reapply_unchanged_makes_no_provider_calls() {
        let provider = Arc::new(ScriptedProvider::default());
        let store = Arc::new(MemoryStateStore::new());
        let graph = vault_scenario();
        let compiler = PlanCompiler::new();

        orchestrator(&provider, &store, fast_options())
            .apply(&compiler.compile(&graph))
            .await
            .unwrap();

        let second_provider = Arc::new(ScriptedProvider::default());
        let snapshot = take_snapshot(store.as_ref()).await.unwrap();
        let plan = compiler.compile_with_state(&graph, &snapshot);
        assert!(plan.is_noop());

        let report = orchestrator(&second_provider, &store, fast_options())
            .apply(&plan)
            .await
            .unwrap();

        assert_eq!(report.count(UnitStatus::Skipped), 3);
        assert_eq!(report.provider_calls, 0);
        assert_eq!(second_provider.apply_calls.load(Ordering::SeqCst), 0);
        assert_eq!(report.exit_code(), EXIT_SUCCESS);
    }

    #[tokio::test]
    async fn test_permanent_failure_blocks_transitive_dependents() {
        let provider = Arc::new(ScriptedProvider::failing(
            "vaultPrimary",
            vec![ProviderError::permanent("access denied")],
        ));
        let store = Arc::new(MemoryStateStore::new());
        let plan = PlanCompiler::new().compile(&vault_scenario());

        let report = orchestrator(&provider, &store, fast_options())
            .apply(&plan)
            .await
            .unwrap();

        let failed = report.unit("vaultPrimary").unwrap();
        assert_eq!(failed.status, UnitStatus::RolledBack);
        assert_eq!(failed.attempts, 1);
        assert!(failed.error.as_deref().unwrap().contains("access denied"));

        for dependent in ["keyReplica", "backupPlan"] {
            let blocked = report.unit(dependent).unwrap();
            assert_eq!(blocked.status, UnitStatus::Blocked);
            assert_eq!(blocked.blocked_by.as_deref(), Some("vaultPrimary"));
        }

        assert_eq!(provider.apply_calls.load(Ordering::SeqCst), 1);
        assert_eq!(provider.rollback_calls.load(Ordering::SeqCst), 1);
        assert!(store.is_empty().await);
        assert_eq!(report.exit_code(), EXIT_PARTIAL_FAILURE);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let provider = Arc::new(ScriptedProvider::failing(
            "keyReplica",
            vec![
                ProviderError::transient("throttled"),
                ProviderError::transient("timeout"),
            ],
        ));
        let store = Arc::new(MemoryStateStore::new());
        let plan = PlanCompiler::new().compile(&vault_scenario());

        let report = orchestrator(&provider, &store, fast_options())
            .apply(&plan)
            .await
            .unwrap();

        let retried = report.unit("keyReplica").unwrap();
        assert_eq!(retried.status, UnitStatus::Applied);
        assert_eq!(retried.attempts, 3);
        assert!(report.is_success());
        assert_eq!(report.provider_calls, 5);
    }

    #[tokio::test]
    async fn test_retries_are_capped() {
        let mut provider = MockResourceProvider::new();
        provider
            .expect_apply()
            .times(3)
            .returning(|_| Err(ProviderError::transient("gateway timeout")));
        provider
            .expect_rollback()
            .times(1)
            .returning(|_| Err(ProviderError::unsupported("rollback")));
        provider.expect_name().return_const("mock");

        let graph = DependencyGraph::build("1", &[descriptor("eks", ResourceKind::Cluster, &[])]).unwrap();
        let plan = PlanCompiler::new().compile(&graph);
        let options = EngineOptions {
            max_retries: 2,
            ..fast_options()
        };

        let report = Orchestrator::new(Arc::new(provider), Arc::new(MemoryStateStore::new()), options)
            .apply(&plan)
            .await
            .unwrap();

        let unit = report.unit("eks").unwrap();
        assert_eq!(unit.status, UnitStatus::Failed);
        assert_eq!(unit.attempts, 3);
    }

    #[tokio::test]
    async fn test_halt_blocks_independent_later_batches() {
        let graph = DependencyGraph::build(
            "1",
            &[
                descriptor("a", ResourceKind::Vault, &[]),
                descriptor("b", ResourceKind::Vault, &[]),
                descriptor("a2", ResourceKind::Key, &["a"]),
                descriptor("b2", ResourceKind::Key, &["b"]),
            ],
        )
        .unwrap();
        let plan = PlanCompiler::new().compile(&graph);
        let provider = Arc::new(ScriptedProvider::failing("a", vec![ProviderError::permanent("no")]));
        let store = Arc::new(MemoryStateStore::new());

        let report = orchestrator(&provider, &store, fast_options())
            .apply(&plan)
            .await
            .unwrap();

        assert_eq!(report.status_of("b"), Some(UnitStatus::Applied));
        assert_eq!(report.status_of("a2"), Some(UnitStatus::Blocked));
        assert_eq!(report.unit("a2").unwrap().blocked_by.as_deref(), Some("a"));
        let halted = report.unit("b2").unwrap();
        assert_eq!(halted.status, UnitStatus::Blocked);
        assert_eq!(halted.blocked_by, None);
    }

    #[tokio::test]
    async fn test_continue_independent_runs_unrelated_units() {
        let graph = DependencyGraph::build(
            "1",
            &[
                descriptor("a", ResourceKind::Vault, &[]),
                descriptor("b", ResourceKind::Vault, &[]),
                descriptor("a2", ResourceKind::Key, &["a"]),
                descriptor("b2", ResourceKind::Key, &["b"]),
            ],
        )
        .unwrap();
        let plan = PlanCompiler::new().compile(&graph);
        let provider = Arc::new(ScriptedProvider::failing("a", vec![ProviderError::permanent("no")]));
        let store = Arc::new(MemoryStateStore::new());
        let options = EngineOptions {
            continue_independent: true,
            rollback_on_failure: false,
            ..fast_options()
        };

        let report = orchestrator(&provider, &store, options).apply(&plan).await.unwrap();

        assert_eq!(report.status_of("a"), Some(UnitStatus::Failed));
        assert_eq!(report.status_of("a2"), Some(UnitStatus::Blocked));
        assert_eq!(report.status_of("b2"), Some(UnitStatus::Applied));
        assert_eq!(provider.rollback_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancellation_before_start() {
        let provider = Arc::new(ScriptedProvider::default());
        let store = Arc::new(MemoryStateStore::new());
        let plan = PlanCompiler::new().compile(&vault_scenario());
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let report = orchestrator(&provider, &store, fast_options())
            .with_cancellation(rx)
            .apply(&plan)
            .await
            .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.count(UnitStatus::Cancelled), 3);
        assert_eq!(report.provider_calls, 0);
        assert_eq!(report.exit_code(), EXIT_PARTIAL_FAILURE);
    }

    #[tokio::test]
    async fn test_cancellation_mid_run_lets_in_flight_unit_finish() {
        let graph = DependencyGraph::build(
            "1",
            &[
                descriptor("alphaVault", ResourceKind::Vault, &[]),
                descriptor("betaVault", ResourceKind::Vault, &[]),
                descriptor("gammaKey", ResourceKind::Key, &["alphaVault"]),
            ],
        )
        .unwrap();
        let plan = PlanCompiler::new().compile(&graph);
        assert_eq!(plan.batch_count(), 2);

        let provider = Arc::new(ScriptedProvider {
            delay: Some(Duration::from_millis(100)),
            ..ScriptedProvider::default()
        });
        let store = Arc::new(MemoryStateStore::new());
        let options = EngineOptions {
            workers: 1,
            ..fast_options()
        };
        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            tx.send(true).unwrap();
        });

        let report = orchestrator(&provider, &store, options)
            .with_cancellation(rx)
            .apply(&plan)
            .await
            .unwrap();

        assert!(report.cancelled);
        // The unit holding the only worker completes its call.
        assert_eq!(report.count(UnitStatus::Applied), 1);
        assert_eq!(report.count(UnitStatus::Cancelled), 2);
        assert_eq!(report.status_of("gammaKey"), Some(UnitStatus::Cancelled));
        assert_eq!(report.count(UnitStatus::Blocked), 0);
        assert_eq!(report.provider_calls, 1);
        assert_eq!(store.len().await, 1);
        assert_eq!(report.exit_code(), EXIT_PARTIAL_FAILURE);
    }

    #[tokio::test]
    async fn test_worker_pool_is_bounded() {
        let descriptors: Vec<ResourceDescriptor> = (0..6)
            .map(|i| descriptor(&format!("vault{i}"), ResourceKind::Vault, &[]))
            .collect();
        let graph = DependencyGraph::build("1", &descriptors).unwrap();
        let plan = PlanCompiler::new().compile(&graph);
        let provider = Arc::new(ScriptedProvider {
            delay: Some(Duration::from_millis(20)),
            ..ScriptedProvider::default()
        });
        let store = Arc::new(MemoryStateStore::new());
        let options = EngineOptions {
            workers: 2,
            ..fast_options()
        };

        let report = orchestrator(&provider, &store, options).apply(&plan).await.unwrap();

        assert_eq!(report.count(UnitStatus::Applied), 6);
        assert!(provider.max_in_flight.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_decommission_after_successful_run() {
        let provider = Arc::new(ScriptedProvider::default());
        let store = Arc::new(MemoryStateStore::new());
        let stale = UnitKey::new("us-east-2", "retiredVault");
        store
            .save(&stale, &AppliedState::new(&stale, "1", "old", Vec::new()))
            .await
            .unwrap();

        let snapshot = take_snapshot(store.as_ref()).await.unwrap();
        let plan = PlanCompiler::new().compile_with_state(&vault_scenario(), &snapshot);

        let report = orchestrator(&provider, &store, fast_options())
            .apply(&plan)
            .await
            .unwrap();

        assert_eq!(report.decommissioned.len(), 1);
        assert!(report.decommissioned[0].removed);
        assert_eq!(*provider.decommissioned.lock().unwrap(), vec![stale.clone()]);
        assert!(store.load(&stale).await.unwrap().is_none());
        assert_eq!(report.provider_calls, 4);
    }

    #[tokio::test]
    async fn test_state_failure_aborts_run() {
        let mut store = MockStateStore::new();
        store.expect_list().returning(|| Ok(Vec::new()));
        store.expect_save().returning(|_, _| {
            Err(StrataError::State(StateError::unavailable("disk full")))
        });
        store.expect_backend_type().return_const("mock");

        let graph = DependencyGraph::build("1", &[descriptor("eks", ResourceKind::Cluster, &[])]).unwrap();
        let plan = PlanCompiler::new().compile(&graph);
        let provider: Arc<dyn ResourceProvider> = Arc::new(ScriptedProvider::default());

        let result = Orchestrator::new(provider, Arc::new(store), fast_options())
            .apply(&plan)
            .await;

        assert!(matches!(
            result,
            Err(StrataError::State(StateError::Unavailable { .. }))
        ));
    }
}
