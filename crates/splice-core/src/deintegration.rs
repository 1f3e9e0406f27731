// ── De-integration manager ──
//
// Drives the teardown workflow against hub entries:
//
//   validate → lock → notify dependents → save state → policy wait
//            → cleanup → verify cleanup → archive
//
// One workflow per integration at a time (single-flight, keyed by
// integration ID). Every step change is written through the record store,
// so a record always reflects how far its workflow got.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::json;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::CoreError;
use crate::event::kinds;
use crate::hub::{Hub, IntegrationEntry};
use crate::model::{
    DeintegrationOptions, DeintegrationPolicy, DeintegrationRecord, IntegrationStatus,
    RecordStatus, RecordSummary, RegistrationOutcome, RegistrationRequest, SavedState,
    StepStatus, steps,
};
use crate::store::{MemoryRecordStore, RecordStore};

const SUPERSEDED: &str = "superseded by forced de-integration";
const INTERRUPTED: &str = "interrupted by restart";

/// Resolution of a workflow parked under the `manual` policy.
enum ManualDecision {
    /// Proceed; the final record is sent back on the channel.
    Confirm(oneshot::Sender<DeintegrationRecord>),
    /// A forced de-integration takes over; acknowledged once the lock is free.
    Supersede(oneshot::Sender<()>),
}

enum Wait {
    None,
    Drain,
    Until(chrono::DateTime<Utc>),
    Manual(oneshot::Receiver<ManualDecision>),
}

enum Halt {
    Failed { step: &'static str, error: String },
    Superseded(oneshot::Sender<()>),
}

// ── Manager ──────────────────────────────────────────────────────────

/// Policy-driven teardown, state preservation and reintegration.
#[derive(Clone)]
pub struct DeintegrationManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    hub: Hub,
    store: Arc<dyn RecordStore>,
    /// integration ID → record ID of the workflow holding the lock.
    in_flight: Arc<DashMap<Uuid, Uuid>>,
    /// record ID → channel of a workflow parked under `manual`.
    manual: DashMap<Uuid, oneshot::Sender<ManualDecision>>,
}

impl DeintegrationManager {
    /// Manager with an in-memory record store.
    pub fn new(hub: Hub) -> Self {
        Self::build(hub, Arc::new(MemoryRecordStore::new()))
    }

    /// Manager over a durable store. Records left `running` or `pending`
    /// by a previous process are marked `failed`.
    pub async fn with_store(hub: Hub, store: Arc<dyn RecordStore>) -> Result<Self, CoreError> {
        let mut recovered = 0_usize;
        for mut record in store.list().await? {
            if record.status.is_finished() {
                continue;
            }
            record.finish(RecordStatus::Failed, Some(INTERRUPTED.to_owned()));
            store.save(&record).await?;
            recovered += 1;
        }
        if recovered > 0 {
            warn!(count = recovered, "marked interrupted de-integrations as failed");
        }
        Ok(Self::build(hub, store))
    }

    fn build(hub: Hub, store: Arc<dyn RecordStore>) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                hub,
                store,
                in_flight: Arc::new(DashMap::new()),
                manual: DashMap::new(),
            }),
        }
    }

    pub fn hub(&self) -> &Hub {
        &self.inner.hub
    }

    // ── De-integrate ─────────────────────────────────────────────────

    /// Start tearing down an integration.
    ///
    /// `immediate` runs to completion before returning. `manual` and
    /// `scheduled` return a `pending` record; `graceful` returns a
    /// `running` one and finishes in the background.
    pub async fn deintegrate(
        &self,
        id: Uuid,
        mut options: DeintegrationOptions,
    ) -> Result<RecordSummary, CoreError> {
        let entry = self.inner.hub.entry(id)?;

        let scheduled_for = match (options.policy, options.scheduled_time) {
            (DeintegrationPolicy::Scheduled, Some(at)) => Some(at),
            (DeintegrationPolicy::Scheduled, None) => {
                return Err(CoreError::validation(
                    "the scheduled policy requires scheduledTime",
                ));
            }
            _ => None,
        };

        // 1. Validate
        let dependents = entry.dependents();
        if !dependents.is_empty() {
            if !options.force {
                return Err(CoreError::HasDependents { id, dependents });
            }
            // Forced removal under live dependents always tells them.
            options.notify_dependents = true;
        }
        let ops = entry.active_ops();
        if ops > 0 && !options.force {
            return Err(CoreError::OperationsInProgress { id, count: ops });
        }

        // 2. Lock
        let mut record = DeintegrationRecord::new(id, entry.name.clone(), entry.kind, &options);
        let guard = self.acquire(id, record.id, options.force).await?;
        // The lock may have been won after a previous run already finished.
        if !self.inner.hub.contains(id)
            || matches!(
                entry.status(),
                IntegrationStatus::Deintegrating | IntegrationStatus::Deintegrated
            )
        {
            return Err(CoreError::AlreadyDeintegrating { id });
        }
        record.complete(steps::VALIDATE);
        record.complete(steps::LOCK);
        self.inner.store.save(&record).await?;

        if let Err(e) = entry.transition(IntegrationStatus::Deintegrating) {
            record.mark(steps::LOCK, StepStatus::Failed, Some(e.to_string()));
            record.finish(RecordStatus::Failed, Some(e.to_string()));
            self.inner.persist(&record).await;
            return Err(e);
        }

        info!(
            integration_id = %id,
            record_id = %record.id,
            policy = %options.policy,
            force = options.force,
            "de-integration started"
        );
        self.inner.hub.events().publish(
            kinds::DEINTEGRATION_STARTED,
            Some(id),
            json!({ "recordId": record.id, "policy": options.policy }),
        );

        let mut flow = Workflow {
            inner: Arc::clone(&self.inner),
            entry,
            record,
            _guard: guard,
            reply: None,
        };

        // 3. Notify dependents
        flow.notify_dependents();

        let wait = match options.policy {
            DeintegrationPolicy::Immediate => {
                let record = flow.run(Wait::None).await;
                return Ok(record.summary());
            }
            DeintegrationPolicy::Graceful => Wait::Drain,
            DeintegrationPolicy::Scheduled => {
                flow.park("waiting for scheduled time");
                Wait::Until(scheduled_for.unwrap_or_else(Utc::now))
            }
            DeintegrationPolicy::Manual => {
                let (tx, rx) = oneshot::channel();
                self.inner.manual.insert(flow.record.id, tx);
                flow.park("waiting for manual confirmation");
                Wait::Manual(rx)
            }
        };

        flow.inner.persist(&flow.record).await;
        let summary = flow.record.summary();
        tokio::spawn(async move {
            flow.run(wait).await;
        });
        Ok(summary)
    }

    /// Take the single-flight lock. With `force`, a workflow parked under
    /// `manual` is superseded and the lock taken over.
    async fn acquire(
        &self,
        integration_id: Uuid,
        record_id: Uuid,
        force: bool,
    ) -> Result<FlightGuard, CoreError> {
        for _ in 0..2 {
            let holder = match self.inner.in_flight.entry(integration_id) {
                Entry::Vacant(slot) => {
                    slot.insert(record_id);
                    return Ok(FlightGuard {
                        in_flight: Arc::clone(&self.inner.in_flight),
                        integration_id,
                        record_id,
                    });
                }
                Entry::Occupied(slot) => *slot.get(),
            };

            let parked = if force {
                self.inner.manual.remove(&holder).map(|(_, tx)| tx)
            } else {
                None
            };
            let Some(parked) = parked else {
                return Err(CoreError::AlreadyDeintegrating { id: integration_id });
            };

            let (ack_tx, ack_rx) = oneshot::channel();
            if parked.send(ManualDecision::Supersede(ack_tx)).is_ok() {
                let _ = ack_rx.await;
            }
            debug!(integration_id = %integration_id, superseded = %holder, "manual hold superseded");
        }
        Err(CoreError::AlreadyDeintegrating { id: integration_id })
    }

    /// Resume a workflow parked under the `manual` policy and wait for it
    /// to finish. Returns the final record.
    pub async fn confirm_manual_cleanup(
        &self,
        record_id: Uuid,
    ) -> Result<DeintegrationRecord, CoreError> {
        let Some((_, parked)) = self.inner.manual.remove(&record_id) else {
            self.get_record(record_id).await?;
            return Err(CoreError::NotPendingManual { record_id });
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        parked
            .send(ManualDecision::Confirm(reply_tx))
            .map_err(|_| CoreError::NotPendingManual { record_id })?;
        info!(record_id = %record_id, "manual cleanup confirmed");
        reply_rx
            .await
            .map_err(|_| CoreError::Internal(format!("workflow for {record_id} ended without a result")))
    }

    // ── Records ──────────────────────────────────────────────────────

    pub async fn get_record(&self, record_id: Uuid) -> Result<DeintegrationRecord, CoreError> {
        self.inner
            .store
            .load(record_id)
            .await?
            .ok_or_else(|| CoreError::not_found("deintegration record", record_id))
    }

    pub async fn list_records(&self) -> Result<Vec<DeintegrationRecord>, CoreError> {
        self.inner.store.list().await
    }

    // ── Reintegrate ──────────────────────────────────────────────────

    /// Register a brand-new integration from a preserved record and restore
    /// its adapter state. Each call yields a new integration ID.
    pub async fn reintegrate(&self, record_id: Uuid) -> Result<RegistrationOutcome, CoreError> {
        let record = self.get_record(record_id).await?;
        let saved = match (&record.saved_state, record.is_restorable()) {
            (Some(saved), true) => saved.clone(),
            _ => return Err(CoreError::NoSavedState { record_id }),
        };

        let hub = &self.inner.hub;
        let request = RegistrationRequest {
            name: record.integration_name.clone(),
            kind: record.integration_type,
            config: saved.config,
            metadata: saved.metadata,
            depends_on: saved
                .depends_on
                .iter()
                .filter(|id| hub.contains(**id))
                .map(ToString::to_string)
                .collect(),
        };
        let outcome = hub.register(request).await?;

        if let Err(e) = hub
            .restore_adapter_state(outcome.integration_id, saved.adapter_state)
            .await
        {
            warn!(record_id = %record_id, error = %e, "state restore failed; rolling back");
            if let Err(rollback) = hub.deregister(outcome.integration_id, true).await {
                warn!(error = %rollback, "rollback deregister failed");
            }
            return Err(e);
        }

        info!(
            record_id = %record_id,
            integration_id = %outcome.integration_id,
            name = %record.integration_name,
            "integration reintegrated"
        );
        hub.events().publish(
            kinds::UPDATED,
            Some(outcome.integration_id),
            json!({ "status": outcome.status, "reintegratedFrom": record_id }),
        );
        Ok(outcome)
    }
}

impl ManagerInner {
    /// Best-effort write-through; the in-flight record stays authoritative.
    async fn persist(&self, record: &DeintegrationRecord) {
        if let Err(e) = self.store.save(record).await {
            warn!(record_id = %record.id, error = %e, "failed to persist de-integration record");
        }
    }
}

/// Releases the single-flight slot on drop, whatever the outcome.
struct FlightGuard {
    in_flight: Arc<DashMap<Uuid, Uuid>>,
    integration_id: Uuid,
    record_id: Uuid,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.in_flight
            .remove_if(&self.integration_id, |_, holder| *holder == self.record_id);
    }
}

// ── Workflow ─────────────────────────────────────────────────────────

struct Workflow {
    inner: Arc<ManagerInner>,
    entry: Arc<IntegrationEntry>,
    record: DeintegrationRecord,
    _guard: FlightGuard,
    reply: Option<oneshot::Sender<DeintegrationRecord>>,
}

impl Workflow {
    fn hub(&self) -> &Hub {
        &self.inner.hub
    }

    fn park(&mut self, detail: &str) {
        self.record.status = RecordStatus::Pending;
        self.record
            .mark(steps::POLICY_WAIT, StepStatus::Pending, Some(detail.to_owned()));
    }

    /// Fire-and-forget: one event per dependent, addressed to it.
    fn notify_dependents(&mut self) {
        if !self.record.notify_dependents {
            return;
        }
        let dependents = self.entry.dependents();
        for dependent in &dependents {
            self.hub().events().publish(
                kinds::DEPENDENCY_REMOVAL_PENDING,
                Some(*dependent),
                json!({
                    "dependencyId": self.entry.id,
                    "dependencyName": self.entry.name,
                    "recordId": self.record.id,
                    "policy": self.record.policy,
                }),
            );
        }
        debug!(integration_id = %self.entry.id, count = dependents.len(), "dependents notified");
        self.record.notified_dependents = dependents;
        self.record.complete(steps::NOTIFY_DEPENDENTS);
    }

    async fn save_state(&mut self) -> Result<(), Halt> {
        if !self.record.preserve_data {
            return Ok(());
        }
        let adapter_state = self.entry.adapter.save_state().await.map_err(|e| Halt::Failed {
            step: steps::SAVE_STATE,
            error: e.to_string(),
        })?;
        self.record.saved_state = Some(SavedState {
            config: self.entry.original_config.clone(),
            adapter_state,
            metadata: self.entry.metadata.clone(),
            depends_on: self.entry.depends_on.clone(),
        });
        self.record.complete(steps::SAVE_STATE);
        self.inner.persist(&self.record).await;
        Ok(())
    }

    async fn policy_wait(&mut self, wait: Wait) -> Result<(), Halt> {
        let detail = match wait {
            Wait::None => None,
            Wait::Drain => Some(self.drain().await),
            Wait::Until(at) => {
                if let Ok(delay) = (at - Utc::now()).to_std() {
                    debug!(record_id = %self.record.id, %at, "scheduled wait");
                    tokio::time::sleep(delay).await;
                }
                Some(format!("resumed at {}", Utc::now().to_rfc3339()))
            }
            Wait::Manual(rx) => match rx.await {
                Ok(ManualDecision::Confirm(reply)) => {
                    self.reply = Some(reply);
                    Some("confirmed".to_owned())
                }
                Ok(ManualDecision::Supersede(ack)) => return Err(Halt::Superseded(ack)),
                Err(_) => {
                    return Err(Halt::Failed {
                        step: steps::POLICY_WAIT,
                        error: "manual confirmation channel closed".into(),
                    });
                }
            },
        };
        self.record.status = RecordStatus::Running;
        self.record
            .mark(steps::POLICY_WAIT, StepStatus::Completed, detail);
        self.inner.persist(&self.record).await;
        Ok(())
    }

    /// Poll the in-flight operation count until it reaches zero or the
    /// grace period runs out. Proceeds either way.
    async fn drain(&self) -> String {
        let config = self.hub().config();
        let deadline = tokio::time::Instant::now() + config.drain_timeout;
        let poll = config.drain_poll_interval.max(Duration::from_millis(1));
        loop {
            let ops = self.entry.active_ops();
            if ops == 0 {
                return "drained".to_owned();
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(integration_id = %self.entry.id, ops, "grace period elapsed with operations in flight");
                return format!("grace period elapsed with {ops} operation(s) in flight");
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Best-effort: adapter errors are recorded, never fatal.
    async fn cleanup(&mut self) {
        self.entry.stop_tasks().await;
        match self.entry.adapter.cleanup().await {
            Ok(()) => self.record.complete(steps::CLEANUP),
            Err(e) => {
                warn!(integration_id = %self.entry.id, error = %e, "adapter cleanup failed");
                self.record
                    .mark(steps::CLEANUP, StepStatus::Failed, Some(e.to_string()));
            }
        }
    }

    /// A healthy answer after cleanup is flagged, not fatal. Only adapters
    /// that keep reporting healthy from their own state can trip this; the
    /// built-in ones report the closed flag set by `cleanup`.
    async fn verify_cleanup(&mut self) {
        let limit = self.hub().config().adapter_health_timeout;
        let probe = self.entry.probe(limit).await;
        if probe.success {
            warn!(integration_id = %self.entry.id, "adapter still healthy after cleanup");
            self.record.cleanup_verification_failed = true;
            self.record.mark(
                steps::VERIFY_CLEANUP,
                StepStatus::Completed,
                Some("adapter still responds after cleanup".into()),
            );
        } else {
            self.record.complete(steps::VERIFY_CLEANUP);
        }
    }

    /// Save state and wait out the policy. `scheduled` snapshots state
    /// after the wait, everything else before it.
    async fn prepare(&mut self, wait: Wait) -> Result<(), Halt> {
        let scheduled = matches!(wait, Wait::Until(_));
        if !scheduled {
            self.save_state().await?;
        }
        self.policy_wait(wait).await?;
        if scheduled {
            self.save_state().await?;
        }
        Ok(())
    }

    async fn run(mut self, wait: Wait) -> DeintegrationRecord {
        match self.prepare(wait).await {
            Ok(()) => {
                self.cleanup().await;
                self.verify_cleanup().await;
                self.archive().await
            }
            Err(Halt::Failed { step, error }) => self.fail(step, error).await,
            Err(Halt::Superseded(ack)) => {
                let record = self.fail(steps::POLICY_WAIT, SUPERSEDED.to_owned()).await;
                let _ = ack.send(());
                record
            }
        }
    }

    async fn archive(mut self) -> DeintegrationRecord {
        let _ = self.entry.transition(IntegrationStatus::Deintegrated);
        self.inner.hub.remove_entry(&self.entry).await;
        self.record.complete(steps::ARCHIVE);
        self.record.finish(RecordStatus::Completed, None);
        self.inner.persist(&self.record).await;

        info!(
            integration_id = %self.entry.id,
            record_id = %self.record.id,
            duration_ms = self.record.duration.unwrap_or_default(),
            verification_failed = self.record.cleanup_verification_failed,
            "de-integration completed"
        );
        self.hub().events().publish(
            kinds::DEINTEGRATION_COMPLETED,
            Some(self.entry.id),
            json!({
                "recordId": self.record.id,
                "preserved": self.record.saved_state.is_some(),
                "cleanupVerificationFailed": self.record.cleanup_verification_failed,
            }),
        );
        self.conclude()
    }

    /// The integration is left where it stopped, in `failed`.
    async fn fail(mut self, step: &'static str, error: String) -> DeintegrationRecord {
        let _ = self.entry.transition(IntegrationStatus::Failed);
        self.record
            .mark(step, StepStatus::Failed, Some(error.clone()));
        self.record.finish(RecordStatus::Failed, Some(error.clone()));
        self.inner.persist(&self.record).await;

        warn!(
            integration_id = %self.entry.id,
            record_id = %self.record.id,
            step,
            %error,
            "de-integration failed"
        );
        self.hub().events().publish(
            kinds::DEINTEGRATION_FAILED,
            Some(self.entry.id),
            json!({ "recordId": self.record.id, "step": step, "error": error }),
        );
        self.conclude()
    }

    /// Release the lock (by dropping `self`) and answer a waiting confirm.
    fn conclude(mut self) -> DeintegrationRecord {
        let record = self.record.clone();
        if let Some(reply) = self.reply.take() {
            let _ = reply.send(record.clone());
        }
        record
    }
}
