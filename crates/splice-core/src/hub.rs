// ── Integration hub ──
//
// Owns the integration registry, dispatches adapter lifecycle calls,
// runs one health loop per integration, tracks metrics, resolves port
// conflicts at registration time and publishes lifecycle events.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use serde_json::{Value, json};
use splice_api::HealthProbe;
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapter::{
    Adapter, AdapterContext, AdapterDescriptor, AdapterEvent, AdapterFactory, PluginRegistry,
};
use crate::config::{HubConfig, PortRange};
use crate::error::CoreError;
use crate::event::{Envelope, EventBus, kinds};
use crate::helper::{self, PortReservations, build_health_url, config_port, elapsed_ms};
use crate::model::{
    HealthRecord, HealthStatus, Integration, IntegrationFilter, IntegrationKind, IntegrationList,
    IntegrationMetrics, IntegrationStatus, MetricsPeriod, MetricsState, PortAllocation,
    RegistrationOutcome, RegistrationRequest, TestReport,
};

const DEFAULT_HEALTH_PATH: &str = "health";

// ── IntegrationEntry ─────────────────────────────────────────────────

/// Live registry entry. Shared between the hub, its background tasks and
/// the de-integration manager.
pub(crate) struct IntegrationEntry {
    pub id: Uuid,
    pub name: String,
    pub kind: IntegrationKind,
    /// Effective configuration (resolved port included).
    pub config: Value,
    /// Configuration exactly as requested.
    pub original_config: Value,
    pub metadata: Value,
    pub adapter: Arc<dyn Adapter>,
    pub descriptor: AdapterDescriptor,
    pub port: Option<PortAllocation>,
    pub depends_on: Vec<Uuid>,
    pub dependents: DashSet<Uuid>,
    pub registered_at: DateTime<Utc>,
    status: watch::Sender<IntegrationStatus>,
    updated_at_ms: AtomicI64,
    metrics: Mutex<MetricsState>,
    active_ops: AtomicUsize,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl IntegrationEntry {
    pub fn status(&self) -> IntegrationStatus {
        *self.status.borrow()
    }

    pub fn active_ops(&self) -> usize {
        self.active_ops.load(Ordering::Acquire)
    }

    pub fn dependents(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.dependents.iter().map(|id| *id).collect();
        ids.sort_unstable();
        ids
    }

    fn updated_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.updated_at_ms.load(Ordering::Acquire))
            .unwrap_or(self.registered_at)
    }

    fn touch(&self) {
        self.updated_at_ms
            .store(Utc::now().timestamp_millis(), Ordering::Release);
    }

    /// Move along a legal lifecycle edge. Returns the previous status.
    pub fn transition(&self, next: IntegrationStatus) -> Result<IntegrationStatus, CoreError> {
        let mut previous = self.status();
        let moved = self.status.send_if_modified(|current| {
            previous = *current;
            if current.can_transition_to(next) {
                *current = next;
                true
            } else {
                false
            }
        });
        if moved {
            self.touch();
            Ok(previous)
        } else {
            Err(CoreError::NotActive {
                id: self.id,
                status: previous,
            })
        }
    }

    /// Count an in-flight operation until the guard drops.
    fn begin_op(&self) -> OpGuard<'_> {
        self.active_ops.fetch_add(1, Ordering::AcqRel);
        OpGuard(&self.active_ops)
    }

    /// One adapter health call bounded by `limit`.
    pub async fn probe(&self, limit: Duration) -> HealthRecord {
        let started = Instant::now();
        let error = match tokio::time::timeout(limit, self.adapter.health_check()).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!(
                "health check timed out after {}ms",
                helper::duration_ms(limit)
            )),
        };
        HealthRecord {
            timestamp: Utc::now(),
            success: error.is_none(),
            latency_ms: elapsed_ms(started),
            error,
        }
    }

    async fn spawn(&self, task: JoinHandle<()>) {
        self.tasks.lock().await.push(task);
    }

    /// Cancel and join this entry's background tasks.
    pub async fn stop_tasks(&self) {
        self.cancel.cancel();
        let handles: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(integration_id = %self.id, error = %e, "background task panicked");
            }
        }
    }
}

struct OpGuard<'a>(&'a AtomicUsize);

impl Drop for OpGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Holds a name in the registry until committed; released on drop otherwise.
struct NameClaim<'a> {
    names: &'a DashMap<String, Uuid>,
    name: String,
    id: Uuid,
    committed: bool,
}

impl<'a> NameClaim<'a> {
    fn acquire(names: &'a DashMap<String, Uuid>, name: &str, id: Uuid) -> Result<Self, CoreError> {
        match names.entry(name.to_owned()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(CoreError::DuplicateName {
                name: name.to_owned(),
            }),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(id);
                Ok(Self {
                    names,
                    name: name.to_owned(),
                    id,
                    committed: false,
                })
            }
        }
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for NameClaim<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.names.remove_if(&self.name, |_, owner| *owner == self.id);
        }
    }
}

// ── Hub ──────────────────────────────────────────────────────────────

/// The integration registry and lifecycle driver.
///
/// Cheaply cloneable via `Arc<HubInner>`. Mutations of one integration go
/// through its entry (status `watch` channel, metrics mutex); different
/// integrations never contend. Port allocation is the only global lock.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

struct HubInner {
    config: HubConfig,
    factory: AdapterFactory,
    entries: DashMap<Uuid, Arc<IntegrationEntry>>,
    names: DashMap<String, Uuid>,
    ports: PortReservations,
    prober: HealthProbe,
    events: EventBus,
    cancel: CancellationToken,
}

impl Hub {
    /// Hub with the built-in adapter for every integration kind.
    pub fn new(config: HubConfig) -> Result<Self, CoreError> {
        Self::with_factory(config, AdapterFactory::with_defaults())
    }

    pub fn with_factory(config: HubConfig, factory: AdapterFactory) -> Result<Self, CoreError> {
        let prober = HealthProbe::new(&config.transport)?;
        let events = EventBus::new(config.event_capacity);
        Ok(Self {
            inner: Arc::new(HubInner {
                config,
                factory,
                entries: DashMap::new(),
                names: DashMap::new(),
                ports: PortReservations::new(),
                prober,
                events,
                cancel: CancellationToken::new(),
            }),
        })
    }

    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Envelope>> {
        self.inner.events.subscribe()
    }

    /// Runtime plugin registrations land here.
    pub fn plugins(&self) -> &Arc<PluginRegistry> {
        self.inner.factory.plugins()
    }

    pub fn ports(&self) -> &PortReservations {
        &self.inner.ports
    }

    // ── Registration ─────────────────────────────────────────────────

    /// Register an integration and bring it to `active`.
    ///
    /// Claims the name, resolves declared dependencies, resolves the port
    /// of network services, runs the initial URL probe unless
    /// `skipHealthCheck` is set, builds and initializes the adapter, then
    /// starts the health loop.
    pub async fn register(
        &self,
        request: RegistrationRequest,
    ) -> Result<RegistrationOutcome, CoreError> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(CoreError::validation("name is required"));
        }
        let config = match &request.config {
            Value::Null => json!({}),
            obj @ Value::Object(_) => obj.clone(),
            _ => return Err(CoreError::validation("config must be an object")),
        };

        let id = Uuid::new_v4();
        let claim = NameClaim::acquire(&self.inner.names, name, id)?;
        let depends_on = self.resolve_dependencies(&request.depends_on)?;

        let mut effective = config.clone();
        let port = self.allocate_port(request.kind, &config).await?;
        if let (Some(alloc), Some(obj)) = (port, effective.as_object_mut()) {
            obj.insert("port".into(), json!(alloc.resolved_port));
        }

        let started = self
            .start(
                id,
                name,
                &request,
                Configs {
                    effective,
                    original: config,
                },
                depends_on,
                port,
            )
            .await;
        match started {
            Ok(outcome) => {
                claim.commit();
                Ok(outcome)
            }
            Err(e) => {
                if let Some(alloc) = port {
                    self.inner.ports.release(alloc.resolved_port).await;
                }
                warn!(name, error = %e, "registration failed");
                Err(e)
            }
        }
    }

    /// Map each `depends_on` reference (ID or name) to a registered ID.
    fn resolve_dependencies(&self, references: &[String]) -> Result<Vec<Uuid>, CoreError> {
        let mut ids = Vec::with_capacity(references.len());
        for reference in references {
            let id = reference
                .parse::<Uuid>()
                .ok()
                .filter(|id| self.inner.entries.contains_key(id))
                .or_else(|| self.inner.names.get(reference.as_str()).map(|id| *id))
                .filter(|id| self.inner.entries.contains_key(id))
                .ok_or_else(|| CoreError::not_found("dependency", reference))?;
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    async fn allocate_port(
        &self,
        kind: IntegrationKind,
        config: &Value,
    ) -> Result<Option<PortAllocation>, CoreError> {
        if !kind.is_network_service() {
            return Ok(None);
        }
        let range = match config.get("portRange") {
            Some(raw) => serde_json::from_value::<PortRange>(raw.clone())
                .map_err(|e| CoreError::validation(format!("invalid portRange: {e}")))?,
            None => self.inner.config.port_range,
        };
        self.inner
            .ports
            .allocate(
                config_port(config),
                crate::adapter::config_bool(config, "autoDetectPort"),
                range,
            )
            .await
    }

    async fn start(
        &self,
        id: Uuid,
        name: &str,
        request: &RegistrationRequest,
        configs: Configs,
        depends_on: Vec<Uuid>,
        port: Option<PortAllocation>,
    ) -> Result<RegistrationOutcome, CoreError> {
        let kind = request.kind;
        let config = configs.effective;

        if kind.is_network_service() && !crate::adapter::config_bool(&config, "skipHealthCheck") {
            let path = config
                .get("healthPath")
                .and_then(Value::as_str)
                .unwrap_or(DEFAULT_HEALTH_PATH);
            let url = build_health_url(&config, path)?;
            let outcome = helper::health_check(&self.inner.prober, &url, &self.inner.config.probe).await;
            if !outcome.success {
                return Err(CoreError::HealthCheckFailed {
                    url: url.to_string(),
                    attempts: outcome.attempts,
                    reason: outcome.error.unwrap_or_default(),
                });
            }
        }

        let adapter = self
            .inner
            .factory
            .create(kind, &config, &self.inner.config.transport)?;
        let now = Utc::now();
        let (status, _) = watch::channel(IntegrationStatus::Registering);
        let entry = Arc::new(IntegrationEntry {
            id,
            name: name.to_owned(),
            kind,
            descriptor: adapter.descriptor(),
            adapter,
            original_config: configs.original,
            config,
            metadata: request.metadata.clone(),
            port,
            depends_on,
            dependents: DashSet::new(),
            registered_at: now,
            status,
            updated_at_ms: AtomicI64::new(now.timestamp_millis()),
            metrics: Mutex::new(MetricsState::new(self.inner.config.health_history)),
            active_ops: AtomicUsize::new(0),
            cancel: self.inner.cancel.child_token(),
            tasks: Mutex::new(Vec::new()),
        });
        self.inner.entries.insert(id, Arc::clone(&entry));

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        entry
            .spawn(tokio::spawn(drain_adapter_events(
                id,
                event_rx,
                self.inner.events.clone(),
                entry.cancel.clone(),
            )))
            .await;

        let ctx = AdapterContext {
            integration_id: id,
            name: entry.name.clone(),
            events: event_tx,
        };
        if let Err(e) = entry.adapter.init(ctx).await {
            entry.stop_tasks().await;
            let _ = entry.transition(IntegrationStatus::Failed);
            self.inner.entries.remove(&id);
            return Err(e.into());
        }

        entry.transition(IntegrationStatus::Active)?;
        for dependency in &entry.depends_on {
            if let Some(target) = self.inner.entries.get(dependency) {
                target.dependents.insert(id);
            }
        }

        let interval = entry
            .config
            .get("healthCheckInterval")
            .and_then(Value::as_u64)
            .map_or(self.inner.config.health_interval, Duration::from_millis);
        if !interval.is_zero() {
            let settings = HealthSettings {
                interval,
                threshold: self.inner.config.unhealthy_threshold.max(1),
                limit: self.inner.config.adapter_health_timeout,
            };
            entry
                .spawn(tokio::spawn(health_loop(
                    Arc::clone(&entry),
                    self.inner.events.clone(),
                    settings,
                    entry.cancel.clone(),
                )))
                .await;
        }

        info!(integration_id = %id, name, %kind, port = ?port.map(|p| p.resolved_port), "integration active");
        self.inner.events.publish(
            kinds::CREATED,
            Some(id),
            json!({
                "name": entry.name,
                "type": kind,
                "status": IntegrationStatus::Active,
                "port": port,
            }),
        );

        Ok(RegistrationOutcome {
            integration_id: id,
            status: IntegrationStatus::Active,
            port,
        })
    }

    // ── Dispatch ─────────────────────────────────────────────────────

    /// Forward an action to the adapter and return its result unmodified.
    pub async fn execute(&self, id: Uuid, action: &str, params: Value) -> Result<Value, CoreError> {
        let entry = self.entry(id)?;
        let _op = entry.begin_op();

        let status = entry.status();
        if !status.accepts_execute() {
            return Err(CoreError::NotActive { id, status });
        }

        debug!(integration_id = %id, action, "execute");
        let result = entry.adapter.process_data(action, params).await;
        entry.metrics.lock().await.record_request(result.is_err());
        result.map_err(CoreError::from)
    }

    pub fn pause(&self, id: Uuid) -> Result<(), CoreError> {
        self.set_status(id, IntegrationStatus::Paused, |s| {
            matches!(s, IntegrationStatus::Active | IntegrationStatus::Unhealthy)
        })
    }

    pub fn resume(&self, id: Uuid) -> Result<(), CoreError> {
        self.set_status(id, IntegrationStatus::Active, |s| s == IntegrationStatus::Paused)
    }

    fn set_status(
        &self,
        id: Uuid,
        next: IntegrationStatus,
        allowed: impl Fn(IntegrationStatus) -> bool,
    ) -> Result<(), CoreError> {
        let entry = self.entry(id)?;
        let current = entry.status();
        if current == next {
            return Ok(());
        }
        if !allowed(current) {
            return Err(CoreError::NotActive { id, status: current });
        }
        let previous = entry.transition(next)?;
        info!(integration_id = %id, from = %previous, to = %next, "status changed");
        self.inner.events.publish(
            kinds::UPDATED,
            Some(id),
            json!({ "status": next, "previous": previous }),
        );
        Ok(())
    }

    /// On-demand adapter health check. Does not touch the health history.
    pub async fn test(&self, id: Uuid) -> Result<TestReport, CoreError> {
        let entry = self.entry(id)?;
        let record = entry.probe(self.inner.config.adapter_health_timeout).await;
        let health = entry.metrics.lock().await.health;
        let message = match &record.error {
            None => format!("{} is reachable", entry.name),
            Some(e) => e.clone(),
        };
        Ok(TestReport {
            success: record.success,
            message,
            details: json!({
                "status": entry.status(),
                "healthStatus": health,
                "latencyMs": record.latency_ms,
                "descriptor": entry.descriptor,
            }),
        })
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub async fn get_integration(&self, id: Uuid) -> Result<Integration, CoreError> {
        let entry = self.entry(id)?;
        Ok(view(&entry).await)
    }

    /// Filtered snapshot, oldest registration first.
    pub async fn list_integrations(&self, filter: &IntegrationFilter) -> IntegrationList {
        let entries: Vec<Arc<IntegrationEntry>> = self
            .inner
            .entries
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();

        let mut integrations = Vec::with_capacity(entries.len());
        for entry in entries {
            let integration = view(&entry).await;
            if filter.matches(&integration) {
                integrations.push(integration);
            }
        }
        integrations.sort_by(|a, b| {
            a.registered_at
                .cmp(&b.registered_at)
                .then_with(|| a.name.cmp(&b.name))
        });
        let total = integrations.len();
        IntegrationList {
            integrations,
            total,
        }
    }

    pub async fn metrics(&self, id: Uuid, period: MetricsPeriod) -> Result<IntegrationMetrics, CoreError> {
        let entry = self.entry(id)?;
        let metrics = entry.metrics.lock().await.summarize(id, period);
        Ok(metrics)
    }

    /// Resolve a name to its current integration ID.
    pub fn lookup(&self, name: &str) -> Option<Uuid> {
        self.inner
            .names
            .get(name)
            .map(|id| *id)
            .filter(|id| self.inner.entries.contains_key(id))
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.inner.entries.contains_key(&id)
    }

    /// Wait until the integration reaches `status`.
    pub async fn wait_for_status(
        &self,
        id: Uuid,
        status: IntegrationStatus,
        timeout: Duration,
    ) -> Result<(), CoreError> {
        let mut rx = self.entry(id)?.status.subscribe();
        match tokio::time::timeout(timeout, rx.wait_for(|s| *s == status)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(CoreError::not_found("integration", id)),
            Err(_) => Err(CoreError::Timeout {
                operation: format!("integration {id} to become {status}"),
                timeout_ms: helper::duration_ms(timeout),
            }),
        }
    }

    // ── Removal ──────────────────────────────────────────────────────

    /// Hard delete that bypasses the de-integration workflow. Meant for
    /// integrations whose state is not worth keeping (e.g. `failed`).
    pub async fn deregister(&self, id: Uuid, force: bool) -> Result<(), CoreError> {
        let entry = self.entry(id)?;
        if entry.status() == IntegrationStatus::Deintegrating {
            return Err(CoreError::AlreadyDeintegrating { id });
        }
        let dependents = entry.dependents();
        if !dependents.is_empty() && !force {
            return Err(CoreError::HasDependents { id, dependents });
        }

        entry.stop_tasks().await;
        if let Err(e) = entry.adapter.cleanup().await {
            warn!(integration_id = %id, error = %e, "adapter cleanup failed during deregister");
        }
        let _ = entry.transition(IntegrationStatus::Deintegrating);
        let _ = entry.transition(IntegrationStatus::Deintegrated);
        self.remove_entry(&entry).await;

        info!(integration_id = %id, name = %entry.name, "integration deregistered");
        self.inner
            .events
            .publish(kinds::DEREGISTERED, Some(id), json!({ "name": entry.name }));
        Ok(())
    }

    /// Cancel every background task. Adapters are left as they are.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let entries: Vec<Arc<IntegrationEntry>> = self
            .inner
            .entries
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();
        for entry in entries {
            entry.stop_tasks().await;
        }
        debug!("hub shut down");
    }

    // ── Crate-internal surface for the de-integration manager ────────

    pub(crate) fn entry(&self, id: Uuid) -> Result<Arc<IntegrationEntry>, CoreError> {
        self.inner
            .entries
            .get(&id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| CoreError::not_found("integration", id))
    }

    /// Drop the entry from the registry and release its name, port and
    /// dependency links. A second call for the same entry is a no-op.
    pub(crate) async fn remove_entry(&self, entry: &IntegrationEntry) {
        if self.inner.entries.remove(&entry.id).is_none() {
            return;
        }
        self.inner
            .names
            .remove_if(&entry.name, |_, owner| *owner == entry.id);
        if let Some(alloc) = entry.port {
            self.inner.ports.release(alloc.resolved_port).await;
        }
        for dependency in &entry.depends_on {
            if let Some(target) = self.inner.entries.get(dependency) {
                target.dependents.remove(&entry.id);
            }
        }
    }

    pub(crate) async fn restore_adapter_state(&self, id: Uuid, state: Value) -> Result<(), CoreError> {
        let entry = self.entry(id)?;
        entry.adapter.restore_state(state).await?;
        entry.touch();
        Ok(())
    }
}

struct Configs {
    effective: Value,
    original: Value,
}

async fn view(entry: &IntegrationEntry) -> Integration {
    let metrics = entry.metrics.lock().await;
    Integration {
        id: entry.id,
        name: entry.name.clone(),
        kind: entry.kind,
        config: entry.config.clone(),
        metadata: entry.metadata.clone(),
        status: entry.status(),
        health_status: metrics.health,
        dependents: entry.dependents(),
        dependencies: entry.depends_on.clone(),
        port: entry.port,
        descriptor: entry.descriptor.clone(),
        request_count: metrics.requests,
        error_count: metrics.errors,
        registered_at: entry.registered_at,
        updated_at: entry.updated_at(),
    }
}

// ── Background tasks ─────────────────────────────────────────────────

/// Adapter events onto the bus, in arrival order.
async fn drain_adapter_events(
    id: Uuid,
    mut rx: mpsc::UnboundedReceiver<AdapterEvent>,
    events: EventBus,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = rx.recv() => {
                let Some(event) = event else { break };
                events.publish(&event.topic, Some(id), event.payload);
            }
        }
    }
}

#[derive(Clone, Copy)]
struct HealthSettings {
    interval: Duration,
    threshold: u32,
    limit: Duration,
}

/// Periodic adapter probe. Results are applied one at a time, so history
/// order is arrival order. `threshold` consecutive failures demote an
/// active integration to `unhealthy`; a success promotes it back.
async fn health_loop(
    entry: Arc<IntegrationEntry>,
    events: EventBus,
    settings: HealthSettings,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(settings.interval);
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                let record = entry.probe(settings.limit).await;
                let success = record.success;
                let error = record.error.clone();
                let failures = entry
                    .metrics
                    .lock()
                    .await
                    .record_probe(record, settings.threshold);

                match (success, entry.status()) {
                    (false, IntegrationStatus::Active) if failures >= settings.threshold => {
                        if entry.transition(IntegrationStatus::Unhealthy).is_ok() {
                            warn!(
                                integration_id = %entry.id,
                                failures,
                                error = error.as_deref().unwrap_or_default(),
                                "integration unhealthy"
                            );
                            events.publish(
                                kinds::UNHEALTHY,
                                Some(entry.id),
                                json!({
                                    "consecutiveFailures": failures,
                                    "healthStatus": HealthStatus::Unhealthy,
                                    "error": error,
                                }),
                            );
                        }
                    }
                    (true, IntegrationStatus::Unhealthy) => {
                        if entry.transition(IntegrationStatus::Active).is_ok() {
                            info!(integration_id = %entry.id, "integration recovered");
                            events.publish(
                                kinds::UPDATED,
                                Some(entry.id),
                                json!({
                                    "status": IntegrationStatus::Active,
                                    "previous": IntegrationStatus::Unhealthy,
                                }),
                            );
                        }
                    }
                    _ => debug!(integration_id = %entry.id, success, failures, "health probe"),
                }
            }
        }
    }
}
