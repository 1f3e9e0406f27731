#![allow(clippy::unwrap_used)]
// Integration tests for `DeintegrationManager` policies, locking and
// reintegration.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use uuid::Uuid;

use splice_core::{
    Adapter, AdapterContext, AdapterDescriptor, AdapterError, AdapterFactory, AdapterSetup,
    CoreError, DeintegrationManager, DeintegrationOptions, DeintegrationPolicy,
    DeintegrationRecord, FileRecordStore, Hub, HubConfig, IntegrationKind, IntegrationStatus,
    PluginContext, PluginModule, RecordStatus, RecordStore, RegistrationRequest, StepStatus,
    kinds, model::steps,
};

// ── Helpers ─────────────────────────────────────────────────────────

fn echo(name: &str) -> RegistrationRequest {
    RegistrationRequest::new(name, IntegrationKind::Plugin, json!({ "module": "echo" }))
}

fn opts(policy: DeintegrationPolicy) -> DeintegrationOptions {
    DeintegrationOptions::new(policy)
}

async fn setup() -> (Hub, DeintegrationManager) {
    let hub = Hub::new(HubConfig::default()).unwrap();
    let manager = DeintegrationManager::new(hub.clone());
    (hub, manager)
}

async fn wait_for_record(
    manager: &DeintegrationManager,
    id: Uuid,
    status: RecordStatus,
) -> DeintegrationRecord {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let record = manager.get_record(id).await.unwrap();
            if record.status == status {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap()
}

/// Plugin whose `sleep` action holds an operation open for `ms`.
struct Sleeper;

#[async_trait]
impl PluginModule for Sleeper {
    async fn init(&self, _ctx: PluginContext) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn execute(&self, _action: &str, params: Value) -> Result<Value, AdapterError> {
        let ms = params.get("ms").and_then(Value::as_u64).unwrap_or(100);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(json!({ "slept": ms }))
    }
}

/// Adapter that keeps answering health checks after cleanup and can be
/// told to fail `save_state`.
struct Stubborn {
    fail_save: bool,
}

#[async_trait]
impl Adapter for Stubborn {
    fn kind(&self) -> IntegrationKind {
        IntegrationKind::Webhook
    }

    fn descriptor(&self) -> AdapterDescriptor {
        AdapterDescriptor::new(IntegrationKind::Webhook, &[], &[])
    }

    async fn init(&self, _ctx: AdapterContext) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn process_data(&self, action: &str, _params: Value) -> Result<Value, AdapterError> {
        Err(AdapterError::UnsupportedAction(action.to_owned()))
    }

    async fn health_check(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn save_state(&self) -> Result<Value, AdapterError> {
        if self.fail_save {
            return Err(AdapterError::Remote("snapshot refused".into()));
        }
        Ok(json!({}))
    }

    async fn restore_state(&self, _state: Value) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn cleanup(&self) -> Result<(), AdapterError> {
        Ok(())
    }
}

fn stubborn_hub() -> Hub {
    let mut factory = AdapterFactory::with_defaults();
    factory.register(IntegrationKind::Webhook, |setup: AdapterSetup<'_>| {
        let fail_save = setup
            .config
            .get("failSave")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        Ok(Arc::new(Stubborn { fail_save }) as Arc<dyn Adapter>)
    });
    Hub::with_factory(HubConfig::default(), factory).unwrap()
}

// ── Validation and locking ──────────────────────────────────────────

#[tokio::test]
async fn test_unknown_integration() {
    let (_hub, manager) = setup().await;
    let err = manager
        .deintegrate(Uuid::new_v4(), opts(DeintegrationPolicy::Immediate))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NotFound { .. }));
}

#[tokio::test]
async fn test_single_flight_per_integration() {
    let (hub, manager) = setup().await;
    let id = hub.register(echo("held")).await.unwrap().integration_id;

    let first = manager
        .deintegrate(id, opts(DeintegrationPolicy::Manual))
        .await
        .unwrap();
    assert_eq!(first.status, RecordStatus::Pending);

    let second = manager
        .deintegrate(id, opts(DeintegrationPolicy::Immediate))
        .await
        .unwrap_err();
    assert!(matches!(second, CoreError::AlreadyDeintegrating { .. }));

    let integration = hub.get_integration(id).await.unwrap();
    assert_eq!(integration.status, IntegrationStatus::Deintegrating);
    assert!(matches!(
        hub.execute(id, "echo", json!({})).await,
        Err(CoreError::NotActive { .. })
    ));
}

#[tokio::test]
async fn test_forced_call_supersedes_manual_hold() {
    let (hub, manager) = setup().await;
    let id = hub.register(echo("held")).await.unwrap().integration_id;

    let parked = manager
        .deintegrate(id, opts(DeintegrationPolicy::Manual))
        .await
        .unwrap();
    let forced = manager
        .deintegrate(id, opts(DeintegrationPolicy::Immediate).force(true))
        .await
        .unwrap();
    assert_eq!(forced.status, RecordStatus::Completed);
    assert!(!hub.contains(id));

    let old = manager.get_record(parked.id).await.unwrap();
    assert_eq!(old.status, RecordStatus::Failed);
    assert_eq!(
        old.error.as_deref(),
        Some("superseded by forced de-integration")
    );
}

#[tokio::test]
async fn test_deregister_refused_during_manual_hold() {
    let (hub, manager) = setup().await;
    let service = |name: &str| {
        RegistrationRequest::new(
            name,
            IntegrationKind::ApiService,
            json!({
                "apiUrl": "http://localhost",
                "autoDetectPort": true,
                "skipHealthCheck": true,
                "healthCheckInterval": 0,
                "portRange": { "min": 47100, "max": 47140 },
            }),
        )
    };
    let outcome = hub.register(service("held-svc")).await.unwrap();
    let id = outcome.integration_id;
    let port = outcome.port.unwrap().resolved_port;

    let parked = manager
        .deintegrate(id, opts(DeintegrationPolicy::Manual))
        .await
        .unwrap();
    assert!(matches!(
        hub.deregister(id, false).await,
        Err(CoreError::AlreadyDeintegrating { .. })
    ));
    assert!(hub.contains(id));
    assert!(hub.ports().is_reserved(port).await);

    let done = manager.confirm_manual_cleanup(parked.id).await.unwrap();
    assert_eq!(done.status, RecordStatus::Completed);
    assert!(!hub.ports().is_reserved(port).await);

    // A newcomer's reservation is not touched by the finished teardown.
    let next = hub.register(service("next-svc")).await.unwrap();
    let next_port = next.port.unwrap().resolved_port;
    assert!(hub.ports().is_reserved(next_port).await);
    assert!(matches!(
        hub.deregister(id, false).await,
        Err(CoreError::NotFound { .. })
    ));
    assert!(hub.ports().is_reserved(next_port).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_deintegrations_yield_one_record() {
    let (hub, manager) = setup().await;
    let id = hub.register(echo("raced")).await.unwrap().integration_id;

    let calls: Vec<_> = (0..8)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .deintegrate(id, opts(DeintegrationPolicy::Immediate))
                    .await
            })
        })
        .collect();

    let mut won = 0;
    for call in calls {
        match call.await.unwrap() {
            Ok(summary) => {
                assert_eq!(summary.status, RecordStatus::Completed);
                won += 1;
            }
            // Late arrivals find the entry already gone.
            Err(CoreError::AlreadyDeintegrating { .. } | CoreError::NotFound { .. }) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(won, 1);
    let records = manager.list_records().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, RecordStatus::Completed);
    assert!(!hub.contains(id));
}

#[tokio::test]
async fn test_dependents_block_unless_forced() {
    let (hub, manager) = setup().await;
    let a = hub.register(echo("a")).await.unwrap().integration_id;
    let b = hub
        .register(echo("b").depends_on("a"))
        .await
        .unwrap()
        .integration_id;
    let mut events = hub.subscribe();

    let err = manager
        .deintegrate(a, opts(DeintegrationPolicy::Immediate))
        .await
        .unwrap_err();
    match err {
        CoreError::HasDependents { dependents, .. } => assert_eq!(dependents, vec![b]),
        other => panic!("expected HasDependents, got {other:?}"),
    }
    assert_eq!(hub.get_integration(a).await.unwrap().status, IntegrationStatus::Active);

    let summary = manager
        .deintegrate(a, opts(DeintegrationPolicy::Immediate).force(true))
        .await
        .unwrap();
    assert_eq!(summary.status, RecordStatus::Completed);

    let mut notified = false;
    while let Ok(event) = events.try_recv() {
        if event.kind == kinds::DEPENDENCY_REMOVAL_PENDING {
            assert_eq!(event.integration_id, Some(b));
            assert_eq!(event.payload["dependencyId"], json!(a));
            notified = true;
        }
    }
    assert!(notified, "dependent was not notified");

    let record = manager.get_record(summary.id).await.unwrap();
    assert_eq!(record.notified_dependents, vec![b]);
    assert!(hub.contains(b));
    assert!(hub.get_integration(b).await.unwrap().dependencies.contains(&a));
}

#[tokio::test]
async fn test_in_flight_operations_block_unless_forced() {
    let (hub, manager) = setup().await;
    hub.plugins()
        .register("sleeper", || Arc::new(Sleeper) as Arc<dyn PluginModule>);
    let id = hub
        .register(RegistrationRequest::new(
            "slow",
            IntegrationKind::Plugin,
            json!({ "module": "sleeper" }),
        ))
        .await
        .unwrap()
        .integration_id;

    let worker = {
        let hub = hub.clone();
        tokio::spawn(async move { hub.execute(id, "sleep", json!({ "ms": 300 })).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = manager
        .deintegrate(id, opts(DeintegrationPolicy::Graceful))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::OperationsInProgress { count: 1, .. }));

    let summary = manager
        .deintegrate(id, opts(DeintegrationPolicy::Graceful).force(true))
        .await
        .unwrap();
    assert_eq!(summary.status, RecordStatus::Running);

    // The in-flight call finishes before cleanup runs.
    assert_eq!(worker.await.unwrap().unwrap(), json!({ "slept": 300 }));

    let record = wait_for_record(&manager, summary.id, RecordStatus::Completed).await;
    let wait = record.step(steps::POLICY_WAIT).unwrap();
    assert_eq!(wait.detail.as_deref(), Some("drained"));
    assert!(!hub.contains(id));
}

#[tokio::test]
async fn test_grace_period_elapses_with_operation_in_flight() {
    let hub = Hub::new(HubConfig {
        drain_timeout: Duration::from_millis(100),
        drain_poll_interval: Duration::from_millis(10),
        ..HubConfig::default()
    })
    .unwrap();
    let manager = DeintegrationManager::new(hub.clone());
    hub.plugins()
        .register("sleeper", || Arc::new(Sleeper) as Arc<dyn PluginModule>);
    let id = hub
        .register(RegistrationRequest::new(
            "stuck",
            IntegrationKind::Plugin,
            json!({ "module": "sleeper" }),
        ))
        .await
        .unwrap()
        .integration_id;

    let worker = {
        let hub = hub.clone();
        tokio::spawn(async move { hub.execute(id, "sleep", json!({ "ms": 2000 })).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let summary = manager
        .deintegrate(id, opts(DeintegrationPolicy::Graceful).force(true))
        .await
        .unwrap();
    let record = wait_for_record(&manager, summary.id, RecordStatus::Completed).await;
    let wait = record.step(steps::POLICY_WAIT).unwrap();
    assert_eq!(wait.status, StepStatus::Completed);
    assert_eq!(
        wait.detail.as_deref(),
        Some("grace period elapsed with 1 operation(s) in flight")
    );
    assert!(!worker.is_finished());
    assert!(!hub.contains(id));
    worker.abort();
}

// ── Manual policy ───────────────────────────────────────────────────

#[tokio::test]
async fn test_manual_waits_for_confirmation() {
    let (hub, manager) = setup().await;
    let id = hub.register(echo("manual")).await.unwrap().integration_id;

    let summary = manager
        .deintegrate(id, opts(DeintegrationPolicy::Manual).preserve_data(true))
        .await
        .unwrap();
    assert_eq!(summary.status, RecordStatus::Pending);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let record = manager.get_record(summary.id).await.unwrap();
    assert_eq!(record.status, RecordStatus::Pending);
    assert_eq!(
        record.step(steps::POLICY_WAIT).unwrap().status,
        StepStatus::Pending
    );
    assert!(hub.contains(id));

    let done = manager.confirm_manual_cleanup(summary.id).await.unwrap();
    assert_eq!(done.status, RecordStatus::Completed);
    assert!(done.is_restorable());
    assert!(!hub.contains(id));

    assert!(matches!(
        manager.confirm_manual_cleanup(summary.id).await,
        Err(CoreError::NotPendingManual { .. })
    ));
}

// ── Preservation and reintegration ──────────────────────────────────

#[tokio::test]
async fn test_preserve_and_reintegrate() {
    let (hub, manager) = setup().await;
    let request = echo("keeper").with_metadata(json!({ "owner": "ops" }));
    let id = hub.register(request).await.unwrap().integration_id;
    for n in 0..3 {
        hub.execute(id, "echo", json!({ "n": n })).await.unwrap();
    }

    let summary = manager
        .deintegrate(id, opts(DeintegrationPolicy::Immediate).preserve_data(true))
        .await
        .unwrap();
    let record = manager.get_record(summary.id).await.unwrap();
    let saved = record.saved_state.clone().unwrap();
    assert_eq!(saved.config, json!({ "module": "echo" }));
    assert_eq!(saved.adapter_state, json!({ "calls": 3 }));
    assert_eq!(saved.metadata, json!({ "owner": "ops" }));

    let restored = manager.reintegrate(summary.id).await.unwrap();
    assert_ne!(restored.integration_id, id);
    assert_eq!(restored.status, IntegrationStatus::Active);
    let integration = hub.get_integration(restored.integration_id).await.unwrap();
    assert_eq!(integration.name, "keeper");
    assert_eq!(integration.metadata, json!({ "owner": "ops" }));

    // The name is live again, so a second restore collides.
    assert!(matches!(
        manager.reintegrate(summary.id).await,
        Err(CoreError::DuplicateName { .. })
    ));

    hub.execute(restored.integration_id, "echo", json!({})).await.unwrap();
    let again = manager
        .deintegrate(
            restored.integration_id,
            opts(DeintegrationPolicy::Immediate).preserve_data(true),
        )
        .await
        .unwrap();
    let second = manager.get_record(again.id).await.unwrap();
    assert_eq!(
        second.saved_state.unwrap().adapter_state,
        json!({ "calls": 4 })
    );

    let third = manager.reintegrate(summary.id).await.unwrap();
    assert_ne!(third.integration_id, restored.integration_id);
}

#[tokio::test]
async fn test_reintegrate_drops_missing_dependencies() {
    let (hub, manager) = setup().await;
    let base = hub.register(echo("base")).await.unwrap().integration_id;
    let child = hub
        .register(echo("child").depends_on("base"))
        .await
        .unwrap()
        .integration_id;

    let summary = manager
        .deintegrate(child, opts(DeintegrationPolicy::Immediate).preserve_data(true))
        .await
        .unwrap();
    manager
        .deintegrate(base, opts(DeintegrationPolicy::Immediate))
        .await
        .unwrap();

    let restored = manager.reintegrate(summary.id).await.unwrap();
    let integration = hub.get_integration(restored.integration_id).await.unwrap();
    assert!(integration.dependencies.is_empty());
}

#[tokio::test]
async fn test_same_module_integrations_keep_separate_state() {
    let (hub, manager) = setup().await;
    let left = hub.register(echo("left")).await.unwrap().integration_id;
    let right = hub.register(echo("right")).await.unwrap().integration_id;
    hub.execute(left, "echo", json!({})).await.unwrap();
    hub.execute(left, "echo", json!({})).await.unwrap();
    hub.execute(right, "echo", json!({})).await.unwrap();

    let mut saved = Vec::new();
    for id in [left, right] {
        let summary = manager
            .deintegrate(id, opts(DeintegrationPolicy::Immediate).preserve_data(true))
            .await
            .unwrap();
        let record = manager.get_record(summary.id).await.unwrap();
        saved.push(record.saved_state.unwrap().adapter_state);
    }
    assert_eq!(saved, vec![json!({ "calls": 2 }), json!({ "calls": 1 })]);
}

// ── Failure and verification ────────────────────────────────────────

#[tokio::test]
async fn test_cleanup_verification_flagged() {
    let hub = stubborn_hub();
    let manager = DeintegrationManager::new(hub.clone());
    let id = hub
        .register(RegistrationRequest::new("sticky", IntegrationKind::Webhook, json!({})))
        .await
        .unwrap()
        .integration_id;

    let summary = manager
        .deintegrate(id, opts(DeintegrationPolicy::Immediate))
        .await
        .unwrap();
    assert_eq!(summary.status, RecordStatus::Completed);
    let record = manager.get_record(summary.id).await.unwrap();
    assert!(record.cleanup_verification_failed);
    assert!(!hub.contains(id));
}

#[tokio::test]
async fn test_closed_adapter_passes_cleanup_verification() {
    let (hub, manager) = setup().await;
    let id = hub.register(echo("closed")).await.unwrap().integration_id;

    let summary = manager
        .deintegrate(id, opts(DeintegrationPolicy::Immediate))
        .await
        .unwrap();
    let record = manager.get_record(summary.id).await.unwrap();
    assert!(!record.cleanup_verification_failed);
    let verify = record.step(steps::VERIFY_CLEANUP).unwrap();
    assert_eq!(verify.status, StepStatus::Completed);
    assert_eq!(verify.detail, None);
}

#[tokio::test]
async fn test_failed_step_leaves_integration_failed() {
    let hub = stubborn_hub();
    let manager = DeintegrationManager::new(hub.clone());
    let id = hub
        .register(RegistrationRequest::new(
            "brittle",
            IntegrationKind::Webhook,
            json!({ "failSave": true }),
        ))
        .await
        .unwrap()
        .integration_id;

    let summary = manager
        .deintegrate(id, opts(DeintegrationPolicy::Immediate).preserve_data(true))
        .await
        .unwrap();
    assert_eq!(summary.status, RecordStatus::Failed);

    let record = manager.get_record(summary.id).await.unwrap();
    assert_eq!(
        record.step(steps::SAVE_STATE).unwrap().status,
        StepStatus::Failed
    );
    assert!(record.error.unwrap().contains("snapshot refused"));
    assert_eq!(hub.get_integration(id).await.unwrap().status, IntegrationStatus::Failed);

    // The lock is released; a retry without preservation goes through.
    let retry = manager
        .deintegrate(id, opts(DeintegrationPolicy::Immediate))
        .await
        .unwrap();
    assert_eq!(retry.status, RecordStatus::Completed);
}

// ── Durable records ─────────────────────────────────────────────────

#[tokio::test]
async fn test_records_survive_restart() {
    let dir = tempfile::tempdir().unwrap();

    let (done_id, parked_id) = {
        let hub = Hub::new(HubConfig::default()).unwrap();
        let store: Arc<dyn RecordStore> = Arc::new(FileRecordStore::open(dir.path()).await.unwrap());
        let manager = DeintegrationManager::with_store(hub.clone(), store).await.unwrap();

        let kept = hub.register(echo("kept")).await.unwrap().integration_id;
        let held = hub.register(echo("held")).await.unwrap().integration_id;
        let done = manager
            .deintegrate(kept, opts(DeintegrationPolicy::Immediate).preserve_data(true))
            .await
            .unwrap();
        let parked = manager
            .deintegrate(held, opts(DeintegrationPolicy::Manual))
            .await
            .unwrap();
        hub.shutdown().await;
        (done.id, parked.id)
    };

    let hub = Hub::new(HubConfig::default()).unwrap();
    let store: Arc<dyn RecordStore> = Arc::new(FileRecordStore::open(dir.path()).await.unwrap());
    let manager = DeintegrationManager::with_store(hub.clone(), store).await.unwrap();

    let parked = manager.get_record(parked_id).await.unwrap();
    assert_eq!(parked.status, RecordStatus::Failed);
    assert_eq!(parked.error.as_deref(), Some("interrupted by restart"));
    assert_eq!(manager.list_records().await.unwrap().len(), 2);

    let restored = manager.reintegrate(done_id).await.unwrap();
    assert_eq!(hub.lookup("kept"), Some(restored.integration_id));
}
