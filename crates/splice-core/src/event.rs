// ── Lifecycle event bus ──
//
// Broadcast channel of JSON envelopes. The hub and the de-integration
// manager publish here; adapter-originated events are drained onto the
// same bus in arrival order.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Event kinds published by the hub and manager.
pub mod kinds {
    pub const CREATED: &str = "integration.created";
    pub const UPDATED: &str = "integration.updated";
    pub const UNHEALTHY: &str = "integration.unhealthy";
    pub const DEREGISTERED: &str = "integration.deregistered";
    pub const DEINTEGRATION_STARTED: &str = "integration.deintegration.started";
    pub const DEINTEGRATION_COMPLETED: &str = "integration.deintegration.completed";
    pub const DEINTEGRATION_FAILED: &str = "integration.deintegration.failed";
    /// Published once per dependent, addressed to the dependent's ID.
    pub const DEPENDENCY_REMOVAL_PENDING: &str = "integration.dependency.removal_pending";
}

/// Event envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub time: DateTime<Utc>,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub integration_id: Option<Uuid>,
    pub payload: Value,
}

/// Cheaply cloneable broadcast bus.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Arc<Envelope>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Envelope>> {
        self.tx.subscribe()
    }

    /// Publish an event. Returns the number of live subscribers.
    pub fn publish(&self, kind: &str, integration_id: Option<Uuid>, payload: Value) -> usize {
        tracing::trace!(kind, ?integration_id, "event");
        self.tx
            .send(Arc::new(Envelope {
                time: Utc::now(),
                kind: kind.to_owned(),
                integration_id,
                payload,
            }))
            .unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
