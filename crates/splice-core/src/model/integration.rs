// ── Integration domain types ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumIter, EnumString};
use uuid::Uuid;

use super::metrics::HealthStatus;
use crate::adapter::AdapterDescriptor;

/// Integration variant tag. Selects the adapter implementation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum IntegrationKind {
    #[serde(rename = "openapi")]
    #[strum(serialize = "openapi")]
    OpenApi,
    Webhook,
    Plugin,
    Database,
    MessageQueue,
    ApiService,
    WebUi,
    DevelopmentTool,
}

impl IntegrationKind {
    /// Kinds backed by a locally hosted network service: these take part
    /// in port conflict resolution and the registration URL probe.
    pub fn is_network_service(self) -> bool {
        matches!(self, Self::ApiService | Self::WebUi | Self::DevelopmentTool)
    }
}

/// Lifecycle status of an integration.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum IntegrationStatus {
    Registering,
    Active,
    Paused,
    Unhealthy,
    Deintegrating,
    Deintegrated,
    Failed,
}

impl IntegrationStatus {
    /// Whether `self -> next` is a legal edge of the lifecycle state machine.
    pub fn can_transition_to(self, next: Self) -> bool {
        use IntegrationStatus as S;
        matches!(
            (self, next),
            (S::Registering, S::Active | S::Failed)
                | (S::Active, S::Paused | S::Unhealthy | S::Deintegrating)
                | (S::Unhealthy, S::Active | S::Paused | S::Deintegrating)
                | (S::Paused, S::Active | S::Deintegrating)
                | (S::Deintegrating, S::Deintegrated | S::Failed)
                | (S::Failed, S::Deintegrating)
        )
    }

    /// `execute` is accepted only in these states. `unhealthy` is
    /// deliberately not rejected.
    pub fn accepts_execute(self) -> bool {
        matches!(self, Self::Active | Self::Unhealthy)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Deintegrated)
    }
}

/// Port conflict resolution outcome for a network-service integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortAllocation {
    pub requested_port: Option<u16>,
    pub resolved_port: u16,
    pub conflict: bool,
    pub search_range: [u16; 2],
}

/// Input to `Hub::register`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: IntegrationKind,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub metadata: Value,
    /// Integrations this one depends on, by ID or by name.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl RegistrationRequest {
    pub fn new(name: impl Into<String>, kind: IntegrationKind, config: Value) -> Self {
        Self {
            name: name.into(),
            kind,
            config,
            metadata: Value::Null,
            depends_on: Vec::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn depends_on(mut self, reference: impl Into<String>) -> Self {
        self.depends_on.push(reference.into());
        self
    }
}

/// Result of a successful registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationOutcome {
    pub integration_id: Uuid,
    pub status: IntegrationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<PortAllocation>,
}

/// Read-only snapshot of an integration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Integration {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: IntegrationKind,
    pub config: Value,
    pub metadata: Value,
    pub status: IntegrationStatus,
    pub health_status: HealthStatus,
    pub dependents: Vec<Uuid>,
    pub dependencies: Vec<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<PortAllocation>,
    pub descriptor: AdapterDescriptor,
    pub request_count: u64,
    pub error_count: u64,
    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Integration {
    /// Tags from `metadata.tags` (an array of strings).
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.metadata
            .get("tags")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
    }
}

/// Filter for `Hub::list_integrations`. Empty fields match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationFilter {
    #[serde(rename = "type")]
    pub kind: Option<IntegrationKind>,
    pub status: Option<IntegrationStatus>,
    pub tag: Option<String>,
}

impl IntegrationFilter {
    pub fn matches(&self, integration: &Integration) -> bool {
        self.kind.is_none_or(|k| k == integration.kind)
            && self.status.is_none_or(|s| s == integration.status)
            && self
                .tag
                .as_deref()
                .is_none_or(|tag| integration.tags().any(|t| t == tag))
    }
}

/// `listIntegrations` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationList {
    pub integrations: Vec<Integration>,
    pub total: usize,
}

/// Result of an on-demand `Hub::test`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestReport {
    pub success: bool,
    pub message: String,
    pub details: Value,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn kind_names_match_wire_tags() {
        assert_eq!(IntegrationKind::OpenApi.to_string(), "openapi");
        assert_eq!(IntegrationKind::MessageQueue.to_string(), "message-queue");
        assert_eq!(
            IntegrationKind::from_str("development-tool").unwrap(),
            IntegrationKind::DevelopmentTool
        );
        for kind in IntegrationKind::iter() {
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json, Value::String(kind.to_string()));
        }
    }

    #[test]
    fn only_service_kinds_are_network_backed() {
        let network: Vec<_> = IntegrationKind::iter()
            .filter(|k| k.is_network_service())
            .collect();
        assert_eq!(
            network,
            vec![
                IntegrationKind::ApiService,
                IntegrationKind::WebUi,
                IntegrationKind::DevelopmentTool
            ]
        );
    }

    #[test]
    fn deintegrated_is_terminal() {
        for next in IntegrationStatus::iter() {
            assert!(!IntegrationStatus::Deintegrated.can_transition_to(next));
        }
    }

    #[test]
    fn pause_and_resume_edges() {
        use IntegrationStatus as S;
        assert!(S::Active.can_transition_to(S::Paused));
        assert!(S::Paused.can_transition_to(S::Active));
        assert!(!S::Paused.can_transition_to(S::Unhealthy));
        assert!(!S::Registering.can_transition_to(S::Paused));
        assert!(!S::Deintegrating.can_transition_to(S::Active));
    }

    #[test]
    fn unhealthy_still_accepts_execute() {
        assert!(IntegrationStatus::Unhealthy.accepts_execute());
        assert!(!IntegrationStatus::Paused.accepts_execute());
        assert!(!IntegrationStatus::Deintegrating.accepts_execute());
    }

    #[test]
    fn registration_request_uses_type_key() {
        let req: RegistrationRequest = serde_json::from_value(serde_json::json!({
            "name": "svc-a",
            "type": "api-service",
            "config": { "apiUrl": "http://localhost" },
            "dependsOn": ["db"]
        }))
        .unwrap();
        assert_eq!(req.kind, IntegrationKind::ApiService);
        assert_eq!(req.depends_on, vec!["db"]);
        assert!(req.metadata.is_null());
    }
}
