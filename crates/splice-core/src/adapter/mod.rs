// ── Adapter abstraction ──
//
// One implementation per integration kind behind the `Adapter` trait.
// The hub owns each adapter through an `Arc<dyn Adapter>` and calls it
// concurrently from `execute`, the health loop, and teardown, so every
// method takes `&self` and adapters keep their own interior state.

pub mod database;
pub mod message_queue;
pub mod openapi;
pub mod plugin;
pub mod service;
pub mod webhook;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use splice_api::TransportConfig;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::model::IntegrationKind;

pub use plugin::{PluginContext, PluginDescriptor, PluginModule, PluginRegistry};

// ── Errors ───────────────────────────────────────────────────────────

/// Failures reported by adapters. The hub maps these onto `CoreError`.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid specification: {0}")]
    InvalidSpecification(String),

    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error("webhook signature verification failed")]
    InvalidSignature,

    #[error("unsupported action: {0}")]
    UnsupportedAction(String),

    #[error("adapter not initialized")]
    NotInitialized,

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("remote error: {0}")]
    Remote(String),
}

impl From<splice_api::Error> for AdapterError {
    fn from(err: splice_api::Error) -> Self {
        match err {
            splice_api::Error::InvalidSpecification(msg) => Self::InvalidSpecification(msg),
            splice_api::Error::UnknownOperation(op) => Self::UnsupportedAction(op),
            e @ splice_api::Error::MissingParameter { .. } => Self::InvalidParams(e.to_string()),
            e @ (splice_api::Error::InvalidUrl(_) | splice_api::Error::Tls(_)) => {
                Self::InvalidConfig(e.to_string())
            }
            other => Self::Remote(other.to_string()),
        }
    }
}

// ── Events ───────────────────────────────────────────────────────────

/// An adapter-originated event (inbound webhook, queue message, plugin push).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterEvent {
    pub topic: String,
    pub payload: Value,
}

impl AdapterEvent {
    pub fn new(topic: impl Into<String>, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            payload,
        }
    }
}

/// Per-integration inbound channel; the hub drains it onto the event bus.
pub type AdapterEventSender = mpsc::UnboundedSender<AdapterEvent>;

/// Handed to `Adapter::init`.
#[derive(Debug, Clone)]
pub struct AdapterContext {
    pub integration_id: Uuid,
    pub name: String,
    pub events: AdapterEventSender,
}

impl AdapterContext {
    /// Emit an event; silently dropped once the hub stops draining.
    pub fn emit(&self, topic: impl Into<String>, payload: Value) {
        let _ = self.events.send(AdapterEvent::new(topic, payload));
    }
}

// ── Descriptor ───────────────────────────────────────────────────────

/// Capability descriptor for introspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterDescriptor {
    #[serde(rename = "type")]
    pub kind: IntegrationKind,
    pub actions: Vec<String>,
    pub features: Vec<String>,
}

impl AdapterDescriptor {
    pub fn new(kind: IntegrationKind, actions: &[&str], features: &[&str]) -> Self {
        Self {
            kind,
            actions: actions.iter().map(|&a| a.to_owned()).collect(),
            features: features.iter().map(|&f| f.to_owned()).collect(),
        }
    }
}

// ── Trait ────────────────────────────────────────────────────────────

#[async_trait]
pub trait Adapter: Send + Sync {
    fn kind(&self) -> IntegrationKind;

    fn descriptor(&self) -> AdapterDescriptor;

    /// Connect or load. Called once, before the integration turns active.
    async fn init(&self, ctx: AdapterContext) -> Result<(), AdapterError>;

    /// Handle one `execute` call. The result is returned to the caller as-is.
    async fn process_data(&self, action: &str, params: Value) -> Result<Value, AdapterError>;

    /// `Ok` means healthy. Also called once after [`cleanup`](Self::cleanup)
    /// to verify teardown; the built-in adapters answer that call from
    /// their own closed flag without contacting the remote side.
    async fn health_check(&self) -> Result<(), AdapterError>;

    /// Serializable runtime state for reintegration.
    async fn save_state(&self) -> Result<Value, AdapterError>;

    async fn restore_state(&self, state: Value) -> Result<(), AdapterError>;

    /// Release resources. Best-effort from the caller's point of view.
    async fn cleanup(&self) -> Result<(), AdapterError>;
}

// ── Factory ──────────────────────────────────────────────────────────

/// Inputs to an adapter constructor.
#[derive(Clone, Copy)]
pub struct AdapterSetup<'a> {
    pub config: &'a Value,
    pub transport: &'a TransportConfig,
    pub plugins: &'a PluginRegistry,
}

pub type AdapterConstructor =
    Arc<dyn Fn(AdapterSetup<'_>) -> Result<Arc<dyn Adapter>, AdapterError> + Send + Sync>;

/// Maps integration kinds to constructors.
///
/// Constructors only validate configuration and build clients; network
/// work happens in `Adapter::init`.
#[derive(Clone)]
pub struct AdapterFactory {
    constructors: HashMap<IntegrationKind, AdapterConstructor>,
    plugins: Arc<PluginRegistry>,
}

impl AdapterFactory {
    /// Factory with the built-in adapter for every kind.
    pub fn with_defaults() -> Self {
        let mut factory = Self {
            constructors: HashMap::new(),
            plugins: Arc::new(PluginRegistry::new()),
        };
        factory.register(IntegrationKind::OpenApi, openapi::create);
        factory.register(IntegrationKind::Webhook, webhook::create);
        factory.register(IntegrationKind::Plugin, plugin::create);
        factory.register(IntegrationKind::Database, database::create);
        factory.register(IntegrationKind::MessageQueue, message_queue::create);
        for kind in [
            IntegrationKind::ApiService,
            IntegrationKind::WebUi,
            IntegrationKind::DevelopmentTool,
        ] {
            factory.register(kind, move |setup: AdapterSetup<'_>| {
                service::create(kind, setup)
            });
        }
        factory
    }

    /// Add or replace the constructor for `kind`.
    pub fn register<F>(&mut self, kind: IntegrationKind, constructor: F)
    where
        F: Fn(AdapterSetup<'_>) -> Result<Arc<dyn Adapter>, AdapterError> + Send + Sync + 'static,
    {
        self.constructors.insert(kind, Arc::new(constructor));
    }

    pub fn plugins(&self) -> &Arc<PluginRegistry> {
        &self.plugins
    }

    pub fn create(
        &self,
        kind: IntegrationKind,
        config: &Value,
        transport: &TransportConfig,
    ) -> Result<Arc<dyn Adapter>, AdapterError> {
        let constructor = self.constructors.get(&kind).ok_or_else(|| {
            AdapterError::InvalidConfig(format!("no adapter registered for type '{kind}'"))
        })?;
        constructor(AdapterSetup {
            config,
            transport,
            plugins: &self.plugins,
        })
    }
}

impl Default for AdapterFactory {
    fn default() -> Self {
        Self::with_defaults()
    }
}

// ── Config accessors ─────────────────────────────────────────────────

pub(crate) fn config_str<'a>(config: &'a Value, key: &str) -> Option<&'a str> {
    config.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

pub(crate) fn require_str<'a>(config: &'a Value, key: &str) -> Result<&'a str, AdapterError> {
    config_str(config, key)
        .ok_or_else(|| AdapterError::InvalidConfig(format!("missing required field '{key}'")))
}

pub(crate) fn param_str<'a>(params: &'a Value, key: &str) -> Result<&'a str, AdapterError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| AdapterError::InvalidParams(format!("missing string parameter '{key}'")))
}

pub(crate) fn config_bool(config: &Value, key: &str) -> bool {
    config.get(key).and_then(Value::as_bool).unwrap_or(false)
}
