//! Integration lifecycle engine for splice.
//!
//! - **[`Hub`]**: the registry. [`register()`](Hub::register) validates a
//!   request, resolves port conflicts for network-service kinds, probes the
//!   service, initializes its adapter and starts a per-integration health
//!   loop. [`execute()`](Hub::execute) dispatches actions to adapters and
//!   keeps request/error metrics.
//!
//! - **[`DeintegrationManager`]**: policy-driven teardown (`immediate`,
//!   `graceful`, `scheduled`, `manual`) with a single-flight lock per
//!   integration, optional state preservation and
//!   [`reintegrate()`](DeintegrationManager::reintegrate).
//!
//! - **Adapters** ([`adapter`]): one [`Adapter`] implementation per
//!   integration kind, built by the [`AdapterFactory`]. Plugins are linked
//!   in through [`PluginDescriptor`] or registered at runtime.
//!
//! - **Records** ([`store`]): de-integration records persist through a
//!   [`RecordStore`]; [`FileRecordStore`] survives restarts.
//!
//! Lifecycle events fan out on the hub's [`EventBus`].

pub mod adapter;
pub mod config;
pub mod deintegration;
pub mod error;
pub mod event;
pub mod helper;
pub mod hub;
pub mod model;
pub mod store;

// ── Primary re-exports ──────────────────────────────────────────────
pub use adapter::{
    Adapter, AdapterContext, AdapterDescriptor, AdapterError, AdapterEvent, AdapterFactory,
    AdapterSetup, PluginContext, PluginDescriptor, PluginModule, PluginRegistry,
};
pub use config::{HubConfig, PortRange, ProbeOptions};
pub use deintegration::DeintegrationManager;
pub use error::CoreError;
pub use event::{Envelope, EventBus, kinds};
pub use hub::Hub;
pub use store::{FileRecordStore, MemoryRecordStore, RecordStore};

pub use model::{
    DeintegrationOptions, DeintegrationPolicy, DeintegrationRecord, HealthRecord, HealthStatus,
    Integration, IntegrationFilter, IntegrationKind, IntegrationList, IntegrationMetrics,
    IntegrationStatus, MetricsPeriod, PortAllocation, RecordStatus, RecordSummary,
    RegistrationOutcome, RegistrationRequest, SavedState, Step, StepStatus, TestReport,
};
