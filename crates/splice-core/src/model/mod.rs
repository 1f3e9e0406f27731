// ── Domain model ──

pub mod deintegration;
pub mod integration;
pub mod metrics;

pub use deintegration::{
    DeintegrationOptions, DeintegrationPolicy, DeintegrationRecord, RecordStatus, RecordSummary,
    SavedState, Step, StepStatus, steps,
};
pub use integration::{
    Integration, IntegrationFilter, IntegrationKind, IntegrationList, IntegrationStatus,
    PortAllocation, RegistrationOutcome, RegistrationRequest, TestReport,
};
pub use metrics::{HealthRecord, HealthStatus, IntegrationMetrics, MetricsPeriod};

pub(crate) use metrics::MetricsState;
