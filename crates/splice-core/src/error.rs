// ── Core error types ──
//
// Domain errors surfaced by the hub and the de-integration manager.
// Every variant maps to a stable code and an HTTP status so a router
// layer can render it without inspecting the message. Wire-level
// failures from `splice_api` are translated by the `From` impls below.

use thiserror::Error;
use uuid::Uuid;

use crate::adapter::AdapterError;
use crate::model::IntegrationStatus;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Request errors ───────────────────────────────────────────────
    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("An integration named '{name}' is already registered")]
    DuplicateName { name: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Integration {id} is not active (status: {status})")]
    NotActive { id: Uuid, status: IntegrationStatus },

    // ── Registration errors ──────────────────────────────────────────
    #[error("Health check failed for {url} after {attempts} attempt(s): {reason}")]
    HealthCheckFailed {
        url: String,
        attempts: u32,
        reason: String,
    },

    #[error("No available port in range {min}-{max}")]
    PortExhausted { min: u16, max: u16 },

    #[error("Webhook signature verification failed")]
    InvalidSignature,

    // ── De-integration errors ────────────────────────────────────────
    #[error("Integration {id} has {} dependent(s); pass force to override", .dependents.len())]
    HasDependents { id: Uuid, dependents: Vec<Uuid> },

    #[error("Integration {id} has {count} operation(s) in progress; pass force to override")]
    OperationsInProgress { id: Uuid, count: usize },

    #[error("Integration {id} is already being de-integrated")]
    AlreadyDeintegrating { id: Uuid },

    #[error("De-integration record {record_id} has no saved state to restore")]
    NoSavedState { record_id: Uuid },

    #[error("De-integration record {record_id} is not waiting for manual confirmation")]
    NotPendingManual { record_id: Uuid },

    // ── Adapter errors (opaque passthrough) ──────────────────────────
    #[error("Adapter error: {message}")]
    Adapter { message: String },

    // ── Infrastructure errors ────────────────────────────────────────
    #[error("Record store error: {message}")]
    Storage { message: String },

    #[error("Timed out after {timeout_ms}ms waiting for {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Stable, machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation_error",
            Self::DuplicateName { .. } => "duplicate_name",
            Self::NotFound { .. } => "not_found",
            Self::NotActive { .. } => "not_active",
            Self::HealthCheckFailed { .. } => "health_check_failed",
            Self::PortExhausted { .. } => "port_exhausted",
            Self::InvalidSignature => "invalid_signature",
            Self::HasDependents { .. } => "has_dependents",
            Self::OperationsInProgress { .. } => "operations_in_progress",
            Self::AlreadyDeintegrating { .. } => "already_deintegrating",
            Self::NoSavedState { .. } => "no_saved_state",
            Self::NotPendingManual { .. } => "not_pending_manual",
            Self::Adapter { .. } => "adapter_error",
            Self::Storage { .. } => "storage_error",
            Self::Timeout { .. } => "timeout",
            Self::Internal(_) => "internal_error",
        }
    }

    /// HTTP status a router should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation { .. } => 400,
            Self::InvalidSignature => 401,
            Self::NotFound { .. } => 404,
            Self::DuplicateName { .. }
            | Self::NotActive { .. }
            | Self::HasDependents { .. }
            | Self::OperationsInProgress { .. }
            | Self::AlreadyDeintegrating { .. }
            | Self::NoSavedState { .. }
            | Self::NotPendingManual { .. } => 409,
            Self::HealthCheckFailed { .. } | Self::Adapter { .. } => 502,
            Self::PortExhausted { .. } => 503,
            Self::Timeout { .. } => 504,
            Self::Storage { .. } | Self::Internal(_) => 500,
        }
    }

    /// Structured detail a caller can act on (e.g. decide to pass `force`).
    pub fn details(&self) -> serde_json::Value {
        match self {
            Self::HasDependents { dependents, .. } => serde_json::json!({ "dependents": dependents }),
            Self::OperationsInProgress { count, .. } => serde_json::json!({ "operations": count }),
            Self::HealthCheckFailed { attempts, url, .. } => {
                serde_json::json!({ "url": url, "attempts": attempts })
            }
            Self::PortExhausted { min, max } => serde_json::json!({ "range": [min, max] }),
            _ => serde_json::Value::Null,
        }
    }
}

// ── Conversion from adapter errors ───────────────────────────────────

impl From<AdapterError> for CoreError {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::InvalidConfig(message)
            | AdapterError::InvalidSpecification(message)
            | AdapterError::InvalidParams(message) => CoreError::Validation { message },
            AdapterError::UnsupportedAction(action) => CoreError::Validation {
                message: format!("unsupported action '{action}'"),
            },
            AdapterError::InvalidSignature => CoreError::InvalidSignature,
            other => CoreError::Adapter {
                message: other.to_string(),
            },
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<splice_api::Error> for CoreError {
    fn from(err: splice_api::Error) -> Self {
        match err {
            splice_api::Error::InvalidUrl(e) => CoreError::Validation {
                message: format!("invalid URL: {e}"),
            },
            splice_api::Error::InvalidSpecification(message) => CoreError::Validation { message },
            splice_api::Error::Timeout { timeout_ms } => CoreError::Timeout {
                operation: "remote call".into(),
                timeout_ms,
            },
            splice_api::Error::Tls(message) => CoreError::Validation {
                message: format!("TLS configuration: {message}"),
            },
            other => CoreError::Adapter {
                message: other.to_string(),
            },
        }
    }
}
