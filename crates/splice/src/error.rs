//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use splice_config::ConfigError;
use splice_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const CONFLICT: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Resources ────────────────────────────────────────────────────

    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(
        code(splice::not_found),
        help("Run: splice {list_command} to see what exists")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
        list_command: String,
    },

    #[error("{message}")]
    #[diagnostic(code(splice::conflict))]
    Conflict { code: String, message: String },

    // ── Services ─────────────────────────────────────────────────────

    #[error("{url} did not become healthy after {attempts} attempt(s)")]
    #[diagnostic(
        code(splice::unhealthy),
        help("Last error: {reason}\nRaise --retries or --timeout, or check that the service is up.")
    )]
    Unhealthy {
        url: String,
        attempts: u32,
        reason: String,
    },

    #[error("Upstream failure: {message}")]
    #[diagnostic(code(splice::upstream))]
    Upstream { message: String },

    #[error("Timed out after {timeout_ms}ms during {operation}")]
    #[diagnostic(code(splice::timeout))]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("No free port in {min}-{max}")]
    #[diagnostic(
        code(splice::ports_exhausted),
        help("Widen the range with --min/--max or free a port.")
    )]
    PortsExhausted { min: u16, max: u16 },

    // ── Validation ───────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(splice::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error(transparent)]
    #[diagnostic(
        code(splice::config),
        help("Check the settings file (splice config path) and SPLICE_* variables.")
    )]
    Config(#[from] ConfigError),

    // ── Internal / IO ────────────────────────────────────────────────

    #[error("{message}")]
    #[diagnostic(code(splice::internal))]
    Internal { code: String, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Conflict { .. } => exit_code::CONFLICT,
            Self::Unhealthy { .. } | Self::Upstream { .. } => exit_code::CONNECTION,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::Config(_) => exit_code::USAGE,
            Self::PortsExhausted { .. } | Self::Internal { .. } | Self::Io(_) => {
                exit_code::GENERAL
            }
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound { entity, id } => CliError::NotFound {
                list_command: if entity.contains("record") {
                    "records list".into()
                } else {
                    "run --manifest <file>".into()
                },
                resource_type: entity.into(),
                identifier: id,
            },
            CoreError::Validation { message } => CliError::Validation {
                field: "input".into(),
                reason: message,
            },
            CoreError::HealthCheckFailed {
                url,
                attempts,
                reason,
            } => CliError::Unhealthy {
                url,
                attempts,
                reason,
            },
            CoreError::PortExhausted { min, max } => CliError::PortsExhausted { min, max },
            CoreError::Timeout {
                operation,
                timeout_ms,
            } => CliError::Timeout {
                operation,
                timeout_ms,
            },
            other => {
                let code = other.code().to_owned();
                let message = other.to_string();
                match other.http_status() {
                    409 => CliError::Conflict { code, message },
                    502 => CliError::Upstream { message },
                    _ => CliError::Internal { code, message },
                }
            }
        }
    }
}
