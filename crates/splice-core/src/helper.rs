// ── Port & health helper ──
//
// Stateless port probing and URL health checks, plus the process-wide
// port reservation set that closes the gap between "port looked free"
// and "adapter actually bound it".

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use splice_api::HealthProbe;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

use crate::config::{PortRange, ProbeOptions};
use crate::error::CoreError;
use crate::model::PortAllocation;

// ── Ports ────────────────────────────────────────────────────────────

/// Point-in-time check: true iff a listener can bind `127.0.0.1:port`.
/// The listener is dropped immediately, so this is not a reservation.
pub async fn is_port_available(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).await.is_ok()
}

/// First available port in `min..=max`, scanning upward.
pub async fn find_available_port_in_range(min: u16, max: u16) -> Result<u16, CoreError> {
    scan(PortRange::new(min, max), &BTreeSet::new()).await
}

async fn scan(range: PortRange, skip: &BTreeSet<u16>) -> Result<u16, CoreError> {
    if range.min > range.max {
        return Err(CoreError::validation(format!(
            "invalid port range {}-{}",
            range.min, range.max
        )));
    }
    for port in range.min..=range.max {
        if skip.contains(&port) {
            continue;
        }
        if is_port_available(port).await {
            return Ok(port);
        }
    }
    Err(CoreError::PortExhausted {
        min: range.min,
        max: range.max,
    })
}

/// Process-wide set of ports handed out to registered integrations.
///
/// All allocation goes through one lock, so two registrations can never
/// be given the same free port.
#[derive(Debug, Default)]
pub struct PortReservations {
    reserved: Mutex<BTreeSet<u16>>,
}

impl PortReservations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve and reserve a port.
    ///
    /// With a requested port that is free, it is kept. With a conflict, or
    /// with no requested port and `auto_detect`, the range is searched.
    /// Returns `None` when there is nothing to resolve.
    pub async fn allocate(
        &self,
        requested: Option<u16>,
        auto_detect: bool,
        range: PortRange,
    ) -> Result<Option<PortAllocation>, CoreError> {
        let mut reserved = self.reserved.lock().await;

        let conflict = match requested {
            Some(port) => {
                if !reserved.contains(&port) && is_port_available(port).await {
                    reserved.insert(port);
                    debug!(port, "requested port is free");
                    return Ok(Some(PortAllocation {
                        requested_port: Some(port),
                        resolved_port: port,
                        conflict: false,
                        search_range: [range.min, range.max],
                    }));
                }
                true
            }
            None if auto_detect => false,
            None => return Ok(None),
        };

        let resolved = scan(range, &reserved).await?;
        reserved.insert(resolved);
        if conflict {
            warn!(requested = ?requested, resolved, "port conflict resolved");
        } else {
            debug!(resolved, "port auto-detected");
        }
        Ok(Some(PortAllocation {
            requested_port: requested,
            resolved_port: resolved,
            conflict,
            search_range: [range.min, range.max],
        }))
    }

    pub async fn release(&self, port: u16) {
        if self.reserved.lock().await.remove(&port) {
            debug!(port, "port released");
        }
    }

    pub async fn is_reserved(&self, port: u16) -> bool {
        self.reserved.lock().await.contains(&port)
    }
}

// ── URLs ─────────────────────────────────────────────────────────────

/// Read `config.port` as a number or numeric string.
pub fn config_port(config: &Value) -> Option<u16> {
    match config.get("port")? {
        Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Base address of a network service: `apiUrl` (or `url`), scheme added if
/// missing, `config.port` substituted, trailing slash stripped.
pub fn build_base_url(config: &Value) -> Result<Url, CoreError> {
    let raw = config
        .get("apiUrl")
        .or_else(|| config.get("url"))
        .and_then(Value::as_str)
        .unwrap_or("http://localhost");
    let with_scheme = if raw.contains("://") {
        raw.to_owned()
    } else {
        format!("http://{raw}")
    };

    let mut url = Url::parse(&with_scheme)
        .map_err(|e| CoreError::validation(format!("invalid apiUrl '{raw}': {e}")))?;
    if let Some(port) = config_port(config) {
        url.set_port(Some(port))
            .map_err(|()| CoreError::validation(format!("cannot set port on '{raw}'")))?;
    }
    let trimmed = url.path().trim_end_matches('/').to_owned();
    url.set_path(&trimmed);
    Ok(url)
}

/// `build_base_url` plus the health path.
pub fn build_health_url(config: &Value, path: &str) -> Result<Url, CoreError> {
    let mut url = build_base_url(config)?;
    let base = url.path().trim_end_matches('/').to_owned();
    url.set_path(&format!("{base}/{}", path.trim_start_matches('/')));
    Ok(url)
}

// ── Health check ─────────────────────────────────────────────────────

/// Result of a retrying URL health check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckOutcome {
    pub success: bool,
    /// HTTP status of the last response, if any arrived.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Attempts made (the successful attempt's number on success).
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

/// Probe `url` up to `options.retries` times. An attempt succeeds on a 2xx
/// within `options.timeout`. After failed attempt `n` the next attempt
/// waits `retry_delay * n`; there is no wait after the last attempt.
pub async fn health_check(probe: &HealthProbe, url: &Url, options: &ProbeOptions) -> HealthCheckOutcome {
    let started = Instant::now();
    let attempts = options.retries.max(1);
    let mut last_status = None;
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        match probe.get(url, options.timeout).await {
            Ok(status) if (200..300).contains(&status) => {
                debug!(%url, attempt, status, "health check passed");
                return HealthCheckOutcome {
                    success: true,
                    status: Some(status),
                    attempts: attempt,
                    error: None,
                    elapsed_ms: elapsed_ms(started),
                };
            }
            Ok(status) => {
                last_status = Some(status);
                last_error = format!("HTTP {status}");
            }
            Err(e) => {
                last_status = None;
                last_error = e.to_string();
            }
        }
        debug!(%url, attempt, error = %last_error, "health check attempt failed");

        if attempt < attempts {
            tokio::time::sleep(options.retry_delay * attempt).await;
        }
    }

    warn!(%url, attempts, error = %last_error, "health check exhausted retries");
    HealthCheckOutcome {
        success: false,
        status: last_status,
        attempts,
        error: Some(last_error),
        elapsed_ms: elapsed_ms(started),
    }
}

pub(crate) fn elapsed_ms(started: Instant) -> u64 {
    duration_ms(started.elapsed())
}

pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use splice_api::TransportConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Three consecutive free ports; the listeners are dropped on return.
    async fn free_triplet() -> u16 {
        let mut base = 40_000;
        loop {
            if is_port_available(base).await
                && is_port_available(base + 1).await
                && is_port_available(base + 2).await
            {
                return base;
            }
            base += 3;
        }
    }

    #[test]
    fn health_url_normalization() {
        let url = build_health_url(&json!({ "apiUrl": "localhost/", "port": 4096 }), "/health")
            .unwrap();
        assert_eq!(url.as_str(), "http://localhost:4096/health");

        let url = build_health_url(&json!({ "apiUrl": "https://svc.local/base/" }), "ready").unwrap();
        assert_eq!(url.as_str(), "https://svc.local/base/ready");

        let url = build_health_url(&json!({}), "health").unwrap();
        assert_eq!(url.as_str(), "http://localhost/health");
    }

    #[test]
    fn port_accepts_numeric_strings() {
        assert_eq!(config_port(&json!({ "port": "8080" })), Some(8080));
        assert_eq!(config_port(&json!({ "port": 70000 })), None);
        assert_eq!(config_port(&json!({})), None);
    }

    #[tokio::test]
    async fn range_scan_skips_occupied_ports() {
        let base = free_triplet().await;
        let _a = std::net::TcpListener::bind(("127.0.0.1", base)).unwrap();
        let _b = std::net::TcpListener::bind(("127.0.0.1", base + 1)).unwrap();

        assert!(!is_port_available(base).await);
        assert_eq!(
            find_available_port_in_range(base, base + 2).await.unwrap(),
            base + 2
        );
    }

    #[tokio::test]
    async fn exhausted_range_fails() {
        let base = free_triplet().await;
        let _held: Vec<_> = (base..=base + 2)
            .map(|p| std::net::TcpListener::bind(("127.0.0.1", p)).unwrap())
            .collect();

        let err = find_available_port_in_range(base, base + 2).await.unwrap_err();
        assert!(matches!(err, CoreError::PortExhausted { .. }));
    }

    #[tokio::test]
    async fn reservations_never_hand_out_a_port_twice() {
        let base = free_triplet().await;
        let range = PortRange::new(base, base + 2);
        let ports = PortReservations::new();

        let first = ports.allocate(None, true, range).await.unwrap().unwrap();
        let second = ports.allocate(None, true, range).await.unwrap().unwrap();
        assert_ne!(first.resolved_port, second.resolved_port);

        // A requested port that is already reserved counts as a conflict.
        let third = ports
            .allocate(Some(first.resolved_port), false, range)
            .await
            .unwrap()
            .unwrap();
        assert!(third.conflict);
        assert_eq!(third.resolved_port, base + 2);

        ports.release(first.resolved_port).await;
        assert!(!ports.is_reserved(first.resolved_port).await);
    }

    #[tokio::test]
    async fn nothing_to_resolve_without_port_or_auto_detect() {
        let ports = PortReservations::new();
        let alloc = ports.allocate(None, false, PortRange::default()).await.unwrap();
        assert!(alloc.is_none());
    }

    #[tokio::test]
    async fn health_check_retries_with_linear_backoff() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let probe = HealthProbe::new(&TransportConfig::default()).unwrap();
        let url = Url::parse(&format!("{}/health", server.uri())).unwrap();
        let options = ProbeOptions {
            timeout: Duration::from_secs(1),
            retries: 3,
            retry_delay: Duration::from_millis(100),
        };

        let started = Instant::now();
        let outcome = health_check(&probe, &url, &options).await;
        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.status, Some(503));
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn health_check_reports_successful_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let probe = HealthProbe::new(&TransportConfig::default()).unwrap();
        let url = Url::parse(&format!("{}/health", server.uri())).unwrap();
        let outcome = health_check(&probe, &url, &ProbeOptions::default()).await;
        assert!(outcome.success);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.status, Some(204));
    }
}
