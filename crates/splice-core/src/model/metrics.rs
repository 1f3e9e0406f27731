// ── Health and metrics types ──

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Health derived from the most recent probes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    Unknown,
    Healthy,
    /// Latest probe failed, threshold not yet reached.
    Degraded,
    Unhealthy,
}

/// One health-check outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthRecord {
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregation window for `Hub::metrics`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
pub enum MetricsPeriod {
    #[serde(rename = "1h")]
    #[strum(serialize = "1h")]
    Hour,
    #[serde(rename = "24h")]
    #[strum(serialize = "24h")]
    Day,
    #[serde(rename = "7d")]
    #[strum(serialize = "7d")]
    Week,
    #[default]
    #[serde(rename = "all")]
    #[strum(serialize = "all")]
    All,
}

impl MetricsPeriod {
    pub fn window(self) -> Option<Duration> {
        match self {
            Self::Hour => Some(Duration::from_secs(3_600)),
            Self::Day => Some(Duration::from_secs(86_400)),
            Self::Week => Some(Duration::from_secs(7 * 86_400)),
            Self::All => None,
        }
    }
}

/// Mutable per-integration counters, owned by the hub entry.
#[derive(Debug, Clone)]
pub(crate) struct MetricsState {
    pub requests: u64,
    pub errors: u64,
    pub last_request_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub health: HealthStatus,
    pub history: VecDeque<HealthRecord>,
    capacity: usize,
}

impl MetricsState {
    pub fn new(capacity: usize) -> Self {
        Self {
            requests: 0,
            errors: 0,
            last_request_at: None,
            consecutive_failures: 0,
            health: HealthStatus::Unknown,
            history: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
        }
    }

    pub fn record_request(&mut self, failed: bool) {
        self.requests += 1;
        if failed {
            self.errors += 1;
        }
        self.last_request_at = Some(Utc::now());
    }

    /// Push a probe outcome and return the updated consecutive-failure count.
    pub fn record_probe(&mut self, record: HealthRecord, threshold: u32) -> u32 {
        if record.success {
            self.consecutive_failures = 0;
            self.health = HealthStatus::Healthy;
        } else {
            self.consecutive_failures += 1;
            self.health = if self.consecutive_failures >= threshold {
                HealthStatus::Unhealthy
            } else {
                HealthStatus::Degraded
            };
        }
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(record);
        self.consecutive_failures
    }

    pub fn summarize(&self, integration_id: Uuid, period: MetricsPeriod) -> IntegrationMetrics {
        let cutoff = period
            .window()
            .and_then(|w| chrono::Duration::from_std(w).ok())
            .map(|w| Utc::now() - w);
        let window: Vec<&HealthRecord> = self
            .history
            .iter()
            .filter(|r| cutoff.is_none_or(|c| r.timestamp >= c))
            .collect();

        let probes_total = window.len();
        let probes_passed = window.iter().filter(|r| r.success).count();
        let latency_sum: u64 = window.iter().map(|r| r.latency_ms).sum();

        IntegrationMetrics {
            integration_id,
            period,
            requests: self.requests,
            errors: self.errors,
            error_rate: ratio(self.errors, self.requests),
            probes_total,
            probes_passed,
            availability: ratio(count(probes_passed), count(probes_total)),
            avg_latency_ms: ratio(latency_sum, count(probes_total)),
            consecutive_failures: self.consecutive_failures,
            health_status: self.health,
            last_request_at: self.last_request_at,
            last_checked_at: self.history.back().map(|r| r.timestamp),
            history: window.into_iter().cloned().collect(),
        }
    }
}

fn count(n: usize) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}

#[allow(clippy::cast_precision_loss, clippy::as_conversions)]
fn ratio(numerator: u64, denominator: u64) -> Option<f64> {
    (denominator > 0).then(|| numerator as f64 / denominator as f64)
}

/// Aggregated view returned by `getIntegrationMetrics`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationMetrics {
    pub integration_id: Uuid,
    pub period: MetricsPeriod,
    pub requests: u64,
    pub errors: u64,
    pub error_rate: Option<f64>,
    pub probes_total: usize,
    pub probes_passed: usize,
    pub availability: Option<f64>,
    pub avg_latency_ms: Option<f64>,
    pub consecutive_failures: u32,
    pub health_status: HealthStatus,
    pub last_request_at: Option<DateTime<Utc>>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub history: Vec<HealthRecord>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn probe(success: bool) -> HealthRecord {
        HealthRecord {
            timestamp: Utc::now(),
            success,
            latency_ms: 10,
            error: (!success).then(|| "down".to_owned()),
        }
    }

    #[test]
    fn history_is_bounded() {
        let mut state = MetricsState::new(3);
        for _ in 0..5 {
            state.record_probe(probe(true), 3);
        }
        assert_eq!(state.history.len(), 3);
    }

    #[test]
    fn threshold_moves_degraded_to_unhealthy() {
        let mut state = MetricsState::new(10);
        state.record_probe(probe(false), 3);
        assert_eq!(state.health, HealthStatus::Degraded);
        state.record_probe(probe(false), 3);
        assert_eq!(state.record_probe(probe(false), 3), 3);
        assert_eq!(state.health, HealthStatus::Unhealthy);
        assert_eq!(state.record_probe(probe(true), 3), 0);
        assert_eq!(state.health, HealthStatus::Healthy);
    }

    #[test]
    fn summary_rates() {
        let mut state = MetricsState::new(10);
        state.record_request(false);
        state.record_request(true);
        state.record_probe(probe(true), 3);
        state.record_probe(probe(false), 3);

        let summary = state.summarize(Uuid::new_v4(), MetricsPeriod::Hour);
        assert_eq!(summary.requests, 2);
        assert_eq!(summary.error_rate, Some(0.5));
        assert_eq!(summary.availability, Some(0.5));
        assert_eq!(summary.avg_latency_ms, Some(10.0));
        assert_eq!(summary.history.len(), 2);
    }

    #[test]
    fn empty_summary_has_no_rates() {
        let summary = MetricsState::new(4).summarize(Uuid::new_v4(), MetricsPeriod::All);
        assert!(summary.error_rate.is_none());
        assert!(summary.availability.is_none());
        assert_eq!(summary.health_status, HealthStatus::Unknown);
    }

    #[test]
    fn period_parses_short_forms() {
        assert_eq!("24h".parse::<MetricsPeriod>().unwrap(), MetricsPeriod::Day);
        assert_eq!(MetricsPeriod::Week.to_string(), "7d");
    }
}
