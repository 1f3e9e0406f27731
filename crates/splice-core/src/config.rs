// ── Runtime configuration for the hub ──
//
// Pure data: no disk access. `splice-config` builds these from TOML and
// environment layers; tests and embedders construct them directly.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use splice_api::TransportConfig;

/// Inclusive port search range for locally hosted services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub min: u16,
    pub max: u16,
}

impl PortRange {
    pub const fn new(min: u16, max: u16) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, port: u16) -> bool {
        (self.min..=self.max).contains(&port)
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self::new(3000, 9999)
    }
}

/// Options for the retrying URL health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOptions {
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Total attempts (a value of 0 is treated as 1).
    pub retries: u32,
    /// Base delay; attempt `n` waits `retry_delay * n` before attempt `n + 1`.
    pub retry_delay: Duration,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            retries: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Hub-wide settings.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Period of each integration's health-check loop.
    pub health_interval: Duration,
    /// Consecutive failed probes before an active integration turns `unhealthy`.
    pub unhealthy_threshold: u32,
    /// Size of the per-integration health history ring.
    pub health_history: usize,
    /// Upper bound on a single adapter `health_check` call.
    pub adapter_health_timeout: Duration,
    /// Default search range for port conflict resolution.
    pub port_range: PortRange,
    /// Initial URL probe used at registration.
    pub probe: ProbeOptions,
    /// Grace period for the `graceful` de-integration policy.
    pub drain_timeout: Duration,
    pub drain_poll_interval: Duration,
    /// Capacity of the lifecycle event broadcast channel.
    pub event_capacity: usize,
    pub transport: TransportConfig,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            health_interval: Duration::from_secs(30),
            unhealthy_threshold: 3,
            health_history: 20,
            adapter_health_timeout: Duration::from_secs(5),
            port_range: PortRange::default(),
            probe: ProbeOptions::default(),
            drain_timeout: Duration::from_secs(30),
            drain_poll_interval: Duration::from_millis(100),
            event_capacity: 256,
            transport: TransportConfig::default(),
        }
    }
}
