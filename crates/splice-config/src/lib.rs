//! Shared configuration for the splice binary and embedders.
//!
//! Layered TOML/env settings, integration manifests, and translation to
//! `splice_core::HubConfig`. `splice-core` itself never reads disk.

pub mod manifest;

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use splice_api::{TlsMode, TransportConfig};
use splice_core::{DeintegrationPolicy, HubConfig, PortRange, ProbeOptions};

pub use manifest::{Manifest, ManifestEntry, load_manifest, parse_manifest};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize settings: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("invalid manifest {path}: {source}")]
    Manifest {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── Settings ────────────────────────────────────────────────────────

/// Top-level TOML settings.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub hub: HubSettings,
    pub transport: TransportSettings,
    pub records: RecordSettings,
    pub defaults: Defaults,
}

/// Mirrors `HubConfig` in TOML-friendly units.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HubSettings {
    pub health_interval_secs: u64,
    pub unhealthy_threshold: u32,
    pub health_history: usize,
    pub adapter_health_timeout_secs: u64,
    pub port_min: u16,
    pub port_max: u16,
    pub probe_timeout_secs: u64,
    pub probe_retries: u32,
    pub probe_retry_delay_ms: u64,
    pub drain_timeout_secs: u64,
    pub drain_poll_interval_ms: u64,
    pub event_capacity: usize,
}

impl Default for HubSettings {
    fn default() -> Self {
        let hub = HubConfig::default();
        Self {
            health_interval_secs: hub.health_interval.as_secs(),
            unhealthy_threshold: hub.unhealthy_threshold,
            health_history: hub.health_history,
            adapter_health_timeout_secs: hub.adapter_health_timeout.as_secs(),
            port_min: hub.port_range.min,
            port_max: hub.port_range.max,
            probe_timeout_secs: hub.probe.timeout.as_secs(),
            probe_retries: hub.probe.retries,
            probe_retry_delay_ms: millis(hub.probe.retry_delay),
            drain_timeout_secs: hub.drain_timeout.as_secs(),
            drain_poll_interval_ms: millis(hub.drain_poll_interval),
            event_capacity: hub.event_capacity,
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportSettings {
    pub timeout_secs: u64,
    /// Accept invalid TLS certificates (self-signed local tools).
    pub insecure: bool,
    /// Path to a custom CA certificate (PEM).
    pub ca_cert: Option<PathBuf>,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            insecure: false,
            ca_cert: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RecordSettings {
    /// De-integration record directory. Defaults to the platform data dir.
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Defaults {
    pub output: String,
    pub color: String,
    /// Policy used to tear integrations down when `splice run` exits.
    pub shutdown_policy: DeintegrationPolicy,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: "table".into(),
            color: "auto".into(),
            shutdown_policy: DeintegrationPolicy::Immediate,
        }
    }
}

impl Settings {
    /// Translate into the hub's runtime configuration.
    pub fn hub_config(&self) -> Result<HubConfig, ConfigError> {
        let hub = &self.hub;
        if hub.port_min == 0 || hub.port_min > hub.port_max {
            return Err(invalid(
                "hub.port_min/port_max",
                format!("{}-{} is not a usable range", hub.port_min, hub.port_max),
            ));
        }
        if hub.unhealthy_threshold == 0 {
            return Err(invalid("hub.unhealthy_threshold", "must be at least 1"));
        }
        if hub.health_interval_secs == 0 {
            return Err(invalid("hub.health_interval_secs", "must be at least 1"));
        }

        Ok(HubConfig {
            health_interval: Duration::from_secs(hub.health_interval_secs),
            unhealthy_threshold: hub.unhealthy_threshold,
            health_history: hub.health_history.max(1),
            adapter_health_timeout: Duration::from_secs(hub.adapter_health_timeout_secs),
            port_range: PortRange::new(hub.port_min, hub.port_max),
            probe: ProbeOptions {
                timeout: Duration::from_secs(hub.probe_timeout_secs),
                retries: hub.probe_retries,
                retry_delay: Duration::from_millis(hub.probe_retry_delay_ms),
            },
            drain_timeout: Duration::from_secs(hub.drain_timeout_secs),
            drain_poll_interval: Duration::from_millis(hub.drain_poll_interval_ms),
            event_capacity: hub.event_capacity.max(1),
            transport: self.transport_config(),
        })
    }

    pub fn transport_config(&self) -> TransportConfig {
        let tls = if self.transport.insecure {
            TlsMode::DangerAcceptInvalid
        } else if let Some(ref ca) = self.transport.ca_cert {
            TlsMode::CustomCa(ca.clone())
        } else {
            TlsMode::System
        };
        TransportConfig {
            tls,
            timeout: Duration::from_secs(self.transport.timeout_secs),
        }
    }

    /// Where `FileRecordStore` keeps de-integration records.
    pub fn records_dir(&self) -> PathBuf {
        self.records.dir.clone().unwrap_or_else(default_records_dir)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("io", "splice", "splice")
}

fn home_fallback(parts: &[&str]) -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.extend(parts);
    p
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || home_fallback(&[".config", "splice", "config.toml"]),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

pub fn default_records_dir() -> PathBuf {
    project_dirs().map_or_else(
        || home_fallback(&[".local", "share", "splice", "records"]),
        |dirs| dirs.data_dir().join("records"),
    )
}

// ── Loading ─────────────────────────────────────────────────────────

/// Defaults, then the user config file, then `explicit` (if any), then
/// `SPLICE_*` variables. Nested keys use a double underscore:
/// `SPLICE_HUB__PORT_MIN=4000`.
pub fn figment(explicit: Option<&Path>) -> Figment {
    let mut figment = Figment::new()
        .merge(Serialized::defaults(Settings::default()))
        .merge(Toml::file(config_path()));
    if let Some(path) = explicit {
        figment = figment.merge(Toml::file(path));
    }
    figment.merge(Env::prefixed("SPLICE_").split("__"))
}

pub fn load_settings(explicit: Option<&Path>) -> Result<Settings, ConfigError> {
    if let Some(missing) = explicit.filter(|p| !p.is_file()) {
        return Err(ConfigError::Io {
            path: missing.display().to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        });
    }
    extract(&figment(explicit))
}

pub fn extract(figment: &Figment) -> Result<Settings, ConfigError> {
    Ok(figment.extract()?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_round_trip_to_hub_config() {
        let hub = Settings::default().hub_config().unwrap();
        let reference = HubConfig::default();
        assert_eq!(hub.health_interval, reference.health_interval);
        assert_eq!(hub.port_range, reference.port_range);
        assert_eq!(hub.probe, reference.probe);
        assert_eq!(hub.drain_poll_interval, reference.drain_poll_interval);
    }

    #[test]
    fn file_layers_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("splice.toml");
        std::fs::write(
            &path,
            "[hub]\nport_min = 4000\nport_max = 4100\n\n[defaults]\nshutdown_policy = \"graceful\"\n",
        )
        .unwrap();

        let settings = extract(
            &Figment::new()
                .merge(Serialized::defaults(Settings::default()))
                .merge(Toml::file(&path)),
        )
        .unwrap();
        assert_eq!(settings.hub.port_min, 4000);
        assert_eq!(settings.hub.unhealthy_threshold, 3);
        assert_eq!(settings.defaults.shutdown_policy, DeintegrationPolicy::Graceful);
        assert_eq!(
            settings.hub_config().unwrap().port_range,
            PortRange::new(4000, 4100)
        );
    }

    #[test]
    fn rejects_inverted_port_range() {
        let mut settings = Settings::default();
        settings.hub.port_min = 5000;
        settings.hub.port_max = 4000;
        assert!(matches!(
            settings.hub_config(),
            Err(ConfigError::Validation { .. })
        ));
    }

    #[test]
    fn insecure_wins_over_ca() {
        let mut settings = Settings::default();
        settings.transport.ca_cert = Some(PathBuf::from("/tmp/ca.pem"));
        assert_eq!(
            settings.transport_config().tls,
            TlsMode::CustomCa(PathBuf::from("/tmp/ca.pem"))
        );
        settings.transport.insecure = true;
        assert_eq!(settings.transport_config().tls, TlsMode::DangerAcceptInvalid);
    }

    #[test]
    fn explicit_file_must_exist() {
        let err = load_settings(Some(Path::new("/nonexistent/splice.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn records_dir_prefers_setting() {
        let mut settings = Settings::default();
        settings.records.dir = Some(PathBuf::from("/var/lib/splice"));
        assert_eq!(settings.records_dir(), PathBuf::from("/var/lib/splice"));
        assert!(Settings::default().records_dir().ends_with("records"));
    }

    #[test]
    fn settings_serialize_to_toml() {
        let text = Settings::default().to_toml().unwrap();
        assert!(text.contains("[hub]"));
        assert!(text.contains("shutdown_policy = \"immediate\""));
    }
}
