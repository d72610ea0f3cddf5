//! Engine configuration
//!
//! Every timing constant the engine uses lives here with its default.
//! Configuration is plain serde data, so a JSON file only needs the keys
//! it overrides:
//!
//! ```json
//! { "arbitration": { "normal_lockout_ms": 3000 },
//!   "correlator": { "class_timeouts_ms": { "ReadLogs": 60000 } } }
//! ```

use crate::error::{EngineError, Result};
use crate::wire::MessageClass;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Top-level engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub correlator: CorrelatorConfig,
    pub route: RouteConfig,
    pub arbitration: ArbitrationConfig,
    pub log_sync: LogSyncConfig,
    pub prediction: PredictionConfig,
    pub probe: ProbeConfig,
    pub runtime: RuntimeConfig,
}

impl EngineConfig {
    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        let nonzero = [
            ("correlator.direct_timeout_ms", self.correlator.direct_timeout_ms),
            ("correlator.mesh_timeout_ms", self.correlator.mesh_timeout_ms),
            ("route.reachability_timeout_ms", self.route.reachability_timeout_ms),
            ("log_sync.flush_quiet_ms", self.log_sync.flush_quiet_ms),
            ("prediction.status_interval_ms", self.prediction.status_interval_ms),
            (
                "prediction.interpolation_interval_ms",
                self.prediction.interpolation_interval_ms,
            ),
            ("prediction.stale_timeout_ms", self.prediction.stale_timeout_ms),
            ("probe.stale_timeout_ms", self.probe.stale_timeout_ms),
            ("runtime.fast_tick_ms", self.runtime.fast_tick_ms),
            ("runtime.slow_tick_ms", self.runtime.slow_tick_ms),
        ];
        if let Some((name, _)) = nonzero.iter().find(|(_, value)| *value == 0) {
            return Err(EngineError::Config(format!("{} must be non-zero", name)));
        }
        if self.log_sync.flush_threshold == 0 {
            return Err(EngineError::Config(
                "log_sync.flush_threshold must be non-zero".to_string(),
            ));
        }
        if self.prediction.round_to_secs == 0 || self.prediction.update_modulus == 0 {
            return Err(EngineError::Config(
                "prediction rounding and update modulus must be non-zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.route.rssi_alpha) || self.route.rssi_alpha == 0.0 {
            return Err(EngineError::Config(format!(
                "route.rssi_alpha must be in (0, 1], got {}",
                self.route.rssi_alpha
            )));
        }
        if self.runtime.command_buffer == 0 || self.runtime.event_buffer == 0 {
            return Err(EngineError::Config(
                "runtime channel buffers must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Request timeout policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelatorConfig {
    /// Timeout for requests over a direct link
    pub direct_timeout_ms: u64,
    /// Timeout for requests relayed through the mesh
    pub mesh_timeout_ms: u64,
    /// Per-class overrides, applied to both spaces
    pub class_timeouts_ms: BTreeMap<MessageClass, u64>,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            direct_timeout_ms: 5_000,
            mesh_timeout_ms: 30_000,
            class_timeouts_ms: BTreeMap::new(),
        }
    }
}

/// Route selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteConfig {
    /// A repeater's claim to reach a probe expires after this long
    pub reachability_timeout_ms: u64,
    /// Weight of a new RSSI sample in the link quality average
    pub rssi_alpha: f32,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            reachability_timeout_ms: 15_000,
            rssi_alpha: 0.3,
        }
    }
}

impl RouteConfig {
    pub fn reachability_timeout(&self) -> Duration {
        Duration::from_millis(self.reachability_timeout_ms)
    }
}

/// Lockout windows for the two arbitration channels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbitrationConfig {
    pub instant_read_lockout_ms: u64,
    pub normal_lockout_ms: u64,
}

impl Default for ArbitrationConfig {
    fn default() -> Self {
        Self {
            instant_read_lockout_ms: 1_000,
            normal_lockout_ms: 5_000,
        }
    }
}

/// Log store coalescing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSyncConfig {
    /// Flush the staging buffer once it holds more than this many points
    pub flush_threshold: usize,
    /// Flush the staging buffer after this long without a new point
    pub flush_quiet_ms: u64,
}

impl Default for LogSyncConfig {
    fn default() -> Self {
        Self {
            flush_threshold: 500,
            flush_quiet_ms: 200,
        }
    }
}

impl LogSyncConfig {
    pub fn flush_quiet(&self) -> Duration {
        Duration::from_millis(self.flush_quiet_ms)
    }
}

/// Time-remaining smoothing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionConfig {
    /// Above this many seconds the coarse (rounded) display applies
    pub fine_threshold_secs: u32,
    /// Coarse display granularity
    pub round_to_secs: u32,
    /// Coarse display updates only when `sequence % update_modulus == 0`
    pub update_modulus: u32,
    /// Larger raw values are treated as no prediction
    pub max_seconds: u32,
    /// Nominal interval between probe status updates
    pub status_interval_ms: u64,
    /// Countdown step period below the fine threshold
    pub interpolation_interval_ms: u64,
    /// Reset after this long without an update
    pub stale_timeout_ms: u64,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            fine_threshold_secs: 300,
            round_to_secs: 15,
            update_modulus: 3,
            max_seconds: 4 * 60 * 60,
            status_interval_ms: 5_000,
            interpolation_interval_ms: 200,
            stale_timeout_ms: 15_000,
        }
    }
}

impl PredictionConfig {
    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }

    pub fn interpolation_interval(&self) -> Duration {
        Duration::from_millis(self.interpolation_interval_ms)
    }

    pub fn stale_timeout(&self) -> Duration {
        Duration::from_millis(self.stale_timeout_ms)
    }
}

/// Probe liveness
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// A probe with no accepted report for this long is flagged stale
    pub stale_timeout_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            stale_timeout_ms: 15_000,
        }
    }
}

impl ProbeConfig {
    pub fn stale_timeout(&self) -> Duration {
        Duration::from_millis(self.stale_timeout_ms)
    }
}

/// Actor task timers and channel sizes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Staging flush and interpolation tick
    pub fast_tick_ms: u64,
    /// Timeout sweep, staleness and gap scan tick
    pub slow_tick_ms: u64,
    pub command_buffer: usize,
    pub event_buffer: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            fast_tick_ms: 200,
            slow_tick_ms: 1_000,
            command_buffer: 64,
            event_buffer: 256,
        }
    }
}

impl RuntimeConfig {
    pub fn fast_tick(&self) -> Duration {
        Duration::from_millis(self.fast_tick_ms)
    }

    pub fn slow_tick(&self) -> Duration {
        Duration::from_millis(self.slow_tick_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.correlator.direct_timeout_ms, 5_000);
        assert_eq!(config.correlator.mesh_timeout_ms, 30_000);
        assert_eq!(config.arbitration.instant_read_lockout_ms, 1_000);
        assert_eq!(config.arbitration.normal_lockout_ms, 5_000);
        assert_eq!(config.log_sync.flush_threshold, 500);
        assert_eq!(config.log_sync.flush_quiet(), Duration::from_millis(200));
        assert_eq!(config.prediction.max_seconds, 14_400);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = EngineConfig::from_json_str(
            r#"{ "arbitration": { "normal_lockout_ms": 3000 },
                 "correlator": { "class_timeouts_ms": { "ReadLogs": 60000 } } }"#,
        )
        .unwrap();
        assert_eq!(config.arbitration.normal_lockout_ms, 3_000);
        assert_eq!(config.arbitration.instant_read_lockout_ms, 1_000);
        assert_eq!(
            config.correlator.class_timeouts_ms.get(&MessageClass::ReadLogs),
            Some(&60_000)
        );
        assert_eq!(config.correlator.direct_timeout_ms, 5_000);
    }

    #[test]
    fn test_json_round_trip() {
        let mut config = EngineConfig::default();
        config
            .correlator
            .class_timeouts_ms
            .insert(MessageClass::ReadSessionInfo, 2_000);
        let json = config.to_json_pretty().unwrap();
        assert_eq!(EngineConfig::from_json_str(&json).unwrap(), config);
    }

    #[test]
    fn test_validation() {
        let err = EngineConfig::from_json_str(r#"{ "runtime": { "fast_tick_ms": 0 } }"#);
        assert!(matches!(err, Err(EngineError::Config(_))));

        let err = EngineConfig::from_json_str(
            r#"{ "prediction": { "interpolation_interval_ms": 0 } }"#,
        );
        match err {
            Err(EngineError::Config(message)) => {
                assert!(message.contains("interpolation_interval_ms"))
            }
            other => panic!("expected a config error, got {other:?}"),
        }

        let err = EngineConfig::from_json_str(r#"{ "route": { "rssi_alpha": 1.5 } }"#);
        assert!(matches!(err, Err(EngineError::Config(_))));

        let err = EngineConfig::from_json_str("{ not json");
        assert!(matches!(err, Err(EngineError::Json(_))));
    }
}
