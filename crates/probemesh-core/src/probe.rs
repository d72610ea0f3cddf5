//! Per-probe state
//!
//! A probe is identified by its serial number and created the first time
//! any report for it arrives. It owns its arbitration channels, log store
//! and prediction smoother; the engine drives all three.

use crate::arbitration::{Arbiter, Channel, Verdict};
use crate::config::EngineConfig;
use crate::log_sync::LogSynchronizer;
use crate::prediction::{PredictionInfo, PredictionSmoother};
use crate::transport::LinkId;
use crate::wire::{LogRange, ProbeTemperatures, SessionInfo, Telemetry};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Identification strings read from the probe
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub firmware_revision: Option<String>,
    pub hardware_revision: Option<String>,
    pub model: Option<String>,
}

/// Latest instant-read measurement
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InstantRead {
    pub temperatures: ProbeTemperatures,
    pub core: Option<f64>,
}

/// Mutable state of one probe
#[derive(Debug)]
pub struct Probe {
    pub serial: u32,
    /// Last accepted normal-mode telemetry
    pub telemetry: Option<Telemetry>,
    /// Last accepted instant-read telemetry
    pub instant_read: Option<InstantRead>,
    /// Hops of the last accepted normal-mode report (`None` = direct)
    pub hop_count: Option<u8>,
    pub session: Option<SessionInfo>,
    pub device_info: DeviceInfo,
    pub over_temperature: Option<bool>,
    pub last_update: Option<Instant>,
    pub stale: bool,
    /// A session info read is outstanding
    pub session_requested: bool,
    pub arbiter: Arbiter,
    pub log: LogSynchronizer,
    pub prediction: PredictionSmoother,
}

impl Probe {
    pub fn new(serial: u32, config: &EngineConfig) -> Self {
        Self {
            serial,
            telemetry: None,
            instant_read: None,
            hop_count: None,
            session: None,
            device_info: DeviceInfo::default(),
            over_temperature: None,
            last_update: None,
            stale: false,
            session_requested: false,
            arbiter: Arbiter::new(),
            log: LogSynchronizer::new(config.log_sync.clone()),
            prediction: PredictionSmoother::new(config.prediction.clone()),
        }
    }

    /// Run a report through arbitration and, if accepted, make it the
    /// displayed state of its channel
    pub fn offer(
        &mut self,
        telemetry: &Telemetry,
        hop_count: Option<u8>,
        now: Instant,
        config: &EngineConfig,
    ) -> (Channel, Verdict) {
        let channel = Channel::for_mode(telemetry.mode);
        let verdict = self
            .arbiter
            .offer(channel, hop_count, now, &config.arbitration);
        if !verdict.accepted() {
            tracing::trace!(serial = self.serial, ?channel, ?verdict, "report rejected");
            return (channel, verdict);
        }

        self.last_update = Some(now);
        self.stale = false;
        match channel {
            Channel::InstantRead => {
                self.instant_read = Some(InstantRead {
                    temperatures: telemetry.temperatures,
                    core: telemetry.core_temperature(),
                });
            }
            Channel::Normal => {
                // advertisements carry no log range or prediction; keep what
                // the last status report said
                let mut merged = telemetry.clone();
                if let Some(previous) = &self.telemetry {
                    if merged.log_range.is_none() {
                        merged.log_range = previous.log_range;
                    }
                    if merged.prediction.is_none() {
                        merged.prediction = previous.prediction;
                    }
                }
                self.telemetry = Some(merged);
                self.hop_count = hop_count;
            }
        }
        (channel, verdict)
    }

    pub fn log_range(&self) -> Option<LogRange> {
        self.log.range()
    }

    /// Drop everything tied to the direct link
    ///
    /// The probe may restart while out of reach, so the session has to be
    /// read again before any more points are stored.
    pub fn clear_link_state(&mut self) {
        self.arbiter.reset();
        self.session = None;
        self.session_requested = false;
        self.log.suspend();
    }

    pub fn snapshot(&self, direct_link: Option<LinkId>) -> ProbeSnapshot {
        ProbeSnapshot {
            serial: self.serial,
            telemetry: self.telemetry.clone(),
            instant_read: self.instant_read,
            hop_count: self.hop_count,
            direct_link,
            session: self.session,
            device_info: self.device_info.clone(),
            over_temperature: self.over_temperature,
            log_range: self.log.range(),
            percent_synced: self.log.percent_synced(),
            prediction: self.prediction.info().cloned(),
            stale: self.stale,
        }
    }
}

/// Read-only view of a probe handed to consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeSnapshot {
    pub serial: u32,
    pub telemetry: Option<Telemetry>,
    pub instant_read: Option<InstantRead>,
    pub hop_count: Option<u8>,
    pub direct_link: Option<LinkId>,
    pub session: Option<SessionInfo>,
    pub device_info: DeviceInfo,
    pub over_temperature: Option<bool>,
    pub log_range: Option<LogRange>,
    pub percent_synced: u8,
    pub prediction: Option<PredictionInfo>,
    pub stale: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{
        BatteryStatus, PredictionStatus, ProbeColor, ProbeId, ProbeMode, VirtualSensors,
    };
    use std::time::Duration;

    fn telemetry(mode: ProbeMode) -> Telemetry {
        Telemetry {
            temperatures: ProbeTemperatures::from_raw([700; 8]),
            mode,
            color: ProbeColor::Red,
            id: ProbeId::new(2).unwrap(),
            battery: BatteryStatus::Ok,
            virtual_sensors: VirtualSensors::default(),
            log_range: Some(LogRange::new(0, 40)),
            prediction: Some(PredictionStatus::default()),
            food_safe_data: None,
            food_safe_status: None,
            overheating: None,
        }
    }

    #[test]
    fn test_accepted_report_updates_display() {
        let config = EngineConfig::default();
        let mut probe = Probe::new(9, &config);
        let now = Instant::now();

        let (channel, verdict) = probe.offer(&telemetry(ProbeMode::Normal), Some(2), now, &config);
        assert_eq!(channel, Channel::Normal);
        assert!(verdict.accepted());
        assert_eq!(probe.hop_count, Some(2));
        assert_eq!(probe.last_update, Some(now));

        // farther source inside the window is dropped
        let (_, verdict) = probe.offer(
            &telemetry(ProbeMode::Normal),
            Some(3),
            now + Duration::from_millis(500),
            &config,
        );
        assert!(!verdict.accepted());
        assert_eq!(probe.hop_count, Some(2));
    }

    #[test]
    fn test_instant_read_kept_separately() {
        let config = EngineConfig::default();
        let mut probe = Probe::new(9, &config);
        let now = Instant::now();
        probe.offer(&telemetry(ProbeMode::InstantRead), None, now, &config);
        assert!(probe.instant_read.is_some());
        assert!(probe.telemetry.is_none());
    }

    #[test]
    fn test_advertisement_keeps_status_fields() {
        let config = EngineConfig::default();
        let mut probe = Probe::new(9, &config);
        let now = Instant::now();
        probe.offer(&telemetry(ProbeMode::Normal), None, now, &config);

        let mut advertised = telemetry(ProbeMode::Normal);
        advertised.log_range = None;
        advertised.prediction = None;
        probe.offer(&advertised, None, now + Duration::from_secs(1), &config);

        let shown = probe.telemetry.as_ref().unwrap();
        assert_eq!(shown.log_range, Some(LogRange::new(0, 40)));
        assert!(shown.prediction.is_some());
    }

    #[test]
    fn test_snapshot() {
        let config = EngineConfig::default();
        let mut probe = Probe::new(9, &config);
        probe.device_info.model = Some("CPT".into());
        let snapshot = probe.snapshot(Some(LinkId(4)));
        assert_eq!(snapshot.serial, 9);
        assert_eq!(snapshot.direct_link, Some(LinkId(4)));
        assert_eq!(snapshot.device_info.model.as_deref(), Some("CPT"));
        assert_eq!(snapshot.percent_synced, 0);
    }
}
