//! Repeater tracking
//!
//! A repeater is known by the link we hold to it. It tells us which probes
//! it can hear, through relayed status frames and heartbeats, and we keep
//! a smoothed signal strength for the link to rank it against other
//! repeaters.

use crate::transport::LinkId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Smoothed link quality for a repeater
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinkQuality {
    /// Received signal strength (dBm), exponential moving average
    pub rssi: f32,
    /// Number of samples folded in
    pub samples: u32,
}

impl Default for LinkQuality {
    fn default() -> Self {
        Self {
            rssi: -120.0,
            samples: 0,
        }
    }
}

impl LinkQuality {
    /// Start from a first measurement
    pub fn new(rssi: f32) -> Self {
        Self { rssi, samples: 1 }
    }

    /// Fold in a new sample with weight `alpha`
    pub fn update(&mut self, rssi: f32, alpha: f32) {
        if self.samples == 0 {
            self.rssi = rssi;
        } else {
            self.rssi = alpha * rssi + (1.0 - alpha) * self.rssi;
        }
        self.samples = self.samples.saturating_add(1);
    }

    /// Normalized score in 0..=1 (-120 dBm to -40 dBm), higher is better
    pub fn quality_score(&self) -> f32 {
        ((self.rssi + 120.0) / 80.0).clamp(0.0, 1.0)
    }
}

/// A connected repeater
#[derive(Debug, Clone)]
pub struct RepeaterNode {
    pub link: LinkId,
    pub quality: LinkQuality,
    /// Probe serial -> last time this repeater reported it
    reachable: HashMap<u32, Instant>,
    pub connected_at: Instant,
}

impl RepeaterNode {
    pub fn new(link: LinkId, now: Instant) -> Self {
        Self {
            link,
            quality: LinkQuality::default(),
            reachable: HashMap::new(),
            connected_at: now,
        }
    }

    /// Record that this repeater currently hears `serial`
    ///
    /// Returns `true` if the probe was not already known to this repeater.
    pub fn mark_reachable(&mut self, serial: u32, now: Instant) -> bool {
        self.reachable.insert(serial, now).is_none()
    }

    /// Whether `serial` was reported within `timeout`
    pub fn reaches(&self, serial: u32, now: Instant, timeout: Duration) -> bool {
        self.reachable
            .get(&serial)
            .is_some_and(|seen| now.saturating_duration_since(*seen) <= timeout)
    }

    /// Drop entries older than `timeout`; returns the expired serials
    pub fn expire(&mut self, now: Instant, timeout: Duration) -> Vec<u32> {
        let expired: Vec<u32> = self
            .reachable
            .iter()
            .filter(|(_, seen)| now.saturating_duration_since(**seen) > timeout)
            .map(|(serial, _)| *serial)
            .collect();
        for serial in &expired {
            self.reachable.remove(serial);
        }
        expired
    }

    /// Serials currently held, sorted
    pub fn reachable_serials(&self) -> Vec<u32> {
        let mut serials: Vec<u32> = self.reachable.keys().copied().collect();
        serials.sort_unstable();
        serials
    }

    pub fn snapshot(&self) -> RepeaterSnapshot {
        RepeaterSnapshot {
            link: self.link,
            quality: self.quality,
            reachable: self.reachable_serials(),
        }
    }
}

/// Read-only view of a repeater
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepeaterSnapshot {
    pub link: LinkId,
    pub quality: LinkQuality,
    pub reachable: Vec<u32>,
}
