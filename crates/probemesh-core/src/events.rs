//! State-change notifications
//!
//! The engine publishes an [`EngineEvent`] on a `tokio::sync::broadcast`
//! channel whenever observable state moves. Slow subscribers lag and lose
//! the oldest events; they can always re-read current state through the
//! handle.

use crate::arbitration::Channel;
use crate::prediction::PredictionInfo;
use crate::transport::LinkId;
use crate::wire::SessionInfo;

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// First report for a serial number
    ProbeDiscovered { serial: u32 },
    /// A report was accepted on `channel`
    TelemetryUpdated {
        serial: u32,
        channel: Channel,
        /// `None` when heard directly
        hop_count: Option<u8>,
    },
    /// Displayed prediction changed; `None` after a stale reset
    PredictionUpdated {
        serial: u32,
        info: Option<PredictionInfo>,
    },
    LogSyncProgress { serial: u32, percent: u8 },
    SessionStarted { serial: u32, session: SessionInfo },
    /// Reachability set of a repeater changed
    RepeaterUpdated { link: LinkId, reachable: Vec<u32> },
    /// `serial` is set when the link was a probe's direct link
    LinkDisconnected { link: LinkId, serial: Option<u32> },
    ProbeStale { serial: u32 },
}

impl EngineEvent {
    /// Probe the event concerns, if any
    pub fn serial(&self) -> Option<u32> {
        match self {
            EngineEvent::ProbeDiscovered { serial }
            | EngineEvent::TelemetryUpdated { serial, .. }
            | EngineEvent::PredictionUpdated { serial, .. }
            | EngineEvent::LogSyncProgress { serial, .. }
            | EngineEvent::SessionStarted { serial, .. }
            | EngineEvent::ProbeStale { serial } => Some(*serial),
            EngineEvent::LinkDisconnected { serial, .. } => *serial,
            EngineEvent::RepeaterUpdated { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serial() {
        assert_eq!(EngineEvent::ProbeStale { serial: 7 }.serial(), Some(7));
        assert_eq!(
            EngineEvent::LinkDisconnected {
                link: LinkId(1),
                serial: None
            }
            .serial(),
            None
        );
        assert_eq!(
            EngineEvent::RepeaterUpdated {
                link: LinkId(1),
                reachable: vec![7]
            }
            .serial(),
            None
        );
    }
}
