//! Report arbitration
//!
//! The same probe can be heard directly and through several repeaters at
//! different hop counts, with no ordering between paths. Each report is
//! offered to the channel matching its mode and either replaces the
//! displayed state or is dropped.
//!
//! Decision per channel, first match wins:
//!
//! 1. Direct report: accept.
//! 2. Nothing accepted within the lockout window: accept.
//! 3. Last accepted report was direct: reject.
//! 4. Accept only if hops <= last accepted hops.
//!
//! Instant-read and normal-mode channels lock out independently.

use crate::config::ArbitrationConfig;
use crate::wire::ProbeMode;
use std::time::{Duration, Instant};

/// Independent arbitration channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    InstantRead,
    Normal,
}

impl Channel {
    pub fn for_mode(mode: ProbeMode) -> Self {
        match mode {
            ProbeMode::InstantRead => Channel::InstantRead,
            ProbeMode::Normal | ProbeMode::Reserved | ProbeMode::Error => Channel::Normal,
        }
    }
}

/// Why a report was accepted or rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    AcceptDirect,
    AcceptWindowElapsed,
    AcceptCloserOrEqual,
    RejectDirectHeld,
    RejectFartherSource,
}

impl Verdict {
    pub fn accepted(self) -> bool {
        matches!(
            self,
            Verdict::AcceptDirect | Verdict::AcceptWindowElapsed | Verdict::AcceptCloserOrEqual
        )
    }
}

/// Last accepted report on one channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelState {
    pub accepted_at: Option<Instant>,
    /// `None` when the last accepted report was direct
    pub hop_count: Option<u8>,
}

impl ChannelState {
    /// Decide without changing state
    pub fn evaluate(&self, hop_count: Option<u8>, now: Instant, window: Duration) -> Verdict {
        let Some(hops) = hop_count else {
            return Verdict::AcceptDirect;
        };
        let within_window = self
            .accepted_at
            .is_some_and(|at| now.saturating_duration_since(at) < window);
        if !within_window {
            return Verdict::AcceptWindowElapsed;
        }
        match self.hop_count {
            None => Verdict::RejectDirectHeld,
            Some(last) if hops <= last => Verdict::AcceptCloserOrEqual,
            Some(_) => Verdict::RejectFartherSource,
        }
    }
}

/// Both arbitration channels of one probe
#[derive(Debug, Clone, Default)]
pub struct Arbiter {
    instant_read: ChannelState,
    normal: ChannelState,
}

impl Arbiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, channel: Channel) -> &ChannelState {
        match channel {
            Channel::InstantRead => &self.instant_read,
            Channel::Normal => &self.normal,
        }
    }

    /// Offer a report; on acceptance the channel's lockout state moves to it
    pub fn offer(
        &mut self,
        channel: Channel,
        hop_count: Option<u8>,
        now: Instant,
        config: &ArbitrationConfig,
    ) -> Verdict {
        let window = Duration::from_millis(match channel {
            Channel::InstantRead => config.instant_read_lockout_ms,
            Channel::Normal => config.normal_lockout_ms,
        });
        let state = match channel {
            Channel::InstantRead => &mut self.instant_read,
            Channel::Normal => &mut self.normal,
        };
        let verdict = state.evaluate(hop_count, now, window);
        if verdict.accepted() {
            state.accepted_at = Some(now);
            state.hop_count = hop_count;
        }
        verdict
    }

    /// Clear both channels (direct link lost)
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
