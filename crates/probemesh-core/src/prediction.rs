//! Time-remaining smoothing
//!
//! Probes report "seconds remaining" with every status update (about every
//! 5 s). Shown raw, the value jitters and observers on different paths
//! disagree. The smoother:
//!
//! - ignores repeats of the same (sequence, set point),
//! - above 5 minutes updates only on every third sequence number and rounds
//!   to 15 s, so all observers show the same value,
//! - at or below 5 minutes counts down locally every 200 ms from the last
//!   confirmed value toward `confirmed - status interval`,
//! - resets after 15 s without an update.
//!
//! ```text
//! raw   ──●──────────●──────────●──── (every ~5 s)
//! shown  120 119.8 … 115   114 … 110
//!            └ 200 ms ticks ┘
//! ```

use crate::config::PredictionConfig;
use crate::wire::{PredictionMode, PredictionState, PredictionStatus, PredictionType};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Displayed prediction for one probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionInfo {
    pub state: PredictionState,
    pub mode: PredictionMode,
    pub kind: PredictionType,
    pub set_point: f64,
    pub heat_start: f64,
    pub estimated_core: f64,
    /// `None` unless predicting with a usable estimate
    pub seconds_remaining: Option<u32>,
    /// 0..=100
    pub percent_through_cook: f64,
}

/// Round to the nearest multiple of `step`; a remainder above half rounds up
pub fn round_to_step(seconds: u32, step: u32) -> u32 {
    if step == 0 {
        return seconds;
    }
    let remainder = seconds % step;
    if remainder > step / 2 {
        seconds - remainder + step
    } else {
        seconds - remainder
    }
}

/// Progress from heat start to set point, as a percentage
pub fn percent_through_cook(core: f64, heat_start: f64, set_point: f64) -> f64 {
    if set_point <= heat_start {
        return 0.0;
    }
    ((core - heat_start) / (set_point - heat_start)).clamp(0.0, 1.0) * 100.0
}

#[derive(Debug, Clone, Copy)]
struct Countdown {
    current: f64,
    target: f64,
    next_tick: Instant,
}

/// Per-probe smoothing state
#[derive(Debug, Clone)]
pub struct PredictionSmoother {
    config: PredictionConfig,
    last_key: Option<(u32, u16)>,
    last_update: Option<Instant>,
    info: Option<PredictionInfo>,
    countdown: Option<Countdown>,
}

impl PredictionSmoother {
    pub fn new(config: PredictionConfig) -> Self {
        Self {
            config,
            last_key: None,
            last_update: None,
            info: None,
            countdown: None,
        }
    }

    pub fn info(&self) -> Option<&PredictionInfo> {
        self.info.as_ref()
    }

    pub fn is_interpolating(&self) -> bool {
        self.countdown.is_some()
    }

    /// Feed a status update; returns the new displayed info unless ignored
    ///
    /// `core` is the current core temperature in °C.
    pub fn update(
        &mut self,
        sequence: u32,
        status: &PredictionStatus,
        core: f64,
        now: Instant,
    ) -> Option<PredictionInfo> {
        let key = (sequence, status.set_point_raw);
        if self.last_key == Some(key) {
            return None;
        }
        self.last_key = Some(key);
        self.last_update = Some(now);

        let raw = (status.state == PredictionState::Predicting
            && status.seconds_remaining <= self.config.max_seconds)
            .then_some(status.seconds_remaining);
        let previous = self.info.as_ref().and_then(|info| info.seconds_remaining);

        let seconds_remaining = match raw {
            None => {
                self.countdown = None;
                None
            }
            Some(seconds) if seconds > self.config.fine_threshold_secs => {
                self.countdown = None;
                if previous.is_none() || sequence % self.config.update_modulus == 0 {
                    Some(round_to_step(seconds, self.config.round_to_secs))
                } else {
                    previous
                }
            }
            Some(seconds) => {
                let step = self.config.status_interval().as_secs_f64();
                self.countdown = Some(Countdown {
                    current: seconds as f64,
                    target: (seconds as f64 - step).max(0.0),
                    next_tick: now + self.config.interpolation_interval(),
                });
                Some(seconds)
            }
        };

        let info = PredictionInfo {
            state: status.state,
            mode: status.mode,
            kind: status.kind,
            set_point: status.set_point(),
            heat_start: status.heat_start(),
            estimated_core: status.estimated_core(),
            seconds_remaining,
            percent_through_cook: percent_through_cook(
                core,
                status.heat_start(),
                status.set_point(),
            ),
        };
        self.info = Some(info.clone());
        Some(info)
    }

    /// Advance the countdown; returns the info when the displayed value moved
    pub fn tick(&mut self, now: Instant) -> Option<PredictionInfo> {
        let countdown = self.countdown.as_mut()?;
        if now < countdown.next_tick {
            return None;
        }
        let interval = self.config.interpolation_interval();
        let steps = now.duration_since(countdown.next_tick).as_nanos()
            / interval.as_nanos().max(1)
            + 1;
        countdown.next_tick += interval * steps as u32;
        countdown.current =
            (countdown.current - interval.as_secs_f64() * steps as f64).max(countdown.target);

        let shown = countdown.current.round() as u32;
        if countdown.current <= countdown.target {
            self.countdown = None;
        }

        let info = self.info.as_mut()?;
        if info.seconds_remaining == Some(shown) {
            return None;
        }
        info.seconds_remaining = Some(shown);
        Some(info.clone())
    }

    /// Reset if no update arrived within the stale timeout
    pub fn check_stale(&mut self, now: Instant) -> bool {
        let stale = self.last_update.is_some_and(|at| {
            now.saturating_duration_since(at) > self.config.stale_timeout()
        });
        if stale {
            tracing::debug!("prediction stale, resetting");
            self.reset();
        }
        stale
    }

    pub fn reset(&mut self) {
        self.last_key = None;
        self.last_update = None;
        self.info = None;
        self.countdown = None;
    }

    /// Time of the next countdown step, if one is armed
    pub fn next_tick(&self) -> Option<Instant> {
        self.countdown.map(|c| c.next_tick)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn predicting(seconds: u32) -> PredictionStatus {
        PredictionStatus {
            state: PredictionState::Predicting,
            mode: PredictionMode::TimeToRemoval,
            kind: PredictionType::Removal,
            set_point_raw: 545,
            heat_start_raw: 200,
            seconds_remaining: seconds,
            estimated_core_raw: 600,
        }
    }

    fn smoother() -> PredictionSmoother {
        PredictionSmoother::new(PredictionConfig::default())
    }

    #[test]
    fn test_round_to_step() {
        assert_eq!(round_to_step(601, 15), 600);
        assert_eq!(round_to_step(608, 15), 615);
        assert_eq!(round_to_step(607, 15), 600);
        assert_eq!(round_to_step(615, 15), 615);
    }

    #[test]
    fn test_coarse_rounding_on_first_update() {
        let now = Instant::now();
        let mut s = smoother();
        let info = s.update(10, &predicting(601), 40.0, now).unwrap();
        assert_eq!(info.seconds_remaining, Some(600));

        let mut s = smoother();
        let info = s.update(10, &predicting(608), 40.0, now).unwrap();
        assert_eq!(info.seconds_remaining, Some(615));
    }

    #[test]
    fn test_coarse_updates_every_third_sequence() {
        let now = Instant::now();
        let mut s = smoother();
        s.update(10, &predicting(900), 40.0, now);
        let info = s.update(11, &predicting(880), 40.0, now).unwrap();
        assert_eq!(info.seconds_remaining, Some(900));
        let info = s.update(12, &predicting(870), 40.0, now).unwrap();
        assert_eq!(info.seconds_remaining, Some(870));
    }

    #[test]
    fn test_duplicate_ignored() {
        let now = Instant::now();
        let mut s = smoother();
        assert!(s.update(10, &predicting(900), 40.0, now).is_some());
        assert!(s.update(10, &predicting(850), 40.0, now).is_none());

        // a new set point on the same sequence is not a duplicate
        let mut changed = predicting(850);
        changed.set_point_raw = 600;
        assert!(s.update(10, &changed, 40.0, now).is_some());
    }

    #[test]
    fn test_info_carries_prediction_type() {
        let mut s = smoother();
        let mut status = predicting(900);
        status.kind = crate::wire::PredictionType::Resting;
        let info = s.update(1, &status, 40.0, Instant::now()).unwrap();
        assert_eq!(info.kind, crate::wire::PredictionType::Resting);
        assert_eq!(info.mode, PredictionMode::TimeToRemoval);
    }

    #[test]
    fn test_only_predicting_yields_seconds() {
        let now = Instant::now();
        let mut s = smoother();
        let mut status = predicting(500);
        status.state = PredictionState::Warming;
        assert_eq!(s.update(1, &status, 40.0, now).unwrap().seconds_remaining, None);

        let info = s.update(2, &predicting(14_401), 40.0, now).unwrap();
        assert_eq!(info.seconds_remaining, None);
        let info = s.update(3, &predicting(14_400), 40.0, now).unwrap();
        assert_eq!(info.seconds_remaining, Some(14_400));
    }

    #[test]
    fn test_countdown_stops_at_target() {
        let t0 = Instant::now();
        let mut s = smoother();
        let info = s.update(7, &predicting(120), 40.0, t0).unwrap();
        assert_eq!(info.seconds_remaining, Some(120));
        assert!(s.is_interpolating());

        // nothing before the first tick
        assert!(s.tick(t0 + Duration::from_millis(100)).is_none());

        let mut shown = Vec::new();
        for i in 1..=40 {
            if let Some(info) = s.tick(t0 + Duration::from_millis(200 * i)) {
                shown.push(info.seconds_remaining.unwrap());
            }
        }
        assert_eq!(shown.first(), Some(&119));
        assert_eq!(*shown.last().unwrap(), 115);
        assert!(shown.windows(2).all(|w| w[0] > w[1]));
        assert!(!s.is_interpolating());
        assert_eq!(s.info().unwrap().seconds_remaining, Some(115));
    }

    #[test]
    fn test_countdown_catches_up_missed_ticks() {
        let t0 = Instant::now();
        let mut s = smoother();
        s.update(7, &predicting(60), 40.0, t0);
        let info = s.tick(t0 + Duration::from_secs(2)).unwrap();
        assert_eq!(info.seconds_remaining, Some(58));
        let info = s.tick(t0 + Duration::from_secs(30)).unwrap();
        assert_eq!(info.seconds_remaining, Some(55));
    }

    #[test]
    fn test_new_confirmation_restarts_countdown() {
        let t0 = Instant::now();
        let mut s = smoother();
        s.update(7, &predicting(100), 40.0, t0);
        s.tick(t0 + Duration::from_secs(5));
        let info = s
            .update(8, &predicting(96), 40.0, t0 + Duration::from_secs(5))
            .unwrap();
        assert_eq!(info.seconds_remaining, Some(96));
        assert!(s.is_interpolating());
    }

    #[test]
    fn test_stale_reset() {
        let t0 = Instant::now();
        let mut s = smoother();
        s.update(7, &predicting(100), 40.0, t0);
        assert!(!s.check_stale(t0 + Duration::from_secs(15)));
        assert!(s.check_stale(t0 + Duration::from_millis(15_001)));
        assert!(s.info().is_none());
        assert!(!s.is_interpolating());
        // same key accepted again after reset
        assert!(s.update(7, &predicting(100), 40.0, t0).is_some());
    }

    #[test]
    fn test_percent_through_cook() {
        assert_eq!(percent_through_cook(37.75, 20.0, 55.5), 50.0);
        assert_eq!(percent_through_cook(10.0, 20.0, 55.5), 0.0);
        assert_eq!(percent_through_cook(70.0, 20.0, 55.5), 100.0);
        assert_eq!(percent_through_cook(40.0, 60.0, 55.0), 0.0);
    }
}
