//! Per-session log store and gap filling
//!
//! A probe numbers every logged sample. The controller keeps one ordered
//! store per probe session and asks for whatever is missing between the
//! probe's reported `[min, max]`.
//!
//! ## Store
//!
//! ```text
//!  points  (IndexMap, sorted by sequence)   staging (out of order)
//! ┌───┬───┬───┬───┬───┐                    ┌────┬────┬───┐
//! │ 0 │ 1 │ 2 │ 3 │ 4 │ ◄── append 5       │ 12 │ 11 │ 9 │
//! └───┴───┴───┴───┴───┘                    └────┴────┴───┘
//!                   ▲                              │
//!                   └──── merge + sort on flush ───┘
//!                        (> threshold, or quiet period)
//! ```
//!
//! ## Gap filling
//!
//! The first absent sequence `a` in `[min, max]` triggers `ReadLogs(a, max - 1)`.
//! The live maximum is left out since it keeps arriving with every status
//! update. Only one retransmission request is outstanding per probe.

use crate::config::LogSyncConfig;
use crate::wire::{LogRange, LogRecord, PredictionStatus, ProbeTemperatures, SessionInfo, VirtualSensors};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// One logged sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub sequence: u32,
    pub temperatures: ProbeTemperatures,
    pub virtual_sensors: VirtualSensors,
    pub prediction: Option<PredictionStatus>,
}

impl From<LogRecord> for DataPoint {
    fn from(record: LogRecord) -> Self {
        Self {
            sequence: record.sequence,
            temperatures: record.temperatures,
            virtual_sensors: record.virtual_sensors,
            prediction: record.prediction,
        }
    }
}

/// What happened to an inserted point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Appended in order
    Appended,
    /// Held in the staging buffer until the next flush
    Staged,
    /// Staged and the buffer went over its threshold and was flushed
    Flushed,
    /// Sequence already known
    Duplicate,
    /// Sequence above the probe's reported maximum
    BeyondMax,
    /// No session to put it in yet
    NoSession,
}

/// All points of one probe session
#[derive(Debug, Clone)]
pub struct LogSession {
    pub session_id: u32,
    pub sample_period: Duration,
    start_time: Option<Instant>,
    points: IndexMap<u32, DataPoint>,
    staging: IndexMap<u32, DataPoint>,
    last_staged_at: Option<Instant>,
}

impl LogSession {
    pub fn new(info: SessionInfo) -> Self {
        Self {
            session_id: info.session_id,
            sample_period: Duration::from_millis(info.sample_period_ms as u64),
            start_time: None,
            points: IndexMap::new(),
            staging: IndexMap::new(),
            last_staged_at: None,
        }
    }

    /// Estimated time of sequence 0, fixed by the first point
    pub fn start_time(&self) -> Option<Instant> {
        self.start_time
    }

    pub fn contains(&self, sequence: u32) -> bool {
        self.points.contains_key(&sequence) || self.staging.contains_key(&sequence)
    }

    /// Known points, staging included
    pub fn len(&self) -> usize {
        self.points.len() + self.staging.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn staged(&self) -> usize {
        self.staging.len()
    }

    /// Flushed points in sequence order
    pub fn points(&self) -> impl Iterator<Item = &DataPoint> {
        self.points.values()
    }

    pub fn get(&self, sequence: u32) -> Option<&DataPoint> {
        self.points
            .get(&sequence)
            .or_else(|| self.staging.get(&sequence))
    }

    fn insert(&mut self, point: DataPoint, now: Instant, threshold: usize) -> InsertOutcome {
        let sequence = point.sequence;
        if self.contains(sequence) {
            return InsertOutcome::Duplicate;
        }
        if self.start_time.is_none() {
            let offset = self.sample_period.saturating_mul(sequence);
            self.start_time = Some(now.checked_sub(offset).unwrap_or(now));
        }

        let in_order = match self.points.last() {
            None => self.staging.is_empty(),
            Some((last, _)) => last.checked_add(1) == Some(sequence),
        };
        if in_order {
            self.points.insert(sequence, point);
            return InsertOutcome::Appended;
        }

        self.staging.insert(sequence, point);
        self.last_staged_at = Some(now);
        if self.staging.len() > threshold {
            self.flush();
            return InsertOutcome::Flushed;
        }
        InsertOutcome::Staged
    }

    /// Merge staging into the store and restore sequence order
    pub fn flush(&mut self) -> usize {
        let count = self.staging.len();
        if count == 0 {
            return 0;
        }
        self.points.extend(self.staging.drain(..));
        self.points.sort_keys();
        self.last_staged_at = None;
        count
    }

    fn flush_if_quiet(&mut self, now: Instant, quiet: Duration) -> usize {
        match self.last_staged_at {
            Some(at) if now.saturating_duration_since(at) >= quiet => self.flush(),
            _ => 0,
        }
    }

    /// Lowest sequence in `range` not yet held
    pub fn first_missing(&self, range: LogRange) -> Option<u32> {
        if range.is_empty() {
            return None;
        }
        (range.min..=range.max).find(|sequence| !self.contains(*sequence))
    }

    /// Number of held sequences inside `range`
    pub fn known_in_range(&self, range: LogRange) -> u64 {
        if range.is_empty() {
            return 0;
        }
        if range.len() <= self.len() as u64 {
            (range.min..=range.max)
                .filter(|sequence| self.contains(*sequence))
                .count() as u64
        } else {
            self.points
                .keys()
                .chain(self.staging.keys())
                .filter(|sequence| range.contains(**sequence))
                .count() as u64
        }
    }

    /// Share of `range` held, 0..=100
    pub fn percent_synced(&self, range: LogRange) -> u8 {
        if range.is_empty() {
            return 100;
        }
        (self.known_in_range(range) * 100 / range.len()).min(100) as u8
    }
}

/// Range of an outstanding retransmission request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retransmission {
    pub min: u32,
    pub max: u32,
}

/// Whether a new reported range moved backwards
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeUpdate {
    Unchanged,
    Advanced,
    /// Max went down; the probe has probably restarted
    Regressed,
}

/// Log state of one probe across its sessions
#[derive(Debug, Clone)]
pub struct LogSynchronizer {
    config: LogSyncConfig,
    sessions: IndexMap<u32, LogSession>,
    active: Option<u32>,
    range: Option<LogRange>,
    in_flight: Option<Retransmission>,
}

impl LogSynchronizer {
    pub fn new(config: LogSyncConfig) -> Self {
        Self {
            config,
            sessions: IndexMap::new(),
            active: None,
            range: None,
            in_flight: None,
        }
    }

    /// Make `info` the active session; returns `true` for a new session id
    pub fn start_session(&mut self, info: SessionInfo) -> bool {
        if self.active == Some(info.session_id) {
            return false;
        }
        self.in_flight = None;
        self.active = Some(info.session_id);
        if self.sessions.contains_key(&info.session_id) {
            return false;
        }
        tracing::info!(session = info.session_id, "new log session");
        self.sessions.insert(info.session_id, LogSession::new(info));
        true
    }

    /// Detach the active session until the probe's session is read again
    ///
    /// Stored sessions are kept; `start_session` with the same id resumes
    /// its store, a new id starts a fresh one. Points offered meanwhile are
    /// refused with `NoSession`.
    pub fn suspend(&mut self) {
        if let Some(id) = self.active.take() {
            tracing::debug!(session = id, "log session suspended");
        }
        self.in_flight = None;
    }

    pub fn active_session(&self) -> Option<&LogSession> {
        self.active.and_then(|id| self.sessions.get(&id))
    }

    pub fn session(&self, session_id: u32) -> Option<&LogSession> {
        self.sessions.get(&session_id)
    }

    /// Session ids in the order they were first seen
    pub fn session_ids(&self) -> Vec<u32> {
        self.sessions.keys().copied().collect()
    }

    pub fn range(&self) -> Option<LogRange> {
        self.range
    }

    /// Record the probe's latest reported log range
    pub fn update_range(&mut self, range: LogRange) -> RangeUpdate {
        let update = match self.range {
            Some(previous) if range.max < previous.max => RangeUpdate::Regressed,
            Some(previous) if range == previous => RangeUpdate::Unchanged,
            _ => RangeUpdate::Advanced,
        };
        if update == RangeUpdate::Regressed {
            tracing::debug!(
                previous = ?self.range,
                ?range,
                "log range moved backwards"
            );
            self.in_flight = None;
        }
        self.range = Some(range);
        update
    }

    /// Add a point to the active session
    pub fn insert(&mut self, point: DataPoint, now: Instant) -> InsertOutcome {
        if let Some(range) = self.range {
            if point.sequence > range.max {
                tracing::trace!(sequence = point.sequence, max = range.max, "point beyond max");
                return InsertOutcome::BeyondMax;
            }
        }
        let threshold = self.config.flush_threshold;
        match self.active.and_then(|id| self.sessions.get_mut(&id)) {
            Some(session) => session.insert(point, now, threshold),
            None => InsertOutcome::NoSession,
        }
    }

    /// Flush the active session if its staging buffer has gone quiet
    pub fn flush_if_quiet(&mut self, now: Instant) -> usize {
        let quiet = self.config.flush_quiet();
        match self.active.and_then(|id| self.sessions.get_mut(&id)) {
            Some(session) => session.flush_if_quiet(now, quiet),
            None => 0,
        }
    }

    /// Range to request next, if any and none is outstanding
    pub fn next_retransmission(&self) -> Option<Retransmission> {
        if self.in_flight.is_some() {
            return None;
        }
        let range = self.range?;
        let first = self.active_session()?.first_missing(range)?;
        (first < range.max).then(|| Retransmission {
            min: first,
            max: range.max - 1,
        })
    }

    pub fn in_flight(&self) -> Option<Retransmission> {
        self.in_flight
    }

    pub fn mark_requested(&mut self, request: Retransmission) {
        self.in_flight = Some(request);
    }

    /// The outstanding request finished, failed or timed out
    pub fn clear_in_flight(&mut self) {
        self.in_flight = None;
    }

    /// Share of the reported range held by the active session
    pub fn percent_synced(&self) -> u8 {
        match (self.active_session(), self.range) {
            (Some(session), Some(range)) => session.percent_synced(range),
            _ => 0,
        }
    }
}
