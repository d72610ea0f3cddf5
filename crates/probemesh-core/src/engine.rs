//! Session lifecycle and protocol engine
//!
//! [`Engine`] is the single owner of all probe and repeater state. It is a
//! synchronous reactor: every input carries the current time and nothing
//! inside blocks or spawns. The [`runtime`](crate::runtime) module drives
//! it from a tokio task.
//!
//! ```text
//!  TransportEvent ──► FrameDecoder ──► Inbound ──┬─► Arbiter ──► Probe display
//!                                                │        └───► LogSynchronizer
//!                                                │        └───► PredictionSmoother
//!                                                └─► RequestCorrelator (replies)
//!
//!  slow_tick ──► sweep / staleness / reachability / gap scan
//!                                     │
//!                       RouteSelector ┴─► Request frame ──► Transport::send
//! ```
//!
//! ## Lifecycle
//!
//! - The first status report of a probe (direct or relayed) issues a
//!   session info read; a new session id starts a new log session.
//! - A log range that moves backwards re-reads the session info.
//! - Losing a probe's direct link fails its pending direct requests and
//!   clears its arbitration lockouts and in-flight log request. Its session
//!   info is forgotten too; no points are stored until the next status
//!   report has re-read it.
//! - Losing a repeater link removes it from routing.

use crate::arbitration::Channel;
use crate::config::EngineConfig;
use crate::correlator::{Abandoned, Completion, CorrelationKey, RequestCorrelator};
use crate::error::RequestError;
use crate::events::EngineEvent;
use crate::log_sync::{DataPoint, RangeUpdate, Retransmission};
use crate::mesh::{RepeaterSnapshot, Route, RouteSelector};
use crate::prediction::PredictionInfo;
use crate::probe::{Probe, ProbeSnapshot};
use crate::transport::{DeviceKind, LinkId, Transport, TransportEvent};
use crate::wire::{
    decode_advertisement, decode_status, Frame, FrameDecoder, FrameFormat, Inbound, MessageClass,
    Request, RequestId, Response, Telemetry,
};
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;
use tokio::sync::{broadcast, oneshot};

/// Outstanding log retransmission for one probe
#[derive(Debug, Clone)]
struct LogRequest {
    range: Retransmission,
    /// One correlator entry per path the request went out on
    keys: Vec<CorrelationKey>,
}

/// Protocol engine over a [`Transport`]
pub struct Engine<T: Transport> {
    config: EngineConfig,
    transport: T,
    probes: BTreeMap<u32, Probe>,
    routes: RouteSelector,
    correlator: RequestCorrelator,
    decoders: HashMap<LinkId, FrameDecoder>,
    log_requests: HashMap<u32, LogRequest>,
    /// Last percent published per probe
    progress: HashMap<u32, u8>,
    events: broadcast::Sender<EngineEvent>,
}

impl<T: Transport> Engine<T> {
    pub fn new(config: EngineConfig, transport: T) -> Self {
        let (events, _) = broadcast::channel(config.runtime.event_buffer.max(1));
        Self {
            routes: RouteSelector::new(config.route.clone()),
            correlator: RequestCorrelator::new(config.correlator.clone()),
            config,
            transport,
            probes: BTreeMap::new(),
            decoders: HashMap::new(),
            log_requests: HashMap::new(),
            progress: HashMap::new(),
            events,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<EngineEvent> {
        self.events.clone()
    }

    /// Requests awaiting a response
    pub fn pending_requests(&self) -> usize {
        self.correlator.len()
    }

    // =========================================================================
    // Inputs
    // =========================================================================

    pub fn handle_event(&mut self, event: TransportEvent, now: Instant) {
        match event {
            TransportEvent::Connected { link, device } => self.on_connected(link, device, now),
            TransportEvent::Disconnected { link } => self.on_disconnected(link),
            TransportEvent::FrameReceived { link, data } => self.on_bytes(link, &data, now),
            TransportEvent::StatusNotification { link, data } => {
                let Some(serial) = self.routes.probe_on_link(link) else {
                    tracing::debug!(%link, "status notification on a link with no probe");
                    return;
                };
                match decode_status(&data) {
                    Some(telemetry) => self.on_report(serial, telemetry, None, true, now),
                    None => tracing::trace!(%link, len = data.len(), "malformed status dropped"),
                }
            }
            TransportEvent::Advertisement { link, rssi, data } => {
                let Some(adv) = decode_advertisement(&data) else {
                    tracing::trace!(%link, len = data.len(), "malformed advertisement dropped");
                    return;
                };
                if adv.hop_count.is_some() && self.routes.is_repeater(link) {
                    self.routes.record_rssi(link, f32::from(rssi));
                    self.mark_reachable(link, &[adv.serial], now);
                }
                self.on_report(adv.serial, adv.telemetry, adv.hop_count, false, now);
            }
            TransportEvent::Rssi { link, rssi } => self.routes.record_rssi(link, f32::from(rssi)),
        }
    }

    /// Staging flush and prediction interpolation (every 200 ms)
    pub fn fast_tick(&mut self, now: Instant) {
        let mut events = Vec::new();
        for (serial, probe) in self.probes.iter_mut() {
            let flushed = probe.log.flush_if_quiet(now);
            if flushed > 0 {
                tracing::trace!(serial, flushed, "log staging flushed");
            }
            if let Some(info) = probe.prediction.tick(now) {
                events.push(EngineEvent::PredictionUpdated {
                    serial: *serial,
                    info: Some(info),
                });
            }
        }
        for event in events {
            self.emit(event);
        }
    }

    /// Timeouts, staleness, reachability expiry and gap scan (every 1 s)
    pub fn slow_tick(&mut self, now: Instant) {
        let abandoned = self.correlator.sweep(now);
        self.handle_abandoned(&abandoned);

        let mut links: Vec<LinkId> = self
            .routes
            .expire(now)
            .into_iter()
            .map(|(link, _)| link)
            .collect();
        links.dedup();
        for link in links {
            self.publish_repeater(link);
        }

        self.check_staleness(now);
        self.scan_gaps(now);
    }

    /// Send `request` to `serial` over the best route
    ///
    /// The receiver always completes: with the response, or with
    /// [`RequestError::NoRoute`] right away when the probe is unreachable.
    pub fn request(
        &mut self,
        serial: u32,
        request: Request,
        now: Instant,
    ) -> oneshot::Receiver<Completion> {
        match self.dispatch(serial, &request, now) {
            Ok((key, rx)) => {
                match request {
                    Request::ReadSessionInfo => {
                        if let Some(probe) = self.probes.get_mut(&serial) {
                            probe.session_requested = true;
                        }
                    }
                    Request::ReadLogs { min, max } => {
                        self.track_log_request(serial, Retransmission { min, max }, vec![key]);
                    }
                    _ => {}
                }
                rx
            }
            Err(error) => {
                tracing::debug!(serial, class = ?request.class(), %error, "request not sent");
                let (tx, rx) = oneshot::channel();
                let _ = tx.send(Err(error));
                rx
            }
        }
    }

    /// Ask the transport to open `link`; state follows its `Connected` event
    pub fn connect(&mut self, link: LinkId) {
        tracing::debug!(%link, "connect requested");
        self.transport.connect(link);
    }

    /// Ask the transport to close `link`; state follows its `Disconnected` event
    pub fn disconnect(&mut self, link: LinkId) {
        tracing::debug!(%link, "disconnect requested");
        self.transport.disconnect(link);
    }

    /// Fail every pending request; the engine is going away
    pub fn shutdown(&mut self) {
        tracing::info!(pending = self.correlator.len(), "engine shutting down");
        self.correlator.fail_all(RequestError::EngineStopped);
        self.log_requests.clear();
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub fn probe(&self, serial: u32) -> Option<ProbeSnapshot> {
        self.probes
            .get(&serial)
            .map(|probe| probe.snapshot(self.routes.direct_link(serial)))
    }

    /// All known probes, ordered by serial
    pub fn probes(&self) -> Vec<ProbeSnapshot> {
        self.probes
            .values()
            .map(|probe| probe.snapshot(self.routes.direct_link(probe.serial)))
            .collect()
    }

    pub fn prediction(&self, serial: u32) -> Option<PredictionInfo> {
        self.probes
            .get(&serial)
            .and_then(|probe| probe.prediction.info().cloned())
    }

    pub fn percent_synced(&self, serial: u32) -> Option<u8> {
        self.probes.get(&serial).map(|probe| probe.log.percent_synced())
    }

    /// Flushed points of a session in sequence order (`None` = active session)
    pub fn session_log(&self, serial: u32, session_id: Option<u32>) -> Option<Vec<DataPoint>> {
        let log = &self.probes.get(&serial)?.log;
        let session = match session_id {
            Some(id) => log.session(id)?,
            None => log.active_session()?,
        };
        Some(session.points().cloned().collect())
    }

    pub fn session_ids(&self, serial: u32) -> Vec<u32> {
        self.probes
            .get(&serial)
            .map(|probe| probe.log.session_ids())
            .unwrap_or_default()
    }

    pub fn repeaters(&self) -> Vec<RepeaterSnapshot> {
        self.routes
            .repeaters()
            .into_iter()
            .map(|node| node.snapshot())
            .collect()
    }

    // =========================================================================
    // Links
    // =========================================================================

    fn on_connected(&mut self, link: LinkId, device: DeviceKind, now: Instant) {
        match device {
            DeviceKind::Probe { serial } => {
                tracing::info!(%link, serial, "probe connected");
                self.decoders
                    .insert(link, FrameDecoder::new(FrameFormat::DirectResponse));
                self.routes.set_direct(serial, link);
                self.ensure_probe(serial);
            }
            DeviceKind::Repeater => {
                tracing::info!(%link, "repeater connected");
                self.decoders.insert(link, FrameDecoder::new(FrameFormat::Mesh));
                self.routes.add_repeater(link, now);
                self.publish_repeater(link);
            }
        }
    }

    fn on_disconnected(&mut self, link: LinkId) {
        if let Some(decoder) = self.decoders.remove(&link) {
            if decoder.dropped() > 0 {
                tracing::debug!(%link, dropped = decoder.dropped(), "discarded bytes on link");
            }
        }
        let abandoned = self.correlator.purge_link(link);
        self.handle_abandoned(&abandoned);

        if let Some(serial) = self.routes.clear_direct_link(link) {
            tracing::info!(%link, serial, "probe disconnected");
            if let Some(probe) = self.probes.get_mut(&serial) {
                probe.clear_link_state();
            }
            self.log_requests.remove(&serial);
            self.emit(EngineEvent::LinkDisconnected {
                link,
                serial: Some(serial),
            });
        } else if self.routes.remove_repeater(link).is_some() {
            tracing::info!(%link, "repeater disconnected");
            self.emit(EngineEvent::LinkDisconnected { link, serial: None });
        }
    }

    fn mark_reachable(&mut self, link: LinkId, serials: &[u32], now: Instant) {
        let mut changed = false;
        for serial in serials {
            changed |= self.routes.mark_reachable(link, *serial, now);
        }
        if changed {
            self.publish_repeater(link);
        }
    }

    fn publish_repeater(&mut self, link: LinkId) {
        if let Some(node) = self.routes.repeater(link) {
            let reachable = node.reachable_serials();
            self.emit(EngineEvent::RepeaterUpdated { link, reachable });
        }
    }

    // =========================================================================
    // Inbound traffic
    // =========================================================================

    fn on_bytes(&mut self, link: LinkId, data: &[u8], now: Instant) {
        let Some(decoder) = self.decoders.get_mut(&link) else {
            tracing::debug!(%link, len = data.len(), "bytes on unknown link");
            return;
        };
        for frame in decoder.feed(data) {
            self.on_frame(link, &frame, now);
        }
    }

    fn on_frame(&mut self, link: LinkId, frame: &Frame, now: Instant) {
        let Some(inbound) = Inbound::from_frame(frame) else {
            tracing::trace!(%link, message_type = frame.message_type, "unhandled frame");
            return;
        };
        match inbound {
            Inbound::ProbeStatus {
                serial,
                hop_count,
                telemetry,
            } => {
                self.mark_reachable(link, &[serial], now);
                // a relayed report is never as close as a direct one
                self.on_report(serial, telemetry, Some(hop_count.max(1)), true, now);
            }
            Inbound::Heartbeat { serials } => self.mark_reachable(link, &serials, now),
            Inbound::Reply {
                class,
                response_to,
                serial,
                success,
                response,
            } => {
                let key = match response_to {
                    Some(id) => CorrelationKey::Mesh(id),
                    None => CorrelationKey::Direct(link),
                };
                let serial = serial
                    .or_else(|| self.correlator.get(class, key).map(|p| p.serial))
                    .or_else(|| self.routes.probe_on_link(link));
                let result = match (success, response) {
                    (false, _) => Err(RequestError::Rejected),
                    (true, Some(response)) => Ok(response),
                    (true, None) => Err(RequestError::UnexpectedResponse),
                };
                self.on_reply(class, key, serial, result, now);
            }
        }
    }

    fn on_reply(
        &mut self,
        class: MessageClass,
        key: CorrelationKey,
        serial: Option<u32>,
        result: Completion,
        now: Instant,
    ) {
        let Some(serial) = serial else {
            tracing::debug!(?class, ?key, "reply for unknown probe");
            return;
        };
        let response = match result {
            Ok(response) => response,
            Err(error) => {
                tracing::debug!(serial, ?class, %error, "request failed on device");
                match class {
                    MessageClass::ReadLogs => self.finish_log_request(serial, Err(error)),
                    MessageClass::ReadSessionInfo => {
                        if let Some(probe) = self.probes.get_mut(&serial) {
                            probe.session_requested = false;
                        }
                        self.correlator.resolve(class, key, Err(error));
                    }
                    _ => {
                        self.correlator.resolve(class, key, Err(error));
                    }
                }
                return;
            }
        };

        self.apply_response(serial, &response, now);

        if let Response::LogRecord(record) = &response {
            // a log read completes with its last record
            match self.log_requests.get(&serial) {
                Some(pending) if pending.range.max == record.sequence => {
                    self.finish_log_request(serial, Ok(response));
                }
                Some(_) => {}
                None => {
                    self.correlator.resolve(class, key, Ok(response));
                }
            }
            return;
        }
        self.correlator.resolve(class, key, Ok(response));
    }

    fn apply_response(&mut self, serial: u32, response: &Response, now: Instant) {
        let Some(probe) = self.probes.get_mut(&serial) else {
            tracing::debug!(serial, "response for unknown probe");
            return;
        };
        match response {
            Response::SessionInfo(info) => {
                probe.session_requested = false;
                probe.session = Some(*info);
                if probe.log.start_session(*info) {
                    self.log_requests.remove(&serial);
                    self.emit(EngineEvent::SessionStarted {
                        serial,
                        session: *info,
                    });
                }
                self.publish_progress(serial);
            }
            Response::LogRecord(record) => {
                let outcome = probe.log.insert(DataPoint::from(record.clone()), now);
                tracing::trace!(serial, sequence = record.sequence, ?outcome, "log record");
                self.publish_progress(serial);
            }
            Response::OverTemperature(flag) => probe.over_temperature = Some(*flag),
            Response::FirmwareRevision(text) => {
                probe.device_info.firmware_revision = Some(text.clone());
            }
            Response::HardwareRevision(text) => {
                probe.device_info.hardware_revision = Some(text.clone());
            }
            Response::ModelInfo(text) => probe.device_info.model = Some(text.clone()),
            Response::Ack(_) => {}
        }
    }

    /// Arbitrate a report and fan it out to log and prediction state
    ///
    /// `with_log` is set for status reports, which carry a log range;
    /// advertisements only update the displayed state.
    fn on_report(
        &mut self,
        serial: u32,
        telemetry: Telemetry,
        hop_count: Option<u8>,
        with_log: bool,
        now: Instant,
    ) {
        self.ensure_probe(serial);
        let Some(probe) = self.probes.get_mut(&serial) else {
            return;
        };
        let (channel, verdict) = probe.offer(&telemetry, hop_count, now, &self.config);
        if !verdict.accepted() {
            return;
        }

        let mut events = vec![EngineEvent::TelemetryUpdated {
            serial,
            channel,
            hop_count,
        }];
        let mut reread_session = false;

        if with_log && channel == Channel::Normal {
            if let Some(range) = telemetry.log_range {
                if probe.log.update_range(range) == RangeUpdate::Regressed {
                    tracing::info!(serial, ?range, "log range went backwards, re-reading session");
                    reread_session = true;
                }
                // points wait for the session read so they land in the right session
                if !reread_session && !probe.session_requested {
                    probe.log.insert(
                        DataPoint {
                            sequence: range.max,
                            temperatures: telemetry.temperatures,
                            virtual_sensors: telemetry.virtual_sensors,
                            prediction: telemetry.prediction,
                        },
                        now,
                    );
                }
            }
            if let Some(status) = &telemetry.prediction {
                let sequence = telemetry.log_range.map_or(0, |range| range.max);
                let core = telemetry
                    .core_temperature()
                    .unwrap_or_else(|| status.estimated_core());
                if let Some(info) = probe.prediction.update(sequence, status, core, now) {
                    events.push(EngineEvent::PredictionUpdated {
                        serial,
                        info: Some(info),
                    });
                }
            }
        }

        let needs_session =
            with_log && (reread_session || (probe.session.is_none() && !probe.session_requested));

        for event in events {
            self.emit(event);
        }
        if with_log {
            self.publish_progress(serial);
        }
        if reread_session {
            self.log_requests.remove(&serial);
        }
        if needs_session {
            self.request_session_info(serial, now);
        }
    }

    // =========================================================================
    // Outbound requests
    // =========================================================================

    fn dispatch(
        &mut self,
        serial: u32,
        request: &Request,
        now: Instant,
    ) -> Result<(CorrelationKey, oneshot::Receiver<Completion>), RequestError> {
        let route = self
            .routes
            .select(serial, now)
            .ok_or(RequestError::NoRoute(serial))?;
        Ok(self.send_on(serial, request, route, now))
    }

    fn send_on(
        &mut self,
        serial: u32,
        request: &Request,
        route: Route,
        now: Instant,
    ) -> (CorrelationKey, oneshot::Receiver<Completion>) {
        let (key, frame) = match route {
            Route::Direct(link) => (CorrelationKey::Direct(link), request.to_direct_frame()),
            Route::Repeater(_) => {
                let id = RequestId::random();
                (CorrelationKey::Mesh(id), request.to_mesh_frame(serial, id))
            }
        };
        let link = route.link();
        let class = request.class();
        tracing::debug!(serial, %link, ?class, ?key, "sending request");
        let rx = self.correlator.register(class, key, link, serial, now);
        self.transport.send(link, frame.to_bytes());
        (key, rx)
    }

    fn request_session_info(&mut self, serial: u32, now: Instant) {
        match self.dispatch(serial, &Request::ReadSessionInfo, now) {
            Ok(_) => {
                if let Some(probe) = self.probes.get_mut(&serial) {
                    probe.session_requested = true;
                }
            }
            Err(error) => tracing::trace!(serial, %error, "session info read deferred"),
        }
    }

    fn track_log_request(&mut self, serial: u32, range: Retransmission, keys: Vec<CorrelationKey>) {
        if let Some(probe) = self.probes.get_mut(&serial) {
            probe.log.mark_requested(range);
        }
        self.log_requests.insert(serial, LogRequest { range, keys });
    }

    fn finish_log_request(&mut self, serial: u32, result: Completion) {
        if let Some(pending) = self.log_requests.remove(&serial) {
            for key in pending.keys {
                self.correlator
                    .resolve(MessageClass::ReadLogs, key, result.clone());
            }
        }
        if let Some(probe) = self.probes.get_mut(&serial) {
            probe.log.clear_in_flight();
        }
    }

    fn handle_abandoned(&mut self, abandoned: &[Abandoned]) {
        for entry in abandoned {
            match entry.class {
                MessageClass::ReadSessionInfo => {
                    if let Some(probe) = self.probes.get_mut(&entry.serial) {
                        probe.session_requested = false;
                    }
                }
                MessageClass::ReadLogs => {
                    let Some(pending) = self.log_requests.get_mut(&entry.serial) else {
                        continue;
                    };
                    pending.keys.retain(|key| *key != entry.key);
                    if pending.keys.is_empty() {
                        self.log_requests.remove(&entry.serial);
                        if let Some(probe) = self.probes.get_mut(&entry.serial) {
                            probe.log.clear_in_flight();
                        }
                    }
                }
                _ => {}
            }
        }
    }

    // =========================================================================
    // Periodic work
    // =========================================================================

    fn check_staleness(&mut self, now: Instant) {
        let timeout = self.config.probe.stale_timeout();
        let mut events = Vec::new();
        for (serial, probe) in self.probes.iter_mut() {
            let silent = probe
                .last_update
                .is_some_and(|at| now.saturating_duration_since(at) > timeout);
            if silent && !probe.stale {
                tracing::info!(serial, "probe went stale");
                probe.stale = true;
                events.push(EngineEvent::ProbeStale { serial: *serial });
            }
            if probe.prediction.check_stale(now) {
                events.push(EngineEvent::PredictionUpdated {
                    serial: *serial,
                    info: None,
                });
            }
        }
        for event in events {
            self.emit(event);
        }
    }

    /// Issue missing session reads and log retransmissions
    fn scan_gaps(&mut self, now: Instant) {
        let serials: Vec<u32> = self.probes.keys().copied().collect();
        for serial in serials {
            let Some(probe) = self.probes.get(&serial) else {
                continue;
            };
            if probe.session.is_none() {
                if !probe.session_requested {
                    self.request_session_info(serial, now);
                }
                continue;
            }
            let Some(range) = probe.log.next_retransmission() else {
                continue;
            };

            let targets = self.routes.broadcast_targets(serial, now);
            if targets.is_empty() {
                tracing::trace!(serial, "no route for log retransmission");
                continue;
            }
            tracing::debug!(
                serial,
                min = range.min,
                max = range.max,
                paths = targets.len(),
                "requesting missing log records"
            );
            let request = Request::ReadLogs {
                min: range.min,
                max: range.max,
            };
            let keys = targets
                .into_iter()
                .map(|route| self.send_on(serial, &request, route, now).0)
                .collect();
            self.track_log_request(serial, range, keys);
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn ensure_probe(&mut self, serial: u32) {
        if self.probes.contains_key(&serial) {
            return;
        }
        tracing::info!(serial, "probe discovered");
        self.probes.insert(serial, Probe::new(serial, &self.config));
        self.emit(EngineEvent::ProbeDiscovered { serial });
    }

    fn publish_progress(&mut self, serial: u32) {
        let Some(percent) = self.percent_synced(serial) else {
            return;
        };
        if self.progress.insert(serial, percent) != Some(percent) {
            self.emit(EngineEvent::LogSyncProgress { serial, percent });
        }
    }

    fn emit(&self, event: EngineEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }
}
