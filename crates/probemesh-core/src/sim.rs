//! Simulated devices
//!
//! A [`SimulatedProbe`] logs a synthetic cook and answers requests the way
//! firmware does. A [`SimulatedRepeater`] relays status and requests for
//! every probe it hears and drops frames at a configured rate.
//! [`SimulatedNetwork`] plays the radio stack on the far side of a
//! [`ChannelTransport`](crate::transport::ChannelTransport).
//!
//! ```text
//!   Engine ──TransportCommand──► SimulatedNetwork ──┬─► SimulatedProbe (direct)
//!     ▲                                             └─► SimulatedRepeater ──► probes
//!     └────────────────TransportEvent◄──────────────────┘
//! ```

use crate::transport::{DeviceKind, LinkId, TransportCommand, TransportEvent};
use crate::wire::message::{
    direct_response_frame, heartbeat_frames, mesh_response_frame, probe_status_frame,
};
use crate::wire::telemetry::{celsius_to_raw, encode_status, PredictionType, SENSOR_COUNT};
use crate::wire::{
    BatteryStatus, FoodSafeData, Frame, FrameFormat, FrameKind, LogRange, LogRecord,
    MessageClass, PredictionMode, PredictionState, PredictionStatus, ProbeColor, ProbeId,
    ProbeMode, ProbeTemperatures, Request, RequestId, Response, SessionInfo, Telemetry,
    VirtualSensors,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::mpsc;

/// Bytes per transport notification
pub const CHUNK_SIZE: usize = 20;

/// Core temperature rise per logged sample, °C
const HEATING_PER_SAMPLE: f64 = 0.05;

#[derive(Debug, Clone, Copy)]
struct Target {
    set_point: f64,
    heat_start: f64,
    mode: PredictionMode,
}

/// Probe firmware stand-in
#[derive(Debug, Clone)]
pub struct SimulatedProbe {
    serial: u32,
    session: SessionInfo,
    records: Vec<LogRecord>,
    id: ProbeId,
    color: ProbeColor,
    target: Option<Target>,
    food_safe: Option<FoodSafeData>,
}

impl SimulatedProbe {
    /// A probe with one logged sample in a fresh session
    pub fn new(serial: u32, session_id: u32, sample_period_ms: u16) -> Self {
        let mut probe = Self {
            serial,
            session: SessionInfo {
                session_id,
                sample_period_ms,
            },
            records: Vec::new(),
            id: ProbeId::from_raw(0),
            color: ProbeColor::Yellow,
            target: None,
            food_safe: None,
        };
        probe.advance();
        probe
    }

    /// Pre-fill `count` more samples of history
    pub fn with_history(mut self, count: u32) -> Self {
        for _ in 0..count {
            self.advance();
        }
        self
    }

    pub fn serial(&self) -> u32 {
        self.serial
    }

    pub fn session(&self) -> SessionInfo {
        self.session
    }

    pub fn range(&self) -> LogRange {
        LogRange::new(0, self.records.len().saturating_sub(1) as u32)
    }

    pub fn record(&self, sequence: u32) -> Option<&LogRecord> {
        self.records.get(sequence as usize)
    }

    /// Log the next sample; returns its sequence number
    pub fn advance(&mut self) -> u32 {
        let sequence = self.records.len() as u32;
        let record = self.sample(sequence);
        self.records.push(record);
        sequence
    }

    /// Power cycle: a new session with an empty log
    pub fn restart(&mut self, session_id: u32) {
        self.session.session_id = session_id;
        self.records.clear();
        self.target = None;
        self.advance();
    }

    fn sample(&self, sequence: u32) -> LogRecord {
        let mut raw = [0u16; SENSOR_COUNT];
        for (i, value) in raw.iter_mut().enumerate() {
            let rate = HEATING_PER_SAMPLE * (1.0 + i as f64 * 0.5);
            *value = celsius_to_raw((4.0 + sequence as f64 * rate).min(250.0));
        }
        let temperatures = ProbeTemperatures::from_raw(raw);
        let core = temperatures.values[0];
        LogRecord {
            sequence,
            temperatures,
            battery: BatteryStatus::Ok,
            virtual_sensors: VirtualSensors::default(),
            prediction: Some(self.prediction_at(core)),
        }
    }

    fn prediction_at(&self, core: f64) -> PredictionStatus {
        let Some(target) = self.target else {
            return PredictionStatus {
                state: PredictionState::ProbeInserted,
                ..PredictionStatus::default()
            };
        };
        let period = f64::from(self.session.sample_period_ms.max(1)) / 1000.0;
        let remaining = ((target.set_point - core).max(0.0) / HEATING_PER_SAMPLE * period) as u32;
        PredictionStatus {
            state: if core >= target.set_point {
                PredictionState::RemovalPredictionDone
            } else {
                PredictionState::Predicting
            },
            mode: target.mode,
            kind: PredictionType::Removal,
            set_point_raw: ((target.set_point * 10.0).round() as u16).min(0x3FF),
            heat_start_raw: ((target.heat_start * 10.0).round() as u16).min(0x3FF),
            seconds_remaining: remaining.min(0x1_FFFF),
            estimated_core_raw: (((core + 20.0) * 10.0).round() as u16).min(0x7FF),
        }
    }

    /// Current status notification contents
    pub fn telemetry(&self) -> Telemetry {
        let last = self.records.last();
        Telemetry {
            temperatures: last.map_or(ProbeTemperatures::from_raw([0; SENSOR_COUNT]), |r| {
                r.temperatures
            }),
            mode: ProbeMode::Normal,
            color: self.color,
            id: self.id,
            battery: BatteryStatus::Ok,
            virtual_sensors: VirtualSensors::default(),
            log_range: Some(self.range()),
            prediction: last.and_then(|r| r.prediction),
            food_safe_data: None,
            food_safe_status: None,
            overheating: None,
        }
    }

    pub fn status_bytes(&self) -> Vec<u8> {
        encode_status(&self.telemetry())
    }

    /// Answer a request; log reads produce one response per record
    pub fn handle(&mut self, request: &Request) -> Vec<(Response, bool)> {
        let ack = |class: MessageClass| vec![(Response::Ack(class), true)];
        match request {
            Request::SetProbeId(id) => {
                self.id = *id;
                ack(MessageClass::SetProbeId)
            }
            Request::SetProbeColor(color) => {
                self.color = *color;
                ack(MessageClass::SetProbeColor)
            }
            Request::ReadSessionInfo => vec![(Response::SessionInfo(self.session), true)],
            Request::ReadLogs { min, max } => {
                let records: Vec<_> = self
                    .records
                    .iter()
                    .filter(|r| (*min..=*max).contains(&r.sequence))
                    .map(|r| (Response::LogRecord(r.clone()), true))
                    .collect();
                if records.is_empty() {
                    vec![(Response::Ack(MessageClass::ReadLogs), false)]
                } else {
                    records
                }
            }
            Request::SetPrediction { set_point, mode } => {
                let core = self
                    .records
                    .last()
                    .map_or(0.0, |r| r.temperatures.values[0]);
                self.target = (*mode != PredictionMode::None).then_some(Target {
                    set_point: *set_point,
                    heat_start: core,
                    mode: *mode,
                });
                ack(MessageClass::SetPrediction)
            }
            Request::ReadOverTemperature => {
                let hot = self
                    .records
                    .last()
                    .is_some_and(|r| r.temperatures.values.iter().any(|t| *t > 100.0));
                vec![(Response::OverTemperature(hot), true)]
            }
            Request::ConfigureFoodSafe(data) => {
                self.food_safe = Some(*data);
                ack(MessageClass::ConfigureFoodSafe)
            }
            Request::ResetFoodSafe => {
                let configured = self.food_safe.take().is_some();
                vec![(Response::Ack(MessageClass::ResetFoodSafe), configured)]
            }
            Request::ReadFirmwareRevision => {
                vec![(Response::FirmwareRevision("v2.4.1".into()), true)]
            }
            Request::ReadHardwareRevision => {
                vec![(Response::HardwareRevision("CP02".into()), true)]
            }
            Request::ReadModelInfo => vec![(Response::ModelInfo("SIM-PROBE".into()), true)],
        }
    }

    /// Answer a direct-link request frame with concatenated reply frames
    pub fn answer_direct(&mut self, data: &[u8]) -> Vec<u8> {
        let Some(request) = Frame::from_bytes(data, FrameFormat::DirectRequest)
            .and_then(|frame| decode_request(frame.message_type, &frame.payload))
        else {
            tracing::debug!(serial = self.serial, "simulated probe ignored a request");
            return Vec::new();
        };
        self.handle(&request)
            .iter()
            .flat_map(|(response, success)| direct_response_frame(response, *success).to_bytes())
            .collect()
    }
}

fn decode_request(message_type: u8, payload: &[u8]) -> Option<Request> {
    Request::decode(MessageClass::from_byte(message_type)?, payload)
}

/// Lossy repeater stand-in
#[derive(Debug, Clone)]
pub struct SimulatedRepeater {
    pub link: LinkId,
    hop_count: u8,
    loss: f64,
    rng: StdRng,
}

impl SimulatedRepeater {
    /// `loss` is the chance in 0..=1 that any single frame is dropped
    pub fn new(link: LinkId, hop_count: u8, loss: f64, seed: u64) -> Self {
        Self {
            link,
            hop_count,
            loss: loss.clamp(0.0, 1.0),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn delivered(&mut self) -> bool {
        !self.rng.gen_bool(self.loss)
    }

    pub fn relay_status(&mut self, probe: &SimulatedProbe) -> Option<Vec<u8>> {
        if !self.delivered() {
            return None;
        }
        let frame = probe_status_frame(
            probe.serial,
            self.hop_count,
            &probe.status_bytes(),
            RequestId::random(),
        );
        Some(frame.to_bytes())
    }

    pub fn heartbeat(&mut self, serials: &[u32]) -> Option<Vec<u8>> {
        self.delivered().then(|| {
            heartbeat_frames(serials)
                .iter()
                .flat_map(Frame::to_bytes)
                .collect()
        })
    }

    /// Forward a mesh request to the addressed probe and relay its replies
    pub fn relay_request(&mut self, data: &[u8], probes: &mut [SimulatedProbe]) -> Vec<u8> {
        let Some(frame) = Frame::from_bytes(data, FrameFormat::Mesh) else {
            return Vec::new();
        };
        let FrameKind::MeshRequest { request_id } = frame.kind else {
            return Vec::new();
        };
        let Some(serial) = frame
            .payload
            .get(..4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        else {
            return Vec::new();
        };
        let Some(request) = decode_request(frame.message_type, &frame.payload[4..]) else {
            return Vec::new();
        };
        let Some(probe) = probes.iter_mut().find(|p| p.serial == serial) else {
            return Vec::new();
        };
        if !self.delivered() {
            tracing::trace!(link = %self.link, serial, "simulated loss of request");
            return Vec::new();
        }

        let mut out = Vec::new();
        for (response, success) in probe.handle(&request) {
            if self.delivered() {
                let reply = mesh_response_frame(
                    serial,
                    &response,
                    RequestId::random(),
                    request_id,
                    success,
                );
                out.extend_from_slice(&reply.to_bytes());
            }
        }
        out
    }
}

/// Radio stack stand-in driving simulated devices
#[derive(Debug)]
pub struct SimulatedNetwork {
    probes: Vec<SimulatedProbe>,
    direct: HashMap<LinkId, usize>,
    repeaters: Vec<SimulatedRepeater>,
    connected: HashSet<LinkId>,
    sample_interval: Duration,
}

impl SimulatedNetwork {
    pub fn new(sample_interval: Duration) -> Self {
        Self {
            probes: Vec::new(),
            direct: HashMap::new(),
            repeaters: Vec::new(),
            connected: HashSet::new(),
            sample_interval,
        }
    }

    /// Returns the probe's index
    pub fn add_probe(&mut self, probe: SimulatedProbe) -> usize {
        self.probes.push(probe);
        self.probes.len() - 1
    }

    /// Give probe `index` a direct link
    pub fn connect_direct(&mut self, index: usize, link: LinkId) {
        self.direct.insert(link, index);
    }

    pub fn add_repeater(&mut self, repeater: SimulatedRepeater) {
        self.repeaters.push(repeater);
    }

    /// Run until the engine side closes its command channel
    pub async fn run(
        mut self,
        events: mpsc::Sender<TransportEvent>,
        mut outbound: mpsc::UnboundedReceiver<TransportCommand>,
    ) {
        let mut links: Vec<LinkId> = self.direct.keys().copied().collect();
        links.extend(self.repeaters.iter().map(|r| r.link));
        links.sort();
        for link in links {
            if !self.bring_up(link, &events).await {
                return;
            }
        }

        let mut ticker = tokio::time::interval(self.sample_interval.max(Duration::from_millis(1)));
        loop {
            let delivered = tokio::select! {
                command = outbound.recv() => match command {
                    Some(command) => self.execute(command, &events).await,
                    None => false,
                },
                _ = ticker.tick() => self.sample(&events).await,
            };
            if !delivered {
                break;
            }
        }
        tracing::debug!("simulated network stopped");
    }

    async fn bring_up(&mut self, link: LinkId, events: &mpsc::Sender<TransportEvent>) -> bool {
        let device = match self.direct.get(&link) {
            Some(index) => DeviceKind::Probe {
                serial: self.probes[*index].serial,
            },
            None if self.repeaters.iter().any(|r| r.link == link) => DeviceKind::Repeater,
            None => return true,
        };
        if !self.connected.insert(link) {
            return true;
        }
        events
            .send(TransportEvent::Connected { link, device })
            .await
            .is_ok()
    }

    async fn execute(
        &mut self,
        command: TransportCommand,
        events: &mpsc::Sender<TransportEvent>,
    ) -> bool {
        match command {
            TransportCommand::Connect(link) => self.bring_up(link, events).await,
            TransportCommand::Disconnect(link) => {
                if !self.connected.remove(&link) {
                    return true;
                }
                events
                    .send(TransportEvent::Disconnected { link })
                    .await
                    .is_ok()
            }
            TransportCommand::Send { link, data } => {
                if !self.connected.contains(&link) {
                    return true;
                }
                let reply = match self.direct.get(&link) {
                    Some(index) => self.probes[*index].answer_direct(&data),
                    None => match self.repeaters.iter_mut().find(|r| r.link == link) {
                        Some(repeater) => repeater.relay_request(&data, &mut self.probes),
                        None => Vec::new(),
                    },
                };
                send_chunked(link, &reply, events).await
            }
        }
    }

    /// Log a sample on every probe and push the resulting traffic
    async fn sample(&mut self, events: &mpsc::Sender<TransportEvent>) -> bool {
        for probe in &mut self.probes {
            probe.advance();
        }

        let mut outgoing = Vec::new();
        for (link, index) in &self.direct {
            if self.connected.contains(link) {
                outgoing.push(TransportEvent::StatusNotification {
                    link: *link,
                    data: self.probes[*index].status_bytes(),
                });
            }
        }
        let serials: Vec<u32> = self.probes.iter().map(|p| p.serial).collect();
        for repeater in &mut self.repeaters {
            if !self.connected.contains(&repeater.link) {
                continue;
            }
            let mut bytes = Vec::new();
            for probe in &self.probes {
                if let Some(frame) = repeater.relay_status(probe) {
                    bytes.extend_from_slice(&frame);
                }
            }
            if let Some(frame) = repeater.heartbeat(&serials) {
                bytes.extend_from_slice(&frame);
            }
            if !bytes.is_empty() {
                outgoing.push(TransportEvent::FrameReceived {
                    link: repeater.link,
                    data: bytes,
                });
            }
        }

        for event in outgoing {
            let delivered = match event {
                TransportEvent::FrameReceived { link, data } => {
                    send_chunked(link, &data, events).await
                }
                other => events.send(other).await.is_ok(),
            };
            if !delivered {
                return false;
            }
        }
        true
    }
}

/// Deliver bytes the way a notifying characteristic does, a chunk at a time
async fn send_chunked(link: LinkId, data: &[u8], events: &mpsc::Sender<TransportEvent>) -> bool {
    for chunk in data.chunks(CHUNK_SIZE) {
        let event = TransportEvent::FrameReceived {
            link,
            data: chunk.to_vec(),
        };
        if events.send(event).await.is_err() {
            return false;
        }
    }
    true
}
