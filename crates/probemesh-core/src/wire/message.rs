//! Message classes carried inside frames
//!
//! | Byte | Class | Request payload | Response payload |
//! |------|-------|-----------------|------------------|
//! | 0x01 | SetProbeId | id-1 | |
//! | 0x02 | SetProbeColor | color | |
//! | 0x03 | ReadSessionInfo | | session u32, period u16 ms |
//! | 0x04 | ReadLogs | min u32, max u32 | seq u32, temps, battery, [prediction] |
//! | 0x05 | SetPrediction | u16 set point / mode | |
//! | 0x06 | ReadOverTemperature | | flag |
//! | 0x07 | ConfigureFoodSafe | food-safe data | |
//! | 0x08 | ResetFoodSafe | | |
//! | 0x09 | ReadFirmwareRevision | | ASCII |
//! | 0x0A | ReadHardwareRevision | | ASCII |
//! | 0x0B | ReadModelInfo | | ASCII |
//! | 0x40 | ProbeStatus | serial, hops, status | (mesh, unsolicited) |
//! | 0x41 | Heartbeat | count, serials | (mesh, unsolicited) |
//!
//! Mesh payloads addressed to or about a probe start with its serial.

use super::frame::{Frame, FrameKind, RequestId, MAX_PAYLOAD};
use super::telemetry::{
    decode_battery_virtual, decode_status, encode_battery_virtual, BatteryStatus, FoodSafeData,
    PredictionMode, PredictionStatus, ProbeColor, ProbeId, ProbeTemperatures, Telemetry,
    VirtualSensors, PREDICTION_STATUS_BYTES, TEMPERATURE_BYTES,
};
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

/// Message class byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MessageClass {
    SetProbeId,
    SetProbeColor,
    ReadSessionInfo,
    ReadLogs,
    SetPrediction,
    ReadOverTemperature,
    ConfigureFoodSafe,
    ResetFoodSafe,
    ReadFirmwareRevision,
    ReadHardwareRevision,
    ReadModelInfo,
    ProbeStatus,
    Heartbeat,
}

impl MessageClass {
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0x01 => MessageClass::SetProbeId,
            0x02 => MessageClass::SetProbeColor,
            0x03 => MessageClass::ReadSessionInfo,
            0x04 => MessageClass::ReadLogs,
            0x05 => MessageClass::SetPrediction,
            0x06 => MessageClass::ReadOverTemperature,
            0x07 => MessageClass::ConfigureFoodSafe,
            0x08 => MessageClass::ResetFoodSafe,
            0x09 => MessageClass::ReadFirmwareRevision,
            0x0A => MessageClass::ReadHardwareRevision,
            0x0B => MessageClass::ReadModelInfo,
            0x40 => MessageClass::ProbeStatus,
            0x41 => MessageClass::Heartbeat,
            _ => return None,
        })
    }

    pub fn as_byte(self) -> u8 {
        match self {
            MessageClass::SetProbeId => 0x01,
            MessageClass::SetProbeColor => 0x02,
            MessageClass::ReadSessionInfo => 0x03,
            MessageClass::ReadLogs => 0x04,
            MessageClass::SetPrediction => 0x05,
            MessageClass::ReadOverTemperature => 0x06,
            MessageClass::ConfigureFoodSafe => 0x07,
            MessageClass::ResetFoodSafe => 0x08,
            MessageClass::ReadFirmwareRevision => 0x09,
            MessageClass::ReadHardwareRevision => 0x0A,
            MessageClass::ReadModelInfo => 0x0B,
            MessageClass::ProbeStatus => 0x40,
            MessageClass::Heartbeat => 0x41,
        }
    }

    /// Sent by repeaters without being asked
    pub fn is_unsolicited(self) -> bool {
        matches!(self, MessageClass::ProbeStatus | MessageClass::Heartbeat)
    }
}

/// Session identity and sample period reported by a probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: u32,
    pub sample_period_ms: u16,
}

/// One historical record returned by `ReadLogs`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub sequence: u32,
    pub temperatures: ProbeTemperatures,
    pub battery: BatteryStatus,
    pub virtual_sensors: VirtualSensors,
    pub prediction: Option<PredictionStatus>,
}

const LOG_RECORD_MIN_LEN: usize = 4 + TEMPERATURE_BYTES + 1;

impl LogRecord {
    pub fn decode(payload: &[u8]) -> Option<Self> {
        if payload.len() < LOG_RECORD_MIN_LEN {
            return None;
        }
        let sequence = LittleEndian::read_u32(&payload[0..4]);
        let temperatures = ProbeTemperatures::decode(&payload[4..17])?;
        let (battery, virtual_sensors) = decode_battery_virtual(payload[17]);
        let prediction = if payload.len() >= LOG_RECORD_MIN_LEN + PREDICTION_STATUS_BYTES {
            PredictionStatus::decode(&payload[LOG_RECORD_MIN_LEN..])
        } else {
            None
        };
        Some(Self {
            sequence,
            temperatures,
            battery,
            virtual_sensors,
            prediction,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(LOG_RECORD_MIN_LEN + PREDICTION_STATUS_BYTES);
        out.extend_from_slice(&self.sequence.to_le_bytes());
        out.extend_from_slice(&self.temperatures.encode());
        out.push(encode_battery_virtual(self.battery, &self.virtual_sensors));
        if let Some(prediction) = &self.prediction {
            out.extend_from_slice(&prediction.encode());
        }
        out
    }
}

/// Commands the controller sends to a probe
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    SetProbeId(ProbeId),
    SetProbeColor(ProbeColor),
    ReadSessionInfo,
    /// Inclusive sequence range
    ReadLogs { min: u32, max: u32 },
    /// Set point in °C; `PredictionMode::None` cancels
    SetPrediction { set_point: f64, mode: PredictionMode },
    ReadOverTemperature,
    ConfigureFoodSafe(FoodSafeData),
    ResetFoodSafe,
    ReadFirmwareRevision,
    ReadHardwareRevision,
    ReadModelInfo,
}

impl Request {
    pub fn class(&self) -> MessageClass {
        match self {
            Request::SetProbeId(_) => MessageClass::SetProbeId,
            Request::SetProbeColor(_) => MessageClass::SetProbeColor,
            Request::ReadSessionInfo => MessageClass::ReadSessionInfo,
            Request::ReadLogs { .. } => MessageClass::ReadLogs,
            Request::SetPrediction { .. } => MessageClass::SetPrediction,
            Request::ReadOverTemperature => MessageClass::ReadOverTemperature,
            Request::ConfigureFoodSafe(_) => MessageClass::ConfigureFoodSafe,
            Request::ResetFoodSafe => MessageClass::ResetFoodSafe,
            Request::ReadFirmwareRevision => MessageClass::ReadFirmwareRevision,
            Request::ReadHardwareRevision => MessageClass::ReadHardwareRevision,
            Request::ReadModelInfo => MessageClass::ReadModelInfo,
        }
    }

    /// Payload bytes, without any mesh serial prefix
    pub fn encode_payload(&self) -> Vec<u8> {
        match self {
            Request::SetProbeId(id) => vec![id.to_raw()],
            Request::SetProbeColor(color) => vec![color.to_raw()],
            Request::ReadLogs { min, max } => {
                let mut out = Vec::with_capacity(8);
                out.extend_from_slice(&min.to_le_bytes());
                out.extend_from_slice(&max.to_le_bytes());
                out
            }
            Request::SetPrediction { set_point, mode } => {
                let raw = ((set_point * 10.0).round().clamp(0.0, 1023.0) as u16)
                    | ((mode.to_raw() as u16) << 10);
                raw.to_le_bytes().to_vec()
            }
            Request::ConfigureFoodSafe(data) => data.encode().to_vec(),
            Request::ReadSessionInfo
            | Request::ReadOverTemperature
            | Request::ResetFoodSafe
            | Request::ReadFirmwareRevision
            | Request::ReadHardwareRevision
            | Request::ReadModelInfo => Vec::new(),
        }
    }

    /// Decode a request payload (device side)
    pub fn decode(class: MessageClass, payload: &[u8]) -> Option<Self> {
        Some(match class {
            MessageClass::SetProbeId => {
                Request::SetProbeId(ProbeId::from_raw(*payload.first()?))
            }
            MessageClass::SetProbeColor => {
                Request::SetProbeColor(ProbeColor::from_raw(*payload.first()?))
            }
            MessageClass::ReadSessionInfo => Request::ReadSessionInfo,
            MessageClass::ReadLogs => {
                if payload.len() < 8 {
                    return None;
                }
                Request::ReadLogs {
                    min: LittleEndian::read_u32(&payload[0..4]),
                    max: LittleEndian::read_u32(&payload[4..8]),
                }
            }
            MessageClass::SetPrediction => {
                let raw = LittleEndian::read_u16(payload.get(..2)?);
                Request::SetPrediction {
                    set_point: (raw & 0x03FF) as f64 * 0.1,
                    mode: PredictionMode::from_raw((raw >> 10) as u8),
                }
            }
            MessageClass::ReadOverTemperature => Request::ReadOverTemperature,
            MessageClass::ConfigureFoodSafe => {
                Request::ConfigureFoodSafe(FoodSafeData::decode(payload)?)
            }
            MessageClass::ResetFoodSafe => Request::ResetFoodSafe,
            MessageClass::ReadFirmwareRevision => Request::ReadFirmwareRevision,
            MessageClass::ReadHardwareRevision => Request::ReadHardwareRevision,
            MessageClass::ReadModelInfo => Request::ReadModelInfo,
            MessageClass::ProbeStatus | MessageClass::Heartbeat => return None,
        })
    }

    /// Frame for a direct link
    pub fn to_direct_frame(&self) -> Frame {
        Frame::direct_request(self.class().as_byte(), self.encode_payload())
    }

    /// Frame for the mesh, addressed to `serial`
    pub fn to_mesh_frame(&self, serial: u32, request_id: RequestId) -> Frame {
        let mut payload = serial.to_le_bytes().to_vec();
        payload.extend_from_slice(&self.encode_payload());
        Frame::mesh_request(self.class().as_byte(), request_id, payload)
    }
}

/// Decoded response payloads
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Empty acknowledgement of a write
    Ack(MessageClass),
    SessionInfo(SessionInfo),
    LogRecord(LogRecord),
    OverTemperature(bool),
    FirmwareRevision(String),
    HardwareRevision(String),
    ModelInfo(String),
}

impl Response {
    pub fn class(&self) -> MessageClass {
        match self {
            Response::Ack(class) => *class,
            Response::SessionInfo(_) => MessageClass::ReadSessionInfo,
            Response::LogRecord(_) => MessageClass::ReadLogs,
            Response::OverTemperature(_) => MessageClass::ReadOverTemperature,
            Response::FirmwareRevision(_) => MessageClass::ReadFirmwareRevision,
            Response::HardwareRevision(_) => MessageClass::ReadHardwareRevision,
            Response::ModelInfo(_) => MessageClass::ReadModelInfo,
        }
    }

    pub fn encode_payload(&self) -> Vec<u8> {
        match self {
            Response::Ack(_) => Vec::new(),
            Response::SessionInfo(info) => {
                let mut out = info.session_id.to_le_bytes().to_vec();
                out.extend_from_slice(&info.sample_period_ms.to_le_bytes());
                out
            }
            Response::LogRecord(record) => record.encode(),
            Response::OverTemperature(flag) => vec![*flag as u8],
            Response::FirmwareRevision(text)
            | Response::HardwareRevision(text)
            | Response::ModelInfo(text) => text.as_bytes().to_vec(),
        }
    }

    /// Decode via the class dispatch table
    pub fn decode(class: MessageClass, payload: &[u8]) -> Option<Self> {
        RESPONSE_DECODERS
            .iter()
            .find(|(entry, _)| *entry == class)
            .and_then(|(_, decode)| decode(class, payload))
    }
}

type ResponseDecoder = fn(MessageClass, &[u8]) -> Option<Response>;

static RESPONSE_DECODERS: &[(MessageClass, ResponseDecoder)] = &[
    (MessageClass::SetProbeId, decode_ack),
    (MessageClass::SetProbeColor, decode_ack),
    (MessageClass::ReadSessionInfo, decode_session_info),
    (MessageClass::ReadLogs, decode_log_record),
    (MessageClass::SetPrediction, decode_ack),
    (MessageClass::ReadOverTemperature, decode_over_temperature),
    (MessageClass::ConfigureFoodSafe, decode_ack),
    (MessageClass::ResetFoodSafe, decode_ack),
    (MessageClass::ReadFirmwareRevision, decode_text),
    (MessageClass::ReadHardwareRevision, decode_text),
    (MessageClass::ReadModelInfo, decode_text),
];

fn decode_ack(class: MessageClass, _payload: &[u8]) -> Option<Response> {
    Some(Response::Ack(class))
}

fn decode_session_info(_class: MessageClass, payload: &[u8]) -> Option<Response> {
    if payload.len() < 6 {
        return None;
    }
    Some(Response::SessionInfo(SessionInfo {
        session_id: LittleEndian::read_u32(&payload[0..4]),
        sample_period_ms: LittleEndian::read_u16(&payload[4..6]),
    }))
}

fn decode_log_record(_class: MessageClass, payload: &[u8]) -> Option<Response> {
    LogRecord::decode(payload).map(Response::LogRecord)
}

fn decode_over_temperature(_class: MessageClass, payload: &[u8]) -> Option<Response> {
    payload
        .first()
        .map(|flag| Response::OverTemperature(*flag != 0))
}

fn decode_text(class: MessageClass, payload: &[u8]) -> Option<Response> {
    let text = String::from_utf8_lossy(payload)
        .trim_end_matches('\0')
        .to_string();
    match class {
        MessageClass::ReadFirmwareRevision => Some(Response::FirmwareRevision(text)),
        MessageClass::ReadHardwareRevision => Some(Response::HardwareRevision(text)),
        MessageClass::ReadModelInfo => Some(Response::ModelInfo(text)),
        _ => None,
    }
}

/// Frame for a probe's direct-link reply
pub fn direct_response_frame(response: &Response, success: bool) -> Frame {
    Frame::direct_response(response.class().as_byte(), success, response.encode_payload())
}

/// Frame for a reply relayed through the mesh
pub fn mesh_response_frame(
    serial: u32,
    response: &Response,
    request_id: RequestId,
    response_to: RequestId,
    success: bool,
) -> Frame {
    let mut payload = serial.to_le_bytes().to_vec();
    payload.extend_from_slice(&response.encode_payload());
    Frame::mesh_response(
        response.class().as_byte(),
        request_id,
        response_to,
        success,
        payload,
    )
}

/// Unsolicited status relayed by a repeater
pub fn probe_status_frame(
    serial: u32,
    hop_count: u8,
    status: &[u8],
    request_id: RequestId,
) -> Frame {
    let mut payload = serial.to_le_bytes().to_vec();
    payload.push(hop_count);
    payload.extend_from_slice(status);
    Frame::mesh_request(MessageClass::ProbeStatus.as_byte(), request_id, payload)
}

/// Most serials one heartbeat frame can list: a count byte plus four bytes
/// per serial must fit the frame's payload
pub const HEARTBEAT_SERIALS_PER_FRAME: usize = (MAX_PAYLOAD - 1) / 4;

/// Repeater heartbeat listing up to [`HEARTBEAT_SERIALS_PER_FRAME`] probes
pub fn heartbeat_frame(serials: &[u32], request_id: RequestId) -> Frame {
    let serials = &serials[..serials.len().min(HEARTBEAT_SERIALS_PER_FRAME)];
    let mut payload = vec![serials.len() as u8];
    for serial in serials {
        payload.extend_from_slice(&serial.to_le_bytes());
    }
    Frame::mesh_request(MessageClass::Heartbeat.as_byte(), request_id, payload)
}

/// Heartbeats listing every probe a repeater can hear, split across as many
/// frames as the list needs
pub fn heartbeat_frames(serials: &[u32]) -> Vec<Frame> {
    if serials.is_empty() {
        return vec![heartbeat_frame(&[], RequestId::random())];
    }
    serials
        .chunks(HEARTBEAT_SERIALS_PER_FRAME)
        .map(|chunk| heartbeat_frame(chunk, RequestId::random()))
        .collect()
}

/// A validated inbound frame interpreted for the controller
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Reply to an earlier request
    Reply {
        class: MessageClass,
        /// Set for mesh replies
        response_to: Option<RequestId>,
        /// Set for mesh replies
        serial: Option<u32>,
        success: bool,
        /// `None` when the device rejected the command or the payload
        /// did not decode
        response: Option<Response>,
    },
    ProbeStatus {
        serial: u32,
        hop_count: u8,
        telemetry: Telemetry,
    },
    Heartbeat {
        serials: Vec<u32>,
    },
}

impl Inbound {
    /// Interpret a frame received from a probe or repeater
    pub fn from_frame(frame: &Frame) -> Option<Self> {
        let class = MessageClass::from_byte(frame.message_type)?;
        match frame.kind {
            FrameKind::DirectResponse { success } => Some(Inbound::Reply {
                class,
                response_to: None,
                serial: None,
                success,
                response: Response::decode(class, &frame.payload),
            }),
            FrameKind::MeshResponse {
                response_to,
                success,
                ..
            } => {
                let serial = LittleEndian::read_u32(frame.payload.get(..4)?);
                Some(Inbound::Reply {
                    class,
                    response_to: Some(response_to),
                    serial: Some(serial),
                    success,
                    response: Response::decode(class, &frame.payload[4..]),
                })
            }
            FrameKind::MeshRequest { .. } => match class {
                MessageClass::ProbeStatus => {
                    let payload = &frame.payload;
                    let serial = LittleEndian::read_u32(payload.get(..4)?);
                    let hop_count = *payload.get(4)?;
                    let telemetry = decode_status(&payload[5..])?;
                    Some(Inbound::ProbeStatus {
                        serial,
                        hop_count,
                        telemetry,
                    })
                }
                MessageClass::Heartbeat => {
                    let count = *frame.payload.first()? as usize;
                    let body = frame.payload.get(1..1 + count * 4)?;
                    let serials = body.chunks_exact(4).map(LittleEndian::read_u32).collect();
                    Some(Inbound::Heartbeat { serials })
                }
                _ => None,
            },
            FrameKind::DirectRequest => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::frame::FrameFormat;
    use crate::wire::telemetry::{encode_status, LogRange, ProbeMode};

    fn sample_record(sequence: u32) -> LogRecord {
        LogRecord {
            sequence,
            temperatures: ProbeTemperatures::from_raw([500; 8]),
            battery: BatteryStatus::Ok,
            virtual_sensors: VirtualSensors::default(),
            prediction: None,
        }
    }

    #[test]
    fn test_class_bytes() {
        for byte in 0u8..=0xFF {
            if let Some(class) = MessageClass::from_byte(byte) {
                assert_eq!(class.as_byte(), byte);
            }
        }
        assert_eq!(MessageClass::from_byte(0x0C), None);
        assert!(MessageClass::Heartbeat.is_unsolicited());
        assert!(!MessageClass::ReadLogs.is_unsolicited());
    }

    #[test]
    fn test_read_logs_payload() {
        let request = Request::ReadLogs { min: 3, max: 4 };
        assert_eq!(request.encode_payload(), vec![3, 0, 0, 0, 4, 0, 0, 0]);
        assert_eq!(
            Request::decode(MessageClass::ReadLogs, &request.encode_payload()),
            Some(request)
        );
    }

    #[test]
    fn test_set_prediction_packing() {
        let request = Request::SetPrediction {
            set_point: 54.5,
            mode: PredictionMode::TimeToRemoval,
        };
        // 545 | 1 << 10 = 0x0621
        assert_eq!(request.encode_payload(), vec![0x21, 0x06]);
    }

    #[test]
    fn test_mesh_request_has_serial_prefix() {
        let frame = Request::ReadSessionInfo.to_mesh_frame(0x0102_0304, RequestId(1));
        assert_eq!(frame.payload, vec![0x04, 0x03, 0x02, 0x01]);
        assert_eq!(frame.message_type, 0x03);
    }

    #[test]
    fn test_dispatch_table_covers_requests() {
        let replies = [
            (MessageClass::SetProbeId, vec![]),
            (MessageClass::ReadSessionInfo, vec![1, 0, 0, 0, 0xE8, 0x03]),
            (MessageClass::ReadOverTemperature, vec![1]),
            (MessageClass::ReadModelInfo, b"CPT\0".to_vec()),
        ];
        for (class, payload) in replies {
            let response = Response::decode(class, &payload).unwrap();
            assert_eq!(response.class(), class);
        }
        assert_eq!(
            Response::decode(MessageClass::ReadSessionInfo, &[1, 0, 0, 0, 0xE8, 0x03]),
            Some(Response::SessionInfo(SessionInfo {
                session_id: 1,
                sample_period_ms: 1000,
            }))
        );
        assert_eq!(
            Response::decode(MessageClass::ReadModelInfo, b"CPT\0"),
            Some(Response::ModelInfo("CPT".to_string()))
        );
        assert_eq!(Response::decode(MessageClass::Heartbeat, &[]), None);
        assert_eq!(Response::decode(MessageClass::ReadSessionInfo, &[1, 2]), None);
    }

    #[test]
    fn test_log_record_with_prediction() {
        let mut record = sample_record(77);
        record.prediction = Some(PredictionStatus::default());
        let decoded = LogRecord::decode(&record.encode()).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(LogRecord::decode(&record.encode()[..10]), None);
    }

    #[test]
    fn test_inbound_direct_reply() {
        let frame = direct_response_frame(&Response::LogRecord(sample_record(5)), true);
        let bytes = frame.to_bytes();
        let decoded = Frame::from_bytes(&bytes, FrameFormat::DirectResponse).unwrap();
        match Inbound::from_frame(&decoded).unwrap() {
            Inbound::Reply {
                class,
                response_to,
                response,
                ..
            } => {
                assert_eq!(class, MessageClass::ReadLogs);
                assert_eq!(response_to, None);
                assert_eq!(response, Some(Response::LogRecord(sample_record(5))));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_inbound_mesh_reply() {
        let frame = mesh_response_frame(
            0xAABB_CCDD,
            &Response::Ack(MessageClass::SetProbeColor),
            RequestId(10),
            RequestId(20),
            false,
        );
        let inbound = Inbound::from_frame(&frame).unwrap();
        assert_eq!(
            inbound,
            Inbound::Reply {
                class: MessageClass::SetProbeColor,
                response_to: Some(RequestId(20)),
                serial: Some(0xAABB_CCDD),
                success: false,
                response: Some(Response::Ack(MessageClass::SetProbeColor)),
            }
        );
    }

    #[test]
    fn test_inbound_probe_status_and_heartbeat() {
        let telemetry = Telemetry {
            temperatures: ProbeTemperatures::from_raw([600; 8]),
            mode: ProbeMode::Normal,
            color: ProbeColor::Yellow,
            id: ProbeId::new(1).unwrap(),
            battery: BatteryStatus::Ok,
            virtual_sensors: VirtualSensors::default(),
            log_range: Some(LogRange::new(0, 12)),
            prediction: Some(PredictionStatus::default()),
            food_safe_data: None,
            food_safe_status: None,
            overheating: None,
        };
        let frame = probe_status_frame(42, 2, &encode_status(&telemetry), RequestId(3));
        assert_eq!(
            Inbound::from_frame(&frame),
            Some(Inbound::ProbeStatus {
                serial: 42,
                hop_count: 2,
                telemetry,
            })
        );

        let frame = heartbeat_frame(&[1, 2, 3], RequestId(4));
        assert_eq!(
            Inbound::from_frame(&frame),
            Some(Inbound::Heartbeat {
                serials: vec![1, 2, 3]
            })
        );

        let mut truncated = heartbeat_frame(&[1, 2], RequestId(4));
        truncated.payload.pop();
        assert_eq!(Inbound::from_frame(&truncated), None);
    }

    #[test]
    fn test_long_heartbeat_splits_across_frames() {
        let serials: Vec<u32> = (0..100).map(|n| 0x1000_0000 + n).collect();
        let frames = heartbeat_frames(&serials);
        assert_eq!(frames.len(), 2);

        let mut heard = Vec::new();
        for frame in &frames {
            let wire = Frame::from_bytes(&frame.to_bytes(), FrameFormat::Mesh).unwrap();
            match Inbound::from_frame(&wire) {
                Some(Inbound::Heartbeat { serials }) => heard.extend(serials),
                other => panic!("not a heartbeat: {other:?}"),
            }
        }
        assert_eq!(heard, serials);

        // a single frame keeps the first serials intact instead of wrapping
        let frame = heartbeat_frame(&serials, RequestId(1));
        let wire = Frame::from_bytes(&frame.to_bytes(), FrameFormat::Mesh).unwrap();
        assert_eq!(
            Inbound::from_frame(&wire),
            Some(Inbound::Heartbeat {
                serials: serials[..HEARTBEAT_SERIALS_PER_FRAME].to_vec()
            })
        );
    }

    #[test]
    fn test_inbound_ignores_requests_and_unknown_classes() {
        let frame = Request::ReadModelInfo.to_direct_frame();
        assert_eq!(Inbound::from_frame(&frame), None);
        let frame = Frame::direct_response(0x7F, true, vec![]);
        assert_eq!(Inbound::from_frame(&frame), None);
    }
}
