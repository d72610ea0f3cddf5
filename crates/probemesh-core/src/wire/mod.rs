//! Wire codec
//!
//! Byte-exact encoders and decoders for everything that crosses the radio:
//!
//! - **bits**: LSB-first packed bitfield access
//! - **crc**: CRC-16-CCITT frame check
//! - **frame**: sync marker, CRC, ids and length around a payload
//! - **telemetry**: temperatures, prediction and food-safe layouts,
//!   advertisements and status notifications
//! - **message**: message classes, requests and responses
//!
//! ```text
//!   bytes ──► FrameDecoder ──► Frame ──► Inbound ──► Response / Telemetry
//!
//!   Request ──► Frame::to_bytes ──► bytes
//! ```
//!
//! Decoders return `Option`: a malformed buffer is "no record", never a
//! panic.

pub mod bits;
pub mod crc;
pub mod frame;
pub mod message;
pub mod telemetry;

pub use crc::crc16_ccitt;
pub use frame::{Frame, FrameDecoder, FrameFormat, FrameKind, RequestId};
pub use message::{Inbound, LogRecord, MessageClass, Request, Response, SessionInfo};
pub use telemetry::{
    decode_advertisement, decode_status, Advertisement, BatteryStatus, FoodSafeData,
    FoodSafeStatus, LogRange, PredictionMode, PredictionState, PredictionStatus,
    PredictionType, ProbeColor, ProbeId, ProbeMode, ProbeTemperatures, ProductType, Telemetry,
    VirtualSensors,
};
