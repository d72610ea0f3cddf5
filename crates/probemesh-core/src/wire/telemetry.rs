//! Probe telemetry layouts
//!
//! Decoders for the fixed binary layouts a probe publishes, both in its
//! advertisements and in status notifications (direct, or relayed by a
//! repeater inside a `ProbeStatus` mesh frame).
//!
//! ## Advertisement
//!
//! ```text
//! ┌─────────┬──────────┬──────────────┬──────┬─────────┬─────────┬──────────┐
//! │ Product │ Serial   │ Temperatures │ Mode │ Battery │ Network │ Overheat │
//! │  (1B)   │ (4B LE)  │    (13B)     │ (1B) │  (1B)   │ (1B opt)│ (1B opt) │
//! └─────────┴──────────┴──────────────┴──────┴─────────┴─────────┴──────────┘
//! ```
//!
//! ## Status
//!
//! ```text
//! ┌─────────┬─────────┬──────────────┬──────┬─────────┬────────────┬───────────────────────────┐
//! │ Log min │ Log max │ Temperatures │ Mode │ Battery │ Prediction │ FoodSafe data/status,     │
//! │ (4B LE) │ (4B LE) │    (13B)     │ (1B) │  (1B)   │    (7B)    │ overheat (10B+8B+1B, opt) │
//! └─────────┴─────────┴──────────────┴──────┴─────────┴────────────┴───────────────────────────┘
//! ```
//!
//! Every decoder returns `None` on short input; nothing here panics on
//! malformed bytes.

use super::bits::{BitReader, BitWriter};
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

/// Number of temperature sensors on a probe
pub const SENSOR_COUNT: usize = 8;

/// Packed temperature block size
pub const TEMPERATURE_BYTES: usize = 13;

/// Packed prediction status size
pub const PREDICTION_STATUS_BYTES: usize = 7;

/// Packed food-safe configuration size
pub const FOOD_SAFE_DATA_BYTES: usize = 10;

/// Packed food-safe status size
pub const FOOD_SAFE_STATUS_BYTES: usize = 8;

/// Shortest acceptable advertisement
pub const ADVERTISEMENT_MIN_LEN: usize = 20;

/// Shortest acceptable status notification
pub const STATUS_MIN_LEN: usize = 30;

const RAW_TEMPERATURE_MASK: u128 = 0x1FFF;
const RAW_TEMPERATURE_MAX: u16 = 0x1FFF;

/// Shift of each 13-bit group once the block is reversed and read as one
/// big-endian integer (group 0 is the most significant).
const TEMPERATURE_SHIFTS: [u32; SENSOR_COUNT] = [91, 78, 65, 52, 39, 26, 13, 0];

/// Convert a raw 13-bit temperature to Celsius
pub fn raw_to_celsius(raw: u16) -> f64 {
    raw as f64 * 0.05 - 20.0
}

/// Convert Celsius to the nearest raw 13-bit temperature
pub fn celsius_to_raw(celsius: f64) -> u16 {
    ((celsius + 20.0) / 0.05)
        .round()
        .clamp(0.0, RAW_TEMPERATURE_MAX as f64) as u16
}

/// The eight sensor readings, T1 first
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProbeTemperatures {
    pub values: [f64; SENSOR_COUNT],
}

impl ProbeTemperatures {
    /// Build from raw 13-bit values, T1 first
    pub fn from_raw(raw: [u16; SENSOR_COUNT]) -> Self {
        Self {
            values: raw.map(|r| raw_to_celsius(r & RAW_TEMPERATURE_MAX)),
        }
    }

    /// Unpack the 13-byte temperature block
    ///
    /// The block is a little-endian packed bitfield: reverse the bytes,
    /// read the eight 13-bit groups from the most significant end, then
    /// reverse the group order so index 0 is T1.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let block = bytes.get(..TEMPERATURE_BYTES)?;

        let mut packed: u128 = 0;
        for byte in block.iter().rev() {
            packed = (packed << 8) | *byte as u128;
        }

        let mut groups = [0u16; SENSOR_COUNT];
        for (group, shift) in groups.iter_mut().zip(TEMPERATURE_SHIFTS) {
            *group = ((packed >> shift) & RAW_TEMPERATURE_MASK) as u16;
        }
        groups.reverse();

        Some(Self::from_raw(groups))
    }

    /// Raw 13-bit values, T1 first
    pub fn raw(&self) -> [u16; SENSOR_COUNT] {
        self.values.map(celsius_to_raw)
    }

    /// Pack into the 13-byte wire block
    pub fn encode(&self) -> [u8; TEMPERATURE_BYTES] {
        let mut packed: u128 = 0;
        for (index, raw) in self.raw().iter().enumerate() {
            packed |= (*raw as u128) << (13 * index);
        }
        let mut out = [0u8; TEMPERATURE_BYTES];
        for (index, byte) in out.iter_mut().enumerate() {
            *byte = (packed >> (8 * index)) as u8;
        }
        out
    }

    /// Reading of one sensor (0-based index)
    pub fn get(&self, sensor: usize) -> Option<f64> {
        self.values.get(sensor).copied()
    }
}

/// Probe operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProbeMode {
    Normal,
    InstantRead,
    Reserved,
    Error,
}

impl ProbeMode {
    pub fn from_raw(raw: u8) -> Self {
        match raw & 0x03 {
            0 => ProbeMode::Normal,
            1 => ProbeMode::InstantRead,
            2 => ProbeMode::Reserved,
            _ => ProbeMode::Error,
        }
    }

    pub fn to_raw(self) -> u8 {
        match self {
            ProbeMode::Normal => 0,
            ProbeMode::InstantRead => 1,
            ProbeMode::Reserved => 2,
            ProbeMode::Error => 3,
        }
    }
}

/// Silicone ring color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProbeColor {
    Yellow,
    Grey,
    Red,
    Orange,
    Blue,
    Green,
    Purple,
    Pink,
}

impl ProbeColor {
    pub const ALL: [ProbeColor; 8] = [
        ProbeColor::Yellow,
        ProbeColor::Grey,
        ProbeColor::Red,
        ProbeColor::Orange,
        ProbeColor::Blue,
        ProbeColor::Green,
        ProbeColor::Purple,
        ProbeColor::Pink,
    ];

    pub fn from_raw(raw: u8) -> Self {
        Self::ALL[(raw & 0x07) as usize]
    }

    pub fn to_raw(self) -> u8 {
        Self::ALL.iter().position(|c| *c == self).unwrap_or(0) as u8
    }
}

/// User-assigned probe number, 1 through 8
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProbeId(u8);

impl ProbeId {
    /// Create from a 1-based id; `None` outside 1..=8
    pub fn new(id: u8) -> Option<Self> {
        (1..=8).contains(&id).then_some(ProbeId(id))
    }

    /// From the 3-bit wire value (0..=7)
    pub fn from_raw(raw: u8) -> Self {
        ProbeId((raw & 0x07) + 1)
    }

    pub fn to_raw(self) -> u8 {
        self.0 - 1
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

/// Mode, color and id share one byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeColorId {
    pub mode: ProbeMode,
    pub color: ProbeColor,
    pub id: ProbeId,
}

impl ModeColorId {
    pub fn decode(byte: u8) -> Self {
        Self {
            mode: ProbeMode::from_raw(byte),
            color: ProbeColor::from_raw(byte >> 2),
            id: ProbeId::from_raw(byte >> 5),
        }
    }

    pub fn encode(&self) -> u8 {
        self.mode.to_raw() | (self.color.to_raw() << 2) | (self.id.to_raw() << 5)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatteryStatus {
    Ok,
    Low,
}

/// Which physical sensors currently represent core, surface and ambient
///
/// Values are 0-based indices into [`ProbeTemperatures::values`]. The core
/// may be any of T1..T6, surface T4..T7 and ambient T5..T8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualSensors {
    pub core: u8,
    pub surface: u8,
    pub ambient: u8,
}

impl Default for VirtualSensors {
    fn default() -> Self {
        Self {
            core: 0,
            surface: 3,
            ambient: 7,
        }
    }
}

impl VirtualSensors {
    /// Decode from bits 1..=7 of the battery byte
    pub fn decode(byte: u8) -> Self {
        let core = ((byte >> 1) & 0x07).min(5);
        let surface = ((byte >> 4) & 0x03) + 3;
        let ambient = ((byte >> 6) & 0x03) + 4;
        Self {
            core,
            surface,
            ambient,
        }
    }

    pub fn encode(&self) -> u8 {
        ((self.core.min(5) & 0x07) << 1)
            | ((self.surface.saturating_sub(3) & 0x03) << 4)
            | ((self.ambient.saturating_sub(4) & 0x03) << 6)
    }

    pub fn core_temperature(&self, temps: &ProbeTemperatures) -> Option<f64> {
        temps.get(self.core as usize)
    }

    pub fn surface_temperature(&self, temps: &ProbeTemperatures) -> Option<f64> {
        temps.get(self.surface as usize)
    }

    pub fn ambient_temperature(&self, temps: &ProbeTemperatures) -> Option<f64> {
        temps.get(self.ambient as usize)
    }
}

/// Decode the battery / virtual sensor byte
pub fn decode_battery_virtual(byte: u8) -> (BatteryStatus, VirtualSensors) {
    let battery = if byte & 0x01 == 0 {
        BatteryStatus::Ok
    } else {
        BatteryStatus::Low
    };
    (battery, VirtualSensors::decode(byte))
}

pub fn encode_battery_virtual(battery: BatteryStatus, sensors: &VirtualSensors) -> u8 {
    let bit = match battery {
        BatteryStatus::Ok => 0,
        BatteryStatus::Low => 1,
    };
    bit | sensors.encode()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PredictionState {
    ProbeNotInserted,
    ProbeInserted,
    Warming,
    Predicting,
    RemovalPredictionDone,
    Reserved(u8),
    Unknown,
}

impl PredictionState {
    pub fn from_raw(raw: u8) -> Self {
        match raw & 0x0F {
            0 => PredictionState::ProbeNotInserted,
            1 => PredictionState::ProbeInserted,
            2 => PredictionState::Warming,
            3 => PredictionState::Predicting,
            4 => PredictionState::RemovalPredictionDone,
            15 => PredictionState::Unknown,
            other => PredictionState::Reserved(other),
        }
    }

    pub fn to_raw(self) -> u8 {
        match self {
            PredictionState::ProbeNotInserted => 0,
            PredictionState::ProbeInserted => 1,
            PredictionState::Warming => 2,
            PredictionState::Predicting => 3,
            PredictionState::RemovalPredictionDone => 4,
            PredictionState::Reserved(raw) => raw & 0x0F,
            PredictionState::Unknown => 15,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PredictionMode {
    None,
    TimeToRemoval,
    RemovalAndResting,
    Reserved,
}

impl PredictionMode {
    pub fn from_raw(raw: u8) -> Self {
        match raw & 0x03 {
            0 => PredictionMode::None,
            1 => PredictionMode::TimeToRemoval,
            2 => PredictionMode::RemovalAndResting,
            _ => PredictionMode::Reserved,
        }
    }

    pub fn to_raw(self) -> u8 {
        match self {
            PredictionMode::None => 0,
            PredictionMode::TimeToRemoval => 1,
            PredictionMode::RemovalAndResting => 2,
            PredictionMode::Reserved => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PredictionType {
    None,
    Removal,
    Resting,
    Reserved,
}

impl PredictionType {
    pub fn from_raw(raw: u8) -> Self {
        match raw & 0x03 {
            0 => PredictionType::None,
            1 => PredictionType::Removal,
            2 => PredictionType::Resting,
            _ => PredictionType::Reserved,
        }
    }

    pub fn to_raw(self) -> u8 {
        match self {
            PredictionType::None => 0,
            PredictionType::Removal => 1,
            PredictionType::Resting => 2,
            PredictionType::Reserved => 3,
        }
    }
}

/// Prediction engine output as reported by the probe
///
/// Bit layout (56 bits, LSB first):
///
/// | Field | Offset | Width | Scale |
/// |-------|--------|-------|-------|
/// | state | 0 | 4 | |
/// | mode | 4 | 2 | |
/// | type | 6 | 2 | |
/// | set point | 8 | 10 | ×0.1 °C |
/// | heat start | 18 | 10 | ×0.1 °C |
/// | seconds remaining | 28 | 17 | s |
/// | estimated core | 45 | 11 | ×0.1 °C − 20 |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionStatus {
    pub state: PredictionState,
    pub mode: PredictionMode,
    pub kind: PredictionType,
    pub set_point_raw: u16,
    pub heat_start_raw: u16,
    pub seconds_remaining: u32,
    pub estimated_core_raw: u16,
}

impl PredictionStatus {
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let bits = BitReader::new(bytes.get(..PREDICTION_STATUS_BYTES)?);
        Some(Self {
            state: PredictionState::from_raw(bits.field(0, 4)? as u8),
            mode: PredictionMode::from_raw(bits.field(4, 2)? as u8),
            kind: PredictionType::from_raw(bits.field(6, 2)? as u8),
            set_point_raw: bits.field(8, 10)? as u16,
            heat_start_raw: bits.field(18, 10)? as u16,
            seconds_remaining: bits.field(28, 17)?,
            estimated_core_raw: bits.field(45, 11)? as u16,
        })
    }

    pub fn encode(&self) -> [u8; PREDICTION_STATUS_BYTES] {
        let mut bits = BitWriter::new(PREDICTION_STATUS_BYTES);
        bits.put(0, 4, self.state.to_raw() as u32)
            .put(4, 2, self.mode.to_raw() as u32)
            .put(6, 2, self.kind.to_raw() as u32)
            .put(8, 10, self.set_point_raw as u32)
            .put(18, 10, self.heat_start_raw as u32)
            .put(28, 17, self.seconds_remaining)
            .put(45, 11, self.estimated_core_raw as u32);
        let mut out = [0u8; PREDICTION_STATUS_BYTES];
        out.copy_from_slice(&bits.into_bytes());
        out
    }

    /// Target temperature in Celsius
    pub fn set_point(&self) -> f64 {
        self.set_point_raw as f64 * 0.1
    }

    /// Core temperature when the prediction started, Celsius
    pub fn heat_start(&self) -> f64 {
        self.heat_start_raw as f64 * 0.1
    }

    /// Probe's estimate of the true core temperature, Celsius
    pub fn estimated_core(&self) -> f64 {
        self.estimated_core_raw as f64 * 0.1 - 20.0
    }
}

impl Default for PredictionStatus {
    fn default() -> Self {
        Self {
            state: PredictionState::ProbeNotInserted,
            mode: PredictionMode::None,
            kind: PredictionType::None,
            set_point_raw: 0,
            heat_start_raw: 0,
            seconds_remaining: 0,
            estimated_core_raw: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FoodSafeMode {
    Simplified,
    Integrated,
    Reserved(u8),
}

impl FoodSafeMode {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => FoodSafeMode::Simplified,
            1 => FoodSafeMode::Integrated,
            other => FoodSafeMode::Reserved(other),
        }
    }

    fn to_raw(self) -> u8 {
        match self {
            FoodSafeMode::Simplified => 0,
            FoodSafeMode::Integrated => 1,
            FoodSafeMode::Reserved(raw) => raw & 0x07,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FoodSafeServing {
    ServedImmediately,
    CookedAndChilled,
    Reserved(u8),
}

impl FoodSafeServing {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => FoodSafeServing::ServedImmediately,
            1 => FoodSafeServing::CookedAndChilled,
            other => FoodSafeServing::Reserved(other),
        }
    }

    fn to_raw(self) -> u8 {
        match self {
            FoodSafeServing::ServedImmediately => 0,
            FoodSafeServing::CookedAndChilled => 1,
            FoodSafeServing::Reserved(raw) => raw & 0x07,
        }
    }
}

/// Food-safety tracking configuration (10 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoodSafeData {
    pub mode: FoodSafeMode,
    pub product: u16,
    pub serving: FoodSafeServing,
    /// Threshold temperature, ×0.05 °C
    pub threshold_raw: u16,
    /// Z-value, ×0.05 °C
    pub z_value_raw: u16,
    /// Reference temperature, ×0.05 °C
    pub reference_raw: u16,
    /// D-value at the reference temperature, ×0.05 s
    pub d_value_raw: u16,
    /// Target log reduction, ×0.1
    pub log_reduction_raw: u8,
}

impl FoodSafeData {
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let bits = BitReader::new(bytes.get(..FOOD_SAFE_DATA_BYTES)?);
        Some(Self {
            mode: FoodSafeMode::from_raw(bits.field(0, 3)? as u8),
            product: bits.field(3, 10)? as u16,
            serving: FoodSafeServing::from_raw(bits.field(13, 3)? as u8),
            threshold_raw: bits.field(16, 13)? as u16,
            z_value_raw: bits.field(29, 13)? as u16,
            reference_raw: bits.field(42, 13)? as u16,
            d_value_raw: bits.field(55, 13)? as u16,
            log_reduction_raw: bits.field(68, 8)? as u8,
        })
    }

    pub fn encode(&self) -> [u8; FOOD_SAFE_DATA_BYTES] {
        let mut bits = BitWriter::new(FOOD_SAFE_DATA_BYTES);
        bits.put(0, 3, self.mode.to_raw() as u32)
            .put(3, 10, self.product as u32)
            .put(13, 3, self.serving.to_raw() as u32)
            .put(16, 13, self.threshold_raw as u32)
            .put(29, 13, self.z_value_raw as u32)
            .put(42, 13, self.reference_raw as u32)
            .put(55, 13, self.d_value_raw as u32)
            .put(68, 8, self.log_reduction_raw as u32);
        let mut out = [0u8; FOOD_SAFE_DATA_BYTES];
        out.copy_from_slice(&bits.into_bytes());
        out
    }

    pub fn threshold(&self) -> f64 {
        self.threshold_raw as f64 * 0.05
    }

    pub fn log_reduction(&self) -> f64 {
        self.log_reduction_raw as f64 * 0.1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FoodSafeState {
    NotSafe,
    Safe,
    SafetyImpossible,
    Reserved(u8),
}

/// Food-safety progress (8 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoodSafeStatus {
    pub state: FoodSafeState,
    pub log_reduction_raw: u8,
    pub seconds_above_threshold: u16,
    pub log_sequence: u32,
}

impl FoodSafeStatus {
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let bits = BitReader::new(bytes.get(..FOOD_SAFE_STATUS_BYTES)?);
        let state = match bits.field(0, 3)? as u8 {
            0 => FoodSafeState::NotSafe,
            1 => FoodSafeState::Safe,
            2 => FoodSafeState::SafetyImpossible,
            other => FoodSafeState::Reserved(other),
        };
        Some(Self {
            state,
            log_reduction_raw: bits.field(3, 8)? as u8,
            seconds_above_threshold: bits.field(11, 16)? as u16,
            log_sequence: bits.field(27, 32)?,
        })
    }

    pub fn encode(&self) -> [u8; FOOD_SAFE_STATUS_BYTES] {
        let state = match self.state {
            FoodSafeState::NotSafe => 0,
            FoodSafeState::Safe => 1,
            FoodSafeState::SafetyImpossible => 2,
            FoodSafeState::Reserved(raw) => raw & 0x07,
        };
        let mut bits = BitWriter::new(FOOD_SAFE_STATUS_BYTES);
        bits.put(0, 3, state as u32)
            .put(3, 8, self.log_reduction_raw as u32)
            .put(11, 16, self.seconds_above_threshold as u32)
            .put(27, 32, self.log_sequence);
        let mut out = [0u8; FOOD_SAFE_STATUS_BYTES];
        out.copy_from_slice(&bits.into_bytes());
        out
    }
}

/// Inclusive range of sequence numbers held in the probe's flash log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRange {
    pub min: u32,
    pub max: u32,
}

impl LogRange {
    pub fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    /// Number of sequence numbers in the range
    pub fn len(&self) -> u64 {
        if self.max < self.min {
            0
        } else {
            (self.max - self.min) as u64 + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, sequence: u32) -> bool {
        (self.min..=self.max).contains(&sequence)
    }
}

/// Everything decoded from one advertisement or status notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    pub temperatures: ProbeTemperatures,
    pub mode: ProbeMode,
    pub color: ProbeColor,
    pub id: ProbeId,
    pub battery: BatteryStatus,
    pub virtual_sensors: VirtualSensors,
    /// Present in status notifications only
    pub log_range: Option<LogRange>,
    /// Present in status notifications only
    pub prediction: Option<PredictionStatus>,
    pub food_safe_data: Option<FoodSafeData>,
    pub food_safe_status: Option<FoodSafeStatus>,
    /// One bit per sensor
    pub overheating: Option<u8>,
}

impl Telemetry {
    fn from_common(temps: &[u8], mode_byte: u8, battery_byte: u8) -> Option<Self> {
        let temperatures = ProbeTemperatures::decode(temps)?;
        let mode_color_id = ModeColorId::decode(mode_byte);
        let (battery, virtual_sensors) = decode_battery_virtual(battery_byte);
        Some(Self {
            temperatures,
            mode: mode_color_id.mode,
            color: mode_color_id.color,
            id: mode_color_id.id,
            battery,
            virtual_sensors,
            log_range: None,
            prediction: None,
            food_safe_data: None,
            food_safe_status: None,
            overheating: None,
        })
    }

    fn mode_byte(&self) -> u8 {
        ModeColorId {
            mode: self.mode,
            color: self.color,
            id: self.id,
        }
        .encode()
    }

    pub fn core_temperature(&self) -> Option<f64> {
        self.virtual_sensors.core_temperature(&self.temperatures)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductType {
    /// The probe's own advertisement
    Probe,
    /// A repeater re-advertising a probe it can hear
    Repeater,
}

impl ProductType {
    fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(ProductType::Probe),
            2 => Some(ProductType::Repeater),
            _ => None,
        }
    }

    fn to_raw(self) -> u8 {
        match self {
            ProductType::Probe => 1,
            ProductType::Repeater => 2,
        }
    }
}

/// A decoded advertisement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Advertisement {
    pub product: ProductType,
    pub serial: u32,
    /// `None` when heard straight from the probe
    pub hop_count: Option<u8>,
    pub telemetry: Telemetry,
}

/// Decode advertisement manufacturer data (vendor id already stripped)
pub fn decode_advertisement(bytes: &[u8]) -> Option<Advertisement> {
    if bytes.len() < ADVERTISEMENT_MIN_LEN {
        return None;
    }
    let product = ProductType::from_raw(bytes[0])?;
    let serial = LittleEndian::read_u32(&bytes[1..5]);
    let mut telemetry = Telemetry::from_common(&bytes[5..18], bytes[18], bytes[19])?;

    let hop_count = match product {
        ProductType::Probe => None,
        ProductType::Repeater => Some(bytes.get(20).map_or(1, |network| (network & 0x03) + 1)),
    };
    telemetry.overheating = bytes.get(21).copied();

    Some(Advertisement {
        product,
        serial,
        hop_count,
        telemetry,
    })
}

/// Encode an advertisement in the layout [`decode_advertisement`] reads
pub fn encode_advertisement(adv: &Advertisement) -> Vec<u8> {
    let t = &adv.telemetry;
    let mut out = Vec::with_capacity(ADVERTISEMENT_MIN_LEN + 2);
    out.push(adv.product.to_raw());
    out.extend_from_slice(&adv.serial.to_le_bytes());
    out.extend_from_slice(&t.temperatures.encode());
    out.push(t.mode_byte());
    out.push(encode_battery_virtual(t.battery, &t.virtual_sensors));
    let network = adv.hop_count.map_or(0, |hops| hops.saturating_sub(1) & 0x03);
    out.push(network);
    out.push(t.overheating.unwrap_or(0));
    out
}

/// Decode a status notification
pub fn decode_status(bytes: &[u8]) -> Option<Telemetry> {
    if bytes.len() < STATUS_MIN_LEN {
        return None;
    }
    let min = LittleEndian::read_u32(&bytes[0..4]);
    let max = LittleEndian::read_u32(&bytes[4..8]);
    let mut telemetry = Telemetry::from_common(&bytes[8..21], bytes[21], bytes[22])?;
    telemetry.log_range = Some(LogRange::new(min, max));
    telemetry.prediction = Some(PredictionStatus::decode(&bytes[23..30])?);

    let food_safe_end = STATUS_MIN_LEN + FOOD_SAFE_DATA_BYTES + FOOD_SAFE_STATUS_BYTES;
    if bytes.len() >= food_safe_end {
        telemetry.food_safe_data = FoodSafeData::decode(&bytes[STATUS_MIN_LEN..]);
        telemetry.food_safe_status =
            FoodSafeStatus::decode(&bytes[STATUS_MIN_LEN + FOOD_SAFE_DATA_BYTES..]);
        telemetry.overheating = bytes.get(food_safe_end).copied();
    }
    Some(telemetry)
}

/// Encode a status notification in the layout [`decode_status`] reads
///
/// Food-safe fields are written only when both data and status are present.
pub fn encode_status(t: &Telemetry) -> Vec<u8> {
    let range = t.log_range.unwrap_or(LogRange::new(0, 0));
    let mut out = Vec::with_capacity(STATUS_MIN_LEN + 19);
    out.extend_from_slice(&range.min.to_le_bytes());
    out.extend_from_slice(&range.max.to_le_bytes());
    out.extend_from_slice(&t.temperatures.encode());
    out.push(t.mode_byte());
    out.push(encode_battery_virtual(t.battery, &t.virtual_sensors));
    out.extend_from_slice(&t.prediction.unwrap_or_default().encode());
    if let (Some(data), Some(status)) = (t.food_safe_data, t.food_safe_status) {
        out.extend_from_slice(&data.encode());
        out.extend_from_slice(&status.encode());
        if let Some(overheating) = t.overheating {
            out.push(overheating);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_telemetry() -> Telemetry {
        Telemetry {
            temperatures: ProbeTemperatures::from_raw([400, 500, 600, 700, 800, 900, 1000, 1100]),
            mode: ProbeMode::Normal,
            color: ProbeColor::Blue,
            id: ProbeId::new(3).unwrap(),
            battery: BatteryStatus::Ok,
            virtual_sensors: VirtualSensors {
                core: 1,
                surface: 4,
                ambient: 7,
            },
            log_range: Some(LogRange::new(10, 42)),
            prediction: Some(PredictionStatus {
                state: PredictionState::Predicting,
                mode: PredictionMode::TimeToRemoval,
                kind: PredictionType::Removal,
                set_point_raw: 545,
                heat_start_raw: 210,
                seconds_remaining: 1234,
                estimated_core_raw: 600,
            }),
            food_safe_data: None,
            food_safe_status: None,
            overheating: None,
        }
    }

    #[test]
    fn test_temperatures_all_ones() {
        let temps = ProbeTemperatures::decode(&[0xFF; TEMPERATURE_BYTES]).unwrap();
        for value in temps.values {
            assert!((value - (8191.0 * 0.05 - 20.0)).abs() < 1e-9);
        }
    }

    #[test]
    fn test_temperatures_all_zero() {
        let temps = ProbeTemperatures::decode(&[0x00; TEMPERATURE_BYTES]).unwrap();
        for value in temps.values {
            assert!((value - -20.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_temperatures_t1_in_low_bits() {
        // raw 1 in T1 is the lowest bit of byte 0
        let mut block = [0u8; TEMPERATURE_BYTES];
        block[0] = 0x01;
        let temps = ProbeTemperatures::decode(&block).unwrap();
        assert!((temps.values[0] - raw_to_celsius(1)).abs() < 1e-9);
        assert!(temps.values[1..].iter().all(|v| (*v - -20.0).abs() < 1e-9));

        // T8 occupies the top 13 bits of the block
        let mut block = [0u8; TEMPERATURE_BYTES];
        block[12] = 0x80;
        let temps = ProbeTemperatures::decode(&block).unwrap();
        assert!((temps.values[7] - raw_to_celsius(0x1000)).abs() < 1e-9);
    }

    #[test]
    fn test_temperatures_encode_inverse() {
        let raw = [0, 1, 8191, 4096, 123, 4567, 2222, 7];
        let temps = ProbeTemperatures::from_raw(raw);
        let decoded = ProbeTemperatures::decode(&temps.encode()).unwrap();
        assert_eq!(decoded.raw(), raw);
    }

    #[test]
    fn test_temperatures_short_block() {
        assert!(ProbeTemperatures::decode(&[0u8; 12]).is_none());
    }

    #[test]
    fn test_mode_color_id() {
        // mode InstantRead (1), color Red (2), id 5 (raw 4)
        let byte = 0b100_010_01;
        let decoded = ModeColorId::decode(byte);
        assert_eq!(decoded.mode, ProbeMode::InstantRead);
        assert_eq!(decoded.color, ProbeColor::Red);
        assert_eq!(decoded.id.get(), 5);
        assert_eq!(decoded.encode(), byte);
    }

    #[test]
    fn test_virtual_sensors() {
        // battery low, core T3 (2), surface T5 (raw 1), ambient T8 (raw 3)
        let byte = 0b11_01_010_1;
        let (battery, sensors) = decode_battery_virtual(byte);
        assert_eq!(battery, BatteryStatus::Low);
        assert_eq!(sensors.core, 2);
        assert_eq!(sensors.surface, 4);
        assert_eq!(sensors.ambient, 7);
        assert_eq!(encode_battery_virtual(battery, &sensors), byte);
    }

    #[test]
    fn test_prediction_bit_offsets() {
        let status = PredictionStatus {
            state: PredictionState::Predicting,
            mode: PredictionMode::RemovalAndResting,
            kind: PredictionType::Resting,
            set_point_raw: 0x3FF,
            heat_start_raw: 0x155,
            seconds_remaining: 0x1_2345,
            estimated_core_raw: 0x7AB,
        };
        let bytes = status.encode();

        let bits = BitReader::new(&bytes);
        assert_eq!(bits.field(0, 4), Some(3));
        assert_eq!(bits.field(4, 2), Some(2));
        assert_eq!(bits.field(6, 2), Some(2));
        assert_eq!(bits.field(8, 10), Some(0x3FF));
        assert_eq!(bits.field(18, 10), Some(0x155));
        assert_eq!(bits.field(28, 17), Some(0x1_2345));
        assert_eq!(bits.field(45, 11), Some(0x7AB));

        assert_eq!(PredictionStatus::decode(&bytes), Some(status));
    }

    #[test]
    fn test_prediction_scaling() {
        let status = PredictionStatus {
            set_point_raw: 545,
            heat_start_raw: 210,
            estimated_core_raw: 600,
            ..Default::default()
        };
        assert!((status.set_point() - 54.5).abs() < 1e-9);
        assert!((status.heat_start() - 21.0).abs() < 1e-9);
        assert!((status.estimated_core() - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_food_safe_layouts() {
        let data = FoodSafeData {
            mode: FoodSafeMode::Integrated,
            product: 513,
            serving: FoodSafeServing::CookedAndChilled,
            threshold_raw: 1_100,
            z_value_raw: 140,
            reference_raw: 1_400,
            d_value_raw: 8_000,
            log_reduction_raw: 65,
        };
        assert_eq!(FoodSafeData::decode(&data.encode()), Some(data));

        let status = FoodSafeStatus {
            state: FoodSafeState::Safe,
            log_reduction_raw: 70,
            seconds_above_threshold: 600,
            log_sequence: 0xDEAD_BEEF,
        };
        assert_eq!(FoodSafeStatus::decode(&status.encode()), Some(status));
    }

    #[test]
    fn test_status_decode() {
        let telemetry = sample_telemetry();
        let bytes = encode_status(&telemetry);
        assert_eq!(bytes.len(), STATUS_MIN_LEN);
        assert_eq!(decode_status(&bytes), Some(telemetry));
    }

    #[test]
    fn test_status_with_food_safe() {
        let mut telemetry = sample_telemetry();
        telemetry.food_safe_data = FoodSafeData::decode(&[0x21; FOOD_SAFE_DATA_BYTES]);
        telemetry.food_safe_status = FoodSafeStatus::decode(&[0x01; FOOD_SAFE_STATUS_BYTES]);
        telemetry.overheating = Some(0b1000_0000);
        let bytes = encode_status(&telemetry);
        assert_eq!(decode_status(&bytes), Some(telemetry));
    }

    #[test]
    fn test_status_too_short() {
        let bytes = encode_status(&sample_telemetry());
        assert!(decode_status(&bytes[..STATUS_MIN_LEN - 1]).is_none());
        assert!(decode_status(&[]).is_none());
    }

    #[test]
    fn test_advertisement_direct_and_relayed() {
        let mut telemetry = sample_telemetry();
        telemetry.log_range = None;
        telemetry.prediction = None;
        telemetry.overheating = Some(0);

        let direct = Advertisement {
            product: ProductType::Probe,
            serial: 0x1000_2000,
            hop_count: None,
            telemetry: telemetry.clone(),
        };
        assert_eq!(decode_advertisement(&encode_advertisement(&direct)), Some(direct));

        let relayed = Advertisement {
            product: ProductType::Repeater,
            serial: 0x1000_2000,
            hop_count: Some(3),
            telemetry,
        };
        assert_eq!(decode_advertisement(&encode_advertisement(&relayed)), Some(relayed));
    }

    #[test]
    fn test_advertisement_rejects_short_and_unknown() {
        assert!(decode_advertisement(&[1u8; ADVERTISEMENT_MIN_LEN - 1]).is_none());
        let mut bytes = vec![0u8; ADVERTISEMENT_MIN_LEN];
        bytes[0] = 9;
        assert!(decode_advertisement(&bytes).is_none());
    }

    #[test]
    fn test_log_range() {
        let range = LogRange::new(0, 9);
        assert_eq!(range.len(), 10);
        assert!(range.contains(9));
        assert!(!range.contains(10));
        assert!(LogRange::new(5, 4).is_empty());
    }
}
