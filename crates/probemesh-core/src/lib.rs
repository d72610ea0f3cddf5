//! # Probe Mesh Protocol Engine
//!
//! This crate connects a controller application to a multi-hop wireless
//! mesh of temperature probes and repeater nodes. It keeps near-real-time
//! probe state and a complete, gap-free temperature log, even across
//! reconnects and relay hops.
//!
//! ## Overview
//!
//! - **Wire codec**: bit-packed telemetry, CRC-checked direct and mesh frames
//! - **Arbitration**: picks among competing reports of the same probe
//! - **Log sync**: per-session log store with gap detection and refill
//! - **Correlation**: request/response matching with class timeouts
//! - **Routing**: direct link or best repeater
//! - **Prediction**: smoothed, interpolated time remaining
//!
//! ## Data Flow
//!
//! ```text
//! RX: bytes → FrameDecoder → Inbound → Arbiter → Probe → LogSynchronizer / PredictionSmoother
//! TX: gap scan → RouteSelector → Request → RequestCorrelator → Frame → Transport
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use probemesh_core::{runtime, ChannelTransport, Engine, EngineConfig};
//! use tokio::sync::mpsc;
//!
//! # async fn demo() {
//! let (transport, _outbound) = ChannelTransport::new();
//! let engine = Engine::new(EngineConfig::default(), transport);
//! let (_events, inbound) = mpsc::channel(64);
//!
//! let handle = runtime::spawn(engine, inbound);
//! for probe in handle.probes().await.unwrap_or_default() {
//!     println!("{:08x}: {}% synced", probe.serial, probe.percent_synced);
//! }
//! # }
//! ```

pub mod arbitration;
pub mod config;
pub mod correlator;
pub mod engine;
pub mod error;
pub mod events;
pub mod log_sync;
pub mod mesh;
pub mod prediction;
pub mod probe;
pub mod runtime;
pub mod sim;
pub mod transport;
pub mod wire;

pub use arbitration::{Arbiter, Channel, Verdict};
pub use config::EngineConfig;
pub use correlator::{Completion, CorrelationKey, RequestCorrelator};
pub use engine::Engine;
pub use error::{EngineError, RequestError, Result};
pub use events::EngineEvent;
pub use log_sync::{DataPoint, LogSession, LogSynchronizer};
pub use mesh::{RepeaterSnapshot, Route, RouteSelector};
pub use prediction::{PredictionInfo, PredictionSmoother};
pub use probe::{DeviceInfo, ProbeSnapshot};
pub use runtime::EngineHandle;
pub use transport::{ChannelTransport, DeviceKind, LinkId, Transport, TransportCommand, TransportEvent};
