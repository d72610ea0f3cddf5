//! Repeater mesh
//!
//! - **repeater**: per-repeater reachability and link quality
//! - **route**: direct-vs-repeater path selection
//!
//! ```text
//!                 ┌──────────────┐
//!          ┌─────►│  Repeater A  │──┐
//!          │      └──────────────┘  │   ProbeStatus / Heartbeat
//! ┌────────┴───┐                    ├──────────────────────────► RouteSelector
//! │ Controller │  direct link       │
//! └────────┬───┘ ◄────────── Probe ─┘
//!          │      ┌──────────────┐
//!          └─────►│  Repeater B  │
//!                 └──────────────┘
//! ```

pub mod repeater;
pub mod route;

pub use repeater::{LinkQuality, RepeaterNode, RepeaterSnapshot};
pub use route::{Route, RouteSelector};
