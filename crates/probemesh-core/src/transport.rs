//! Transport collaborator contract
//!
//! The engine never touches a radio API. It asks a [`Transport`] to
//! connect, disconnect and send, and is fed [`TransportEvent`]s for
//! everything that comes back.
//!
//! ```text
//!            Transport::send(link, bytes)
//!   Engine ───────────────────────────────► radio stack
//!     ▲                                         │
//!     └──────────── TransportEvent ─────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

/// Physical link handle assigned by the transport
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkId(pub u64);

impl fmt::Debug for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LinkId({})", self.0)
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link#{}", self.0)
    }
}

/// What sits at the far end of a connected link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceKind {
    /// A probe's own UART service
    Probe { serial: u32 },
    /// A repeater speaking the mesh framing
    Repeater,
}

/// Inbound events from the transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected { link: LinkId, device: DeviceKind },
    Disconnected { link: LinkId },
    /// Bytes from a UART characteristic, possibly a partial frame
    FrameReceived { link: LinkId, data: Vec<u8> },
    /// A probe's status characteristic notified
    StatusNotification { link: LinkId, data: Vec<u8> },
    /// Manufacturer data from a scan, vendor id stripped
    Advertisement { link: LinkId, rssi: i16, data: Vec<u8> },
    /// Signal strength sample for a connected link
    Rssi { link: LinkId, rssi: i16 },
}

/// Operations the engine needs from the radio stack
///
/// Implementations must not block: sends are fire-and-forget and
/// completion is observed through later [`TransportEvent`]s.
pub trait Transport: Send + 'static {
    fn connect(&mut self, link: LinkId);
    fn disconnect(&mut self, link: LinkId);
    fn send(&mut self, link: LinkId, data: Vec<u8>);
}

/// Outbound operation captured by [`ChannelTransport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCommand {
    Connect(LinkId),
    Disconnect(LinkId),
    Send { link: LinkId, data: Vec<u8> },
}

/// Transport that forwards every operation into a channel
///
/// Used by the simulator and tests, which play the radio stack on the
/// receiving end.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<TransportCommand>,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TransportCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, command: TransportCommand) {
        if self.tx.send(command).is_err() {
            tracing::debug!("transport receiver dropped, discarding command");
        }
    }
}

impl Transport for ChannelTransport {
    fn connect(&mut self, link: LinkId) {
        self.forward(TransportCommand::Connect(link));
    }

    fn disconnect(&mut self, link: LinkId) {
        self.forward(TransportCommand::Disconnect(link));
    }

    fn send(&mut self, link: LinkId, data: Vec<u8>) {
        self.forward(TransportCommand::Send { link, data });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_transport_forwards() {
        let (mut transport, mut rx) = ChannelTransport::new();
        transport.connect(LinkId(1));
        transport.send(LinkId(1), vec![0xCA, 0xFE]);
        transport.disconnect(LinkId(1));

        assert_eq!(rx.try_recv().unwrap(), TransportCommand::Connect(LinkId(1)));
        assert_eq!(
            rx.try_recv().unwrap(),
            TransportCommand::Send {
                link: LinkId(1),
                data: vec![0xCA, 0xFE]
            }
        );
        assert_eq!(rx.try_recv().unwrap(), TransportCommand::Disconnect(LinkId(1)));
    }

    #[test]
    fn test_send_after_receiver_dropped() {
        let (mut transport, rx) = ChannelTransport::new();
        drop(rx);
        transport.send(LinkId(2), vec![1]);
    }

    #[test]
    fn test_link_display() {
        assert_eq!(LinkId(7).to_string(), "link#7");
    }
}
