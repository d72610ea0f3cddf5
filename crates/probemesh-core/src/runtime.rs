//! Tokio actor around the engine
//!
//! One task owns the [`Engine`] and is the only place its state changes.
//! Everything else talks to it through an [`EngineHandle`]:
//!
//! ```text
//!  transport events ──┐
//!  EngineHandle cmds ─┼──► select! ──► Engine ──► broadcast<EngineEvent>
//!  200 ms interval ───┤
//!  1 s interval ──────┘
//! ```
//!
//! The task stops when every handle is dropped or on
//! [`EngineHandle::shutdown`]; pending requests then fail with
//! [`RequestError::EngineStopped`].

use crate::correlator::Completion;
use crate::engine::Engine;
use crate::error::RequestError;
use crate::events::EngineEvent;
use crate::log_sync::DataPoint;
use crate::mesh::RepeaterSnapshot;
use crate::prediction::PredictionInfo;
use crate::probe::ProbeSnapshot;
use crate::transport::{LinkId, Transport, TransportEvent};
use crate::wire::{
    FoodSafeData, PredictionMode, ProbeColor, ProbeId, Request, Response, SessionInfo,
};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::MissedTickBehavior;

enum Command {
    Probe {
        serial: u32,
        reply: oneshot::Sender<Option<ProbeSnapshot>>,
    },
    Probes {
        reply: oneshot::Sender<Vec<ProbeSnapshot>>,
    },
    Prediction {
        serial: u32,
        reply: oneshot::Sender<Option<PredictionInfo>>,
    },
    PercentSynced {
        serial: u32,
        reply: oneshot::Sender<Option<u8>>,
    },
    SessionLog {
        serial: u32,
        session_id: Option<u32>,
        reply: oneshot::Sender<Option<Vec<DataPoint>>>,
    },
    Repeaters {
        reply: oneshot::Sender<Vec<RepeaterSnapshot>>,
    },
    Request {
        serial: u32,
        request: Request,
        reply: oneshot::Sender<oneshot::Receiver<Completion>>,
    },
    Connect(LinkId),
    Disconnect(LinkId),
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// Start the engine task on the current tokio runtime
pub fn spawn<T: Transport>(
    engine: Engine<T>,
    transport_events: mpsc::Receiver<TransportEvent>,
) -> EngineHandle {
    let (commands, command_rx) = mpsc::channel(engine.config().runtime.command_buffer.max(1));
    let events = engine.event_sender();
    tokio::spawn(run(engine, transport_events, command_rx));
    EngineHandle { commands, events }
}

fn now() -> std::time::Instant {
    tokio::time::Instant::now().into_std()
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn run<T: Transport>(
    mut engine: Engine<T>,
    mut transport_events: mpsc::Receiver<TransportEvent>,
    mut commands: mpsc::Receiver<Command>,
) {
    let mut fast = ticker(engine.config().runtime.fast_tick());
    let mut slow = ticker(engine.config().runtime.slow_tick());
    let mut transport_open = true;
    tracing::debug!("engine task started");

    loop {
        tokio::select! {
            event = transport_events.recv(), if transport_open => match event {
                Some(event) => engine.handle_event(event, now()),
                None => {
                    tracing::debug!("transport event stream closed");
                    transport_open = false;
                }
            },
            command = commands.recv() => match command {
                Some(Command::Shutdown { done }) => {
                    engine.shutdown();
                    let _ = done.send(());
                    break;
                }
                Some(command) => execute(&mut engine, command),
                None => {
                    engine.shutdown();
                    break;
                }
            },
            _ = fast.tick() => engine.fast_tick(now()),
            _ = slow.tick() => engine.slow_tick(now()),
        }
    }
    tracing::debug!("engine task stopped");
}

fn execute<T: Transport>(engine: &mut Engine<T>, command: Command) {
    // a caller that stopped waiting is not an error
    match command {
        Command::Probe { serial, reply } => {
            let _ = reply.send(engine.probe(serial));
        }
        Command::Probes { reply } => {
            let _ = reply.send(engine.probes());
        }
        Command::Prediction { serial, reply } => {
            let _ = reply.send(engine.prediction(serial));
        }
        Command::PercentSynced { serial, reply } => {
            let _ = reply.send(engine.percent_synced(serial));
        }
        Command::SessionLog {
            serial,
            session_id,
            reply,
        } => {
            let _ = reply.send(engine.session_log(serial, session_id));
        }
        Command::Repeaters { reply } => {
            let _ = reply.send(engine.repeaters());
        }
        Command::Request {
            serial,
            request,
            reply,
        } => {
            let _ = reply.send(engine.request(serial, request, now()));
        }
        Command::Connect(link) => engine.connect(link),
        Command::Disconnect(link) => engine.disconnect(link),
        Command::Shutdown { done } => {
            let _ = done.send(());
        }
    }
}

/// Cloneable access to a running engine
#[derive(Debug, Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<EngineEvent>,
}

impl EngineHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    async fn call<R>(
        &self,
        command: impl FnOnce(oneshot::Sender<R>) -> Command,
    ) -> Result<R, RequestError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| RequestError::EngineStopped)?;
        rx.await.map_err(|_| RequestError::EngineStopped)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn probe(&self, serial: u32) -> Result<Option<ProbeSnapshot>, RequestError> {
        self.call(|reply| Command::Probe { serial, reply }).await
    }

    pub async fn probes(&self) -> Result<Vec<ProbeSnapshot>, RequestError> {
        self.call(|reply| Command::Probes { reply }).await
    }

    pub async fn prediction(&self, serial: u32) -> Result<Option<PredictionInfo>, RequestError> {
        self.call(|reply| Command::Prediction { serial, reply }).await
    }

    pub async fn percent_synced(&self, serial: u32) -> Result<Option<u8>, RequestError> {
        self.call(|reply| Command::PercentSynced { serial, reply })
            .await
    }

    /// Points of a session (`None` = active) in sequence order
    pub async fn session_log(
        &self,
        serial: u32,
        session_id: Option<u32>,
    ) -> Result<Option<Vec<DataPoint>>, RequestError> {
        self.call(|reply| Command::SessionLog {
            serial,
            session_id,
            reply,
        })
        .await
    }

    pub async fn repeaters(&self) -> Result<Vec<RepeaterSnapshot>, RequestError> {
        self.call(|reply| Command::Repeaters { reply }).await
    }

    // =========================================================================
    // Requests
    // =========================================================================

    /// Send any request and wait for its completion
    pub async fn request(&self, serial: u32, request: Request) -> Completion {
        let completion = self
            .call(|reply| Command::Request {
                serial,
                request,
                reply,
            })
            .await?;
        completion.await.map_err(|_| RequestError::EngineStopped)?
    }

    async fn acknowledged(&self, serial: u32, request: Request) -> Result<(), RequestError> {
        match self.request(serial, request).await? {
            Response::Ack(_) => Ok(()),
            _ => Err(RequestError::UnexpectedResponse),
        }
    }

    pub async fn set_probe_id(&self, serial: u32, id: ProbeId) -> Result<(), RequestError> {
        self.acknowledged(serial, Request::SetProbeId(id)).await
    }

    pub async fn set_color(&self, serial: u32, color: ProbeColor) -> Result<(), RequestError> {
        self.acknowledged(serial, Request::SetProbeColor(color))
            .await
    }

    /// Start predicting toward `set_point` °C
    pub async fn set_prediction(
        &self,
        serial: u32,
        set_point: f64,
        mode: PredictionMode,
    ) -> Result<(), RequestError> {
        self.acknowledged(serial, Request::SetPrediction { set_point, mode })
            .await
    }

    pub async fn cancel_prediction(&self, serial: u32) -> Result<(), RequestError> {
        self.set_prediction(serial, 0.0, PredictionMode::None).await
    }

    pub async fn read_session_info(&self, serial: u32) -> Result<SessionInfo, RequestError> {
        match self.request(serial, Request::ReadSessionInfo).await? {
            Response::SessionInfo(info) => Ok(info),
            _ => Err(RequestError::UnexpectedResponse),
        }
    }

    pub async fn firmware_revision(&self, serial: u32) -> Result<String, RequestError> {
        match self.request(serial, Request::ReadFirmwareRevision).await? {
            Response::FirmwareRevision(text) => Ok(text),
            _ => Err(RequestError::UnexpectedResponse),
        }
    }

    pub async fn hardware_revision(&self, serial: u32) -> Result<String, RequestError> {
        match self.request(serial, Request::ReadHardwareRevision).await? {
            Response::HardwareRevision(text) => Ok(text),
            _ => Err(RequestError::UnexpectedResponse),
        }
    }

    pub async fn model_info(&self, serial: u32) -> Result<String, RequestError> {
        match self.request(serial, Request::ReadModelInfo).await? {
            Response::ModelInfo(text) => Ok(text),
            _ => Err(RequestError::UnexpectedResponse),
        }
    }

    pub async fn over_temperature(&self, serial: u32) -> Result<bool, RequestError> {
        match self.request(serial, Request::ReadOverTemperature).await? {
            Response::OverTemperature(flag) => Ok(flag),
            _ => Err(RequestError::UnexpectedResponse),
        }
    }

    pub async fn configure_food_safe(
        &self,
        serial: u32,
        data: FoodSafeData,
    ) -> Result<(), RequestError> {
        self.acknowledged(serial, Request::ConfigureFoodSafe(data))
            .await
    }

    pub async fn reset_food_safe(&self, serial: u32) -> Result<(), RequestError> {
        self.acknowledged(serial, Request::ResetFoodSafe).await
    }

    // =========================================================================
    // Links
    // =========================================================================

    pub async fn connect(&self, link: LinkId) -> Result<(), RequestError> {
        self.commands
            .send(Command::Connect(link))
            .await
            .map_err(|_| RequestError::EngineStopped)
    }

    pub async fn disconnect(&self, link: LinkId) -> Result<(), RequestError> {
        self.commands
            .send(Command::Disconnect(link))
            .await
            .map_err(|_| RequestError::EngineStopped)
    }

    /// Stop the engine task and wait for it to finish
    pub async fn shutdown(&self) {
        let _ = self.call(|done| Command::Shutdown { done }).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::transport::{ChannelTransport, DeviceKind, TransportCommand};
    use crate::wire::message::direct_response_frame;
    use crate::wire::{Frame, FrameFormat, MessageClass};

    fn start() -> (
        EngineHandle,
        mpsc::Sender<TransportEvent>,
        mpsc::UnboundedReceiver<TransportCommand>,
    ) {
        let (transport, outbound) = ChannelTransport::new();
        let engine = Engine::new(EngineConfig::default(), transport);
        let (events_tx, events_rx) = mpsc::channel(16);
        (spawn(engine, events_rx), events_tx, outbound)
    }

    #[tokio::test(start_paused = true)]
    async fn test_reads_through_handle() {
        let (handle, events, _outbound) = start();
        let mut subscription = handle.subscribe();
        events
            .send(TransportEvent::Connected {
                link: LinkId(3),
                device: DeviceKind::Probe { serial: 55 },
            })
            .await
            .unwrap();

        assert_eq!(
            subscription.recv().await.unwrap(),
            EngineEvent::ProbeDiscovered { serial: 55 }
        );
        let probes = handle.probes().await.unwrap();
        assert_eq!(probes.len(), 1);
        assert_eq!(probes[0].direct_link, Some(LinkId(3)));
        assert_eq!(handle.percent_synced(55).await.unwrap(), Some(0));
        assert_eq!(handle.probe(56).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_route() {
        let (handle, _events, _outbound) = start();
        assert_eq!(
            handle.model_info(9).await,
            Err(RequestError::NoRoute(9))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_answered() {
        let (handle, events, mut outbound) = start();
        events
            .send(TransportEvent::Connected {
                link: LinkId(3),
                device: DeviceKind::Probe { serial: 55 },
            })
            .await
            .unwrap();

        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.set_color(55, ProbeColor::Green).await })
        };

        // the engine may read session info first
        loop {
            if let TransportCommand::Send { data, .. } = outbound.recv().await.unwrap() {
                let frame = Frame::from_bytes(&data, FrameFormat::DirectRequest).unwrap();
                if frame.message_type == MessageClass::SetProbeColor.as_byte() {
                    break;
                }
            }
        }

        let reply = direct_response_frame(&Response::Ack(MessageClass::SetProbeColor), true);
        events
            .send(TransportEvent::FrameReceived {
                link: LinkId(3),
                data: reply.to_bytes(),
            })
            .await
            .unwrap();
        assert_eq!(waiter.await.unwrap(), Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_request_times_out() {
        let (handle, events, _outbound) = start();
        events
            .send(TransportEvent::Connected {
                link: LinkId(3),
                device: DeviceKind::Probe { serial: 55 },
            })
            .await
            .unwrap();
        // paused clock auto-advances through the sweep ticks
        assert_eq!(
            handle.firmware_revision(55).await,
            Err(RequestError::Timeout)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_engine() {
        let (handle, _events, _outbound) = start();
        handle.shutdown().await;
        assert_eq!(handle.probes().await, Err(RequestError::EngineStopped));
    }
}
