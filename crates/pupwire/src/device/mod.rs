//! Hubs and motors as seen from the client.
//!
//! A [`Device`] owns the state the hub reported for its port and the
//! [`PortGate`] that keeps one command in flight at a time. Sessions feed it
//! decoded frames through [`Device::apply_incoming`]; callers drive it with the
//! command methods in this module, which all report success as a `bool`.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use codee::Encoder;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

use pupwire_common::codec::LwpCodec;
use pupwire_common::error::ProtocolError;
use pupwire_common::{
    AttachedIo, FeedbackStatus, IoEvent, Message, MessageType, Port, PortFeedback, PortPair, ServerEvent,
};

use crate::config::{DeviceConfig, ServerAddr};
use crate::error::NetworkError;
use crate::gate::PortGate;
use crate::managers::Link;

mod commands;
mod state;

pub use commands::MotionOptions;
pub use state::{CommandRecord, DeviceState, FailedCommand, Timestamped};
use state::{lock, read, write};

/// The three kinds of device the hub can be driven through.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    /// The hub itself: actions, alerts, hub wide notifications
    Hub,
    /// One motor on one physical port
    SingleMotor,
    /// Two motors driven together through a virtual port
    SynchronizedMotor {
        /// First physical port
        first: Port,
        /// Second physical port
        second: Port,
    },
}

/// A frame was handed to a device that has no meaning for it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// Only clients send frames of this type.
    #[error("device `{device}` cannot apply a {message_type:?} frame")]
    UnexpectedMessage {
        /// Name of the device
        device: String,
        /// Type of the offending frame
        message_type: MessageType,
    },
}

/// A hub, a motor, or a synchronized motor pair.
///
/// Devices are shared as `Arc<Device>` between the caller, the session feeding
/// them and, in hub wide setups, the [`Router`](crate::Router).
pub struct Device {
    name: String,
    kind: DeviceKind,
    port: Port,
    server: ServerAddr,
    gear_ratio: f32,
    link: RwLock<Option<Arc<Link>>>,
    gate: RwLock<Arc<PortGate>>,
    state: RwLock<DeviceState>,
    record: Mutex<CommandRecord>,
    connected: watch::Sender<bool>,
}

impl Device {
    fn new(name: impl Into<String>, kind: DeviceKind, port: Port, server: ServerAddr) -> Self {
        Self {
            name: name.into(),
            kind,
            port,
            server,
            gear_ratio: 1.0,
            link: RwLock::new(None),
            gate: RwLock::new(Arc::new(PortGate::new())),
            state: RwLock::new(DeviceState::default()),
            record: Mutex::new(CommandRecord::default()),
            connected: watch::channel(false).0,
        }
    }

    /// The hub controller, registered with the server on `port`.
    pub fn hub(name: impl Into<String>, port: Port, server: ServerAddr) -> Self {
        Self::new(name, DeviceKind::Hub, port, server)
    }

    /// A motor on one physical port.
    pub fn single_motor(name: impl Into<String>, port: Port, server: ServerAddr) -> Self {
        Self::new(name, DeviceKind::SingleMotor, port, server)
    }

    /// Two motors on `first` and `second`, registered with the server on `first`.
    ///
    /// The virtual port is unknown until the hub reports it, see
    /// [`setup_virtual_port`](Self::setup_virtual_port).
    pub fn synchronized_motor(
        name: impl Into<String>,
        first: Port,
        second: Port,
        server: ServerAddr,
    ) -> Self {
        Self::new(name, DeviceKind::SynchronizedMotor { first, second }, first, server)
    }

    /// Build a device from its configuration.
    pub fn from_config(config: DeviceConfig) -> Self {
        Self::new(config.name, config.kind, config.port, config.server).with_gear_ratio(config.gear_ratio)
    }

    /// Set the gear ratio between motor and load.
    pub fn with_gear_ratio(mut self, gear_ratio: f32) -> Self {
        self.gear_ratio = gear_ratio;
        self
    }

    /// Use a virtual port the hub assigned earlier.
    pub fn with_virtual_port(self, virtual_port: Port) -> Self {
        write(&self.state).virtual_port = Some(virtual_port);
        self
    }

    /// Friendly name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Which kind of device this is.
    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    /// Port the device registers with the server.
    pub fn port(&self) -> Port {
        self.port
    }

    /// Proxy server the device talks to.
    pub fn server(&self) -> &ServerAddr {
        &self.server
    }

    /// Gear ratio between motor and load.
    pub fn gear_ratio(&self) -> f32 {
        self.gear_ratio
    }

    /// The two physical ports of a synchronized motor.
    pub fn port_pair(&self) -> Option<PortPair> {
        match self.kind {
            DeviceKind::SynchronizedMotor { first, second } => Some(PortPair::new(first, second)),
            _ => None,
        }
    }

    /// The virtual port of a synchronized motor, once the hub reported it.
    pub fn virtual_port(&self) -> Option<Port> {
        read(&self.state).virtual_port
    }

    /// True while the server confirms the registration of this device.
    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// A receiver following the "external server connected" flag.
    pub fn watch_connected(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    /// Wait until the server confirms the registration, at most `timeout`.
    pub async fn wait_connected(&self, timeout: Duration) -> bool {
        let mut connected = self.watch_connected();
        let wait = connected.wait_for(|connected| *connected);
        matches!(tokio::time::timeout(timeout, wait).await, Ok(Ok(_)))
    }

    /// The gate guarding this device's port.
    pub fn gate(&self) -> Arc<PortGate> {
        read(&self.gate).clone()
    }

    /// True if a command could be sent right away.
    pub fn is_port_free(&self) -> bool {
        self.gate().is_free()
    }

    /// A snapshot of everything the hub reported.
    pub fn state(&self) -> DeviceState {
        read(&self.state).clone()
    }

    /// Outcome of the most recent sends.
    pub fn commands(&self) -> CommandRecord {
        lock(&self.record).clone()
    }

    /// Latest port value, if any arrived yet.
    pub fn port_value(&self) -> Option<i32> {
        read(&self.state).port_value.as_ref().map(|stamped| stamped.value)
    }

    /// The port value received before the latest one.
    pub fn previous_port_value(&self) -> Option<i32> {
        read(&self.state).previous_port_value.as_ref().map(|stamped| stamped.value)
    }

    /// Latest problem reported by the hub.
    pub fn last_error(&self) -> Option<ProtocolError> {
        read(&self.state).last_error.as_ref().map(|stamped| stamped.value)
    }

    /// Latest command feedback for this device.
    pub fn feedback(&self) -> Option<FeedbackStatus> {
        read(&self.state).feedback.as_ref().map(|stamped| stamped.value)
    }

    /// Every command feedback received, oldest first.
    pub fn feedback_log(&self) -> Vec<Timestamped<FeedbackStatus>> {
        read(&self.state).feedback_log.clone()
    }

    /// True while the hub reports the port as attached.
    pub fn is_attached(&self) -> bool {
        read(&self.state).attached
    }

    /// Last command written to the session.
    pub fn last_sent(&self) -> Option<Message> {
        lock(&self.record).last_sent.as_ref().map(|stamped| stamped.value.clone())
    }

    /// Last command that could not be sent.
    pub fn last_failed(&self) -> Option<FailedCommand> {
        lock(&self.record).last_failed.as_ref().map(|stamped| stamped.value.clone())
    }

    /// True if `message` concerns this device.
    ///
    /// A device matches the frames naming its port. Synchronized motors also
    /// match their virtual port and frames that end in their two physical
    /// ports, in either order. Hubs match the hub wide frames that carry no
    /// port at all.
    pub fn accepts(&self, message: &Message) -> bool {
        let ports = message.ports();
        if ports.contains(&self.port) {
            return true;
        }
        match self.kind {
            DeviceKind::Hub => message.port().is_none() && !message.is_downstream_only(),
            DeviceKind::SingleMotor => false,
            DeviceKind::SynchronizedMotor { first, second } => {
                let by_virtual_port = self
                    .virtual_port()
                    .is_some_and(|virtual_port| ports.contains(&virtual_port));
                by_virtual_port || message.port_pair() == Some(PortPair::new(first, second))
            }
        }
    }

    /// True while the port is taken by a command of type `command_type`.
    ///
    /// Identifies the device a hub wide rejection belongs to.
    pub(crate) fn awaits_reply_to(&self, command_type: u8) -> bool {
        !self.is_port_free()
            && lock(&self.record)
                .last_sent
                .as_ref()
                .is_some_and(|sent| sent.value.message_type().byte() == command_type)
    }

    /// Encode `message`, wait for the port and write it to the session.
    ///
    /// Returns `false` if the command could not be encoded, the device has no
    /// session, or the write failed; the failure is recorded in
    /// [`last_failed`](Self::last_failed). Commands that ask for feedback keep
    /// the port taken until the hub reports it done.
    pub async fn send_command(&self, message: Message) -> bool {
        match self.send(&message).await {
            Ok(()) => true,
            Err(err) => {
                self.record_failure(message, &err);
                false
            }
        }
    }

    pub(crate) async fn send(&self, message: &Message) -> Result<(), NetworkError> {
        let frame = LwpCodec::encode(message)?;
        let link = read(&self.link)
            .clone()
            .ok_or_else(|| NetworkError::NotConnected(self.name.clone()))?;
        let gate = self.gate();

        gate.acquire().await?;
        write(&self.state).pair_feedback = (None, None);
        trace!("[{}] Sending {:?}", self.name, message);
        if let Err(err) = link.write_frame(&frame).await {
            error!("[{}] Could not write to {}: {}", self.name, link.peer(), err);
            gate.release_and_notify();
            return Err(err);
        }

        lock(&self.record).last_sent = Some(Timestamped::now(message.clone()));
        if !message.requires_feedback() {
            gate.release_and_notify();
        }
        Ok(())
    }

    fn record_failure(&self, message: Message, err: &NetworkError) {
        warn!("[{}] Command failed: {}", self.name, err);
        lock(&self.record).last_failed = Some(Timestamped::now(FailedCommand {
            message,
            reason: err.to_string(),
        }));
    }

    /// Apply a frame received from the hub.
    ///
    /// This is the only place device state changes. Frames only a client sends
    /// are rejected.
    pub fn apply_incoming(&self, message: &Message) -> Result<(), DispatchError> {
        match message {
            Message::HubAction(action) => {
                debug!("[{}] Hub action {:?}", self.name, action);
                write(&self.state).hub_action = Some(Timestamped::now(*action));
            }
            Message::HubAlert(alert) => {
                debug!("[{}] Hub alert {:?}", self.name, alert);
                write(&self.state).record_alert(*alert);
            }
            Message::AttachedIo(io) => self.apply_attached_io(io),
            Message::GenericError(generic) => {
                let mut state = write(&self.state);
                state.generic_error = Some(Timestamped::now(*generic));
                if !generic.code.is_ack() {
                    warn!("[{}] Hub rejected command 0x{:02x}: {:?}", self.name, generic.command_type, generic.code);
                    state.record_error(ProtocolError::Rejected {
                        command_type: generic.command_type,
                        code: generic.code,
                    });
                    drop(state);
                    self.gate().release_and_notify();
                }
            }
            Message::PortValue(value) => {
                trace!("[{}] Port value {}", self.name, value.value());
                write(&self.state).record_value(value.value());
            }
            Message::ExtServer(server) => {
                write(&self.state).record_ext_server(*server);
                match server.event {
                    Some(ServerEvent::Connected) => {
                        info!("[{}] Registered with the server on {}", self.name, server.port);
                        self.connected.send_replace(true);
                        self.gate().release_and_notify();
                    }
                    Some(ServerEvent::Disconnected) => {
                        info!("[{}] Unregistered from the server", self.name);
                        self.connected.send_replace(false);
                    }
                    None => {}
                }
            }
            Message::PortNotification(notification) => {
                debug!("[{}] Port notification {:?}", self.name, notification);
                write(&self.state).port_notification = Some(Timestamped::now(*notification));
            }
            Message::PortFeedback(feedback) => self.apply_feedback(feedback),
            Message::PortOutput(_) | Message::PortNotificationRequest(_) | Message::VirtualPortSetup(_) => {
                return Err(DispatchError::UnexpectedMessage {
                    device: self.name.clone(),
                    message_type: message.message_type(),
                });
            }
        }
        Ok(())
    }

    fn apply_attached_io(&self, io: &AttachedIo) {
        let port = io.port;
        let mut state = write(&self.state);
        state.attached_io = Some(Timestamped::now(*io));

        let own_port = port == self.port || state.virtual_port == Some(port);
        match io.event {
            IoEvent::Detached if own_port => {
                debug!("[{}] Detached from {}", self.name, port);
                state.attached = false;
                if state.virtual_port == Some(port) {
                    state.virtual_port = None;
                }
                drop(state);
                self.gate().clear();
            }
            IoEvent::Attached { io_type, .. } if own_port => {
                debug!("[{}] {:?} attached to {}", self.name, io_type, port);
                state.attached = true;
                drop(state);
                self.gate().release_and_notify();
            }
            IoEvent::VirtualAttached { port_a, port_b, .. }
                if self.port_pair() == Some(PortPair::new(port_a, port_b)) =>
            {
                info!("[{}] Virtual port {} set up", self.name, port);
                state.virtual_port = Some(port);
                state.attached = true;
                drop(state);
                self.gate().release_and_notify();
            }
            _ => trace!("[{}] Ignoring attached I/O on {}", self.name, port),
        }
    }

    fn apply_feedback(&self, feedback: &PortFeedback) {
        let Some(status) = self.feedback_status(feedback) else {
            trace!("[{}] No complete feedback for this device yet", self.name);
            return;
        };
        trace!("[{}] Feedback {:?}", self.name, status);

        let mut state = write(&self.state);
        state.record_feedback(status);
        if status.0 & FeedbackStatus::DISCARDED != 0 {
            warn!("[{}] Hub discarded the running command", self.name);
            state.record_error(ProtocolError::Discarded { port: self.port });
        }
        drop(state);

        if status.releases_port() {
            self.gate().release_and_notify();
        }
    }

    /// The status this device should act on.
    ///
    /// A synchronized motor acts on its virtual port, or on both physical
    /// ports once each reported since the last command, possibly in separate
    /// frames. Their statuses are combined: the pair is done once neither
    /// motor is still running.
    fn feedback_status(&self, feedback: &PortFeedback) -> Option<FeedbackStatus> {
        if let Some(virtual_port) = self.virtual_port()
            && let Some(status) = feedback.status_for(virtual_port)
        {
            return Some(status);
        }
        let Some(PortPair { first, second }) = self.port_pair() else {
            return feedback.status_for(self.port);
        };

        let mut state = write(&self.state);
        let pending = &mut state.pair_feedback;
        if let Some(status) = feedback.status_for(first) {
            pending.0 = Some(status);
        }
        if let Some(status) = feedback.status_for(second) {
            pending.1 = Some(status);
        }
        match *pending {
            (Some(a), Some(b)) => Some(FeedbackStatus(a.0 | b.0)),
            _ => None,
        }
    }

    pub(crate) fn attach_link(&self, link: Arc<Link>) {
        {
            let mut gate = write(&self.gate);
            if gate.is_closed() {
                *gate = Arc::new(PortGate::new());
            }
        }
        debug!("[{}] Attached to session with {}", self.name, link.peer());
        *write(&self.link) = Some(link);
    }

    /// Forget `link` if it is still the device's session.
    pub(crate) fn detach_link(&self, link: &Arc<Link>) -> bool {
        let mut current = write(&self.link);
        if !current.as_ref().is_some_and(|current| Arc::ptr_eq(current, link)) {
            return false;
        }
        *current = None;
        drop(current);

        self.connected.send_replace(false);
        self.gate().close();
        info!("[{}] Session with {} ended", self.name, link.peer());
        true
    }

    pub(crate) fn is_linked_to(&self, link: &Arc<Link>) -> bool {
        read(&self.link).as_ref().is_some_and(|current| Arc::ptr_eq(current, link))
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("port", &self.port)
            .field("server", &self.server)
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pupwire_common::{
        ErrorCode, ExtServer, FeedbackEntry, GenericError, IoType, PortValue,
        ServerCommand,
    };

    fn feedback(entries: &[(Port, u8)]) -> Message {
        Message::PortFeedback(PortFeedback {
            entries: entries
                .iter()
                .map(|(port, status)| FeedbackEntry { port: *port, status: FeedbackStatus(*status) })
                .collect(),
        })
    }

    fn motor() -> Device {
        Device::single_motor("rwd", Port::A, ServerAddr::default())
    }

    #[test]
    fn feedback_releases_and_logs() {
        let device = motor();
        assert!(device.gate().clear());

        device.apply_incoming(&feedback(&[(Port::A, FeedbackStatus::IN_PROGRESS)])).unwrap();
        assert!(!device.is_port_free());

        device.apply_incoming(&feedback(&[(Port::A, 0x0a)])).unwrap();
        assert!(device.is_port_free());
        assert_eq!(device.feedback(), Some(FeedbackStatus(0x0a)));
        assert_eq!(device.feedback_log().len(), 2);
    }

    #[test]
    fn discarded_feedback_is_recorded() {
        let device = motor();
        device.apply_incoming(&feedback(&[(Port::A, 0x0c)])).unwrap();
        assert_eq!(device.last_error(), Some(ProtocolError::Discarded { port: Port::A }));
        assert_eq!(device.state().error_log.len(), 1);
    }

    #[test]
    fn port_values_shift() {
        let device = motor();
        for raw in [vec![0x10, 0x00, 0x00, 0x00], vec![0x20, 0x00, 0x00, 0x00]] {
            device.apply_incoming(&Message::PortValue(PortValue { port: Port::A, raw })).unwrap();
        }
        assert_eq!(device.port_value(), Some(32));
        assert_eq!(device.previous_port_value(), Some(16));
    }

    #[test]
    fn attach_and_detach_toggle_the_gate() {
        let device = motor();
        let detached = Message::AttachedIo(AttachedIo { port: Port::A, event: IoEvent::Detached });
        device.apply_incoming(&detached).unwrap();
        assert!(!device.is_attached());
        assert!(!device.is_port_free());

        let attached = Message::AttachedIo(AttachedIo {
            port: Port::A,
            event: IoEvent::Attached { io_type: IoType::TECHNIC_LARGE_MOTOR, hw_revision: 0, sw_revision: 0 },
        });
        device.apply_incoming(&attached).unwrap();
        assert!(device.is_attached());
        assert!(device.is_port_free());
    }

    #[test]
    fn synchronized_motor_learns_its_virtual_port() {
        let device = Device::synchronized_motor("lift", Port::A, Port::B, ServerAddr::default());
        let virtual_attached = Message::AttachedIo(AttachedIo {
            port: Port(0x10),
            event: IoEvent::VirtualAttached { io_type: IoType::TECHNIC_LARGE_MOTOR, port_a: Port::B, port_b: Port::A },
        });
        assert!(device.accepts(&virtual_attached));
        device.apply_incoming(&virtual_attached).unwrap();
        assert_eq!(device.virtual_port(), Some(Port(0x10)));
        assert!(device.accepts(&feedback(&[(Port(0x10), 0x0a)])));
        assert!(!device.accepts(&feedback(&[(Port::C, 0x0a)])));
    }

    #[test]
    fn synchronized_feedback_waits_for_both_motors() {
        let device = Device::synchronized_motor("lift", Port::A, Port::B, ServerAddr::default());
        assert!(device.gate().clear());
        device.apply_incoming(&feedback(&[(Port::A, 0x0a), (Port::B, 0x01)])).unwrap();
        assert!(!device.is_port_free());
        device.apply_incoming(&feedback(&[(Port::A, 0x0a), (Port::B, 0x0a)])).unwrap();
        assert!(device.is_port_free());
    }

    #[test]
    fn one_motor_of_a_pair_does_not_free_it() {
        let device = Device::synchronized_motor("lift", Port::A, Port::B, ServerAddr::default())
            .with_virtual_port(Port(0x10));
        assert!(device.gate().clear());

        device.apply_incoming(&feedback(&[(Port::A, 0x0a)])).unwrap();
        assert!(!device.is_port_free());
        assert!(device.feedback_log().is_empty());

        // The second motor reports on its own
        device.apply_incoming(&feedback(&[(Port::B, 0x0a)])).unwrap();
        assert!(device.is_port_free());
        assert_eq!(device.feedback(), Some(FeedbackStatus(0x0a)));
    }

    #[test]
    fn rejected_commands_release_the_gate() {
        let device = motor();
        assert!(device.gate().clear());

        let ack = Message::GenericError(GenericError { command_type: 0x81, code: ErrorCode::Ack });
        device.apply_incoming(&ack).unwrap();
        assert!(!device.is_port_free());
        assert_eq!(device.last_error(), None);

        let nack = Message::GenericError(GenericError { command_type: 0x81, code: ErrorCode::Overcurrent });
        device.apply_incoming(&nack).unwrap();
        assert!(device.is_port_free());
        assert_eq!(
            device.last_error(),
            Some(ProtocolError::Rejected { command_type: 0x81, code: ErrorCode::Overcurrent })
        );
    }

    #[test]
    fn registration_reply_sets_connected() {
        let device = motor();
        let reply = Message::ExtServer(ExtServer {
            port: Port::A,
            command: ServerCommand::Register,
            event: Some(ServerEvent::Connected),
        });
        device.apply_incoming(&reply).unwrap();
        assert!(device.is_connected());
        assert!(device.is_port_free());

        let dropped = Message::ExtServer(ExtServer {
            port: Port::A,
            command: ServerCommand::Unregister,
            event: Some(ServerEvent::Disconnected),
        });
        device.apply_incoming(&dropped).unwrap();
        assert!(!device.is_connected());
        let log = device.state().ext_server_log;
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].value.event, Some(ServerEvent::Disconnected));
    }

    #[test]
    fn client_frames_are_rejected() {
        let device = motor();
        let request = Message::VirtualPortSetup(pupwire_common::VirtualPortSetup::Connect {
            port_a: Port::A,
            port_b: Port::B,
        });
        assert_eq!(
            device.apply_incoming(&request),
            Err(DispatchError::UnexpectedMessage {
                device: "rwd".into(),
                message_type: MessageType::VirtualPortSetup,
            })
        );
    }

    #[tokio::test]
    async fn sending_without_a_session_fails() {
        let device = motor();
        assert!(!device.connect_ext_server().await);
        let failed = device.last_failed().unwrap();
        assert!(matches!(failed.message, Message::ExtServer(_)));
        assert!(device.is_port_free());
    }
}
