use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use crate::error::DecodeError;
use crate::{Port, PortPair};

/// Declares a field enum that maps one-to-one onto a protocol byte.
///
/// Generates `byte()` and a `TryFrom<u8>` impl that rejects unmapped bytes
/// with [`DecodeError::UnknownValue`].
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $field:literal {
            $( $(#[$vmeta:meta])* $variant:ident = $value:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $value ),+
        }

        impl $name {
            /// The byte this value is sent as.
            #[inline(always)]
            pub fn byte(self) -> u8 {
                self as u8
            }
        }

        impl TryFrom<u8> for $name {
            type Error = DecodeError;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $( $value => Ok($name::$variant), )+
                    _ => Err(DecodeError::UnknownValue { field: $field, value }),
                }
            }
        }
    };
}

wire_enum! {
    /// The third byte of every frame.
    MessageType, "message_type" {
        /// Hub action (both directions)
        HubAction = 0x02,
        /// Hub alert request or update
        HubAlert = 0x03,
        /// Attached I/O notification
        AttachedIo = 0x04,
        /// Generic error notification
        GenericError = 0x05,
        /// Port input format setup (single)
        PortNotificationRequest = 0x41,
        /// Port value (single)
        PortValue = 0x45,
        /// Registration with the proxy server
        ExtServer = 0x46,
        /// Port input format (single)
        PortNotification = 0x47,
        /// Virtual port setup
        VirtualPortSetup = 0x61,
        /// Port output command
        PortOutput = 0x81,
        /// Port output command feedback
        PortFeedback = 0x82,
    }
}

wire_enum! {
    /// Things the hub is asked to do, or announces it is about to do.
    HubAction, "hub_action" {
        /// Switch the hub off
        SwitchOff = 0x01,
        /// Drop the connection
        Disconnect = 0x02,
        /// VCC port control on
        VccPortControlOn = 0x03,
        /// VCC port control off
        VccPortControlOff = 0x04,
        /// Show the busy indication
        BusyIndicationOn = 0x05,
        /// Hide the busy indication
        BusyIndicationOff = 0x06,
        /// Shut down without any cleanup
        FastShutdown = 0x2F,
        /// Upstream: the hub will switch off
        WillSwitchOff = 0x30,
        /// Upstream: the hub will disconnect
        WillDisconnect = 0x31,
        /// Upstream: the hub will enter boot mode
        WillGoIntoBootMode = 0x32,
    }
}

wire_enum! {
    /// Conditions the hub can raise alerts for.
    AlertType, "alert_type" {
        /// Battery low
        LowVoltage = 0x01,
        /// Current draw too high
        HighCurrent = 0x02,
        /// Weak radio link
        LowSignalStrength = 0x03,
        /// Over power condition
        OverPowerCondition = 0x04,
    }
}

wire_enum! {
    /// What a hub alert frame asks for or reports.
    AlertOperation, "alert_operation" {
        /// Enable updates
        EnableUpdates = 0x01,
        /// Disable updates
        DisableUpdates = 0x02,
        /// Request a single update
        RequestUpdate = 0x03,
        /// Upstream update
        Update = 0x04,
    }
}

wire_enum! {
    /// Return codes of a generic error notification.
    ErrorCode, "error_code" {
        /// Acknowledged
        Ack = 0x01,
        /// Multiple acknowledged
        Mack = 0x02,
        /// Buffer overflow
        BufferOverflow = 0x03,
        /// Timeout
        Timeout = 0x04,
        /// Command not recognized
        CommandNotRecognized = 0x05,
        /// Invalid use
        InvalidUse = 0x06,
        /// Overcurrent
        Overcurrent = 0x07,
        /// Internal error
        InternalError = 0x08,
    }
}

impl ErrorCode {
    /// True for the acknowledgement codes.
    pub fn is_ack(self) -> bool {
        matches!(self, ErrorCode::Ack | ErrorCode::Mack)
    }
}

wire_enum! {
    /// Registration commands understood by the proxy server.
    ServerCommand, "server_command" {
        /// Register a device connection for a port
        Register = 0x00,
        /// Drop the registration
        Unregister = 0xDD,
    }
}

wire_enum! {
    /// Registration result reported by the proxy server.
    ServerEvent, "server_event" {
        /// The device is no longer registered
        Disconnected = 0x00,
        /// The device is registered
        Connected = 0x01,
    }
}

wire_enum! {
    /// When the hub should start executing a port output command.
    StartupInfo, "startup_info" {
        /// Queue behind the running command
        BufferIfNecessary = 0x00,
        /// Replace the running command
        ExecuteImmediately = 0x10,
    }
}

wire_enum! {
    /// Whether the hub should report progress of a port output command.
    CompletionInfo, "completion_info" {
        /// No feedback
        NoAction = 0x00,
        /// Send port output command feedback
        CommandFeedback = 0x01,
    }
}

wire_enum! {
    /// What the motor does after a bounded motion.
    EndState, "end_state" {
        /// Coast to a stop
        Float = 0x00,
        /// Actively hold the position
        Hold = 0x7E,
        /// Brake
        Brake = 0x7F,
    }
}

/// Direction applied to a speed magnitude.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Direction {
    /// Positive speed
    #[default]
    Forward,
    /// Negative speed
    Reverse,
}

impl Direction {
    /// Give `speed` this direction's sign.
    pub fn apply(self, speed: i8) -> i8 {
        let magnitude = speed.saturating_abs();
        match self {
            Direction::Forward => magnitude,
            Direction::Reverse => -magnitude,
        }
    }
}

/// Acceleration and deceleration profile selection.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Profile {
    /// Use the acceleration profile
    pub acceleration: bool,
    /// Use the deceleration profile
    pub deceleration: bool,
}

impl Profile {
    const ACCELERATION: u8 = 0x01;
    const DECELERATION: u8 = 0x02;

    /// Neither profile.
    pub const NONE: Self = Profile { acceleration: false, deceleration: false };

    /// The profile byte.
    pub fn byte(self) -> u8 {
        let mut byte = 0;
        if self.acceleration {
            byte |= Self::ACCELERATION;
        }
        if self.deceleration {
            byte |= Self::DECELERATION;
        }
        byte
    }
}

impl Default for Profile {
    fn default() -> Self {
        Self { acceleration: true, deceleration: true }
    }
}

impl TryFrom<u8> for Profile {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if value & !(Self::ACCELERATION | Self::DECELERATION) != 0 {
            return Err(DecodeError::UnknownValue { field: "profile", value });
        }
        Ok(Self {
            acceleration: value & Self::ACCELERATION != 0,
            deceleration: value & Self::DECELERATION != 0,
        })
    }
}

/// Device type id announced in attached I/O notifications.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IoType(pub u16);

impl IoType {
    /// Simple medium linear motor
    pub const MOTOR: Self = IoType(0x0001);
    /// Train motor
    pub const SYSTEM_TRAIN_MOTOR: Self = IoType(0x0002);
    /// Hub LED
    pub const RGB_LIGHT: Self = IoType(0x0017);
    /// Medium linear motor with tacho
    pub const MEDIUM_LINEAR_MOTOR: Self = IoType(0x0026);
    /// Move hub internal motor
    pub const INTERNAL_MOTOR_WITH_TACHO: Self = IoType(0x0027);
    /// Technic large motor
    pub const TECHNIC_LARGE_MOTOR: Self = IoType(0x002E);
    /// Technic XL motor
    pub const TECHNIC_XLARGE_MOTOR: Self = IoType(0x002F);
}

/// Bit mask reported per port in a port output feedback frame.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeedbackStatus(pub u8);

/// One named state inside a [`FeedbackStatus`].
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FeedbackState {
    /// Buffer empty, command in progress
    InProgress,
    /// Buffer empty, command completed
    Completed,
    /// Current command discarded
    Discarded,
    /// Port idle
    Idle,
    /// Port busy, buffer full
    Busy,
}

impl FeedbackStatus {
    /// Buffer empty, command in progress
    pub const IN_PROGRESS: u8 = 0x01;
    /// Buffer empty, command completed
    pub const COMPLETED: u8 = 0x02;
    /// Current command discarded
    pub const DISCARDED: u8 = 0x04;
    /// Idle
    pub const IDLE: u8 = 0x08;
    /// Busy/full
    pub const BUSY: u8 = 0x10;

    const ALL: [(u8, FeedbackState); 5] = [
        (Self::IN_PROGRESS, FeedbackState::InProgress),
        (Self::COMPLETED, FeedbackState::Completed),
        (Self::DISCARDED, FeedbackState::Discarded),
        (Self::IDLE, FeedbackState::Idle),
        (Self::BUSY, FeedbackState::Busy),
    ];

    /// True if `state` is set in this status.
    pub fn has(self, state: FeedbackState) -> bool {
        Self::ALL
            .iter()
            .any(|(bit, named)| *named == state && self.0 & bit != 0)
    }

    /// Every named state set in this status, lowest bit first.
    pub fn states(self) -> Vec<FeedbackState> {
        Self::ALL
            .iter()
            .filter(|(bit, _)| self.0 & bit != 0)
            .map(|(_, state)| *state)
            .collect()
    }

    /// True if the port may accept the next command.
    ///
    /// Completion and idle free the port, unless the same report also says a
    /// newer command is in progress.
    pub fn releases_port(self) -> bool {
        let done = self.0 & (Self::COMPLETED | Self::IDLE) != 0;
        done && self.0 & Self::IN_PROGRESS == 0
    }
}

impl Debug for FeedbackStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FeedbackStatus(0x{:02x} {:?})", self.0, self.states())
    }
}

/// Hub alert request or update.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct HubAlert {
    /// Alert condition
    pub alert: AlertType,
    /// Requested or reported operation
    pub operation: AlertOperation,
    /// Only present in upstream updates: true if the alert is raised
    pub alert_active: Option<bool>,
}

/// What happened on a port.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum IoEvent {
    /// Something was unplugged
    Detached,
    /// A device was plugged in
    Attached {
        /// Type of the attached device
        io_type: IoType,
        /// Hardware revision
        hw_revision: u32,
        /// Software revision
        sw_revision: u32,
    },
    /// A virtual port was created for two physical ports
    VirtualAttached {
        /// Type of the combined device
        io_type: IoType,
        /// First physical port
        port_a: Port,
        /// Second physical port
        port_b: Port,
    },
}

impl IoEvent {
    pub(crate) fn byte(&self) -> u8 {
        match self {
            IoEvent::Detached => 0x00,
            IoEvent::Attached { .. } => 0x01,
            IoEvent::VirtualAttached { .. } => 0x02,
        }
    }
}

/// Attached I/O notification.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttachedIo {
    /// Port the event happened on; the new virtual port for virtual attaches
    pub port: Port,
    /// The event
    pub event: IoEvent,
}

/// Generic error notification.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct GenericError {
    /// Message type of the command that triggered the error
    pub command_type: u8,
    /// Return code
    pub code: ErrorCode,
}

/// Port input format request or response.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct PortNotification {
    /// Port to configure
    pub port: Port,
    /// Sensor mode, 0x02 is the position of tacho motors
    pub mode: u8,
    /// Minimum change before the hub reports a new value
    pub delta: u32,
    /// Whether value notifications are sent
    pub enabled: bool,
}

impl PortNotification {
    /// Mode reporting the absolute encoder position of tacho motors.
    pub const MODE_POSITION: u8 = 0x02;
}

/// Port value notification.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PortValue {
    /// Port the value belongs to
    pub port: Port,
    /// Raw little-endian value, one to four bytes
    pub raw: Vec<u8>,
}

impl PortValue {
    /// The value sign-extended to 32 bits.
    pub fn value(&self) -> i32 {
        match self.raw.as_slice() {
            [a] => i32::from(*a as i8),
            [a, b] => i32::from(i16::from_le_bytes([*a, *b])),
            [a, b, c] => {
                let fill = if c & 0x80 != 0 { 0xFF } else { 0x00 };
                i32::from_le_bytes([*a, *b, *c, fill])
            }
            [a, b, c, d] => i32::from_le_bytes([*a, *b, *c, *d]),
            _ => 0,
        }
    }
}

/// Registration exchange with the proxy server.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExtServer {
    /// Port of the device registering
    pub port: Port,
    /// Register or unregister
    pub command: ServerCommand,
    /// Present in replies only
    pub event: Option<ServerEvent>,
}

/// Virtual port setup.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum VirtualPortSetup {
    /// Drop a virtual port
    Disconnect {
        /// The virtual port
        port: Port,
    },
    /// Combine two physical ports
    Connect {
        /// First physical port
        port_a: Port,
        /// Second physical port
        port_b: Port,
    },
}

/// Port output sub-commands.
///
/// The `*Synced` variants address a virtual port and carry one speed (or
/// position) per physical motor.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputAction {
    /// Run at `speed` until told otherwise (0x07)
    StartSpeed {
        /// Signed speed in percent
        speed: i8,
        /// Power limit in percent
        max_power: u8,
        /// Ramp profile
        profile: Profile,
    },
    /// Run two motors at their own speed (0x08)
    StartSpeedSynced {
        /// Speed of the first motor
        speed_a: i8,
        /// Speed of the second motor
        speed_b: i8,
        /// Power limit in percent
        max_power: u8,
        /// Ramp profile
        profile: Profile,
    },
    /// Run for `time` milliseconds (0x09)
    StartSpeedForTime {
        /// Duration in milliseconds
        time: u16,
        /// Signed speed in percent
        speed: i8,
        /// Power limit in percent
        max_power: u8,
        /// What to do afterwards
        end_state: EndState,
        /// Ramp profile
        profile: Profile,
    },
    /// Synced variant of [`OutputAction::StartSpeedForTime`] (0x0A)
    StartSpeedForTimeSynced {
        /// Duration in milliseconds
        time: u16,
        /// Speed of the first motor
        speed_a: i8,
        /// Speed of the second motor
        speed_b: i8,
        /// Power limit in percent
        max_power: u8,
        /// What to do afterwards
        end_state: EndState,
        /// Ramp profile
        profile: Profile,
    },
    /// Turn by `degrees` (0x0B)
    StartSpeedForDegrees {
        /// Relative angle
        degrees: i32,
        /// Signed speed in percent
        speed: i8,
        /// Power limit in percent
        max_power: u8,
        /// What to do afterwards
        end_state: EndState,
        /// Ramp profile
        profile: Profile,
    },
    /// Synced variant of [`OutputAction::StartSpeedForDegrees`] (0x0C)
    StartSpeedForDegreesSynced {
        /// Relative angle
        degrees: i32,
        /// Speed of the first motor
        speed_a: i8,
        /// Speed of the second motor
        speed_b: i8,
        /// Power limit in percent
        max_power: u8,
        /// What to do afterwards
        end_state: EndState,
        /// Ramp profile
        profile: Profile,
    },
    /// Move to an absolute encoder position (0x0D)
    GotoAbsolutePosition {
        /// Target position in degrees
        abs_pos: i32,
        /// Speed in percent
        speed: i8,
        /// Power limit in percent
        max_power: u8,
        /// What to do afterwards
        end_state: EndState,
        /// Ramp profile
        profile: Profile,
    },
    /// Synced variant of [`OutputAction::GotoAbsolutePosition`] (0x0E)
    GotoAbsolutePositionSynced {
        /// Target of the first motor
        abs_pos_a: i32,
        /// Target of the second motor
        abs_pos_b: i32,
        /// Speed in percent
        speed: i8,
        /// Power limit in percent
        max_power: u8,
        /// What to do afterwards
        end_state: EndState,
        /// Ramp profile
        profile: Profile,
    },
    /// Unregulated power through direct mode data (0x51, mode 0x00)
    StartPower {
        /// Signed power in percent, 127 brakes
        power: i8,
    },
    /// Overwrite the encoder position (0x51, mode 0x02)
    PresetEncoder {
        /// New encoder position
        position: i32,
    },
}

impl OutputAction {
    pub(crate) const START_SPEED: u8 = 0x07;
    pub(crate) const START_SPEED_SYNCED: u8 = 0x08;
    pub(crate) const START_SPEED_FOR_TIME: u8 = 0x09;
    pub(crate) const START_SPEED_FOR_TIME_SYNCED: u8 = 0x0A;
    pub(crate) const START_SPEED_FOR_DEGREES: u8 = 0x0B;
    pub(crate) const START_SPEED_FOR_DEGREES_SYNCED: u8 = 0x0C;
    pub(crate) const GOTO_ABSOLUTE_POSITION: u8 = 0x0D;
    pub(crate) const GOTO_ABSOLUTE_POSITION_SYNCED: u8 = 0x0E;
    pub(crate) const WRITE_DIRECT_MODE_DATA: u8 = 0x51;
    pub(crate) const MODE_POWER: u8 = 0x00;
    pub(crate) const MODE_PRESET_ENCODER: u8 = 0x02;

    /// The sub-command byte.
    pub fn sub_command(&self) -> u8 {
        match self {
            OutputAction::StartSpeed { .. } => Self::START_SPEED,
            OutputAction::StartSpeedSynced { .. } => Self::START_SPEED_SYNCED,
            OutputAction::StartSpeedForTime { .. } => Self::START_SPEED_FOR_TIME,
            OutputAction::StartSpeedForTimeSynced { .. } => Self::START_SPEED_FOR_TIME_SYNCED,
            OutputAction::StartSpeedForDegrees { .. } => Self::START_SPEED_FOR_DEGREES,
            OutputAction::StartSpeedForDegreesSynced { .. } => Self::START_SPEED_FOR_DEGREES_SYNCED,
            OutputAction::GotoAbsolutePosition { .. } => Self::GOTO_ABSOLUTE_POSITION,
            OutputAction::GotoAbsolutePositionSynced { .. } => Self::GOTO_ABSOLUTE_POSITION_SYNCED,
            OutputAction::StartPower { .. } | OutputAction::PresetEncoder { .. } => {
                Self::WRITE_DIRECT_MODE_DATA
            }
        }
    }
}

/// Port output command.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct PortOutput {
    /// Target port, virtual for synced actions
    pub port: Port,
    /// Start condition
    pub startup: StartupInfo,
    /// Completion condition
    pub completion: CompletionInfo,
    /// Sub-command and its parameters
    pub action: OutputAction,
}

/// One `(port, status)` entry of a feedback frame.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeedbackEntry {
    /// Port the status belongs to
    pub port: Port,
    /// Status bits
    pub status: FeedbackStatus,
}

/// Port output command feedback.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PortFeedback {
    /// One entry per reported port, never empty on the wire
    pub entries: Vec<FeedbackEntry>,
}

impl PortFeedback {
    /// Feedback for a single port.
    pub fn single(port: Port, status: u8) -> Self {
        Self { entries: vec![FeedbackEntry { port, status: FeedbackStatus(status) }] }
    }

    /// The status reported for `port`, if any.
    pub fn status_for(&self, port: Port) -> Option<FeedbackStatus> {
        self.entries
            .iter()
            .find(|entry| entry.port == port)
            .map(|entry| entry.status)
    }
}

/// A decoded frame, upstream or downstream.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum Message {
    /// Hub action (0x02)
    HubAction(HubAction),
    /// Hub alert (0x03)
    HubAlert(HubAlert),
    /// Attached I/O (0x04)
    AttachedIo(AttachedIo),
    /// Generic error (0x05)
    GenericError(GenericError),
    /// Port notification request (0x41)
    PortNotificationRequest(PortNotification),
    /// Port value (0x45)
    PortValue(PortValue),
    /// Proxy server registration (0x46)
    ExtServer(ExtServer),
    /// Port notification response (0x47)
    PortNotification(PortNotification),
    /// Virtual port setup (0x61)
    VirtualPortSetup(VirtualPortSetup),
    /// Port output command (0x81)
    PortOutput(PortOutput),
    /// Port output command feedback (0x82)
    PortFeedback(PortFeedback),
}

impl Message {
    /// The message-type byte this variant is framed with.
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::HubAction(_) => MessageType::HubAction,
            Message::HubAlert(_) => MessageType::HubAlert,
            Message::AttachedIo(_) => MessageType::AttachedIo,
            Message::GenericError(_) => MessageType::GenericError,
            Message::PortNotificationRequest(_) => MessageType::PortNotificationRequest,
            Message::PortValue(_) => MessageType::PortValue,
            Message::ExtServer(_) => MessageType::ExtServer,
            Message::PortNotification(_) => MessageType::PortNotification,
            Message::VirtualPortSetup(_) => MessageType::VirtualPortSetup,
            Message::PortOutput(_) => MessageType::PortOutput,
            Message::PortFeedback(_) => MessageType::PortFeedback,
        }
    }

    /// The primary port byte of the frame, if the frame has one.
    pub fn port(&self) -> Option<Port> {
        match self {
            Message::HubAction(_) | Message::HubAlert(_) | Message::GenericError(_) => None,
            Message::AttachedIo(io) => Some(io.port),
            Message::PortNotificationRequest(n) | Message::PortNotification(n) => Some(n.port),
            Message::PortValue(v) => Some(v.port),
            Message::ExtServer(s) => Some(s.port),
            Message::VirtualPortSetup(VirtualPortSetup::Disconnect { port }) => Some(*port),
            Message::VirtualPortSetup(VirtualPortSetup::Connect { .. }) => None,
            Message::PortOutput(o) => Some(o.port),
            Message::PortFeedback(f) => f.entries.first().map(|entry| entry.port),
        }
    }

    /// Every port byte the frame is addressed to.
    pub fn ports(&self) -> Vec<Port> {
        match self {
            Message::PortFeedback(f) => f.entries.iter().map(|entry| entry.port).collect(),
            other => other.port().into_iter().collect(),
        }
    }

    /// The two physical ports found at the tail of the frame.
    ///
    /// Synchronized motors are reported by their physical pair rather than
    /// their virtual port in these frames.
    pub fn port_pair(&self) -> Option<PortPair> {
        match self {
            Message::AttachedIo(AttachedIo {
                event: IoEvent::VirtualAttached { port_a, port_b, .. },
                ..
            }) => Some(PortPair::new(*port_a, *port_b)),
            Message::VirtualPortSetup(VirtualPortSetup::Connect { port_a, port_b }) => {
                Some(PortPair::new(*port_a, *port_b))
            }
            Message::PortFeedback(f) if f.entries.len() >= 2 => {
                let tail = &f.entries[f.entries.len() - 2..];
                Some(PortPair::new(tail[0].port, tail[1].port))
            }
            _ => None,
        }
    }

    /// True if the hub will answer this command with port output feedback.
    pub fn requires_feedback(&self) -> bool {
        matches!(
            self,
            Message::PortOutput(PortOutput { completion: CompletionInfo::CommandFeedback, .. })
        )
    }

    /// True for frames only a client sends.
    pub fn is_downstream_only(&self) -> bool {
        matches!(
            self,
            Message::PortNotificationRequest(_)
                | Message::VirtualPortSetup(_)
                | Message::PortOutput(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feedback_release_rules() {
        assert!(FeedbackStatus(0x0a).releases_port());
        assert!(FeedbackStatus(FeedbackStatus::COMPLETED).releases_port());
        assert!(FeedbackStatus(FeedbackStatus::IDLE).releases_port());
        assert!(!FeedbackStatus(FeedbackStatus::IN_PROGRESS).releases_port());
        assert!(!FeedbackStatus(0x03).releases_port());
        assert!(!FeedbackStatus(FeedbackStatus::BUSY).releases_port());
        assert!(!FeedbackStatus(FeedbackStatus::DISCARDED).releases_port());
    }

    #[test]
    fn feedback_states_are_named() {
        let status = FeedbackStatus(0x0c);
        assert_eq!(status.states(), vec![FeedbackState::Discarded, FeedbackState::Idle]);
        assert!(status.has(FeedbackState::Discarded));
        assert!(!status.has(FeedbackState::Completed));
    }

    #[test]
    fn port_value_sign_extension() {
        let value = |raw: Vec<u8>| PortValue { port: Port::A, raw }.value();
        assert_eq!(value(vec![0xff]), -1);
        assert_eq!(value(vec![0x10, 0x00]), 16);
        assert_eq!(value(vec![0xd0, 0x02, 0x00, 0x00]), 720);
        assert_eq!(value(vec![0x30, 0xfd, 0xff, 0xff]), -720);
    }

    #[test]
    fn direction_sets_sign() {
        assert_eq!(Direction::Forward.apply(-60), 60);
        assert_eq!(Direction::Reverse.apply(60), -60);
        assert_eq!(Direction::Reverse.apply(i8::MIN), -127);
    }

    #[test]
    fn trailing_port_pair_of_feedback() {
        let feedback = Message::PortFeedback(PortFeedback {
            entries: vec![
                FeedbackEntry { port: Port::A, status: FeedbackStatus(0x0a) },
                FeedbackEntry { port: Port::B, status: FeedbackStatus(0x0a) },
            ],
        });
        assert_eq!(feedback.port_pair(), Some(PortPair::new(Port::B, Port::A)));
        assert_eq!(feedback.ports(), vec![Port::A, Port::B]);
        assert_eq!(Message::PortFeedback(PortFeedback::single(Port::C, 0x0a)).port_pair(), None);
    }

    #[test]
    fn unmapped_bytes_are_rejected() {
        assert_eq!(
            HubAction::try_from(0x07),
            Err(DecodeError::UnknownValue { field: "hub_action", value: 0x07 })
        );
        assert!(Profile::try_from(0x04).is_err());
        assert_eq!(EndState::try_from(0x7e), Ok(EndState::Hold));
    }
}
