use codee::{Decoder, Encoder};

use crate::error::{DecodeError, EncodeError, FramingError, WireError};
use crate::{
    AlertOperation, AlertType, AttachedIo, CompletionInfo, EndState, ErrorCode, ExtServer,
    FeedbackEntry, FeedbackStatus, GenericError, HUB_ID, HEADER_LEN, HubAction, HubAlert, IoEvent,
    IoType, MAX_FRAME_LEN, Message, MessageType, OutputAction, Port, PortFeedback,
    PortNotification, PortOutput, PortValue, Profile, ServerCommand, ServerEvent, StartupInfo,
    VirtualPortSetup,
};

/// Codec for LEGO Wireless Protocol frames.
///
/// Encoding produces a complete frame, length byte included. Decoding expects
/// exactly one complete frame and rejects buffers whose first byte disagrees
/// with their length.
///
/// ## Usage
///
/// ```rust
/// use codee::{Decoder, Encoder};
/// use pupwire_common::codec::LwpCodec;
/// use pupwire_common::{ExtServer, Message, Port, ServerCommand};
///
/// let register = Message::ExtServer(ExtServer {
///     port: Port::C,
///     command: ServerCommand::Register,
///     event: None,
/// });
/// let frame = LwpCodec::encode(&register).unwrap();
/// assert_eq!(frame, [0x05, 0x00, 0x46, 0x02, 0x00]);
/// let decoded = <LwpCodec as Decoder<Message>>::decode(&frame).unwrap();
/// assert_eq!(decoded, register);
/// ```
pub struct LwpCodec;

const SPEED_RANGE: (i64, i64) = (-100, 100);
const MAX_POWER_RANGE: (i64, i64) = (0, 100);
const POWER_BRAKE: i8 = 127;
const VIRTUAL_CONNECT: u8 = 0x01;
const VIRTUAL_DISCONNECT: u8 = 0x00;
const ALERT_OK: u8 = 0x00;
const ALERT_RAISED: u8 = 0xFF;

impl Encoder<Message> for LwpCodec {
    type Error = WireError;
    type Encoded = Vec<u8>;

    fn encode(val: &Message) -> Result<Self::Encoded, Self::Error> {
        let mut body = FrameWriter::default();
        match val {
            Message::HubAction(action) => body.u8(action.byte()),
            Message::HubAlert(alert) => {
                body.u8(alert.alert.byte());
                body.u8(alert.operation.byte());
                if let Some(active) = alert.alert_active {
                    body.u8(if active { ALERT_RAISED } else { ALERT_OK });
                }
            }
            Message::AttachedIo(io) => {
                body.port(io.port);
                body.u8(io.event.byte());
                match io.event {
                    IoEvent::Detached => {}
                    IoEvent::Attached { io_type, hw_revision, sw_revision } => {
                        body.u16(io_type.0);
                        body.u32(hw_revision);
                        body.u32(sw_revision);
                    }
                    IoEvent::VirtualAttached { io_type, port_a, port_b } => {
                        body.u16(io_type.0);
                        body.port(port_a);
                        body.port(port_b);
                    }
                }
            }
            Message::GenericError(error) => {
                body.u8(error.command_type);
                body.u8(error.code.byte());
            }
            Message::PortNotificationRequest(notification)
            | Message::PortNotification(notification) => {
                body.port(notification.port);
                body.u8(notification.mode);
                body.u32(notification.delta);
                body.u8(u8::from(notification.enabled));
            }
            Message::PortValue(value) => {
                check_range("port_value_len", value.raw.len() as i64, (1, 4))?;
                body.port(value.port);
                body.bytes(&value.raw);
            }
            Message::ExtServer(server) => {
                body.port(server.port);
                body.u8(server.command.byte());
                if let Some(event) = server.event {
                    body.u8(event.byte());
                }
            }
            Message::VirtualPortSetup(VirtualPortSetup::Connect { port_a, port_b }) => {
                body.u8(VIRTUAL_CONNECT);
                body.port(*port_a);
                body.port(*port_b);
            }
            Message::VirtualPortSetup(VirtualPortSetup::Disconnect { port }) => {
                body.u8(VIRTUAL_DISCONNECT);
                body.port(*port);
            }
            Message::PortOutput(output) => encode_output(output, &mut body)?,
            Message::PortFeedback(feedback) => {
                let max_entries = ((MAX_FRAME_LEN - HEADER_LEN) / 2) as i64;
                check_range("feedback_entries", feedback.entries.len() as i64, (1, max_entries))?;
                for entry in &feedback.entries {
                    body.port(entry.port);
                    body.u8(entry.status.0);
                }
            }
        }
        body.finish(val.message_type())
    }
}

fn encode_output(output: &PortOutput, body: &mut FrameWriter) -> Result<(), EncodeError> {
    body.port(output.port);
    body.u8(output.startup.byte() | output.completion.byte());
    body.u8(output.action.sub_command());
    match output.action {
        OutputAction::StartSpeed { speed, max_power, profile } => {
            check_speed("speed", speed)?;
            check_max_power(max_power)?;
            body.i8(speed);
            body.u8(max_power);
            body.u8(profile.byte());
        }
        OutputAction::StartSpeedSynced { speed_a, speed_b, max_power, profile } => {
            check_speed("speed_a", speed_a)?;
            check_speed("speed_b", speed_b)?;
            check_max_power(max_power)?;
            body.i8(speed_a);
            body.i8(speed_b);
            body.u8(max_power);
            body.u8(profile.byte());
        }
        OutputAction::StartSpeedForTime { time, speed, max_power, end_state, profile } => {
            check_speed("speed", speed)?;
            check_max_power(max_power)?;
            body.u16(time);
            body.i8(speed);
            body.u8(max_power);
            body.u8(end_state.byte());
            body.u8(profile.byte());
        }
        OutputAction::StartSpeedForTimeSynced {
            time,
            speed_a,
            speed_b,
            max_power,
            end_state,
            profile,
        } => {
            check_speed("speed_a", speed_a)?;
            check_speed("speed_b", speed_b)?;
            check_max_power(max_power)?;
            body.u16(time);
            body.i8(speed_a);
            body.i8(speed_b);
            body.u8(max_power);
            body.u8(end_state.byte());
            body.u8(profile.byte());
        }
        OutputAction::StartSpeedForDegrees { degrees, speed, max_power, end_state, profile } => {
            check_speed("speed", speed)?;
            check_max_power(max_power)?;
            body.i32(degrees);
            body.i8(speed);
            body.u8(max_power);
            body.u8(end_state.byte());
            body.u8(profile.byte());
        }
        OutputAction::StartSpeedForDegreesSynced {
            degrees,
            speed_a,
            speed_b,
            max_power,
            end_state,
            profile,
        } => {
            check_speed("speed_a", speed_a)?;
            check_speed("speed_b", speed_b)?;
            check_max_power(max_power)?;
            body.i32(degrees);
            body.i8(speed_a);
            body.i8(speed_b);
            body.u8(max_power);
            body.u8(end_state.byte());
            body.u8(profile.byte());
        }
        OutputAction::GotoAbsolutePosition { abs_pos, speed, max_power, end_state, profile } => {
            check_speed("speed", speed)?;
            check_max_power(max_power)?;
            body.i32(abs_pos);
            body.i8(speed);
            body.u8(max_power);
            body.u8(end_state.byte());
            body.u8(profile.byte());
        }
        OutputAction::GotoAbsolutePositionSynced {
            abs_pos_a,
            abs_pos_b,
            speed,
            max_power,
            end_state,
            profile,
        } => {
            check_speed("speed", speed)?;
            check_max_power(max_power)?;
            body.i32(abs_pos_a);
            body.i32(abs_pos_b);
            body.i8(speed);
            body.u8(max_power);
            body.u8(end_state.byte());
            body.u8(profile.byte());
        }
        OutputAction::StartPower { power } => {
            if power != POWER_BRAKE {
                check_speed("power", power)?;
            }
            body.u8(OutputAction::MODE_POWER);
            body.i8(power);
        }
        OutputAction::PresetEncoder { position } => {
            body.u8(OutputAction::MODE_PRESET_ENCODER);
            body.i32(position);
        }
    }
    Ok(())
}

fn check_range(field: &'static str, value: i64, (min, max): (i64, i64)) -> Result<(), EncodeError> {
    if value < min || value > max {
        return Err(EncodeError::OutOfRange { field, value, min, max });
    }
    Ok(())
}

fn check_speed(field: &'static str, speed: i8) -> Result<(), EncodeError> {
    check_range(field, i64::from(speed), SPEED_RANGE)
}

fn check_max_power(max_power: u8) -> Result<(), EncodeError> {
    check_range("max_power", i64::from(max_power), MAX_POWER_RANGE)
}

impl Decoder<Message> for LwpCodec {
    type Error = WireError;
    type Encoded = [u8];

    fn decode(val: &Self::Encoded) -> Result<Message, Self::Error> {
        if val.len() < HEADER_LEN {
            return Err(FramingError::Truncated(val.len()).into());
        }
        let declared = usize::from(val[0]);
        if declared != val.len() {
            return Err(FramingError::LengthMismatch { declared, actual: val.len() }.into());
        }

        let type_byte = val[2];
        let message_type = MessageType::try_from(type_byte)
            .map_err(|_| DecodeError::UnknownMessageType(type_byte))?;
        let mut fields = FrameReader {
            bytes: &val[HEADER_LEN..],
            malformed: DecodeError::Malformed { message_type: type_byte, len: val.len() },
        };

        let message = match message_type {
            MessageType::HubAction => Message::HubAction(HubAction::try_from(fields.u8()?)?),
            MessageType::HubAlert => {
                let alert = AlertType::try_from(fields.u8()?)?;
                let operation = AlertOperation::try_from(fields.u8()?)?;
                let alert_active = match fields.remaining() {
                    0 => None,
                    _ => Some(match fields.u8()? {
                        ALERT_OK => false,
                        ALERT_RAISED => true,
                        value => return Err(DecodeError::UnknownValue { field: "alert_status", value }.into()),
                    }),
                };
                Message::HubAlert(HubAlert { alert, operation, alert_active })
            }
            MessageType::AttachedIo => {
                let port = fields.port()?;
                let event = match fields.u8()? {
                    0x00 => IoEvent::Detached,
                    0x01 => IoEvent::Attached {
                        io_type: IoType(fields.u16()?),
                        hw_revision: fields.u32()?,
                        sw_revision: fields.u32()?,
                    },
                    0x02 => IoEvent::VirtualAttached {
                        io_type: IoType(fields.u16()?),
                        port_a: fields.port()?,
                        port_b: fields.port()?,
                    },
                    value => return Err(DecodeError::UnknownValue { field: "io_event", value }.into()),
                };
                Message::AttachedIo(AttachedIo { port, event })
            }
            MessageType::GenericError => Message::GenericError(GenericError {
                command_type: fields.u8()?,
                code: ErrorCode::try_from(fields.u8()?)?,
            }),
            MessageType::PortNotificationRequest => {
                Message::PortNotificationRequest(decode_notification(&mut fields)?)
            }
            MessageType::PortNotification => {
                Message::PortNotification(decode_notification(&mut fields)?)
            }
            MessageType::PortValue => {
                let port = fields.port()?;
                let raw = fields.rest();
                if raw.is_empty() || raw.len() > 4 {
                    return Err(fields.malformed.into());
                }
                Message::PortValue(PortValue { port, raw: raw.to_vec() })
            }
            MessageType::ExtServer => {
                let port = fields.port()?;
                let command = ServerCommand::try_from(fields.u8()?)?;
                let event = match fields.remaining() {
                    0 => None,
                    _ => Some(ServerEvent::try_from(fields.u8()?)?),
                };
                Message::ExtServer(ExtServer { port, command, event })
            }
            MessageType::VirtualPortSetup => match fields.u8()? {
                VIRTUAL_CONNECT => Message::VirtualPortSetup(VirtualPortSetup::Connect {
                    port_a: fields.port()?,
                    port_b: fields.port()?,
                }),
                VIRTUAL_DISCONNECT => {
                    Message::VirtualPortSetup(VirtualPortSetup::Disconnect { port: fields.port()? })
                }
                sub_command => {
                    return Err(DecodeError::UnknownSubCommand { message_type: type_byte, sub_command }.into());
                }
            },
            MessageType::PortOutput => Message::PortOutput(decode_output(&mut fields, type_byte)?),
            MessageType::PortFeedback => {
                let rest = fields.rest();
                if rest.is_empty() || rest.len() % 2 != 0 {
                    return Err(fields.malformed.into());
                }
                let entries = rest
                    .chunks_exact(2)
                    .map(|pair| FeedbackEntry { port: Port(pair[0]), status: FeedbackStatus(pair[1]) })
                    .collect();
                Message::PortFeedback(PortFeedback { entries })
            }
        };
        fields.finish()?;
        Ok(message)
    }
}

fn decode_notification(fields: &mut FrameReader<'_>) -> Result<PortNotification, DecodeError> {
    Ok(PortNotification {
        port: fields.port()?,
        mode: fields.u8()?,
        delta: fields.u32()?,
        enabled: match fields.u8()? {
            0 => false,
            1 => true,
            value => return Err(DecodeError::UnknownValue { field: "notification_enabled", value }),
        },
    })
}

fn decode_output(fields: &mut FrameReader<'_>, type_byte: u8) -> Result<PortOutput, DecodeError> {
    let port = fields.port()?;
    let conditions = fields.u8()?;
    let startup = StartupInfo::try_from(conditions & 0xF0)?;
    let completion = CompletionInfo::try_from(conditions & 0x0F)?;
    let sub_command = fields.u8()?;
    let action = match sub_command {
        OutputAction::START_SPEED => OutputAction::StartSpeed {
            speed: fields.i8()?,
            max_power: fields.u8()?,
            profile: Profile::try_from(fields.u8()?)?,
        },
        OutputAction::START_SPEED_SYNCED => OutputAction::StartSpeedSynced {
            speed_a: fields.i8()?,
            speed_b: fields.i8()?,
            max_power: fields.u8()?,
            profile: Profile::try_from(fields.u8()?)?,
        },
        OutputAction::START_SPEED_FOR_TIME => OutputAction::StartSpeedForTime {
            time: fields.u16()?,
            speed: fields.i8()?,
            max_power: fields.u8()?,
            end_state: EndState::try_from(fields.u8()?)?,
            profile: Profile::try_from(fields.u8()?)?,
        },
        OutputAction::START_SPEED_FOR_TIME_SYNCED => OutputAction::StartSpeedForTimeSynced {
            time: fields.u16()?,
            speed_a: fields.i8()?,
            speed_b: fields.i8()?,
            max_power: fields.u8()?,
            end_state: EndState::try_from(fields.u8()?)?,
            profile: Profile::try_from(fields.u8()?)?,
        },
        OutputAction::START_SPEED_FOR_DEGREES => OutputAction::StartSpeedForDegrees {
            degrees: fields.i32()?,
            speed: fields.i8()?,
            max_power: fields.u8()?,
            end_state: EndState::try_from(fields.u8()?)?,
            profile: Profile::try_from(fields.u8()?)?,
        },
        OutputAction::START_SPEED_FOR_DEGREES_SYNCED => OutputAction::StartSpeedForDegreesSynced {
            degrees: fields.i32()?,
            speed_a: fields.i8()?,
            speed_b: fields.i8()?,
            max_power: fields.u8()?,
            end_state: EndState::try_from(fields.u8()?)?,
            profile: Profile::try_from(fields.u8()?)?,
        },
        OutputAction::GOTO_ABSOLUTE_POSITION => OutputAction::GotoAbsolutePosition {
            abs_pos: fields.i32()?,
            speed: fields.i8()?,
            max_power: fields.u8()?,
            end_state: EndState::try_from(fields.u8()?)?,
            profile: Profile::try_from(fields.u8()?)?,
        },
        OutputAction::GOTO_ABSOLUTE_POSITION_SYNCED => OutputAction::GotoAbsolutePositionSynced {
            abs_pos_a: fields.i32()?,
            abs_pos_b: fields.i32()?,
            speed: fields.i8()?,
            max_power: fields.u8()?,
            end_state: EndState::try_from(fields.u8()?)?,
            profile: Profile::try_from(fields.u8()?)?,
        },
        OutputAction::WRITE_DIRECT_MODE_DATA => match fields.u8()? {
            OutputAction::MODE_POWER => OutputAction::StartPower { power: fields.i8()? },
            OutputAction::MODE_PRESET_ENCODER => {
                OutputAction::PresetEncoder { position: fields.i32()? }
            }
            value => return Err(DecodeError::UnknownValue { field: "direct_mode", value }),
        },
        sub_command => {
            return Err(DecodeError::UnknownSubCommand { message_type: type_byte, sub_command });
        }
    };
    Ok(PortOutput { port, startup, completion, action })
}

/// Sequential little-endian field reader over a frame body.
struct FrameReader<'a> {
    bytes: &'a [u8],
    malformed: DecodeError,
}

impl<'a> FrameReader<'a> {
    fn take<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let (head, tail) = self.bytes.split_first_chunk::<N>().ok_or(self.malformed)?;
        self.bytes = tail;
        Ok(*head)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take::<1>()?[0])
    }

    fn i8(&mut self) -> Result<i8, DecodeError> {
        Ok(i8::from_le_bytes(self.take()?))
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.take()?))
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.take()?))
    }

    fn i32(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_le_bytes(self.take()?))
    }

    fn port(&mut self) -> Result<Port, DecodeError> {
        self.u8().map(Port)
    }

    fn remaining(&self) -> usize {
        self.bytes.len()
    }

    fn rest(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.bytes)
    }

    /// Trailing bytes mean the frame is longer than its type allows.
    fn finish(self) -> Result<(), DecodeError> {
        if self.bytes.is_empty() { Ok(()) } else { Err(self.malformed) }
    }
}

#[derive(Default)]
struct FrameWriter {
    body: Vec<u8>,
}

impl FrameWriter {
    fn u8(&mut self, value: u8) {
        self.body.push(value);
    }

    fn i8(&mut self, value: i8) {
        self.body.extend_from_slice(&value.to_le_bytes());
    }

    fn u16(&mut self, value: u16) {
        self.body.extend_from_slice(&value.to_le_bytes());
    }

    fn u32(&mut self, value: u32) {
        self.body.extend_from_slice(&value.to_le_bytes());
    }

    fn i32(&mut self, value: i32) {
        self.body.extend_from_slice(&value.to_le_bytes());
    }

    fn port(&mut self, port: Port) {
        self.body.push(port.byte());
    }

    fn bytes(&mut self, bytes: &[u8]) {
        self.body.extend_from_slice(bytes);
    }

    fn finish(self, message_type: MessageType) -> Result<Vec<u8>, WireError> {
        let len = HEADER_LEN + self.body.len();
        let len_byte = u8::try_from(len).map_err(|_| EncodeError::Oversized(len))?;
        let mut frame = Vec::with_capacity(len);
        frame.push(len_byte);
        frame.push(HUB_ID);
        frame.push(message_type.byte());
        frame.extend_from_slice(&self.body);
        Ok(frame)
    }
}
