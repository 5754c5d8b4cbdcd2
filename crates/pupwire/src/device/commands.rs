use serde::{Deserialize, Serialize};
use tracing::warn;

use pupwire_common::{
    AlertOperation, AlertType, CompletionInfo, Direction, EndState, ExtServer, HubAction, HubAlert,
    Message, OutputAction, Port, PortNotification, PortOutput, Profile, ServerCommand, StartupInfo,
    VirtualPortSetup,
};

use super::{Device, DeviceKind};

/// How a motion command is executed and how it ends.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct MotionOptions {
    /// Replace the running command or queue behind it
    pub startup: StartupInfo,
    /// Ask the hub for feedback. Without it the port is free again right
    /// after the write
    pub completion: CompletionInfo,
    /// Power limit in percent, `0..=100`
    pub max_power: u8,
    /// What the motor does once done
    pub end_state: EndState,
    /// Ramp profile
    pub profile: Profile,
}

impl Default for MotionOptions {
    fn default() -> Self {
        Self {
            startup: StartupInfo::ExecuteImmediately,
            completion: CompletionInfo::CommandFeedback,
            max_power: 100,
            end_state: EndState::Brake,
            profile: Profile::default(),
        }
    }
}

impl Device {
    /// Register this device's port with the proxy server.
    pub async fn connect_ext_server(&self) -> bool {
        self.send_command(self.ext_server(ServerCommand::Register)).await
    }

    /// Drop the registration with the proxy server.
    pub async fn disconnect_ext_server(&self) -> bool {
        self.send_command(self.ext_server(ServerCommand::Unregister)).await
    }

    pub(crate) fn ext_server(&self, command: ServerCommand) -> Message {
        Message::ExtServer(ExtServer { port: self.port, command, event: None })
    }

    /// Ask the hub to report values of `mode` whenever they change by `delta`.
    pub async fn request_port_notification(&self, mode: u8, delta: u32) -> bool {
        let port = self.virtual_port().unwrap_or(self.port);
        self.send_command(Message::PortNotificationRequest(PortNotification {
            port,
            mode,
            delta,
            enabled: true,
        }))
        .await
    }

    /// Make the hub perform `action`. Hub devices only.
    pub async fn hub_action(&self, action: HubAction) -> bool {
        if !self.expect_kind("hub_action", matches!(self.kind, DeviceKind::Hub)) {
            return false;
        }
        self.send_command(Message::HubAction(action)).await
    }

    /// Subscribe to updates of `alert`. Hub devices only.
    pub async fn enable_alert(&self, alert: AlertType) -> bool {
        if !self.expect_kind("enable_alert", matches!(self.kind, DeviceKind::Hub)) {
            return false;
        }
        self.send_command(Message::HubAlert(HubAlert {
            alert,
            operation: AlertOperation::EnableUpdates,
            alert_active: None,
        }))
        .await
    }

    /// Ask the hub to combine the two ports of a synchronized motor.
    ///
    /// The hub answers with a virtual attached notification carrying the new
    /// port, which the device picks up on its own.
    pub async fn setup_virtual_port(&self) -> bool {
        let Some(pair) = self.port_pair() else {
            return self.expect_kind("setup_virtual_port", false);
        };
        self.send_command(Message::VirtualPortSetup(VirtualPortSetup::Connect {
            port_a: pair.first,
            port_b: pair.second,
        }))
        .await
    }

    /// Run until told otherwise.
    pub async fn start_speed(&self, speed: i8, direction: Direction, options: MotionOptions) -> bool {
        let speed = direction.apply(speed);
        let action = match self.kind {
            DeviceKind::SynchronizedMotor { .. } => OutputAction::StartSpeedSynced {
                speed_a: speed,
                speed_b: speed,
                max_power: options.max_power,
                profile: options.profile,
            },
            _ => OutputAction::StartSpeed {
                speed,
                max_power: options.max_power,
                profile: options.profile,
            },
        };
        self.send_output("start_speed", action, &options).await
    }

    /// Run both motors of a synchronized pair at their own speed.
    pub async fn start_speed_synced(&self, speed_a: i8, speed_b: i8, options: MotionOptions) -> bool {
        if !self.expect_kind(
            "start_speed_synced",
            matches!(self.kind, DeviceKind::SynchronizedMotor { .. }),
        ) {
            return false;
        }
        let action = OutputAction::StartSpeedSynced {
            speed_a,
            speed_b,
            max_power: options.max_power,
            profile: options.profile,
        };
        self.send_output("start_speed_synced", action, &options).await
    }

    /// Run for `time` milliseconds.
    pub async fn start_speed_for_time(
        &self,
        time: u16,
        speed: i8,
        direction: Direction,
        options: MotionOptions,
    ) -> bool {
        let speed = direction.apply(speed);
        let action = match self.kind {
            DeviceKind::SynchronizedMotor { .. } => OutputAction::StartSpeedForTimeSynced {
                time,
                speed_a: speed,
                speed_b: speed,
                max_power: options.max_power,
                end_state: options.end_state,
                profile: options.profile,
            },
            _ => OutputAction::StartSpeedForTime {
                time,
                speed,
                max_power: options.max_power,
                end_state: options.end_state,
                profile: options.profile,
            },
        };
        self.send_output("start_speed_for_time", action, &options).await
    }

    /// Turn by `degrees` of the motor shaft.
    pub async fn start_move_for_degrees(
        &self,
        degrees: i32,
        speed: i8,
        direction: Direction,
        options: MotionOptions,
    ) -> bool {
        let speed = direction.apply(speed);
        let action = match self.kind {
            DeviceKind::SynchronizedMotor { .. } => OutputAction::StartSpeedForDegreesSynced {
                degrees,
                speed_a: speed,
                speed_b: speed,
                max_power: options.max_power,
                end_state: options.end_state,
                profile: options.profile,
            },
            _ => OutputAction::StartSpeedForDegrees {
                degrees,
                speed,
                max_power: options.max_power,
                end_state: options.end_state,
                profile: options.profile,
            },
        };
        self.send_output("start_move_for_degrees", action, &options).await
    }

    /// Move to the absolute encoder position `abs_pos`.
    pub async fn goto_absolute_position(&self, abs_pos: i32, speed: i8, options: MotionOptions) -> bool {
        let action = match self.kind {
            DeviceKind::SynchronizedMotor { .. } => OutputAction::GotoAbsolutePositionSynced {
                abs_pos_a: abs_pos,
                abs_pos_b: abs_pos,
                speed,
                max_power: options.max_power,
                end_state: options.end_state,
                profile: options.profile,
            },
            _ => OutputAction::GotoAbsolutePosition {
                abs_pos,
                speed,
                max_power: options.max_power,
                end_state: options.end_state,
                profile: options.profile,
            },
        };
        self.send_output("goto_absolute_position", action, &options).await
    }

    /// Apply unregulated power. `127` brakes and ignores `direction`.
    pub async fn start_power(&self, power: i8, direction: Direction, options: MotionOptions) -> bool {
        let power = if power == i8::MAX { power } else { direction.apply(power) };
        self.send_output("start_power", OutputAction::StartPower { power }, &options).await
    }

    /// Overwrite the encoder position, usually to zero it.
    pub async fn preset_position(&self, position: i32, options: MotionOptions) -> bool {
        self.send_output("preset_position", OutputAction::PresetEncoder { position }, &options).await
    }

    /// Port motion commands are addressed to.
    ///
    /// Synchronized motors are driven through their virtual port, which is
    /// unknown until the hub reported it.
    fn output_port(&self) -> Option<Port> {
        match self.kind {
            DeviceKind::Hub => None,
            DeviceKind::SingleMotor => Some(self.port),
            DeviceKind::SynchronizedMotor { .. } => self.virtual_port(),
        }
    }

    async fn send_output(&self, command: &str, action: OutputAction, options: &MotionOptions) -> bool {
        let Some(port) = self.output_port() else {
            warn!("[{}] Cannot {}: no port to drive", self.name, command);
            return false;
        };
        self.send_command(Message::PortOutput(PortOutput {
            port,
            startup: options.startup,
            completion: options.completion,
            action,
        }))
        .await
    }

    fn expect_kind(&self, command: &str, supported: bool) -> bool {
        if !supported {
            warn!("[{}] {} is not supported by a {:?}", self.name, command, self.kind);
        }
        supported
    }
}
