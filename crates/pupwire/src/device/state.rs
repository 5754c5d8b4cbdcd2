use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use pupwire_common::error::ProtocolError;
use pupwire_common::{
    AttachedIo, ExtServer, FeedbackStatus, GenericError, HubAction, HubAlert, Message, Port,
    PortNotification,
};

/// A value together with the moment it was observed.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Timestamped<T> {
    /// The observed value
    pub value: T,
    /// When it was observed
    pub at: SystemTime,
}

impl<T> Timestamped<T> {
    /// Stamp `value` with the current time.
    pub fn now(value: T) -> Self {
        Self { value, at: SystemTime::now() }
    }
}

/// Everything a device learned from the hub so far.
///
/// Only the session feeding the device writes to it. Readers get clones, so
/// a snapshot never changes under their feet.
#[derive(Clone, Debug, Default)]
pub struct DeviceState {
    /// Most recent port value, sign extended
    pub port_value: Option<Timestamped<i32>>,
    /// The port value before that
    pub previous_port_value: Option<Timestamped<i32>>,
    /// Most recent command feedback for this device's port
    pub feedback: Option<Timestamped<FeedbackStatus>>,
    /// Every feedback received, oldest first
    pub feedback_log: Vec<Timestamped<FeedbackStatus>>,
    /// Most recent problem reported by the hub
    pub last_error: Option<Timestamped<ProtocolError>>,
    /// Every problem reported by the hub, oldest first
    pub error_log: Vec<Timestamped<ProtocolError>>,
    /// Most recent generic error notification, acknowledgements included
    pub generic_error: Option<Timestamped<GenericError>>,
    /// Most recent hub alert
    pub alert: Option<Timestamped<HubAlert>>,
    /// Every hub alert, oldest first
    pub alert_log: Vec<Timestamped<HubAlert>>,
    /// Most recent hub action announcement
    pub hub_action: Option<Timestamped<HubAction>>,
    /// Most recent attached I/O notification
    pub attached_io: Option<Timestamped<AttachedIo>>,
    /// True while the hub reports something plugged into the port
    pub attached: bool,
    /// Virtual port assigned to a synchronized motor by the hub
    pub virtual_port: Option<Port>,
    /// Most recent port notification response
    pub port_notification: Option<Timestamped<PortNotification>>,
    /// Most recent registration reply of the proxy server
    pub ext_server: Option<Timestamped<ExtServer>>,
    /// Every registration reply, oldest first
    pub ext_server_log: Vec<Timestamped<ExtServer>>,
    /// Latest status of each physical port of a synchronized motor since the
    /// last command
    pub(crate) pair_feedback: (Option<FeedbackStatus>, Option<FeedbackStatus>),
}

impl DeviceState {
    pub(crate) fn record_value(&mut self, value: i32) {
        self.previous_port_value = self.port_value.take();
        self.port_value = Some(Timestamped::now(value));
    }

    pub(crate) fn record_feedback(&mut self, status: FeedbackStatus) {
        let stamped = Timestamped::now(status);
        self.feedback_log.push(stamped.clone());
        self.feedback = Some(stamped);
    }

    pub(crate) fn record_error(&mut self, error: ProtocolError) {
        let stamped = Timestamped::now(error);
        self.error_log.push(stamped.clone());
        self.last_error = Some(stamped);
    }

    pub(crate) fn record_alert(&mut self, alert: HubAlert) {
        let stamped = Timestamped::now(alert);
        self.alert_log.push(stamped.clone());
        self.alert = Some(stamped);
    }

    pub(crate) fn record_ext_server(&mut self, server: ExtServer) {
        let stamped = Timestamped::now(server);
        self.ext_server_log.push(stamped.clone());
        self.ext_server = Some(stamped);
    }
}

/// A command that never made it to the hub.
#[derive(Clone, Debug, PartialEq)]
pub struct FailedCommand {
    /// The command
    pub message: Message,
    /// Why it failed
    pub reason: String,
}

/// Outcome of the most recent sends.
#[derive(Clone, Debug, Default)]
pub struct CommandRecord {
    /// Last command written to the session
    pub last_sent: Option<Timestamped<Message>>,
    /// Last command that failed to encode or write
    pub last_failed: Option<Timestamped<FailedCommand>>,
}

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
