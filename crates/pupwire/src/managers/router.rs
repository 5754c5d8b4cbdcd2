use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, trace, warn};

use pupwire_common::Message;

use crate::Device;

/// Delivers the frames of one shared hub connection to the devices on it.
///
/// Devices are keyed by name. Registering a device under a name that is
/// already taken replaces the old one.
#[derive(Default)]
pub struct Router {
    devices: DashMap<String, Arc<Device>>,
}

impl Router {
    /// An empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `device`, returning the device it replaced.
    pub fn register(&self, device: Arc<Device>) -> Option<Arc<Device>> {
        debug!("Registered device {} on {}", device.name(), device.port());
        self.devices.insert(device.name().to_string(), device)
    }

    /// Remove the device called `name`.
    pub fn deregister(&self, name: &str) -> Option<Arc<Device>> {
        let removed = self.devices.remove(name).map(|(_, device)| device);
        if removed.is_some() {
            debug!("Deregistered device {}", name);
        }
        removed
    }

    /// The device called `name`.
    pub fn get(&self, name: &str) -> Option<Arc<Device>> {
        self.devices.get(name).map(|device| device.value().clone())
    }

    /// Every registered device, in no particular order.
    pub fn devices(&self) -> Vec<Arc<Device>> {
        self.devices.iter().map(|device| device.value().clone()).collect()
    }

    /// Number of registered devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// True if no device is registered.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Hand `message` to every device that [accepts](Device::accepts) it.
    ///
    /// Each matching device gets the message exactly once. Returns the number
    /// of devices that applied it; a device rejecting the message is logged
    /// and does not keep the others from getting it.
    ///
    /// A generic error rejecting a command carries no port. It goes to the
    /// devices waiting on a command of the rejected type, or to every device
    /// waiting on any command if none matches, and to the hubs only if no
    /// device is waiting at all.
    pub fn route(&self, message: &Message) -> usize {
        let targets = match message {
            Message::GenericError(generic) if !generic.code.is_ack() => {
                let mut targets = self.collect(|device| device.awaits_reply_to(generic.command_type));
                if targets.is_empty() {
                    targets = self.collect(|device| !device.is_port_free());
                }
                if targets.is_empty() {
                    targets = self.collect(|device| device.accepts(message));
                }
                targets
            }
            _ => self.collect(|device| device.accepts(message)),
        };

        let mut delivered = 0;
        for device in targets {
            match device.apply_incoming(message) {
                Ok(()) => delivered += 1,
                Err(err) => warn!("Could not deliver to {}: {}", device.name(), err),
            }
        }
        if delivered == 0 {
            trace!("No device for {:?}", message.message_type());
        }
        delivered
    }

    // Collect first so no shard lock is held while devices update.
    fn collect(&self, matches: impl Fn(&Device) -> bool) -> Vec<Arc<Device>> {
        self.devices
            .iter()
            .filter(|device| matches(device.value()))
            .map(|device| device.value().clone())
            .collect()
    }
}
