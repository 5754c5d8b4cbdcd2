//! Configuration types.
//!
//! Everything here derives `serde` so it can be read from whatever format the
//! application keeps its settings in.

use std::{fmt::Display, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{DeviceKind, Port};

/// Host and port of the proxy server that forwards frames to a hub.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ServerAddr {
    /// Host name or IP address
    pub host: String,
    /// TCP port
    pub port: u16,
}

impl ServerAddr {
    /// Create a new server address.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }
}

impl Default for ServerAddr {
    fn default() -> Self {
        Self::new("127.0.0.1", 8888)
    }
}

impl Display for ServerAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
#[allow(missing_copy_implementations)]
/// Settings to configure a session
pub struct SessionSettings {
    /// How long a device may wait for the server to confirm its registration
    ///
    /// ## Default
    /// 5000 ms
    pub handshake_timeout_ms: u64,
    /// Capacity of the channel feeding [`Session::subscribe`](crate::Session::subscribe)
    /// receivers (default: 256)
    ///
    /// Messages are dropped for observers that fall this far behind, the
    /// devices themselves are never affected.
    pub channel_capacity: usize,
    /// Largest frame accepted from the server. Longer frames end the session.
    ///
    /// ## Default
    /// 255, the largest frame the protocol can describe
    pub max_frame_length: usize,
}

impl SessionSettings {
    /// The handshake timeout as a [`Duration`].
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: 5_000,
            channel_capacity: 256,
            max_frame_length: pupwire_common::MAX_FRAME_LEN,
        }
    }
}

/// Static identity of a device, as found in a configuration file.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DeviceConfig {
    /// Friendly name, unique per router
    pub name: String,
    /// Which kind of device this is
    pub kind: DeviceKind,
    /// Port the device registers with the server
    pub port: Port,
    /// Proxy server the device talks to
    #[serde(default)]
    pub server: ServerAddr,
    /// Gear ratio between motor and load. Stored for the caller, never applied
    #[serde(default = "default_gear_ratio")]
    pub gear_ratio: f32,
}

fn default_gear_ratio() -> f32 {
    1.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_fill_missing_fields() {
        let settings: SessionSettings = serde_json::from_str(r#"{ "handshake_timeout_ms": 250 }"#).unwrap();
        assert_eq!(settings.handshake_timeout(), Duration::from_millis(250));
        assert_eq!(settings.channel_capacity, 256);
        assert_eq!(settings.max_frame_length, 255);
    }

    #[test]
    fn device_config_from_json() {
        let config: DeviceConfig = serde_json::from_str(
            r#"{
                "name": "lift",
                "kind": { "SynchronizedMotor": { "first": 0, "second": 1 } },
                "port": 0,
                "server": { "host": "hubproxy.local", "port": 8888 }
            }"#,
        )
        .unwrap();
        assert_eq!(config.name, "lift");
        assert_eq!(config.kind, DeviceKind::SynchronizedMotor { first: Port::A, second: Port::B });
        assert_eq!(config.server.to_string(), "hubproxy.local:8888");
        assert_eq!(config.gear_ratio, 1.0);
    }
}
