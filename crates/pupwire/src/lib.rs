#![deny(
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unstable_features,
    unused_import_braces,
    unused_qualifications,
    clippy::unwrap_used
)]

/*!
Async control of LEGO Powered Up hubs and motors through a proxy server.

The proxy server owns the Bluetooth link to the hub and relays LEGO Wireless
Protocol frames over TCP. pupwire models every hub port as a [`Device`],
connects it with a [`Session`] and keeps at most one command in flight per
port through a [`PortGate`].

A session either belongs to one device ([`Session::connect`]) or is shared by
several devices on the same hub, in which case a [`Router`] hands each incoming
frame to the devices it concerns ([`Session::connect_shared`]).

## Example
```rust,no_run
use std::sync::Arc;

use pupwire::{
    Device, Direction, MotionOptions, Port, ServerAddr, Session, SessionSettings,
    tcp::TcpProvider,
};

#[tokio::main]
async fn main() -> Result<(), pupwire::NetworkError> {
    let server = ServerAddr::new("127.0.0.1", 8888);
    let motor = Arc::new(Device::single_motor("drive", Port::A, server.clone()));

    let session = Session::connect::<TcpProvider, _>(
        motor.clone(),
        server,
        &SessionSettings::default(),
        &tokio::runtime::Handle::current(),
    )
    .await?;

    // Held until the hub reports the command completed
    motor
        .start_speed_for_time(1000, 60, Direction::Forward, MotionOptions::default())
        .await;
    // Waits for the port to be free again
    motor.start_move_for_degrees(90, 40, Direction::Reverse, MotionOptions::default()).await;

    session.close().await;
    Ok(())
}
```

Sessions spawn their read loop on a [`Runtime`], which is implemented for
[`tokio::runtime::Handle`].
*/

/// Server addresses and session tuning, deserializable from config files
pub mod config;
/// Hub ports modelled as devices and the commands they accept
pub mod device;
/// Errors of the network layer
pub mod error;
/// Timed command sequences over several devices
pub mod experiment;
/// Per port mutual exclusion
pub mod gate;
/// Sessions, providers and routing of incoming frames
pub mod managers;
mod runtime;
#[cfg(feature = "tcp")]
/// A default tcp provider
pub mod tcp;

pub use async_channel;
pub use async_trait::async_trait;
pub use config::{DeviceConfig, ServerAddr, SessionSettings};
pub use device::{
    CommandRecord, Device, DeviceKind, DeviceState, DispatchError, FailedCommand, MotionOptions,
    Timestamped,
};
pub use error::NetworkError;
pub use experiment::{Experiment, ExperimentReport, StepOptions};
pub use gate::PortGate;
pub use managers::{HubProvider, router::Router, session::Session};
pub use pupwire_common::*;
pub use runtime::{JoinHandle, Runtime};
