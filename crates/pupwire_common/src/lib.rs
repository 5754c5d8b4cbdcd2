//! Wire-level building blocks shared by every pupwire crate.
//!
//! This crate knows how a LEGO Powered Up frame looks on the wire and nothing
//! else: no sockets, no tasks, no state. [`Message`] is the typed view of a
//! frame, [`codec::LwpCodec`] turns one into the other.

pub mod messages;
pub use messages::*;

pub mod codec;

pub mod error;

use serde::{Deserialize, Serialize};

use std::fmt::Display;

/// Size of the common header: length, hub id and message type.
pub const HEADER_LEN: usize = 3;

/// Hub id carried in every frame. Always zero in practice.
pub const HUB_ID: u8 = 0x00;

/// Largest frame the one byte length field can describe.
pub const MAX_FRAME_LEN: usize = u8::MAX as usize;

#[derive(Serialize, Deserialize, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Debug)]
/// A [`Port`] addresses one physical or virtual connector of the hub
pub struct Port(pub u8);

impl Port {
    /// Physical port A
    pub const A: Self = Port(0x00);
    /// Physical port B
    pub const B: Self = Port(0x01);
    /// Physical port C
    pub const C: Self = Port(0x02);
    /// Physical port D
    pub const D: Self = Port(0x03);

    /// The raw port byte.
    #[inline(always)]
    pub fn byte(self) -> u8 {
        self.0
    }
}

impl From<u8> for Port {
    fn from(value: u8) -> Self {
        Port(value)
    }
}

impl Display for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("port 0x{:02x}", self.0))
    }
}

/// Two physical ports driven together through one virtual port.
///
/// Pairs compare without regard to order: the hub reports the two ports of a
/// synchronized motor in whichever order it set them up.
#[derive(Serialize, Deserialize, Clone, Copy, Debug)]
pub struct PortPair {
    /// First physical port
    pub first: Port,
    /// Second physical port
    pub second: Port,
}

impl PortPair {
    /// Create a new pair.
    pub fn new(first: Port, second: Port) -> Self {
        Self { first, second }
    }
}

impl PartialEq for PortPair {
    fn eq(&self, other: &Self) -> bool {
        (self.first == other.first && self.second == other.second)
            || (self.first == other.second && self.second == other.first)
    }
}

impl Eq for PortPair {}

impl Display for PortPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ports 0x{:02x}+0x{:02x}", self.first.0, self.second.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_pairs_ignore_order() {
        let ab = PortPair::new(Port::A, Port::B);
        assert_eq!(ab, PortPair::new(Port::B, Port::A));
        assert_ne!(ab, PortPair::new(Port::A, Port::C));
    }
}
