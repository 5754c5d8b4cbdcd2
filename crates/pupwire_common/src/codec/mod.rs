//! Conversion between [`Message`](crate::Message) values and raw frames.
//!
//! [`LwpCodec`] implements the `codee` encoder and decoder traits so it can be
//! handed to anything that is generic over a codec.

mod binary;

pub use binary::LwpCodec;
