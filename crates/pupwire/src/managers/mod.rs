use std::fmt::Display;

use async_trait::async_trait;
use futures_lite::{AsyncRead, AsyncWrite};

use crate::{config::SessionSettings, error::NetworkError};

mod link;
/// Sessions: one byte stream to the proxy server and the read loop feeding devices.
pub mod session;
/// Fan-out of a shared notification stream to the devices registered on it.
pub mod router;

pub(crate) use link::{Link, read_frame};

/// Opens byte streams to a proxy server.
///
/// Implement this to run sessions over something other than TCP.
#[async_trait]
pub trait HubProvider: 'static + Send + Sync {
    /// Name used in logs
    const PROVIDER_NAME: &'static str;

    /// The combined duplex stream
    type Socket: Send;

    /// Read half of the stream
    type ReadHalf: AsyncRead + Unpin + Send + 'static;

    /// Write half of the stream
    type WriteHalf: AsyncWrite + Send + 'static;

    /// Where to connect to
    type ConnectInfo: Display + Send + 'static;

    /// Open a stream to `connect_info`.
    async fn connect_task(
        connect_info: Self::ConnectInfo,
        settings: &SessionSettings,
    ) -> Result<Self::Socket, NetworkError>;

    /// Split the stream into its halves.
    fn split(combined: Self::Socket) -> (Self::ReadHalf, Self::WriteHalf);
}
