use async_net::TcpStream;
use tracing::{debug, info};

use crate::{
    async_trait,
    config::{ServerAddr, SessionSettings},
    error::NetworkError,
    managers::HubProvider,
};

#[derive(Default, Debug)]
/// Provides a tcp stream to the proxy server for pupwire.
pub struct TcpProvider;

#[async_trait]
impl HubProvider for TcpProvider {
    const PROVIDER_NAME: &'static str = "TCP";

    type Socket = TcpStream;

    type ReadHalf = TcpStream;

    type WriteHalf = TcpStream;

    type ConnectInfo = ServerAddr;

    async fn connect_task(
        connect_info: Self::ConnectInfo,
        _: &SessionSettings,
    ) -> Result<Self::Socket, NetworkError> {
        info!("Beginning connection to {}", connect_info);
        let stream = TcpStream::connect((connect_info.host.as_str(), connect_info.port))
            .await
            .map_err(|source| NetworkError::Connection {
                addr: connect_info.to_string(),
                source,
            })?;
        stream.set_nodelay(true)?;

        info!("Connected!");
        if let Ok(addr) = stream.peer_addr() {
            debug!("Connected to: {:?}", addr);
        }
        Ok(stream)
    }

    fn split(combined: Self::Socket) -> (Self::ReadHalf, Self::WriteHalf) {
        (combined.clone(), combined)
    }
}
