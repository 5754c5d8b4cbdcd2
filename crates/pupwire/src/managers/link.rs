use std::pin::Pin;

use futures_lite::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::trace;

use pupwire_common::HEADER_LEN;

use crate::error::{EncodeError, FramingError, NetworkError, WireError};

/// The write half of a session, shared by every device on it.
///
/// Frames travel with one extra prefix byte holding their length. Each frame
/// goes out as two flushed writes, prefix plus common header first, then the
/// payload. The lock keeps the two writes of one frame together.
pub(crate) struct Link {
    writer: Mutex<Pin<Box<dyn AsyncWrite + Send>>>,
    peer: String,
}

impl Link {
    pub(crate) fn new<W>(writer: W, peer: String) -> Self
    where
        W: AsyncWrite + Send + 'static,
    {
        Self {
            writer: Mutex::new(Box::pin(writer)),
            peer,
        }
    }

    pub(crate) fn peer(&self) -> &str {
        &self.peer
    }

    pub(crate) async fn write_frame(&self, frame: &[u8]) -> Result<(), NetworkError> {
        let len = u8::try_from(frame.len())
            .map_err(|_| WireError::from(EncodeError::Oversized(frame.len())))?;
        let split = HEADER_LEN.min(frame.len());

        let mut head = Vec::with_capacity(1 + split);
        head.push(len);
        head.extend_from_slice(&frame[..split]);

        let mut writer = self.writer.lock().await;
        writer.write_all(&head).await?;
        writer.flush().await?;
        if split < frame.len() {
            writer.write_all(&frame[split..]).await?;
            writer.flush().await?;
        }
        trace!("Sent {} byte frame to {}", frame.len(), self.peer);
        Ok(())
    }

    pub(crate) async fn shutdown(&self) {
        let mut writer = self.writer.lock().await;
        if let Err(err) = writer.close().await {
            trace!("Closing write half to {} failed: {}", self.peer, err);
        }
    }
}

/// Read the next frame into `buffer` and return its length.
///
/// Frames longer than `max_frame_length` end the session, so do frames too
/// short to hold a common header.
pub(crate) async fn read_frame<R>(
    reader: &mut R,
    buffer: &mut [u8],
    max_frame_length: usize,
) -> Result<usize, NetworkError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 1];
    reader.read_exact(&mut prefix).await?;
    let len = usize::from(prefix[0]);

    let max = max_frame_length.min(buffer.len());
    if len > max {
        return Err(NetworkError::FrameTooLarge { len, max });
    }
    if len < HEADER_LEN {
        return Err(NetworkError::Wire(FramingError::Truncated(len).into()));
    }

    reader.read_exact(&mut buffer[..len]).await?;
    Ok(len)
}
