/*!
 * Wire Framing
 * Length-prefixed JSON frames over a byte stream
 */

use super::types::{Message, TransportError, TransportResult};
use crate::core::limits::MAX_FRAME_SIZE;
use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Write one frame: 4-byte big-endian payload length, then the JSON payload.
pub async fn write_message<W>(stream: &mut W, addr: &str, msg: &Message) -> TransportResult<()>
where
    W: AsyncWrite + Unpin,
{
    let payload = serde_json::to_vec(msg).map_err(|e| TransportError::MalformedFrame {
        addr: addr.to_string(),
        details: e.to_string(),
    })?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(TransportError::FrameTooLarge {
            size: payload.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    let mut frame = BytesMut::with_capacity(4 + payload.len());
    frame.put_u32(payload.len() as u32);
    frame.put_slice(&payload);

    stream.write_all(&frame).await.map_err(|e| TransportError::Io {
        addr: addr.to_string(),
        details: e.to_string(),
    })?;
    stream.flush().await.map_err(|e| TransportError::Io {
        addr: addr.to_string(),
        details: e.to_string(),
    })
}

/// Read one frame and decode its payload.
pub async fn read_message<R>(stream: &mut R, addr: &str) -> TransportResult<Message>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await.map_err(|e| TransportError::Io {
        addr: addr.to_string(),
        details: e.to_string(),
    })?;

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(TransportError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await.map_err(|e| TransportError::Io {
        addr: addr.to_string(),
        details: e.to_string(),
    })?;

    serde_json::from_slice(&payload).map_err(|e| TransportError::MalformedFrame {
        addr: addr.to_string(),
        details: e.to_string(),
    })
}
