//! Frame codec
//!
//! Length-prefixed JSON framing. `decode` works incrementally: it consumes
//! nothing until a complete frame is buffered, so callers can feed it
//! partial socket reads.

use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, FrameError, Result};

use super::message::Message;

/// Default cap on the frame body size
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Size of the big-endian length prefix
pub const FRAME_HEADER_SIZE: usize = 4;

/// Encode a message as one frame appended to `buf`.
pub fn encode(message: &Message, buf: &mut BytesMut, max_frame_size: usize) -> Result<()> {
    let body = serde_json::to_vec(message).map_err(|e| Error::Frame(FrameError::Malformed(e)))?;

    if body.len() > max_frame_size {
        return Err(Error::Frame(FrameError::TooLarge {
            size: body.len(),
            max: max_frame_size,
        }));
    }

    buf.reserve(FRAME_HEADER_SIZE + body.len());
    buf.put_u32(body.len() as u32);
    buf.put_slice(&body);
    Ok(())
}

/// Decode one message from the front of `buf`.
///
/// Returns `Ok(None)` while the buffer holds only part of a frame. Bytes
/// are consumed exactly when a full frame is decoded.
pub fn decode(buf: &mut BytesMut, max_frame_size: usize) -> Result<Option<Message>> {
    if buf.len() < FRAME_HEADER_SIZE {
        return Ok(None);
    }

    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len > max_frame_size {
        return Err(Error::Frame(FrameError::TooLarge {
            size: len,
            max: max_frame_size,
        }));
    }

    if buf.len() < FRAME_HEADER_SIZE + len {
        return Ok(None);
    }

    buf.advance(FRAME_HEADER_SIZE);
    let body = buf.split_to(len);
    let message =
        serde_json::from_slice(&body).map_err(|e| Error::Frame(FrameError::Malformed(e)))?;
    Ok(Some(message))
}

/// Write one message to `writer` and flush it.
pub async fn write_message<W>(
    writer: &mut W,
    message: &Message,
    max_frame_size: usize,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::new();
    encode(message, &mut buf, max_frame_size)?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Read the next message from `reader`, buffering partial frames in `buf`.
///
/// Returns `Ok(None)` on a clean end of stream. An end of stream in the
/// middle of a frame is an error.
pub async fn read_message<R>(
    reader: &mut R,
    buf: &mut BytesMut,
    max_frame_size: usize,
) -> Result<Option<Message>>
where
    R: AsyncRead + Unpin,
{
    loop {
        if let Some(message) = decode(buf, max_frame_size)? {
            return Ok(Some(message));
        }

        let n = reader.read_buf(buf).await?;
        if n == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed mid-frame",
            )));
        }
    }
}
