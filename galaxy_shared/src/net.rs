//! Framed stream I/O.
//!
//! Reads and writes [`Message`] frames over any async byte stream. A frame is
//! read in two phases: exactly [`HEADER_LEN`] bytes, then exactly the declared
//! payload length. This makes the stream self-delimiting over TCP.

use std::fmt;

use anyhow::{ensure, Context};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::message::{FrameHeader, Message, HEADER_LEN};

/// Default upper bound for a declared payload length (1 MiB).
pub const DEFAULT_MAX_PAYLOAD_LEN: u32 = 1024 * 1024;

/// Server-assigned client identifier. Never reused within a server's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId(pub u32);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Reads one complete frame.
///
/// Fails on EOF or any read error, and when the declared payload length is
/// above `max_payload_len`.
pub async fn read_message<R>(reader: &mut R, max_payload_len: u32) -> anyhow::Result<Message>
where
    R: AsyncRead + Unpin,
{
    let mut header_buf = [0u8; HEADER_LEN];
    reader
        .read_exact(&mut header_buf)
        .await
        .context("read frame header")?;
    let header = FrameHeader::decode(&header_buf);
    trace!(ty = ?header.message_type, len = header.payload_len, "Frame header");
    ensure!(
        header.payload_len <= max_payload_len,
        "declared payload of {} bytes exceeds limit of {}",
        header.payload_len,
        max_payload_len
    );

    let mut payload = vec![0u8; header.payload_len as usize];
    reader
        .read_exact(&mut payload)
        .await
        .context("read frame payload")?;
    Ok(Message::from_payload(header.message_type, &payload))
}

/// Writes one complete frame and flushes.
pub async fn write_message<W>(writer: &mut W, message: &Message) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    write_frame(writer, &message.serialize()).await
}

/// Writes an already-serialized frame and flushes.
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await.context("write frame")?;
    writer.flush().await.context("flush frame")?;
    Ok(())
}
