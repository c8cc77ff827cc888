//! Length-prefixed framing for the reliable control stream.
//!
//! ```text
//! +-------------------+--------------------+
//! | length (4 bytes)  |   payload          |
//! | u32 little-endian |   (length bytes)   |
//! +-------------------+--------------------+
//! ```
//!
//! The length excludes the prefix itself. Control messages always carry at
//! least a version byte, so a zero-length frame is rejected.

use std::io::ErrorKind;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Size of the length prefix.
pub const FRAME_HEADER_LEN: usize = 4;

/// Limits applied by the framing layer.
#[derive(Debug, Clone, Copy)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 1 MiB.
    pub max_payload_size: u32,
}

impl FrameConfig {
    /// Config with the given payload limit.
    pub fn with_max_payload(max_payload_size: u32) -> Self {
        Self { max_payload_size }
    }

    fn check(&self, size: usize) -> Result<u32, FrameError> {
        let max = self.max_payload_size;
        match u32::try_from(size) {
            Ok(0) => Err(FrameError::EmptyFrame),
            Ok(size) if size <= max => Ok(size),
            _ => Err(FrameError::PayloadTooLarge { size, max }),
        }
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self::with_max_payload(1_048_576)
    }
}

/// Errors that can occur during framing operations.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload size exceeds the configured maximum.
    #[error("payload size {size} exceeds maximum {max}")]
    PayloadTooLarge {
        /// The offending payload size.
        size: usize,
        /// The configured maximum.
        max: u32,
    },

    /// A frame announced a zero-length payload.
    #[error("empty frame")]
    EmptyFrame,

    /// The peer closed the stream, cleanly or mid-frame.
    #[error("connection closed")]
    ConnectionClosed,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn map_eof(e: std::io::Error) -> FrameError {
    if e.kind() == ErrorKind::UnexpectedEof {
        FrameError::ConnectionClosed
    } else {
        FrameError::Io(e)
    }
}

/// Read one frame and return its payload.
///
/// Not cancel-safe: dropping the future mid-frame loses the partial read, so
/// only race it against a shutdown signal.
pub async fn read_frame<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    config: &FrameConfig,
) -> Result<Vec<u8>, FrameError> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    reader.read_exact(&mut header).await.map_err(map_eof)?;

    let len = config.check(u32::from_le_bytes(header) as usize)?;

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await.map_err(map_eof)?;
    Ok(payload)
}

/// Build the on-wire bytes for one frame.
pub fn encode_frame(payload: &[u8], config: &FrameConfig) -> Result<Vec<u8>, FrameError> {
    let len = config.check(payload.len())?;
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Write one frame with a single buffered write, then flush.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    payload: &[u8],
    config: &FrameConfig,
) -> Result<(), FrameError> {
    let frame = encode_frame(payload, config)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}
