//! Wire Protocol Module
//!
//! Every message on a connection, in both directions, is a run of bytes
//! terminated by a single [`SENTINEL`] byte. There is no length prefix and no
//! further structure: a request is the command text, a response is the
//! captured output of that command.
//!
//! Capacities are enforced explicitly on the reading side. A frame that
//! outgrows its limit is consumed up to the next sentinel and reported as
//! [`FrameError::Oversized`], so the connection stays usable afterwards.

use futures::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use std::io;
use thiserror::Error;

/// Byte that terminates every command and every response
pub const SENTINEL: u8 = 0;
/// Size of the command buffer, sentinel included
pub const COMMAND_CAPACITY: usize = 200;
/// Default capacity of the captured output carried by one response
pub const RESPONSE_CAPACITY: usize = 5000;
/// Maximum response payload accepted by the client (1MB)
pub const CLIENT_RESPONSE_LIMIT: usize = 1024 * 1024;
/// Appended to a response whose output did not fit the response capacity
pub const TRUNCATION_NOTICE: &[u8] = b"\n[rexec: output truncated]\n";
/// Prefix of explicit error responses produced by the daemon itself
pub const ERROR_PREFIX: &str = "error: ";

/// Words that end a session without executing anything
const TERMINATING_COMMANDS: [&[u8]; 2] = [b"quit", b"exit"];

/// Errors produced while reading a frame
#[derive(Error, Debug)]
pub enum FrameError {
    /// The frame payload was longer than the permitted limit
    #[error("frame exceeds {limit} bytes")]
    Oversized { limit: usize },

    /// The stream ended in the middle of a frame
    #[error("connection closed in the middle of a frame")]
    UnexpectedEof,

    /// Underlying transport failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Longest command text that fits the command buffer next to its sentinel
pub const fn command_limit(capacity: usize) -> usize {
    capacity.saturating_sub(1)
}

/// Returns true when the command is exactly `quit` or `exit`
pub fn is_terminating(command: &[u8]) -> bool {
    TERMINATING_COMMANDS.contains(&command)
}

/// Returns true when a response payload carries the truncation notice
pub fn is_truncated(payload: &[u8]) -> bool {
    payload.ends_with(TRUNCATION_NOTICE)
}

/// Returns the payload without its truncation notice, if it has one
pub fn strip_truncation(payload: &[u8]) -> &[u8] {
    payload.strip_suffix(TRUNCATION_NOTICE).unwrap_or(payload)
}

/// Builds the payload of an explicit error response
pub fn error_payload(message: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(ERROR_PREFIX.len() + message.len());
    payload.extend_from_slice(ERROR_PREFIX.as_bytes());
    payload.extend(message.bytes().filter(|&b| b != SENTINEL));
    payload
}

/// Write one frame: the payload followed by the sentinel
///
/// The whole frame is written before returning. Payloads that contain the
/// sentinel would split into two frames on the other side and are rejected
/// before anything reaches the writer.
///
/// # Arguments
/// * `writer` - Destination stream
/// * `payload` - Frame contents, without sentinel
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if payload.contains(&SENTINEL) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "payload contains the frame sentinel",
        ));
    }

    let mut frame = Vec::with_capacity(payload.len() + 1);
    frame.extend_from_slice(payload);
    frame.push(SENTINEL);

    writer.write_all(&frame).await?;
    writer.flush().await
}

/// Read one frame from a buffered stream
///
/// # Arguments
/// * `reader` - Source stream
/// * `limit` - Maximum payload length, sentinel excluded
///
/// # Returns
/// * `Ok(Some(payload))` - A complete frame
/// * `Ok(None)` - The stream ended cleanly before any byte of a new frame
/// * `Err(FrameError)` - Oversized frame, truncated frame or I/O failure
pub async fn read_frame<R>(reader: &mut R, limit: usize) -> Result<Option<Vec<u8>>, FrameError>
where
    R: AsyncBufRead + Unpin,
{
    let mut payload = Vec::new();
    let mut oversized = false;
    let mut started = false;

    loop {
        let (consumed, complete) = {
            let available = match reader.fill_buf().await {
                Ok(available) => available,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(FrameError::Io(e)),
            };

            if available.is_empty() {
                return if started {
                    Err(FrameError::UnexpectedEof)
                } else {
                    Ok(None)
                };
            }
            started = true;

            let end = available.iter().position(|&b| b == SENTINEL);
            let chunk = match end {
                Some(index) => available.get(..index).unwrap_or_default(),
                None => available,
            };

            if !oversized {
                if payload.len() + chunk.len() > limit {
                    // Keep consuming until the sentinel, but stop collecting
                    oversized = true;
                    payload.clear();
                } else {
                    payload.extend_from_slice(chunk);
                }
            }

            match end {
                Some(index) => (index + 1, true),
                None => (available.len(), false),
            }
        };

        reader.consume_unpin(consumed);

        if complete {
            return if oversized {
                Err(FrameError::Oversized { limit })
            } else {
                Ok(Some(payload))
            };
        }
    }
}
