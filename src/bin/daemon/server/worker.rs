//! Connection Worker Module
//!
//! Owns one accepted connection and runs its command/response loop:
//! receive a command, run it, send the output back, repeat until the client
//! quits or goes away.

use super::connection_log::{ConnectionEvent, ConnectionLogHandle, LogEntry};
use super::executor::{CommandExecutor, CommandOutput};
use super::reaper::WorkerId;
use crate::utils::error::RexecError;
use async_std::io::BufReader;
use async_std::net::{Shutdown, TcpStream};
use rexec::protocol::{
    FrameError, TRUNCATION_NOTICE, error_payload, is_terminating, read_frame, write_frame,
};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

/// Why a worker ended its session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The client sent `quit` or `exit`
    Quit,
    /// The client closed the connection
    PeerClosed,
    /// Reading from the connection failed
    ReadFailed(String),
    /// Writing a response failed
    WriteFailed(String),
    /// The command subprocess could not be started
    SpawnFailed(String),
    /// The worker panicked
    Panicked,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Quit => write!(f, "quit"),
            DisconnectReason::PeerClosed => write!(f, "peer closed"),
            DisconnectReason::ReadFailed(e) => write!(f, "read failed: {}", e),
            DisconnectReason::WriteFailed(e) => write!(f, "write failed: {}", e),
            DisconnectReason::SpawnFailed(e) => write!(f, "spawn failed: {}", e),
            DisconnectReason::Panicked => write!(f, "panicked"),
        }
    }
}

/// Session states
enum State {
    Receiving,
    Executing(Vec<u8>),
    Sending {
        payload: Vec<u8>,
        close_after: Option<DisconnectReason>,
    },
    Disconnecting(DisconnectReason),
}

/// Worker bound to a single client connection
pub struct ConnectionWorker {
    id: WorkerId,
    peer: SocketAddr,
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    executor: Arc<CommandExecutor>,
    log: ConnectionLogHandle,
    command_limit: usize,
}

impl ConnectionWorker {
    /// Create a worker for an accepted connection
    ///
    /// # Arguments
    /// * `id` - Worker identifier assigned by the accept loop
    /// * `stream` - The accepted connection, owned by this worker from now on
    /// * `peer` - Client address
    /// * `executor` - Shared command executor
    /// * `log` - Connection log handle
    /// * `command_limit` - Longest accepted command, in bytes
    pub fn new(
        id: WorkerId,
        stream: TcpStream,
        peer: SocketAddr,
        executor: Arc<CommandExecutor>,
        log: ConnectionLogHandle,
        command_limit: usize,
    ) -> Self {
        Self {
            id,
            peer,
            reader: BufReader::new(stream.clone()),
            writer: stream,
            executor,
            log,
            command_limit,
        }
    }

    /// Run the session to completion
    ///
    /// Consumes the worker; the connection is closed when this returns.
    pub async fn run(mut self) -> DisconnectReason {
        self.log
            .append(LogEntry::now(self.peer, ConnectionEvent::Connected));
        tracing::info!(worker = %self.id, peer = %self.peer, "Client connected");

        let mut state = State::Receiving;
        let reason = loop {
            state = match state {
                State::Receiving => self.receive().await,
                State::Executing(command) => self.execute(command).await,
                State::Sending {
                    payload,
                    close_after,
                } => self.send(payload, close_after).await,
                State::Disconnecting(reason) => break reason,
            };
        };

        self.disconnect(&reason);
        reason
    }

    async fn receive(&mut self) -> State {
        match read_frame(&mut self.reader, self.command_limit).await {
            Ok(Some(command)) if is_terminating(&command) => {
                State::Disconnecting(DisconnectReason::Quit)
            }
            Ok(Some(command)) => State::Executing(command),
            Ok(None) | Err(FrameError::UnexpectedEof) => {
                State::Disconnecting(DisconnectReason::PeerClosed)
            }
            Err(FrameError::Oversized { limit }) => {
                tracing::warn!(worker = %self.id, peer = %self.peer, limit, "Command too long, rejected");
                State::Sending {
                    payload: error_payload(&format!("command exceeds {} bytes", limit)),
                    close_after: None,
                }
            }
            Err(FrameError::Io(e)) => {
                State::Disconnecting(DisconnectReason::ReadFailed(e.to_string()))
            }
        }
    }

    async fn execute(&mut self, command: Vec<u8>) -> State {
        tracing::info!(
            worker = %self.id,
            peer = %self.peer,
            command = %String::from_utf8_lossy(&command),
            "Executing command"
        );

        match self.executor.run(&command).await {
            Ok(output) => {
                tracing::debug!(
                    worker = %self.id,
                    bytes = output.stdout.len(),
                    truncated = output.truncated,
                    status = ?output.status,
                    "Command finished"
                );
                State::Sending {
                    payload: response_payload(output),
                    close_after: None,
                }
            }
            Err(e) => {
                tracing::error!(worker = %self.id, peer = %self.peer, error = %e, "Command could not be started");
                let message = match &e {
                    RexecError::Spawn { source, .. } => {
                        format!("failed to start command: {}", source)
                    }
                    other => other.to_string(),
                };
                State::Sending {
                    payload: error_payload(&message),
                    close_after: Some(DisconnectReason::SpawnFailed(message)),
                }
            }
        }
    }

    async fn send(&mut self, payload: Vec<u8>, close_after: Option<DisconnectReason>) -> State {
        match write_frame(&mut self.writer, &payload).await {
            Ok(()) => close_after.map_or(State::Receiving, State::Disconnecting),
            Err(e) => State::Disconnecting(DisconnectReason::WriteFailed(e.to_string())),
        }
    }

    fn disconnect(&mut self, reason: &DisconnectReason) {
        self.log
            .append(LogEntry::now(self.peer, ConnectionEvent::Disconnected));
        tracing::info!(worker = %self.id, peer = %self.peer, reason = %reason, "Client disconnected");

        // The peer may already be gone; the stream is dropped either way
        if let Err(e) = self.writer.shutdown(Shutdown::Both) {
            tracing::debug!(worker = %self.id, error = %e, "Connection shutdown failed");
        }
    }
}

/// Turn captured output into a response payload
///
/// Output that hit the capacity carries the truncation notice at its end.
pub fn response_payload(output: CommandOutput) -> Vec<u8> {
    let mut payload = output.stdout;
    if output.truncated {
        payload.extend_from_slice(TRUNCATION_NOTICE);
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnect_reason_display() {
        let error = std::io::Error::from(std::io::ErrorKind::BrokenPipe);
        assert_eq!(
            DisconnectReason::WriteFailed(error.to_string()).to_string(),
            "write failed: broken pipe"
        );
        assert_eq!(DisconnectReason::Quit.to_string(), "quit");
        assert_eq!(DisconnectReason::PeerClosed.to_string(), "peer closed");
    }

    #[test]
    fn test_response_payload_marks_truncation() {
        let full = CommandOutput {
            stdout: b"abc".to_vec(),
            truncated: true,
            status: None,
        };
        let mut expected = b"abc".to_vec();
        expected.extend_from_slice(TRUNCATION_NOTICE);
        assert_eq!(response_payload(full), expected);

        let short = CommandOutput {
            stdout: b"abc".to_vec(),
            truncated: false,
            status: None,
        };
        assert_eq!(response_payload(short), b"abc".to_vec());
    }
}
