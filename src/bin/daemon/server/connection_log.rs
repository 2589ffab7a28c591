//! Connection Log Module
//!
//! Append-only record of connect and disconnect events. A single task owns
//! the file; workers hand entries to it over a channel, so lines from
//! different workers can never interleave inside the file.

use crate::utils::error::{RexecError, Result, SetupStage};
use async_std::channel::{self, Receiver, Sender};
use async_std::fs::File;
use async_std::task::{self, JoinHandle};
use chrono::{DateTime, Local};
use futures::io::AsyncWriteExt;
use std::fmt;
use std::fs::OpenOptions;
use std::net::SocketAddr;
use std::path::Path;

/// Kind of connection event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
}

impl fmt::Display for ConnectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionEvent::Connected => f.write_str("connected"),
            ConnectionEvent::Disconnected => f.write_str("disconnected"),
        }
    }
}

/// One line of the connection log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub peer: SocketAddr,
    pub event: ConnectionEvent,
}

impl LogEntry {
    /// Create an entry stamped with the current local time
    pub fn now(peer: SocketAddr, event: ConnectionEvent) -> Self {
        Self {
            timestamp: Local::now(),
            peer,
            event,
        }
    }

    /// Render the entry as one log line, newline included
    ///
    /// Format: `DD/MM, HH:MM: client IP:PORT connected`
    pub fn format_line(&self) -> String {
        format!(
            "{}: client {} {}\n",
            self.timestamp.format("%d/%m, %H:%M"),
            self.peer,
            self.event
        )
    }
}

/// Cloneable sending side of the connection log
#[derive(Debug, Clone)]
pub struct ConnectionLogHandle {
    tx: Sender<LogEntry>,
}

impl ConnectionLogHandle {
    /// Queue an entry for writing
    ///
    /// Never fails from the caller's point of view; if the log task is gone
    /// the entry is reported through tracing instead.
    pub fn append(&self, entry: LogEntry) {
        if let Err(e) = self.tx.try_send(entry) {
            let entry = e.into_inner();
            tracing::warn!(
                peer = %entry.peer,
                event = %entry.event,
                "Connection log is closed, entry dropped"
            );
        }
    }
}

/// Writer task of the connection log, used to flush it at shutdown
pub struct ConnectionLogWriter {
    tx: Sender<LogEntry>,
    task: JoinHandle<()>,
}

impl ConnectionLogWriter {
    /// Stop accepting entries and wait until every queued entry is on disk
    ///
    /// Entries appended after this call are reported through tracing and
    /// dropped.
    pub async fn close(self) {
        self.tx.close();
        self.task.await;
        tracing::debug!("Connection log closed");
    }
}

/// Owner of the connection log file
pub struct ConnectionLog {
    file: File,
    rx: Receiver<LogEntry>,
}

impl ConnectionLog {
    /// Open the log file and start its writer task
    ///
    /// # Arguments
    /// * `path` - Log file, created if missing and appended to otherwise
    ///
    /// # Returns
    /// * The handle workers log through, and the writer. The writer task ends
    ///   once it is closed, or every handle has been dropped, and the queue
    ///   is drained.
    pub fn open(path: &Path) -> Result<(ConnectionLogHandle, ConnectionLogWriter)> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| RexecError::setup(SetupStage::LogFile, e))?;

        let (tx, rx) = channel::unbounded();
        let log = ConnectionLog {
            file: File::from(file),
            rx,
        };
        tracing::debug!(path = %path.display(), "Connection log opened");

        let writer = ConnectionLogWriter {
            tx: tx.clone(),
            task: task::spawn(log.run()),
        };
        Ok((ConnectionLogHandle { tx }, writer))
    }

    async fn run(mut self) {
        // A closed channel still yields what was queued before closing
        while let Ok(entry) = self.rx.recv().await {
            let line = entry.format_line();
            // One write per entry, flushed so the file is current after each event
            let written = match self.file.write_all(line.as_bytes()).await {
                Ok(()) => self.file.flush().await,
                Err(e) => Err(e),
            };

            if let Err(e) = written {
                tracing::error!(error = %e, line = line.trim_end(), "Failed to write connection log");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_line() {
        let entry = LogEntry {
            timestamp: Local.with_ymd_and_hms(2024, 3, 7, 9, 5, 0).unwrap(),
            peer: "192.168.0.12:40312".parse().unwrap(),
            event: ConnectionEvent::Connected,
        };
        assert_eq!(
            entry.format_line(),
            "07/03, 09:05: client 192.168.0.12:40312 connected\n"
        );
    }

    #[async_std::test]
    async fn test_entries_are_appended_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("connections.log");
        std::fs::write(&path, "existing line\n").unwrap();

        let (handle, writer) = ConnectionLog::open(&path).unwrap();
        let peer: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        handle.append(LogEntry::now(peer, ConnectionEvent::Connected));
        handle.append(LogEntry::now(peer, ConnectionEvent::Disconnected));
        writer.close().await;

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "existing line");
        assert!(lines[1].ends_with("client 127.0.0.1:5000 connected"));
        assert!(lines[2].ends_with("client 127.0.0.1:5000 disconnected"));
    }

    /// Many concurrent producers must still yield whole lines
    #[async_std::test]
    async fn test_concurrent_appends_do_not_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("connections.log");
        let (handle, writer) = ConnectionLog::open(&path).unwrap();

        let producers: Vec<_> = (0..16u16)
            .map(|i| {
                let handle = handle.clone();
                task::spawn(async move {
                    let peer = SocketAddr::from(([10, 0, 0, 1], 1000 + i));
                    for _ in 0..10 {
                        handle.append(LogEntry::now(peer, ConnectionEvent::Connected));
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.await;
        }
        drop(handle);
        writer.close().await;

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 160);
        assert!(
            contents
                .lines()
                .all(|line| line.contains(": client 10.0.0.1:") && line.ends_with(" connected"))
        );
    }

    /// Closing drains the queue even while handles are still alive
    #[async_std::test]
    async fn test_close_flushes_queued_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("connections.log");
        let (handle, writer) = ConnectionLog::open(&path).unwrap();

        for port in 0..50u16 {
            let peer = SocketAddr::from(([192, 168, 1, 9], 4000 + port));
            handle.append(LogEntry::now(peer, ConnectionEvent::Connected));
            handle.append(LogEntry::now(peer, ConnectionEvent::Disconnected));
        }
        writer.close().await;

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 100);

        // Late entries are dropped without failing the caller
        handle.append(LogEntry::now(
            "127.0.0.1:1".parse().unwrap(),
            ConnectionEvent::Connected,
        ));
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 100);
    }

    #[test]
    fn test_open_fails_for_missing_directory() {
        let result = ConnectionLog::open(Path::new("/nonexistent/dir/connections.log"));
        assert!(matches!(
            result,
            Err(RexecError::Setup {
                stage: SetupStage::LogFile,
                ..
            })
        ));
    }
}
