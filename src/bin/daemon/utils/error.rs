//! Unified Error Handling System
//!
//! This module defines the error types of the rexec daemon. The variants
//! follow how far a failure reaches: setup and accept failures stop the
//! whole service, protocol and spawn failures end a single worker only.

use rexec::protocol::FrameError;
use std::io;
use thiserror::Error;

/// Stage of listener setup that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStage {
    Socket,
    Bind,
    Listen,
    LogFile,
    Signals,
}

impl std::fmt::Display for SetupStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SetupStage::Socket => "socket",
            SetupStage::Bind => "bind",
            SetupStage::Listen => "listen",
            SetupStage::LogFile => "log file",
            SetupStage::Signals => "signal handler",
        };
        f.write_str(name)
    }
}

/// Enumeration of all error types in the daemon
#[derive(Error, Debug)]
pub enum RexecError {
    /// Socket, bind, listen or other startup failure
    #[error("Setup error ({stage}): {source}")]
    Setup {
        stage: SetupStage,
        #[source]
        source: io::Error,
    },

    /// Non-recoverable failure while accepting connections
    #[error("Accept error: {0}")]
    Accept(#[source] io::Error),

    /// The command subprocess could not be started
    #[error("Failed to start command '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    /// Malformed or oversized frame from a client
    #[error("Protocol error: {0}")]
    Protocol(#[from] FrameError),

    /// Configuration file error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid arguments error
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// System I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl RexecError {
    /// Wrap an I/O error raised during a setup stage
    pub fn setup(stage: SetupStage, source: io::Error) -> Self {
        RexecError::Setup { stage, source }
    }
}

impl From<toml::de::Error> for RexecError {
    fn from(error: toml::de::Error) -> Self {
        RexecError::Config(error.to_string())
    }
}

/// Standardized result type for the entire daemon
pub type Result<T> = std::result::Result<T, RexecError>;
