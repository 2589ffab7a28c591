//! Server Module
//!
//! This module contains the core server components for the rexec daemon:
//! the listening socket, the accept loop, one worker per connection, the
//! shell executor, the reaper that reclaims finished workers and the shared
//! connection log.

/// Connection log module - single-owner append-only record of connect/disconnect events
pub mod connection_log;

/// Executor module - runs commands through the host shell and captures their output
pub mod executor;

/// Listener module - bound, listening TCP socket
pub mod listener;

/// Reaper module - supervises and reclaims connection workers
pub mod reaper;

/// Server module - implements the accept loop
pub mod server;

/// Worker module - per-connection command/response loop
pub mod worker;
