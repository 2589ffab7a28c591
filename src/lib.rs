//! rexec - remote shell command execution over TCP
//!
//! This crate holds the pieces shared by the `rexecd` daemon and the `rexec`
//! client. Both binaries speak the same sentinel-delimited text protocol
//! defined in [`protocol`].

/// Wire protocol module - sentinel framing, capacities and helpers
pub mod protocol;

/// Protocol tests module
#[cfg(test)]
mod protocol_tests;
