//! Utilities Module
//!
//! This module contains shared utility functionality for the rexec daemon.

pub mod error;
pub mod signals;
pub mod tracing;
