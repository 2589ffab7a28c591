//! Tracing Utilities Module
//!
//! This module contains tracing functionality for the rexec daemon,
//! including console output and an optional copy written to a file.

use crate::utils::error::{RexecError, Result, SetupStage};
use std::fs::OpenOptions;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initializes the tracing subscriber with console and optional file output
///
/// The returned guard flushes the file writer when dropped, so the caller
/// keeps it alive for the duration of the program.
///
/// # Arguments
/// * `trace_file` - File receiving a non-ANSI copy of the trace, if any
pub fn setup_tracing(trace_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let stdout_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_ansi(true)
        .with_filter(env_filter.clone());

    let (file_layer, guard) = match trace_file {
        Some(path) => {
            let file = OpenOptions::new()
                .append(true)
                .create(true)
                .open(path)
                .map_err(|e| RexecError::setup(SetupStage::LogFile, e))?;

            // Non-blocking writer so tracing never stalls a worker on disk I/O
            let (non_blocking, guard) = tracing_appender::non_blocking(file);
            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(env_filter);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stdout_layer)
        .try_init()
        .map_err(|e| RexecError::Config(format!("cannot install tracing subscriber: {}", e)))?;

    Ok(guard)
}
