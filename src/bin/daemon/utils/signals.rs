//! Shutdown signal handling
//!
//! SIGINT and SIGTERM are turned into a single message on an async channel
//! that the accept loop selects on.

use crate::utils::error::{RexecError, Result, SetupStage};
use async_std::channel::{self, Receiver};
use async_std::task;
use futures::StreamExt;
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook_async_std::Signals;

/// Install the shutdown handler
///
/// # Returns
/// * `Result<Receiver<()>>` - Receives one message when a termination signal arrives
pub fn install_shutdown_handler() -> Result<Receiver<()>> {
    let mut signals =
        Signals::new([SIGINT, SIGTERM]).map_err(|e| RexecError::setup(SetupStage::Signals, e))?;
    let handle = signals.handle();
    let (tx, rx) = channel::bounded(1);

    task::spawn(async move {
        if let Some(signal) = signals.next().await {
            tracing::info!(signal, "Termination signal received");
            if tx.send(()).await.is_err() {
                tracing::debug!("Server loop already stopped, shutdown request not delivered");
            }
        }
        handle.close();
    });

    Ok(rx)
}
