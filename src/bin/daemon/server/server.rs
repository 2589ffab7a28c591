use super::connection_log::ConnectionLogHandle;
use super::executor::CommandExecutor;
use super::listener::Listener;
use super::reaper::{ReaperHandle, WorkerId};
use super::worker::ConnectionWorker;
use crate::config::DaemonConfig;
use crate::utils::error::Result;
use async_std::channel::Receiver;
use async_std::net::TcpStream;
use futures::FutureExt;
use rexec::protocol::command_limit;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

/// Main daemon server structure that runs the accept loop
pub struct DaemonServer {
    /// Listening socket; only the accept loop touches it
    listener: Listener,
    /// Starts a worker for every accepted connection
    dispatcher: Dispatcher,
}

/// State needed to hand a connection to a new worker
struct Dispatcher {
    /// Command runner shared by every worker
    executor: Arc<CommandExecutor>,
    /// Connection log handed to each worker
    log: ConnectionLogHandle,
    /// Supervisor that starts and reclaims workers
    reaper: ReaperHandle,
    /// Longest command a worker accepts
    command_limit: usize,
    /// Last worker identifier handed out
    last_worker: u64,
}

impl DaemonServer {
    /// Create a new daemon server instance
    ///
    /// Binds and starts listening immediately, so setup failures surface here.
    ///
    /// # Arguments
    /// * `config` - Daemon configuration
    /// * `log` - Connection log handle
    /// * `reaper` - Worker supervisor handle
    ///
    /// # Returns
    /// * `Result<DaemonServer>` - A new daemon server instance or a setup error
    pub fn new(config: &DaemonConfig, log: ConnectionLogHandle, reaper: ReaperHandle) -> Result<Self> {
        let listener = Listener::bind(config.socket_address(), config.backlog)?;
        let executor = CommandExecutor::new(config.shell.clone(), config.response_capacity);

        Ok(DaemonServer {
            listener,
            dispatcher: Dispatcher {
                executor: Arc::new(executor),
                log,
                reaper,
                command_limit: command_limit(config.command_capacity),
                last_worker: 0,
            },
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// Run the accept loop until shutdown or a fatal accept error
    ///
    /// Each accepted connection is handed to a new worker and the loop goes
    /// straight back to accepting; it never waits for a worker.
    ///
    /// # Arguments
    /// * `shutdown_rx` - Receiver for shutdown signal
    ///
    /// # Returns
    /// * `Result<()>` - Ok after shutdown, or the fatal accept error
    pub async fn run(&mut self, shutdown_rx: Receiver<()>) -> Result<()> {
        let listener = &self.listener;
        let dispatcher = &mut self.dispatcher;

        accept_loop(
            move || listener.accept(),
            &shutdown_rx,
            |stream, peer| dispatcher.dispatch(stream, peer),
        )
        .await
    }
}

/// Accept connections and dispatch them until shutdown or a fatal error
pub(crate) async fn accept_loop<S, A, Fut, D>(
    mut accept: A,
    shutdown_rx: &Receiver<()>,
    mut dispatch: D,
) -> Result<()>
where
    A: FnMut() -> Fut,
    Fut: Future<Output = Result<(S, SocketAddr)>>,
    D: FnMut(S, SocketAddr),
{
    loop {
        let accepted = futures::select! {
            accepted = accept().fuse() => Some(accepted),
            _ = shutdown_rx.recv().fuse() => None,
        };

        match accepted {
            Some(Ok((stream, peer))) => dispatch(stream, peer),
            Some(Err(e)) => {
                tracing::error!(error = %e, "Accept failed, stopping server loop");
                return Err(e);
            }
            None => {
                tracing::info!("Shutdown signal received, stopping server loop");
                return Ok(());
            }
        }
    }
}

impl Dispatcher {
    /// Start a worker for a freshly accepted connection
    fn dispatch(&mut self, stream: TcpStream, peer: SocketAddr) {
        self.last_worker += 1;
        let id = WorkerId(self.last_worker);

        let worker = ConnectionWorker::new(
            id,
            stream,
            peer,
            Arc::clone(&self.executor),
            self.log.clone(),
            self.command_limit,
        );
        self.reaper.spawn_worker(id, peer, worker.run());
    }
}
