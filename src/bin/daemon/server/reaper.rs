//! Child Reaper Module
//!
//! Supervises connection workers. Every worker runs on its own task behind
//! an unwind boundary and, as its last action, reports how it ended. The
//! reaper task collects those reports and releases what is left of each
//! worker, so finished workers never pile up and the accept loop never
//! waits on any of them.

use super::connection_log::{ConnectionEvent, ConnectionLogHandle, LogEntry};
use super::worker::DisconnectReason;
use async_std::channel::{self, Receiver, Sender};
use async_std::task::{self, JoinHandle};
use futures::FutureExt;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Opaque worker identifier, unique for the lifetime of the daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub u64);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Messages received by the reaper task
enum ReaperEvent {
    /// Sent by the accept loop right after the worker task was spawned
    Spawned {
        id: WorkerId,
        peer: SocketAddr,
        handle: JoinHandle<()>,
    },
    /// Sent by the worker task as its final action
    Finished {
        id: WorkerId,
        peer: SocketAddr,
        reason: DisconnectReason,
    },
}

/// Worker counters shared between the reaper and its handles
#[derive(Debug, Default)]
pub struct ReaperStats {
    spawned: AtomicU64,
    reaped: AtomicU64,
}

impl ReaperStats {
    /// Workers started so far
    pub fn spawned(&self) -> u64 {
        self.spawned.load(Ordering::SeqCst)
    }

    /// Workers fully reclaimed so far
    pub fn reaped(&self) -> u64 {
        self.reaped.load(Ordering::SeqCst)
    }

    /// Workers started but not yet reclaimed
    pub fn live(&self) -> u64 {
        self.spawned().saturating_sub(self.reaped())
    }
}

/// Cloneable handle used to start supervised workers
#[derive(Debug, Clone)]
pub struct ReaperHandle {
    tx: Sender<ReaperEvent>,
    stats: Arc<ReaperStats>,
}

impl fmt::Debug for ReaperEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReaperEvent::Spawned { id, peer, .. } => write!(f, "Spawned({id}, {peer})"),
            ReaperEvent::Finished { id, reason, .. } => write!(f, "Finished({id}, {reason})"),
        }
    }
}

impl ReaperHandle {
    /// Start a worker on its own task and register it for reaping
    ///
    /// A panic inside `worker` is caught at the task boundary and reported
    /// as [`DisconnectReason::Panicked`]; it never reaches the listener or
    /// other workers.
    ///
    /// # Arguments
    /// * `id` - Identifier of the new worker
    /// * `peer` - Address of the connected client
    /// * `worker` - The worker's session future
    pub fn spawn_worker<F>(&self, id: WorkerId, peer: SocketAddr, worker: F)
    where
        F: Future<Output = DisconnectReason> + Send + 'static,
    {
        self.stats.spawned.fetch_add(1, Ordering::SeqCst);

        let tx = self.tx.clone();
        let handle = task::spawn(async move {
            let reason = AssertUnwindSafe(worker)
                .catch_unwind()
                .await
                .unwrap_or(DisconnectReason::Panicked);

            if tx
                .try_send(ReaperEvent::Finished { id, peer, reason })
                .is_err()
            {
                tracing::debug!(worker = %id, "Reaper gone, completion not reported");
            }
        });

        if self
            .tx
            .try_send(ReaperEvent::Spawned { id, peer, handle })
            .is_err()
        {
            tracing::warn!(worker = %id, "Reaper gone, worker runs unsupervised");
        }
    }

    /// Shared worker counters
    pub fn stats(&self) -> Arc<ReaperStats> {
        Arc::clone(&self.stats)
    }
}

/// Entry for a worker that is still running
struct TrackedWorker {
    peer: SocketAddr,
    started: Instant,
    handle: JoinHandle<()>,
}

/// Reaper task state
pub struct ChildReaper {
    rx: Receiver<ReaperEvent>,
    workers: HashMap<WorkerId, TrackedWorker>,
    /// Workers whose completion arrived before their registration
    finished_early: HashSet<WorkerId>,
    stats: Arc<ReaperStats>,
    log: ConnectionLogHandle,
}

impl ChildReaper {
    /// Start the reaper task
    ///
    /// # Arguments
    /// * `log` - Connection log, used to record workers that died by panic
    ///
    /// # Returns
    /// * The handle used to spawn workers, and the reaper task. The task ends
    ///   once every handle and every worker has gone away.
    pub fn spawn(log: ConnectionLogHandle) -> (ReaperHandle, JoinHandle<()>) {
        let (tx, rx) = channel::unbounded();
        let stats = Arc::new(ReaperStats::default());

        let reaper = ChildReaper {
            rx,
            workers: HashMap::new(),
            finished_early: HashSet::new(),
            stats: Arc::clone(&stats),
            log,
        };

        (ReaperHandle { tx, stats }, task::spawn(reaper.run()))
    }

    async fn run(mut self) {
        while let Ok(event) = self.rx.recv().await {
            self.handle_event(event);
            // Completions can queue up faster than this task is woken
            while let Ok(event) = self.rx.try_recv() {
                self.handle_event(event);
            }
        }
        tracing::debug!(unreaped = self.workers.len(), "Reaper stopped");
    }

    fn handle_event(&mut self, event: ReaperEvent) {
        match event {
            ReaperEvent::Spawned { id, peer, handle } => {
                if self.finished_early.remove(&id) {
                    drop(handle);
                    self.reclaimed(id, peer, None);
                } else {
                    self.workers.insert(
                        id,
                        TrackedWorker {
                            peer,
                            started: Instant::now(),
                            handle,
                        },
                    );
                }
            }
            ReaperEvent::Finished { id, peer, reason } => {
                if reason == DisconnectReason::Panicked {
                    tracing::error!(worker = %id, peer = %peer, "Worker panicked");
                    self.log
                        .append(LogEntry::now(peer, ConnectionEvent::Disconnected));
                }

                match self.workers.remove(&id) {
                    Some(tracked) => {
                        // The task has released its connection; dropping the
                        // handle detaches the little that remains of it
                        drop(tracked.handle);
                        self.reclaimed(id, tracked.peer, Some(tracked.started));
                    }
                    None => {
                        self.finished_early.insert(id);
                    }
                }
            }
        }
    }

    fn reclaimed(&mut self, id: WorkerId, peer: SocketAddr, started: Option<Instant>) {
        self.stats.reaped.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(
            worker = %id,
            peer = %peer,
            lifetime_ms = started.map(|s| s.elapsed().as_millis() as u64),
            live = self.stats.live(),
            "Worker reaped"
        );
    }
}
