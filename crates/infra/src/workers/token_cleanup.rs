use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::tokens::{TokenLifecycleManager, TokenStore};

/// Handle to stop and join the cleanup task.
#[derive(Debug)]
pub struct CleanupHandle {
    shutdown: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

impl CleanupHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.join.await {
            warn!(error = %e, "token cleanup worker ended abnormally");
        }
    }
}

/// Periodic retention sweep over refresh-token records.
///
/// - Runs `cleanup_expired` once per `interval`, first tick after one interval
/// - Failures are logged; the loop keeps going
/// - Stops when the handle is shut down or dropped
#[derive(Debug)]
pub struct TokenCleanupWorker;

impl TokenCleanupWorker {
    pub fn spawn<S>(manager: Arc<TokenLifecycleManager<S>>, interval: Duration) -> CleanupHandle
    where
        S: TokenStore + 'static,
    {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let join = tokio::spawn(worker_loop(manager, interval, shutdown_rx));
        CleanupHandle {
            shutdown: shutdown_tx,
            join,
        }
    }
}

async fn worker_loop<S>(
    manager: Arc<TokenLifecycleManager<S>>,
    interval: Duration,
    mut shutdown_rx: oneshot::Receiver<()>,
) where
    S: TokenStore,
{
    let start = tokio::time::Instant::now() + interval;
    let mut ticker = tokio::time::interval_at(start, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(interval_secs = interval.as_secs(), "token cleanup worker started");

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => break,
            _ = ticker.tick() => {
                match manager.cleanup_expired().await {
                    Ok(deleted) => debug!(deleted, "token cleanup pass finished"),
                    Err(e) => warn!(error = %e, "token cleanup pass failed"),
                }
            }
        }
    }

    info!("token cleanup worker stopped");
}
