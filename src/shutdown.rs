//! Shutdown coordination
//!
//! Signal handling plus bounded joins, so a stuck worker can delay
//! shutdown by at most one join timeout.

use std::time::Duration;

use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::timeout;
use tracing::{error, info, warn};

/// Wait for SIGINT or SIGTERM (Ctrl+C off Unix)
pub async fn wait_for_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}

/// Wait up to `limit` for a task, aborting it if it does not finish
///
/// Returns `true` if the task finished on its own.
pub async fn join_bounded<T>(handle: &mut JoinHandle<T>, limit: Duration, what: &str) -> bool {
    match timeout(limit, &mut *handle).await {
        Ok(result) => {
            log_join(result.map(|_| ()), what);
            true
        }
        Err(_) => {
            warn!("{} did not stop within {:?}, aborting", what, limit);
            handle.abort();
            false
        }
    }
}

/// Drain a set of workers, allowing each at most `limit`
///
/// Once one wait times out the remaining workers are aborted. Returns
/// the number of workers that had to be aborted.
pub async fn join_all_bounded(workers: &mut JoinSet<()>, limit: Duration) -> usize {
    loop {
        match timeout(limit, workers.join_next()).await {
            Ok(Some(result)) => log_join(result, "receiver worker"),
            Ok(None) => return 0,
            Err(_) => {
                let stuck = workers.len();
                warn!("{} receiver workers did not stop within {:?}, aborting", stuck, limit);
                workers.abort_all();
                while workers.join_next().await.is_some() {}
                return stuck;
            }
        }
    }
}

/// Report how a joined task ended
pub fn log_join(result: Result<(), JoinError>, what: &str) {
    if let Err(e) = result {
        if e.is_panic() {
            error!("{} panicked: {}", what, e);
        }
    }
}
