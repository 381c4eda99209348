use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::credentials;
use crate::session::SessionStore;
use crate::workdir::sweep_stale;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub sessions_evicted: usize,
    pub artifacts_removed: usize,
}

/// Evict idle sessions (and their credential files), then clear stale
/// entries from the scratch roots.
pub async fn run_sweep(store: &SessionStore, roots: &[PathBuf], stale_age: Duration) -> SweepReport {
    let evicted = store.sweep_expired().await;
    for session in &evicted {
        if let Some(path) = &session.credential_file {
            credentials::remove(path).await;
        }
    }

    let keep: HashSet<PathBuf> = store.credential_files().await.into_iter().collect();
    let mut artifacts_removed = 0;
    for root in roots {
        match sweep_stale(root, stale_age, &keep) {
            Ok(count) => artifacts_removed += count,
            Err(e) => tracing::warn!(root = %root.display(), error = %e, "stale artifact sweep failed"),
        }
    }

    SweepReport {
        sessions_evicted: evicted.len(),
        artifacts_removed,
    }
}

pub fn spawn_maintenance(
    store: SessionStore,
    roots: Vec<PathBuf>,
    every: Duration,
    stale_age: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick fires immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let report = run_sweep(&store, &roots, stale_age).await;
                    tracing::info!(
                        sessions_evicted = report.sessions_evicted,
                        artifacts_removed = report.artifacts_removed,
                        "maintenance sweep finished"
                    );
                }
            }
        }
        tracing::debug!("maintenance task stopped");
    })
}
