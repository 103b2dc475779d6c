//! Stale-session reaper
//!
//! Periodically fails in-flight files that stopped receiving chunks, evicts terminal
//! sessions past their retention, forgets old completed-file locators and purges dead
//! download tokens.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use upsync_core::EngineConfig;

use crate::registry::SessionRegistry;
use crate::tokens::TokenIssuer;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReapReport {
    pub failed_files: usize,
    pub evicted_sessions: usize,
    pub pruned_files: usize,
    pub purged_tokens: usize,
}

pub(crate) fn secs(value: u64) -> chrono::Duration {
    chrono::Duration::try_seconds(i64::try_from(value).unwrap_or(i64::MAX))
        .unwrap_or(chrono::Duration::MAX)
}

/// One reaper pass at `now`.
pub async fn reap_once(
    registry: &SessionRegistry,
    tokens: &TokenIssuer,
    config: &EngineConfig,
    now: DateTime<Utc>,
) -> ReapReport {
    let inactivity = secs(config.upload_inactivity_timeout_secs);
    let retention = secs(config.session_retention_secs);
    let mut report = ReapReport::default();

    for handle in registry.handles().await {
        match handle.reap_stale(now, inactivity).await {
            Ok(failed) => report.failed_files += failed,
            Err(e) => {
                error!(session_id = %handle.session_id, error = %e, "Stale session check failed");
                continue;
            }
        }

        let expired = match handle.snapshot().await {
            Ok(snapshot) => {
                snapshot.session.is_terminal()
                    && snapshot
                        .session
                        .completed_at
                        .is_some_and(|at| now - at > retention)
            }
            Err(_) => false,
        };
        if expired && registry.evict(handle.session_id).await {
            report.evicted_sessions += 1;
        }
    }

    if config.file_retention_secs > 0 {
        if let Some(cutoff) = now.checked_sub_signed(secs(config.file_retention_secs)) {
            report.pruned_files = registry.files().prune_completed_before(cutoff);
        }
    }
    report.purged_tokens = tokens.purge(now, retention).await;

    if report != ReapReport::default() {
        info!(
            failed_files = report.failed_files,
            evicted_sessions = report.evicted_sessions,
            pruned_files = report.pruned_files,
            purged_tokens = report.purged_tokens,
            "Reaper pass finished"
        );
    }
    report
}

pub struct ReaperHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl ReaperHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.task.await;
    }
}

/// Start the periodic reaper. Returns None when the interval is 0.
pub fn spawn_reaper(
    registry: Arc<SessionRegistry>,
    tokens: Arc<TokenIssuer>,
    config: EngineConfig,
) -> Option<ReaperHandle> {
    let reap_interval = config.reap_interval()?;
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

    let task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(reap_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = reap_once(&registry, &tokens, &config, Utc::now()).await;
                    debug!(?report, "Reaper tick");
                }
                _ = shutdown_rx.recv() => break,
            }
        }
        info!("Stale session reaper stopped");
    });

    Some(ReaperHandle { shutdown_tx, task })
}
