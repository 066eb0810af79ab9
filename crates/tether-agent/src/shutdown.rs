// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Graceful shutdown coordination with signal handling.
//!
//! Installs handlers for SIGTERM and SIGINT (Ctrl+C), triggering a
//! [`CancellationToken`] that the agent loop monitors. In-flight dispatch
//! tasks are drained before the process exits.

use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Installs signal handlers for SIGTERM and SIGINT.
///
/// Returns a [`CancellationToken`] that is cancelled when either signal is received.
pub fn install_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => {
                            info!("received SIGINT (Ctrl+C), initiating shutdown");
                        }
                        _ = sigterm.recv() => {
                            info!("received SIGTERM, initiating shutdown");
                        }
                        _ = token_clone.cancelled() => return,
                    }
                }
                Err(e) => {
                    error!(error = %e, "failed to install SIGTERM handler; only Ctrl+C stops the daemon");
                    tokio::select! {
                        _ = ctrl_c => info!("received SIGINT (Ctrl+C), initiating shutdown"),
                        _ = token_clone.cancelled() => return,
                    }
                }
            }
        }

        #[cfg(not(unix))]
        {
            tokio::select! {
                _ = ctrl_c => info!("received Ctrl+C, initiating shutdown"),
                _ = token_clone.cancelled() => return,
            }
        }

        token_clone.cancel();
        debug!("shutdown signal handler completed");
    });

    token
}

/// Waits up to `timeout` for in-flight tasks, then aborts the rest.
///
/// Returns how many tasks were still running at the deadline.
pub async fn drain_tasks(tasks: &mut JoinSet<()>, timeout: Duration) -> usize {
    if tasks.is_empty() {
        info!("no in-flight updates to drain");
        return 0;
    }

    info!(count = tasks.len(), "waiting for in-flight updates to complete");
    let drained = tokio::time::timeout(timeout, async {
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result
                && e.is_panic()
            {
                error!(error = %e, "dispatch task panicked");
            }
        }
    })
    .await;

    if drained.is_ok() {
        info!("all in-flight updates drained");
        return 0;
    }

    let remaining = tasks.len();
    warn!(remaining, "drain timeout reached, aborting remaining updates");
    tasks.abort_all();
    while tasks.join_next().await.is_some() {}
    remaining
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn install_signal_handler_returns_token() {
        let token = install_signal_handler();
        assert!(!token.is_cancelled());
        token.cancel();
    }

    #[tokio::test]
    async fn drain_empty_set_returns_immediately() {
        let mut tasks = JoinSet::new();
        assert_eq!(drain_tasks(&mut tasks, Duration::from_millis(10)).await, 0);
    }

    #[tokio::test]
    async fn drain_waits_for_quick_tasks() {
        let mut tasks = JoinSet::new();
        for _ in 0..3 {
            tasks.spawn(async {
                tokio::time::sleep(Duration::from_millis(5)).await;
            });
        }
        assert_eq!(drain_tasks(&mut tasks, Duration::from_secs(5)).await, 0);
        assert!(tasks.is_empty());
    }

    #[tokio::test]
    async fn drain_aborts_stragglers() {
        let mut tasks = JoinSet::new();
        tasks.spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        tasks.spawn(async {});
        let remaining = drain_tasks(&mut tasks, Duration::from_millis(50)).await;
        assert_eq!(remaining, 1);
        assert!(tasks.is_empty());
    }
}
