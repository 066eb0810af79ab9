// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Update loop and command handling for Tether.
//!
//! The [`AgentLoop`] is the central coordinator that:
//! - Receives updates from the active transport
//! - Claims each update id in storage so retries and replays are dropped
//! - Dispatches updates concurrently, serialized per identity
//! - Forwards job notifications to the transport
//! - Handles graceful shutdown

pub mod browse;
pub mod chat;
pub mod command;
pub mod confirm;
pub mod dispatch;
pub mod shutdown;

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tether_core::{
    Identity, InboundUpdate, OutboundMessage, PluginAdapter, TetherError, Transport,
};
use tether_storage::{Database, queries};
use tokio::sync::{Mutex, OwnedMutexGuard, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub use browse::Browser;
pub use chat::{ChatOutcome, ChatSessionStore};
pub use command::Command;
pub use confirm::{Clock, ConfirmationManager, Issued, ManualClock, SystemClock};
pub use dispatch::Dispatcher;

/// How long in-flight updates may run after shutdown begins.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);
/// Grace given to the active job when shutdown cancels it.
pub const JOB_SHUTDOWN_GRACE: Duration = Duration::from_secs(15);
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Pulls updates from a transport and hands them to the [`Dispatcher`].
pub struct AgentLoop {
    transport: Box<dyn Transport>,
    dispatcher: Arc<Dispatcher>,
    confirmations: ConfirmationManager,
    db: Database,
    notifications: Option<mpsc::Receiver<OutboundMessage>>,
    max_event_rows: u32,
    drain_timeout: Duration,
    sweep_interval: Duration,
}

impl AgentLoop {
    pub fn new(
        transport: Box<dyn Transport>,
        dispatcher: Dispatcher,
        confirmations: ConfirmationManager,
        db: Database,
    ) -> Self {
        Self {
            transport,
            dispatcher: Arc::new(dispatcher),
            confirmations,
            db,
            notifications: None,
            max_event_rows: 5000,
            drain_timeout: DRAIN_TIMEOUT,
            sweep_interval: SWEEP_INTERVAL,
        }
    }

    /// Job notices produced by the runner, delivered through the transport.
    pub fn with_notifications(
        mut self,
        rx: mpsc::Receiver<OutboundMessage>,
        max_event_rows: u32,
    ) -> Self {
        self.notifications = Some(rx);
        self.max_event_rows = max_event_rows;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Connects the transport and processes updates until `cancel` fires or
    /// the transport's update sequence ends.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), TetherError> {
        let AgentLoop {
            mut transport,
            dispatcher,
            confirmations,
            db,
            notifications,
            max_event_rows,
            drain_timeout,
            sweep_interval,
        } = self;

        transport.connect().await?;
        let transport: Arc<dyn Transport> = Arc::from(transport);
        info!(transport = transport.name(), "agent loop running");

        let background = cancel.child_token();
        let sweeper = confirmations.spawn_sweeper(sweep_interval, background.clone());
        let forwarder = notifications
            .map(|rx| spawn_forwarder(rx, transport.clone(), db.clone(), max_event_rows));

        let locks = IdentityLocks::default();
        let mut tasks = JoinSet::new();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("shutdown signal received, stopping agent loop");
                    break;
                }
                received = transport.receive() => match received {
                    Ok(update) => {
                        if claim(&db, &update).await {
                            let permit = update.identity().map(|id| locks.permit(id));
                            tasks.spawn(process(
                                update,
                                permit,
                                dispatcher.clone(),
                                transport.clone(),
                            ));
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "transport stopped delivering updates");
                        break;
                    }
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined
                        && e.is_panic()
                    {
                        error!(error = %e, "dispatch task panicked");
                    }
                }
            }
        }

        shutdown::drain_tasks(&mut tasks, drain_timeout).await;
        dispatcher.runner().shutdown(JOB_SHUTDOWN_GRACE).await;
        background.cancel();
        let _ = sweeper.await;
        if let Some(forwarder) = forwarder {
            forwarder.abort();
        }
        if let Err(e) = transport.shutdown().await {
            warn!(error = %e, "transport shutdown failed");
        }

        info!("agent loop stopped");
        Ok(())
    }
}

/// Claims `update` in storage. Already-claimed ids are dropped; a storage
/// failure drops the update rather than risk handling it twice.
async fn claim(db: &Database, update: &InboundUpdate) -> bool {
    match queries::offsets::claim_update(db, update.update_id).await {
        Ok(true) => true,
        Ok(false) => {
            debug!(update_id = update.update_id, "update already claimed, skipping");
            false
        }
        Err(e) => {
            error!(update_id = update.update_id, error = %e, "failed to claim update, skipping");
            false
        }
    }
}

/// Serializes updates per identity. An entry lives only while some task
/// holds or waits on it, so senders that come and go leave nothing behind.
#[derive(Clone, Default)]
struct IdentityLocks {
    map: Arc<DashMap<Identity, Arc<Mutex<()>>>>,
}

impl IdentityLocks {
    fn permit(&self, identity: Identity) -> IdentityPermit {
        let lock = self.map.entry(identity).or_default().clone();
        IdentityPermit {
            identity,
            lock: Some(lock),
            locks: self.clone(),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.map.len()
    }
}

/// A claim on one identity's lock; drops the map entry with the last claim.
struct IdentityPermit {
    identity: Identity,
    lock: Option<Arc<Mutex<()>>>,
    locks: IdentityLocks,
}

impl IdentityPermit {
    async fn acquire(&self) -> Option<OwnedMutexGuard<()>> {
        match &self.lock {
            Some(lock) => Some(Arc::clone(lock).lock_owned().await),
            None => None,
        }
    }
}

impl Drop for IdentityPermit {
    fn drop(&mut self) {
        drop(self.lock.take());
        // The shard lock orders this against a concurrent `permit`.
        self.locks
            .map
            .remove_if(&self.identity, |_, lock| Arc::strong_count(lock) == 1);
    }
}

async fn process(
    update: InboundUpdate,
    permit: Option<IdentityPermit>,
    dispatcher: Arc<Dispatcher>,
    transport: Arc<dyn Transport>,
) {
    let _guard = match &permit {
        Some(permit) => permit.acquire().await,
        None => None,
    };
    if let Some(reply) = dispatcher.handle(&update).await
        && let Err(e) = transport.send(reply).await
    {
        warn!(update_id = update.update_id, error = %e, "failed to send reply");
    }
}

fn spawn_forwarder(
    mut rx: mpsc::Receiver<OutboundMessage>,
    transport: Arc<dyn Transport>,
    db: Database,
    max_event_rows: u32,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = transport.send(msg).await {
                warn!(error = %e, "failed to deliver job notification");
                if let Err(e) = queries::events::append(
                    &db,
                    None,
                    "notify_error",
                    &e.to_string(),
                    max_event_rows,
                )
                .await
                {
                    warn!(error = %e, "failed to record notification failure");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn identity_locks_forget_idle_senders() {
        let locks = IdentityLocks::default();
        for user_id in 0..1000 {
            let permit = locks.permit(Identity::new(user_id, 1));
            let _guard = permit.acquire().await;
        }
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn identity_lock_survives_while_claimed() {
        let locks = IdentityLocks::default();
        let id = Identity::new(1, 2);
        let first = locks.permit(id);
        let second = locks.permit(id);
        let guard = first.acquire().await;
        assert!(
            tokio::time::timeout(Duration::from_millis(50), second.acquire())
                .await
                .is_err()
        );

        drop(guard);
        drop(first);
        assert_eq!(locks.len(), 1);
        assert!(second.acquire().await.is_some());
        drop(second);
        assert_eq!(locks.len(), 0);
    }
}
