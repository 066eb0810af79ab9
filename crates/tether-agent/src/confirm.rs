// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Single-use confirmation nonces for mutating commands.
//!
//! A pending confirmation binds a nonce to an identity and the [`Action`]
//! it authorizes. Consumption is atomic in storage, so two concurrent
//! `/confirm`s of the same nonce see exactly one success.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::RngCore;
use rand::rngs::OsRng;
use tether_core::{Action, ConfirmationFailure, Identity, TetherError};
use tether_storage::{ConfirmationRecord, Database, format_timestamp, queries};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How long an expired row is kept so `/confirm` can still say "expired".
pub const SWEEP_GRACE: Duration = Duration::from_secs(3600);

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let (Ok(mut now), Ok(by)) = (self.now.lock(), chrono::Duration::from_std(by)) {
            *now += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.lock().map(|now| *now).unwrap_or_else(|_| Utc::now())
    }
}

/// A freshly issued confirmation.
#[derive(Debug, Clone)]
pub struct Issued {
    pub nonce: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct ConfirmationManager {
    db: Database,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl ConfirmationManager {
    pub fn new(db: Database, ttl: Duration) -> Self {
        Self {
            db,
            ttl,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a nonce for `action`, replacing any unconsumed confirmation
    /// the identity still holds.
    pub async fn issue(&self, identity: Identity, action: &Action) -> Result<Issued, TetherError> {
        self.sweep_quietly().await;

        let now = self.clock.now();
        let ttl = chrono::Duration::from_std(self.ttl)
            .map_err(|e| TetherError::Config(format!("confirmation ttl out of range: {e}")))?;
        let expires_at = now + ttl;
        let nonce = new_nonce();
        let payload = serde_json::to_string(action)
            .map_err(|e| TetherError::Internal(format!("encode confirmation: {e}")))?;

        let superseded = queries::confirmations::issue(
            &self.db,
            ConfirmationRecord {
                nonce: nonce.clone(),
                identity,
                action: payload,
                created_at: format_timestamp(now),
                expires_at: format_timestamp(expires_at),
                consumed_at: None,
            },
        )
        .await?;
        debug!(%identity, command = action.command_name(), superseded, "confirmation issued");
        Ok(Issued { nonce, expires_at })
    }

    /// Consume `nonce` for `identity`, returning the action it authorized.
    ///
    /// Errors with [`TetherError::Confirmation`] when the nonce is unknown,
    /// already used, expired, or bound to another identity. Failures leave
    /// the confirmation as it was.
    pub async fn consume(&self, identity: Identity, nonce: &str) -> Result<Action, TetherError> {
        let nonce = nonce.trim().to_ascii_lowercase();
        if !is_well_formed(&nonce) {
            return Err(TetherError::Confirmation(ConfirmationFailure::NotFound));
        }
        self.sweep_quietly().await;

        let now = format_timestamp(self.clock.now());
        let payload = queries::confirmations::consume(&self.db, identity, &nonce, now)
            .await?
            .map_err(TetherError::Confirmation)?;
        serde_json::from_str(&payload)
            .map_err(|e| TetherError::Internal(format!("corrupt confirmation payload: {e}")))
    }

    /// Delete consumed confirmations and those expired for longer than
    /// [`SWEEP_GRACE`].
    pub async fn sweep(&self) -> Result<usize, TetherError> {
        let grace = chrono::Duration::from_std(SWEEP_GRACE).unwrap_or_else(|_| chrono::Duration::zero());
        let cutoff = format_timestamp(self.clock.now() - grace);
        queries::confirmations::sweep(&self.db, cutoff).await
    }

    async fn sweep_quietly(&self) {
        if let Err(e) = self.sweep().await {
            warn!(error = %e, "confirmation sweep failed");
        }
    }

    /// Sweep every `interval` until `cancel` fires.
    pub fn spawn_sweeper(&self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => manager.sweep_quietly().await,
                }
            }
        })
    }
}

/// 128 random bits, hex encoded.
fn new_nonce() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn is_well_formed(nonce: &str) -> bool {
    nonce.len() == 32 && nonce.bytes().all(|b| b.is_ascii_hexdigit())
}
