// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-identity conversational sessions.

use std::sync::Arc;
use std::time::Duration;

use tether_core::{ChatBackend, ChatRequest, Identity, TetherError};
use tether_storage::{Database, queries};
use tracing::{debug, warn};

/// Result of one completed turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatOutcome {
    pub thread_id: String,
    /// Assistant text, possibly empty.
    pub text: String,
    /// Whether an existing thread was resumed.
    pub resumed: bool,
}

/// Binds each identity to one tool conversation thread and keeps its history.
#[derive(Clone)]
pub struct ChatSessionStore {
    db: Database,
    backend: Arc<dyn ChatBackend>,
    turn_timeout: Duration,
}

impl ChatSessionStore {
    pub fn new(db: Database, backend: Arc<dyn ChatBackend>, turn_timeout: Duration) -> Self {
        Self {
            db,
            backend,
            turn_timeout,
        }
    }

    pub fn turn_timeout(&self) -> Duration {
        self.turn_timeout
    }

    /// The thread currently bound to `identity`, if any.
    pub async fn thread(&self, identity: Identity) -> Result<Option<String>, TetherError> {
        Ok(queries::chat::get_session(&self.db, identity)
            .await?
            .and_then(|s| s.thread_id))
    }

    /// Run one turn, resuming the identity's thread.
    ///
    /// The backend call is bounded by the turn timeout; on expiry the
    /// future is dropped, which kills the tool, and nothing is written.
    /// Input and output are persisted together once the tool answers.
    pub async fn turn(&self, identity: Identity, input: &str) -> Result<ChatOutcome, TetherError> {
        let thread_id = self.thread(identity).await.map_err(persist_failure)?;
        let resumed = thread_id.is_some();
        let request = ChatRequest {
            identity,
            prompt: input.to_string(),
            thread_id,
        };

        let reply = match tokio::time::timeout(self.turn_timeout, self.backend.turn(request)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(TetherError::ChatTurnFailed(cause))) => {
                return Err(TetherError::ChatTurnFailed(cause));
            }
            Ok(Err(e)) => return Err(TetherError::ChatTurnFailed(e.to_string())),
            Err(_) => {
                warn!(%identity, timeout_secs = self.turn_timeout.as_secs(), "chat turn timed out");
                return Err(TetherError::ChatTurnFailed(format!(
                    "timed out after {}s",
                    self.turn_timeout.as_secs()
                )));
            }
        };

        queries::chat::record_turn(
            &self.db,
            identity,
            input.to_string(),
            reply.text.clone(),
            reply.thread_id.clone(),
        )
        .await
        .map_err(persist_failure)?;
        debug!(%identity, thread_id = %reply.thread_id, resumed, "chat turn recorded");

        Ok(ChatOutcome {
            thread_id: reply.thread_id,
            text: reply.text,
            resumed,
        })
    }

    /// Forget the thread and history. The session row stays.
    pub async fn reset(&self, identity: Identity) -> Result<bool, TetherError> {
        queries::chat::reset(&self.db, identity).await
    }
}

fn persist_failure(e: TetherError) -> TetherError {
    TetherError::ChatTurnFailed(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_test_utils::MockChatBackend;

    const OWNER: Identity = Identity {
        user_id: 123,
        chat_id: 456,
    };

    async fn store(backend: MockChatBackend, timeout: Duration) -> (ChatSessionStore, Database) {
        let db = Database::open_in_memory().await.unwrap();
        (
            ChatSessionStore::new(db.clone(), Arc::new(backend), timeout),
            db,
        )
    }

    #[tokio::test]
    async fn second_turn_resumes_the_thread() {
        let backend = MockChatBackend::new("thr-1").with_replies(["first", "second"]);
        let seen = backend.requests();
        let (store, db) = store(backend, Duration::from_secs(5)).await;

        let one = store.turn(OWNER, "hello").await.unwrap();
        assert!(!one.resumed);
        assert_eq!(one.text, "first");

        let two = store.turn(OWNER, "again").await.unwrap();
        assert!(two.resumed);
        assert_eq!(two.thread_id, "thr-1");

        let requests = seen.lock().unwrap().clone();
        assert_eq!(requests[0].thread_id, None);
        assert_eq!(requests[1].thread_id.as_deref(), Some("thr-1"));
        assert_eq!(queries::chat::history(&db, OWNER, 10).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn timed_out_turn_writes_nothing() {
        let backend = MockChatBackend::new("thr-1")
            .with_replies(["late"])
            .with_delay(Duration::from_secs(10));
        let (store, db) = store(backend, Duration::from_millis(50)).await;

        let err = store.turn(OWNER, "slow").await.unwrap_err();
        assert_eq!(err.to_string(), "chat turn failed: timed out after 0s");
        assert!(queries::chat::history(&db, OWNER, 10).await.unwrap().is_empty());
        assert_eq!(store.thread(OWNER).await.unwrap(), None);
    }

    #[tokio::test]
    async fn backend_errors_become_failed_turns() {
        let backend = MockChatBackend::new("thr-1").failing("model overloaded");
        let (store, _db) = store(backend, Duration::from_secs(5)).await;
        let err = store.turn(OWNER, "hi").await.unwrap_err();
        assert_eq!(err.to_string(), "chat turn failed: model overloaded");
    }

    #[tokio::test]
    async fn unsaved_reply_is_a_failed_turn() {
        let backend = MockChatBackend::new("thr-1").with_replies(["answer"]);
        let (store, db) = store(backend, Duration::from_secs(5)).await;
        db.connection()
            .call(|conn| {
                conn.execute_batch(
                    "CREATE TRIGGER reject_replies BEFORE INSERT ON chat_turns
                     WHEN NEW.role = 'assistant'
                     BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
                )
            })
            .await
            .unwrap();

        let err = store.turn(OWNER, "hi").await.unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("chat turn failed:"), "{message}");
        assert!(message.contains("disk full"), "{message}");
        assert!(queries::chat::history(&db, OWNER, 10).await.unwrap().is_empty());
        assert_eq!(store.thread(OWNER).await.unwrap(), None);
    }

    #[tokio::test]
    async fn reset_forgets_thread_but_keeps_session() {
        let backend = MockChatBackend::new("thr-1").with_replies(["ok"]);
        let (store, db) = store(backend, Duration::from_secs(5)).await;
        store.turn(OWNER, "hello").await.unwrap();

        assert!(store.reset(OWNER).await.unwrap());
        assert_eq!(store.thread(OWNER).await.unwrap(), None);
        assert!(queries::chat::get_session(&db, OWNER).await.unwrap().is_some());
        assert!(queries::chat::history(&db, OWNER, 10).await.unwrap().is_empty());
    }
}
