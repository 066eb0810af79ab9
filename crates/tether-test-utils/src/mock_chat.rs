// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock chat backend for deterministic testing.
//!
//! `MockChatBackend` implements `ChatBackend` with pre-configured replies,
//! so chat sessions can be exercised without spawning the real tool.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use tether_core::{
    AdapterType, ChatBackend, ChatReply, ChatRequest, HealthStatus, PluginAdapter, TetherError,
};

/// A mock chat backend that returns queued replies.
///
/// Replies are popped from a FIFO queue. When the queue is empty, a default
/// "mock reply" text is returned. A new conversation is assigned the
/// configured thread id; a resumed one keeps the id it was sent.
pub struct MockChatBackend {
    thread_id: String,
    replies: Mutex<VecDeque<String>>,
    delay: Option<Duration>,
    delay_once: bool,
    failure: Option<String>,
    requests: Arc<Mutex<Vec<ChatRequest>>>,
}

impl MockChatBackend {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            replies: Mutex::new(VecDeque::new()),
            delay: None,
            delay_once: false,
            failure: None,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_replies<I, S>(self, replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Ok(mut queue) = self.replies.lock() {
            queue.extend(replies.into_iter().map(Into::into));
        }
        self
    }

    /// Sleep before answering each turn.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Sleep before answering the first turn only.
    pub fn with_first_turn_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self.delay_once = true;
        self
    }

    /// Fail every turn with [`TetherError::ChatTurnFailed`].
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    /// Every request seen so far, shared with the backend.
    pub fn requests(&self) -> Arc<Mutex<Vec<ChatRequest>>> {
        Arc::clone(&self.requests)
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        if let Ok(mut queue) = self.replies.lock() {
            queue.push_back(reply.into());
        }
    }

    fn next_reply(&self) -> String {
        self.replies
            .lock()
            .ok()
            .and_then(|mut queue| queue.pop_front())
            .unwrap_or_else(|| "mock reply".to_string())
    }
}

#[async_trait]
impl PluginAdapter for MockChatBackend {
    fn name(&self) -> &str {
        "mock-chat"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::ChatBackend
    }

    async fn health_check(&self) -> Result<HealthStatus, TetherError> {
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), TetherError> {
        Ok(())
    }
}

#[async_trait]
impl ChatBackend for MockChatBackend {
    async fn turn(&self, request: ChatRequest) -> Result<ChatReply, TetherError> {
        let thread_id = request
            .thread_id
            .clone()
            .unwrap_or_else(|| self.thread_id.clone());
        if let Ok(mut seen) = self.requests.lock() {
            seen.push(request);
        }

        if let Some(delay) = self.delay {
            let first = self.requests.lock().map(|r| r.len() == 1).unwrap_or(false);
            if !self.delay_once || first {
                tokio::time::sleep(delay).await;
            }
        }
        if let Some(message) = &self.failure {
            return Err(TetherError::ChatTurnFailed(message.clone()));
        }

        Ok(ChatReply {
            thread_id,
            text: self.next_reply(),
        })
    }
}
