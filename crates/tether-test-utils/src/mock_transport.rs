// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock transport for deterministic testing.
//!
//! `MockTransport` implements `Transport` with injectable inbound updates
//! and captured outbound messages for assertion in tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use tether_core::{
    AdapterType, HealthStatus, InboundUpdate, OutboundMessage, PluginAdapter, TetherError,
    Transport, UpdateContent,
};

/// A mock transport for testing.
///
/// Clones share their queues, so a test can keep one handle while the
/// agent loop owns another.
#[derive(Clone, Default)]
pub struct MockTransport {
    inbound: Arc<Mutex<VecDeque<InboundUpdate>>>,
    sent: Arc<Mutex<Vec<OutboundMessage>>>,
    notify: Arc<Notify>,
    sent_notify: Arc<Notify>,
    closed: Arc<AtomicBool>,
    fail_sends: Arc<AtomicBool>,
    connects: Arc<AtomicUsize>,
    shutdowns: Arc<AtomicUsize>,
}

/// A text update from `user_id` in `chat_id`.
pub fn text_update(update_id: i64, user_id: i64, chat_id: i64, text: &str) -> InboundUpdate {
    InboundUpdate {
        update_id,
        user_id: Some(user_id),
        chat_id: Some(chat_id),
        content: UpdateContent::Text(text.to_string()),
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an update. The next call to `receive()` returns it.
    pub async fn inject(&self, update: InboundUpdate) {
        self.inbound.lock().await.push_back(update);
        self.notify.notify_one();
    }

    pub async fn inject_text(&self, update_id: i64, user_id: i64, chat_id: i64, text: &str) {
        self.inject(text_update(update_id, user_id, chat_id, text))
            .await;
    }

    /// Make `receive()` fail once the queue is drained, ending the loop.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Make every later `send()` fail.
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub async fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().await.clone()
    }

    pub async fn sent_texts(&self) -> Vec<String> {
        self.sent.lock().await.iter().map(|m| m.text.clone()).collect()
    }

    /// Wait until at least `count` messages were sent, or `timeout` passes.
    /// Returns whatever was sent by then.
    pub async fn wait_for_sent(&self, count: usize, timeout: Duration) -> Vec<OutboundMessage> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.sent_notify.notified();
            {
                let sent = self.sent.lock().await;
                if sent.len() >= count {
                    return sent.clone();
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.sent().await;
            }
        }
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PluginAdapter for MockTransport {
    fn name(&self) -> &str {
        "mock-transport"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Transport
    }

    async fn health_check(&self) -> Result<HealthStatus, TetherError> {
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), TetherError> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&mut self) -> Result<(), TetherError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, msg: OutboundMessage) -> Result<(), TetherError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TetherError::transport("mock send failure", None));
        }
        self.sent.lock().await.push(msg);
        self.sent_notify.notify_waiters();
        Ok(())
    }

    async fn receive(&self) -> Result<InboundUpdate, TetherError> {
        loop {
            {
                let mut queue = self.inbound.lock().await;
                if let Some(update) = queue.pop_front() {
                    return Ok(update);
                }
            }
            if self.closed.load(Ordering::SeqCst) {
                return Err(TetherError::transport("mock transport closed", None));
            }
            self.notify.notified().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn injected_updates_are_received_in_order() {
        let transport = MockTransport::new();
        transport.inject_text(1, 10, 20, "/status").await;
        transport.inject_text(2, 10, 20, "/help").await;

        assert_eq!(transport.receive().await.unwrap().update_id, 1);
        assert_eq!(transport.receive().await.unwrap().update_id, 2);
    }

    #[tokio::test]
    async fn receive_waits_for_injection() {
        let transport = MockTransport::new();
        let handle = transport.clone();
        let recv = tokio::spawn(async move { handle.receive().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        transport.inject_text(7, 1, 1, "hi").await;
        let update = recv.await.unwrap().unwrap();
        assert_eq!(update.text(), Some("hi"));
    }

    #[tokio::test]
    async fn closed_transport_errors_after_draining() {
        let transport = MockTransport::new();
        transport.inject_text(1, 1, 1, "last").await;
        transport.close();
        assert!(transport.receive().await.is_ok());
        assert!(transport.receive().await.is_err());
    }

    #[tokio::test]
    async fn sent_messages_are_captured() {
        let transport = MockTransport::new();
        transport.send(OutboundMessage::new(5, "one")).await.unwrap();
        let sent = transport.wait_for_sent(1, Duration::from_secs(1)).await;
        assert_eq!(sent, vec![OutboundMessage::new(5, "one")]);

        transport.fail_sends(true);
        assert!(transport.send(OutboundMessage::new(5, "two")).await.is_err());
        assert_eq!(transport.sent_texts().await, vec!["one".to_string()]);
    }
}
