// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Tether integration tests.
//!
//! Provides mock adapters and test harness infrastructure for fast,
//! deterministic, CI-runnable tests without Telegram or the Codex CLI.
//!
//! # Components
//!
//! - [`MockTransport`] - Mock transport with update injection and reply capture
//! - [`MockChatBackend`] - Mock chat backend with queued replies
//! - [`TestHarness`] - The dispatch stack over temp storage and a fake Codex

pub mod harness;
pub mod mock_chat;
pub mod mock_transport;

pub use harness::{OWNER, TestHarness, nonce_from};
pub use mock_chat::MockChatBackend;
pub use mock_transport::{MockTransport, text_update};
