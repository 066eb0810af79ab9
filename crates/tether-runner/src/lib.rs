// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Codex execution for Tether.
//!
//! [`JobRunner`] owns the single job slot and the termination path shared by
//! timeouts and `/cancel`. [`CodexChatBackend`] runs conversational turns.
//! Both spawn argv-only children in their own process group with a filtered
//! environment, inside the workspace root.

pub mod argv;
pub mod chat;
pub mod jsonl;
pub mod process;
pub mod runner;

pub use chat::CodexChatBackend;
pub use runner::{ActiveJob, JobRunner, JobSpec, RunnerConfig};
