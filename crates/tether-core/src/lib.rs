// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Tether remote-control plane.
//!
//! This crate provides the error taxonomy, the domain types that flow between
//! transport, dispatcher and runner, and the adapter traits the transports and
//! chat backends implement.

pub mod error;
pub mod traits;
pub mod types;

pub use error::{ConfirmationFailure, TetherError};
pub use types::{
    Action, AdapterType, ChatReply, ChatRequest, HealthStatus, Identity, InboundUpdate, JobId,
    JobStatus, OutboundMessage, UpdateContent,
};

pub use traits::{ChatBackend, PluginAdapter, Transport};
