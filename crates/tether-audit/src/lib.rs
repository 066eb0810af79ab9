// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Append-only structured audit trail for Tether.
//!
//! Every component records [`AuditEvent`]s through a shared [`AuditLog`].
//! Details are redacted before they reach disk. The log is never read back
//! at runtime.

pub mod event;
pub mod log;

pub use event::{AuditEvent, AuditEventType};
pub use log::{AuditLog, read_events};
