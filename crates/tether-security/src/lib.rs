// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Security primitives for Tether: secret redaction, workspace confinement
//! and the child process environment allowlist.

pub mod env;
pub mod redact;
pub mod workspace;

pub use env::EnvAllowlist;
pub use redact::{RedactingWriter, Redactor, redact};
pub use workspace::WorkspaceRoot;
