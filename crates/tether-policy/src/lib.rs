// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Command authorization for Tether.
//!
//! A [`RuleSet`] maps identities to allow/deny pattern sets, with a default
//! block for identities that have no rule of their own. [`PolicyEngine`]
//! evaluates it and supports atomic reloads.

pub mod engine;
pub mod rules;

pub use engine::{Decision, PolicyEngine};
pub use rules::{PatternSet, PolicyRule, RuleSet, WILDCARD, normalize_command};
