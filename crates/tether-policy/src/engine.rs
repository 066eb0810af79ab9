// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Policy evaluation over an atomically swappable rule set.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tether_core::{Identity, TetherError};
use tracing::{debug, info};

use crate::rules::{RuleSet, normalize_command};

/// Outcome of a policy check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        self == Decision::Allow
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Allow => write!(f, "allow"),
            Decision::Deny => write!(f, "deny"),
        }
    }
}

/// Decides which identity may run which command.
///
/// Readers take a snapshot of the current [`RuleSet`]; `reload` swaps it
/// without blocking them.
pub struct PolicyEngine {
    rules: ArcSwap<RuleSet>,
    path: Option<PathBuf>,
}

impl PolicyEngine {
    pub fn new(rules: RuleSet) -> Self {
        Self {
            rules: ArcSwap::from_pointee(rules),
            path: None,
        }
    }

    /// Load from the configured policy file, or fall back to owner-only.
    pub fn load(owner: Identity, path: Option<&Path>) -> Result<Self, TetherError> {
        let rules = RuleSet::load(owner, path)?;
        info!(
            file_backed = rules.is_file_backed(),
            rules = rules.rules().len(),
            "policy loaded"
        );
        Ok(Self {
            rules: ArcSwap::from_pointee(rules),
            path: path.map(Path::to_path_buf),
        })
    }

    /// Evaluate `command` for `identity` against the current rule set.
    ///
    /// Malformed command names are denied.
    pub fn decide(&self, identity: Identity, command: &str) -> Decision {
        let Ok(command) = normalize_command(command) else {
            return Decision::Deny;
        };
        let rules = self.rules.load();
        let decision = if rules.rule_for(identity).permits(&command) {
            Decision::Allow
        } else {
            Decision::Deny
        };
        debug!(%identity, %command, %decision, "policy decision");
        decision
    }

    /// Whether `identity` is known at all. Unknown identities are rejected
    /// before any command is evaluated.
    pub fn recognizes(&self, identity: Identity) -> bool {
        let rules = self.rules.load();
        rules.is_file_backed() || rules.rules().iter().any(|r| r.identity == Some(identity))
    }

    pub fn is_owner(&self, identity: Identity) -> bool {
        self.rules.load().owner() == identity
    }

    pub fn additional_identities(&self) -> Vec<Identity> {
        self.rules.load().additional_identities()
    }

    pub fn snapshot(&self) -> Arc<RuleSet> {
        self.rules.load_full()
    }

    /// Swap in a new rule set. In-flight decisions finish on the old one.
    pub fn reload(&self, rules: RuleSet) {
        self.rules.store(Arc::new(rules));
        info!("policy reloaded");
    }

    /// Re-read the policy file this engine was loaded from. On error the
    /// current rule set stays in place.
    pub fn reload_from_disk(&self) -> Result<(), TetherError> {
        let owner = self.rules.load().owner();
        let rules = RuleSet::load(owner, self.path.as_deref())?;
        self.reload(rules);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OWNER: Identity = Identity {
        user_id: 123,
        chat_id: 456,
    };

    #[test]
    fn owner_only_engine_rejects_strangers() {
        let engine = PolicyEngine::new(RuleSet::owner_only(OWNER));
        assert!(engine.recognizes(OWNER));
        assert!(!engine.recognizes(Identity::new(999, 456)));
        assert_eq!(engine.decide(OWNER, "/RUN"), Decision::Allow);
        assert!(engine.is_owner(OWNER));
    }

    #[test]
    fn malformed_command_is_denied() {
        let engine = PolicyEngine::new(RuleSet::owner_only(OWNER));
        assert_eq!(engine.decide(OWNER, ""), Decision::Deny);
        assert_eq!(engine.decide(OWNER, "run"), Decision::Deny);
    }

    #[test]
    fn reload_swaps_rules() {
        let engine = PolicyEngine::new(RuleSet::owner_only(OWNER));
        let stranger = Identity::new(5, 6);
        assert_eq!(engine.decide(stranger, "/status"), Decision::Deny);

        engine.reload(
            RuleSet::from_json_str(OWNER, r#"{"default":{"allow":["/status"]}}"#).unwrap(),
        );
        assert!(engine.recognizes(stranger));
        assert_eq!(engine.decide(stranger, "/status"), Decision::Allow);
        assert_eq!(engine.decide(stranger, "/run"), Decision::Deny);
    }

    #[test]
    fn snapshot_outlives_reload() {
        let engine = PolicyEngine::new(RuleSet::owner_only(OWNER));
        let before = engine.snapshot();
        engine.reload(RuleSet::from_json_str(OWNER, "{}").unwrap());
        assert!(!before.is_file_backed());
        assert!(engine.snapshot().is_file_backed());
    }

    #[test]
    #[tracing_test::traced_test]
    fn failed_disk_reload_keeps_rules_and_logs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.json");
        std::fs::write(&path, r#"{"default":{"allow":["/status"]}}"#).unwrap();
        let engine = PolicyEngine::load(OWNER, Some(&path)).unwrap();
        assert!(logs_contain("policy loaded"));

        std::fs::write(&path, "{ not json").unwrap();
        assert!(engine.reload_from_disk().is_err());
        assert_eq!(engine.decide(Identity::new(5, 6), "/status"), Decision::Allow);

        std::fs::write(&path, r#"{"default":{"allow":["/help"]}}"#).unwrap();
        engine.reload_from_disk().unwrap();
        assert!(logs_contain("policy reloaded"));
        assert_eq!(engine.decide(Identity::new(5, 6), "/status"), Decision::Deny);
    }
}
