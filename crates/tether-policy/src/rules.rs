// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Rule-file model and parsing.
//!
//! The policy file is JSON:
//!
//! ```json
//! {
//!   "default": { "allow": ["/status", "/help"], "deny": [] },
//!   "rules": [
//!     { "user_id": 123, "chat_id": 456, "allow": ["*"], "deny": ["/codex"] }
//!   ]
//! }
//! ```

use std::collections::BTreeSet;
use std::path::Path;

use serde::Deserialize;
use tether_core::{Identity, TetherError};

/// Pattern matching every command.
pub const WILDCARD: &str = "*";

/// Normalize a command pattern: trimmed, lowercased, `/`-prefixed or `*`.
pub fn normalize_command(raw: &str) -> Result<String, TetherError> {
    let candidate = raw.trim().to_lowercase();
    if candidate.is_empty() {
        return Err(TetherError::Config(
            "empty command name is not valid".to_string(),
        ));
    }
    if candidate != WILDCARD && !candidate.starts_with('/') {
        return Err(TetherError::Config(format!(
            "command names must start with '/': {raw}"
        )));
    }
    Ok(candidate)
}

/// An allow or deny set of normalized command patterns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatternSet(BTreeSet<String>);

impl PatternSet {
    pub fn parse<I, S>(patterns: I, context: &str) -> Result<Self, TetherError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        patterns
            .into_iter()
            .map(|p| {
                normalize_command(p.as_ref())
                    .map_err(|e| TetherError::Config(format!("{context}: {e}")))
            })
            .collect::<Result<BTreeSet<_>, _>>()
            .map(PatternSet)
    }

    pub fn wildcard() -> Self {
        PatternSet(BTreeSet::from([WILDCARD.to_string()]))
    }

    /// True when the set names `command` or contains the wildcard.
    pub fn matches(&self, command: &str) -> bool {
        self.0.contains(WILDCARD) || self.0.contains(command)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

/// Allow and deny sets for one identity, or for the default block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyRule {
    /// `None` for the default block.
    pub identity: Option<Identity>,
    pub allow: PatternSet,
    pub deny: PatternSet,
}

impl PolicyRule {
    /// Deny wins over allow, wildcard included. No match is a deny.
    pub fn permits(&self, command: &str) -> bool {
        if self.deny.matches(command) {
            return false;
        }
        self.allow.matches(command)
    }
}

#[derive(Debug, Deserialize)]
struct RawBlock {
    #[serde(default)]
    allow: Option<Vec<String>>,
    #[serde(default)]
    deny: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RawRule {
    user_id: i64,
    chat_id: i64,
    #[serde(flatten)]
    block: RawBlock,
}

#[derive(Debug, Deserialize)]
struct RawPolicy {
    #[serde(default)]
    default: Option<RawBlock>,
    #[serde(default)]
    rules: Option<Vec<RawRule>>,
}

/// A loaded, normalized rule set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSet {
    owner: Identity,
    rules: Vec<PolicyRule>,
    default: PolicyRule,
    from_file: bool,
}

impl RuleSet {
    /// The rule set used when no policy file is configured: the owner may
    /// run everything, nobody else is recognized.
    pub fn owner_only(owner: Identity) -> Self {
        Self {
            owner,
            rules: vec![PolicyRule {
                identity: Some(owner),
                allow: PatternSet::wildcard(),
                deny: PatternSet::default(),
            }],
            default: PolicyRule::default(),
            from_file: false,
        }
    }

    /// Parse a policy document. The owner keeps a wildcard allow unless the
    /// document carries an explicit rule for it.
    pub fn from_json_str(owner: Identity, json: &str) -> Result<Self, TetherError> {
        let raw: RawPolicy = serde_json::from_str(json)
            .map_err(|e| TetherError::Config(format!("policy file is not valid: {e}")))?;

        let default = match raw.default {
            Some(block) => PolicyRule {
                identity: None,
                allow: PatternSet::parse(block.allow.unwrap_or_default(), "default.allow")?,
                deny: PatternSet::parse(block.deny.unwrap_or_default(), "default.deny")?,
            },
            None => PolicyRule::default(),
        };

        let mut rules = Vec::new();
        for (idx, rule) in raw.rules.unwrap_or_default().into_iter().enumerate() {
            let identity = Identity::new(rule.user_id, rule.chat_id);
            rules.push(PolicyRule {
                identity: Some(identity),
                allow: PatternSet::parse(
                    rule.block.allow.unwrap_or_default(),
                    &format!("rules[{idx}].allow"),
                )?,
                deny: PatternSet::parse(
                    rule.block.deny.unwrap_or_default(),
                    &format!("rules[{idx}].deny"),
                )?,
            });
        }

        if !rules.iter().any(|r| r.identity == Some(owner)) {
            rules.push(PolicyRule {
                identity: Some(owner),
                allow: PatternSet::wildcard(),
                deny: PatternSet::default(),
            });
        }

        Ok(Self {
            owner,
            rules,
            default,
            from_file: true,
        })
    }

    /// Read and parse a policy file.
    pub fn from_path(owner: Identity, path: &Path) -> Result<Self, TetherError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TetherError::Config(format!("policy file `{}`: {e}", path.display()))
        })?;
        Self::from_json_str(owner, &content)
    }

    /// `from_path` when a path is configured, [`RuleSet::owner_only`] otherwise.
    pub fn load(owner: Identity, path: Option<&Path>) -> Result<Self, TetherError> {
        match path {
            Some(path) => Self::from_path(owner, path),
            None => Ok(Self::owner_only(owner)),
        }
    }

    pub fn owner(&self) -> Identity {
        self.owner
    }

    /// The rule governing `identity`: the first identity rule, else the default.
    pub fn rule_for(&self, identity: Identity) -> &PolicyRule {
        self.rules
            .iter()
            .find(|r| r.identity == Some(identity))
            .unwrap_or(&self.default)
    }

    pub fn rules(&self) -> &[PolicyRule] {
        &self.rules
    }

    pub fn default_rule(&self) -> &PolicyRule {
        &self.default
    }

    /// Whether the set came from a policy file. File-backed sets recognize
    /// every sender and let the default block decide for strangers.
    pub fn is_file_backed(&self) -> bool {
        self.from_file
    }

    /// Identities with their own rule, excluding the owner, in file order.
    pub fn additional_identities(&self) -> Vec<Identity> {
        let mut out: Vec<Identity> = Vec::new();
        for identity in self.rules.iter().filter_map(|r| r.identity) {
            if identity != self.owner && !out.contains(&identity) {
                out.push(identity);
            }
        }
        out
    }
}
