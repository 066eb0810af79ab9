// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Child process environment allowlist.
//!
//! Children start from an empty environment. Only allowlisted names,
//! allowlisted prefixes and `HOME` pass through; `TETHER_*` never does.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tether_config::model::EnvConfig;

/// Prefix of this process's own settings.
const OWN_PREFIX: &str = "TETHER_";

/// Filters a parent environment down to what a child may see.
#[derive(Debug, Clone)]
pub struct EnvAllowlist {
    names: Vec<String>,
    prefixes: Vec<String>,
    home: Option<PathBuf>,
}

impl EnvAllowlist {
    pub fn new(names: Vec<String>, prefixes: Vec<String>, home: Option<PathBuf>) -> Self {
        Self {
            names,
            prefixes,
            home,
        }
    }

    pub fn from_config(config: &EnvConfig) -> Self {
        Self::new(
            config.allow_vars.clone(),
            config.allow_prefixes.clone(),
            config.home.clone(),
        )
    }

    pub fn permits(&self, name: &str) -> bool {
        if name.starts_with(OWN_PREFIX) {
            return false;
        }
        name == "HOME"
            || self.names.iter().any(|n| n == name)
            || self
                .prefixes
                .iter()
                .any(|p| !p.is_empty() && name.starts_with(p.as_str()))
    }

    /// Filter `vars`; an overridden HOME replaces the inherited one.
    pub fn filter<I>(&self, vars: I) -> BTreeMap<String, String>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut env: BTreeMap<String, String> = vars
            .into_iter()
            .filter(|(name, _)| self.permits(name))
            .collect();
        if let Some(home) = &self.home {
            env.insert("HOME".to_string(), home.display().to_string());
        }
        env
    }

    /// Filter the current process environment.
    pub fn collect(&self) -> BTreeMap<String, String> {
        self.filter(std::env::vars())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parent_env() -> Vec<(String, String)> {
        [
            ("PATH", "/usr/bin"),
            ("HOME", "/home/op"),
            ("LC_ALL", "C.UTF-8"),
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
            ("TETHER_TELEGRAM_BOT_TOKEN", "123:abc"),
            ("AWS_SECRET_ACCESS_KEY", "nope"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn only_allowlisted_names_pass() {
        let allow = EnvAllowlist::from_config(&EnvConfig::default());
        let env = allow.filter(parent_env());
        let keys: Vec<&str> = env.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["HOME", "LC_ALL", "PATH"]);
    }

    #[test]
    fn own_prefix_never_passes_even_if_listed() {
        let allow = EnvAllowlist::new(
            vec!["TETHER_TELEGRAM_BOT_TOKEN".into()],
            vec!["TETHER_".into(), "".into()],
            None,
        );
        let env = allow.filter(parent_env());
        assert!(!env.contains_key("TETHER_TELEGRAM_BOT_TOKEN"));
        assert!(!env.contains_key("AWS_SECRET_ACCESS_KEY"));
    }

    #[test]
    fn home_override_replaces_inherited_home() {
        let allow = EnvAllowlist::new(vec![], vec![], Some(PathBuf::from("/srv/codex")));
        let env = allow.filter(parent_env());
        assert_eq!(env.get("HOME").map(String::as_str), Some("/srv/codex"));
        assert_eq!(env.len(), 1);
    }
}
