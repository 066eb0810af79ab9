// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./tether.toml` > `~/.config/tether/tether.toml` > `/etc/tether/tether.toml`
//! with environment variable overrides via `TETHER_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::model::TetherConfig;

/// Config sections addressable from the environment, longest prefix first.
const ENV_SECTIONS: &[(&str, &str)] = &[
    ("codex_env_", "codex.env."),
    ("telegram_", "telegram."),
    ("webhook_", "webhook."),
    ("workspace_", "workspace."),
    ("storage_", "storage."),
    ("codex_", "codex."),
    ("safety_", "safety."),
    ("logging_", "logging."),
];

/// Path of the system-wide config file.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/tether/tether.toml";

/// Path of the per-directory config file.
pub const LOCAL_CONFIG_PATH: &str = "tether.toml";

/// Path of the XDG user config file, if a config dir is known.
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("tether/tether.toml"))
}

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/tether/tether.toml` (system-wide)
/// 3. `~/.config/tether/tether.toml` (user XDG config)
/// 4. `./tether.toml` (local directory)
/// 5. `TETHER_*` environment variables
pub fn load_config() -> Result<TetherConfig, figment::Error> {
    build_figment(None).extract()
}

/// Load configuration from a TOML string only (no files, no environment).
///
/// Used for testing and explicit configuration.
pub fn load_config_from_str(toml_content: &str) -> Result<TetherConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(TetherConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load the standard hierarchy plus an explicit file, then env overrides.
pub fn load_config_from_path(path: &Path) -> Result<TetherConfig, figment::Error> {
    build_figment(Some(path)).extract()
}

/// Build the Figment used internally for config loading.
///
/// Returns the Figment before extraction so callers can inspect metadata.
pub fn build_figment(extra: Option<&Path>) -> Figment {
    let mut figment = Figment::new()
        .merge(Serialized::defaults(TetherConfig::default()))
        .merge(Toml::file(SYSTEM_CONFIG_PATH))
        .merge(Toml::file(user_config_path().unwrap_or_default()))
        .merge(Toml::file(LOCAL_CONFIG_PATH));
    if let Some(path) = extra {
        figment = figment.merge(Toml::file(path));
    }
    figment.merge(env_provider())
}

/// Map a lowercased, prefix-stripped env key to its dotted config path.
///
/// `telegram_bot_token` becomes `telegram.bot_token`, never
/// `telegram.bot.token`; only the section prefix is rewritten.
pub fn map_env_key(key: &str) -> String {
    for (prefix, dotted) in ENV_SECTIONS {
        if let Some(rest) = key.strip_prefix(prefix) {
            return format!("{dotted}{rest}");
        }
    }
    key.to_string()
}

/// Create the environment variable provider using explicit `map()` for section-to-dot mapping.
fn env_provider() -> Env {
    Env::prefixed("TETHER_").map(|key| map_env_key(&key.as_str().to_ascii_lowercase()).into())
}
