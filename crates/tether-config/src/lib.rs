// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration system for Tether.
//!
//! Provides TOML configuration parsing with strict validation (`deny_unknown_fields`),
//! XDG file hierarchy lookup, `TETHER_*` environment overrides, and miette
//! diagnostics with typo suggestions.
//!
//! # Usage
//!
//! ```no_run
//! use tether_config::load_and_validate;
//!
//! let config = load_and_validate().expect("config errors");
//! println!("workspace: {}", config.workspace.root.display());
//! ```

pub mod diagnostic;
pub mod loader;
pub mod model;
pub mod validation;

use std::path::Path;

pub use diagnostic::{ConfigError, render_errors};
pub use loader::{load_config, load_config_from_path, load_config_from_str};
pub use model::{TetherConfig, TransportMode};

/// Load configuration from the XDG hierarchy and validate it.
///
/// Returns either a valid `TetherConfig` or every diagnostic found.
pub fn load_and_validate() -> Result<TetherConfig, Vec<ConfigError>> {
    load_and_validate_path(None)
}

/// Like [`load_and_validate`], with an explicit config file layered on top
/// of the standard hierarchy (below environment overrides).
pub fn load_and_validate_path(path: Option<&Path>) -> Result<TetherConfig, Vec<ConfigError>> {
    if let Some(p) = path.filter(|p| !p.is_file()) {
        return Err(vec![ConfigError::Other(format!(
            "config file `{}` does not exist",
            p.display()
        ))]);
    }
    match loader::build_figment(path).extract::<TetherConfig>() {
        Ok(config) => {
            validation::validate_config(&config)?;
            Ok(config)
        }
        Err(err) => Err(diagnostic::figment_to_config_errors(
            err,
            &collect_toml_sources(path),
        )),
    }
}

/// Load configuration from a TOML string and validate it.
pub fn load_and_validate_str(toml_content: &str) -> Result<TetherConfig, Vec<ConfigError>> {
    match loader::load_config_from_str(toml_content) {
        Ok(config) => {
            validation::validate_config(&config)?;
            Ok(config)
        }
        Err(err) => {
            let sources = vec![("<inline>".to_string(), toml_content.to_string())];
            Err(diagnostic::figment_to_config_errors(err, &sources))
        }
    }
}

/// Read every config file that exists so diagnostics can point into them.
fn collect_toml_sources(extra: Option<&Path>) -> Vec<(String, String)> {
    let mut candidates = vec![Path::new(loader::SYSTEM_CONFIG_PATH).to_path_buf()];
    candidates.extend(loader::user_config_path());
    candidates.push(
        std::env::current_dir()
            .map(|d| d.join(loader::LOCAL_CONFIG_PATH))
            .unwrap_or_else(|_| loader::LOCAL_CONFIG_PATH.into()),
    );
    candidates.extend(extra.map(Path::to_path_buf));

    candidates
        .into_iter()
        .filter_map(|path| {
            let content = std::fs::read_to_string(&path).ok()?;
            Some((path.display().to_string(), content))
        })
        .collect()
}
