// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates semantic constraints that cannot be expressed via serde attributes,
//! such as URL schemes, timeout ranges, and webhook secret strength.

use crate::diagnostic::ConfigError;
use crate::model::{TetherConfig, TransportMode};

/// Host the Bot API base must point at unless explicitly overridden.
pub const TRUSTED_API_HOST: &str = "api.telegram.org";

const MIN_WEBHOOK_SECRET_LEN: usize = 16;
const MAX_WEBHOOK_SECRET_LEN: usize = 256;
/// Upper bound for poll retry delays: one day.
const MAX_POLL_RETRY_SECS: f64 = 86_400.0;

/// Validate a deserialized configuration for semantic correctness.
///
/// Returns `Ok(())` if all validations pass, or `Err(Vec<ConfigError>)` with
/// all collected validation errors (does not fail fast).
pub fn validate_config(config: &TetherConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    let mut fail = |message: String| errors.push(ConfigError::Validation { message });

    let telegram = &config.telegram;
    match telegram.bot_token.as_deref() {
        Some(token) if !token.trim().is_empty() => {}
        _ => fail("telegram.bot_token must be set".to_string()),
    }
    if telegram.allowed_user_id.is_none() {
        fail("telegram.allowed_user_id must be set".to_string());
    }
    if telegram.allowed_chat_id.is_none() {
        fail("telegram.allowed_chat_id must be set".to_string());
    }

    match https_host(&telegram.api_base) {
        None => fail(format!(
            "telegram.api_base `{}` must be an https URL with a host",
            telegram.api_base
        )),
        Some(host) if host != TRUSTED_API_HOST && !telegram.allow_untrusted_api_base => {
            fail(format!(
                "telegram.api_base host must be {TRUSTED_API_HOST} unless telegram.allow_untrusted_api_base is set"
            ))
        }
        Some(_) => {}
    }

    if telegram.poll_timeout_secs == 0 {
        fail("telegram.poll_timeout_secs must be greater than 0".to_string());
    }
    let retry = [
        ("telegram.poll_retry_base_secs", telegram.poll_retry_base_secs),
        ("telegram.poll_retry_max_secs", telegram.poll_retry_max_secs),
    ];
    let mut retry_ok = true;
    for (key, secs) in retry {
        if !secs.is_finite() || secs > MAX_POLL_RETRY_SECS {
            fail(format!(
                "{key} must be a finite number of seconds no greater than {MAX_POLL_RETRY_SECS}, got {secs}"
            ));
            retry_ok = false;
        }
    }
    if retry_ok {
        if telegram.poll_retry_base_secs <= 0.0 {
            fail("telegram.poll_retry_base_secs must be greater than 0".to_string());
        }
        if telegram.poll_retry_max_secs < telegram.poll_retry_base_secs {
            fail(
                "telegram.poll_retry_max_secs must be >= telegram.poll_retry_base_secs".to_string(),
            );
        }
    }
    if telegram.message_chunk_size == 0 {
        fail("telegram.message_chunk_size must be greater than 0".to_string());
    }

    let webhook = &config.webhook;
    if webhook.listen_host.trim().is_empty() {
        fail("webhook.listen_host must not be empty".to_string());
    }
    if webhook.listen_port == 0 {
        fail("webhook.listen_port must be between 1 and 65535".to_string());
    }
    if !webhook.path.starts_with('/') {
        fail("webhook.path must start with '/'".to_string());
    }
    if webhook.path.contains(' ') {
        fail("webhook.path must not contain spaces".to_string());
    }
    if webhook
        .secret_token
        .as_deref()
        .is_some_and(|secret| secret.len() > MAX_WEBHOOK_SECRET_LEN)
    {
        fail(format!(
            "webhook.secret_token must be <= {MAX_WEBHOOK_SECRET_LEN} characters"
        ));
    }

    if telegram.transport == TransportMode::Webhook {
        match webhook.public_url.as_deref() {
            None => fail("webhook.public_url is required when telegram.transport = \"webhook\"".to_string()),
            Some(url) if https_host(url).is_none() => {
                fail(format!("webhook.public_url `{url}` must be an https URL with a host"))
            }
            Some(_) => {}
        }
        match webhook.secret_token.as_deref() {
            None | Some("") => fail(
                "webhook.secret_token is required when telegram.transport = \"webhook\"".to_string(),
            ),
            Some(secret) if secret.len() < MIN_WEBHOOK_SECRET_LEN => fail(format!(
                "webhook.secret_token must be at least {MIN_WEBHOOK_SECRET_LEN} characters"
            )),
            Some(_) => {}
        }
    }

    let root = &config.workspace.root;
    if !root.is_dir() {
        fail(format!(
            "workspace.root `{}` must be an existing directory",
            root.display()
        ));
    }

    if config.storage.database_path.trim().is_empty() {
        fail("storage.database_path must not be empty".to_string());
    }
    if config.storage.audit_log_path.trim().is_empty() {
        fail("storage.audit_log_path must not be empty".to_string());
    }

    let codex = &config.codex;
    if codex.command.trim().is_empty() {
        fail("codex.command must not be empty".to_string());
    }
    if codex.job_timeout_secs == 0 {
        fail("codex.job_timeout_secs must be greater than 0".to_string());
    }
    if codex.chat_turn_timeout_secs == 0 {
        fail("codex.chat_turn_timeout_secs must be greater than 0".to_string());
    }
    for name in codex.env.allow_vars.iter().chain(codex.env.allow_prefixes.iter()) {
        if name.is_empty() {
            fail("codex.env entries must not be empty".to_string());
        } else if name.to_ascii_uppercase().starts_with("TETHER_")
            || "TETHER_".starts_with(&name.to_ascii_uppercase())
        {
            fail(format!(
                "codex.env entry `{name}` would expose Tether's own settings to child processes"
            ));
        }
    }

    if config.safety.confirmation_ttl_secs == 0 {
        fail("safety.confirmation_ttl_secs must be greater than 0".to_string());
    }
    if let Some(path) = config.safety.policy_path.as_ref().filter(|p| !p.is_file()) {
        fail(format!(
            "safety.policy_path `{}` must be an existing file",
            path.display()
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Returns the host of an `https://` URL, or `None` for other schemes or an empty host.
pub fn https_host(url: &str) -> Option<&str> {
    let rest = url.strip_prefix("https://")?;
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let authority = authority.rsplit('@').next().unwrap_or_default();
    let host = match authority.strip_prefix('[') {
        Some(v6) => v6.split(']').next().unwrap_or_default(),
        None => authority.split(':').next().unwrap_or_default(),
    };
    if host.is_empty() { None } else { Some(host) }
}
