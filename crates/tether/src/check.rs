// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `tether check-config` and `tether policy-check`.

use tether_config::TetherConfig;
use tether_core::{Identity, TetherError};
use tether_policy::PolicyEngine;
use tether_security::Redactor;

const MASK: &str = "[REDACTED]";

/// The configured administrator identity.
pub fn owner_identity(config: &TetherConfig) -> Result<Identity, TetherError> {
    match (config.telegram.allowed_user_id, config.telegram.allowed_chat_id) {
        (Some(user_id), Some(chat_id)) => Ok(Identity::new(user_id, chat_id)),
        _ => Err(TetherError::Config(
            "telegram.allowed_user_id and telegram.allowed_chat_id must be set".into(),
        )),
    }
}

/// Secret values that must never leave the process unmasked.
pub fn config_secrets(config: &TetherConfig) -> Vec<String> {
    [
        config.telegram.bot_token.as_deref(),
        config.webhook.secret_token.as_deref(),
    ]
    .into_iter()
    .flatten()
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .map(String::from)
    .collect()
}

/// The effective configuration as TOML, with secrets masked.
pub fn render_config(config: &TetherConfig) -> Result<String, TetherError> {
    let mut masked = config.clone();
    if masked.telegram.bot_token.is_some() {
        masked.telegram.bot_token = Some(MASK.to_string());
    }
    if masked.webhook.secret_token.is_some() {
        masked.webhook.secret_token = Some(MASK.to_string());
    }
    let rendered = toml::to_string_pretty(&masked)
        .map_err(|e| TetherError::Internal(format!("failed to render config: {e}")))?;
    Ok(Redactor::with_secrets(config_secrets(config)).redact(&rendered))
}

pub fn run_check_config(config: &TetherConfig) -> Result<i32, TetherError> {
    println!("{}", render_config(config)?);
    eprintln!("tether: configuration is valid");
    Ok(0)
}

/// Prints `allow` or `deny` and exits non-zero on deny.
pub fn run_policy_check(
    config: &TetherConfig,
    user_id: i64,
    chat_id: i64,
    command: &str,
) -> Result<i32, TetherError> {
    let owner = owner_identity(config)?;
    let policy = PolicyEngine::load(owner, config.safety.policy_path.as_deref())?;
    let identity = Identity::new(user_id, chat_id);
    let (verdict, code) = evaluate(&policy, identity, command);
    println!("{verdict}");
    Ok(code)
}

fn evaluate(policy: &PolicyEngine, identity: Identity, command: &str) -> (String, i32) {
    if !policy.recognizes(identity) {
        return (format!("deny: {identity} is not recognized"), 1);
    }
    let decision = policy.decide(identity, command);
    if decision.is_allowed() {
        (format!("allow: {identity} may run {command}"), 0)
    } else {
        (format!("deny: {identity} may not run {command}"), 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_policy::RuleSet;

    fn config() -> TetherConfig {
        let mut config = TetherConfig::default();
        config.telegram.bot_token = Some("123456:ABCdefGHIjklMNOpqrSTUvwxYZ".into());
        config.telegram.allowed_user_id = Some(1);
        config.telegram.allowed_chat_id = Some(2);
        config.webhook.secret_token = Some("hook-secret-value".into());
        config
    }

    #[test]
    fn rendered_config_masks_secrets() {
        let rendered = render_config(&config()).unwrap();
        assert!(!rendered.contains("ABCdefGHI"));
        assert!(!rendered.contains("hook-secret-value"));
        assert!(rendered.contains("allowed_user_id = 1"));
        assert!(rendered.contains(MASK));
    }

    #[test]
    fn owner_requires_both_ids() {
        assert_eq!(owner_identity(&config()).unwrap(), Identity::new(1, 2));
        let mut partial = config();
        partial.telegram.allowed_chat_id = None;
        assert!(owner_identity(&partial).is_err());
    }

    #[test]
    fn evaluate_reports_recognition_and_decision() {
        let owner = Identity::new(1, 2);
        let policy = PolicyEngine::new(
            RuleSet::from_json_str(owner, r#"{"default": {"allow": ["/status"]}}"#).unwrap(),
        );
        assert_eq!(evaluate(&policy, owner, "/run").1, 0);
        assert_eq!(evaluate(&policy, Identity::new(9, 9), "/status").1, 0);
        assert_eq!(evaluate(&policy, Identity::new(9, 9), "/run").1, 1);

        let owner_only = PolicyEngine::new(RuleSet::owner_only(owner));
        let (verdict, code) = evaluate(&owner_only, Identity::new(9, 9), "/status");
        assert_eq!(code, 1);
        assert!(verdict.contains("not recognized"));
    }
}
