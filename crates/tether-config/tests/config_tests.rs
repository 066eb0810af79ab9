// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests for the Tether configuration system.

use figment::Jail;
use tether_config::diagnostic::ConfigError;
use tether_config::loader::build_figment;
use tether_config::model::TetherConfig;
use tether_config::{TransportMode, load_and_validate_str, load_config_from_str};

fn valid_toml(root: &std::path::Path) -> String {
    format!(
        r#"
[telegram]
bot_token = "123456789:AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA"
allowed_user_id = 123
allowed_chat_id = 456

[workspace]
root = "{}"
"#,
        root.display()
    )
}

fn has_validation(errors: &[ConfigError], needle: &str) -> bool {
    errors
        .iter()
        .any(|e| matches!(e, ConfigError::Validation { message } if message.contains(needle)))
}

#[test]
fn defaults_match_documented_values() {
    let config = TetherConfig::default();
    assert_eq!(config.telegram.api_base, "https://api.telegram.org");
    assert_eq!(config.telegram.transport, TransportMode::Polling);
    assert!(config.telegram.interactive_mode);
    assert_eq!(config.telegram.poll_timeout_secs, 30);
    assert_eq!(config.webhook.listen_host, "127.0.0.1");
    assert_eq!(config.webhook.listen_port, 8080);
    assert_eq!(config.webhook.path, "/telegram/webhook");
    assert_eq!(config.codex.command, "codex");
    assert_eq!(config.codex.job_timeout_secs, 7200);
    assert_eq!(config.codex.chat_turn_timeout_secs, 900);
    assert_eq!(config.safety.confirmation_ttl_secs, 300);
    assert_eq!(config.storage.max_event_rows, 5000);
}

#[test]
fn valid_toml_loads_and_validates() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_and_validate_str(&valid_toml(dir.path())).expect("should validate");
    assert_eq!(config.telegram.allowed_user_id, Some(123));
    assert_eq!(config.telegram.allowed_chat_id, Some(456));
    assert_eq!(config.workspace.root, dir.path());
}

#[test]
fn missing_owner_and_token_are_all_reported() {
    let dir = tempfile::tempdir().unwrap();
    let toml = format!("[workspace]\nroot = \"{}\"\n", dir.path().display());
    let errors = load_and_validate_str(&toml).expect_err("should fail");
    assert!(has_validation(&errors, "telegram.bot_token"));
    assert!(has_validation(&errors, "telegram.allowed_user_id"));
    assert!(has_validation(&errors, "telegram.allowed_chat_id"));
}

#[test]
fn unknown_key_is_rejected_with_suggestion() {
    let toml = "[telegram]\nbot_tken = \"abc\"\n";
    let errors = load_and_validate_str(toml).expect_err("should reject unknown field");
    let found = errors.iter().any(|e| {
        matches!(e, ConfigError::UnknownKey { key, suggestion, valid_keys, span, .. }
            if key == "bot_tken"
                && suggestion.as_deref() == Some("bot_token")
                && valid_keys.contains("allowed_user_id")
                && span.is_some())
    });
    assert!(found, "expected UnknownKey for bot_tken, got: {errors:?}");
}

#[test]
fn unknown_top_level_section_is_rejected() {
    let err = load_config_from_str("[agent]\nname = \"x\"\n").expect_err("should reject");
    assert!(err.to_string().contains("agent"), "got: {err}");
}

#[test]
fn invalid_type_is_reported_with_key() {
    let errors =
        load_and_validate_str("[codex]\njob_timeout_secs = \"soon\"\n").expect_err("should fail");
    assert!(
        errors.iter().any(
            |e| matches!(e, ConfigError::InvalidType { key, .. } if key.contains("job_timeout_secs"))
        ),
        "got: {errors:?}"
    );
}

#[test]
fn untrusted_api_base_requires_opt_in() {
    let dir = tempfile::tempdir().unwrap();
    let mut toml = valid_toml(dir.path());
    toml = toml.replace(
        "allowed_chat_id = 456",
        "allowed_chat_id = 456\napi_base = \"https://proxy.example.com\"",
    );
    let errors = load_and_validate_str(&toml).expect_err("should fail");
    assert!(has_validation(&errors, "telegram.api_base host"));

    let opted_in = toml.replace(
        "api_base = \"https://proxy.example.com\"",
        "api_base = \"https://proxy.example.com\"\nallow_untrusted_api_base = true",
    );
    load_and_validate_str(&opted_in).expect("opt-in should validate");
}

#[test]
fn plain_http_api_base_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let toml = valid_toml(dir.path()).replace(
        "allowed_chat_id = 456",
        "allowed_chat_id = 456\napi_base = \"http://api.telegram.org\"\nallow_untrusted_api_base = true",
    );
    let errors = load_and_validate_str(&toml).expect_err("should fail");
    assert!(has_validation(&errors, "https URL"));
}

#[test]
fn webhook_mode_requires_public_url_and_strong_secret() {
    let dir = tempfile::tempdir().unwrap();
    let toml = valid_toml(dir.path()).replace(
        "allowed_chat_id = 456",
        "allowed_chat_id = 456\ntransport = \"webhook\"",
    ) + "\n[webhook]\nsecret_token = \"short\"\n";
    let errors = load_and_validate_str(&toml).expect_err("should fail");
    assert!(has_validation(&errors, "webhook.public_url is required"));
    assert!(has_validation(&errors, "at least 16"));
}

#[test]
fn webhook_mode_with_full_settings_validates() {
    let dir = tempfile::tempdir().unwrap();
    let toml = valid_toml(dir.path()).replace(
        "allowed_chat_id = 456",
        "allowed_chat_id = 456\ntransport = \"webhook\"",
    ) + r#"
[webhook]
public_url = "https://bot.example.com/"
secret_token = "0123456789abcdef0123"
"#;
    let config = load_and_validate_str(&toml).expect("should validate");
    assert_eq!(
        config.webhook.webhook_url().as_deref(),
        Some("https://bot.example.com/telegram/webhook")
    );
}

#[test]
fn webhook_path_must_be_absolute() {
    let dir = tempfile::tempdir().unwrap();
    let toml = valid_toml(dir.path()) + "\n[webhook]\npath = \"hook\"\n";
    let errors = load_and_validate_str(&toml).expect_err("should fail");
    assert!(has_validation(&errors, "must start with '/'"));
}

#[test]
fn env_allowlist_cannot_expose_own_settings() {
    let dir = tempfile::tempdir().unwrap();
    let toml = valid_toml(dir.path())
        + "\n[codex.env]\nallow_vars = [\"PATH\", \"TETHER_TELEGRAM_BOT_TOKEN\"]\nallow_prefixes = [\"TETH\"]\n";
    let errors = load_and_validate_str(&toml).expect_err("should fail");
    assert!(has_validation(&errors, "TETHER_TELEGRAM_BOT_TOKEN"));
    assert!(has_validation(&errors, "`TETH`"));
}

#[test]
fn zero_timeouts_and_missing_workspace_are_rejected() {
    let toml = r#"
[telegram]
bot_token = "t"
allowed_user_id = 1
allowed_chat_id = 1

[workspace]
root = "/definitely/not/a/real/dir"

[codex]
job_timeout_secs = 0
chat_turn_timeout_secs = 0

[safety]
confirmation_ttl_secs = 0
"#;
    let errors = load_and_validate_str(toml).expect_err("should fail");
    assert!(has_validation(&errors, "workspace.root"));
    assert!(has_validation(&errors, "codex.job_timeout_secs"));
    assert!(has_validation(&errors, "codex.chat_turn_timeout_secs"));
    assert!(has_validation(&errors, "safety.confirmation_ttl_secs"));
}

#[test]
fn chunk_size_is_clamped() {
    let config = load_config_from_str("[telegram]\nmessage_chunk_size = 9000\n").unwrap();
    assert_eq!(config.telegram.effective_chunk_size(), 3500);
    let config = load_config_from_str("[telegram]\nmessage_chunk_size = 100\n").unwrap();
    assert_eq!(config.telegram.effective_chunk_size(), 100);
}

#[test]
fn env_overrides_file_values() {
    Jail::expect_with(|jail| {
        jail.create_file(
            "tether.toml",
            r#"
[telegram]
bot_token = "from-file"
allowed_user_id = 1

[codex]
job_timeout_secs = 60
"#,
        )?;
        jail.set_env("TETHER_TELEGRAM_BOT_TOKEN", "from-env");
        jail.set_env("TETHER_TELEGRAM_ALLOWED_CHAT_ID", "777");
        jail.set_env("TETHER_CODEX_ENV_HOME", "/srv/codex-home");

        let config: TetherConfig = build_figment(None).extract()?;
        assert_eq!(config.telegram.bot_token.as_deref(), Some("from-env"));
        assert_eq!(config.telegram.allowed_user_id, Some(1));
        assert_eq!(config.telegram.allowed_chat_id, Some(777));
        assert_eq!(config.codex.job_timeout_secs, 60);
        assert_eq!(
            config.codex.env.home.as_deref(),
            Some(std::path::Path::new("/srv/codex-home"))
        );
        Ok(())
    });
}

#[test]
fn explicit_path_layers_over_local_file() {
    Jail::expect_with(|jail| {
        jail.create_file("tether.toml", "[logging]\nlevel = \"warn\"\n")?;
        jail.create_file("override.toml", "[logging]\nlevel = \"debug\"\n")?;

        let config: TetherConfig =
            build_figment(Some(std::path::Path::new("override.toml"))).extract()?;
        assert_eq!(config.logging.level, "debug");
        Ok(())
    });
}

#[test]
fn missing_explicit_path_is_an_error() {
    let errors = tether_config::load_and_validate_path(Some(std::path::Path::new(
        "/nonexistent/tether.toml",
    )))
    .expect_err("should fail");
    assert!(matches!(&errors[0], ConfigError::Other(msg) if msg.contains("does not exist")));
}

#[test]
fn config_error_renders_with_miette() {
    use miette::{Diagnostic, GraphicalReportHandler};

    let error = ConfigError::UnknownKey {
        key: "bot_tken".to_string(),
        suggestion: Some("bot_token".to_string()),
        valid_keys: "bot_token, allowed_user_id".to_string(),
        span: None,
        src: None,
    };
    assert!(error.code().is_some());
    let help = error.help().unwrap().to_string();
    assert!(help.contains("did you mean `bot_token`"), "got: {help}");

    let mut buf = String::new();
    GraphicalReportHandler::new()
        .render_report(&mut buf, &error)
        .expect("should render");
    assert!(buf.contains("bot_tken"));
}
