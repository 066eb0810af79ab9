// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for Tether.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level Tether configuration.
///
/// Loaded from TOML files following the XDG hierarchy, with `TETHER_*`
/// environment variable overrides. Every section defaults to sensible values;
/// the bot token and the owner identity have no default and are enforced by
/// validation.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TetherConfig {
    /// Telegram Bot API and owner identity settings.
    #[serde(default)]
    pub telegram: TelegramConfig,

    /// Webhook listener settings (used when `telegram.transport = "webhook"`).
    #[serde(default)]
    pub webhook: WebhookConfig,

    /// Filesystem boundary for jobs and file commands.
    #[serde(default)]
    pub workspace: WorkspaceConfig,

    /// Database and audit log locations.
    #[serde(default)]
    pub storage: StorageConfig,

    /// External tool invocation settings.
    #[serde(default)]
    pub codex: CodexConfig,

    /// Confirmation and policy settings.
    #[serde(default)]
    pub safety: SafetyConfig,

    /// Log output settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which transport front end receives updates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    #[default]
    Polling,
    Webhook,
}

/// Telegram bot configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TelegramConfig {
    /// Bot token from @BotFather.
    #[serde(default)]
    pub bot_token: Option<String>,

    /// Owner user id. The owner is always recognized and is the administrator.
    #[serde(default)]
    pub allowed_user_id: Option<i64>,

    /// Owner chat id.
    #[serde(default)]
    pub allowed_chat_id: Option<i64>,

    /// Bot API base URL.
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Permit an `api_base` host other than `api.telegram.org`.
    #[serde(default)]
    pub allow_untrusted_api_base: bool,

    #[serde(default)]
    pub transport: TransportMode,

    /// Treat plain text as a chat turn.
    #[serde(default = "default_true")]
    pub interactive_mode: bool,

    /// Long-poll wait passed to getUpdates.
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,

    /// Backoff floor after a failed poll.
    #[serde(default = "default_poll_retry_base_secs")]
    pub poll_retry_base_secs: f64,

    /// Backoff ceiling after repeated failed polls.
    #[serde(default = "default_poll_retry_max_secs")]
    pub poll_retry_max_secs: f64,

    /// Maximum characters per outbound message. Clamped to 3500.
    #[serde(default = "default_message_chunk_size")]
    pub message_chunk_size: usize,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            allowed_user_id: None,
            allowed_chat_id: None,
            api_base: default_api_base(),
            allow_untrusted_api_base: false,
            transport: TransportMode::default(),
            interactive_mode: true,
            poll_timeout_secs: default_poll_timeout_secs(),
            poll_retry_base_secs: default_poll_retry_base_secs(),
            poll_retry_max_secs: default_poll_retry_max_secs(),
            message_chunk_size: default_message_chunk_size(),
        }
    }
}

impl TelegramConfig {
    /// Chunk size after clamping to the Bot API safe limit.
    pub fn effective_chunk_size(&self) -> usize {
        self.message_chunk_size.min(MAX_MESSAGE_CHUNK_SIZE)
    }
}

/// Upper bound on outbound chunk size.
pub const MAX_MESSAGE_CHUNK_SIZE: usize = 3500;

fn default_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn default_true() -> bool {
    true
}

fn default_poll_timeout_secs() -> u64 {
    30
}

fn default_poll_retry_base_secs() -> f64 {
    1.0
}

fn default_poll_retry_max_secs() -> f64 {
    30.0
}

fn default_message_chunk_size() -> usize {
    MAX_MESSAGE_CHUNK_SIZE
}

/// Webhook listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WebhookConfig {
    /// Public HTTPS base URL registered with setWebhook (path is appended).
    #[serde(default)]
    pub public_url: Option<String>,

    #[serde(default = "default_listen_host")]
    pub listen_host: String,

    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    #[serde(default = "default_webhook_path")]
    pub path: String,

    /// Pre-shared secret expected in `X-Telegram-Bot-Api-Secret-Token`.
    #[serde(default)]
    pub secret_token: Option<String>,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            public_url: None,
            listen_host: default_listen_host(),
            listen_port: default_listen_port(),
            path: default_webhook_path(),
            secret_token: None,
        }
    }
}

impl WebhookConfig {
    /// Full URL registered with the Bot API.
    pub fn webhook_url(&self) -> Option<String> {
        self.public_url
            .as_deref()
            .map(|base| format!("{}{}", base.trim_end_matches('/'), self.path))
    }
}

fn default_listen_host() -> String {
    "127.0.0.1".to_string()
}

fn default_listen_port() -> u16 {
    8080
}

fn default_webhook_path() -> String {
    "/telegram/webhook".to_string()
}

/// Workspace confinement configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WorkspaceConfig {
    /// Jobs run here; file commands cannot escape it.
    #[serde(default = "default_workspace_root")]
    pub root: PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: default_workspace_root(),
        }
    }
}

fn default_workspace_root() -> PathBuf {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    let projects = home.join("Projects");
    if projects.is_dir() { projects } else { home }
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Path to the JSONL audit log.
    #[serde(default = "default_audit_log_path")]
    pub audit_log_path: String,

    /// Rotate the audit log to `<path>.1` beyond this size.
    #[serde(default = "default_audit_max_bytes")]
    pub audit_max_bytes: u64,

    /// Job event rows kept for `/logs`.
    #[serde(default = "default_max_event_rows")]
    pub max_event_rows: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            audit_log_path: default_audit_log_path(),
            audit_max_bytes: default_audit_max_bytes(),
            max_event_rows: default_max_event_rows(),
        }
    }
}

fn default_database_path() -> String {
    ".data/state.db".to_string()
}

fn default_audit_log_path() -> String {
    ".data/audit.jsonl".to_string()
}

fn default_audit_max_bytes() -> u64 {
    5 * 1024 * 1024
}

fn default_max_event_rows() -> u32 {
    5000
}

/// External tool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CodexConfig {
    /// Binary invoked for jobs and chat turns.
    #[serde(default = "default_codex_command")]
    pub command: String,

    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,

    #[serde(default = "default_chat_turn_timeout_secs")]
    pub chat_turn_timeout_secs: u64,

    /// Child process environment allowlist.
    #[serde(default)]
    pub env: EnvConfig,
}

impl Default for CodexConfig {
    fn default() -> Self {
        Self {
            command: default_codex_command(),
            job_timeout_secs: default_job_timeout_secs(),
            chat_turn_timeout_secs: default_chat_turn_timeout_secs(),
            env: EnvConfig::default(),
        }
    }
}

fn default_codex_command() -> String {
    "codex".to_string()
}

fn default_job_timeout_secs() -> u64 {
    7200
}

fn default_chat_turn_timeout_secs() -> u64 {
    900
}

/// Environment passed to child processes.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EnvConfig {
    /// Variable names passed through verbatim.
    #[serde(default = "default_allow_vars")]
    pub allow_vars: Vec<String>,

    /// Variable name prefixes passed through.
    #[serde(default = "default_allow_prefixes")]
    pub allow_prefixes: Vec<String>,

    /// Fixed HOME for children. Inherited from this process when unset.
    #[serde(default)]
    pub home: Option<PathBuf>,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            allow_vars: default_allow_vars(),
            allow_prefixes: default_allow_prefixes(),
            home: None,
        }
    }
}

fn default_allow_vars() -> Vec<String> {
    ["PATH", "LANG", "TERM", "TZ"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_allow_prefixes() -> Vec<String> {
    vec!["LC_".to_string()]
}

/// Confirmation and policy configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SafetyConfig {
    /// Lifetime of an issued confirmation nonce.
    #[serde(default = "default_confirmation_ttl_secs")]
    pub confirmation_ttl_secs: u64,

    /// JSON rule file. Without it only the owner is recognized.
    #[serde(default)]
    pub policy_path: Option<PathBuf>,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            confirmation_ttl_secs: default_confirmation_ttl_secs(),
            policy_path: None,
        }
    }
}

fn default_confirmation_ttl_secs() -> u64 {
    300
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Level for `tether*` targets when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
