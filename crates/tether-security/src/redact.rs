// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Secret redaction for replies, persisted output, audit details and logs.
//!
//! Two complementary mechanisms:
//! 1. **Pattern-based**: known credential shapes (bot tokens, API keys,
//!    bearer headers, `key=value` and JSON secret fields).
//! 2. **Exact-match**: configured secrets registered at startup, such as the
//!    bot token and the webhook secret.

use std::io::Write;
use std::sync::{Arc, LazyLock, RwLock};

use regex::Regex;

/// Ordered (pattern, replacement) pairs. Replacements may use capture groups.
static REDACTION_RULES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (
            Regex::new(r"\b\d{8,11}:[A-Za-z0-9_-]{20,}\b").unwrap(),
            "[REDACTED_BOT_TOKEN]",
        ),
        (
            Regex::new(r"\b(?:sk|rk|pk)-[A-Za-z0-9_-]{16,}\b").unwrap(),
            "[REDACTED_API_KEY]",
        ),
        (
            Regex::new(r"(?i)\bbearer\s+[A-Za-z0-9\-._~+/]+=*").unwrap(),
            "Bearer [REDACTED]",
        ),
        (
            Regex::new(r#"(?i)("?(?:password|passwd|secret|token|api[_-]?key)"?\s*:\s*")([^"]+)(")"#)
                .unwrap(),
            "${1}[REDACTED]${3}",
        ),
        (
            Regex::new(r"(?i)\b(password|passwd|secret|token|api[_-]?key)\b(\s*[:=]\s*)([^\s,;]+)")
                .unwrap(),
            "${1}${2}[REDACTED]",
        ),
    ]
});

/// Placeholder for exact-match secrets.
pub const REDACTED: &str = "[REDACTED]";

/// Redact secrets from a string using the built-in patterns and exact values.
pub fn redact(input: &str, exact_values: &[String]) -> String {
    if input.is_empty() {
        return String::new();
    }

    // Exact values go first so a configured token is masked even when it
    // does not match a known shape.
    let mut result = input.to_string();
    let mut sorted: Vec<&String> = exact_values.iter().filter(|v| !v.is_empty()).collect();
    sorted.sort_by_key(|v| std::cmp::Reverse(v.len()));
    for value in sorted {
        result = result.replace(value.as_str(), REDACTED);
    }

    for (pattern, replacement) in REDACTION_RULES.iter() {
        if pattern.is_match(&result) {
            result = pattern.replace_all(&result, *replacement).into_owned();
        }
    }
    result
}

/// Shared, cloneable redactor carrying the runtime secret list.
#[derive(Debug, Clone, Default)]
pub struct Redactor {
    secrets: Arc<RwLock<Vec<String>>>,
}

impl Redactor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Redactor preloaded with secrets; empty and duplicate entries are skipped.
    pub fn with_secrets<I, S>(secrets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let redactor = Self::new();
        for secret in secrets {
            redactor.add_secret(secret);
        }
        redactor
    }

    /// Register another exact value to mask.
    pub fn add_secret(&self, secret: impl Into<String>) {
        let secret = secret.into();
        if secret.is_empty() {
            return;
        }
        if let Ok(mut values) = self.secrets.write() {
            if !values.contains(&secret) {
                values.push(secret);
            }
        }
    }

    pub fn redact(&self, input: &str) -> String {
        let values = self
            .secrets
            .read()
            .map(|v| v.clone())
            .unwrap_or_default();
        redact(input, &values)
    }

    /// A writer that masks secrets before forwarding to `inner`.
    pub fn writer<W: Write>(&self, inner: W) -> RedactingWriter<W> {
        RedactingWriter::new(inner, self.secrets.clone())
    }
}

/// A writer wrapper that redacts secrets from output.
///
/// Used as the tracing writer so formatted log lines never carry the bot
/// token or webhook secret.
pub struct RedactingWriter<W> {
    inner: W,
    secrets: Arc<RwLock<Vec<String>>>,
}

impl<W: Write> RedactingWriter<W> {
    pub fn new(inner: W, secrets: Arc<RwLock<Vec<String>>>) -> Self {
        Self { inner, secrets }
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let input = String::from_utf8_lossy(buf);
        let values = self
            .secrets
            .read()
            .map(|v| v.clone())
            .unwrap_or_default();
        self.inner.write_all(redact(&input, &values).as_bytes())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}
