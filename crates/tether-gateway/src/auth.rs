// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pre-shared secret check for webhook requests.
//!
//! Runs before the body is read, so an unauthenticated request never reaches
//! the JSON parser. With no secret configured every request is rejected.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tether_audit::{AuditEvent, AuditEventType};
use tether_core::TetherError;

use crate::server::WebhookState;

/// Header Telegram sets to the `secret_token` given to `setWebhook`.
pub const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

type HmacSha256 = Hmac<Sha256>;

const COMPARE_KEY: &[u8] = b"tether-webhook-secret";

/// Compares two secrets in constant time with respect to their contents.
pub fn secrets_match(expected: &str, provided: &str) -> bool {
    let tag = |value: &str| {
        HmacSha256::new_from_slice(COMPARE_KEY).map(|mut mac| {
            mac.update(value.as_bytes());
            mac
        })
    };
    let (Ok(expected), Ok(provided)) = (tag(expected), tag(provided)) else {
        return false;
    };
    provided
        .verify_slice(&expected.finalize().into_bytes())
        .is_ok()
}

/// Checks a provided header value against the configured secret.
///
/// The error names the reason for logging; callers answer 401 either way.
pub fn authorize(
    expected: Option<&str>,
    provided: Option<&str>,
) -> Result<(), (TetherError, &'static str)> {
    match (expected, provided) {
        (Some(expected), Some(provided)) if secrets_match(expected, provided) => Ok(()),
        (None, _) => Err((TetherError::TransportAuthFailed, "no secret configured")),
        (_, None) => Err((TetherError::TransportAuthFailed, "missing secret header")),
        _ => Err((TetherError::TransportAuthFailed, "secret mismatch")),
    }
}

pub async fn secret_middleware(
    State(state): State<WebhookState>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let provided = request
        .headers()
        .get(SECRET_HEADER)
        .and_then(|v| v.to_str().ok());

    let (err, reason) = match authorize(state.secret.as_deref(), provided) {
        Ok(()) => return Ok(next.run(request).await),
        Err(rejected) => rejected,
    };
    tracing::warn!(error = %err, reason, "webhook request rejected");
    state
        .audit
        .record(AuditEvent::new(AuditEventType::WebhookError).detail("reason", reason))
        .await;
    Err(StatusCode::UNAUTHORIZED)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_secrets_match() {
        assert!(secrets_match("s3cret-value-123", "s3cret-value-123"));
    }

    #[test]
    fn different_secrets_do_not_match() {
        assert!(!secrets_match("s3cret-value-123", "s3cret-value-124"));
        assert!(!secrets_match("s3cret-value-123", "s3cret"));
        assert!(!secrets_match("s3cret-value-123", ""));
    }

    #[test]
    fn rejected_requests_are_transport_auth_failures() {
        assert!(authorize(Some("s3cret-value-123"), Some("s3cret-value-123")).is_ok());
        for (expected, provided, reason) in [
            (None, Some("anything"), "no secret configured"),
            (Some("s3cret-value-123"), None, "missing secret header"),
            (Some("s3cret-value-123"), Some("wrong"), "secret mismatch"),
        ] {
            let (err, why) = authorize(expected, provided).unwrap_err();
            assert!(matches!(err, TetherError::TransportAuthFailed));
            assert_eq!(why, reason);
        }
    }
}
