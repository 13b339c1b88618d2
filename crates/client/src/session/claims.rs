// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Read-only decoding of access token claims.
//!
//! The signature is never checked here; the server does that. Claims are used
//! only to decide whether a token is worth sending and when to refresh it.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;

use crate::error::ClientError;

/// Claims carried in an access token payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessClaims {
    pub subject: String,
    pub username: String,
    pub email: String,
    pub role: String,
    pub expires_at: i64,
}

#[derive(Deserialize)]
struct RawClaims {
    #[serde(default)]
    sub: Option<serde_json::Value>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    role: Option<String>,
    exp: Option<i64>,
}

impl AccessClaims {
    /// True when `exp` is strictly after `now_secs`.
    pub fn is_valid_at(&self, now_secs: i64) -> bool {
        self.expires_at > now_secs
    }

    pub fn expires_at_ms(&self) -> i64 {
        self.expires_at.saturating_mul(1000)
    }
}

/// Decode the payload segment of a `header.payload.signature` token.
///
/// Fails unless the payload is base64url JSON carrying a numeric `exp`.
pub fn decode_claims(token: &str) -> Result<AccessClaims, ClientError> {
    let mut parts = token.split('.');
    let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(payload), Some(_), None) => payload,
        _ => return Err(ClientError::InvalidToken("expected three segments".to_owned())),
    };
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| ClientError::InvalidToken(format!("payload is not base64url: {e}")))?;
    let raw: RawClaims = serde_json::from_slice(&bytes)
        .map_err(|e| ClientError::InvalidToken(format!("payload is not JSON: {e}")))?;
    let expires_at = raw.exp.ok_or_else(|| ClientError::InvalidToken("missing exp".to_owned()))?;
    let subject = match raw.sub {
        Some(serde_json::Value::String(s)) => s,
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };
    Ok(AccessClaims {
        subject,
        username: raw.username.unwrap_or_default(),
        email: raw.email.unwrap_or_default(),
        role: raw.role.unwrap_or_default(),
        expires_at,
    })
}

#[cfg(test)]
#[path = "claims_tests.rs"]
mod tests;
