// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::Deserialize;

use crate::upload::validate::Rejection;

/// Errors surfaced by the session and upload core.
///
/// `Clone` so a single refresh outcome can be handed to every caller that
/// waited on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// Login or signup rejected by the server.
    #[error("authentication failed ({status}): {message}")]
    Authentication { status: u16, message: String },

    #[error("no refresh token stored")]
    NoRefreshToken,

    /// Refresh endpoint answered 401: the refresh token has expired.
    #[error("session expired, please log in again")]
    TokenExpired,

    /// Refresh endpoint answered 403: the refresh token was revoked.
    #[error("session rejected by server ({status})")]
    RefreshRejected { status: u16 },

    #[error("request failed ({status}): {message}")]
    Http { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid access token: {0}")]
    InvalidToken(String),

    #[error("io error: {0}")]
    Io(String),

    /// The session ended or was replaced while a refresh was in flight; its
    /// result was discarded.
    #[error("session changed during refresh")]
    SessionChanged,

    #[error("{} file(s) rejected", .0.len())]
    Validation(Vec<Rejection>),
}

impl ClientError {
    /// Whether this error ends the session.
    pub fn forces_logout(&self) -> bool {
        matches!(self, Self::NoRefreshToken | Self::TokenExpired | Self::RefreshRejected { .. })
    }

    /// HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Authentication { status, .. }
            | Self::RefreshRejected { status }
            | Self::Http { status, .. } => Some(*status),
            Self::TokenExpired => Some(401),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        Self::Transport(format!("malformed response: {e}"))
    }
}

/// Server error envelope: `{"statusCode": 401, "message": "..."}`.
///
/// `message` is either a string or a list of validation messages.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    message: Option<MessageField>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MessageField {
    One(String),
    Many(Vec<String>),
}

/// Extract a human-readable message from an error response body.
///
/// Falls back to the canonical reason phrase when the body carries nothing
/// usable.
pub fn error_message(status: reqwest::StatusCode, body: &str) -> String {
    let parsed = serde_json::from_str::<ErrorEnvelope>(body).ok();
    let message = parsed.and_then(|env| match env.message {
        Some(MessageField::One(s)) if !s.is_empty() => Some(s),
        Some(MessageField::Many(v)) if !v.is_empty() => Some(v.join("; ")),
        _ => env.error,
    });
    match message {
        Some(m) => m,
        None if !body.trim().is_empty() && !body.trim_start().starts_with('{') => {
            body.trim().to_owned()
        }
        None => status.canonical_reason().unwrap_or("unknown error").to_owned(),
    }
}

/// Turn a non-2xx response into [`ClientError::Http`], passing 2xx through.
pub async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ClientError::Http { status: status.as_u16(), message: error_message(status, &body) })
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
