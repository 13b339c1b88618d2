// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request and response bodies for the document API.

use serde::{Deserialize, Deserializer, Serialize};

use crate::session::User;

#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Serialize)]
pub struct RegisterRequest<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub password: &'a str,
}

/// Body for both `/auth/refresh` and `/auth/logout`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

/// Token pair plus user, returned by login, register and refresh.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub user: User,
    /// Access token lifetime in seconds, informational only.
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// A file the server accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub original_name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub uploaded_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// A file the server refused within an otherwise successful request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedFile {
    pub original_name: String,
    pub error: String,
    #[serde(default)]
    pub size: u64,
}

/// Result of a multipart upload; partial success is normal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    #[serde(default)]
    pub successful: Vec<StoredFile>,
    #[serde(default)]
    pub failed: Vec<FailedFile>,
    #[serde(default)]
    pub total: usize,
}

impl UploadResponse {
    /// Per-file outcome for `name` in this response.
    ///
    /// A file listed as failed wins over one listed as successful. A response
    /// naming neither is a failure.
    pub fn outcome_for(&self, name: &str) -> Result<(), String> {
        if let Some(f) = self.failed.iter().find(|f| f.original_name == name) {
            return Err(f.error.clone());
        }
        if self.successful.iter().any(|f| f.original_name == name) {
            return Ok(());
        }
        match (self.successful.len(), self.failed.as_slice()) {
            // Single-file request: trust the one entry even if the server
            // normalised the name.
            (1, []) => Ok(()),
            (0, [only]) => Err(only.error.clone()),
            _ => Err(format!("server returned no result for {name}")),
        }
    }
}

/// Accept ids sent as either JSON strings or numbers.
pub(crate) fn id_string<'de, D>(de: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(de)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("expected string or number id, got {other}"))),
    }
}

#[cfg(test)]
#[path = "wire_tests.rs"]
mod tests;
