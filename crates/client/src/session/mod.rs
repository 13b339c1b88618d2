// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session state: tokens plus the cached user record.
//!
//! Only [`crate::token::TokenManager`] writes a session. Everything else reads
//! it through the manager's accessors.

pub mod claims;
pub mod store;

use serde::{Deserialize, Serialize};

use crate::session::store::SessionStore;

/// Store key for the access token.
pub const ACCESS_TOKEN_KEY: &str = "access_token";
/// Store key for the refresh token.
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
/// Store key for the JSON-encoded user record.
pub const USER_KEY: &str = "current_user";

/// The authenticated user as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(deserialize_with = "crate::api::wire::id_string")]
    pub id: String,
    pub username: String,
    pub email: String,
    pub role: String,
}

/// Tokens and user for the current login.
///
/// `user` is present exactly when `access_token` is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub user: Option<User>,
}

impl Session {
    pub fn new(access_token: String, refresh_token: String, user: User) -> Self {
        Self { access_token: Some(access_token), refresh_token: Some(refresh_token), user: Some(user) }
    }

    /// Read a session back from the store.
    ///
    /// A half-written session (token without user, or an unreadable user
    /// record) loads as having no access token and no user.
    pub fn load(store: &dyn SessionStore) -> Self {
        let refresh_token = store.get(REFRESH_TOKEN_KEY);
        let access_token = store.get(ACCESS_TOKEN_KEY);
        let user = store.get(USER_KEY).and_then(|raw| match serde_json::from_str::<User>(&raw) {
            Ok(user) => Some(user),
            Err(e) => {
                tracing::warn!(err = %e, "discarding unreadable stored user record");
                None
            }
        });
        match (access_token, user) {
            (Some(access_token), Some(user)) => {
                Self { access_token: Some(access_token), refresh_token, user: Some(user) }
            }
            _ => Self { access_token: None, refresh_token, user: None },
        }
    }

    /// Write every field to the store, removing keys for absent fields.
    pub fn save(&self, store: &dyn SessionStore) {
        put(store, ACCESS_TOKEN_KEY, self.access_token.clone());
        put(store, REFRESH_TOKEN_KEY, self.refresh_token.clone());
        let user = self.user.as_ref().and_then(|u| serde_json::to_string(u).ok());
        put(store, USER_KEY, user);
    }

    /// Remove every session key from the store.
    pub fn clear(store: &dyn SessionStore) {
        store.remove(ACCESS_TOKEN_KEY);
        store.remove(REFRESH_TOKEN_KEY);
        store.remove(USER_KEY);
    }
}

fn put(store: &dyn SessionStore, key: &str, value: Option<String>) {
    match value {
        Some(v) => store.set(key, &v),
        None => store.remove(key),
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
