// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Docdrop: client core for a document-upload service.
//!
//! Keeps the login session alive (single-flight and proactive token refresh),
//! authorizes API calls with one refresh-and-retry on 401, and runs a bounded
//! upload queue on top of them.

pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod nav;
pub mod session;
pub mod token;
pub mod upload;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use crate::api::{http_client, AuthorizedClient};
use crate::config::ClientConfig;
use crate::nav::{LogNavigator, Navigator};
use crate::session::store::{FileSessionStore, SessionStore};
use crate::token::TokenManager;
use crate::upload::UploadQueue;

/// The wired-up client: session owner, API client and upload queue.
///
/// The queue drains itself whenever the session ends.
pub struct Client {
    pub tokens: Arc<TokenManager>,
    pub api: AuthorizedClient,
    pub queue: Arc<UploadQueue>,
}

impl Client {
    /// Wire a client over `store`. Must be called inside a Tokio runtime.
    pub fn new(
        config: &ClientConfig,
        store: Arc<dyn SessionStore>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        let tokens =
            TokenManager::new(http_client(config.request_timeout()), config, store, navigator);
        let api = AuthorizedClient::new(Arc::clone(&tokens));
        let queue = UploadQueue::new(
            config.upload_policy(),
            config.max_concurrent,
            Arc::new(api.clone()),
        );
        queue.drain_on_logout(tokens.session_ended());
        Self { tokens, api, queue }
    }

    /// Client backed by the on-disk session file, with any saved session
    /// restored.
    pub fn open(config: &ClientConfig) -> Self {
        let store = FileSessionStore::open(config.session_path());
        let client = Self::new(config, Arc::new(store), Arc::new(LogNavigator));
        client.tokens.restore();
        client
    }
}
