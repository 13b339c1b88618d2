// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authorized access to the document API.
//!
//! [`AuthorizedClient`] attaches the access token to every request. A 401 on
//! a request that carried a token joins the token manager's single-flight
//! refresh and retries the request once with the new token. A retry that
//! fails again is final.

pub mod wire;

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Once};
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, StatusCode};
use tracing::{debug, info};

use crate::api::wire::{StoredFile, UploadResponse};
use crate::error::{check_status, ClientError};
use crate::token::TokenManager;
use crate::upload::task::UploadFile;
use crate::upload::{ProgressFn, UploadTransport};

/// Upload bodies are streamed in chunks of this size; progress is reported
/// once per chunk.
pub const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

static CRYPTO_INIT: Once = Once::new();

/// Install the rustls crypto provider (needed for reqwest even on plain HTTP).
pub fn ensure_crypto_provider() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Build the shared HTTP client.
pub fn http_client(timeout: Duration) -> reqwest::Client {
    ensure_crypto_provider();
    reqwest::Client::builder().timeout(timeout).build().unwrap_or_default()
}

/// HTTP client for authenticated API calls.
#[derive(Clone)]
pub struct AuthorizedClient {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<TokenManager>,
}

impl AuthorizedClient {
    pub fn new(tokens: Arc<TokenManager>) -> Self {
        Self { http: tokens.http().clone(), base_url: tokens.base_url().to_owned(), tokens }
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send a request built by `build`, handling the 401 refresh-and-retry.
    ///
    /// `build` runs once per attempt, so request bodies are rebuilt for the
    /// retry. Non-2xx responses come back as [`ClientError::Http`].
    pub async fn send<F>(&self, build: F) -> Result<reqwest::Response, ClientError>
    where
        F: Fn(&reqwest::Client) -> Result<RequestBuilder, ClientError>,
    {
        let attached = self.tokens.access_token();
        let resp = self.dispatch(&build, attached.as_deref()).await?;
        if resp.status() != StatusCode::UNAUTHORIZED || attached.is_none() {
            return check_status(resp).await;
        }

        let token = match self.tokens.access_token() {
            // Logged out while the request was in flight.
            None => return check_status(resp).await,
            // Another request already rotated the token.
            Some(current) if Some(&current) != attached.as_ref() => {
                debug!("access token already rotated, retrying");
                current
            }
            Some(_) => {
                debug!("access token rejected, refreshing");
                match self.tokens.refresh().await {
                    Ok(session) => session.access_token.ok_or(ClientError::TokenExpired)?,
                    // A login or logout overtook the refresh; use whatever is current.
                    Err(ClientError::SessionChanged) => match self.tokens.access_token() {
                        Some(current) => current,
                        None => return check_status(resp).await,
                    },
                    Err(e) => return Err(e),
                }
            }
        };

        let retried = self.dispatch(&build, Some(&token)).await?;
        check_status(retried).await
    }

    async fn dispatch<F>(
        &self,
        build: &F,
        token: Option<&str>,
    ) -> Result<reqwest::Response, ClientError>
    where
        F: Fn(&reqwest::Client) -> Result<RequestBuilder, ClientError>,
    {
        let req = build(&self.http)?;
        let req = match token {
            Some(token) => req.bearer_auth(token),
            None => req,
        };
        Ok(req.send().await?)
    }

    /// GET a JSON document.
    pub async fn get_json<T>(&self, path: &str) -> Result<T, ClientError>
    where
        T: serde::de::DeserializeOwned,
    {
        let url = self.url(path);
        let resp = self.send(|http| Ok(http.get(&url))).await?;
        Ok(resp.json().await?)
    }

    /// List the files stored for the current user.
    pub async fn list_files(&self) -> Result<Vec<StoredFile>, ClientError> {
        self.get_json("/files").await
    }

    /// Upload one file as `multipart/form-data`, reporting progress per chunk.
    pub async fn upload_file(
        &self,
        file: &UploadFile,
        progress: ProgressFn,
    ) -> Result<UploadResponse, ClientError> {
        let data = file.handle.read().await?;
        let url = self.url("/files/upload");
        let mime = file.content_type();
        let resp = self
            .send(|http| {
                let body = progress_body(data.clone(), Arc::clone(&progress));
                let part = Part::stream_with_length(body, data.len() as u64)
                    .file_name(file.name.clone())
                    .mime_str(&mime)
                    .map_err(|e| ClientError::Transport(format!("invalid content type {mime}: {e}")))?;
                Ok(http.post(&url).multipart(Form::new().part("files", part)))
            })
            .await?;
        let result: UploadResponse = resp.json().await?;
        info!(
            file = %file.name,
            successful = result.successful.len(),
            failed = result.failed.len(),
            "upload request finished"
        );
        Ok(result)
    }
}

impl UploadTransport for AuthorizedClient {
    fn upload(
        &self,
        file: UploadFile,
        progress: ProgressFn,
    ) -> Pin<Box<dyn Future<Output = Result<UploadResponse, ClientError>> + Send + '_>> {
        Box::pin(async move { self.upload_file(&file, progress).await })
    }
}

/// Stream `data` in chunks, calling `progress(sent, total)` as each chunk is
/// handed to the transport.
fn progress_body(data: Bytes, progress: ProgressFn) -> reqwest::Body {
    let total = data.len() as u64;
    let chunks: Vec<Bytes> = (0..data.len())
        .step_by(UPLOAD_CHUNK_SIZE)
        .map(|start| data.slice(start..(start + UPLOAD_CHUNK_SIZE).min(data.len())))
        .collect();
    let mut sent = 0u64;
    let stream = futures_util::stream::iter(chunks).map(move |chunk| {
        sent += chunk.len() as u64;
        progress(sent, total);
        Ok::<_, std::io::Error>(chunk)
    });
    reqwest::Body::wrap_stream(stream)
}

#[cfg(test)]
#[path = "api_tests.rs"]
mod tests;
