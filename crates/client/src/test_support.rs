// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: an in-process mock of the document API and
//! helpers for building tokens and managers against it.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Multipart, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use crate::api::http_client;
use crate::config::ClientConfig;
use crate::nav::Navigator;
use crate::session::store::{MemorySessionStore, SessionStore};
use crate::session::{Session, User};
use crate::token::{epoch_ms, TokenManager};

pub const USERNAME: &str = "testuser";
pub const PASSWORD: &str = "password123";

/// Build an unsigned JWT-shaped token expiring at `exp` (epoch seconds).
pub fn make_token(subject: &str, exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = json!({
        "sub": subject,
        "username": USERNAME,
        "email": "testuser@example.com",
        "role": "user",
        "exp": exp,
    });
    let body = URL_SAFE_NO_PAD.encode(payload.to_string());
    format!("{header}.{body}.sig")
}

pub fn now_secs() -> i64 {
    epoch_ms() / 1000
}

pub fn test_user() -> User {
    User {
        id: "1".to_owned(),
        username: USERNAME.to_owned(),
        email: "testuser@example.com".to_owned(),
        role: "user".to_owned(),
    }
}

/// Counts "go to login" instructions.
#[derive(Debug, Default)]
pub struct RecordingNavigator {
    pub calls: AtomicU32,
}

impl RecordingNavigator {
    pub fn count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Navigator for RecordingNavigator {
    fn go_to_login(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// Mock document API.
///
/// Issues tokens valid for `token_ttl_secs`, tracks which access tokens it
/// accepts, and counts calls per endpoint.
pub struct MockBackend {
    pub token_ttl_secs: i64,
    pub refresh_delay: Mutex<Duration>,
    /// Statuses returned by the next refresh calls before falling back to 200.
    pub refresh_script: Mutex<VecDeque<u16>>,
    pub valid_tokens: Mutex<HashSet<String>>,
    /// When false every bearer token is refused, even freshly issued ones.
    pub accept_tokens: AtomicBool,
    pub uploaded: Mutex<Vec<String>>,
    pub login_calls: AtomicU32,
    pub refresh_calls: AtomicU32,
    pub logout_calls: AtomicU32,
    pub upload_calls: AtomicU32,
    pub list_calls: AtomicU32,
    pub issued: AtomicUsize,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self {
            token_ttl_secs: 900,
            refresh_delay: Mutex::new(Duration::ZERO),
            refresh_script: Mutex::new(VecDeque::new()),
            valid_tokens: Mutex::new(HashSet::new()),
            accept_tokens: AtomicBool::new(true),
            uploaded: Mutex::new(Vec::new()),
            login_calls: AtomicU32::new(0),
            refresh_calls: AtomicU32::new(0),
            logout_calls: AtomicU32::new(0),
            upload_calls: AtomicU32::new(0),
            list_calls: AtomicU32::new(0),
            issued: AtomicUsize::new(0),
        }
    }
}

impl MockBackend {
    /// Mint a new accepted token pair.
    pub fn issue(&self) -> Value {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let access = make_token(&format!("1-{n}"), now_secs() + self.token_ttl_secs);
        self.valid_tokens.lock().insert(access.clone());
        json!({
            "accessToken": access,
            "refreshToken": format!("refresh-{n}"),
            "user": { "id": 1, "username": USERNAME, "email": "testuser@example.com", "role": "user" },
            "expiresIn": self.token_ttl_secs,
        })
    }

    /// Stop accepting every access token issued so far.
    pub fn revoke_all(&self) {
        self.valid_tokens.lock().clear();
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        if !self.accept_tokens.load(Ordering::SeqCst) {
            return false;
        }
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|t| self.valid_tokens.lock().contains(t))
    }

    pub fn refresh_count(&self) -> u32 {
        self.refresh_calls.load(Ordering::SeqCst)
    }
}

fn unauthorized() -> (StatusCode, Json<Value>) {
    (StatusCode::UNAUTHORIZED, Json(json!({ "statusCode": 401, "message": "Unauthorized" })))
}

async fn login(State(b): State<Arc<MockBackend>>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    b.login_calls.fetch_add(1, Ordering::SeqCst);
    if body["username"] == USERNAME && body["password"] == PASSWORD {
        (StatusCode::OK, Json(b.issue()))
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "statusCode": 401, "message": "Invalid credentials" })),
        )
    }
}

async fn register(State(b): State<Arc<MockBackend>>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    if body["username"] == USERNAME {
        return (
            StatusCode::CONFLICT,
            Json(json!({ "statusCode": 409, "message": "Username already taken" })),
        );
    }
    (StatusCode::CREATED, Json(b.issue()))
}

async fn refresh(State(b): State<Arc<MockBackend>>, Json(_body): Json<Value>) -> (StatusCode, Json<Value>) {
    b.refresh_calls.fetch_add(1, Ordering::SeqCst);
    let delay = *b.refresh_delay.lock();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    let scripted = b.refresh_script.lock().pop_front();
    match scripted {
        Some(status) if status != 200 => (
            StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Json(json!({ "statusCode": status, "message": "refresh refused" })),
        ),
        _ => (StatusCode::OK, Json(b.issue())),
    }
}

async fn logout(State(b): State<Arc<MockBackend>>) -> StatusCode {
    b.logout_calls.fetch_add(1, Ordering::SeqCst);
    StatusCode::OK
}

async fn list_files(State(b): State<Arc<MockBackend>>, headers: HeaderMap) -> (StatusCode, Json<Value>) {
    b.list_calls.fetch_add(1, Ordering::SeqCst);
    if !b.authorized(&headers) {
        return unauthorized();
    }
    let files: Vec<Value> = b
        .uploaded
        .lock()
        .iter()
        .enumerate()
        .map(|(i, name)| {
            json!({ "id": i + 1, "originalName": name, "size": 0, "uploadedAt": "2026-01-01T00:00:00Z" })
        })
        .collect();
    (StatusCode::OK, Json(Value::Array(files)))
}

/// Files whose name contains "reject" are reported as failed in the body.
///
/// The body is read before the token is checked so the client never sees a
/// reset mid-stream.
async fn upload(
    State(b): State<Arc<MockBackend>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> (StatusCode, Json<Value>) {
    b.upload_calls.fetch_add(1, Ordering::SeqCst);
    let mut received = Vec::new();
    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.file_name().unwrap_or("unnamed").to_owned();
        let size = field.bytes().await.map(|b| b.len()).unwrap_or(0);
        received.push((name, size));
    }
    if !b.authorized(&headers) {
        return unauthorized();
    }
    let mut successful = Vec::new();
    let mut failed = Vec::new();
    for (name, size) in received {
        if name.contains("reject") {
            failed.push(json!({ "originalName": name, "error": "File rejected by scanner", "size": size }));
        } else {
            let id = {
                let mut uploaded = b.uploaded.lock();
                uploaded.push(name.clone());
                uploaded.len()
            };
            successful.push(json!({
                "id": id,
                "originalName": name,
                "size": size,
                "uploadedAt": "2026-01-01T00:00:00Z",
            }));
        }
    }
    let total = successful.len() + failed.len();
    (StatusCode::OK, Json(json!({ "successful": successful, "failed": failed, "total": total })))
}

/// Start the mock on an ephemeral port and return its API base URL.
pub async fn spawn_backend(backend: Arc<MockBackend>) -> String {
    let app = Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/register", post(register))
        .route("/api/auth/refresh", post(refresh))
        .route("/api/auth/logout", post(logout))
        .route("/api/files", get(list_files))
        .route("/api/files/upload", post(upload))
        .with_state(backend);

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    format!("http://{addr}/api")
}

/// A token manager wired to `base_url` with an in-memory store.
pub fn manager_for(
    base_url: &str,
) -> (Arc<TokenManager>, Arc<MemorySessionStore>, Arc<RecordingNavigator>) {
    let config = ClientConfig::with_api_url(base_url);
    let store = Arc::new(MemorySessionStore::new());
    let nav = Arc::new(RecordingNavigator::default());
    let manager = TokenManager::new(
        http_client(config.request_timeout()),
        &config,
        Arc::clone(&store) as Arc<dyn SessionStore>,
        Arc::clone(&nav) as Arc<dyn Navigator>,
    );
    (manager, store, nav)
}

/// Store a session whose access token the server no longer accepts.
pub fn seed_stale_session(store: &dyn SessionStore, exp: i64) -> String {
    let stale = make_token("1-stale", exp);
    Session::new(stale.clone(), "refresh-0".to_owned(), test_user()).save(store);
    stale
}
