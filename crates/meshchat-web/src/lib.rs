//! HTTP, WebSocket, and SSE gateway for the Meshchat peer.
//!
//! The bridge never holds a back-reference to the runtime: it talks
//! outward through callbacks (line submission, session adoption, mesh
//! file sharing) and inward through the [`WebClients`] registries the
//! runtime publishes events to. Token validation is delegated to
//! `meshchat-auth`; the bridge never issues tokens.

pub mod events;

pub use events::{WebClients, WebEvent};

use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State, WebSocketUpgrade};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{SinkExt, StreamExt, TryStreamExt};
use meshchat_proto::Record;
use meshchat_storage::FileStore;
use meshchat_types::{FileRecord, MeshError, Notification, Result};
use serde::Deserialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::io::{ReaderStream, StreamReader};
use tower_http::trace::TraceLayer;

/// Upload size cap.
const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Cap on `/api/files` listings.
const FILE_LIST_LIMIT: usize = 100;

const INDEX_HTML: &str = include_str!("../static/index.html");
const APP_HTML: &str = include_str!("../static/app.html");
const STYLE_CSS: &str = include_str!("../static/style.css");
const APP_JS: &str = include_str!("../static/app.js");

// ---------------------------------------------------------------------------
// Callback seams
// ---------------------------------------------------------------------------

/// Exposes the chat backlog without coupling the bridge to the
/// runtime implementation.
pub trait HistoryProvider: Send + Sync {
    /// Copy of the in-memory window, oldest first.
    fn all(&self) -> Vec<Record>;
}

/// Hands one line of browser input to the runtime's line processor.
pub type SubmitFn = Arc<dyn Fn(String) + Send + Sync>;

/// Applies a validated `(username, token)` login to the runtime.
pub type SessionFn = Arc<dyn Fn(&str, &str) -> Result<()> + Send + Sync>;

/// Announces an upload on the mesh, optionally targeted.
pub type ShareFn = Arc<dyn Fn(FileRecord, String) + Send + Sync>;

// ---------------------------------------------------------------------------
// WebBridge
// ---------------------------------------------------------------------------

/// Dependencies needed to construct a [`WebBridge`].
pub struct WebBridgeOptions {
    /// Address to serve on (`host:port`).
    pub addr: String,
    /// Shared client registries the runtime publishes into.
    pub clients: Arc<WebClients>,
    /// File store; `None` disables the files API.
    pub files: Option<Arc<FileStore>>,
    /// Chat backlog source for fresh websocket clients.
    pub history: Arc<dyn HistoryProvider>,
    /// Line-submission callback.
    pub submit: SubmitFn,
    /// Login-adoption callback.
    pub session: SessionFn,
    /// Mesh-share callback; `None` skips mesh announcements.
    pub share: Option<ShareFn>,
}

struct BridgeState {
    clients: Arc<WebClients>,
    files: Option<Arc<FileStore>>,
    history: Arc<dyn HistoryProvider>,
    submit: SubmitFn,
    session: SessionFn,
    share: Option<ShareFn>,
}

/// Wires the embedded web UI to the runtime via HTTP, WS, and SSE.
pub struct WebBridge {
    addr: String,
    state: Arc<BridgeState>,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WebBridge {
    /// Creates an unstarted bridge.
    pub fn new(opts: WebBridgeOptions) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            addr: opts.addr,
            state: Arc::new(BridgeState {
                clients: opts.clients,
                files: opts.files,
                history: opts.history,
                submit: opts.submit,
                session: opts.session,
                share: opts.share,
            }),
            shutdown_tx,
            task: Mutex::new(None),
        }
    }

    /// The bound address, used to build public attachment URLs.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Binds and starts serving in a background task.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::BindError`]; fatal at startup.
    pub async fn start(&self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.addr)
            .await
            .map_err(|e| MeshError::BindError {
                addr: self.addr.clone(),
                reason: e.to_string(),
            })?;

        let router = build_router(Arc::clone(&self.state));
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let addr = self.addr.clone();
        let task = tokio::spawn(async move {
            tracing::info!(addr = %addr, "web ui listening");
            let server = axum::serve(listener, router).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });
            if let Err(e) = server.await {
                tracing::warn!(error = %e, "web ui server error");
            }
        });
        *self.task.lock().expect("task lock") = Some(task);
        Ok(())
    }

    /// Begins graceful shutdown. Idempotent.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

fn build_router(state: Arc<BridgeState>) -> Router {
    Router::new()
        .route("/", get(index_page))
        .route("/chat", get(chat_page))
        .route("/static/*path", get(static_asset))
        .route("/ws", get(ws_handler))
        .route("/events", get(sse_handler))
        .route("/api/files", get(list_files).post(upload_file))
        .route("/api/files/:id", get(download_file))
        .route("/api/push/subscribe", post(push_subscribe))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

#[derive(Deserialize, Default)]
struct AuthQuery {
    #[serde(default)]
    username: String,
    #[serde(default)]
    token: String,
}

/// Resolves the caller's principal from a query token or a bearer
/// header. When a username accompanies the token it must match the
/// decoded principal case-insensitively.
fn require_auth(headers: &HeaderMap, query: &AuthQuery) -> std::result::Result<String, (StatusCode, String)> {
    if !query.token.is_empty() {
        let resolved = meshchat_auth::validate_token(&query.token)
            .map_err(|e| (StatusCode::UNAUTHORIZED, e.to_string()))?;
        if !query.username.is_empty() && !query.username.eq_ignore_ascii_case(&resolved) {
            return Err((StatusCode::UNAUTHORIZED, "username mismatch".into()));
        }
        return Ok(resolved);
    }
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let mut parts = header.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(scheme), Some(token), None) if scheme.eq_ignore_ascii_case("bearer") => {
            meshchat_auth::validate_token(token)
                .map_err(|e| (StatusCode::UNAUTHORIZED, e.to_string()))
        }
        _ => Err((StatusCode::UNAUTHORIZED, "missing authorization".into())),
    }
}

/// Strict query-credential check used by `/ws` and `/events`.
fn require_query_auth(query: &AuthQuery) -> std::result::Result<String, (StatusCode, String)> {
    if query.username.is_empty() || query.token.is_empty() {
        return Err((StatusCode::UNAUTHORIZED, "missing credentials".into()));
    }
    let resolved = meshchat_auth::validate_token(&query.token)
        .map_err(|_| (StatusCode::UNAUTHORIZED, "invalid token".into()))?;
    if !resolved.eq_ignore_ascii_case(&query.username) {
        return Err((StatusCode::UNAUTHORIZED, "invalid token".into()));
    }
    Ok(resolved)
}

// ---------------------------------------------------------------------------
// Pages and static assets
// ---------------------------------------------------------------------------

async fn index_page() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn chat_page() -> Html<&'static str> {
    Html(APP_HTML)
}

async fn static_asset(Path(path): Path<String>) -> Response {
    match path.as_str() {
        "style.css" => ([(CONTENT_TYPE, "text/css; charset=utf-8")], STYLE_CSS).into_response(),
        "app.js" => (
            [(CONTENT_TYPE, "application/javascript; charset=utf-8")],
            APP_JS,
        )
            .into_response(),
        _ => (StatusCode::NOT_FOUND, "no such asset").into_response(),
    }
}

// ---------------------------------------------------------------------------
// WebSocket
// ---------------------------------------------------------------------------

async fn ws_handler(
    State(state): State<Arc<BridgeState>>,
    Query(query): Query<AuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let username = match require_query_auth(&query) {
        Ok(username) => username,
        Err(reject) => return reject.into_response(),
    };
    if let Err(e) = (state.session)(&username, &query.token) {
        return (StatusCode::FORBIDDEN, format!("session rejected: {e}")).into_response();
    }
    ws.on_upgrade(move |socket| client_session(state, socket))
}

/// One connected websocket client: push the backlog, forward queued
/// events, and hand every inbound line to the runtime.
async fn client_session(state: Arc<BridgeState>, mut socket: WebSocket) {
    let backlog = WebEvent::History {
        history: state.history.all(),
    };
    if let Ok(payload) = serde_json::to_string(&backlog) {
        if socket.send(Message::Text(payload)).await.is_err() {
            return;
        }
    }

    let mut rx = state.clients.register_ws();
    let (mut sender, mut receiver) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if sender.send(Message::Text(payload)).await.is_err() {
                return;
            }
        }
    });

    while let Some(Ok(message)) = receiver.next().await {
        if let Message::Text(text) = message {
            let line = text.trim();
            if !line.is_empty() {
                (state.submit)(line.to_string());
            }
        }
    }
    writer.abort();
}

// ---------------------------------------------------------------------------
// SSE
// ---------------------------------------------------------------------------

async fn sse_handler(
    State(state): State<Arc<BridgeState>>,
    Query(query): Query<AuthQuery>,
) -> Response {
    if let Err(reject) = require_query_auth(&query) {
        return reject.into_response();
    }
    let rx = state.clients.register_sse();
    let stream = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv()
            .await
            .map(|payload| (Ok::<_, std::convert::Infallible>(Event::default().data(payload)), rx))
    });
    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

// ---------------------------------------------------------------------------
// Files API
// ---------------------------------------------------------------------------

async fn list_files(
    State(state): State<Arc<BridgeState>>,
    Query(query): Query<AuthQuery>,
    headers: HeaderMap,
) -> Response {
    if let Err(reject) = require_auth(&headers, &query) {
        return reject.into_response();
    }
    let Some(files) = &state.files else {
        return (StatusCode::SERVICE_UNAVAILABLE, "file storage disabled").into_response();
    };
    match files.list(FILE_LIST_LIMIT) {
        Ok(records) => Json(records).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "file listing failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "unable to list files").into_response()
        }
    }
}

async fn upload_file(
    State(state): State<Arc<BridgeState>>,
    Query(query): Query<AuthQuery>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    let username = match require_auth(&headers, &query) {
        Ok(username) => username,
        Err(reject) => return reject.into_response(),
    };
    let Some(files) = state.files.clone() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "file storage disabled").into_response();
    };

    let mut target = String::new();
    let mut saved: Option<FileRecord> = None;
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(_) => return (StatusCode::BAD_REQUEST, "invalid upload").into_response(),
        };
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "file" => {
                let name = field.file_name().unwrap_or("upload.bin").to_string();
                let mut reader = StreamReader::new(
                    field.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
                );
                match files.save(&name, &username, &mut reader).await {
                    Ok(record) => saved = Some(record),
                    Err(e) => {
                        tracing::warn!(error = %e, "upload failed");
                        return (StatusCode::INTERNAL_SERVER_ERROR, "upload failed")
                            .into_response();
                    }
                }
            }
            "target" => {
                target = field.text().await.unwrap_or_default().trim().to_string();
            }
            _ => {}
        }
    }
    let Some(record) = saved else {
        return (StatusCode::BAD_REQUEST, "missing file").into_response();
    };

    state.clients.publish(&WebEvent::File {
        file: record.clone(),
    });
    if let Some(share) = &state.share {
        share(record.clone(), target);
    }
    state.clients.publish(&WebEvent::Notification {
        notification: Notification {
            id: record.id.clone(),
            text: format!("{username} uploaded {}", record.name),
            level: "file".into(),
            timestamp: chrono::Utc::now(),
            from: username,
        },
    });

    (StatusCode::CREATED, Json(record)).into_response()
}

#[derive(Deserialize, Default)]
struct DownloadQuery {
    #[serde(default)]
    key: String,
    #[serde(default)]
    download: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    token: String,
}

async fn download_file(
    State(state): State<Arc<BridgeState>>,
    Path(id): Path<String>,
    Query(query): Query<DownloadQuery>,
    headers: HeaderMap,
) -> Response {
    let Some(files) = &state.files else {
        return (StatusCode::SERVICE_UNAVAILABLE, "file storage disabled").into_response();
    };
    let (entry, file) = match files.open_file(&id).await {
        Ok(found) => found,
        Err(_) => return (StatusCode::NOT_FOUND, "file not found").into_response(),
    };

    let share_key_matches = !query.key.is_empty()
        && !entry.record.share_key.is_empty()
        && query.key == entry.record.share_key;
    if !share_key_matches {
        let auth_query = AuthQuery {
            username: query.username.clone(),
            token: query.token.clone(),
        };
        if let Err(reject) = require_auth(&headers, &auth_query) {
            return reject.into_response();
        }
    }

    let mime = if entry.record.mime.is_empty() {
        "application/octet-stream"
    } else {
        entry.record.mime.as_str()
    };
    let disposition = if query.download == "1" {
        "attachment"
    } else {
        "inline"
    };

    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    let headers = response.headers_mut();
    if let Ok(value) = mime.parse() {
        headers.insert(CONTENT_TYPE, value);
    }
    if let Ok(value) = entry.record.size.to_string().parse() {
        headers.insert(CONTENT_LENGTH, value);
    }
    if let Ok(value) = entry.record.name.parse() {
        headers.insert("x-filename", value);
    }
    if let Ok(value) = format!("{disposition}; filename=\"{}\"", entry.record.name).parse() {
        headers.insert(CONTENT_DISPOSITION, value);
    }
    response
}

// ---------------------------------------------------------------------------
// Push subscriptions
// ---------------------------------------------------------------------------

/// Accept-only endpoint reserved for future push plumbing.
async fn push_subscribe(
    State(_state): State<Arc<BridgeState>>,
    Query(query): Query<AuthQuery>,
    headers: HeaderMap,
    _body: axum::body::Bytes,
) -> Response {
    if let Err(reject) = require_auth(&headers, &query) {
        return reject.into_response();
    }
    StatusCode::ACCEPTED.into_response()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_header_resolves_principal() {
        let token = meshchat_auth::issue_token("alice").expect("token");
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            format!("Bearer {token}").parse().expect("header"),
        );
        let who = require_auth(&headers, &AuthQuery::default()).expect("authorized");
        assert_eq!(who, "alice");
    }

    #[test]
    fn query_token_with_mismatched_username_is_rejected() {
        let token = meshchat_auth::issue_token("alice").expect("token");
        let query = AuthQuery {
            username: "bob".into(),
            token,
        };
        let err = require_auth(&HeaderMap::new(), &query).unwrap_err();
        assert_eq!(err.0, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn missing_credentials_are_unauthorized() {
        let err = require_auth(&HeaderMap::new(), &AuthQuery::default()).unwrap_err();
        assert_eq!(err.0, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn query_auth_accepts_case_folded_username() {
        let token = meshchat_auth::issue_token("Alice").expect("token");
        let query = AuthQuery {
            username: "alice".into(),
            token,
        };
        assert_eq!(require_query_auth(&query).expect("authorized"), "Alice");
    }

    #[test]
    fn query_auth_requires_both_fields() {
        let query = AuthQuery {
            username: "alice".into(),
            token: String::new(),
        };
        assert!(require_query_auth(&query).is_err());
    }
}
