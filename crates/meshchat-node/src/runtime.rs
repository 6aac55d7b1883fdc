//! The runtime orchestrator: long-lived state and its collaborators.
//!
//! [`Runtime`] is a cheap-clone handle over the shared inner state.
//! Loop bodies live in [`crate::loops`], inbound routing in
//! [`crate::incoming`], outbound building in [`crate::outgoing`], and
//! the local command language in [`crate::commands`].

use std::sync::Arc;
use std::time::Duration;

use meshchat_net::{Broadcaster, ConnManager, DialScheduler};
use meshchat_proto::{new_msg_id, Record, RecordKind};
use meshchat_storage::{FileStore, HistoryStore};
use meshchat_types::{FileRecord, MeshError, Result};
use tokio::sync::watch;

use crate::ack::AckTracker;
use crate::cache::MsgCache;
use crate::history::HistoryBuffer;
use crate::identity::Identity;
use crate::metrics::Metrics;
use crate::peers::{BlockList, PeerDirectory};
use crate::sink::Sink;

/// Default cache TTL when the option is zero.
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(600);

/// Default registry poll interval when the option is zero.
pub(crate) const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// RuntimeOptions
// ---------------------------------------------------------------------------

/// Dependencies needed to construct a [`Runtime`].
pub struct RuntimeOptions {
    /// Connection manager owning all sockets.
    pub cm: Arc<ConnManager>,
    /// TTL for the seen-ID cache; zero selects the default.
    pub cache_ttl: Duration,
    /// In-memory history window size; zero selects the default.
    pub history_size: usize,
    /// Durable history log; `None` degrades to the buffer alone.
    pub store: Option<HistoryStore>,
    /// File store; `None` disables file sharing.
    pub files: Option<Arc<FileStore>>,
    /// Ack tracker (already running).
    pub ack: Arc<AckTracker>,
    /// Dial scheduler.
    pub dialer: Arc<DialScheduler>,
    /// Composite UI sink.
    pub sink: Arc<dyn Sink>,
    /// Local identity.
    pub identity: Identity,
    /// Own listen address.
    pub self_addr: String,
    /// Web bridge address when the web UI is enabled; used for
    /// attachment URLs.
    pub web_addr: Option<String>,
    /// Bootstrap registry base URL.
    pub bootstrap_url: Option<String>,
    /// Registry poll interval; zero selects the default.
    pub poll_interval: Duration,
    /// Authentication service base URL for external persistence.
    pub auth_api: Option<String>,
    /// Root shutdown signal; `/quit` and fatal paths set it.
    pub shutdown_tx: watch::Sender<bool>,
}

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

pub(crate) struct RuntimeInner {
    pub(crate) cm: Arc<ConnManager>,
    pub(crate) cache: MsgCache,
    pub(crate) history: HistoryBuffer,
    pub(crate) store: Option<HistoryStore>,
    pub(crate) files: Option<Arc<FileStore>>,
    pub(crate) blocklist: BlockList,
    pub(crate) directory: PeerDirectory,
    pub(crate) metrics: Metrics,
    pub(crate) ack: Arc<AckTracker>,
    pub(crate) dialer: Arc<DialScheduler>,
    pub(crate) sink: Arc<dyn Sink>,
    pub(crate) identity: Identity,
    pub(crate) self_addr: String,
    pub(crate) web_addr: Option<String>,
    pub(crate) bootstrap_url: Option<String>,
    pub(crate) poll_interval: Duration,
    pub(crate) auth_api: Option<String>,
    pub(crate) http: reqwest::Client,
    pub(crate) shutdown_tx: watch::Sender<bool>,
}

/// Aggregates the long-lived state and collaborators of one peer.
#[derive(Clone)]
pub struct Runtime {
    pub(crate) inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Builds a runtime from its collaborators.
    pub fn new(opts: RuntimeOptions) -> Self {
        let cache_ttl = if opts.cache_ttl.is_zero() {
            DEFAULT_CACHE_TTL
        } else {
            opts.cache_ttl
        };
        let poll_interval = if opts.poll_interval.is_zero() {
            DEFAULT_POLL_INTERVAL
        } else {
            opts.poll_interval
        };
        Self {
            inner: Arc::new(RuntimeInner {
                cm: opts.cm,
                cache: MsgCache::new(cache_ttl),
                history: HistoryBuffer::new(opts.history_size),
                store: opts.store,
                files: opts.files,
                blocklist: BlockList::new(),
                directory: PeerDirectory::new(),
                metrics: Metrics::default(),
                ack: opts.ack,
                dialer: opts.dialer,
                sink: opts.sink,
                identity: opts.identity,
                self_addr: opts.self_addr,
                web_addr: opts.web_addr,
                bootstrap_url: opts.bootstrap_url,
                poll_interval,
                auth_api: opts.auth_api,
                http: reqwest::Client::new(),
                shutdown_tx: opts.shutdown_tx,
            }),
        }
    }

    /// Own listen address.
    pub fn self_addr(&self) -> &str {
        &self.inner.self_addr
    }

    /// Directory handle (tests and the `/peers` command).
    pub fn directory(&self) -> &PeerDirectory {
        &self.inner.directory
    }

    /// Copy of the in-memory history window.
    pub fn history_all(&self) -> Vec<Record> {
        self.inner.history.all()
    }

    /// Subscribes to the root shutdown signal.
    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.inner.shutdown_tx.subscribe()
    }

    /// Records the local identity in the own directory so DMs to self
    /// resolve and the peer list shows this node.
    pub fn record_self(&self) {
        let name = self.inner.identity.get();
        if !name.is_empty() {
            self.inner.directory.record(&name, &self.inner.self_addr);
        }
    }

    // -----------------------------------------------------------------
    // Registry
    // -----------------------------------------------------------------

    /// Announces this peer's address to the bootstrap registry.
    pub async fn register_self(&self) -> Result<()> {
        let Some(base) = self.inner.bootstrap_url.as_deref() else {
            return Ok(());
        };
        let url = format!("{}/register", base.trim_end_matches('/'));
        self.inner
            .http
            .post(url)
            .json(&serde_json::json!({ "addr": self.inner.self_addr }))
            .send()
            .await
            .map_err(|e| MeshError::NetworkError {
                reason: format!("register: {e}"),
            })?;
        Ok(())
    }

    /// Fetches the current peer list from the registry.
    pub(crate) async fn fetch_peers(&self) -> Result<Vec<String>> {
        let Some(base) = self.inner.bootstrap_url.as_deref() else {
            return Ok(Vec::new());
        };
        let url = format!("{}/peers", base.trim_end_matches('/'));
        let peers = self
            .inner
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| MeshError::NetworkError {
                reason: format!("fetch peers: {e}"),
            })?
            .json::<Vec<String>>()
            .await
            .map_err(|e| MeshError::NetworkError {
                reason: format!("decode peers: {e}"),
            })?;
        Ok(peers)
    }

    /// Seeds the dial scheduler from the registry and eagerly dials
    /// each peer once.
    pub async fn connect_bootstrap_peers(&self) {
        let peers = match self.fetch_peers().await {
            Ok(peers) => peers,
            Err(e) => {
                tracing::warn!(error = %e, "bootstrap fetch failed");
                return;
            }
        };
        for peer in peers {
            if peer == self.inner.self_addr {
                continue;
            }
            self.inner.dialer.add(&peer);
            if let Err(e) = self.inner.cm.connect(&peer).await {
                tracing::warn!(error = %e, "initial connect failed");
            }
        }
    }

    // -----------------------------------------------------------------
    // Control records
    // -----------------------------------------------------------------

    /// Floods a handshake announcing the current identity (and token
    /// when authenticated).
    pub async fn broadcast_handshake(&self) {
        let name = self.inner.identity.get();
        if name.is_empty() {
            return;
        }
        let record = Record {
            msg_id: new_msg_id(),
            kind: RecordKind::Handshake.as_str().into(),
            from: name,
            origin: self.inner.self_addr.clone(),
            auth_token: self.inner.identity.token(),
            timestamp: chrono::Utc::now(),
            ..Record::default()
        };
        self.inner.cm.broadcast(&record, "").await;
    }

    /// Sends an ack for a locally accepted record back toward its
    /// origin.
    pub(crate) async fn send_ack(&self, original: &Record) {
        let record = Record {
            msg_id: new_msg_id(),
            kind: RecordKind::Ack.as_str().into(),
            from: self.inner.identity.get(),
            origin: self.inner.self_addr.clone(),
            to: original.from.clone(),
            to_addr: original.origin.clone(),
            ack_for: original.msg_id.clone(),
            timestamp: chrono::Utc::now(),
            ..Record::default()
        };
        self.inner.cm.broadcast(&record, "").await;
    }

    // -----------------------------------------------------------------
    // External persistence
    // -----------------------------------------------------------------

    /// Fire-and-forget POST of an outbound message to the external
    /// authentication service, when configured and authenticated.
    pub(crate) fn persist_external(&self, record: &Record, receiver: &str) {
        let Some(base) = self.inner.auth_api.as_deref() else {
            return;
        };
        let token = self.inner.identity.token();
        if token.is_empty() {
            return;
        }
        let mut payload = serde_json::json!({
            "sender": record.from,
            "content": record.content,
        });
        if !receiver.is_empty() {
            payload["receiver"] = serde_json::Value::String(receiver.to_string());
        }
        let url = format!("{}/messages", base.trim_end_matches('/'));
        let client = self.inner.http.clone();
        tokio::spawn(async move {
            let result = client.post(url).bearer_auth(token).json(&payload).send().await;
            if let Err(e) = result {
                tracing::warn!(error = %e, "external persistence failed");
            }
        });
    }

    // -----------------------------------------------------------------
    // Web session
    // -----------------------------------------------------------------

    /// Applies a successful web-bridge login: adopts the identity and,
    /// when it changed, announces it to the mesh.
    pub fn web_login(&self, username: &str, token: &str) {
        if self.inner.identity.set_auth(username, token) {
            self.inner
                .sink
                .show_system(&format!("logged in as {username}"));
            let rt = self.clone();
            tokio::spawn(async move { rt.broadcast_handshake().await });
        }
    }

    /// Builds the retrieval URL for an uploaded file, embedding the
    /// share key when present.
    pub fn build_download_url(&self, record: &FileRecord) -> String {
        let Some(web_addr) = self.inner.web_addr.as_deref() else {
            return String::new();
        };
        let base = format!("http://{web_addr}/api/files/{}", record.id);
        if record.share_key.is_empty() {
            base
        } else {
            format!("{base}?key={}", record.share_key)
        }
    }

    /// Requests process shutdown (used by `/quit`).
    pub fn request_shutdown(&self) {
        let _ = self.inner.shutdown_tx.send(true);
    }

    /// Flushes and releases the stores. Idempotent; part of the
    /// ordered shutdown sequence.
    pub fn close_stores(&self) {
        if let Some(store) = &self.inner.store {
            store.close();
        }
        if let Some(files) = &self.inner.files {
            files.close();
        }
    }
}
