//! Events pushed to browser clients, and the client registries.
//!
//! WebSocket clients receive every event kind; SSE subscribers only
//! receive notifications. Both registries hand each client a bounded
//! channel and drop events for clients that fall behind — a slow
//! browser must not stall the peer's inbound loop.

use std::sync::Mutex;

use meshchat_proto::Record;
use meshchat_types::{FileRecord, Notification, Presence};
use serde::Serialize;
use tokio::sync::mpsc;

/// Per-websocket-client event buffer.
const WS_CLIENT_BUFFER: usize = 64;

/// Per-SSE-subscriber event buffer; slow subscribers lose events.
const SSE_CLIENT_BUFFER: usize = 8;

// ---------------------------------------------------------------------------
// WebEvent
// ---------------------------------------------------------------------------

/// One event on the browser channel, tagged by `kind`.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WebEvent {
    /// A chat/dm/file record to render.
    Message {
        /// The record itself.
        message: Record,
    },
    /// A system line.
    System {
        /// Text to render.
        text: String,
    },
    /// Full peer-list replacement.
    Peers {
        /// Current presence rows.
        users: Vec<Presence>,
    },
    /// Backlog pushed once per websocket connect.
    History {
        /// Window contents, oldest first.
        history: Vec<Record>,
    },
    /// A mention/DM/file alert.
    Notification {
        /// The alert.
        notification: Notification,
    },
    /// Metadata of a fresh upload.
    File {
        /// The uploaded file's record.
        file: FileRecord,
    },
}

// ---------------------------------------------------------------------------
// WebClients
// ---------------------------------------------------------------------------

/// Registries of connected websocket clients and SSE subscribers.
#[derive(Default)]
pub struct WebClients {
    ws: Mutex<Vec<mpsc::Sender<String>>>,
    sse: Mutex<Vec<mpsc::Sender<String>>>,
}

impl WebClients {
    /// Creates empty registries.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a websocket client; returns its event receiver.
    pub(crate) fn register_ws(&self) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(WS_CLIENT_BUFFER);
        self.ws.lock().expect("ws clients lock").push(tx);
        rx
    }

    /// Registers an SSE subscriber; returns its event receiver.
    pub(crate) fn register_sse(&self) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(SSE_CLIENT_BUFFER);
        self.sse.lock().expect("sse clients lock").push(tx);
        rx
    }

    /// Serializes and fans one event out to every websocket client;
    /// notifications additionally reach SSE subscribers.
    pub fn publish(&self, event: &WebEvent) {
        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "web event encode failed");
                return;
            }
        };
        fan_out(&self.ws, &payload);
        if matches!(event, WebEvent::Notification { .. }) {
            fan_out(&self.sse, &payload);
        }
    }

    /// Number of live websocket clients (tests and diagnostics).
    pub fn ws_count(&self) -> usize {
        self.ws.lock().expect("ws clients lock").len()
    }
}

/// Sends to every channel, dropping events for full buffers and
/// pruning closed clients.
fn fan_out(clients: &Mutex<Vec<mpsc::Sender<String>>>, payload: &str) {
    clients.lock().expect("clients lock").retain(|tx| {
        match tx.try_send(payload.to_string()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    });
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
