//! TCP connection manager.
//!
//! Owns the listener and every peer socket. Each connection gets a
//! dedicated reader task that turns newline-delimited frames into
//! decoded [`Record`]s on the bounded `incoming` channel; writes go
//! through [`Broadcaster::broadcast`], which snapshots the writer list
//! under the map lock and performs socket I/O outside it so one slow
//! peer cannot stall the map.
//!
//! Invariant: at most one connection per remote address. Re-registering
//! an address supersedes the previous socket and aborts its reader.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use meshchat_crypto::{open_frame, seal_frame, SecureBox};
use meshchat_proto::{decode_record, encode_record, Record};
use meshchat_types::{MeshError, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::{AbortHandle, JoinHandle};

/// Capacity of the decoded-record channel. The inbound dispatcher
/// consumes in order, so a full channel throttles network reads.
const INCOMING_CAPACITY: usize = 128;

/// Outbound dial timeout.
const DIAL_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(3);

// ---------------------------------------------------------------------------
// Broadcaster
// ---------------------------------------------------------------------------

/// Fan-out seam used by the reliability layer.
///
/// The ack tracker re-broadcasts through this trait instead of holding
/// the runtime, keeping the ownership graph acyclic.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// Sends `record` to every live connection except `except`.
    async fn broadcast(&self, record: &Record, except: &str);
}

// ---------------------------------------------------------------------------
// Shared socket state
// ---------------------------------------------------------------------------

struct ConnHandle {
    writer: Arc<tokio::sync::Mutex<OwnedWriteHalf>>,
    reader: AbortHandle,
    generation: u64,
}

struct Shared {
    secure: Option<SecureBox>,
    conns: Mutex<HashMap<String, ConnHandle>>,
    generation: AtomicU64,
    incoming_tx: Mutex<Option<mpsc::Sender<Record>>>,
}

impl Shared {
    fn remove_conn(&self, addr: &str) {
        if let Some(handle) = self.conns.lock().expect("conn map lock").remove(addr) {
            handle.reader.abort();
        }
    }

    /// Removes `addr` only if it still holds the given socket
    /// generation, so a superseded reader cannot evict its successor.
    fn remove_conn_if(&self, addr: &str, generation: u64) {
        let mut conns = self.conns.lock().expect("conn map lock");
        if conns.get(addr).is_some_and(|h| h.generation == generation) {
            if let Some(handle) = conns.remove(addr) {
                handle.reader.abort();
            }
        }
    }
}

/// Registers a socket under `key`, superseding any previous one.
fn register(shared: &Arc<Shared>, key: String, stream: TcpStream) {
    let Some(incoming) = shared.incoming_tx.lock().expect("incoming lock").clone() else {
        // Stopped; refuse new sockets.
        return;
    };
    let (read_half, write_half) = stream.into_split();
    let generation = shared.generation.fetch_add(1, Ordering::Relaxed) + 1;

    let reader_shared = Arc::clone(shared);
    let reader_key = key.clone();
    let reader = tokio::spawn(async move {
        read_loop(&reader_shared, read_half, &reader_key, incoming).await;
        reader_shared.remove_conn_if(&reader_key, generation);
    });

    let handle = ConnHandle {
        writer: Arc::new(tokio::sync::Mutex::new(write_half)),
        reader: reader.abort_handle(),
        generation,
    };
    let old = shared.conns.lock().expect("conn map lock").insert(key, handle);
    if let Some(old) = old {
        old.reader.abort();
    }
}

/// Reads newline-framed records until EOF or error.
///
/// A frame that fails to decrypt or decode is logged and skipped; one
/// bad frame must not drop the connection.
async fn read_loop(
    shared: &Shared,
    read_half: OwnedReadHalf,
    key: &str,
    incoming: mpsc::Sender<Record>,
) {
    let mut reader = BufReader::new(read_half);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => return,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(peer = key, error = %e, "read failed");
                return;
            }
        }
        let payload = trim_frame(&line);
        if payload.is_empty() {
            continue;
        }
        let plaintext = match open_frame(shared.secure.as_ref(), payload) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(peer = key, error = %e, "dropping undecryptable frame");
                continue;
            }
        };
        let record = match decode_record(&plaintext) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(peer = key, error = %e, "dropping malformed frame");
                continue;
            }
        };
        if incoming.send(record).await.is_err() {
            // Dispatcher is gone; nothing left to read for.
            return;
        }
    }
}

fn trim_frame(line: &[u8]) -> &[u8] {
    let start = line
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(line.len());
    let end = line
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &line[start..end]
}

// ---------------------------------------------------------------------------
// ConnManager
// ---------------------------------------------------------------------------

/// Manages inbound and outbound peer connections.
pub struct ConnManager {
    addr: String,
    shared: Arc<Shared>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl ConnManager {
    /// Creates a manager for `addr` together with the receiving end of
    /// its `incoming` channel.
    pub fn new(
        addr: impl Into<String>,
        secure: Option<SecureBox>,
    ) -> (Self, mpsc::Receiver<Record>) {
        let (incoming_tx, incoming_rx) = mpsc::channel(INCOMING_CAPACITY);
        let (shutdown_tx, _) = watch::channel(false);
        let manager = Self {
            addr: addr.into(),
            shared: Arc::new(Shared {
                secure,
                conns: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
                incoming_tx: Mutex::new(Some(incoming_tx)),
            }),
            accept_task: Mutex::new(None),
            shutdown_tx,
        };
        (manager, incoming_rx)
    }

    /// The address this manager was configured to listen on.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Whether frames are sealed with the mesh secret.
    pub fn encryption_enabled(&self) -> bool {
        self.shared.secure.is_some()
    }

    /// Binds the listener and starts accepting inbound peers.
    ///
    /// Returns the actually bound address (relevant when the
    /// configured port is 0).
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::BindError`]; fatal at startup.
    pub async fn start_listen(&self) -> Result<SocketAddr> {
        let listener = TcpListener::bind(&self.addr)
            .await
            .map_err(|e| MeshError::BindError {
                addr: self.addr.clone(),
                reason: e.to_string(),
            })?;
        let local = listener.local_addr().map_err(|e| MeshError::BindError {
            addr: self.addr.clone(),
            reason: e.to_string(),
        })?;

        let shared = Arc::clone(&self.shared);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => return,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, remote)) => {
                            register(&shared, remote.to_string(), stream);
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                        }
                    }
                }
            }
        });
        *self.accept_task.lock().expect("accept task lock") = Some(task);

        tracing::info!(addr = %local, "listening for mesh peers");
        Ok(local)
    }

    /// Dials an outbound connection if one is missing.
    ///
    /// Idempotent: connecting to self or to an already-connected
    /// address is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::DialError`] on timeout or refusal; the dial
    /// scheduler owns the retry.
    pub async fn connect(&self, peer_addr: &str) -> Result<()> {
        if peer_addr == self.addr {
            return Ok(());
        }
        if self
            .shared
            .conns
            .lock()
            .expect("conn map lock")
            .contains_key(peer_addr)
        {
            return Ok(());
        }
        let stream = tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(peer_addr))
            .await
            .map_err(|_| MeshError::DialError {
                addr: peer_addr.to_string(),
                reason: "dial timed out".into(),
            })?
            .map_err(|e| MeshError::DialError {
                addr: peer_addr.to_string(),
                reason: e.to_string(),
            })?;
        register(&self.shared, peer_addr.to_string(), stream);
        Ok(())
    }

    /// Current remote addresses with a live socket.
    pub fn conns_list(&self) -> Vec<String> {
        self.shared
            .conns
            .lock()
            .expect("conn map lock")
            .keys()
            .cloned()
            .collect()
    }

    /// Closes the listener, all connections, and the incoming channel.
    /// Idempotent.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.accept_task.lock().expect("accept task lock").take() {
            task.abort();
        }
        let mut conns = self.shared.conns.lock().expect("conn map lock");
        for (_, handle) in conns.drain() {
            handle.reader.abort();
        }
        drop(conns);
        // Dropping the last sender closes `incoming` for the dispatcher.
        self.shared.incoming_tx.lock().expect("incoming lock").take();
    }
}

#[async_trait]
impl Broadcaster for ConnManager {
    /// Encodes, seals, and writes `record` to every connection except
    /// `except`. Write failures remove the peer.
    async fn broadcast(&self, record: &Record, except: &str) {
        let sealed = encode_record(record)
            .and_then(|encoded| seal_frame(self.shared.secure.as_ref(), &encoded));
        let mut frame = match sealed {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "broadcast encode failed");
                return;
            }
        };
        frame.push(b'\n');

        // Snapshot the writers under the lock; write outside it.
        let targets: Vec<(String, Arc<tokio::sync::Mutex<OwnedWriteHalf>>)> = {
            let conns = self.shared.conns.lock().expect("conn map lock");
            conns
                .iter()
                .filter(|(addr, _)| addr.as_str() != except)
                .map(|(addr, handle)| (addr.clone(), Arc::clone(&handle.writer)))
                .collect()
        };

        for (addr, writer) in targets {
            let result = writer.lock().await.write_all(&frame).await;
            if let Err(e) = result {
                tracing::warn!(peer = %addr, error = %e, "write failed, dropping connection");
                self.shared.remove_conn(&addr);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
