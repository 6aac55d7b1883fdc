//! Dial scheduler with jittered retry backoff.
//!
//! Tracks the set of addresses this node wants to stay connected to.
//! Additions flow through a bounded work queue consumed by
//! [`DialScheduler::run`]; failed dials are re-enqueued after
//! `5s + uniform[0,2s)` and successful dials are re-asserted on the
//! same cadence so a dropped connection is eventually re-dialed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use meshchat_types::Result;
use rand::Rng;
use tokio::sync::{mpsc, watch};

use crate::conn::ConnManager;

/// Bounded dial queue size; additions beyond this are dropped with a
/// log line.
const DIAL_QUEUE_SIZE: usize = 128;

/// Base delay before a retry.
const DIAL_BACKOFF: Duration = Duration::from_secs(5);

/// Upper bound (exclusive) of the uniform jitter added to the backoff.
const DIAL_JITTER: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

/// Dial seam between the scheduler and the connection manager.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Attempts an outbound connection; idempotent on success.
    async fn connect(&self, addr: &str) -> Result<()>;
}

#[async_trait]
impl Connector for ConnManager {
    async fn connect(&self, addr: &str) -> Result<()> {
        ConnManager::connect(self, addr).await
    }
}

// ---------------------------------------------------------------------------
// DialScheduler
// ---------------------------------------------------------------------------

/// Manages peer dialing with retries and jitter.
pub struct DialScheduler {
    connector: Arc<dyn Connector>,
    self_addr: String,
    desired: RwLock<HashMap<String, Instant>>,
    queue_tx: mpsc::Sender<String>,
    queue_rx: Mutex<Option<mpsc::Receiver<String>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl DialScheduler {
    /// Creates a scheduler dialing through `connector`, ignoring
    /// `self_addr`.
    pub fn new(connector: Arc<dyn Connector>, self_addr: impl Into<String>) -> Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::channel(DIAL_QUEUE_SIZE);
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            connector,
            self_addr: self_addr.into(),
            desired: RwLock::new(HashMap::new()),
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            shutdown_tx,
        })
    }

    /// Records the desire to stay connected to `addr` and enqueues one
    /// dial attempt. Self and already-desired addresses are ignored.
    pub fn add(&self, addr: &str) {
        if addr.is_empty() || addr == self.self_addr {
            return;
        }
        let mut desired = self.desired.write().expect("desired lock");
        if desired.contains_key(addr) {
            return;
        }
        desired.insert(addr.to_string(), Instant::now());
        drop(desired);
        self.enqueue(addr);
    }

    /// Current desired addresses.
    pub fn desired(&self) -> Vec<String> {
        self.desired
            .read()
            .expect("desired lock")
            .keys()
            .cloned()
            .collect()
    }

    fn enqueue(&self, addr: &str) {
        if self.queue_tx.try_send(addr.to_string()).is_err() {
            tracing::warn!(addr, "dial queue full, dropping");
        }
    }

    /// Consumes the dial queue until [`close`](Self::close) is called.
    ///
    /// Runs at most once; later calls return immediately.
    pub async fn run(self: Arc<Self>) {
        let Some(mut queue_rx) = self.queue_rx.lock().expect("queue lock").take() else {
            return;
        };
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => return,
                addr = queue_rx.recv() => match addr {
                    Some(addr) => try_dial(&self, &addr).await,
                    None => return,
                }
            }
        }
    }

    /// Unblocks [`run`](Self::run) without draining the queue.
    /// Idempotent.
    pub fn close(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn try_dial(sched: &Arc<DialScheduler>, addr: &str) {
    if let Err(e) = sched.connector.connect(addr).await {
        tracing::warn!(error = %e, "dial failed, scheduling retry");
        schedule_retry(sched, addr);
        return;
    }
    let still_desired = {
        let mut desired = sched.desired.write().expect("desired lock");
        match desired.get_mut(addr) {
            Some(seen) => {
                *seen = Instant::now();
                true
            }
            None => false,
        }
    };
    // The connection may drop later; keep re-asserting while the
    // address remains desired.
    if still_desired {
        schedule_retry(sched, addr);
    }
}

fn schedule_retry(sched: &Arc<DialScheduler>, addr: &str) {
    let scheduler = Arc::clone(sched);
    let addr = addr.to_string();
    let mut shutdown_rx = sched.shutdown_tx.subscribe();
    tokio::spawn(async move {
        let jitter = rand::thread_rng().gen_range(Duration::ZERO..DIAL_JITTER);
        tokio::select! {
            _ = shutdown_rx.changed() => {}
            _ = tokio::time::sleep(DIAL_BACKOFF + jitter) => {
                scheduler.enqueue(&addr);
            }
        }
    });
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
