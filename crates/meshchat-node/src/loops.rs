//! Long-running runtime loops.
//!
//! Every loop selects on the root shutdown signal and its own work
//! source, so cancelling the signal winds the whole peer down without
//! waiting for timers.

use std::time::Duration;

use meshchat_net::Broadcaster;
use meshchat_proto::{new_msg_id, Record, RecordKind};
use tokio::sync::mpsc;

use crate::runtime::Runtime;

/// Gossip (`peer_sync`) broadcast interval.
const GOSSIP_INTERVAL: Duration = Duration::from_secs(15);

/// Presence (handshake) broadcast interval.
const PRESENCE_INTERVAL: Duration = Duration::from_secs(25);

/// Directory refresh / snapshot push interval.
const REFRESH_INTERVAL: Duration = Duration::from_secs(3);

impl Runtime {
    /// Consumes the connection manager's incoming channel until
    /// shutdown or channel close, routing each record.
    pub async fn handle_incoming(&self, mut incoming: mpsc::Receiver<Record>) {
        let mut shutdown_rx = self.shutdown_rx();
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => return,
                record = incoming.recv() => match record {
                    Some(record) => self.process_incoming(record).await,
                    None => return,
                }
            }
        }
    }

    /// Periodically refreshes the peer list from the registry and
    /// hands new addresses to the dial scheduler.
    pub async fn poll_bootstrap_loop(&self) {
        if self.inner.bootstrap_url.is_none() {
            return;
        }
        let mut shutdown_rx = self.shutdown_rx();
        let mut ticker = tokio::time::interval(self.inner.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => return,
                _ = ticker.tick() => {
                    match self.fetch_peers().await {
                        Ok(peers) => {
                            for peer in peers {
                                if peer != self.inner.self_addr {
                                    self.inner.dialer.add(&peer);
                                }
                            }
                        }
                        Err(e) => tracing::warn!(error = %e, "registry poll failed"),
                    }
                }
            }
        }
    }

    /// Periodically floods the desired-peer set so the mesh converges
    /// on a shared view of who to dial.
    pub async fn gossip_loop(&self) {
        let mut shutdown_rx = self.shutdown_rx();
        let mut ticker = tokio::time::interval(GOSSIP_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => return,
                _ = ticker.tick() => {
                    let peers = self.inner.dialer.desired();
                    if peers.is_empty() {
                        continue;
                    }
                    let record = Record {
                        msg_id: new_msg_id(),
                        kind: RecordKind::PeerSync.as_str().into(),
                        from: self.inner.identity.get(),
                        origin: self.inner.self_addr.clone(),
                        timestamp: chrono::Utc::now(),
                        peer_list: peers,
                        ..Record::default()
                    };
                    self.inner.cm.broadcast(&record, "").await;
                }
            }
        }
    }

    /// Periodically re-announces identity so directories stay fresh.
    pub async fn presence_loop(&self) {
        let mut shutdown_rx = self.shutdown_rx();
        let mut ticker = tokio::time::interval(PRESENCE_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => return,
                _ = ticker.tick() => self.broadcast_handshake().await,
            }
        }
    }

    /// Periodically marks connected addresses active and pushes a
    /// fresh snapshot to the sinks.
    pub async fn refresh_peers_loop(&self) {
        let mut shutdown_rx = self.shutdown_rx();
        let mut ticker = tokio::time::interval(REFRESH_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => return,
                _ = ticker.tick() => {
                    let connected = self.inner.cm.conns_list();
                    self.inner.directory.mark_active(&connected);
                    self.inner.sink.update_peers(&self.inner.directory.snapshot());
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
