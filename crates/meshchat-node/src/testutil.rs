//! Shared helpers for runtime unit tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use meshchat_net::{ConnManager, DialScheduler};
use meshchat_proto::Record;
use meshchat_types::{Notification, Presence};
use tokio::sync::watch;

use crate::ack::AckTracker;
use crate::identity::Identity;
use crate::runtime::{Runtime, RuntimeOptions};
use crate::sink::Sink;

/// Sink that records every call for later assertions.
#[derive(Default)]
pub(crate) struct RecordingSink {
    messages: Mutex<Vec<Record>>,
    systems: Mutex<Vec<String>>,
    peers: Mutex<Vec<Vec<Presence>>>,
    notifications: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    pub(crate) fn messages(&self) -> usize {
        self.messages.lock().expect("messages lock").len()
    }

    pub(crate) fn last_message(&self) -> Option<Record> {
        self.messages.lock().expect("messages lock").last().cloned()
    }

    pub(crate) fn system_lines(&self) -> Vec<String> {
        self.systems.lock().expect("systems lock").clone()
    }

    pub(crate) fn peer_updates(&self) -> usize {
        self.peers.lock().expect("peers lock").len()
    }

    pub(crate) fn notification_levels(&self) -> Vec<String> {
        self.notifications
            .lock()
            .expect("notifications lock")
            .iter()
            .map(|n| n.level.clone())
            .collect()
    }
}

impl Sink for RecordingSink {
    fn show_message(&self, record: &Record) {
        self.messages
            .lock()
            .expect("messages lock")
            .push(record.clone());
    }

    fn show_system(&self, text: &str) {
        self.systems
            .lock()
            .expect("systems lock")
            .push(text.to_string());
    }

    fn update_peers(&self, peers: &[Presence]) {
        self.peers.lock().expect("peers lock").push(peers.to_vec());
    }

    fn show_notification(&self, note: &Notification) {
        self.notifications
            .lock()
            .expect("notifications lock")
            .push(note.clone());
    }
}

/// Builds a runtime named `local_name` at `127.0.0.1:9001` with a
/// recording sink, no stores, and no live connections.
pub(crate) async fn recording_runtime(local_name: &str) -> (Runtime, Arc<RecordingSink>) {
    let self_addr = "127.0.0.1:9001";
    let (cm, _incoming_rx) = ConnManager::new(self_addr, None);
    let cm = Arc::new(cm);
    let ack = AckTracker::spawn(Arc::clone(&cm) as _);
    let dialer = DialScheduler::new(Arc::clone(&cm) as _, self_addr);
    let sink = Arc::new(RecordingSink::default());
    let (shutdown_tx, _) = watch::channel(false);

    let rt = Runtime::new(RuntimeOptions {
        cm,
        cache_ttl: Duration::from_secs(600),
        history_size: 16,
        store: None,
        files: None,
        ack,
        dialer,
        sink: Arc::clone(&sink) as Arc<dyn Sink>,
        identity: Identity::new(local_name, self_addr),
        self_addr: self_addr.to_string(),
        web_addr: None,
        bootstrap_url: None,
        poll_interval: Duration::from_secs(5),
        auth_api: None,
        shutdown_tx,
    });
    (rt, sink)
}
