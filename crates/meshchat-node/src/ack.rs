//! Acknowledgement tracker with bounded re-broadcast retries.
//!
//! Every locally originated record is tracked until a matching ack
//! arrives. A ticker re-broadcasts entries that stayed unacknowledged
//! past the timeout, up to the attempt cap; exhausted entries are
//! dropped with a log line. Re-broadcasts go to all peers because the
//! original target may have reconnected elsewhere.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use meshchat_net::Broadcaster;
use meshchat_proto::Record;
use tokio::sync::watch;

/// How often the retry ticker fires.
const ACK_CHECK_INTERVAL: Duration = Duration::from_secs(3);

/// How long an entry may stay unacknowledged before a retry.
const ACK_TIMEOUT: Duration = Duration::from_secs(7);

/// Send attempts per record, counting the original broadcast.
const ACK_MAX_ATTEMPTS: u32 = 3;

struct PendingAck {
    record: Record,
    attempts: u32,
    last_send: Instant,
}

/// Retries records that have not been acknowledged yet.
pub struct AckTracker {
    broadcaster: Arc<dyn Broadcaster>,
    pending: Mutex<HashMap<String, PendingAck>>,
    shutdown_tx: watch::Sender<bool>,
    check_interval: Duration,
    timeout: Duration,
    max_attempts: u32,
}

impl AckTracker {
    /// Creates a tracker and starts its retry loop.
    pub fn spawn(broadcaster: Arc<dyn Broadcaster>) -> Arc<Self> {
        Self::spawn_with_timing(broadcaster, ACK_CHECK_INTERVAL, ACK_TIMEOUT, ACK_MAX_ATTEMPTS)
    }

    /// Like [`spawn`](Self::spawn) with custom timing (tests).
    pub fn spawn_with_timing(
        broadcaster: Arc<dyn Broadcaster>,
        check_interval: Duration,
        timeout: Duration,
        max_attempts: u32,
    ) -> Arc<Self> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let tracker = Arc::new(Self {
            broadcaster,
            pending: Mutex::new(HashMap::new()),
            shutdown_tx,
            check_interval,
            timeout,
            max_attempts,
        });

        let looped = Arc::clone(&tracker);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(looped.check_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => return,
                    _ = ticker.tick() => looped.rebroadcast_expired().await,
                }
            }
        });

        tracker
    }

    /// Starts tracking a record; records without an ID are ignored.
    pub fn track(&self, record: Record) {
        if record.msg_id.is_empty() {
            return;
        }
        let id = record.msg_id.clone();
        self.pending.lock().expect("pending lock").insert(
            id,
            PendingAck {
                record,
                attempts: 1,
                last_send: Instant::now(),
            },
        );
    }

    /// Confirms an acknowledged record, dropping its entry.
    pub fn confirm(&self, msg_id: &str) {
        if msg_id.is_empty() {
            return;
        }
        self.pending.lock().expect("pending lock").remove(msg_id);
    }

    /// Number of records still awaiting an ack.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().expect("pending lock").len()
    }

    async fn rebroadcast_expired(&self) {
        let now = Instant::now();
        let mut resend = Vec::new();
        {
            let mut pending = self.pending.lock().expect("pending lock");
            pending.retain(|id, entry| {
                if now.duration_since(entry.last_send) < self.timeout {
                    return true;
                }
                if entry.attempts >= self.max_attempts {
                    tracing::warn!(msg_id = %id, attempts = entry.attempts, "dropping unacknowledged record");
                    return false;
                }
                entry.attempts += 1;
                entry.last_send = now;
                resend.push(entry.record.clone());
                true
            });
        }
        for record in resend {
            self.broadcaster.broadcast(&record, "").await;
        }
    }

    /// Terminates the retry loop. Idempotent.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingBroadcaster {
        sends: AtomicUsize,
    }

    #[async_trait]
    impl Broadcaster for RecordingBroadcaster {
        async fn broadcast(&self, _record: &Record, _except: &str) {
            self.sends.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn record(id: &str) -> Record {
        Record {
            msg_id: id.into(),
            kind: "chat".into(),
            ..Record::default()
        }
    }

    #[tokio::test]
    async fn confirm_removes_pending_entry() {
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let tracker = AckTracker::spawn(broadcaster);
        tracker.track(record("m1"));
        assert_eq!(tracker.pending_count(), 1);
        tracker.confirm("m1");
        assert_eq!(tracker.pending_count(), 0);
        tracker.stop();
    }

    #[tokio::test]
    async fn untracked_empty_id_is_ignored() {
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let tracker = AckTracker::spawn(broadcaster);
        tracker.track(record(""));
        assert_eq!(tracker.pending_count(), 0);
        tracker.stop();
    }

    #[tokio::test]
    async fn expired_entry_is_rebroadcast_then_dropped() {
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let tracker = AckTracker::spawn_with_timing(
            Arc::clone(&broadcaster) as Arc<dyn Broadcaster>,
            Duration::from_millis(10),
            Duration::from_millis(20),
            3,
        );
        tracker.track(record("m1"));

        // Attempts 2 and 3 re-broadcast; the cap then drops the entry.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(broadcaster.sends.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.pending_count(), 0);
        tracker.stop();
    }

    #[tokio::test]
    async fn confirmed_entry_is_never_rebroadcast() {
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let tracker = AckTracker::spawn_with_timing(
            Arc::clone(&broadcaster) as Arc<dyn Broadcaster>,
            Duration::from_millis(10),
            Duration::from_millis(20),
            3,
        );
        tracker.track(record("m1"));
        tracker.confirm("m1");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(broadcaster.sends.load(Ordering::SeqCst), 0);
        tracker.stop();
    }
}
