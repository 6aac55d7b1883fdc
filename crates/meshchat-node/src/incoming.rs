//! Inbound record routing.
//!
//! Every record coming off the wire (or injected by a local surface)
//! passes through [`Runtime::process_incoming`]: normalize, dedup,
//! dispatch by kind, block-check, then either forward toward its
//! recipient or accept locally (history, metrics, display, ack,
//! rebroadcast).

use meshchat_net::Broadcaster;
use meshchat_proto::{new_msg_id, Record, RecordKind};
use meshchat_types::Notification;

use crate::runtime::Runtime;

impl Runtime {
    /// Routes one inbound record.
    pub async fn process_incoming(&self, mut record: Record) {
        if record.msg_id.is_empty() {
            record.msg_id = new_msg_id();
        }
        if self.inner.cache.seen(&record.msg_id) {
            return;
        }
        if record.origin.is_empty() {
            record.origin = record.from.clone();
        }
        if record.kind.is_empty() {
            record.kind = RecordKind::Chat.as_str().into();
        }

        match record.record_kind() {
            RecordKind::Ack => {
                if !record.ack_for.is_empty() {
                    self.inner.ack.confirm(&record.ack_for);
                    self.inner.metrics.inc_ack();
                }
                return;
            }
            RecordKind::PeerSync => {
                for peer in &record.peer_list {
                    self.inner.dialer.add(peer);
                }
                return;
            }
            RecordKind::Handshake => {
                if !record.auth_token.is_empty() {
                    match meshchat_auth::validate_token(&record.auth_token) {
                        Ok(principal) if principal.eq_ignore_ascii_case(&record.from) => {}
                        Ok(principal) => {
                            tracing::warn!(
                                origin = %record.origin,
                                claimed = %record.from,
                                principal = %principal,
                                "handshake rejected: principal mismatch"
                            );
                            return;
                        }
                        Err(e) => {
                            tracing::warn!(origin = %record.origin, error = %e, "handshake rejected");
                            return;
                        }
                    }
                }
                self.inner.directory.record(&record.from, &record.origin);
                self.inner
                    .sink
                    .update_peers(&self.inner.directory.snapshot());
                return;
            }
            RecordKind::Chat | RecordKind::Dm | RecordKind::File => {
                self.inner.directory.record(&record.from, &record.origin);
            }
        }

        if self.inner.blocklist.blocks(&record.from, &record.origin) {
            return;
        }

        // Directed delivery: forward without local display when the
        // record names someone else.
        if !record.to_addr.is_empty() && record.to_addr != self.inner.self_addr {
            self.inner.cm.broadcast(&record, "").await;
            return;
        }
        let local_name = self.inner.identity.get();
        if !record.to.is_empty()
            && !record.to.eq_ignore_ascii_case(&local_name)
            && record.to_addr.is_empty()
        {
            self.inner.cm.broadcast(&record, "").await;
            return;
        }

        // Accept locally.
        self.inner.history.add(record.clone());
        if let Some(store) = &self.inner.store {
            if let Err(e) = store.append(&record) {
                tracing::warn!(msg_id = %record.msg_id, error = %e, "history append failed");
            }
        }
        self.inner.metrics.inc_seen();
        self.inner.sink.show_message(&record);
        self.maybe_notify(&record);
        self.send_ack(&record).await;
        self.inner.cm.broadcast(&record, "").await;
    }

    /// Emits a DM or mention notification for records from other
    /// peers.
    pub(crate) fn maybe_notify(&self, record: &Record) {
        let local_name = self.inner.identity.get();
        if local_name.is_empty() || record.from.eq_ignore_ascii_case(&local_name) {
            return;
        }
        if record.record_kind() == RecordKind::Dm {
            if record.to.eq_ignore_ascii_case(&local_name)
                || record.to_addr.eq_ignore_ascii_case(&self.inner.self_addr)
            {
                self.inner.sink.show_notification(&Notification {
                    id: record.msg_id.clone(),
                    text: format!("{} sent you a direct message", record.from),
                    level: "dm".into(),
                    timestamp: chrono::Utc::now(),
                    from: record.from.clone(),
                });
            }
            return;
        }
        if !record.content.is_empty()
            && record
                .content
                .to_lowercase()
                .contains(&local_name.to_lowercase())
        {
            self.inner.sink.show_notification(&Notification {
                id: record.msg_id.clone(),
                text: format!("{} mentioned you", record.from),
                level: "mention".into(),
                timestamp: chrono::Utc::now(),
                from: record.from.clone(),
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::recording_runtime;
    use chrono::Utc;

    fn wire_record(kind: RecordKind, from: &str, origin: &str) -> Record {
        Record {
            msg_id: new_msg_id(),
            kind: kind.as_str().into(),
            from: from.into(),
            origin: origin.into(),
            content: "hello".into(),
            timestamp: Utc::now(),
            ..Record::default()
        }
    }

    #[tokio::test]
    async fn duplicate_ids_are_processed_once() {
        let (rt, sink) = recording_runtime("alice").await;
        let record = wire_record(RecordKind::Chat, "bob", "127.0.0.1:9002");
        rt.process_incoming(record.clone()).await;
        rt.process_incoming(record).await;
        assert_eq!(sink.messages(), 1);
        assert_eq!(rt.inner.metrics.snapshot().seen, 1);
    }

    #[tokio::test]
    async fn accepted_record_lands_in_history() {
        let (rt, _sink) = recording_runtime("alice").await;
        rt.process_incoming(wire_record(RecordKind::Chat, "bob", "127.0.0.1:9002"))
            .await;
        assert_eq!(rt.history_all().len(), 1);
    }

    #[tokio::test]
    async fn ack_confirms_and_never_displays() {
        let (rt, sink) = recording_runtime("alice").await;
        let tracked = wire_record(RecordKind::Chat, "alice", "127.0.0.1:9001");
        rt.inner.ack.track(tracked.clone());

        let mut ack = wire_record(RecordKind::Ack, "bob", "127.0.0.1:9002");
        ack.ack_for = tracked.msg_id.clone();
        rt.process_incoming(ack).await;

        assert_eq!(rt.inner.ack.pending_count(), 0);
        assert_eq!(rt.inner.metrics.snapshot().acked, 1);
        assert_eq!(sink.messages(), 0);
    }

    #[tokio::test]
    async fn peer_sync_feeds_the_dialer() {
        let (rt, sink) = recording_runtime("alice").await;
        let mut sync = wire_record(RecordKind::PeerSync, "bob", "127.0.0.1:9002");
        sync.peer_list = vec!["127.0.0.1:9003".into(), "127.0.0.1:9004".into()];
        rt.process_incoming(sync).await;

        let mut desired = rt.inner.dialer.desired();
        desired.sort();
        assert_eq!(desired, vec!["127.0.0.1:9003", "127.0.0.1:9004"]);
        assert_eq!(sink.messages(), 0);
    }

    #[tokio::test]
    async fn handshake_updates_directory_and_peers_view() {
        let (rt, sink) = recording_runtime("alice").await;
        rt.process_incoming(wire_record(RecordKind::Handshake, "bob", "127.0.0.1:9002"))
            .await;
        assert!(rt.inner.directory.resolve("bob").is_some());
        assert!(sink.peer_updates() >= 1);
    }

    #[tokio::test]
    async fn handshake_with_mismatched_principal_is_dropped() {
        let (rt, sink) = recording_runtime("alice").await;
        let mut forged = wire_record(RecordKind::Handshake, "Alice", "127.0.0.1:9002");
        forged.auth_token = meshchat_auth::issue_token("Mallory").expect("token");
        rt.process_incoming(forged).await;

        assert!(rt.inner.directory.resolve("Alice").is_none());
        assert_eq!(sink.peer_updates(), 0);
    }

    #[tokio::test]
    async fn handshake_with_matching_principal_is_accepted() {
        let (rt, _sink) = recording_runtime("alice").await;
        let mut hs = wire_record(RecordKind::Handshake, "Bob", "127.0.0.1:9002");
        hs.auth_token = meshchat_auth::issue_token("bob").expect("token");
        rt.process_incoming(hs).await;
        assert!(rt.inner.directory.resolve("bob").is_some());
    }

    #[tokio::test]
    async fn blocked_sender_is_dropped() {
        let (rt, sink) = recording_runtime("alice").await;
        rt.inner.blocklist.add("bob");
        rt.process_incoming(wire_record(RecordKind::Chat, "bob", "127.0.0.1:9002"))
            .await;
        assert_eq!(sink.messages(), 0);
        assert_eq!(rt.inner.metrics.snapshot().seen, 0);
    }

    #[tokio::test]
    async fn dm_for_someone_else_forwards_without_display() {
        let (rt, sink) = recording_runtime("carol").await;
        let mut dm = wire_record(RecordKind::Dm, "alice", "127.0.0.1:9001");
        dm.to = "Bob".into();
        dm.to_addr = "127.0.0.1:9002".into();
        rt.process_incoming(dm).await;

        assert_eq!(sink.messages(), 0);
        assert_eq!(rt.inner.metrics.snapshot().seen, 0);
    }

    #[tokio::test]
    async fn dm_addressed_here_notifies_at_dm_level() {
        let (rt, sink) = recording_runtime("bob").await;
        let mut dm = wire_record(RecordKind::Dm, "alice", "127.0.0.1:9001");
        dm.to = "BOB".into();
        rt.process_incoming(dm).await;

        assert_eq!(sink.messages(), 1);
        assert_eq!(sink.notification_levels(), vec!["dm".to_string()]);
    }

    #[tokio::test]
    async fn mention_in_content_notifies() {
        let (rt, sink) = recording_runtime("bob").await;
        let mut chat = wire_record(RecordKind::Chat, "alice", "127.0.0.1:9001");
        chat.content = "hey Bob, around?".into();
        rt.process_incoming(chat).await;
        assert_eq!(sink.notification_levels(), vec!["mention".to_string()]);
    }

    #[tokio::test]
    async fn own_messages_never_notify() {
        let (rt, sink) = recording_runtime("alice").await;
        let mut chat = wire_record(RecordKind::Chat, "alice", "127.0.0.1:9002");
        chat.content = "alice talking about alice".into();
        rt.process_incoming(chat).await;
        assert!(sink.notification_levels().is_empty());
    }

    #[tokio::test]
    async fn missing_fields_are_normalized() {
        let (rt, sink) = recording_runtime("alice").await;
        let record = Record {
            from: "bob".into(),
            content: "bare".into(),
            timestamp: Utc::now(),
            ..Record::default()
        };
        rt.process_incoming(record).await;

        assert_eq!(sink.messages(), 1);
        let stored = &rt.history_all()[0];
        assert!(!stored.msg_id.is_empty());
        assert_eq!(stored.origin, "bob");
        assert_eq!(stored.kind, "chat");
    }
}
