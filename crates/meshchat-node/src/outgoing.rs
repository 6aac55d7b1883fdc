//! Outbound record construction and fan-out.
//!
//! Every locally originated record follows the same path: fresh ID,
//! own origin and identity, current wall clock; pre-mark the cache so
//! the mesh echo is ignored; append to history; count it; display it;
//! broadcast; track for acknowledgement; and optionally hand the text
//! to the external persistence service.

use std::path::Path;

use meshchat_net::Broadcaster;
use meshchat_proto::{new_msg_id, Attachment, Record, RecordKind};
use meshchat_types::{FileRecord, MeshError, Result};

use crate::runtime::Runtime;

impl Runtime {
    /// Floods a chat message to the mesh.
    pub async fn send_chat_message(&self, content: &str) {
        let record = Record {
            msg_id: new_msg_id(),
            kind: RecordKind::Chat.as_str().into(),
            from: self.inner.identity.get(),
            origin: self.inner.self_addr.clone(),
            content: content.to_string(),
            timestamp: chrono::Utc::now(),
            ..Record::default()
        };
        self.dispatch_outbound(record, "").await;
    }

    /// Sends a direct message toward `target` (name or address).
    pub async fn send_direct_message(&self, target: &str, content: &str) {
        let resolved = self.inner.directory.resolve(target);
        let (to_addr, recipient) = match resolved {
            Some((addr, name)) if !name.is_empty() => (addr, name),
            Some((addr, _)) => (addr, target.to_string()),
            None => (String::new(), target.to_string()),
        };
        let record = Record {
            msg_id: new_msg_id(),
            kind: RecordKind::Dm.as_str().into(),
            from: self.inner.identity.get(),
            origin: self.inner.self_addr.clone(),
            to: recipient.clone(),
            to_addr,
            content: content.to_string(),
            timestamp: chrono::Utc::now(),
            ..Record::default()
        };
        self.dispatch_outbound(record, &recipient).await;
    }

    /// Publishes a file record for an already stored upload. With a
    /// target the record is a DM; otherwise it floods.
    pub async fn share_file(&self, file: FileRecord, target: &str) -> Result<()> {
        if self.inner.web_addr.is_none() {
            return Err(MeshError::ConfigError {
                reason: "file sharing unavailable (web UI disabled)".into(),
            });
        }
        let attachment = Attachment {
            id: file.id.clone(),
            name: file.name.clone(),
            size: file.size,
            mime: file.mime.clone(),
            url: self.build_download_url(&file),
        };

        let mut record = Record {
            msg_id: new_msg_id(),
            kind: RecordKind::File.as_str().into(),
            from: self.inner.identity.get(),
            origin: self.inner.self_addr.clone(),
            timestamp: chrono::Utc::now(),
            attachments: vec![attachment],
            ..Record::default()
        };

        if target.is_empty() {
            record.content = format!("shared a file: {}", file.name);
            self.dispatch_outbound(record, "").await;
        } else {
            let resolved = self.inner.directory.resolve(target);
            let (to_addr, recipient) = match resolved {
                Some((addr, name)) if !name.is_empty() => (addr, name),
                Some((addr, _)) => (addr, target.to_string()),
                None => (String::new(), target.to_string()),
            };
            record.to = recipient.clone();
            record.to_addr = to_addr;
            record.content = format!("sent a file to {recipient}: {}", file.name);
            self.dispatch_outbound(record, &recipient).await;
        }
        Ok(())
    }

    /// Stores a local file and shares it on the mesh.
    pub async fn send_file_from_path(&self, path: &str, target: &str) -> Result<()> {
        let Some(files) = self.inner.files.clone() else {
            return Err(MeshError::ConfigError {
                reason: "file sharing requires --web".into(),
            });
        };
        let name = Path::new(path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(path)
            .to_string();
        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|e| MeshError::NotFound {
                reason: format!("{path}: {e}"),
            })?;
        let record = files
            .save(&name, &self.inner.identity.get(), &mut file)
            .await?;
        self.share_file(record, target).await
    }

    /// The shared tail of every outbound path.
    async fn dispatch_outbound(&self, record: Record, receiver: &str) {
        self.inner.cache.seen(&record.msg_id);
        self.inner.history.add(record.clone());
        if let Some(store) = &self.inner.store {
            if let Err(e) = store.append(&record) {
                tracing::warn!(msg_id = %record.msg_id, error = %e, "history append failed");
            }
        }
        self.inner.metrics.inc_sent();
        self.inner.sink.show_message(&record);
        self.inner.cm.broadcast(&record, "").await;
        self.inner.ack.track(record.clone());
        self.persist_external(&record, receiver);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::recording_runtime;

    #[tokio::test]
    async fn chat_is_tracked_counted_and_displayed() {
        let (rt, sink) = recording_runtime("alice").await;
        rt.send_chat_message("hello mesh").await;

        assert_eq!(sink.messages(), 1);
        assert_eq!(rt.inner.metrics.snapshot().sent, 1);
        assert_eq!(rt.inner.ack.pending_count(), 1);
        assert_eq!(rt.history_all().len(), 1);
    }

    #[tokio::test]
    async fn mesh_echo_of_own_message_is_ignored() {
        let (rt, sink) = recording_runtime("alice").await;
        rt.send_chat_message("hello mesh").await;
        let sent = rt.history_all()[0].clone();

        // The mesh flooding the record back must not display or store
        // it a second time.
        rt.process_incoming(sent).await;
        assert_eq!(sink.messages(), 1);
        assert_eq!(rt.history_all().len(), 1);
        assert_eq!(rt.inner.metrics.snapshot().seen, 0);
    }

    #[tokio::test]
    async fn dm_resolves_target_through_directory() {
        let (rt, sink) = recording_runtime("alice").await;
        rt.inner.directory.record("Bob", "127.0.0.1:9002");
        rt.send_direct_message("bob", "psst").await;

        let dm = sink.last_message().expect("dm displayed");
        assert_eq!(dm.kind, "dm");
        assert_eq!(dm.to, "Bob");
        assert_eq!(dm.to_addr, "127.0.0.1:9002");
    }

    #[tokio::test]
    async fn dm_to_unknown_target_keeps_the_name() {
        let (rt, sink) = recording_runtime("alice").await;
        rt.send_direct_message("stranger", "anyone there?").await;

        let dm = sink.last_message().expect("dm displayed");
        assert_eq!(dm.to, "stranger");
        assert!(dm.to_addr.is_empty());
    }

    #[tokio::test]
    async fn share_file_requires_web() {
        let (rt, _sink) = recording_runtime("alice").await;
        let file = FileRecord {
            id: "ab".into(),
            name: "notes.txt".into(),
            size: 1,
            uploader: "alice".into(),
            mime: String::new(),
            share_key: "k".into(),
            created_at: chrono::Utc::now(),
        };
        assert!(rt.share_file(file, "").await.is_err());
    }
}
