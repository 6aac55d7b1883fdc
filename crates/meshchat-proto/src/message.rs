//! The wire record and its kind tags.
//!
//! Field names are part of the mesh wire contract and must not change:
//! `msg_id`, `type`, `from`, `origin`, `auth_token`, `to`, `to_addr`,
//! `content`, `timestamp`, `ack_for`, `peer_list`, `attachments`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// RecordKind
// ---------------------------------------------------------------------------

/// Classifies a record's role on the mesh.
///
/// On the wire the kind travels as a plain string so unrecognized tags
/// from newer peers still decode; the dispatcher treats anything it
/// does not know as chat.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum RecordKind {
    /// Flooded chat message shown to everyone.
    Chat,
    /// Direct message routed toward one recipient.
    Dm,
    /// Acknowledgement of a previously received record.
    Ack,
    /// Address list the sender wants others to dial.
    PeerSync,
    /// Identity announcement, optionally carrying a bearer token.
    Handshake,
    /// Chat record whose payload is an attachment list.
    File,
}

impl RecordKind {
    /// Returns the wire tag for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Dm => "dm",
            Self::Ack => "ack",
            Self::PeerSync => "peer_sync",
            Self::Handshake => "handshake",
            Self::File => "file",
        }
    }

    /// Parses a wire tag; `None` for tags this peer does not know.
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "chat" => Some(Self::Chat),
            "dm" => Some(Self::Dm),
            "ack" => Some(Self::Ack),
            "peer_sync" => Some(Self::PeerSync),
            "handshake" => Some(Self::Handshake),
            "file" => Some(Self::File),
            _ => None,
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Attachment
// ---------------------------------------------------------------------------

/// A downloadable payload shared alongside a record.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Attachment {
    /// File ID in the uploader's file store.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Size in bytes.
    pub size: i64,
    /// MIME hint, if sniffed.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mime: String,
    /// Retrieval URL built by the uploader's web bridge. Carries the
    /// share key when the upload allows unauthenticated mesh delivery.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// The unit exchanged between peers.
///
/// Invariants: `msg_id` is unique per origin, `timestamp` is the
/// origin's wall clock, and `origin` defaults to the sender when a
/// record arrives without one.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Record {
    /// Opaque 128-bit hex identifier, unique per origin.
    #[serde(default)]
    pub msg_id: String,
    /// Wire kind tag; see [`RecordKind`].
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Sender display name.
    #[serde(default)]
    pub from: String,
    /// Address of the node that first injected this record.
    #[serde(default)]
    pub origin: String,
    /// Bearer token, carried only by handshakes.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub auth_token: String,
    /// Recipient display name for directed records.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub to: String,
    /// Recipient address for directed records.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub to_addr: String,
    /// Message text.
    #[serde(default)]
    pub content: String,
    /// Origin wall clock.
    #[serde(default = "epoch")]
    pub timestamp: DateTime<Utc>,
    /// ID of the record an ack confirms.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ack_for: String,
    /// Addresses the sender wants others to dial (peer_sync only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub peer_list: Vec<String>,
    /// Files shared with this record.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    /// Fields this peer does not understand, preserved verbatim so
    /// they survive re-encoding on the forwarding path.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for Record {
    fn default() -> Self {
        Self {
            msg_id: String::new(),
            kind: String::new(),
            from: String::new(),
            origin: String::new(),
            auth_token: String::new(),
            to: String::new(),
            to_addr: String::new(),
            content: String::new(),
            timestamp: epoch(),
            ack_for: String::new(),
            peer_list: Vec::new(),
            attachments: Vec::new(),
            extra: serde_json::Map::new(),
        }
    }
}

impl Record {
    /// Returns the parsed kind, treating unknown tags as chat.
    pub fn record_kind(&self) -> RecordKind {
        RecordKind::parse(&self.kind).unwrap_or(RecordKind::Chat)
    }
}

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tags_roundtrip() {
        for kind in [
            RecordKind::Chat,
            RecordKind::Dm,
            RecordKind::Ack,
            RecordKind::PeerSync,
            RecordKind::Handshake,
            RecordKind::File,
        ] {
            assert_eq!(RecordKind::parse(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn unknown_kind_falls_back_to_chat() {
        let record = Record {
            kind: "reaction".into(),
            ..Record::default()
        };
        assert_eq!(record.record_kind(), RecordKind::Chat);
    }

    #[test]
    fn kind_serializes_under_type_key() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let record = Record {
            kind: "ack".into(),
            ack_for: "aa".into(),
            ..Record::default()
        };
        let json = serde_json::to_string(&record)?;
        assert!(json.contains(r#""type":"ack""#));
        Ok(())
    }

    #[test]
    fn missing_fields_decode_to_defaults() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let record: Record = serde_json::from_str(r#"{"content":"hi"}"#)?;
        assert!(record.msg_id.is_empty());
        assert!(record.origin.is_empty());
        assert_eq!(record.content, "hi");
        assert_eq!(record.timestamp, DateTime::<Utc>::UNIX_EPOCH);
        Ok(())
    }
}
