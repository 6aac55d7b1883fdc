//! Wire protocol for the Meshchat mesh.
//!
//! A mesh frame is one JSON-encoded [`Record`] per newline. This crate
//! owns the record shape, the kind tags, random message IDs, and the
//! encode/decode functions. Framing (the trailing `\n`) and encryption
//! are layered on top by the connection manager.

pub mod message;

pub use message::{Attachment, Record, RecordKind};

use meshchat_types::{MeshError, Result};

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

/// Encodes a record as a single JSON line (without the frame delimiter).
pub fn encode_record(record: &Record) -> Result<Vec<u8>> {
    serde_json::to_vec(record).map_err(|e| MeshError::InvalidFrame {
        reason: format!("encode: {e}"),
    })
}

/// Decodes one wire frame into a [`Record`].
///
/// Unknown JSON fields are preserved in [`Record::extra`] so a newer
/// peer's fields survive a hop through an older one.
///
/// # Errors
///
/// Returns [`MeshError::InvalidFrame`] when the bytes are not a
/// well-formed record.
pub fn decode_record(frame: &[u8]) -> Result<Record> {
    serde_json::from_slice(frame).map_err(|e| MeshError::InvalidFrame {
        reason: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Message IDs
// ---------------------------------------------------------------------------

/// Produces a random 128-bit hex identifier for outbound records.
///
/// Falls back to the local nanosecond clock if OS entropy is
/// unavailable, which keeps IDs unique enough per origin.
pub fn new_msg_id() -> String {
    use rand::RngCore;

    let mut bytes = [0u8; 16];
    match rand::rngs::OsRng.try_fill_bytes(&mut bytes) {
        Ok(()) => hex::encode(bytes),
        Err(_) => chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default()
            .to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn encode_decode_is_identity() -> Result<()> {
        let record = Record {
            msg_id: new_msg_id(),
            kind: RecordKind::Dm.as_str().to_string(),
            from: "alice".into(),
            origin: "127.0.0.1:9001".into(),
            to: "bob".into(),
            to_addr: "127.0.0.1:9002".into(),
            content: "hi bob".into(),
            timestamp: Utc::now(),
            ..Record::default()
        };

        let encoded = encode_record(&record)?;
        let decoded = decode_record(&encoded)?;
        assert_eq!(decoded.msg_id, record.msg_id);
        assert_eq!(decoded.kind, record.kind);
        assert_eq!(decoded.to, "bob");
        assert_eq!(decoded.to_addr, "127.0.0.1:9002");
        assert_eq!(decoded.content, "hi bob");
        Ok(())
    }

    #[test]
    fn unknown_fields_survive_roundtrip() -> Result<()> {
        let frame = br#"{"msg_id":"aa","type":"chat","from":"a","origin":"x","content":"hello","timestamp":"2025-01-01T00:00:00Z","future_field":42}"#;
        let record = decode_record(frame)?;
        let encoded = encode_record(&record)?;
        let text = String::from_utf8(encoded).expect("utf8");
        assert!(text.contains("future_field"));
        assert!(text.contains("42"));
        Ok(())
    }

    #[test]
    fn malformed_frame_is_invalid() {
        let err = decode_record(b"{not json").unwrap_err();
        assert!(matches!(err, MeshError::InvalidFrame { .. }));
    }

    #[test]
    fn empty_optional_fields_are_omitted() -> Result<()> {
        let record = Record {
            msg_id: "ff".into(),
            kind: RecordKind::Chat.as_str().to_string(),
            from: "a".into(),
            origin: "x".into(),
            content: "hello".into(),
            timestamp: Utc::now(),
            ..Record::default()
        };
        let text = String::from_utf8(encode_record(&record)?).expect("utf8");
        assert!(!text.contains("auth_token"));
        assert!(!text.contains("to_addr"));
        assert!(!text.contains("ack_for"));
        assert!(!text.contains("peer_list"));
        assert!(!text.contains("attachments"));
        Ok(())
    }

    #[test]
    fn msg_ids_are_unique_and_hex() {
        let a = new_msg_id();
        let b = new_msg_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
