//! Core shared types for the Meshchat peer-to-peer chat mesh.
//!
//! This crate defines the types every other workspace crate agrees on:
//! peer presence, notifications, file metadata, and the central
//! [`MeshError`] enum. No other crate should define shared types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

/// Availability of a known peer as shown by every UI surface.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Presence {
    /// Display name the peer last announced.
    pub name: String,
    /// `host:port` the peer listens on.
    pub addr: String,
    /// Whether the peer was seen within the presence-grace window.
    pub online: bool,
}

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

/// System-level alert such as a mention or an incoming direct message.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Notification {
    /// ID of the record that triggered the notification.
    pub id: String,
    /// Human-readable alert text.
    pub text: String,
    /// Severity/category tag: `dm`, `mention`, or `file`.
    pub level: String,
    /// When the notification was generated (local clock).
    pub timestamp: DateTime<Utc>,
    /// Display name of the peer that caused the alert.
    pub from: String,
}

// ---------------------------------------------------------------------------
// FileRecord
// ---------------------------------------------------------------------------

/// Metadata for an uploaded file, exported to UIs.
///
/// The on-disk path is intentionally absent; only the file store knows
/// where the bytes live.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileRecord {
    /// Random 128-bit identifier, hex-encoded.
    pub id: String,
    /// Sanitized display name (basename of the original upload).
    pub name: String,
    /// Size in bytes.
    pub size: i64,
    /// Display name of the uploading peer.
    pub uploader: String,
    /// Sniffed MIME type, if any.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mime: String,
    /// Random key that authorizes download without a bearer credential.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub share_key: String,
    /// Upload instant (UTC).
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// MeshError
// ---------------------------------------------------------------------------

/// Central error type for the Meshchat workspace.
///
/// All crates convert their internal failures into variants of this
/// enum, giving the peer runtime a single error surface. Startup-fatal
/// variants (`ConfigError`, `BindError`, `CryptoError`) terminate the
/// process; everything else is logged and survived.
#[derive(Debug, Error)]
pub enum MeshError {
    /// Invalid flags or an unusable data directory.
    #[error("config error: {reason}")]
    ConfigError {
        /// What was wrong with the configuration.
        reason: String,
    },

    /// The TCP listener could not bind its address.
    #[error("bind error on {addr}: {reason}")]
    BindError {
        /// Address that failed to bind.
        addr: String,
        /// Underlying I/O failure.
        reason: String,
    },

    /// Key derivation for the shared-secret box failed.
    #[error("crypto init error: {reason}")]
    CryptoError {
        /// Underlying KDF/cipher failure.
        reason: String,
    },

    /// A wire frame was not a well-formed record.
    #[error("invalid frame: {reason}")]
    InvalidFrame {
        /// Why the frame could not be decoded.
        reason: String,
    },

    /// An encrypted envelope failed authentication or was malformed.
    #[error("decrypt error: {reason}")]
    DecryptError {
        /// Why decryption failed.
        reason: String,
    },

    /// An outbound dial attempt failed; retried by the scheduler.
    #[error("dial {addr} failed: {reason}")]
    DialError {
        /// Peer address that could not be reached.
        addr: String,
        /// Underlying I/O failure.
        reason: String,
    },

    /// A history or file store operation failed.
    #[error("storage error: {reason}")]
    StorageError {
        /// Underlying database or filesystem failure.
        reason: String,
    },

    /// A handshake carried an invalid or mismatched token.
    #[error("handshake rejected: {reason}")]
    HandshakeRejected {
        /// Why the handshake was refused.
        reason: String,
    },

    /// A bearer token or login credential failed validation.
    #[error("auth error: {reason}")]
    AuthError {
        /// Why the credential was refused.
        reason: String,
    },

    /// A networking operation outside dial/bind failed.
    #[error("network error: {reason}")]
    NetworkError {
        /// Underlying transport failure.
        reason: String,
    },

    /// A requested entity (file, record) does not exist.
    #[error("not found: {reason}")]
    NotFound {
        /// What was looked up.
        reason: String,
    },
}

impl MeshError {
    /// Shorthand for a [`MeshError::StorageError`].
    pub fn storage(err: impl fmt::Display) -> Self {
        Self::StorageError {
            reason: err.to_string(),
        }
    }
}

/// Convenience result type using [`MeshError`].
pub type Result<T> = std::result::Result<T, MeshError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_carries_reason() {
        let err = MeshError::HandshakeRejected {
            reason: "principal mismatch".into(),
        };
        assert!(err.to_string().contains("principal mismatch"));
    }

    #[test]
    fn presence_serde_roundtrip() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let p = Presence {
            name: "alice".into(),
            addr: "127.0.0.1:9001".into(),
            online: true,
        };
        let json = serde_json::to_string(&p)?;
        let parsed: Presence = serde_json::from_str(&json)?;
        assert_eq!(p, parsed);
        Ok(())
    }

    #[test]
    fn file_record_omits_empty_optionals() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let rec = FileRecord {
            id: "ab".into(),
            name: "notes.txt".into(),
            size: 12,
            uploader: "bob".into(),
            mime: String::new(),
            share_key: String::new(),
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&rec)?;
        assert!(!json.contains("share_key"));
        assert!(!json.contains("mime"));
        Ok(())
    }
}
