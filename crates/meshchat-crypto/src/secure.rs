//! Authenticated encryption of wire frames.
//!
//! [`SecureBox`] seals each frame with ChaCha20-Poly1305 under a key
//! derived from the mesh secret. The envelope carries the nonce and
//! ciphertext as base64 inside a small JSON object so encrypted frames
//! remain newline-safe on the wire.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use meshchat_types::{MeshError, Result};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::kdf::derive_frame_key;

/// ChaCha20-Poly1305 nonce length (96 bits).
const NONCE_LEN: usize = 12;

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Wire shape of an encrypted frame.
#[derive(Serialize, Deserialize)]
struct Envelope {
    /// Base64 of the 96-bit nonce.
    nonce: String,
    /// Base64 of ciphertext + tag.
    data: String,
}

// ---------------------------------------------------------------------------
// SecureBox
// ---------------------------------------------------------------------------

/// Symmetric box over the mesh's shared secret.
///
/// Constructed once at startup; a mesh without a secret simply has no
/// box and frames travel in the clear (see [`seal_frame`] /
/// [`open_frame`] for the pass-through behavior).
pub struct SecureBox {
    cipher: ChaCha20Poly1305,
}

impl SecureBox {
    /// Builds a box from a shared secret.
    ///
    /// Returns `Ok(None)` for an empty secret, matching the peer's
    /// plaintext mode.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::CryptoError`] if key derivation fails;
    /// fatal at startup.
    pub fn new(secret: &str) -> Result<Option<Self>> {
        if secret.is_empty() {
            return Ok(None);
        }
        let key = derive_frame_key(secret)?;
        Ok(Some(Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(&key)),
        }))
    }

    /// Encrypts one frame with a fresh random nonce.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| MeshError::CryptoError {
                reason: format!("frame encryption failed: {e}"),
            })?;

        let envelope = Envelope {
            nonce: BASE64.encode(nonce_bytes),
            data: BASE64.encode(ciphertext),
        };
        serde_json::to_vec(&envelope).map_err(|e| MeshError::CryptoError {
            reason: format!("envelope encode failed: {e}"),
        })
    }

    /// Decrypts one frame.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::DecryptError`] on a malformed envelope,
    /// bad base64, wrong nonce size, or failed authentication. Callers
    /// log and skip the frame; the connection stays open.
    pub fn open(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let envelope: Envelope =
            serde_json::from_slice(payload).map_err(|e| MeshError::DecryptError {
                reason: format!("malformed envelope: {e}"),
            })?;

        let nonce_bytes = BASE64
            .decode(&envelope.nonce)
            .map_err(|e| MeshError::DecryptError {
                reason: format!("bad nonce encoding: {e}"),
            })?;
        if nonce_bytes.len() != NONCE_LEN {
            return Err(MeshError::DecryptError {
                reason: format!("invalid nonce size {}", nonce_bytes.len()),
            });
        }

        let ciphertext = BASE64
            .decode(&envelope.data)
            .map_err(|e| MeshError::DecryptError {
                reason: format!("bad data encoding: {e}"),
            })?;

        self.cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_slice())
            .map_err(|_| MeshError::DecryptError {
                reason: "authentication failed".into(),
            })
    }
}

// ---------------------------------------------------------------------------
// Pass-through helpers
// ---------------------------------------------------------------------------

/// Seals a frame when a box is configured; identity otherwise.
pub fn seal_frame(boxed: Option<&SecureBox>, plaintext: &[u8]) -> Result<Vec<u8>> {
    match boxed {
        Some(b) => b.seal(plaintext),
        None => Ok(plaintext.to_vec()),
    }
}

/// Opens a frame when a box is configured; identity otherwise.
pub fn open_frame(boxed: Option<&SecureBox>, payload: &[u8]) -> Result<Vec<u8>> {
    match boxed {
        Some(b) => b.open(payload),
        None => Ok(payload.to_vec()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
