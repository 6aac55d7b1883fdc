//! Shared-secret frame encryption for the Meshchat mesh.
//!
//! A mesh configured with a secret wraps every wire frame in an
//! authenticated envelope; peers without the secret cannot read or
//! forge traffic. One pre-shared secret is a mesh-wide access control
//! boundary, not per-peer privacy.

pub mod kdf;
pub mod secure;

pub use secure::{open_frame, seal_frame, SecureBox};
