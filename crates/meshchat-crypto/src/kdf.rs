//! Scrypt key derivation for the shared-secret box.
//!
//! Parameters are fixed (N = 2^15, r = 8, p = 1): every peer on a mesh
//! must derive the same key from the same secret, so tunability would
//! only create interop failures. The salt is a stable SHA-256 of the
//! secret itself, which keeps the whole derivation a pure function of
//! the configured string.

use meshchat_types::{MeshError, Result};
use scrypt::Params;
use sha2::{Digest, Sha256};

/// log2(N) for the scrypt cost parameter N = 2^15.
const SCRYPT_LOG_N: u8 = 15;
/// Scrypt block size parameter.
const SCRYPT_R: u32 = 8;
/// Scrypt parallelism parameter.
const SCRYPT_P: u32 = 1;

/// Derives the 256-bit frame key from a shared secret.
///
/// # Errors
///
/// Returns [`MeshError::CryptoError`] if the scrypt parameters are
/// rejected or the derivation itself fails; both are startup-fatal.
pub fn derive_frame_key(secret: &str) -> Result<[u8; 32]> {
    let salt = Sha256::digest(secret.as_bytes());

    let params = Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, 32).map_err(|e| {
        MeshError::CryptoError {
            reason: format!("invalid scrypt parameters: {e}"),
        }
    })?;

    let mut key = [0u8; 32];
    scrypt::scrypt(secret.as_bytes(), &salt, &params, &mut key).map_err(|e| {
        MeshError::CryptoError {
            reason: format!("scrypt derivation failed: {e}"),
        }
    })?;

    Ok(key)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_secret_same_key() -> Result<()> {
        let a = derive_frame_key("mesh-secret")?;
        let b = derive_frame_key("mesh-secret")?;
        assert_eq!(a, b);
        Ok(())
    }

    #[test]
    fn different_secret_different_key() -> Result<()> {
        let a = derive_frame_key("mesh-secret")?;
        let b = derive_frame_key("other-secret")?;
        assert_ne!(a, b);
        Ok(())
    }

    #[test]
    fn key_is_nonzero() -> Result<()> {
        let key = derive_frame_key("x")?;
        assert_ne!(key, [0u8; 32]);
        Ok(())
    }
}
