//! Bearer token helper shared by the peer runtime and the web bridge.
//!
//! Tokens are HS256 JWTs whose `username` claim names the principal.
//! The signing secret comes from `MESH_AUTH_SECRET` and is read exactly
//! once per process; issuing is owned by the external authentication
//! service, but the same helper lives here so handshake and web-bridge
//! validation agree with it byte for byte.

use std::sync::OnceLock;

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use meshchat_types::{MeshError, Result};
use serde::{Deserialize, Serialize};

/// Environment variable holding the HS256 signing secret.
const SECRET_ENV: &str = "MESH_AUTH_SECRET";

/// Development fallback used when the environment is unset.
const DEV_SECRET: &str = "dev-secret-change-me";

/// Token lifetime for locally issued tokens.
const TOKEN_TTL_HOURS: i64 = 24;

static SECRET: OnceLock<Vec<u8>> = OnceLock::new();

fn secret() -> &'static [u8] {
    SECRET.get_or_init(|| {
        std::env::var(SECRET_ENV)
            .unwrap_or_else(|_| DEV_SECRET.to_string())
            .into_bytes()
    })
}

// ---------------------------------------------------------------------------
// Claims
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
struct Claims {
    username: String,
    exp: i64,
}

// ---------------------------------------------------------------------------
// Issue / validate
// ---------------------------------------------------------------------------

/// Signs a token for `username`, valid for 24 hours.
pub fn issue_token(username: &str) -> Result<String> {
    let claims = Claims {
        username: username.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::hours(TOKEN_TTL_HOURS)).timestamp(),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret()),
    )
    .map_err(|e| MeshError::AuthError {
        reason: format!("token signing failed: {e}"),
    })
}

/// Validates a token and returns its principal name.
///
/// # Errors
///
/// Returns [`MeshError::AuthError`] for an empty, expired, malformed,
/// or wrongly signed token.
pub fn validate_token(token: &str) -> Result<String> {
    if token.is_empty() {
        return Err(MeshError::AuthError {
            reason: "empty token".into(),
        });
    }
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|e| MeshError::AuthError {
        reason: e.to_string(),
    })?;
    Ok(data.claims.username)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
