//! Local identity: display name plus optional bearer token.
//!
//! Callers use the boolean return values to decide whether a change
//! warrants broadcasting a fresh handshake.

use std::sync::RwLock;

struct Inner {
    name: String,
    token: String,
}

/// Thread-safe holder of the peer's current nickname and auth token.
pub struct Identity {
    inner: RwLock<Inner>,
}

impl Identity {
    /// Creates an identity, using `fallback` (normally the listen
    /// address) when `initial` is empty.
    pub fn new(initial: &str, fallback: &str) -> Self {
        let name = if initial.is_empty() { fallback } else { initial };
        Self {
            inner: RwLock::new(Inner {
                name: name.to_string(),
                token: String::new(),
            }),
        }
    }

    /// Current display name.
    pub fn get(&self) -> String {
        self.inner.read().expect("identity lock").name.clone()
    }

    /// Current bearer token; empty when unauthenticated.
    pub fn token(&self) -> String {
        self.inner.read().expect("identity lock").token.clone()
    }

    /// Sets the display name. Returns `true` only if the name is
    /// non-empty and actually changed.
    pub fn set_display(&self, name: &str) -> bool {
        let mut inner = self.inner.write().expect("identity lock");
        if name.is_empty() || inner.name == name {
            return false;
        }
        inner.name = name.to_string();
        true
    }

    /// Sets an authenticated name + token pair. Returns `true` only if
    /// both are non-empty and at least one changed.
    pub fn set_auth(&self, name: &str, token: &str) -> bool {
        let mut inner = self.inner.write().expect("identity lock");
        if name.is_empty() || token.is_empty() {
            return false;
        }
        let changed = inner.name != name || inner.token != token;
        inner.name = name.to_string();
        inner.token = token.to_string();
        changed
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_initial_uses_fallback() {
        let identity = Identity::new("", "127.0.0.1:9001");
        assert_eq!(identity.get(), "127.0.0.1:9001");
    }

    #[test]
    fn set_display_reports_change() {
        let identity = Identity::new("alice", "x");
        assert!(!identity.set_display(""));
        assert!(!identity.set_display("alice"));
        assert!(identity.set_display("alicia"));
        assert_eq!(identity.get(), "alicia");
    }

    #[test]
    fn set_auth_requires_both_fields() {
        let identity = Identity::new("alice", "x");
        assert!(!identity.set_auth("", "tok"));
        assert!(!identity.set_auth("alice", ""));
        assert!(identity.set_auth("alice", "tok"));
        assert_eq!(identity.token(), "tok");
    }

    #[test]
    fn set_auth_unchanged_pair_reports_false() {
        let identity = Identity::new("alice", "x");
        assert!(identity.set_auth("alice", "tok"));
        assert!(!identity.set_auth("alice", "tok"));
        assert!(identity.set_auth("alice", "tok2"));
    }
}
