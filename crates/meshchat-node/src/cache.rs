//! Seen-ID cache enforcing at-most-once local processing.
//!
//! Flooding terminates because every peer drops records whose ID it
//! has already observed within the TTL. Eviction is a lazy full scan
//! on each call; at chat volumes the map stays small.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Default time-to-live for seen IDs.
const DEFAULT_TTL: Duration = Duration::from_secs(600);

/// Tracks recently seen message IDs to drop duplicates.
pub struct MsgCache {
    seen: Mutex<HashMap<String, Instant>>,
    ttl: Duration,
}

impl MsgCache {
    /// Creates a cache with the given TTL; zero falls back to the
    /// 10-minute default.
    pub fn new(ttl: Duration) -> Self {
        let ttl = if ttl.is_zero() { DEFAULT_TTL } else { ttl };
        Self {
            seen: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Returns `true` if `id` was observed within the TTL; otherwise
    /// records it and returns `false`. Empty IDs are never tracked.
    pub fn seen(&self, id: &str) -> bool {
        if id.is_empty() {
            return false;
        }
        let mut seen = self.seen.lock().expect("cache lock");
        let now = Instant::now();
        if let Some(first) = seen.get(id) {
            if now.duration_since(*first) < self.ttl {
                return true;
            }
        }
        seen.insert(id.to_string(), now);
        let ttl = self.ttl;
        seen.retain(|_, first| now.duration_since(*first) <= ttl);
        false
    }
}

impl Default for MsgCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
