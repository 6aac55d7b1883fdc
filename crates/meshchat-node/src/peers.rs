//! Peer directory with presence, and the block list.
//!
//! The directory keeps one entry per address (primary index) with a
//! secondary index by lowercased display name, so a peer renaming
//! itself does not leak entries. Entries older than the presence-grace
//! window flip offline but stay resolvable.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use meshchat_types::Presence;

/// How long after last contact a peer still counts as online.
const PRESENCE_GRACE: Duration = Duration::from_secs(20);

// ---------------------------------------------------------------------------
// PeerDirectory
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct PeerEntry {
    name: String,
    addr: String,
    online: bool,
    last_seen: Instant,
}

struct DirectoryInner {
    by_addr: HashMap<String, PeerEntry>,
    /// lowercased name → address into `by_addr`.
    by_name: HashMap<String, String>,
}

/// Tracks known peers and their presence.
pub struct PeerDirectory {
    inner: Mutex<DirectoryInner>,
    grace: Duration,
}

impl PeerDirectory {
    /// Creates an empty directory with the default presence grace.
    pub fn new() -> Self {
        Self::with_grace(PRESENCE_GRACE)
    }

    /// Creates a directory with a custom grace window (tests).
    pub fn with_grace(grace: Duration) -> Self {
        Self {
            inner: Mutex::new(DirectoryInner {
                by_addr: HashMap::new(),
                by_name: HashMap::new(),
            }),
            grace,
        }
    }

    /// Upserts the entry for `addr`, marking it online now. An empty
    /// name falls back to the address itself; an empty address is
    /// ignored.
    pub fn record(&self, name: &str, addr: &str) {
        if addr.is_empty() {
            return;
        }
        let name = if name.is_empty() { addr } else { name };
        let mut inner = self.inner.lock().expect("directory lock");
        let entry = inner
            .by_addr
            .entry(addr.to_string())
            .or_insert_with(|| PeerEntry {
                name: String::new(),
                addr: addr.to_string(),
                online: false,
                last_seen: Instant::now(),
            });
        entry.name = name.to_string();
        entry.online = true;
        entry.last_seen = Instant::now();
        inner
            .by_name
            .insert(name.to_lowercase(), addr.to_string());
    }

    /// Refreshes last-seen for `addrs` and flips every entry older
    /// than the grace window offline without removing it.
    pub fn mark_active(&self, addrs: &[String]) {
        let mut inner = self.inner.lock().expect("directory lock");
        let now = Instant::now();
        for addr in addrs {
            if let Some(entry) = inner.by_addr.get_mut(addr) {
                entry.online = true;
                entry.last_seen = now;
            }
        }
        let grace = self.grace;
        for entry in inner.by_addr.values_mut() {
            if now.duration_since(entry.last_seen) > grace {
                entry.online = false;
            }
        }
    }

    /// Looks `token` up first as an address, then as a (case-folded)
    /// name. Returns `(addr, name)` when found.
    pub fn resolve(&self, token: &str) -> Option<(String, String)> {
        let inner = self.inner.lock().expect("directory lock");
        if let Some(entry) = inner.by_addr.get(token) {
            return Some((entry.addr.clone(), entry.name.clone()));
        }
        let addr = inner.by_name.get(&token.to_lowercase())?;
        let entry = inner.by_addr.get(addr)?;
        Some((entry.addr.clone(), entry.name.clone()))
    }

    /// All entries as UI presence rows, sorted by lowercased name.
    pub fn snapshot(&self) -> Vec<Presence> {
        let inner = self.inner.lock().expect("directory lock");
        let mut list: Vec<Presence> = inner
            .by_addr
            .values()
            .map(|entry| Presence {
                name: entry.name.clone(),
                addr: entry.addr.clone(),
                online: entry.online,
            })
            .collect();
        list.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        list
    }
}

impl Default for PeerDirectory {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// BlockList
// ---------------------------------------------------------------------------

/// Deny set matched against sender names and origin addresses.
#[derive(Default)]
pub struct BlockList {
    blocked: RwLock<HashSet<String>>,
}

impl BlockList {
    /// Creates an empty block list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a token; empty tokens are silently ignored.
    pub fn add(&self, token: &str) {
        if token.is_empty() {
            return;
        }
        self.blocked
            .write()
            .expect("blocklist lock")
            .insert(token.to_string());
    }

    /// Removes a token.
    pub fn remove(&self, token: &str) {
        self.blocked.write().expect("blocklist lock").remove(token);
    }

    /// Whether either `name` or `addr` is blocked.
    pub fn blocks(&self, name: &str, addr: &str) -> bool {
        let blocked = self.blocked.read().expect("blocklist lock");
        blocked.contains(name) || blocked.contains(addr)
    }

    /// Current tokens, unordered.
    pub fn list(&self) -> Vec<String> {
        self.blocked
            .read()
            .expect("blocklist lock")
            .iter()
            .cloned()
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_then_resolve_by_both_indices() {
        let dir = PeerDirectory::new();
        dir.record("Alice", "127.0.0.1:9001");

        let by_addr = dir.resolve("127.0.0.1:9001").expect("by addr");
        assert_eq!(by_addr, ("127.0.0.1:9001".into(), "Alice".into()));

        let by_name = dir.resolve("alice").expect("case-folded name");
        assert_eq!(by_name.0, "127.0.0.1:9001");
    }

    #[test]
    fn rename_keeps_one_entry_per_addr() {
        let dir = PeerDirectory::new();
        dir.record("Alice", "127.0.0.1:9001");
        dir.record("Alicia", "127.0.0.1:9001");
        assert_eq!(dir.snapshot().len(), 1);
        assert_eq!(dir.snapshot()[0].name, "Alicia");
    }

    #[test]
    fn empty_name_falls_back_to_addr() {
        let dir = PeerDirectory::new();
        dir.record("", "127.0.0.1:9001");
        assert_eq!(dir.snapshot()[0].name, "127.0.0.1:9001");
    }

    #[test]
    fn stale_entries_go_offline_but_stay_listed() {
        let dir = PeerDirectory::with_grace(Duration::from_millis(10));
        dir.record("alice", "127.0.0.1:9001");
        std::thread::sleep(Duration::from_millis(30));
        dir.mark_active(&[]);

        let snapshot = dir.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(!snapshot[0].online);
        assert!(dir.resolve("alice").is_some());
    }

    #[test]
    fn mark_active_refreshes_listed_addrs() {
        let dir = PeerDirectory::with_grace(Duration::from_millis(50));
        dir.record("alice", "127.0.0.1:9001");
        dir.record("bob", "127.0.0.1:9002");
        std::thread::sleep(Duration::from_millis(70));
        dir.mark_active(&["127.0.0.1:9001".to_string()]);

        let snapshot = dir.snapshot();
        let alice = snapshot.iter().find(|p| p.name == "alice").expect("alice");
        let bob = snapshot.iter().find(|p| p.name == "bob").expect("bob");
        assert!(alice.online);
        assert!(!bob.online);
    }

    #[test]
    fn snapshot_sorted_by_folded_name() {
        let dir = PeerDirectory::new();
        dir.record("bob", "127.0.0.1:9002");
        dir.record("Alice", "127.0.0.1:9001");
        let names: Vec<String> = dir.snapshot().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["Alice".to_string(), "bob".to_string()]);
    }

    #[test]
    fn block_add_remove_roundtrip() {
        let list = BlockList::new();
        list.add("mallory");
        assert!(list.blocks("mallory", "127.0.0.1:9009"));
        assert!(list.blocks("someone", "mallory"));
        list.remove("mallory");
        assert!(!list.blocks("mallory", "127.0.0.1:9009"));
    }

    #[test]
    fn empty_token_is_ignored() {
        let list = BlockList::new();
        list.add("");
        assert!(list.list().is_empty());
        assert!(!list.blocks("", ""));
    }
}
