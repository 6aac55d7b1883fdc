//! UI sink abstraction and fan-out.
//!
//! The runtime talks to exactly one [`Sink`], usually a [`MultiSink`]
//! dispatching to the CLI, TUI, and web surfaces. Implementations must
//! be non-blocking or bounded; a stuck sink must not stall the inbound
//! loop.

use meshchat_proto::Record;
use meshchat_types::{Notification, Presence};
use std::sync::Arc;

/// Capability set every UI surface must satisfy.
pub trait Sink: Send + Sync {
    /// Renders a chat/dm/file record.
    fn show_message(&self, record: &Record);
    /// Renders a system line.
    fn show_system(&self, text: &str);
    /// Replaces the displayed peer list.
    fn update_peers(&self, peers: &[Presence]);
    /// Surfaces a mention/DM/file alert.
    fn show_notification(&self, note: &Notification);
}

// ---------------------------------------------------------------------------
// MultiSink
// ---------------------------------------------------------------------------

/// Fans chat events out to each registered sink; absent members are
/// skipped.
pub struct MultiSink {
    sinks: Vec<Arc<dyn Sink>>,
}

impl MultiSink {
    /// Builds a composite from optional members.
    pub fn new(members: Vec<Option<Arc<dyn Sink>>>) -> Self {
        Self {
            sinks: members.into_iter().flatten().collect(),
        }
    }
}

impl Sink for MultiSink {
    fn show_message(&self, record: &Record) {
        for sink in &self.sinks {
            sink.show_message(record);
        }
    }

    fn show_system(&self, text: &str) {
        for sink in &self.sinks {
            sink.show_system(text);
        }
    }

    fn update_peers(&self, peers: &[Presence]) {
        for sink in &self.sinks {
            sink.update_peers(peers);
        }
    }

    fn show_notification(&self, note: &Notification) {
        for sink in &self.sinks {
            sink.show_notification(note);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingSink {
        messages: AtomicUsize,
        systems: AtomicUsize,
    }

    impl Sink for CountingSink {
        fn show_message(&self, _record: &Record) {
            self.messages.fetch_add(1, Ordering::SeqCst);
        }
        fn show_system(&self, _text: &str) {
            self.systems.fetch_add(1, Ordering::SeqCst);
        }
        fn update_peers(&self, _peers: &[Presence]) {}
        fn show_notification(&self, _note: &Notification) {}
    }

    #[test]
    fn fans_out_to_all_members_skipping_none() {
        let a = Arc::new(CountingSink::default());
        let b = Arc::new(CountingSink::default());
        let multi = MultiSink::new(vec![
            Some(a.clone() as Arc<dyn Sink>),
            None,
            Some(b.clone() as Arc<dyn Sink>),
        ]);

        multi.show_message(&Record::default());
        multi.show_system("hello");

        assert_eq!(a.messages.load(Ordering::SeqCst), 1);
        assert_eq!(b.messages.load(Ordering::SeqCst), 1);
        assert_eq!(a.systems.load(Ordering::SeqCst), 1);
        assert_eq!(b.systems.load(Ordering::SeqCst), 1);
    }
}
