//! In-memory sliding window of recent records.

use std::collections::VecDeque;
use std::sync::Mutex;

use meshchat_proto::Record;

/// Default window size when the configured capacity is zero.
const DEFAULT_CAPACITY: usize = 50;

/// FIFO buffer of the most recent records.
pub struct HistoryBuffer {
    inner: Mutex<VecDeque<Record>>,
    max: usize,
}

impl HistoryBuffer {
    /// Creates a buffer holding at most `max` records.
    pub fn new(max: usize) -> Self {
        let max = if max == 0 { DEFAULT_CAPACITY } else { max };
        Self {
            inner: Mutex::new(VecDeque::with_capacity(max)),
            max,
        }
    }

    /// Appends a record, evicting the oldest past capacity.
    pub fn add(&self, record: Record) {
        let mut buffer = self.inner.lock().expect("history lock");
        buffer.push_back(record);
        while buffer.len() > self.max {
            buffer.pop_front();
        }
    }

    /// Returns a copy of the window, oldest first.
    pub fn all(&self) -> Vec<Record> {
        self.inner
            .lock()
            .expect("history lock")
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

    fn record(id: &str) -> Record {
        Record {
            msg_id: id.into(),
            ..Record::default()
        }
    }

    #[test]
    fn keeps_insertion_order() {
        let buffer = HistoryBuffer::new(10);
        buffer.add(record("a"));
        buffer.add(record("b"));
        let all = buffer.all();
        assert_eq!(all[0].msg_id, "a");
        assert_eq!(all[1].msg_id, "b");
    }

    #[test]
    fn evicts_oldest_past_capacity() {
        let buffer = HistoryBuffer::new(2);
        buffer.add(record("a"));
        buffer.add(record("b"));
        buffer.add(record("c"));
        let all = buffer.all();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].msg_id, "b");
        assert_eq!(all[1].msg_id, "c");
    }

    #[test]
    fn all_returns_a_copy() {
        let buffer = HistoryBuffer::new(4);
        buffer.add(record("a"));
        let mut copy = buffer.all();
        copy.clear();
        assert_eq!(buffer.all().len(), 1);
    }

    #[test]
    fn zero_capacity_uses_default() {
        let buffer = HistoryBuffer::new(0);
        assert_eq!(buffer.max, DEFAULT_CAPACITY);
    }
}
