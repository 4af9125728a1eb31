//! Buffered-replay store.
//!
//! Holds the outbound frames of buffered broadcasts so late joiners can catch
//! up. Frames are replayed in the order they were retained and are only
//! removed in bulk, when their author leaves the room.

use std::collections::{BTreeMap, HashMap};

use bytes::Bytes;
use hubbub_proto::ClientId;

/// A retained outbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferedMessage {
    /// Client whose departure purges this frame.
    pub author: ClientId,
    /// Encoded outbound frame, replayed verbatim.
    pub frame: Bytes,
}

/// Insertion-ordered store of buffered frames, indexed by author.
#[derive(Debug, Default, Clone)]
pub struct ReplayStore {
    /// Monotonic key per retained frame; iteration order is retention order.
    messages: BTreeMap<u64, BufferedMessage>,
    /// Keys each author retained, for purge on departure.
    by_author: HashMap<ClientId, Vec<u64>>,
    next_key: u64,
}

impl ReplayStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Retain `frame` on behalf of `author`.
    pub fn retain(&mut self, author: ClientId, frame: Bytes) {
        let key = self.next_key;
        self.next_key += 1;

        self.messages.insert(key, BufferedMessage { author, frame });
        self.by_author.entry(author).or_default().push(key);
    }

    /// Drop every frame retained by `author`. Returns how many were removed.
    pub fn purge_author(&mut self, author: ClientId) -> usize {
        let Some(keys) = self.by_author.remove(&author) else {
            return 0;
        };
        for key in &keys {
            self.messages.remove(key);
        }
        keys.len()
    }

    /// Retained frames in retention order.
    pub fn iter(&self) -> impl Iterator<Item = &BufferedMessage> {
        self.messages.values()
    }

    /// Number of frames retained by `author`.
    pub fn authored_by(&self, author: ClientId) -> usize {
        self.by_author.get(&author).map_or(0, Vec::len)
    }

    /// Number of retained frames.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether nothing is retained.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.by_author.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(byte: u8) -> Bytes {
        Bytes::from(vec![byte])
    }

    #[test]
    fn iterates_in_retention_order() {
        let mut store = ReplayStore::new();
        store.retain(2, frame(0xA));
        store.retain(1, frame(0xB));
        store.retain(2, frame(0xC));

        let frames: Vec<_> = store.iter().map(|m| m.frame[0]).collect();
        assert_eq!(frames, vec![0xA, 0xB, 0xC]);
    }

    #[test]
    fn purge_removes_only_that_author() {
        let mut store = ReplayStore::new();
        store.retain(1, frame(1));
        store.retain(2, frame(2));
        store.retain(1, frame(3));
        store.retain(3, frame(4));

        assert_eq!(store.purge_author(1), 2);

        let remaining: Vec<_> = store.iter().map(|m| (m.author, m.frame[0])).collect();
        assert_eq!(remaining, vec![(2, 2), (3, 4)]);
        assert_eq!(store.authored_by(1), 0);
    }

    #[test]
    fn purge_of_unknown_author_is_noop() {
        let mut store = ReplayStore::new();
        store.retain(1, frame(1));

        assert_eq!(store.purge_author(9), 0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn clear_empties_indexes() {
        let mut store = ReplayStore::new();
        store.retain(1, frame(1));
        store.clear();

        assert!(store.is_empty());
        assert_eq!(store.authored_by(1), 0);
    }
}
