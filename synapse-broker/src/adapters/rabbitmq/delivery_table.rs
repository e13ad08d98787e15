use std::collections::HashMap;

use parking_lot::Mutex;

/// Maps the ack ids handed to callers onto the channel's delivery tags.
///
/// Entries exist only for deliveries that were surfaced by a pull and have not yet been
/// acknowledged or rejected. `take` removes the entry, so a second acknowledge of the same
/// id finds nothing and never reaches the broker.
#[derive(Debug, Default)]
pub struct DeliveryTable {
    entries: Mutex<HashMap<String, u64>>,
}

impl DeliveryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a delivery and return the ack id minted for it.
    pub fn register(&self, delivery_tag: u64) -> String {
        let ack_id = delivery_tag.to_string();
        self.entries.lock().insert(ack_id.clone(), delivery_tag);
        ack_id
    }

    pub fn take(&self, ack_id: &str) -> Option<u64> {
        self.entries.lock().remove(ack_id)
    }

    pub fn contains(&self, ack_id: &str) -> bool {
        self.entries.lock().contains_key(ack_id)
    }

    /// Forget every entry. Called when the channel that issued the tags is gone.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock();
        let dropped = entries.len();
        entries.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
