//! Bounded recall cache for image-bearing messages.
//!
//! A tag command can quote a message that was sent long before the command
//! itself, and the quote carries only the source key of the original.
//! The cache keeps the last `capacity` image-bearing messages around so
//! that key can be turned back into the original content.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

/// A message retained for later quote-reply recovery.
///
/// Keyed by the platform source key: the id of the chat it came from plus
/// the per-message sequence ids. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedMessage {
    pub origin_id: i64,
    pub sequence_ids: Vec<i32>,
    pub sender_id: i64,
    /// Opaque platform references to the images the message carried.
    pub images: Vec<String>,
}

/// Fixed-capacity circular buffer of recent messages.
///
/// `put` is O(1) and never fails; once the buffer has wrapped, each write
/// silently discards the entry that previously occupied the slot. Slot
/// indices are handed out by an atomic counter, so concurrent writers
/// cannot corrupt the write sequence; slot contents are write-once between
/// overwrites and need no further coordination.
pub struct MessageCache {
    slots: Vec<RwLock<Option<CachedMessage>>>,
    next_seq: AtomicU64,
}

impl MessageCache {
    /// Capacity is fixed for the life of the cache. Zero is rounded up to
    /// one so the modulo arithmetic stays well-defined.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: (0..capacity).map(|_| RwLock::new(None)).collect(),
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn put(&self, message: CachedMessage) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let idx = (seq % self.slots.len() as u64) as usize;
        *self.slots[idx].write() = Some(message);
    }

    /// Look up a message by its source key.
    ///
    /// Scans slots from index 0 upward and returns the first match in
    /// index order. Slots fill from index 0, so before the buffer has
    /// wrapped the scan stops early at the first never-written slot; after
    /// it wraps every slot holds a message and the whole buffer is scanned.
    /// Post-wrap matching is therefore by slot index, not by recency.
    /// Long-standing observable behavior that callers rely on, kept as is.
    pub fn get(&self, sequence_ids: &[i32], origin_id: i64) -> Option<CachedMessage> {
        for slot in &self.slots {
            let guard = slot.read();
            let msg = match guard.as_ref() {
                Some(msg) => msg,
                // Slots fill in order, so an empty slot means the rest are
                // empty too.
                None => break,
            };
            if msg.origin_id == origin_id && msg.sequence_ids == sequence_ids {
                return Some(msg.clone());
            }
        }
        None
    }

    /// Number of slots currently holding a message.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.read().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}
