//! In-memory stores for testing.

use crate::error::{StorageError, StorageResult};
use crate::store::{EventStore, OffsetStore};
use actusync_protocol::ActuationEvent;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Debug, Default)]
struct EventTable {
    by_id: HashMap<String, ActuationEvent>,
    order: Vec<String>,
}

/// An in-memory event store.
///
/// Suitable for unit tests, integration tests and ephemeral syncs that do
/// not need persistence. Supports one-shot failure injection.
///
/// # Example
///
/// ```rust
/// use actusync_protocol::ActuationEvent;
/// use actusync_storage::{EventStore, MemoryEventStore};
///
/// let store = MemoryEventStore::new();
/// let event = ActuationEvent::single("e1", Default::default(), "dev");
/// assert_eq!(store.insert(&[event.clone()]).unwrap(), 1);
/// assert_eq!(store.insert(&[event]).unwrap(), 0);
/// assert_eq!(store.len().unwrap(), 1);
/// ```
#[derive(Debug, Default)]
pub struct MemoryEventStore {
    table: RwLock<EventTable>,
    fail_on_insert: AtomicUsize,
    insert_calls: AtomicUsize,
}

impl MemoryEventStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `insert` call fail without storing anything.
    pub fn fail_next_insert(&self) {
        self.fail_on_insert(self.insert_calls() + 1);
    }

    /// Makes the `insert` call with the given number (1-based) fail, once.
    pub fn fail_on_insert(&self, number: usize) {
        self.fail_on_insert.store(number, Ordering::SeqCst);
    }

    /// Returns all stored events in first-insertion order.
    #[must_use]
    pub fn events(&self) -> Vec<ActuationEvent> {
        let table = self.table.read();
        table
            .order
            .iter()
            .filter_map(|id| table.by_id.get(id).cloned())
            .collect()
    }

    /// Returns the number of `insert` calls, including failed ones.
    #[must_use]
    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }
}

impl EventStore for MemoryEventStore {
    fn insert(&self, events: &[ActuationEvent]) -> StorageResult<usize> {
        let number = self.insert_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self
            .fail_on_insert
            .compare_exchange(number, 0, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            return Err(StorageError::Rejected("simulated insert failure".into()));
        }

        let mut table = self.table.write();
        let mut inserted = 0;
        for event in events {
            if table.by_id.contains_key(&event.id) {
                continue;
            }
            table.order.push(event.id.clone());
            table.by_id.insert(event.id.clone(), event.clone());
            inserted += 1;
        }
        Ok(inserted)
    }

    fn contains(&self, id: &str) -> StorageResult<bool> {
        Ok(self.table.read().by_id.contains_key(id))
    }

    fn len(&self) -> StorageResult<usize> {
        Ok(self.table.read().by_id.len())
    }
}

/// An in-memory offset store.
#[derive(Debug, Default)]
pub struct MemoryOffsetStore {
    offset: RwLock<u64>,
    fail_next_write: AtomicBool,
}

impl MemoryOffsetStore {
    /// Creates a store holding `0`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding a pre-existing cursor.
    ///
    /// Useful for testing resumption.
    #[must_use]
    pub fn with_offset(offset: u64) -> Self {
        Self {
            offset: RwLock::new(offset),
            fail_next_write: AtomicBool::new(false),
        }
    }

    /// Makes the next `write` call fail and keep the old value.
    pub fn fail_next_write(&self) {
        self.fail_next_write.store(true, Ordering::SeqCst);
    }
}

impl OffsetStore for MemoryOffsetStore {
    fn read(&self) -> StorageResult<u64> {
        Ok(*self.offset.read())
    }

    fn write(&self, offset: u64) -> StorageResult<()> {
        if self.fail_next_write.swap(false, Ordering::SeqCst) {
            return Err(StorageError::Rejected("simulated offset write failure".into()));
        }
        *self.offset.write() = offset;
        Ok(())
    }
}
