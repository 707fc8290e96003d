//! Storage trait definitions.

use crate::error::StorageResult;
use actusync_protocol::ActuationEvent;

/// Local store for actuation events.
///
/// # Invariants
///
/// - `insert` is idempotent by event id: duplicates are ignored, not overwritten
/// - Events from a successful `insert` survive process termination
///   (for persistent implementations)
/// - Implementations must be `Send + Sync`
///
/// # Implementors
///
/// - [`super::MemoryEventStore`] - For testing
/// - [`super::FileEventStore`] - For persistent storage
pub trait EventStore: Send + Sync {
    /// Inserts a batch of events.
    ///
    /// Returns the number of events that were not already stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch cannot be written. A failed batch may
    /// have been partially written; re-inserting it is always safe.
    fn insert(&self, events: &[ActuationEvent]) -> StorageResult<usize>;

    /// Returns true if an event with this id is stored.
    fn contains(&self, id: &str) -> StorageResult<bool>;

    /// Returns the number of stored events.
    fn len(&self) -> StorageResult<usize>;

    /// Returns true if no events are stored.
    fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }
}

/// Durable holder of the sync cursor.
///
/// The cursor is the number of events acknowledged to the device. A store
/// that has never been written reads as `0`.
pub trait OffsetStore: Send + Sync {
    /// Reads the current cursor.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored value cannot be read or is corrupted.
    fn read(&self) -> StorageResult<u64>;

    /// Durably replaces the cursor.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be made durable. On error the
    /// previously stored value is still readable.
    fn write(&self, offset: u64) -> StorageResult<()>;
}
