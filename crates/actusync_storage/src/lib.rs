//! # ActuSync Storage
//!
//! Event and offset storage for ActuSync.
//!
//! The sync engine needs exactly two things from local storage:
//!
//! - an [`EventStore`] that bulk-inserts actuation events, idempotent by event id
//! - an [`OffsetStore`] that durably holds a single cursor value
//!
//! ## Design Principles
//!
//! - Inserting an event whose id is already stored is a silent no-op
//! - Stored events are never overwritten
//! - An offset write is durable once it returns
//! - Stores must be `Send + Sync` so a background sync can share them
//!
//! ## Available Stores
//!
//! - [`MemoryEventStore`] / [`MemoryOffsetStore`] - For testing and ephemeral use
//! - [`FileEventStore`] / [`FileOffsetStore`] - For persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use actusync_storage::{MemoryOffsetStore, OffsetStore};
//!
//! let store = MemoryOffsetStore::new();
//! assert_eq!(store.read().unwrap(), 0);
//! store.write(10).unwrap();
//! assert_eq!(store.read().unwrap(), 10);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod memory;
mod store;

pub use error::{StorageError, StorageResult};
pub use file::{FileEventStore, FileOffsetStore};
pub use memory::{MemoryEventStore, MemoryOffsetStore};
pub use store::{EventStore, OffsetStore};
