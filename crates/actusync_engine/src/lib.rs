//! # ActuSync Engine
//!
//! Moves actuation events from a BLE device into local storage.
//!
//! This crate provides:
//! - Sensor and GATT connection abstractions, with simulators for testing
//! - A device session gateway that bonds and connects idempotently
//! - An event transfer client that reads, persists and acknowledges pages
//! - A single-flight sync manager with retry and observable state
//!
//! ## Architecture
//!
//! A sync is a **read → persist → acknowledge** loop over pages:
//! 1. Read a page of events at the local cursor
//! 2. Insert the page into the event store (idempotent by event id)
//! 3. Acknowledge the page on the device, then advance the durable cursor
//!
//! A crash or failure between steps at worst re-reads one page; the event
//! store drops the duplicates.
//!
//! ## Key Invariants
//!
//! - At most one sync runs at a time
//! - The cursor never moves backwards
//! - An acknowledged page has always been persisted first
//! - Storage failures are never retried automatically
//! - The session is released after every attempt

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod device;
mod error;
mod manager;
mod session;
mod state;
mod transfer;

pub use config::{ConfigError, DeviceTimeouts, RetryConfig, SyncConfig, DEFAULT_PAGE_SIZE};
pub use device::{GattConnection, Sensor, SimulatedConnection, SimulatedSensor};
pub use error::{FailureCause, SyncError, SyncResult};
pub use manager::SyncManager;
pub use session::{DeviceSession, LinkState};
pub use state::{AttemptOutcome, SyncState, SyncStats};
pub use transfer::EventTransfer;
