//! # ActuSync Protocol
//!
//! Device-facing data model for ActuSync.
//!
//! This crate provides:
//! - [`ActuationEvent`], the record a device stores for every actuation
//! - [`BondState`] and [`ConnectionState`], the link states a sensor reports
//! - [`DeviceError`], the failure outcome of a device operation
//!
//! This is a pure data crate with no I/O operations. Decoding of raw GATT
//! payloads belongs to the transport layer and is not done here.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod event;
mod link;

pub use error::{DeviceError, DeviceResult};
pub use event::ActuationEvent;
pub use link::{BondState, ConnectionState};
