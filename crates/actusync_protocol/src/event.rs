//! Actuation events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;

/// A single actuation recorded by a device.
///
/// Events are immutable. The `id` is assigned by the device, is unique per
/// device and is the idempotency key used by storage: an event whose id is
/// already stored is ignored, never overwritten.
///
/// # Fields
///
/// - `id`: Stable identifier assigned by the device
/// - `timestamp`: When the actuation happened
/// - `device_id`: Identifier of the recording device
/// - `puffs`: Number of puffs in this actuation (always positive)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActuationEvent {
    /// Device-assigned event identifier.
    pub id: String,
    /// Point in time of the actuation.
    pub timestamp: DateTime<Utc>,
    /// Source device identifier.
    pub device_id: String,
    /// Puff count.
    pub puffs: NonZeroU32,
}

impl ActuationEvent {
    /// Creates a new event.
    pub fn new(
        id: impl Into<String>,
        timestamp: DateTime<Utc>,
        device_id: impl Into<String>,
        puffs: NonZeroU32,
    ) -> Self {
        Self {
            id: id.into(),
            timestamp,
            device_id: device_id.into(),
            puffs,
        }
    }

    /// Creates a single-puff event.
    pub fn single(
        id: impl Into<String>,
        timestamp: DateTime<Utc>,
        device_id: impl Into<String>,
    ) -> Self {
        Self::new(id, timestamp, device_id, NonZeroU32::MIN)
    }
}
