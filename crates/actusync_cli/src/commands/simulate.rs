//! Simulate command implementation.

use super::{drive, finish, DeviceArgs};
use actusync_storage::{MemoryEventStore, MemoryOffsetStore};
use std::sync::Arc;

/// Runs the simulate command.
pub async fn run(args: &DeviceArgs) -> Result<(), Box<dyn std::error::Error>> {
    let report = drive(
        args,
        Arc::new(MemoryEventStore::new()),
        Arc::new(MemoryOffsetStore::new()),
    )
    .await?;
    finish(&report, &args.format)
}
