//! Sync command implementation.

use super::{drive, finish, DeviceArgs};
use actusync_storage::{FileEventStore, FileOffsetStore};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Event log file name inside the data directory.
pub const EVENTS_FILE: &str = "events.jsonl";

/// Cursor file name inside the data directory.
pub const OFFSET_FILE: &str = "offset";

/// Runs the sync command.
///
/// The simulated device is recreated on every invocation with the same
/// event ids, so a second run resumes at the stored cursor and stores
/// nothing twice.
pub async fn run(path: &Path, args: &DeviceArgs) -> Result<(), Box<dyn std::error::Error>> {
    let events = Arc::new(FileEventStore::open_with_create_dirs(&path.join(EVENTS_FILE))?);
    let offsets = Arc::new(FileOffsetStore::new(&path.join(OFFSET_FILE)));
    info!(path = %path.display(), "syncing into file stores");

    let report = drive(args, events, offsets).await?;
    finish(&report, &args.format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use actusync_storage::OffsetStore;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: DeviceArgs,
    }

    #[tokio::test(start_paused = true)]
    async fn sync_resumes_from_stored_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");

        // The third page stalls and there is no retry budget to recover.
        let first = Harness::parse_from([
            "actusync", "--events", "25", "--stall-read", "3", "--max-attempts", "1",
        ])
        .args;
        assert!(run(&path, &first).await.is_err());
        let offset = FileOffsetStore::new(&path.join(OFFSET_FILE));
        assert_eq!(offset.read().unwrap(), 20);

        let second = Harness::parse_from(["actusync", "--events", "25"]).args;
        run(&path, &second).await.unwrap();
        assert_eq!(offset.read().unwrap(), 25);

        let events = FileEventStore::open(&path.join(EVENTS_FILE)).unwrap();
        assert_eq!(events.load_all().unwrap().len(), 25);
    }
}
