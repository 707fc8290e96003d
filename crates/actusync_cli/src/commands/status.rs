//! Status command implementation.

use super::sync::{EVENTS_FILE, OFFSET_FILE};
use actusync_storage::{FileEventStore, FileOffsetStore, OffsetStore};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;

/// Stored sync state.
#[derive(Debug, Serialize)]
pub struct StatusResult {
    /// Data directory.
    pub path: String,
    /// Stored cursor.
    pub offset: u64,
    /// Number of stored events.
    pub stored_events: usize,
    /// Total puffs across stored events.
    pub total_puffs: u64,
    /// Timestamp of the oldest stored event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_event: Option<DateTime<Utc>>,
    /// Timestamp of the newest stored event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub newest_event: Option<DateTime<Utc>>,
}

/// Runs the status command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = collect(path)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn collect(path: &Path) -> Result<StatusResult, Box<dyn std::error::Error>> {
    let events_path = path.join(EVENTS_FILE);
    let offset_path = path.join(OFFSET_FILE);

    if !events_path.exists() && !offset_path.exists() {
        return Err(format!("No sync data found at {:?}", path).into());
    }

    let offset = FileOffsetStore::new(&offset_path).read()?;
    let events = if events_path.exists() {
        FileEventStore::open(&events_path)?.load_all()?
    } else {
        Vec::new()
    };

    Ok(StatusResult {
        path: path.display().to_string(),
        offset,
        stored_events: events.len(),
        total_puffs: events.iter().map(|e| u64::from(e.puffs.get())).sum(),
        oldest_event: events.iter().map(|e| e.timestamp).min(),
        newest_event: events.iter().map(|e| e.timestamp).max(),
    })
}

fn print_text_output(result: &StatusResult) {
    println!("ActuSync Status");
    println!("===============");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Cursor: {}", result.offset);
    println!();
    println!("Events:");
    println!("  Stored:      {}", result.stored_events);
    println!("  Total puffs: {}", result.total_puffs);
    if let (Some(oldest), Some(newest)) = (result.oldest_event, result.newest_event) {
        println!("  Oldest:      {}", oldest.to_rfc3339());
        println!("  Newest:      {}", newest.to_rfc3339());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actusync_protocol::ActuationEvent;
    use actusync_storage::EventStore;
    use chrono::TimeZone;

    #[test]
    fn status_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(collect(&dir.path().join("nothing")).is_err());
    }

    #[test]
    fn status_summarizes_stores() {
        let dir = tempfile::tempdir().unwrap();
        let ts = |m| Utc.with_ymd_and_hms(2024, 5, 1, 12, m, 0).unwrap();

        let store = FileEventStore::open(&dir.path().join(EVENTS_FILE)).unwrap();
        store
            .insert(&[
                ActuationEvent::single("b", ts(30), "dev"),
                ActuationEvent::single("a", ts(10), "dev"),
            ])
            .unwrap();
        FileOffsetStore::new(&dir.path().join(OFFSET_FILE))
            .write(2)
            .unwrap();

        let result = collect(dir.path()).unwrap();
        assert_eq!(result.offset, 2);
        assert_eq!(result.stored_events, 2);
        assert_eq!(result.total_puffs, 2);
        assert_eq!(result.oldest_event, Some(ts(10)));
        assert_eq!(result.newest_event, Some(ts(30)));
    }
}
