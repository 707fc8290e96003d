//! Sync state model.

use crate::error::SyncError;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The current state of the sync engine.
///
/// A run moves `Idle → Connecting → ReadingCount → ReadingEvents → Completed`;
/// any step may end in `Failed` instead. `Completed` and `Failed` are
/// terminal for one run. The next accepted start moves the state on again.
#[derive(Debug, Clone)]
pub enum SyncState {
    /// No sync has run yet.
    Idle,
    /// Bonding with and connecting to the device.
    Connecting,
    /// Querying the device's event count.
    ReadingCount,
    /// Transferring pages of events.
    ReadingEvents,
    /// The last run transferred everything the device had.
    Completed,
    /// The last run gave up.
    Failed {
        /// The error that ended the run.
        error: Arc<SyncError>,
        /// Whether starting another run is expected to help.
        retryable: bool,
    },
}

impl SyncState {
    /// Creates a failed state, classifying the error.
    pub fn failed(error: SyncError) -> Self {
        let retryable = error.is_retryable();
        SyncState::Failed {
            error: Arc::new(error),
            retryable,
        }
    }

    /// Returns true if a run is transferring or connecting.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncState::Connecting | SyncState::ReadingCount | SyncState::ReadingEvents
        )
    }

    /// Returns true if the state ends a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncState::Completed | SyncState::Failed { .. })
    }

    /// Returns the error of a failed run.
    pub fn error(&self) -> Option<&SyncError> {
        match self {
            SyncState::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Short lowercase name of the state.
    pub fn name(&self) -> &'static str {
        match self {
            SyncState::Idle => "idle",
            SyncState::Connecting => "connecting",
            SyncState::ReadingCount => "reading_count",
            SyncState::ReadingEvents => "reading_events",
            SyncState::Completed => "completed",
            SyncState::Failed { .. } => "failed",
        }
    }
}

impl PartialEq for SyncState {
    /// Failed states compare by retryability and error message.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                SyncState::Failed {
                    error: a,
                    retryable: ra,
                },
                SyncState::Failed {
                    error: b,
                    retryable: rb,
                },
            ) => ra == rb && a.to_string() == b.to_string(),
            _ => std::mem::discriminant(self) == std::mem::discriminant(other),
        }
    }
}

/// Statistics about sync runs.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Number of runs started.
    pub runs: u64,
    /// Number of runs that completed.
    pub runs_completed: u64,
    /// Number of attempts across all runs.
    pub attempts: u64,
    /// Number of attempts that were retries.
    pub retries: u64,
    /// Number of pages persisted and acknowledged.
    pub pages: u64,
    /// Number of events newly written to storage.
    pub events_persisted: u64,
    /// Last time a run completed.
    pub last_sync_time: Option<Instant>,
    /// Duration of the last finished run.
    pub last_run_duration: Option<Duration>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Result of a single successful attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttemptOutcome {
    /// Event count reported by the device.
    pub device_count: u64,
    /// Pages persisted and acknowledged.
    pub pages: u64,
    /// Events read from the device.
    pub events_read: u64,
    /// Events that were not already stored.
    pub events_persisted: u64,
    /// Cursor after the attempt.
    pub final_offset: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureCause;
    use actusync_protocol::DeviceError;

    #[test]
    fn sync_state_checks() {
        assert!(SyncState::Connecting.is_active());
        assert!(SyncState::ReadingEvents.is_active());
        assert!(!SyncState::Idle.is_active());
        assert!(!SyncState::Completed.is_active());

        assert!(SyncState::Completed.is_terminal());
        assert!(SyncState::failed(SyncError::Cancelled).is_terminal());
        assert!(!SyncState::ReadingCount.is_terminal());
    }

    #[test]
    fn failed_state_classifies_error() {
        let state = SyncState::failed(SyncError::Read(FailureCause::Device(
            DeviceError::link_lost("out of range"),
        )));
        assert!(matches!(state, SyncState::Failed { retryable: true, .. }));
        assert!(state.error().is_some());
        assert_eq!(state.name(), "failed");

        let state = SyncState::failed(SyncError::Persistence(FailureCause::Protocol(
            "bad".into(),
        )));
        assert!(matches!(state, SyncState::Failed { retryable: false, .. }));
    }

    #[test]
    fn state_equality() {
        assert_eq!(SyncState::Idle, SyncState::Idle);
        assert_ne!(SyncState::Idle, SyncState::Completed);
        assert_eq!(
            SyncState::failed(SyncError::Cancelled),
            SyncState::failed(SyncError::Cancelled)
        );
    }
}
