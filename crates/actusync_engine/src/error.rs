//! Error types for the sync engine.

use actusync_protocol::DeviceError;
use actusync_storage::StorageError;
use std::time::Duration;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can end a sync attempt.
///
/// The variant names the step that failed, not the underlying cause: a
/// connect that times out and a connect the device refuses are both
/// [`SyncError::Connection`]. Callers decide on retrying from the variant
/// alone via [`SyncError::is_retryable`].
#[derive(Error, Debug)]
pub enum SyncError {
    /// Bonding could not be established.
    #[error("bonding failed: {0}")]
    Bonding(#[source] FailureCause),

    /// The connection could not be established.
    #[error("connection failed: {0}")]
    Connection(#[source] FailureCause),

    /// Reading the event count or a page of events failed.
    #[error("read failed: {0}")]
    Read(#[source] FailureCause),

    /// The device did not accept the acknowledgment, or the acknowledged
    /// cursor could not be recorded.
    #[error("acknowledge failed: {0}")]
    Acknowledge(#[source] FailureCause),

    /// Local storage failed.
    #[error("persistence failed: {0}")]
    Persistence(#[source] FailureCause),

    /// The run was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// The run died without reaching a result, for example because a
    /// collaborator panicked.
    #[error("sync run aborted")]
    Aborted,
}

impl SyncError {
    /// Returns true if re-running the whole attempt may succeed.
    ///
    /// Link, read and acknowledge failures are transient. Storage failures
    /// are not fixed by talking to the device again.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Bonding(_)
            | SyncError::Connection(_)
            | SyncError::Read(_)
            | SyncError::Acknowledge(_) => true,
            SyncError::Persistence(_) => false,
            SyncError::Cancelled | SyncError::Aborted => false,
        }
    }

    /// Returns the underlying cause, if any.
    pub fn cause(&self) -> Option<&FailureCause> {
        match self {
            SyncError::Bonding(cause)
            | SyncError::Connection(cause)
            | SyncError::Read(cause)
            | SyncError::Acknowledge(cause)
            | SyncError::Persistence(cause) => Some(cause),
            SyncError::Cancelled | SyncError::Aborted => None,
        }
    }

    /// Returns true if the failed step ran out of time.
    pub fn is_timeout(&self) -> bool {
        matches!(self.cause(), Some(FailureCause::TimedOut(_)))
    }
}

/// What went wrong underneath a [`SyncError`].
#[derive(Error, Debug)]
pub enum FailureCause {
    /// The device reported a failure.
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// The device did not answer within the step's time bound.
    #[error("no response within {0:?}")]
    TimedOut(Duration),

    /// Local storage reported a failure.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The device answered with something that breaks the transfer contract.
    #[error("protocol violation: {0}")]
    Protocol(String),
}
