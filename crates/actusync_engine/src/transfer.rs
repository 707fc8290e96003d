//! Event transfer client.

use crate::config::DeviceTimeouts;
use crate::device::GattConnection;
use crate::error::{FailureCause, SyncError, SyncResult};
use actusync_protocol::ActuationEvent;
use actusync_storage::{EventStore, OffsetStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// Moves events from a connected device into local storage.
///
/// The client is bound to one ready connection for the duration of an
/// attempt. Device calls are individually time-bounded; storage calls are not.
///
/// # Invariants
///
/// - The cursor only moves forward
/// - The cursor is written only after the device accepted the acknowledgment
pub struct EventTransfer<'a, C: GattConnection, E: EventStore + ?Sized, O: OffsetStore + ?Sized> {
    connection: Arc<C>,
    events: &'a E,
    offsets: &'a O,
    timeouts: &'a DeviceTimeouts,
}

impl<'a, C, E, O> EventTransfer<'a, C, E, O>
where
    C: GattConnection,
    E: EventStore + ?Sized,
    O: OffsetStore + ?Sized,
{
    /// Creates a client over a ready connection.
    pub fn new(
        connection: Arc<C>,
        events: &'a E,
        offsets: &'a O,
        timeouts: &'a DeviceTimeouts,
    ) -> Self {
        Self {
            connection,
            events,
            offsets,
            timeouts,
        }
    }

    /// Queries the absolute number of events on the device.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Read`] on device failure or timeout.
    pub async fn total_event_count(&self) -> SyncResult<u64> {
        bounded(self.timeouts.read, self.connection.read_event_count())
            .await
            .map_err(SyncError::Read)
    }

    /// Reads the durable cursor.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Persistence`] if the offset store fails.
    pub fn cursor(&self) -> SyncResult<u64> {
        self.offsets
            .read()
            .map_err(|e| SyncError::Persistence(e.into()))
    }

    /// Reads up to `limit` events starting at `cursor`.
    ///
    /// An empty page means there is nothing more to read.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Read`] on device failure, timeout, or a page
    /// longer than requested.
    pub async fn read_page(&self, cursor: u64, limit: u32) -> SyncResult<Vec<ActuationEvent>> {
        let page = bounded(self.timeouts.read, self.connection.read_events(cursor, limit))
            .await
            .map_err(SyncError::Read)?;

        if page.len() > limit as usize {
            return Err(SyncError::Read(FailureCause::Protocol(format!(
                "requested {limit} events at offset {cursor}, device sent {}",
                page.len()
            ))));
        }

        debug!(cursor, limit, received = page.len(), "read page");
        Ok(page)
    }

    /// Stores a page of events.
    ///
    /// Returns the number of events that were not already stored.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Persistence`] if the event store fails.
    pub fn persist(&self, events: &[ActuationEvent]) -> SyncResult<usize> {
        let inserted = self
            .events
            .insert(events)
            .map_err(|e| SyncError::Persistence(e.into()))?;
        debug!(
            count = events.len(),
            inserted,
            duplicates = events.len().saturating_sub(inserted),
            "persisted page"
        );
        Ok(inserted)
    }

    /// Acknowledges every event below `new_cursor` and records the new cursor.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Acknowledge`] if `new_cursor` is behind the
    /// stored cursor, if the device rejects or times out, or if the new
    /// cursor cannot be written. A failure to read the stored cursor is
    /// [`SyncError::Persistence`].
    pub async fn acknowledge(&self, new_cursor: u64) -> SyncResult<()> {
        let current = self.cursor()?;
        if new_cursor < current {
            return Err(SyncError::Acknowledge(FailureCause::Protocol(format!(
                "cursor would move back from {current} to {new_cursor}"
            ))));
        }

        bounded(
            self.timeouts.acknowledge,
            self.connection.acknowledge_events(new_cursor),
        )
        .await
        .map_err(SyncError::Acknowledge)?;

        self.offsets
            .write(new_cursor)
            .map_err(|e| SyncError::Acknowledge(e.into()))?;

        debug!(from = current, to = new_cursor, "acknowledged");
        Ok(())
    }
}

async fn bounded<T, F>(limit: Duration, call: F) -> Result<T, FailureCause>
where
    F: std::future::Future<Output = actusync_protocol::DeviceResult<T>>,
{
    match timeout(limit, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(FailureCause::Device(err)),
        Err(_) => Err(FailureCause::TimedOut(limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Sensor, SimulatedConnection, SimulatedSensor};
    use actusync_storage::{MemoryEventStore, MemoryOffsetStore};
    use chrono::{TimeZone, Utc};

    fn events(n: usize) -> Vec<ActuationEvent> {
        let ts = Utc.with_ymd_and_hms(2024, 6, 1, 7, 0, 0).unwrap();
        (0..n)
            .map(|i| ActuationEvent::single(format!("evt-{i}"), ts, "sim"))
            .collect()
    }

    struct Fixture {
        sensor: SimulatedSensor,
        events: MemoryEventStore,
        offsets: MemoryOffsetStore,
        timeouts: DeviceTimeouts,
    }

    impl Fixture {
        fn new(n: usize) -> Self {
            let device = Arc::new(SimulatedConnection::new());
            device.set_events(events(n));
            Self {
                sensor: SimulatedSensor::bonded(device),
                events: MemoryEventStore::new(),
                offsets: MemoryOffsetStore::new(),
                timeouts: DeviceTimeouts::default(),
            }
        }

        async fn client(
            &self,
        ) -> EventTransfer<'_, SimulatedConnection, MemoryEventStore, MemoryOffsetStore> {
            let connection = self.sensor.connect().await.unwrap();
            EventTransfer::new(connection, &self.events, &self.offsets, &self.timeouts)
        }
    }

    #[tokio::test]
    async fn count_and_pages() {
        let fixture = Fixture::new(25);
        let client = fixture.client().await;

        assert_eq!(client.total_event_count().await.unwrap(), 25);
        assert_eq!(client.read_page(0, 10).await.unwrap().len(), 10);
        assert_eq!(client.read_page(20, 10).await.unwrap().len(), 5);
        assert!(client.read_page(25, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn acknowledge_advances_cursor() {
        let fixture = Fixture::new(20);
        let client = fixture.client().await;

        let page = client.read_page(0, 10).await.unwrap();
        assert_eq!(client.persist(&page).unwrap(), 10);
        client.acknowledge(10).await.unwrap();

        assert_eq!(client.cursor().unwrap(), 10);
        assert_eq!(fixture.sensor.device().acknowledged(), 10);
    }

    #[tokio::test]
    async fn persist_reports_duplicates() {
        let fixture = Fixture::new(10);
        let client = fixture.client().await;

        let page = client.read_page(0, 10).await.unwrap();
        assert_eq!(client.persist(&page).unwrap(), 10);
        assert_eq!(client.persist(&page).unwrap(), 0);
        assert_eq!(fixture.events.len().unwrap(), 10);
    }

    #[tokio::test]
    async fn persist_failure_is_persistence_error() {
        let fixture = Fixture::new(10);
        let client = fixture.client().await;
        fixture.events.fail_next_insert();

        let page = client.read_page(0, 10).await.unwrap();
        let err = client.persist(&page).unwrap_err();
        assert!(matches!(err, SyncError::Persistence(FailureCause::Storage(_))));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn rejected_ack_keeps_cursor() {
        let fixture = Fixture::new(10);
        let client = fixture.client().await;
        fixture.sensor.device().fail_next_ack();

        let err = client.acknowledge(10).await.unwrap_err();
        assert!(matches!(err, SyncError::Acknowledge(FailureCause::Device(_))));
        assert_eq!(client.cursor().unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_cursor_write_is_acknowledge_error() {
        let fixture = Fixture::new(10);
        let client = fixture.client().await;
        fixture.offsets.fail_next_write();

        let err = client.acknowledge(10).await.unwrap_err();
        assert!(matches!(err, SyncError::Acknowledge(FailureCause::Storage(_))));
        assert_eq!(client.cursor().unwrap(), 0);
        assert_eq!(fixture.sensor.device().acknowledged(), 10);
    }

    #[tokio::test]
    async fn backward_ack_is_rejected_before_device() {
        let fixture = Fixture::new(20);
        fixture.offsets.write(15).unwrap();
        let client = fixture.client().await;

        let err = client.acknowledge(10).await.unwrap_err();
        assert!(matches!(err, SyncError::Acknowledge(FailureCause::Protocol(_))));
        assert_eq!(fixture.sensor.device().ack_calls(), 0);
        assert_eq!(client.cursor().unwrap(), 15);
    }

    #[tokio::test]
    async fn count_failure_is_read_error() {
        let fixture = Fixture::new(10);
        let client = fixture.client().await;
        fixture.sensor.device().fail_next_count();

        let err = client.total_event_count().await.unwrap_err();
        assert!(matches!(err, SyncError::Read(FailureCause::Device(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_read_is_read_timeout() {
        let fixture = Fixture::new(20);
        let client = fixture.client().await;
        fixture.sensor.device().stall_from_read(1);

        let err = client.read_page(0, 10).await.unwrap_err();
        assert!(matches!(err, SyncError::Read(FailureCause::TimedOut(_))));
        assert!(err.is_timeout());
    }

    struct OversizedConnection;

    #[async_trait::async_trait]
    impl GattConnection for OversizedConnection {
        async fn read_event_count(&self) -> actusync_protocol::DeviceResult<u64> {
            Ok(30)
        }

        async fn read_events(
            &self,
            _offset: u64,
            count: u32,
        ) -> actusync_protocol::DeviceResult<Vec<ActuationEvent>> {
            Ok(events(count as usize + 1))
        }

        async fn acknowledge_events(&self, _up_to: u64) -> actusync_protocol::DeviceResult<()> {
            Ok(())
        }
    }

    /// Claims more new events than it was handed.
    struct OvercountingStore;

    impl EventStore for OvercountingStore {
        fn insert(&self, events: &[ActuationEvent]) -> actusync_storage::StorageResult<usize> {
            Ok(events.len() + 5)
        }

        fn contains(&self, _id: &str) -> actusync_storage::StorageResult<bool> {
            Ok(false)
        }

        fn len(&self) -> actusync_storage::StorageResult<usize> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn persist_tolerates_overcounting_store() {
        let offsets = MemoryOffsetStore::new();
        let timeouts = DeviceTimeouts::default();
        let client = EventTransfer::new(
            Arc::new(OversizedConnection),
            &OvercountingStore,
            &offsets,
            &timeouts,
        );

        assert_eq!(client.persist(&events(3)).unwrap(), 8);
    }

    #[tokio::test]
    async fn oversized_page_is_read_error() {
        let events = MemoryEventStore::new();
        let offsets = MemoryOffsetStore::new();
        let timeouts = DeviceTimeouts::default();
        let client = EventTransfer::new(Arc::new(OversizedConnection), &events, &offsets, &timeouts);

        let err = client.read_page(0, 10).await.unwrap_err();
        assert!(matches!(err, SyncError::Read(FailureCause::Protocol(_))));
    }
}
