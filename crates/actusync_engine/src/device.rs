//! Device abstraction for sync operations.

use actusync_protocol::{ActuationEvent, BondState, ConnectionState, DeviceError, DeviceResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// A sensor owns the BLE link to one device.
///
/// This trait abstracts bonding and connection management, allowing for
/// different implementations (platform BLE stacks, simulators for testing).
/// Every operation reports failure as a value; none of them panic.
#[async_trait]
pub trait Sensor: Send + Sync + 'static {
    /// The connection type handed out by [`Sensor::connect`].
    type Connection: GattConnection;

    /// Observable bonding state.
    fn bond_state(&self) -> watch::Receiver<BondState>;

    /// Observable connection state.
    fn connection_state(&self) -> watch::Receiver<ConnectionState>;

    /// Bonds with the device.
    ///
    /// Safe to call when already bonded. Succeeds only once the device is bonded.
    async fn bond(&self) -> DeviceResult<()>;

    /// Establishes a connection or returns the active one.
    ///
    /// Safe to call when already connected.
    async fn connect(&self) -> DeviceResult<Arc<Self::Connection>>;

    /// Disconnects and releases link resources.
    ///
    /// Safe to call when not connected. Best effort; errors are not surfaced.
    async fn disconnect(&self);
}

/// Event transfer operations on an established connection.
#[async_trait]
pub trait GattConnection: Send + Sync + 'static {
    /// Reads the absolute number of events stored on the device.
    async fn read_event_count(&self) -> DeviceResult<u64>;

    /// Reads up to `count` events starting at `offset`.
    ///
    /// An empty result means there is nothing to read at that offset.
    async fn read_events(&self, offset: u64, count: u32) -> DeviceResult<Vec<ActuationEvent>>;

    /// Tells the device that every event below `up_to_offset` is consumed.
    async fn acknowledge_events(&self, up_to_offset: u64) -> DeviceResult<()>;
}

#[derive(Debug, Default)]
struct DeviceLog {
    events: Vec<ActuationEvent>,
    acknowledged: u64,
}

#[derive(Debug, Default)]
struct ReadFaults {
    fail_on_read: Option<u64>,
    fail_every_read: bool,
    stall_from_read: Option<u64>,
    fail_next_count: bool,
    fail_next_ack: bool,
}

/// A simulated device-side event log for testing.
///
/// The simulated device reports an absolute event count, clamps
/// acknowledgments to the events it holds and returns an empty page for
/// offsets it has already acknowledged or does not hold. Reads are numbered
/// from 1 for fault injection.
#[derive(Debug, Default)]
pub struct SimulatedConnection {
    log: Mutex<DeviceLog>,
    faults: Mutex<ReadFaults>,
    linked: AtomicBool,
    read_calls: AtomicU64,
    ack_calls: AtomicU64,
}

impl SimulatedConnection {
    /// Creates a simulated device holding no events.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the stored events and resets the acknowledged offset.
    pub fn set_events(&self, events: Vec<ActuationEvent>) {
        let mut log = self.log.lock();
        log.events = events;
        log.acknowledged = 0;
    }

    /// Records new events on the device.
    pub fn push_events(&self, events: impl IntoIterator<Item = ActuationEvent>) {
        self.log.lock().events.extend(events);
    }

    /// Drops every event from `len` on, as a device reset would.
    pub fn truncate(&self, len: usize) {
        let mut log = self.log.lock();
        log.events.truncate(len);
        log.acknowledged = log.acknowledged.min(len as u64);
    }

    /// Returns the offset the device considers acknowledged.
    pub fn acknowledged(&self) -> u64 {
        self.log.lock().acknowledged
    }

    /// Returns the number of events stored on the device.
    pub fn event_count(&self) -> usize {
        self.log.lock().events.len()
    }

    /// Fails the read with the given number (1-based), once.
    pub fn fail_on_read(&self, number: u64) {
        self.faults.lock().fail_on_read = Some(number);
    }

    /// Fails the next page read.
    pub fn fail_next_read(&self) {
        let next = self.read_calls() + 1;
        self.fail_on_read(next);
    }

    /// Fails every page read.
    pub fn fail_every_read(&self) {
        self.faults.lock().fail_every_read = true;
    }

    /// Makes every page read from the given number (1-based) on hang forever.
    pub fn stall_from_read(&self, number: u64) {
        self.faults.lock().stall_from_read = Some(number);
    }

    /// Fails the next event count query.
    pub fn fail_next_count(&self) {
        self.faults.lock().fail_next_count = true;
    }

    /// Fails the next acknowledgment.
    pub fn fail_next_ack(&self) {
        self.faults.lock().fail_next_ack = true;
    }

    /// Removes every injected fault.
    pub fn clear_faults(&self) {
        *self.faults.lock() = ReadFaults::default();
    }

    /// Returns the number of page reads so far.
    pub fn read_calls(&self) -> u64 {
        self.read_calls.load(Ordering::SeqCst)
    }

    /// Returns the number of acknowledgments so far.
    pub fn ack_calls(&self) -> u64 {
        self.ack_calls.load(Ordering::SeqCst)
    }

    fn set_linked(&self, linked: bool) {
        self.linked.store(linked, Ordering::SeqCst);
    }

    fn require_link(&self) -> DeviceResult<()> {
        if self.linked.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DeviceError::NotConnected)
        }
    }
}

#[async_trait]
impl GattConnection for SimulatedConnection {
    async fn read_event_count(&self) -> DeviceResult<u64> {
        self.require_link()?;
        let fail = std::mem::take(&mut self.faults.lock().fail_next_count);
        if fail {
            return Err(DeviceError::rejected("simulated count failure"));
        }
        Ok(self.log.lock().events.len() as u64)
    }

    async fn read_events(&self, offset: u64, count: u32) -> DeviceResult<Vec<ActuationEvent>> {
        self.require_link()?;
        let number = self.read_calls.fetch_add(1, Ordering::SeqCst) + 1;

        let stall = {
            let mut faults = self.faults.lock();
            if faults.fail_every_read || faults.fail_on_read == Some(number) {
                if faults.fail_on_read == Some(number) {
                    faults.fail_on_read = None;
                }
                return Err(DeviceError::rejected(format!(
                    "simulated read failure on read #{number}"
                )));
            }
            faults.stall_from_read.is_some_and(|from| number >= from)
        };
        if stall {
            std::future::pending::<()>().await;
        }

        let log = self.log.lock();
        let len = log.events.len() as u64;
        if offset < log.acknowledged || offset >= len {
            return Ok(Vec::new());
        }

        let end = offset.saturating_add(u64::from(count)).min(len);
        Ok(log.events[offset as usize..end as usize].to_vec())
    }

    async fn acknowledge_events(&self, up_to_offset: u64) -> DeviceResult<()> {
        self.require_link()?;
        self.ack_calls.fetch_add(1, Ordering::SeqCst);
        let fail = std::mem::take(&mut self.faults.lock().fail_next_ack);
        if fail {
            return Err(DeviceError::rejected("simulated acknowledge failure"));
        }

        let mut log = self.log.lock();
        let clamped = up_to_offset.min(log.events.len() as u64);
        log.acknowledged = log.acknowledged.max(clamped);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct LinkFaults {
    fail_next_bond: bool,
    fail_next_connect: bool,
    stall_bond: bool,
    stall_connect: bool,
    stall_disconnect: bool,
}

/// A simulated sensor for testing.
///
/// Hands out a single [`SimulatedConnection`] while connected. The
/// connection refuses every operation after a disconnect until the sensor
/// connects again.
#[derive(Debug)]
pub struct SimulatedSensor {
    device: Arc<SimulatedConnection>,
    bond_tx: watch::Sender<BondState>,
    connection_tx: watch::Sender<ConnectionState>,
    active: Mutex<Option<Arc<SimulatedConnection>>>,
    faults: Mutex<LinkFaults>,
    bond_calls: AtomicU64,
    connect_calls: AtomicU64,
    connections_opened: AtomicU64,
    disconnect_calls: AtomicU64,
}

impl SimulatedSensor {
    /// Creates an unbonded, disconnected sensor for the given device.
    pub fn new(device: Arc<SimulatedConnection>) -> Self {
        let (bond_tx, _) = watch::channel(BondState::None);
        let (connection_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            device,
            bond_tx,
            connection_tx,
            active: Mutex::new(None),
            faults: Mutex::new(LinkFaults::default()),
            bond_calls: AtomicU64::new(0),
            connect_calls: AtomicU64::new(0),
            connections_opened: AtomicU64::new(0),
            disconnect_calls: AtomicU64::new(0),
        }
    }

    /// Creates a sensor that is already bonded.
    pub fn bonded(device: Arc<SimulatedConnection>) -> Self {
        let sensor = Self::new(device);
        sensor.bond_tx.send_replace(BondState::Bonded);
        sensor
    }

    /// Returns the simulated device behind this sensor.
    pub fn device(&self) -> &Arc<SimulatedConnection> {
        &self.device
    }

    /// Removes the bond, as if the user unpaired the device.
    pub fn forget_bond(&self) {
        self.bond_tx.send_replace(BondState::None);
    }

    /// Drops the link without a disconnect call, as an out-of-range device would.
    pub fn drop_link(&self) {
        self.close_link();
    }

    /// Fails the next bond attempt.
    pub fn fail_next_bond(&self) {
        self.faults.lock().fail_next_bond = true;
    }

    /// Fails the next connect attempt.
    pub fn fail_next_connect(&self) {
        self.faults.lock().fail_next_connect = true;
    }

    /// Makes every bond attempt hang.
    pub fn stall_bond(&self) {
        self.faults.lock().stall_bond = true;
    }

    /// Makes every connect attempt hang.
    pub fn stall_connect(&self) {
        self.faults.lock().stall_connect = true;
    }

    /// Makes every disconnect hang.
    pub fn stall_disconnect(&self) {
        self.faults.lock().stall_disconnect = true;
    }

    /// Returns the number of `bond` calls.
    pub fn bond_calls(&self) -> u64 {
        self.bond_calls.load(Ordering::SeqCst)
    }

    /// Returns the number of `connect` calls.
    pub fn connect_calls(&self) -> u64 {
        self.connect_calls.load(Ordering::SeqCst)
    }

    /// Returns the number of connections actually established.
    pub fn connections_opened(&self) -> u64 {
        self.connections_opened.load(Ordering::SeqCst)
    }

    /// Returns the number of `disconnect` calls.
    pub fn disconnect_calls(&self) -> u64 {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    fn close_link(&self) {
        if let Some(connection) = self.active.lock().take() {
            connection.set_linked(false);
        }
        self.connection_tx
            .send_replace(ConnectionState::Disconnected);
    }
}

#[async_trait]
impl Sensor for SimulatedSensor {
    type Connection = SimulatedConnection;

    fn bond_state(&self) -> watch::Receiver<BondState> {
        self.bond_tx.subscribe()
    }

    fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection_tx.subscribe()
    }

    async fn bond(&self) -> DeviceResult<()> {
        self.bond_calls.fetch_add(1, Ordering::SeqCst);
        let stall = {
            let mut faults = self.faults.lock();
            if std::mem::take(&mut faults.fail_next_bond) {
                return Err(DeviceError::rejected("forced bond failure"));
            }
            faults.stall_bond
        };
        if stall {
            self.bond_tx.send_replace(BondState::Bonding);
            std::future::pending::<()>().await;
        }

        self.bond_tx.send_replace(BondState::Bonded);
        Ok(())
    }

    async fn connect(&self) -> DeviceResult<Arc<SimulatedConnection>> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        let stall = {
            let mut faults = self.faults.lock();
            if std::mem::take(&mut faults.fail_next_connect) {
                return Err(DeviceError::rejected("forced connect failure"));
            }
            faults.stall_connect
        };
        let bonded = self.bond_tx.borrow().is_bonded();
        if !bonded {
            return Err(DeviceError::NotBonded);
        }
        if stall {
            self.connection_tx.send_replace(ConnectionState::Connecting);
            std::future::pending::<()>().await;
        }

        let mut active = self.active.lock();
        if let Some(connection) = active.as_ref() {
            return Ok(Arc::clone(connection));
        }

        self.device.set_linked(true);
        *active = Some(Arc::clone(&self.device));
        self.connections_opened.fetch_add(1, Ordering::SeqCst);
        self.connection_tx.send_replace(ConnectionState::Connected);
        Ok(Arc::clone(&self.device))
    }

    async fn disconnect(&self) {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        let stall = self.faults.lock().stall_disconnect;
        if stall {
            std::future::pending::<()>().await;
        }
        self.close_link();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn events(n: usize) -> Vec<ActuationEvent> {
        let ts = Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).unwrap();
        (0..n)
            .map(|i| ActuationEvent::single(format!("evt-{i}"), ts, "sim"))
            .collect()
    }

    async fn connected(n: usize) -> (SimulatedSensor, Arc<SimulatedConnection>) {
        let device = Arc::new(SimulatedConnection::new());
        device.set_events(events(n));
        let sensor = SimulatedSensor::bonded(Arc::clone(&device));
        let connection = sensor.connect().await.unwrap();
        (sensor, connection)
    }

    #[tokio::test]
    async fn simulated_connect_requires_bond() {
        let sensor = SimulatedSensor::new(Arc::new(SimulatedConnection::new()));
        assert!(matches!(sensor.connect().await, Err(DeviceError::NotBonded)));

        sensor.bond().await.unwrap();
        assert!(sensor.bond_state().borrow().is_bonded());
        assert!(sensor.connect().await.is_ok());
        assert!(sensor.connection_state().borrow().is_connected());
    }

    #[tokio::test]
    async fn simulated_connect_is_idempotent() {
        let (sensor, _connection) = connected(0).await;
        sensor.connect().await.unwrap();
        sensor.connect().await.unwrap();

        assert_eq!(sensor.connect_calls(), 3);
        assert_eq!(sensor.connections_opened(), 1);
    }

    #[tokio::test]
    async fn simulated_connection_refuses_after_disconnect() {
        let (sensor, connection) = connected(3).await;
        sensor.disconnect().await;

        assert!(matches!(
            connection.read_event_count().await,
            Err(DeviceError::NotConnected)
        ));
        assert_eq!(*sensor.connection_state().borrow(), ConnectionState::Disconnected);

        // Safe when already disconnected.
        sensor.disconnect().await;
        assert_eq!(sensor.disconnect_calls(), 2);
    }

    #[tokio::test]
    async fn simulated_pages_and_acknowledgments() {
        let (_sensor, connection) = connected(25).await;
        assert_eq!(connection.read_event_count().await.unwrap(), 25);

        let page = connection.read_events(20, 10).await.unwrap();
        assert_eq!(page.len(), 5);
        assert_eq!(page[0].id, "evt-20");

        connection.acknowledge_events(10).await.unwrap();
        assert!(connection.read_events(0, 10).await.unwrap().is_empty());
        assert!(connection.read_events(25, 10).await.unwrap().is_empty());

        // Acknowledgments are clamped and never move backwards.
        connection.acknowledge_events(100).await.unwrap();
        assert_eq!(connection.acknowledged(), 25);
        connection.acknowledge_events(5).await.unwrap();
        assert_eq!(connection.acknowledged(), 25);
    }

    #[tokio::test]
    async fn simulated_read_faults() {
        let (_sensor, connection) = connected(20).await;
        connection.fail_on_read(2);

        assert!(connection.read_events(0, 10).await.is_ok());
        assert!(connection.read_events(10, 10).await.is_err());
        assert!(connection.read_events(10, 10).await.is_ok());
        assert_eq!(connection.read_calls(), 3);

        connection.fail_every_read();
        assert!(connection.read_events(0, 10).await.is_err());
        connection.clear_faults();
        assert!(connection.read_events(0, 10).await.is_ok());
    }

    #[tokio::test]
    async fn simulated_truncate_clamps_acknowledged() {
        let (_sensor, connection) = connected(20).await;
        connection.acknowledge_events(15).await.unwrap();
        connection.truncate(8);

        assert_eq!(connection.acknowledged(), 8);
        assert_eq!(connection.read_event_count().await.unwrap(), 8);
    }
}
