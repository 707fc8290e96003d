//! Device session gateway.
//!
//! Bonding and connecting are treated as idempotent preconditions: the
//! gateway asks the sensor for its current state on every call and only
//! acts when the link is not already in the required state. A retried
//! attempt therefore never re-bonds or double-connects a healthy link.

use crate::config::DeviceTimeouts;
use crate::device::Sensor;
use crate::error::{FailureCause, SyncError, SyncResult};
use actusync_protocol::{BondState, ConnectionState};
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Snapshot of a sensor's link state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkState {
    /// Bonding state.
    pub bond: BondState,
    /// Connection state.
    pub connection: ConnectionState,
}

impl LinkState {
    /// Returns true if the link is bonded and connected.
    pub fn is_ready(&self) -> bool {
        self.bond.is_bonded() && self.connection.is_connected()
    }
}

/// Manages the link to one device on behalf of the sync engine.
pub struct DeviceSession<S: Sensor> {
    sensor: Arc<S>,
    timeouts: DeviceTimeouts,
}

impl<S: Sensor> DeviceSession<S> {
    /// Creates a gateway over the given sensor.
    pub fn new(sensor: Arc<S>, timeouts: DeviceTimeouts) -> Self {
        Self { sensor, timeouts }
    }

    /// Returns the sensor behind this gateway.
    pub fn sensor(&self) -> &Arc<S> {
        &self.sensor
    }

    /// Returns the current link state as reported by the sensor.
    pub fn link_state(&self) -> LinkState {
        LinkState {
            bond: *self.sensor.bond_state().borrow(),
            connection: *self.sensor.connection_state().borrow(),
        }
    }

    /// Bonds with the device unless the sensor already reports a bond.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Bonding`] if the sensor rejects bonding or does
    /// not finish within the bond timeout.
    pub async fn ensure_bonded(&self) -> SyncResult<()> {
        let bonded = self.sensor.bond_state().borrow().is_bonded();
        if bonded {
            return Ok(());
        }

        debug!("bonding with device");
        match timeout(self.timeouts.bond, self.sensor.bond()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(SyncError::Bonding(err.into())),
            Err(_) => Err(SyncError::Bonding(FailureCause::TimedOut(self.timeouts.bond))),
        }
    }

    /// Returns the live connection, establishing one if needed.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Connection`] if the sensor rejects the
    /// connection or does not produce one within the connect timeout.
    pub async fn ensure_connected(&self) -> SyncResult<Arc<S::Connection>> {
        match timeout(self.timeouts.connect, self.sensor.connect()).await {
            Ok(Ok(connection)) => Ok(connection),
            Ok(Err(err)) => Err(SyncError::Connection(err.into())),
            Err(_) => Err(SyncError::Connection(FailureCause::TimedOut(
                self.timeouts.connect,
            ))),
        }
    }

    /// Bonds if needed, then connects if needed.
    ///
    /// # Errors
    ///
    /// Returns the first failure of [`Self::ensure_bonded`] or
    /// [`Self::ensure_connected`].
    pub async fn ensure_ready(&self) -> SyncResult<Arc<S::Connection>> {
        self.ensure_bonded().await?;
        self.ensure_connected().await
    }

    /// Disconnects from the device.
    ///
    /// Never fails and is safe to call without a connection. A disconnect
    /// that does not finish within the release timeout is abandoned.
    pub async fn release(&self) {
        if timeout(self.timeouts.release, self.sensor.disconnect())
            .await
            .is_err()
        {
            warn!(
                timeout = ?self.timeouts.release,
                "disconnect did not complete, abandoning"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{SimulatedConnection, SimulatedSensor};
    use std::time::Duration;

    fn session(sensor: SimulatedSensor) -> (DeviceSession<SimulatedSensor>, Arc<SimulatedSensor>) {
        let sensor = Arc::new(sensor);
        (
            DeviceSession::new(Arc::clone(&sensor), DeviceTimeouts::default()),
            sensor,
        )
    }

    #[tokio::test]
    async fn ensure_bonded_skips_when_bonded() {
        let (session, sensor) = session(SimulatedSensor::bonded(Arc::new(SimulatedConnection::new())));

        session.ensure_bonded().await.unwrap();
        session.ensure_bonded().await.unwrap();
        assert_eq!(sensor.bond_calls(), 0);
    }

    #[tokio::test]
    async fn ensure_ready_bonds_then_connects() {
        let (session, sensor) = session(SimulatedSensor::new(Arc::new(SimulatedConnection::new())));
        assert!(!session.link_state().is_ready());

        session.ensure_ready().await.unwrap();
        assert!(session.link_state().is_ready());
        assert_eq!(sensor.bond_calls(), 1);

        session.ensure_ready().await.unwrap();
        assert_eq!(sensor.bond_calls(), 1);
        assert_eq!(sensor.connections_opened(), 1);
    }

    #[tokio::test]
    async fn bond_rejection_is_bonding_failure() {
        let (session, sensor) = session(SimulatedSensor::new(Arc::new(SimulatedConnection::new())));
        sensor.fail_next_bond();

        let err = session.ensure_ready().await.unwrap_err();
        assert!(matches!(err, SyncError::Bonding(FailureCause::Device(_))));
        assert_eq!(sensor.connect_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn bond_timeout_is_bonding_failure() {
        let (session, sensor) = session(SimulatedSensor::new(Arc::new(SimulatedConnection::new())));
        sensor.stall_bond();

        let err = session.ensure_bonded().await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::Bonding(FailureCause::TimedOut(d)) if d == Duration::from_secs(60)
        ));
        assert_eq!(session.link_state().bond, BondState::Bonding);
    }

    #[tokio::test]
    async fn lost_bond_is_rebonded() {
        let (session, sensor) = session(SimulatedSensor::bonded(Arc::new(SimulatedConnection::new())));
        sensor.forget_bond();

        session.ensure_ready().await.unwrap();
        assert_eq!(sensor.bond_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_timeout_is_connection_failure() {
        let (session, sensor) = session(SimulatedSensor::bonded(Arc::new(SimulatedConnection::new())));
        sensor.stall_connect();

        let err = session.ensure_connected().await.unwrap_err();
        assert!(err.is_timeout());
        assert!(matches!(err, SyncError::Connection(_)));
    }

    #[tokio::test]
    async fn connect_rejection_is_connection_failure() {
        let (session, sensor) = session(SimulatedSensor::bonded(Arc::new(SimulatedConnection::new())));
        sensor.fail_next_connect();

        let err = session.ensure_connected().await.unwrap_err();
        assert!(matches!(err, SyncError::Connection(FailureCause::Device(_))));
        assert!(session.ensure_connected().await.is_ok());
    }

    #[tokio::test]
    async fn dropped_link_is_reconnected() {
        let (session, sensor) = session(SimulatedSensor::bonded(Arc::new(SimulatedConnection::new())));
        session.ensure_ready().await.unwrap();
        sensor.drop_link();
        assert!(!session.link_state().is_ready());

        session.ensure_ready().await.unwrap();
        assert_eq!(sensor.connections_opened(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn release_never_fails() {
        let (session, sensor) = session(SimulatedSensor::bonded(Arc::new(SimulatedConnection::new())));

        // Without a connection.
        session.release().await;

        session.ensure_ready().await.unwrap();
        session.release().await;
        assert_eq!(session.link_state().connection, ConnectionState::Disconnected);

        // A hanging disconnect is abandoned after the release timeout.
        sensor.stall_disconnect();
        session.release().await;
        assert_eq!(sensor.disconnect_calls(), 3);
    }
}
