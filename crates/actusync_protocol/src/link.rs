//! Link states reported by a sensor.

use serde::{Deserialize, Serialize};

/// Bonding state of a sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BondState {
    /// No bond exists.
    #[default]
    None,
    /// Bonding is in progress.
    Bonding,
    /// The device is bonded.
    Bonded,
}

impl BondState {
    /// Returns true if the device is bonded.
    pub fn is_bonded(&self) -> bool {
        matches!(self, BondState::Bonded)
    }
}

/// Connection state of a sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No connection.
    #[default]
    Disconnected,
    /// A connection is being established.
    Connecting,
    /// A connection is established and usable.
    Connected,
    /// The connection is being torn down.
    Disconnecting,
}

impl ConnectionState {
    /// Returns true if the link is usable.
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}
