//! Error types reported by devices.

use thiserror::Error;

/// Result type for device operations.
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Failure outcome of a single device operation.
///
/// Devices report failures as values; the sync engine wraps them into its
/// own taxonomy depending on which step produced them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// The device refused the request.
    #[error("device rejected request: {0}")]
    Rejected(String),

    /// The operation requires a bond that does not exist.
    #[error("device is not bonded")]
    NotBonded,

    /// The operation requires a connection that does not exist.
    #[error("device is not connected")]
    NotConnected,

    /// The link dropped while the operation was in flight.
    #[error("link lost: {0}")]
    LinkLost(String),

    /// A GATT-level error status.
    #[error("GATT error status {0:#04x}")]
    Gatt(u8),
}

impl DeviceError {
    /// Creates a rejection error.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }

    /// Creates a link-lost error.
    pub fn link_lost(message: impl Into<String>) -> Self {
        Self::LinkLost(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        assert_eq!(DeviceError::NotBonded.to_string(), "device is not bonded");
        assert_eq!(DeviceError::Gatt(0x85).to_string(), "GATT error status 0x85");
        assert!(DeviceError::rejected("busy").to_string().contains("busy"));
    }
}
