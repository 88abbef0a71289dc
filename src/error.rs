use thiserror::Error;

/// Errors that can occur while talking to a treadmill
#[derive(Error, Debug)]
pub enum TreadmillError {
    /// The device address string is not six colon-separated hex octets
    #[error("Expected Bluetooth device address like \"FF:FF:FF:FF:FF:FF\", got: {0:?}")]
    InvalidAddress(String),

    /// Bluetooth Low Energy related errors
    #[error("BLE error: {0}")]
    Ble(#[from] btleplug::Error),

    /// No Bluetooth adapter is available on this host
    #[error("No Bluetooth adapter found")]
    AdapterNotFound,

    /// Device not found during scanning
    #[error("Treadmill {0} not found")]
    DeviceNotFound(String),

    /// Device connection failed
    #[error("Failed to connect to device: {0}")]
    ConnectionFailed(String),

    /// Transport operation timeout
    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds
        timeout_ms: u64,
    },

    /// An operation needed an established link
    #[error("Device is not connected")]
    NotConnected,

    /// The link is up but the device exposes no usable notification characteristic
    #[error("Notification characteristic not found")]
    CharacteristicNotFound,

    /// The connection manager was torn down
    #[error("Connection manager has been destroyed")]
    Destroyed,

    /// Failure reported by a non-btleplug transport
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Result type for treadmill operations
pub type Result<T> = std::result::Result<T, TreadmillError>;

impl TreadmillError {
    /// Check if this error indicates a connection issue
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Ble(_)
                | Self::ConnectionFailed(_)
                | Self::NotConnected
                | Self::DeviceNotFound(_)
                | Self::Timeout { .. }
        )
    }

    /// Check if retrying the same operation can succeed
    ///
    /// Address format errors and a destroyed manager are permanent; everything
    /// the radio link can cause is worth another attempt.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::InvalidAddress(_) | Self::Destroyed | Self::AdapterNotFound
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let connection_error = TreadmillError::ConnectionFailed("test".to_string());
        assert!(connection_error.is_connection_error());
        assert!(connection_error.is_retryable());

        let timeout_error = TreadmillError::Timeout { timeout_ms: 5000 };
        assert!(timeout_error.is_connection_error());
        assert!(timeout_error.is_retryable());

        let address_error = TreadmillError::InvalidAddress("nope".to_string());
        assert!(!address_error.is_connection_error());
        assert!(!address_error.is_retryable());

        assert!(!TreadmillError::Destroyed.is_retryable());
    }

    #[test]
    fn test_invalid_address_echoes_input() {
        let error = TreadmillError::InvalidAddress("AA:BB:CC".to_string());
        let error_string = format!("{error}");
        assert!(error_string.contains("FF:FF:FF:FF:FF:FF"));
        assert!(error_string.contains("\"AA:BB:CC\""));
    }
}
