//! Error types for bus transport, persistence and configuration
use std::path::PathBuf;

/// Failure talking to a sensor over the field bus
///
/// Every variant carries the slave address of the sensor that was being
/// queried. Transport errors never abort a polling cycle: the poller turns
/// them into "unavailable" markers on the affected Sample fields.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("sensor {address}: no response within timeout")]
    Timeout { address: u8 },

    #[error("sensor {address}: i/o error: {source}")]
    Io {
        address: u8,
        #[source]
        source: std::io::Error,
    },

    #[error("sensor {address}: CRC mismatch (expected {expected:#06x}, got {actual:#06x})")]
    Checksum {
        address: u8,
        expected: u16,
        actual: u16,
    },

    #[error("sensor {address}: malformed response: {reason}")]
    Malformed { address: u8, reason: String },

    #[error("sensor {address}: modbus exception code {code:#04x}")]
    Exception { address: u8, code: u8 },

    #[error("sensor {address}: cannot open bus: {reason}")]
    Connect { address: u8, reason: String },
}

impl TransportError {
    /// Slave address of the sensor that failed
    pub fn address(&self) -> u8 {
        match self {
            TransportError::Timeout { address }
            | TransportError::Io { address, .. }
            | TransportError::Checksum { address, .. }
            | TransportError::Malformed { address, .. }
            | TransportError::Exception { address, .. }
            | TransportError::Connect { address, .. } => *address,
        }
    }
}

/// Failure persisting samples to the daily log files
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("log queue full, record dropped after {timeout_ms} ms")]
    QueueTimeout { timeout_ms: u128 },

    #[error("log queue closed, record dropped")]
    QueueClosed,
}

impl PersistenceError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PersistenceError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        PersistenceError::Csv {
            path: path.into(),
            source,
        }
    }
}

/// Missing or invalid setting, fatal at startup
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable not set")]
    Missing(&'static str),

    #[error("invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}
