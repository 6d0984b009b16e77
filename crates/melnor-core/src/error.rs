//! Error types for melnor-core.
//!
//! This module defines all error types that can occur when synchronizing
//! with a Melnor timer over Bluetooth Low Energy.
//!
//! # Error Classes
//!
//! | Error Type | Raised by | Handling |
//! |------------|-----------|----------|
//! | [`Error::NotConnected`], [`Error::ConnectionFailed`] | link layer | Reconnect; the sync layer never retries |
//! | [`Error::ReadFailed`] | one endpoint during `fetch_state` | Tolerated, that record is not refreshed |
//! | [`Error::WriteFailed`] | `push_state` and atomic setters | Surfaced to the caller, not retried |
//! | [`Error::Protocol`] | a malformed record | Fatal for that record only |
//! | [`Error::InvalidZone`] | setters | Caller bug, zone hidden or out of range |
//!
//! Connection-class errors raised during `fetch_state` are swallowed when
//! the device is already known to be disconnected, so a dropped link
//! reports once through the disconnect notification rather than once per
//! endpoint. See [`Error::is_connection_error`].

use std::time::Duration;

use thiserror::Error;

use melnor_types::{Endpoint, ParseError};

/// Errors that can occur when communicating with Melnor timers.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy error.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Operation attempted while not connected to device.
    #[error("Not connected to device")]
    NotConnected,

    /// Connection failed with specific reason.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// The device identifier that failed to connect.
        device_id: Option<String>,
        /// The structured reason for the failure.
        reason: ConnectionFailureReason,
    },

    /// Reading a single endpoint failed.
    #[error("Read failed from {endpoint}: {reason}")]
    ReadFailed {
        /// The endpoint being read.
        endpoint: Endpoint,
        /// The reason for the failure.
        reason: String,
    },

    /// Write operation failed.
    #[error("Write failed to {endpoint}: {reason}")]
    WriteFailed {
        /// The endpoint being written.
        endpoint: Endpoint,
        /// The reason for the failure.
        reason: String,
    },

    /// A record received from the device could not be decoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ParseError),

    /// Required BLE characteristic not found on device.
    #[error("Characteristic not found: {uuid} (searched in {service_count} services)")]
    CharacteristicNotFound {
        /// The UUID that was not found.
        uuid: String,
        /// Number of services that were searched.
        service_count: usize,
    },

    /// Operation timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// Zone is outside the device's valve count.
    #[error("Zone {zone} is not available on a {valve_count} valve timer")]
    InvalidZone {
        /// Zero-based zone index requested.
        zone: u8,
        /// Number of valves the device exposes.
        valve_count: u8,
    },

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Structured reasons for connection failures.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new reasons
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectionFailureReason {
    /// Bluetooth adapter not available or powered off.
    AdapterUnavailable,
    /// Device is out of range.
    OutOfRange,
    /// Connection attempt timed out.
    Timeout,
    /// The link dropped while an operation was in flight.
    LinkLost,
    /// The handshake (model read) after connecting failed.
    HandshakeFailed(String),
    /// Generic BLE error.
    BleError(String),
    /// Other/unknown error.
    Other(String),
}

impl std::fmt::Display for ConnectionFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AdapterUnavailable => write!(f, "Bluetooth adapter unavailable"),
            Self::OutOfRange => write!(f, "device out of range"),
            Self::Timeout => write!(f, "connection timed out"),
            Self::LinkLost => write!(f, "link lost"),
            Self::HandshakeFailed(msg) => write!(f, "handshake failed: {}", msg),
            Self::BleError(msg) => write!(f, "BLE error: {}", msg),
            Self::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl Error {
    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a characteristic not found error.
    pub fn characteristic_not_found(uuid: impl Into<String>, service_count: usize) -> Self {
        Self::CharacteristicNotFound {
            uuid: uuid.into(),
            service_count,
        }
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Create a connection failure with structured reason.
    pub fn connection_failed(device_id: Option<String>, reason: ConnectionFailureReason) -> Self {
        Self::ConnectionFailed { device_id, reason }
    }

    /// Create a read failure for an endpoint.
    pub fn read_failed(endpoint: Endpoint, reason: impl Into<String>) -> Self {
        Self::ReadFailed {
            endpoint,
            reason: reason.into(),
        }
    }

    /// Create a write failure for an endpoint.
    pub fn write_failed(endpoint: Endpoint, reason: impl Into<String>) -> Self {
        Self::WriteFailed {
            endpoint,
            reason: reason.into(),
        }
    }

    /// Whether this error means the link itself is gone, as opposed to a
    /// single operation failing on a live link.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Error::NotConnected | Error::ConnectionFailed { .. } => true,
            Error::Bluetooth(err) => matches!(
                err,
                btleplug::Error::NotConnected | btleplug::Error::DeviceNotFound
            ),
            _ => false,
        }
    }
}

/// Result type alias using melnor-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
