//! Error types for the gatt-port-relay crate.

use thiserror::Error;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// The device id has no open connection (or was never picked).
    #[error("Device {id} not found!")]
    DeviceNotFound {
        /// The device id that was looked up.
        id: String,
    },

    /// The discovery window closed without a matching device.
    #[error("No device selected for service {service}")]
    NoDeviceSelected {
        /// The service the picker was filtering on.
        service: String,
    },

    /// Failed to establish a connection to the device.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// Description of why the connection failed.
        reason: String,
    },

    /// A `0x` identifier without a usable numeric value.
    #[error("Invalid identifier: {identifier}")]
    InvalidIdentifier {
        /// The identifier as received.
        identifier: String,
    },

    /// A named identifier that is neither a UUID nor a known GATT name.
    #[error("Unknown identifier: {identifier}")]
    UnknownIdentifier {
        /// The identifier as received.
        identifier: String,
    },

    /// The requested operation is not supported.
    #[error("Operation not supported: {operation}")]
    NotSupported {
        /// Description of the unsupported operation.
        operation: String,
    },

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter {
        /// The name of the parameter.
        name: String,
        /// The invalid value that was provided.
        value: String,
    },

    /// An inbound port message could not be decoded.
    #[error("Malformed message: {0}")]
    MalformedMessage(#[from] serde_json::Error),

    /// Reading or writing the port transport failed.
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Characteristic not found on the device.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID of the characteristic that was not found.
        uuid: String,
    },

    /// Service not found on the device.
    #[error("Service not found: {uuid}")]
    ServiceNotFound {
        /// The UUID of the service that was not found.
        uuid: String,
    },
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
