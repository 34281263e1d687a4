//! BLE communication module.
//!
//! This module provides the host platform seam, identifier resolution and
//! the btleplug-backed host used outside of tests.

pub mod connection;
pub mod host;
pub mod scanner;
pub mod uuids;

pub use connection::BtleplugSession;
pub use host::{BluetoothHost, DeviceInfo, GattSession};
pub use scanner::{BtleplugHost, DeviceSelection, HostConfig};
pub use uuids::{normalize, uuid_from_code, Identifier};
