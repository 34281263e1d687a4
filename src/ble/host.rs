//! Host platform seam.
//!
//! The relay only talks to peripherals through these traits, so it can be
//! driven by btleplug in production and by mocks in tests.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

/// A device returned by the picker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Opaque identifier assigned by the host platform.
    pub id: String,
    /// Advertised display name, empty when the device has none.
    pub name: String,
}

/// Access to the platform's pairing API.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BluetoothHost: Send + Sync {
    /// Let the platform pick one nearby device advertising `service`.
    async fn request_device(&self, service: Uuid) -> Result<DeviceInfo>;

    /// Open a session to a device previously returned by `request_device`.
    async fn connect(&self, device_id: &str) -> Result<Arc<dyn GattSession>>;
}

/// An open session to a device's attribute server.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GattSession: Send + Sync {
    /// Resolve the primary service, then the characteristic, then write `value`.
    async fn write_value(&self, service: Uuid, characteristic: Uuid, value: Bytes) -> Result<()>;

    /// Terminate the session.
    async fn disconnect(&self) -> Result<()>;
}
