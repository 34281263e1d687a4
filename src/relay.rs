//! Connection relay.
//!
//! Owns the table of open connections and implements the three operations the
//! UI can trigger: request/connect, write and disconnect. Each operation
//! returns a [`Result`]; turning results into outbound messages is the job of
//! the [`port`](crate::port) adapter.

use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ble::host::{BluetoothHost, DeviceInfo, GattSession};
use crate::ble::uuids::Identifier;
use crate::error::{Error, Result};

/// A write to one characteristic of a connected device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest {
    /// Device id as returned by a successful connect.
    pub device: String,
    /// Service identifier (name or `0x` code).
    pub service: String,
    /// Characteristic identifier (name or `0x` code).
    pub characteristic: String,
    /// Payload bytes.
    pub value: Bytes,
}

/// Relays UI requests to a [`BluetoothHost`] and tracks open connections.
pub struct ConnectionRelay<H> {
    /// Host platform used for picking and connecting.
    host: H,
    /// Open sessions by device id.
    connections: RwLock<HashMap<String, Arc<dyn GattSession>>>,
}

impl<H: BluetoothHost> ConnectionRelay<H> {
    /// Create a relay with an empty connection table.
    pub fn new(host: H) -> Self {
        Self {
            host,
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Get the host platform.
    pub fn host(&self) -> &H {
        &self.host
    }

    /// Ask the host to pick a device advertising `service` and connect to it.
    ///
    /// On success the connection is stored under the device's id. On failure
    /// the table is left untouched.
    pub async fn request_and_connect(&self, service: &str) -> Result<DeviceInfo> {
        let service = Identifier::parse(service)?.service_uuid()?;

        let device = self.host.request_device(service).await?;
        let session = self.host.connect(&device.id).await?;

        let replaced = self
            .connections
            .write()
            .insert(device.id.clone(), session)
            .is_some();

        if replaced {
            debug!("Replaced existing connection for {}", device.id);
        }

        info!("Device {} ({:?}) connected", device.id, device.name);

        Ok(device)
    }

    /// Write a value to a characteristic of a connected device.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`] without touching the host when the
    /// device has no open connection.
    pub async fn write_value(&self, request: WriteRequest) -> Result<()> {
        self.prepare_write(request)?.send().await
    }

    /// Resolve a write against the connection table without calling the host.
    ///
    /// The table is consulted at call time, so a write prepared before a
    /// disconnect still reaches the device.
    pub fn prepare_write(&self, request: WriteRequest) -> Result<PreparedWrite> {
        let session = self.session(&request.device)?;

        let service = Identifier::parse(&request.service)?.service_uuid()?;
        let characteristic = Identifier::parse(&request.characteristic)?.characteristic_uuid()?;

        Ok(PreparedWrite {
            device: request.device,
            session,
            service,
            characteristic,
            value: request.value,
        })
    }

    /// Terminate a device's session and forget it.
    ///
    /// The entry is removed before the host call, so a failed disconnect
    /// still leaves the device unconnected from the relay's point of view.
    pub async fn disconnect(&self, device_id: &str) -> Result<()> {
        self.detach(device_id)?.close().await
    }

    /// Remove a device from the connection table, handing back its session.
    pub fn detach(&self, device_id: &str) -> Result<DetachedSession> {
        let session = self
            .connections
            .write()
            .remove(device_id)
            .ok_or_else(|| Error::DeviceNotFound {
                id: device_id.to_string(),
            })?;

        Ok(DetachedSession {
            device: device_id.to_string(),
            session,
        })
    }

    /// Disconnect every open session and clear the table.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down connection relay");

        let sessions: Vec<_> = self.connections.write().drain().collect();
        for (id, session) in sessions {
            if let Err(e) = session.disconnect().await {
                warn!("Error disconnecting device {}: {}", id, e);
            }
        }

        Ok(())
    }

    /// Check whether a device has an open connection.
    pub fn is_connected(&self, device_id: &str) -> bool {
        self.connections.read().contains_key(device_id)
    }

    /// Ids of all devices with open connections.
    pub fn connected_devices(&self) -> Vec<String> {
        self.connections.read().keys().cloned().collect()
    }

    /// Get the number of open connections.
    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    fn session(&self, device_id: &str) -> Result<Arc<dyn GattSession>> {
        self.connections
            .read()
            .get(device_id)
            .cloned()
            .ok_or_else(|| Error::DeviceNotFound {
                id: device_id.to_string(),
            })
    }
}

/// A write whose session and identifiers are already resolved.
pub struct PreparedWrite {
    device: String,
    session: Arc<dyn GattSession>,
    service: Uuid,
    characteristic: Uuid,
    value: Bytes,
}

impl PreparedWrite {
    /// Perform the write on the device.
    pub async fn send(self) -> Result<()> {
        debug!(
            "Writing {} bytes to {}/{} on {}",
            self.value.len(),
            self.service,
            self.characteristic,
            self.device
        );

        self.session
            .write_value(self.service, self.characteristic, self.value)
            .await
    }
}

/// A session already removed from the connection table.
pub struct DetachedSession {
    device: String,
    session: Arc<dyn GattSession>,
}

impl DetachedSession {
    /// Terminate the session on the device.
    pub async fn close(self) -> Result<()> {
        self.session.disconnect().await?;
        info!("Device {} disconnected", self.device);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::host::{MockBluetoothHost, MockGattSession};
    use crate::ble::uuids::uuid_from_code;
    use mockall::predicate::eq;
    use pretty_assertions::assert_eq;

    fn heart_rate_monitor() -> DeviceInfo {
        DeviceInfo {
            id: "hrm-1".to_string(),
            name: "Polar H10".to_string(),
        }
    }

    /// Host that picks and connects `device` exactly once, handing out `session`.
    fn host_for(device: DeviceInfo, session: MockGattSession) -> MockBluetoothHost {
        let mut host = MockBluetoothHost::new();
        let picked = device.clone();
        host.expect_request_device()
            .with(eq(uuid_from_code(0x180d)))
            .times(1)
            .returning(move |_| Ok(picked.clone()));
        host.expect_connect()
            .withf(move |id| id == device.id)
            .times(1)
            .return_once(move |_| Ok(Arc::new(session) as Arc<dyn GattSession>));
        host
    }

    fn write_to(device: &str, value: &[u8]) -> WriteRequest {
        WriteRequest {
            device: device.to_string(),
            service: "0x180D".to_string(),
            characteristic: "heart_rate_control_point".to_string(),
            value: Bytes::copy_from_slice(value),
        }
    }

    #[tokio::test]
    async fn test_connect_stores_session() {
        let relay = ConnectionRelay::new(host_for(heart_rate_monitor(), MockGattSession::new()));

        let device = relay.request_and_connect("heart_rate").await.unwrap();

        assert_eq!(device, heart_rate_monitor());
        assert_eq!(relay.connected_devices(), vec!["hrm-1".to_string()]);
        assert!(relay.is_connected("hrm-1"));
    }

    #[tokio::test]
    async fn test_connect_accepts_numeric_service() {
        let relay = ConnectionRelay::new(host_for(heart_rate_monitor(), MockGattSession::new()));

        relay.request_and_connect("0x180d").await.unwrap();

        assert_eq!(relay.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_picker_failure_leaves_table_empty() {
        let mut host = MockBluetoothHost::new();
        host.expect_request_device().times(1).returning(|service| {
            Err(Error::NoDeviceSelected {
                service: service.to_string(),
            })
        });
        host.expect_connect().never();
        let relay = ConnectionRelay::new(host);

        let err = relay.request_and_connect("battery_service").await.unwrap_err();

        assert!(matches!(err, Error::NoDeviceSelected { .. }));
        assert_eq!(relay.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_connect_failure_leaves_table_empty() {
        let mut host = MockBluetoothHost::new();
        host.expect_request_device()
            .returning(|_| Ok(heart_rate_monitor()));
        host.expect_connect().times(1).returning(|_| {
            Err(Error::ConnectionFailed {
                reason: "link timeout".to_string(),
            })
        });
        let relay = ConnectionRelay::new(host);

        let err = relay.request_and_connect("heart_rate").await.unwrap_err();

        assert_eq!(err.to_string(), "Connection failed: link timeout");
        assert!(!relay.is_connected("hrm-1"));
    }

    #[tokio::test]
    async fn test_unknown_service_name_makes_no_host_calls() {
        let mut host = MockBluetoothHost::new();
        host.expect_request_device().never();
        let relay = ConnectionRelay::new(host);

        let err = relay.request_and_connect("not_a_service").await.unwrap_err();

        assert!(matches!(err, Error::UnknownIdentifier { .. }));
    }

    #[tokio::test]
    async fn test_write_resolves_identifiers() {
        let mut session = MockGattSession::new();
        session
            .expect_write_value()
            .with(
                eq(uuid_from_code(0x180d)),
                eq(uuid_from_code(0x2a39)),
                eq(Bytes::from_static(&[0x01])),
            )
            .times(1)
            .returning(|_, _, _| Ok(()));
        let relay = ConnectionRelay::new(host_for(heart_rate_monitor(), session));
        relay.request_and_connect("heart_rate").await.unwrap();

        relay.write_value(write_to("hrm-1", &[0x01])).await.unwrap();
    }

    #[tokio::test]
    async fn test_write_unknown_device() {
        let mut host = MockBluetoothHost::new();
        host.expect_request_device().never();
        host.expect_connect().never();
        let relay = ConnectionRelay::new(host);

        let err = relay.write_value(write_to("ghost", &[1, 2])).await.unwrap_err();

        assert_eq!(err.to_string(), "Device ghost not found!");
    }

    #[tokio::test]
    async fn test_write_failure_keeps_connection() {
        let mut session = MockGattSession::new();
        session.expect_write_value().times(1).returning(|_, c, _| {
            Err(Error::CharacteristicNotFound {
                uuid: c.to_string(),
            })
        });
        let relay = ConnectionRelay::new(host_for(heart_rate_monitor(), session));
        relay.request_and_connect("heart_rate").await.unwrap();

        let err = relay.write_value(write_to("hrm-1", &[])).await.unwrap_err();

        assert!(matches!(err, Error::CharacteristicNotFound { .. }));
        assert!(relay.is_connected("hrm-1"));
    }

    #[tokio::test]
    async fn test_disconnect_twice() {
        let mut session = MockGattSession::new();
        session.expect_disconnect().times(1).returning(|| Ok(()));
        let relay = ConnectionRelay::new(host_for(heart_rate_monitor(), session));
        relay.request_and_connect("heart_rate").await.unwrap();

        relay.disconnect("hrm-1").await.unwrap();
        let err = relay.disconnect("hrm-1").await.unwrap_err();

        assert_eq!(err.to_string(), "Device hrm-1 not found!");
        assert_eq!(relay.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_write_after_disconnect_is_not_found() {
        let mut session = MockGattSession::new();
        session.expect_disconnect().returning(|| Ok(()));
        session.expect_write_value().never();
        let relay = ConnectionRelay::new(host_for(heart_rate_monitor(), session));
        relay.request_and_connect("heart_rate").await.unwrap();
        relay.disconnect("hrm-1").await.unwrap();

        let err = relay.write_value(write_to("hrm-1", &[1])).await.unwrap_err();

        assert!(matches!(err, Error::DeviceNotFound { .. }));
    }

    #[tokio::test]
    async fn test_disconnect_absent_device() {
        let relay = ConnectionRelay::new(MockBluetoothHost::new());

        let err = relay.disconnect("nope").await.unwrap_err();

        assert!(matches!(err, Error::DeviceNotFound { ref id } if id == "nope"));
        assert_eq!(relay.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_disconnect_still_removes_entry() {
        let mut session = MockGattSession::new();
        session.expect_disconnect().returning(|| {
            Err(Error::NotSupported {
                operation: "disconnect".to_string(),
            })
        });
        let relay = ConnectionRelay::new(host_for(heart_rate_monitor(), session));
        relay.request_and_connect("heart_rate").await.unwrap();

        tokio_test::assert_err!(relay.disconnect("hrm-1").await);
        assert!(!relay.is_connected("hrm-1"));
    }

    #[tokio::test]
    async fn test_shutdown_disconnects_all() {
        let mut session = MockGattSession::new();
        session.expect_disconnect().times(1).returning(|| Ok(()));
        let relay = ConnectionRelay::new(host_for(heart_rate_monitor(), session));
        relay.request_and_connect("heart_rate").await.unwrap();

        tokio_test::assert_ok!(relay.shutdown().await);

        assert_eq!(relay.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_prepared_write_survives_disconnect() {
        let mut session = MockGattSession::new();
        session.expect_write_value().times(1).returning(|_, _, _| Ok(()));
        session.expect_disconnect().times(1).returning(|| Ok(()));
        let relay = ConnectionRelay::new(host_for(heart_rate_monitor(), session));
        relay.request_and_connect("heart_rate").await.unwrap();

        let write = relay.prepare_write(write_to("hrm-1", &[7])).unwrap();
        let detached = relay.detach("hrm-1").unwrap();

        detached.close().await.unwrap();
        write.send().await.unwrap();
        assert!(!relay.is_connected("hrm-1"));
    }
}
