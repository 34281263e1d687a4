//! GATT sessions over btleplug.
//!
//! A [`BtleplugSession`] is the connection handle stored in the relay's
//! table. It resolves services and characteristics from the set btleplug
//! discovered at connect time.

use async_trait::async_trait;
use btleplug::api::{CharPropFlags, Peripheral as _, WriteType};
use btleplug::platform::Peripheral;
use bytes::Bytes;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::ble::host::GattSession;
use crate::error::{Error, Result};

/// An open connection to a peripheral's attribute server.
pub struct BtleplugSession {
    /// Host-assigned device id, for logging.
    id: String,
    /// The connected peripheral.
    peripheral: Peripheral,
}

impl BtleplugSession {
    /// Connect to `peripheral` and discover its services.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionFailed`] if the link or service discovery
    /// fails.
    pub async fn open(id: String, peripheral: Peripheral) -> Result<Self> {
        if peripheral.is_connected().await.unwrap_or(false) {
            debug!("Peripheral {} already connected at BLE level", id);
        } else {
            peripheral
                .connect()
                .await
                .map_err(|e| Error::ConnectionFailed {
                    reason: e.to_string(),
                })?;
        }

        if let Err(e) = peripheral.discover_services().await {
            warn!("Service discovery failed for {}: {}", id, e);
            if let Err(e) = peripheral.disconnect().await {
                debug!("Disconnect after failed discovery also failed: {}", e);
            }
            return Err(Error::ConnectionFailed {
                reason: format!("service discovery failed: {}", e),
            });
        }

        info!(
            "Connected to {} ({} services)",
            id,
            peripheral.services().len()
        );

        Ok(Self { id, peripheral })
    }

    /// Get the peripheral.
    pub fn peripheral(&self) -> &Peripheral {
        &self.peripheral
    }
}

#[async_trait]
impl GattSession for BtleplugSession {
    async fn write_value(&self, service: Uuid, characteristic: Uuid, value: Bytes) -> Result<()> {
        let services = self.peripheral.services();

        let primary = services
            .iter()
            .find(|s| s.primary && s.uuid == service)
            .ok_or_else(|| Error::ServiceNotFound {
                uuid: service.to_string(),
            })?;

        let target = primary
            .characteristics
            .iter()
            .find(|c| c.uuid == characteristic)
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: characteristic.to_string(),
            })?;

        let write_type = write_type_for(target.properties)?;

        self.peripheral.write(target, &value, write_type).await?;

        trace!(
            "Wrote {} bytes to {} on {} ({:?})",
            value.len(),
            characteristic,
            self.id,
            write_type
        );

        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.peripheral.disconnect().await?;
        info!("Disconnected from {}", self.id);
        Ok(())
    }
}

/// Pick the write type the characteristic supports, preferring acknowledged
/// writes.
pub fn write_type_for(properties: CharPropFlags) -> Result<WriteType> {
    if properties.contains(CharPropFlags::WRITE) {
        Ok(WriteType::WithResponse)
    } else if properties.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE) {
        Ok(WriteType::WithoutResponse)
    } else {
        Err(Error::NotSupported {
            operation: format!("write to characteristic with properties {:?}", properties),
        })
    }
}
