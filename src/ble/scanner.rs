//! btleplug-backed host platform.
//!
//! btleplug has no device chooser, so [`BtleplugHost::request_device`] plays
//! the picker's role: it scans for the requested service for a bounded window
//! and selects one matching device.

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::{Stream, StreamExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::ble::connection::BtleplugSession;
use crate::ble::host::{BluetoothHost, DeviceInfo, GattSession};
use crate::error::{Error, Result};

/// How the picker chooses among matching devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceSelection {
    /// Take the first matching device seen.
    #[default]
    First,
    /// Watch the whole scan window and take the strongest signal.
    StrongestSignal,
}

/// Configuration for [`BtleplugHost`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Index into the adapters btleplug reports.
    pub adapter_index: usize,
    /// How long a device request scans before giving up.
    pub scan_timeout: Duration,
    /// Selection strategy among matching devices.
    pub selection: DeviceSelection,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            adapter_index: 0,
            scan_timeout: Duration::from_secs(10),
            selection: DeviceSelection::First,
        }
    }
}

impl HostConfig {
    /// Set the adapter index.
    pub fn with_adapter_index(mut self, index: usize) -> Self {
        self.adapter_index = index;
        self
    }

    /// Set the scan window for device requests.
    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    /// Set the selection strategy.
    pub fn with_selection(mut self, selection: DeviceSelection) -> Self {
        self.selection = selection;
        self
    }
}

/// A device that matched the requested service during a scan.
struct Candidate {
    peripheral: Peripheral,
    info: DeviceInfo,
    rssi: Option<i16>,
}

/// Serializes scans on the shared adapter.
///
/// Starting a scan replaces the adapter's filter and stopping one ends every
/// scan, so only one device request may scan at a time.
#[derive(Default)]
struct ScanLock(tokio::sync::Mutex<()>);

impl ScanLock {
    async fn acquire(&self, service: Uuid) -> tokio::sync::MutexGuard<'_, ()> {
        if let Ok(guard) = self.0.try_lock() {
            return guard;
        }
        debug!("Waiting for another device request before scanning for {}", service);
        self.0.lock().await
    }
}

/// Devices handed out by the picker and not yet connected.
struct PickedDevices<P> {
    devices: RwLock<HashMap<String, P>>,
}

impl<P> Default for PickedDevices<P> {
    fn default() -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
        }
    }
}

impl<P> PickedDevices<P> {
    fn insert(&self, id: String, device: P) {
        self.devices.write().insert(id, device);
    }

    /// Take a picked device out; each pick is good for one connect.
    fn take(&self, id: &str) -> Result<P> {
        self.devices
            .write()
            .remove(id)
            .ok_or_else(|| Error::DeviceNotFound { id: id.to_string() })
    }

    fn len(&self) -> usize {
        self.devices.read().len()
    }
}

/// Host platform backed by a local btleplug adapter.
pub struct BtleplugHost {
    /// The BLE adapter used for scanning.
    adapter: Adapter,
    /// Host configuration.
    config: HostConfig,
    /// Peripherals handed out by the picker, by device id.
    picked: PickedDevices<Peripheral>,
    /// Held for the whole scan window of a device request.
    scan_lock: ScanLock,
}

impl BtleplugHost {
    /// Open the configured Bluetooth adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new(config: HostConfig) -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .nth(config.adapter_index)
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self::with_adapter(adapter, config))
    }

    /// Create a host around a specific adapter.
    pub fn with_adapter(adapter: Adapter, config: HostConfig) -> Self {
        Self {
            adapter,
            config,
            picked: PickedDevices::default(),
            scan_lock: ScanLock::default(),
        }
    }

    /// Get the underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// Get the host configuration.
    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Scan until the window closes or the selection strategy is satisfied.
    async fn pick(
        &self,
        events: &mut (impl Stream<Item = CentralEvent> + Unpin),
        service: Uuid,
    ) -> Result<Option<Candidate>> {
        let deadline = tokio::time::Instant::now() + self.config.scan_timeout;
        let mut best: Option<Candidate> = None;

        // Peripherals the adapter already knows may never be re-announced
        for peripheral in self.adapter.peripherals().await? {
            if let Some(candidate) = Self::matching(peripheral, service).await {
                if self.config.selection == DeviceSelection::First {
                    return Ok(Some(candidate));
                }
                best = Self::stronger(best, candidate);
            }
        }

        loop {
            let event = match tokio::time::timeout_at(deadline, events.next()).await {
                Ok(Some(event)) => event,
                Ok(None) => {
                    debug!("Adapter event stream ended");
                    break;
                }
                Err(_) => {
                    debug!("Scan window for {} elapsed", service);
                    break;
                }
            };

            let id = match event {
                CentralEvent::DeviceDiscovered(id)
                | CentralEvent::DeviceUpdated(id)
                | CentralEvent::ServicesAdvertisement { id, .. } => id,
                _ => continue,
            };

            let Some(candidate) = self.lookup(&id, service).await else {
                continue;
            };

            if self.config.selection == DeviceSelection::First {
                return Ok(Some(candidate));
            }
            best = Self::stronger(best, candidate);
        }

        Ok(best)
    }

    async fn lookup(&self, id: &PeripheralId, service: Uuid) -> Option<Candidate> {
        match self.adapter.peripheral(id).await {
            Ok(peripheral) => Self::matching(peripheral, service).await,
            Err(e) => {
                trace!("Failed to get peripheral {:?}: {}", id, e);
                None
            }
        }
    }

    /// Keep the peripheral only if it advertises `service`.
    async fn matching(peripheral: Peripheral, service: Uuid) -> Option<Candidate> {
        let properties = match peripheral.properties().await {
            Ok(Some(p)) => p,
            _ => return None,
        };

        if !properties.services.contains(&service) {
            return None;
        }

        let info = DeviceInfo {
            id: peripheral.id().to_string(),
            name: properties.local_name.unwrap_or_default(),
        };

        trace!("Candidate {} ({:?} dBm)", info.id, properties.rssi);

        Some(Candidate {
            peripheral,
            info,
            rssi: properties.rssi,
        })
    }

    fn stronger(current: Option<Candidate>, candidate: Candidate) -> Option<Candidate> {
        match current {
            Some(existing)
                if existing.rssi.unwrap_or(i16::MIN) >= candidate.rssi.unwrap_or(i16::MIN) =>
            {
                Some(existing)
            }
            _ => Some(candidate),
        }
    }
}

#[async_trait]
impl BluetoothHost for BtleplugHost {
    async fn request_device(&self, service: Uuid) -> Result<DeviceInfo> {
        info!("Requesting device with service {}", service);

        let _scan = self.scan_lock.acquire(service).await;

        let mut events = self.adapter.events().await?;

        self.adapter
            .start_scan(ScanFilter {
                services: vec![service],
            })
            .await?;

        let picked = self.pick(&mut events, service).await;

        if let Err(e) = self.adapter.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }

        let candidate = picked?.ok_or_else(|| Error::NoDeviceSelected {
            service: service.to_string(),
        })?;

        info!(
            "Selected device {} ({:?})",
            candidate.info.id, candidate.info.name
        );

        self.picked
            .insert(candidate.info.id.clone(), candidate.peripheral);

        Ok(candidate.info)
    }

    async fn connect(&self, device_id: &str) -> Result<Arc<dyn GattSession>> {
        let peripheral = self.picked.take(device_id)?;
        trace!("{} picked devices awaiting connect", self.picked.len());

        let session = BtleplugSession::open(device_id.to_string(), peripheral).await?;
        Ok(Arc::new(session))
    }
}
