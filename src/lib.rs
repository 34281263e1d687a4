//! # gatt-port-relay
//!
//! Relays Bluetooth Low Energy requests from a UI runtime that only speaks
//! through asynchronous message ports.
//!
//! The UI can ask for a nearby peripheral advertising a service, write bytes
//! to one of its characteristics, and disconnect it. It never touches the
//! platform pairing API: the [`ConnectionRelay`] does that through a
//! [`BluetoothHost`], and the [`port`] module turns its results into
//! outbound messages.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gatt_port_relay::{BtleplugHost, ConnectionRelay, HostConfig, Result};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let host = BtleplugHost::new(HostConfig::default()).await?;
//!     let relay = Arc::new(ConnectionRelay::new(host));
//!
//!     // Newline-delimited JSON port messages over stdin/stdout
//!     gatt_port_relay::port::serve_json_lines(
//!         relay.clone(),
//!         tokio::io::stdin(),
//!         tokio::io::stdout(),
//!     )
//!     .await?;
//!
//!     relay.shutdown().await
//! }
//! ```
//!
//! ## Identifiers
//!
//! Services and characteristics are addressed by GATT name
//! (`"battery_service"`), by UUID string, or by assigned number with a `0x`
//! prefix (`"0x180F"`). See [`Identifier`].
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.

// Public modules
pub mod ble;
pub mod error;
pub mod port;
pub mod relay;

// Re-exports for convenience
pub use ble::host::{BluetoothHost, DeviceInfo, GattSession};
pub use ble::scanner::{BtleplugHost, DeviceSelection, HostConfig};
pub use ble::uuids::{normalize, Identifier};
pub use error::{Error, Result};
pub use port::{InboundMessage, OutboundMessage};
pub use relay::{ConnectionRelay, WriteRequest};
