//! Relay port messages between stdin/stdout and a local Bluetooth adapter
//!
//! Run with: cargo run --example json_port
//!
//! Then type one JSON message per line, for example:
//!
//! {"port":"requestDevice","payload":"heart_rate"}
//! {"port":"writeValue","payload":{"device":"<id>","service":"heart_rate","characteristic":"heart_rate_control_point","value":[1]}}
//! {"port":"disconnect","payload":"<id>"}

use gatt_port_relay::{port, BtleplugHost, ConnectionRelay, DeviceSelection, HostConfig, Result};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout carries only port messages
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("gatt_port_relay=debug".parse().unwrap()),
        )
        .init();

    let config = HostConfig::default()
        .with_scan_timeout(Duration::from_secs(15))
        .with_selection(DeviceSelection::StrongestSignal);

    let host = BtleplugHost::new(config).await?;
    let relay = Arc::new(ConnectionRelay::new(host));

    port::serve_json_lines(relay.clone(), tokio::io::stdin(), tokio::io::stdout()).await?;

    relay.shutdown().await?;

    Ok(())
}
