//! Message-port adapter.
//!
//! The UI runtime sends and receives JSON values over named ports. Inbound
//! messages are decoded into [`InboundMessage`], handed to the relay, and the
//! result (if any) is sent back as an [`OutboundMessage`]:
//!
//! ```json
//! {"port": "requestDevice", "payload": "heart_rate"}
//! {"port": "writeValue", "payload": {"device": "hrm-1", "service": "0x180d", "characteristic": "0x2a39", "value": [1]}}
//! {"port": "disconnect", "payload": "hrm-1"}
//!
//! {"port": "devices", "payload": {"id": "hrm-1", "name": "Polar H10"}}
//! {"port": "error", "payload": "Device hrm-1 not found!"}
//! ```

use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::ble::host::{BluetoothHost, DeviceInfo};
use crate::error::{Error, Result};
use crate::relay::{ConnectionRelay, WriteRequest};

/// Buffer size of the channels between transport and relay.
pub const PORT_CHANNEL_CAPACITY: usize = 64;

/// Messages the UI sends to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "port", content = "payload", rename_all = "camelCase")]
pub enum InboundMessage {
    /// Pick and connect a device advertising the given service.
    RequestDevice(Option<String>),
    /// Write bytes to a characteristic.
    WriteValue(WriteParams),
    /// Disconnect a device by id.
    Disconnect(String),
}

impl InboundMessage {
    /// Name of the port this message arrived on.
    pub fn port(&self) -> &'static str {
        match self {
            Self::RequestDevice(_) => "requestDevice",
            Self::WriteValue(_) => "writeValue",
            Self::Disconnect(_) => "disconnect",
        }
    }
}

/// Payload of the `writeValue` port.
///
/// Values arrive as plain integers and are range-checked before any host
/// call is made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteParams {
    /// Device id.
    pub device: String,
    /// Service identifier.
    pub service: String,
    /// Characteristic identifier.
    pub characteristic: String,
    /// Byte values, each expected in 0..=255.
    pub value: Vec<i64>,
}

impl TryFrom<WriteParams> for WriteRequest {
    type Error = Error;

    fn try_from(params: WriteParams) -> Result<Self> {
        let value = params
            .value
            .iter()
            .enumerate()
            .map(|(i, v)| {
                u8::try_from(*v).map_err(|_| Error::InvalidParameter {
                    name: format!("value[{}]", i),
                    value: v.to_string(),
                })
            })
            .collect::<Result<Vec<u8>>>()?;

        Ok(Self {
            device: params.device,
            service: params.service,
            characteristic: params.characteristic,
            value: Bytes::from(value),
        })
    }
}

/// Messages the relay sends to the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "port", content = "payload", rename_all = "camelCase")]
pub enum OutboundMessage {
    /// A device was picked and connected.
    Devices(DeviceInfo),
    /// An operation failed.
    Error(String),
}

impl From<Error> for OutboundMessage {
    fn from(err: Error) -> Self {
        Self::Error(err.to_string())
    }
}

/// Apply the connection-table step of `message` now and return the rest.
///
/// Writes look up their session and disconnects remove theirs before this
/// returns, so table effects follow message order even when the returned
/// futures run concurrently. The future resolves to the outbound message to
/// emit, if any.
pub fn dispatch<H>(
    relay: &Arc<ConnectionRelay<H>>,
    message: InboundMessage,
) -> BoxFuture<'static, Option<OutboundMessage>>
where
    H: BluetoothHost + 'static,
{
    let port = message.port();

    let work: BoxFuture<'static, Result<Option<DeviceInfo>>> = match message {
        InboundMessage::RequestDevice(service) => {
            let relay = relay.clone();
            async move {
                let service = service.ok_or_else(|| Error::InvalidParameter {
                    name: "service".to_string(),
                    value: "null".to_string(),
                })?;
                relay.request_and_connect(&service).await.map(Some)
            }
            .boxed()
        }
        InboundMessage::WriteValue(params) => {
            let prepared = WriteRequest::try_from(params).and_then(|r| relay.prepare_write(r));
            async move {
                prepared?.send().await?;
                Ok::<Option<DeviceInfo>, Error>(None)
            }
            .boxed()
        }
        InboundMessage::Disconnect(device_id) => {
            let detached = relay.detach(&device_id);
            async move {
                detached?.close().await?;
                Ok::<Option<DeviceInfo>, Error>(None)
            }
            .boxed()
        }
    };

    async move {
        match work.await {
            Ok(device) => device.map(OutboundMessage::Devices),
            Err(e) => {
                warn!("{} failed: {}", port, e);
                Some(e.into())
            }
        }
    }
    .boxed()
}

/// Run one inbound message through the relay.
///
/// Returns the outbound message to emit, if any. Successful writes and
/// disconnects produce nothing.
pub async fn handle<H>(
    relay: &Arc<ConnectionRelay<H>>,
    message: InboundMessage,
) -> Option<OutboundMessage>
where
    H: BluetoothHost + 'static,
{
    dispatch(relay, message).await
}

/// Serve inbound messages until the channel closes.
///
/// Each message is [dispatched](dispatch) in arrival order and its host work
/// runs on its own task, so a pending device request does not hold up writes
/// or disconnects. Returns once every in-flight operation has settled.
pub async fn serve<H>(
    relay: Arc<ConnectionRelay<H>>,
    mut inbound: mpsc::Receiver<InboundMessage>,
    outbound: mpsc::Sender<OutboundMessage>,
) where
    H: BluetoothHost + 'static,
{
    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            message = inbound.recv() => {
                let Some(message) = message else {
                    break;
                };
                debug!("Inbound {} message", message.port());

                let pending = dispatch(&relay, message);
                let outbound = outbound.clone();
                tasks.spawn(async move {
                    if let Some(reply) = pending.await {
                        if outbound.send(reply).await.is_err() {
                            debug!("Outbound port closed, dropping reply");
                        }
                    }
                });
            }
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = joined {
                    error!("Port handler task failed: {}", e);
                }
            }
        }
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!("Port handler task failed: {}", e);
        }
    }

    info!("Inbound port closed");
}

/// Serve newline-delimited JSON messages from `reader`, replying on `writer`.
///
/// Lines that do not decode as an [`InboundMessage`], including lines that
/// are not valid UTF-8, are answered with an `error` message and skipped. Returns when `reader` reaches end of input and all
/// replies have been written.
pub async fn serve_json_lines<H, R, W>(
    relay: Arc<ConnectionRelay<H>>,
    reader: R,
    mut writer: W,
) -> Result<()>
where
    H: BluetoothHost + 'static,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (inbound_tx, inbound_rx) = mpsc::channel(PORT_CHANNEL_CAPACITY);
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<OutboundMessage>(PORT_CHANNEL_CAPACITY);

    let errors = outbound_tx.clone();
    let read_loop = async move {
        let mut reader = BufReader::new(reader);
        let mut line = Vec::new();

        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line).await? == 0 {
                break;
            }
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            match serde_json::from_slice::<InboundMessage>(&line) {
                Ok(message) => {
                    if inbound_tx.send(message).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let err = Error::from(e);
                    warn!("Dropping inbound line: {}", err);
                    if errors.send(err.into()).await.is_err() {
                        break;
                    }
                }
            }
        }

        Ok::<_, Error>(())
    };

    let write_loop = async move {
        while let Some(message) = outbound_rx.recv().await {
            let mut line = serde_json::to_vec(&message)?;
            line.push(b'\n');
            writer.write_all(&line).await?;
            writer.flush().await?;
        }

        Ok::<_, Error>(())
    };

    let (read_result, (), write_result) =
        tokio::join!(read_loop, serve(relay, inbound_rx, outbound_tx), write_loop);

    read_result?;
    write_result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::host::{GattSession, MockBluetoothHost, MockGattSession};
    use pretty_assertions::assert_eq;

    fn decode(json: &str) -> InboundMessage {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_decode_inbound() {
        assert_eq!(
            decode(r#"{"port":"requestDevice","payload":"0x180d"}"#),
            InboundMessage::RequestDevice(Some("0x180d".to_string()))
        );
        assert_eq!(
            decode(r#"{"port":"requestDevice","payload":null}"#),
            InboundMessage::RequestDevice(None)
        );
        assert_eq!(
            decode(r#"{"port":"disconnect","payload":"hrm-1"}"#),
            InboundMessage::Disconnect("hrm-1".to_string())
        );
        assert_eq!(
            decode(
                r#"{"port":"writeValue","payload":{"device":"hrm-1","service":"heart_rate","characteristic":"0x2a39","value":[1,255]}}"#
            ),
            InboundMessage::WriteValue(WriteParams {
                device: "hrm-1".to_string(),
                service: "heart_rate".to_string(),
                characteristic: "0x2a39".to_string(),
                value: vec![1, 255],
            })
        );
    }

    #[test]
    fn test_encode_outbound() {
        let devices = OutboundMessage::Devices(DeviceInfo {
            id: "hrm-1".to_string(),
            name: "Polar H10".to_string(),
        });
        assert_eq!(
            serde_json::to_string(&devices).unwrap(),
            r#"{"port":"devices","payload":{"id":"hrm-1","name":"Polar H10"}}"#
        );

        let error = OutboundMessage::from(Error::DeviceNotFound {
            id: "hrm-1".to_string(),
        });
        assert_eq!(
            serde_json::to_string(&error).unwrap(),
            r#"{"port":"error","payload":"Device hrm-1 not found!"}"#
        );
    }

    #[test]
    fn test_write_params_range_check() {
        let params = WriteParams {
            device: "d".to_string(),
            service: "s".to_string(),
            characteristic: "c".to_string(),
            value: vec![0, 255, 256],
        };

        let err = WriteRequest::try_from(params).unwrap_err();
        assert_eq!(err.to_string(), "Invalid parameter: value[2] = 256");
    }

    #[test]
    fn test_write_params_convert() {
        let params = WriteParams {
            device: "d".to_string(),
            service: "s".to_string(),
            characteristic: "c".to_string(),
            value: vec![0, 127, 255],
        };

        let request = WriteRequest::try_from(params).unwrap();
        assert_eq!(request.value, Bytes::from_static(&[0, 127, 255]));
    }

    #[tokio::test]
    async fn test_handle_request_device_emits_devices() {
        let mut host = MockBluetoothHost::new();
        host.expect_request_device().returning(|_| {
            Ok(DeviceInfo {
                id: "hrm-1".to_string(),
                name: String::new(),
            })
        });
        host.expect_connect()
            .returning(|_| Ok(Arc::new(MockGattSession::new()) as Arc<dyn GattSession>));
        let relay = Arc::new(ConnectionRelay::new(host));

        let reply = handle(&relay, InboundMessage::RequestDevice(Some("heart_rate".into()))).await;

        assert_eq!(
            reply,
            Some(OutboundMessage::Devices(DeviceInfo {
                id: "hrm-1".to_string(),
                name: String::new(),
            }))
        );
        assert!(relay.is_connected("hrm-1"));
    }

    #[tokio::test]
    async fn test_handle_null_service() {
        let mut host = MockBluetoothHost::new();
        host.expect_request_device().never();
        let relay = Arc::new(ConnectionRelay::new(host));

        let reply = handle(&relay, InboundMessage::RequestDevice(None)).await;

        assert_eq!(
            reply,
            Some(OutboundMessage::Error(
                "Invalid parameter: service = null".to_string()
            ))
        );
    }

    #[tokio::test]
    async fn test_handle_disconnect_unknown() {
        let relay = Arc::new(ConnectionRelay::new(MockBluetoothHost::new()));

        let reply = handle(&relay, InboundMessage::Disconnect("ghost".into())).await;

        assert_eq!(
            reply,
            Some(OutboundMessage::Error("Device ghost not found!".to_string()))
        );
    }

    #[tokio::test]
    async fn test_serve_stops_when_inbound_closes() {
        let relay = Arc::new(ConnectionRelay::new(MockBluetoothHost::new()));
        let (inbound_tx, inbound_rx) = mpsc::channel(4);
        let (outbound_tx, mut outbound_rx) = mpsc::channel(4);

        inbound_tx
            .send(InboundMessage::Disconnect("ghost".into()))
            .await
            .unwrap();
        drop(inbound_tx);

        serve(relay, inbound_rx, outbound_tx).await;

        assert_eq!(
            outbound_rx.recv().await,
            Some(OutboundMessage::Error("Device ghost not found!".to_string()))
        );
        assert_eq!(outbound_rx.recv().await, None);
    }

    fn monitor() -> DeviceInfo {
        DeviceInfo {
            id: "hrm-1".to_string(),
            name: "Polar H10".to_string(),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_serve_writes_before_following_disconnect() {
        for _ in 0..200 {
            let mut session = MockGattSession::new();
            session.expect_write_value().times(1).returning(|_, _, _| Ok(()));
            session.expect_disconnect().times(1).returning(|| Ok(()));
            let mut host = MockBluetoothHost::new();
            host.expect_request_device().returning(|_| Ok(monitor()));
            host.expect_connect()
                .return_once(move |_| Ok(Arc::new(session) as Arc<dyn GattSession>));
            let relay = Arc::new(ConnectionRelay::new(host));
            relay.request_and_connect("heart_rate").await.unwrap();

            let (inbound_tx, inbound_rx) = mpsc::channel(4);
            let (outbound_tx, mut outbound_rx) = mpsc::channel(4);
            inbound_tx
                .send(InboundMessage::WriteValue(WriteParams {
                    device: "hrm-1".to_string(),
                    service: "heart_rate".to_string(),
                    characteristic: "0x2a39".to_string(),
                    value: vec![1],
                }))
                .await
                .unwrap();
            inbound_tx
                .send(InboundMessage::Disconnect("hrm-1".into()))
                .await
                .unwrap();
            drop(inbound_tx);

            serve(relay.clone(), inbound_rx, outbound_tx).await;

            assert_eq!(outbound_rx.recv().await, None);
            assert!(!relay.is_connected("hrm-1"));
        }
    }

    #[tokio::test]
    async fn test_dispatch_detaches_before_polling() {
        let mut session = MockGattSession::new();
        session.expect_disconnect().times(1).returning(|| Ok(()));
        let mut host = MockBluetoothHost::new();
        host.expect_request_device().returning(|_| Ok(monitor()));
        host.expect_connect()
            .return_once(move |_| Ok(Arc::new(session) as Arc<dyn GattSession>));
        let relay = Arc::new(ConnectionRelay::new(host));
        relay.request_and_connect("heart_rate").await.unwrap();

        let pending = dispatch(&relay, InboundMessage::Disconnect("hrm-1".into()));

        assert!(!relay.is_connected("hrm-1"));
        assert_eq!(pending.await, None);
    }
}
