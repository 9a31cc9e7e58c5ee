//! STOMP session over TCP or WebSocket
//!
//! `StompConnector` opens the socket, performs the CONNECT/CONNECTED
//! handshake and negotiates heart-beats. Each session then runs:
//! - a reader task that decodes raw bytes into frames,
//! - a pump task that hands MESSAGE/ERROR frames to `SessionEvents` in wire
//!   order and reports loss of the session (EOF, read error, missed
//!   heart-beats),
//! - a heart-beat task when the broker expects one from us.
//!
//! Writes go through a single async mutex, so frames never interleave.

use std::fmt::Display;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, Notify, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, trace, warn};
use tungstenite::client::IntoClientRequest;
use tungstenite::http::HeaderValue;
use tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

use crate::broker::message::InboundMessage;
use crate::transport::endpoint::{BrokerEndpoint, Heartbeat, Scheme};
use crate::transport::frame::{Command, Decoded, Frame, FrameDecoder};
use crate::transport::session::{Connector, Session, SessionEvents};
use crate::utils::BrokerError;

/// How long `close()` waits for the broker's RECEIPT to our DISCONNECT.
const CLOSE_RECEIPT_TIMEOUT: Duration = Duration::from_secs(2);

/// Missed heart-beat tolerance, as a multiple of the negotiated interval.
const HEARTBEAT_GRACE: u32 = 2;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Inbound = mpsc::UnboundedReceiver<Result<Decoded, BrokerError>>;

#[derive(Debug, Default, Clone)]
pub struct StompConnector;

impl StompConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for StompConnector {
    async fn connect(
        &self,
        endpoint: &BrokerEndpoint,
        events: Arc<dyn SessionEvents>,
    ) -> Result<Arc<dyn Session>, BrokerError> {
        let (mut writer, reader, mut inbound) = match endpoint.scheme {
            Scheme::Tcp => open_tcp(endpoint).await?,
            Scheme::Ws => open_ws(endpoint).await?,
        };

        let connected = match handshake(endpoint, &mut writer, &mut inbound).await {
            Ok(frame) => frame,
            Err(e) => {
                reader.abort();
                writer.shutdown().await;
                return Err(e);
            }
        };

        let server_heartbeat = connected
            .get("heart-beat")
            .map(Heartbeat::parse)
            .unwrap_or_default();
        let (send_every, expect_within) = endpoint.heartbeat.negotiate(server_heartbeat);

        info!(
            version = connected.get("version").unwrap_or("1.0"),
            server = connected.get("server").unwrap_or("unknown"),
            "Connected to broker at {endpoint}"
        );

        let shared = Arc::new(Shared {
            connected: AtomicBool::new(true),
            receipt: Notify::new(),
        });
        let writer = Arc::new(Mutex::new(writer));

        let mut tasks = vec![reader];
        tasks.push(tokio::spawn(pump(
            shared.clone(),
            inbound,
            events,
            expect_within,
        )));
        if let Some(every) = send_every {
            tasks.push(tokio::spawn(send_heartbeats(
                shared.clone(),
                writer.clone(),
                every,
            )));
        }

        Ok(Arc::new(StompSession {
            shared,
            writer,
            tasks: std::sync::Mutex::new(tasks),
        }))
    }
}

struct Shared {
    connected: AtomicBool,
    receipt: Notify,
}

pub struct StompSession {
    shared: Arc<Shared>,
    writer: Arc<Mutex<Writer>>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl StompSession {
    fn abort_tasks(&self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}

#[async_trait]
impl Session for StompSession {
    async fn transmit(&self, frame: Frame) -> Result<(), BrokerError> {
        if !self.is_connected() {
            return Err(BrokerError::NotConnected);
        }
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.write_bytes(frame.encode()).await {
            self.shared.connected.store(false, Ordering::SeqCst);
            return Err(e);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if !self.shared.connected.swap(false, Ordering::SeqCst) {
            self.abort_tasks();
            return Ok(());
        }

        let receipt_id = format!("disconnect-{}", Uuid::new_v4());
        let frame = Frame::new(Command::Disconnect).header("receipt", receipt_id);

        let mut writer = self.writer.lock().await;
        let sent = writer.write_bytes(frame.encode()).await;
        if sent.is_ok()
            && tokio::time::timeout(CLOSE_RECEIPT_TIMEOUT, self.shared.receipt.notified())
                .await
                .is_err()
        {
            debug!("Broker did not confirm DISCONNECT, closing anyway");
        }
        writer.shutdown().await;
        drop(writer);

        self.abort_tasks();
        sent
    }
}

impl Drop for StompSession {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}

enum Writer {
    Tcp(OwnedWriteHalf),
    Ws(SplitSink<WsStream, WsMessage>),
}

impl Writer {
    async fn write_bytes(&mut self, bytes: Vec<u8>) -> Result<(), BrokerError> {
        match self {
            Writer::Tcp(half) => {
                half.write_all(&bytes).await?;
                half.flush().await?;
            }
            Writer::Ws(sink) => {
                let message = match String::from_utf8(bytes) {
                    Ok(text) => WsMessage::Text(text.into()),
                    Err(raw) => WsMessage::Binary(raw.into_bytes().into()),
                };
                sink.send(message).await?;
            }
        }
        Ok(())
    }

    async fn shutdown(&mut self) {
        match self {
            Writer::Tcp(half) => {
                let _ = half.shutdown().await;
            }
            Writer::Ws(sink) => {
                let _ = sink.close().await;
            }
        }
    }
}

fn connection_error(endpoint: &BrokerEndpoint, reason: impl Display) -> BrokerError {
    BrokerError::Connection {
        endpoint: endpoint.to_string(),
        reason: reason.to_string(),
    }
}

async fn open_tcp(
    endpoint: &BrokerEndpoint,
) -> Result<(Writer, JoinHandle<()>, Inbound), BrokerError> {
    let stream = TcpStream::connect(endpoint.address())
        .await
        .map_err(|e| connection_error(endpoint, e))?;
    stream.set_nodelay(true)?;
    let (read, write) = stream.into_split();

    let (tx, rx) = mpsc::unbounded_channel();
    let reader = tokio::spawn(read_tcp(read, tx));
    Ok((Writer::Tcp(write), reader, rx))
}

async fn open_ws(
    endpoint: &BrokerEndpoint,
) -> Result<(Writer, JoinHandle<()>, Inbound), BrokerError> {
    let mut request = endpoint.ws_url().into_client_request()?;
    request
        .headers_mut()
        .insert("Sec-WebSocket-Protocol", HeaderValue::from_static("v12.stomp"));

    let (stream, _response) = connect_async(request)
        .await
        .map_err(|e| connection_error(endpoint, e))?;
    let (sink, mut stream) = stream.split();

    let (tx, rx) = mpsc::unbounded_channel();
    let reader = tokio::spawn(async move {
        let mut decoder = FrameDecoder::new();
        while let Some(message) = stream.next().await {
            match message {
                Ok(WsMessage::Text(text)) => decoder.extend(text.as_bytes()),
                Ok(WsMessage::Binary(bytes)) => decoder.extend(&bytes),
                Ok(WsMessage::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    let _ = tx.send(Err(e.into()));
                    break;
                }
            }
            if !forward_decoded(&mut decoder, &tx) {
                break;
            }
        }
    });
    Ok((Writer::Ws(sink), reader, rx))
}

async fn read_tcp(mut read: OwnedReadHalf, tx: mpsc::UnboundedSender<Result<Decoded, BrokerError>>) {
    let mut decoder = FrameDecoder::new();
    let mut chunk = vec![0u8; 8 * 1024];
    loop {
        match read.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                decoder.extend(&chunk[..n]);
                if !forward_decoded(&mut decoder, &tx) {
                    break;
                }
            }
            Err(e) => {
                let _ = tx.send(Err(e.into()));
                break;
            }
        }
    }
}

/// Push every complete unit to the pump. Returns false when reading should stop.
fn forward_decoded(
    decoder: &mut FrameDecoder,
    tx: &mpsc::UnboundedSender<Result<Decoded, BrokerError>>,
) -> bool {
    loop {
        match decoder.next_frame() {
            Ok(Some(decoded)) => {
                if tx.send(Ok(decoded)).is_err() {
                    return false;
                }
            }
            Ok(None) => return true,
            Err(e) => {
                let _ = tx.send(Err(e.into()));
                return false;
            }
        }
    }
}

async fn handshake(
    endpoint: &BrokerEndpoint,
    writer: &mut Writer,
    inbound: &mut Inbound,
) -> Result<Frame, BrokerError> {
    let connect = Frame::new(Command::Connect)
        .header("accept-version", "1.2")
        .header("host", endpoint.vhost.as_str())
        .header("login", endpoint.username.as_str())
        .header("passcode", endpoint.password.as_str())
        .header("heart-beat", endpoint.heartbeat.to_string());
    writer
        .write_bytes(connect.encode())
        .await
        .map_err(|e| connection_error(endpoint, e))?;

    let reply = loop {
        match inbound.recv().await {
            Some(Ok(Decoded::Heartbeat)) => continue,
            Some(Ok(Decoded::Frame(frame))) => break frame,
            Some(Err(e)) => return Err(connection_error(endpoint, e)),
            None => {
                return Err(connection_error(
                    endpoint,
                    "connection closed during handshake",
                ));
            }
        }
    };

    match reply.command {
        Command::Connected => Ok(reply),
        Command::Error => Err(BrokerError::Remote(error_text(&reply))),
        other => Err(connection_error(
            endpoint,
            format!("expected CONNECTED, got {other}"),
        )),
    }
}

fn error_text(frame: &Frame) -> String {
    frame
        .get("message")
        .map(str::to_string)
        .unwrap_or_else(|| String::from_utf8_lossy(&frame.body).into_owned())
}

async fn pump(
    shared: Arc<Shared>,
    mut inbound: Inbound,
    events: Arc<dyn SessionEvents>,
    expect_within: Option<Duration>,
) {
    loop {
        let next = match expect_within {
            Some(window) => {
                let window = window * HEARTBEAT_GRACE;
                match tokio::time::timeout(window, inbound.recv()).await {
                    Ok(next) => next,
                    Err(_) => {
                        warn!("No data from broker within {window:?}, dropping session");
                        break;
                    }
                }
            }
            None => inbound.recv().await,
        };

        match next {
            None => break,
            Some(Err(e)) => {
                error!("Broker session read failed: {e}");
                break;
            }
            Some(Ok(Decoded::Heartbeat)) => trace!("heart-beat from broker"),
            Some(Ok(Decoded::Frame(frame))) => match frame.command {
                Command::Message => match InboundMessage::from_frame(frame) {
                    Ok(message) => events.on_message(message).await,
                    Err(e) => warn!("Discarding MESSAGE frame: {e}"),
                },
                Command::Error => events.on_error(&error_text(&frame)),
                Command::Receipt => shared.receipt.notify_one(),
                other => debug!("Ignoring unexpected {other} frame"),
            },
        }
    }

    shared.connected.store(false, Ordering::SeqCst);
    events.on_disconnected();
}

async fn send_heartbeats(shared: Arc<Shared>, writer: Arc<Mutex<Writer>>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if !shared.connected.load(Ordering::SeqCst) {
            break;
        }
        let mut writer = writer.lock().await;
        if let Err(e) = writer.write_bytes(b"\n".to_vec()).await {
            warn!("Heart-beat write failed: {e}");
            shared.connected.store(false, Ordering::SeqCst);
            break;
        }
    }
}
