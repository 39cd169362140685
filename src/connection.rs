use crate::error::{NodelinkError, Result};
use crate::node::NodeConfig;
use crate::protocol::{self, IncomingMessage, OutgoingMessage};
use futures_util::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch, Notify};
use tokio::time::{interval, sleep, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

const MAX_BACKOFF: Duration = Duration::from_secs(60);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(45);
const SEND_QUEUE_DEPTH: usize = 64;
const SIGNAL_BUFFER: usize = 256;
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Lifecycle state of a node's control connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

/// Push notification from the connection task to the dispatcher
///
/// Delivered through a broadcast channel; a lagging consumer loses the
/// oldest undelivered signals (logged as a warning) rather than stalling
/// the read path. Player state self-corrects on the next `playerUpdate`.
#[derive(Debug, Clone)]
pub enum ConnectionSignal {
    /// Handshake completed, commands may flow
    Connected,
    /// A decoded inbound message
    Message(IncomingMessage),
    /// The transport went down; `by_remote` is false for heartbeat
    /// timeouts and explicit local closes
    Closed {
        code: Option<u16>,
        reason: String,
        by_remote: bool,
    },
}

/// Bounded FIFO of encoded frames awaiting the single writer
struct SendQueue {
    frames: Mutex<VecDeque<String>>,
    notify: Notify,
}

impl SendQueue {
    fn new() -> Self {
        Self { frames: Mutex::new(VecDeque::new()), notify: Notify::new() }
    }

    /// Append a frame, evicting the oldest when the queue is full
    fn push(&self, frame: String, identifier: &str) {
        let mut frames = self.frames.lock().unwrap();
        if frames.len() >= SEND_QUEUE_DEPTH {
            frames.pop_front();
            tracing::warn!(node = identifier, "send queue full, dropping oldest command");
        }
        frames.push_back(frame);
        drop(frames);
        self.notify.notify_one();
    }

    async fn pop(&self) -> String {
        loop {
            if let Some(frame) = self.frames.lock().unwrap().pop_front() {
                return frame;
            }
            self.notify.notified().await;
        }
    }

    fn clear(&self) {
        self.frames.lock().unwrap().clear();
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.frames.lock().unwrap().len()
    }
}

/// How a live connection ended
struct CloseInfo {
    code: Option<u16>,
    reason: String,
    by_remote: bool,
}

impl CloseInfo {
    fn local(reason: &str) -> Self {
        Self { code: None, reason: reason.to_string(), by_remote: false }
    }

    fn remote(reason: String) -> Self {
        Self { code: None, reason, by_remote: true }
    }
}

/// One persistent control connection to one audio node
///
/// A single background task owns the transport and runs the read loop,
/// heartbeat, and write-queue drain; commands from any task are enqueued
/// through [`send`] and written one at a time in order.
///
/// [`send`]: Connection::send
pub struct Connection {
    config: NodeConfig,
    state_tx: watch::Sender<ConnectionState>,
    signal_tx: broadcast::Sender<ConnectionSignal>,
    shutdown_tx: watch::Sender<bool>,
    queue: Arc<SendQueue>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Connection {
    /// Spawn the connection supervisor; it connects, reconnects with
    /// capped exponential backoff and jitter, and keeps retrying until
    /// [`close`] is called.
    ///
    /// [`close`]: Connection::close
    pub fn spawn(config: NodeConfig) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (signal_tx, _) = broadcast::channel(SIGNAL_BUFFER);
        let (shutdown_tx, _) = watch::channel(false);

        let connection = Arc::new(Self {
            config,
            state_tx,
            signal_tx,
            shutdown_tx,
            queue: Arc::new(SendQueue::new()),
            task: Mutex::new(None),
        });

        let handle = tokio::spawn(supervise(connection.clone()));
        *connection.task.lock().unwrap() = Some(handle);

        connection
    }

    pub fn identifier(&self) -> &str {
        &self.config.identifier
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Observe state transitions
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Subscribe to inbound messages and lifecycle signals
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionSignal> {
        self.signal_tx.subscribe()
    }

    /// Latches true once [`close`] has been called
    ///
    /// [`close`]: Connection::close
    pub(crate) fn watch_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Validate, encode, and enqueue a command
    ///
    /// Fails fast with [`NodelinkError::NodeUnavailable`] when the
    /// transport is not connected; never blocks.
    pub fn send(&self, message: &OutgoingMessage) -> Result<()> {
        let frame = protocol::encode(message)?;

        if !self.is_connected() {
            return Err(NodelinkError::NodeUnavailable {
                identifier: self.config.identifier.clone(),
            });
        }

        tracing::debug!(node = self.config.identifier, frame, "queueing command");
        self.queue.push(frame, &self.config.identifier);
        Ok(())
    }

    /// Close the connection without scheduling a reconnect
    pub async fn close(&self) {
        self.set_state(ConnectionState::Closing);
        let _ = self.shutdown_tx.send(true);

        let handle = self.task.lock().unwrap().take();
        if let Some(handle) = handle {
            if timeout(CLOSE_GRACE, handle).await.is_err() {
                tracing::warn!(node = self.config.identifier, "connection task did not stop in time");
            }
        }

        self.set_state(ConnectionState::Disconnected);
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }
}

/// Connect/reconnect loop; owns the transport for the connection's lifetime
async fn supervise(connection: Arc<Connection>) {
    let mut shutdown_rx = connection.shutdown_tx.subscribe();
    let mut backoff = Duration::ZERO;

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        if !backoff.is_zero() {
            let delay = jittered(backoff);
            tracing::info!(
                node = connection.config.identifier,
                delay_ms = delay.as_millis() as u64,
                "reconnecting after backoff"
            );
            tokio::select! {
                _ = sleep(delay) => {}
                _ = shutdown_rx.changed() => break,
            }
        }

        connection.set_state(ConnectionState::Connecting);

        match establish(&connection.config).await {
            Ok(stream) => {
                backoff = Duration::ZERO;
                connection.set_state(ConnectionState::Connected);
                tracing::info!(node = connection.config.identifier, "connected");
                let _ = connection.signal_tx.send(ConnectionSignal::Connected);

                let close = drive(stream, &connection, &mut shutdown_rx).await;
                connection.queue.clear();

                let closing = *shutdown_rx.borrow();
                tracing::warn!(
                    node = connection.config.identifier,
                    reason = close.reason,
                    by_remote = close.by_remote,
                    "connection lost"
                );
                // Signal before the state flips so subscribers that also
                // watch the state see the real close details first.
                let _ = connection.signal_tx.send(ConnectionSignal::Closed {
                    code: close.code,
                    reason: close.reason,
                    by_remote: close.by_remote,
                });
                connection.set_state(ConnectionState::Disconnected);

                if closing {
                    break;
                }
                backoff = Duration::from_secs(1);
            }
            Err(error) => {
                connection.set_state(ConnectionState::Disconnected);
                tracing::warn!(
                    node = connection.config.identifier,
                    error = %error,
                    "connect attempt failed"
                );
                backoff = next_backoff(backoff);
            }
        }
    }

    connection.set_state(ConnectionState::Disconnected);
}

fn next_backoff(current: Duration) -> Duration {
    if current.is_zero() {
        Duration::from_secs(1)
    } else {
        (current * 2).min(MAX_BACKOFF)
    }
}

/// Apply +/-25% jitter so a fleet of clients does not reconnect in lockstep
fn jittered(base: Duration) -> Duration {
    base.mul_f64(0.75 + rand::random::<f64>() * 0.5)
}

/// Perform the handshake, presenting the node's auth headers
async fn establish(config: &NodeConfig) -> Result<WebSocketStream<MaybeTlsStream<TcpStream>>> {
    let url = config.ws_url();
    tracing::debug!(node = config.identifier, url, "connecting");

    let mut request = url
        .into_client_request()
        .map_err(|error| NodelinkError::Handshake(error.to_string()))?;

    let headers = request.headers_mut();
    headers.insert(
        "Authorization",
        HeaderValue::from_str(&config.password)
            .map_err(|_| NodelinkError::Handshake("password is not a valid header value".to_string()))?,
    );
    headers.insert(
        "User-Id",
        HeaderValue::from_str(&config.user_id.to_string())
            .map_err(|_| NodelinkError::Handshake("invalid user id".to_string()))?,
    );
    headers.insert("Client-Name", HeaderValue::from_static("nodelink/0.1.0"));

    match connect_async(request).await {
        Ok((stream, _)) => Ok(stream),
        Err(WsError::Http(response)) if response.status() == StatusCode::UNAUTHORIZED => {
            Err(NodelinkError::Handshake("node rejected authorization".to_string()))
        }
        Err(error) => Err(error.into()),
    }
}

/// Run one live connection: read loop, write-queue drain, and heartbeat,
/// multiplexed on a single task so the transport has exactly one owner
async fn drive(
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    connection: &Connection,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> CloseInfo {
    let (mut write, mut read) = stream.split();

    let mut heartbeat = interval(HEARTBEAT_INTERVAL);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_pong = Instant::now();

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                let _ = write.send(Message::Close(None)).await;
                return CloseInfo::local("closed by client");
            }
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => match protocol::decode(&text) {
                    Ok(message) => {
                        let _ = connection.signal_tx.send(ConnectionSignal::Message(message));
                    }
                    Err(error) => {
                        tracing::warn!(
                            node = connection.config.identifier,
                            error = %error,
                            "dropping undecodable frame"
                        );
                    }
                },
                Some(Ok(Message::Ping(payload))) => {
                    if write.send(Message::Pong(payload)).await.is_err() {
                        return CloseInfo::local("write failed");
                    }
                }
                Some(Ok(Message::Pong(_))) => last_pong = Instant::now(),
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(frame) => (Some(u16::from(frame.code)), frame.reason.to_string()),
                        None => (None, "closed by node".to_string()),
                    };
                    return CloseInfo { code, reason, by_remote: true };
                }
                Some(Ok(_)) => {}
                Some(Err(error)) => return CloseInfo::remote(error.to_string()),
                None => return CloseInfo::remote("stream ended".to_string()),
            },
            frame = connection.queue.pop() => {
                if let Err(error) = write.send(Message::Text(frame)).await {
                    return CloseInfo::local(&format!("write failed: {error}"));
                }
            }
            _ = heartbeat.tick() => {
                if last_pong.elapsed() > HEARTBEAT_TIMEOUT {
                    return CloseInfo::local("heartbeat timeout");
                }
                if write.send(Message::Ping(Vec::new())).await.is_err() {
                    return CloseInfo::local("write failed");
                }
            }
        }
    }
}
