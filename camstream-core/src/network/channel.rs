//! Persistent WebSocket transport channel.
//!
//! A channel owns one connection. A background I/O task performs the
//! handshake, writes outbound messages and turns everything the
//! connection does into [`ChannelEvent`]s on the owner's mpsc queue:
//!
//! ```text
//!   owner ──send(text)──► outbound mpsc ──► ┌─────────┐ ──► socket
//!   owner ──close(..)───► close signal ───► │ I/O task│
//!   owner ◄──ChannelEvent── events mpsc ◄── └─────────┘ ◄── socket
//! ```

use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::SendError;

// ── Constants ────────────────────────────────────────────────────

/// How long a locally initiated close waits for the peer's close frame.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// How long one outbound write may wait on a peer that is not reading.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Close code reported when the peer closes without a status.
const NO_STATUS: u16 = 1005;

/// Outbound messages waiting for the I/O task.
const OUTBOUND_BUFFER: usize = 4;

const CONNECTING: u8 = 0;
const OPEN: u8 = 1;
const CLOSED: u8 = 2;

// ── Events & traits ──────────────────────────────────────────────

/// Everything a channel reports to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The connection is established; `send` now works.
    Opened,
    /// One inbound text message.
    Message(String),
    /// The connection closed with a close handshake.
    Closed { code: u16, reason: String },
    /// The connection could not be established or broke without a
    /// close handshake.
    Failed(String),
}

/// Sender half of a channel's event queue.
pub type EventSender = mpsc::Sender<ChannelEvent>;

/// A live bidirectional connection.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Write one text message. Resolves once the message is on the
    /// socket; fails with [`SendError::NotOpen`] before open and after close.
    async fn send(&self, text: String) -> Result<(), SendError>;

    /// Close with a status code and reason. Only the first call has any
    /// effect.
    fn close(&self, code: u16, reason: &str);

    fn is_open(&self) -> bool;
}

/// Opens channels.
pub trait Connector: Send + Sync {
    /// Start connecting to `endpoint` and return the channel handle
    /// immediately. Progress arrives on `events`.
    ///
    /// Must be called from within a Tokio runtime.
    fn connect(&self, endpoint: &str, events: EventSender) -> Arc<dyn Channel>;
}

// ── WebSocketChannel ─────────────────────────────────────────────

#[derive(Debug, Default)]
struct Shared {
    state: AtomicU8,
    close_requested: AtomicBool,
    close_frame: OnceLock<(u16, String)>,
    close_signal: CancellationToken,
    bytes_sent: AtomicU64,
}

impl Shared {
    fn close_request(&self) -> (u16, String) {
        self.close_frame
            .get()
            .cloned()
            .unwrap_or((u16::from(CloseCode::Normal), String::new()))
    }
}

struct Outbound {
    text: String,
    ack: oneshot::Sender<Result<(), SendError>>,
}

/// [`Channel`] over a `tokio-tungstenite` WebSocket.
///
/// `ws://` endpoints always work; `wss://` needs the `tls` feature.
pub struct WebSocketChannel {
    endpoint: String,
    shared: Arc<Shared>,
    outbound: mpsc::Sender<Outbound>,
}

impl WebSocketChannel {
    /// Spawn the I/O task and return the handle. Must run inside a
    /// Tokio runtime.
    pub fn connect(endpoint: &str, events: EventSender) -> Arc<Self> {
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
        let shared = Arc::new(Shared::default());

        tokio::spawn(run_io(
            endpoint.to_string(),
            Arc::clone(&shared),
            outbound_rx,
            events,
        ));

        Arc::new(Self {
            endpoint: endpoint.to_string(),
            shared,
            outbound,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Total payload bytes written since the channel opened.
    pub fn bytes_sent(&self) -> u64 {
        self.shared.bytes_sent.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Channel for WebSocketChannel {
    async fn send(&self, text: String) -> Result<(), SendError> {
        if !self.is_open() {
            return Err(SendError::NotOpen);
        }

        let (ack, done) = oneshot::channel();
        self.outbound
            .send(Outbound { text, ack })
            .await
            .map_err(|_| SendError::NotOpen)?;

        // A dropped ack means the I/O task exited with the message queued.
        done.await.unwrap_or(Err(SendError::NotOpen))
    }

    fn close(&self, code: u16, reason: &str) {
        if self.shared.close_requested.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shared.close_frame.set((code, reason.to_string()));
        self.shared.state.store(CLOSED, Ordering::SeqCst);
        self.shared.close_signal.cancel();
    }

    fn is_open(&self) -> bool {
        self.shared.state.load(Ordering::SeqCst) == OPEN
    }
}

/// [`Connector`] producing [`WebSocketChannel`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl Connector for WebSocketConnector {
    fn connect(&self, endpoint: &str, events: EventSender) -> Arc<dyn Channel> {
        WebSocketChannel::connect(endpoint, events)
    }
}

// ── I/O task ─────────────────────────────────────────────────────

async fn run_io(
    endpoint: String,
    shared: Arc<Shared>,
    mut outbound: mpsc::Receiver<Outbound>,
    events: EventSender,
) {
    let connected = tokio::select! {
        result = connect_async(endpoint.as_str()) => result,
        _ = shared.close_signal.cancelled() => {
            debug!(%endpoint, "closed before the connection opened");
            let (code, reason) = shared.close_request();
            let _ = events.send(ChannelEvent::Closed { code, reason }).await;
            return;
        }
    };

    let ws = match connected {
        Ok((ws, _response)) => ws,
        Err(e) => {
            shared.state.store(CLOSED, Ordering::SeqCst);
            warn!(%endpoint, "connect failed: {e}");
            let _ = events.send(ChannelEvent::Failed(e.to_string())).await;
            return;
        }
    };

    // A close that raced the handshake leaves the state at CLOSED; the
    // loop below then performs the close handshake straight away.
    if shared
        .state
        .compare_exchange(CONNECTING, OPEN, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
    {
        info!(%endpoint, "connected");
        let _ = events.send(ChannelEvent::Opened).await;
    }

    let (mut sink, mut stream) = ws.split();
    let close_deadline = tokio::time::sleep(CLOSE_TIMEOUT);
    tokio::pin!(close_deadline);
    let mut closing = false;

    loop {
        tokio::select! {
            _ = shared.close_signal.cancelled(), if !closing => {
                closing = true;
                close_deadline
                    .as_mut()
                    .reset(tokio::time::Instant::now() + CLOSE_TIMEOUT);

                let (code, reason) = shared.close_request();
                debug!(code, %reason, "sending close frame");
                let frame = CloseFrame {
                    code: CloseCode::from(code),
                    reason: Cow::Owned(reason),
                };
                let delivered = tokio::time::timeout(
                    CLOSE_TIMEOUT,
                    sink.send(Message::Close(Some(frame))),
                )
                .await;
                let failure = match delivered {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) => Some(e.to_string()),
                    Err(_) => Some(format!("write stalled for {CLOSE_TIMEOUT:?}")),
                };
                if let Some(e) = failure {
                    debug!("close frame not delivered: {e}");
                    let (code, reason) = shared.close_request();
                    let _ = events.send(ChannelEvent::Closed { code, reason }).await;
                    break;
                }
            }

            cmd = outbound.recv(), if !closing => match cmd {
                Some(Outbound { text, ack }) => {
                    let len = text.len() as u64;
                    // A peer that stops reading stalls the write; a close
                    // request or SEND_TIMEOUT abandons it.
                    let result = tokio::select! {
                        written = tokio::time::timeout(SEND_TIMEOUT, sink.send(Message::Text(text))) => {
                            match written {
                                Ok(Ok(())) => Ok(()),
                                Ok(Err(e)) => Err(SendError::Transport(e.to_string())),
                                Err(_) => Err(SendError::Transport(format!(
                                    "write stalled for {SEND_TIMEOUT:?}"
                                ))),
                            }
                        }
                        _ = shared.close_signal.cancelled() => {
                            Err(SendError::Transport("channel closed during write".into()))
                        }
                    };
                    if let Err(e) = &result {
                        warn!(%endpoint, "outbound write abandoned: {e}");
                    }
                    if result.is_ok() {
                        shared.bytes_sent.fetch_add(len, Ordering::Relaxed);
                    }
                    let _ = ack.send(result);
                }
                None => {
                    // Every handle dropped without closing.
                    shared.state.store(CLOSED, Ordering::SeqCst);
                    let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await;
                    break;
                }
            },

            _ = &mut close_deadline, if closing => {
                warn!(%endpoint, "peer did not acknowledge close within {CLOSE_TIMEOUT:?}");
                let (code, reason) = shared.close_request();
                let _ = events.send(ChannelEvent::Closed { code, reason }).await;
                break;
            }

            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if !closing {
                        trace!(len = text.len(), "inbound message");
                        let _ = events.send(ChannelEvent::Message(text)).await;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    shared.state.store(CLOSED, Ordering::SeqCst);
                    let (code, reason) = if closing {
                        shared.close_request()
                    } else {
                        frame
                            .map(|f| (u16::from(f.code), f.reason.into_owned()))
                            .unwrap_or((NO_STATUS, String::new()))
                    };
                    // Flushes the close reply tungstenite queued.
                    let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await;
                    info!(%endpoint, code, %reason, "connection closed");
                    let _ = events.send(ChannelEvent::Closed { code, reason }).await;
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    shared.state.store(CLOSED, Ordering::SeqCst);
                    let event = if closing {
                        let (code, reason) = shared.close_request();
                        ChannelEvent::Closed { code, reason }
                    } else {
                        warn!(%endpoint, "connection lost: {e}");
                        ChannelEvent::Failed(e.to_string())
                    };
                    let _ = events.send(event).await;
                    break;
                }
                None => {
                    shared.state.store(CLOSED, Ordering::SeqCst);
                    let event = if closing {
                        let (code, reason) = shared.close_request();
                        ChannelEvent::Closed { code, reason }
                    } else {
                        ChannelEvent::Failed("connection reset by peer".into())
                    };
                    let _ = events.send(event).await;
                    break;
                }
            },
        }
    }

    debug!(%endpoint, "channel I/O task finished");
}

// ── Tests ────────────────────────────────────────────────────────
