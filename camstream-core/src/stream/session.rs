//! Session controller.
//!
//! Binds one capture source, the backpressure gate, the encoder and one
//! transport channel for the lifetime of a single session:
//!
//! 1. [`start`](SessionController::start) opens the channel.
//! 2. [`on_frame`](SessionController::on_frame) admits at most one frame
//!    at a time into encode + send.
//! 3. A single event task consumes [`ChannelEvent`]s in arrival order.
//!    The first reply becomes the session result; any later message ends
//!    the session.
//!
//! Session state lives in a `watch` channel. Frame admission holds its
//! read lock while checking state and taking the gate, and transitions
//! hold its write lock, so a frame never sees half a transition.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::error::StreamError;
use crate::network::channel::{Channel, ChannelEvent, Connector};
use crate::network::envelope::{ANALYZER_ROLE, CLIENT_ROLE, Envelope};
use crate::state::SessionState;
use crate::stream::collaborators::{CaptureSource, PresentationSink};
use crate::stream::encoder::{DEFAULT_QUALITY, FrameEncoder};
use crate::stream::gate::{BackpressureGate, GatePermit};
use crate::stream::types::Frame;

// ── Constants ────────────────────────────────────────────────────

/// WebSocket status code for a normal close.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close reason once the peer has sent its termination message.
pub const SESSION_COMPLETE: &str = "session complete";

/// Close reason for an external stop request.
pub const SESSION_STOPPED: &str = "session stopped";

/// Status shown once the channel opens.
pub const CONNECTED_STATUS: &str = "Connected";

const EVENT_BUFFER: usize = 32;

// ── SessionConfig ────────────────────────────────────────────────

/// Configuration for [`SessionController`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Relay base URL (`ws://` or `wss://`).
    pub server_url: String,
    /// Role id this side sends as; also the relay path it registers under.
    pub client_id: String,
    /// Role id frames are addressed to.
    pub analyzer_id: String,
    /// JPEG quality, 0..=100.
    pub jpeg_quality: u8,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:8765".into(),
            client_id: CLIENT_ROLE.into(),
            analyzer_id: ANALYZER_ROLE.into(),
            jpeg_quality: DEFAULT_QUALITY,
        }
    }
}

impl SessionConfig {
    /// The URL the channel connects to: `<server_url>/<client_id>`.
    pub fn endpoint(&self) -> String {
        format!("{}/{}", self.server_url.trim_end_matches('/'), self.client_id)
    }

    pub fn validate(&self) -> Result<(), StreamError> {
        if !(self.server_url.starts_with("ws://") || self.server_url.starts_with("wss://")) {
            return Err(StreamError::InvalidConfig(format!(
                "server url must be ws:// or wss://, got {:?}",
                self.server_url
            )));
        }
        for (name, id) in [("client id", &self.client_id), ("analyzer id", &self.analyzer_id)] {
            if id.is_empty() || id.contains('/') {
                return Err(StreamError::InvalidConfig(format!(
                    "{name} must be non-empty and contain no '/', got {id:?}"
                )));
            }
        }
        Ok(())
    }
}

// ── Stats & dispositions ─────────────────────────────────────────

/// Per-session frame counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Frames handed to `on_frame`.
    pub frames_offered: u64,
    /// Frames delivered to the peer while the session was live.
    pub frames_sent: u64,
    /// Frames refused at admission (gate busy or not streaming).
    pub frames_dropped: u64,
    pub encode_errors: u64,
    pub send_errors: u64,
}

#[derive(Debug, Default)]
struct Counters {
    offered: AtomicU64,
    sent: AtomicU64,
    dropped: AtomicU64,
    encode_errors: AtomicU64,
    send_errors: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SessionStats {
        SessionStats {
            frames_offered: self.offered.load(Ordering::Relaxed),
            frames_sent: self.sent.load(Ordering::Relaxed),
            frames_dropped: self.dropped.load(Ordering::Relaxed),
            encode_errors: self.encode_errors.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
        }
    }
}

/// Why a frame was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The session was not streaming.
    NotStreaming(SessionState),
    /// Another frame holds the gate.
    GateBusy,
}

/// What happened to a frame passed to [`SessionController::on_frame`].
#[derive(Debug)]
pub enum FrameDisposition {
    /// The frame holds the gate; the handle resolves when its encode and
    /// send have finished.
    Admitted(JoinHandle<()>),
    /// The frame was released without being encoded.
    Dropped(DropReason),
}

impl FrameDisposition {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted(_))
    }
}

// ── SessionController ────────────────────────────────────────────

/// One streaming session. Cheap to clone; clones share the session.
///
/// A controller runs exactly one session. Once it reaches `Closed` or
/// `Failed`, start a new session with a new controller.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

struct Inner {
    config: SessionConfig,
    state: watch::Sender<SessionState>,
    gate: BackpressureGate,
    encoder: Arc<FrameEncoder>,
    connector: Arc<dyn Connector>,
    channel: Mutex<Option<Arc<dyn Channel>>>,
    capture: Arc<dyn CaptureSource>,
    sink: Arc<dyn PresentationSink>,
    result: OnceLock<String>,
    torn_down: AtomicBool,
    shutdown: CancellationToken,
    counters: Counters,
    runtime: Handle,
}

impl SessionController {
    /// Create an idle session.
    ///
    /// Must be called from within a Tokio runtime; frames delivered later
    /// from any thread are processed on that runtime.
    pub fn new(
        config: SessionConfig,
        connector: Arc<dyn Connector>,
        capture: Arc<dyn CaptureSource>,
        sink: Arc<dyn PresentationSink>,
    ) -> Result<Self, StreamError> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|e| StreamError::NoRuntime(e.to_string()))?;
        let (state, _) = watch::channel(SessionState::Idle);

        Ok(Self {
            inner: Arc::new(Inner {
                encoder: Arc::new(FrameEncoder::new(config.jpeg_quality)),
                config,
                state,
                gate: BackpressureGate::new(),
                connector,
                channel: Mutex::new(None),
                capture,
                sink,
                result: OnceLock::new(),
                torn_down: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
                counters: Counters::default(),
                runtime,
            }),
        })
    }

    /// `Idle → Connecting`: open the transport channel and start
    /// consuming its events.
    pub fn start(&self) -> Result<(), StreamError> {
        let inner = &self.inner;
        inner.transition(SessionState::begin_connect)?;

        let endpoint = inner.config.endpoint();
        info!(%endpoint, "starting session");

        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let channel = {
            let _guard = inner.runtime.enter();
            inner.connector.connect(&endpoint, events_tx)
        };

        {
            let mut slot = inner.channel_slot();
            if inner.torn_down.load(Ordering::SeqCst) {
                // Stopped while connecting; teardown already ran.
                drop(slot);
                channel.close(NORMAL_CLOSURE, SESSION_STOPPED);
                return Ok(());
            }
            *slot = Some(channel);
        }

        inner.runtime.spawn(Arc::clone(inner).run_events(events_rx));
        Ok(())
    }

    /// Offer one captured frame. Never blocks.
    ///
    /// The frame is admitted only while streaming and only if no other
    /// frame is in flight; otherwise it is released on the spot.
    pub fn on_frame(&self, frame: Frame) -> FrameDisposition {
        let inner = &self.inner;
        Counters::bump(&inner.counters.offered);

        let admitted = {
            let state = inner.state.borrow();
            if state.accepts_frames() {
                inner.gate.try_acquire().ok_or(DropReason::GateBusy)
            } else {
                Err(DropReason::NotStreaming(*state))
            }
        };

        match admitted {
            Ok(permit) => {
                let task = Arc::clone(inner).process_frame(frame, permit);
                FrameDisposition::Admitted(inner.runtime.spawn(task))
            }
            Err(reason) => {
                Counters::bump(&inner.counters.dropped);
                trace!(?reason, "frame dropped");
                drop(frame);
                FrameDisposition::Dropped(reason)
            }
        }
    }

    /// Stop the session from outside. Safe to call any number of times
    /// and concurrently with everything else.
    pub fn shutdown(&self) {
        if self.inner.transition(SessionState::stop).is_ok() {
            info!("session stopped");
        }
        self.inner.teardown(SESSION_STOPPED);
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    /// Watch state changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Resolve once the session is `Closed` or `Failed`.
    pub async fn wait_terminal(&self) -> SessionState {
        let mut rx = self.subscribe();
        let reached = rx.wait_for(SessionState::is_terminal).await.map(|s| *s);
        reached.unwrap_or_else(|_| self.state())
    }

    /// The peer's first reply, once it has arrived.
    pub fn result(&self) -> Option<String> {
        self.inner.result.get().cloned()
    }

    pub fn stats(&self) -> SessionStats {
        self.inner.counters.snapshot()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }
}

// ── Internal ─────────────────────────────────────────────────────

impl Inner {
    /// Apply a transition under the state write lock.
    fn transition(
        &self,
        step: impl FnOnce(&mut SessionState) -> Result<(), StreamError>,
    ) -> Result<(), StreamError> {
        let mut outcome = Ok(());
        self.state.send_if_modified(|state| match step(state) {
            Ok(()) => true,
            Err(e) => {
                outcome = Err(e);
                false
            }
        });
        outcome
    }

    fn accepts_frames(&self) -> bool {
        self.state.borrow().accepts_frames()
    }

    fn channel_slot(&self) -> MutexGuard<'_, Option<Arc<dyn Channel>>> {
        self.channel.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_channel(&self) -> Option<Arc<dyn Channel>> {
        self.channel_slot().clone()
    }

    /// Encode then send one admitted frame. The gate frees when `_permit`
    /// drops at the end.
    async fn process_frame(self: Arc<Self>, frame: Frame, _permit: GatePermit) {
        let encoder = Arc::clone(&self.encoder);
        let encoded = tokio::task::spawn_blocking(move || {
            let result = encoder.encode(&frame);
            frame.release();
            result
        })
        .await;

        let image = match encoded {
            Ok(Ok(image)) => image,
            Ok(Err(e)) => {
                Counters::bump(&self.counters.encode_errors);
                warn!("dropping frame: {e}");
                return;
            }
            Err(e) => {
                Counters::bump(&self.counters.encode_errors);
                error!("encode task failed: {e}");
                return;
            }
        };

        if !self.accepts_frames() {
            debug!("session ended during encode; discarding frame");
            return;
        }

        let envelope = Envelope::image(&self.config.client_id, &self.config.analyzer_id, &image);
        let text = match envelope.to_json() {
            Ok(text) => text,
            Err(e) => {
                warn!("dropping frame: {e}");
                return;
            }
        };

        let Some(channel) = self.current_channel() else {
            debug!("channel already released; discarding frame");
            return;
        };

        match channel.send(text).await {
            Ok(()) if self.accepts_frames() => {
                Counters::bump(&self.counters.sent);
                trace!(bytes = image.len(), "frame sent");
            }
            Ok(()) => debug!("session ended during send; discarding result"),
            Err(e) => {
                Counters::bump(&self.counters.send_errors);
                warn!("frame send failed: {e}");
            }
        }
    }

    /// The single serialized path for channel events.
    async fn run_events(self: Arc<Self>, mut events: mpsc::Receiver<ChannelEvent>) {
        loop {
            let event = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                event = events.recv() => event,
            };

            match event {
                Some(event) => self.handle_event(event),
                None => {
                    self.fail("Connection error: transport went away");
                    break;
                }
            }

            if self.state.borrow().is_terminal() {
                break;
            }
        }
        debug!("session event loop finished");
    }

    fn handle_event(&self, event: ChannelEvent) {
        match event {
            ChannelEvent::Opened => match self.transition(SessionState::open) {
                Ok(()) => {
                    info!("channel open; streaming");
                    self.sink.show(CONNECTED_STATUS);
                }
                Err(e) => debug!("ignoring open: {e}"),
            },
            ChannelEvent::Message(text) => self.on_inbound(text),
            ChannelEvent::Closed { code, reason } => {
                self.fail(&format!("Connection closed by peer ({code} {reason})"));
            }
            ChannelEvent::Failed(e) => self.fail(&format!("Connection error: {e}")),
        }
    }

    /// First reply while streaming is the result; any message after it
    /// ends the session without being inspected.
    fn on_inbound(&self, text: String) {
        let mut reply = None;
        let mut terminate = false;

        self.state.send_if_modified(|state| match *state {
            SessionState::Streaming => match Envelope::from_json(&text) {
                Ok(envelope) => {
                    reply = Some(envelope.into_data());
                    state.record_reply().is_ok()
                }
                Err(e) => {
                    warn!("ignoring unparseable reply: {e}");
                    false
                }
            },
            SessionState::AwaitingTermination => {
                terminate = state.complete().is_ok();
                terminate
            }
            other => {
                debug!(state = %other, "ignoring inbound message");
                false
            }
        });

        if let Some(result) = reply {
            info!("session result received");
            self.sink.show(&result);
            let _ = self.result.set(result);
        }

        if terminate {
            info!("termination message received; closing session");
            self.teardown(SESSION_COMPLETE);
        }
    }

    /// Move to `Failed` if still live, surface `reason`, release resources.
    fn fail(&self, reason: &str) {
        if let Err(e) = self.transition(SessionState::fail) {
            debug!("not failing session: {e}");
            return;
        }
        error!("session failed: {reason}");
        self.sink.show(reason);
        self.teardown(reason);
    }

    /// Close the channel and unbind capture. Runs once per session.
    fn teardown(&self, reason: &str) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.cancel();

        let channel = self.channel_slot().take();
        if let Some(channel) = channel {
            channel.close(NORMAL_CLOSURE, reason);
        }
        self.capture.unbind();
        debug!(reason, "session resources released");
    }
}

// ── Tests ────────────────────────────────────────────────────────
