//! # camstream-core
//!
//! Core library for streaming camera frames to a remote analyzer.
//!
//! This crate contains:
//! - **Stream**: `Frame`, `BackpressureGate`, `FrameEncoder` and the
//!   `SessionController` that ties capture, encoding and transport together
//! - **State**: the `SessionState` lifecycle machine
//! - **Network**: the JSON `Envelope`, `WebSocketChannel` and the
//!   routing `RelayServer`
//! - **Error**: `StreamError`, `EncodeError` and `SendError`, typed with `thiserror`

pub mod error;
pub mod network;
pub mod state;
pub mod stream;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use error::{EncodeError, SendError, StreamError};
pub use network::{
    ANALYZER_ROLE, CLIENT_ROLE, Channel, ChannelEvent, Connector, Envelope, RelayServer,
    WebSocketChannel, WebSocketConnector,
};
pub use state::SessionState;
pub use stream::{
    BackpressureGate, CaptureSource, DropReason, EncodedImage, Frame, FrameDisposition,
    FrameEncoder, PixelFormat, Plane, PresentationSink, SessionConfig, SessionController,
    SessionStats,
};
