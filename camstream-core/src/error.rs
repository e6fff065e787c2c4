//! Domain-specific error types for the camstream pipeline.
//!
//! Session-level operations return `Result<T, StreamError>`. Frame-scoped
//! failures have their own narrower types ([`EncodeError`], [`SendError`])
//! so callers can drop a frame without touching session state.

use thiserror::Error;

use crate::state::SessionState;
use crate::stream::types::PixelFormat;

/// The canonical error type for the camstream pipeline.
#[derive(Debug, Error)]
pub enum StreamError {
    // ── Session Errors ───────────────────────────────────────────
    /// A session transition was requested from a state that does not allow it.
    #[error("cannot {action} while {state}")]
    InvalidTransition {
        state: SessionState,
        action: &'static str,
    },

    /// The controller was created outside a Tokio runtime.
    #[error("no tokio runtime available: {0}")]
    NoRuntime(String),

    /// Configuration values were rejected.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Frame Errors ─────────────────────────────────────────────
    /// A frame could not be encoded.
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),

    /// A message could not be handed to the transport.
    #[error("send error: {0}")]
    Send(#[from] SendError),

    // ── Wire Errors ──────────────────────────────────────────────
    /// Envelope JSON could not be produced or parsed.
    #[error("envelope error: {0}")]
    Envelope(#[from] serde_json::Error),

    /// The WebSocket layer reported an error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The TCP/IO layer reported an error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── EncodeError ──────────────────────────────────────────────────

/// Why a single frame could not be turned into an image.
///
/// Always non-fatal: the caller drops the frame and keeps streaming.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("invalid frame dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("expected {expected} planes, got {actual}")]
    PlaneCount { expected: usize, actual: usize },

    /// A plane buffer is shorter than its strides and the frame size require.
    #[error("{plane} plane too short: {len} bytes (need {required})")]
    PlaneTooShort {
        plane: &'static str,
        len: usize,
        required: usize,
    },

    #[error("invalid {plane} plane stride: row {row_stride}, pixel {pixel_stride}")]
    InvalidStride {
        plane: &'static str,
        row_stride: usize,
        pixel_stride: usize,
    },

    #[error("unsupported pixel format: {0:?}")]
    UnsupportedFormat(PixelFormat),

    /// The JPEG backend rejected the packed image.
    #[error("jpeg compression failed: {0}")]
    Jpeg(String),
}

impl From<image::ImageError> for EncodeError {
    fn from(e: image::ImageError) -> Self {
        EncodeError::Jpeg(e.to_string())
    }
}

// ── SendError ────────────────────────────────────────────────────

/// Failure to deliver one outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// The channel is still connecting or has already closed.
    #[error("channel is not open")]
    NotOpen,

    /// The socket write failed.
    #[error("transport failure: {0}")]
    Transport(String),
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for StreamError {
    fn from(s: String) -> Self {
        StreamError::Other(s)
    }
}

impl From<&str> for StreamError {
    fn from(s: &str) -> Self {
        StreamError::Other(s.to_string())
    }
}
