//! Session lifecycle state machine.
//!
//! `SessionState` models one activation of the streaming pipeline with
//! validated transitions that return `Result` instead of panicking.

use std::fmt;

use crate::error::StreamError;

// ── SessionState ─────────────────────────────────────────────────

/// The current phase of a streaming session.
///
/// ```text
///  Idle ──► Connecting ──► Streaming ──► AwaitingTermination ──► Closed
///               │              │                  │
///               ▼              ▼                  ▼
///             Failed ◄─────────┴──────────────────┘
/// ```
///
/// `Closed` is also reachable from every non-terminal state through an
/// external stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    /// Created, not started.
    #[default]
    Idle,

    /// The transport is being opened.
    Connecting,

    /// Transport open; frames flow to the peer.
    Streaming,

    /// The peer's result has arrived. Frames still flow until the peer
    /// sends its termination message.
    AwaitingTermination,

    /// Shut down cleanly. Terminal.
    Closed,

    /// The transport failed or dropped. Terminal.
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::Connecting => "Connecting",
            Self::Streaming => "Streaming",
            Self::AwaitingTermination => "AwaitingTermination",
            Self::Closed => "Closed",
            Self::Failed => "Failed",
        };
        f.write_str(name)
    }
}

impl SessionState {
    /// Returns `true` for `Closed` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }

    /// Whether an arriving frame may be encoded and sent.
    pub fn accepts_frames(&self) -> bool {
        matches!(self, Self::Streaming | Self::AwaitingTermination)
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Transition to `Connecting`.
    ///
    /// Valid from: `Idle`.
    pub fn begin_connect(&mut self) -> Result<(), StreamError> {
        self.advance(Self::Idle, Self::Connecting, "start")
    }

    /// Transition to `Streaming` once the transport reports open.
    ///
    /// Valid from: `Connecting`.
    pub fn open(&mut self) -> Result<(), StreamError> {
        self.advance(Self::Connecting, Self::Streaming, "open")
    }

    /// Transition to `AwaitingTermination` on the peer's first reply.
    ///
    /// Valid from: `Streaming`.
    pub fn record_reply(&mut self) -> Result<(), StreamError> {
        self.advance(Self::Streaming, Self::AwaitingTermination, "record a reply")
    }

    /// Transition to `Closed` on the peer's termination message.
    ///
    /// Valid from: `AwaitingTermination`.
    pub fn complete(&mut self) -> Result<(), StreamError> {
        self.advance(Self::AwaitingTermination, Self::Closed, "complete")
    }

    /// Transition to `Failed`.
    ///
    /// Valid from: `Connecting`, `Streaming`, `AwaitingTermination`.
    pub fn fail(&mut self) -> Result<(), StreamError> {
        match self {
            Self::Connecting | Self::Streaming | Self::AwaitingTermination => {
                *self = Self::Failed;
                Ok(())
            }
            _ => Err(self.rejected("fail")),
        }
    }

    /// Transition to `Closed` on an external stop request.
    ///
    /// Valid from every non-terminal state.
    pub fn stop(&mut self) -> Result<(), StreamError> {
        if self.is_terminal() {
            return Err(self.rejected("stop"));
        }
        *self = Self::Closed;
        Ok(())
    }

    fn advance(&mut self, from: Self, to: Self, action: &'static str) -> Result<(), StreamError> {
        if *self != from {
            return Err(self.rejected(action));
        }
        *self = to;
        Ok(())
    }

    fn rejected(&self, action: &'static str) -> StreamError {
        StreamError::InvalidTransition {
            state: *self,
            action,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
