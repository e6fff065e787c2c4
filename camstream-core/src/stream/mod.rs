//! # Camera streaming pipeline
//!
//! Moves camera frames to a remote analyzer one at a time and collects
//! the analyzer's answer.
//!
//! ## Architecture
//!
//! ```text
//! CAPTURE (any thread)              SESSION (tokio)                    RELAY
//! ┌──────────────────┐   on_frame  ┌──────────────────────────┐
//! │ CaptureSource    │ ──────────► │ BackpressureGate         │
//! │   produces Frame │             │   ↓ (one frame in flight)│
//! └──────────────────┘             │ FrameEncoder (blocking)  │
//!                                  │   ↓ JPEG → base64        │   ws
//!                                  │ Envelope → Channel::send │ ──────►  analyzer
//! ┌──────────────────┐    show     │                          │
//! │ PresentationSink │ ◄────────── │ event loop: 1st reply =  │ ◄──────  replies
//! └──────────────────┘             │ result, 2nd = terminate  │
//!                                  └──────────────────────────┘
//! ```
//!
//! ## Sub-modules
//!
//! | Module          | Purpose                                              |
//! |-----------------|------------------------------------------------------|
//! | `types`         | `Frame`, `Plane` and `PixelFormat`                   |
//! | `gate`          | Single-slot admission gate                           |
//! | `encoder`       | YUV 4:2:0 → RGB → JPEG                               |
//! | `collaborators` | Traits for the capture source and status display     |
//! | `session`       | `SessionController`, the per-session orchestrator    |

pub mod collaborators;
pub mod encoder;
pub mod gate;
pub mod session;
pub mod types;

// ── Re-exports ───────────────────────────────────────────────────

pub use collaborators::{CaptureSource, PresentationSink};
pub use encoder::{DEFAULT_QUALITY, EncodedImage, FrameEncoder};
pub use gate::{BackpressureGate, GatePermit};
pub use session::{
    DropReason, FrameDisposition, NORMAL_CLOSURE, SessionConfig, SessionController, SessionStats,
};
pub use types::{Frame, PixelFormat, Plane, ReleaseHook};
