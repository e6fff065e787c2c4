//! Single-slot backpressure gate.
//!
//! Cameras deliver frames faster than an encode plus network write
//! completes. The gate admits one frame at a time and turns every frame
//! that arrives while the slot is taken into a drop. There is no queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Admission control holding at most one frame of in-flight work.
///
/// Cloning yields another handle to the same slot.
#[derive(Debug, Clone, Default)]
pub struct BackpressureGate {
    busy: Arc<AtomicBool>,
}

impl BackpressureGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the slot if it is free.
    ///
    /// Never blocks. `None` means another frame is in flight and the
    /// caller must discard its frame. The slot frees when the returned
    /// permit drops.
    pub fn try_acquire(&self) -> Option<GatePermit> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| GatePermit {
                busy: Arc::clone(&self.busy),
            })
    }

    /// Whether a frame currently holds the slot.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Proof of holding the gate's slot.
#[derive(Debug)]
#[must_use = "the gate frees as soon as the permit drops"]
pub struct GatePermit {
    busy: Arc<AtomicBool>,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

// ── Tests ────────────────────────────────────────────────────────
