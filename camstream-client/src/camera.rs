//! Synthetic camera.
//!
//! `TestPatternCamera` stands in for a device camera: it produces I420
//! frames of a moving gradient at a fixed rate and recycles plane buffers
//! through a small pool fed by each frame's release hook.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use camstream_core::stream::{
    CaptureSource, Frame, FrameDisposition, PixelFormat, Plane, SessionController,
};

/// Buffer sets kept for reuse.
const POOL_CAPACITY: usize = 3;

type BufferPool = Arc<Mutex<Vec<Vec<Plane>>>>;

pub struct TestPatternCamera {
    width: usize,
    height: usize,
    fps: u32,
    stopped: CancellationToken,
    pool: BufferPool,
    produced: AtomicU64,
}

impl TestPatternCamera {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            width: width.max(1) as usize,
            height: height.max(1) as usize,
            fps: fps.max(1),
            stopped: CancellationToken::new(),
            pool: Arc::new(Mutex::new(Vec::with_capacity(POOL_CAPACITY))),
            produced: AtomicU64::new(0),
        }
    }

    pub fn is_running(&self) -> bool {
        !self.stopped.is_cancelled()
    }

    pub fn frames_produced(&self) -> u64 {
        self.produced.load(Ordering::Relaxed)
    }

    /// Buffer sets currently waiting in the pool.
    pub fn pooled_buffers(&self) -> usize {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Render pattern frame number `tick`.
    pub fn capture(&self, tick: u64) -> Frame {
        let (w, h) = (self.width, self.height);
        let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));

        let recycled = self
            .pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        let mut planes = recycled.unwrap_or_else(|| {
            vec![
                Plane::packed(vec![0; w * h], w),
                Plane::packed(vec![0; cw * ch], cw),
                Plane::packed(vec![0; cw * ch], cw),
            ]
        });

        let shift = (tick * 4) as usize;
        for (i, px) in planes[0].data.iter_mut().enumerate() {
            let (x, y) = (i % w, i / w);
            *px = ((x + y + shift) & 0xFF) as u8;
        }
        let u = (128 + (tick % 64) as u8) ^ 0x20;
        planes[1].data.fill(u);
        planes[2].data.fill(255 - u);

        self.produced.fetch_add(1, Ordering::Relaxed);

        let pool = Arc::clone(&self.pool);
        Frame::new(planes, w as u32, h as u32, PixelFormat::Yuv420).with_release(move |planes| {
            let mut pool = pool.lock().unwrap_or_else(PoisonError::into_inner);
            if pool.len() < POOL_CAPACITY {
                pool.push(planes);
            }
        })
    }

    /// Offer frames to `session` at the configured rate until unbound.
    pub async fn run(&self, session: SessionController) {
        let mut interval = tokio::time::interval(Duration::from_secs_f64(1.0 / self.fps as f64));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            width = self.width,
            height = self.height,
            fps = self.fps,
            "test-pattern camera running"
        );

        let mut tick = 0u64;
        loop {
            tokio::select! {
                _ = self.stopped.cancelled() => break,
                _ = interval.tick() => {
                    match session.on_frame(self.capture(tick)) {
                        FrameDisposition::Admitted(_) => trace!(tick, "frame admitted"),
                        FrameDisposition::Dropped(reason) => trace!(tick, ?reason, "frame dropped"),
                    }
                    tick += 1;
                }
            }
        }
        debug!(frames = self.frames_produced(), "test-pattern camera stopped");
    }
}

/// Wait for a camera task started with [`TestPatternCamera::run`].
///
/// Returns `false` if the task panicked or was cancelled.
pub async fn join_capture(task: JoinHandle<()>) -> bool {
    match task.await {
        Ok(()) => true,
        Err(e) => {
            warn!("camera task ended abnormally: {e}");
            false
        }
    }
}

impl CaptureSource for TestPatternCamera {
    fn unbind(&self) {
        self.stopped.cancel();
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use camstream_core::network::WebSocketConnector;
    use camstream_core::stream::{FrameEncoder, PresentationSink, SessionConfig};

    use crate::sink::ConsoleSink;

    #[test]
    fn frames_are_i420() {
        let camera = TestPatternCamera::new(64, 48, 10);
        let frame = camera.capture(0);
        assert_eq!(frame.format(), PixelFormat::Yuv420);
        assert_eq!(frame.planes()[0].data.len(), 64 * 48);
        assert_eq!(frame.planes()[1].data.len(), 32 * 24);
        assert_eq!(frame.planes()[2].row_stride, 32);

        let jpeg = FrameEncoder::default().encode(&frame).unwrap();
        assert_eq!(&jpeg.as_bytes()[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn pattern_moves() {
        let camera = TestPatternCamera::new(8, 8, 10);
        let a = camera.capture(0).planes()[0].data.clone();
        let b = camera.capture(1).planes()[0].data.clone();
        assert_ne!(a, b);
    }

    #[test]
    fn released_buffers_are_reused() {
        let camera = TestPatternCamera::new(16, 16, 10);
        let frame = camera.capture(0);
        assert_eq!(camera.pooled_buffers(), 0);

        frame.release();
        assert_eq!(camera.pooled_buffers(), 1);

        let _frame = camera.capture(1);
        assert_eq!(camera.pooled_buffers(), 0);
    }

    #[test]
    fn pool_is_bounded() {
        let camera = TestPatternCamera::new(4, 4, 10);
        let frames: Vec<_> = (0..5).map(|t| camera.capture(t)).collect();
        drop(frames);
        assert_eq!(camera.pooled_buffers(), POOL_CAPACITY);
        assert_eq!(camera.frames_produced(), 5);
    }

    #[tokio::test]
    async fn aborted_capture_task_is_reported() {
        let task = tokio::spawn(std::future::pending::<()>());
        task.abort();
        assert!(!join_capture(task).await);

        assert!(join_capture(tokio::spawn(async {})).await);
    }

    #[tokio::test]
    async fn unbind_stops_run() {
        let camera = Arc::new(TestPatternCamera::new(16, 16, 100));
        let session = SessionController::new(
            SessionConfig::default(),
            Arc::new(WebSocketConnector),
            Arc::clone(&camera) as Arc<dyn CaptureSource>,
            Arc::new(ConsoleSink::new()) as Arc<dyn PresentationSink>,
        )
        .unwrap();

        let runner = {
            let camera = Arc::clone(&camera);
            let session = session.clone();
            tokio::spawn(async move { camera.run(session).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        camera.unbind();
        tokio::time::timeout(Duration::from_secs(5), runner)
            .await
            .expect("camera never stopped")
            .unwrap();

        assert!(!camera.is_running());
        // Session never started, so every frame was dropped.
        let produced = camera.frames_produced();
        assert!(produced > 0);
        assert_eq!(session.stats().frames_dropped, produced);
    }
}
