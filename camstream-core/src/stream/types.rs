//! Frame types handed from the capture source to the pipeline.
//!
//! A [`Frame`] is owned by whoever holds it. Its plane buffers go back to
//! the capture source through a release hook that fires exactly once:
//! either from [`Frame::release`] or, failing that, when the frame drops.

use std::fmt;
use std::time::Instant;

// ── PixelFormat ──────────────────────────────────────────────────

/// Pixel layout tag reported by the capture source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Y plane plus two 2×2-subsampled chroma planes (U then V).
    ///
    /// Covers fully planar I420 as well as semi-planar NV12/NV21 buffers
    /// exposed as three planes with a chroma `pixel_stride` of 2.
    Yuv420,
    /// Any layout the pipeline does not understand, keyed by the
    /// platform's numeric format code.
    Other(u32),
}

impl PixelFormat {
    /// Android's `ImageFormat.YUV_420_888`.
    pub const YUV_420_888: u32 = 0x23;

    /// Map a platform format code onto a tag.
    pub fn from_code(code: u32) -> Self {
        match code {
            Self::YUV_420_888 => PixelFormat::Yuv420,
            other => PixelFormat::Other(other),
        }
    }

    /// Number of planes a frame in this format carries, if known.
    pub const fn plane_count(self) -> Option<usize> {
        match self {
            PixelFormat::Yuv420 => Some(3),
            PixelFormat::Other(_) => None,
        }
    }
}

// ── Plane ────────────────────────────────────────────────────────

/// One image plane.
///
/// Sample `(x, y)` lives at `y * row_stride + x * pixel_stride`.
#[derive(Debug, Clone, Default)]
pub struct Plane {
    pub data: Vec<u8>,
    /// Bytes between the starts of consecutive rows.
    pub row_stride: usize,
    /// Bytes between consecutive samples within a row.
    pub pixel_stride: usize,
}

impl Plane {
    pub fn new(data: Vec<u8>, row_stride: usize, pixel_stride: usize) -> Self {
        Self {
            data,
            row_stride,
            pixel_stride,
        }
    }

    /// A tightly packed plane (`pixel_stride == 1`).
    pub fn packed(data: Vec<u8>, width: usize) -> Self {
        Self::new(data, width, 1)
    }

    /// Minimum buffer length needed to address `width × height` samples,
    /// or `None` if the strides overflow `usize`.
    pub fn required_len(&self, width: usize, height: usize) -> Option<usize> {
        if width == 0 || height == 0 {
            return Some(0);
        }
        self.row_span(width)?
            .checked_add((height - 1).checked_mul(self.row_stride)?)
    }

    /// Bytes one row of `width` samples spans.
    pub(crate) fn row_span(&self, width: usize) -> Option<usize> {
        width
            .saturating_sub(1)
            .checked_mul(self.pixel_stride)?
            .checked_add(1)
    }

    #[inline]
    pub(crate) fn sample(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.row_stride + x * self.pixel_stride]
    }
}

// ── Frame ────────────────────────────────────────────────────────

/// Called with the frame's plane buffers once the pipeline is done with it.
pub type ReleaseHook = Box<dyn FnOnce(Vec<Plane>) + Send + 'static>;

/// One raw captured image.
pub struct Frame {
    planes: Vec<Plane>,
    width: u32,
    height: u32,
    format: PixelFormat,
    timestamp: Instant,
    release: Option<ReleaseHook>,
}

impl Frame {
    /// Wrap captured planes. The frame has no release hook until
    /// [`with_release`](Self::with_release) attaches one.
    pub fn new(planes: Vec<Plane>, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            planes,
            width,
            height,
            format,
            timestamp: Instant::now(),
            release: None,
        }
    }

    /// Attach the hook that hands plane buffers back to the capture source.
    pub fn with_release<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(Vec<Plane>) + Send + 'static,
    {
        self.release = Some(Box::new(hook));
        self
    }

    /// Override the capture timestamp.
    pub fn with_timestamp(mut self, timestamp: Instant) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    pub fn planes(&self) -> &[Plane] {
        &self.planes
    }

    /// Return the plane buffers to the capture source now.
    pub fn release(mut self) {
        self.fire_release();
    }

    fn fire_release(&mut self) {
        if let Some(hook) = self.release.take() {
            hook(std::mem::take(&mut self.planes));
        }
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.fire_release();
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("planes", &self.planes.len())
            .field("released", &self.release.is_none())
            .finish()
    }
}
