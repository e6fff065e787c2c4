//! JPEG frame encoder.
//!
//! Converts planar YUV 4:2:0 frames into packed RGB (BT.601 full range,
//! the same matrix camera NV21 output uses) and compresses the result
//! with the `image` crate's JPEG encoder.

use std::sync::atomic::{AtomicU64, Ordering};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use image::ExtendedColorType;
use image::codecs::jpeg::JpegEncoder;

use crate::error::EncodeError;
use crate::stream::types::{Frame, PixelFormat, Plane};

/// Quality used when the caller does not pick one.
pub const DEFAULT_QUALITY: u8 = 90;

// ── EncodedImage ─────────────────────────────────────────────────

/// A compressed frame ready for transmission. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    bytes: Bytes,
}

impl EncodedImage {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Standard base64 (padded, unwrapped), the envelope payload form.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }
}

// ── FrameEncoder ─────────────────────────────────────────────────

/// YUV → JPEG encoder with a fixed quality.
///
/// `encode` only borrows the frame, so the caller may release it right
/// after the call whatever the outcome.
#[derive(Debug)]
pub struct FrameEncoder {
    /// JPEG quality, 1..=100.
    quality: u8,
    frame_count: AtomicU64,
}

impl FrameEncoder {
    /// Create an encoder. `quality` is 0..=100 and is clamped to the
    /// JPEG encoder's 1..=100 range.
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
            frame_count: AtomicU64::new(0),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Number of frames encoded successfully so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::Relaxed)
    }

    /// Encode one frame.
    pub fn encode(&self, frame: &Frame) -> Result<EncodedImage, EncodeError> {
        let rgb = yuv420_to_rgb(frame)?;

        let mut out = Vec::with_capacity(rgb.len() / 8);
        JpegEncoder::new_with_quality(&mut out, self.quality).encode(
            &rgb,
            frame.width(),
            frame.height(),
            ExtendedColorType::Rgb8,
        )?;

        self.frame_count.fetch_add(1, Ordering::Relaxed);
        Ok(EncodedImage {
            bytes: Bytes::from(out),
        })
    }
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_QUALITY)
    }
}

// ── Colour conversion ────────────────────────────────────────────

/// Pack a YUV 4:2:0 frame into interleaved RGB8.
fn yuv420_to_rgb(frame: &Frame) -> Result<Vec<u8>, EncodeError> {
    if frame.format() != PixelFormat::Yuv420 {
        return Err(EncodeError::UnsupportedFormat(frame.format()));
    }

    let (width, height) = (frame.width() as usize, frame.height() as usize);
    if width == 0 || height == 0 {
        return Err(EncodeError::InvalidDimensions {
            width: frame.width(),
            height: frame.height(),
        });
    }

    let [y_plane, u_plane, v_plane] = frame.planes() else {
        return Err(EncodeError::PlaneCount {
            expected: 3,
            actual: frame.planes().len(),
        });
    };

    let (chroma_w, chroma_h) = (width.div_ceil(2), height.div_ceil(2));
    check_plane("Y", y_plane, width, height)?;
    check_plane("U", u_plane, chroma_w, chroma_h)?;
    check_plane("V", v_plane, chroma_w, chroma_h)?;

    let mut rgb = Vec::with_capacity(width * height * 3);
    for row in 0..height {
        for col in 0..width {
            let y = y_plane.sample(col, row) as i32;
            let u = u_plane.sample(col / 2, row / 2) as i32 - 128;
            let v = v_plane.sample(col / 2, row / 2) as i32 - 128;

            // 16.16 fixed point
            let r = y + ((91_881 * v) >> 16);
            let g = y - ((22_554 * u + 46_802 * v) >> 16);
            let b = y + ((116_130 * u) >> 16);

            rgb.push(r.clamp(0, 255) as u8);
            rgb.push(g.clamp(0, 255) as u8);
            rgb.push(b.clamp(0, 255) as u8);
        }
    }
    Ok(rgb)
}

fn check_plane(
    name: &'static str,
    plane: &Plane,
    width: usize,
    height: usize,
) -> Result<(), EncodeError> {
    let invalid_stride = || EncodeError::InvalidStride {
        plane: name,
        row_stride: plane.row_stride,
        pixel_stride: plane.pixel_stride,
    };

    if plane.pixel_stride == 0 {
        return Err(invalid_stride());
    }
    let row_span = plane.row_span(width).ok_or_else(invalid_stride)?;
    if plane.row_stride < row_span {
        return Err(invalid_stride());
    }

    let required = plane.required_len(width, height).ok_or_else(invalid_stride)?;
    if plane.data.len() < required {
        return Err(EncodeError::PlaneTooShort {
            plane: name,
            len: plane.data.len(),
            required,
        });
    }
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    /// I420 frame with a diagonal luma gradient and neutral chroma.
    fn test_frame(w: u32, h: u32) -> Frame {
        let (wu, hu) = (w as usize, h as usize);
        let (cw, ch) = (wu.div_ceil(2), hu.div_ceil(2));
        let luma = (0..hu)
            .flat_map(|y| (0..wu).map(move |x| ((x * 7 + y * 3) % 256) as u8))
            .collect();
        Frame::new(
            vec![
                Plane::packed(luma, wu),
                Plane::packed(vec![128; cw * ch], cw),
                Plane::packed(vec![128; cw * ch], cw),
            ],
            w,
            h,
            PixelFormat::Yuv420,
        )
    }

    #[test]
    fn encode_produces_jpeg() {
        let enc = FrameEncoder::new(80);
        let image = enc.encode(&test_frame(64, 48)).unwrap();

        assert!(image.as_bytes().starts_with(&[0xFF, 0xD8]));
        assert!(image.as_bytes().ends_with(&[0xFF, 0xD9]));
        assert_eq!(enc.frame_count(), 1);
    }

    #[test]
    fn odd_dimensions_are_supported() {
        let enc = FrameEncoder::default();
        assert!(enc.encode(&test_frame(33, 17)).is_ok());
    }

    #[test]
    fn interleaved_chroma_planes() {
        // NV21 exposed as three planes: V and U share one buffer with a
        // pixel stride of 2, offset by one byte.
        let (w, h) = (16usize, 8usize);
        let vu: Vec<u8> = (0..w * h / 2).map(|i| if i % 2 == 0 { 150 } else { 100 }).collect();
        let frame = Frame::new(
            vec![
                Plane::packed(vec![120; w * h], w),
                Plane::new(vu[1..].to_vec(), w, 2),
                Plane::new(vu[..vu.len() - 1].to_vec(), w, 2),
            ],
            w as u32,
            h as u32,
            PixelFormat::Yuv420,
        );
        assert!(FrameEncoder::default().encode(&frame).is_ok());
    }

    #[test]
    fn higher_quality_is_larger() {
        let frame = test_frame(128, 96);
        let low = FrameEncoder::new(10).encode(&frame).unwrap();
        let high = FrameEncoder::new(95).encode(&frame).unwrap();
        assert!(high.len() > low.len());
    }

    #[test]
    fn short_luma_plane_is_an_error_and_frame_stays_releasable() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&released);
        let frame = Frame::new(
            vec![
                Plane::packed(vec![0; 8 * 8 - 1], 8),
                Plane::packed(vec![128; 16], 4),
                Plane::packed(vec![128; 16], 4),
            ],
            8,
            8,
            PixelFormat::Yuv420,
        )
        .with_release(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let enc = FrameEncoder::default();
        let err = enc.encode(&frame).unwrap_err();
        assert!(matches!(
            err,
            EncodeError::PlaneTooShort { plane: "Y", len: 63, required: 64 }
        ));
        assert_eq!(enc.frame_count(), 0);

        frame.release();
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsupported_format_is_rejected() {
        let frame = Frame::new(vec![Plane::packed(vec![0; 64], 8)], 4, 4, PixelFormat::Other(1));
        let err = FrameEncoder::default().encode(&frame).unwrap_err();
        assert!(matches!(err, EncodeError::UnsupportedFormat(PixelFormat::Other(1))));
    }

    #[test]
    fn missing_planes_and_zero_size() {
        let enc = FrameEncoder::default();
        let two_planes = Frame::new(
            vec![Plane::packed(vec![0; 16], 4), Plane::packed(vec![0; 4], 2)],
            4,
            4,
            PixelFormat::Yuv420,
        );
        assert!(matches!(
            enc.encode(&two_planes),
            Err(EncodeError::PlaneCount { expected: 3, actual: 2 })
        ));

        let empty = Frame::new(vec![Plane::default(); 3], 0, 4, PixelFormat::Yuv420);
        assert!(matches!(
            enc.encode(&empty),
            Err(EncodeError::InvalidDimensions { .. })
        ));
    }

    #[test]
    fn zero_pixel_stride_is_rejected() {
        let mut planes = test_frame(8, 8).planes().to_vec();
        planes[1].pixel_stride = 0;
        let frame = Frame::new(planes, 8, 8, PixelFormat::Yuv420);
        assert!(matches!(
            FrameEncoder::default().encode(&frame),
            Err(EncodeError::InvalidStride { plane: "U", .. })
        ));
    }

    #[test]
    fn huge_row_stride_is_an_error() {
        let mut planes = test_frame(8, 8).planes().to_vec();
        planes[0].row_stride = usize::MAX / 4;
        let frame = Frame::new(planes, 8, 8, PixelFormat::Yuv420);
        assert!(matches!(
            FrameEncoder::default().encode(&frame),
            Err(EncodeError::InvalidStride { plane: "Y", .. })
        ));
    }

    #[test]
    fn huge_pixel_stride_is_an_error() {
        let mut planes = test_frame(8, 8).planes().to_vec();
        planes[2].pixel_stride = usize::MAX / 2;
        let frame = Frame::new(planes, 8, 8, PixelFormat::Yuv420);
        assert!(matches!(
            FrameEncoder::default().encode(&frame),
            Err(EncodeError::InvalidStride { plane: "V", .. })
        ));
    }

    #[test]
    fn quality_is_clamped() {
        assert_eq!(FrameEncoder::new(0).quality(), 1);
        assert_eq!(FrameEncoder::new(250).quality(), 100);
    }

    #[test]
    fn base64_payload() {
        let image = EncodedImage {
            bytes: Bytes::from_static(b"ABC"),
        };
        assert_eq!(image.to_base64(), "QUJD");
    }
}
