//! Frame media: pixel buffers, JPEG encode/decode, and the capture seam.
//!
//! Real screen capture is an OS concern and lives behind the [`FrameSource`]
//! trait in whichever binary needs it.  Everything else about a frame's life
//! — scaling contract, JPEG compression, decode on the viewing side — is
//! platform-neutral and lives here so the teacher and student crates share
//! one implementation.
//!
//! The shipped [`SyntheticSource`] produces deterministic gradient frames.
//! It keeps the whole pipeline runnable headless: in tests, on CI, and in
//! the demo binaries on machines with no capture backend.

use crate::domain::quality::QualityPreset;
use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageFormat};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Errors along the capture → encode → decode pipeline.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The capture backend failed (monitor unplugged, permission lost, …).
    #[error("capture failed: {0}")]
    Capture(String),

    /// The requested monitor does not exist on this machine.
    #[error("no such monitor: {0}")]
    UnknownMonitor(u8),

    /// Pixel buffer dimensions do not match the byte length.
    #[error("dimensions {width}x{height} do not fit a buffer of {len} bytes")]
    DimensionMismatch { width: u32, height: u32, len: usize },

    #[error("jpeg encode failed: {0}")]
    Encode(#[source] image::ImageError),

    #[error("jpeg decode failed: {0}")]
    Decode(#[source] image::ImageError),
}

// ── Pixel and frame types ─────────────────────────────────────────────────────

/// Raw RGB8 pixels, row-major, already scaled to their final size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    /// `width * height * 3` bytes.
    pub data: Vec<u8>,
}

impl PixelBuffer {
    /// Wraps raw RGB bytes, checking that the dimensions fit the data.
    pub fn from_rgb(width: u32, height: u32, data: Vec<u8>) -> Result<Self, CodecError> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(CodecError::DimensionMismatch {
                width,
                height,
                len: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }
}

/// A compressed frame ready to be wrapped in a wire message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    pub width: u32,
    pub height: u32,
    /// JPEG bytes.
    pub data: Vec<u8>,
}

// ── JPEG codec ────────────────────────────────────────────────────────────────

/// Compresses a pixel buffer to JPEG at the preset's quality.
///
/// Scaling already happened at capture time; this function only compresses.
pub fn encode_frame(pixels: &PixelBuffer, preset: QualityPreset) -> Result<EncodedFrame, CodecError> {
    let mut jpeg = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut jpeg, preset.jpeg_quality());
    encoder
        .encode(
            &pixels.data,
            pixels.width,
            pixels.height,
            ExtendedColorType::Rgb8,
        )
        .map_err(CodecError::Encode)?;
    Ok(EncodedFrame {
        width: pixels.width,
        height: pixels.height,
        data: jpeg,
    })
}

/// Decompresses a received JPEG frame back into RGB pixels for display.
pub fn decode_frame(blob: &[u8]) -> Result<PixelBuffer, CodecError> {
    let img = image::load_from_memory_with_format(blob, ImageFormat::Jpeg)
        .map_err(CodecError::Decode)?;
    let rgb = img.to_rgb8();
    let (width, height) = rgb.dimensions();
    Ok(PixelBuffer {
        width,
        height,
        data: rgb.into_raw(),
    })
}

// ── Capture seam ──────────────────────────────────────────────────────────────

/// Source of screen pixels.
///
/// Implementations own monitor enumeration and scaling: `capture` returns
/// pixels already reduced to `scale_percent` of the native resolution.
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn capture(&self, monitor: u8, scale_percent: u32) -> Result<PixelBuffer, CodecError>;
}

/// Deterministic gradient frames for headless operation and tests.
///
/// Each capture advances an internal tick so consecutive frames differ, the
/// way a real desktop would.  The monitor index shifts the palette, letting
/// tests tell monitor 0 and monitor 1 apart after a decode.
pub struct SyntheticSource {
    base_width: u32,
    base_height: u32,
    tick: AtomicU64,
}

impl SyntheticSource {
    /// 1280×800 base resolution, a plausible classroom laptop panel.
    pub fn new() -> Self {
        Self::with_resolution(1280, 800)
    }

    pub fn with_resolution(base_width: u32, base_height: u32) -> Self {
        Self {
            base_width,
            base_height,
            tick: AtomicU64::new(0),
        }
    }
}

impl Default for SyntheticSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FrameSource for SyntheticSource {
    async fn capture(&self, monitor: u8, scale_percent: u32) -> Result<PixelBuffer, CodecError> {
        let tick = self.tick.fetch_add(1, Ordering::Relaxed);
        let width = (self.base_width * scale_percent / 100).max(1);
        let height = (self.base_height * scale_percent / 100).max(1);

        let mut data = Vec::with_capacity(width as usize * height as usize * 3);
        let drift = (tick % 251) as u32;
        for y in 0..height {
            for x in 0..width {
                data.push(((x + drift) % 256) as u8);
                data.push(((y + drift) % 256) as u8);
                data.push(monitor.wrapping_mul(64).wrapping_add((tick % 256) as u8));
            }
        }
        PixelBuffer::from_rgb(width, height, data)
    }
}

/// Runs one capture-and-compress step: the broadcaster's per-tick unit of work.
pub async fn produce_frame(
    source: &dyn FrameSource,
    monitor: u8,
    preset: QualityPreset,
) -> Result<EncodedFrame, CodecError> {
    let pixels = source.capture(monitor, preset.scale_percent()).await?;
    encode_frame(&pixels, preset)
}
