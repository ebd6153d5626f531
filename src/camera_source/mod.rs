//! CameraSource - Upstream Frame Acquisition
//!
//! ## Responsibilities
//!
//! - Camera URL validation (http / https / rtsp only)
//! - Connection handling with backend fallback and bounded-retry open
//! - Per-frame transform: aspect-preserving resize, grayscale, JPEG encode

mod connection;

pub use connection::CameraConnection;

use crate::error::{Error, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use url::Url;

/// Fixed output JPEG quality
pub const JPEG_QUALITY: u8 = 80;

/// Smallest accepted resize target
pub const MIN_WIDTH: u32 = 16;

/// A validated upstream camera source. Immutable per request.
#[derive(Debug, Clone)]
pub struct CameraSource {
    url: Url,
}

impl CameraSource {
    /// Parse and validate a raw camera URL.
    ///
    /// Rejected sources never touch the lock, the registry, or the network.
    pub fn parse(raw: &str) -> Result<Self> {
        let url = Url::parse(raw)
            .map_err(|_| Error::Validation(format!("invalid camera URL: {raw}")))?;
        match url.scheme() {
            "http" | "https" | "rtsp" => Ok(Self { url }),
            other => Err(Error::Validation(format!(
                "unsupported camera URL scheme: {other}"
            ))),
        }
    }

    /// Resolve the effective source: query override or the configured default.
    pub fn resolve(requested: Option<&str>, default: Option<&str>) -> Result<Self> {
        let raw = requested
            .filter(|value| !value.is_empty())
            .or(default)
            .ok_or_else(|| Error::Validation("missing camera URL".into()))?;
        Self::parse(raw)
    }

    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    pub fn host(&self) -> Option<&str> {
        self.url.host_str()
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    pub fn is_rtsp(&self) -> bool {
        self.url.scheme() == "rtsp"
    }
}

/// Requested per-frame transform, applied between decode and re-encode.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameTransform {
    grayscale: bool,
    width: Option<u32>,
}

impl FrameTransform {
    /// Width targets below [`MIN_WIDTH`] are clamped up, not rejected.
    pub fn new(grayscale: bool, width: Option<u32>) -> Self {
        Self {
            grayscale,
            width: width.map(|w| w.max(MIN_WIDTH)),
        }
    }

    pub fn grayscale(&self) -> bool {
        self.grayscale
    }

    pub fn width(&self) -> Option<u32> {
        self.width
    }
}

/// Decode a raw frame, apply the transform, re-encode as JPEG.
///
/// Returns None on decode/encode failure; the caller skips the frame and
/// keeps streaming. Resize preserves aspect ratio with
/// height = floor(h0 * width / w0).
pub fn process_frame(raw: &[u8], transform: &FrameTransform) -> Option<Vec<u8>> {
    let mut img = image::load_from_memory_with_format(raw, image::ImageFormat::Jpeg).ok()?;

    if let Some(width) = transform.width {
        let (w0, h0) = (img.width(), img.height());
        if w0 > 0 && width != w0 {
            let height = ((h0 as u64 * width as u64) / w0 as u64).max(1) as u32;
            img = img.resize_exact(width, height, FilterType::Triangle);
        }
    }

    let mut out = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
    let encoded = if transform.grayscale {
        encoder.encode_image(&img.to_luma8())
    } else {
        encoder.encode_image(&img.to_rgb8())
    };
    encoded.ok()?;

    Some(out)
}
