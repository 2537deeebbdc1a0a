//! Image payload validation.
//!
//! Turns the `image_data` field of an embedding request into RGB pixels the
//! detector can consume. Every check runs before the image is handed to the
//! decoder, in this order:
//!
//! 1. Optional data-URL prefix (`data:image/png;base64,`) is stripped
//! 2. Strict standard base64 decode
//! 3. Decoded byte length against `MAX_IMAGE_SIZE`
//! 4. Magic-byte sniffing (JPEG, PNG, GIF, WEBP only)
//! 5. Bounded decode, then proportional downscale to `MAX_IMAGE_WIDTH`

use std::fmt;
use std::io::Cursor;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::imageops::{self, FilterType};
use image::{ImageFormat, ImageReader, Limits, RgbImage};
use thiserror::Error;

use crate::config::Config;
use crate::error::{AppError, ImageFormatError, SizeError};

// =============================================================================
// Decoder Limits
// =============================================================================

/// Largest width or height the decoder accepts.
///
/// A small compressed file can still declare enormous dimensions, so the
/// header is checked before any pixel buffer is allocated.
pub const MAX_DECODE_DIMENSION: u32 = 12_000;

/// Decoder allocation budget per byte of allowed payload.
pub const DECODE_EXPANSION: u64 = 32;

/// Floor of the decoder allocation budget (8 MiB).
pub const MIN_DECODE_ALLOC: u64 = 8 * 1024 * 1024;

/// Ceiling of the decoder allocation budget (64 MiB).
pub const MAX_DECODE_ALLOC: u64 = 64 * 1024 * 1024;

/// Allocation budget for one decode, scaled from the payload limit.
///
/// Decodes run concurrently on the blocking pool, so the per-decode bound
/// is what caps peak memory.
pub fn decode_alloc_budget(max_size: usize) -> u64 {
    (max_size as u64)
        .saturating_mul(DECODE_EXPANSION)
        .clamp(MIN_DECODE_ALLOC, MAX_DECODE_ALLOC)
}

/// Image container formats accepted by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
    Gif,
    Webp,
}

impl ImageKind {
    /// Identify the format from its leading signature bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        const PNG_SIGNATURE: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

        if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(Self::Jpeg)
        } else if bytes.starts_with(PNG_SIGNATURE) {
            Some(Self::Png)
        } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
            Some(Self::Gif)
        } else if bytes.starts_with(b"RIFF") && bytes.get(8..12) == Some(b"WEBP".as_slice()) {
            Some(Self::Webp)
        } else {
            None
        }
    }

    fn format(self) -> ImageFormat {
        match self {
            Self::Jpeg => ImageFormat::Jpeg,
            Self::Png => ImageFormat::Png,
            Self::Gif => ImageFormat::Gif,
            Self::Webp => ImageFormat::WebP,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::Gif => "gif",
            Self::Webp => "webp",
        }
    }
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated image, normalized to RGB and at most `max_width` pixels wide.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub kind: ImageKind,
    pub original_width: u32,
    pub original_height: u32,
    pub pixels: RgbImage,
}

impl DecodedImage {
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn was_resized(&self) -> bool {
        self.width() != self.original_width
    }
}

/// Why an image payload was rejected.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageError {
    #[error(transparent)]
    TooLarge(#[from] SizeError),

    #[error(transparent)]
    Format(#[from] ImageFormatError),
}

impl From<ImageError> for AppError {
    fn from(err: ImageError) -> Self {
        match err {
            ImageError::TooLarge(e) => AppError::Size(e),
            ImageError::Format(e) => AppError::ImageFormat(e),
        }
    }
}

/// Validates and decodes base64 image payloads.
#[derive(Debug, Clone, Copy)]
pub struct ImageValidator {
    max_size: usize,
    max_width: u32,
}

impl ImageValidator {
    pub fn new(max_size: usize, max_width: u32) -> Self {
        Self {
            max_size,
            max_width,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.max_image_size, config.max_image_width)
    }

    /// Run the full validation chain and return normalized pixels.
    ///
    /// CPU-bound; callers on the async runtime should use `spawn_blocking`.
    pub fn validate(&self, payload: &str) -> Result<DecodedImage, ImageError> {
        let bytes = self.decode_bytes(payload)?;
        let kind = ImageKind::sniff(&bytes).ok_or(ImageFormatError::InvalidFormat)?;

        let mut reader = ImageReader::with_format(Cursor::new(bytes.as_slice()), kind.format());
        reader.limits(decoder_limits(decode_alloc_budget(self.max_size)));
        let decoded = reader.decode().map_err(|e| {
            tracing::debug!(format = %kind, error = %e, "Image failed to decode");
            ImageFormatError::InvalidFormat
        })?;

        let rgb = decoded.to_rgb8();
        let (original_width, original_height) = rgb.dimensions();

        let pixels = match scaled_dimensions(original_width, original_height, self.max_width) {
            Some((width, height)) => {
                tracing::debug!(
                    from_width = original_width,
                    to_width = width,
                    to_height = height,
                    "Downscaling image"
                );
                imageops::resize(&rgb, width, height, FilterType::Lanczos3)
            }
            None => rgb,
        };

        Ok(DecodedImage {
            kind,
            original_width,
            original_height,
            pixels,
        })
    }

    /// Strip any data-URL prefix, base64-decode, and enforce the size limit.
    pub fn decode_bytes(&self, payload: &str) -> Result<Vec<u8>, ImageError> {
        let encoded = strip_data_url(payload).trim();
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|_| ImageFormatError::InvalidBase64)?;

        if bytes.len() > self.max_size {
            return Err(SizeError::ImageTooLarge {
                size: bytes.len(),
                max: self.max_size,
            }
            .into());
        }

        Ok(bytes)
    }
}

/// Drop a `data:<mime>;base64,` prefix, keeping everything after the first comma.
pub fn strip_data_url(payload: &str) -> &str {
    match payload.split_once(',') {
        Some((_, data)) => data,
        None => payload,
    }
}

/// Target dimensions when `width` exceeds `max_width`, preserving aspect ratio.
///
/// Height is floored and never drops below one pixel.
pub fn scaled_dimensions(width: u32, height: u32, max_width: u32) -> Option<(u32, u32)> {
    if width <= max_width || width == 0 {
        return None;
    }
    let scaled = u64::from(height) * u64::from(max_width) / u64::from(width);
    let height = u32::try_from(scaled).unwrap_or(u32::MAX).max(1);
    Some((max_width, height))
}

fn decoder_limits(max_alloc: u64) -> Limits {
    let mut limits = Limits::default();
    limits.max_image_width = Some(MAX_DECODE_DIMENSION);
    limits.max_image_height = Some(MAX_DECODE_DIMENSION);
    limits.max_alloc = Some(max_alloc);
    limits
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn encode(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, format).unwrap();
        buf.into_inner()
    }

    fn b64(bytes: &[u8]) -> String {
        STANDARD.encode(bytes)
    }

    fn validator() -> ImageValidator {
        ImageValidator::new(2 * 1024 * 1024, 640)
    }

    // ==========================================================================
    // Format Sniffing
    // ==========================================================================

    #[test]
    fn test_sniff_signatures() {
        assert_eq!(ImageKind::sniff(&[0xFF, 0xD8, 0xFF, 0xE0]), Some(ImageKind::Jpeg));
        assert_eq!(
            ImageKind::sniff(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0]),
            Some(ImageKind::Png)
        );
        assert_eq!(ImageKind::sniff(b"GIF89a...."), Some(ImageKind::Gif));
        assert_eq!(ImageKind::sniff(b"GIF87a...."), Some(ImageKind::Gif));
        assert_eq!(ImageKind::sniff(b"RIFF\0\0\0\0WEBPVP8 "), Some(ImageKind::Webp));
    }

    #[test]
    fn test_sniff_rejects_other_content() {
        assert_eq!(ImageKind::sniff(b"hello world"), None);
        assert_eq!(ImageKind::sniff(b"RIFF\0\0\0\0WAVE"), None);
        assert_eq!(ImageKind::sniff(b"BM"), None);
        assert_eq!(ImageKind::sniff(&[]), None);
    }

    // ==========================================================================
    // Base64 & Size
    // ==========================================================================

    #[test]
    fn test_strip_data_url() {
        assert_eq!(strip_data_url("data:image/png;base64,AAAA"), "AAAA");
        assert_eq!(strip_data_url("AAAA"), "AAAA");
    }

    #[test]
    fn test_invalid_base64() {
        let err = validator().validate("not base64!!").unwrap_err();
        assert_eq!(err, ImageError::Format(ImageFormatError::InvalidBase64));
    }

    #[test]
    fn test_non_image_bytes_rejected() {
        let err = validator().validate(&b64(b"plain text pretending")).unwrap_err();
        assert_eq!(err, ImageError::Format(ImageFormatError::InvalidFormat));
    }

    #[test]
    fn test_truncated_image_rejected() {
        let png = encode(32, 32, ImageFormat::Png);
        let truncated = &png[..png.len() / 2];
        let err = validator().validate(&b64(truncated)).unwrap_err();
        assert_eq!(err, ImageError::Format(ImageFormatError::InvalidFormat));
    }

    #[test]
    fn test_decoded_size_is_what_counts() {
        // 300 decoded bytes encode to 400 base64 characters
        let bytes = vec![0u8; 300];
        let encoded = b64(&bytes);
        assert_eq!(encoded.len(), 400);

        // Encoded length is over the limit but the decoded bytes are not
        let v = ImageValidator::new(350, 640);
        assert_eq!(v.decode_bytes(&encoded).unwrap().len(), 300);
    }

    #[test]
    fn test_decoded_size_over_limit() {
        let bytes = vec![0u8; 300];
        let v = ImageValidator::new(299, 640);
        let err = v.decode_bytes(&b64(&bytes)).unwrap_err();
        assert_eq!(
            err,
            ImageError::TooLarge(SizeError::ImageTooLarge { size: 300, max: 299 })
        );
    }

    #[test]
    fn test_size_checked_before_format() {
        let v = ImageValidator::new(4, 640);
        let err = v.validate(&b64(b"not an image")).unwrap_err();
        assert!(matches!(err, ImageError::TooLarge(_)));
    }

    // ==========================================================================
    // Decode & Resize
    // ==========================================================================

    #[test]
    fn test_png_within_width_is_untouched() {
        let decoded = validator().validate(&b64(&encode(100, 80, ImageFormat::Png))).unwrap();
        assert_eq!(decoded.kind, ImageKind::Png);
        assert_eq!((decoded.width(), decoded.height()), (100, 80));
        assert!(!decoded.was_resized());
    }

    #[test]
    fn test_wide_jpeg_is_downscaled() {
        let payload = format!(
            "data:image/jpeg;base64,{}",
            b64(&encode(1000, 750, ImageFormat::Jpeg))
        );
        let decoded = validator().validate(&payload).unwrap();

        assert_eq!(decoded.kind, ImageKind::Jpeg);
        assert_eq!(decoded.original_width, 1000);
        assert_eq!((decoded.width(), decoded.height()), (640, 480));
        assert!(decoded.was_resized());
    }

    #[test]
    fn test_gif_decodes() {
        let img = image::RgbaImage::from_pixel(16, 16, image::Rgba([10, 20, 30, 255]));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Gif).unwrap();

        let decoded = validator().validate(&b64(buf.get_ref())).unwrap();
        assert_eq!(decoded.kind, ImageKind::Gif);
        assert_eq!((decoded.width(), decoded.height()), (16, 16));
    }

    #[test]
    fn test_decode_alloc_budget_scales_with_payload_limit() {
        assert_eq!(decode_alloc_budget(2 * 1024 * 1024), 64 * 1024 * 1024);
        assert_eq!(decode_alloc_budget(1024), MIN_DECODE_ALLOC);
        assert_eq!(decode_alloc_budget(usize::MAX), MAX_DECODE_ALLOC);
    }

    #[test]
    fn test_compressed_bomb_exceeds_decode_budget() {
        // 2000x2000 RGB needs 12 MB of pixels but compresses to a few KB
        let img = RgbImage::from_pixel(2000, 2000, image::Rgb([0, 0, 0]));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        let png = buf.into_inner();
        assert!(png.len() < 64 * 1024);

        let err = ImageValidator::new(64 * 1024, 640).validate(&b64(&png)).unwrap_err();
        assert_eq!(err, ImageError::Format(ImageFormatError::InvalidFormat));
    }

    #[test]
    fn test_scaled_dimensions() {
        assert_eq!(scaled_dimensions(640, 480, 640), None);
        assert_eq!(scaled_dimensions(1280, 720, 640), Some((640, 360)));
        // floor(333 * 640 / 1000) = 213
        assert_eq!(scaled_dimensions(1000, 333, 640), Some((640, 213)));
        // very wide strip keeps at least one row
        assert_eq!(scaled_dimensions(10_000, 1, 640), Some((640, 1)));
    }

    #[test]
    fn test_into_app_error() {
        let err: AppError = ImageError::Format(ImageFormatError::InvalidBase64).into();
        assert_eq!(err.code(), "invalid_base64");

        let err: AppError = ImageError::TooLarge(SizeError::ImageTooLarge { size: 2, max: 1 }).into();
        assert_eq!(err.code(), "payload_too_large");
    }
}
