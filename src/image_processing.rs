use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageReader};
use std::io::Cursor;
use thiserror::Error;

/// Quality used when re-encoding a corrected preview
pub const DEFAULT_JPEG_QUALITY: u8 = 95;
/// Lowest re-encode quality accepted; anything below shows compression artifacts
pub const MIN_JPEG_QUALITY: u8 = 95;

#[derive(Debug, Error)]
pub enum OrientationError {
    #[error("Invalid EXIF orientation value: {0}")]
    InvalidOrientation(u32),
    #[error("Failed to decode preview: {0}")]
    Decode(#[source] image::ImageError),
    #[error("Failed to encode corrected preview: {0}")]
    Encode(#[source] image::ImageError),
}

/// Owned, renderable preview of an uploaded image.
///
/// The buffer is reference counted (`Bytes`), so moving a handle through the
/// pipeline never copies pixels. Dropping the handle (or calling `release`)
/// gives the memory back.
#[derive(Debug, Clone, PartialEq)]
pub struct PreviewHandle {
    bytes: Bytes,
    content_type: String,
}

impl PreviewHandle {
    pub fn new(bytes: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type: content_type.into(),
        }
    }

    /// Encoded image bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Read width/height from the image header without decoding pixels
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        ImageReader::new(Cursor::new(self.as_bytes()))
            .with_guessed_format()
            .ok()?
            .into_dimensions()
            .ok()
    }

    /// Hand the underlying buffer back. Equivalent to dropping the handle.
    pub fn release(self) {
        log::trace!("[Orientation] Released preview ({} bytes)", self.bytes.len());
    }
}

pub use image::metadata::Orientation;

/// Map a raw EXIF orientation tag onto the transform that corrects it
pub fn orientation_from_exif(value: u32) -> Option<Orientation> {
    u8::try_from(value).ok().and_then(Orientation::from_exif)
}

/// Whether the corrected image has width and height swapped (EXIF 5-8)
pub fn swaps_dimensions(orientation: Orientation) -> bool {
    matches!(
        orientation,
        Orientation::Rotate90 | Orientation::Rotate270 | Orientation::Rotate90FlipH | Orientation::Rotate270FlipH
    )
}

/// Apply the EXIF orientation correction to a preview.
///
/// Never fails: orientation 1, absent or out-of-range values return the input
/// untouched, and any decode/encode error falls back to the original preview.
pub fn normalize_orientation(preview: PreviewHandle, orientation: u32, quality: u8) -> PreviewHandle {
    match orientation_from_exif(orientation) {
        None | Some(Orientation::NoTransforms) => preview,
        Some(_) => match try_normalize(&preview, orientation, quality) {
            Ok(corrected) => {
                preview.release();
                corrected
            }
            Err(e) => {
                log::warn!("[Orientation] Keeping unrotated preview: {}", e);
                preview
            }
        },
    }
}

/// Decode, transform and re-encode. The input handle is left alone.
pub fn try_normalize(
    preview: &PreviewHandle,
    orientation: u32,
    quality: u8,
) -> Result<PreviewHandle, OrientationError> {
    let orientation =
        orientation_from_exif(orientation).ok_or(OrientationError::InvalidOrientation(orientation))?;

    let mut img = image::load_from_memory(preview.as_bytes()).map_err(OrientationError::Decode)?;
    img.apply_orientation(orientation);

    // JPEG has no alpha channel
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut buf = Vec::new();
    let quality = quality.clamp(MIN_JPEG_QUALITY, 100);
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality))
        .map_err(OrientationError::Encode)?;

    log::debug!(
        "[Orientation] Applied {:?}: {}x{} ({} -> {} bytes)",
        orientation,
        rgb.width(),
        rgb.height(),
        preview.len(),
        buf.len()
    );

    Ok(PreviewHandle::new(buf, mime::IMAGE_JPEG.essence_str()))
}
