use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FileFilterError {
    #[error("Unsupported file type: {0}")]
    UnsupportedType(String),
    #[error("Failed to read file: {0}")]
    ReadError(String),
    #[error("Could not determine file type")]
    UnknownType,
}

/// MIME aliases browsers and cameras report for baseline JPEG
const JPEG_ALIASES: &[&str] = &["image/jpeg", "image/jpg", "image/pjpeg"];

/// Content type of a file on disk. The extension decides; magic bytes only when it is unknown.
pub fn detect_content_type(path: &Path) -> Result<String, FileFilterError> {
    let guessed = mime_guess::from_path(path).first_or_octet_stream();
    if guessed != mime::APPLICATION_OCTET_STREAM {
        return Ok(guessed.essence_str().to_string());
    }

    // Unknown or missing extension
    let kind = infer::get_from_path(path).map_err(|e| FileFilterError::ReadError(e.to_string()))?;

    match kind {
        Some(k) => Ok(k.mime_type().to_string()),
        None => Err(FileFilterError::UnknownType),
    }
}

/// Accept a content type only if it names an image
pub fn require_image(content_type: &str) -> Result<mime::Mime, FileFilterError> {
    let parsed: mime::Mime = content_type
        .parse()
        .map_err(|_| FileFilterError::UnsupportedType(content_type.to_string()))?;

    if parsed.type_() == mime::IMAGE {
        Ok(parsed)
    } else {
        Err(FileFilterError::UnsupportedType(content_type.to_string()))
    }
}

/// Check if a file is an image we can hand to the metadata pipeline
pub fn is_supported_image(path: &Path) -> bool {
    detect_content_type(path)
        .and_then(|ct| require_image(&ct))
        .is_ok()
}

/// Decide whether an input should go through EXIF tag parsing.
///
/// The declared content type wins when it names a concrete type. Only an empty or
/// `application/octet-stream` declaration falls back to sniffing the buffer.
pub fn is_jpeg(content_type: &str, bytes: &[u8]) -> bool {
    let declared = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    if declared.is_empty() || declared == mime::APPLICATION_OCTET_STREAM.essence_str() {
        return infer::get(bytes)
            .map(|k| k.mime_type() == "image/jpeg")
            .unwrap_or(false);
    }

    JPEG_ALIASES.contains(&declared.as_str())
}
