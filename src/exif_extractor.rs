//! Metadata extraction module using kamadak-exif
//!
//! Turns one uploaded file into one `EnhancedImageRecord`: capture time, GPS
//! position and orientation tag, with the orientation fix applied to the preview.
//! Only JPEG inputs are parsed; everything else passes through untouched.

use bytes::Bytes;
use chrono::{DateTime, FixedOffset, NaiveDateTime};
use exif::{Exif, In, Reader, Tag, Value};
use futures::stream::{self, StreamExt};
use std::io::Cursor;
use std::path::PathBuf;
use thiserror::Error;

use crate::file_filter;
use crate::image_processing::{self, Orientation, PreviewHandle};
use crate::record::{CaptureTime, EnhancedImageRecord, GpsCoordinate, ImageSource, RawImageInput};

/// Files read at the same time by `extract_batch`
const MAX_CONCURRENT_READS: usize = 8;

/// Date tags in order of preference
const DATE_TAGS: [Tag; 3] = [Tag::DateTimeOriginal, Tag::DateTimeDigitized, Tag::DateTime];
const OFFSET_TAGS: [Tag; 3] = [Tag::OffsetTimeOriginal, Tag::OffsetTimeDigitized, Tag::OffsetTime];

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// State of the capture date tag
#[derive(Debug, Clone, Default, PartialEq)]
pub enum DateTag {
    #[default]
    Missing,
    Malformed(String),
    Parsed(NaiveDateTime),
}

/// Tags pulled out of one JPEG
#[derive(Debug, Clone, Default)]
pub struct ExifMetadata {
    pub orientation: Option<u32>,
    pub date: DateTag,
    pub offset: Option<FixedOffset>,
    /// GPS latitude
    pub latitude: Option<f64>,
    /// GPS longitude
    pub longitude: Option<f64>,
}

impl ExifMetadata {
    pub fn has_data(&self) -> bool {
        self.orientation.is_some()
            || self.date != DateTag::Missing
            || self.latitude.is_some()
            || self.longitude.is_some()
    }

    /// A coordinate needs both halves
    pub fn gps(&self) -> Option<GpsCoordinate> {
        Some(GpsCoordinate::new(self.latitude?, self.longitude?))
    }
}

/// Extract metadata from an in-memory JPEG. Parse failures yield empty metadata.
pub fn extract_metadata(bytes: &[u8]) -> ExifMetadata {
    match try_extract(bytes) {
        Ok(m) => m,
        Err(exif::Error::NotFound(_)) => {
            log::debug!("[Exif] No EXIF segment");
            ExifMetadata::default()
        }
        Err(e) => {
            log::warn!("[Exif] Failed to parse tags: {}", e);
            ExifMetadata::default()
        }
    }
}

fn try_extract(bytes: &[u8]) -> Result<ExifMetadata, exif::Error> {
    let exif = Reader::new().read_from_container(&mut Cursor::new(bytes))?;

    let orientation = exif
        .get_field(Tag::Orientation, In::PRIMARY)
        .and_then(|f| f.value.get_uint(0));

    let mut date = DateTag::Missing;
    for tag in DATE_TAGS {
        let Some(raw) = ascii_field(&exif, tag) else { continue };
        match parse_date_str(&raw) {
            Some(dt) => {
                date = DateTag::Parsed(dt);
                break;
            }
            None => {
                log::debug!("[Exif] Tag {} = {:?} is not a date", tag, raw);
                if date == DateTag::Missing {
                    date = DateTag::Malformed(raw);
                }
            }
        }
    }

    let offset = OFFSET_TAGS
        .iter()
        .filter_map(|tag| ascii_field(&exif, *tag))
        .find_map(|raw| parse_offset(&raw));

    Ok(ExifMetadata {
        orientation,
        date,
        offset,
        latitude: gps_component(&exif, Tag::GPSLatitude, Tag::GPSLatitudeRef),
        longitude: gps_component(&exif, Tag::GPSLongitude, Tag::GPSLongitudeRef),
    })
}

fn ascii_field(exif: &Exif, tag: Tag) -> Option<String> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    match &field.value {
        Value::Ascii(parts) => {
            let s = String::from_utf8_lossy(parts.first()?);
            let s = s.trim_matches(|c: char| c == '\0' || c.is_whitespace());
            (!s.is_empty()).then(|| s.to_string())
        }
        _ => None,
    }
}

/// Parse EXIF datetime string (format: "2024:01:15 10:30:45")
fn parse_date_str(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim().trim_matches('"');

    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y:%m:%d %H:%M:%S") {
        return Some(naive);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_local());
    }
    None
}

/// Parse an EXIF offset tag ("+09:00", "-0530")
fn parse_offset(s: &str) -> Option<FixedOffset> {
    let s = s.trim();
    let sign = match s.as_bytes().first()? {
        b'+' => 1,
        b'-' => -1,
        _ => return None,
    };
    let digits: String = s[1..].chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// Degrees/minutes/seconds to signed decimal degrees
pub fn dms_to_decimal(degrees: f64, minutes: f64, seconds: f64, hemisphere: char) -> f64 {
    let value = degrees + minutes / 60.0 + seconds / 3600.0;
    match hemisphere.to_ascii_uppercase() {
        'S' | 'W' => -value,
        _ => value,
    }
}

/// Extract GPS coordinate from EXIF
fn gps_component(exif: &Exif, coord_tag: Tag, ref_tag: Tag) -> Option<f64> {
    let field = exif.get_field(coord_tag, In::PRIMARY)?;
    let (d, m, s) = match &field.value {
        Value::Rational(v) if v.len() >= 3 => (v[0].to_f64(), v[1].to_f64(), v[2].to_f64()),
        _ => return None,
    };
    let hemisphere = ascii_field(exif, ref_tag)
        .and_then(|r| r.chars().next())
        .unwrap_or('N');

    let decimal = dms_to_decimal(d, m, s, hemisphere);
    decimal.is_finite().then_some(decimal)
}

async fn read_source(input: &RawImageInput) -> Result<Bytes, ExtractError> {
    match &input.source {
        ImageSource::Bytes(b) => Ok(b.clone()),
        ImageSource::Path(path) => tokio::fs::read(path)
            .await
            .map(Bytes::from)
            .map_err(|source| ExtractError::Read {
                path: path.clone(),
                source,
            }),
    }
}

/// Rotate off the async runtime. A panicked task keeps the original preview.
async fn apply_orientation(preview: PreviewHandle, orientation: u32, quality: u8) -> PreviewHandle {
    let fallback = preview.clone();
    match tokio::task::spawn_blocking(move || {
        image_processing::normalize_orientation(preview, orientation, quality)
    })
    .await
    {
        Ok(corrected) => corrected,
        Err(e) => {
            log::warn!("[Exif] Orientation task failed: {}", e);
            fallback
        }
    }
}

/// Build the record for one input. Only an unreadable input is an error.
pub async fn extract_record(
    input_index: usize,
    input: RawImageInput,
    quality: u8,
) -> Result<EnhancedImageRecord, ExtractError> {
    let bytes = read_source(&input).await?;
    let name = input.display_name();

    let preview = PreviewHandle::new(bytes.clone(), input.content_type.clone());
    let mut record = EnhancedImageRecord::new(input_index, preview);
    record.content_tags = input.content_tags;

    if !file_filter::is_jpeg(&input.content_type, &bytes) {
        log::debug!("[Exif] {} ({}) is not JPEG, skipping tags", name, input.content_type);
        return Ok(record);
    }

    let meta = extract_metadata(&bytes);

    record.capture_time = match meta.date {
        DateTag::Parsed(local) => Some(CaptureTime::from_exif(local, meta.offset)),
        DateTag::Missing => Some(CaptureTime::from_file_modified(input.last_modified)),
        DateTag::Malformed(ref raw) => {
            log::warn!("[Exif] {} has unparseable capture date {:?}", name, raw);
            None
        }
    };
    record.gps = meta.gps();

    if let Some(orientation) = meta.orientation {
        record.orientation_applied = orientation;
        if matches!(image_processing::orientation_from_exif(orientation), Some(o) if o != Orientation::NoTransforms) {
            record.preview = apply_orientation(record.preview, orientation, quality).await;
        }
    }

    log::debug!(
        "[Exif] {}: date={:?} gps={:?} orientation={:?}",
        name,
        record.capture_time.map(|c| c.local),
        record.gps.as_ref().map(|g| (g.latitude, g.longitude)),
        meta.orientation
    );

    Ok(record)
}

/// Extract every input, a few files at a time. Output order matches input order.
pub async fn extract_batch(
    inputs: Vec<RawImageInput>,
    quality: u8,
) -> Vec<Result<EnhancedImageRecord, ExtractError>> {
    stream::iter(inputs.into_iter().enumerate())
        .map(|(index, input)| extract_record(index, input, quality))
        .buffered(MAX_CONCURRENT_READS)
        .collect()
        .await
}
