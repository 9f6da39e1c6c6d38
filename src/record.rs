//! Data model shared by every pipeline stage.
//!
//! A `RawImageInput` goes in, exactly one `EnhancedImageRecord` comes out.

use bytes::Bytes;
use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::path::{Path, PathBuf};

use crate::file_filter;
pub use crate::image_processing::PreviewHandle;

/// Label given to records before clustering has run
pub const UNSORTED_LABEL: &str = "Unsorted";

/// Where the raw bytes of an input live
#[derive(Debug, Clone)]
pub enum ImageSource {
    Bytes(Bytes),
    Path(PathBuf),
}

/// An uploaded file, exactly as the caller handed it over
#[derive(Debug, Clone)]
pub struct RawImageInput {
    pub source: ImageSource,
    pub content_type: String,
    pub last_modified: DateTime<Utc>,
    /// Annotations produced outside the pipeline (e.g. an AI tagger)
    pub content_tags: Vec<String>,
}

impl RawImageInput {
    pub fn from_bytes(
        bytes: impl Into<Bytes>,
        content_type: impl Into<String>,
        last_modified: DateTime<Utc>,
    ) -> Self {
        Self {
            source: ImageSource::Bytes(bytes.into()),
            content_type: content_type.into(),
            last_modified,
            content_tags: Vec::new(),
        }
    }

    /// Build a path-backed input. Content type and mtime come from the filesystem;
    /// the file body is only read later by the extractor.
    pub async fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await?;
        let last_modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        let content_type = file_filter::detect_content_type(path)
            .unwrap_or_else(|_| mime::APPLICATION_OCTET_STREAM.essence_str().to_string());

        Ok(Self {
            source: ImageSource::Path(path.to_path_buf()),
            content_type,
            last_modified,
            content_tags: Vec::new(),
        })
    }

    pub fn with_content_tags(mut self, tags: Vec<String>) -> Self {
        self.content_tags = tags;
        self
    }

    /// Human readable name for logs
    pub fn display_name(&self) -> String {
        match &self.source {
            ImageSource::Bytes(b) => format!("<{} bytes>", b.len()),
            ImageSource::Path(p) => p
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| p.to_string_lossy().to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampSource {
    Exif,
    FileModified,
}

/// When a photo was taken, as the camera recorded it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CaptureTime {
    /// Wall-clock time at the place the photo was taken
    pub local: NaiveDateTime,
    /// UTC offset, only known when the camera wrote an offset tag
    #[serde(serialize_with = "serialize_offset")]
    pub offset: Option<FixedOffset>,
    pub source: TimestampSource,
}

impl CaptureTime {
    pub fn from_exif(local: NaiveDateTime, offset: Option<FixedOffset>) -> Self {
        Self {
            local,
            offset,
            source: TimestampSource::Exif,
        }
    }

    /// mtime is rendered in the machine's timezone, like a camera clock would be
    pub fn from_file_modified(modified: DateTime<Utc>) -> Self {
        Self {
            local: modified.with_timezone(&Local).naive_local(),
            offset: None,
            source: TimestampSource::FileModified,
        }
    }

    pub fn has_offset(&self) -> bool {
        self.offset.is_some()
    }
}

fn serialize_offset<S: Serializer>(offset: &Option<FixedOffset>, s: S) -> Result<S::Ok, S::Error> {
    match offset {
        Some(o) => s.serialize_some(&o.to_string()),
        None => s.serialize_none(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpsCoordinate {
    pub latitude: f64,
    pub longitude: f64,
    /// Filled in by the geocoding stage, never by extraction
    pub resolved_place_name: Option<String>,
}

impl GpsCoordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            resolved_place_name: None,
        }
    }
}

/// One processed photo
#[derive(Debug, Clone, Serialize)]
pub struct EnhancedImageRecord {
    pub id: uuid::Uuid,
    /// Position of the originating `RawImageInput` in the batch
    pub input_index: usize,
    #[serde(skip)]
    pub preview: PreviewHandle,
    pub capture_time: Option<CaptureTime>,
    pub gps: Option<GpsCoordinate>,
    pub event_group_label: String,
    pub content_tags: Vec<String>,
    /// EXIF orientation the preview was corrected from (1 when untouched)
    pub orientation_applied: u32,
}

impl EnhancedImageRecord {
    pub fn new(input_index: usize, preview: PreviewHandle) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            input_index,
            preview,
            capture_time: None,
            gps: None,
            event_group_label: UNSORTED_LABEL.to_string(),
            content_tags: Vec::new(),
            orientation_applied: 1,
        }
    }

    pub fn place_name(&self) -> Option<&str> {
        self.gps.as_ref()?.resolved_place_name.as_deref()
    }

    /// Sort a clustered batch back into the order the inputs were supplied in
    pub fn restore_input_order(records: &mut [EnhancedImageRecord]) {
        records.sort_by_key(|r| r.input_index);
    }
}
