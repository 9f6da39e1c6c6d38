//! Photo metadata and event clustering for album layouts.
//!
//! `PhotoPipeline::run` turns a batch of uploaded files into time-sorted
//! records with capture time, GPS position, place name and event label, and
//! recommends how the album should be organized.

pub mod clustering;
pub mod config;
pub mod exif_extractor;
pub mod file_filter;
pub mod geocoding;
pub mod image_processing;
pub mod organization;
pub mod pipeline;
pub mod record;

#[cfg(test)]
mod test_support;

pub use config::{ConfigError, GeocodingConfig, PipelineConfig};
pub use geocoding::{GeocodeProgress, HttpGeocoder, ReverseGeocoder, UNKNOWN_LOCATION};
pub use organization::{select_organization_method, MetadataCoverage, OrganizationMethod};
pub use pipeline::{BatchOutcome, InputFailure, PhotoPipeline};
pub use record::{CaptureTime, EnhancedImageRecord, GpsCoordinate, ImageSource, PreviewHandle, RawImageInput};
