//! Batch orchestrator: extract, cluster, geocode, then pick an organization method.

use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

use crate::clustering::{self, EventSummary};
use crate::config::PipelineConfig;
use crate::exif_extractor::{self, ExtractError};
use crate::geocoding::{self, GeocodeProgress, ReverseGeocoder, ResolveSettings};
use crate::organization::{MetadataCoverage, OrganizationMethod};
use crate::record::{EnhancedImageRecord, RawImageInput};

/// An input that could not be read, keyed by its position in the batch
#[derive(Debug)]
pub struct InputFailure {
    pub input_index: usize,
    pub error: ExtractError,
}

/// Everything one pipeline run produces
#[derive(Debug, Serialize)]
pub struct BatchOutcome {
    /// Time-sorted records, one per readable input
    pub records: Vec<EnhancedImageRecord>,
    #[serde(skip)]
    pub failures: Vec<InputFailure>,
    pub organization: OrganizationMethod,
    pub coverage: MetadataCoverage,
    pub events: Vec<EventSummary>,
}

impl BatchOutcome {
    pub fn record_count(&self) -> usize {
        self.records.len()
    }
}

pub struct PhotoPipeline {
    config: PipelineConfig,
    geocoder: Option<Arc<dyn ReverseGeocoder>>,
}

impl PhotoPipeline {
    /// A pipeline without a geocoder leaves every place name unset
    pub fn new(config: PipelineConfig, geocoder: Option<Arc<dyn ReverseGeocoder>>) -> Self {
        Self { config, geocoder }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every stage over one batch.
    ///
    /// Unreadable inputs are collected in `failures`, or end the run when
    /// `abort_on_read_error` is set. Nothing else fails.
    pub async fn run(
        &self,
        inputs: Vec<RawImageInput>,
        progress: Option<&dyn GeocodeProgress>,
    ) -> Result<BatchOutcome, ExtractError> {
        let started = Instant::now();
        let total = inputs.len();
        log::info!("[Pipeline] Processing {} inputs", total);

        let mut records = Vec::with_capacity(total);
        let mut failures = Vec::new();
        for (input_index, result) in exif_extractor::extract_batch(inputs, self.config.jpeg_quality)
            .await
            .into_iter()
            .enumerate()
        {
            match result {
                Ok(record) => records.push(record),
                Err(error) if self.config.abort_on_read_error => return Err(error),
                Err(error) => {
                    log::warn!("[Pipeline] Skipping input {}: {}", input_index, error);
                    failures.push(InputFailure { input_index, error });
                }
            }
        }

        if self.config.geocode_before_clustering {
            self.geocode(&mut records, progress).await;
            clustering::cluster_events(&mut records, self.config.event_gap());
        } else {
            clustering::cluster_events(&mut records, self.config.event_gap());
            self.geocode(&mut records, progress).await;
        }

        let coverage = MetadataCoverage::of(&records);
        let organization = coverage.recommend();
        let events = clustering::summarize_events(&records);

        log::info!(
            "[Pipeline] {} records, {} failures, {} events, organize by {} ({:?})",
            records.len(),
            failures.len(),
            events.len(),
            organization,
            started.elapsed()
        );

        Ok(BatchOutcome {
            records,
            failures,
            organization,
            coverage,
            events,
        })
    }

    async fn geocode(&self, records: &mut [EnhancedImageRecord], progress: Option<&dyn GeocodeProgress>) {
        let Some(geocoder) = &self.geocoder else {
            log::debug!("[Pipeline] No geocoder configured, place names stay unset");
            return;
        };
        let settings = ResolveSettings::from(&self.config.geocoding);
        geocoding::resolve_place_names(records, geocoder.as_ref(), settings, progress).await;
    }
}
