//! Default grouping strategy for a batch, picked from how complete its metadata is.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::record::EnhancedImageRecord;

// Percent thresholds, first matching rule wins
const EVENT_MIN_DATE_PCT: f64 = 70.0;
const EVENT_MIN_LOCATION_PCT: f64 = 50.0;
const CONTENT_MIN_TAG_PCT: f64 = 70.0;
const DATE_MIN_PCT: f64 = 70.0;
const LOCATION_MIN_PCT: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrganizationMethod {
    Event,
    Content,
    Date,
    Location,
}

impl fmt::Display for OrganizationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Event => "event",
            Self::Content => "content",
            Self::Date => "date",
            Self::Location => "location",
        };
        f.write_str(s)
    }
}

/// Share of records (0-100) carrying each kind of metadata
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MetadataCoverage {
    pub date_pct: f64,
    pub location_pct: f64,
    pub content_tag_pct: f64,
}

fn has_location_signal(record: &EnhancedImageRecord) -> bool {
    record.gps.is_some() || record.capture_time.is_some_and(|c| c.has_offset())
}

impl MetadataCoverage {
    pub fn of(records: &[EnhancedImageRecord]) -> Self {
        if records.is_empty() {
            return Self::default();
        }
        let total = records.len() as f64;
        let pct = |n: usize| n as f64 * 100.0 / total;

        Self {
            date_pct: pct(records.iter().filter(|r| r.capture_time.is_some()).count()),
            location_pct: pct(records.iter().filter(|r| has_location_signal(r)).count()),
            content_tag_pct: pct(records.iter().filter(|r| !r.content_tags.is_empty()).count()),
        }
    }

    pub fn recommend(&self) -> OrganizationMethod {
        if self.date_pct >= EVENT_MIN_DATE_PCT && self.location_pct >= EVENT_MIN_LOCATION_PCT {
            OrganizationMethod::Event
        } else if self.content_tag_pct >= CONTENT_MIN_TAG_PCT {
            OrganizationMethod::Content
        } else if self.date_pct >= DATE_MIN_PCT {
            OrganizationMethod::Date
        } else if self.location_pct >= LOCATION_MIN_PCT {
            OrganizationMethod::Location
        } else {
            // Weak date coverage and no coverage at all both fall back to dates
            OrganizationMethod::Date
        }
    }
}

/// Pick the default page grouping for a fully enriched batch
pub fn select_organization_method(records: &[EnhancedImageRecord]) -> OrganizationMethod {
    let coverage = MetadataCoverage::of(records);
    let method = coverage.recommend();
    log::debug!(
        "[Organize] date {:.0}% location {:.0}% tags {:.0}% -> {}",
        coverage.date_pct,
        coverage.location_pct,
        coverage.content_tag_pct,
        method
    );
    method
}
