//! Reverse geocoding of photo coordinates
//!
//! Coordinates are bucketed to three decimal places (~111 m) so photos taken at
//! the same spot share one lookup. Lookups go out in small concurrent batches
//! with a pause in between to stay inside the provider's rate limit.

use async_trait::async_trait;
use futures::future::join_all;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, timeout};

use crate::config::GeocodingConfig;
use crate::record::EnhancedImageRecord;

/// Name used when a lookup fails or the address has no usable field
pub const UNKNOWN_LOCATION: &str = "Unknown location";

#[derive(Debug, Error)]
pub enum GeocodeError {
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Geocoder returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("Lookup timed out after {0:?}")]
    Timeout(Duration),
}

/// Coordinate rounded to 3 decimals, stored as thousandths of a degree so it hashes exactly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CoordinateKey {
    lat_milli: i64,
    lon_milli: i64,
}

impl CoordinateKey {
    pub fn from_degrees(latitude: f64, longitude: f64) -> Self {
        Self {
            lat_milli: (latitude * 1000.0).round() as i64,
            lon_milli: (longitude * 1000.0).round() as i64,
        }
    }

    pub fn latitude(&self) -> f64 {
        self.lat_milli as f64 / 1000.0
    }

    pub fn longitude(&self) -> f64 {
        self.lon_milli as f64 / 1000.0
    }
}

impl fmt::Display for CoordinateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3},{:.3}", self.latitude(), self.longitude())
    }
}

/// Anything that can turn a coordinate into a place name
#[async_trait]
pub trait ReverseGeocoder: Send + Sync {
    async fn lookup(&self, key: CoordinateKey) -> Result<String, GeocodeError>;
}

/// Receives the running count of resolved coordinates after each batch
pub trait GeocodeProgress: Send + Sync {
    fn on_progress(&self, resolved: usize);
}

impl<F> GeocodeProgress for F
where
    F: Fn(usize) + Send + Sync,
{
    fn on_progress(&self, resolved: usize) {
        self(resolved)
    }
}

#[derive(Debug, Default, Deserialize)]
struct Address {
    suburb: Option<String>,
    neighbourhood: Option<String>,
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    county: Option<String>,
}

impl Address {
    /// Most specific populated field
    fn best_name(self) -> Option<String> {
        [
            self.suburb,
            self.neighbourhood,
            self.city,
            self.town,
            self.village,
            self.county,
        ]
        .into_iter()
        .flatten()
        .map(|s| s.trim().to_string())
        .find(|s| !s.is_empty())
    }
}

#[derive(Debug, Deserialize)]
struct ReverseResponse {
    #[serde(default)]
    address: Option<Address>,
}

/// Nominatim-compatible HTTP reverse geocoder
#[derive(Clone)]
pub struct HttpGeocoder {
    client: reqwest::Client,
    endpoint: String,
    zoom: u8,
    accept_language: Option<String>,
}

impl HttpGeocoder {
    pub fn new(config: &GeocodingConfig) -> Result<Self, GeocodeError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            zoom: config.zoom,
            accept_language: config.accept_language.clone(),
        })
    }
}

#[async_trait]
impl ReverseGeocoder for HttpGeocoder {
    async fn lookup(&self, key: CoordinateKey) -> Result<String, GeocodeError> {
        let mut request = self.client.get(&self.endpoint).query(&[
            ("format", "json".to_string()),
            ("lat", format!("{:.3}", key.latitude())),
            ("lon", format!("{:.3}", key.longitude())),
            ("zoom", self.zoom.to_string()),
        ]);
        if let Some(lang) = &self.accept_language {
            request = request.header(reqwest::header::ACCEPT_LANGUAGE, lang);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(GeocodeError::Status(response.status()));
        }

        let body: ReverseResponse = response.json().await?;
        Ok(body
            .address
            .and_then(Address::best_name)
            .unwrap_or_else(|| UNKNOWN_LOCATION.to_string()))
    }
}

/// Lookup table owned by one resolver run. Never shared between batches.
#[derive(Debug, Default)]
pub struct GeocodeContext {
    resolved: HashMap<CoordinateKey, String>,
    lookups: usize,
}

impl GeocodeContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &CoordinateKey) -> Option<&str> {
        self.resolved.get(key).map(String::as_str)
    }

    /// Number of distinct coordinates resolved so far
    pub fn resolved_count(&self) -> usize {
        self.resolved.len()
    }

    /// External lookups issued so far
    pub fn lookup_count(&self) -> usize {
        self.lookups
    }
}

/// Batch sizing and pacing for `resolve_place_names`
#[derive(Debug, Clone, Copy)]
pub struct ResolveSettings {
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub request_timeout: Duration,
}

impl From<&GeocodingConfig> for ResolveSettings {
    fn from(config: &GeocodingConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            batch_delay: config.batch_delay(),
            request_timeout: config.request_timeout(),
        }
    }
}

impl Default for ResolveSettings {
    fn default() -> Self {
        Self::from(&GeocodingConfig::default())
    }
}

/// Coordinates in the batch that still need a name, in first-seen order
fn pending_keys(records: &[EnhancedImageRecord]) -> Vec<CoordinateKey> {
    let mut seen = HashSet::new();
    records
        .iter()
        .filter_map(|r| r.gps.as_ref())
        .filter(|g| g.resolved_place_name.is_none())
        .map(|g| CoordinateKey::from_degrees(g.latitude, g.longitude))
        .filter(|k| seen.insert(*k))
        .collect()
}

async fn lookup_or_unknown(
    geocoder: &dyn ReverseGeocoder,
    key: CoordinateKey,
    limit: Duration,
) -> (CoordinateKey, String) {
    let name = match timeout(limit, geocoder.lookup(key)).await {
        Ok(Ok(name)) => name,
        Ok(Err(e)) => {
            log::warn!("[Geocode] Lookup for {} failed: {}", key, e);
            UNKNOWN_LOCATION.to_string()
        }
        Err(_) => {
            log::warn!("[Geocode] Lookup for {} failed: {}", key, GeocodeError::Timeout(limit));
            UNKNOWN_LOCATION.to_string()
        }
    };
    (key, name)
}

/// Fill `resolved_place_name` for every record that has coordinates but no name.
///
/// Records that already carry a name are left alone. Every record sharing a
/// rounded coordinate receives the same name, applied after all lookups finish.
pub async fn resolve_place_names(
    records: &mut [EnhancedImageRecord],
    geocoder: &dyn ReverseGeocoder,
    settings: ResolveSettings,
    progress: Option<&dyn GeocodeProgress>,
) -> GeocodeContext {
    let mut ctx = GeocodeContext::new();
    let keys = pending_keys(records);
    if keys.is_empty() {
        return ctx;
    }

    log::info!(
        "[Geocode] Resolving {} unique coordinates in batches of {}",
        keys.len(),
        settings.batch_size
    );

    for (i, batch) in keys.chunks(settings.batch_size.max(1)).enumerate() {
        if i > 0 && !settings.batch_delay.is_zero() {
            sleep(settings.batch_delay).await;
        }

        let results = join_all(
            batch
                .iter()
                .map(|key| lookup_or_unknown(geocoder, *key, settings.request_timeout)),
        )
        .await;

        ctx.lookups += batch.len();
        for (key, name) in results {
            ctx.resolved.insert(key, name);
        }

        if let Some(p) = progress {
            p.on_progress(ctx.resolved_count());
        }
    }

    for gps in records.iter_mut().filter_map(|r| r.gps.as_mut()) {
        if gps.resolved_place_name.is_some() {
            continue;
        }
        let key = CoordinateKey::from_degrees(gps.latitude, gps.longitude);
        if let Some(name) = ctx.get(&key) {
            gps.resolved_place_name = Some(name.to_string());
        }
    }

    log::info!(
        "[Geocode] Resolved {} coordinates with {} lookups",
        ctx.resolved_count(),
        ctx.lookup_count()
    );
    ctx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_processing::PreviewHandle;
    use crate::record::GpsCoordinate;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Counts calls and names each key after its coordinates
    #[derive(Default)]
    struct FakeGeocoder {
        calls: AtomicUsize,
        fail_for: Option<CoordinateKey>,
        hang_for: Option<CoordinateKey>,
    }

    #[async_trait]
    impl ReverseGeocoder for FakeGeocoder {
        async fn lookup(&self, key: CoordinateKey) -> Result<String, GeocodeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if Some(key) == self.hang_for {
                sleep(Duration::from_secs(3600)).await;
            }
            if Some(key) == self.fail_for {
                return Err(GeocodeError::Status(reqwest::StatusCode::TOO_MANY_REQUESTS));
            }
            Ok(format!("Place {}", key))
        }
    }

    fn record_at(index: usize, lat: f64, lon: f64) -> EnhancedImageRecord {
        let mut record = EnhancedImageRecord::new(index, PreviewHandle::new(vec![0u8], "image/jpeg"));
        record.gps = Some(GpsCoordinate::new(lat, lon));
        record
    }

    fn fast(batch_size: usize) -> ResolveSettings {
        ResolveSettings {
            batch_size,
            batch_delay: Duration::ZERO,
            request_timeout: Duration::from_millis(200),
        }
    }

    #[test]
    fn test_coordinate_key_rounding() {
        let a = CoordinateKey::from_degrees(48.85661, 2.35222);
        let b = CoordinateKey::from_degrees(48.8566, 2.3524);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "48.857,2.352");
        assert_ne!(a, CoordinateKey::from_degrees(48.858, 2.352));
        assert_eq!(
            CoordinateKey::from_degrees(-33.8688, 151.2093).to_string(),
            "-33.869,151.209"
        );
    }

    #[test]
    fn test_address_prefers_most_specific_field() {
        let address = Address {
            city: Some("Pittsburgh".into()),
            suburb: Some("Shadyside".into()),
            county: Some("Allegheny".into()),
            ..Default::default()
        };
        assert_eq!(address.best_name().as_deref(), Some("Shadyside"));

        let address = Address {
            village: Some("Hallstatt".into()),
            county: Some("Gmunden".into()),
            ..Default::default()
        };
        assert_eq!(address.best_name().as_deref(), Some("Hallstatt"));
        assert_eq!(Address::default().best_name(), None);
    }

    #[test]
    fn test_response_parsing() {
        let body: ReverseResponse = serde_json::from_str(
            r#"{"display_name": "x", "address": {"town": "Bled", "country": "Slovenia"}}"#,
        )
        .unwrap();
        assert_eq!(body.address.and_then(Address::best_name).as_deref(), Some("Bled"));

        let body: ReverseResponse = serde_json::from_str(r#"{"error": "Unable to geocode"}"#).unwrap();
        assert!(body.address.is_none());
    }

    #[tokio::test]
    async fn test_dedup_issues_one_lookup_per_key() {
        for batch_size in [1, 2, 5, 10] {
            let mut records: Vec<_> = (0..10)
                .map(|i| {
                    if i % 2 == 0 {
                        record_at(i, 40.44612 + i as f64 * 1e-5, -79.98221)
                    } else {
                        record_at(i, 35.6762, 139.6503)
                    }
                })
                .collect();
            let geocoder = FakeGeocoder::default();

            let ctx = resolve_place_names(&mut records, &geocoder, fast(batch_size), None).await;

            assert_eq!(geocoder.calls.load(Ordering::SeqCst), 2, "batch size {}", batch_size);
            assert_eq!(ctx.lookup_count(), 2);
            assert!(records.iter().all(|r| r.place_name().is_some()));
            assert_eq!(records[0].place_name(), records[8].place_name());
            assert_ne!(records[0].place_name(), records[1].place_name());
        }
    }

    #[tokio::test]
    async fn test_failure_and_timeout_become_unknown_location() {
        let failing = CoordinateKey::from_degrees(1.0, 1.0);
        let hanging = CoordinateKey::from_degrees(2.0, 2.0);
        let geocoder = FakeGeocoder {
            fail_for: Some(failing),
            hang_for: Some(hanging),
            ..Default::default()
        };
        let mut records = vec![
            record_at(0, 1.0, 1.0),
            record_at(1, 2.0, 2.0),
            record_at(2, 3.0, 3.0),
        ];

        resolve_place_names(&mut records, &geocoder, fast(5), None).await;

        assert_eq!(records[0].place_name(), Some(UNKNOWN_LOCATION));
        assert_eq!(records[1].place_name(), Some(UNKNOWN_LOCATION));
        assert_eq!(records[2].place_name(), Some("Place 3.000,3.000"));
    }

    #[tokio::test]
    async fn test_existing_names_are_kept() {
        let mut records = vec![record_at(0, 10.0, 10.0), record_at(1, 10.0, 10.0)];
        records[0].gps.as_mut().unwrap().resolved_place_name = Some("Home".into());
        let geocoder = FakeGeocoder::default();

        resolve_place_names(&mut records, &geocoder, fast(5), None).await;

        assert_eq!(records[0].place_name(), Some("Home"));
        assert_eq!(records[1].place_name(), Some("Place 10.000,10.000"));
        assert_eq!(geocoder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_progress_is_cumulative_per_batch() {
        let mut records: Vec<_> = (0..7).map(|i| record_at(i, i as f64, 0.0)).collect();
        let seen = Mutex::new(Vec::new());
        let observer = |n: usize| seen.lock().unwrap().push(n);

        resolve_place_names(&mut records, &FakeGeocoder::default(), fast(3), Some(&observer)).await;

        assert_eq!(*seen.lock().unwrap(), vec![3, 6, 7]);
    }

    #[tokio::test]
    async fn test_records_without_gps_need_no_lookups() {
        let mut records = vec![EnhancedImageRecord::new(0, PreviewHandle::new(vec![0u8], "image/png"))];
        let geocoder = FakeGeocoder::default();
        let ctx = resolve_place_names(&mut records, &geocoder, fast(5), None).await;
        assert_eq!(ctx.lookup_count(), 0);
        assert!(records[0].gps.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_wait_for_the_delay() {
        let mut records: Vec<_> = (0..6).map(|i| record_at(i, i as f64, 1.0)).collect();
        let settings = ResolveSettings {
            batch_size: 2,
            batch_delay: Duration::from_millis(1000),
            request_timeout: Duration::from_secs(10),
        };
        let start = tokio::time::Instant::now();

        resolve_place_names(&mut records, &FakeGeocoder::default(), settings, None).await;

        // Three batches, two pauses between them
        assert!(start.elapsed() >= Duration::from_millis(2000));
        assert!(start.elapsed() < Duration::from_millis(3000));
    }
}
