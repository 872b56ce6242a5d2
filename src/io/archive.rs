use crate::types::{BoundingBox, NdviError, NdviResult, RasterImage};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Request sent to an imagery archive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveQuery {
    pub bands: Vec<String>,
    /// First acquisition date (inclusive)
    pub date_start: NaiveDate,
    /// Last acquisition date (inclusive)
    pub date_end: NaiveDate,
    /// Strict upper bound on scene cloud cover, in percent
    pub cloud_ceiling: Option<f64>,
    /// Only images intersecting this box
    pub bounds: Option<BoundingBox>,
}

impl ArchiveQuery {
    /// Date, cloud and footprint test (band availability is checked on selection)
    pub fn matches(&self, image: &RasterImage) -> bool {
        let date = image.acquisition_date();
        date >= self.date_start
            && date <= self.date_end
            && self.cloud_ceiling.map_or(true, |c| image.cloud_cover < c)
            && self.bounds.map_or(true, |b| image.bounds().intersects(&b))
    }

    /// Cloud cover to record for a scene. A scene without reported cover takes
    /// `fallback`; with no fallback it is kept only when no ceiling applies, and
    /// is then recorded as fully cloudy.
    pub fn resolve_cloud_cover(&self, reported: Option<f64>, fallback: Option<f64>) -> Option<f64> {
        match (reported, fallback, self.cloud_ceiling) {
            (Some(cover), _, _) => Some(cover),
            (None, Some(cover), _) => Some(cover),
            (None, None, Some(_)) => None,
            (None, None, None) => Some(100.0),
        }
    }
}

/// Source of time-stamped multi-band imagery
pub trait ImageArchive: Send + Sync {
    fn name(&self) -> &str;

    /// Images matching `query`, restricted to the requested bands and ordered by
    /// acquisition time. An empty result is not an error.
    fn query(&self, query: &ArchiveQuery) -> NdviResult<Vec<RasterImage>>;
}

impl<A: ImageArchive + ?Sized> ImageArchive for Box<A> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn query(&self, query: &ArchiveQuery) -> NdviResult<Vec<RasterImage>> {
        (**self).query(query)
    }
}

impl<A: ImageArchive + ?Sized> ImageArchive for Arc<A> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn query(&self, query: &ArchiveQuery) -> NdviResult<Vec<RasterImage>> {
        (**self).query(query)
    }
}

/// Archive over images already held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryArchive {
    name: String,
    images: Vec<RasterImage>,
}

impl InMemoryArchive {
    pub fn new(images: Vec<RasterImage>) -> Self {
        Self {
            name: "in-memory".to_string(),
            images,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn push(&mut self, image: RasterImage) {
        self.images.push(image);
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

impl ImageArchive for InMemoryArchive {
    fn name(&self) -> &str {
        &self.name
    }

    fn query(&self, query: &ArchiveQuery) -> NdviResult<Vec<RasterImage>> {
        let mut images = self
            .images
            .iter()
            .filter(|img| query.matches(img))
            .map(|img| img.select(&query.bands))
            .collect::<NdviResult<Vec<_>>>()?;
        images.sort_by_key(|img| img.timestamp);
        log::debug!("Archive '{}' returned {} images", self.name, images.len());
        Ok(images)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct QueryKey {
    date_start: NaiveDate,
    date_end: NaiveDate,
    cloud_ceiling: Option<u64>,
    bands: Vec<String>,
    bounds: Option<[u64; 4]>,
}

impl From<&ArchiveQuery> for QueryKey {
    fn from(q: &ArchiveQuery) -> Self {
        Self {
            date_start: q.date_start,
            date_end: q.date_end,
            cloud_ceiling: q.cloud_ceiling.map(f64::to_bits),
            bands: q.bands.clone(),
            bounds: q
                .bounds
                .map(|b| [b.min_lon.to_bits(), b.min_lat.to_bits(), b.max_lon.to_bits(), b.max_lat.to_bits()]),
        }
    }
}

/// Memoizes successful queries of an expensive archive
pub struct CachedArchive<A> {
    inner: A,
    cache: Mutex<HashMap<QueryKey, Vec<RasterImage>>>,
}

impl<A: ImageArchive> CachedArchive<A> {
    pub fn new(inner: A) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn inner(&self) -> &A {
        &self.inner
    }

    /// Number of memoized queries
    pub fn cached_queries(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or_else(|p| p.into_inner().len())
    }

    pub fn clear(&self) {
        match self.cache.lock() {
            Ok(mut cache) => cache.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}

impl<A: ImageArchive> ImageArchive for CachedArchive<A> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn query(&self, query: &ArchiveQuery) -> NdviResult<Vec<RasterImage>> {
        let key = QueryKey::from(query);
        {
            let cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(images) = cache.get(&key) {
                log::debug!("Archive cache hit for {}..={}", query.date_start, query.date_end);
                return Ok(images.clone());
            }
        }

        // Failures are not memoized so that retries reach the archive
        let images = self.inner.query(query)?;
        self.cache
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(key, images.clone());
        Ok(images)
    }
}

/// Exponential backoff for retryable archive failures
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            multiplier: 2.0,
        }
    }
}

/// Query with retries on `ArchiveUnavailable`; other errors return immediately
pub fn query_with_retry(
    archive: &dyn ImageArchive,
    query: &ArchiveQuery,
    policy: &RetryPolicy,
) -> NdviResult<Vec<RasterImage>> {
    let attempts = policy.max_attempts.max(1);
    let mut backoff = policy.initial_backoff;

    for attempt in 1..=attempts {
        match archive.query(query) {
            Err(e) if e.is_retryable() && attempt < attempts => {
                log::warn!(
                    "Archive '{}' attempt {}/{} failed: {}; retrying in {:?}",
                    archive.name(),
                    attempt,
                    attempts,
                    e,
                    backoff
                );
                std::thread::sleep(backoff);
                backoff = backoff.mul_f64(policy.multiplier.max(1.0));
            }
            result => return result,
        }
    }

    Err(NdviError::ArchiveUnavailable(format!(
        "archive '{}' gave up after {} attempts",
        archive.name(),
        attempts
    )))
}

/// Acquisition time embedded in a Sentinel-2 product or granule name
/// (first `YYYYMMDDTHHMMSS` stamp)
pub fn parse_acquisition_time(name: &str) -> Option<DateTime<Utc>> {
    let re = regex::Regex::new(r"(\d{8}T\d{6})").ok()?;
    let stamp = re.captures(name)?.get(1)?.as_str();
    NaiveDateTime::parse_from_str(stamp, "%Y%m%dT%H%M%S")
        .ok()
        .map(|dt| dt.and_utc())
}
