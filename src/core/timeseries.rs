use crate::core::ndvi::NdviEngine;
use crate::core::reduce::SpatialReducer;
use crate::core::region::Region;
use crate::core::sites::Site;
use crate::types::{ImageCollection, NdviError, NdviResult, RasterImage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// One acquisition of one site
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesEntry {
    pub timestamp: DateTime<Utc>,
    pub image_id: String,
    /// `None` when nothing was observed (masked, outside coverage)
    pub value: Option<f64>,
}

/// Acquisition-ordered NDVI series of one site
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    pub site: String,
    entries: Vec<TimeSeriesEntry>,
}

impl TimeSeries {
    pub fn new(site: impl Into<String>) -> Self {
        Self {
            site: site.into(),
            entries: Vec::new(),
        }
    }

    /// Build from entries in any order; entries are stably sorted by timestamp
    pub fn from_entries(site: impl Into<String>, mut entries: Vec<TimeSeriesEntry>) -> Self {
        entries.sort_by_key(|e| e.timestamp);
        Self {
            site: site.into(),
            entries,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[TimeSeriesEntry] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TimeSeriesEntry> {
        self.entries.iter()
    }

    pub fn timestamps(&self) -> Vec<DateTime<Utc>> {
        self.entries.iter().map(|e| e.timestamp).collect()
    }

    pub fn values(&self) -> Vec<Option<f64>> {
        self.entries.iter().map(|e| e.value).collect()
    }

    /// Number of entries with a value
    pub fn defined_count(&self) -> usize {
        self.entries.iter().filter(|e| e.value.is_some()).count()
    }

    pub fn is_sorted(&self) -> bool {
        self.entries.windows(2).all(|w| w[0].timestamp <= w[1].timestamp)
    }
}

struct Cell {
    site: usize,
    image: usize,
    entry: TimeSeriesEntry,
}

/// Per-acquisition NDVI reduction for a set of sites
#[derive(Debug, Clone)]
pub struct TimeSeriesBuilder {
    engine: NdviEngine,
    reducer: SpatialReducer,
}

impl TimeSeriesBuilder {
    pub fn new(engine: NdviEngine, reducer: SpatialReducer) -> Self {
        Self { engine, reducer }
    }

    pub fn reducer(&self) -> &SpatialReducer {
        &self.reducer
    }

    /// Build one series per site with exactly one entry per image.
    ///
    /// A failing (image, site) pair yields an undefined entry; only a sampling
    /// scale incompatible with the collection is an error.
    pub fn build(
        &self,
        collection: &ImageCollection,
        sites: &[(Site, Region)],
    ) -> NdviResult<BTreeMap<String, TimeSeries>> {
        let mut names = HashSet::new();
        for (site, _) in sites {
            if !names.insert(site.name.as_str()) {
                return Err(NdviError::DuplicateSite(site.name.clone()));
            }
        }

        if let Some(first) = collection.images().first() {
            self.reducer.validate(&first.grid())?;
        }

        log::info!(
            "Building NDVI series for {} sites over {} images at {} m",
            sites.len(),
            collection.len(),
            self.reducer.scale()
        );

        let cells = self.compute_cells(collection.images(), sites);

        let mut per_site: Vec<Vec<(usize, TimeSeriesEntry)>> = vec![Vec::with_capacity(collection.len()); sites.len()];
        for cell in cells {
            per_site[cell.site].push((cell.image, cell.entry));
        }

        let series = sites
            .iter()
            .zip(per_site)
            .map(|((site, _), mut entries)| {
                // Completion order is not acquisition order
                entries.sort_by(|a, b| a.1.timestamp.cmp(&b.1.timestamp).then(a.0.cmp(&b.0)));
                let series = TimeSeries {
                    site: site.name.clone(),
                    entries: entries.into_iter().map(|(_, e)| e).collect(),
                };
                log::debug!(
                    "Series '{}': {} entries, {} defined",
                    series.site,
                    series.len(),
                    series.defined_count()
                );
                (site.name.clone(), series)
            })
            .collect();

        Ok(series)
    }

    #[cfg(feature = "parallel")]
    fn compute_cells(&self, images: &[RasterImage], sites: &[(Site, Region)]) -> Vec<Cell> {
        use rayon::prelude::*;

        images
            .par_iter()
            .enumerate()
            .flat_map_iter(|(index, image)| self.image_cells(index, image, sites))
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    fn compute_cells(&self, images: &[RasterImage], sites: &[(Site, Region)]) -> Vec<Cell> {
        images
            .iter()
            .enumerate()
            .flat_map(|(index, image)| self.image_cells(index, image, sites))
            .collect()
    }

    /// Reduce one image for every site, aggregating the image once
    fn image_cells(&self, index: usize, image: &RasterImage, sites: &[(Site, Region)]) -> Vec<Cell> {
        let results = match self.engine.compute(image) {
            Ok(ndvi) => match self.reducer.reduce_many(&ndvi, sites.iter().map(|(_, region)| region)) {
                Ok(results) => results,
                Err(e) => {
                    log::warn!("Cannot sample image {} at {} m: {}", image.id, self.reducer.scale(), e);
                    Vec::new()
                }
            },
            Err(e) => {
                log::warn!("NDVI unavailable for image {}: {}", image.id, e);
                Vec::new()
            }
        };
        let mut results = results.into_iter();

        sites
            .iter()
            .enumerate()
            .map(|(site_index, (site, _))| {
                let value = match results.next() {
                    Some(Ok(result)) => result.value,
                    Some(Err(NdviError::RegionOutsideExtent(_))) => {
                        log::debug!("Site '{}' not covered by image {}", site.name, image.id);
                        None
                    }
                    Some(Err(e)) => {
                        log::warn!("Reduction failed for site '{}' on image {}: {}", site.name, image.id, e);
                        None
                    }
                    None => None,
                };
                Cell {
                    site: site_index,
                    image: index,
                    entry: TimeSeriesEntry {
                        timestamp: image.timestamp,
                        image_id: image.id.clone(),
                        value,
                    },
                }
            })
            .collect()
    }
}
