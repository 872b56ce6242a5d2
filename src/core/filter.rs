use crate::io::archive::{ArchiveQuery, ImageArchive};
use crate::types::{bands, BoundingBox, ImageCollection, NdviError, NdviResult, RasterImage};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Image filter parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageFilterParams {
    /// First acquisition date kept (inclusive)
    pub date_start: NaiveDate,
    /// Last acquisition date kept (inclusive)
    pub date_end: NaiveDate,
    /// Images must have strictly less cloud cover than this (percent); `None` keeps all
    pub max_cloud_percent: Option<f64>,
    /// Bands retained on every image
    pub bands: Vec<String>,
}

impl Default for ImageFilterParams {
    fn default() -> Self {
        Self {
            date_start: NaiveDate::from_ymd_opt(2024, 1, 10).unwrap_or_default(),
            date_end: NaiveDate::from_ymd_opt(2024, 2, 28).unwrap_or_default(),
            max_cloud_percent: Some(20.0),
            bands: vec![bands::RED.to_string(), bands::NIR.to_string(), bands::SWIR.to_string()],
        }
    }
}

/// Date / cloud-cover / band selector over an image collection
#[derive(Debug, Clone)]
pub struct ImageFilter {
    params: ImageFilterParams,
}

impl ImageFilter {
    /// Create a filter, validating its parameters
    pub fn new(params: ImageFilterParams) -> NdviResult<Self> {
        if params.date_start > params.date_end {
            return Err(NdviError::InvalidParameter(format!(
                "date_start {} is after date_end {}",
                params.date_start, params.date_end
            )));
        }
        if params.bands.is_empty() {
            return Err(NdviError::InvalidParameter("at least one band must be selected".to_string()));
        }
        if let Some(ceiling) = params.max_cloud_percent {
            if !(ceiling.is_finite() && ceiling > 0.0) {
                return Err(NdviError::InvalidParameter(format!(
                    "max_cloud_percent must be a positive number, got {}",
                    ceiling
                )));
            }
        }
        Ok(Self { params })
    }

    pub fn params(&self) -> &ImageFilterParams {
        &self.params
    }

    /// Date and cloud-cover test for one image
    pub fn accepts(&self, image: &RasterImage) -> bool {
        let date = image.acquisition_date();
        let in_window = date >= self.params.date_start && date <= self.params.date_end;
        let clear_enough = self
            .params
            .max_cloud_percent
            .map_or(true, |ceiling| image.cloud_cover < ceiling);
        in_window && clear_enough
    }

    /// Apply the filter to an in-memory collection
    pub fn apply(&self, collection: &ImageCollection) -> NdviResult<ImageCollection> {
        log::debug!(
            "Filtering {} images: {}..={}, cloud < {:?}, bands {:?}",
            collection.len(),
            self.params.date_start,
            self.params.date_end,
            self.params.max_cloud_percent,
            self.params.bands
        );

        let selected = collection
            .iter()
            .filter(|img| self.accepts(img))
            .map(|img| img.select(&self.params.bands))
            .collect::<NdviResult<Vec<_>>>()?;

        log::info!("Image filter kept {} of {} images", selected.len(), collection.len());
        Ok(ImageCollection::new(selected))
    }

    /// Archive request matching this filter
    pub fn archive_query(&self, bounds: Option<BoundingBox>) -> ArchiveQuery {
        ArchiveQuery {
            bands: self.params.bands.clone(),
            date_start: self.params.date_start,
            date_end: self.params.date_end,
            cloud_ceiling: self.params.max_cloud_percent,
            bounds,
        }
    }

    /// Query `archive` and filter the returned images
    pub fn query(&self, archive: &dyn ImageArchive, bounds: Option<BoundingBox>) -> NdviResult<ImageCollection> {
        let query = self.archive_query(bounds);
        log::info!("Querying archive '{}'", archive.name());
        let images = archive.query(&query)?;
        self.apply(&ImageCollection::new(images))
    }
}
