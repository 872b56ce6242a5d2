use crate::core::composite::{self, CompositeStrategy};
use crate::types::{bands, BandData, GridSpec, ImageCollection, NdviError, NdviRaster, NdviResult, RasterImage};
use ndarray::Zip;
use serde::{Deserialize, Serialize};

/// Default lower bound for the vegetation mask
pub const DEFAULT_MASK_EPSILON: f32 = 0.001;

/// NDVI band-math parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NdviParams {
    pub nir_band: String,
    pub red_band: String,
    /// Pixels below this value are masked (water, dense cloud)
    pub mask_epsilon: f32,
}

impl Default for NdviParams {
    fn default() -> Self {
        Self {
            nir_band: bands::NIR.to_string(),
            red_band: bands::RED.to_string(),
            mask_epsilon: DEFAULT_MASK_EPSILON,
        }
    }
}

#[inline]
fn normalized_difference_pixel(a: f32, b: f32) -> f32 {
    // Negative reflectance is invalid input and would leave [-1, 1]
    if a.is_nan() || b.is_nan() || a < 0.0 || b < 0.0 {
        return f32::NAN;
    }
    let sum = a + b;
    if sum == 0.0 {
        return f32::NAN;
    }
    (a - b) / sum
}

/// `(a - b) / (a + b)` per pixel; NaN where either input is masked or the sum is zero
pub fn normalized_difference(band_a: &BandData, band_b: &BandData) -> NdviResult<BandData> {
    if band_a.dim() != band_b.dim() {
        let (er, ec) = band_a.dim();
        let (ar, ac) = band_b.dim();
        return Err(NdviError::DimensionMismatch { er, ec, ar, ac });
    }

    #[cfg(feature = "parallel")]
    let result = Zip::from(band_a)
        .and(band_b)
        .par_map_collect(|&a, &b| normalized_difference_pixel(a, b));

    #[cfg(not(feature = "parallel"))]
    let result = Zip::from(band_a)
        .and(band_b)
        .map_collect(|&a, &b| normalized_difference_pixel(a, b));

    Ok(result)
}

/// NDVI of a single acquisition
pub fn compute_ndvi(image: &RasterImage, nir_band: &str, red_band: &str) -> NdviResult<NdviRaster> {
    let nir = image.band(nir_band)?;
    let red = image.band(red_band)?;
    let data = normalized_difference(nir, red)?;
    Ok(NdviRaster::new(data, image.transform, Some(image.timestamp)))
}

/// Mask every pixel below `epsilon`; defined values at or above it are unchanged
pub fn mask_non_positive(raster: &NdviRaster, epsilon: f32) -> NdviRaster {
    let data = raster.data.mapv(|v| if v < epsilon { f32::NAN } else { v });
    NdviRaster::new(data, raster.transform, raster.timestamp)
}

/// NDVI processor
#[derive(Debug, Clone, Default)]
pub struct NdviEngine {
    params: NdviParams,
}

impl NdviEngine {
    /// Create an engine for Sentinel-2 B8/B4 with the default mask
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(params: NdviParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &NdviParams {
        &self.params
    }

    /// Per-image NDVI
    pub fn compute(&self, image: &RasterImage) -> NdviResult<NdviRaster> {
        compute_ndvi(image, &self.params.nir_band, &self.params.red_band)
    }

    /// Per-image NDVI for a whole collection, in collection order
    pub fn compute_collection(&self, collection: &ImageCollection) -> NdviResult<Vec<NdviRaster>> {
        log::debug!("Computing NDVI for {} images", collection.len());
        collection.iter().map(|img| self.compute(img)).collect()
    }

    /// Apply the configured vegetation mask
    pub fn mask(&self, raster: &NdviRaster) -> NdviRaster {
        mask_non_positive(raster, self.params.mask_epsilon)
    }

    /// Per-pixel median of NDVI rasters on `grid`
    pub fn composite(&self, rasters: &[NdviRaster], grid: &GridSpec) -> NdviRaster {
        composite::median_composite(rasters, grid)
    }

    /// Composite a filtered collection with the chosen strategy
    pub fn composite_collection(
        &self,
        collection: &ImageCollection,
        grid: &GridSpec,
        strategy: CompositeStrategy,
    ) -> NdviResult<NdviRaster> {
        log::info!(
            "Compositing {} images onto {}x{} grid ({:?})",
            collection.len(),
            grid.rows,
            grid.cols,
            strategy
        );

        match strategy {
            CompositeStrategy::NdviMedian => {
                let rasters = self.compute_collection(collection)?;
                Ok(self.composite(&rasters, grid))
            }
            CompositeStrategy::BandMedian => {
                let band_names = [self.params.nir_band.as_str(), self.params.red_band.as_str()];
                let median = composite::band_median_composite(collection, &band_names, grid)?;
                let mut ndvi = self.compute(&median)?;
                ndvi.timestamp = None;
                Ok(ndvi)
            }
        }
    }
}
