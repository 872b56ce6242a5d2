use crate::types::{BandData, GeoTransform, GridSpec, ImageCollection, NdviRaster, NdviResult, RasterImage};
use chrono::{DateTime, Utc};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

/// How a stack of acquisitions is reduced to one NDVI raster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositeStrategy {
    /// Median of per-image NDVI values
    #[default]
    NdviMedian,
    /// NDVI of the per-band median reflectances
    BandMedian,
}

/// One input layer of a median stack
struct Layer<'a> {
    data: &'a BandData,
    transform: &'a GeoTransform,
    aligned: bool,
}

impl<'a> Layer<'a> {
    fn new(data: &'a BandData, transform: &'a GeoTransform, grid: &GridSpec) -> Self {
        let aligned = *transform == grid.transform && data.dim() == grid.dim();
        Self { data, transform, aligned }
    }

    /// Nearest-neighbour value under the centre of target pixel (row, col)
    fn value_at(&self, grid: &GridSpec, row: usize, col: usize) -> Option<f32> {
        let value = if self.aligned {
            self.data[[row, col]]
        } else {
            let (rows, cols) = self.data.dim();
            let center = grid.transform.pixel_center(row, col);
            let (r, c) = self.transform.pixel_of(center, rows, cols)?;
            self.data[[r, c]]
        };
        (!value.is_nan()).then_some(value)
    }
}

/// Median with the average of the two middle values for even counts
pub fn median(values: &mut [f32]) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let n = values.len();
    if n % 2 == 1 {
        Some(values[n / 2])
    } else {
        Some(((values[n / 2 - 1] as f64 + values[n / 2] as f64) / 2.0) as f32)
    }
}

fn median_stack(layers: &[Layer<'_>], grid: &GridSpec) -> BandData {
    let mut output = Array2::from_elem(grid.dim(), f32::NAN);

    let pixel = |(row, col): (usize, usize), out: &mut f32| {
        let mut values: Vec<f32> = layers
            .iter()
            .filter_map(|layer| layer.value_at(grid, row, col))
            .collect();
        *out = median(&mut values).unwrap_or(f32::NAN);
    };

    #[cfg(feature = "parallel")]
    Zip::indexed(&mut output).par_for_each(pixel);

    #[cfg(not(feature = "parallel"))]
    Zip::indexed(&mut output).for_each(pixel);

    output
}

/// Per-pixel median of NDVI rasters resampled onto `grid`.
///
/// Pixels with no defined observation stay undefined; an empty input yields an
/// all-undefined raster. The result does not depend on input order.
pub fn median_composite(rasters: &[NdviRaster], grid: &GridSpec) -> NdviRaster {
    if rasters.is_empty() {
        log::warn!("Median composite of an empty stack; result is fully masked");
        return NdviRaster::undefined(grid);
    }

    let layers: Vec<Layer<'_>> = rasters
        .iter()
        .map(|r| Layer::new(&r.data, &r.transform, grid))
        .collect();
    let data = median_stack(&layers, grid);

    let composite = NdviRaster::new(data, grid.transform, None);
    log::debug!(
        "Median composite of {} rasters: {} valid pixels",
        rasters.len(),
        composite.valid_count()
    );
    composite
}

/// Per-band median image of a collection on `grid`
pub fn band_median_composite(
    collection: &ImageCollection,
    band_names: &[&str],
    grid: &GridSpec,
) -> NdviResult<RasterImage> {
    let timestamp = collection
        .images()
        .first()
        .map(|img| img.timestamp)
        .unwrap_or_else(DateTime::<Utc>::default);
    let mut composite = RasterImage::new("median", timestamp, 0.0, grid.transform);

    for &band in band_names {
        let layers = collection
            .iter()
            .map(|img| Ok(Layer::new(img.band(band)?, &img.transform, grid)))
            .collect::<NdviResult<Vec<_>>>()?;
        let data = if layers.is_empty() {
            Array2::from_elem(grid.dim(), f32::NAN)
        } else {
            median_stack(&layers, grid)
        };
        composite = composite.with_band(band, data)?;
    }

    Ok(composite)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn grid() -> GridSpec {
        GridSpec::new(GeoTransform::north_up(0.0, 2.0, 1.0, 1.0), 2, 2)
    }

    fn raster(data: BandData) -> NdviRaster {
        NdviRaster::new(data, grid().transform, None)
    }

    #[test]
    fn test_median_odd_even() {
        assert_eq!(median(&mut [0.3, 0.1, 0.2]), Some(0.2));
        assert_abs_diff_eq!(median(&mut [0.5, 0.0]).unwrap(), 0.25);
        assert_eq!(median(&mut []), None);
    }

    #[test]
    fn test_single_image_passthrough() {
        let input = raster(array![[0.2, f32::NAN], [-0.3, 0.9]]);
        let composite = median_composite(std::slice::from_ref(&input), &grid());
        assert_eq!(composite.get(0, 0), Some(0.2));
        assert_eq!(composite.get(0, 1), None);
        assert_eq!(composite.get(1, 0), Some(-0.3));
        assert_eq!(composite.get(1, 1), Some(0.9));
    }

    #[test]
    fn test_empty_stack_is_undefined() {
        let composite = median_composite(&[], &grid());
        assert_eq!(composite.dim(), (2, 2));
        assert!(composite.is_all_undefined());
    }

    #[test]
    fn test_median_skips_masked_and_is_order_independent() {
        let a = raster(array![[0.1, f32::NAN], [0.4, f32::NAN]]);
        let b = raster(array![[0.3, f32::NAN], [f32::NAN, f32::NAN]]);
        let c = raster(array![[0.2, f32::NAN], [0.6, f32::NAN]]);

        let forward = median_composite(&[a.clone(), b.clone(), c.clone()], &grid());
        let reverse = median_composite(&[c, b, a], &grid());

        assert_eq!(forward.get(0, 0), Some(0.2));
        assert_abs_diff_eq!(forward.get(1, 0).unwrap(), 0.5, epsilon = 1e-6);
        assert_eq!(forward.get(0, 1), None);
        assert_eq!(forward.data.iter().map(|v| v.to_bits()).collect::<Vec<_>>(),
                   reverse.data.iter().map(|v| v.to_bits()).collect::<Vec<_>>());
    }

    #[test]
    fn test_resamples_partial_coverage() {
        // Covers only the left column of the target grid
        let narrow = NdviRaster::new(array![[0.7], [0.8]], GeoTransform::north_up(0.0, 2.0, 1.0, 1.0), None);
        let composite = median_composite(&[narrow], &grid());
        assert_eq!(composite.get(0, 0), Some(0.7));
        assert_eq!(composite.get(1, 0), Some(0.8));
        assert_eq!(composite.get(0, 1), None);
        assert_eq!(composite.get(1, 1), None);
    }
}
