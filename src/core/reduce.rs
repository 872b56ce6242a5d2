use crate::core::region::{Polygon, Region};
use crate::types::{GridSpec, LonLat, NdviError, NdviRaster, NdviResult};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Relative tolerance when matching a sampling scale to the native resolution
pub const SCALE_TOLERANCE: f64 = 0.02;

/// Named aggregation applied to the pixels of a region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reducer {
    #[default]
    Mean,
    Median,
    Min,
    Max,
    /// Number of defined pixels
    Count,
}

impl Reducer {
    fn apply(&self, values: &mut [f64]) -> Option<f64> {
        match self {
            Reducer::Count => Some(values.len() as f64),
            _ if values.is_empty() => None,
            Reducer::Mean => Some(values.iter().sum::<f64>() / values.len() as f64),
            Reducer::Median => {
                values.sort_by(|a, b| a.total_cmp(b));
                let n = values.len();
                Some(if n % 2 == 0 {
                    (values[n / 2 - 1] + values[n / 2]) / 2.0
                } else {
                    values[n / 2]
                })
            }
            Reducer::Min => values.iter().copied().reduce(f64::min),
            Reducer::Max => values.iter().copied().reduce(f64::max),
        }
    }
}

/// Outcome of reducing one raster over one region
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReductionResult {
    /// `None` when the region holds no defined pixel
    pub value: Option<f64>,
    /// Defined pixels that contributed
    pub valid_pixels: usize,
    /// Sampling-grid pixels covered by the region
    pub covered_pixels: usize,
}

impl ReductionResult {
    pub fn undefined() -> Self {
        Self {
            value: None,
            valid_pixels: 0,
            covered_pixels: 0,
        }
    }

    pub fn is_defined(&self) -> bool {
        self.value.is_some()
    }
}

/// Integer block factor between a native resolution and a requested sampling scale
pub fn scale_factor(native_m: f64, requested_m: f64) -> NdviResult<usize> {
    if !(requested_m.is_finite() && requested_m > 0.0) {
        return Err(NdviError::InvalidParameter(format!(
            "sampling scale must be positive, got {}",
            requested_m
        )));
    }
    if !(native_m.is_finite() && native_m > 0.0) {
        return Err(NdviError::InvalidParameter(format!(
            "native resolution must be positive, got {}",
            native_m
        )));
    }

    let ratio = requested_m / native_m;
    let factor = ratio.round();
    if factor < 1.0 || (ratio - factor).abs() > SCALE_TOLERANCE * factor {
        return Err(NdviError::ScaleMismatch {
            requested: requested_m,
            native: native_m,
        });
    }
    Ok(factor as usize)
}

/// Coarsen a raster by `factor`: each output pixel is the mean of the defined
/// pixels of its `factor` x `factor` block
pub fn aggregate(raster: &NdviRaster, factor: usize) -> NdviRaster {
    if factor <= 1 {
        return raster.clone();
    }
    let (rows, cols) = raster.dim();
    let out_rows = (rows + factor - 1) / factor;
    let out_cols = (cols + factor - 1) / factor;

    let data = Array2::from_shape_fn((out_rows, out_cols), |(r, c)| {
        let mut sum = 0.0f64;
        let mut count = 0usize;
        for i in (r * factor)..((r + 1) * factor).min(rows) {
            for j in (c * factor)..((c + 1) * factor).min(cols) {
                let v = raster.data[[i, j]];
                if !v.is_nan() {
                    sum += v as f64;
                    count += 1;
                }
            }
        }
        if count > 0 {
            (sum / count as f64) as f32
        } else {
            f32::NAN
        }
    });

    NdviRaster::new(data, raster.transform.coarsened(factor), raster.timestamp)
}

/// Region reducer at a fixed sampling scale
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpatialReducer {
    reducer: Reducer,
    /// Sampling-grid ground distance in metres
    scale: f64,
}

impl SpatialReducer {
    pub fn new(reducer: Reducer, scale: f64) -> NdviResult<Self> {
        if !(scale.is_finite() && scale > 0.0) {
            return Err(NdviError::InvalidParameter(format!(
                "sampling scale must be positive, got {}",
                scale
            )));
        }
        Ok(Self { reducer, scale })
    }

    /// Mean reducer at `scale` metres
    pub fn mean(scale: f64) -> NdviResult<Self> {
        Self::new(Reducer::Mean, scale)
    }

    pub fn reducer(&self) -> Reducer {
        self.reducer
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Check the scale against a grid; returns the block factor
    pub fn validate(&self, grid: &GridSpec) -> NdviResult<usize> {
        scale_factor(grid.ground_sample_distance(), self.scale)
    }

    /// Validate the scale and aggregate `raster` to it, once for any number of regions
    pub fn prepare<'a>(&self, raster: &'a NdviRaster) -> NdviResult<SampledRaster<'a>> {
        let factor = self.validate(&raster.grid())?;
        let raster = if factor == 1 {
            Cow::Borrowed(raster)
        } else {
            Cow::Owned(aggregate(raster, factor))
        };
        Ok(SampledRaster { raster, factor })
    }

    /// Reduce an already prepared raster over `region`
    pub fn reduce_prepared(&self, sampled: &SampledRaster<'_>, region: &Region) -> NdviResult<ReductionResult> {
        let (mut values, covered) = match region {
            Region::Point(point) => sample_point(&sampled.raster, *point)?,
            Region::Polygon(polygon) => sample_polygon(&sampled.raster, polygon)?,
        };

        Ok(ReductionResult {
            valid_pixels: values.len(),
            value: self.reducer.apply(&mut values),
            covered_pixels: covered,
        })
    }

    /// Reduce `raster` over `region`
    pub fn reduce(&self, raster: &NdviRaster, region: &Region) -> NdviResult<ReductionResult> {
        let sampled = self.prepare(raster)?;
        self.reduce_prepared(&sampled, region)
    }

    /// Reduce `raster` over each region with a single aggregation pass.
    ///
    /// A scale mismatch fails the whole call; per-region failures are returned in place.
    pub fn reduce_many<'r, I>(&self, raster: &NdviRaster, regions: I) -> NdviResult<Vec<NdviResult<ReductionResult>>>
    where
        I: IntoIterator<Item = &'r Region>,
    {
        let sampled = self.prepare(raster)?;
        Ok(regions
            .into_iter()
            .map(|region| self.reduce_prepared(&sampled, region))
            .collect())
    }
}

/// Raster at a reducer's sampling scale
#[derive(Debug, Clone)]
pub struct SampledRaster<'a> {
    raster: Cow<'a, NdviRaster>,
    factor: usize,
}

impl SampledRaster<'_> {
    pub fn raster(&self) -> &NdviRaster {
        &self.raster
    }

    /// Native pixels per sampling pixel along each axis
    pub fn factor(&self) -> usize {
        self.factor
    }
}

/// Mean of `raster` over `region` at `scale` metres
pub fn reduce_mean(raster: &NdviRaster, region: &Region, scale: f64) -> NdviResult<ReductionResult> {
    SpatialReducer::mean(scale)?.reduce(raster, region)
}

fn sample_point(raster: &NdviRaster, point: LonLat) -> NdviResult<(Vec<f64>, usize)> {
    let (rows, cols) = raster.dim();
    let (row, col) = raster.transform.pixel_of(point, rows, cols).ok_or_else(|| {
        NdviError::RegionOutsideExtent(format!("point ({}, {})", point.lon, point.lat))
    })?;
    let values = raster.get(row, col).map(|v| vec![v as f64]).unwrap_or_default();
    Ok((values, 1))
}

fn sample_polygon(raster: &NdviRaster, polygon: &Polygon) -> NdviResult<(Vec<f64>, usize)> {
    let bounds = polygon.bounds();
    if !polygon.intersects(&raster.bounds()) {
        return Err(NdviError::RegionOutsideExtent(format!("polygon {:?}", bounds)));
    }

    let (rows, cols) = raster.dim();
    let (r0, c0) = raster.transform.geo_to_pixel(LonLat::new(bounds.min_lon, bounds.max_lat));
    let (r1, c1) = raster.transform.geo_to_pixel(LonLat::new(bounds.max_lon, bounds.min_lat));
    let clamp = |v: f64, len: usize| (v.max(0.0).floor() as usize).min(len.saturating_sub(1));
    let (row_start, row_end) = (clamp(r0.min(r1), rows), clamp(r0.max(r1), rows));
    let (col_start, col_end) = (clamp(c0.min(c1), cols), clamp(c0.max(c1), cols));

    let mut values = Vec::new();
    let mut covered = 0;
    for row in row_start..=row_end {
        for col in col_start..=col_end {
            if polygon.contains(raster.transform.pixel_center(row, col)) {
                covered += 1;
                if let Some(v) = raster.get(row, col) {
                    values.push(v as f64);
                }
            }
        }
    }

    // Polygons smaller than a sampling pixel fall back to the pixel under their centroid
    if covered == 0 {
        if let Some((row, col)) = raster.transform.pixel_of(polygon.centroid(), rows, cols) {
            covered = 1;
            if let Some(v) = raster.get(row, col) {
                values.push(v as f64);
            }
        }
    }

    Ok((values, covered))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, GeoTransform};
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    /// 4x4 raster of 10 m pixels at the equator
    fn raster(data: Array2<f32>) -> NdviRaster {
        let px = 10.0 / crate::types::METERS_PER_DEGREE;
        NdviRaster::new(data, GeoTransform::north_up(0.0, 4.0 * px, px, px), None)
    }

    fn px() -> f64 {
        10.0 / crate::types::METERS_PER_DEGREE
    }

    #[test]
    fn test_scale_factor() {
        assert_eq!(scale_factor(10.0, 10.0).unwrap(), 1);
        assert_eq!(scale_factor(10.0, 500.0).unwrap(), 50);
        assert_eq!(scale_factor(10.0, 10.1).unwrap(), 1);
        assert!(matches!(scale_factor(10.0, 25.0), Err(NdviError::ScaleMismatch { .. })));
        assert!(matches!(scale_factor(10.0, 5.0), Err(NdviError::ScaleMismatch { .. })));
        assert!(scale_factor(10.0, 0.0).is_err());
    }

    #[test]
    fn test_point_sample() {
        let r = raster(array![
            [0.1, 0.2, 0.3, 0.4],
            [0.5, 0.6, 0.7, 0.8],
            [0.9, f32::NAN, 0.1, 0.2],
            [0.3, 0.4, 0.5, 0.6]
        ]);
        let p = px();
        let hit = reduce_mean(&r, &Region::Point(LonLat::new(2.5 * p, 2.5 * p)), 10.0).unwrap();
        assert_abs_diff_eq!(hit.value.unwrap(), 0.7, epsilon = 1e-6);

        let masked = reduce_mean(&r, &Region::Point(LonLat::new(1.5 * p, 1.5 * p)), 10.0).unwrap();
        assert_eq!(masked.value, None);
        assert_eq!(masked.covered_pixels, 1);
    }

    #[test]
    fn test_polygon_mean_ignores_masked() {
        let r = raster(array![
            [0.2, 0.4, 0.0, 0.0],
            [f32::NAN, 0.6, 0.0, 0.0],
            [0.0, 0.0, 0.0, 0.0],
            [0.0, 0.0, 0.0, 0.0]
        ]);
        let p = px();
        // Top-left 2x2 block
        let region = Region::from(BoundingBox::new(0.0, 2.0 * p, 2.0 * p, 4.0 * p));
        let result = reduce_mean(&r, &region, 10.0).unwrap();
        assert_eq!(result.covered_pixels, 4);
        assert_eq!(result.valid_pixels, 3);
        assert_abs_diff_eq!(result.value.unwrap(), 0.4, epsilon = 1e-6);
    }

    #[test]
    fn test_all_masked_is_undefined_not_zero() {
        let r = raster(Array2::from_elem((4, 4), f32::NAN));
        let region = Region::from(r.bounds());
        let result = reduce_mean(&r, &region, 10.0).unwrap();
        assert_eq!(result.value, None);
        assert_eq!(result.covered_pixels, 16);
    }

    #[test]
    fn test_region_outside_extent() {
        let r = raster(Array2::from_elem((4, 4), 0.5));
        let far = Region::Point(LonLat::new(10.0, 10.0));
        assert!(matches!(reduce_mean(&r, &far, 10.0), Err(NdviError::RegionOutsideExtent(_))));

        let far_poly = Region::from(BoundingBox::new(5.0, 5.0, 6.0, 6.0));
        assert!(matches!(reduce_mean(&r, &far_poly, 10.0), Err(NdviError::RegionOutsideExtent(_))));
    }

    #[test]
    fn test_scale_mismatch_is_reported() {
        let r = raster(Array2::from_elem((4, 4), 0.5));
        let result = reduce_mean(&r, &Region::Point(LonLat::new(px(), px())), 15.0);
        assert!(matches!(result, Err(NdviError::ScaleMismatch { .. })));
    }

    #[test]
    fn test_coarser_scale_aggregates_blocks() {
        let r = raster(array![
            [0.1, 0.3, 0.8, 0.8],
            [0.5, f32::NAN, 0.8, 0.8],
            [0.0, 0.0, 0.2, 0.2],
            [0.0, 0.0, 0.2, 0.2]
        ]);
        let coarse = aggregate(&r, 2);
        assert_eq!(coarse.dim(), (2, 2));
        assert_abs_diff_eq!(coarse.get(0, 0).unwrap(), 0.3, epsilon = 1e-6);

        let p = px();
        let result = reduce_mean(&r, &Region::Point(LonLat::new(0.5 * p, 3.5 * p)), 20.0).unwrap();
        assert_abs_diff_eq!(result.value.unwrap(), 0.3, epsilon = 1e-6);
    }

    #[test]
    fn test_small_polygon_uses_centroid_pixel() {
        let r = raster(Array2::from_elem((4, 4), 0.42));
        let p = px();
        // Entirely inside pixel (0, 0) without covering its centre
        let tiny = Region::from(BoundingBox::new(0.1 * p, 3.6 * p, 0.3 * p, 3.8 * p));
        let result = reduce_mean(&r, &tiny, 10.0).unwrap();
        assert_eq!(result.covered_pixels, 1);
        assert_abs_diff_eq!(result.value.unwrap(), 0.42, epsilon = 1e-6);
    }

    #[test]
    fn test_other_reducers() {
        let r = raster(array![
            [0.1, 0.2, 0.0, 0.0],
            [0.3, 0.9, 0.0, 0.0],
            [0.0, 0.0, 0.0, 0.0],
            [0.0, 0.0, 0.0, 0.0]
        ]);
        let p = px();
        let region = Region::from(BoundingBox::new(0.0, 2.0 * p, 2.0 * p, 4.0 * p));
        let run = |reducer| SpatialReducer::new(reducer, 10.0).unwrap().reduce(&r, &region).unwrap().value.unwrap();

        assert_abs_diff_eq!(run(Reducer::Median), 0.25, epsilon = 1e-6);
        assert_abs_diff_eq!(run(Reducer::Min), 0.1, epsilon = 1e-6);
        assert_abs_diff_eq!(run(Reducer::Max), 0.9, epsilon = 1e-6);
        assert_eq!(run(Reducer::Count), 4.0);
    }

    #[test]
    fn test_reduction_is_reproducible() {
        let r = raster(Array2::from_shape_fn((4, 4), |(i, j)| (i * 4 + j) as f32 / 17.0));
        let region = Region::from(r.bounds());
        let a = reduce_mean(&r, &region, 10.0).unwrap();
        let b = reduce_mean(&r, &region, 10.0).unwrap();
        assert_eq!(a.value.map(f64::to_bits), b.value.map(f64::to_bits));
    }

    #[test]
    fn test_reduce_many_matches_single_reductions() {
        let r = raster(array![
            [0.1, 0.3, 0.8, 0.8],
            [0.5, f32::NAN, 0.8, 0.8],
            [0.0, 0.0, 0.2, 0.2],
            [0.0, 0.4, 0.2, 0.2]
        ]);
        let p = px();
        let regions = vec![
            Region::Point(LonLat::new(0.5 * p, 3.5 * p)),
            Region::Point(LonLat::new(3.5 * p, 0.5 * p)),
            Region::from(r.bounds()),
            Region::Point(LonLat::new(10.0, 10.0)),
        ];
        let reducer = SpatialReducer::mean(20.0).unwrap();

        let sampled = reducer.prepare(&r).unwrap();
        assert_eq!(sampled.factor(), 2);
        assert_eq!(sampled.raster().dim(), (2, 2));

        let many = reducer.reduce_many(&r, &regions).unwrap();
        assert_eq!(many.len(), regions.len());
        for (region, result) in regions.iter().zip(&many) {
            match (reducer.reduce(&r, region), result) {
                (Ok(single), Ok(batched)) => assert_eq!(single, *batched),
                (Err(NdviError::RegionOutsideExtent(_)), Err(NdviError::RegionOutsideExtent(_))) => {}
                (single, batched) => panic!("{:?} != {:?}", single, batched),
            }
        }
        assert_abs_diff_eq!(many[0].as_ref().unwrap().value.unwrap(), 0.3, epsilon = 1e-6);
    }

    #[test]
    fn test_reduce_many_rejects_scale_once() {
        let r = raster(Array2::from_elem((4, 4), 0.5));
        let regions = [Region::Point(LonLat::new(px(), px()))];
        let result = SpatialReducer::mean(15.0).unwrap().reduce_many(&r, &regions);
        assert!(matches!(result, Err(NdviError::ScaleMismatch { .. })));
    }
}
