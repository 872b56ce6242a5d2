use chrono::{DateTime, NaiveDate, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reflectance / index values of a single band (row x col). Masked pixels are NaN.
pub type BandData = Array2<f32>;

/// Metres per degree of latitude (spherical approximation)
pub const METERS_PER_DEGREE: f64 = 111_320.0;

/// Sentinel-2 band names used by the NDVI workflow
pub mod bands {
    /// Red, 10 m
    pub const RED: &str = "B4";
    /// Near-infrared, 10 m
    pub const NIR: &str = "B8";
    /// Short-wave infrared, 20 m
    pub const SWIR: &str = "B11";
}

/// Geographic position in decimal degrees (WGS84)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LonLat {
    pub lon: f64,
    pub lat: f64,
}

impl LonLat {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }
}

/// Geospatial bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self { min_lon, max_lon, min_lat, max_lat }
    }

    /// Square of `half_width_m` metres on each side of `center`
    pub fn square_around(center: LonLat, half_width_m: f64) -> Self {
        let (dlon, dlat) = meters_to_degrees(half_width_m, center.lat);
        Self {
            min_lon: center.lon - dlon,
            max_lon: center.lon + dlon,
            min_lat: center.lat - dlat,
            max_lat: center.lat + dlat,
        }
    }

    pub fn center(&self) -> LonLat {
        LonLat::new(
            (self.min_lon + self.max_lon) / 2.0,
            (self.min_lat + self.max_lat) / 2.0,
        )
    }

    pub fn contains(&self, point: LonLat) -> bool {
        point.lon >= self.min_lon
            && point.lon <= self.max_lon
            && point.lat >= self.min_lat
            && point.lat <= self.max_lat
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_lon <= other.max_lon
            && self.max_lon >= other.min_lon
            && self.min_lat <= other.max_lat
            && self.max_lat >= other.min_lat
    }

    /// Smallest box containing both boxes
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min_lon: self.min_lon.min(other.min_lon),
            max_lon: self.max_lon.max(other.max_lon),
            min_lat: self.min_lat.min(other.min_lat),
            max_lat: self.max_lat.max(other.max_lat),
        }
    }

    /// Grow the box by `distance_m` metres on every side
    pub fn buffer(&self, distance_m: f64) -> BoundingBox {
        let (dlon, dlat) = meters_to_degrees(distance_m, self.center().lat);
        BoundingBox {
            min_lon: self.min_lon - dlon,
            max_lon: self.max_lon + dlon,
            min_lat: self.min_lat - dlat,
            max_lat: self.max_lat + dlat,
        }
    }

    /// Closed exterior ring, counter-clockwise from the south-west corner
    pub fn ring(&self) -> Vec<LonLat> {
        vec![
            LonLat::new(self.min_lon, self.min_lat),
            LonLat::new(self.max_lon, self.min_lat),
            LonLat::new(self.max_lon, self.max_lat),
            LonLat::new(self.min_lon, self.max_lat),
            LonLat::new(self.min_lon, self.min_lat),
        ]
    }
}

/// Convert a ground distance to (longitude, latitude) degree offsets at `lat`
pub fn meters_to_degrees(distance_m: f64, lat: f64) -> (f64, f64) {
    let meters_per_degree_lon = METERS_PER_DEGREE * lat.to_radians().cos();
    (distance_m / meters_per_degree_lon, distance_m / METERS_PER_DEGREE)
}

/// Geospatial transformation parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform with no rotation
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            top_left_x,
            pixel_width,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height: -pixel_height.abs(),
        }
    }

    pub fn from_gdal(coeffs: [f64; 6]) -> Self {
        Self {
            top_left_x: coeffs[0],
            pixel_width: coeffs[1],
            rotation_x: coeffs[2],
            top_left_y: coeffs[3],
            rotation_y: coeffs[4],
            pixel_height: coeffs[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// Geographic coordinate of a pixel centre
    pub fn pixel_center(&self, row: usize, col: usize) -> LonLat {
        LonLat::new(
            self.top_left_x + (col as f64 + 0.5) * self.pixel_width,
            self.top_left_y + (row as f64 + 0.5) * self.pixel_height,
        )
    }

    /// Fractional (row, col) of a geographic coordinate
    pub fn geo_to_pixel(&self, point: LonLat) -> (f64, f64) {
        let col = (point.lon - self.top_left_x) / self.pixel_width;
        let row = (point.lat - self.top_left_y) / self.pixel_height;
        (row, col)
    }

    /// Pixel containing `point`, if it lies on a grid of `rows` x `cols`
    pub fn pixel_of(&self, point: LonLat, rows: usize, cols: usize) -> Option<(usize, usize)> {
        let (row, col) = self.geo_to_pixel(point);
        if !row.is_finite() || !col.is_finite() || row < 0.0 || col < 0.0 {
            return None;
        }
        let (row, col) = (row.floor() as usize, col.floor() as usize);
        (row < rows && col < cols).then_some((row, col))
    }

    /// Extent of a grid of `rows` x `cols`
    pub fn bounds(&self, rows: usize, cols: usize) -> BoundingBox {
        let x0 = self.top_left_x;
        let x1 = self.top_left_x + cols as f64 * self.pixel_width;
        let y0 = self.top_left_y;
        let y1 = self.top_left_y + rows as f64 * self.pixel_height;
        BoundingBox {
            min_lon: x0.min(x1),
            max_lon: x0.max(x1),
            min_lat: y0.min(y1),
            max_lat: y0.max(y1),
        }
    }

    /// Mean ground sample distance in metres at latitude `lat`
    pub fn ground_sample_distance(&self, lat: f64) -> f64 {
        let gsd_x = self.pixel_width.abs() * METERS_PER_DEGREE * lat.to_radians().cos();
        let gsd_y = self.pixel_height.abs() * METERS_PER_DEGREE;
        (gsd_x + gsd_y) / 2.0
    }

    /// Same origin with pixels `factor` times larger
    pub fn coarsened(&self, factor: usize) -> Self {
        Self {
            pixel_width: self.pixel_width * factor as f64,
            pixel_height: self.pixel_height * factor as f64,
            ..*self
        }
    }
}

/// Target grid for compositing and rendering
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub transform: GeoTransform,
    pub rows: usize,
    pub cols: usize,
}

impl GridSpec {
    pub fn new(transform: GeoTransform, rows: usize, cols: usize) -> Self {
        Self { transform, rows, cols }
    }

    /// North-up grid covering `bounds` with pixels of `spacing_m` metres
    pub fn from_bounds(bounds: &BoundingBox, spacing_m: f64) -> NdviResult<Self> {
        if !(spacing_m.is_finite() && spacing_m > 0.0) {
            return Err(NdviError::InvalidParameter(format!(
                "grid spacing must be positive, got {}",
                spacing_m
            )));
        }
        let lat_center = bounds.center().lat;
        let (pixel_size_lon, pixel_size_lat) = meters_to_degrees(spacing_m, lat_center);

        // Tolerate round-off so an exact multiple does not gain an extra column
        let cols = ((bounds.max_lon - bounds.min_lon) / pixel_size_lon - 1e-9).ceil().max(1.0) as usize;
        let rows = ((bounds.max_lat - bounds.min_lat) / pixel_size_lat - 1e-9).ceil().max(1.0) as usize;

        let transform = GeoTransform::north_up(bounds.min_lon, bounds.max_lat, pixel_size_lon, pixel_size_lat);
        Ok(Self { transform, rows, cols })
    }

    pub fn dim(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn bounds(&self) -> BoundingBox {
        self.transform.bounds(self.rows, self.cols)
    }

    pub fn ground_sample_distance(&self) -> f64 {
        self.transform.ground_sample_distance(self.bounds().center().lat)
    }
}

/// One multi-band acquisition from the archive
#[derive(Debug, Clone, PartialEq)]
pub struct RasterImage {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    /// Scene cloud cover in percent (CLOUDY_PIXEL_PERCENTAGE)
    pub cloud_cover: f64,
    pub transform: GeoTransform,
    bands: BTreeMap<String, BandData>,
}

impl RasterImage {
    pub fn new(
        id: impl Into<String>,
        timestamp: DateTime<Utc>,
        cloud_cover: f64,
        transform: GeoTransform,
    ) -> Self {
        Self {
            id: id.into(),
            timestamp,
            cloud_cover,
            transform,
            bands: BTreeMap::new(),
        }
    }

    /// Attach a band; every band of an image must share the same shape
    pub fn with_band(mut self, name: impl Into<String>, data: BandData) -> NdviResult<Self> {
        if let Some(existing) = self.bands.values().next() {
            if existing.dim() != data.dim() {
                let (er, ec) = existing.dim();
                let (ar, ac) = data.dim();
                return Err(NdviError::DimensionMismatch { er, ec, ar, ac });
            }
        }
        self.bands.insert(name.into(), data);
        Ok(self)
    }

    pub fn band(&self, name: &str) -> NdviResult<&BandData> {
        self.bands.get(name).ok_or_else(|| NdviError::BandNotFound {
            band: name.to_string(),
            image: self.id.clone(),
            available: self.band_names(),
        })
    }

    pub fn has_band(&self, name: &str) -> bool {
        self.bands.contains_key(name)
    }

    pub fn band_names(&self) -> Vec<String> {
        self.bands.keys().cloned().collect()
    }

    /// Copy of the image restricted to `names`
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> NdviResult<RasterImage> {
        let mut selected = BTreeMap::new();
        for name in names {
            let name = name.as_ref();
            selected.insert(name.to_string(), self.band(name)?.clone());
        }
        Ok(RasterImage {
            id: self.id.clone(),
            timestamp: self.timestamp,
            cloud_cover: self.cloud_cover,
            transform: self.transform,
            bands: selected,
        })
    }

    /// (rows, cols), or (0, 0) for an image without bands
    pub fn dim(&self) -> (usize, usize) {
        self.bands.values().next().map(|b| b.dim()).unwrap_or((0, 0))
    }

    pub fn grid(&self) -> GridSpec {
        let (rows, cols) = self.dim();
        GridSpec::new(self.transform, rows, cols)
    }

    pub fn bounds(&self) -> BoundingBox {
        self.grid().bounds()
    }

    pub fn acquisition_date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }
}

/// Timestamp-ordered set of images sharing band semantics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageCollection {
    images: Vec<RasterImage>,
}

impl ImageCollection {
    /// Build a collection; images are stably sorted by acquisition time
    pub fn new(mut images: Vec<RasterImage>) -> Self {
        images.sort_by_key(|img| img.timestamp);
        Self { images }
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RasterImage> {
        self.images.iter()
    }

    pub fn images(&self) -> &[RasterImage] {
        &self.images
    }

    pub fn timestamps(&self) -> Vec<DateTime<Utc>> {
        self.images.iter().map(|img| img.timestamp).collect()
    }

    /// Keep images whose extent intersects `bounds`
    pub fn filter_bounds(&self, bounds: &BoundingBox) -> ImageCollection {
        ImageCollection {
            images: self
                .images
                .iter()
                .filter(|img| img.bounds().intersects(bounds))
                .cloned()
                .collect(),
        }
    }

    pub fn into_images(self) -> Vec<RasterImage> {
        self.images
    }
}

impl<'a> IntoIterator for &'a ImageCollection {
    type Item = &'a RasterImage;
    type IntoIter = std::slice::Iter<'a, RasterImage>;

    fn into_iter(self) -> Self::IntoIter {
        self.images.iter()
    }
}

/// Single-band NDVI raster. Undefined pixels are NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct NdviRaster {
    pub data: BandData,
    pub transform: GeoTransform,
    /// Acquisition time for per-image rasters, `None` for composites
    pub timestamp: Option<DateTime<Utc>>,
}

impl NdviRaster {
    pub fn new(data: BandData, transform: GeoTransform, timestamp: Option<DateTime<Utc>>) -> Self {
        Self { data, transform, timestamp }
    }

    /// All-undefined raster on `grid`
    pub fn undefined(grid: &GridSpec) -> Self {
        Self {
            data: Array2::from_elem(grid.dim(), f32::NAN),
            transform: grid.transform,
            timestamp: None,
        }
    }

    pub fn dim(&self) -> (usize, usize) {
        self.data.dim()
    }

    pub fn grid(&self) -> GridSpec {
        let (rows, cols) = self.dim();
        GridSpec::new(self.transform, rows, cols)
    }

    pub fn bounds(&self) -> BoundingBox {
        self.grid().bounds()
    }

    /// Pixel value, `None` when masked or out of range
    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        self.data.get((row, col)).copied().filter(|v| !v.is_nan())
    }

    /// Value of the pixel containing `point`
    pub fn sample(&self, point: LonLat) -> Option<f32> {
        let (rows, cols) = self.dim();
        self.transform
            .pixel_of(point, rows, cols)
            .and_then(|(row, col)| self.get(row, col))
    }

    pub fn valid_count(&self) -> usize {
        self.data.iter().filter(|v| !v.is_nan()).count()
    }

    pub fn is_all_undefined(&self) -> bool {
        self.valid_count() == 0
    }
}

/// Error types for NDVI processing
#[derive(Debug, thiserror::Error)]
pub enum NdviError {
    #[error("Band '{band}' not found in image {image} (available: {available:?})")]
    BandNotFound {
        band: String,
        image: String,
        available: Vec<String>,
    },

    #[error("Image archive unavailable: {0}")]
    ArchiveUnavailable(String),

    #[error("Sampling scale {requested} m is not a whole multiple of the native {native} m resolution")]
    ScaleMismatch { requested: f64, native: f64 },

    #[error("Region lies outside the raster extent: {0}")]
    RegionOutsideExtent(String),

    #[error("Raster size mismatch: expected ({er}, {ec}), got ({ar}, {ac})")]
    DimensionMismatch { er: usize, ec: usize, ar: usize, ac: usize },

    #[error("Duplicate site name: {0}")]
    DuplicateSite(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Export error: {0}")]
    Export(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[cfg(feature = "gdal")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
}

impl NdviError {
    /// Whether the caller may retry the failed operation
    pub fn is_retryable(&self) -> bool {
        matches!(self, NdviError::ArchiveUnavailable(_))
    }
}

/// Result type for NDVI operations
pub type NdviResult<T> = Result<T, NdviError>;
