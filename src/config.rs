use crate::core::composite::CompositeStrategy;
use crate::core::filter::{ImageFilter, ImageFilterParams};
use crate::core::ndvi::DEFAULT_MASK_EPSILON;
use crate::core::reduce::scale_factor;
use crate::core::sites::{default_sites, SamplingGeometry, Site, SiteRegistry};
use crate::io::export::DEFAULT_MAX_PIXELS;
use crate::presentation::chart::SiteColors;
use crate::presentation::palette::VisParams;
use crate::types::{bands, NdviError, NdviResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::Path;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap_or_default()
}

/// Median snapshot over a short window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub date_start: NaiveDate,
    pub date_end: NaiveDate,
    pub max_cloud_percent: Option<f64>,
    /// Sampling scale of the per-site statistics, metres
    pub scale: f64,
    pub composite: CompositeStrategy,
    pub mask_epsilon: f32,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            date_start: date(2024, 1, 10),
            date_end: date(2024, 2, 28),
            max_cloud_percent: Some(20.0),
            scale: 10.0,
            composite: CompositeStrategy::NdviMedian,
            mask_epsilon: DEFAULT_MASK_EPSILON,
        }
    }
}

/// Multi-year per-acquisition series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeSeriesConfig {
    pub date_start: NaiveDate,
    pub date_end: NaiveDate,
    pub max_cloud_percent: Option<f64>,
    pub scale: f64,
    pub geometry: SamplingGeometry,
}

impl Default for TimeSeriesConfig {
    fn default() -> Self {
        Self {
            date_start: date(2017, 1, 1),
            date_end: date(2024, 12, 31),
            max_cloud_percent: None,
            scale: 500.0,
            geometry: SamplingGeometry::Point,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub folder: String,
    /// Area label used in file name prefixes
    pub area_name: String,
    pub scale: f64,
    pub max_pixels: u64,
    pub whole_map_description: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            folder: "NDVI".to_string(),
            area_name: "Tortola".to_string(),
            scale: 10.0,
            max_pixels: DEFAULT_MAX_PIXELS,
            whole_map_description: "Whole_Map_NDVI".to_string(),
        }
    }
}

/// Complete run configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NdviConfig {
    pub sites: Vec<Site>,
    pub bands: Vec<String>,
    /// Native ground sample distance of the archive, metres
    pub native_resolution_m: f64,
    /// Half width of each site square, metres
    pub square_half_width_m: f64,
    /// Margin added around the combined site squares, metres
    pub frame_buffer_m: f64,
    pub snapshot: SnapshotConfig,
    pub time_series: TimeSeriesConfig,
    pub export: ExportConfig,
    pub visualization: VisParams,
    pub site_colors: SiteColors,
}

impl Default for NdviConfig {
    fn default() -> Self {
        Self {
            sites: default_sites(),
            bands: vec![bands::RED.to_string(), bands::NIR.to_string(), bands::SWIR.to_string()],
            native_resolution_m: 10.0,
            square_half_width_m: 300.0,
            frame_buffer_m: 1500.0,
            snapshot: SnapshotConfig::default(),
            time_series: TimeSeriesConfig::default(),
            export: ExportConfig::default(),
            visualization: VisParams::default(),
            site_colors: SiteColors::default(),
        }
    }
}

impl NdviConfig {
    pub fn from_json_str(json: &str) -> NdviResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> NdviResult<Self> {
        log::info!("Loading configuration from {}", path.as_ref().display());
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    pub fn to_json(&self) -> NdviResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check sites, windows and sampling scales before any processing
    pub fn validate(&self) -> NdviResult<()> {
        self.site_registry()?;
        self.snapshot_filter()?;
        self.series_filter()?;

        for (label, scale) in [
            ("snapshot", self.snapshot.scale),
            ("time series", self.time_series.scale),
            ("export", self.export.scale),
        ] {
            scale_factor(self.native_resolution_m, scale).map_err(|e| {
                log::error!("Invalid {} scale: {}", label, e);
                e
            })?;
        }

        for (label, distance) in [
            ("square_half_width_m", self.square_half_width_m),
            ("frame_buffer_m", self.frame_buffer_m),
        ] {
            if !(distance.is_finite() && distance >= 0.0) {
                return Err(NdviError::InvalidParameter(format!("{} must be non-negative, got {}", label, distance)));
            }
        }
        if !(self.snapshot.mask_epsilon.is_finite()) {
            return Err(NdviError::InvalidParameter("mask_epsilon must be finite".to_string()));
        }
        self.visualization.validate()
    }

    pub fn site_registry(&self) -> NdviResult<SiteRegistry> {
        SiteRegistry::new(self.sites.clone())
    }

    pub fn snapshot_filter(&self) -> NdviResult<ImageFilterParams> {
        Self::filter_params(
            self.snapshot.date_start,
            self.snapshot.date_end,
            self.snapshot.max_cloud_percent,
            &self.bands,
        )
    }

    pub fn series_filter(&self) -> NdviResult<ImageFilterParams> {
        Self::filter_params(
            self.time_series.date_start,
            self.time_series.date_end,
            self.time_series.max_cloud_percent,
            &self.bands,
        )
    }

    fn filter_params(
        date_start: NaiveDate,
        date_end: NaiveDate,
        max_cloud_percent: Option<f64>,
        bands: &[String],
    ) -> NdviResult<ImageFilterParams> {
        let params = ImageFilterParams {
            date_start,
            date_end,
            max_cloud_percent,
            bands: bands.to_vec(),
        };
        ImageFilter::new(params.clone())?;
        Ok(params)
    }
}
