use crate::core::reduce::ReductionResult;
use crate::core::timeseries::TimeSeries;
use crate::presentation::palette::{Legend, Rgb};
use crate::types::NdviResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Series color per site name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteColors {
    colors: BTreeMap<String, Rgb>,
    fallback: Rgb,
}

impl Default for SiteColors {
    fn default() -> Self {
        let colors = [
            ("Sea Cows Bay", Rgb::new(0x1f, 0x77, 0xb4)),
            ("Paraquita Bay", Rgb::new(0xff, 0x7f, 0x0e)),
            ("Frenchmans Cay", Rgb::new(0x2c, 0xa0, 0x2c)),
            ("Hans Creek A", Rgb::new(0xd6, 0x27, 0x28)),
        ]
        .into_iter()
        .map(|(name, color)| (name.to_string(), color))
        .collect();
        Self {
            colors,
            fallback: Rgb::new(0x00, 0x00, 0xff),
        }
    }
}

impl SiteColors {
    pub fn new(fallback: Rgb) -> Self {
        Self {
            colors: BTreeMap::new(),
            fallback,
        }
    }

    pub fn with(mut self, site: impl Into<String>, color: Rgb) -> Self {
        self.colors.insert(site.into(), color);
        self
    }

    pub fn insert(&mut self, site: impl Into<String>, color: Rgb) {
        self.colors.insert(site.into(), color);
    }

    /// Color of `site`, or the fallback for unknown sites
    pub fn get(&self, site: &str) -> Rgb {
        self.colors.get(site).copied().unwrap_or(self.fallback)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisSpec {
    pub title: String,
    pub bold_title: bool,
    pub gridline_color: Rgb,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartPoint {
    pub timestamp: DateTime<Utc>,
    /// `None` leaves a gap in the line
    pub value: Option<f64>,
}

/// Line chart of one site's series, ready for any charting front end
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSpec {
    pub title: String,
    pub h_axis: AxisSpec,
    pub v_axis: AxisSpec,
    pub background: Rgb,
    pub color: Rgb,
    pub line_width: u32,
    pub point_size: u32,
    pub show_legend: bool,
    pub points: Vec<ChartPoint>,
}

impl ChartSpec {
    pub fn to_json(&self) -> NdviResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Chart for one series, colored by `colors`
pub fn assemble_chart(series: &TimeSeries, colors: &SiteColors) -> ChartSpec {
    let gridline = Rgb::new(0xff, 0xff, 0xff);
    ChartSpec {
        title: series.site.clone(),
        h_axis: AxisSpec {
            title: "Date".to_string(),
            bold_title: true,
            gridline_color: gridline,
        },
        v_axis: AxisSpec {
            title: "NDVI".to_string(),
            bold_title: true,
            gridline_color: gridline,
        },
        background: Rgb::new(0xeb, 0xeb, 0xeb),
        color: colors.get(&series.site),
        line_width: 1,
        point_size: 4,
        show_legend: false,
        points: series
            .iter()
            .map(|e| ChartPoint {
                timestamp: e.timestamp,
                value: e.value,
            })
            .collect(),
    }
}

/// Sink for per-site statistics, charts and legends
pub trait Presenter {
    fn show_statistic(&mut self, site: &str, result: &ReductionResult);
    fn show_chart(&mut self, chart: &ChartSpec);
    fn show_legend(&mut self, legend: &Legend);
}

/// Presenter that reports through the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPresenter;

impl Presenter for LogPresenter {
    fn show_statistic(&mut self, site: &str, result: &ReductionResult) {
        match result.value {
            Some(value) => log::info!("{} NDVI: {:.4} ({} pixels)", site, value, result.valid_pixels),
            None => log::info!("{} NDVI: undefined", site),
        }
    }

    fn show_chart(&mut self, chart: &ChartSpec) {
        let defined = chart.points.iter().filter(|p| p.value.is_some()).count();
        log::info!("Chart '{}': {} points, {} defined", chart.title, chart.points.len(), defined);
    }

    fn show_legend(&mut self, legend: &Legend) {
        log::info!("{}: {}", legend.title, legend.labels.join(" "));
    }
}
