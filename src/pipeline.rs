//! End-to-end snapshot and time-series workflows over an image archive

use crate::config::NdviConfig;
use crate::core::compare::{compare_event, EventWindow, SiteComparison};
use crate::core::filter::ImageFilter;
use crate::core::ndvi::{NdviEngine, NdviParams};
use crate::core::reduce::{ReductionResult, SpatialReducer};
use crate::core::sites::{SamplingGeometry, SiteRegistry};
use crate::core::timeseries::{TimeSeries, TimeSeriesBuilder};
use crate::io::archive::ImageArchive;
use crate::io::export::{ExportRequest, ExportTicket, Exporter};
use crate::presentation::chart::{assemble_chart, ChartSpec, Presenter};
use crate::presentation::palette::Legend;
use crate::presentation::render::{render_region, MapOverlay};
use crate::types::{BoundingBox, GridSpec, NdviError, NdviRaster, NdviResult};
use serde::Serialize;
use std::collections::BTreeMap;

/// Snapshot statistic of one site
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SiteStatistic {
    pub site: String,
    pub result: ReductionResult,
}

/// Output of a snapshot run
#[derive(Debug, Clone)]
pub struct SnapshotReport {
    /// Unmasked median NDVI over the site frame
    pub composite: NdviRaster,
    pub masked: NdviRaster,
    pub statistics: Vec<SiteStatistic>,
    pub image_count: usize,
    /// Combined site squares plus margin
    pub frame: BoundingBox,
}

impl SnapshotReport {
    pub fn statistic(&self, site: &str) -> Option<&ReductionResult> {
        self.statistics.iter().find(|s| s.site == site).map(|s| &s.result)
    }
}

/// Configured NDVI workflows bound to one archive
pub struct NdviPipeline<A> {
    config: NdviConfig,
    archive: A,
    registry: SiteRegistry,
    engine: NdviEngine,
    snapshot_reducer: SpatialReducer,
    series_reducer: SpatialReducer,
}

impl<A: ImageArchive> NdviPipeline<A> {
    /// Validate `config` and bind it to `archive`
    pub fn new(config: NdviConfig, archive: A) -> NdviResult<Self> {
        config.validate()?;
        let registry = config.site_registry()?;
        let engine = NdviEngine::with_params(NdviParams {
            mask_epsilon: config.snapshot.mask_epsilon,
            ..NdviParams::default()
        });
        let snapshot_reducer = SpatialReducer::mean(config.snapshot.scale)?;
        let series_reducer = SpatialReducer::mean(config.time_series.scale)?;

        log::info!(
            "NDVI pipeline ready: {} sites, archive '{}'",
            registry.len(),
            archive.name()
        );

        Ok(Self {
            config,
            archive,
            registry,
            engine,
            snapshot_reducer,
            series_reducer,
        })
    }

    pub fn config(&self) -> &NdviConfig {
        &self.config
    }

    pub fn registry(&self) -> &SiteRegistry {
        &self.registry
    }

    pub fn archive(&self) -> &A {
        &self.archive
    }

    /// Combined site squares grown by the frame buffer
    pub fn frame(&self) -> NdviResult<BoundingBox> {
        self.registry
            .combined_bounds(self.config.square_half_width_m, self.config.frame_buffer_m)
            .ok_or_else(|| NdviError::InvalidParameter("no sites configured".to_string()))
    }

    /// Median composite of the snapshot window with per-site point means of the masked NDVI
    pub fn snapshot(&self) -> NdviResult<SnapshotReport> {
        let filter = ImageFilter::new(self.config.snapshot_filter()?)?;
        let frame = self.frame()?;
        let collection = filter.query(&self.archive, Some(frame))?.filter_bounds(&frame);
        if collection.is_empty() {
            log::warn!("No images in the snapshot window; composite is undefined");
        }

        let grid = GridSpec::from_bounds(&frame, self.config.native_resolution_m)?;
        let composite = self
            .engine
            .composite_collection(&collection, &grid, self.config.snapshot.composite)?;
        let masked = self.engine.mask(&composite);

        let statistics = self
            .registry
            .regions(SamplingGeometry::Point, self.config.square_half_width_m)
            .into_iter()
            .map(|(site, region)| {
                let result = self.snapshot_reducer.reduce(&masked, &region)?;
                Ok(SiteStatistic {
                    site: site.name,
                    result,
                })
            })
            .collect::<NdviResult<Vec<_>>>()?;

        log::info!(
            "Snapshot from {} images: {} of {} sites defined",
            collection.len(),
            statistics.iter().filter(|s| s.result.is_defined()).count(),
            statistics.len()
        );

        Ok(SnapshotReport {
            composite,
            masked,
            statistics,
            image_count: collection.len(),
            frame,
        })
    }

    /// One series per site over the time-series window
    pub fn time_series(&self) -> NdviResult<BTreeMap<String, TimeSeries>> {
        let filter = ImageFilter::new(self.config.series_filter()?)?;
        let frame = self.frame()?;
        let collection = filter.query(&self.archive, Some(frame))?.filter_bounds(&frame);

        let regions = self
            .registry
            .regions(self.config.time_series.geometry, self.config.square_half_width_m);
        TimeSeriesBuilder::new(self.engine.clone(), self.series_reducer).build(&collection, &regions)
    }

    /// Submit per-site unmasked maps and the overlaid whole map
    pub fn export_snapshot(&self, report: &SnapshotReport, exporter: &dyn Exporter) -> NdviResult<Vec<ExportTicket>> {
        let export = &self.config.export;
        let vis = &self.config.visualization;
        let mut tickets = Vec::with_capacity(self.registry.len() + 1);

        for (site, square) in self.registry.squares(self.config.square_half_width_m) {
            let image = render_region(&report.composite, vis, &square, export.scale)?;
            let request = ExportRequest::new(
                format!("{}_NDVI", site.name),
                export.folder.clone(),
                format!("{}_NDVI_{}", site.name, export.area_name),
                square,
                export.scale,
            )
            .with_max_pixels(export.max_pixels);
            tickets.push(exporter.export(&image, &request)?);
        }

        let mut map = render_region(&report.masked, vis, &report.frame, export.scale)?;
        MapOverlay::for_sites(&self.registry, self.config.square_half_width_m).paint(&mut map);
        let request = ExportRequest::new(
            export.whole_map_description.clone(),
            export.folder.clone(),
            format!("{}_{}", export.whole_map_description, export.area_name),
            report.frame,
            export.scale,
        )
        .with_max_pixels(export.max_pixels);
        tickets.push(exporter.export(&map, &request)?);

        log::info!("Submitted {} exports", tickets.len());
        Ok(tickets)
    }

    /// Charts in site order
    pub fn charts(&self, series: &BTreeMap<String, TimeSeries>) -> Vec<ChartSpec> {
        self.registry
            .iter()
            .filter_map(|site| series.get(&site.name))
            .map(|s| assemble_chart(s, &self.config.site_colors))
            .collect()
    }

    pub fn legend(&self) -> Legend {
        Legend::from_vis("NDVI Scale", &self.config.visualization)
    }

    /// Before/after summaries in site order
    pub fn compare_event(
        &self,
        series: &BTreeMap<String, TimeSeries>,
        window: &EventWindow,
    ) -> NdviResult<Vec<SiteComparison>> {
        compare_event(self.registry.iter().filter_map(|site| series.get(&site.name)), window)
    }

    /// Hand statistics, legend and charts to a presenter
    pub fn present(
        &self,
        report: &SnapshotReport,
        series: &BTreeMap<String, TimeSeries>,
        presenter: &mut dyn Presenter,
    ) {
        for stat in &report.statistics {
            presenter.show_statistic(&stat.site, &stat.result);
        }
        presenter.show_legend(&self.legend());
        for chart in self.charts(series) {
            presenter.show_chart(&chart);
        }
    }
}
