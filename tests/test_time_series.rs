use approx::assert_abs_diff_eq;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use mangrove::core::{
    EventWindow, ImageFilter, ImageFilterParams, NdviEngine, Period, ReductionResult, Region, Site,
    SpatialReducer, TimeSeriesBuilder,
};
use mangrove::io::InMemoryArchive;
use mangrove::presentation::{ChartSpec, Legend, Presenter};
use mangrove::types::{bands, GeoTransform, GridSpec, ImageCollection, LonLat, RasterImage, METERS_PER_DEGREE};
use mangrove::{NdviConfig, NdviPipeline};
use ndarray::Array2;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 14, 58, 1).unwrap()
}

fn scene(transform: GeoTransform, dim: (usize, usize), id: &str, ts: DateTime<Utc>, cloud: f64, red: f32, nir: f32) -> RasterImage {
    RasterImage::new(id, ts, cloud, transform)
        .with_band(bands::RED, Array2::from_elem(dim, red))
        .and_then(|img| img.with_band(bands::NIR, Array2::from_elem(dim, nir)))
        .and_then(|img| img.with_band(bands::SWIR, Array2::from_elem(dim, 0.05)))
        .expect("bands share one shape")
}

#[test]
fn test_two_of_five_images_in_window() {
    init_logging();
    let px = 10.0 / METERS_PER_DEGREE;
    let transform = GeoTransform::north_up(0.0, 4.0 * px, px, px);
    let days = [1, 5, 10, 15, 20];
    let collection = ImageCollection::new(
        days.iter()
            .map(|&d| scene(transform, (4, 4), &format!("2024-01-{d:02}"), at(2024, 1, d), 3.0, 0.1, 0.3))
            .collect(),
    );

    let filter = ImageFilter::new(ImageFilterParams {
        date_start: NaiveDate::from_ymd_opt(2024, 1, 4).unwrap(),
        date_end: NaiveDate::from_ymd_opt(2024, 1, 11).unwrap(),
        max_cloud_percent: Some(20.0),
        bands: vec![bands::RED.to_string(), bands::NIR.to_string()],
    })
    .expect("valid filter");
    let filtered = filter.apply(&collection).expect("bands present");
    assert_eq!(filtered.len(), 2);

    let site = Site::new("Test Site", 1.5 * px, 2.5 * px);
    let region = Region::Point(LonLat::new(1.5 * px, 2.5 * px));
    let builder = TimeSeriesBuilder::new(NdviEngine::new(), SpatialReducer::mean(10.0).expect("positive scale"));
    let series = builder.build(&filtered, &[(site, region)]).expect("series built");

    let s = &series["Test Site"];
    assert_eq!(s.len(), 2);
    assert_eq!(s.timestamps(), vec![at(2024, 1, 5), at(2024, 1, 10)]);
    assert_eq!(s.timestamps(), filtered.timestamps());
    for value in s.values() {
        assert_abs_diff_eq!(value.unwrap(), 0.5, epsilon = 1e-6);
    }
}

#[test]
fn test_filter_is_idempotent() {
    let px = 10.0 / METERS_PER_DEGREE;
    let transform = GeoTransform::north_up(0.0, 2.0 * px, px, px);
    let collection = ImageCollection::new(vec![
        scene(transform, (2, 2), "a", at(2024, 1, 12), 19.9, 0.1, 0.3),
        scene(transform, (2, 2), "b", at(2024, 1, 20), 20.0, 0.1, 0.3),
        scene(transform, (2, 2), "c", at(2024, 2, 28), 0.0, 0.1, 0.3),
    ]);
    let filter = ImageFilter::new(ImageFilterParams::default()).expect("default filter");

    let once = filter.apply(&collection).expect("bands present");
    let twice = filter.apply(&once).expect("bands present");
    assert_eq!(once, twice);
    assert_eq!(once.len(), 2);
}

fn series_config() -> NdviConfig {
    NdviConfig {
        sites: vec![Site::new("Sea Cows Bay", -64.63336, 18.40462)],
        ..NdviConfig::default()
    }
}

fn series_archive(config: &NdviConfig) -> InMemoryArchive {
    let frame = config
        .site_registry()
        .expect("valid sites")
        .combined_bounds(config.square_half_width_m, config.frame_buffer_m)
        .expect("one site");
    let grid = GridSpec::from_bounds(&frame, 10.0).expect("valid grid");
    let make = |id: &str, ts, cloud, red, nir| scene(grid.transform, grid.dim(), id, ts, cloud, red, nir);

    InMemoryArchive::new(vec![
        make("before_1", at(2017, 6, 1), 4.0, 0.1, 0.3),
        make("before_2", at(2017, 8, 1), 7.0, 0.1, 0.4),
        // Cloudy scenes stay in the series
        make("after_1", at(2017, 10, 1), 80.0, 0.2, 0.3),
        make("outside", at(2025, 1, 5), 1.0, 0.1, 0.3),
    ])
}

#[test]
fn test_pipeline_series_and_event_comparison() {
    init_logging();
    let config = series_config();
    let pipeline = NdviPipeline::new(config.clone(), series_archive(&config)).expect("valid pipeline");

    let series = pipeline.time_series().expect("series built");
    let s = &series["Sea Cows Bay"];
    assert_eq!(s.len(), 3);
    assert!(s.is_sorted());
    assert_abs_diff_eq!(s.values()[0].unwrap(), 0.5, epsilon = 1e-5);
    assert_abs_diff_eq!(s.values()[1].unwrap(), 0.6, epsilon = 1e-5);
    assert_abs_diff_eq!(s.values()[2].unwrap(), 0.2, epsilon = 1e-5);

    let comparison = pipeline
        .compare_event(&series, &EventWindow::hurricane_irma())
        .expect("valid window");
    assert_eq!(comparison.len(), 1);
    assert_eq!(comparison[0].get(Period::Before).unwrap().count, 2);
    assert_eq!(comparison[0].get(Period::After).unwrap().count, 1);
    assert_abs_diff_eq!(comparison[0].median_change().unwrap(), -0.35, epsilon = 1e-5);

    let charts = pipeline.charts(&series);
    assert_eq!(charts.len(), 1);
    assert_eq!(charts[0].title, "Sea Cows Bay");
    assert_eq!(charts[0].color.to_hex(), "#1f77b4");
    assert_eq!(charts[0].points.len(), 3);
}

#[derive(Default)]
struct Recorder {
    statistics: Vec<(String, Option<f64>)>,
    charts: Vec<String>,
    legends: usize,
}

impl Presenter for Recorder {
    fn show_statistic(&mut self, site: &str, result: &ReductionResult) {
        self.statistics.push((site.to_string(), result.value));
    }

    fn show_chart(&mut self, chart: &ChartSpec) {
        self.charts.push(chart.title.clone());
    }

    fn show_legend(&mut self, legend: &Legend) {
        assert_eq!(legend.labels.first().map(String::as_str), Some("0.00"));
        self.legends += 1;
    }
}

#[test]
fn test_present_snapshot_and_series() {
    init_logging();
    let config = series_config();
    let pipeline = NdviPipeline::new(config.clone(), series_archive(&config)).expect("valid pipeline");

    // Snapshot window 2024-01-10..2024-02-28 holds none of these scenes
    let report = pipeline.snapshot().expect("snapshot succeeds");
    let series = pipeline.time_series().expect("series built");

    let mut recorder = Recorder::default();
    pipeline.present(&report, &series, &mut recorder);
    assert_eq!(recorder.statistics, vec![("Sea Cows Bay".to_string(), None)]);
    assert_eq!(recorder.charts, vec!["Sea Cows Bay".to_string()]);
    assert_eq!(recorder.legends, 1);
}
