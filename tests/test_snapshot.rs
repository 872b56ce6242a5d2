use approx::assert_abs_diff_eq;
use chrono::{DateTime, TimeZone, Utc};
use mangrove::core::{CompositeStrategy, Site};
use mangrove::io::{ArchiveQuery, FileExporter, ImageArchive, InMemoryArchive};
use mangrove::types::{bands, GridSpec, RasterImage};
use mangrove::{NdviConfig, NdviError, NdviPipeline, NdviResult};
use ndarray::Array2;
use std::fs::File;
use tempfile::TempDir;
use tiff::decoder::Decoder;
use tiff::ColorType;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn single_site_config() -> NdviConfig {
    NdviConfig {
        sites: vec![Site::new("Sea Cows Bay", -64.63336, 18.40462)],
        ..NdviConfig::default()
    }
}

fn frame_grid(config: &NdviConfig) -> GridSpec {
    let frame = config
        .site_registry()
        .expect("valid sites")
        .combined_bounds(config.square_half_width_m, config.frame_buffer_m)
        .expect("at least one site");
    GridSpec::from_bounds(&frame, config.native_resolution_m).expect("valid grid")
}

fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 14, 55, 21).unwrap()
}

fn scene(grid: &GridSpec, id: &str, timestamp: DateTime<Utc>, cloud: f64, red: f32, nir: f32) -> RasterImage {
    RasterImage::new(id, timestamp, cloud, grid.transform)
        .with_band(bands::RED, Array2::from_elem(grid.dim(), red))
        .and_then(|img| img.with_band(bands::NIR, Array2::from_elem(grid.dim(), nir)))
        .and_then(|img| img.with_band(bands::SWIR, Array2::from_elem(grid.dim(), 0.05)))
        .expect("bands share one shape")
}

fn snapshot_archive(config: &NdviConfig) -> InMemoryArchive {
    let grid = frame_grid(config);
    InMemoryArchive::new(vec![
        scene(&grid, "clear_a", at(2024, 1, 15), 5.0, 0.1, 0.3),
        scene(&grid, "clear_b", at(2024, 2, 1), 12.0, 0.2, 0.2),
        // Too cloudy
        scene(&grid, "cloudy", at(2024, 2, 10), 35.0, 0.5, 0.1),
        // Outside the window
        scene(&grid, "late", at(2024, 3, 2), 1.0, 0.05, 0.6),
    ])
}

#[test]
fn test_snapshot_median_of_two_scenes() {
    init_logging();
    let config = single_site_config();
    let pipeline = NdviPipeline::new(config.clone(), snapshot_archive(&config)).expect("valid pipeline");

    let report = pipeline.snapshot().expect("snapshot succeeds");
    assert_eq!(report.image_count, 2);

    // NDVI 0.5 and 0.0 give a median of 0.25
    let (rows, cols) = report.composite.dim();
    assert_abs_diff_eq!(report.composite.get(rows / 2, cols / 2).unwrap(), 0.25, epsilon = 1e-6);
    assert_eq!(report.masked.valid_count(), rows * cols);

    let stat = report.statistic("Sea Cows Bay").expect("site statistic");
    assert_abs_diff_eq!(stat.value.unwrap(), 0.25, epsilon = 1e-6);
    assert_eq!(stat.valid_pixels, 1);
}

#[test]
fn test_band_median_strategy() {
    init_logging();
    let mut config = single_site_config();
    config.snapshot.composite = CompositeStrategy::BandMedian;
    let pipeline = NdviPipeline::new(config.clone(), snapshot_archive(&config)).expect("valid pipeline");

    let report = pipeline.snapshot().expect("snapshot succeeds");
    // Median red 0.15, median NIR 0.25
    let stat = report.statistic("Sea Cows Bay").expect("site statistic");
    assert_abs_diff_eq!(stat.value.unwrap(), 0.25, epsilon = 1e-5);
}

#[test]
fn test_empty_window_gives_undefined_statistics() {
    init_logging();
    let config = single_site_config();
    let pipeline = NdviPipeline::new(config, InMemoryArchive::new(Vec::new())).expect("valid pipeline");

    let report = pipeline.snapshot().expect("empty archive is not an error");
    assert_eq!(report.image_count, 0);
    assert!(report.composite.is_all_undefined());
    assert_eq!(report.statistic("Sea Cows Bay").unwrap().value, None);
}

#[test]
fn test_water_is_masked_out_of_statistics() {
    init_logging();
    let config = single_site_config();
    let grid = frame_grid(&config);
    let archive = InMemoryArchive::new(vec![scene(&grid, "water", at(2024, 1, 20), 2.0, 0.08, 0.02)]);
    let pipeline = NdviPipeline::new(config, archive).expect("valid pipeline");

    let report = pipeline.snapshot().expect("snapshot succeeds");
    assert!(report.composite.valid_count() > 0);
    assert!(report.masked.is_all_undefined());
    assert_eq!(report.statistic("Sea Cows Bay").unwrap().value, None);
}

#[test]
fn test_export_snapshot_writes_site_and_map() {
    init_logging();
    let config = single_site_config();
    let pipeline = NdviPipeline::new(config.clone(), snapshot_archive(&config)).expect("valid pipeline");
    let report = pipeline.snapshot().expect("snapshot succeeds");

    let dir = TempDir::new().expect("temp dir");
    let exporter = FileExporter::new(dir.path());
    let tickets = pipeline.export_snapshot(&report, &exporter).expect("exports accepted");

    assert_eq!(tickets.len(), 2);
    assert_eq!(tickets[0].description, "Sea Cows Bay_NDVI");
    assert_eq!(tickets[1].description, "Whole_Map_NDVI");
    assert!(dir.path().join("NDVI").join("Sea Cows Bay_NDVI_Tortola.tif").exists());
    assert!(dir.path().join("NDVI").join("Sea Cows Bay_NDVI_Tortola.json").exists());
    assert!(dir.path().join("NDVI").join("Whole_Map_NDVI_Tortola.tif").exists());

    let file = File::open(&tickets[1].location).expect("map written");
    let mut decoder = Decoder::new(file).expect("valid TIFF");
    let (width, height) = decoder.dimensions().expect("dimensions");
    let sidecar: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(tickets[1].location.with_extension("json")).expect("sidecar written"),
    )
    .expect("sidecar is JSON");
    assert_eq!(sidecar["width"], width);
    assert_eq!(sidecar["height"], height);
    assert_eq!(decoder.colortype().expect("color type"), ColorType::RGBA(8));
}

#[test]
fn test_export_respects_pixel_ceiling() {
    init_logging();
    let mut config = single_site_config();
    config.export.max_pixels = 100;
    let pipeline = NdviPipeline::new(config.clone(), snapshot_archive(&config)).expect("valid pipeline");
    let report = pipeline.snapshot().expect("snapshot succeeds");

    let dir = TempDir::new().expect("temp dir");
    let result = pipeline.export_snapshot(&report, &FileExporter::new(dir.path()));
    assert!(matches!(result, Err(NdviError::Export(_))));
}

struct OfflineArchive;

impl ImageArchive for OfflineArchive {
    fn name(&self) -> &str {
        "offline"
    }

    fn query(&self, _query: &ArchiveQuery) -> NdviResult<Vec<RasterImage>> {
        Err(NdviError::ArchiveUnavailable("connection timed out".to_string()))
    }
}

#[test]
fn test_archive_failure_propagates_as_retryable() {
    init_logging();
    let pipeline = NdviPipeline::new(single_site_config(), OfflineArchive).expect("valid pipeline");

    let err = pipeline.snapshot().expect_err("archive failure must surface");
    assert!(err.is_retryable());
    let err = pipeline.time_series().expect_err("archive failure must surface");
    assert!(matches!(err, NdviError::ArchiveUnavailable(_)));
}

#[test]
fn test_incompatible_scale_rejected_at_setup() {
    let mut config = single_site_config();
    config.time_series.scale = 15.0;
    let result = NdviPipeline::new(config, InMemoryArchive::new(Vec::new()));
    assert!(matches!(result, Err(NdviError::ScaleMismatch { .. })));
}
