use crate::io::archive::{parse_acquisition_time, ArchiveQuery, ImageArchive};
use crate::io::export::{ExportRequest, ExportTicket, Exporter};
use crate::presentation::render::RenderedImage;
use crate::types::{bands, GeoTransform, NdviError, NdviResult, RasterImage};
use gdal::raster::Buffer;
use gdal::{Dataset, DriverManager, Metadata};
use ndarray::{s, Array2};
use std::fs;
use std::path::{Path, PathBuf};

/// Cloud-cover metadata key carried over from Sentinel-2 granules
pub const CLOUD_COVER_KEY: &str = "CLOUDY_PIXEL_PERCENTAGE";

/// Archive over a directory of multi-band GeoTIFFs named with an acquisition stamp
#[derive(Debug, Clone)]
pub struct GeoTiffArchive {
    root: PathBuf,
    /// Band name of each raster band, in band order
    band_names: Vec<String>,
    /// Cloud cover assumed for files without `CLOUDY_PIXEL_PERCENTAGE`
    default_cloud_cover: Option<f64>,
}

impl GeoTiffArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            band_names: vec![bands::RED.to_string(), bands::NIR.to_string(), bands::SWIR.to_string()],
            default_cloud_cover: None,
        }
    }

    /// Treat files lacking cloud metadata as having `percent` cover
    pub fn with_default_cloud_cover(mut self, percent: f64) -> Self {
        self.default_cloud_cover = Some(percent);
        self
    }

    pub fn with_band_names(mut self, names: Vec<String>) -> Self {
        self.band_names = names;
        self
    }

    fn scan(&self) -> NdviResult<Vec<PathBuf>> {
        let entries = fs::read_dir(&self.root).map_err(|e| {
            NdviError::ArchiveUnavailable(format!("cannot list {}: {}", self.root.display(), e))
        })?;
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| ext.eq_ignore_ascii_case("tif") || ext.eq_ignore_ascii_case("tiff"))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();
        Ok(paths)
    }

    fn load(&self, path: &Path, query: &ArchiveQuery) -> NdviResult<Option<RasterImage>> {
        let name = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        let Some(timestamp) = parse_acquisition_time(name) else {
            log::warn!("Skipping {}: no acquisition stamp in file name", path.display());
            return Ok(None);
        };
        let date = timestamp.date_naive();
        if date < query.date_start || date > query.date_end {
            return Ok(None);
        }

        let dataset = Dataset::open(path)?;
        let reported = dataset
            .metadata_item(CLOUD_COVER_KEY, "")
            .and_then(|v| v.trim().parse::<f64>().ok());
        if reported.is_none() {
            log::warn!("{} has no {} metadata", path.display(), CLOUD_COVER_KEY);
        }
        let Some(cloud_cover) = query.resolve_cloud_cover(reported, self.default_cloud_cover) else {
            log::warn!("Skipping {}: unknown cloud cover under a cloud ceiling", path.display());
            return Ok(None);
        };
        let transform = GeoTransform::from_gdal(dataset.geo_transform()?);
        let (width, height) = dataset.raster_size();

        let mut image = RasterImage::new(name, timestamp, cloud_cover, transform);
        for (index, band_name) in self.band_names.iter().enumerate() {
            if !query.bands.iter().any(|b| b == band_name) {
                continue;
            }
            if index as isize >= dataset.raster_count() {
                break;
            }
            let band = dataset.rasterband(index as isize + 1)?;
            let nodata = band.no_data_value();
            let buffer = band.read_as::<f32>((0, 0), (width, height), (width, height), None)?;
            let len = buffer.data.len();
            let mut data = Array2::from_shape_vec((height, width), buffer.data).map_err(|_| {
                NdviError::DimensionMismatch {
                    er: height,
                    ec: width,
                    ar: len / width.max(1),
                    ac: width,
                }
            })?;
            if let Some(nodata) = nodata {
                data.mapv_inplace(|v| if v as f64 == nodata { f32::NAN } else { v });
            }
            image = image.with_band(band_name.as_str(), data)?;
        }

        Ok(query.matches(&image).then_some(image))
    }
}

impl ImageArchive for GeoTiffArchive {
    fn name(&self) -> &str {
        "geotiff"
    }

    fn query(&self, query: &ArchiveQuery) -> NdviResult<Vec<RasterImage>> {
        let mut images = Vec::new();
        for path in self.scan()? {
            if let Some(image) = self.load(&path, query)? {
                images.push(image.select(&query.bands)?);
            }
        }
        images.sort_by_key(|img| img.timestamp);
        log::info!("GeoTIFF archive {} returned {} images", self.root.display(), images.len());
        Ok(images)
    }
}

/// Writes `<root>/<folder>/<prefix>.tif` as a four-band byte GeoTIFF
#[derive(Debug, Clone)]
pub struct GeoTiffExporter {
    root: PathBuf,
}

impl GeoTiffExporter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Exporter for GeoTiffExporter {
    fn export(&self, image: &RenderedImage, request: &ExportRequest) -> NdviResult<ExportTicket> {
        request.check(image)?;

        let dir = self.root.join(&request.folder);
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.tif", request.file_name_prefix));
        log::info!("Exporting '{}' to {}", request.description, path.display());

        let (height, width) = image.dim();
        let driver = DriverManager::get_driver_by_name("GTiff")?;
        let mut dataset = driver.create_with_band_type::<u8, _>(&path, width as isize, height as isize, 4)?;
        dataset.set_geo_transform(&image.transform.to_gdal())?;
        dataset.set_spatial_ref(&gdal::spatial_ref::SpatialRef::from_epsg(4326)?)?;
        dataset.set_metadata_item("DESCRIPTION", &request.description, "")?;

        for channel in 0..4 {
            let flat: Vec<u8> = image.pixels.slice(s![.., .., channel]).iter().copied().collect();
            let buffer = Buffer::new((width, height), flat);
            let mut band = dataset.rasterband(channel as isize + 1)?;
            band.write((0, 0), (width, height), &buffer)?;
        }

        Ok(ExportTicket {
            description: request.description.clone(),
            location: path,
        })
    }
}
