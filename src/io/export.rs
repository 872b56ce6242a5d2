use crate::presentation::render::RenderedImage;
use crate::types::{BoundingBox, NdviError, NdviResult};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Seek, Write};
use std::path::{Path, PathBuf};
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;

const MODEL_PIXEL_SCALE_TAG: u16 = 33550;
const MODEL_TIEPOINT_TAG: u16 = 33922;
const GEO_KEY_DIRECTORY_TAG: u16 = 34735;

/// GeoKey directory for a geographic WGS84 (EPSG:4326) raster, pixel-is-area
#[rustfmt::skip]
const WGS84_GEO_KEYS: [u16; 16] = [
    1, 1, 0, 3,
    1024, 0, 1, 2,
    1025, 0, 1, 1,
    2048, 0, 1, 4326,
];

/// Default ceiling on exported pixels
pub const DEFAULT_MAX_PIXELS: u64 = 10_000_000_000_000;

/// Export submission: what to write, where, and over which region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRequest {
    pub description: String,
    pub folder: String,
    pub file_name_prefix: String,
    pub region: BoundingBox,
    /// Sampling scale in metres
    pub scale: f64,
    pub max_pixels: u64,
}

impl ExportRequest {
    pub fn new(description: impl Into<String>, folder: impl Into<String>, file_name_prefix: impl Into<String>, region: BoundingBox, scale: f64) -> Self {
        Self {
            description: description.into(),
            folder: folder.into(),
            file_name_prefix: file_name_prefix.into(),
            region,
            scale,
            max_pixels: DEFAULT_MAX_PIXELS,
        }
    }

    pub fn with_max_pixels(mut self, max_pixels: u64) -> Self {
        self.max_pixels = max_pixels;
        self
    }

    /// Reject malformed requests and images over the pixel ceiling
    pub fn check(&self, image: &RenderedImage) -> NdviResult<()> {
        if self.file_name_prefix.trim().is_empty() {
            return Err(NdviError::InvalidParameter("export file name prefix is empty".to_string()));
        }
        if self.file_name_prefix.contains(['/', '\\']) || self.folder.contains("..") {
            return Err(NdviError::InvalidParameter(format!(
                "export path '{}/{}' escapes the export root",
                self.folder, self.file_name_prefix
            )));
        }
        let pixels = image.pixel_count();
        if pixels > self.max_pixels {
            return Err(NdviError::Export(format!(
                "'{}' has {} pixels, more than the allowed {}",
                self.description, pixels, self.max_pixels
            )));
        }
        Ok(())
    }
}

/// Outcome of an accepted submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportTicket {
    pub description: String,
    pub location: PathBuf,
}

/// Destination for rendered images; only submission success or failure is reported
pub trait Exporter {
    fn export(&self, image: &RenderedImage, request: &ExportRequest) -> NdviResult<ExportTicket>;
}

/// Georeferencing written next to each exported image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportSidecar {
    pub description: String,
    pub width: usize,
    pub height: usize,
    pub crs: String,
    pub geo_transform: [f64; 6],
    pub region: BoundingBox,
    pub scale: f64,
}

/// Writes `<root>/<folder>/<prefix>.tif` (RGBA8 GeoTIFF) plus `<prefix>.json`
#[derive(Debug, Clone)]
pub struct FileExporter {
    root: PathBuf,
}

impl Default for FileExporter {
    fn default() -> Self {
        Self::new(Self::default_root())
    }
}

impl FileExporter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Per-user data directory, falling back to the home directory
    pub fn default_root() -> PathBuf {
        dirs::data_local_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mangrove")
            .join("exports")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn write_tiff(path: &Path, image: &RenderedImage) -> NdviResult<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        encode_geotiff(image, &mut writer)?;
        writer.flush()?;
        Ok(())
    }
}

/// Encode an RGBA rendering as a GeoTIFF with WGS84 georeferencing tags
pub fn encode_geotiff<W: Write + Seek>(image: &RenderedImage, writer: W) -> NdviResult<()> {
    let (rows, cols) = image.dim();
    let gt = image.transform.to_gdal();

    let mut encoder = TiffEncoder::new(writer)?;
    let mut tiff_image = encoder.new_image::<colortype::RGBA8>(cols as u32, rows as u32)?;

    let scale = [gt[1], gt[5].abs(), 0.0];
    tiff_image
        .encoder()
        .write_tag(Tag::Unknown(MODEL_PIXEL_SCALE_TAG), &scale[..])?;
    let tiepoint = [0.0, 0.0, 0.0, gt[0], gt[3], 0.0];
    tiff_image
        .encoder()
        .write_tag(Tag::Unknown(MODEL_TIEPOINT_TAG), &tiepoint[..])?;
    tiff_image
        .encoder()
        .write_tag(Tag::Unknown(GEO_KEY_DIRECTORY_TAG), &WGS84_GEO_KEYS[..])?;

    tiff_image.write_data(&image.to_rgba_bytes())?;
    Ok(())
}

impl Exporter for FileExporter {
    fn export(&self, image: &RenderedImage, request: &ExportRequest) -> NdviResult<ExportTicket> {
        request.check(image)?;

        let dir = self.root.join(&request.folder);
        fs::create_dir_all(&dir)?;
        let image_path = dir.join(format!("{}.tif", request.file_name_prefix));
        let sidecar_path = dir.join(format!("{}.json", request.file_name_prefix));

        let (rows, cols) = image.dim();
        log::info!("Exporting '{}' ({}x{}) to {}", request.description, cols, rows, image_path.display());

        Self::write_tiff(&image_path, image)?;

        let sidecar = ExportSidecar {
            description: request.description.clone(),
            width: cols,
            height: rows,
            crs: "EPSG:4326".to_string(),
            geo_transform: image.transform.to_gdal(),
            region: request.region,
            scale: request.scale,
        };
        let writer = BufWriter::new(File::create(&sidecar_path)?);
        serde_json::to_writer_pretty(writer, &sidecar)?;

        Ok(ExportTicket {
            description: request.description.clone(),
            location: image_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoTransform;
    use ndarray::Array3;
    use std::io::Cursor;
    use tempfile::TempDir;
    use tiff::decoder::{Decoder, DecodingResult};
    use tiff::ColorType;

    fn image(rows: usize, cols: usize) -> RenderedImage {
        RenderedImage {
            pixels: Array3::from_elem((rows, cols, 4), 7u8),
            transform: GeoTransform::north_up(-64.7, 18.45, 0.001, 0.001),
        }
    }

    fn request() -> ExportRequest {
        ExportRequest::new(
            "Sea Cows Bay_NDVI",
            "NDVI",
            "Sea Cows Bay_NDVI_Tortola",
            BoundingBox::new(-64.7, 18.448, -64.697, 18.45),
            10.0,
        )
    }

    #[test]
    fn test_writes_geotiff_and_sidecar() {
        let dir = TempDir::new().unwrap();
        let exporter = FileExporter::new(dir.path());
        let ticket = exporter.export(&image(2, 3), &request()).unwrap();

        assert_eq!(ticket.location, dir.path().join("NDVI").join("Sea Cows Bay_NDVI_Tortola.tif"));
        let mut decoder = Decoder::new(File::open(&ticket.location).unwrap()).unwrap();
        assert_eq!(decoder.dimensions().unwrap(), (3, 2));
        assert_eq!(decoder.colortype().unwrap(), ColorType::RGBA(8));
        let tiepoint = decoder.get_tag_f64_vec(Tag::from_u16_exhaustive(MODEL_TIEPOINT_TAG)).unwrap();
        assert_eq!(&tiepoint[3..5], &[-64.7, 18.45]);
        let scale = decoder.get_tag_f64_vec(Tag::from_u16_exhaustive(MODEL_PIXEL_SCALE_TAG)).unwrap();
        assert_eq!(&scale[..2], &[0.001, 0.001]);
        match decoder.read_image().unwrap() {
            DecodingResult::U8(bytes) => assert_eq!(bytes, vec![7u8; 2 * 3 * 4]),
            _ => panic!("expected 8-bit samples"),
        }

        let sidecar: ExportSidecar =
            serde_json::from_str(&fs::read_to_string(ticket.location.with_extension("json")).unwrap()).unwrap();
        assert_eq!((sidecar.width, sidecar.height), (3, 2));
        assert_eq!(sidecar.geo_transform[0], -64.7);
        assert_eq!(sidecar.scale, 10.0);
    }

    #[test]
    fn test_encode_to_buffer() {
        let mut buf = Vec::new();
        encode_geotiff(&image(4, 5), Cursor::new(&mut buf)).unwrap();
        let mut decoder = Decoder::new(Cursor::new(buf)).unwrap();
        assert_eq!(decoder.dimensions().unwrap(), (5, 4));
        let keys = decoder.get_tag_u16_vec(Tag::from_u16_exhaustive(GEO_KEY_DIRECTORY_TAG)).unwrap();
        assert_eq!(keys, WGS84_GEO_KEYS.to_vec());
    }

    #[test]
    fn test_rejects_oversize_request() {
        let dir = TempDir::new().unwrap();
        let exporter = FileExporter::new(dir.path());
        let result = exporter.export(&image(10, 10), &request().with_max_pixels(99));
        assert!(matches!(result, Err(NdviError::Export(_))));
        assert!(!dir.path().join("NDVI").exists());
    }

    #[test]
    fn test_rejects_path_escape() {
        let mut req = request();
        req.file_name_prefix = "../outside".to_string();
        assert!(req.check(&image(1, 1)).is_err());
    }
}
