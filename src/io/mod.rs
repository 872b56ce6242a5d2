//! Archive access, export and series persistence

pub mod archive;
pub mod export;
pub mod series_csv;
#[cfg(feature = "gdal")]
pub mod geotiff;

// Re-export main types
pub use archive::{ArchiveQuery, CachedArchive, ImageArchive, InMemoryArchive, RetryPolicy, query_with_retry, parse_acquisition_time};
pub use export::{encode_geotiff, ExportRequest, ExportTicket, Exporter, FileExporter, DEFAULT_MAX_PIXELS};
pub use series_csv::{read_series, read_series_file, write_series, write_series_file};
#[cfg(feature = "gdal")]
pub use geotiff::{GeoTiffArchive, GeoTiffExporter};
