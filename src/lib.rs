//! Mangrove: per-site Sentinel-2 NDVI compositing and time-series extraction
//!
//! Filters an optical image archive by date, cloud cover and bands, computes
//! NDVI per acquisition, builds median composites and reduces them over
//! monitoring sites, either as a single snapshot or as a per-acquisition
//! time series.

pub mod types;
pub mod core;
pub mod io;
pub mod presentation;
pub mod config;
pub mod pipeline;

#[cfg(feature = "python")]
mod python;

// Re-export main types and functions for easier access
pub use types::{
    BandData, BoundingBox, GeoTransform, GridSpec, ImageCollection, LonLat, NdviError, NdviRaster,
    NdviResult, RasterImage,
};

pub use crate::core::{
    compare_event, compute_ndvi, mask_non_positive, reduce_mean, CompositeStrategy, EventWindow,
    ImageFilter, ImageFilterParams, NdviEngine, Region, Site, SiteRegistry, SpatialReducer,
    TimeSeries, TimeSeriesBuilder,
};
pub use config::NdviConfig;
pub use io::{ImageArchive, InMemoryArchive, Exporter, FileExporter};
pub use pipeline::{NdviPipeline, SnapshotReport};
