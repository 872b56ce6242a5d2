//! Core NDVI processing modules

pub mod sites;
pub mod region;
pub mod filter;
pub mod ndvi;
pub mod composite;
pub mod reduce;
pub mod timeseries;
pub mod compare;

// Re-export main types
pub use sites::{Site, SiteRegistry, SamplingGeometry};
pub use region::{Region, Polygon};
pub use filter::{ImageFilter, ImageFilterParams};
pub use ndvi::{NdviEngine, NdviParams, compute_ndvi, mask_non_positive, normalized_difference};
pub use composite::{CompositeStrategy, median_composite, band_median_composite};
pub use reduce::{SpatialReducer, SampledRaster, Reducer, ReductionResult, reduce_mean};
pub use timeseries::{TimeSeries, TimeSeriesEntry, TimeSeriesBuilder};
pub use compare::{EventWindow, Period, SiteComparison, SummaryStats, compare_event};
