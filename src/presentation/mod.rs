//! Visualization parameters, rendering and chart assembly

pub mod palette;
pub mod render;
pub mod chart;

pub use palette::{Legend, Rgb, VisParams, NDVI_PALETTE};
pub use render::{crop, render_region, visualize, MapOverlay, RenderedImage, Stroke};
pub use chart::{assemble_chart, ChartPoint, ChartSpec, LogPresenter, Presenter, SiteColors};
