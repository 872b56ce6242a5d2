use crate::core::reduce::{aggregate, scale_factor};
use crate::core::sites::SiteRegistry;
use crate::presentation::palette::{Rgb, VisParams};
use crate::types::{BoundingBox, GeoTransform, LonLat, NdviError, NdviRaster, NdviResult};
use ndarray::{s, Array3, Axis, Zip};

/// RGBA rendering of a raster, georeferenced by the source transform
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedImage {
    /// (rows, cols, 4) RGBA channels
    pub pixels: Array3<u8>,
    pub transform: GeoTransform,
}

impl RenderedImage {
    pub fn dim(&self) -> (usize, usize) {
        let (rows, cols, _) = self.pixels.dim();
        (rows, cols)
    }

    pub fn pixel_count(&self) -> u64 {
        let (rows, cols) = self.dim();
        rows as u64 * cols as u64
    }

    pub fn pixel(&self, row: usize, col: usize) -> Option<[u8; 4]> {
        let (rows, cols) = self.dim();
        if row >= rows || col >= cols {
            return None;
        }
        let px = self.pixels.slice(s![row, col, ..]);
        Some([px[0], px[1], px[2], px[3]])
    }

    pub fn bounds(&self) -> BoundingBox {
        let (rows, cols) = self.dim();
        self.transform.bounds(rows, cols)
    }

    /// Row-major interleaved RGBA bytes
    pub fn to_rgba_bytes(&self) -> Vec<u8> {
        self.pixels.iter().copied().collect()
    }

    /// Alpha-composite `color` over one pixel; out-of-range pixels are ignored
    fn blend(&mut self, row: i64, col: i64, color: Rgb, opacity: f32) {
        let (rows, cols) = self.dim();
        if row < 0 || col < 0 || row as usize >= rows || col as usize >= cols {
            return;
        }
        let mut px = self.pixels.slice_mut(s![row as usize, col as usize, ..]);
        let src_a = opacity.clamp(0.0, 1.0);
        let dst_a = px[3] as f32 / 255.0;
        let out_a = src_a + dst_a * (1.0 - src_a);
        if out_a <= 0.0 {
            return;
        }
        for (i, src) in [color.r, color.g, color.b].into_iter().enumerate() {
            let mixed = (src as f32 * src_a + px[i] as f32 * dst_a * (1.0 - src_a)) / out_a;
            px[i] = mixed.round().clamp(0.0, 255.0) as u8;
        }
        px[3] = (out_a * 255.0).round() as u8;
    }
}

fn write_pixel(mut px: ndarray::ArrayViewMut1<u8>, value: f32, vis: &VisParams) {
    if let Some(color) = vis.color_for(value as f64) {
        px[0] = color.r;
        px[1] = color.g;
        px[2] = color.b;
        px[3] = 255;
    }
}

/// Map every pixel through `vis`; undefined pixels stay fully transparent
pub fn visualize(raster: &NdviRaster, vis: &VisParams) -> RenderedImage {
    let (rows, cols) = raster.dim();
    let mut pixels = Array3::<u8>::zeros((rows, cols, 4));

    #[cfg(feature = "parallel")]
    {
        Zip::from(pixels.lanes_mut(Axis(2)))
            .and(&raster.data)
            .par_for_each(|px, &value| write_pixel(px, value, vis));
    }

    #[cfg(not(feature = "parallel"))]
    {
        Zip::from(pixels.lanes_mut(Axis(2)))
            .and(&raster.data)
            .for_each(|px, &value| write_pixel(px, value, vis));
    }

    RenderedImage {
        pixels,
        transform: raster.transform,
    }
}

/// Fractional pixel slack when snapping geographic edges to pixel edges
const EDGE_TOLERANCE: f64 = 1e-6;

/// Half-open (row, col) pixel window of `bounds` on a grid, clipped to the grid
fn pixel_window(transform: &GeoTransform, rows: usize, cols: usize, bounds: &BoundingBox) -> Option<(usize, usize, usize, usize)> {
    let (r0, c0) = transform.geo_to_pixel(LonLat::new(bounds.min_lon, bounds.max_lat));
    let (r1, c1) = transform.geo_to_pixel(LonLat::new(bounds.max_lon, bounds.min_lat));
    let clip = |a: f64, b: f64, n: usize| {
        let lo = (a.min(b) + EDGE_TOLERANCE).floor().max(0.0);
        let hi = (a.max(b) - EDGE_TOLERANCE).ceil().min(n as f64);
        (hi > lo).then_some((lo as usize, hi as usize))
    };
    let (row_lo, row_hi) = clip(r0, r1, rows)?;
    let (col_lo, col_hi) = clip(c0, c1, cols)?;
    Some((row_lo, row_hi, col_lo, col_hi))
}

/// Sub-raster covering `bounds`
pub fn crop(raster: &NdviRaster, bounds: &BoundingBox) -> NdviResult<NdviRaster> {
    let (rows, cols) = raster.dim();
    let (r0, r1, c0, c1) = pixel_window(&raster.transform, rows, cols, bounds).ok_or_else(|| {
        NdviError::RegionOutsideExtent(format!(
            "[{:.5}, {:.5}, {:.5}, {:.5}] does not intersect the raster",
            bounds.min_lon, bounds.min_lat, bounds.max_lon, bounds.max_lat
        ))
    })?;

    let t = &raster.transform;
    let transform = GeoTransform {
        top_left_x: t.top_left_x + c0 as f64 * t.pixel_width,
        top_left_y: t.top_left_y + r0 as f64 * t.pixel_height,
        ..*t
    };
    let data = raster.data.slice(s![r0..r1, c0..c1]).to_owned();
    Ok(NdviRaster::new(data, transform, raster.timestamp))
}

/// Render the part of `raster` inside `bounds` at a sampling `scale` in metres
pub fn render_region(raster: &NdviRaster, vis: &VisParams, bounds: &BoundingBox, scale: f64) -> NdviResult<RenderedImage> {
    let factor = scale_factor(raster.grid().ground_sample_distance(), scale)?;
    let sampled = aggregate(raster, factor);
    let cropped = crop(&sampled, bounds)?;
    log::debug!("Rendering {:?} pixels at {} m (factor {})", cropped.dim(), scale, factor);
    Ok(visualize(&cropped, vis))
}

/// Line or fill style of an overlay
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Stroke {
    pub color: Rgb,
    /// Width in pixels
    pub width: usize,
    pub opacity: f32,
}

impl Stroke {
    pub fn site_outline() -> Self {
        Self {
            color: Rgb::RED,
            width: 2,
            opacity: 0.8,
        }
    }

    pub fn site_marker() -> Self {
        Self {
            color: Rgb::BLACK,
            width: 5,
            opacity: 1.0,
        }
    }
}

/// Site squares and markers drawn over a rendered map
#[derive(Debug, Clone, PartialEq)]
pub struct MapOverlay {
    pub squares: Vec<BoundingBox>,
    pub markers: Vec<LonLat>,
    pub outline: Stroke,
    pub marker: Stroke,
}

impl MapOverlay {
    pub fn for_sites(registry: &SiteRegistry, half_width_m: f64) -> Self {
        Self {
            squares: registry.squares(half_width_m).into_iter().map(|(_, bbox)| bbox).collect(),
            markers: registry.iter().map(|site| site.location).collect(),
            outline: Stroke::site_outline(),
            marker: Stroke::site_marker(),
        }
    }

    /// Outlines first, markers on top
    pub fn paint(&self, image: &mut RenderedImage) {
        for square in &self.squares {
            paint_outline(image, square, &self.outline);
        }
        for point in &self.markers {
            paint_marker(image, *point, &self.marker);
        }
    }
}

fn paint_outline(image: &mut RenderedImage, square: &BoundingBox, stroke: &Stroke) {
    let t = image.transform;
    let (r0, c0) = t.geo_to_pixel(LonLat::new(square.min_lon, square.max_lat));
    let (r1, c1) = t.geo_to_pixel(LonLat::new(square.max_lon, square.min_lat));
    let top = (r0.min(r1) + EDGE_TOLERANCE).floor() as i64;
    let bottom = (r0.max(r1) - EDGE_TOLERANCE).ceil() as i64 - 1;
    let left = (c0.min(c1) + EDGE_TOLERANCE).floor() as i64;
    let right = (c0.max(c1) - EDGE_TOLERANCE).ceil() as i64 - 1;
    let width = stroke.width.max(1) as i64;
    let (rows, cols) = image.dim();

    for row in top.max(0)..=bottom.min(rows as i64 - 1) {
        for col in left.max(0)..=right.min(cols as i64 - 1) {
            let on_edge = row - top < width || bottom - row < width || col - left < width || right - col < width;
            if on_edge {
                image.blend(row, col, stroke.color, stroke.opacity);
            }
        }
    }
}

fn paint_marker(image: &mut RenderedImage, point: LonLat, stroke: &Stroke) {
    let (row, col) = image.transform.geo_to_pixel(point);
    if !row.is_finite() || !col.is_finite() {
        return;
    }
    let (row, col) = (row.floor() as i64, col.floor() as i64);
    let width = stroke.width.max(1) as i64;
    let before = (width - 1) / 2;
    for r in (row - before)..(row - before + width) {
        for c in (col - before)..(col - before + width) {
            image.blend(r, c, stroke.color, stroke.opacity);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::METERS_PER_DEGREE;
    use ndarray::{array, Array2};

    const PX: f64 = 10.0 / METERS_PER_DEGREE;

    fn raster(data: Array2<f32>) -> NdviRaster {
        let rows = data.nrows() as f64;
        NdviRaster::new(data, GeoTransform::north_up(0.0, rows * PX, PX, PX), None)
    }

    #[test]
    fn test_visualize_undefined_is_transparent() {
        let image = visualize(&raster(array![[0.0, f32::NAN], [1.0, 0.5]]), &VisParams::default());
        assert_eq!(image.dim(), (2, 2));
        assert_eq!(image.pixel(0, 1), Some([0, 0, 0, 0]));
        assert_eq!(image.pixel(0, 0), Some([0x1f, 0x44, 0x9c, 255]));
        assert_eq!(image.pixel(1, 0), Some([0xb9, 0x2b, 0x00, 255]));
        assert_eq!(image.to_rgba_bytes().len(), 16);
    }

    #[test]
    fn test_crop_and_outside() {
        let r = raster(Array2::from_shape_fn((4, 4), |(i, j)| (i * 4 + j) as f32));
        let bounds = BoundingBox::new(1.0 * PX, 1.0 * PX, 3.0 * PX, 3.0 * PX);
        let cropped = crop(&r, &bounds).unwrap();
        assert_eq!(cropped.dim(), (2, 2));
        assert_eq!(cropped.get(0, 0), Some(5.0));
        assert_eq!(cropped.get(1, 1), Some(10.0));

        let far = BoundingBox::new(1.0, 1.0, 1.1, 1.1);
        assert!(matches!(crop(&r, &far), Err(NdviError::RegionOutsideExtent(_))));
    }

    #[test]
    fn test_render_region_rejects_incompatible_scale() {
        let r = raster(Array2::from_elem((4, 4), 0.5));
        let bounds = r.bounds();
        assert!(matches!(
            render_region(&r, &VisParams::default(), &bounds, 15.0),
            Err(NdviError::ScaleMismatch { .. })
        ));
        let coarse = render_region(&r, &VisParams::default(), &bounds, 20.0).unwrap();
        assert_eq!(coarse.dim(), (2, 2));
    }

    #[test]
    fn test_overlay_outline_and_marker() {
        let r = raster(Array2::from_elem((10, 10), f32::NAN));
        let mut image = visualize(&r, &VisParams::default());
        let overlay = MapOverlay {
            squares: vec![BoundingBox::new(2.0 * PX, 2.0 * PX, 8.0 * PX, 8.0 * PX)],
            markers: vec![LonLat::new(5.5 * PX, 4.5 * PX)],
            outline: Stroke::site_outline(),
            marker: Stroke::site_marker(),
        };
        overlay.paint(&mut image);

        // Outline edge, partially opaque red over transparency
        let edge = image.pixel(2, 4).unwrap();
        assert_eq!(&edge[..3], &[255, 0, 0]);
        assert_eq!(edge[3], 204);
        // Interior inside the outline width band stays clear
        assert_eq!(image.pixel(4, 4).unwrap()[3], 0);
        // Marker centre is opaque black
        assert_eq!(image.pixel(5, 5), Some([0, 0, 0, 255]));
        assert_eq!(image.pixel(3, 3), Some([0, 0, 0, 255]));
    }
}
