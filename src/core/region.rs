use crate::types::{BoundingBox, LonLat, NdviError, NdviResult};
use geo::{BoundingRect, Centroid, Contains, Coord, Intersects, LineString, Point, Rect};
use serde::{Deserialize, Serialize};

/// Simple polygon given by its exterior ring (lon/lat)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<LonLat>", into = "Vec<LonLat>")]
pub struct Polygon {
    inner: geo::Polygon<f64>,
    bounds: BoundingBox,
}

impl Polygon {
    /// Build from a ring; the closing vertex is optional
    pub fn new(mut exterior: Vec<LonLat>) -> NdviResult<Self> {
        if exterior.len() > 1 && exterior.first() == exterior.last() {
            exterior.pop();
        }
        if exterior.len() < 3 {
            return Err(NdviError::InvalidParameter(format!(
                "polygon needs at least 3 distinct vertices, got {}",
                exterior.len()
            )));
        }
        if exterior.iter().any(|p| !(p.lon.is_finite() && p.lat.is_finite())) {
            return Err(NdviError::InvalidParameter("polygon vertices must be finite".to_string()));
        }

        let ring: LineString<f64> = exterior.iter().map(|p| Coord { x: p.lon, y: p.lat }).collect();
        let inner = geo::Polygon::new(ring, Vec::new());
        let bounds = inner
            .bounding_rect()
            .map(|rect| BoundingBox::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y))
            .ok_or_else(|| NdviError::InvalidParameter("polygon has no extent".to_string()))?;
        Ok(Self { inner, bounds })
    }

    /// Vertices of the exterior ring without the closing vertex
    pub fn vertices(&self) -> Vec<LonLat> {
        let coords = &self.inner.exterior().0;
        let open = coords.len().saturating_sub(1);
        coords[..open].iter().map(|c| LonLat::new(c.x, c.y)).collect()
    }

    pub fn as_geo(&self) -> &geo::Polygon<f64> {
        &self.inner
    }

    pub fn bounds(&self) -> BoundingBox {
        self.bounds
    }

    /// Interior test; points on the boundary are outside
    pub fn contains(&self, point: LonLat) -> bool {
        self.inner.contains(&Point::new(point.lon, point.lat))
    }

    /// Whether the polygon touches the box at all
    pub fn intersects(&self, bounds: &BoundingBox) -> bool {
        let rect = Rect::new(
            Coord { x: bounds.min_lon, y: bounds.min_lat },
            Coord { x: bounds.max_lon, y: bounds.max_lat },
        );
        self.inner.intersects(&rect)
    }

    /// Area-weighted centroid; degenerate rings fall back to the centre of their bounds
    pub fn centroid(&self) -> LonLat {
        self.inner
            .centroid()
            .map(|p| LonLat::new(p.x(), p.y()))
            .unwrap_or_else(|| self.bounds.center())
    }
}

impl TryFrom<Vec<LonLat>> for Polygon {
    type Error = NdviError;

    fn try_from(exterior: Vec<LonLat>) -> NdviResult<Self> {
        Polygon::new(exterior)
    }
}

impl From<Polygon> for Vec<LonLat> {
    fn from(polygon: Polygon) -> Self {
        polygon.vertices()
    }
}

/// Area over which a raster is reduced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    Point(LonLat),
    Polygon(Polygon),
}

impl Region {
    pub fn bounds(&self) -> BoundingBox {
        match self {
            Region::Point(p) => BoundingBox::new(p.lon, p.lat, p.lon, p.lat),
            Region::Polygon(poly) => poly.bounds(),
        }
    }
}

impl From<BoundingBox> for Region {
    fn from(bounds: BoundingBox) -> Self {
        let rect = Rect::new(
            Coord { x: bounds.min_lon, y: bounds.min_lat },
            Coord { x: bounds.max_lon, y: bounds.max_lat },
        );
        Region::Polygon(Polygon {
            inner: rect.to_polygon(),
            bounds,
        })
    }
}

impl From<LonLat> for Region {
    fn from(point: LonLat) -> Self {
        Region::Point(point)
    }
}
