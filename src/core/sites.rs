use crate::core::region::Region;
use crate::types::{BoundingBox, LonLat, NdviError, NdviResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Named sampling location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    pub name: String,
    pub location: LonLat,
}

impl Site {
    pub fn new(name: impl Into<String>, lon: f64, lat: f64) -> Self {
        Self {
            name: name.into(),
            location: LonLat::new(lon, lat),
        }
    }

    /// Axis-aligned square framing the site
    pub fn square(&self, half_width_m: f64) -> BoundingBox {
        BoundingBox::square_around(self.location, half_width_m)
    }
}

/// How a site is sampled by the spatial reducer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingGeometry {
    /// Single pixel under the site location
    Point,
    /// All pixels inside the site square
    Square,
}

/// Fixed set of sites with unique names
#[derive(Debug, Clone, PartialEq)]
pub struct SiteRegistry {
    sites: Vec<Site>,
}

impl SiteRegistry {
    /// Create a registry, rejecting duplicate or empty names
    pub fn new(sites: Vec<Site>) -> NdviResult<Self> {
        let mut seen = HashSet::new();
        for site in &sites {
            if site.name.trim().is_empty() {
                return Err(NdviError::InvalidParameter("site name must not be empty".to_string()));
            }
            if !seen.insert(site.name.as_str()) {
                return Err(NdviError::DuplicateSite(site.name.clone()));
            }
            if !(site.location.lon.abs() <= 180.0 && site.location.lat.abs() <= 90.0) {
                return Err(NdviError::InvalidParameter(format!(
                    "site '{}' has invalid coordinates ({}, {})",
                    site.name, site.location.lon, site.location.lat
                )));
            }
        }
        log::debug!("Site registry initialised with {} sites", sites.len());
        Ok(Self { sites })
    }

    /// Mangrove monitoring sites on Tortola, British Virgin Islands
    pub fn tortola() -> Self {
        Self {
            sites: default_sites(),
        }
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    pub fn sites(&self) -> &[Site] {
        &self.sites
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Site> {
        self.sites.iter()
    }

    pub fn get(&self, name: &str) -> Option<&Site> {
        self.sites.iter().find(|s| s.name == name)
    }

    /// Square frame of every site, in registry order
    pub fn squares(&self, half_width_m: f64) -> Vec<(&Site, BoundingBox)> {
        self.sites.iter().map(|s| (s, s.square(half_width_m))).collect()
    }

    /// Sampling region of every site for the given geometry
    pub fn regions(&self, geometry: SamplingGeometry, half_width_m: f64) -> Vec<(Site, Region)> {
        self.sites
            .iter()
            .map(|site| {
                let region = match geometry {
                    SamplingGeometry::Point => Region::Point(site.location),
                    SamplingGeometry::Square => Region::from(site.square(half_width_m)),
                };
                (site.clone(), region)
            })
            .collect()
    }

    /// Union of all site squares, grown by `buffer_m`
    pub fn combined_bounds(&self, half_width_m: f64, buffer_m: f64) -> Option<BoundingBox> {
        self.sites
            .iter()
            .map(|s| s.square(half_width_m))
            .reduce(|acc, b| acc.union(&b))
            .map(|b| b.buffer(buffer_m))
    }
}

pub(crate) fn default_sites() -> Vec<Site> {
    vec![
        Site::new("Sea Cows Bay", -64.63336, 18.40462),
        Site::new("Paraquita Bay", -64.57673, 18.41836),
        Site::new("Frenchmans Cay", -64.69911, 18.38597),
        Site::new("Hans Creek A", -64.536303, 18.440171),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tortola_sites() {
        let registry = SiteRegistry::tortola();
        assert_eq!(registry.len(), 4);
        assert!(registry.get("Paraquita Bay").is_some());
        assert!(registry.get("Road Town").is_none());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let result = SiteRegistry::new(vec![
            Site::new("Sea Cows Bay", -64.63, 18.40),
            Site::new("Sea Cows Bay", -64.57, 18.41),
        ]);
        assert!(matches!(result, Err(NdviError::DuplicateSite(name)) if name == "Sea Cows Bay"));
    }

    #[test]
    fn test_combined_bounds_contains_every_square() {
        let registry = SiteRegistry::tortola();
        let bounds = registry.combined_bounds(300.0, 1500.0).unwrap();
        for (_, square) in registry.squares(300.0) {
            assert!(bounds.contains(square.center()));
            assert!(bounds.min_lon < square.min_lon && bounds.max_lat > square.max_lat);
        }
    }

    #[test]
    fn test_regions_follow_geometry() {
        let registry = SiteRegistry::tortola();
        let points = registry.regions(SamplingGeometry::Point, 300.0);
        assert!(points.iter().all(|(_, r)| matches!(r, Region::Point(_))));

        let squares = registry.regions(SamplingGeometry::Square, 300.0);
        assert!(squares.iter().all(|(_, r)| matches!(r, Region::Polygon(_))));
    }

    #[test]
    fn test_empty_registry_has_no_bounds() {
        let registry = SiteRegistry::new(Vec::new()).unwrap();
        assert!(registry.combined_bounds(300.0, 1500.0).is_none());
    }
}
