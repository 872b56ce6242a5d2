use crate::types::{NdviError, NdviResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// RGB color, serialized as `#rrggbb`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub const BLACK: Self = Self::new(0, 0, 0);
    pub const RED: Self = Self::new(255, 0, 0);
    pub const WHITE: Self = Self::new(255, 255, 255);

    /// Parse `#rrggbb` or `rrggbb`
    pub fn from_hex(hex: &str) -> NdviResult<Self> {
        let digits = hex.trim().trim_start_matches('#');
        if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(NdviError::InvalidParameter(format!("invalid hex color '{}'", hex)));
        }
        let channel = |i: usize| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|e| NdviError::InvalidParameter(format!("invalid hex color '{}': {}", hex, e)))
        };
        Ok(Self::new(channel(0)?, channel(2)?, channel(4)?))
    }

    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    /// Linear interpolation towards `other`
    pub fn lerp(&self, other: &Rgb, t: f64) -> Rgb {
        let t = t.clamp(0.0, 1.0);
        let mix = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * t).round() as u8;
        Rgb::new(mix(self.r, other.r), mix(self.g, other.g), mix(self.b, other.b))
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl TryFrom<String> for Rgb {
    type Error = NdviError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Rgb::from_hex(&value)
    }
}

impl From<Rgb> for String {
    fn from(color: Rgb) -> Self {
        color.to_hex()
    }
}

/// Blue-to-red NDVI ramp of the reference maps
pub const NDVI_PALETTE: [&str; 12] = [
    "#1f449c", "#357a77", "#7ca1cc", "#a8b6cc", "#eebab4", "#e4ff7a",
    "#ffd200", "#ffb500", "#ff9a00", "#fc7f00", "#e63e00", "#b92b00",
];

/// Scalar-to-color mapping: a numeric domain stretched over an ordered palette
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisParams {
    pub min: f64,
    pub max: f64,
    pub palette: Vec<Rgb>,
}

impl Default for VisParams {
    fn default() -> Self {
        Self {
            min: 0.0,
            max: 1.0,
            palette: NDVI_PALETTE.iter().filter_map(|h| Rgb::from_hex(h).ok()).collect(),
        }
    }
}

impl VisParams {
    pub fn new(min: f64, max: f64, palette: Vec<Rgb>) -> NdviResult<Self> {
        let vis = Self { min, max, palette };
        vis.validate()?;
        Ok(vis)
    }

    pub fn validate(&self) -> NdviResult<()> {
        if self.palette.is_empty() {
            return Err(NdviError::InvalidParameter("palette must not be empty".to_string()));
        }
        if !(self.min.is_finite() && self.max.is_finite() && self.min <= self.max) {
            return Err(NdviError::InvalidParameter(format!(
                "invalid visualization range [{}, {}]",
                self.min, self.max
            )));
        }
        Ok(())
    }

    /// Color of `value`, clamped into the domain; `None` for undefined values
    pub fn color_for(&self, value: f64) -> Option<Rgb> {
        if value.is_nan() {
            return None;
        }
        let n = self.palette.len();
        if n == 1 {
            return self.palette.first().copied();
        }
        let span = self.max - self.min;
        let t = if span > 0.0 {
            ((value - self.min) / span).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let pos = t * (n - 1) as f64;
        let lo = (pos.floor() as usize).min(n - 1);
        let hi = (lo + 1).min(n - 1);
        Some(self.palette[lo].lerp(&self.palette[hi], pos - lo as f64))
    }
}

/// Color bar with evenly spaced value labels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Legend {
    pub title: String,
    pub colors: Vec<Rgb>,
    pub labels: Vec<String>,
}

impl Legend {
    /// One label per palette color, `min + i * (max - min) / (n - 1)`, two decimals
    pub fn from_vis(title: impl Into<String>, vis: &VisParams) -> Self {
        let n = vis.palette.len();
        let labels = (0..n)
            .map(|i| {
                let value = if n > 1 {
                    vis.min + i as f64 * (vis.max - vis.min) / (n - 1) as f64
                } else {
                    vis.min
                };
                format!("{:.2}", value)
            })
            .collect();
        Self {
            title: title.into(),
            colors: vis.palette.clone(),
            labels,
        }
    }
}
