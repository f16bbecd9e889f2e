use chrono::NaiveDate;
use ndarray::Array2;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Real-valued band data (surface reflectance, brightness temperature, or raw DN)
pub type BandImage = Array2<f32>;

/// Per-pixel QA bitfield data
pub type QaImage = Array2<u16>;

/// Per-pixel boolean layer (true = set)
pub type MaskImage = Array2<bool>;

/// Mission string used for multi-sensor mosaics
pub const MULTI_MISSION: &str = "multi";

/// Geospatial bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self { min_x, min_y, max_x, max_y }
    }

    /// Envelope of a set of points
    pub fn from_points(points: &[(f64, f64)]) -> Option<Self> {
        let (first, rest) = points.split_first()?;
        let mut bbox = Self::new(first.0, first.1, first.0, first.1);
        for &(x, y) in rest {
            bbox.min_x = bbox.min_x.min(x);
            bbox.min_y = bbox.min_y.min(y);
            bbox.max_x = bbox.max_x.max(x);
            bbox.max_y = bbox.max_y.max(y);
        }
        Some(bbox)
    }

    pub fn corners(&self) -> [(f64, f64); 4] {
        [
            (self.min_x, self.min_y),
            (self.min_x, self.max_y),
            (self.max_x, self.min_y),
            (self.max_x, self.max_y),
        ]
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Area of the intersection with another box (0 when disjoint)
    pub fn overlap_area(&self, other: &BoundingBox) -> f64 {
        let w = self.max_x.min(other.max_x) - self.min_x.max(other.min_x);
        let h = self.max_y.min(other.max_y) - self.min_y.max(other.min_y);
        if w <= 0.0 || h <= 0.0 {
            0.0
        } else {
            w * h
        }
    }
}

/// Geospatial transformation parameters (GDAL ordering, north-up grids)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform; `pixel_height` is stored negative as GDAL does
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_size: f64) -> Self {
        Self {
            top_left_x,
            pixel_width: pixel_size,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height: -pixel_size,
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }
}

/// A raster lattice: affine transform, dimensions and CRS
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoGrid {
    pub transform: GeoTransform,
    pub rows: usize,
    pub cols: usize,
    pub epsg: u32,
}

impl GeoGrid {
    pub fn new(transform: GeoTransform, rows: usize, cols: usize, epsg: u32) -> Self {
        Self { transform, rows, cols, epsg }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Map coordinates of a pixel centre
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        let t = &self.transform;
        let x = t.top_left_x + (col as f64 + 0.5) * t.pixel_width;
        let y = t.top_left_y + (row as f64 + 0.5) * t.pixel_height;
        (x, y)
    }

    /// Map footprint of a single pixel
    pub fn pixel_bounds(&self, row: usize, col: usize) -> BoundingBox {
        let t = &self.transform;
        let x0 = t.top_left_x + col as f64 * t.pixel_width;
        let y0 = t.top_left_y + row as f64 * t.pixel_height;
        let x1 = x0 + t.pixel_width;
        let y1 = y0 + t.pixel_height;
        BoundingBox::new(x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1))
    }

    /// Pixel containing the map coordinate, if inside the grid
    pub fn locate(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        let t = &self.transform;
        let col = ((x - t.top_left_x) / t.pixel_width).floor();
        let row = ((y - t.top_left_y) / t.pixel_height).floor();
        if col < 0.0 || row < 0.0 {
            return None;
        }
        let (row, col) = (row as usize, col as usize);
        if row < self.rows && col < self.cols {
            Some((row, col))
        } else {
            None
        }
    }

    /// Full map extent of the grid
    pub fn bounds(&self) -> BoundingBox {
        let t = &self.transform;
        let x1 = t.top_left_x + self.cols as f64 * t.pixel_width;
        let y1 = t.top_left_y + self.rows as f64 * t.pixel_height;
        BoundingBox::new(
            t.top_left_x.min(x1),
            t.top_left_y.min(y1),
            t.top_left_x.max(x1),
            t.top_left_y.max(y1),
        )
    }

    pub fn pixel_size(&self) -> f64 {
        self.transform.pixel_width.abs()
    }
}

/// Satellite program family, each with its own band layout and QA encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MissionFamily {
    Landsat,
    Sentinel,
}

impl MissionFamily {
    /// Resolve the family of a mission identifier by prefix
    pub fn of(mission: &str) -> PlumbResult<Self> {
        let upper = mission.to_ascii_uppercase();
        if upper.starts_with("LANDSAT") {
            Ok(MissionFamily::Landsat)
        } else if upper.starts_with("SENTINEL") {
            Ok(MissionFamily::Sentinel)
        } else {
            Err(PlumbError::UnsupportedSensor {
                mission: mission.to_string(),
            })
        }
    }
}

impl fmt::Display for MissionFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissionFamily::Landsat => write!(f, "LANDSAT"),
            MissionFamily::Sentinel => write!(f, "SENTINEL"),
        }
    }
}

const SHORT_CODES: [(&str, &str); 7] = [
    ("LS4", "LANDSAT_4"),
    ("LS5", "LANDSAT_5"),
    ("LS7", "LANDSAT_7"),
    ("LS8", "LANDSAT_8"),
    ("LS9", "LANDSAT_9"),
    ("S2A", "SENTINEL_2A"),
    ("S2B", "SENTINEL_2B"),
];

/// Expand a short satellite code ("LS8") to its mission id ("LANDSAT_8").
/// Full mission ids pass through unchanged.
pub fn mission_from_code(code: &str) -> Option<String> {
    let upper = code.trim().to_ascii_uppercase();
    if let Some((_, mission)) = SHORT_CODES.iter().find(|(short, _)| *short == upper) {
        return Some(mission.to_string());
    }
    if SHORT_CODES.iter().any(|(_, mission)| *mission == upper) {
        return Some(upper);
    }
    None
}

/// Short satellite code for a mission id, used in export file names
pub fn code_from_mission(mission: &str) -> Option<&'static str> {
    let upper = mission.to_ascii_uppercase();
    SHORT_CODES
        .iter()
        .find(|(_, m)| *m == upper)
        .map(|(short, _)| *short)
}

/// Parse a mission-date key such as "LS8 2022-05-05", "LS8_2022-05-05"
/// or "LANDSAT_8_2022-05-05".
pub fn parse_mission_date(key: &str) -> PlumbResult<(String, NaiveDate)> {
    let pattern = Regex::new(
        r"^(?P<mission>[A-Za-z0-9]+(?:_[A-Za-z0-9]+)?)[ _](?P<date>\d{4}-\d{2}-\d{2})$"
    ).map_err(|e| PlumbError::Processing(format!("Regex error: {}", e)))?;

    let caps = pattern
        .captures(key.trim())
        .ok_or_else(|| PlumbError::InvalidFormat(format!("Invalid mission-date key: {}", key)))?;

    let sat = &caps["mission"];
    let mission = mission_from_code(sat).ok_or_else(|| PlumbError::UnsupportedSensor {
        mission: sat.to_string(),
    })?;
    let date = NaiveDate::parse_from_str(&caps["date"], "%Y-%m-%d")
        .map_err(|e| PlumbError::InvalidFormat(format!("Invalid date in '{}': {}", key, e)))?;

    Ok((mission, date))
}

/// Format the `missDate` key used to group images by mission and day
pub fn format_mission_date(mission: &str, date: NaiveDate) -> String {
    format!("{}_{}", mission, date.format("%Y-%m-%d"))
}

/// Provenance key of a mosaic: (mission or "multi", calendar date, tile id)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MosaicKey {
    pub mission: String,
    pub date: NaiveDate,
    pub tile_id: u32,
}

impl MosaicKey {
    pub fn new(mission: impl Into<String>, date: NaiveDate, tile_id: u32) -> Self {
        Self {
            mission: mission.into(),
            date,
            tile_id,
        }
    }
}

impl fmt::Display for MosaicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_aoi{}", self.mission, self.date.format("%Y-%m-%d"), self.tile_id)
    }
}

/// Error types for mosaicking, labeling and export
#[derive(Debug, thiserror::Error)]
pub enum PlumbError {
    #[error("Unsupported sensor: {mission}")]
    UnsupportedSensor { mission: String },

    #[error("Tile not found: {0}")]
    TileNotFound(u32),

    #[error("Tile index {index} out of range for catalog of {len} tiles")]
    TileIndexOutOfRange { index: i64, len: usize },

    #[error("No imagery for {key}")]
    NoMatchingScene { key: MosaicKey },

    #[error("Export job '{job}' failed: {reason}")]
    ExportJobFailed { job: String, reason: String },

    #[error("Export job '{job}' timed out")]
    ExportJobTimeout { job: String },

    #[error("Unknown class: {0}")]
    UnknownClass(String),

    #[error("Class legend mismatch: expected {expected}, found {found}")]
    LegendMismatch { expected: String, found: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Projection error: {0}")]
    Projection(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "gdal")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
}

/// Result type for plumb operations
pub type PlumbResult<T> = Result<T, PlumbError>;
