#![allow(dead_code)]

use chrono::{NaiveDate, TimeZone, Utc};
use geo::{polygon, MultiPolygon};
use ndarray::Array2;
use plumb::core::tiles::{Tile, TileCatalog};
use plumb::io::archive::{MemoryArchive, RawScene, SpatialKey};
use plumb::types::{GeoGrid, GeoTransform};

pub const SIZE: usize = 20;
pub const PIXEL: f64 = 0.01;
pub const WEST: f64 = -92.0;
pub const NORTH: f64 = 47.0;

/// Landsat QA words
pub const CLEAR: u16 = 1 << 6;
pub const CLEAR_WATER: u16 = (1 << 6) | (1 << 7);
pub const CLOUD: u16 = (1 << 3) | (0b11 << 8);

/// Landsat DN for a water-like and a cloud-like reflectance
pub const DARK_DN: f32 = 8000.0;
pub const BRIGHT_DN: f32 = 40000.0;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2022, 5, 5).unwrap()
}

pub fn landsat_reflectance(dn: f32) -> f32 {
    (dn as f64 * 0.0000275 - 0.2) as f32
}

/// Two adjacent 0.1 degree tiles on western Lake Superior
pub fn catalog() -> TileCatalog {
    let square = |x0: f64| {
        MultiPolygon::new(vec![polygon![
            (x: x0, y: 46.85),
            (x: x0 + 0.1, y: 46.85),
            (x: x0 + 0.1, y: 46.95),
            (x: x0, y: 46.95),
        ]])
    };
    TileCatalog::new(vec![
        Tile::new(1, "aoi1", square(-91.99)),
        Tile::new(2, "aoi2", square(-91.89)),
    ])
    .expect("Failed to build catalog")
}

pub fn grid() -> GeoGrid {
    GeoGrid::new(GeoTransform::north_up(WEST, NORTH, PIXEL), SIZE, SIZE, 4326)
}

/// Centre of pixel (row, col) of the shared grid
pub fn pixel_center(row: usize, col: usize) -> (f64, f64) {
    grid().pixel_center(row, col)
}

/// Landsat 8 scene whose left half (col < split) is dark water and right
/// half bright, all bands alike
pub fn landsat_scene(id: &str, dark: f32, bright: f32, split: usize) -> RawScene {
    let mut raw = RawScene::new(
        id,
        "LANDSAT_8",
        Utc.with_ymd_and_hms(2022, 5, 5, 16, 50, 0).unwrap(),
        SpatialKey::WrsPathRow { path: 26, row: 27 },
        grid(),
    );
    let data = Array2::from_shape_fn((SIZE, SIZE), |(_, c)| if c < split { dark } else { bright });
    for b in ["SR_B1", "SR_B2", "SR_B3", "SR_B4", "SR_B5", "SR_B6", "SR_B7", "ST_B10"] {
        raw = raw.with_band(b, data.clone());
    }
    let qa = Array2::from_shape_fn((SIZE, SIZE), |(_, c)| if c < split { CLEAR_WATER } else { CLEAR });
    raw.with_qa("QA_PIXEL", qa)
}

pub fn uniform_landsat(id: &str, dn: f32) -> RawScene {
    landsat_scene(id, dn, dn, SIZE)
}

/// Sentinel-2A scene, uniform reflectance, SCL water everywhere
pub fn sentinel_scene(id: &str, dn: f32) -> RawScene {
    let mut raw = RawScene::new(
        id,
        "SENTINEL_2A",
        Utc.with_ymd_and_hms(2022, 5, 5, 17, 5, 0).unwrap(),
        SpatialKey::MgrsTile("15TVN".into()),
        grid(),
    );
    for b in ["B1", "B2", "B3", "B4", "B8", "B11", "B12"] {
        raw = raw.with_band(b, Array2::from_elem((SIZE, SIZE), dn));
    }
    raw.with_qa("SCL", Array2::from_elem((SIZE, SIZE), 6))
}

pub fn archive(scenes: Vec<RawScene>) -> MemoryArchive {
    MemoryArchive::from_scenes(scenes).expect("Failed to build archive")
}
