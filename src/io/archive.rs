use crate::core::crs::{Crs, Reprojector};
use crate::types::{BandImage, GeoGrid, PlumbError, PlumbResult, QaImage};
use chrono::{DateTime, NaiveDate, Utc};
use geo::{Coord, Intersects, LineString, MultiPolygon, Polygon};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Row/path-style spatial key of a scene
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SpatialKey {
    /// Landsat Worldwide Reference System path/row
    WrsPathRow { path: u16, row: u16 },
    /// Sentinel-2 MGRS tile, e.g. "15TWN"
    MgrsTile(String),
}

impl fmt::Display for SpatialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpatialKey::WrsPathRow { path, row } => write!(f, "{:03}{:03}", path, row),
            SpatialKey::MgrsTile(tile) => write!(f, "T{}", tile),
        }
    }
}

/// One scene as delivered by the imagery archive: native band names,
/// unscaled digital numbers and packed QA words.
#[derive(Debug, Clone)]
pub struct RawScene {
    /// Product id (LANDSAT_PRODUCT_ID / system:index)
    pub id: String,
    /// Mission id (SPACECRAFT_ID), e.g. "LANDSAT_8" or "SENTINEL_2A"
    pub mission: String,
    pub acquired: DateTime<Utc>,
    pub spatial_key: SpatialKey,
    pub grid: GeoGrid,
    /// Native optical/thermal bands (digital numbers)
    pub bands: BTreeMap<String, BandImage>,
    /// Native QA bands (QA_PIXEL, QA_RADSAT, SCL, ...)
    pub qa: BTreeMap<String, QaImage>,
}

impl RawScene {
    pub fn new(
        id: impl Into<String>,
        mission: impl Into<String>,
        acquired: DateTime<Utc>,
        spatial_key: SpatialKey,
        grid: GeoGrid,
    ) -> Self {
        Self {
            id: id.into(),
            mission: mission.into(),
            acquired,
            spatial_key,
            grid,
            bands: BTreeMap::new(),
            qa: BTreeMap::new(),
        }
    }

    pub fn with_band(mut self, name: impl Into<String>, data: BandImage) -> Self {
        self.bands.insert(name.into(), data);
        self
    }

    pub fn with_qa(mut self, name: impl Into<String>, data: QaImage) -> Self {
        self.qa.insert(name.into(), data);
        self
    }

    pub fn date(&self) -> NaiveDate {
        self.acquired.date_naive()
    }

    /// Check that every layer matches the grid
    pub fn validate(&self) -> PlumbResult<()> {
        let shape = self.grid.shape();
        Crs::from_epsg(self.grid.epsg)?;
        for (name, band) in &self.bands {
            if band.dim() != shape {
                return Err(PlumbError::InvalidFormat(format!(
                    "Scene {}: band {} is {:?}, grid is {:?}",
                    self.id,
                    name,
                    band.dim(),
                    shape
                )));
            }
        }
        for (name, qa) in &self.qa {
            if qa.dim() != shape {
                return Err(PlumbError::InvalidFormat(format!(
                    "Scene {}: QA band {} is {:?}, grid is {:?}",
                    self.id,
                    name,
                    qa.dim(),
                    shape
                )));
            }
        }
        Ok(())
    }

    /// Scene footprint in WGS84 (grid corners unprojected)
    pub fn footprint(&self) -> PlumbResult<Polygon<f64>> {
        let to_wgs84 = Reprojector::new(Crs::from_epsg(self.grid.epsg)?, Crs::wgs84())?;
        let b = self.grid.bounds();
        let ring: Vec<Coord<f64>> = [
            (b.min_x, b.min_y),
            (b.max_x, b.min_y),
            (b.max_x, b.max_y),
            (b.min_x, b.max_y),
            (b.min_x, b.min_y),
        ]
        .iter()
        .map(|&(x, y)| {
            let (lon, lat) = to_wgs84.transform(x, y)?;
            Ok(Coord { x: lon, y: lat })
        })
        .collect::<PlumbResult<_>>()?;
        Ok(Polygon::new(LineString::from(ring), vec![]))
    }
}

/// Attribute, date and spatial filters over the archive
#[derive(Debug, Clone, Default)]
pub struct ArchiveQuery {
    /// Exact calendar day, i.e. acquisition in [date, date + 1 day)
    pub date: Option<NaiveDate>,
    /// SPACECRAFT_ID equality
    pub mission: Option<String>,
    /// Scenes whose footprint intersects this WGS84 geometry
    pub bounds: Option<MultiPolygon<f64>>,
    /// WRS_PATH inclusion (empty = any)
    pub wrs_paths: Vec<u16>,
    /// WRS_ROW inclusion (empty = any)
    pub wrs_rows: Vec<u16>,
    /// MGRS_TILE inclusion (empty = any)
    pub mgrs_tiles: Vec<String>,
}

impl ArchiveQuery {
    pub fn on_date(date: NaiveDate) -> Self {
        Self {
            date: Some(date),
            ..Self::default()
        }
    }

    pub fn mission(mut self, mission: impl Into<String>) -> Self {
        self.mission = Some(mission.into());
        self
    }

    pub fn intersecting(mut self, bounds: MultiPolygon<f64>) -> Self {
        self.bounds = Some(bounds);
        self
    }

    /// Attribute and date filters only; footprint tests are done by `matches`
    fn matches_attributes(&self, scene: &RawScene) -> bool {
        if let Some(date) = self.date {
            if scene.date() != date {
                return false;
            }
        }
        if let Some(mission) = &self.mission {
            if !scene.mission.eq_ignore_ascii_case(mission) {
                return false;
            }
        }
        match &scene.spatial_key {
            SpatialKey::WrsPathRow { path, row } => {
                if !self.wrs_paths.is_empty() && !self.wrs_paths.contains(path) {
                    return false;
                }
                if !self.wrs_rows.is_empty() && !self.wrs_rows.contains(row) {
                    return false;
                }
                if !self.mgrs_tiles.is_empty() && self.wrs_paths.is_empty() && self.wrs_rows.is_empty() {
                    return false;
                }
            }
            SpatialKey::MgrsTile(tile) => {
                if !self.mgrs_tiles.is_empty() && !self.mgrs_tiles.iter().any(|t| t == tile) {
                    return false;
                }
                if self.mgrs_tiles.is_empty() && (!self.wrs_paths.is_empty() || !self.wrs_rows.is_empty()) {
                    return false;
                }
            }
        }
        true
    }

    pub fn matches(&self, scene: &RawScene) -> bool {
        if !self.matches_attributes(scene) {
            return false;
        }
        match &self.bounds {
            Some(bounds) => match scene.footprint() {
                Ok(footprint) => footprint.intersects(bounds),
                Err(e) => {
                    log::warn!("Scene {} has no usable footprint: {}", scene.id, e);
                    false
                }
            },
            None => true,
        }
    }
}

/// Read-only access to a collection of raw scenes
pub trait ImageArchive: Send + Sync {
    /// All scenes matching the query, in archive order
    fn query(&self, query: &ArchiveQuery) -> Vec<&RawScene>;

    /// Total number of scenes
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory archive; scenes are immutable once ingested
#[derive(Debug, Default)]
pub struct MemoryArchive {
    scenes: Vec<RawScene>,
    ids: BTreeSet<String>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest a scene; duplicate product ids are rejected
    pub fn insert(&mut self, scene: RawScene) -> PlumbResult<()> {
        scene.validate()?;
        if !self.ids.insert(scene.id.clone()) {
            return Err(PlumbError::InvalidFormat(format!(
                "Scene {} already ingested",
                scene.id
            )));
        }
        log::debug!("Ingested scene {} ({} {})", scene.id, scene.mission, scene.date());
        self.scenes.push(scene);
        Ok(())
    }

    pub fn from_scenes(scenes: Vec<RawScene>) -> PlumbResult<Self> {
        let mut archive = Self::new();
        for scene in scenes {
            archive.insert(scene)?;
        }
        Ok(archive)
    }
}

impl ImageArchive for MemoryArchive {
    fn query(&self, query: &ArchiveQuery) -> Vec<&RawScene> {
        self.scenes.iter().filter(|s| query.matches(s)).collect()
    }

    fn len(&self) -> usize {
        self.scenes.len()
    }
}

/// One distinct (mission, date, spatial key) available in the archive
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MissionDateEntry {
    pub mission: String,
    pub date: NaiveDate,
    pub spatial_key: SpatialKey,
}

/// Enumerate every distinct mission-date pair offered to labelers,
/// sorted by mission, date, then spatial key.
pub fn mission_date_list(archive: &dyn ImageArchive, query: &ArchiveQuery) -> Vec<MissionDateEntry> {
    let entries: BTreeSet<MissionDateEntry> = archive
        .query(query)
        .into_iter()
        .map(|scene| MissionDateEntry {
            mission: scene.mission.clone(),
            date: scene.date(),
            spatial_key: scene.spatial_key.clone(),
        })
        .collect();

    log::info!("Found {} mission-date entries", entries.len());
    entries.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoTransform;
    use chrono::TimeZone;
    use geo::polygon;
    use ndarray::Array2;

    fn scene(id: &str, mission: &str, day: u32, key: SpatialKey) -> RawScene {
        let grid = GeoGrid::new(GeoTransform::north_up(-92.0, 47.0, 0.01), 10, 10, 4326);
        RawScene::new(
            id,
            mission,
            Utc.with_ymd_and_hms(2022, 5, day, 16, 50, 0).unwrap(),
            key,
            grid,
        )
        .with_band("SR_B2", Array2::from_elem((10, 10), 9000.0))
    }

    #[test]
    fn test_exact_day_filter() {
        let archive = MemoryArchive::from_scenes(vec![
            scene("a", "LANDSAT_8", 5, SpatialKey::WrsPathRow { path: 26, row: 27 }),
            scene("b", "LANDSAT_8", 6, SpatialKey::WrsPathRow { path: 26, row: 27 }),
        ])
        .unwrap();

        let date = NaiveDate::from_ymd_opt(2022, 5, 5).unwrap();
        let found = archive.query(&ArchiveQuery::on_date(date));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "a");
    }

    #[test]
    fn test_wrs_and_mgrs_filters() {
        let archive = MemoryArchive::from_scenes(vec![
            scene("l27", "LANDSAT_8", 5, SpatialKey::WrsPathRow { path: 26, row: 27 }),
            scene("l29", "LANDSAT_8", 5, SpatialKey::WrsPathRow { path: 26, row: 29 }),
            scene("s2", "SENTINEL_2A", 5, SpatialKey::MgrsTile("15TWN".into())),
        ])
        .unwrap();

        let query = ArchiveQuery {
            wrs_paths: vec![26],
            wrs_rows: vec![27, 28],
            ..ArchiveQuery::default()
        };
        let ids: Vec<_> = archive.query(&query).iter().map(|s| s.id.clone()).collect();
        assert_eq!(ids, vec!["l27"]);

        let query = ArchiveQuery {
            mgrs_tiles: vec!["15TWN".into()],
            ..ArchiveQuery::default()
        };
        let ids: Vec<_> = archive.query(&query).iter().map(|s| s.id.clone()).collect();
        assert_eq!(ids, vec!["s2"]);
    }

    #[test]
    fn test_spatial_filter() {
        let archive =
            MemoryArchive::from_scenes(vec![scene("a", "LANDSAT_8", 5, SpatialKey::WrsPathRow { path: 26, row: 27 })])
                .unwrap();

        let inside = MultiPolygon::new(vec![polygon![
            (x: -91.98, y: 46.92), (x: -91.95, y: 46.92), (x: -91.95, y: 46.95), (x: -91.98, y: 46.95)
        ]]);
        let outside = MultiPolygon::new(vec![polygon![
            (x: -80.0, y: 40.0), (x: -79.0, y: 40.0), (x: -79.0, y: 41.0), (x: -80.0, y: 41.0)
        ]]);
        assert_eq!(archive.query(&ArchiveQuery::default().intersecting(inside)).len(), 1);
        assert!(archive.query(&ArchiveQuery::default().intersecting(outside)).is_empty());
    }

    #[test]
    fn test_duplicate_and_shape_rejection() {
        let mut archive = MemoryArchive::new();
        archive
            .insert(scene("a", "LANDSAT_8", 5, SpatialKey::WrsPathRow { path: 26, row: 27 }))
            .unwrap();
        assert!(archive
            .insert(scene("a", "LANDSAT_8", 5, SpatialKey::WrsPathRow { path: 26, row: 27 }))
            .is_err());

        let bad = scene("b", "LANDSAT_8", 5, SpatialKey::WrsPathRow { path: 26, row: 27 })
            .with_band("SR_B3", Array2::zeros((3, 3)));
        assert!(archive.insert(bad).is_err());
    }

    #[test]
    fn test_mission_date_list_distinct_sorted() {
        let archive = MemoryArchive::from_scenes(vec![
            scene("c", "LANDSAT_9", 6, SpatialKey::WrsPathRow { path: 26, row: 27 }),
            scene("a", "LANDSAT_8", 5, SpatialKey::WrsPathRow { path: 26, row: 27 }),
            scene("b", "LANDSAT_8", 5, SpatialKey::WrsPathRow { path: 26, row: 28 }),
        ])
        .unwrap();
        let list = mission_date_list(&archive, &ArchiveQuery::default());
        assert_eq!(list.len(), 3);
        assert_eq!(list[0].mission, "LANDSAT_8");
        assert_eq!(list[0].spatial_key, SpatialKey::WrsPathRow { path: 26, row: 27 });
        assert_eq!(list[2].mission, "LANDSAT_9");
    }
}
