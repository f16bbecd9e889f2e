use crate::core::bands::{CanonicalBand, Harmonizer};
use crate::core::crs::{Crs, Reprojector};
use crate::core::quality_mask::{MaskedScene, QualityMasker};
use crate::core::tiles::{Tile, TileCatalog};
use crate::io::archive::{ArchiveQuery, ImageArchive};
use crate::types::{
    mission_from_code, BandImage, GeoGrid, GeoTransform, MaskImage, MissionFamily, MosaicKey,
    PlumbError, PlumbResult, MULTI_MISSION,
};
use chrono::NaiveDate;
use ndarray::Array2;
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Which missions a mosaic draws from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MissionSelector {
    /// One mission id, e.g. "LANDSAT_8"
    Mission(String),
    /// Every mission, dispatched per scene by mission family
    Multi,
}

impl MissionSelector {
    /// Parse "multi", a short code ("LS8") or a mission id
    pub fn parse(s: &str) -> PlumbResult<Self> {
        if s.eq_ignore_ascii_case(MULTI_MISSION) {
            return Ok(MissionSelector::Multi);
        }
        let mission = mission_from_code(s).unwrap_or_else(|| s.trim().to_ascii_uppercase());
        MissionFamily::of(&mission)?;
        Ok(MissionSelector::Mission(mission))
    }

    /// Mission component of the mosaic key
    pub fn label(&self) -> String {
        match self {
            MissionSelector::Mission(m) => m.to_ascii_uppercase(),
            MissionSelector::Multi => MULTI_MISSION.to_string(),
        }
    }
}

impl fmt::Display for MissionSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Order in which scenes are stacked; the last valid pixel wins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompositeOrder {
    SceneId,
    AcquisitionTime,
}

/// Mosaicking parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MosaicParams {
    pub composite_order: CompositeOrder,
    /// Families admitted by a multi-mission mosaic
    pub multi_families: Vec<MissionFamily>,
}

impl Default for MosaicParams {
    fn default() -> Self {
        Self {
            composite_order: CompositeOrder::SceneId,
            multi_families: vec![MissionFamily::Landsat, MissionFamily::Sentinel],
        }
    }
}

/// Composited raster for one (mission, date, tile) key
#[derive(Debug, Clone)]
pub struct Mosaic {
    pub key: MosaicKey,
    pub grid: GeoGrid,
    pub bands: BTreeMap<CanonicalBand, BandImage>,
    /// Pixel holds a valid composited value
    pub valid: MaskImage,
    /// Pixel centre lies inside the tile
    pub footprint: MaskImage,
    /// Contributing scene ids in composite order
    pub source_scenes: Vec<String>,
    /// Canonical bands no contributing scene provides
    pub unavailable: Vec<CanonicalBand>,
}

impl Mosaic {
    pub fn mission(&self) -> &str {
        &self.key.mission
    }

    pub fn date(&self) -> NaiveDate {
        self.key.date
    }

    pub fn tile_id(&self) -> u32 {
        self.key.tile_id
    }

    pub fn crs(&self) -> PlumbResult<Crs> {
        Crs::from_epsg(self.grid.epsg)
    }

    pub fn band(&self, band: CanonicalBand) -> Option<&BandImage> {
        self.bands.get(&band)
    }

    pub fn valid_count(&self) -> usize {
        self.valid.iter().filter(|v| **v).count()
    }

    /// Fraction of in-tile pixels holding a valid value
    pub fn valid_fraction(&self) -> f64 {
        let inside = self.footprint.iter().filter(|v| **v).count();
        if inside == 0 {
            return 0.0;
        }
        self.valid_count() as f64 / inside as f64
    }

    /// Imagery exists for the key but every pixel is masked
    pub fn is_fully_masked(&self) -> bool {
        self.valid_count() == 0
    }

    /// Band value under a WGS84 point; `None` when outside, masked or unavailable
    pub fn value_at(&self, lon: f64, lat: f64, band: CanonicalBand) -> Option<f32> {
        let (x, y) = self.crs().ok()?.from_wgs84(lon, lat).ok()?;
        let (row, col) = self.grid.locate(x, y)?;
        if !self.valid[[row, col]] {
            return None;
        }
        self.bands
            .get(&band)
            .map(|img| img[[row, col]])
            .filter(|v| v.is_finite())
    }

    /// Keep only the requested bands
    pub fn select(&self, bands: &[CanonicalBand]) -> PlumbResult<Mosaic> {
        let mut selected = BTreeMap::new();
        for band in bands {
            let img = self.bands.get(band).ok_or_else(|| {
                PlumbError::InvalidFormat(format!("Band {} is not available in mosaic {}", band, self.key))
            })?;
            selected.insert(*band, img.clone());
        }
        Ok(Mosaic {
            key: self.key.clone(),
            grid: self.grid,
            bands: selected,
            valid: self.valid.clone(),
            footprint: self.footprint.clone(),
            source_scenes: self.source_scenes.clone(),
            unavailable: self.unavailable.clone(),
        })
    }
}

/// One entry of a validation-set batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MosaicRequest {
    pub selector: MissionSelector,
    pub date: NaiveDate,
    pub tile_id: u32,
}

impl MosaicRequest {
    pub fn key(&self) -> MosaicKey {
        MosaicKey::new(self.selector.label(), self.date, self.tile_id)
    }
}

/// Mosaics built for a batch of keys plus the keys that were skipped
#[derive(Debug, Default)]
pub struct ValidationSet {
    pub mosaics: Vec<Mosaic>,
    pub skipped: Vec<(MosaicKey, String)>,
}

/// Scene selector and mosaicker
pub struct Mosaicker {
    harmonizer: Harmonizer,
    masker: QualityMasker,
    params: MosaicParams,
}

impl Default for Mosaicker {
    fn default() -> Self {
        Self::new(Harmonizer::default(), QualityMasker::default(), MosaicParams::default())
    }
}

impl Mosaicker {
    /// Create new mosaicker
    pub fn new(harmonizer: Harmonizer, masker: QualityMasker, params: MosaicParams) -> Self {
        Self {
            harmonizer,
            masker,
            params,
        }
    }

    pub fn params(&self) -> &MosaicParams {
        &self.params
    }

    /// Select every scene of the day that matches the mission and touches
    /// the tile, harmonize and mask it, and composite into one clipped mosaic
    pub fn select_and_mosaic(
        &self,
        archive: &dyn ImageArchive,
        selector: &MissionSelector,
        date: NaiveDate,
        tile: &Tile,
    ) -> PlumbResult<Mosaic> {
        let key = MosaicKey::new(selector.label(), date, tile.id);
        log::info!("🛰️ Selecting scenes for {}", key);

        let mut query = ArchiveQuery::on_date(date).intersecting(tile.geometry.clone());
        if let MissionSelector::Mission(mission) = selector {
            query = query.mission(mission.clone());
        }
        let candidates = archive.query(&query);
        log::debug!("{} candidate scenes for {}", candidates.len(), key);

        let mut scenes = Vec::with_capacity(candidates.len());
        for raw in candidates {
            let family = match MissionFamily::of(&raw.mission) {
                Ok(family) => family,
                Err(e) => {
                    log::warn!("Skipping scene {}: {}", raw.id, e);
                    continue;
                }
            };
            if *selector == MissionSelector::Multi && !self.params.multi_families.contains(&family) {
                log::debug!("Scene {} excluded: family {} not selected", raw.id, family);
                continue;
            }
            let scene = match self.harmonizer.harmonize(raw) {
                Ok(scene) => scene,
                Err(e) => {
                    log::warn!("Skipping scene {}: {}", raw.id, e);
                    continue;
                }
            };
            let scene_id = scene.id.clone();
            match self.masker.mask(scene) {
                Ok(masked) => scenes.push(masked),
                Err(e) => log::warn!("Skipping scene {}: {}", scene_id, e),
            }
        }

        if scenes.is_empty() {
            return Err(PlumbError::NoMatchingScene { key });
        }

        match self.params.composite_order {
            CompositeOrder::SceneId => scenes.sort_by(|a, b| a.scene.id.cmp(&b.scene.id)),
            CompositeOrder::AcquisitionTime => scenes.sort_by(|a, b| {
                a.scene
                    .acquired
                    .cmp(&b.scene.acquired)
                    .then_with(|| a.scene.id.cmp(&b.scene.id))
            }),
        }

        composite(&scenes, tile, key)
    }

    /// Build mosaics for a batch of keys in parallel. Failed keys are
    /// reported, never fatal.
    pub fn validation_set(
        &self,
        archive: &dyn ImageArchive,
        catalog: &TileCatalog,
        requests: &[MosaicRequest],
    ) -> ValidationSet {
        log::info!("Building validation set of {} mosaics", requests.len());
        let build = |req: &MosaicRequest| {
            let result = catalog
                .get(req.tile_id)
                .and_then(|tile| self.select_and_mosaic(archive, &req.selector, req.date, tile));
            (req.key(), result)
        };

        #[cfg(feature = "parallel")]
        let results: Vec<(MosaicKey, PlumbResult<Mosaic>)> = requests.par_iter().map(build).collect();

        #[cfg(not(feature = "parallel"))]
        let results: Vec<(MosaicKey, PlumbResult<Mosaic>)> = requests.iter().map(build).collect();

        let mut set = ValidationSet::default();
        for (key, result) in results {
            match result {
                Ok(mosaic) => set.mosaics.push(mosaic),
                Err(e) => {
                    log::warn!("Skipping {}: {}", key, e);
                    set.skipped.push((key, e.to_string()));
                }
            }
        }
        log::info!(
            "Validation set: {} mosaics, {} skipped",
            set.mosaics.len(),
            set.skipped.len()
        );
        set
    }
}

/// Output lattice: the first scene's CRS and pixel size, covering the tile
/// bounds and snapped to that scene's pixel edges
fn output_grid(first: &GeoGrid, tile: &Tile) -> PlumbResult<GeoGrid> {
    let crs = Crs::from_epsg(first.epsg)?;
    let tile_bounds = tile
        .bounds()
        .ok_or_else(|| PlumbError::InvalidFormat(format!("Tile {} has empty geometry", tile.id)))?;
    let bbox = crs.transform_bbox_from(&Crs::wgs84(), &tile_bounds)?;

    let t = &first.transform;
    let (c_a, c_b) = (
        (bbox.min_x - t.top_left_x) / t.pixel_width,
        (bbox.max_x - t.top_left_x) / t.pixel_width,
    );
    let (r_a, r_b) = (
        (bbox.max_y - t.top_left_y) / t.pixel_height,
        (bbox.min_y - t.top_left_y) / t.pixel_height,
    );
    let col_min = c_a.min(c_b).floor();
    let col_max = c_a.max(c_b).ceil();
    let row_min = r_a.min(r_b).floor();
    let row_max = r_a.max(r_b).ceil();

    let transform = GeoTransform {
        top_left_x: t.top_left_x + col_min * t.pixel_width,
        top_left_y: t.top_left_y + row_min * t.pixel_height,
        ..*t
    };
    let rows = ((row_max - row_min) as usize).max(1);
    let cols = ((col_max - col_min) as usize).max(1);
    Ok(GeoGrid::new(transform, rows, cols, first.epsg))
}

/// Last-valid-wins composite of ordered, masked scenes clipped to the tile.
/// A pixel takes every band from the same scene.
pub fn composite(scenes: &[MaskedScene], tile: &Tile, key: MosaicKey) -> PlumbResult<Mosaic> {
    let first = scenes
        .first()
        .ok_or_else(|| PlumbError::NoMatchingScene { key: key.clone() })?;
    let grid = output_grid(&first.scene.grid, tile)?;
    let out_crs = Crs::from_epsg(grid.epsg)?;
    let to_wgs84 = Reprojector::new(out_crs, Crs::wgs84())?;
    let to_scene = scenes
        .iter()
        .map(|s| Reprojector::new(out_crs, Crs::from_epsg(s.scene.grid.epsg)?))
        .collect::<PlumbResult<Vec<_>>>()?;

    let band_set: BTreeSet<CanonicalBand> = scenes
        .iter()
        .flat_map(|s| s.scene.bands.keys().copied())
        .collect();
    let band_list: Vec<CanonicalBand> = band_set.iter().copied().collect();
    let unavailable: Vec<CanonicalBand> = CanonicalBand::ALL
        .iter()
        .copied()
        .filter(|b| !band_set.contains(b))
        .collect();

    log::debug!(
        "Compositing {} scenes onto {}x{} grid ({}) for {}",
        scenes.len(),
        grid.rows,
        grid.cols,
        out_crs,
        key
    );

    let (rows, cols) = grid.shape();
    let build_row = |row: usize| -> PlumbResult<Vec<(bool, bool, Vec<f32>)>> {
        (0..cols)
            .map(|col| -> PlumbResult<(bool, bool, Vec<f32>)> {
                let (x, y) = grid.pixel_center(row, col);
                let (lon, lat) = to_wgs84.transform(x, y)?;
                if !tile.contains(lon, lat) {
                    return Ok((false, false, vec![f32::NAN; band_list.len()]));
                }
                for (masked, reprojector) in scenes.iter().zip(&to_scene).rev() {
                    let (sx, sy) = reprojector.transform(x, y)?;
                    let Some((r, c)) = masked.scene.grid.locate(sx, sy) else {
                        continue;
                    };
                    if !masked.mask.valid()[[r, c]] {
                        continue;
                    }
                    let values = band_list
                        .iter()
                        .map(|b| masked.scene.bands.get(b).map_or(f32::NAN, |img| img[[r, c]]))
                        .collect();
                    return Ok((true, true, values));
                }
                Ok((true, false, vec![f32::NAN; band_list.len()]))
            })
            .collect()
    };

    #[cfg(feature = "parallel")]
    let row_data = (0..rows)
        .into_par_iter()
        .map(build_row)
        .collect::<PlumbResult<Vec<_>>>()?;

    #[cfg(not(feature = "parallel"))]
    let row_data = (0..rows).map(build_row).collect::<PlumbResult<Vec<_>>>()?;

    let mut bands: BTreeMap<CanonicalBand, BandImage> = band_list
        .iter()
        .map(|b| (*b, Array2::from_elem((rows, cols), f32::NAN)))
        .collect();
    let mut valid = Array2::from_elem((rows, cols), false);
    let mut footprint = Array2::from_elem((rows, cols), false);
    for (row, cells) in row_data.into_iter().enumerate() {
        for (col, (inside, ok, values)) in cells.into_iter().enumerate() {
            footprint[[row, col]] = inside;
            valid[[row, col]] = ok;
            for (band, value) in band_list.iter().zip(values) {
                if let Some(img) = bands.get_mut(band) {
                    img[[row, col]] = value;
                }
            }
        }
    }

    let mosaic = Mosaic {
        key,
        grid,
        bands,
        valid,
        footprint,
        source_scenes: scenes.iter().map(|s| s.scene.id.clone()).collect(),
        unavailable,
    };
    log::info!(
        "✅ Mosaic {} built from {} scenes: {:.1}% valid",
        mosaic.key,
        mosaic.source_scenes.len(),
        mosaic.valid_fraction() * 100.0
    );
    Ok(mosaic)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::archive::{MemoryArchive, RawScene, SpatialKey};
    use chrono::{TimeZone, Utc};
    use geo::{polygon, MultiPolygon};

    const CLEAR: u16 = 1 << 6;

    fn tile(id: u32, x0: f64, y0: f64, size: f64) -> Tile {
        Tile::new(
            id,
            format!("aoi{}", id),
            MultiPolygon::new(vec![polygon![
                (x: x0, y: y0),
                (x: x0 + size, y: y0),
                (x: x0 + size, y: y0 + size),
                (x: x0, y: y0 + size),
            ]]),
        )
    }

    fn l8_scene(id: &str, dn: f32, qa: u16, x0: f64) -> RawScene {
        let grid = GeoGrid::new(GeoTransform::north_up(x0, 47.0, 0.01), 20, 20, 4326);
        let mut raw = RawScene::new(
            id,
            "LANDSAT_8",
            Utc.with_ymd_and_hms(2022, 5, 5, 16, 50, 0).unwrap(),
            SpatialKey::WrsPathRow { path: 26, row: 27 },
            grid,
        );
        for b in ["SR_B1", "SR_B2", "SR_B3", "SR_B4", "SR_B5", "SR_B6", "SR_B7", "ST_B10"] {
            raw = raw.with_band(b, Array2::from_elem((20, 20), dn));
        }
        raw.with_qa("QA_PIXEL", Array2::from_elem((20, 20), qa))
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2022, 5, 5).unwrap()
    }

    #[test]
    fn test_selector_parse() {
        assert_eq!(
            MissionSelector::parse("LS8").unwrap(),
            MissionSelector::Mission("LANDSAT_8".into())
        );
        assert_eq!(MissionSelector::parse("multi").unwrap(), MissionSelector::Multi);
        assert!(MissionSelector::parse("MODIS").is_err());
    }

    #[test]
    fn test_no_matching_scene() {
        let archive = MemoryArchive::from_scenes(vec![l8_scene("a", 9000.0, CLEAR, -92.0)]).unwrap();
        let far = tile(9, -80.0, 40.0, 0.05);
        let err = Mosaicker::default()
            .select_and_mosaic(&archive, &MissionSelector::Mission("LANDSAT_8".into()), date(), &far)
            .unwrap_err();
        assert!(matches!(err, PlumbError::NoMatchingScene { .. }));
    }

    #[test]
    fn test_fully_masked_is_not_missing() {
        let cloudy = (1 << 3) | (0b11 << 8);
        let archive = MemoryArchive::from_scenes(vec![l8_scene("a", 9000.0, cloudy, -92.0)]).unwrap();
        let mosaic = Mosaicker::default()
            .select_and_mosaic(&archive, &MissionSelector::Multi, date(), &tile(1, -91.95, 46.85, 0.05))
            .unwrap();
        assert!(mosaic.is_fully_masked());
        assert_eq!(mosaic.key.mission, "multi");
    }

    #[test]
    fn test_grid_snaps_to_scene_lattice() {
        let archive = MemoryArchive::from_scenes(vec![l8_scene("a", 9000.0, CLEAR, -92.0)]).unwrap();
        let mosaic = Mosaicker::default()
            .select_and_mosaic(&archive, &MissionSelector::Mission("LANDSAT_8".into()), date(), &tile(1, -91.953, 46.853, 0.05))
            .unwrap();
        let offset = (mosaic.grid.transform.top_left_x + 92.0) / 0.01;
        assert!((offset - offset.round()).abs() < 1e-6);
        assert!(mosaic.valid_fraction() > 0.99);
        assert_eq!(mosaic.unavailable, Vec::<CanonicalBand>::new());
    }

    #[test]
    fn test_clip_excludes_outside_pixels() {
        let archive = MemoryArchive::from_scenes(vec![l8_scene("a", 9000.0, CLEAR, -92.0)]).unwrap();
        let t = tile(1, -91.95, 46.85, 0.05);
        let mosaic = Mosaicker::default()
            .select_and_mosaic(&archive, &MissionSelector::Multi, date(), &t)
            .unwrap();
        assert!(mosaic.value_at(-91.925, 46.875, CanonicalBand::Red).is_some());
        assert!(mosaic.value_at(-91.80, 46.875, CanonicalBand::Red).is_none());
    }

    #[test]
    fn test_scene_without_qa_is_skipped() {
        let mut no_qa = l8_scene("b", 12000.0, CLEAR, -92.0);
        no_qa.qa.clear();
        let archive = MemoryArchive::from_scenes(vec![l8_scene("a", 9000.0, CLEAR, -92.0), no_qa]).unwrap();
        let mosaic = Mosaicker::default()
            .select_and_mosaic(&archive, &MissionSelector::Mission("LANDSAT_8".into()), date(), &tile(1, -91.95, 46.85, 0.05))
            .unwrap();
        assert_eq!(mosaic.source_scenes, vec!["a".to_string()]);
        assert!(mosaic.valid_fraction() > 0.99);
    }

    #[test]
    fn test_select_bands() {
        let archive = MemoryArchive::from_scenes(vec![l8_scene("a", 9000.0, CLEAR, -92.0)]).unwrap();
        let mosaic = Mosaicker::default()
            .select_and_mosaic(&archive, &MissionSelector::Multi, date(), &tile(1, -91.95, 46.85, 0.05))
            .unwrap();
        let sub = mosaic.select(&[CanonicalBand::Red, CanonicalBand::Nir]).unwrap();
        assert_eq!(sub.bands.len(), 2);
        assert_eq!(sub.key, mosaic.key);
    }

    #[test]
    fn test_validation_set_reports_skips() {
        let archive = MemoryArchive::from_scenes(vec![l8_scene("a", 9000.0, CLEAR, -92.0)]).unwrap();
        let catalog = TileCatalog::new(vec![tile(1, -91.95, 46.85, 0.05), tile(2, -80.0, 40.0, 0.05)]).unwrap();
        let requests: Vec<MosaicRequest> = [1, 2, 3]
            .iter()
            .map(|id| MosaicRequest {
                selector: MissionSelector::Mission("LANDSAT_8".into()),
                date: date(),
                tile_id: *id,
            })
            .collect();
        let set = Mosaicker::default().validation_set(&archive, &catalog, &requests);
        assert_eq!(set.mosaics.len(), 1);
        assert_eq!(set.skipped.len(), 2);
    }
}
