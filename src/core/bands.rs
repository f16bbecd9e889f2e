//! Band harmonization: resolve every sensor's native band names into one
//! canonical set and apply the Collection-2 / L2A radiometric scaling.

use crate::io::archive::{RawScene, SpatialKey};
use crate::types::{BandImage, GeoGrid, MissionFamily, PlumbError, PlumbResult, QaImage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Landsat Collection 2 Level-2 surface reflectance scaling
pub const LANDSAT_SR_SCALE: f64 = 0.0000275;
pub const LANDSAT_SR_OFFSET: f64 = -0.2;
/// Landsat Collection 2 Level-2 surface temperature scaling (Kelvin)
pub const LANDSAT_ST_SCALE: f64 = 0.00341802;
pub const LANDSAT_ST_OFFSET: f64 = 149.0;
/// Sentinel-2 harmonized L2A reflectance scaling
pub const SENTINEL_SR_SCALE: f64 = 0.0001;

/// Sensor-agnostic band names used downstream of harmonization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CanonicalBand {
    Coastal,
    Blue,
    Green,
    Red,
    Nir,
    Swir1,
    Swir2,
    SurfaceTemp,
}

impl CanonicalBand {
    pub const ALL: [CanonicalBand; 8] = [
        CanonicalBand::Coastal,
        CanonicalBand::Blue,
        CanonicalBand::Green,
        CanonicalBand::Red,
        CanonicalBand::Nir,
        CanonicalBand::Swir1,
        CanonicalBand::Swir2,
        CanonicalBand::SurfaceTemp,
    ];

    /// Reflective bands (excludes surface temperature)
    pub const REFLECTIVE: [CanonicalBand; 7] = [
        CanonicalBand::Coastal,
        CanonicalBand::Blue,
        CanonicalBand::Green,
        CanonicalBand::Red,
        CanonicalBand::Nir,
        CanonicalBand::Swir1,
        CanonicalBand::Swir2,
    ];

    /// Column name in exported tables
    pub fn name(&self) -> &'static str {
        match self {
            CanonicalBand::Coastal => "Coastal",
            CanonicalBand::Blue => "Blue",
            CanonicalBand::Green => "Green",
            CanonicalBand::Red => "Red",
            CanonicalBand::Nir => "Nir",
            CanonicalBand::Swir1 => "Swir1",
            CanonicalBand::Swir2 => "Swir2",
            CanonicalBand::SurfaceTemp => "SurfaceTemp",
        }
    }

    pub fn is_reflective(&self) -> bool {
        !matches!(self, CanonicalBand::SurfaceTemp)
    }
}

impl fmt::Display for CanonicalBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CanonicalBand {
    type Err = PlumbError;

    fn from_str(s: &str) -> PlumbResult<Self> {
        CanonicalBand::ALL
            .iter()
            .copied()
            .find(|b| b.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| PlumbError::InvalidFormat(format!("Unknown band: {}", s)))
    }
}

/// Native source band plus its linear scaling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandMapping {
    pub source: String,
    pub scale: f64,
    pub offset: f64,
}

impl BandMapping {
    pub fn new(source: &str, scale: f64, offset: f64) -> Self {
        Self {
            source: source.to_string(),
            scale,
            offset,
        }
    }

    /// `value * scale + offset`; fill (DN 0) and non-finite values become NaN
    pub fn apply(&self, dn: &BandImage) -> BandImage {
        let (scale, offset) = (self.scale as f32, self.offset as f32);
        dn.mapv(|v| {
            if v == 0.0 || !v.is_finite() {
                f32::NAN
            } else {
                v * scale + offset
            }
        })
    }
}

/// Per-sensor mapping from canonical bands to native bands.
/// `None` declares a canonical band unavailable for the sensor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BandSpecification {
    pub sensor: String,
    pub family: MissionFamily,
    /// Mission ids covered by this specification
    pub missions: Vec<String>,
    pub mapping: BTreeMap<CanonicalBand, Option<BandMapping>>,
}

impl BandSpecification {
    /// Landsat 4/5/7 TM and ETM+ Collection 2 Level-2
    pub fn landsat_tm_etm() -> Self {
        let sr = |b: &str| Some(BandMapping::new(b, LANDSAT_SR_SCALE, LANDSAT_SR_OFFSET));
        let mut mapping = BTreeMap::new();
        mapping.insert(CanonicalBand::Coastal, None);
        mapping.insert(CanonicalBand::Blue, sr("SR_B1"));
        mapping.insert(CanonicalBand::Green, sr("SR_B2"));
        mapping.insert(CanonicalBand::Red, sr("SR_B3"));
        mapping.insert(CanonicalBand::Nir, sr("SR_B4"));
        mapping.insert(CanonicalBand::Swir1, sr("SR_B5"));
        mapping.insert(CanonicalBand::Swir2, sr("SR_B7"));
        mapping.insert(
            CanonicalBand::SurfaceTemp,
            Some(BandMapping::new("ST_B6", LANDSAT_ST_SCALE, LANDSAT_ST_OFFSET)),
        );
        Self {
            sensor: "TM/ETM+".to_string(),
            family: MissionFamily::Landsat,
            missions: vec!["LANDSAT_4".into(), "LANDSAT_5".into(), "LANDSAT_7".into()],
            mapping,
        }
    }

    /// Landsat 8/9 OLI/TIRS Collection 2 Level-2
    pub fn landsat_oli() -> Self {
        let sr = |b: &str| Some(BandMapping::new(b, LANDSAT_SR_SCALE, LANDSAT_SR_OFFSET));
        let mut mapping = BTreeMap::new();
        mapping.insert(CanonicalBand::Coastal, sr("SR_B1"));
        mapping.insert(CanonicalBand::Blue, sr("SR_B2"));
        mapping.insert(CanonicalBand::Green, sr("SR_B3"));
        mapping.insert(CanonicalBand::Red, sr("SR_B4"));
        mapping.insert(CanonicalBand::Nir, sr("SR_B5"));
        mapping.insert(CanonicalBand::Swir1, sr("SR_B6"));
        mapping.insert(CanonicalBand::Swir2, sr("SR_B7"));
        mapping.insert(
            CanonicalBand::SurfaceTemp,
            Some(BandMapping::new("ST_B10", LANDSAT_ST_SCALE, LANDSAT_ST_OFFSET)),
        );
        Self {
            sensor: "OLI/TIRS".to_string(),
            family: MissionFamily::Landsat,
            missions: vec!["LANDSAT_8".into(), "LANDSAT_9".into()],
            mapping,
        }
    }

    /// Sentinel-2 MSI harmonized L2A
    pub fn sentinel2_msi() -> Self {
        let sr = |b: &str| Some(BandMapping::new(b, SENTINEL_SR_SCALE, 0.0));
        let mut mapping = BTreeMap::new();
        mapping.insert(CanonicalBand::Coastal, sr("B1"));
        mapping.insert(CanonicalBand::Blue, sr("B2"));
        mapping.insert(CanonicalBand::Green, sr("B3"));
        mapping.insert(CanonicalBand::Red, sr("B4"));
        mapping.insert(CanonicalBand::Nir, sr("B8"));
        mapping.insert(CanonicalBand::Swir1, sr("B11"));
        mapping.insert(CanonicalBand::Swir2, sr("B12"));
        mapping.insert(CanonicalBand::SurfaceTemp, None);
        Self {
            sensor: "MSI".to_string(),
            family: MissionFamily::Sentinel,
            missions: vec!["SENTINEL_2A".into(), "SENTINEL_2B".into(), "SENTINEL_2C".into()],
            mapping,
        }
    }

    pub fn covers(&self, mission: &str) -> bool {
        self.missions.iter().any(|m| m.eq_ignore_ascii_case(mission))
    }

    /// Canonical bands this sensor does not provide
    pub fn unavailable(&self) -> Vec<CanonicalBand> {
        self.mapping
            .iter()
            .filter(|(_, m)| m.is_none())
            .map(|(b, _)| *b)
            .collect()
    }
}

/// Lookup table of band specifications, resolved once per mission
#[derive(Debug, Clone)]
pub struct BandSpecRegistry {
    specs: Vec<BandSpecification>,
}

impl Default for BandSpecRegistry {
    fn default() -> Self {
        Self {
            specs: vec![
                BandSpecification::landsat_tm_etm(),
                BandSpecification::landsat_oli(),
                BandSpecification::sentinel2_msi(),
            ],
        }
    }
}

impl BandSpecRegistry {
    pub fn new(specs: Vec<BandSpecification>) -> Self {
        Self { specs }
    }

    /// Find the specification for a mission id.
    /// The mission family is dispatched first so an unknown family fails fast.
    pub fn resolve(&self, mission: &str) -> PlumbResult<&BandSpecification> {
        let family = MissionFamily::of(mission)?;
        self.specs
            .iter()
            .filter(|s| s.family == family)
            .find(|s| s.covers(mission))
            .ok_or_else(|| PlumbError::UnsupportedSensor {
                mission: mission.to_string(),
            })
    }
}

/// A scene after harmonization: canonical, scaled bands and untouched QA
#[derive(Debug, Clone)]
pub struct Scene {
    pub id: String,
    pub mission: String,
    pub family: MissionFamily,
    pub acquired: DateTime<Utc>,
    pub spatial_key: SpatialKey,
    pub grid: GeoGrid,
    pub bands: BTreeMap<CanonicalBand, BandImage>,
    /// Canonical bands declared unavailable for this sensor
    pub unavailable: Vec<CanonicalBand>,
    pub qa: BTreeMap<String, QaImage>,
}

impl Scene {
    pub fn band(&self, band: CanonicalBand) -> Option<&BandImage> {
        self.bands.get(&band)
    }
}

/// Band harmonizer
pub struct Harmonizer {
    registry: BandSpecRegistry,
}

impl Default for Harmonizer {
    fn default() -> Self {
        Self::new(BandSpecRegistry::default())
    }
}

impl Harmonizer {
    /// Create new harmonizer over a specification registry
    pub fn new(registry: BandSpecRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &BandSpecRegistry {
        &self.registry
    }

    /// Resolve the scene's native bands into the canonical set
    pub fn harmonize(&self, raw: &RawScene) -> PlumbResult<Scene> {
        let spec = self.registry.resolve(&raw.mission)?;
        log::debug!("Harmonizing {} with {} specification", raw.id, spec.sensor);

        let mut bands = BTreeMap::new();
        for (canonical, mapping) in &spec.mapping {
            let Some(mapping) = mapping else { continue };
            let dn = raw.bands.get(&mapping.source).ok_or_else(|| {
                PlumbError::InvalidFormat(format!(
                    "Scene {} is missing source band {} for {}",
                    raw.id, mapping.source, canonical
                ))
            })?;
            bands.insert(*canonical, mapping.apply(dn));
        }

        Ok(Scene {
            id: raw.id.clone(),
            mission: raw.mission.to_ascii_uppercase(),
            family: spec.family,
            acquired: raw.acquired,
            spatial_key: raw.spatial_key.clone(),
            grid: raw.grid.clone(),
            bands,
            unavailable: spec.unavailable(),
            qa: raw.qa.clone(),
        })
    }

    /// Harmonize a batch. Scenes from unsupported sensors are skipped and
    /// their ids returned; any other error aborts.
    pub fn harmonize_all(&self, raws: &[&RawScene]) -> PlumbResult<(Vec<Scene>, Vec<String>)> {
        log::info!("Harmonizing {} scenes", raws.len());
        let mut scenes = Vec::with_capacity(raws.len());
        let mut skipped = Vec::new();
        for raw in raws {
            match self.harmonize(raw) {
                Ok(scene) => scenes.push(scene),
                Err(PlumbError::UnsupportedSensor { mission }) => {
                    log::warn!("Skipping scene {}: unsupported sensor {}", raw.id, mission);
                    skipped.push(raw.id.clone());
                }
                Err(e) => return Err(e),
            }
        }
        Ok((scenes, skipped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoTransform;
    use approx::assert_abs_diff_eq;
    use chrono::TimeZone;
    use ndarray::Array2;

    fn raw(mission: &str, bands: &[(&str, f32)]) -> RawScene {
        let grid = GeoGrid::new(GeoTransform::north_up(500000.0, 5200000.0, 30.0), 4, 4, 32615);
        let mut scene = RawScene::new(
            format!("{}_test", mission),
            mission,
            Utc.with_ymd_and_hms(2022, 5, 5, 17, 0, 0).unwrap(),
            SpatialKey::WrsPathRow { path: 26, row: 27 },
            grid,
        );
        for (name, dn) in bands {
            scene = scene.with_band(*name, Array2::from_elem((4, 4), *dn));
        }
        scene
    }

    fn oli_bands(dn: f32) -> Vec<(&'static str, f32)> {
        vec![
            ("SR_B1", dn),
            ("SR_B2", dn),
            ("SR_B3", dn),
            ("SR_B4", dn),
            ("SR_B5", dn),
            ("SR_B6", dn),
            ("SR_B7", dn),
            ("ST_B10", 45000.0),
        ]
    }

    #[test]
    fn test_registry_resolution() {
        let registry = BandSpecRegistry::default();
        assert_eq!(registry.resolve("LANDSAT_5").unwrap().sensor, "TM/ETM+");
        assert_eq!(registry.resolve("LANDSAT_9").unwrap().sensor, "OLI/TIRS");
        assert_eq!(registry.resolve("SENTINEL_2B").unwrap().sensor, "MSI");
        assert!(matches!(
            registry.resolve("MODIS_TERRA"),
            Err(PlumbError::UnsupportedSensor { .. })
        ));
        assert!(matches!(
            registry.resolve("LANDSAT_3"),
            Err(PlumbError::UnsupportedSensor { .. })
        ));
    }

    #[test]
    fn test_oli_scaling() {
        let scene = Harmonizer::default()
            .harmonize(&raw("LANDSAT_8", &oli_bands(10000.0)))
            .unwrap();
        let blue = scene.band(CanonicalBand::Blue).unwrap();
        assert_abs_diff_eq!(blue[[0, 0]], 0.075, epsilon = 1e-6);
        let st = scene.band(CanonicalBand::SurfaceTemp).unwrap();
        assert_abs_diff_eq!(st[[0, 0]], 302.8109, epsilon = 1e-3);
        assert!(scene.unavailable.is_empty());
    }

    #[test]
    fn test_fill_becomes_nan() {
        let scene = Harmonizer::default()
            .harmonize(&raw("LANDSAT_8", &oli_bands(0.0)))
            .unwrap();
        assert!(scene.band(CanonicalBand::Red).unwrap()[[1, 1]].is_nan());
    }

    #[test]
    fn test_unavailable_bands_are_declared() {
        let tm = raw(
            "LANDSAT_5",
            &[
                ("SR_B1", 9000.0),
                ("SR_B2", 9000.0),
                ("SR_B3", 9000.0),
                ("SR_B4", 9000.0),
                ("SR_B5", 9000.0),
                ("SR_B7", 9000.0),
                ("ST_B6", 45000.0),
            ],
        );
        let scene = Harmonizer::default().harmonize(&tm).unwrap();
        assert_eq!(scene.unavailable, vec![CanonicalBand::Coastal]);
        assert!(scene.band(CanonicalBand::Coastal).is_none());
    }

    #[test]
    fn test_missing_source_band_is_error() {
        let partial = raw("LANDSAT_8", &[("SR_B2", 9000.0)]);
        assert!(matches!(
            Harmonizer::default().harmonize(&partial),
            Err(PlumbError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_cross_sensor_reflectance_range() {
        let l8 = Harmonizer::default()
            .harmonize(&raw("LANDSAT_8", &oli_bands(12000.0)))
            .unwrap();
        let s2 = Harmonizer::default()
            .harmonize(&raw(
                "SENTINEL_2A",
                &[
                    ("B1", 1200.0),
                    ("B2", 1200.0),
                    ("B3", 1200.0),
                    ("B4", 1200.0),
                    ("B8", 1200.0),
                    ("B11", 1200.0),
                    ("B12", 1200.0),
                ],
            ))
            .unwrap();
        for scene in [&l8, &s2] {
            for band in CanonicalBand::REFLECTIVE {
                if let Some(img) = scene.band(band) {
                    assert!(img.iter().all(|v| (-0.2..=1.6).contains(v)));
                }
            }
        }
        assert_eq!(s2.unavailable, vec![CanonicalBand::SurfaceTemp]);
    }

    #[test]
    fn test_harmonize_all_skips_unsupported() {
        let good = raw("LANDSAT_8", &oli_bands(9000.0));
        let bad = raw("MODIS_AQUA", &[]);
        let (scenes, skipped) = Harmonizer::default().harmonize_all(&[&good, &bad]).unwrap();
        assert_eq!(scenes.len(), 1);
        assert_eq!(skipped, vec!["MODIS_AQUA_test".to_string()]);
    }
}
