use crate::core::bands::Scene;
use crate::types::{MaskImage, MissionFamily, PlumbError, PlumbResult, QaImage};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

/// Landsat QA_PIXEL bit positions (Collection 2)
pub mod landsat_bits {
    pub const FILL: u16 = 0;
    pub const DILATED_CLOUD: u16 = 1;
    pub const CIRRUS: u16 = 2;
    pub const CLOUD: u16 = 3;
    pub const CLOUD_SHADOW: u16 = 4;
    pub const SNOW: u16 = 5;
    pub const WATER: u16 = 7;
    pub const CLOUD_CONFIDENCE: u16 = 8;
    pub const SHADOW_CONFIDENCE: u16 = 10;
    pub const SNOW_CONFIDENCE: u16 = 12;
    pub const CIRRUS_CONFIDENCE: u16 = 14;
}

/// Sentinel-2 scene classification (SCL) values
pub mod scl {
    pub const NO_DATA: u16 = 0;
    pub const SATURATED: u16 = 1;
    pub const CLOUD_SHADOW: u16 = 3;
    pub const WATER: u16 = 6;
    pub const CLOUD_MEDIUM: u16 = 8;
    pub const CLOUD_HIGH: u16 = 9;
    pub const CIRRUS: u16 = 10;
    pub const SNOW: u16 = 11;
}

pub const QA_PIXEL: &str = "QA_PIXEL";
pub const QA_RADSAT: &str = "QA_RADSAT";
pub const SR_QA_AEROSOL: &str = "SR_QA_AEROSOL";
pub const SR_ATMOS_OPACITY: &str = "SR_ATMOS_OPACITY";
pub const SCL: &str = "SCL";
pub const QA60: &str = "QA60";

const HIGH_CONFIDENCE: u8 = 3;

/// Which cloud evidence disqualifies a pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloudPolicy {
    /// Any cloud, cirrus, dilation, shadow or snow flag
    AnyFlag,
    /// Only flags whose confidence pair reads "high"
    HighConfidence,
}

/// Quality masking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaskingConfig {
    pub cloud_policy: CloudPolicy,
    /// Mask the whole pixel when any band is radiometrically saturated
    pub mask_saturation: bool,
    /// Keep only pixels classified as water
    pub require_water: bool,
    /// Mask Landsat 8/9 pixels with high aerosol level
    pub mask_high_aerosol: bool,
    /// Landsat 4-7 atmospheric opacity ceiling (scaled units)
    pub max_atmos_opacity: Option<f64>,
}

impl Default for MaskingConfig {
    fn default() -> Self {
        Self {
            cloud_policy: CloudPolicy::AnyFlag,
            mask_saturation: true,
            require_water: false,
            mask_high_aerosol: false,
            max_atmos_opacity: None,
        }
    }
}

/// Named flags decoded from one QA word
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QaFlags {
    pub fill: bool,
    pub dilated_cloud: bool,
    pub cirrus: bool,
    pub cloud: bool,
    pub shadow: bool,
    pub snow: bool,
    pub water: bool,
    pub saturated: bool,
    pub cloud_confidence: u8,
    pub shadow_confidence: u8,
    pub snow_confidence: u8,
    pub cirrus_confidence: u8,
}

fn bit(word: u16, pos: u16) -> bool {
    (word >> pos) & 1 == 1
}

fn pair(word: u16, pos: u16) -> u8 {
    ((word >> pos) & 0b11) as u8
}

impl QaFlags {
    /// Decode a Landsat Collection 2 QA_PIXEL word.
    /// An all-zero word carries no clear bit and is treated as fill.
    pub fn from_landsat(word: u16) -> Self {
        use landsat_bits::*;
        Self {
            fill: word == 0 || bit(word, FILL),
            dilated_cloud: bit(word, DILATED_CLOUD),
            cirrus: bit(word, CIRRUS),
            cloud: bit(word, CLOUD),
            shadow: bit(word, CLOUD_SHADOW),
            snow: bit(word, SNOW),
            water: bit(word, WATER),
            saturated: false,
            cloud_confidence: pair(word, CLOUD_CONFIDENCE),
            shadow_confidence: pair(word, SHADOW_CONFIDENCE),
            snow_confidence: pair(word, SNOW_CONFIDENCE),
            cirrus_confidence: pair(word, CIRRUS_CONFIDENCE),
        }
    }

    /// Decode a Sentinel-2 SCL class. Medium-probability cloud reads as
    /// confidence 2, every other flagged class as high.
    pub fn from_scl(class: u16) -> Self {
        let mut flags = Self {
            fill: class == scl::NO_DATA,
            saturated: class == scl::SATURATED,
            water: class == scl::WATER,
            ..Self::default()
        };
        match class {
            scl::CLOUD_SHADOW => {
                flags.shadow = true;
                flags.shadow_confidence = HIGH_CONFIDENCE;
            }
            scl::CLOUD_MEDIUM => {
                flags.cloud = true;
                flags.cloud_confidence = 2;
            }
            scl::CLOUD_HIGH => {
                flags.cloud = true;
                flags.cloud_confidence = HIGH_CONFIDENCE;
            }
            scl::CIRRUS => {
                flags.cirrus = true;
                flags.cirrus_confidence = HIGH_CONFIDENCE;
            }
            scl::SNOW => {
                flags.snow = true;
                flags.snow_confidence = HIGH_CONFIDENCE;
            }
            _ => {}
        }
        flags
    }

    /// Fold in the Sentinel-2 QA60 opaque (bit 10) and cirrus (bit 11) flags
    pub fn with_qa60(mut self, word: u16) -> Self {
        if bit(word, 10) {
            self.cloud = true;
            self.cloud_confidence = HIGH_CONFIDENCE;
        }
        if bit(word, 11) {
            self.cirrus = true;
            self.cirrus_confidence = HIGH_CONFIDENCE;
        }
        self
    }

    /// Ordinal cloud severity: 0 clear, then dilated 1, cirrus 2, cloud 3,
    /// shadow 4, snow 5 (highest set flag wins)
    pub fn severity(&self) -> u8 {
        [self.dilated_cloud, self.cirrus, self.cloud, self.shadow, self.snow]
            .iter()
            .enumerate()
            .filter(|(_, set)| **set)
            .map(|(i, _)| i as u8 + 1)
            .max()
            .unwrap_or(0)
    }

    /// Whether cloud evidence disqualifies the pixel under a policy
    pub fn is_cloudy(&self, policy: CloudPolicy) -> bool {
        match policy {
            CloudPolicy::AnyFlag => self.severity() > 0,
            CloudPolicy::HighConfidence => {
                (self.cloud && self.cloud_confidence == HIGH_CONFIDENCE)
                    || (self.shadow && self.shadow_confidence == HIGH_CONFIDENCE)
                    || (self.snow && self.snow_confidence == HIGH_CONFIDENCE)
                    || (self.cirrus && self.cirrus_confidence == HIGH_CONFIDENCE)
            }
        }
    }
}

/// Per-pixel validity layers of one scene
#[derive(Debug, Clone)]
pub struct QualityMask {
    valid: MaskImage,
    pub water: MaskImage,
    pub saturated: MaskImage,
    pub cloud_severity: Array2<u8>,
    pub shadow: MaskImage,
    pub snow_ice: MaskImage,
    pub fill: MaskImage,
}

impl QualityMask {
    /// Everything valid, nothing flagged
    pub fn all_valid(shape: (usize, usize)) -> Self {
        Self {
            valid: Array2::from_elem(shape, true),
            water: Array2::from_elem(shape, false),
            saturated: Array2::from_elem(shape, false),
            cloud_severity: Array2::zeros(shape),
            shadow: Array2::from_elem(shape, false),
            snow_ice: Array2::from_elem(shape, false),
            fill: Array2::from_elem(shape, false),
        }
    }

    pub fn valid(&self) -> &MaskImage {
        &self.valid
    }

    /// Narrow validity to pixels also valid in `other`. Never un-masks.
    pub fn restrict(&mut self, other: &MaskImage) {
        Zip::from(&mut self.valid)
            .and(other)
            .for_each(|v, &o| *v = *v && o);
    }

    pub fn valid_count(&self) -> usize {
        self.valid.iter().filter(|v| **v).count()
    }

    pub fn valid_fraction(&self) -> f64 {
        if self.valid.is_empty() {
            return 0.0;
        }
        self.valid_count() as f64 / self.valid.len() as f64
    }

    pub fn water_fraction(&self) -> f64 {
        if self.water.is_empty() {
            return 0.0;
        }
        self.water.iter().filter(|w| **w).count() as f64 / self.water.len() as f64
    }
}

/// A harmonized scene with its quality mask applied
#[derive(Debug, Clone)]
pub struct MaskedScene {
    pub scene: Scene,
    pub mask: QualityMask,
}

/// Quality masker
pub struct QualityMasker {
    config: MaskingConfig,
}

impl Default for QualityMasker {
    fn default() -> Self {
        Self::new(MaskingConfig::default())
    }
}

impl QualityMasker {
    /// Create new masker with configuration
    pub fn new(config: MaskingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MaskingConfig {
        &self.config
    }

    /// Decode QA layers into a validity mask and blank invalid pixels
    pub fn mask(&self, mut scene: Scene) -> PlumbResult<MaskedScene> {
        let shape = scene.grid.shape();
        let flags = match scene.family {
            MissionFamily::Landsat => self.decode_landsat(&scene)?,
            MissionFamily::Sentinel => self.decode_sentinel(&scene)?,
        };

        let mut mask = QualityMask::all_valid(shape);
        mask.fill = flags.mapv(|f| f.fill);
        mask.water = flags.mapv(|f| f.water);
        mask.saturated = flags.mapv(|f| f.saturated);
        mask.cloud_severity = flags.mapv(|f| f.severity());
        mask.shadow = flags.mapv(|f| f.shadow);
        mask.snow_ice = flags.mapv(|f| f.snow);

        let policy = self.config.cloud_policy;
        let mask_saturation = self.config.mask_saturation;
        let qa_valid = flags.mapv(|f| {
            !f.fill && !f.is_cloudy(policy) && !(mask_saturation && f.saturated)
        });
        mask.restrict(&qa_valid);

        if self.config.require_water {
            let water = mask.water.clone();
            mask.restrict(&water);
        }

        if let Some(aerosol) = self.aerosol_mask(&scene) {
            mask.restrict(&aerosol);
        }
        if let Some(opacity) = self.opacity_mask(&scene) {
            mask.restrict(&opacity);
        }

        // Harmonized fill (NaN) in any band invalidates the pixel
        for band in scene.bands.values() {
            let finite = band.mapv(|v| v.is_finite());
            mask.restrict(&finite);
        }

        for band in scene.bands.values_mut() {
            Zip::from(band).and(mask.valid()).for_each(|v, &ok| {
                if !ok {
                    *v = f32::NAN;
                }
            });
        }

        log::debug!(
            "Masked {}: {:.1}% valid, {:.1}% water",
            scene.id,
            mask.valid_fraction() * 100.0,
            mask.water_fraction() * 100.0
        );

        Ok(MaskedScene { scene, mask })
    }

    fn qa_band<'a>(scene: &'a Scene, name: &str) -> Option<&'a QaImage> {
        scene.qa.get(name)
    }

    fn decode_landsat(&self, scene: &Scene) -> PlumbResult<Array2<QaFlags>> {
        let pixel = Self::qa_band(scene, QA_PIXEL).ok_or_else(|| {
            PlumbError::InvalidFormat(format!("Scene {} has no {} band", scene.id, QA_PIXEL))
        })?;
        let mut flags = pixel.mapv(QaFlags::from_landsat);

        if let Some(radsat) = Self::qa_band(scene, QA_RADSAT) {
            // Any saturated band saturates the whole pixel
            Zip::from(&mut flags)
                .and(radsat)
                .for_each(|f, &r| f.saturated = r != 0);
        }
        Ok(flags)
    }

    fn decode_sentinel(&self, scene: &Scene) -> PlumbResult<Array2<QaFlags>> {
        let scl_band = Self::qa_band(scene, SCL);
        let qa60 = Self::qa_band(scene, QA60);

        let mut flags = match (scl_band, qa60) {
            (Some(s), _) => s.mapv(QaFlags::from_scl),
            // QA60 alone carries no fill flag; harmonized NaN covers it
            (None, Some(q)) => q.mapv(|w| QaFlags::default().with_qa60(w)),
            (None, None) => {
                return Err(PlumbError::InvalidFormat(format!(
                    "Scene {} has neither {} nor {} band",
                    scene.id, SCL, QA60
                )))
            }
        };

        if let (Some(_), Some(q)) = (scl_band, qa60) {
            Zip::from(&mut flags)
                .and(q)
                .for_each(|f, &w| *f = f.with_qa60(w));
        }
        Ok(flags)
    }

    /// SR_QA_AEROSOL bits 6-7 == 3 marks high aerosol
    fn aerosol_mask(&self, scene: &Scene) -> Option<MaskImage> {
        if !self.config.mask_high_aerosol {
            return None;
        }
        match Self::qa_band(scene, SR_QA_AEROSOL) {
            Some(aerosol) => Some(aerosol.mapv(|w| pair(w, 6) != 3)),
            None => {
                log::debug!("Scene {} has no {}; aerosol mask skipped", scene.id, SR_QA_AEROSOL);
                None
            }
        }
    }

    /// SR_ATMOS_OPACITY * 0.001 below the configured ceiling
    fn opacity_mask(&self, scene: &Scene) -> Option<MaskImage> {
        let ceiling = self.config.max_atmos_opacity?;
        match Self::qa_band(scene, SR_ATMOS_OPACITY) {
            Some(opacity) => Some(opacity.mapv(|v| (v as f64) * 0.001 < ceiling)),
            None => {
                log::debug!("Scene {} has no {}; opacity mask skipped", scene.id, SR_ATMOS_OPACITY);
                None
            }
        }
    }
}
