//! Workflow configuration loaded from JSON.
//!
//! Every section is optional; missing fields take their defaults.

use crate::core::classify::TrainingParams;
use crate::core::extract::ExtractionParams;
use crate::core::mosaic::MosaicParams;
use crate::core::quality_mask::MaskingConfig;
use crate::core::session::SessionConfig;
use crate::io::export::ExportParams;
use crate::types::{PlumbError, PlumbResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlumbConfig {
    pub masking: MaskingConfig,
    pub mosaic: MosaicParams,
    pub extraction: ExtractionParams,
    pub export: ExportParams,
    pub session: SessionConfig,
    pub training: TrainingParams,
}

impl PlumbConfig {
    pub fn from_json_str(contents: &str) -> PlumbResult<Self> {
        let config: PlumbConfig = serde_json::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> PlumbResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let config = Self::from_json_str(&contents)
            .map_err(|e| PlumbError::InvalidFormat(format!("Config {}: {}", path.display(), e)))?;
        log::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Reject values no component can run with
    pub fn validate(&self) -> PlumbResult<()> {
        let invalid = |msg: String| Err(PlumbError::InvalidFormat(msg));

        if self.export.max_concurrent == 0 {
            return invalid("export.max_concurrent must be at least 1".to_string());
        }
        if self.export.poll_interval_ms == 0 || self.export.timeout_ms < self.export.poll_interval_ms {
            return invalid(format!(
                "export.timeout_ms ({}) must be at least poll_interval_ms ({}) and both non-zero",
                self.export.timeout_ms, self.export.poll_interval_ms
            ));
        }
        if self.export.initials.trim().is_empty() || self.session.initials.trim().is_empty() {
            return invalid("Labeler initials must not be empty".to_string());
        }
        if !(self.extraction.scale.is_finite() && self.extraction.scale > 0.0) {
            return invalid(format!("extraction.scale must be positive, got {}", self.extraction.scale));
        }
        let split = self.training.split_fraction;
        if !(split > 0.0 && split < 1.0) {
            return invalid(format!("training.split_fraction must be in (0, 1), got {}", split));
        }
        if self.training.features.is_empty() {
            return invalid("training.features must name at least one band".to_string());
        }
        if self.mosaic.multi_families.is_empty() {
            return invalid("mosaic.multi_families must not be empty".to_string());
        }
        if let Some(opacity) = self.masking.max_atmos_opacity {
            if opacity < 0.0 {
                return invalid(format!("masking.max_atmos_opacity must not be negative, got {}", opacity));
            }
        }
        Ok(())
    }
}
