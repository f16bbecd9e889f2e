//! Plumb: tiled multi-sensor mosaicking, point labeling and classification
//!
//! Harmonizes Landsat 4-9 and Sentinel-2 surface reflectance onto one band
//! naming, masks clouds and saturation from the QA layers, mosaics scenes per
//! (mission, date, tile), and drives a labeling session whose points are
//! exported, sampled back against the mosaics and used to train classifiers.

pub mod config;
pub mod core;
pub mod io;
pub mod types;

#[cfg(feature = "python")]
mod python;

// Re-export main types and functions for easier access
pub use types::{
    BandImage, BoundingBox, GeoGrid, GeoTransform, MaskImage, MissionFamily, MosaicKey, PlumbError,
    PlumbResult, QaImage,
};

pub use config::PlumbConfig;
pub use io::{ExportQueue, ImageArchive, MemoryArchive, RawScene};
