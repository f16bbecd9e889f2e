//! Core mosaicking, labeling and classification modules

pub mod bands;
pub mod classify;
pub mod crs;
pub mod extract;
pub mod labels;
pub mod mosaic;
pub mod quality_mask;
pub mod session;
pub mod tiles;

// Re-export main types
pub use bands::{BandSpecRegistry, BandSpecification, CanonicalBand, Harmonizer, Scene};
pub use classify::{
    area_by_class, classify, evaluate, AreaRow, ClassRaster, Classifier, ConfusionMatrix, DecisionTree, Model,
    RandomForest, TrainingParams, TrainingSet,
};
pub use crs::Crs;
pub use extract::{ExtractionParams, PixelExtractor, Reducer};
pub use labels::{merge, ClassLegend, LabelPoint, LabelRow, LabelStore, LabelTable};
pub use mosaic::{MissionSelector, Mosaic, MosaicParams, MosaicRequest, Mosaicker};
pub use quality_mask::{MaskedScene, MaskingConfig, QualityMask, QualityMasker};
pub use session::{LabelingSession, MapDisplay, NavigationPolicy, SessionConfig, SessionState};
pub use tiles::{Tile, TileCatalog};
