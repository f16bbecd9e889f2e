//! Archive access, catalog loading, table encodings and export

pub mod archive;
pub mod catalog_json;
pub mod export;
#[cfg(feature = "gdal")]
pub mod raster_export;
pub mod table;

pub use archive::{ArchiveQuery, ImageArchive, MemoryArchive, RawScene, SpatialKey};
pub use export::{ExportJob, ExportParams, ExportQueue, ExportSink, ExportSummary, LocalCsvSink};
