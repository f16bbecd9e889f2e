use crate::core::bands::CanonicalBand;
use crate::core::crs::{Crs, Reprojector};
use crate::core::labels::{LabelRow, LabelTable};
use crate::core::mosaic::{MissionSelector, Mosaic, Mosaicker};
use crate::core::tiles::TileCatalog;
use crate::io::archive::ImageArchive;
use crate::types::{BoundingBox, MosaicKey, PlumbError, PlumbResult};
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Statistic applied to the pixels under a sampling neighbourhood
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Reducer {
    #[default]
    Median,
    Mean,
    Min,
    Max,
    /// Value of the pixel containing the point
    First,
}

/// Pixel extraction parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionParams {
    pub reducer: Reducer,
    /// Side of the square sampling neighbourhood, in `crs` units
    pub scale: f64,
    /// CRS the neighbourhood is built in; the mosaic's own when unset
    pub crs_epsg: Option<u32>,
    /// Bands to sample; every canonical band when empty
    pub bands: Vec<CanonicalBand>,
}

impl Default for ExtractionParams {
    fn default() -> Self {
        Self {
            reducer: Reducer::Median,
            scale: 30.0,
            crs_epsg: None,
            bands: Vec::new(),
        }
    }
}

/// Rows sampled across many keys plus the keys that could not be built
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub table: LabelTable,
    pub skipped: Vec<(MosaicKey, String)>,
}

/// (value, weight) pairs for the pixels under a neighbourhood
type Samples = Vec<(f64, f64)>;

impl Reducer {
    /// Area-weighted reduction; `None` when nothing contributes
    pub fn reduce(&self, samples: &Samples) -> Option<f64> {
        let total: f64 = samples.iter().map(|(_, w)| w).sum();
        if samples.is_empty() || total <= 0.0 {
            return None;
        }
        match self {
            Reducer::Mean => Some(samples.iter().map(|(v, w)| v * w).sum::<f64>() / total),
            Reducer::Min => samples.iter().map(|(v, _)| *v).reduce(f64::min),
            Reducer::Max => samples.iter().map(|(v, _)| *v).reduce(f64::max),
            Reducer::Median => {
                let mut sorted = samples.clone();
                sorted.sort_by(|a, b| a.0.total_cmp(&b.0));
                let half = total / 2.0;
                let mut cumulative = 0.0;
                for (value, weight) in &sorted {
                    cumulative += weight;
                    if cumulative >= half {
                        return Some(*value);
                    }
                }
                sorted.last().map(|(v, _)| *v)
            }
            Reducer::First => samples.first().map(|(v, _)| *v),
        }
    }
}

/// Pixel value extractor
pub struct PixelExtractor {
    params: ExtractionParams,
}

impl Default for PixelExtractor {
    fn default() -> Self {
        Self::new(ExtractionParams::default())
    }
}

impl PixelExtractor {
    /// Create new extractor
    pub fn new(params: ExtractionParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ExtractionParams {
        &self.params
    }

    /// Sample with the configured reducer, scale and CRS
    pub fn sample(&self, mosaic: &Mosaic, table: &LabelTable) -> PlumbResult<LabelTable> {
        let crs = match self.params.crs_epsg {
            Some(epsg) => Crs::from_epsg(epsg)?,
            None => mosaic.crs()?,
        };
        sample(mosaic, table, self.params.reducer, self.params.scale, &crs, &self.params.bands)
    }

    /// Rebuild the mosaic each row was labeled on and sample it. Keys whose
    /// mosaic cannot be built are reported and their rows left out.
    pub fn extract_batch(
        &self,
        mosaicker: &Mosaicker,
        archive: &dyn ImageArchive,
        catalog: &TileCatalog,
        table: &LabelTable,
    ) -> BatchReport {
        let groups = table.group_by_key();
        log::info!(
            "Extracting pixel values for {} rows over {} mosaics",
            table.len(),
            groups.len()
        );

        let extract = |(key, indices): (MosaicKey, Vec<usize>)| {
            let subset = LabelTable::new(
                table.legend_version.clone(),
                indices.iter().map(|i| table.rows[*i].clone()).collect(),
            );
            let result = MissionSelector::parse(&key.mission)
                .and_then(|selector| {
                    let tile = catalog.get(key.tile_id)?;
                    mosaicker.select_and_mosaic(archive, &selector, key.date, tile)
                })
                .and_then(|mosaic| self.sample(&mosaic, &subset));
            (key, result)
        };

        #[cfg(feature = "parallel")]
        let results: Vec<(MosaicKey, PlumbResult<LabelTable>)> = groups.into_par_iter().map(extract).collect();

        #[cfg(not(feature = "parallel"))]
        let results: Vec<(MosaicKey, PlumbResult<LabelTable>)> = groups.into_iter().map(extract).collect();

        let mut rows = Vec::with_capacity(table.len());
        let mut skipped = Vec::new();
        for (key, result) in results {
            match result {
                Ok(sampled) => rows.extend(sampled.rows),
                Err(e) => {
                    log::warn!("Skipping {}: {}", key, e);
                    skipped.push((key, e.to_string()));
                }
            }
        }

        log::info!("Extraction done: {} rows, {} keys skipped", rows.len(), skipped.len());
        BatchReport {
            table: LabelTable::new(table.legend_version.clone(), rows),
            skipped,
        }
    }
}

/// Sample mosaic bands under every row's point. The neighbourhood is a
/// `scale`-sided square centred on the point in `crs`; each mosaic pixel is
/// weighted by its overlap with that square. Masked, out-of-grid and
/// unavailable values come back as `None`.
pub fn sample(
    mosaic: &Mosaic,
    table: &LabelTable,
    reducer: Reducer,
    scale: f64,
    crs: &Crs,
    bands: &[CanonicalBand],
) -> PlumbResult<LabelTable> {
    if !(scale > 0.0) {
        return Err(PlumbError::Processing(format!("Sampling scale must be positive, got {}", scale)));
    }
    let mosaic_crs = mosaic.crs()?;
    let bands: Vec<CanonicalBand> = if bands.is_empty() {
        mosaic
            .bands
            .keys()
            .chain(mosaic.unavailable.iter())
            .copied()
            .collect()
    } else {
        bands.to_vec()
    };

    log::debug!(
        "Sampling {} rows from {} with {:?} at scale {} ({})",
        table.len(),
        mosaic.key,
        reducer,
        scale,
        crs
    );

    let projections = Projections {
        to_mosaic: Reprojector::new(Crs::wgs84(), mosaic_crs)?,
        to_sampling: Reprojector::new(Crs::wgs84(), *crs)?,
        sampling_to_mosaic: Reprojector::new(*crs, mosaic_crs)?,
    };

    let sample_row = |row: &LabelRow| -> PlumbResult<LabelRow> {
        let samples = neighbourhood(mosaic, &projections, row.lon, row.lat, scale, reducer)?;
        let mut out = row.clone();
        for band in &bands {
            let value = match (&samples, mosaic.band(*band)) {
                (Some(pixels), Some(img)) => {
                    let values: Samples = pixels
                        .iter()
                        .map(|&(r, c, w)| (img[[r, c]] as f64, w))
                        .filter(|(v, _)| v.is_finite())
                        .collect();
                    reducer.reduce(&values)
                }
                _ => None,
            };
            out.features.insert(*band, value);
        }
        Ok(out)
    };

    #[cfg(feature = "parallel")]
    let rows = table.rows.par_iter().map(sample_row).collect::<PlumbResult<Vec<_>>>()?;

    #[cfg(not(feature = "parallel"))]
    let rows = table.rows.iter().map(sample_row).collect::<PlumbResult<Vec<_>>>()?;

    Ok(LabelTable::new(table.legend_version.clone(), rows))
}

/// Transforms shared by every row of one `sample` call
struct Projections {
    to_mosaic: Reprojector,
    to_sampling: Reprojector,
    sampling_to_mosaic: Reprojector,
}

/// Valid mosaic pixels under the neighbourhood with their overlap weights.
/// `First` only takes the pixel containing the point.
fn neighbourhood(
    mosaic: &Mosaic,
    projections: &Projections,
    lon: f64,
    lat: f64,
    scale: f64,
    reducer: Reducer,
) -> PlumbResult<Option<Vec<(usize, usize, f64)>>> {
    if reducer == Reducer::First {
        let (x, y) = projections.to_mosaic.transform(lon, lat)?;
        let Some((r, c)) = mosaic.grid.locate(x, y) else {
            return Ok(None);
        };
        return Ok(mosaic.valid[[r, c]].then(|| vec![(r, c, 1.0)]));
    }

    let (px, py) = projections.to_sampling.transform(lon, lat)?;
    let half = scale / 2.0;
    let square = BoundingBox::new(px - half, py - half, px + half, py + half);
    let window = projections.sampling_to_mosaic.transform_bbox(&square)?;

    let grid = &mosaic.grid;
    let t = &grid.transform;
    let (c_a, c_b) = (
        (window.min_x - t.top_left_x) / t.pixel_width,
        (window.max_x - t.top_left_x) / t.pixel_width,
    );
    let (r_a, r_b) = (
        (window.max_y - t.top_left_y) / t.pixel_height,
        (window.min_y - t.top_left_y) / t.pixel_height,
    );
    let col_start = c_a.min(c_b).floor().max(0.0) as usize;
    let col_end = (c_a.max(c_b).ceil().max(0.0) as usize).min(grid.cols);
    let row_start = r_a.min(r_b).floor().max(0.0) as usize;
    let row_end = (r_a.max(r_b).ceil().max(0.0) as usize).min(grid.rows);

    let pixel_area = (t.pixel_width * t.pixel_height).abs();
    let mut pixels = Vec::new();
    for r in row_start..row_end {
        for c in col_start..col_end {
            if !mosaic.valid[[r, c]] {
                continue;
            }
            let weight = grid.pixel_bounds(r, c).overlap_area(&window) / pixel_area;
            if weight > 0.0 {
                pixels.push((r, c, weight));
            }
        }
    }
    Ok((!pixels.is_empty()).then_some(pixels))
}

/// Feature matrix helper: values of `bands` for one row, `None` if any is missing
pub fn feature_vector(row: &LabelRow, bands: &[CanonicalBand]) -> Option<Vec<f64>> {
    bands
        .iter()
        .map(|b| row.features.get(b).copied().flatten())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GeoGrid, GeoTransform};
    use approx::assert_abs_diff_eq;
    use chrono::NaiveDate;
    use ndarray::Array2;
    use std::collections::BTreeMap;

    fn key() -> MosaicKey {
        MosaicKey::new("LANDSAT_8", NaiveDate::from_ymd_opt(2022, 5, 5).unwrap(), 1)
    }

    /// 4x4 UTM mosaic, 30 m pixels, red = row*4 + col, pixel (0, 3) masked
    fn mosaic() -> Mosaic {
        let grid = GeoGrid::new(GeoTransform::north_up(600000.0, 5200000.0, 30.0), 4, 4, 32615);
        let red = Array2::from_shape_fn((4, 4), |(r, c)| (r * 4 + c) as f32);
        let mut valid = Array2::from_elem((4, 4), true);
        valid[[0, 3]] = false;
        let mut bands = BTreeMap::new();
        bands.insert(CanonicalBand::Red, red);
        Mosaic {
            key: key(),
            grid,
            bands,
            valid,
            footprint: Array2::from_elem((4, 4), true),
            source_scenes: vec!["a".into()],
            unavailable: vec![CanonicalBand::Coastal],
        }
    }

    fn table_at(points: &[(f64, f64)]) -> LabelTable {
        let rows = points
            .iter()
            .map(|&(lon, lat)| LabelRow {
                class: "openWater".into(),
                code: 0,
                lon,
                lat,
                date: key().date,
                mission: key().mission,
                tile_id: 1,
                features: BTreeMap::new(),
            })
            .collect();
        LabelTable::new("superior-3class", rows)
    }

    fn lonlat(x: f64, y: f64) -> (f64, f64) {
        Crs::from_epsg(32615).unwrap().to_wgs84(x, y).unwrap()
    }

    #[test]
    fn test_reducers() {
        let samples = vec![(1.0, 1.0), (2.0, 1.0), (10.0, 0.5)];
        assert_abs_diff_eq!(Reducer::Mean.reduce(&samples).unwrap(), 3.2, epsilon = 1e-12);
        assert_eq!(Reducer::Median.reduce(&samples), Some(2.0));
        assert_eq!(Reducer::Min.reduce(&samples), Some(1.0));
        assert_eq!(Reducer::Max.reduce(&samples), Some(10.0));
        assert_eq!(Reducer::Median.reduce(&vec![]), None);
    }

    #[test]
    fn test_single_pixel_sample() {
        let m = mosaic();
        // centre of pixel (1, 2)
        let table = table_at(&[lonlat(600075.0, 5199955.0)]);
        let crs = m.crs().unwrap();
        let out = sample(&m, &table, Reducer::Median, 10.0, &crs, &[]).unwrap();
        assert_eq!(out.rows[0].features[&CanonicalBand::Red], Some(6.0));
        assert_eq!(out.rows[0].features[&CanonicalBand::Coastal], None);
    }

    #[test]
    fn test_area_weighted_mean() {
        let m = mosaic();
        // a 30 m square centred on the corner shared by pixels (1,1),(1,2),(2,1),(2,2)
        let table = table_at(&[lonlat(600060.0, 5199940.0)]);
        let crs = m.crs().unwrap();
        let out = sample(&m, &table, Reducer::Mean, 30.0, &crs, &[CanonicalBand::Red]).unwrap();
        let mean = out.rows[0].features[&CanonicalBand::Red].unwrap();
        assert_abs_diff_eq!(mean, (5.0 + 6.0 + 9.0 + 10.0) / 4.0, epsilon = 1e-3);
    }

    #[test]
    fn test_masked_and_outside_points_are_none() {
        let m = mosaic();
        let table = table_at(&[lonlat(600105.0, 5199985.0), lonlat(700000.0, 5100000.0)]);
        let out = PixelExtractor::new(ExtractionParams {
            reducer: Reducer::First,
            ..ExtractionParams::default()
        })
        .sample(&m, &table)
        .unwrap();
        assert_eq!(out.len(), 2);
        assert!(out.rows.iter().all(|r| r.features[&CanonicalBand::Red].is_none()));
    }

    #[test]
    fn test_feature_vector() {
        let m = mosaic();
        let table = table_at(&[lonlat(600075.0, 5199955.0)]);
        let out = PixelExtractor::default().sample(&m, &table).unwrap();
        assert_eq!(feature_vector(&out.rows[0], &[CanonicalBand::Red]), Some(vec![6.0]));
        assert_eq!(feature_vector(&out.rows[0], &[CanonicalBand::Coastal]), None);
    }
}
