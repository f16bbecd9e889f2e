//! Classifier pipeline: training-set preparation, pluggable classifiers,
//! accuracy assessment, per-pixel classification and area-by-class tables.

use crate::core::bands::CanonicalBand;
use crate::core::crs::pixel_area_m2;
use crate::core::extract::feature_vector;
use crate::core::labels::{ClassLegend, LabelTable, NODATA_CLASS};
use crate::core::mosaic::Mosaic;
use crate::core::tiles::TileCatalog;
use crate::types::{GeoGrid, MaskImage, MosaicKey, PlumbError, PlumbResult};
use chrono::NaiveDate;
use eval_metrics::classification::MultiConfusionMatrix;
use linfa::traits::{Fit, Predict};
use linfa::DatasetBase;
use linfa_trees::{DecisionTree as LinfaTree, SplitQuality};
use ndarray::{Array1, Array2, Axis};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

const M2_PER_HECTARE: f64 = 10_000.0;

/// Which classifier strategy to train
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassifierKind {
    Cart,
    RandomForest { n_trees: usize },
}

/// Training parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingParams {
    /// Fraction of rows assigned to training
    pub split_fraction: f64,
    pub seed: u64,
    pub features: Vec<CanonicalBand>,
    pub classifier: ClassifierKind,
    pub max_depth: usize,
    pub min_samples_split: usize,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            split_fraction: 0.7,
            seed: 42,
            features: vec![
                CanonicalBand::Blue,
                CanonicalBand::Green,
                CanonicalBand::Red,
                CanonicalBand::Nir,
                CanonicalBand::Swir1,
                CanonicalBand::Swir2,
            ],
            classifier: ClassifierKind::Cart,
            max_depth: 12,
            min_samples_split: 2,
        }
    }
}

impl TrainingParams {
    pub fn build_classifier(&self) -> Box<dyn Classifier> {
        let tree = DecisionTree {
            max_depth: self.max_depth,
            min_samples_split: self.min_samples_split,
        };
        match self.classifier {
            ClassifierKind::Cart => Box::new(tree),
            ClassifierKind::RandomForest { n_trees } => Box::new(RandomForest {
                n_trees,
                tree,
                seed: self.seed,
            }),
        }
    }
}

/// Feature matrix and legend-coded labels
#[derive(Debug, Clone)]
pub struct TrainingSet {
    pub features: Vec<CanonicalBand>,
    pub x: Array2<f64>,
    pub y: Vec<u8>,
    pub legend: ClassLegend,
    /// Rows whose class is not in the legend
    pub dropped_unknown: usize,
    /// Rows missing at least one feature value
    pub dropped_missing: usize,
}

impl TrainingSet {
    /// Code classes by name through `legend` and gather the feature columns
    pub fn from_table(table: &LabelTable, legend: &ClassLegend, features: &[CanonicalBand]) -> PlumbResult<Self> {
        if features.is_empty() {
            return Err(PlumbError::Processing("No feature bands selected".to_string()));
        }
        let mut data = Vec::with_capacity(table.len() * features.len());
        let mut y = Vec::with_capacity(table.len());
        let (mut dropped_unknown, mut dropped_missing) = (0, 0);

        for row in &table.rows {
            let Ok(code) = legend.code_of(&row.class) else {
                dropped_unknown += 1;
                continue;
            };
            let Some(values) = feature_vector(row, features) else {
                dropped_missing += 1;
                continue;
            };
            data.extend(values);
            y.push(code);
        }

        let x = Array2::from_shape_vec((y.len(), features.len()), data)
            .map_err(|e| PlumbError::Processing(format!("Feature matrix shape error: {}", e)))?;
        log::info!(
            "Training set: {} rows, {} features ({} unknown class, {} missing values dropped)",
            y.len(),
            features.len(),
            dropped_unknown,
            dropped_missing
        );
        Ok(Self {
            features: features.to_vec(),
            x,
            y,
            legend: legend.clone(),
            dropped_unknown,
            dropped_missing,
        })
    }

    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    fn subset(&self, indices: &[usize]) -> Self {
        Self {
            features: self.features.clone(),
            x: self.x.select(Axis(0), indices),
            y: indices.iter().map(|i| self.y[*i]).collect(),
            legend: self.legend.clone(),
            dropped_unknown: 0,
            dropped_missing: 0,
        }
    }

    /// Split with a seeded uniform column: rows drawing `u < fraction` train
    pub fn split(&self, fraction: f64, seed: u64) -> PlumbResult<(TrainingSet, TrainingSet)> {
        if !(fraction > 0.0 && fraction < 1.0) {
            return Err(PlumbError::Processing(format!(
                "Split fraction must be in (0, 1), got {}",
                fraction
            )));
        }
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let (mut train, mut test) = (Vec::new(), Vec::new());
        for i in 0..self.len() {
            if rng.gen::<f64>() < fraction {
                train.push(i);
            } else {
                test.push(i);
            }
        }
        log::debug!("Split {} rows into {} train / {} test", self.len(), train.len(), test.len());
        Ok((self.subset(&train), self.subset(&test)))
    }
}

/// A trained model mapping feature vectors to class codes
pub trait Model: Send + Sync {
    fn predict(&self, sample: &[f64]) -> u8;
    fn n_features(&self) -> usize;

    /// One prediction per row of `x`
    fn predict_batch(&self, x: &Array2<f64>) -> Vec<u8> {
        x.axis_iter(Axis(0))
            .map(|row| self.predict(&row.to_vec()))
            .collect()
    }
}

/// Classifier strategy
pub trait Classifier: Send + Sync {
    fn name(&self) -> &'static str;
    fn train(&self, features: &Array2<f64>, labels: &[u8]) -> PlumbResult<Box<dyn Model>>;
}

/// Trained linfa tree, fitted on a subset of the feature columns
pub struct TreeModel {
    tree: LinfaTree<f64, usize>,
    columns: Vec<usize>,
    n_features: usize,
}

impl fmt::Debug for TreeModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeModel")
            .field("columns", &self.columns)
            .field("n_features", &self.n_features)
            .finish_non_exhaustive()
    }
}

impl TreeModel {
    pub fn columns(&self) -> &[usize] {
        &self.columns
    }
}

impl Model for TreeModel {
    fn predict(&self, sample: &[f64]) -> u8 {
        let x = Array2::from_shape_fn((1, sample.len()), |(_, j)| sample[j]);
        self.predict_batch(&x).first().copied().unwrap_or(NODATA_CLASS)
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict_batch(&self, x: &Array2<f64>) -> Vec<u8> {
        if x.nrows() == 0 {
            return Vec::new();
        }
        let records = x.select(Axis(1), &self.columns);
        let predicted: Array1<usize> = self.tree.predict(&records);
        predicted.iter().map(|c| *c as u8).collect()
    }
}

/// CART decision tree with Gini impurity, trained through linfa-trees
#[derive(Debug, Clone, Copy)]
pub struct DecisionTree {
    pub max_depth: usize,
    pub min_samples_split: usize,
}

impl Default for DecisionTree {
    fn default() -> Self {
        Self {
            max_depth: 12,
            min_samples_split: 2,
        }
    }
}

impl DecisionTree {
    fn fit(&self, x: &Array2<f64>, y: &[u8], rows: &[usize], columns: &[usize]) -> PlumbResult<TreeModel> {
        if rows.is_empty() {
            return Err(PlumbError::Processing("Cannot train on an empty training set".to_string()));
        }
        let records = x.select(Axis(0), rows).select(Axis(1), columns);
        let targets: Array1<usize> = rows.iter().map(|&i| y[i] as usize).collect();
        let dataset = DatasetBase::new(records, targets);

        let tree = LinfaTree::<f64, usize>::params()
            .split_quality(SplitQuality::Gini)
            .max_depth(Some(self.max_depth))
            .min_weight_split(self.min_samples_split as f32)
            .fit(&dataset)
            .map_err(|e| PlumbError::Processing(format!("Decision tree training failed: {}", e)))?;

        Ok(TreeModel {
            tree,
            columns: columns.to_vec(),
            n_features: x.ncols(),
        })
    }
}

fn check_shapes(features: &Array2<f64>, labels: &[u8]) -> PlumbResult<()> {
    if features.nrows() != labels.len() {
        return Err(PlumbError::Processing(format!(
            "{} feature rows but {} labels",
            features.nrows(),
            labels.len()
        )));
    }
    Ok(())
}

impl Classifier for DecisionTree {
    fn name(&self) -> &'static str {
        "CART"
    }

    fn train(&self, features: &Array2<f64>, labels: &[u8]) -> PlumbResult<Box<dyn Model>> {
        check_shapes(features, labels)?;
        let rows: Vec<usize> = (0..labels.len()).collect();
        let columns: Vec<usize> = (0..features.ncols()).collect();
        Ok(Box::new(self.fit(features, labels, &rows, &columns)?))
    }
}

/// Bagged linfa trees over bootstrap samples and random feature subspaces
#[derive(Debug, Clone, Copy)]
pub struct RandomForest {
    pub n_trees: usize,
    pub tree: DecisionTree,
    pub seed: u64,
}

#[derive(Debug)]
pub struct ForestModel {
    pub trees: Vec<TreeModel>,
    pub n_features: usize,
}

/// Most voted class; ties go to the lowest code
fn majority_vote(votes: impl Iterator<Item = u8>) -> u8 {
    let mut counts: BTreeMap<u8, usize> = BTreeMap::new();
    for class in votes {
        *counts.entry(class).or_default() += 1;
    }
    // max_by_key keeps the last maximum; iterate high codes first so ties go low
    counts
        .iter()
        .rev()
        .max_by_key(|(_, n)| **n)
        .map_or(NODATA_CLASS, |(class, _)| *class)
}

impl Model for ForestModel {
    fn predict(&self, sample: &[f64]) -> u8 {
        majority_vote(self.trees.iter().map(|tree| tree.predict(sample)))
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict_batch(&self, x: &Array2<f64>) -> Vec<u8> {
        let per_tree: Vec<Vec<u8>> = self.trees.iter().map(|tree| tree.predict_batch(x)).collect();
        (0..x.nrows())
            .map(|i| majority_vote(per_tree.iter().map(|votes| votes[i])))
            .collect()
    }
}

impl Classifier for RandomForest {
    fn name(&self) -> &'static str {
        "RandomForest"
    }

    fn train(&self, features: &Array2<f64>, labels: &[u8]) -> PlumbResult<Box<dyn Model>> {
        check_shapes(features, labels)?;
        if self.n_trees == 0 {
            return Err(PlumbError::Processing("Random forest needs at least one tree".to_string()));
        }
        if labels.is_empty() {
            return Err(PlumbError::Processing("Cannot train on an empty training set".to_string()));
        }
        let n = labels.len();
        let n_features = features.ncols();
        let subspace = ((n_features as f64).sqrt().ceil() as usize).clamp(1, n_features.max(1));

        let grow = |t: usize| {
            let mut rng = ChaCha8Rng::seed_from_u64(self.seed.wrapping_add(t as u64));
            let rows: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
            let mut columns: Vec<usize> = (0..n_features).collect();
            columns.shuffle(&mut rng);
            columns.truncate(subspace);
            columns.sort_unstable();
            self.tree.fit(features, labels, &rows, &columns)
        };

        #[cfg(feature = "parallel")]
        let trees = (0..self.n_trees).into_par_iter().map(grow).collect::<PlumbResult<Vec<_>>>()?;

        #[cfg(not(feature = "parallel"))]
        let trees = (0..self.n_trees).map(grow).collect::<PlumbResult<Vec<_>>>()?;

        log::info!("Trained random forest with {} trees", trees.len());
        Ok(Box::new(ForestModel { trees, n_features }))
    }
}

/// Train with any strategy on a training set
pub fn train(classifier: &dyn Classifier, set: &TrainingSet) -> PlumbResult<Box<dyn Model>> {
    log::info!("🌳 Training {} on {} rows", classifier.name(), set.len());
    classifier.train(&set.x, &set.y)
}

/// Error matrix backed by eval-metrics. Counts are stored predicted-major,
/// `counts[predicted][actual]`, the layout `MultiConfusionMatrix` expects.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfusionMatrix {
    counts: Vec<Vec<usize>>,
}

impl ConfusionMatrix {
    pub fn new(n_classes: usize) -> Self {
        Self {
            counts: vec![vec![0; n_classes]; n_classes],
        }
    }

    pub fn n_classes(&self) -> usize {
        self.counts.len()
    }

    pub fn record(&mut self, actual: u8, predicted: u8) {
        let n = self.n_classes();
        if (actual as usize) < n && (predicted as usize) < n {
            self.counts[predicted as usize][actual as usize] += 1;
        }
    }

    /// Count of samples of class `actual` predicted as `predicted`
    pub fn count(&self, actual: u8, predicted: u8) -> usize {
        self.counts
            .get(predicted as usize)
            .and_then(|row| row.get(actual as usize))
            .copied()
            .unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    fn metrics(&self) -> Option<MultiConfusionMatrix> {
        MultiConfusionMatrix::from_counts(self.counts.clone()).ok()
    }

    /// Overall accuracy; 0 when nothing was recorded
    pub fn accuracy(&self) -> f64 {
        self.metrics()
            .and_then(|m| m.accuracy().ok())
            .unwrap_or(0.0)
    }

    /// Per reference class recall; `None` when the class never occurs
    pub fn producers_accuracy(&self) -> Vec<Option<f64>> {
        match self.metrics() {
            Some(m) => m.per_class_recall().into_iter().map(|r| r.ok()).collect(),
            None => vec![None; self.n_classes()],
        }
    }

    /// Per predicted class precision; `None` when the class is never predicted
    pub fn consumers_accuracy(&self) -> Vec<Option<f64>> {
        match self.metrics() {
            Some(m) => m.per_class_precision().into_iter().map(|r| r.ok()).collect(),
            None => vec![None; self.n_classes()],
        }
    }

    /// Cohen's kappa, derived from accuracy and the marginals
    pub fn kappa(&self) -> f64 {
        let total = self.total() as f64;
        if total == 0.0 {
            return 0.0;
        }
        let n = self.n_classes();
        let expected = (0..n)
            .map(|k| {
                let predicted: usize = self.counts[k].iter().sum();
                let actual: usize = self.counts.iter().map(|row| row[k]).sum();
                predicted as f64 * actual as f64
            })
            .sum::<f64>()
            / (total * total);
        if (1.0 - expected).abs() < f64::EPSILON {
            return 1.0;
        }
        (self.accuracy() - expected) / (1.0 - expected)
    }
}

/// Confusion matrix of a model over a held-out set
pub fn evaluate(model: &dyn Model, test: &TrainingSet) -> ConfusionMatrix {
    let mut cm = ConfusionMatrix::new(test.legend.len());
    for (predicted, &actual) in model.predict_batch(&test.x).into_iter().zip(&test.y) {
        cm.record(actual, predicted);
    }
    log::info!("Accuracy {:.3}, kappa {:.3} over {} samples", cm.accuracy(), cm.kappa(), cm.total());
    cm
}

/// Per-pixel class codes with provenance; `NODATA_CLASS` where unclassified
#[derive(Debug, Clone)]
pub struct ClassRaster {
    pub key: MosaicKey,
    pub grid: GeoGrid,
    pub classes: Array2<u8>,
    pub legend_version: String,
}

impl ClassRaster {
    /// One binary mask per legend class plus "classified"
    pub fn class_masks(&self, legend: &ClassLegend) -> BTreeMap<String, MaskImage> {
        let mut masks: BTreeMap<String, MaskImage> = legend
            .classes()
            .iter()
            .map(|c| (c.name.clone(), self.classes.mapv(|v| v == c.code)))
            .collect();
        masks.insert("classified".to_string(), self.classes.mapv(|v| v != NODATA_CLASS));
        masks
    }

    /// Hectares per class code (index) and classified total
    fn hectares(&self, n_classes: usize) -> (Vec<f64>, f64) {
        let mut per_class = vec![0.0; n_classes];
        let mut classified = 0.0;
        for (r, row) in self.classes.axis_iter(Axis(0)).enumerate() {
            let ha = pixel_area_m2(&self.grid, r) / M2_PER_HECTARE;
            for &code in row {
                if code == NODATA_CLASS {
                    continue;
                }
                if let Some(total) = per_class.get_mut(code as usize) {
                    *total += ha;
                    classified += ha;
                }
            }
        }
        (per_class, classified)
    }
}

/// Classify every valid mosaic pixel holding all feature bands
pub fn classify(
    model: &dyn Model,
    mosaic: &Mosaic,
    features: &[CanonicalBand],
    legend: &ClassLegend,
) -> PlumbResult<ClassRaster> {
    if model.n_features() != features.len() {
        return Err(PlumbError::Processing(format!(
            "Model expects {} features, {} given",
            model.n_features(),
            features.len()
        )));
    }
    let layers = features
        .iter()
        .map(|b| {
            mosaic.band(*b).ok_or_else(|| {
                PlumbError::InvalidFormat(format!("Band {} is not available in mosaic {}", b, mosaic.key))
            })
        })
        .collect::<PlumbResult<Vec<_>>>()?;

    log::info!("Classifying mosaic {} with {} features", mosaic.key, features.len());
    let (rows, cols) = mosaic.grid.shape();
    let classify_row = |r: usize| -> Vec<u8> {
        let mut out = vec![NODATA_CLASS; cols];
        let usable: Vec<usize> = (0..cols)
            .filter(|&c| mosaic.valid[[r, c]] && layers.iter().all(|img| img[[r, c]].is_finite()))
            .collect();
        let x = Array2::from_shape_fn((usable.len(), layers.len()), |(i, f)| layers[f][[r, usable[i]]] as f64);
        for (c, class) in usable.iter().zip(model.predict_batch(&x)) {
            out[*c] = class;
        }
        out
    };

    #[cfg(feature = "parallel")]
    let data: Vec<u8> = (0..rows).into_par_iter().flat_map_iter(classify_row).collect();

    #[cfg(not(feature = "parallel"))]
    let data: Vec<u8> = (0..rows).flat_map(classify_row).collect();

    let classes = Array2::from_shape_vec((rows, cols), data)
        .map_err(|e| PlumbError::Processing(format!("Class raster shape error: {}", e)))?;
    Ok(ClassRaster {
        key: mosaic.key.clone(),
        grid: mosaic.grid,
        classes,
        legend_version: legend.version().to_string(),
    })
}

/// Area summary row; `tile_id` is `None` for whole-catalog rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaRow {
    pub mission: String,
    pub date: NaiveDate,
    pub tile_id: Option<u32>,
    /// (class name, hectares) in legend order
    pub class_ha: Vec<(String, f64)>,
    pub classified_ha: f64,
    pub aoi_ha: f64,
}

/// Hectares per class, one row per raster (`per_tile`) or per mission-date
pub fn area_by_class(
    rasters: &[ClassRaster],
    catalog: &TileCatalog,
    legend: &ClassLegend,
    per_tile: bool,
) -> PlumbResult<Vec<AreaRow>> {
    for raster in rasters {
        if raster.legend_version != legend.version() {
            return Err(PlumbError::LegendMismatch {
                expected: legend.version().to_string(),
                found: raster.legend_version.clone(),
            });
        }
    }
    #[cfg(feature = "parallel")]
    let sums: Vec<(Vec<f64>, f64)> = rasters.par_iter().map(|r| r.hectares(legend.len())).collect();

    #[cfg(not(feature = "parallel"))]
    let sums: Vec<(Vec<f64>, f64)> = rasters.iter().map(|r| r.hectares(legend.len())).collect();

    let named = |per_class: &[f64]| -> Vec<(String, f64)> {
        legend
            .classes()
            .iter()
            .map(|c| (c.name.clone(), per_class[c.code as usize]))
            .collect()
    };

    let mut rows = Vec::new();
    if per_tile {
        for (raster, (per_class, classified)) in rasters.iter().zip(&sums) {
            rows.push(AreaRow {
                mission: raster.key.mission.clone(),
                date: raster.key.date,
                tile_id: Some(raster.key.tile_id),
                class_ha: named(per_class),
                classified_ha: *classified,
                aoi_ha: catalog.area_hectares(raster.key.tile_id)?,
            });
        }
    } else {
        let mut grouped: BTreeMap<(String, NaiveDate), (Vec<f64>, f64)> = BTreeMap::new();
        for (raster, (per_class, classified)) in rasters.iter().zip(&sums) {
            let entry = grouped
                .entry((raster.key.mission.clone(), raster.key.date))
                .or_insert_with(|| (vec![0.0; legend.len()], 0.0));
            for (acc, v) in entry.0.iter_mut().zip(per_class) {
                *acc += v;
            }
            entry.1 += classified;
        }
        let aoi_ha = catalog.total_area_hectares();
        for ((mission, date), (per_class, classified)) in grouped {
            rows.push(AreaRow {
                mission,
                date,
                tile_id: None,
                class_ha: named(&per_class),
                classified_ha: classified,
                aoi_ha,
            });
        }
    }
    log::info!("Computed {} area rows", rows.len());
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::labels::LabelRow;
    use crate::types::GeoTransform;
    use approx::assert_abs_diff_eq;

    fn table(n: usize) -> LabelTable {
        let date = NaiveDate::from_ymd_opt(2022, 5, 5).unwrap();
        let rows = (0..n)
            .map(|i| {
                let cloud = i % 2 == 0;
                let mut features = BTreeMap::new();
                features.insert(CanonicalBand::Red, Some(if cloud { 0.8 } else { 0.02 } + i as f64 * 1e-4));
                features.insert(CanonicalBand::Nir, Some(if cloud { 0.7 } else { 0.01 }));
                LabelRow {
                    class: if cloud { "cloud" } else { "openWater" }.to_string(),
                    code: if cloud { 0 } else { 1 },
                    lon: -90.0,
                    lat: 46.8,
                    date,
                    mission: "LANDSAT_8".into(),
                    tile_id: 1,
                    features,
                }
            })
            .collect();
        LabelTable::new("superior-3class", rows)
    }

    fn bands() -> Vec<CanonicalBand> {
        vec![CanonicalBand::Red, CanonicalBand::Nir]
    }

    #[test]
    fn test_training_set_drops_rows() {
        let mut t = table(10);
        t.rows[0].class = "lava".into();
        t.rows[1].features.insert(CanonicalBand::Nir, None);
        let set = TrainingSet::from_table(&t, &ClassLegend::superior_3class(), &bands()).unwrap();
        assert_eq!(set.len(), 8);
        assert_eq!(set.dropped_unknown, 1);
        assert_eq!(set.dropped_missing, 1);
    }

    #[test]
    fn test_split_is_deterministic() {
        let set = TrainingSet::from_table(&table(200), &ClassLegend::superior_3class(), &bands()).unwrap();
        let (a_train, a_test) = set.split(0.7, 7).unwrap();
        let (b_train, _) = set.split(0.7, 7).unwrap();
        assert_eq!(a_train.y, b_train.y);
        assert_eq!(a_train.x, b_train.x);
        assert_eq!(a_train.len() + a_test.len(), 200);
        assert!(a_train.len() > 110 && a_train.len() < 170);
        assert!(set.split(1.0, 7).is_err());
    }

    #[test]
    fn test_tree_separates_classes() {
        let set = TrainingSet::from_table(&table(100), &ClassLegend::superior_3class(), &bands()).unwrap();
        let (train_set, test_set) = set.split(0.7, 1).unwrap();
        let model = train(&DecisionTree::default(), &train_set).unwrap();
        let cm = evaluate(model.as_ref(), &test_set);
        assert_abs_diff_eq!(cm.accuracy(), 1.0);
        assert_abs_diff_eq!(cm.kappa(), 1.0);
        assert_eq!(model.predict(&[0.9, 0.7]), 0);
        assert_eq!(model.predict(&[0.01, 0.01]), 1);
    }

    #[test]
    fn test_forest_separates_classes() {
        let set = TrainingSet::from_table(&table(100), &ClassLegend::superior_3class(), &bands()).unwrap();
        let forest = RandomForest {
            n_trees: 15,
            tree: DecisionTree::default(),
            seed: 3,
        };
        let model = train(&forest, &set).unwrap();
        assert_eq!(model.predict(&[0.85, 0.7]), 0);
        assert_eq!(model.predict(&[0.02, 0.01]), 1);
    }

    #[test]
    fn test_confusion_matrix_metrics() {
        let mut cm = ConfusionMatrix::new(2);
        for _ in 0..45 {
            cm.record(0, 0);
        }
        for _ in 0..5 {
            cm.record(0, 1);
        }
        for _ in 0..15 {
            cm.record(1, 0);
        }
        for _ in 0..35 {
            cm.record(1, 1);
        }
        assert_eq!(cm.count(0, 1), 5);
        assert_eq!(cm.total(), 100);
        assert_abs_diff_eq!(cm.accuracy(), 0.8);
        assert_abs_diff_eq!(cm.producers_accuracy()[0].unwrap(), 0.9);
        assert_abs_diff_eq!(cm.consumers_accuracy()[0].unwrap(), 0.75);
        assert_abs_diff_eq!(cm.producers_accuracy()[1].unwrap(), 0.7);
        // pe = (50*60 + 50*40) / 100^2 = 0.5
        assert_abs_diff_eq!(cm.kappa(), 0.6, epsilon = 1e-12);
    }

    #[test]
    fn test_batch_prediction_matches_single() {
        let set = TrainingSet::from_table(&table(60), &ClassLegend::superior_3class(), &bands()).unwrap();
        let forest = RandomForest {
            n_trees: 5,
            tree: DecisionTree::default(),
            seed: 9,
        };
        let model = train(&forest, &set).unwrap();
        let batch = model.predict_batch(&set.x);
        let single: Vec<u8> = set.x.axis_iter(Axis(0)).map(|r| model.predict(&r.to_vec())).collect();
        assert_eq!(batch, single);
        assert_eq!(batch, set.y);
    }

    #[test]
    fn test_class_masks_and_areas() {
        let grid = GeoGrid::new(GeoTransform::north_up(600000.0, 5200000.0, 100.0), 2, 2, 32615);
        let raster = ClassRaster {
            key: MosaicKey::new("LANDSAT_8", NaiveDate::from_ymd_opt(2022, 5, 5).unwrap(), 1),
            grid,
            classes: Array2::from_shape_vec((2, 2), vec![0, 1, 1, NODATA_CLASS]).unwrap(),
            legend_version: "superior-3class".into(),
        };
        let legend = ClassLegend::superior_3class();
        let masks = raster.class_masks(&legend);
        assert_eq!(masks["openWater"].iter().filter(|v| **v).count(), 2);
        assert_eq!(masks["classified"].iter().filter(|v| **v).count(), 3);

        let (per_class, classified) = raster.hectares(legend.len());
        assert_abs_diff_eq!(per_class[0], 1.0);
        assert_abs_diff_eq!(per_class[1], 2.0);
        assert_abs_diff_eq!(classified, 3.0);
    }
}
