//! Class legends, the per-class label store and the merge/geocode step.

use crate::core::bands::CanonicalBand;
use crate::types::{MosaicKey, PlumbError, PlumbResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

/// Class code reserved for "no data" in class rasters
pub const NODATA_CLASS: u8 = 255;

/// One class of a legend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegendClass {
    pub name: String,
    pub code: u8,
    pub color: String,
}

/// Ordered, versioned class vocabulary. Codes are 0-based and sequential;
/// the order is what classifiers are trained against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassLegend {
    version: String,
    classes: Vec<LegendClass>,
}

impl ClassLegend {
    /// Create new legend, validating code assignment
    pub fn new(version: impl Into<String>, classes: Vec<LegendClass>) -> PlumbResult<Self> {
        let version = version.into();
        if classes.is_empty() {
            return Err(PlumbError::InvalidFormat(format!("Legend {} has no classes", version)));
        }
        if classes.len() >= NODATA_CLASS as usize {
            return Err(PlumbError::InvalidFormat(format!(
                "Legend {} has {} classes; at most {} are allowed",
                version,
                classes.len(),
                NODATA_CLASS
            )));
        }
        let mut names = BTreeSet::new();
        for (i, class) in classes.iter().enumerate() {
            if class.code as usize != i {
                return Err(PlumbError::InvalidFormat(format!(
                    "Legend {}: class {} has code {}, expected {}",
                    version, class.name, class.code, i
                )));
            }
            if !names.insert(class.name.as_str()) {
                return Err(PlumbError::InvalidFormat(format!(
                    "Legend {}: duplicate class {}",
                    version, class.name
                )));
            }
        }
        Ok(Self { version, classes })
    }

    /// Assign sequential codes in the given order
    pub fn from_names(version: &str, entries: &[(&str, &str)]) -> PlumbResult<Self> {
        let classes = entries
            .iter()
            .enumerate()
            .map(|(i, (name, color))| LegendClass {
                name: name.to_string(),
                code: i as u8,
                color: color.to_string(),
            })
            .collect();
        Self::new(version, classes)
    }

    /// Ten-class labeling legend of the first labeling campaign
    pub fn eeplumb_v1() -> Self {
        Self::builtin_unchecked(
            "eeplumb-v1",
            &[
                ("openWater", "#181930"),
                ("sedimentPlume", "#9c7238"),
                ("ruddySediment", "#b5462b"),
                ("deepOffshoreSediment", "#4f7f8c"),
                ("algalBloom", "#0c6320"),
                ("unmaskedCloud", "#ffffff"),
                ("cloudContamination", "#cccccc"),
                ("shorelineContamination", "#e3c16f"),
                ("other", "#820580"),
                ("uncertain", "#ff00ff"),
            ],
        )
    }

    /// Five-class Lake Superior modeling legend
    pub fn superior_5class() -> Self {
        Self::builtin_unchecked(
            "superior-5class",
            &[
                ("cloud", "#ffffff"),
                ("openWater", "#181930"),
                ("lightNearShoreSediment", "#d9b38c"),
                ("offShoreSediment", "#4f7f8c"),
                ("darkNearShoreSediment", "#9c7238"),
            ],
        )
    }

    /// Three-class Lake Superior modeling legend
    pub fn superior_3class() -> Self {
        Self::builtin_unchecked(
            "superior-3class",
            &[("cloud", "#ffffff"), ("openWater", "#181930"), ("sediment", "#9c7238")],
        )
    }

    fn builtin_unchecked(version: &str, entries: &[(&str, &str)]) -> Self {
        let classes = entries
            .iter()
            .enumerate()
            .map(|(i, (name, color))| LegendClass {
                name: name.to_string(),
                code: i as u8,
                color: color.to_string(),
            })
            .collect();
        Self {
            version: version.to_string(),
            classes,
        }
    }

    /// Look up a built-in legend by version string
    pub fn builtin(version: &str) -> PlumbResult<Self> {
        match version {
            "eeplumb-v1" => Ok(Self::eeplumb_v1()),
            "superior-5class" => Ok(Self::superior_5class()),
            "superior-3class" => Ok(Self::superior_3class()),
            other => Err(PlumbError::InvalidFormat(format!("Unknown legend version: {}", other))),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn classes(&self) -> &[LegendClass] {
        &self.classes
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.classes.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.iter().any(|c| c.name == name)
    }

    pub fn code_of(&self, name: &str) -> PlumbResult<u8> {
        self.classes
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.code)
            .ok_or_else(|| PlumbError::UnknownClass(name.to_string()))
    }

    pub fn name_of(&self, code: u8) -> Option<&str> {
        self.classes.get(code as usize).map(|c| c.name.as_str())
    }

    /// SHA-256 over the ordered `code:name` pairs, hex encoded.
    /// Colors do not participate.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for class in &self.classes {
            hasher.update(format!("{}:{}\n", class.code, class.name).as_bytes());
        }
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }

    /// Fail unless the code assignment matches a recorded fingerprint
    pub fn verify(&self, expected: &str) -> PlumbResult<()> {
        let found = self.fingerprint();
        if found == expected {
            Ok(())
        } else {
            Err(PlumbError::LegendMismatch {
                expected: expected.to_string(),
                found,
            })
        }
    }
}

/// A labeled point, WGS84, with the mosaic that was displayed when placed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelPoint {
    pub lon: f64,
    pub lat: f64,
    pub context: MosaicKey,
}

/// Per-class point accumulator owned by a labeling session
#[derive(Debug, Clone)]
pub struct LabelStore {
    legend: ClassLegend,
    collections: BTreeMap<String, Vec<LabelPoint>>,
}

impl LabelStore {
    pub fn new(legend: ClassLegend) -> Self {
        Self {
            legend,
            collections: BTreeMap::new(),
        }
    }

    pub fn legend(&self) -> &ClassLegend {
        &self.legend
    }

    /// Append a point to its class collection
    pub fn add(&mut self, class: &str, lon: f64, lat: f64, context: MosaicKey) -> PlumbResult<()> {
        self.legend.code_of(class)?;
        if !lon.is_finite() || !lat.is_finite() {
            return Err(PlumbError::InvalidFormat(format!(
                "Label point ({}, {}) is not finite",
                lon, lat
            )));
        }
        self.collections
            .entry(class.to_string())
            .or_default()
            .push(LabelPoint { lon, lat, context });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.collections.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn count(&self, class: &str) -> usize {
        self.collections.get(class).map_or(0, Vec::len)
    }

    pub fn collections(&self) -> &BTreeMap<String, Vec<LabelPoint>> {
        &self.collections
    }

    /// Current contents as a flat table; the store is left untouched
    pub fn snapshot(&self) -> PlumbResult<LabelTable> {
        merge(&self.collections, &self.legend)
    }
}

/// One exported label row: class, coordinates, provenance and any
/// sampled band values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelRow {
    pub class: String,
    pub code: u8,
    pub lon: f64,
    pub lat: f64,
    pub date: NaiveDate,
    pub mission: String,
    pub tile_id: u32,
    #[serde(default)]
    pub features: BTreeMap<CanonicalBand, Option<f64>>,
}

impl LabelRow {
    pub fn key(&self) -> MosaicKey {
        MosaicKey::new(self.mission.clone(), self.date, self.tile_id)
    }
}

/// Flat label table tagged with the legend version it was coded against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelTable {
    pub legend_version: String,
    pub rows: Vec<LabelRow>,
}

impl LabelTable {
    pub fn new(legend_version: impl Into<String>, rows: Vec<LabelRow>) -> Self {
        Self {
            legend_version: legend_version.into(),
            rows,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Band columns present on any row, in canonical order
    pub fn feature_columns(&self) -> Vec<CanonicalBand> {
        let set: BTreeSet<CanonicalBand> = self
            .rows
            .iter()
            .flat_map(|r| r.features.keys().copied())
            .collect();
        set.into_iter().collect()
    }

    /// Row indices grouped by the mosaic each point was placed on
    pub fn group_by_key(&self) -> BTreeMap<MosaicKey, Vec<usize>> {
        let mut groups: BTreeMap<MosaicKey, Vec<usize>> = BTreeMap::new();
        for (i, row) in self.rows.iter().enumerate() {
            groups.entry(row.key()).or_default().push(i);
        }
        groups
    }
}

/// Flatten per-class point collections into one table. Pure: the inputs are
/// not consumed, so merging twice yields the same rows. Rows are ordered by
/// legend code, then insertion order.
pub fn merge(
    collections: &BTreeMap<String, Vec<LabelPoint>>,
    legend: &ClassLegend,
) -> PlumbResult<LabelTable> {
    for class in collections.keys() {
        legend.code_of(class)?;
    }

    let mut rows = Vec::with_capacity(collections.values().map(Vec::len).sum());
    for class in legend.classes() {
        let Some(points) = collections.get(&class.name) else {
            continue;
        };
        rows.extend(points.iter().map(|p| LabelRow {
            class: class.name.clone(),
            code: class.code,
            lon: p.lon,
            lat: p.lat,
            date: p.context.date,
            mission: p.context.mission.clone(),
            tile_id: p.context.tile_id,
            features: BTreeMap::new(),
        }));
    }

    log::info!("Merged {} label points across {} classes", rows.len(), collections.len());
    Ok(LabelTable::new(legend.version(), rows))
}
