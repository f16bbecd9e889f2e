//! Tile catalog asset reader.
//!
//! ```json
//! {"tiles": [{"rowid": 1, "name": "aoi1", "polygons": [[[[-92.1, 46.6], ...]]]}]}
//! ```
//! `polygons` is a list of polygons, each a list of rings (exterior first),
//! each ring a list of `[lon, lat]` pairs in WGS84.

use crate::core::tiles::{Tile, TileCatalog};
use crate::types::{PlumbError, PlumbResult};
use geo::{Coord, LineString, MultiPolygon, Polygon};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TileRecord {
    pub rowid: u32,
    #[serde(default)]
    pub name: Option<String>,
    pub polygons: Vec<Vec<Vec<[f64; 2]>>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogFile {
    pub tiles: Vec<TileRecord>,
}

fn ring(points: &[[f64; 2]]) -> LineString<f64> {
    LineString::from(
        points
            .iter()
            .map(|p| Coord { x: p[0], y: p[1] })
            .collect::<Vec<_>>(),
    )
}

impl TileRecord {
    pub fn to_tile(&self) -> PlumbResult<Tile> {
        let mut polygons = Vec::with_capacity(self.polygons.len());
        for rings in &self.polygons {
            let (exterior, interiors) = rings.split_first().ok_or_else(|| {
                PlumbError::InvalidFormat(format!("Tile {} has a polygon with no rings", self.rowid))
            })?;
            if exterior.len() < 3 {
                return Err(PlumbError::InvalidFormat(format!(
                    "Tile {} exterior ring has {} points",
                    self.rowid,
                    exterior.len()
                )));
            }
            polygons.push(Polygon::new(
                ring(exterior),
                interiors.iter().map(|r| ring(r)).collect(),
            ));
        }
        if polygons.is_empty() {
            return Err(PlumbError::InvalidFormat(format!("Tile {} has no polygons", self.rowid)));
        }
        let name = self
            .name
            .clone()
            .unwrap_or_else(|| format!("aoi{}", self.rowid));
        Ok(Tile::new(self.rowid, name, MultiPolygon::new(polygons)))
    }
}

pub fn parse_catalog(contents: &str) -> PlumbResult<TileCatalog> {
    let file: CatalogFile = serde_json::from_str(contents)?;
    let tiles = file
        .tiles
        .iter()
        .map(TileRecord::to_tile)
        .collect::<PlumbResult<Vec<_>>>()?;
    TileCatalog::new(tiles)
}

pub fn read_catalog(path: &Path) -> PlumbResult<TileCatalog> {
    log::info!("Reading tile catalog {}", path.display());
    let contents = fs::read_to_string(path)?;
    parse_catalog(&contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CATALOG: &str = r#"{
        "tiles": [
            {"rowid": 2, "name": "west", "polygons": [[[[-92.2, 46.6], [-92.1, 46.6], [-92.1, 46.7], [-92.2, 46.7], [-92.2, 46.6]]]]},
            {"rowid": 7, "polygons": [[[[-92.1, 46.6], [-92.0, 46.6], [-92.0, 46.7], [-92.1, 46.7], [-92.1, 46.6]]]]}
        ]
    }"#;

    #[test]
    fn test_parse_catalog() {
        let catalog = parse_catalog(CATALOG).unwrap();
        assert_eq!(catalog.ids(), vec![2, 7]);
        assert_eq!(catalog.get(2).unwrap().name, "west");
        assert_eq!(catalog.get(7).unwrap().name, "aoi7");
        assert!(catalog.get(7).unwrap().contains(-92.05, 46.65));
    }

    #[test]
    fn test_read_catalog_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CATALOG.as_bytes()).unwrap();
        let catalog = TileCatalog::from_json_file(file.path()).unwrap();
        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn test_rejects_empty_polygon() {
        let bad = r#"{"tiles": [{"rowid": 1, "polygons": [[]]}]}"#;
        assert!(matches!(parse_catalog(bad), Err(PlumbError::InvalidFormat(_))));
        assert!(matches!(parse_catalog("{"), Err(PlumbError::Json(_))));
    }
}
