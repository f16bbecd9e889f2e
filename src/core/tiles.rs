use crate::types::{BoundingBox, PlumbError, PlumbResult};
use geo::{BooleanOps, BoundingRect, Contains, GeodesicArea, Intersects, MultiPolygon, Point};
use std::collections::BTreeMap;
use std::path::Path;

const M2_PER_HECTARE: f64 = 10_000.0;

/// One area-of-interest polygon of the lake partition (WGS84)
#[derive(Debug, Clone)]
pub struct Tile {
    pub id: u32,
    pub name: String,
    pub geometry: MultiPolygon<f64>,
}

impl Tile {
    pub fn new(id: u32, name: impl Into<String>, geometry: MultiPolygon<f64>) -> Self {
        Self {
            id,
            name: name.into(),
            geometry,
        }
    }

    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        self.geometry.contains(&Point::new(lon, lat))
    }

    pub fn intersects(&self, other: &MultiPolygon<f64>) -> bool {
        self.geometry.intersects(other)
    }

    pub fn bounds(&self) -> Option<BoundingBox> {
        self.geometry
            .bounding_rect()
            .map(|r| BoundingBox::new(r.min().x, r.min().y, r.max().x, r.max().y))
    }

    /// Geodesic area on the WGS84 ellipsoid
    pub fn area_hectares(&self) -> f64 {
        self.geometry.geodesic_area_unsigned() / M2_PER_HECTARE
    }
}

/// Fixed set of AOI tiles keyed by a sparse integer id
#[derive(Debug, Clone, Default)]
pub struct TileCatalog {
    tiles: BTreeMap<u32, Tile>,
}

impl TileCatalog {
    /// Create new catalog; duplicate ids are rejected
    pub fn new(tiles: Vec<Tile>) -> PlumbResult<Self> {
        let mut map = BTreeMap::new();
        for tile in tiles {
            let id = tile.id;
            if map.insert(id, tile).is_some() {
                return Err(PlumbError::InvalidFormat(format!("Duplicate tile id {}", id)));
            }
        }
        log::info!("Tile catalog loaded with {} tiles", map.len());
        Ok(Self { tiles: map })
    }

    /// Load from the JSON tile asset format
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> PlumbResult<Self> {
        crate::io::catalog_json::read_catalog(path.as_ref())
    }

    pub fn get(&self, id: u32) -> PlumbResult<&Tile> {
        self.tiles.get(&id).ok_or(PlumbError::TileNotFound(id))
    }

    /// Tiles in ascending id order
    pub fn all(&self) -> impl Iterator<Item = &Tile> + '_ {
        self.tiles.values()
    }

    pub fn ids(&self) -> Vec<u32> {
        self.tiles.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Position of a tile id in catalog order (used for navigation)
    pub fn position_of(&self, id: u32) -> Option<usize> {
        self.tiles.keys().position(|k| *k == id)
    }

    /// Tile id at a position in catalog order
    pub fn id_at(&self, index: usize) -> Option<u32> {
        self.tiles.keys().nth(index).copied()
    }

    /// Tile containing a WGS84 point, if any
    pub fn tile_at(&self, lon: f64, lat: f64) -> Option<&Tile> {
        self.all().find(|t| t.contains(lon, lat))
    }

    /// Union of every tile polygon (the whole study area)
    pub fn union(&self) -> MultiPolygon<f64> {
        self.all().fold(MultiPolygon::new(vec![]), |acc, tile| {
            if acc.0.is_empty() {
                tile.geometry.clone()
            } else {
                acc.union(&tile.geometry)
            }
        })
    }

    pub fn bounds(&self) -> Option<BoundingBox> {
        self.union()
            .bounding_rect()
            .map(|r| BoundingBox::new(r.min().x, r.min().y, r.max().x, r.max().y))
    }

    pub fn area_hectares(&self, id: u32) -> PlumbResult<f64> {
        Ok(self.get(id)?.area_hectares())
    }

    /// Geodesic area of the unioned study area
    pub fn total_area_hectares(&self) -> f64 {
        self.union().geodesic_area_unsigned() / M2_PER_HECTARE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    fn square(x0: f64, y0: f64, size: f64) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![polygon![
            (x: x0, y: y0),
            (x: x0 + size, y: y0),
            (x: x0 + size, y: y0 + size),
            (x: x0, y: y0 + size),
        ]])
    }

    fn sparse_catalog() -> TileCatalog {
        TileCatalog::new(
            [1u32, 2, 4, 13]
                .iter()
                .enumerate()
                .map(|(i, id)| Tile::new(*id, format!("aoi{}", id), square(-92.0 + i as f64 * 0.1, 46.7, 0.1)))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_sparse_lookup() {
        let catalog = sparse_catalog();
        assert_eq!(catalog.get(13).unwrap().id, 13);
        assert!(matches!(catalog.get(3), Err(PlumbError::TileNotFound(3))));
        assert!(matches!(catalog.get(0), Err(PlumbError::TileNotFound(0))));
        assert_eq!(catalog.ids(), vec![1, 2, 4, 13]);
    }

    #[test]
    fn test_navigation_positions() {
        let catalog = sparse_catalog();
        assert_eq!(catalog.position_of(4), Some(2));
        assert_eq!(catalog.id_at(3), Some(13));
        assert_eq!(catalog.id_at(4), None);
    }

    #[test]
    fn test_all_is_restartable() {
        let catalog = sparse_catalog();
        let first: Vec<u32> = catalog.all().map(|t| t.id).collect();
        let second: Vec<u32> = catalog.all().map(|t| t.id).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let tiles = vec![
            Tile::new(1, "a", square(0.0, 0.0, 1.0)),
            Tile::new(1, "b", square(1.0, 0.0, 1.0)),
        ];
        assert!(TileCatalog::new(tiles).is_err());
    }

    #[test]
    fn test_union_and_area() {
        let catalog = sparse_catalog();
        let bounds = catalog.bounds().unwrap();
        assert!((bounds.min_x + 92.0).abs() < 1e-9);
        assert!((bounds.max_x + 91.6).abs() < 1e-9);

        // 0.1 degree square at 46.7N is roughly 11.1 km x 7.6 km
        let one = catalog.area_hectares(1).unwrap();
        assert!(one > 8_000.0 && one < 8_900.0, "area {}", one);
        let total = catalog.total_area_hectares();
        assert!((total - 4.0 * one).abs() / total < 0.01);
    }

    #[test]
    fn test_tile_at() {
        let catalog = sparse_catalog();
        assert_eq!(catalog.tile_at(-91.75, 46.75).map(|t| t.id), Some(4));
        assert!(catalog.tile_at(-80.0, 46.75).is_none());
    }
}
