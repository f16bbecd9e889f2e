//! Coordinate reference systems used by the imagery archive.
//!
//! Tiles and label points are always WGS84 longitude/latitude. Landsat and
//! Sentinel-2 scenes are delivered on UTM grids (EPSG 326xx / 327xx), so the
//! mosaicker and the pixel extractor move coordinates between the two through
//! proj4rs. With the `gdal` feature the same transforms are also available
//! through GDAL's `CoordTransform`.

use crate::types::{BoundingBox, GeoGrid, PlumbError, PlumbResult};
use geo::{coord, GeodesicArea, Rect};
use proj4rs::proj::Proj;
use proj4rs::transform::transform;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const EPSG_WGS84: u32 = 4326;

/// A supported coordinate reference system, identified by EPSG code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Crs {
    epsg: u32,
}

impl Crs {
    /// WGS84 geographic (EPSG:4326)
    pub fn wgs84() -> Self {
        Self { epsg: EPSG_WGS84 }
    }

    /// Create from an EPSG code; only WGS84 and UTM zones are supported
    pub fn from_epsg(epsg: u32) -> PlumbResult<Self> {
        if epsg == EPSG_WGS84 || parse_utm_epsg(epsg).is_some() {
            Ok(Self { epsg })
        } else {
            Err(PlumbError::InvalidFormat(format!("Unsupported CRS: EPSG:{}", epsg)))
        }
    }

    /// UTM north/south zone
    pub fn utm(zone: u32, north: bool) -> PlumbResult<Self> {
        let epsg = if north { 32600 + zone } else { 32700 + zone };
        Self::from_epsg(epsg)
    }

    pub fn epsg(&self) -> u32 {
        self.epsg
    }

    pub fn is_geographic(&self) -> bool {
        self.epsg == EPSG_WGS84
    }

    /// PROJ definition string for this CRS
    pub fn proj_string(&self) -> String {
        match parse_utm_epsg(self.epsg) {
            Some((zone, true)) => format!("+proj=utm +zone={} +datum=WGS84 +units=m +no_defs", zone),
            Some((zone, false)) => {
                format!("+proj=utm +zone={} +south +datum=WGS84 +units=m +no_defs", zone)
            }
            None => "+proj=longlat +datum=WGS84 +no_defs".to_string(),
        }
    }

    fn proj(&self) -> PlumbResult<Proj> {
        Proj::from_proj_string(&self.proj_string())
            .map_err(|e| PlumbError::Projection(format!("Cannot initialise {}: {:?}", self, e)))
    }

    /// Project one WGS84 lon/lat into this CRS
    pub fn from_wgs84(&self, lon: f64, lat: f64) -> PlumbResult<(f64, f64)> {
        Reprojector::new(Crs::wgs84(), *self)?.transform(lon, lat)
    }

    /// Unproject one coordinate in this CRS to WGS84 lon/lat
    pub fn to_wgs84(&self, x: f64, y: f64) -> PlumbResult<(f64, f64)> {
        Reprojector::new(*self, Crs::wgs84())?.transform(x, y)
    }

    /// Envelope of a box from `from` after reprojection into this CRS
    pub fn transform_bbox_from(&self, from: &Crs, bbox: &BoundingBox) -> PlumbResult<BoundingBox> {
        Reprojector::new(*from, *self)?.transform_bbox(bbox)
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg)
    }
}

/// Reusable transform between two CRSs. Identical CRSs skip proj4rs.
pub struct Reprojector {
    from: Crs,
    to: Crs,
    projs: Option<(Proj, Proj)>,
}

impl fmt::Debug for Reprojector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reprojector")
            .field("from", &self.from)
            .field("to", &self.to)
            .finish_non_exhaustive()
    }
}

impl Reprojector {
    pub fn new(from: Crs, to: Crs) -> PlumbResult<Self> {
        let projs = if from == to {
            None
        } else {
            Some((from.proj()?, to.proj()?))
        };
        Ok(Self { from, to, projs })
    }

    pub fn from_crs(&self) -> Crs {
        self.from
    }

    pub fn to_crs(&self) -> Crs {
        self.to
    }

    /// Transform one coordinate; geographic coordinates are in degrees
    pub fn transform(&self, x: f64, y: f64) -> PlumbResult<(f64, f64)> {
        let Some((src, dst)) = &self.projs else {
            return Ok((x, y));
        };
        let mut point = if self.from.is_geographic() {
            (x.to_radians(), y.to_radians(), 0.0)
        } else {
            (x, y, 0.0)
        };
        transform(src, dst, &mut point).map_err(|e| {
            PlumbError::Projection(format!(
                "({}, {}) from {} to {} failed: {:?}",
                x, y, self.from, self.to, e
            ))
        })?;
        if self.to.is_geographic() {
            Ok((point.0.to_degrees(), point.1.to_degrees()))
        } else {
            Ok((point.0, point.1))
        }
    }

    /// Envelope of the transformed box. Corners and edge midpoints are
    /// transformed to follow the projection's curvature.
    pub fn transform_bbox(&self, bbox: &BoundingBox) -> PlumbResult<BoundingBox> {
        if self.projs.is_none() {
            return Ok(*bbox);
        }
        let mid_x = (bbox.min_x + bbox.max_x) / 2.0;
        let mid_y = (bbox.min_y + bbox.max_y) / 2.0;
        let mut points: Vec<(f64, f64)> = bbox.corners().to_vec();
        points.extend([
            (mid_x, bbox.min_y),
            (mid_x, bbox.max_y),
            (bbox.min_x, mid_y),
            (bbox.max_x, mid_y),
        ]);
        let projected = points
            .iter()
            .map(|&(x, y)| self.transform(x, y))
            .collect::<PlumbResult<Vec<_>>>()?;
        BoundingBox::from_points(&projected)
            .ok_or_else(|| PlumbError::Projection("Empty bounding box".to_string()))
    }
}

/// Envelope of a box reprojected through GDAL/PROJ
#[cfg(feature = "gdal")]
pub fn gdal_transform_bbox(from: &Crs, to: &Crs, bbox: &BoundingBox) -> PlumbResult<BoundingBox> {
    use gdal::spatial_ref::{CoordTransform, SpatialRef};

    // PROJ strings keep lon/lat axis order for geographic CRSs
    let source = SpatialRef::from_proj4(&from.proj_string())?;
    let target = SpatialRef::from_proj4(&to.proj_string())?;
    let ct = CoordTransform::new(&source, &target)?;

    let corners = bbox.corners();
    let mut xs: Vec<f64> = corners.iter().map(|c| c.0).collect();
    let mut ys: Vec<f64> = corners.iter().map(|c| c.1).collect();
    let mut zs = vec![0.0; xs.len()];
    ct.transform_coords(&mut xs, &mut ys, &mut zs)?;

    let points: Vec<(f64, f64)> = xs.into_iter().zip(ys).collect();
    BoundingBox::from_points(&points)
        .ok_or_else(|| PlumbError::Projection("Empty bounding box".to_string()))
}

/// Ground area of one pixel in square metres. Geographic cells are measured
/// geodesically on the WGS84 ellipsoid.
pub fn pixel_area_m2(grid: &GeoGrid, row: usize) -> f64 {
    let t = &grid.transform;
    if grid.epsg != EPSG_WGS84 {
        return (t.pixel_width * t.pixel_height).abs();
    }
    let b = grid.pixel_bounds(row, 0);
    Rect::new(coord! { x: b.min_x, y: b.min_y }, coord! { x: b.max_x, y: b.max_y })
        .to_polygon()
        .geodesic_area_unsigned()
}

/// Parse an EPSG code into UTM zone info: `Some((zone, is_north))`
pub fn parse_utm_epsg(epsg: u32) -> Option<(u32, bool)> {
    if (32601..=32660).contains(&epsg) {
        Some((epsg - 32600, true))
    } else if (32701..=32760).contains(&epsg) {
        Some((epsg - 32700, false))
    } else {
        None
    }
}
