//! GeoTIFF output for classified rasters

use crate::core::classify::ClassRaster;
use crate::core::crs::{gdal_transform_bbox, Crs};
use crate::core::labels::NODATA_CLASS;
use crate::types::PlumbResult;
use gdal::raster::Buffer;
use gdal::{DriverManager, Metadata};
use std::path::Path;

/// `<mission>_<date>_aoi<tile>_classified.tif`
pub fn class_raster_filename(raster: &ClassRaster) -> String {
    format!("{}_classified.tif", raster.key)
}

/// Write a class raster as a single-band byte GeoTIFF with nodata 255
pub fn save_class_geotiff<P: AsRef<Path>>(raster: &ClassRaster, output_path: P) -> PlumbResult<()> {
    let (height, width) = raster.classes.dim();

    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let mut dataset = driver.create_with_band_type::<u8, _>(
        output_path.as_ref(),
        width as isize,
        height as isize,
        1,
    )?;

    dataset.set_geo_transform(&raster.grid.transform.to_gdal())?;
    dataset.set_spatial_ref(&gdal::spatial_ref::SpatialRef::from_epsg(raster.grid.epsg)?)?;

    dataset.set_metadata_item("mission", &raster.key.mission, "")?;
    dataset.set_metadata_item("date", &raster.key.date.format("%Y-%m-%d").to_string(), "")?;
    dataset.set_metadata_item("aoi", &raster.key.tile_id.to_string(), "")?;
    dataset.set_metadata_item("legend", &raster.legend_version, "")?;

    let crs = Crs::from_epsg(raster.grid.epsg)?;
    let lonlat = gdal_transform_bbox(&crs, &Crs::wgs84(), &raster.grid.bounds())?;
    dataset.set_metadata_item(
        "wgs84_bounds",
        &format!("{:.6},{:.6},{:.6},{:.6}", lonlat.min_x, lonlat.min_y, lonlat.max_x, lonlat.max_y),
        "",
    )?;

    let mut rasterband = dataset.rasterband(1)?;
    rasterband.set_description("classification")?;
    let flat_data: Vec<u8> = raster.classes.iter().cloned().collect();
    let buffer = Buffer::new((width, height), flat_data);
    rasterband.write((0, 0), (width, height), &buffer)?;
    rasterband.set_no_data_value(Some(NODATA_CLASS as f64))?;

    log::info!("💾 Saved class raster {} to {}", raster.key, output_path.as_ref().display());
    Ok(())
}
