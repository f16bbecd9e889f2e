//! CSV encodings of the exported tables.
//!
//! Label table columns: `class, lon, lat, <band columns...>, date, mission, aoi`.
//! Area table columns: `mission, date, [aoi,] <class>_ha..., classified_ha, aoi_ha`.

use crate::core::bands::CanonicalBand;
use crate::core::classify::AreaRow;
use crate::core::labels::{ClassLegend, LabelRow, LabelTable};
use crate::io::archive::{MissionDateEntry, SpatialKey};
use crate::types::{code_from_mission, PlumbError, PlumbResult};
use chrono::NaiveDate;
use csv::{ReaderBuilder, Writer};
use std::collections::BTreeMap;
use std::io::{Read, Write};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// `eePlumB_<initials>_<mission>_<date>_v<export_date>.csv`; missions with a
/// short code are written as that code ("LS8")
pub fn export_filename(initials: &str, mission: &str, date: NaiveDate, export_date: NaiveDate) -> String {
    let mission = code_from_mission(mission)
        .map(str::to_string)
        .unwrap_or_else(|| mission.to_string());
    format!(
        "eePlumB_{}_{}_{}_v{}.csv",
        initials,
        mission,
        date.format(DATE_FORMAT),
        export_date.format(DATE_FORMAT)
    )
}

fn format_value(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() => v.to_string(),
        _ => String::new(),
    }
}

pub fn write_label_csv<W: Write>(table: &LabelTable, writer: W) -> PlumbResult<()> {
    let bands = table.feature_columns();
    let mut wtr = Writer::from_writer(writer);

    let mut header = vec!["class".to_string(), "lon".to_string(), "lat".to_string()];
    header.extend(bands.iter().map(|b| b.name().to_string()));
    header.extend(["date".to_string(), "mission".to_string(), "aoi".to_string()]);
    wtr.write_record(&header)?;

    for row in &table.rows {
        let mut record = vec![row.class.clone(), row.lon.to_string(), row.lat.to_string()];
        record.extend(
            bands
                .iter()
                .map(|b| format_value(row.features.get(b).copied().flatten())),
        );
        record.push(row.date.format(DATE_FORMAT).to_string());
        record.push(row.mission.clone());
        record.push(row.tile_id.to_string());
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Read a label CSV back, coding classes with `legend`
pub fn read_label_csv<R: Read>(reader: R, legend: &ClassLegend) -> PlumbResult<LabelTable> {
    let mut rdr = ReaderBuilder::new().has_headers(true).from_reader(reader);
    let headers = rdr.headers()?.clone();

    let column = |name: &str| -> PlumbResult<usize> {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| PlumbError::InvalidFormat(format!("Label table has no '{}' column", name)))
    };
    let (class_col, lon_col, lat_col) = (column("class")?, column("lon")?, column("lat")?);
    let (date_col, mission_col, aoi_col) = (column("date")?, column("mission")?, column("aoi")?);
    let band_cols: Vec<(usize, CanonicalBand)> = headers
        .iter()
        .enumerate()
        .filter_map(|(i, h)| h.parse::<CanonicalBand>().ok().map(|b| (i, b)))
        .collect();

    let parse_f64 = |s: &str, what: &str| -> PlumbResult<f64> {
        s.trim()
            .parse::<f64>()
            .map_err(|e| PlumbError::InvalidFormat(format!("Bad {} value '{}': {}", what, s, e)))
    };

    let mut rows = Vec::new();
    for record in rdr.records() {
        let record = record?;
        let field = |i: usize| record.get(i).unwrap_or("");

        let class = field(class_col).to_string();
        let code = legend.code_of(&class)?;
        let date = NaiveDate::parse_from_str(field(date_col), DATE_FORMAT)
            .map_err(|e| PlumbError::InvalidFormat(format!("Bad date '{}': {}", field(date_col), e)))?;
        let tile_id = field(aoi_col)
            .trim()
            .parse::<u32>()
            .map_err(|e| PlumbError::InvalidFormat(format!("Bad aoi '{}': {}", field(aoi_col), e)))?;

        let mut features = BTreeMap::new();
        for (i, band) in &band_cols {
            let raw = field(*i).trim();
            let value = if raw.is_empty() { None } else { Some(parse_f64(raw, band.name())?) };
            features.insert(*band, value);
        }

        rows.push(LabelRow {
            class,
            code,
            lon: parse_f64(field(lon_col), "lon")?,
            lat: parse_f64(field(lat_col), "lat")?,
            date,
            mission: field(mission_col).to_string(),
            tile_id,
            features,
        });
    }

    log::debug!("Read {} label rows", rows.len());
    Ok(LabelTable::new(legend.version(), rows))
}

pub fn write_area_csv<W: Write>(rows: &[AreaRow], writer: W) -> PlumbResult<()> {
    let per_tile = rows.iter().any(|r| r.tile_id.is_some());
    let classes: Vec<String> = rows
        .first()
        .map(|r| r.class_ha.iter().map(|(name, _)| name.clone()).collect())
        .unwrap_or_default();

    let mut wtr = Writer::from_writer(writer);
    let mut header = vec!["mission".to_string(), "date".to_string()];
    if per_tile {
        header.push("aoi".to_string());
    }
    header.extend(classes.iter().map(|c| format!("{}_ha", c)));
    header.extend(["classified_ha".to_string(), "aoi_ha".to_string()]);
    wtr.write_record(&header)?;

    for row in rows {
        let names: Vec<&str> = row.class_ha.iter().map(|(n, _)| n.as_str()).collect();
        if names != classes.iter().map(String::as_str).collect::<Vec<_>>() {
            return Err(PlumbError::InvalidFormat(format!(
                "Area row {} {} has classes {:?}, expected {:?}",
                row.mission, row.date, names, classes
            )));
        }
        let mut record = vec![row.mission.clone(), row.date.format(DATE_FORMAT).to_string()];
        if per_tile {
            record.push(row.tile_id.map(|t| t.to_string()).unwrap_or_default());
        }
        record.extend(row.class_ha.iter().map(|(_, ha)| ha.to_string()));
        record.push(row.classified_ha.to_string());
        record.push(row.aoi_ha.to_string());
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Landsat entries use `SPACECRAFT_ID,DATE_ACQUIRED,WRS_PATH,WRS_ROW`;
/// Sentinel-2 entries use `date,MGRS_TILE`. Mixed lists are rejected.
pub fn write_mission_dates_csv<W: Write>(entries: &[MissionDateEntry], writer: W) -> PlumbResult<()> {
    let wrs = entries
        .iter()
        .filter(|e| matches!(e.spatial_key, SpatialKey::WrsPathRow { .. }))
        .count();
    if wrs != 0 && wrs != entries.len() {
        return Err(PlumbError::InvalidFormat(
            "Mission-date list mixes WRS and MGRS entries".to_string(),
        ));
    }

    let mut wtr = Writer::from_writer(writer);
    if wrs > 0 || entries.is_empty() {
        wtr.write_record(["SPACECRAFT_ID", "DATE_ACQUIRED", "WRS_PATH", "WRS_ROW"])?;
    } else {
        wtr.write_record(["date", "MGRS_TILE"])?;
    }
    for entry in entries {
        let date = entry.date.format(DATE_FORMAT).to_string();
        match &entry.spatial_key {
            SpatialKey::WrsPathRow { path, row } => {
                wtr.write_record([entry.mission.clone(), date, path.to_string(), row.to_string()])?
            }
            SpatialKey::MgrsTile(tile) => wtr.write_record([date, tile.clone()])?,
        }
    }
    wtr.flush()?;
    Ok(())
}
