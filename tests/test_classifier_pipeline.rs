mod common;

use approx::assert_abs_diff_eq;
use common::*;
use plumb::core::bands::CanonicalBand;
use plumb::core::classify::{
    area_by_class, classify, evaluate, train, ClassifierKind, TrainingParams, TrainingSet,
};
use plumb::core::extract::{ExtractionParams, PixelExtractor, Reducer};
use plumb::core::labels::{ClassLegend, LabelStore, NODATA_CLASS};
use plumb::core::mosaic::{MissionSelector, Mosaicker};
use plumb::io::export::{ExportJob, ExportParams, ExportQueue, LocalCsvSink};
use plumb::types::MosaicKey;
use std::sync::Arc;

fn labeled_store() -> LabelStore {
    let mut store = LabelStore::new(ClassLegend::superior_3class());
    for tile_id in [1, 2] {
        let key = MosaicKey::new("LANDSAT_8", date(), tile_id);
        for row in 5..15 {
            let cols = if tile_id == 1 { 1..11 } else { 11..20 };
            for col in cols {
                let (lon, lat) = pixel_center(row, col);
                let class = if col < 10 { "openWater" } else { "cloud" };
                store.add(class, lon, lat, key.clone()).unwrap();
            }
        }
    }
    store
}

#[test]
fn test_train_classify_and_report_areas() {
    init_logging();
    let archive = archive(vec![landsat_scene("LC08_026027", DARK_DN, BRIGHT_DN, 10)]);
    let catalog = catalog();
    let mosaicker = Mosaicker::default();
    let legend = ClassLegend::superior_3class();

    let table = labeled_store().snapshot().unwrap();
    let extractor = PixelExtractor::new(ExtractionParams {
        reducer: Reducer::First,
        scale: 30.0,
        crs_epsg: None,
        bands: Vec::new(),
    });
    let report = extractor.extract_batch(&mosaicker, &archive, &catalog, &table);
    assert!(report.skipped.is_empty());
    assert_eq!(report.table.len(), table.len());

    let params = TrainingParams {
        features: vec![CanonicalBand::Blue, CanonicalBand::Red, CanonicalBand::Nir],
        ..TrainingParams::default()
    };
    let set = TrainingSet::from_table(&report.table, &legend, &params.features).unwrap();
    assert_eq!(set.dropped_missing, 0);
    let (train_set, test_set) = set.split(params.split_fraction, params.seed).unwrap();
    assert!(!train_set.is_empty() && !test_set.is_empty());

    let model = train(params.build_classifier().as_ref(), &train_set).unwrap();
    let cm = evaluate(model.as_ref(), &test_set);
    assert_abs_diff_eq!(cm.accuracy(), 1.0);

    let mut rasters = Vec::new();
    for tile_id in catalog.ids() {
        let mosaic = mosaicker
            .select_and_mosaic(&archive, &MissionSelector::Mission("LANDSAT_8".into()), date(), catalog.get(tile_id).unwrap())
            .unwrap();
        rasters.push(classify(model.as_ref(), &mosaic, &params.features, &legend).unwrap());
    }

    // Tile 1 is water left of column 10 and cloud on it
    let tile1 = &rasters[0];
    let (lon, lat) = pixel_center(8, 4);
    let (r, c) = tile1.grid.locate(lon, lat).unwrap();
    assert_eq!(tile1.classes[[r, c]], 1);
    let (lon, lat) = pixel_center(8, 10);
    let (r, c) = tile1.grid.locate(lon, lat).unwrap();
    assert_eq!(tile1.classes[[r, c]], 0);
    assert!(tile1.classes.iter().filter(|v| **v != NODATA_CLASS).count() >= 100);

    let per_tile = area_by_class(&rasters, &catalog, &legend, true).unwrap();
    assert_eq!(per_tile.len(), 2);
    assert_eq!(per_tile[0].tile_id, Some(1));
    let water_ha = per_tile[0].class_ha[1].1;
    let cloud_ha = per_tile[0].class_ha[0].1;
    // 9 water columns against 1 cloud column, 10 rows each
    assert_abs_diff_eq!(water_ha / cloud_ha, 9.0, epsilon = 0.01);
    assert_abs_diff_eq!(per_tile[0].classified_ha, water_ha + cloud_ha, epsilon = 1e-6);
    assert!(per_tile[0].classified_ha <= per_tile[0].aoi_ha * 1.05);
    assert_eq!(per_tile[1].class_ha[1].1, 0.0);

    let totals = area_by_class(&rasters, &catalog, &legend, false).unwrap();
    assert_eq!(totals.len(), 1);
    assert_eq!(totals[0].tile_id, None);
    assert_abs_diff_eq!(
        totals[0].classified_ha,
        per_tile[0].classified_ha + per_tile[1].classified_ha,
        epsilon = 1e-6
    );
    assert_abs_diff_eq!(totals[0].aoi_ha, catalog.total_area_hectares(), epsilon = 1e-9);

    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(LocalCsvSink::new(dir.path()).unwrap());
    let job = ExportJob::areas(per_tile, legend.version(), date()).unwrap();
    let summary = ExportQueue::new(sink, ExportParams::default())
        .run_blocking(vec![job.clone()])
        .unwrap();
    assert!(summary.all_succeeded());
    let text = std::fs::read_to_string(dir.path().join(&job.file_name)).unwrap();
    assert_eq!(
        text.lines().next().unwrap(),
        "mission,date,aoi,cloud_ha,openWater_ha,sediment_ha,classified_ha,aoi_ha"
    );
}

#[test]
fn test_forest_strategy_plugs_in() {
    let archive = archive(vec![landsat_scene("LC08_026027", DARK_DN, BRIGHT_DN, 10)]);
    let catalog = catalog();
    let legend = ClassLegend::superior_3class();
    let extractor = PixelExtractor::new(ExtractionParams {
        crs_epsg: Some(32615),
        ..ExtractionParams::default()
    });
    let report = extractor.extract_batch(
        &Mosaicker::default(),
        &archive,
        &catalog,
        &labeled_store().snapshot().unwrap(),
    );

    let params = TrainingParams {
        classifier: ClassifierKind::RandomForest { n_trees: 9 },
        features: vec![CanonicalBand::Red, CanonicalBand::Nir],
        ..TrainingParams::default()
    };
    let set = TrainingSet::from_table(&report.table, &legend, &params.features).unwrap();
    let model = train(params.build_classifier().as_ref(), &set).unwrap();
    assert_eq!(model.n_features(), 2);
    assert_eq!(model.predict(&[landsat_reflectance(DARK_DN) as f64; 2]), 1);
    assert_eq!(model.predict(&[landsat_reflectance(BRIGHT_DN) as f64; 2]), 0);
}
