mod common;

use std::fs;

use common::{build_catalog, write_shard, Truth};
use eidcore::error::CoreError;
use eiddf::data::catalog::{discover, CatalogConfig, ShardCatalog};
use eiddf::data::shard::ShardRead;
use eiddf::error::DataError;

#[test]
fn discover_single_directory_sorted() {
    let dir = tempfile::tempdir().unwrap();
    let shards = dir.path().join("0.0-2.5");
    fs::create_dir(&shards).unwrap();
    for name in ["e-ID_002.db", "e-ID_000.db", "e-ID_001.db"] {
        write_shard(&shards.join(name), 0, 4, Truth::Alternating, false);
    }
    fs::write(shards.join("notes.txt"), "not a shard").unwrap();
    fs::write(shards.join("other_000.db"), "").unwrap();

    let config = CatalogConfig {
        input_path: dir.path().to_path_buf(),
        input_dir: Some("0.0-2.5".to_string()),
        ..CatalogConfig::default()
    };
    let files = discover(&config).unwrap();
    let names: Vec<_> = files.iter().map(|p| p.file_name().unwrap().to_str().unwrap().to_string()).collect();
    assert_eq!(names, vec!["e-ID_000.db", "e-ID_001.db", "e-ID_002.db"]);
}

#[test]
fn discover_interleaves_regions() {
    let dir = tempfile::tempdir().unwrap();
    let regions = ["barrel", "endcap"];
    for (r, region) in regions.iter().enumerate() {
        let folder = dir.path().join(region);
        fs::create_dir(&folder).unwrap();
        // the second region holds one extra file, which is dropped
        for i in 0..2 + r {
            write_shard(&folder.join(format!("e-ID_{}.db", i)), 0, 3, Truth::Alternating, false);
        }
    }

    let config = CatalogConfig {
        input_path: dir.path().to_path_buf(),
        regions: regions.iter().map(|r| r.to_string()).collect(),
        ..CatalogConfig::default()
    };
    let files = discover(&config).unwrap();
    let relative: Vec<String> = files
        .iter()
        .map(|p| p.strip_prefix(dir.path()).unwrap().to_string_lossy().replace('\\', "/"))
        .collect();
    assert_eq!(relative, vec!["barrel/e-ID_0.db", "endcap/e-ID_0.db", "barrel/e-ID_1.db", "endcap/e-ID_1.db"]);
}

#[test]
fn discover_empty_directory_is_a_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("empty")).unwrap();
    let config = CatalogConfig {
        input_path: dir.path().to_path_buf(),
        input_dir: Some("empty".to_string()),
        ..CatalogConfig::default()
    };
    assert!(matches!(discover(&config), Err(DataError::Core(CoreError::Configuration(_)))));
}

#[test]
fn catalog_counts_and_offsets() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = build_catalog(dir.path(), &[100, 37, 0, 50]);

    assert_eq!(catalog.len(), 4);
    assert_eq!(catalog.lengths(), vec![100, 37, 0, 50]);
    assert_eq!(catalog.total_events(), 187);
    assert_eq!(catalog.offset(1), Some(100));
    assert_eq!(catalog.offset(3), Some(137));
    assert_eq!(catalog.locate(136), Some((1, 36)));
    assert_eq!(catalog.locate(137), Some((3, 0)));
    assert_eq!(catalog.locate(187), None);

    let ids: Vec<usize> = catalog.shards().iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![0, 1, 2, 3]);
}

#[test]
fn catalog_from_config_and_field_union() {
    let dir = tempfile::tempdir().unwrap();
    let folder = dir.path().join("all");
    fs::create_dir(&folder).unwrap();
    build_catalog(&folder, &[10, 20]);

    let config = CatalogConfig {
        input_path: dir.path().to_path_buf(),
        input_dir: Some("all".to_string()),
        ..CatalogConfig::default()
    };
    let catalog = ShardCatalog::from_config(&config, 1).unwrap();
    assert_eq!(catalog.total_events(), 30);

    let fields = catalog.field_names_union().unwrap();
    assert!(fields.contains(&"eventNumber".to_string()));
    assert!(fields.contains(&"p_tracks".to_string()));
    // only the first shard carries the image
    assert!(fields.contains(&"em_barrel_Lr1".to_string()));
    assert!(!catalog.open(1).unwrap().field_names().contains(&"em_barrel_Lr1".to_string()));
}

#[test]
fn catalog_rejects_shard_without_event_numbers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("e-ID_000.db");
    let mut writer = eiddf::data::shard::ShardWriter::create(&path, 8, 3).unwrap();
    writer
        .write_column("p_eta", &eidcore::data::column::Column::from_f32(vec![0.1, 0.2]))
        .unwrap();
    writer.finish().unwrap();

    let result = ShardCatalog::from_paths(vec![path], 1);
    assert!(matches!(result, Err(DataError::Core(CoreError::SchemaMismatch(_)))));
}
