#![allow(dead_code)]

use std::path::{Path, PathBuf};

use eidcore::data::column::{Column, ColumnData};
use eidcore::data::labels::LabelConfig;
use eiddf::data::assembler::InputSpec;
use eiddf::data::catalog::ShardCatalog;
use eiddf::data::shard::ShardWriter;

pub const CHUNK_ROWS: usize = 16;
pub const STORED_TRACKS: usize = 3;
pub const STORED_TRACK_ATTRIBUTES: usize = 15;

/// How the truth fields of a fixture shard are filled
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Truth {
    /// even rows are signal (class 0), odd rows background (class 1 in the binary table)
    Alternating,
    /// every row falls outside the label table
    Unclassified,
}

fn ints(values: impl Iterator<Item = i64>) -> Column {
    Column::from_i64(values.collect())
}

fn floats(values: impl Iterator<Item = f32>) -> Column {
    Column::from_f32(values.collect())
}

/// Write a shard of `n_rows` events numbered from `first_event`.
///
/// Scalars carry the row position so that rows can be traced through the
/// pipeline: `p_et_calo = 10 + i % 50`, `p_eta` spreads over `[-2.4, 2.4)`.
pub fn write_shard(path: &Path, first_event: i64, n_rows: usize, truth: Truth, with_images: bool) -> PathBuf {
    let mut writer = ShardWriter::create(path, CHUNK_ROWS, 3).unwrap();
    let n = n_rows as i64;

    writer.write_column("eventNumber", &ints((0..n).map(|i| first_event + i))).unwrap();
    let iff = match truth {
        Truth::Alternating => ints((0..n).map(|i| if i % 2 == 0 { 2 } else { 5 })),
        Truth::Unclassified => ints((0..n).map(|_| 0)),
    };
    writer.write_column("p_iffTruth", &iff).unwrap();
    writer.write_column("p_TruthType", &ints((0..n).map(|i| if i % 2 == 0 { 2 } else { 4 }))).unwrap();
    writer.write_column("p_firstEgMotherPdgId", &ints((0..n).map(|_| -11))).unwrap();
    writer.write_column("p_charge", &floats((0..n).map(|_| 1.0))).unwrap();

    writer.write_column("p_et_calo", &floats((0..n).map(|i| 10.0 + (i % 50) as f32))).unwrap();
    writer
        .write_column("p_eta", &floats((0..n).map(|i| -2.4 + 4.8 * i as f32 / n as f32)))
        .unwrap();
    writer.write_column("p_numberOfSCTHits", &ints((0..n).map(|i| i % 9))).unwrap();

    if with_images {
        let image: Vec<f32> = (0..n_rows * 77).map(|v| (v % 77) as f32 - 5.0).collect();
        let column = Column::new(n_rows, vec![7, 11], ColumnData::Float(image)).unwrap();
        writer.write_column("em_barrel_Lr1", &column).unwrap();
    }

    let stride = STORED_TRACKS * STORED_TRACK_ATTRIBUTES;
    let tracks: Vec<f32> = (0..n_rows * stride).map(|v| -((v % stride) as f32)).collect();
    let column = Column::new(n_rows, vec![STORED_TRACKS, STORED_TRACK_ATTRIBUTES], ColumnData::Float(tracks)).unwrap();
    writer.write_column("p_tracks", &column).unwrap();

    writer.finish().unwrap()
}

/// Write one alternating-truth shard per entry of `lengths` into `dir` and catalog them.
///
/// Events are numbered globally, so `eventNumber` equals the global index.
/// Only even shards carry the `em_barrel_Lr1` image.
pub fn build_catalog(dir: &Path, lengths: &[usize]) -> ShardCatalog {
    let mut paths = Vec::new();
    let mut first_event = 0;
    for (id, &len) in lengths.iter().enumerate() {
        let path = dir.join(format!("e-ID_{:03}.db", id));
        paths.push(write_shard(&path, first_event, len, Truth::Alternating, id % 2 == 0));
        first_event += len as i64;
    }
    ShardCatalog::from_paths(paths, 2).unwrap()
}

pub fn input_spec() -> InputSpec {
    InputSpec {
        scalars: vec!["p_eta".to_string(), "p_et_calo".to_string(), "p_numberOfSCTHits".to_string(), "tracks".to_string()],
        images: vec!["em_barrel_Lr1".to_string(), "em_barrel_Lr1_fine".to_string()],
        others: vec!["eventNumber".to_string(), "pt".to_string(), "SCTHits".to_string()],
        n_tracks: 5,
        preprocess_images: false,
    }
}

pub fn binary_labels() -> LabelConfig {
    LabelConfig { n_classes: 2, ..LabelConfig::default() }
}

pub fn event_numbers(column: &Column) -> Vec<i64> {
    column.to_f64_vec().into_iter().map(|v| v as i64).collect()
}
