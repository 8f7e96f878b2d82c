use serde::{Deserialize, Serialize};

use crate::data::column::Column;
use crate::data::sample::Sample;
use crate::error::{CoreError, CoreResult};

pub const IFF_TRUTH: &str = "p_iffTruth";
pub const TRUTH_TYPE: &str = "p_TruthType";
pub const MOTHER_PDG_ID: &str = "p_firstEgMotherPdgId";
pub const CHARGE: &str = "p_charge";
pub const VERTEX_INDEX: &str = "p_vertexIndex";

/// Label of rows that cannot be classified and must be dropped
pub const UNCLASSIFIED: i8 = -1;

const NO_VERTEX: i64 = -999;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelConfig {
    /// Number of classes: 2, 5, 6 or 8
    pub n_classes: usize,
    /// Treat (iffTruth 0, TruthType 0) as the light-flavour class, as found in collision data
    pub data_lf: bool,
    /// Drop candidates without a matched primary vertex
    pub match_to_vertex: bool,
}

impl Default for LabelConfig {
    fn default() -> Self {
        LabelConfig { n_classes: 6, data_lf: false, match_to_vertex: false }
    }
}

impl LabelConfig {
    pub fn validate(&self) -> CoreResult<()> {
        match self.n_classes {
            2 | 5 | 6 | 8 => Ok(()),
            n => Err(CoreError::Configuration(format!(
                "unsupported number of classes {}, expected one of 2, 5, 6, 8",
                n
            ))),
        }
    }

    /// Truth fields the label table reads
    pub fn required_fields(&self) -> Vec<&'static str> {
        let mut fields = vec![IFF_TRUTH, TRUTH_TYPE, MOTHER_PDG_ID, CHARGE];
        if self.match_to_vertex {
            fields.push(VERTEX_INDEX);
        }
        fields
    }
}

/// Truth metadata of one candidate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TruthRecord {
    pub iff_truth: i64,
    pub truth_type: i64,
    pub mother_pdg_id: i64,
    pub charge: f64,
    pub vertex_index: i64,
}

/// Six-way truth table; categories are disjoint on `iff_truth`, first match governs.
fn six_way(truth: &TruthRecord) -> i8 {
    match truth.iff_truth {
        2 => charge_sign(truth),
        3 => 1,
        5 => 2,
        8 | 9 => 3,
        10 => match truth.truth_type {
            1 | 4 | 16 => 4,
            17 => 5,
            _ => UNCLASSIFIED,
        },
        _ => UNCLASSIFIED,
    }
}

fn eight_way(truth: &TruthRecord) -> i8 {
    match truth.iff_truth {
        2 => charge_sign(truth),
        3 => 1,
        5 => 2,
        8 => 3,
        9 => 4,
        10 => match truth.truth_type {
            4 => 5,
            16 => 6,
            17 => 7,
            _ => UNCLASSIFIED,
        },
        _ => UNCLASSIFIED,
    }
}

// prompt electron: opposite sign to the mother is signal, same sign is charge-flip
fn charge_sign(truth: &TruthRecord) -> i8 {
    let product = truth.mother_pdg_id as f64 * truth.charge;
    if product < 0.0 {
        0
    } else if product > 0.0 {
        1
    } else {
        UNCLASSIFIED
    }
}

/// Class id of one candidate under the given configuration
pub fn classify(truth: &TruthRecord, config: &LabelConfig) -> i8 {
    let mut label = if config.n_classes == 8 {
        eight_way(truth)
    } else {
        let mut label = six_way(truth);
        if config.data_lf {
            if label == 4 || label == 5 {
                label = UNCLASSIFIED;
            }
            if truth.iff_truth == 0 && truth.truth_type == 0 {
                label = 4;
            }
        }
        match config.n_classes {
            2 if label >= 2 => 1,
            5 if label == 5 => 4,
            _ => label,
        }
    };

    if config.match_to_vertex && truth.vertex_index == NO_VERTEX {
        label = UNCLASSIFIED;
    }
    label
}

fn int_field<'a>(sample: &'a Sample, name: &str) -> CoreResult<&'a Column> {
    let column = sample
        .get(name)
        .ok_or_else(|| CoreError::SchemaMismatch(format!("label derivation needs field `{}`", name)))?;
    if !column.is_scalar() {
        return Err(CoreError::SchemaMismatch(format!("label field `{}` is not a scalar", name)));
    }
    Ok(column)
}

/// Derive class labels from the truth fields of a sample.
///
/// # Arguments
///
/// * `sample` - sample holding `p_iffTruth`, `p_TruthType`, `p_firstEgMotherPdgId`,
///   `p_charge` (and `p_vertexIndex` when vertex matching is requested)
/// * `config` - class count and optional post-filters
///
/// # Returns
///
/// * one label per row, `-1` for unclassifiable rows
///
pub fn make_labels(sample: &Sample, config: &LabelConfig) -> CoreResult<Vec<i8>> {
    config.validate()?;

    let iff = int_field(sample, IFF_TRUTH)?;
    let truth_type = int_field(sample, TRUTH_TYPE)?;
    let mother = int_field(sample, MOTHER_PDG_ID)?;
    let charge = int_field(sample, CHARGE)?;
    let vertex = if config.match_to_vertex {
        Some(int_field(sample, VERTEX_INDEX)?)
    } else {
        None
    };

    let labels = (0..sample.len())
        .map(|i| {
            let truth = TruthRecord {
                iff_truth: iff.value_f64(i) as i64,
                truth_type: truth_type.value_f64(i) as i64,
                mother_pdg_id: mother.value_f64(i) as i64,
                charge: charge.value_f64(i),
                vertex_index: vertex.map_or(0, |v| v.value_f64(i) as i64),
            };
            classify(&truth, config)
        })
        .collect();

    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn truth(iff_truth: i64, truth_type: i64, mother_pdg_id: i64, charge: f64) -> TruthRecord {
        TruthRecord { iff_truth, truth_type, mother_pdg_id, charge, vertex_index: 0 }
    }

    // independent statement of the six-way table, one predicate per class
    fn matching_rows(t: &TruthRecord) -> Vec<i8> {
        let product = t.mother_pdg_id as f64 * t.charge;
        let table: Vec<(i8, bool)> = vec![
            (0, t.iff_truth == 2 && product < 0.0),
            (1, t.iff_truth == 2 && product > 0.0),
            (1, t.iff_truth == 3),
            (2, t.iff_truth == 5),
            (3, t.iff_truth == 8 || t.iff_truth == 9),
            (4, t.iff_truth == 10 && [1, 4, 16].contains(&t.truth_type)),
            (5, t.iff_truth == 10 && t.truth_type == 17),
        ];
        table.into_iter().filter(|(_, hit)| *hit).map(|(class, _)| class).collect()
    }

    #[test]
    fn test_label_table_partitions_the_truth_domain() {
        let config = LabelConfig::default();
        for iff in -1..=12 {
            for tt in -1..=40 {
                for pdg in [-11, 0, 11, 22] {
                    for charge in [-1.0, 0.0, 1.0] {
                        let t = truth(iff, tt, pdg, charge);
                        let hits = matching_rows(&t);
                        assert!(hits.len() <= 1, "double assignment for {:?}", t);
                        let expected = hits.first().copied().unwrap_or(UNCLASSIFIED);
                        let label = classify(&t, &config);
                        assert_eq!(label, expected, "{:?}", t);
                        assert!((-1..=5).contains(&label));
                    }
                }
            }
        }
    }

    #[test]
    fn test_charge_flip() {
        let config = LabelConfig::default();
        assert_eq!(classify(&truth(2, 2, 11, -1.0), &config), 0);
        assert_eq!(classify(&truth(2, 2, -11, -1.0), &config), 1);
        assert_eq!(classify(&truth(2, 2, 11, 0.0), &config), UNCLASSIFIED);
    }

    #[test]
    fn test_class_collapse() {
        let two = LabelConfig { n_classes: 2, ..LabelConfig::default() };
        assert_eq!(classify(&truth(2, 2, 11, -1.0), &two), 0);
        assert_eq!(classify(&truth(3, 0, 0, 0.0), &two), 1);
        assert_eq!(classify(&truth(10, 17, 0, 0.0), &two), 1);
        assert_eq!(classify(&truth(1, 0, 0, 0.0), &two), UNCLASSIFIED);

        let five = LabelConfig { n_classes: 5, ..LabelConfig::default() };
        assert_eq!(classify(&truth(10, 17, 0, 0.0), &five), 4);
        assert_eq!(classify(&truth(10, 4, 0, 0.0), &five), 4);
        assert_eq!(classify(&truth(8, 0, 0, 0.0), &five), 3);
    }

    #[test]
    fn test_eight_way_table() {
        let eight = LabelConfig { n_classes: 8, ..LabelConfig::default() };
        assert_eq!(classify(&truth(8, 0, 0, 0.0), &eight), 3);
        assert_eq!(classify(&truth(9, 0, 0, 0.0), &eight), 4);
        assert_eq!(classify(&truth(10, 4, 0, 0.0), &eight), 5);
        assert_eq!(classify(&truth(10, 16, 0, 0.0), &eight), 6);
        assert_eq!(classify(&truth(10, 17, 0, 0.0), &eight), 7);
        assert_eq!(classify(&truth(10, 1, 0, 0.0), &eight), UNCLASSIFIED);
    }

    #[test]
    fn test_data_light_flavour_and_vertex_matching() {
        let data = LabelConfig { data_lf: true, ..LabelConfig::default() };
        assert_eq!(classify(&truth(10, 4, 0, 0.0), &data), UNCLASSIFIED);
        assert_eq!(classify(&truth(0, 0, 0, 0.0), &data), 4);

        let vertex = LabelConfig { match_to_vertex: true, ..LabelConfig::default() };
        let mut t = truth(5, 0, 0, 0.0);
        assert_eq!(classify(&t, &vertex), 2);
        t.vertex_index = NO_VERTEX;
        assert_eq!(classify(&t, &vertex), UNCLASSIFIED);
    }

    #[test]
    fn test_make_labels_from_sample() {
        let mut sample = Sample::new(3);
        sample.insert(IFF_TRUTH, Column::from_i64(vec![2, 5, 1])).unwrap();
        sample.insert(TRUTH_TYPE, Column::from_i64(vec![2, 4, 0])).unwrap();
        sample.insert(MOTHER_PDG_ID, Column::from_i64(vec![-11, 22, 0])).unwrap();
        sample.insert(CHARGE, Column::from_f32(vec![1.0, -1.0, 1.0])).unwrap();

        let labels = make_labels(&sample, &LabelConfig::default()).unwrap();
        assert_eq!(labels, vec![0, 2, -1]);
    }

    #[test]
    fn test_make_labels_missing_field() {
        let mut sample = Sample::new(1);
        sample.insert(IFF_TRUTH, Column::from_i64(vec![2])).unwrap();
        let result = make_labels(&sample, &LabelConfig::default());
        assert!(matches!(result, Err(CoreError::SchemaMismatch(_))));
    }

    #[test]
    fn test_unsupported_class_count() {
        let config = LabelConfig { n_classes: 3, ..LabelConfig::default() };
        assert!(matches!(config.validate(), Err(CoreError::Configuration(_))));
    }
}
