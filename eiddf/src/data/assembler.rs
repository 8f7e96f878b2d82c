use std::collections::BTreeSet;
use std::ops::Range;

use eidcore::algorithm::images::orient_images;
use eidcore::algorithm::scaler::TRACKS_FIELD;
use eidcore::data::column::{Column, ColumnData};
use eidcore::data::labels::{make_labels, LabelConfig};
use eidcore::data::sample::Sample;
use eidcore::error::CoreError;
use serde::{Deserialize, Serialize};

use crate::data::catalog::ShardCatalog;
use crate::data::resolver::PlanEntry;
use crate::data::shard::ShardRead;
use crate::error::DataResult;

/// Stored track tensor, `[rows, tracks, attributes]`
pub const TRACKS_SOURCE: &str = "p_tracks";
pub const MAX_TRACK_ATTRIBUTES: usize = 13;
const ABS_TRACK_ATTRIBUTES: usize = 5;

/// Short names registered for stored fields, `(alias, source)`
pub const ALIASES: [(&str, &str); 6] = [
    ("eta", "p_eta"),
    ("pt", "p_et_calo"),
    ("mu", "averageInteractionsPerCrossing"),
    ("SCTHits", "p_numberOfSCTHits"),
    ("PixelHits", "p_numberOfPixelHits"),
    ("BLHits", "p_numberOfInnermostPixelHits"),
];

fn strings(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

/// Which fields a sample is assembled from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputSpec {
    pub scalars: Vec<String>,
    pub images: Vec<String>,
    pub others: Vec<String>,
    pub n_tracks: usize,
    pub preprocess_images: bool,
}

impl Default for InputSpec {
    fn default() -> Self {
        InputSpec {
            scalars: strings(&[
                "p_Eratio", "p_Reta", "p_Rhad", "p_Rhad1", "p_Rphi", "p_deltaPhiRescaled2", "p_ndof",
                "p_dPOverP", "p_deltaEta1", "p_f1", "p_f3", "p_sct_weight_charge", "p_weta2", "p_d0",
                "p_d0Sig", "p_qd0Sig", "p_nTracks", "p_numberOfSCTHits", "p_eta", "p_TRTPID", "p_EptRatio",
                "p_EoverP", "p_wtots1", "p_numberOfPixelHits", "p_charge", "p_et_calo", "p_cal_energy", "p_e",
                "p_numberOfInnermostPixelHits",
            ]),
            images: strings(&[
                "em_barrel_Lr0", "em_barrel_Lr1", "em_barrel_Lr2", "em_barrel_Lr3", "em_barrel_Lr1_fine",
                "tile_gap_Lr1", "em_endcap_Lr0", "em_endcap_Lr1", "em_endcap_Lr2", "em_endcap_Lr3",
                "em_endcap_Lr1_fine", "lar_endcap_Lr0", "lar_endcap_Lr1", "lar_endcap_Lr2", "lar_endcap_Lr3",
                "tile_barrel_Lr1", "tile_barrel_Lr2", "tile_barrel_Lr3",
            ]),
            others: strings(&[
                "mcChannelNumber", "eventNumber", "p_TruthType", "p_iffTruth", "p_TruthOrigin", "p_LHValue",
                "p_LHTight", "p_LHMedium", "p_LHLoose", "p_ECIDSResult", "p_vertexIndex", "p_charge",
                "p_topoetcone20", "p_ptvarcone30", "p_passWVeto", "p_passZVeto", "p_ambiguityType",
                "p_firstEgMotherPdgId", "p_firstEgMotherTruthType", "p_firstEgMotherTruthOrigin",
                "averageInteractionsPerCrossing", "p_passPreselection", "p_trigMatches_pTbin",
                "p_numberOfSCTHits", "p_numberOfPixelHits", "p_numberOfInnermostPixelHits", "p_eta",
                "p_et_calo",
            ]),
            n_tracks: 5,
            preprocess_images: false,
        }
    }
}

impl InputSpec {
    /// Scalar model inputs, without the virtual `tracks` field
    pub fn scalar_fields(&self) -> Vec<String> {
        self.scalars.iter().filter(|f| f.as_str() != TRACKS_FIELD).cloned().collect()
    }

    /// Calorimeter image fields, without the virtual `tracks` field
    pub fn image_fields(&self) -> Vec<String> {
        self.images.iter().filter(|f| f.as_str() != TRACKS_FIELD).cloned().collect()
    }

    pub fn wants_tracks(&self) -> bool {
        self.scalars.iter().chain(&self.images).any(|f| f == TRACKS_FIELD)
    }

    /// Every field fed to the model, in input order
    pub fn model_fields(&self) -> Vec<String> {
        let mut fields = self.scalar_fields();
        fields.extend(self.image_fields());
        if self.wants_tracks() {
            fields.push(TRACKS_FIELD.to_string());
        }
        fields
    }

    /// Keep only the fields present in `available`; `tracks` is always kept.
    pub fn restrict_to(&mut self, available: &[String]) {
        let keep = |f: &String| f == TRACKS_FIELD || available.contains(f);
        self.scalars.retain(keep);
        self.images.retain(keep);
        self.others.retain(|f| available.contains(f));
    }
}

/// Zero-fill shape of a missing image, from its name
pub fn placeholder_shape(field: &str) -> Vec<usize> {
    if field.contains("fine") {
        vec![56, 11]
    } else {
        vec![7, 11]
    }
}

// keep the first `n_tracks` slots and 13 attributes, zero-padding short tensors;
// the first five attributes are taken in absolute value
fn shape_tracks(column: Column, n_tracks: usize) -> DataResult<Column> {
    let (stored_tracks, stored_attrs) = match column.row_shape() {
        &[t, a] => (t, a),
        shape => {
            return Err(CoreError::SchemaMismatch(format!(
                "`{}` has row shape {:?}, expected [tracks, attributes]",
                TRACKS_SOURCE, shape
            ))
            .into())
        }
    };
    let n_attrs = stored_attrs.min(MAX_TRACK_ATTRIBUTES);
    let n_rows = column.n_rows();
    let values = column.to_f64_vec();

    let mut out = vec![0.0f32; n_rows * n_tracks * n_attrs];
    for row in 0..n_rows {
        for slot in 0..stored_tracks.min(n_tracks) {
            let src = (row * stored_tracks + slot) * stored_attrs;
            let dst = (row * n_tracks + slot) * n_attrs;
            for attr in 0..n_attrs {
                let value = values[src + attr] as f32;
                out[dst + attr] = if attr < ABS_TRACK_ATTRIBUTES { value.abs() } else { value };
            }
        }
    }
    Ok(Column::new(n_rows, vec![n_tracks, n_attrs], ColumnData::Float(out))?)
}

/// Build the record of rows `local` of one shard together with its labels.
///
/// # Arguments
///
/// * `shard` - open shard
/// * `local` - shard-local row range
/// * `spec` - requested fields
/// * `labels` - label derivation settings; the truth fields are read even when not requested
///
/// # Returns
///
/// * `(Sample, Vec<i8>)` - the record and one label per row
///
pub fn assemble<S: ShardRead>(
    shard: &S,
    local: Range<usize>,
    spec: &InputSpec,
    labels: &LabelConfig,
) -> DataResult<(Sample, Vec<i8>)> {
    let n_rows = local.len();
    let mut sample = Sample::new(n_rows);

    let mut direct: BTreeSet<&str> = spec
        .scalars
        .iter()
        .chain(&spec.others)
        .map(|f| f.as_str())
        .filter(|&f| f != TRACKS_FIELD)
        .collect();
    direct.extend(labels.required_fields());

    for field in direct {
        if shard.has_field(field) {
            sample.insert(field, shard.read_rows(field, local.start, local.end)?)?;
            continue;
        }
        // an alias requested by name is served from its stored source
        match ALIASES.iter().find(|(alias, _)| *alias == field) {
            Some((_, source)) if shard.has_field(source) => {
                if !sample.contains(source) {
                    sample.insert(source, shard.read_rows(source, local.start, local.end)?)?;
                }
            }
            _ => {
                return Err(CoreError::SchemaMismatch(format!(
                    "{} has no field `{}`",
                    shard.path().display(),
                    field
                ))
                .into())
            }
        }
    }

    for (alias, source) in ALIASES {
        sample.alias(alias, source);
    }

    for field in spec.image_fields() {
        let column = if shard.has_field(&field) {
            shard.read_rows(&field, local.start, local.end)?
        } else {
            log::debug!("{}: image `{}` missing, zero filled", shard.path().display(), field);
            Column::zeros(n_rows, placeholder_shape(&field))
        };
        sample.insert(&field, column)?;
    }

    if spec.wants_tracks() {
        if !shard.has_field(TRACKS_SOURCE) {
            return Err(CoreError::SchemaMismatch(format!(
                "{} has no `{}` column",
                shard.path().display(),
                TRACKS_SOURCE
            ))
            .into());
        }
        let stored = shard.read_rows(TRACKS_SOURCE, local.start, local.end)?;
        sample.insert(TRACKS_FIELD, shape_tracks(stored, spec.n_tracks)?)?;
    }

    let row_labels = make_labels(&sample, labels)?;

    if spec.preprocess_images {
        orient_images(&mut sample, &spec.image_fields())?;
    }

    Ok((sample, row_labels))
}

/// Open the shard of a plan entry and assemble its rows
pub fn assemble_entry(
    catalog: &ShardCatalog,
    entry: &PlanEntry,
    spec: &InputSpec,
    labels: &LabelConfig,
) -> DataResult<(Sample, Vec<i8>)> {
    let shard = catalog.open(entry.shard_id)?;
    assemble(&shard, entry.local.clone(), spec, labels)
}
