use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::algorithm::binning::{BinEdges, HistMode};
use crate::data::column::Column;
use crate::data::labels::UNCLASSIFIED;
use crate::data::sample::Sample;
use crate::error::{CoreError, CoreResult};

/// How background class densities are matched against the reference class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightScheme {
    #[default]
    None,
    #[serde(rename = "bkg_ratio")]
    BkgRatio,
    #[serde(alias = "flat")]
    Flattening,
    Match2Class,
    Match2Max,
}

impl FromStr for WeightScheme {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(WeightScheme::None),
            "bkg_ratio" => Ok(WeightScheme::BkgRatio),
            "flattening" | "flat" => Ok(WeightScheme::Flattening),
            "match2class" => Ok(WeightScheme::Match2Class),
            "match2max" => Ok(WeightScheme::Match2Max),
            other => Err(CoreError::Configuration(format!("unknown weighting scheme `{}`", other))),
        }
    }
}

impl Display for WeightScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            WeightScheme::None => "none",
            WeightScheme::BkgRatio => "bkg_ratio",
            WeightScheme::Flattening => "flattening",
            WeightScheme::Match2Class => "match2class",
            WeightScheme::Match2Max => "match2max",
        };
        write!(f, "{}", name)
    }
}

/// Targeted background-to-reference ratio
#[derive(Debug, Clone, PartialEq, Default)]
pub enum TargetRatio {
    /// Ratio of the observed (floored) class totals
    #[default]
    Observed,
    /// One ratio for every background class
    Uniform(f64),
    /// Ratio indexed by class id
    PerClass(Vec<f64>),
}

impl TargetRatio {
    fn for_class(&self, class: usize, hist_ref: &[f64], hist_bkg: &[f64]) -> CoreResult<f64> {
        match self {
            TargetRatio::Observed => Ok(hist_bkg.iter().sum::<f64>() / hist_ref.iter().sum::<f64>()),
            TargetRatio::Uniform(r) => Ok(*r),
            TargetRatio::PerClass(ratios) => ratios.get(class).copied().ok_or_else(|| {
                CoreError::Configuration(format!("no target ratio given for class {}", class))
            }),
        }
    }
}

fn histogram(bins: &[usize], labels: &[i8], class: i8, n_bins: usize) -> Vec<f64> {
    let mut hist = vec![0.0; n_bins];
    for (&bin, _) in bins.iter().zip(labels).filter(|&(_, &label)| label == class) {
        hist[bin] += 1.0;
    }
    hist
}

// empty bins take the smallest non-zero count; an empty class is floored to 1
fn floor_empty_bins(hist: &mut [f64]) {
    let floor = hist
        .iter()
        .copied()
        .filter(|&v| v > 0.0)
        .min_by(|a, b| a.total_cmp(b))
        .unwrap_or(1.0);
    hist.iter_mut().for_each(|v| *v = v.max(floor));
}

fn max_of(values: &[f64]) -> f64 {
    values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

// target densities (reference, background) of one background class
fn class_targets(scheme: WeightScheme, hist_ref: &[f64], hist_bkg: &[f64], ratio: f64) -> (Vec<f64>, Vec<f64>) {
    match scheme {
        WeightScheme::BkgRatio => {
            let sum_ref: f64 = hist_ref.iter().sum();
            let sum_bkg: f64 = hist_bkg.iter().sum();
            let ref_scale = (sum_bkg / sum_ref / ratio).max(1.0);
            let bkg_scale = (sum_ref / sum_bkg * ratio).max(1.0);
            (
                hist_ref.iter().map(|h| h * ref_scale).collect(),
                hist_bkg.iter().map(|h| h * bkg_scale).collect(),
            )
        }
        WeightScheme::Flattening => {
            let max_ref = max_of(hist_ref);
            let max_bkg = max_of(hist_bkg);
            (
                vec![max_ref.max(max_bkg / ratio); hist_ref.len()],
                vec![max_bkg.max(max_ref * ratio); hist_bkg.len()],
            )
        }
        WeightScheme::Match2Class => {
            let peak: Vec<f64> = hist_bkg.iter().zip(hist_ref).map(|(b, r)| b / r).collect();
            let factor = (max_of(&peak) / ratio).max(1.0);
            (
                hist_ref.iter().map(|h| h * factor).collect(),
                hist_ref.iter().map(|h| h * factor * ratio).collect(),
            )
        }
        WeightScheme::Match2Max => (
            hist_ref.iter().zip(hist_bkg).map(|(r, b)| r.max(b / ratio)).collect(),
            hist_bkg.iter().zip(hist_ref).map(|(b, r)| b.max(r * ratio)).collect(),
        ),
        WeightScheme::None => (hist_ref.to_vec(), hist_bkg.to_vec()),
    }
}

fn normalize(weights: &mut [f32], n_rows: usize) {
    let total: f64 = weights.iter().map(|&w| w as f64).sum();
    if total > 0.0 {
        let scale = n_rows as f64 / total;
        weights.iter_mut().for_each(|w| *w = (*w as f64 * scale) as f32);
    }
}

/// Per-row weights from pre-computed bin assignments.
///
/// # Arguments
///
/// * `bins` - flat histogram bin of every row
/// * `labels` - class of every row, `-1` rows receive weight 0
/// * `n_bins` - number of histogram bins
/// * `scheme` - density matching policy
/// * `ratio` - targeted background-to-reference ratio
/// * `ref_class` - class the backgrounds are matched against
///
/// # Returns
///
/// * `None` for `WeightScheme::None`, otherwise weights summing to `labels.len()`
///
pub fn weights_from_bins(
    bins: &[usize],
    labels: &[i8],
    n_bins: usize,
    scheme: WeightScheme,
    ratio: &TargetRatio,
    ref_class: i8,
) -> CoreResult<Option<Vec<f32>>> {
    if scheme == WeightScheme::None {
        return Ok(None);
    }
    if bins.len() != labels.len() {
        return Err(CoreError::SchemaMismatch(format!(
            "{} bin assignments for {} labels",
            bins.len(),
            labels.len()
        )));
    }
    if let Some(&bad) = bins.iter().find(|&&b| b >= n_bins) {
        return Err(CoreError::SchemaMismatch(format!("bin {} outside a grid of {} bins", bad, n_bins)));
    }

    let n_classes = labels.iter().copied().max().map_or(0, |m| (m as i64 + 1).max(0) as usize);
    if n_classes < 2 {
        log::warn!("{} classes present, sample weights set to one", n_classes);
        let mut weights: Vec<f32> = labels.iter().map(|&l| if l == UNCLASSIFIED { 0.0 } else { 1.0 }).collect();
        normalize(&mut weights, labels.len());
        return Ok(Some(weights));
    }
    if ref_class < 0 || ref_class as usize >= n_classes {
        return Err(CoreError::Configuration(format!(
            "reference class {} outside [0, {})",
            ref_class, n_classes
        )));
    }
    let ref_class = ref_class as usize;

    let hists: Vec<Vec<f64>> = (0..n_classes)
        .into_par_iter()
        .map(|class| {
            let mut hist = histogram(bins, labels, class as i8, n_bins);
            floor_empty_bins(&mut hist);
            hist
        })
        .collect();

    let hist_ref = &hists[ref_class];
    let mut ref_totals: Vec<(usize, Vec<f64>)> = Vec::with_capacity(n_classes - 1);
    let mut bkg_totals: Vec<(usize, Vec<f64>)> = Vec::with_capacity(n_classes - 1);
    for class in (0..n_classes).filter(|&c| c != ref_class) {
        let r = ratio.for_class(class, hist_ref, &hists[class])?;
        let (total_ref, total_bkg) = class_targets(scheme, hist_ref, &hists[class], r);
        ref_totals.push((class, total_ref));
        bkg_totals.push((class, total_bkg));
    }

    // the reference target is the largest request across backgrounds, each
    // background target is scaled up by the same factor its request was
    let ref_target: Vec<f64> = (0..n_bins)
        .map(|b| ref_totals.iter().map(|(_, t)| t[b]).fold(f64::NEG_INFINITY, f64::max))
        .collect();

    let mut tables: Vec<Vec<f64>> = vec![Vec::new(); n_classes];
    tables[ref_class] = ref_target.iter().zip(hist_ref).map(|(t, h)| t / h).collect();
    for ((class, total_ref), (_, total_bkg)) in ref_totals.iter().zip(&bkg_totals) {
        tables[*class] = (0..n_bins)
            .map(|b| total_bkg[b] * ref_target[b] / total_ref[b] / hists[*class][b])
            .collect();
    }

    let mut weights: Vec<f32> = bins
        .iter()
        .zip(labels)
        .map(|(&bin, &label)| if label < 0 { 0.0 } else { tables[label as usize][bin] as f32 })
        .collect();
    normalize(&mut weights, labels.len());

    Ok(Some(weights))
}

fn kinematic_field<'a>(sample: &'a Sample, names: &[&str]) -> CoreResult<&'a Column> {
    let column = names
        .iter()
        .find_map(|name| sample.get(name))
        .ok_or_else(|| CoreError::SchemaMismatch(format!("weighting needs one of the fields {:?}", names)))?;
    if !column.is_scalar() {
        return Err(CoreError::SchemaMismatch(format!("weighting field {:?} is not a scalar", names)));
    }
    Ok(column)
}

/// Density-matching sample weights over the (pt, |eta|) plane.
///
/// Reads `pt` (falling back to `p_et_calo`) and `eta` (falling back to `p_eta`).
/// Returns the weights together with the bin edges they were computed on.
pub fn compute_weights(
    sample: &Sample,
    labels: &[i8],
    scheme: WeightScheme,
    ratio: &TargetRatio,
    mode: HistMode,
    ref_class: i8,
) -> CoreResult<Option<(Vec<f32>, BinEdges)>> {
    if scheme == WeightScheme::None || labels.is_empty() {
        return Ok(None);
    }

    let pt = kinematic_field(sample, &["pt", "p_et_calo"])?.to_f64_vec();
    let eta: Vec<f64> = kinematic_field(sample, &["eta", "p_eta"])?
        .to_f64_vec()
        .into_iter()
        .map(f64::abs)
        .collect();

    let edges = BinEdges::from_kinematics(&pt, &eta, mode)?;
    let bins = edges.assign(&pt, &eta);
    let weights = weights_from_bins(&bins, labels, edges.n_bins(), scheme, ratio, ref_class)?;

    log::info!("{} sample weights computed on a {} x {} grid", scheme, edges.n_pt(), edges.n_eta());
    Ok(weights.map(|w| (w, edges)))
}

/// Per-class loss weights: class 0 has ratio 1, every other class `bkg_ratio`.
///
/// Returns `None` for a binary problem without a requested ratio. Classes
/// without any row are left out.
pub fn class_weights(labels: &[i8], bkg_ratio: f64) -> Option<BTreeMap<i8, f64>> {
    let n_classes = labels.iter().copied().max().map_or(0, |m| (m as i64 + 1).max(0) as usize);
    if n_classes == 0 || (bkg_ratio == 0.0 && n_classes == 2) {
        return None;
    }
    let bkg_ratio = if bkg_ratio == 0.0 { 1.0 } else { bkg_ratio };
    let ratio_sum = 1.0 + (n_classes - 1) as f64 * bkg_ratio;

    let mut weights = BTreeMap::new();
    for class in 0..n_classes {
        let count = labels.iter().filter(|&&l| l as i64 == class as i64).count();
        if count == 0 {
            continue;
        }
        let ratio = if class == 0 { 1.0 } else { bkg_ratio };
        weights.insert(class as i8, labels.len() as f64 / count as f64 * ratio / ratio_sum);
    }
    Some(weights)
}

/// Place the weights of surviving rows back at their global positions.
///
/// # Arguments
///
/// * `total_len` - length of the returned vector
/// * `offset` - global index of the first row of the loaded interval
/// * `indices` - position of each surviving row relative to `offset`
/// * `weights` - one weight per surviving row
///
/// # Returns
///
/// * a zero vector of `total_len` holding `weights[k]` at `offset + indices[k]`
///
pub fn scatter_weights(total_len: usize, offset: usize, indices: &[usize], weights: &[f32]) -> CoreResult<Vec<f32>> {
    if indices.len() != weights.len() {
        return Err(CoreError::WeightsTooShort { needed: indices.len(), got: weights.len() });
    }
    let mut out = vec![0.0f32; total_len];
    for (&index, &weight) in indices.iter().zip(weights) {
        let position = offset + index;
        if position >= total_len {
            return Err(CoreError::Index { lo: position, hi: position + 1, total: total_len });
        }
        out[position] = weight;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    // reference rows spread [10, 10, 10] over three bins, background [100, 10, 1]
    fn two_class_rows() -> (Vec<usize>, Vec<i8>) {
        let mut bins = Vec::new();
        let mut labels = Vec::new();
        for (bin, (n_ref, n_bkg)) in [(10, 100), (10, 10), (10, 1)].into_iter().enumerate() {
            bins.extend(std::iter::repeat(bin).take(n_ref + n_bkg));
            labels.extend(std::iter::repeat(0i8).take(n_ref));
            labels.extend(std::iter::repeat(1i8).take(n_bkg));
        }
        (bins, labels)
    }

    fn weighted_hist(bins: &[usize], labels: &[i8], weights: &[f32], class: i8) -> Vec<f64> {
        let mut hist = vec![0.0; 3];
        for ((&b, &l), &w) in bins.iter().zip(labels).zip(weights) {
            if l == class {
                hist[b] += w as f64;
            }
        }
        hist
    }

    #[test]
    fn test_flattening_equalizes_both_classes() {
        let (bins, labels) = two_class_rows();
        let weights = weights_from_bins(&bins, &labels, 3, WeightScheme::Flattening, &TargetRatio::Uniform(1.0), 0)
            .unwrap()
            .unwrap();

        let total: f64 = weights.iter().map(|&w| w as f64).sum();
        assert!((total - labels.len() as f64).abs() < 1e-3);

        let k = labels.len() as f64 / 600.0;
        for class in [0, 1] {
            for value in weighted_hist(&bins, &labels, &weights, class) {
                assert!((value - 100.0 * k).abs() < 1e-3, "{}", value);
            }
        }

        let first_ref = labels.iter().position(|&l| l == 0).unwrap();
        assert!((weights[first_ref] as f64 - 10.0 * k).abs() < 1e-5);
    }

    #[test]
    fn test_every_scheme_sums_to_row_count() {
        let (bins, mut labels) = two_class_rows();
        labels[5] = 2;
        labels[50] = 2;
        for scheme in [WeightScheme::BkgRatio, WeightScheme::Flattening, WeightScheme::Match2Class, WeightScheme::Match2Max] {
            for ratio in [TargetRatio::Observed, TargetRatio::Uniform(2.0), TargetRatio::PerClass(vec![1.0, 0.5, 3.0])] {
                let weights = weights_from_bins(&bins, &labels, 3, scheme, &ratio, 0).unwrap().unwrap();
                let total: f64 = weights.iter().map(|&w| w as f64).sum();
                assert!((total - labels.len() as f64).abs() < 1e-2, "{} {:?}: {}", scheme, ratio, total);
                assert!(weights.iter().all(|&w| w > 0.0 && w.is_finite()));
            }
        }
    }

    #[test]
    fn test_match2max_keeps_the_denser_class() {
        let (bins, labels) = two_class_rows();
        let weights = weights_from_bins(&bins, &labels, 3, WeightScheme::Match2Max, &TargetRatio::Uniform(1.0), 0)
            .unwrap()
            .unwrap();
        let ref_hist = weighted_hist(&bins, &labels, &weights, 0);
        let bkg_hist = weighted_hist(&bins, &labels, &weights, 1);
        for (r, b) in ref_hist.iter().zip(&bkg_hist) {
            assert!((r - b).abs() < 1e-3);
        }
    }

    #[test]
    fn test_none_scheme_and_single_class() {
        let (bins, labels) = two_class_rows();
        assert!(weights_from_bins(&bins, &labels, 3, WeightScheme::None, &TargetRatio::Observed, 0)
            .unwrap()
            .is_none());

        let zeros = vec![0i8; bins.len()];
        let weights = weights_from_bins(&bins, &zeros, 3, WeightScheme::Flattening, &TargetRatio::Observed, 0)
            .unwrap()
            .unwrap();
        assert!(weights.iter().all(|&w| (w - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_unclassified_rows_get_zero_weight() {
        let (bins, mut labels) = two_class_rows();
        labels[0] = -1;
        let weights = weights_from_bins(&bins, &labels, 3, WeightScheme::Match2Max, &TargetRatio::Observed, 0)
            .unwrap()
            .unwrap();
        assert_eq!(weights[0], 0.0);
    }

    #[test]
    fn test_bad_reference_class() {
        let (bins, labels) = two_class_rows();
        let result = weights_from_bins(&bins, &labels, 3, WeightScheme::BkgRatio, &TargetRatio::Observed, 4);
        assert!(matches!(result, Err(CoreError::Configuration(_))));
    }

    #[test]
    fn test_scheme_names() {
        assert_eq!("flat".parse::<WeightScheme>().unwrap(), WeightScheme::Flattening);
        assert_eq!("Match2Max".parse::<WeightScheme>().unwrap(), WeightScheme::Match2Max);
        assert!(matches!("balanced".parse::<WeightScheme>(), Err(CoreError::Configuration(_))));
    }

    #[test]
    fn test_compute_weights_on_sample() {
        let n = 200;
        let mut sample = Sample::new(n);
        sample
            .insert("p_et_calo", Column::from_f32((0..n).map(|i| 5.0 + i as f32).collect()))
            .unwrap();
        sample
            .insert("eta", Column::from_f32((0..n).map(|i| (i as f32 * 0.37) % 2.4 - 1.2).collect()))
            .unwrap();
        let labels: Vec<i8> = (0..n).map(|i| if i % 3 == 0 { 0 } else { 1 }).collect();

        let (weights, edges) =
            compute_weights(&sample, &labels, WeightScheme::BkgRatio, &TargetRatio::Observed, HistMode::Pt, 0)
                .unwrap()
                .unwrap();
        assert_eq!(weights.len(), n);
        assert_eq!(edges.n_eta(), 1);
        let total: f64 = weights.iter().map(|&w| w as f64).sum();
        assert!((total - n as f64).abs() < 1e-2);
    }

    #[test]
    fn test_class_weights() {
        let labels = vec![0, 0, 0, 1, 2, 2];
        let weights = class_weights(&labels, 2.0).unwrap();
        assert!((weights[&0] - 6.0 / 3.0 * 1.0 / 5.0).abs() < 1e-12);
        assert!((weights[&1] - 6.0 / 1.0 * 2.0 / 5.0).abs() < 1e-12);
        assert!(class_weights(&[0, 1, 1], 0.0).is_none());
    }

    #[test]
    fn test_scatter_weights() {
        let out = scatter_weights(10, 4, &[0, 2, 5], &[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(out, vec![0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 2.0, 0.0, 0.0, 3.0]);
        assert!(scatter_weights(5, 4, &[2], &[1.0]).is_err());
        assert!(scatter_weights(5, 0, &[0, 1], &[1.0]).is_err());
    }
}
