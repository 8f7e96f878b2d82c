use std::fmt::Display;

use crate::algorithm::predicate::RowPredicate;
use crate::data::labels::UNCLASSIFIED;
use crate::data::sample::Sample;
use crate::error::{CoreError, CoreResult, PredicateError};

/// Row counts at each stage of a filter pass, returned to the caller for logging
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterReport {
    pub rows_in: usize,
    pub after_labels: usize,
    pub rows_out: usize,
    /// Predicates that could not be evaluated, with the reason
    pub skipped: Vec<(String, String)>,
}

impl FilterReport {
    /// Add the counts of another report; skipped cuts are listed once
    pub fn merge(&mut self, other: FilterReport) {
        self.rows_in += other.rows_in;
        self.after_labels += other.after_labels;
        self.rows_out += other.rows_out;
        for entry in other.skipped {
            if !self.skipped.contains(&entry) {
                self.skipped.push(entry);
            }
        }
    }
}

impl Display for FilterReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "rows in: {}, after label cut: {}, after cuts: {}, skipped cuts: {}",
            self.rows_in,
            self.after_labels,
            self.rows_out,
            self.skipped.len()
        )
    }
}

/// Row-filtered sample with its aligned labels and weights
#[derive(Debug, Clone)]
pub struct Filtered {
    pub sample: Sample,
    pub labels: Vec<i8>,
    pub weights: Option<Vec<f32>>,
    /// Positions of the surviving rows in the input sample
    pub kept_rows: Vec<usize>,
    pub report: FilterReport,
}

fn evaluate_checked(predicate: &dyn RowPredicate, sample: &Sample) -> Result<Vec<bool>, PredicateError> {
    let mask = predicate.evaluate(sample)?;
    if mask.len() != sample.len() {
        return Err(PredicateError::Length { expected: sample.len(), got: mask.len() });
    }
    Ok(mask)
}

/// Drop unclassifiable rows, then apply every predicate as a logical AND.
///
/// A predicate that fails to evaluate is skipped with a warning. Labels,
/// weights and every field of the sample are filtered with the same mask.
///
/// # Arguments
///
/// * `sample` - record to filter
/// * `labels` - one label per row, `-1` rows are always removed
/// * `weights` - optional per-row weights
/// * `predicates` - row predicates evaluated on the label-filtered sample
///
/// # Returns
///
/// * `Filtered` - filtered copies plus the stage report
///
pub fn apply_row_filter(
    sample: &Sample,
    labels: &[i8],
    weights: Option<&[f32]>,
    predicates: &[Box<dyn RowPredicate>],
) -> CoreResult<Filtered> {
    if labels.len() != sample.len() {
        return Err(CoreError::SchemaMismatch(format!(
            "{} labels for a sample of {} rows",
            labels.len(),
            sample.len()
        )));
    }
    if let Some(w) = weights {
        if w.len() != sample.len() {
            return Err(CoreError::SchemaMismatch(format!(
                "{} weights for a sample of {} rows",
                w.len(),
                sample.len()
            )));
        }
    }

    let mut report = FilterReport { rows_in: sample.len(), ..FilterReport::default() };

    let mut kept_rows: Vec<usize> = labels
        .iter()
        .enumerate()
        .filter(|&(_, &label)| label != UNCLASSIFIED)
        .map(|(i, _)| i)
        .collect();
    let mut current = sample.take_rows(&kept_rows)?;
    report.after_labels = current.len();

    if !predicates.is_empty() && !current.is_empty() {
        let mut mask = vec![true; current.len()];
        for predicate in predicates {
            match evaluate_checked(predicate.as_ref(), &current) {
                Ok(rows) => mask.iter_mut().zip(rows).for_each(|(m, keep)| *m &= keep),
                Err(e) => {
                    log::warn!("cut `{}` skipped: {}", predicate.describe(), e);
                    report.skipped.push((predicate.describe(), e.to_string()));
                }
            }
        }
        current = current.filter_rows(&mask)?;
        kept_rows = kept_rows
            .into_iter()
            .zip(mask)
            .filter(|&(_, keep)| keep)
            .map(|(row, _)| row)
            .collect();
    }

    report.rows_out = current.len();
    let labels = kept_rows.iter().map(|&row| labels[row]).collect();
    let weights = weights.map(|w| kept_rows.iter().map(|&row| w[row]).collect());

    Ok(Filtered { sample: current, labels, weights, kept_rows, report })
}
