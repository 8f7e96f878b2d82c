use std::collections::HashMap;
use std::fmt::Display;

use itertools::Itertools;

/// Number of rows per class id in `[0, n_classes)`; negative labels are not counted
pub fn class_counts(labels: &[i8], n_classes: usize) -> Vec<usize> {
    let counts: HashMap<i8, usize> = labels.iter().copied().filter(|&l| l >= 0).counts();
    (0..n_classes).map(|c| counts.get(&(c as i8)).copied().unwrap_or(0)).collect()
}

/// Share of every class in percent of the classified rows
pub fn class_fractions(labels: &[i8], n_classes: usize) -> Vec<f64> {
    let counts = class_counts(labels, n_classes);
    let total: usize = counts.iter().sum();
    counts
        .into_iter()
        .map(|n| if total == 0 { 0.0 } else { 100.0 * n as f64 / total as f64 })
        .collect()
}

/// Percentage of rows per (iffTruth, TruthType) pair, empty rows and columns removed
#[derive(Debug, Clone, PartialEq)]
pub struct CompositionTable {
    pub n_rows: usize,
    pub iff_values: Vec<i64>,
    pub truth_types: Vec<i64>,
    /// `percent[i][j]` for `iff_values[i]`, `truth_types[j]`
    pub percent: Vec<Vec<f64>>,
}

impl CompositionTable {
    pub fn iff_total(&self, i: usize) -> f64 {
        self.percent[i].iter().sum()
    }

    pub fn truth_type_total(&self, j: usize) -> f64 {
        self.percent.iter().map(|row| row[j]).sum()
    }
}

pub fn truth_composition(iff_truth: &[i64], truth_type: &[i64]) -> CompositionTable {
    let n_rows = iff_truth.len().min(truth_type.len());
    let counts: HashMap<(i64, i64), usize> = iff_truth.iter().copied().zip(truth_type.iter().copied()).counts();

    let iff_values: Vec<i64> = counts.keys().map(|&(iff, _)| iff).unique().sorted().collect();
    let truth_types: Vec<i64> = counts.keys().map(|&(_, tt)| tt).unique().sorted().collect();
    let percent = iff_values
        .iter()
        .map(|&iff| {
            truth_types
                .iter()
                .map(|&tt| {
                    let n = counts.get(&(iff, tt)).copied().unwrap_or(0);
                    100.0 * n as f64 / n_rows.max(1) as f64
                })
                .collect()
        })
        .collect();

    CompositionTable { n_rows, iff_values, truth_types, percent }
}

impl Display for CompositionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "iffTruth and TruthType composition ({} e)", self.n_rows)?;
        write!(f, "{:>10} |", "IFF \\ MC")?;
        for tt in &self.truth_types {
            write!(f, "{:>7}", tt)?;
        }
        writeln!(f, " |   Total")?;
        for (i, iff) in self.iff_values.iter().enumerate() {
            write!(f, "{:>10} |", iff)?;
            for value in &self.percent[i] {
                write!(f, "{:>7.2}", value)?;
            }
            writeln!(f, " | {:>7.2}", self.iff_total(i))?;
        }
        write!(f, "{:>10} |", "Total")?;
        for j in 0..self.truth_types.len() {
            write!(f, "{:>7.2}", self.truth_type_total(j))?;
        }
        write!(f, " |  100 %")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_counts_and_fractions() {
        let labels = vec![0, 1, 1, -1, 3, 3, 3, 3];
        assert_eq!(class_counts(&labels, 4), vec![1, 2, 0, 4]);
        let fractions = class_fractions(&labels, 4);
        assert!((fractions[3] - 4.0 / 7.0 * 100.0).abs() < 1e-12);
        assert_eq!(class_fractions(&[-1, -1], 2), vec![0.0, 0.0]);
    }

    #[test]
    fn test_truth_composition() {
        let iff = vec![2, 2, 2, 10, 10];
        let tt = vec![2, 2, 4, 17, 17];
        let table = truth_composition(&iff, &tt);
        assert_eq!(table.iff_values, vec![2, 10]);
        assert_eq!(table.truth_types, vec![2, 4, 17]);
        assert!((table.percent[0][0] - 40.0).abs() < 1e-12);
        assert!((table.iff_total(1) - 40.0).abs() < 1e-12);
        assert!((table.truth_type_total(1) - 20.0).abs() < 1e-12);
        assert!(table.to_string().contains("Total"));
    }
}
