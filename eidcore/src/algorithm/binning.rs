use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

pub const N_PT_BINS: usize = 100;
pub const N_ETA_BINS: usize = 50;
const EDGE_MARGIN: f64 = 1e-3;

/// Which kinematic axes the weighting histograms resolve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistMode {
    #[default]
    #[serde(rename = "2d")]
    TwoD,
    Pt,
    Eta,
}

impl FromStr for HistMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "2d" => Ok(HistMode::TwoD),
            "pt" => Ok(HistMode::Pt),
            "eta" => Ok(HistMode::Eta),
            other => Err(CoreError::Configuration(format!("unknown histogram mode `{}`", other))),
        }
    }
}

impl Display for HistMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            HistMode::TwoD => "2d",
            HistMode::Pt => "pt",
            HistMode::Eta => "eta",
        };
        write!(f, "{}", name)
    }
}

/// Bin edges of the (pt, |eta|) grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinEdges {
    pub pt: Vec<f64>,
    pub eta: Vec<f64>,
}

impl BinEdges {
    /// Build edges from the kinematics of a sample.
    ///
    /// pt gets 100 logarithmic bins between its extremes, |eta| 50 linear bins of
    /// width `max / 50` starting at its minimum. The last edge of each axis is
    /// pushed just past the maximum so that every row lands inside the grid.
    ///
    /// # Arguments
    ///
    /// * `pt` - transverse energy per row, must be strictly positive
    /// * `abs_eta` - absolute pseudo-rapidity per row
    /// * `mode` - `TwoD`, or a marginal mode collapsing the other axis to one bin
    ///
    pub fn from_kinematics(pt: &[f64], abs_eta: &[f64], mode: HistMode) -> CoreResult<Self> {
        if pt.is_empty() || pt.len() != abs_eta.len() {
            return Err(CoreError::SchemaMismatch(format!(
                "cannot bin {} pt values against {} eta values",
                pt.len(),
                abs_eta.len()
            )));
        }

        let (pt_min, pt_max) = min_max(pt);
        if pt_min <= 0.0 || !pt_min.is_finite() {
            return Err(CoreError::Configuration(format!(
                "logarithmic pt binning needs positive values, minimum is {}",
                pt_min
            )));
        }
        let base = (pt_max / pt_min).powf(1.0 / N_PT_BINS as f64);
        let mut pt_edges: Vec<f64> = (0..=N_PT_BINS).map(|n| pt_min * base.powi(n as i32)).collect();
        close_last_edge(&mut pt_edges, pt_max);

        let (eta_min, eta_max) = min_max(abs_eta);
        let step = eta_max / N_ETA_BINS as f64;
        let mut eta_edges = if step > 0.0 {
            let stop = eta_max + step;
            let n = ((stop - eta_min) / step).ceil().max(1.0) as usize;
            (0..n).map(|i| eta_min + i as f64 * step).collect()
        } else {
            vec![eta_min, eta_max]
        };
        if eta_edges.len() < 2 {
            eta_edges.push(eta_max);
        }
        close_last_edge(&mut eta_edges, eta_max);

        match mode {
            HistMode::TwoD => {}
            HistMode::Pt => eta_edges = collapse(&eta_edges),
            HistMode::Eta => pt_edges = collapse(&pt_edges),
        }

        Ok(BinEdges { pt: pt_edges, eta: eta_edges })
    }

    pub fn n_pt(&self) -> usize {
        self.pt.len() - 1
    }

    pub fn n_eta(&self) -> usize {
        self.eta.len() - 1
    }

    pub fn n_bins(&self) -> usize {
        self.n_pt() * self.n_eta()
    }

    /// Flat bin index of one (pt, |eta|) pair
    pub fn locate(&self, pt: f64, abs_eta: f64) -> usize {
        digitize(pt, &self.pt) * self.n_eta() + digitize(abs_eta, &self.eta)
    }

    /// Flat bin index of every row
    pub fn assign(&self, pt: &[f64], abs_eta: &[f64]) -> Vec<usize> {
        pt.iter().zip(abs_eta).map(|(&p, &e)| self.locate(p, e)).collect()
    }
}

fn min_max(values: &[f64]) -> (f64, f64) {
    values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)))
}

fn close_last_edge(edges: &mut [f64], max: f64) {
    if let Some(last) = edges.last_mut() {
        *last = last.max(max) + EDGE_MARGIN;
    }
}

fn collapse(edges: &[f64]) -> Vec<f64> {
    vec![edges[0], edges[edges.len() - 1]]
}

/// Index of the bin `[e_i, e_{i+1})` holding `x`, clamped to the grid
pub fn digitize(x: f64, edges: &[f64]) -> usize {
    let n_bins = edges.len().saturating_sub(1);
    let above = edges.partition_point(|&e| e <= x);
    above.saturating_sub(1).min(n_bins.saturating_sub(1))
}
