use bincode::{Decode, Encode};
use rayon::prelude::*;
use statrs::distribution::{ContinuousCDF, Normal};

use crate::data::column::{Column, ColumnData};
use crate::data::sample::Sample;
use crate::error::{CoreError, CoreResult};

pub const DEFAULT_N_QUANTILES: usize = 10_000;
pub const TRACKS_FIELD: &str = "tracks";

const BOUNDS_THRESHOLD: f64 = 1e-7;

/// Percentile of sorted values with linear interpolation between closest ranks
fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.len() == 1 {
        return sorted[0];
    }
    let position = q * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = (lower + 1).min(sorted.len() - 1);
    let fraction = position - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}

/// Piecewise-linear interpolation, constant outside `xp`; `xp` must be non-decreasing
fn interp(x: f64, xp: &[f64], fp: &[f64]) -> f64 {
    let i = xp.partition_point(|&v| v <= x);
    if i == 0 {
        return fp[0];
    }
    if i == xp.len() {
        return fp[fp.len() - 1];
    }
    let (x0, x1) = (xp[i - 1], xp[i]);
    if x1 == x0 {
        return fp[i - 1];
    }
    fp[i - 1] + (fp[i] - fp[i - 1]) * (x - x0) / (x1 - x0)
}

fn sorted_values(column: &Column) -> Vec<f64> {
    let mut values: Vec<f64> = column.to_f64_vec().into_iter().filter(|v| v.is_finite()).collect();
    values.sort_unstable_by(|a, b| a.total_cmp(b));
    values
}

fn scalar_column<'a>(sample: &'a Sample, field: &str) -> CoreResult<&'a Column> {
    let column = sample
        .get(field)
        .ok_or_else(|| CoreError::SchemaMismatch(format!("sample has no field `{}` to scale", field)))?;
    if !column.is_scalar() {
        return Err(CoreError::SchemaMismatch(format!(
            "field `{}` has row shape {:?}, only scalars are quantile transformed",
            field,
            column.row_shape()
        )));
    }
    Ok(column)
}

/// Maps every scalar field onto a standard normal through its empirical quantiles.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct QuantileScaler {
    fields: Vec<String>,
    references: Vec<f64>,
    quantiles: Vec<Vec<f64>>,
}

impl QuantileScaler {
    /// Fit on the scalar fields of a training sample.
    ///
    /// # Arguments
    ///
    /// * `sample` - training sample
    /// * `fields` - fields to fit, `tracks` is ignored
    /// * `n_quantiles` - number of reference quantiles, capped by the row count
    ///
    /// # Returns
    ///
    /// * `QuantileScaler` - immutable fitted scaler
    ///
    pub fn fit(sample: &Sample, fields: &[String], n_quantiles: usize) -> CoreResult<Self> {
        let fields: Vec<String> = fields.iter().filter(|f| f.as_str() != TRACKS_FIELD).cloned().collect();
        if sample.is_empty() {
            return Err(CoreError::Configuration("cannot fit a scaler on an empty sample".to_string()));
        }
        let n_quantiles = n_quantiles.min(sample.len()).max(1);
        let references: Vec<f64> = if n_quantiles == 1 {
            vec![0.0]
        } else {
            (0..n_quantiles).map(|i| i as f64 / (n_quantiles - 1) as f64).collect()
        };

        let quantiles = fields
            .par_iter()
            .map(|field| {
                let sorted = sorted_values(scalar_column(sample, field)?);
                if sorted.is_empty() {
                    return Err(CoreError::SchemaMismatch(format!("field `{}` holds no finite value", field)));
                }
                let mut quantiles: Vec<f64> = references.iter().map(|&q| percentile(&sorted, q)).collect();
                // interpolation rounding must not break monotonicity
                for i in 1..quantiles.len() {
                    quantiles[i] = quantiles[i].max(quantiles[i - 1]);
                }
                Ok(quantiles)
            })
            .collect::<CoreResult<Vec<_>>>()?;

        log::info!("quantile scaler fitted on {} fields with {} quantiles", fields.len(), n_quantiles);
        Ok(QuantileScaler { fields, references, quantiles })
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn n_quantiles(&self) -> usize {
        self.references.len()
    }

    /// Fail unless `fields` (ignoring `tracks`) is the fitted field set
    pub fn check_fields(&self, fields: &[String]) -> CoreResult<()> {
        let mut requested: Vec<&str> = fields.iter().map(|f| f.as_str()).filter(|&f| f != TRACKS_FIELD).collect();
        let mut fitted: Vec<&str> = self.fields.iter().map(|f| f.as_str()).collect();
        requested.sort_unstable();
        fitted.sort_unstable();
        if requested != fitted {
            return Err(CoreError::SchemaMismatch(format!(
                "scaler was fitted on {:?}, requested {:?}",
                fitted, requested
            )));
        }
        Ok(())
    }

    fn transform_column(&self, column: &Column, quantiles: &[f64], normal: &Normal) -> Column {
        let (lower, upper) = (quantiles[0], quantiles[quantiles.len() - 1]);
        let bounds = (BOUNDS_THRESHOLD - f64::EPSILON, 1.0 - (BOUNDS_THRESHOLD - f64::EPSILON));
        let reversed_q: Vec<f64> = quantiles.iter().rev().map(|q| -q).collect();
        let reversed_r: Vec<f64> = self.references.iter().rev().map(|r| -r).collect();

        let values: Vec<f32> = column
            .to_f64_vec()
            .into_iter()
            .map(|x| {
                if x.is_nan() {
                    return f32::NAN;
                }
                let p = if x - BOUNDS_THRESHOLD < lower {
                    0.0
                } else if x + BOUNDS_THRESHOLD > upper {
                    1.0
                } else {
                    // average of the interpolation from both ends, so that repeated
                    // quantile values map to the middle of their reference span
                    let forward = interp(x, quantiles, &self.references);
                    let backward = interp(-x, &reversed_q, &reversed_r);
                    0.5 * (forward - backward)
                };
                normal.inverse_cdf(p.clamp(bounds.0, bounds.1)) as f32
            })
            .collect();
        Column::from_f32(values)
    }

    /// Transform the fitted fields of `sample` in place.
    ///
    /// `fields` is the scalar list the sample was assembled with and must match
    /// the fitted one. Not idempotent.
    pub fn apply(&self, sample: &mut Sample, fields: &[String]) -> CoreResult<()> {
        self.check_fields(fields)?;
        let normal = Normal::new(0.0, 1.0).map_err(|e| CoreError::Configuration(e.to_string()))?;

        let source: &Sample = sample;
        let transformed = self
            .fields
            .par_iter()
            .zip(self.quantiles.par_iter())
            .map(|(field, quantiles)| {
                let column = scalar_column(source, field)?;
                Ok((field.as_str(), self.transform_column(column, quantiles, &normal)))
            })
            .collect::<CoreResult<Vec<_>>>()?;

        for (field, column) in transformed {
            sample.insert(field, column)?;
        }
        Ok(())
    }
}

/// Per-attribute median / inter-quartile-range scaling of the track tensor
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct TrackScaler {
    field: String,
    center: Vec<f64>,
    scale: Vec<f64>,
}

impl TrackScaler {
    /// Fit on a `[rows, n_tracks, n_attributes]` field, pooling every (row, track) pair
    pub fn fit(sample: &Sample, field: &str) -> CoreResult<Self> {
        let column = sample
            .get(field)
            .ok_or_else(|| CoreError::SchemaMismatch(format!("sample has no track field `{}`", field)))?;
        let n_attrs = match column.row_shape() {
            [_, n_attrs] if *n_attrs > 0 => *n_attrs,
            shape => {
                return Err(CoreError::SchemaMismatch(format!(
                    "track field `{}` has row shape {:?}, expected [tracks, attributes]",
                    field, shape
                )))
            }
        };
        let values = column.to_f64_vec();
        if values.is_empty() {
            return Err(CoreError::Configuration(format!("track field `{}` is empty", field)));
        }

        let stats: Vec<(f64, f64)> = (0..n_attrs)
            .into_par_iter()
            .map(|attr| {
                let mut pooled: Vec<f64> = values.iter().skip(attr).step_by(n_attrs).copied().collect();
                pooled.sort_unstable_by(|a, b| a.total_cmp(b));
                let median = percentile(&pooled, 0.5);
                let iqr = percentile(&pooled, 0.75) - percentile(&pooled, 0.25);
                (median, if iqr == 0.0 { 1.0 } else { iqr })
            })
            .collect();

        let (center, scale) = stats.into_iter().unzip();
        Ok(TrackScaler { field: field.to_string(), center, scale })
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn n_attributes(&self) -> usize {
        self.center.len()
    }

    /// Centre and scale the track field in place
    pub fn apply(&self, sample: &mut Sample) -> CoreResult<()> {
        let n_attrs = self.n_attributes();
        let field = self.field.clone();
        sample.update(&field, |column| {
            if n_attrs == 0 || column.row_shape().last() != Some(&n_attrs) {
                return Err(CoreError::SchemaMismatch(format!(
                    "track scaler fitted on {} attributes, field `{}` has row shape {:?}",
                    n_attrs,
                    field,
                    column.row_shape()
                )));
            }
            let n_rows = column.n_rows();
            let shape = column.row_shape().to_vec();
            let mut values = match column.into_data() {
                ColumnData::Float(values) => values,
                ColumnData::Int(values) => values.into_iter().map(|v| v as f32).collect(),
            };
            values.par_chunks_mut(n_attrs).for_each(|track| {
                for (attr, value) in track.iter_mut().enumerate() {
                    *value = ((*value as f64 - self.center[attr]) / self.scale[attr]) as f32;
                }
            });
            Column::new(n_rows, shape, ColumnData::Float(values))
        })
    }
}

/// Scalers applied after selection
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScalerSet {
    pub scalars: Option<QuantileScaler>,
    pub tracks: Option<TrackScaler>,
}

impl ScalerSet {
    pub fn is_empty(&self) -> bool {
        self.scalars.is_none() && self.tracks.is_none()
    }

    /// Apply every configured scaler; empty samples are left untouched
    pub fn apply(&self, sample: &mut Sample, scalar_fields: &[String]) -> CoreResult<()> {
        if sample.is_empty() {
            return Ok(());
        }
        if let Some(scaler) = &self.scalars {
            scaler.apply(sample, scalar_fields)?;
        }
        if let Some(scaler) = &self.tracks {
            scaler.apply(sample)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skewed_sample(n: usize) -> Sample {
        let mut sample = Sample::new(n);
        // exponential-like and integer-valued inputs
        let et: Vec<f32> = (0..n).map(|i| (-(1.0 - (i as f32 + 0.5) / n as f32).ln()) * 20.0).collect();
        let hits: Vec<i64> = (0..n).map(|i| (i % 9) as i64).collect();
        sample.insert("p_et_calo", Column::from_f32(et)).unwrap();
        sample.insert("p_numberOfSCTHits", Column::from_i64(hits)).unwrap();
        sample
    }

    fn fields() -> Vec<String> {
        vec!["p_et_calo".to_string(), "tracks".to_string()]
    }

    fn mean_var(values: &[f32]) -> (f64, f64) {
        let n = values.len() as f64;
        let mean = values.iter().map(|&v| v as f64).sum::<f64>() / n;
        let var = values.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n;
        (mean, var)
    }

    #[test]
    fn test_percentile_and_interp() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        assert!((percentile(&sorted, 0.5) - 2.5).abs() < 1e-12);
        assert_eq!(percentile(&sorted, 1.0), 4.0);
        assert_eq!(interp(0.0, &[1.0, 2.0], &[0.0, 1.0]), 0.0);
        assert!((interp(1.25, &[1.0, 2.0], &[0.0, 1.0]) - 0.25).abs() < 1e-12);
        assert_eq!(interp(3.0, &[1.0, 2.0], &[0.0, 1.0]), 1.0);
    }

    #[test]
    fn test_quantile_scaler_normalizes_its_reference() {
        let mut sample = skewed_sample(5000);
        let scaler = QuantileScaler::fit(&sample, &fields(), DEFAULT_N_QUANTILES).unwrap();
        assert_eq!(scaler.fields(), &["p_et_calo".to_string()]);
        assert_eq!(scaler.n_quantiles(), 5000);

        scaler.apply(&mut sample, &fields()).unwrap();
        let (mean, var) = mean_var(sample.get("p_et_calo").unwrap().as_f32().unwrap());
        assert!(mean.abs() < 0.1, "mean {}", mean);
        assert!((var - 1.0).abs() < 0.1, "variance {}", var);

        // untouched field keeps its integer storage
        assert!(sample.get("p_numberOfSCTHits").unwrap().as_i64().is_some());
    }

    #[test]
    fn test_quantile_scaler_is_not_idempotent() {
        let mut sample = skewed_sample(1000);
        let scaler = QuantileScaler::fit(&sample, &fields(), 100).unwrap();
        scaler.apply(&mut sample, &fields()).unwrap();
        let once = sample.get("p_et_calo").unwrap().as_f32().unwrap().to_vec();
        scaler.apply(&mut sample, &fields()).unwrap();
        let twice = sample.get("p_et_calo").unwrap().as_f32().unwrap();
        assert!(once.iter().zip(twice).any(|(a, b)| (a - b).abs() > 1e-3));
    }

    #[test]
    fn test_quantile_scaler_output_is_bounded() {
        let mut sample = skewed_sample(200);
        let scaler = QuantileScaler::fit(&sample, &fields(), 50).unwrap();
        let mut far = Sample::new(2);
        far.insert("p_et_calo", Column::from_f32(vec![-1e6, 1e6])).unwrap();
        scaler.apply(&mut far, &fields()).unwrap();
        let values = far.get("p_et_calo").unwrap().as_f32().unwrap();
        assert!(values[0] < -5.0 && values[0].is_finite());
        assert!(values[1] > 5.0 && values[1].is_finite());
        assert!((values[0] + values[1]).abs() < 1e-3);

        scaler.apply(&mut sample, &fields()).unwrap();
    }

    #[test]
    fn test_quantile_scaler_field_mismatch() {
        let mut sample = skewed_sample(100);
        let scaler = QuantileScaler::fit(&sample, &fields(), 10).unwrap();
        let other = vec!["p_et_calo".to_string(), "p_numberOfSCTHits".to_string()];
        assert!(matches!(scaler.apply(&mut sample, &other), Err(CoreError::SchemaMismatch(_))));

        let mut missing = Sample::new(1);
        missing.insert("pt", Column::from_f32(vec![1.0])).unwrap();
        assert!(matches!(scaler.apply(&mut missing, &fields()), Err(CoreError::SchemaMismatch(_))));
    }

    fn track_sample() -> Sample {
        // 4 rows, 2 tracks, 2 attributes; attribute 1 constant
        let values = vec![
            1.0, 5.0, 2.0, 5.0, //
            3.0, 5.0, 4.0, 5.0, //
            5.0, 5.0, 6.0, 5.0, //
            7.0, 5.0, 8.0, 5.0,
        ];
        let mut sample = Sample::new(4);
        sample.insert(TRACKS_FIELD, Column::new(4, vec![2, 2], ColumnData::Float(values)).unwrap()).unwrap();
        sample
    }

    #[test]
    fn test_track_scaler_median_and_iqr() {
        let mut sample = track_sample();
        let scaler = TrackScaler::fit(&sample, TRACKS_FIELD).unwrap();
        assert_eq!(scaler.n_attributes(), 2);
        assert!((scaler.center[0] - 4.5).abs() < 1e-12);
        assert!((scaler.scale[0] - 3.5).abs() < 1e-12);
        assert_eq!(scaler.scale[1], 1.0);

        scaler.apply(&mut sample).unwrap();
        let values = sample.get(TRACKS_FIELD).unwrap().as_f32().unwrap();
        assert!((values[0] - (1.0 - 4.5) / 3.5).abs() < 1e-6);
        assert_eq!(values[1], 0.0);
    }

    #[test]
    fn test_track_scaler_attribute_mismatch() {
        let scaler = TrackScaler::fit(&track_sample(), TRACKS_FIELD).unwrap();
        let mut sample = Sample::new(1);
        sample.insert(TRACKS_FIELD, Column::zeros(1, vec![2, 3])).unwrap();
        assert!(matches!(scaler.apply(&mut sample), Err(CoreError::SchemaMismatch(_))));
    }

    #[test]
    fn test_track_scaler_needs_attributes() {
        let mut sample = Sample::new(2);
        sample.insert(TRACKS_FIELD, Column::zeros(2, vec![3, 0])).unwrap();
        assert!(matches!(TrackScaler::fit(&sample, TRACKS_FIELD), Err(CoreError::SchemaMismatch(_))));

        let empty = TrackScaler { field: TRACKS_FIELD.to_string(), center: vec![], scale: vec![] };
        assert!(matches!(empty.apply(&mut sample), Err(CoreError::SchemaMismatch(_))));
    }

    #[test]
    fn test_scaler_set_skips_empty_samples() {
        let sample = skewed_sample(100);
        let set = ScalerSet {
            scalars: Some(QuantileScaler::fit(&sample, &fields(), 10).unwrap()),
            tracks: None,
        };
        let mut empty = Sample::new(0);
        assert!(set.apply(&mut empty, &fields()).is_ok());
        assert!(!set.is_empty());
    }
}
