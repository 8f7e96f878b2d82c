use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use eidcore::algorithm::binning::HistMode;
use eidcore::algorithm::predicate::{compile_cuts, Cuts};
use eidcore::algorithm::weighting::{TargetRatio, WeightScheme};
use eidcore::data::labels::LabelConfig;
use serde::{Deserialize, Serialize};

use crate::data::assembler::InputSpec;
use crate::data::catalog::CatalogConfig;
use crate::error::{DataError, DataResult};

/// Background ratio as written in the configuration: one value or one per class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RatioSetting {
    Uniform(f64),
    PerClass(Vec<f64>),
}

/// Everything the pipeline reads from its JSON configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub catalog: CatalogConfig,
    pub inputs: InputSpec,
    pub labels: LabelConfig,
    pub batch_size: usize,
    pub n_train: (usize, usize),
    pub n_valid: (usize, usize),
    pub train_cuts: Vec<String>,
    pub valid_cuts: Vec<String>,
    pub weight_type: String,
    pub bkg_ratio: Option<RatioSetting>,
    pub hist: String,
    pub ref_class: i8,
    pub scaler_in: Option<PathBuf>,
    pub scaler_out: Option<PathBuf>,
    pub t_scaler_in: Option<PathBuf>,
    pub t_scaler_out: Option<PathBuf>,
    pub num_threads: usize,
    pub shuffle_seed: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            catalog: CatalogConfig::default(),
            inputs: InputSpec::default(),
            labels: LabelConfig::default(),
            batch_size: 5000,
            n_train: (0, 0),
            n_valid: (0, 0),
            train_cuts: Vec::new(),
            valid_cuts: Vec::new(),
            weight_type: "none".to_string(),
            bkg_ratio: None,
            hist: "2d".to_string(),
            ref_class: 0,
            scaler_in: None,
            scaler_out: None,
            t_scaler_in: None,
            t_scaler_out: None,
            num_threads: 4,
            shuffle_seed: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> DataResult<Self> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.labels.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> DataResult<Self> {
        let file = File::open(path).map_err(|e| DataError::io(path, e))?;
        let config: PipelineConfig = serde_json::from_reader(BufReader::new(file))?;
        config.labels.validate()?;
        log::debug!("configuration loaded from {}", path.display());
        Ok(config)
    }

    /// The configured weighting scheme; an unknown name falls back to `none` with a warning
    pub fn weight_scheme_or_none(&self) -> WeightScheme {
        match self.weight_type.parse::<WeightScheme>() {
            Ok(scheme) => scheme,
            Err(e) => {
                log::warn!("{}, sample weighting disabled", e);
                WeightScheme::None
            }
        }
    }

    pub fn target_ratio(&self) -> TargetRatio {
        match &self.bkg_ratio {
            None => TargetRatio::Observed,
            Some(RatioSetting::Uniform(r)) => TargetRatio::Uniform(*r),
            Some(RatioSetting::PerClass(r)) => TargetRatio::PerClass(r.clone()),
        }
    }

    pub fn hist_mode(&self) -> DataResult<HistMode> {
        Ok(self.hist.parse::<HistMode>()?)
    }

    pub fn train_cuts(&self) -> Cuts {
        compile_cuts(&self.train_cuts)
    }

    pub fn valid_cuts(&self) -> Cuts {
        compile_cuts(&self.valid_cuts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eidcore::error::CoreError;

    #[test]
    fn test_defaults_from_empty_object() {
        let config = PipelineConfig::from_json_str("{}").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.weight_scheme_or_none(), WeightScheme::None);
        assert_eq!(config.target_ratio(), TargetRatio::Observed);
        assert_eq!(config.catalog.prefix, "e-ID_");
    }

    #[test]
    fn test_partial_configuration() {
        let json = r#"{
            "catalog": {"input_path": "/data/e-ID", "input_dir": "0.0-2.5"},
            "inputs": {"scalars": ["p_eta", "tracks"], "n_tracks": 10},
            "labels": {"n_classes": 2},
            "batch_size": 1000,
            "train_cuts": ["abs(eta) <= 2.5", "pt >= 15"],
            "weight_type": "flat",
            "bkg_ratio": [1.0, 2.0],
            "hist": "pt"
        }"#;
        let config = PipelineConfig::from_json_str(json).unwrap();
        assert_eq!(config.catalog.input_dir.as_deref(), Some("0.0-2.5"));
        assert_eq!(config.catalog.extension, ".db");
        assert_eq!(config.inputs.n_tracks, 10);
        assert_eq!(config.inputs.others, InputSpec::default().others);
        assert_eq!(config.labels.n_classes, 2);
        assert_eq!(config.weight_scheme_or_none(), WeightScheme::Flattening);
        assert_eq!(config.target_ratio(), TargetRatio::PerClass(vec![1.0, 2.0]));
        assert_eq!(config.hist_mode().unwrap(), HistMode::Pt);
        assert_eq!(config.train_cuts().len(), 2);
    }

    #[test]
    fn test_unknown_scheme_recovers_to_none() {
        let config = PipelineConfig { weight_type: "balanced".to_string(), ..PipelineConfig::default() };
        assert_eq!(config.weight_scheme_or_none(), WeightScheme::None);
    }

    #[test]
    fn test_bad_class_count_is_rejected() {
        let result = PipelineConfig::from_json_str(r#"{"labels": {"n_classes": 4}}"#);
        assert!(matches!(result, Err(DataError::Core(CoreError::Configuration(_)))));
    }
}
