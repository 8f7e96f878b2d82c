use std::ops::Range;

use eidcore::algorithm::predicate::RowPredicate;
use eidcore::algorithm::scaler::ScalerSet;
use eidcore::algorithm::selection::{apply_row_filter, FilterReport};
use eidcore::data::column::Column;
use eidcore::data::labels::LabelConfig;
use eidcore::data::sample::Sample;
use eidcore::error::CoreError;

use crate::data::assembler::{assemble_entry, InputSpec};
use crate::data::catalog::ShardCatalog;
use crate::data::resolver::{resolve, PlanEntry};
use crate::error::DataResult;

/// One training step worth of rows
#[derive(Debug, Clone)]
pub struct Batch {
    pub sample: Sample,
    pub labels: Vec<i8>,
    pub weights: Option<Vec<f32>>,
    pub report: FilterReport,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// The model input columns of the batch, in input order
    pub fn model_inputs<'a>(&'a self, spec: &InputSpec) -> Vec<(String, &'a Column)> {
        spec.model_fields()
            .into_iter()
            .filter_map(|field| self.sample.get(&field).map(|column| (field, column)))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorSettings {
    pub interval: Range<usize>,
    pub batch_size: usize,
    pub shuffle_seed: Option<u64>,
}

/// Streams an interval of the catalog batch by batch.
///
/// The plan is computed once at construction; every batch is read,
/// filtered and scaled on demand.
pub struct BatchGenerator {
    catalog: ShardCatalog,
    plan: Vec<PlanEntry>,
    spec: InputSpec,
    labels: LabelConfig,
    cuts: Vec<Box<dyn RowPredicate>>,
    scalers: ScalerSet,
}

impl BatchGenerator {
    /// # Arguments
    ///
    /// * `catalog` - shard catalog
    /// * `settings` - interval, batch size and optional shuffle seed
    /// * `spec` - requested fields
    /// * `labels` - label derivation settings
    /// * `cuts` - row predicates applied to every batch
    /// * `scalers` - scalers applied to non-empty batches
    /// * `weights` - optional global weight vector covering the interval
    ///
    pub fn new(
        catalog: ShardCatalog,
        settings: GeneratorSettings,
        spec: InputSpec,
        labels: LabelConfig,
        cuts: Vec<Box<dyn RowPredicate>>,
        scalers: ScalerSet,
        weights: Option<&[f32]>,
    ) -> DataResult<Self> {
        labels.validate()?;
        let plan = resolve(
            &catalog.lengths(),
            settings.batch_size,
            settings.interval.clone(),
            weights,
            settings.shuffle_seed,
        )?;
        log::info!(
            "generator over [{}, {}) with {} batches of at most {} rows",
            settings.interval.start,
            settings.interval.end,
            plan.len(),
            settings.batch_size
        );
        Ok(BatchGenerator { catalog, plan, spec, labels, cuts, scalers })
    }

    pub fn len(&self) -> usize {
        self.plan.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plan.is_empty()
    }

    pub fn plan(&self) -> &[PlanEntry] {
        &self.plan
    }

    pub fn input_spec(&self) -> &InputSpec {
        &self.spec
    }

    /// Batch `index` of the plan; a batch whose rows are all filtered out is empty, not an error
    pub fn get_batch(&self, index: usize) -> DataResult<Batch> {
        let entry = self
            .plan
            .get(index)
            .ok_or(CoreError::BatchOutOfRange { index, len: self.plan.len() })?;

        let (sample, labels) = assemble_entry(&self.catalog, entry, &self.spec, &self.labels)?;
        let filtered = apply_row_filter(&sample, &labels, entry.weights.as_deref(), &self.cuts)?;
        let mut sample = filtered.sample;
        if !filtered.labels.is_empty() {
            self.scalers.apply(&mut sample, &self.spec.scalar_fields())?;
        }

        log::debug!(
            "batch {} from shard {} rows [{}, {}): {}",
            index,
            entry.shard_id,
            entry.local.start,
            entry.local.end,
            filtered.report
        );
        Ok(Batch { sample, labels: filtered.labels, weights: filtered.weights, report: filtered.report })
    }

    /// Visit every batch in plan order
    pub fn iter(&self) -> impl Iterator<Item = DataResult<Batch>> + '_ {
        (0..self.plan.len()).map(move |index| self.get_batch(index))
    }

    /// Walk every batch and total their filter reports
    pub fn summary(&self) -> DataResult<FilterReport> {
        let mut total = FilterReport::default();
        for batch in self.iter() {
            total.merge(batch?.report);
        }
        Ok(total)
    }
}
