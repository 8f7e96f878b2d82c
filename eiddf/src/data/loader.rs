use std::fmt::Display;
use std::ops::Range;
use std::time::Instant;

use eidcore::algorithm::predicate::RowPredicate;
use eidcore::algorithm::scaler::ScalerSet;
use eidcore::algorithm::selection::{apply_row_filter, FilterReport};
use eidcore::data::labels::LabelConfig;
use eidcore::data::sample::Sample;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;

use crate::data::assembler::{assemble_entry, InputSpec};
use crate::data::catalog::ShardCatalog;
use crate::data::resolver::resolve;
use crate::error::DataResult;

/// Summary of one eager load, built from the per-entry results
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    pub interval: Range<usize>,
    pub n_entries: usize,
    pub filter: FilterReport,
    pub seconds: f64,
}

impl Display for LoadReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}, {}) from {} shard ranges in {:.1} s: {}",
            self.interval.start, self.interval.end, self.n_entries, self.seconds, self.filter
        )
    }
}

/// Rows of a global interval, filtered and scaled
#[derive(Debug, Clone)]
pub struct LoadedSample {
    pub sample: Sample,
    pub labels: Vec<i8>,
    /// Position of every surviving row relative to the start of the interval
    pub indices: Vec<usize>,
    pub report: LoadReport,
}

/// Load a global interval into memory.
///
/// The interval is resolved with one entry per touched shard, entries are
/// assembled on a pool of `num_threads` threads and concatenated in plan
/// order, then filtered and scaled.
///
/// # Arguments
///
/// * `catalog` - shard catalog
/// * `interval` - global `[lo, hi)`
/// * `spec` - requested fields
/// * `labels` - label derivation settings
/// * `cuts` - row predicates
/// * `scalers` - scalers applied after selection
/// * `num_threads` - size of the reading pool
///
/// # Returns
///
/// * `LoadedSample` - record, labels, surviving row positions and a report
///
pub fn load_interval(
    catalog: &ShardCatalog,
    interval: Range<usize>,
    spec: &InputSpec,
    labels: &LabelConfig,
    cuts: &[Box<dyn RowPredicate>],
    scalers: &ScalerSet,
    num_threads: usize,
) -> DataResult<LoadedSample> {
    let start = Instant::now();
    let batch_size = interval.len().max(1);
    let plan = resolve(&catalog.lengths(), batch_size, interval.clone(), None, None)?;

    let pool = ThreadPoolBuilder::new().num_threads(num_threads.max(1)).build()?;
    let parts: Vec<(Sample, Vec<i8>)> = pool.install(|| {
        plan.par_iter()
            .map(|entry| assemble_entry(catalog, entry, spec, labels))
            .collect::<DataResult<Vec<_>>>()
    })?;

    let (samples, label_parts): (Vec<Sample>, Vec<Vec<i8>>) = parts.into_iter().unzip();
    let merged = Sample::concat(&samples)?;
    let merged_labels: Vec<i8> = label_parts.into_iter().flatten().collect();
    drop(samples);

    let filtered = apply_row_filter(&merged, &merged_labels, None, cuts)?;
    let mut sample = filtered.sample;
    scalers.apply(&mut sample, &spec.scalar_fields())?;

    let report = LoadReport {
        interval,
        n_entries: plan.len(),
        filter: filtered.report,
        seconds: start.elapsed().as_secs_f64(),
    };
    log::info!("loaded {}", report);

    Ok(LoadedSample { sample, labels: filtered.labels, indices: filtered.kept_rows, report })
}
