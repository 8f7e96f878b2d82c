use std::ops::Range;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use eidcore::algorithm::composition::{class_fractions, truth_composition};
use eidcore::algorithm::scaler::{QuantileScaler, ScalerSet, TrackScaler, DEFAULT_N_QUANTILES, TRACKS_FIELD};
use eidcore::algorithm::selection::FilterReport;
use eidcore::algorithm::weighting::{class_weights, compute_weights, scatter_weights, TargetRatio, WeightScheme};
use eidcore::data::labels::{IFF_TRUTH, TRUTH_TYPE};
use eidcore::error::CoreError;
use eiddf::config::PipelineConfig;
use eiddf::data::catalog::ShardCatalog;
use eiddf::data::generator::{BatchGenerator, GeneratorSettings};
use eiddf::data::loader::{load_interval, LoadedSample};
use eiddf::data::scaler_io::{load_quantile_scaler, load_track_scaler, save_quantile_scaler, save_track_scaler};
use eiddf::error::DataResult;

#[derive(Debug, Parser)]
#[command(name = "eid", about = "Batching of electron-ID event shards")]
struct Args {
    /// JSON pipeline configuration
    #[arg(long, short)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the discovered shards and their event counts
    Catalog,
    /// Print the batch plan of the training interval
    Plan,
    /// Load the training interval and report its composition
    Inspect,
    /// Fit the scalers on the training interval and save them
    FitScaler,
    /// Stream the training and validation batches
    Batches {
        /// Stop after this many training batches
        #[arg(long)]
        limit: Option<usize>,
    },
}

fn interval((lo, hi): (usize, usize), catalog: &ShardCatalog) -> Range<usize> {
    let hi = if hi == 0 { catalog.total_events() } else { hi };
    lo..hi
}

fn load_train(config: &PipelineConfig, catalog: &ShardCatalog, scalers: &ScalerSet) -> DataResult<LoadedSample> {
    load_interval(
        catalog,
        interval(config.n_train, catalog),
        &config.inputs,
        &config.labels,
        &config.train_cuts(),
        scalers,
        config.num_threads,
    )
}

fn load_scalers(config: &PipelineConfig) -> DataResult<ScalerSet> {
    let scalars = match &config.scaler_in {
        Some(path) => {
            let scaler = load_quantile_scaler(path)?;
            scaler.check_fields(&config.inputs.scalar_fields())?;
            Some(scaler)
        }
        None => None,
    };
    let tracks = match &config.t_scaler_in {
        Some(path) => Some(load_track_scaler(path)?),
        None => None,
    };
    Ok(ScalerSet { scalars, tracks })
}

fn run_catalog(catalog: &ShardCatalog) -> DataResult<()> {
    for shard in catalog.shards() {
        println!("{:>4}  {:>10}  {}", shard.id, shard.n_events, shard.path.display());
    }
    println!("{} shards, {} events", catalog.len(), catalog.total_events());
    Ok(())
}

fn run_plan(config: &PipelineConfig, catalog: ShardCatalog) -> DataResult<()> {
    let train = interval(config.n_train, &catalog);
    let generator = BatchGenerator::new(
        catalog,
        GeneratorSettings { interval: train.clone(), batch_size: config.batch_size, shuffle_seed: config.shuffle_seed },
        config.inputs.clone(),
        config.labels.clone(),
        config.train_cuts(),
        ScalerSet::default(),
        None,
    )?;
    for (i, entry) in generator.plan().iter().enumerate() {
        println!("{:>6}  shard {:>4}  [{}, {})", i, entry.shard_id, entry.local.start, entry.local.end);
    }
    println!("{} batches over [{}, {})", generator.len(), train.start, train.end);
    Ok(())
}

fn run_inspect(config: &PipelineConfig, catalog: &ShardCatalog) -> DataResult<()> {
    let loaded = load_train(config, catalog, &ScalerSet::default())?;
    let n_classes = config.labels.n_classes;

    let fractions = class_fractions(&loaded.labels, n_classes);
    for (class, fraction) in fractions.iter().enumerate() {
        log::info!("class {}: {:.2} %", class, fraction);
    }

    let iff = loaded.sample.get(IFF_TRUTH).map(|c| c.to_f64_vec());
    let truth_type = loaded.sample.get(TRUTH_TYPE).map(|c| c.to_f64_vec());
    if let (Some(iff), Some(truth_type)) = (iff, truth_type) {
        let iff: Vec<i64> = iff.into_iter().map(|v| v as i64).collect();
        let truth_type: Vec<i64> = truth_type.into_iter().map(|v| v as i64).collect();
        log::info!("truth composition:\n{}", truth_composition(&iff, &truth_type));
    }

    let bkg_ratio = match config.target_ratio() {
        TargetRatio::Uniform(r) => r,
        _ => 0.0,
    };
    if let Some(weights) = class_weights(&loaded.labels, bkg_ratio) {
        log::info!("class weights: {:?}", weights);
    }
    Ok(())
}

fn run_fit_scaler(config: &PipelineConfig, catalog: &ShardCatalog) -> DataResult<()> {
    if config.scaler_out.is_none() && config.t_scaler_out.is_none() {
        return Err(CoreError::Configuration("neither `scaler_out` nor `t_scaler_out` is set".to_string()).into());
    }
    let loaded = load_train(config, catalog, &ScalerSet::default())?;

    if let Some(path) = &config.scaler_out {
        let scaler = QuantileScaler::fit(&loaded.sample, &config.inputs.scalar_fields(), DEFAULT_N_QUANTILES)?;
        save_quantile_scaler(path, &scaler)?;
    }
    if let Some(path) = &config.t_scaler_out {
        if config.inputs.wants_tracks() {
            let scaler = TrackScaler::fit(&loaded.sample, TRACKS_FIELD)?;
            save_track_scaler(path, &scaler)?;
            log::info!(
                "track scaler on `{}` with {} attributes saved to {}",
                scaler.field(),
                scaler.n_attributes(),
                path.display()
            );
        } else {
            log::warn!("`t_scaler_out` is set but no `tracks` input is requested, track scaler not fitted");
        }
    }
    Ok(())
}

fn run_batches(config: &PipelineConfig, catalog: ShardCatalog, limit: Option<usize>) -> DataResult<()> {
    let scalers = load_scalers(config)?;
    let train = interval(config.n_train, &catalog);
    let valid = interval(config.n_valid, &catalog);

    // sample weights are computed once on the eagerly loaded training interval
    let scheme = config.weight_scheme_or_none();
    let weights = if scheme == WeightScheme::None {
        None
    } else {
        let loaded = load_train(config, &catalog, &ScalerSet::default())?;
        match compute_weights(
            &loaded.sample,
            &loaded.labels,
            scheme,
            &config.target_ratio(),
            config.hist_mode()?,
            config.ref_class,
        )? {
            Some((weights, _)) => Some(scatter_weights(train.end, train.start, &loaded.indices, &weights)?),
            None => None,
        }
    };

    let valid_generator = BatchGenerator::new(
        catalog.clone(),
        GeneratorSettings { interval: valid, batch_size: config.batch_size, shuffle_seed: None },
        config.inputs.clone(),
        config.labels.clone(),
        config.valid_cuts(),
        scalers.clone(),
        None,
    )?;
    let train_generator = BatchGenerator::new(
        catalog,
        GeneratorSettings { interval: train, batch_size: config.batch_size, shuffle_seed: config.shuffle_seed },
        config.inputs.clone(),
        config.labels.clone(),
        config.train_cuts(),
        scalers,
        weights.as_deref(),
    )?;

    let mut train_report = FilterReport::default();
    for (i, batch) in train_generator.iter().take(limit.unwrap_or(usize::MAX)).enumerate() {
        let batch = batch?;
        log::debug!("train batch {}: {} rows, {} inputs", i, batch.len(), batch.model_inputs(&config.inputs).len());
        train_report.merge(batch.report);
    }
    log::info!("training, {} batches: {}", train_generator.len(), train_report);

    let valid_report = valid_generator.summary()?;
    log::info!("validation, {} batches: {}", valid_generator.len(), valid_report);
    Ok(())
}

fn main() -> DataResult<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = PipelineConfig::load(&args.config)?;
    let catalog = ShardCatalog::from_config(&config.catalog, config.num_threads)?;
    config.inputs.restrict_to(&catalog.field_names_union()?);

    match args.command {
        Command::Catalog => run_catalog(&catalog),
        Command::Plan => run_plan(&config, catalog),
        Command::Inspect => run_inspect(&config, &catalog),
        Command::FitScaler => run_fit_scaler(&config, &catalog),
        Command::Batches { limit } => run_batches(&config, catalog, limit),
    }
}
