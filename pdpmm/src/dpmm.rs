//! Dirichlet process mixture driver: configuration in, artifacts out.

use std::fs;

use log::{debug, info};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use serde::Serialize;

use crate::config::{DpmmConfig, LikelihoodMode};
use crate::data::{Observation, Observations};
use crate::error::Result;
use crate::io::{read_table, write_labels};
use crate::mcmc::samplers::partition::{PartitionGibbs, SplitMerge};
use crate::mcmc::Sampler;
use crate::models::{
    CollapsedPrior, ConjugateMixtureModel, DirectionalNiw, InitialPartition, Model,
    NormalInvWishart,
};
use crate::trace::{TraceLog, TraceRecord, TraceWriter};

/// Final per-observation labels.
pub const OUTPUT_FILE: &str = "output.csv";

/// Outcome of a completed run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunSummary {
    pub n_clusters: usize,
    /// Contiguous labels in input row order, as written to [`OUTPUT_FILE`].
    pub labels: Vec<usize>,
    pub trace: TraceLog,
}

/// Cluster the observations described by `config` and write the artifacts
/// into its output directory.
///
/// The configuration, the prior and the input table are all checked before
/// the output directory is touched, so a failed run leaves nothing behind.
pub fn run(config: &DpmmConfig) -> Result<RunSummary> {
    let hyper = config.validate()?;
    let rows = read_table(&config.input, config.n_rows, config.n_cols)?;
    let data = Observations::from_rows(&rows, config.mode);

    let mut builder = rayon::ThreadPoolBuilder::new();
    if let Some(threads) = config.threads {
        builder = builder.num_threads(threads);
    }
    let pool = builder.build()?;

    info!(
        "clustering {} observations of width {} in {:?} mode, {} iterations, {:?} sweeps on {} threads",
        config.n_rows,
        config.n_cols,
        config.mode,
        config.iterations,
        config.strategy,
        pool.current_num_threads()
    );

    match config.mode {
        LikelihoodMode::Position => {
            let prior = NormalInvWishart::from_hyperparameters(&hyper)?;
            pool.install(|| sample(config, prior, &data))
        }
        LikelihoodMode::PositionDirection => {
            let prior = DirectionalNiw::from_hyperparameters(&hyper)?;
            pool.install(|| sample(config, prior, &data))
        }
    }
}

fn sample<Pr>(config: &DpmmConfig, prior: Pr, data: &Observations) -> Result<RunSummary>
where
    Pr: CollapsedPrior<Observation> + Clone + Sync,
{
    fs::create_dir_all(&config.output_dir)?;
    let mut writer = TraceWriter::create(&config.output_dir)?;
    let mut trace = TraceLog::new(config.thinning);

    let mut rng = SmallRng::seed_from_u64(config.seed);
    let mut model = ConjugateMixtureModel::new(
        prior,
        config.alpha,
        data.iter(),
        InitialPartition::from_count(config.init_clusters),
        &mut rng,
    );
    let mut sampler = PartitionGibbs::new()
        .with_strategy(config.strategy)
        .with_min_parallel_partitions(config.min_parallel_clusters);
    let mut split_merge = SplitMerge::new(config.split_merge_proposals);

    debug!(
        "initial state: {} clusters, ln score {}",
        model.n_partitions(),
        model.ln_score(data)
    );

    for iteration in 0..config.iterations {
        // Proposals go first so every iteration ends on a Gibbs sweep.
        model = split_merge.step(model, data, &mut rng);
        model = sampler.step(model, data, &mut rng);

        let record = TraceRecord {
            iteration,
            n_clusters: model.n_partitions(),
            ln_likelihood: sampler.last_ln_likelihood(),
        };
        debug!(
            "iteration {iteration}: {} clusters, ln likelihood {}, {} split-merge moves accepted",
            record.n_clusters,
            record.ln_likelihood,
            split_merge.last_accepted()
        );

        let labels = model.labels();
        let snapshot = trace.record(record.clone(), &labels);
        writer.append(&record, snapshot)?;
    }

    let labels = model.labels();
    write_labels(config.output_dir.join(OUTPUT_FILE), &labels)?;

    let n_clusters = model.n_partitions();
    info!(
        "finished {} iterations with {n_clusters} clusters",
        config.iterations
    );

    Ok(RunSummary {
        n_clusters,
        labels,
        trace,
    })
}
