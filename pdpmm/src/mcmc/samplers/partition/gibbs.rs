use std::ops::Index;

use rand::seq::SliceRandom;
use rand::Rng;
use rayon::prelude::*;
use rv::misc::ln_pflip;

use crate::config::SweepStrategy;
use crate::data::ClusterId;
use crate::mcmc::Sampler;
use crate::models::partition::PartitionModel;

/// Gibbs based sampling on the space of partitions.
///
/// With [`SweepStrategy::Exact`] observations are visited in a shuffled order
/// and each one is reassigned against the current table, so the chain is the
/// sequential collapsed Gibbs sampler. Only the per-cluster scores of a single
/// observation are evaluated in parallel, which leaves the result independent
/// of the worker count.
///
/// With [`SweepStrategy::Snapshot`] every observation is scored in parallel
/// against the table as it stood at the start of the sweep, and the draws are
/// then committed in index order.
#[derive(Clone, Copy, Debug)]
pub struct PartitionGibbs {
    strategy: SweepStrategy,
    min_parallel_partitions: usize,
    last_ln_likelihood: f64,
}

impl Default for PartitionGibbs {
    fn default() -> Self {
        Self::new()
    }
}

impl PartitionGibbs {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            strategy: SweepStrategy::Exact,
            min_parallel_partitions: 8,
            last_ln_likelihood: 0.0,
        }
    }

    #[must_use]
    pub const fn with_strategy(mut self, strategy: SweepStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Score partitions serially while there are fewer than `n` of them.
    #[must_use]
    pub const fn with_min_parallel_partitions(mut self, n: usize) -> Self {
        self.min_parallel_partitions = n;
        self
    }

    /// Sum of the unnormalized log weights of every draw in the last sweep.
    pub const fn last_ln_likelihood(&self) -> f64 {
        self.last_ln_likelihood
    }
}

fn partition_weights<X, M, D>(model: &M, x: &X, min_parallel: usize) -> Vec<f64>
where
    M: PartitionModel<X, D> + Sync,
    D: Index<usize, Output = X>,
    X: Sync,
{
    let k = model.n_partitions();
    if k >= min_parallel {
        (0..k)
            .into_par_iter()
            .map(|i| model.ln_pp_partition(x, i))
            .collect()
    } else {
        (0..k).map(|i| model.ln_pp_partition(x, i)).collect()
    }
}

impl PartitionGibbs {
    fn exact_sweep<X, M, D, R>(&mut self, mut model: M, data: &D, rng: &mut R) -> M
    where
        M: PartitionModel<X, D> + Sync,
        D: Index<usize, Output = X>,
        X: Sync,
        R: Rng,
    {
        let mut indicies: Vec<usize> = (0..model.n_data()).collect();
        indicies.shuffle(rng);

        let mut ln_likelihood = 0.0;
        for index in indicies {
            model.unassign(index, data);
            let x = &data[index];

            // The emptied partition scores -inf until the compaction below.
            let mut log_weights =
                partition_weights::<X, M, D>(&model, x, self.min_parallel_partitions);
            log_weights.push(model.ln_pp_empty(x));

            let new_assignment = ln_pflip(&log_weights, false, rng);
            ln_likelihood += log_weights[new_assignment];
            model.assign(index, new_assignment, data);
            model.compact();
        }

        self.last_ln_likelihood = ln_likelihood;
        model
    }

    fn snapshot_sweep<X, M, D, R>(&mut self, mut model: M, data: &D, rng: &mut R) -> M
    where
        M: PartitionModel<X, D> + Sync,
        D: Index<usize, Output = X> + Sync,
        X: Sync,
        R: Rng,
    {
        let k = model.n_partitions();
        let ids: Vec<ClusterId> = (0..k).map(|i| model.partition_id(i)).collect();

        let frozen = &model;
        let log_weights: Vec<Vec<f64>> = (0..frozen.n_data())
            .into_par_iter()
            .map(|index| {
                let x = &data[index];
                let own = frozen.assignments()[index];
                (0..k)
                    .map(|i| {
                        if own == Some(i) {
                            frozen.ln_pp_partition_without(x, i)
                        } else {
                            frozen.ln_pp_partition(x, i)
                        }
                    })
                    .chain(std::iter::once(frozen.ln_pp_empty(x)))
                    .collect()
            })
            .collect();

        let mut ln_likelihood = 0.0;
        for (index, weights) in log_weights.iter().enumerate() {
            let choice = ln_pflip(weights, false, rng);
            ln_likelihood += weights[choice];

            // A chosen partition destroyed earlier in this pass becomes a birth.
            let target = ids
                .get(choice)
                .and_then(|&id| model.partition_index(id))
                .unwrap_or_else(|| model.n_partitions());
            model.assign(index, target, data);
            model.compact();
        }

        self.last_ln_likelihood = ln_likelihood;
        model
    }
}

impl<X, M, D> Sampler<M, D> for PartitionGibbs
where
    M: PartitionModel<X, D> + Sync,
    D: Index<usize, Output = X> + Sync,
    X: Sync,
{
    fn step<R: Rng>(&mut self, model: M, data: &D, rng: &mut R) -> M {
        match self.strategy {
            SweepStrategy::Exact => self.exact_sweep(model, data, rng),
            SweepStrategy::Snapshot => self.snapshot_sweep(model, data, rng),
        }
    }
}
