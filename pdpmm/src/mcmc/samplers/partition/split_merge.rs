use std::ops::Index;

use log::trace;
use rand::seq::SliceRandom;
use rand::Rng;
use rv::misc::LogSumExp;

use crate::mcmc::Sampler;
use crate::models::partition::PartitionModel;

/// Split-Merge Sampler
///
/// Each proposal picks one of two moves with equal probability:
///
/// * Random anchors: two distinct data are drawn uniformly. If they share a
///   partition it is split by sequential allocation around them, otherwise
///   their partitions are merged.
/// * Closest pair: either the two most alike partitions (see
///   [`PartitionModel::closest_partitions`]) are merged, or a uniformly chosen
///   partition is split by sequential allocation. A split is only kept as a
///   candidate when its two halves come out as the closest pair, so each
///   split is undone by exactly one merge.
///
/// Both moves are accepted with the Metropolis-Hastings ratio that includes
/// the probability of the allocation, so the chain keeps the collapsed
/// posterior invariant.
///
/// Reference: https://doi.org/10.1198/1061860043001
#[derive(Clone, Copy, Debug)]
pub struct SplitMerge {
    n_proposals: usize,
    last_accepted: usize,
}

impl Default for SplitMerge {
    fn default() -> Self {
        Self::new(1)
    }
}

impl SplitMerge {
    /// A sampler making `n_proposals` proposals per step.
    #[must_use]
    pub const fn new(n_proposals: usize) -> Self {
        Self {
            n_proposals,
            last_accepted: 0,
        }
    }

    /// Proposals accepted during the last step.
    pub const fn last_accepted(&self) -> usize {
        self.last_accepted
    }
}

/// Ordered pair of distinct draws from `0..n`, `n >= 2`.
fn distinct_pair<R: Rng>(n: usize, rng: &mut R) -> (usize, usize) {
    let i = rng.random_range(0..n);
    let j = rng.random_range(0..n - 1);
    (i, if j >= i { j + 1 } else { j })
}

fn members_of(assignments: &[Option<usize>], partitions: &[usize]) -> Vec<usize> {
    assignments
        .iter()
        .enumerate()
        .filter(|(_, a)| a.is_some_and(|a| partitions.contains(&a)))
        .map(|(k, _)| k)
        .collect()
}

#[allow(clippy::cast_precision_loss)]
fn ln_usize(n: usize) -> f64 {
    (n as f64).ln()
}

/// Put `i` in partition `a`, `j` in partition `b`, and the `rest` one at a
/// time into whichever of the two a draw favors given the members so far.
/// `rest` must already be unassigned.
///
/// With `replay` the draws are replaced by the labels it holds: a datum goes to
/// `a` when its label there is `a`. Returns the log probability of the
/// allocation.
fn allocate<X, M, D, R>(
    model: &mut M,
    (i, a): (usize, usize),
    (j, b): (usize, usize),
    rest: &[usize],
    replay: Option<&[Option<usize>]>,
    data: &D,
    rng: &mut R,
) -> f64
where
    M: PartitionModel<X, D>,
    D: Index<usize, Output = X>,
    R: Rng,
{
    model.assign(i, a, data);
    model.assign(j, b, data);

    let mut ln_q = 0.0;
    for &k in rest {
        let x = &data[k];
        let w_a = model.ln_pp_partition(x, a);
        let w_b = model.ln_pp_partition(x, b);
        let norm = [w_a, w_b].iter().logsumexp();

        let to_a = match replay {
            Some(labels) => labels[k] == Some(a),
            None => rng.random::<f64>() < (w_a - norm).exp(),
        };
        let (target, w) = if to_a { (a, w_a) } else { (b, w_b) };
        ln_q += w - norm;
        model.assign(k, target, data);
    }
    ln_q
}

/// Outcome of a proposal before the accept/reject draw.
struct Proposal<M> {
    model: M,
    /// Log target ratio plus the log proposal correction.
    ln_ratio: f64,
}

/// Split partition `c` around the anchors `i` (into a new partition) and `j`
/// (kept in `c`). The new partition takes index `n_partitions()`.
fn propose_split<X, M, D, R>(
    model: &M,
    c: usize,
    (i, j): (usize, usize),
    data: &D,
    rng: &mut R,
) -> (M, usize, f64)
where
    M: PartitionModel<X, D> + Clone,
    D: Index<usize, Output = X>,
    R: Rng,
{
    let mut rest: Vec<usize> = members_of(model.assignments(), &[c])
        .into_iter()
        .filter(|&k| k != i && k != j)
        .collect();
    rest.shuffle(rng);

    let mut split = model.clone();
    for &k in rest.iter().chain([i, j].iter()) {
        split.unassign(k, data);
    }
    let fresh = split.n_partitions();
    let ln_q = allocate(&mut split, (i, fresh), (j, c), &rest, None, data, rng);
    (split, fresh, ln_q)
}

/// Merge partition `a` into `b`, returning the merged model with the log
/// probability that allocating around anchors `i` in `a` and `j` in `b`
/// reproduces the current pair.
fn propose_merge<X, M, D, R>(
    model: &M,
    (a, b): (usize, usize),
    (i, j): (usize, usize),
    data: &D,
    rng: &mut R,
) -> (M, f64)
where
    M: PartitionModel<X, D> + Clone,
    D: Index<usize, Output = X>,
    R: Rng,
{
    let members = members_of(model.assignments(), &[a, b]);
    let mut rest: Vec<usize> = members
        .iter()
        .copied()
        .filter(|&k| k != i && k != j)
        .collect();
    rest.shuffle(rng);

    let mut launch = model.clone();
    for &k in &members {
        launch.unassign(k, data);
    }
    let ln_q = allocate(
        &mut launch,
        (i, a),
        (j, b),
        &rest,
        Some(model.assignments()),
        data,
        rng,
    );

    let mut merged = model.clone();
    for &k in &members {
        if model.assignments()[k] == Some(a) {
            merged.assign(k, b, data);
        }
    }
    merged.compact();
    (merged, ln_q)
}

impl SplitMerge {
    fn random_anchors<X, M, D, R>(model: &M, data: &D, rng: &mut R) -> Option<Proposal<M>>
    where
        M: PartitionModel<X, D> + Clone,
        D: Index<usize, Output = X>,
        R: Rng,
    {
        if model.n_data() < 2 {
            return None;
        }
        let (i, j) = distinct_pair(model.n_data(), rng);
        let c_i = model.assignments()[i]?;
        let c_j = model.assignments()[j]?;
        let current = model.ln_score(data);

        if c_i == c_j {
            let (mut split, _, ln_q) = propose_split(model, c_j, (i, j), data, rng);
            split.compact();
            let ln_ratio = split.ln_score(data) - current - ln_q;
            Some(Proposal {
                model: split,
                ln_ratio,
            })
        } else {
            let (merged, ln_q) = propose_merge(model, (c_i, c_j), (i, j), data, rng);
            let ln_ratio = merged.ln_score(data) - current + ln_q;
            Some(Proposal {
                model: merged,
                ln_ratio,
            })
        }
    }

    fn closest_pair<X, M, D, R>(model: &M, data: &D, rng: &mut R) -> Option<Proposal<M>>
    where
        M: PartitionModel<X, D> + Clone,
        D: Index<usize, Output = X>,
        R: Rng,
    {
        let k = model.n_partitions();
        if k == 0 {
            return None;
        }
        let current = model.ln_score(data);
        let ln_half = 0.5_f64.ln();

        if rng.random_bool(0.5) {
            // Split a uniformly chosen partition.
            let c = rng.random_range(0..k);
            let members = members_of(model.assignments(), &[c]);
            let m = members.len();
            if m < 2 {
                return None;
            }
            let (ii, jj) = distinct_pair(m, rng);
            let (mut split, fresh, ln_q) =
                propose_split(model, c, (members[ii], members[jj]), data, rng);

            // `fresh` is past every existing index.
            if split.closest_partitions() != Some((c, fresh)) {
                return None;
            }
            let ln_forward = ln_half - ln_usize(k) - ln_usize(m * (m - 1)) + ln_q;
            let ln_reverse =
                2.0 * ln_half - ln_usize(split.counts()[fresh] * split.counts()[c]);

            split.compact();
            let ln_ratio = split.ln_score(data) - current + ln_reverse - ln_forward;
            Some(Proposal {
                model: split,
                ln_ratio,
            })
        } else {
            // Merge the closest pair.
            let (a, b) = model.closest_partitions()?;
            let (a, b) = if rng.random_bool(0.5) { (b, a) } else { (a, b) };
            let in_a = members_of(model.assignments(), &[a]);
            let in_b = members_of(model.assignments(), &[b]);
            let i = in_a[rng.random_range(0..in_a.len())];
            let j = in_b[rng.random_range(0..in_b.len())];
            let m = in_a.len() + in_b.len();

            let (merged, ln_q) = propose_merge(model, (a, b), (i, j), data, rng);
            let ln_forward = 2.0 * ln_half - ln_usize(in_a.len() * in_b.len());
            let ln_reverse = ln_half - ln_usize(k - 1) - ln_usize(m * (m - 1)) + ln_q;
            let ln_ratio = merged.ln_score(data) - current + ln_reverse - ln_forward;
            Some(Proposal {
                model: merged,
                ln_ratio,
            })
        }
    }
}

impl<X, M, D> Sampler<M, D> for SplitMerge
where
    M: PartitionModel<X, D> + Clone,
    D: Index<usize, Output = X>,
{
    fn step<R: Rng>(&mut self, model: M, data: &D, rng: &mut R) -> M {
        let mut model = model;
        self.last_accepted = 0;

        for _ in 0..self.n_proposals {
            let proposal = if rng.random_bool(0.5) {
                Self::random_anchors(&model, data, rng)
            } else {
                Self::closest_pair(&model, data, rng)
            };

            if let Some(proposal) = proposal {
                // Generate a MH acceptance uniformly on [0, 1)
                let threshold: f64 = rng.random();
                if threshold.ln() < proposal.ln_ratio {
                    trace!(
                        "accepted split-merge proposal: {} -> {} partitions",
                        model.n_partitions(),
                        proposal.model.n_partitions()
                    );
                    model = proposal.model;
                    self.last_accepted += 1;
                }
            }
        }
        model
    }
}
