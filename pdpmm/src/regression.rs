//! Post-processing of a final assignment into a Gaussian mixture.
//!
//! Small clusters are pruned, the survivors relabeled in order of first
//! appearance, and each one summarized by its member count, empirical mean
//! and unbiased covariance over the position subspace.

use log::warn;
use nalgebra::{DMatrix, DVector};
use rv::misc::LogSumExp;

use crate::linalg::ln_gaussian;
use crate::utils::relabel_by_first_appearance;

/// Which clusters survive pruning.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PruneRule {
    /// Clusters with fewer members are removed.
    pub min_count: usize,
    /// Clusters smaller than this share of the largest one are removed.
    pub min_share_of_largest: f64,
}

impl Default for PruneRule {
    fn default() -> Self {
        Self {
            min_count: 50,
            min_share_of_largest: 1.0 / 20.0,
        }
    }
}

impl PruneRule {
    #[allow(clippy::cast_precision_loss)]
    pub fn keeps(&self, count: usize, largest: usize) -> bool {
        count >= self.min_count && count as f64 >= self.min_share_of_largest * largest as f64
    }
}

/// Observations left after pruning, with contiguous labels.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pruned {
    /// Input indices of the kept observations, ascending.
    pub indices: Vec<usize>,
    /// New label of each kept observation.
    pub labels: Vec<usize>,
    pub n_clusters: usize,
}

/// Remove the members of clusters `rule` rejects and relabel the rest.
pub fn prune(labels: &[usize], rule: &PruneRule) -> Pruned {
    let k = labels.iter().max().map_or(0, |m| m + 1);
    let mut counts = vec![0_usize; k];
    labels.iter().for_each(|&l| counts[l] += 1);
    let largest = counts.iter().copied().max().unwrap_or(0);

    let (indices, kept): (Vec<usize>, Vec<usize>) = labels
        .iter()
        .enumerate()
        .filter(|(_, &l)| rule.keeps(counts[l], largest))
        .map(|(i, &l)| (i, l))
        .unzip();

    let (labels, n_clusters) = relabel_by_first_appearance(&kept);
    Pruned {
        indices,
        labels,
        n_clusters,
    }
}

/// Mixture summary consumed by downstream motion models.
#[derive(Clone, Debug, PartialEq)]
pub struct GaussianMixture {
    /// Raw member count of each component.
    pub priors: Vec<f64>,
    pub means: Vec<DVector<f64>>,
    pub covariances: Vec<DMatrix<f64>>,
}

/// Estimate one component per pruned cluster from `positions`.
///
/// A cluster with fewer than two members has no covariance estimate and is
/// dropped with a warning.
#[allow(clippy::cast_precision_loss)]
pub fn regress(positions: &[DVector<f64>], pruned: &Pruned) -> GaussianMixture {
    let mut members: Vec<Vec<&DVector<f64>>> = vec![Vec::new(); pruned.n_clusters];
    pruned
        .indices
        .iter()
        .zip(pruned.labels.iter())
        .for_each(|(&i, &l)| members[l].push(&positions[i]));

    let mut mixture = GaussianMixture {
        priors: Vec::new(),
        means: Vec::new(),
        covariances: Vec::new(),
    };

    for (label, xs) in members.into_iter().enumerate() {
        if xs.len() < 2 {
            warn!(
                "dropping cluster {label}: {} member(s) cannot give a covariance",
                xs.len()
            );
            continue;
        }
        let n = xs.len() as f64;
        let dim = xs[0].len();
        let mean = xs
            .iter()
            .fold(DVector::zeros(dim), |acc: DVector<f64>, x| acc + *x)
            / n;
        let cov = xs.iter().fold(DMatrix::zeros(dim, dim), |acc: DMatrix<f64>, x| {
            let d = *x - &mean;
            acc + &d * d.transpose()
        }) / (n - 1.0);

        mixture.priors.push(n);
        mixture.means.push(mean);
        mixture.covariances.push(cov);
    }

    mixture
}

impl GaussianMixture {
    pub fn n_components(&self) -> usize {
        self.priors.len()
    }

    pub fn dim(&self) -> usize {
        self.means.first().map_or(0, DVector::len)
    }

    /// Component weights normalized to sum to one.
    pub fn weights(&self) -> Vec<f64> {
        let total: f64 = self.priors.iter().sum();
        self.priors.iter().map(|p| p / total).collect()
    }

    /// Log likelihood of `data` under the normalized mixture.
    pub fn ln_likelihood(&self, data: &[DVector<f64>]) -> f64 {
        let ln_weights: Vec<f64> = self.weights().iter().map(|w| w.ln()).collect();
        data.iter()
            .map(|x| {
                ln_weights
                    .iter()
                    .zip(self.means.iter().zip(self.covariances.iter()))
                    .map(|(ln_w, (mean, cov))| ln_w + ln_gaussian(x, mean, cov))
                    .logsumexp()
            })
            .sum()
    }

    /// Free parameters: a weight, a mean and a symmetric covariance per
    /// component, less one for the weight constraint.
    #[allow(clippy::cast_precision_loss)]
    pub fn n_parameters(&self) -> f64 {
        let k = self.n_components() as f64;
        let m = self.dim() as f64;
        k * (1.0 + 2.0 * m + (m * m - m) / 2.0) - 1.0
    }

    /// Bayesian information criterion of the mixture on `data`.
    #[allow(clippy::cast_precision_loss)]
    pub fn bic(&self, data: &[DVector<f64>]) -> f64 {
        self.n_parameters() * (data.len() as f64).ln() - 2.0 * self.ln_likelihood(data)
    }
}
