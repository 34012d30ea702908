use std::fmt::Debug;

/// A generic trait for models which have some scoring function.
pub trait Model<D> {
    /// Log posterior probability or any generic log score.
    ///
    /// Arguments
    /// =========
    ///
    /// * `data` - The data to which the model is being applied.
    fn ln_score(&self, data: &D) -> f64;
}

/// A conjugate prior whose component parameters are integrated out, leaving
/// a sufficient statistic as the only per-cluster state.
pub trait CollapsedPrior<X> {
    /// Sufficient statistic of a cluster, together with any cached posterior.
    type Stat: Clone + Debug + Send + Sync;

    /// Statistic of a cluster with no members.
    fn empty_stat(&self) -> Self::Stat;

    /// Add `x` to the statistic.
    fn observe(&self, stat: &mut Self::Stat, x: &X);

    /// Remove `x` from the statistic. `x` must have been observed before.
    fn forget(&self, stat: &mut Self::Stat, x: &X);

    /// Log posterior predictive density of `x` given the members in `stat`.
    fn ln_pp(&self, x: &X, stat: &Self::Stat) -> f64;

    /// Log marginal likelihood of the members in `stat`.
    fn ln_m(&self, stat: &Self::Stat) -> f64;

    /// Dissimilarity of two clusters, used to pick merge candidates.
    /// Infinite when either cluster is empty.
    fn distance(&self, a: &Self::Stat, b: &Self::Stat) -> f64;

    /// Log posterior predictive of `x` against `stat` with `x` itself removed.
    fn ln_pp_without(&self, x: &X, stat: &Self::Stat) -> f64 {
        let mut stat = stat.clone();
        self.forget(&mut stat, x);
        self.ln_pp(x, &stat)
    }
}

pub mod directional;
pub mod mixture;
pub mod niw;
pub mod partition;

pub use directional::{DirectionalNiw, DirectionalPrior};
pub use mixture::{ConjugateMixtureModel, InitialPartition};
pub use niw::NormalInvWishart;
pub use partition::PartitionModel;
