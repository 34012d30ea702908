use std::fmt::Debug;
use std::marker::PhantomData;

use log::trace;
use rand::Rng;
use rv::prelude::Crp;
use rv::traits::HasDensity;

use crate::data::{ClusterId, Partition};
use crate::utils::{relabel_by_first_appearance, NoPrettyPrint};

use super::partition::PartitionModel;
use super::{CollapsedPrior, Model};

/// How the sampler's first partition is drawn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitialPartition {
    /// Every datum in its own partition.
    Singletons,
    /// All data in one partition.
    Single,
    /// Labels drawn uniformly from `0..k`, then compacted.
    Uniform(usize),
}

impl InitialPartition {
    /// `0` means singletons, `1` a single partition, `k > 1` uniform labels.
    pub fn from_count(k: usize) -> Self {
        match k {
            0 => Self::Singletons,
            1 => Self::Single,
            k => Self::Uniform(k),
        }
    }

    /// Contiguous labels for `n` data.
    pub fn draw<R: Rng>(&self, n: usize, rng: &mut R) -> Vec<usize> {
        match self {
            Self::Singletons => (0..n).collect(),
            Self::Single => vec![0; n],
            Self::Uniform(k) => {
                let raw: Vec<usize> = (0..n).map(|_| rng.random_range(0..*k)).collect();
                relabel_by_first_appearance(&raw).0
            }
        }
    }
}

/// Dirichlet process mixture with the component parameters collapsed out.
#[derive(Clone)]
pub struct ConjugateMixtureModel<X, Pr>
where
    Pr: CollapsedPrior<X>,
{
    prior: Pr,
    alpha: f64,
    partition: Partition<Pr::Stat>,
    empty_stat: Pr::Stat,
    _phantom_x: PhantomData<X>,
}

impl<X, Pr> std::fmt::Debug for ConjugateMixtureModel<X, Pr>
where
    Pr: CollapsedPrior<X> + Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let assignments: Vec<_> = self
            .partition
            .assignments()
            .iter()
            .map(|a| {
                a.as_ref()
                    .map_or_else(|| String::from("-"), ToString::to_string)
            })
            .map(NoPrettyPrint::new)
            .collect();

        f.debug_struct("MixtureModel")
            .field("prior", &self.prior)
            .field("alpha", &self.alpha)
            .field("assignments", &NoPrettyPrint::new(assignments))
            .field(
                "counts",
                &NoPrettyPrint::new(self.partition.partition_sizes()),
            )
            .field("ids", &NoPrettyPrint::new(self.partition.ids()))
            .finish_non_exhaustive()
    }
}

impl<X, Pr> ConjugateMixtureModel<X, Pr>
where
    Pr: CollapsedPrior<X>,
{
    /// Create a new `ConjugateMixtureModel` from a prior, data, alpha and an
    /// initial partition.
    pub fn new<'a, R, ID>(
        prior: Pr,
        alpha: f64,
        data: ID,
        init: InitialPartition,
        rng: &mut R,
    ) -> Self
    where
        R: Rng,
        ID: ExactSizeIterator + Iterator<Item = &'a X>,
        X: 'a,
    {
        let labels: Vec<Option<usize>> = init.draw(data.len(), rng).into_iter().map(Some).collect();
        Self::with_assignment(prior, alpha, data, &labels)
    }

    /// Create a new `ConjugateMixtureModel` from a set of given assignments
    ///
    /// Labels need not be contiguous; unused labels are compacted away.
    ///
    /// # Panics
    /// If the number of assignments differs from the number of data.
    pub fn with_assignment<'a, ID>(
        prior: Pr,
        alpha: f64,
        data: ID,
        assignments: &[Option<usize>],
    ) -> Self
    where
        ID: ExactSizeIterator + Iterator<Item = &'a X>,
        X: 'a,
    {
        assert_eq!(
            assignments.len(),
            data.len(),
            "Assignment doesn't match data size: {} != {}",
            assignments.len(),
            data.len()
        );

        let empty_stat = prior.empty_stat();
        let n_partitions: usize = assignments
            .iter()
            .copied()
            .flatten()
            .map(|x| x + 1)
            .max()
            .unwrap_or(0);

        let mut partition = Partition::new(assignments.len());
        (0..n_partitions).for_each(|_| {
            partition.push_partition(empty_stat.clone());
        });

        assignments
            .iter()
            .zip(data)
            .enumerate()
            .for_each(|(idx, (&asgn, x))| {
                if let Some(asgn) = asgn {
                    prior.observe(partition.partition_data_mut(asgn), x);
                    partition.insert(idx, asgn);
                }
            });
        partition.compact();

        Self {
            prior,
            alpha,
            partition,
            empty_stat,
            _phantom_x: PhantomData,
        }
    }

    pub fn prior(&self) -> &Pr {
        &self.prior
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn partition_stats(&self) -> &[Pr::Stat] {
        self.partition.partition_data()
    }

    pub fn empty_stat(&self) -> &Pr::Stat {
        &self.empty_stat
    }

    /// Labels of the assigned data in index order.
    pub fn labels(&self) -> Vec<usize> {
        self.partition.assignments().iter().flatten().copied().collect()
    }

    /// Portion of the `log_score` from the inner distributions marginal probability.
    pub fn log_m(&self) -> f64 {
        self.partition
            .partition_data()
            .iter()
            .map(|stat| self.prior.ln_m(stat))
            .sum()
    }

    /// Portion of `log_score` from the CRP prior
    pub fn crp_log_f(&self) -> f64 {
        let z = self.labels();
        if z.is_empty() {
            return 0.0;
        }
        let n = z.len();
        let part =
            rv::data::Partition::new_unchecked(z, self.partition.partition_sizes().to_vec());
        Crp::new(self.alpha, n).map_or(f64::NEG_INFINITY, |crp| crp.ln_f(&part))
    }

    pub fn n_partitions(&self) -> usize {
        self.partition.n_partitions()
    }

    pub fn counts(&self) -> &[usize] {
        self.partition.partition_sizes()
    }

    pub fn assignments(&self) -> &[Option<usize>] {
        self.partition.assignments()
    }

    pub fn partition_id(&self, partition_index: usize) -> ClusterId {
        self.partition.ids()[partition_index]
    }

    pub fn partition_index(&self, id: ClusterId) -> Option<usize> {
        self.partition.label_of(id)
    }

    /// Destroy empty partitions, returning how many there were.
    pub fn compact(&mut self) -> usize {
        let destroyed = self.partition.compact();
        for id in &destroyed {
            trace!("destroyed cluster {id:?}");
        }
        destroyed.len()
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn ln_pp_partition(&self, x: &X, partition_index: usize) -> f64 {
        let count = self.partition.partition_sizes()[partition_index];
        if count == 0 {
            return f64::NEG_INFINITY;
        }
        let stat = &self.partition.partition_data()[partition_index];
        (count as f64).ln() + self.prior.ln_pp(x, stat)
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn ln_pp_partition_without(&self, x: &X, partition_index: usize) -> f64 {
        let count = self.partition.partition_sizes()[partition_index].saturating_sub(1);
        if count == 0 {
            return f64::NEG_INFINITY;
        }
        let stat = &self.partition.partition_data()[partition_index];
        (count as f64).ln() + self.prior.ln_pp_without(x, stat)
    }

    pub fn ln_pp_empty(&self, x: &X) -> f64 {
        self.alpha.ln() + self.prior.ln_pp(x, &self.empty_stat)
    }

    /// Closest pair of non-empty partitions under [`CollapsedPrior::distance`].
    /// Ties keep the first pair in index order.
    pub fn closest_partitions(&self) -> Option<(usize, usize)> {
        let stats = self.partition_stats();
        let live: Vec<usize> = self
            .counts()
            .iter()
            .enumerate()
            .filter(|(_, &c)| c > 0)
            .map(|(i, _)| i)
            .collect();

        let mut best: Option<(f64, usize, usize)> = None;
        for (n, &a) in live.iter().enumerate() {
            for &b in &live[n + 1..] {
                let d = self.prior.distance(&stats[a], &stats[b]);
                if best.map_or(true, |(best_d, _, _)| d < best_d) {
                    best = Some((d, a, b));
                }
            }
        }
        best.map(|(_, a, b)| (a, b))
    }
}

impl<X, Pr, D> Model<D> for ConjugateMixtureModel<X, Pr>
where
    Pr: CollapsedPrior<X>,
    D: std::ops::Index<usize, Output = X>,
{
    fn ln_score(&self, _data: &D) -> f64 {
        self.crp_log_f() + self.log_m()
    }
}

impl<X, Pr, D> PartitionModel<X, D> for ConjugateMixtureModel<X, Pr>
where
    Pr: CollapsedPrior<X>,
    D: std::ops::Index<usize, Output = X>,
{
    fn assign(&mut self, idx: usize, partition_index: usize, data: &D) {
        if self.partition.assignment(idx).is_some() {
            // Remove from the source part if this datum is assigned to one
            self.unassign(idx, data);
        }

        let partition_index = if partition_index >= self.partition.n_partitions() {
            let label = self.partition.push_partition(self.empty_stat.clone());
            trace!("opened cluster {:?}", self.partition.ids()[label]);
            label
        } else {
            partition_index
        };

        self.prior
            .observe(self.partition.partition_data_mut(partition_index), &data[idx]);
        self.partition.insert(idx, partition_index);
    }

    fn unassign(&mut self, idx: usize, data: &D) -> Option<usize> {
        let assigned_to = self.partition.remove(idx)?;
        self.prior
            .forget(self.partition.partition_data_mut(assigned_to), &data[idx]);
        Some(assigned_to)
    }

    fn compact(&mut self) -> usize {
        Self::compact(self)
    }

    fn n_partitions(&self) -> usize {
        Self::n_partitions(self)
    }

    fn ln_pp_partition(&self, x: &X, partition_index: usize) -> f64 {
        Self::ln_pp_partition(self, x, partition_index)
    }

    fn ln_pp_partition_without(&self, x: &X, partition_index: usize) -> f64 {
        Self::ln_pp_partition_without(self, x, partition_index)
    }

    fn ln_pp_empty(&self, x: &X) -> f64 {
        Self::ln_pp_empty(self, x)
    }

    fn closest_partitions(&self) -> Option<(usize, usize)> {
        Self::closest_partitions(self)
    }

    fn partition_id(&self, partition_index: usize) -> ClusterId {
        Self::partition_id(self, partition_index)
    }

    fn partition_index(&self, id: ClusterId) -> Option<usize> {
        Self::partition_index(self, id)
    }

    fn counts(&self) -> &[usize] {
        Self::counts(self)
    }

    fn assignments(&self) -> &[Option<usize>] {
        Self::assignments(self)
    }
}
