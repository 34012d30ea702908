use crate::data::ClusterId;

use super::Model;

/// A model which support a partition based hierarchy.
///
/// Partitions are addressed by a contiguous index that may change when
/// [`PartitionModel::compact`] runs, and by a [`ClusterId`] that does not.
pub trait PartitionModel<X, D>: Model<D>
where
    D: std::ops::Index<usize, Output = X>,
{
    /// Assign a datum at `idx` to the partition `partition_index`.
    ///
    /// An index of [`PartitionModel::n_partitions`] or more opens a new
    /// partition.
    fn assign(&mut self, idx: usize, partition_index: usize, data: &D);
    /// Unassign a datum at `idx`, returning the partition it left.
    ///
    /// A partition emptied this way keeps its index until the next
    /// [`PartitionModel::compact`].
    fn unassign(&mut self, idx: usize, data: &D) -> Option<usize>;
    /// Destroy every empty partition and renumber the rest, returning how
    /// many were destroyed.
    fn compact(&mut self) -> usize;
    /// The number of partitions.
    fn n_partitions(&self) -> usize;
    /// Unnormalized log weight of `x` joining partition `partition_index`:
    /// log size plus log posterior predictive. `-inf` for an empty partition.
    fn ln_pp_partition(&self, x: &X, partition_index: usize) -> f64;
    /// As [`PartitionModel::ln_pp_partition`] for the partition `x` is
    /// currently in, with `x` taken out of it first.
    fn ln_pp_partition_without(&self, x: &X, partition_index: usize) -> f64;
    /// Unnormalized log weight of `x` opening a new partition.
    fn ln_pp_empty(&self, x: &X) -> f64;

    /// The two live partitions whose members are most alike, lower index
    /// first. `None` with fewer than two live partitions.
    fn closest_partitions(&self) -> Option<(usize, usize)>;

    /// Stable identity of the partition at `partition_index`.
    fn partition_id(&self, partition_index: usize) -> ClusterId;
    /// Current index of the partition `id`, if it is still alive.
    fn partition_index(&self, id: ClusterId) -> Option<usize>;

    /// Size of each partition.
    fn counts(&self) -> &[usize];
    /// Partition assignments for each datum.
    fn assignments(&self) -> &[Option<usize>];

    /// The number of data.
    fn n_data(&self) -> usize {
        self.assignments().len()
    }
}
