use serde::{Deserialize, Serialize};

/// Identity of a cluster for as long as it lives.
///
/// Ids are handed out in increasing order and never reused within a
/// [`Partition`], even after the cluster they named has been destroyed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClusterId(pub u64);

/// Assignment of data indices to clusters, each carrying component data `T`.
///
/// Clusters live in an arena addressed by their position (the *label*). Labels
/// are contiguous from zero; emptied clusters stay in place until
/// [`Partition::compact`] destroys them and renumbers the remaining labels in
/// one pass, so the assignment vector and the cluster table never disagree.
#[derive(Clone, Debug)]
pub struct Partition<T> {
    assignments: Vec<Option<usize>>,
    component_data: Vec<T>,
    counts: Vec<usize>,
    ids: Vec<ClusterId>,
    next_id: u64,
}

impl<T> Partition<T> {
    /// Create a partition of `n` unassigned data.
    #[must_use]
    pub fn new(n: usize) -> Self {
        Self {
            assignments: vec![None; n],
            component_data: Vec::new(),
            counts: Vec::new(),
            ids: Vec::new(),
            next_id: 0,
        }
    }

    /// Return the number of data in this partition.
    #[must_use]
    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Number of clusters, including emptied ones awaiting [`Partition::compact`].
    #[must_use]
    pub fn n_partitions(&self) -> usize {
        self.counts.len()
    }

    #[must_use]
    pub fn partition_sizes(&self) -> &[usize] {
        &self.counts
    }

    /// Get a reference to the component data of every cluster.
    #[must_use]
    pub fn partition_data(&self) -> &[T] {
        &self.component_data
    }

    pub fn partition_data_mut(&mut self, label: usize) -> &mut T {
        &mut self.component_data[label]
    }

    #[must_use]
    pub fn ids(&self) -> &[ClusterId] {
        &self.ids
    }

    /// Current label of the cluster `id`, if it is still alive.
    #[must_use]
    pub fn label_of(&self, id: ClusterId) -> Option<usize> {
        // Appending new clusters and order-preserving compaction keep ids sorted.
        self.ids.binary_search(&id).ok()
    }

    /// Get the assignment for an index.
    #[must_use]
    pub fn assignment(&self, index: usize) -> Option<usize> {
        self.assignments.get(index).copied().flatten()
    }

    #[must_use]
    pub fn assignments(&self) -> &[Option<usize>] {
        &self.assignments
    }

    /// Open a new, empty cluster and return its label.
    pub fn push_partition(&mut self, data: T) -> usize {
        self.component_data.push(data);
        self.counts.push(0);
        self.ids.push(ClusterId(self.next_id));
        self.next_id += 1;
        self.counts.len() - 1
    }

    /// Record that datum `index` belongs to the cluster at `label`.
    ///
    /// # Panics
    /// If the datum is already assigned or `label` does not exist.
    pub fn insert(&mut self, index: usize, label: usize) {
        assert!(
            self.assignments[index].is_none(),
            "datum {index} is already assigned"
        );
        self.counts[label] += 1;
        self.assignments[index] = Some(label);
    }

    /// Take datum `index` out of its cluster, returning the label it had.
    ///
    /// A cluster emptied this way keeps its label until the next
    /// [`Partition::compact`].
    pub fn remove(&mut self, index: usize) -> Option<usize> {
        let label = self.assignments[index].take()?;
        self.counts[label] -= 1;
        Some(label)
    }

    /// Destroy empty clusters and renumber the survivors contiguously,
    /// preserving their relative order. Returns the ids that were destroyed.
    pub fn compact(&mut self) -> Vec<ClusterId> {
        if self.counts.iter().all(|&c| c > 0) {
            return Vec::new();
        }

        let mut destroyed = Vec::new();
        let mut relabel: Vec<Option<usize>> = Vec::with_capacity(self.counts.len());
        let mut next = 0;
        for (&count, &id) in self.counts.iter().zip(self.ids.iter()) {
            if count == 0 {
                relabel.push(None);
                destroyed.push(id);
            } else {
                relabel.push(Some(next));
                next += 1;
            }
        }

        let mut label = 0;
        self.component_data.retain(|_| {
            let keep = relabel[label].is_some();
            label += 1;
            keep
        });
        let mut label = 0;
        self.ids.retain(|_| {
            let keep = relabel[label].is_some();
            label += 1;
            keep
        });
        self.counts.retain(|&c| c > 0);

        // An assigned datum never points at an empty cluster.
        self.assignments
            .iter_mut()
            .filter_map(Option::as_mut)
            .for_each(|a| {
                if let Some(label) = relabel[*a] {
                    *a = label;
                }
            });

        destroyed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(labels: &[usize]) -> Partition<usize> {
        let k = labels.iter().max().map_or(0, |m| m + 1);
        let mut part = Partition::new(labels.len());
        for i in 0..k {
            part.push_partition(i);
        }
        for (i, &l) in labels.iter().enumerate() {
            part.insert(i, l);
        }
        part
    }

    #[test]
    fn partition_insert_remove() {
        let mut part = filled(&[0, 1, 1]);
        assert_eq!(part.assignment(0), Some(0));
        assert_eq!(part.partition_sizes(), &[1, 2]);

        assert_eq!(part.remove(0), Some(0));
        assert_eq!(part.assignment(0), None);
        assert_eq!(part.remove(0), None);

        // Emptied cluster waits for compaction
        assert_eq!(part.n_partitions(), 2);
        assert_eq!(part.partition_sizes(), &[0, 2]);

        let destroyed = part.compact();
        assert_eq!(destroyed, vec![ClusterId(0)]);
        assert_eq!(part.n_partitions(), 1);
        assert_eq!(part.assignment(1), Some(0));
        assert_eq!(part.assignment(2), Some(0));
        assert_eq!(part.partition_data(), &[1]);
    }

    #[test]
    fn compact_keeps_order_and_ids() {
        let mut part = filled(&[0, 1, 2, 3, 2, 0]);
        part.remove(1);
        part.remove(3);
        part.compact();

        assert_eq!(part.ids(), &[ClusterId(0), ClusterId(2)]);
        assert_eq!(part.partition_data(), &[0, 2]);
        assert_eq!(
            part.assignments(),
            &[Some(0), None, Some(1), None, Some(1), Some(0)]
        );
        assert_eq!(part.label_of(ClusterId(2)), Some(1));
        assert_eq!(part.label_of(ClusterId(1)), None);
    }

    #[test]
    fn ids_are_never_reused() {
        let mut part = filled(&[0, 1]);
        part.remove(1);
        part.compact();
        let label = part.push_partition(9);
        part.insert(1, label);

        assert_eq!(part.ids(), &[ClusterId(0), ClusterId(2)]);
        assert_eq!(part.label_of(ClusterId(2)), Some(1));
    }

    #[test]
    fn compact_without_empties_is_noop() {
        let mut part = filled(&[0, 0, 1]);
        assert!(part.compact().is_empty());
        assert_eq!(part.partition_sizes(), &[2, 1]);
    }

    #[test]
    #[should_panic(expected = "already assigned")]
    fn double_insert_panics() {
        let mut part = filled(&[0]);
        part.insert(0, 0);
    }
}
