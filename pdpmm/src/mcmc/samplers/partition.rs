pub mod gibbs;
pub mod split_merge;

pub use gibbs::PartitionGibbs;
pub use split_merge::SplitMerge;
