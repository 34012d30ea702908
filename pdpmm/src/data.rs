pub mod observations;
pub mod partition;

pub use observations::{Observation, Observations};
pub use partition::{ClusterId, Partition};
