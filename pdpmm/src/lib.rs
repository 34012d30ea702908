//! Parallel collapsed Gibbs sampling for Dirichlet process Gaussian mixtures,
//! with an optional direction-aware likelihood for trajectory data.

pub mod config;
pub mod data;
pub mod dpmm;
pub mod error;
pub mod io;
pub mod linalg;
pub mod mcmc;
pub mod models;
pub mod regression;
pub mod trace;

pub mod utils;

pub use config::{DpmmConfig, LikelihoodMode, SweepStrategy};
pub use dpmm::{run, RunSummary};
pub use error::{Error, Result};
