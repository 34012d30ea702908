//! Run configuration and hyperparameter validation.
//!
//! The flat hyperparameter vector is `[nu_0, kappa_0, mu_0, sigma_0]` with
//! `sigma_0` in row-major order. Its layout depends on the likelihood mode:
//!
//! * [`LikelihoodMode::Position`]: the whole observation is modeled, so with
//!   `D` columns `mu_0` has `D` entries and `sigma_0` is `D x D`.
//! * [`LikelihoodMode::PositionDirection`]: with `P = D / 2`, `mu_0` holds the
//!   prior position mean followed by the prior mean direction (`2P` entries),
//!   and `sigma_0` is `(P + 1) x (P + 1)`: the position scale block plus the
//!   angular variance in the last diagonal entry.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Which collapsed likelihood scores an observation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LikelihoodMode {
    /// NIW over the full observation vector.
    #[default]
    Position,
    /// NIW over the position half plus a tangent-space directional term.
    PositionDirection,
}

/// How a sweep splits evaluation from commitment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepStrategy {
    /// Sequential collapsed Gibbs; the cluster scores of each observation are
    /// evaluated in parallel against the current table.
    #[default]
    Exact,
    /// All observations are scored in parallel against the table frozen at
    /// the start of the sweep, then committed in index order.
    Snapshot,
}

fn default_init_clusters() -> usize {
    1
}

fn default_seed() -> u64 {
    0x1234
}

fn default_thinning() -> usize {
    1
}

fn default_min_parallel_clusters() -> usize {
    8
}

fn default_split_merge_proposals() -> usize {
    5
}

/// Everything a run needs, as supplied by the caller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DpmmConfig {
    /// Declared number of observations `N`.
    pub n_rows: usize,
    /// Declared observation width `D`.
    pub n_cols: usize,
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub iterations: usize,
    pub alpha: f64,
    /// `0` places every observation in its own cluster, `1` places all of
    /// them in one cluster, `k > 1` draws uniform labels from `0..k`.
    #[serde(default = "default_init_clusters")]
    pub init_clusters: usize,
    #[serde(default)]
    pub mode: LikelihoodMode,
    pub hyperparameters: Vec<f64>,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Keep an assignment snapshot every `thinning` iterations.
    #[serde(default = "default_thinning")]
    pub thinning: usize,
    /// Worker threads for evaluation; `None` uses rayon's default.
    #[serde(default)]
    pub threads: Option<usize>,
    #[serde(default)]
    pub strategy: SweepStrategy,
    /// Below this many live clusters the exact strategy scores serially.
    #[serde(default = "default_min_parallel_clusters")]
    pub min_parallel_clusters: usize,
    /// Split-merge proposals made before each Gibbs sweep; `0` disables them.
    #[serde(default = "default_split_merge_proposals")]
    pub split_merge_proposals: usize,
}

impl DpmmConfig {
    /// A configuration with the defaults of every optional field.
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(
        n_rows: usize,
        n_cols: usize,
        input: P,
        output_dir: Q,
        iterations: usize,
        alpha: f64,
        hyperparameters: Vec<f64>,
    ) -> Self {
        Self {
            n_rows,
            n_cols,
            input: input.into(),
            output_dir: output_dir.into(),
            iterations,
            alpha,
            init_clusters: default_init_clusters(),
            mode: LikelihoodMode::default(),
            hyperparameters,
            seed: default_seed(),
            thinning: default_thinning(),
            threads: None,
            strategy: SweepStrategy::default(),
            min_parallel_clusters: default_min_parallel_clusters(),
            split_merge_proposals: default_split_merge_proposals(),
        }
    }

    /// Read a JSON configuration file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())
            .map_err(|e| Error::config(format!("{}: {e}", path.as_ref().display())))?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    /// Check the run settings and parse the hyperparameter vector.
    pub fn validate(&self) -> Result<Hyperparameters> {
        if !(self.alpha.is_finite() && self.alpha > 0.0) {
            return Err(Error::config(format!(
                "alpha must be positive, got {}",
                self.alpha
            )));
        }
        if self.iterations == 0 {
            return Err(Error::config("iteration count must be positive"));
        }
        if self.thinning == 0 {
            return Err(Error::config("thinning interval must be positive"));
        }
        if self.n_rows == 0 || self.n_cols == 0 {
            return Err(Error::config(format!(
                "observation table must be non-empty, got {} x {}",
                self.n_rows, self.n_cols
            )));
        }
        if self.threads == Some(0) {
            return Err(Error::config("worker thread count must be positive"));
        }

        Hyperparameters::from_flat(&self.hyperparameters, self.n_cols, self.mode, self.alpha)
    }
}

/// Prior of the angular axis in direction-aware mode.
#[derive(Clone, Debug, PartialEq)]
pub struct DirectionHyperparameters {
    /// Unit-length prior mean direction.
    pub mean_direction: DVector<f64>,
    /// Prior angular variance scale.
    pub scale: f64,
}

/// Validated prior of the collapsed sampler.
#[derive(Clone, Debug, PartialEq)]
pub struct Hyperparameters {
    pub alpha: f64,
    pub nu_0: f64,
    pub kappa_0: f64,
    pub position_mean: DVector<f64>,
    pub position_scale: DMatrix<f64>,
    pub direction: Option<DirectionHyperparameters>,
}

impl Hyperparameters {
    /// Expected length of the flat hyperparameter vector.
    pub fn flat_len(n_cols: usize, mode: LikelihoodMode) -> usize {
        match mode {
            LikelihoodMode::Position => 2 + n_cols + n_cols * n_cols,
            LikelihoodMode::PositionDirection => {
                let p = n_cols / 2;
                2 + 2 * p + (p + 1) * (p + 1)
            }
        }
    }

    /// Dimension `L` of the space the scale matrix lives in.
    pub fn modeled_dim(&self) -> usize {
        self.position_mean.len() + usize::from(self.direction.is_some())
    }

    /// Parse `[nu_0, kappa_0, mu_0, sigma_0]` for observations of width `n_cols`.
    pub fn from_flat(
        flat: &[f64],
        n_cols: usize,
        mode: LikelihoodMode,
        alpha: f64,
    ) -> Result<Self> {
        if mode == LikelihoodMode::PositionDirection && (n_cols % 2 != 0 || n_cols < 4) {
            return Err(Error::config(format!(
                "direction-aware mode needs an even column count of at least 4, got {n_cols}"
            )));
        }

        let expected = Self::flat_len(n_cols, mode);
        if flat.len() != expected {
            return Err(Error::config(format!(
                "hyperparameter vector has {} entries, expected {expected} for {n_cols} columns in {mode:?} mode",
                flat.len()
            )));
        }
        if let Some(i) = flat.iter().position(|v| !v.is_finite()) {
            return Err(Error::config(format!(
                "hyperparameter entry {i} is not finite"
            )));
        }

        let nu_0 = flat[0];
        let kappa_0 = flat[1];
        if kappa_0 <= 0.0 {
            return Err(Error::config(format!(
                "kappa_0 must be positive, got {kappa_0}"
            )));
        }

        let (p, mean_len, scale_dim) = match mode {
            LikelihoodMode::Position => (n_cols, n_cols, n_cols),
            LikelihoodMode::PositionDirection => (n_cols / 2, n_cols, n_cols / 2 + 1),
        };
        if nu_0 <= (p as f64) - 1.0 {
            return Err(Error::config(format!(
                "nu_0 must exceed {} for a {p}-dimensional scale, got {nu_0}",
                p as f64 - 1.0
            )));
        }

        let mean = &flat[2..2 + mean_len];
        let scale = DMatrix::from_row_slice(scale_dim, scale_dim, &flat[2 + mean_len..]);
        let asymmetry = (&scale - scale.transpose()).abs().max();
        if asymmetry > 1e-9 * scale.abs().max().max(1.0) {
            return Err(Error::config("sigma_0 must be symmetric"));
        }

        let position_scale = scale.view((0, 0), (p, p)).into_owned();
        if position_scale.clone().cholesky().is_none() {
            return Err(Error::config("sigma_0 position block must be positive definite"));
        }

        let direction = match mode {
            LikelihoodMode::Position => None,
            LikelihoodMode::PositionDirection => {
                let mean_direction = DVector::from_column_slice(&mean[p..]);
                let norm = mean_direction.norm();
                if norm == 0.0 {
                    return Err(Error::config("prior mean direction must be non-zero"));
                }
                let angular = scale[(p, p)];
                if angular <= 0.0 {
                    return Err(Error::config(format!(
                        "angular prior variance must be positive, got {angular}"
                    )));
                }
                Some(DirectionHyperparameters {
                    mean_direction: mean_direction / norm,
                    scale: angular,
                })
            }
        };

        Ok(Self {
            alpha,
            nu_0,
            kappa_0,
            position_mean: DVector::from_column_slice(&mean[..p]),
            position_scale,
            direction,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position_flat(d: usize) -> Vec<f64> {
        let mut flat = vec![(d + 3) as f64, 1.0];
        flat.extend(std::iter::repeat(0.0).take(d));
        for i in 0..d {
            for j in 0..d {
                flat.push(if i == j { 0.1 } else { 0.0 });
            }
        }
        flat
    }

    /// The layout produced by the trajectory front end for 2-D data with
    /// velocities: `mu_0 = [0, 0, 0, 1]`, `sigma_0 = diag(0.01, 0.01, 1)`.
    fn direction_flat() -> Vec<f64> {
        vec![
            6.0, 1.0, //
            0.0, 0.0, 0.0, 1.0, //
            0.01, 0.0, 0.0, //
            0.0, 0.01, 0.0, //
            0.0, 0.0, 1.0,
        ]
    }

    fn config(flat: Vec<f64>) -> DpmmConfig {
        DpmmConfig::new(10, 2, "in.csv", "out", 20, 1.0, flat)
    }

    #[test]
    fn position_layout() {
        let hyper = config(position_flat(2)).validate().expect("valid");
        assert_eq!(hyper.modeled_dim(), 2);
        assert_eq!(hyper.position_mean.len(), 2);
        assert_eq!(hyper.position_scale.shape(), (2, 2));
        assert!(hyper.direction.is_none());
    }

    #[test]
    fn direction_layout() {
        let hyper = Hyperparameters::from_flat(
            &direction_flat(),
            4,
            LikelihoodMode::PositionDirection,
            1.0,
        )
        .expect("valid");
        assert_eq!(hyper.modeled_dim(), 3);
        assert_eq!(hyper.position_mean.as_slice(), &[0.0, 0.0]);
        assert_eq!(hyper.position_scale.shape(), (2, 2));
        let dir = hyper.direction.expect("direction prior");
        assert_eq!(dir.mean_direction.as_slice(), &[0.0, 1.0]);
        assert::close(dir.scale, 1.0, 1e-12);
    }

    #[test]
    fn rejects_bad_alpha() {
        let mut cfg = config(position_flat(2));
        cfg.alpha = 0.0;
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
        cfg.alpha = f64::NAN;
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_zero_iterations() {
        let mut cfg = config(position_flat(2));
        cfg.iterations = 0;
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_wrong_hyperparameter_length() {
        let mut flat = position_flat(2);
        flat.pop();
        assert!(matches!(config(flat).validate(), Err(Error::Config(_))));

        // Position-mode layout handed to direction-aware mode.
        let err = Hyperparameters::from_flat(
            &position_flat(4),
            4,
            LikelihoodMode::PositionDirection,
            1.0,
        );
        assert!(matches!(err, Err(Error::Config(_))));
    }

    #[test]
    fn rejects_odd_width_in_direction_mode() {
        let err = Hyperparameters::from_flat(
            &direction_flat(),
            3,
            LikelihoodMode::PositionDirection,
            1.0,
        );
        assert!(matches!(err, Err(Error::Config(_))));

        // One-dimensional directions have no angle to model.
        let flat = vec![3.0, 1.0, 0.0, 1.0, 0.1, 0.0, 0.0, 1.0];
        let err = Hyperparameters::from_flat(&flat, 2, LikelihoodMode::PositionDirection, 1.0);
        assert!(matches!(err, Err(Error::Config(_))));
    }

    #[test]
    fn rejects_asymmetric_scale() {
        let mut flat = position_flat(2);
        flat[5] = 0.05;
        assert!(matches!(config(flat).validate(), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_small_nu() {
        let mut flat = position_flat(2);
        flat[0] = 0.5;
        assert!(matches!(config(flat).validate(), Err(Error::Config(_))));
    }

    #[test]
    fn deserializes_with_defaults() {
        let json = r#"{
            "n_rows": 3,
            "n_cols": 2,
            "input": "data/input.csv",
            "output_dir": "data",
            "iterations": 10,
            "alpha": 1.0,
            "mode": "position",
            "hyperparameters": [5.0, 1.0, 0.0, 0.0, 0.1, 0.0, 0.0, 0.1]
        }"#;
        let cfg: DpmmConfig = serde_json::from_str(json).expect("parses");
        assert_eq!(cfg.init_clusters, 1);
        assert_eq!(cfg.thinning, 1);
        assert_eq!(cfg.strategy, SweepStrategy::Exact);
        assert_eq!(cfg.split_merge_proposals, 5);
        assert!(cfg.validate().is_ok());
    }
}
