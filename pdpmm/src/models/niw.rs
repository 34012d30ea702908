//! Normal-Inverse-Wishart prior over a Gaussian's mean and covariance.

use std::f64::consts::PI;

use nalgebra::{DMatrix, DVector};

use crate::config::Hyperparameters;
use crate::data::Observation;
use crate::error::{Error, Result};
use crate::linalg::{
    ln_det_from_cholesky, ln_multivariate_gamma, ln_student_t, regularized_cholesky,
};

use super::CollapsedPrior;

/// NIW prior `(mu_0, kappa_0, nu_0, Psi_0)` on the position subspace.
#[derive(Clone, Debug, PartialEq)]
pub struct NormalInvWishart {
    mu: DVector<f64>,
    kappa: f64,
    nu: f64,
    scale: DMatrix<f64>,
    ln_det_scale: f64,
    prior_posterior: NiwPosterior,
}

/// Posterior NIW parameters with the Student-t predictive they imply.
#[derive(Clone, Debug, PartialEq)]
pub struct NiwPosterior {
    pub mu: DVector<f64>,
    pub kappa: f64,
    pub nu: f64,
    pub scale: DMatrix<f64>,
    ln_det_scale: f64,
    t_scale_chol: DMatrix<f64>,
    t_ln_det_scale: f64,
    t_dof: f64,
}

impl NiwPosterior {
    pub fn ln_det_scale(&self) -> f64 {
        self.ln_det_scale
    }

    /// Degrees of freedom of the posterior predictive.
    pub fn predictive_dof(&self) -> f64 {
        self.t_dof
    }
}

/// Running sums of a cluster's positions with the cached posterior.
#[derive(Clone, Debug, PartialEq)]
pub struct NiwStat {
    n: usize,
    sum_x: DVector<f64>,
    sum_x_sq: DMatrix<f64>,
    posterior: NiwPosterior,
}

impl NiwStat {
    pub fn n(&self) -> usize {
        self.n
    }

    pub fn sum_x(&self) -> &DVector<f64> {
        &self.sum_x
    }

    pub fn posterior(&self) -> &NiwPosterior {
        &self.posterior
    }
}

impl NormalInvWishart {
    /// Create a new NIW prior.
    ///
    /// `kappa` must be positive, `nu` must exceed `dim - 1`, and `scale` must
    /// be a positive definite `dim x dim` matrix.
    pub fn new(mu: DVector<f64>, kappa: f64, nu: f64, scale: DMatrix<f64>) -> Result<Self> {
        let dim = mu.len();
        if scale.shape() != (dim, dim) {
            return Err(Error::config(format!(
                "NIW scale is {:?}, expected {dim} x {dim}",
                scale.shape()
            )));
        }
        if !(kappa > 0.0) {
            return Err(Error::config(format!("kappa must be positive, got {kappa}")));
        }
        if nu <= dim as f64 - 1.0 {
            return Err(Error::config(format!(
                "nu must exceed {}, got {nu}",
                dim as f64 - 1.0
            )));
        }
        let chol = scale
            .clone()
            .cholesky()
            .ok_or_else(|| Error::config("NIW scale must be positive definite"))?;
        let ln_det_scale = ln_det_from_cholesky(&chol.unpack());

        let mut prior = Self {
            prior_posterior: NiwPosterior {
                mu: mu.clone(),
                kappa,
                nu,
                scale: scale.clone(),
                ln_det_scale,
                t_scale_chol: DMatrix::zeros(dim, dim),
                t_ln_det_scale: 0.0,
                t_dof: 0.0,
            },
            mu,
            kappa,
            nu,
            scale,
            ln_det_scale,
        };
        prior.prior_posterior = prior.posterior(0, &DVector::zeros(dim), &DMatrix::zeros(dim, dim));
        Ok(prior)
    }

    pub fn from_hyperparameters(hyper: &Hyperparameters) -> Result<Self> {
        Self::new(
            hyper.position_mean.clone(),
            hyper.kappa_0,
            hyper.nu_0,
            hyper.position_scale.clone(),
        )
    }

    pub fn dim(&self) -> usize {
        self.mu.len()
    }

    pub fn mu(&self) -> &DVector<f64> {
        &self.mu
    }

    pub fn kappa(&self) -> f64 {
        self.kappa
    }

    pub fn nu(&self) -> f64 {
        self.nu
    }

    pub fn scale(&self) -> &DMatrix<f64> {
        &self.scale
    }

    fn posterior(&self, n: usize, sum_x: &DVector<f64>, sum_x_sq: &DMatrix<f64>) -> NiwPosterior {
        let dim = self.dim();
        let n_f = n as f64;
        let kappa_n = self.kappa + n_f;
        let nu_n = self.nu + n_f;
        let mu_n = (&self.mu * self.kappa + sum_x) / kappa_n;

        let scale_n = &self.scale + sum_x_sq + &self.mu * self.mu.transpose() * self.kappa
            - &mu_n * mu_n.transpose() * kappa_n;
        let (chol, jitter) = regularized_cholesky(&scale_n);
        let scale_n = if jitter > 0.0 {
            &chol * chol.transpose()
        } else {
            scale_n
        };
        let ln_det_scale = ln_det_from_cholesky(&chol);

        let t_dof = nu_n - dim as f64 + 1.0;
        let t_factor = (kappa_n + 1.0) / (kappa_n * t_dof);

        NiwPosterior {
            mu: mu_n,
            kappa: kappa_n,
            nu: nu_n,
            scale: scale_n,
            ln_det_scale,
            t_scale_chol: chol * t_factor.sqrt(),
            t_ln_det_scale: dim as f64 * t_factor.ln() + ln_det_scale,
            t_dof,
        }
    }

    fn refresh(&self, stat: &mut NiwStat) {
        stat.posterior = self.posterior(stat.n, &stat.sum_x, &stat.sum_x_sq);
    }

    pub(crate) fn observe_position(&self, stat: &mut NiwStat, x: &DVector<f64>) {
        stat.n += 1;
        stat.sum_x += x;
        stat.sum_x_sq.ger(1.0, x, x, 1.0);
        self.refresh(stat);
    }

    pub(crate) fn forget_position(&self, stat: &mut NiwStat, x: &DVector<f64>) {
        stat.n = stat.n.saturating_sub(1);
        if stat.n == 0 {
            *stat = self.empty_niw_stat();
            return;
        }
        stat.sum_x -= x;
        stat.sum_x_sq.ger(-1.0, x, x, 1.0);
        self.refresh(stat);
    }

    pub(crate) fn ln_pp_position(&self, x: &DVector<f64>, stat: &NiwStat) -> f64 {
        let post = &stat.posterior;
        ln_student_t(
            x,
            &post.mu,
            &post.t_scale_chol,
            post.t_ln_det_scale,
            post.t_dof,
        )
    }

    pub(crate) fn empty_niw_stat(&self) -> NiwStat {
        let dim = self.dim();
        NiwStat {
            n: 0,
            sum_x: DVector::zeros(dim),
            sum_x_sq: DMatrix::zeros(dim, dim),
            posterior: self.prior_posterior.clone(),
        }
    }

    /// Euclidean distance between the empirical means of two clusters.
    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn position_distance(&self, a: &NiwStat, b: &NiwStat) -> f64 {
        if a.n == 0 || b.n == 0 {
            return f64::INFINITY;
        }
        (&a.sum_x / a.n as f64 - &b.sum_x / b.n as f64).norm()
    }

    pub(crate) fn ln_m_position(&self, stat: &NiwStat) -> f64 {
        if stat.n == 0 {
            return 0.0;
        }
        let p = self.dim();
        let n_f = stat.n as f64;
        let post = &stat.posterior;

        -0.5 * n_f * p as f64 * PI.ln()
            + ln_multivariate_gamma(p, post.nu / 2.0)
            - ln_multivariate_gamma(p, self.nu / 2.0)
            + 0.5 * self.nu * self.ln_det_scale
            - 0.5 * post.nu * post.ln_det_scale
            + 0.5 * p as f64 * (self.kappa.ln() - post.kappa.ln())
    }
}

impl CollapsedPrior<Observation> for NormalInvWishart {
    type Stat = NiwStat;

    fn empty_stat(&self) -> NiwStat {
        self.empty_niw_stat()
    }

    fn observe(&self, stat: &mut NiwStat, x: &Observation) {
        self.observe_position(stat, &x.position);
    }

    fn forget(&self, stat: &mut NiwStat, x: &Observation) {
        self.forget_position(stat, &x.position);
    }

    fn ln_pp(&self, x: &Observation, stat: &NiwStat) -> f64 {
        self.ln_pp_position(&x.position, stat)
    }

    fn ln_m(&self, stat: &NiwStat) -> f64 {
        self.ln_m_position(stat)
    }

    fn distance(&self, a: &NiwStat, b: &NiwStat) -> f64 {
        self.position_distance(a, b)
    }
}
