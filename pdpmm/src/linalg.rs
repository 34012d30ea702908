//! Dense linear algebra helpers for the collapsed likelihoods.
//!
//! Everything here works on lower Cholesky factors so that the Student-t and
//! marginal likelihood evaluations never form an explicit inverse.

use std::f64::consts::PI;

use log::warn;
use nalgebra::{DMatrix, DVector};
use rv::misc::ln_gammafn;

const MAX_JITTER_ATTEMPTS: usize = 12;
const INITIAL_RELATIVE_JITTER: f64 = 1e-10;

/// Lower Cholesky factor of a symmetric matrix, repairing it if necessary.
///
/// If `matrix` is not numerically positive definite, a diagonal jitter
/// `eps * I` is added with `eps` growing tenfold per attempt until the
/// factorization succeeds. A warning is logged whenever the jitter is used.
/// Returns the factor and the jitter that was applied (`0.0` if none).
pub fn regularized_cholesky(matrix: &DMatrix<f64>) -> (DMatrix<f64>, f64) {
    let symmetric = (matrix + matrix.transpose()) * 0.5;
    if let Some(chol) = symmetric.clone().cholesky() {
        return (chol.unpack(), 0.0);
    }

    let dim = symmetric.nrows();
    let mean_diag = if dim == 0 {
        1.0
    } else {
        symmetric.diagonal().iter().map(|d| d.abs()).sum::<f64>() / (dim as f64)
    };
    let scale = if mean_diag.is_finite() {
        mean_diag.max(1.0)
    } else {
        1.0
    };

    let mut jitter = INITIAL_RELATIVE_JITTER * scale;
    for _ in 0..MAX_JITTER_ATTEMPTS {
        let candidate = &symmetric + DMatrix::identity(dim, dim) * jitter;
        if let Some(chol) = candidate.cholesky() {
            warn!("scale matrix not positive definite; regularized with jitter {jitter:.3e}");
            return (chol.unpack(), jitter);
        }
        jitter *= 10.0;
    }

    warn!("scale matrix could not be regularized; falling back to {scale:.3e} * I");
    (DMatrix::identity(dim, dim) * scale.sqrt(), scale)
}

/// `ln |A|` from the lower Cholesky factor of `A`.
pub fn ln_det_from_cholesky(l: &DMatrix<f64>) -> f64 {
    2.0 * l.diagonal().iter().map(|d| d.ln()).sum::<f64>()
}

/// `x^T A^{-1} x` from the lower Cholesky factor of `A`.
pub fn mahalanobis_sq(l: &DMatrix<f64>, x: &DVector<f64>) -> f64 {
    l.solve_lower_triangular(x)
        .map_or(f64::INFINITY, |y| y.norm_squared())
}

/// Log of the multivariate gamma function `Γ_p(a)`.
pub fn ln_multivariate_gamma(p: usize, a: f64) -> f64 {
    let p_f = p as f64;
    let base = p_f * (p_f - 1.0) / 4.0 * PI.ln();
    (1..=p).fold(base, |acc, j| acc + ln_gammafn(a + (1.0 - j as f64) / 2.0))
}

/// Log density of a multivariate Student-t distribution.
///
/// `scale_chol` is the lower Cholesky factor of the scale matrix and
/// `ln_det_scale` its log determinant.
pub fn ln_student_t(
    x: &DVector<f64>,
    location: &DVector<f64>,
    scale_chol: &DMatrix<f64>,
    ln_det_scale: f64,
    dof: f64,
) -> f64 {
    let p = x.len() as f64;
    let maha = mahalanobis_sq(scale_chol, &(x - location));

    ln_gammafn((dof + p) / 2.0)
        - ln_gammafn(dof / 2.0)
        - 0.5 * p * (dof * PI).ln()
        - 0.5 * ln_det_scale
        - 0.5 * (dof + p) * (maha / dof).ln_1p()
}

/// Log density of a multivariate Gaussian with the given covariance.
///
/// The covariance is regularized when it is singular, so degenerate clusters
/// still produce a finite density.
pub fn ln_gaussian(x: &DVector<f64>, mean: &DVector<f64>, cov: &DMatrix<f64>) -> f64 {
    let (l, _) = regularized_cholesky(cov);
    let p = x.len() as f64;
    let maha = mahalanobis_sq(&l, &(x - mean));
    -0.5 * (p * (2.0 * PI).ln() + ln_det_from_cholesky(&l) + maha)
}

#[cfg(test)]
mod tests {
    use nalgebra::{dmatrix, dvector};

    use super::*;

    #[test]
    fn cholesky_of_positive_definite_is_exact() {
        let a = dmatrix![4.0, 2.0; 2.0, 3.0];
        let (l, jitter) = regularized_cholesky(&a);
        assert_eq!(jitter, 0.0);
        let back = &l * l.transpose();
        assert::close(back.as_slice(), a.as_slice(), 1e-12);
    }

    #[test]
    fn singular_matrix_is_regularized() {
        let a = dmatrix![1.0, 1.0; 1.0, 1.0];
        let (l, jitter) = regularized_cholesky(&a);
        assert!(jitter > 0.0);
        assert!(l.iter().all(|v| v.is_finite()));
        assert!(ln_det_from_cholesky(&l).is_finite());
    }

    #[test]
    fn negative_definite_matrix_is_regularized() {
        let a = dmatrix![-1e-12, 0.0; 0.0, 1.0];
        let (l, jitter) = regularized_cholesky(&a);
        assert!(jitter > 0.0);
        assert!(l.diagonal().iter().all(|d| *d > 0.0));
    }

    #[test]
    fn log_determinant_matches() {
        let a = dmatrix![2.0, 0.5, 0.0; 0.5, 1.0, 0.1; 0.0, 0.1, 3.0];
        let (l, _) = regularized_cholesky(&a);
        assert::close(ln_det_from_cholesky(&l), a.determinant().ln(), 1e-10);
    }

    #[test]
    fn multivariate_gamma_reduces_to_gamma() {
        assert::close(ln_multivariate_gamma(1, 3.5), ln_gammafn(3.5), 1e-12);
        // Γ_2(a) = sqrt(pi) Γ(a) Γ(a - 1/2)
        let expected = 0.5 * PI.ln() + ln_gammafn(4.0) + ln_gammafn(3.5);
        assert::close(ln_multivariate_gamma(2, 4.0), expected, 1e-12);
    }

    #[test]
    fn student_t_with_large_dof_is_gaussian() {
        let x = dvector![0.3, -0.2];
        let mu = dvector![0.0, 0.1];
        let cov = dmatrix![1.0, 0.2; 0.2, 0.5];
        let (l, _) = regularized_cholesky(&cov);
        let t = ln_student_t(&x, &mu, &l, ln_det_from_cholesky(&l), 1e7);
        assert::close(t, ln_gaussian(&x, &mu, &cov), 1e-5);
    }

    #[test]
    fn univariate_student_t_is_normalized() {
        let l = dmatrix![0.7];
        let ln_det = ln_det_from_cholesky(&l);
        let xs = rv::misc::linspace(-200.0, 200.0, 200_001);
        let ps: Vec<f64> = xs
            .iter()
            .map(|x| ln_student_t(&dvector![*x], &dvector![1.0], &l, ln_det, 3.0).exp())
            .collect();
        assert::close(crate::utils::trapz(&ps, &xs), 1.0, 1e-4);
    }
}
