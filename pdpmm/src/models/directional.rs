//! Direction-aware likelihood.
//!
//! A unit direction `u` is mapped into the tangent space at the prior mean
//! direction `mu` by the log map `v = acos(u.mu) * w / |w|` with
//! `w = u - (u.mu) mu`, so `|v|` is the angle between `u` and `mu`. The
//! tangent vectors of a cluster are modeled as isotropic Gaussians in the
//! `P - 1` dimensional tangent space with a Normal-Inverse-Gamma prior on their
//! mean and variance, which gives a closed form marginal and a Student-t
//! predictive that agree exactly. The log map distorts angles near the
//! antipode of `mu`.

use std::f64::consts::PI;

use nalgebra::DVector;
use rv::misc::ln_gammafn;

use crate::config::Hyperparameters;
use crate::data::Observation;
use crate::error::{Error, Result};

use super::niw::{NiwStat, NormalInvWishart};
use super::CollapsedPrior;

/// Normal-Inverse-Gamma prior on the tangent vectors of a cluster's
/// directions: mean `0` with precision scale `kappa`, shape `nu / 2` and rate
/// `scale / 2`.
#[derive(Clone, Debug, PartialEq)]
pub struct DirectionalPrior {
    mean_direction: DVector<f64>,
    kappa: f64,
    nu: f64,
    scale: f64,
}

/// Tangent-space sums of a cluster's directions with the cached posterior.
#[derive(Clone, Debug, PartialEq)]
pub struct DirectionStat {
    n: usize,
    sum_v: DVector<f64>,
    sum_v_sq: f64,
    kappa: f64,
    mean: DVector<f64>,
    shape: f64,
    rate: f64,
}

impl DirectionStat {
    /// Number of members with a non-zero direction.
    pub fn n(&self) -> usize {
        self.n
    }

    /// Posterior mean tangent vector.
    pub fn mean_tangent(&self) -> &DVector<f64> {
        &self.mean
    }

    /// Posterior rate of the angular variance.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn shape(&self) -> f64 {
        self.shape
    }
}

fn unit_direction(x: &Observation) -> Option<DVector<f64>> {
    let u = x.direction.as_ref()?;
    let norm = u.norm();
    (norm > 0.0).then(|| u / norm)
}

/// A unit vector orthogonal to the unit vector `base`.
fn orthogonal_to(base: &DVector<f64>) -> DVector<f64> {
    let axis = base
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
        .map_or(0, |(k, _)| k);
    let mut e = DVector::zeros(base.len());
    e[axis] = 1.0;
    let w = &e - base * base[axis];
    let norm = w.norm();
    w / norm
}

/// Tangent vector at the unit `base` pointing to the unit `u`, with length
/// equal to the angle between them.
pub fn log_map(base: &DVector<f64>, u: &DVector<f64>) -> DVector<f64> {
    let cos = u.dot(base).clamp(-1.0, 1.0);
    let theta = cos.acos();
    let w = u - base * cos;
    let w_norm = w.norm();
    if w_norm > 1e-12 {
        w * (theta / w_norm)
    } else if cos > 0.0 {
        DVector::zeros(base.len())
    } else {
        // Antipodal: every tangent direction is equally far.
        orthogonal_to(base) * theta
    }
}

/// Unit vector reached from the unit `base` along the tangent vector `v`.
pub fn exp_map(base: &DVector<f64>, v: &DVector<f64>) -> DVector<f64> {
    let theta = v.norm();
    if theta > 0.0 {
        base * theta.cos() + v * (theta.sin() / theta)
    } else {
        base.clone()
    }
}

impl DirectionalPrior {
    /// Create a new directional prior.
    ///
    /// The mean direction must be non-zero with at least two components, and
    /// `kappa`, `nu` and `scale` must be positive.
    pub fn new(mean_direction: DVector<f64>, kappa: f64, nu: f64, scale: f64) -> Result<Self> {
        if mean_direction.len() < 2 {
            return Err(Error::config(format!(
                "directions need at least two components, got {}",
                mean_direction.len()
            )));
        }
        let norm = mean_direction.norm();
        if !(norm > 0.0 && norm.is_finite()) {
            return Err(Error::config("prior mean direction must be non-zero"));
        }
        if !(kappa > 0.0 && nu > 0.0 && scale > 0.0) {
            return Err(Error::config(format!(
                "directional prior needs positive kappa, nu and scale, got {kappa}, {nu}, {scale}"
            )));
        }
        Ok(Self {
            mean_direction: mean_direction / norm,
            kappa,
            nu,
            scale,
        })
    }

    pub fn dim(&self) -> usize {
        self.mean_direction.len()
    }

    /// Dimension of the tangent space the angular model lives in.
    #[allow(clippy::cast_precision_loss)]
    fn tangent_dim(&self) -> f64 {
        (self.dim() - 1) as f64
    }

    pub fn mean_direction(&self) -> &DVector<f64> {
        &self.mean_direction
    }

    /// Posterior mean direction of the members in `stat`.
    pub fn posterior_direction(&self, stat: &DirectionStat) -> DVector<f64> {
        exp_map(&self.mean_direction, &stat.mean)
    }

    #[allow(clippy::cast_precision_loss)]
    fn refresh(&self, stat: &mut DirectionStat) {
        let n_f = stat.n as f64;
        stat.kappa = self.kappa + n_f;
        stat.mean = &stat.sum_v / stat.kappa;
        stat.shape = 0.5 * (self.nu + n_f * self.tangent_dim());
        let spread = (stat.sum_v_sq - stat.sum_v.norm_squared() / stat.kappa).max(0.0);
        stat.rate = 0.5 * (self.scale + spread);
    }

    pub(crate) fn empty_direction_stat(&self) -> DirectionStat {
        let dim = self.dim();
        DirectionStat {
            n: 0,
            sum_v: DVector::zeros(dim),
            sum_v_sq: 0.0,
            kappa: self.kappa,
            mean: DVector::zeros(dim),
            shape: 0.5 * self.nu,
            rate: 0.5 * self.scale,
        }
    }

    pub(crate) fn observe_direction(&self, stat: &mut DirectionStat, x: &Observation) {
        if let Some(u) = unit_direction(x) {
            let v = log_map(&self.mean_direction, &u);
            stat.n += 1;
            stat.sum_v_sq += v.norm_squared();
            stat.sum_v += v;
            self.refresh(stat);
        }
    }

    pub(crate) fn forget_direction(&self, stat: &mut DirectionStat, x: &Observation) {
        if let Some(u) = unit_direction(x) {
            stat.n = stat.n.saturating_sub(1);
            if stat.n == 0 {
                *stat = self.empty_direction_stat();
                return;
            }
            let v = log_map(&self.mean_direction, &u);
            stat.sum_v_sq -= v.norm_squared();
            stat.sum_v -= v;
            self.refresh(stat);
        }
    }

    /// Log Student-t predictive of the tangent vector `v`.
    pub(crate) fn ln_pp_tangent(&self, v: &DVector<f64>, stat: &DirectionStat) -> f64 {
        let q = self.tangent_dim();
        let dof = 2.0 * stat.shape;
        let t_scale = stat.rate * (stat.kappa + 1.0) / (stat.shape * stat.kappa);
        let dist_sq = (v - &stat.mean).norm_squared();

        ln_gammafn(stat.shape + 0.5 * q)
            - ln_gammafn(stat.shape)
            - 0.5 * q * (dof * PI * t_scale).ln()
            - (stat.shape + 0.5 * q) * (dist_sq / (dof * t_scale)).ln_1p()
    }

    pub(crate) fn ln_pp_direction(&self, x: &Observation, stat: &DirectionStat) -> f64 {
        unit_direction(x).map_or(0.0, |u| {
            self.ln_pp_tangent(&log_map(&self.mean_direction, &u), stat)
        })
    }

    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn ln_m_direction(&self, stat: &DirectionStat) -> f64 {
        if stat.n == 0 {
            return 0.0;
        }
        let q = self.tangent_dim();
        let shape_0 = 0.5 * self.nu;
        let rate_0 = 0.5 * self.scale;

        ln_gammafn(stat.shape) - ln_gammafn(shape_0) + shape_0 * rate_0.ln()
            - stat.shape * stat.rate.ln()
            + 0.5 * q * (self.kappa.ln() - stat.kappa.ln())
            - 0.5 * stat.n as f64 * q * (2.0 * PI).ln()
    }
}

/// NIW on positions combined with the tangent-space directional term.
#[derive(Clone, Debug, PartialEq)]
pub struct DirectionalNiw {
    position: NormalInvWishart,
    direction: DirectionalPrior,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DirectionalNiwStat {
    pub position: NiwStat,
    pub direction: DirectionStat,
}

impl DirectionalNiw {
    pub fn new(position: NormalInvWishart, direction: DirectionalPrior) -> Result<Self> {
        if position.dim() != direction.dim() {
            return Err(Error::config(format!(
                "position prior has dimension {} but direction prior has {}",
                position.dim(),
                direction.dim()
            )));
        }
        Ok(Self {
            position,
            direction,
        })
    }

    pub fn from_hyperparameters(hyper: &Hyperparameters) -> Result<Self> {
        let dir = hyper
            .direction
            .as_ref()
            .ok_or_else(|| Error::config("hyperparameters carry no direction prior"))?;
        Self::new(
            NormalInvWishart::from_hyperparameters(hyper)?,
            DirectionalPrior::new(
                dir.mean_direction.clone(),
                hyper.kappa_0,
                hyper.nu_0,
                dir.scale,
            )?,
        )
    }

    pub fn position(&self) -> &NormalInvWishart {
        &self.position
    }

    pub fn direction(&self) -> &DirectionalPrior {
        &self.direction
    }
}

impl CollapsedPrior<Observation> for DirectionalNiw {
    type Stat = DirectionalNiwStat;

    fn empty_stat(&self) -> DirectionalNiwStat {
        DirectionalNiwStat {
            position: self.position.empty_niw_stat(),
            direction: self.direction.empty_direction_stat(),
        }
    }

    fn observe(&self, stat: &mut DirectionalNiwStat, x: &Observation) {
        self.position.observe_position(&mut stat.position, &x.position);
        self.direction.observe_direction(&mut stat.direction, x);
    }

    fn forget(&self, stat: &mut DirectionalNiwStat, x: &Observation) {
        self.position.forget_position(&mut stat.position, &x.position);
        self.direction.forget_direction(&mut stat.direction, x);
    }

    fn ln_pp(&self, x: &Observation, stat: &DirectionalNiwStat) -> f64 {
        self.position.ln_pp_position(&x.position, &stat.position)
            + self.direction.ln_pp_direction(x, &stat.direction)
    }

    fn ln_m(&self, stat: &DirectionalNiwStat) -> f64 {
        self.position.ln_m_position(&stat.position) + self.direction.ln_m_direction(&stat.direction)
    }

    fn distance(&self, a: &DirectionalNiwStat, b: &DirectionalNiwStat) -> f64 {
        self.position.position_distance(&a.position, &b.position)
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::{dmatrix, dvector};
    use rv::misc::linspace;

    use crate::config::LikelihoodMode;
    use crate::utils::trapz;

    use super::*;

    fn prior() -> DirectionalPrior {
        DirectionalPrior::new(dvector![1.0, 0.0], 0.5, 3.0, 0.2).expect("valid")
    }

    fn heading(dx: f64, dy: f64) -> Observation {
        Observation::from_row(&[0.0, 0.0, dx, dy], LikelihoodMode::PositionDirection)
    }

    #[test]
    fn log_map_measures_the_angle() {
        let base = dvector![1.0, 0.0, 0.0];
        let v = log_map(&base, &dvector![0.0, 1.0, 0.0]);
        assert::close(v.as_slice(), &[0.0, std::f64::consts::FRAC_PI_2, 0.0][..], 1e-12);
        assert::close(log_map(&base, &base).norm(), 0.0, 1e-12);

        let back = log_map(&base, &dvector![-1.0, 0.0, 0.0]);
        assert::close(back.norm(), PI, 1e-12);
        assert::close(back.dot(&base), 0.0, 1e-12);

        let u = dvector![0.6, 0.0, 0.8];
        assert::close(exp_map(&base, &log_map(&base, &u)).as_slice(), u.as_slice(), 1e-12);
    }

    #[test]
    fn tangent_predictive_is_normalized() {
        let prior = prior();
        let mut stat = prior.empty_direction_stat();
        for (dx, dy) in [(1.0, 0.3), (1.0, -0.1), (0.8, 0.5)] {
            prior.observe_direction(&mut stat, &heading(dx, dy));
        }

        // One tangent dimension for planar directions.
        let xs = linspace(-400.0, 400.0, 400_001);
        let ps: Vec<f64> = xs
            .iter()
            .map(|t| prior.ln_pp_tangent(&dvector![0.0, *t], &stat).exp())
            .collect();
        assert::close(trapz(&ps, &xs), 1.0, 1e-4);
    }

    #[test]
    fn marginal_chain_rule() {
        // ln m(D + x) - ln m(D) == ln p(x | D)
        let prior = DirectionalPrior::new(dvector![0.0, 1.0, 1.0], 0.3, 2.5, 0.4).expect("valid");
        let headings = [
            [0.0, 1.0, 0.9],
            [0.2, 0.7, 1.0],
            [-1.0, 0.1, 0.3],
            [0.0, -1.0, -1.0],
            [0.5, 0.5, -0.2],
        ];

        let mut stat = prior.empty_direction_stat();
        for h in &headings {
            let x = Observation::from_row(
                &[0.0, 0.0, 0.0, h[0], h[1], h[2]],
                LikelihoodMode::PositionDirection,
            );
            let before = prior.ln_m_direction(&stat);
            let ln_pp = prior.ln_pp_direction(&x, &stat);
            prior.observe_direction(&mut stat, &x);
            let after = prior.ln_m_direction(&stat);
            assert::close(after - before, ln_pp, 1e-9);
        }
        assert_eq!(stat.n(), headings.len());
    }

    #[test]
    fn rejects_invalid_parameters() {
        assert!(DirectionalPrior::new(dvector![0.0, 0.0], 1.0, 3.0, 1.0).is_err());
        assert!(DirectionalPrior::new(dvector![1.0, 0.0], 1.0, 3.0, 0.0).is_err());
        assert!(DirectionalPrior::new(dvector![1.0], 1.0, 3.0, 1.0).is_err());
    }

    #[test]
    fn aligned_direction_scores_higher() {
        let prior = prior();
        let mut stat = prior.empty_direction_stat();
        for (dx, dy) in [(0.1, 1.0), (-0.1, 1.0), (0.0, 2.0), (0.05, 0.9)] {
            prior.observe_direction(&mut stat, &heading(dx, dy));
        }
        let along = prior.ln_pp_direction(&heading(0.0, 1.0), &stat);
        let against = prior.ln_pp_direction(&heading(0.0, -1.0), &stat);
        assert!(along > against);
    }

    #[test]
    fn posterior_direction_follows_members() {
        let prior = DirectionalPrior::new(dvector![1.0, 0.0], 0.1, 3.0, 0.2).expect("valid");
        let mut stat = prior.empty_direction_stat();
        for _ in 0..5 {
            prior.observe_direction(&mut stat, &heading(0.0, 3.0));
        }
        assert_eq!(stat.n(), 5);
        let mean = prior.posterior_direction(&stat);
        assert!(mean[1] > 0.99);
        assert::close(mean.norm(), 1.0, 1e-12);
    }

    #[test]
    fn spread_raises_the_rate() {
        let prior = prior();
        let mut tight = prior.empty_direction_stat();
        let mut loose = prior.empty_direction_stat();
        for _ in 0..4 {
            prior.observe_direction(&mut tight, &heading(1.0, 0.0));
        }
        for (dx, dy) in [(1.0, 0.0), (0.0, 1.0), (-1.0, 0.2), (0.0, -1.0)] {
            prior.observe_direction(&mut loose, &heading(dx, dy));
        }
        // Members on the prior mean direction leave the rate at its prior value.
        assert::close(tight.rate(), 0.1, 1e-12);
        assert::close(tight.shape(), 0.5 * (3.0 + 4.0), 1e-12);
        assert!(loose.rate() > tight.rate());
    }

    #[test]
    fn zero_direction_carries_no_information() {
        let prior = prior();
        let mut stat = prior.empty_direction_stat();
        prior.observe_direction(&mut stat, &heading(0.0, 0.0));
        assert_eq!(stat, prior.empty_direction_stat());
        assert_eq!(prior.ln_pp_direction(&heading(0.0, 0.0), &stat), 0.0);
    }

    #[test]
    fn forget_undoes_observe() {
        let prior = prior();
        let mut stat = prior.empty_direction_stat();
        prior.observe_direction(&mut stat, &heading(0.3, 1.0));
        let once = stat.clone();
        prior.observe_direction(&mut stat, &heading(-1.0, 0.2));
        prior.forget_direction(&mut stat, &heading(-1.0, 0.2));

        assert_eq!(stat.n(), 1);
        assert::close(stat.rate(), once.rate(), 1e-12);
        assert::close(
            stat.mean_tangent().as_slice(),
            once.mean_tangent().as_slice(),
            1e-12,
        );

        prior.forget_direction(&mut stat, &heading(0.3, 1.0));
        assert_eq!(stat, prior.empty_direction_stat());
    }

    fn combined() -> DirectionalNiw {
        let position =
            NormalInvWishart::new(dvector![0.0, 0.0], 1.0, 4.0, dmatrix![0.5, 0.0; 0.0, 0.5])
                .expect("valid");
        DirectionalNiw::new(position, prior()).expect("valid")
    }

    #[test]
    fn combined_score_is_sum_of_parts() {
        let model = combined();
        let members = [
            Observation::from_row(&[0.1, 0.0, 1.0, 0.1], LikelihoodMode::PositionDirection),
            Observation::from_row(&[0.0, 0.2, 1.0, -0.1], LikelihoodMode::PositionDirection),
        ];
        let mut stat = model.empty_stat();
        for x in &members {
            model.observe(&mut stat, x);
        }

        let x = Observation::from_row(&[0.05, 0.1, 0.8, 0.3], LikelihoodMode::PositionDirection);
        let expected = model.position().ln_pp_position(&x.position, &stat.position)
            + model.direction().ln_pp_direction(&x, &stat.direction);
        assert::close(model.ln_pp(&x, &stat), expected, 1e-12);
    }

    #[test]
    fn combined_marginal_chain_rule() {
        let model = combined();
        let rows = [
            [0.1, 0.0, 1.0, 0.1],
            [0.0, 0.2, 1.0, -0.1],
            [1.5, -0.4, 0.0, 0.0],
            [-0.3, 0.8, -0.2, 1.0],
        ];

        let mut stat = model.empty_stat();
        for row in &rows {
            let x = Observation::from_row(row, LikelihoodMode::PositionDirection);
            let before = model.ln_m(&stat);
            let ln_pp = model.ln_pp(&x, &stat);
            model.observe(&mut stat, &x);
            assert::close(model.ln_m(&stat) - before, ln_pp, 1e-9);
        }
        // The zero heading adds a position but no direction.
        assert_eq!(stat.position.n(), 4);
        assert_eq!(stat.direction.n(), 3);
    }

    #[test]
    fn distance_compares_positions_only() {
        let model = combined();
        let mut a = model.empty_stat();
        let mut b = model.empty_stat();
        model.observe(
            &mut a,
            &Observation::from_row(&[0.0, 0.0, 1.0, 0.0], LikelihoodMode::PositionDirection),
        );
        model.observe(
            &mut b,
            &Observation::from_row(&[3.0, 4.0, -1.0, 0.0], LikelihoodMode::PositionDirection),
        );
        assert::close(model.distance(&a, &b), 5.0, 1e-12);
        assert_eq!(model.distance(&a, &model.empty_stat()), f64::INFINITY);
    }

    #[test]
    fn mismatched_dimensions_are_rejected() {
        let position = NormalInvWishart::new(dvector![0.0], 1.0, 3.0, dmatrix![1.0]).expect("valid");
        assert!(DirectionalNiw::new(position, prior()).is_err());
    }
}
