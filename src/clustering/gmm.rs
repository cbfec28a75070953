//! Gaussian mixture model with full 2×2 covariances, fitted by EM.
//!
//! Each point is labelled with the component of highest posterior
//! probability after the final E-step.

use std::f64::consts::PI;

use log::{debug, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::kmeans::KMeans;
use super::{Clusterer, Label};
use crate::config::Params;
use crate::error::{ClusterError, ConfigError};
use crate::GpsPoint;

/// How responsibilities are initialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitMethod {
    KMeans,
    Random,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GaussianMixture {
    /// Number of mixture components.
    /// Default: 1
    pub n_components: usize,
    /// Convergence threshold on the mean log-likelihood gain.
    /// Default: 1e-3
    pub tol: f64,
    /// Added to covariance diagonals to keep them positive definite.
    /// Default: 1e-6
    pub reg_covar: f64,
    /// Default: 100
    pub max_iter: usize,
    /// Default: 1
    pub n_init: usize,
    /// Default: k-means
    pub init: InitMethod,
    /// Default: 0
    pub random_state: u64,
}

impl Default for GaussianMixture {
    fn default() -> Self {
        Self {
            n_components: 1,
            tol: 1e-3,
            reg_covar: 1e-6,
            max_iter: 100,
            n_init: 1,
            init: InitMethod::KMeans,
            random_state: 0,
        }
    }
}

/// One fitted component.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Component {
    weight: f64,
    mean: [f64; 2],
    /// Row-major `[xx, xy, yx, yy]`
    cov: [f64; 4],
}

impl Component {
    fn log_density(&self, x: &[f64; 2]) -> Option<f64> {
        let [a, b, _, d] = self.cov;
        let det = a * d - b * b;
        if !(det > 0.0) {
            return None;
        }
        let dx = x[0] - self.mean[0];
        let dy = x[1] - self.mean[1];
        // (x-μ)ᵀ Σ⁻¹ (x-μ) for a symmetric 2×2 Σ
        let mahalanobis = (d * dx * dx - 2.0 * b * dx * dy + a * dy * dy) / det;
        Some(-0.5 * mahalanobis - 0.5 * det.ln() - (2.0 * PI).ln())
    }
}

struct Fit {
    components: Vec<Component>,
    lower_bound: f64,
}

impl GaussianMixture {
    pub fn new(n_components: usize) -> Self {
        Self { n_components, ..Self::default() }
    }

    pub fn from_params(params: &Params) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let mut r = params.reader("gmm");
        let n_components = r.usize("n_components", defaults.n_components)?;
        let covariance_type = r.string("covariance_type", "full")?;
        let tol = r.f64("tol", defaults.tol)?;
        let reg_covar = r.f64("reg_covar", defaults.reg_covar)?;
        let max_iter = r.usize("max_iter", defaults.max_iter)?;
        let n_init = r.usize("n_init", defaults.n_init)?;
        let init = match r.string("init_params", "kmeans")?.as_str() {
            "kmeans" => InitMethod::KMeans,
            "random" => InitMethod::Random,
            other => {
                return Err(ConfigError::invalid(
                    "init_params",
                    format!("expected 'kmeans' or 'random', got '{}'", other),
                ))
            }
        };
        let random_state = r.u64("random_state", defaults.random_state)?;
        r.finish()?;

        if covariance_type != "full" {
            return Err(ConfigError::invalid(
                "covariance_type",
                format!("only 'full' is supported, got '{}'", covariance_type),
            ));
        }
        if n_components == 0 {
            return Err(ConfigError::invalid("n_components", "must be at least 1"));
        }
        if n_init == 0 || max_iter == 0 {
            return Err(ConfigError::invalid("n_init", "n_init and max_iter must be at least 1"));
        }
        if !(reg_covar >= 0.0) {
            return Err(ConfigError::invalid("reg_covar", "must be non-negative"));
        }

        Ok(Self { n_components, tol, reg_covar, max_iter, n_init, init, random_state })
    }

    fn initial_responsibilities(
        &self,
        data: &[[f64; 2]],
        rng: &mut StdRng,
    ) -> Result<Vec<Vec<f64>>, ClusterError> {
        let k = self.n_components;
        match self.init {
            InitMethod::KMeans => {
                let rows: Vec<Vec<f64>> = data.iter().map(|x| x.to_vec()).collect();
                let kmeans = KMeans {
                    n_clusters: k,
                    n_init: 1,
                    random_state: rng.gen(),
                    ..KMeans::default()
                };
                let fit = kmeans.fit_rows(&rows)?;
                Ok(fit
                    .labels
                    .iter()
                    .map(|&l| (0..k).map(|c| if c == l { 1.0 } else { 0.0 }).collect())
                    .collect())
            }
            InitMethod::Random => Ok(data
                .iter()
                .map(|_| {
                    let raw: Vec<f64> = (0..k).map(|_| rng.gen_range(0.0..1.0)).collect();
                    let total: f64 = raw.iter().sum::<f64>().max(f64::MIN_POSITIVE);
                    raw.into_iter().map(|r| r / total).collect()
                })
                .collect()),
        }
    }

    fn m_step(&self, data: &[[f64; 2]], resp: &[Vec<f64>]) -> Vec<Component> {
        let n = data.len() as f64;
        (0..self.n_components)
            .map(|c| {
                let nk = resp.iter().map(|r| r[c]).sum::<f64>() + 10.0 * f64::EPSILON;
                let mut mean = [0.0; 2];
                for (x, r) in data.iter().zip(resp) {
                    mean[0] += r[c] * x[0];
                    mean[1] += r[c] * x[1];
                }
                mean[0] /= nk;
                mean[1] /= nk;

                let mut cov = [0.0; 4];
                for (x, r) in data.iter().zip(resp) {
                    let dx = x[0] - mean[0];
                    let dy = x[1] - mean[1];
                    cov[0] += r[c] * dx * dx;
                    cov[1] += r[c] * dx * dy;
                    cov[3] += r[c] * dy * dy;
                }
                cov[0] = cov[0] / nk + self.reg_covar;
                cov[1] /= nk;
                cov[2] = cov[1];
                cov[3] = cov[3] / nk + self.reg_covar;

                Component { weight: nk / n, mean, cov }
            })
            .collect()
    }

    /// Responsibilities and mean log-likelihood.
    fn e_step(
        &self,
        data: &[[f64; 2]],
        components: &[Component],
    ) -> Result<(Vec<Vec<f64>>, f64), ClusterError> {
        let mut total = 0.0;
        let mut resp = Vec::with_capacity(data.len());

        for x in data {
            let mut log_prob = Vec::with_capacity(components.len());
            for c in components {
                let density = c.log_density(x).ok_or_else(|| {
                    ClusterError::Degenerate(
                        "ill-defined empirical covariance; try increasing reg_covar".to_string(),
                    )
                })?;
                log_prob.push(c.weight.ln() + density);
            }
            let max = log_prob.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let lse = max + log_prob.iter().map(|lp| (lp - max).exp()).sum::<f64>().ln();
            total += lse;
            resp.push(log_prob.iter().map(|lp| (lp - lse).exp()).collect());
        }

        Ok((resp, total / data.len() as f64))
    }

    fn fit_once(&self, data: &[[f64; 2]], rng: &mut StdRng) -> Result<Fit, ClusterError> {
        let mut resp = self.initial_responsibilities(data, rng)?;
        let mut components = self.m_step(data, &resp);
        let mut lower_bound = f64::NEG_INFINITY;

        for iteration in 0..self.max_iter {
            let (next_resp, bound) = self.e_step(data, &components)?;
            resp = next_resp;
            components = self.m_step(data, &resp);
            let gain = bound - lower_bound;
            lower_bound = bound;
            if gain.abs() < self.tol {
                debug!("GMM converged after {} iterations", iteration + 1);
                return Ok(Fit { components, lower_bound });
            }
        }

        warn!(
            "GMM did not converge in {} iterations; consider raising max_iter or tol",
            self.max_iter
        );
        Ok(Fit { components, lower_bound })
    }
}

impl Clusterer for GaussianMixture {
    fn fit(&self, points: &[GpsPoint]) -> Result<Vec<Label>, ClusterError> {
        let n = points.len();
        if n < self.n_components {
            return Err(ClusterError::TooFewSamples {
                samples: n,
                clusters: self.n_components,
            });
        }

        let data: Vec<[f64; 2]> = points.iter().map(|p| [p.latitude, p.longitude]).collect();
        let mut rng = StdRng::seed_from_u64(self.random_state);

        let mut best: Option<Fit> = None;
        for _ in 0..self.n_init {
            let fit = self.fit_once(&data, &mut rng)?;
            if best.as_ref().map_or(true, |b| fit.lower_bound > b.lower_bound) {
                best = Some(fit);
            }
        }
        let best = best.ok_or_else(|| ClusterError::Degenerate("no GMM run completed".to_string()))?;

        let (resp, _) = self.e_step(&data, &best.components)?;
        Ok(resp
            .iter()
            .map(|r| {
                let mut arg = 0;
                for (c, v) in r.iter().enumerate() {
                    if *v > r[arg] {
                        arg = c;
                    }
                }
                arg as Label
            })
            .collect())
    }
}
