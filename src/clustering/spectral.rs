//! Spectral clustering.
//!
//! Builds an affinity graph over the points, embeds them with the leading
//! eigenvectors of the normalized affinity `D^-1/2 W D^-1/2`, and runs
//! k-means in the embedding. Eigenvectors come from orthogonal iteration,
//! which is enough for the handful of components used here.

use log::{debug, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::kmeans::KMeans;
use super::{distance_matrix, Clusterer, Label, PointIndex};
use crate::config::Params;
use crate::error::{ClusterError, ConfigError};
use crate::GpsPoint;

const EIGEN_MAX_ITER: usize = 1000;
const EIGEN_TOL: f64 = 1e-10;

/// How the affinity graph is built.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Affinity {
    /// `exp(-gamma * d²)` between every pair
    Rbf { gamma: f64 },
    /// Symmetrized k-nearest-neighbor connectivity
    NearestNeighbors { n_neighbors: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spectral {
    /// Default: 8
    pub n_clusters: usize,
    /// Default: rbf with gamma 1.0
    pub affinity: Affinity,
    /// k-means restarts in the embedding.
    /// Default: 10
    pub n_init: usize,
    /// Default: 0
    pub random_state: u64,
}

impl Default for Spectral {
    fn default() -> Self {
        Self {
            n_clusters: 8,
            affinity: Affinity::Rbf { gamma: 1.0 },
            n_init: 10,
            random_state: 0,
        }
    }
}

impl Spectral {
    pub fn new(n_clusters: usize, affinity: Affinity) -> Self {
        Self { n_clusters, affinity, ..Self::default() }
    }

    pub fn from_params(params: &Params) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let mut r = params.reader("spectral");
        let n_clusters = r.usize("n_clusters", defaults.n_clusters)?;
        let kind = r.string("affinity", "rbf")?;
        let gamma = r.f64("gamma", 1.0)?;
        let n_neighbors = r.usize("n_neighbors", 10)?;
        let n_init = r.usize("n_init", defaults.n_init)?;
        let random_state = r.u64("random_state", defaults.random_state)?;
        r.finish()?;

        let affinity = match kind.as_str() {
            "rbf" => {
                if !(gamma > 0.0) {
                    return Err(ConfigError::invalid("gamma", "must be positive"));
                }
                Affinity::Rbf { gamma }
            }
            "nearest_neighbors" => {
                if n_neighbors == 0 {
                    return Err(ConfigError::invalid("n_neighbors", "must be at least 1"));
                }
                Affinity::NearestNeighbors { n_neighbors }
            }
            other => {
                return Err(ConfigError::invalid(
                    "affinity",
                    format!("expected 'rbf' or 'nearest_neighbors', got '{}'", other),
                ))
            }
        };
        if n_clusters == 0 {
            return Err(ConfigError::invalid("n_clusters", "must be at least 1"));
        }
        if n_init == 0 {
            return Err(ConfigError::invalid("n_init", "must be at least 1"));
        }

        Ok(Self { n_clusters, affinity, n_init, random_state })
    }

    /// Dense symmetric affinity matrix with a zero diagonal.
    fn affinity_matrix(&self, points: &[GpsPoint]) -> Vec<f64> {
        let n = points.len();
        match self.affinity {
            Affinity::Rbf { gamma } => {
                let mut w = distance_matrix(points);
                for (idx, v) in w.iter_mut().enumerate() {
                    *v = if idx / n == idx % n { 0.0 } else { (-gamma * *v * *v).exp() };
                }
                w
            }
            Affinity::NearestNeighbors { n_neighbors } => {
                let index = PointIndex::new(points);
                let mut w = vec![0.0; n * n];
                for (i, p) in points.iter().enumerate() {
                    // the point itself is its own nearest neighbor
                    for j in index.k_nearest(p, n_neighbors + 1) {
                        if j != i {
                            w[i * n + j] += 0.5;
                            w[j * n + i] += 0.5;
                        }
                    }
                }
                w
            }
        }
    }

    /// Spectral embedding: one row of `n_clusters` coordinates per point.
    fn embed(&self, points: &[GpsPoint]) -> Vec<Vec<f64>> {
        let n = points.len();
        let k = self.n_clusters;
        let w = self.affinity_matrix(points);

        let inv_sqrt_degree: Vec<f64> = (0..n)
            .map(|i| {
                let d: f64 = w[i * n..(i + 1) * n].iter().sum();
                if d > 0.0 { 1.0 / d.sqrt() } else { 0.0 }
            })
            .collect();
        if inv_sqrt_degree.iter().any(|d| *d == 0.0) {
            warn!("Spectral: affinity graph has isolated points");
        }

        // (I + D^-1/2 W D^-1/2) / 2 has eigenvalues in [0, 1], same order
        let mut m = vec![0.0; n * n];
        for i in 0..n {
            for j in 0..n {
                let norm = inv_sqrt_degree[i] * w[i * n + j] * inv_sqrt_degree[j];
                m[i * n + j] = 0.5 * (norm + if i == j { 1.0 } else { 0.0 });
            }
        }

        let vectors = top_eigenvectors(&m, n, k, self.random_state);

        (0..n)
            .map(|i| {
                vectors
                    .iter()
                    .map(|v| v[i] * inv_sqrt_degree[i])
                    .collect()
            })
            .collect()
    }
}

impl Clusterer for Spectral {
    fn fit(&self, points: &[GpsPoint]) -> Result<Vec<Label>, ClusterError> {
        let n = points.len();
        if n < self.n_clusters {
            return Err(ClusterError::TooFewSamples {
                samples: n,
                clusters: self.n_clusters,
            });
        }

        let embedding = self.embed(points);
        let kmeans = KMeans {
            n_clusters: self.n_clusters,
            n_init: self.n_init,
            random_state: self.random_state,
            ..KMeans::default()
        };
        let fit = kmeans.fit_rows(&embedding)?;
        debug!("Spectral: k-means inertia in embedding {:.6e}", fit.inertia);

        Ok(fit.labels.into_iter().map(|l| l as Label).collect())
    }
}

/// Leading `k` eigenvectors of a symmetric positive semi-definite `n × n`
/// matrix, by orthogonal iteration. Each vector is sign-normalized so its
/// largest-magnitude entry is positive.
fn top_eigenvectors(m: &[f64], n: usize, k: usize, seed: u64) -> Vec<Vec<f64>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut q: Vec<Vec<f64>> = (0..k)
        .map(|_| (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect())
        .collect();
    orthonormalize(&mut q);

    for iteration in 0..EIGEN_MAX_ITER {
        let mut z: Vec<Vec<f64>> = q
            .iter()
            .map(|v| {
                (0..n)
                    .map(|i| m[i * n..(i + 1) * n].iter().zip(v).map(|(a, b)| a * b).sum())
                    .collect()
            })
            .collect();
        orthonormalize(&mut z);

        let change = q
            .iter()
            .zip(&z)
            .flat_map(|(a, b)| a.iter().zip(b).map(|(x, y)| (x - y).abs()))
            .fold(0.0, f64::max);
        q = z;
        if change < EIGEN_TOL {
            debug!("Spectral: eigenvectors converged after {} iterations", iteration + 1);
            break;
        }
    }

    for v in &mut q {
        let pivot = v.iter().copied().fold(0.0, |acc: f64, x| if x.abs() > acc.abs() { x } else { acc });
        if pivot < 0.0 {
            v.iter_mut().for_each(|x| *x = -*x);
        }
    }
    q
}

/// Modified Gram-Schmidt in place. Vectors that collapse are left at zero.
fn orthonormalize(vectors: &mut [Vec<f64>]) {
    for i in 0..vectors.len() {
        let (done, rest) = vectors.split_at_mut(i);
        let v = &mut rest[0];
        for u in done.iter() {
            let dot: f64 = u.iter().zip(v.iter()).map(|(a, b)| a * b).sum();
            v.iter_mut().zip(u).for_each(|(x, y)| *x -= dot * y);
        }
        let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
        if norm > 1e-300 {
            v.iter_mut().for_each(|x| *x /= norm);
        } else {
            v.iter_mut().for_each(|x| *x = 0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{blobs, separates_blobs};
    use super::*;

    #[test]
    fn test_rbf_separates_blobs() {
        let points = blobs(&[(0.0, 0.0), (3.0, 3.0)], 15, 0.1, 7);
        let labels = Spectral::new(2, Affinity::Rbf { gamma: 1.0 }).fit(&points).unwrap();
        assert!(separates_blobs(&labels, 15));
    }

    #[test]
    fn test_nearest_neighbors_separates_blobs() {
        let points = blobs(&[(0.0, 0.0), (1.0, 1.0)], 15, 0.05, 3);
        let spectral = Spectral::new(2, Affinity::NearestNeighbors { n_neighbors: 8 });
        assert!(separates_blobs(&spectral.fit(&points).unwrap(), 15));
    }

    #[test]
    fn test_too_few_samples() {
        let points = blobs(&[(0.0, 0.0)], 2, 0.05, 3);
        assert!(matches!(
            Spectral::default().fit(&points),
            Err(ClusterError::TooFewSamples { samples: 2, clusters: 8 })
        ));
    }

    #[test]
    fn test_eigenvectors_of_diagonal_matrix() {
        let m = vec![
            0.9, 0.0, 0.0,
            0.0, 0.1, 0.0,
            0.0, 0.0, 0.5,
        ];
        let vectors = top_eigenvectors(&m, 3, 2, 1);
        assert!((vectors[0][0] - 1.0).abs() < 1e-6);
        assert!((vectors[1][2] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_from_params() {
        let spectral = Spectral::from_params(
            &Params::new()
                .with("n_clusters", 3)
                .with("affinity", "nearest_neighbors")
                .with("n_neighbors", 6),
        )
        .unwrap();
        assert_eq!(spectral.affinity, Affinity::NearestNeighbors { n_neighbors: 6 });
        assert!(Spectral::from_params(&Params::new().with("affinity", "cosine")).is_err());
    }
}
