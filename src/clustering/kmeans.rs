//! K-means with k-means++ seeding and Lloyd iterations.
//!
//! Operates on dense rows of any dimension so the spectral and mixture
//! algorithms can reuse it on their own feature spaces.

use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{as_rows, Clusterer, Label};
use crate::config::Params;
use crate::error::{ClusterError, ConfigError};
use crate::GpsPoint;

/// K-means parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct KMeans {
    /// Number of clusters.
    /// Default: 8
    pub n_clusters: usize,

    /// Independent seedings; the run with the lowest inertia wins.
    /// Default: 10
    pub n_init: usize,

    /// Lloyd iterations per seeding.
    /// Default: 300
    pub max_iter: usize,

    /// Convergence threshold on total centroid movement, relative to data variance.
    /// Default: 1e-4
    pub tol: f64,

    /// Seed for the k-means++ draws. Same seed, same labels.
    /// Default: 0
    pub random_state: u64,
}

impl Default for KMeans {
    fn default() -> Self {
        Self {
            n_clusters: 8,
            n_init: 10,
            max_iter: 300,
            tol: 1e-4,
            random_state: 0,
        }
    }
}

/// Result of a k-means run on rows.
#[derive(Debug, Clone)]
pub(crate) struct KMeansFit {
    pub labels: Vec<usize>,
    pub inertia: f64,
}

impl KMeans {
    pub fn new(n_clusters: usize) -> Self {
        Self { n_clusters, ..Self::default() }
    }

    pub fn with_seed(mut self, random_state: u64) -> Self {
        self.random_state = random_state;
        self
    }

    pub fn from_params(params: &Params) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let mut r = params.reader("kmeans");
        let kmeans = Self {
            n_clusters: r.usize("n_clusters", defaults.n_clusters)?,
            n_init: r.usize("n_init", defaults.n_init)?,
            max_iter: r.usize("max_iter", defaults.max_iter)?,
            tol: r.f64("tol", defaults.tol)?,
            random_state: r.u64("random_state", defaults.random_state)?,
        };
        r.finish()?;

        if kmeans.n_clusters == 0 {
            return Err(ConfigError::invalid("n_clusters", "must be at least 1"));
        }
        if kmeans.n_init == 0 {
            return Err(ConfigError::invalid("n_init", "must be at least 1"));
        }
        if kmeans.max_iter == 0 {
            return Err(ConfigError::invalid("max_iter", "must be at least 1"));
        }
        if !(kmeans.tol >= 0.0) {
            return Err(ConfigError::invalid("tol", "must be non-negative"));
        }
        Ok(kmeans)
    }

    /// Cluster arbitrary rows. All rows must share one dimension.
    pub(crate) fn fit_rows(&self, rows: &[Vec<f64>]) -> Result<KMeansFit, ClusterError> {
        let n = rows.len();
        if n < self.n_clusters {
            return Err(ClusterError::TooFewSamples {
                samples: n,
                clusters: self.n_clusters,
            });
        }

        let threshold = self.tol * mean_variance(rows);
        let mut rng = StdRng::seed_from_u64(self.random_state);
        let mut best: Option<KMeansFit> = None;

        for run in 0..self.n_init {
            let centers = plus_plus_init(rows, self.n_clusters, &mut rng);
            let fit = self.lloyd(rows, centers, threshold);
            debug!("k-means run {}: inertia {:.6e}", run, fit.inertia);
            if best.as_ref().map_or(true, |b| fit.inertia < b.inertia) {
                best = Some(fit);
            }
        }

        best.ok_or_else(|| ClusterError::Degenerate("no k-means run completed".to_string()))
    }

    fn lloyd(&self, rows: &[Vec<f64>], mut centers: Vec<Vec<f64>>, threshold: f64) -> KMeansFit {
        let mut labels = vec![0usize; rows.len()];

        for _ in 0..self.max_iter {
            assign(rows, &centers, &mut labels);
            let updated = recompute_centers(rows, &labels, &centers);
            let shift: f64 = centers
                .iter()
                .zip(&updated)
                .map(|(a, b)| sq_dist(a, b))
                .sum();
            centers = updated;
            if shift <= threshold {
                break;
            }
        }

        let inertia = assign(rows, &centers, &mut labels);
        KMeansFit { labels, inertia }
    }
}

impl Clusterer for KMeans {
    fn fit(&self, points: &[GpsPoint]) -> Result<Vec<Label>, ClusterError> {
        let fit = self.fit_rows(&as_rows(points))?;
        Ok(fit.labels.into_iter().map(|l| l as Label).collect())
    }
}

pub(crate) fn sq_dist(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn mean_variance(rows: &[Vec<f64>]) -> f64 {
    let n = rows.len() as f64;
    let dim = rows.first().map_or(0, Vec::len);
    if dim == 0 {
        return 0.0;
    }
    let mut total = 0.0;
    for d in 0..dim {
        let mean = rows.iter().map(|r| r[d]).sum::<f64>() / n;
        total += rows.iter().map(|r| (r[d] - mean).powi(2)).sum::<f64>() / n;
    }
    total / dim as f64
}

/// k-means++: each new center is drawn with probability proportional to the
/// squared distance to the nearest center chosen so far.
fn plus_plus_init(rows: &[Vec<f64>], k: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
    let n = rows.len();
    let mut centers = Vec::with_capacity(k);
    centers.push(rows[rng.gen_range(0..n)].clone());

    let mut nearest: Vec<f64> = rows.iter().map(|r| sq_dist(r, &centers[0])).collect();

    while centers.len() < k {
        let total: f64 = nearest.iter().sum();
        let chosen = if total > 0.0 {
            let mut target = rng.gen_range(0.0..total);
            let mut pick = n - 1;
            for (i, d) in nearest.iter().enumerate() {
                if target < *d {
                    pick = i;
                    break;
                }
                target -= d;
            }
            pick
        } else {
            rng.gen_range(0..n)
        };

        let center = rows[chosen].clone();
        for (i, row) in rows.iter().enumerate() {
            nearest[i] = nearest[i].min(sq_dist(row, &center));
        }
        centers.push(center);
    }

    centers
}

/// Assign each row to its nearest center; returns the inertia.
fn assign(rows: &[Vec<f64>], centers: &[Vec<f64>], labels: &mut [usize]) -> f64 {
    let mut inertia = 0.0;
    for (row, label) in rows.iter().zip(labels.iter_mut()) {
        let mut best = (0, f64::INFINITY);
        for (c, center) in centers.iter().enumerate() {
            let d = sq_dist(row, center);
            if d < best.1 {
                best = (c, d);
            }
        }
        *label = best.0;
        inertia += best.1;
    }
    inertia
}

/// Means of the assigned rows. An empty cluster is moved onto the row
/// farthest from its current center.
fn recompute_centers(rows: &[Vec<f64>], labels: &[usize], previous: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let k = previous.len();
    let dim = previous.first().map_or(0, Vec::len);
    let mut sums = vec![vec![0.0; dim]; k];
    let mut counts = vec![0usize; k];

    for (row, &label) in rows.iter().zip(labels) {
        counts[label] += 1;
        for (s, v) in sums[label].iter_mut().zip(row) {
            *s += v;
        }
    }

    let mut taken = vec![false; rows.len()];
    sums.into_iter()
        .zip(counts)
        .enumerate()
        .map(|(c, (sum, count))| {
            if count > 0 {
                return sum.into_iter().map(|s| s / count as f64).collect();
            }
            let far = rows
                .iter()
                .enumerate()
                .filter(|(i, _)| !taken[*i])
                .map(|(i, r)| (i, sq_dist(r, &previous[labels[i]])))
                .fold((0, f64::NEG_INFINITY), |acc, x| if x.1 > acc.1 { x } else { acc });
            taken[far.0] = true;
            debug!("k-means cluster {} emptied, reseeding on row {}", c, far.0);
            rows[far.0].clone()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{blobs, separates_blobs};
    use super::*;

    #[test]
    fn test_separates_blobs() {
        let points = blobs(&[(0.0, 0.0), (1.0, 0.0), (0.0, 1.0)], 20, 0.05, 3);
        let labels = KMeans::new(3).fit(&points).unwrap();
        assert!(separates_blobs(&labels, 20));
    }

    #[test]
    fn test_fixed_seed_is_deterministic() {
        let points = blobs(&[(0.0, 0.0), (0.3, 0.3)], 25, 0.2, 11);
        let a = KMeans::new(4).with_seed(42).fit(&points).unwrap();
        let b = KMeans::new(4).with_seed(42).fit(&points).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_too_few_samples() {
        let points = blobs(&[(0.0, 0.0)], 3, 0.1, 1);
        let err = KMeans::new(5).fit(&points).unwrap_err();
        assert_eq!(err, ClusterError::TooFewSamples { samples: 3, clusters: 5 });
        assert_eq!(err.to_string(), "n_samples=3 should be >= n_clusters=5");
    }

    #[test]
    fn test_duplicate_points_do_not_panic() {
        let points = vec![GpsPoint::new(1.0, 1.0); 6];
        let labels = KMeans::new(3).fit(&points).unwrap();
        assert_eq!(labels.len(), 6);
    }

    #[test]
    fn test_from_params() {
        let params = Params::new()
            .with("n_clusters", 3)
            .with("random_state", 42)
            .with("n_init", 2);
        let kmeans = KMeans::from_params(&params).unwrap();
        assert_eq!(kmeans.n_clusters, 3);
        assert_eq!(kmeans.random_state, 42);
        assert_eq!(kmeans.n_init, 2);
        assert_eq!(kmeans.max_iter, 300);

        assert!(KMeans::from_params(&Params::new().with("n_clusters", 0)).is_err());
    }

    #[test]
    fn test_rows_of_higher_dimension() {
        let rows = vec![
            vec![0.0, 0.0, 0.0],
            vec![0.1, 0.0, 0.0],
            vec![5.0, 5.0, 5.0],
            vec![5.1, 5.0, 5.0],
        ];
        let fit = KMeans::new(2).fit_rows(&rows).unwrap();
        assert_eq!(fit.labels[0], fit.labels[1]);
        assert_eq!(fit.labels[2], fit.labels[3]);
        assert_ne!(fit.labels[0], fit.labels[2]);
        assert!(fit.inertia < 0.02);
    }
}
