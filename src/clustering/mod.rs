//! # Clustering Dispatcher
//!
//! A closed set of clustering algorithms, selected by the identifier in a
//! [`TechniqueSpec`]:
//!
//! | id | algorithm | noise |
//! |----|-----------|-------|
//! | `kmeans` | [`KMeans`] centroid partitioning | no |
//! | `optics` | [`Optics`] density reachability, DBSCAN-style extraction | yes |
//! | `hdbscan` | [`Hdbscan`] density hierarchy | yes |
//! | `spectral` | [`Spectral`] graph-spectral partitioning | no |
//! | `gmm` | [`GaussianMixture`] probabilistic mixture | no |
//! | `affinity` | [`AffinityPropagation`] exemplar message passing | on non-convergence |
//!
//! Every algorithm implements [`Clusterer`]: one [`Label`] per input point,
//! input order preserved, [`NOISE`] for points not assigned to any cluster.
//!
//! Points are clustered in raw (latitude, longitude) degree space with
//! Euclidean distance. At city scale this keeps cluster shapes faithful to
//! the map; normalizing the axes would distort them.
//!
//! ```rust
//! use urban_clusters::{GpsPoint, TechniqueSpec, Params, clustering::cluster};
//!
//! let points: Vec<GpsPoint> = (0..10)
//!     .map(|i| GpsPoint::new(55.0 + (i % 2) as f64, 48.0 + i as f64 * 0.001))
//!     .collect();
//!
//! let spec = TechniqueSpec::new("kmeans", Params::new().with("n_clusters", 2));
//! let labels = cluster(&points, &spec).unwrap();
//! assert_eq!(labels.len(), points.len());
//! assert_ne!(labels[0], labels[1]);
//! ```

use rstar::{PointDistance, RTree, RTreeObject, AABB};

use crate::config::TechniqueSpec;
use crate::error::{ClusterError, ConfigError, SkipReason};
use crate::GpsPoint;

pub mod affinity;
pub mod gmm;
pub mod hdbscan;
pub mod kmeans;
pub mod optics;
pub mod spectral;

pub use affinity::AffinityPropagation;
pub use gmm::GaussianMixture;
pub use hdbscan::Hdbscan;
pub use kmeans::KMeans;
pub use optics::Optics;
pub use spectral::Spectral;

/// Cluster assignment of a single point.
pub type Label = i32;

/// Reserved label for points that belong to no cluster.
pub const NOISE: Label = -1;

/// Common interface of all clustering algorithms.
pub trait Clusterer {
    /// Assign a label to every point, in input order.
    fn fit(&self, points: &[GpsPoint]) -> Result<Vec<Label>, ClusterError>;
}

/// The configured algorithm for one category.
#[derive(Debug, Clone, PartialEq)]
pub enum Algorithm {
    KMeans(KMeans),
    Optics(Optics),
    Hdbscan(Hdbscan),
    Spectral(Spectral),
    Gmm(GaussianMixture),
    Affinity(AffinityPropagation),
}

impl Algorithm {
    /// Build the algorithm named by `spec.method` from `spec.params`.
    ///
    /// Unknown methods, unknown parameters and ill-typed values are rejected.
    pub fn from_spec(spec: &TechniqueSpec) -> Result<Self, ConfigError> {
        let params = &spec.params;
        match spec.method.trim().to_lowercase().as_str() {
            "kmeans" => KMeans::from_params(params).map(Algorithm::KMeans),
            "optics" => Optics::from_params(params).map(Algorithm::Optics),
            "hdbscan" => Hdbscan::from_params(params).map(Algorithm::Hdbscan),
            "spectral" => Spectral::from_params(params).map(Algorithm::Spectral),
            "gmm" => GaussianMixture::from_params(params).map(Algorithm::Gmm),
            "affinity" => AffinityPropagation::from_params(params).map(Algorithm::Affinity),
            _ => Err(ConfigError::UnknownMethod(spec.method.clone())),
        }
    }

    /// Identifier as used in configuration.
    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::KMeans(_) => "kmeans",
            Algorithm::Optics(_) => "optics",
            Algorithm::Hdbscan(_) => "hdbscan",
            Algorithm::Spectral(_) => "spectral",
            Algorithm::Gmm(_) => "gmm",
            Algorithm::Affinity(_) => "affinity",
        }
    }
}

impl Clusterer for Algorithm {
    fn fit(&self, points: &[GpsPoint]) -> Result<Vec<Label>, ClusterError> {
        if points.iter().any(|p| !p.latitude.is_finite() || !p.longitude.is_finite()) {
            return Err(ClusterError::NonFinite);
        }
        match self {
            Algorithm::KMeans(a) => a.fit(points),
            Algorithm::Optics(a) => a.fit(points),
            Algorithm::Hdbscan(a) => a.fit(points),
            Algorithm::Spectral(a) => a.fit(points),
            Algorithm::Gmm(a) => a.fit(points),
            Algorithm::Affinity(a) => a.fit(points),
        }
    }
}

/// Resolve `spec` and run it on `points`.
///
/// # Arguments
///
/// * `points` - Points of one category, in (lat, lon) degrees
/// * `spec` - Method identifier and its raw parameter map
///
/// # Returns
///
/// One label per input point, in input order, with [`NOISE`] for points
/// assigned to no cluster. On failure the error is the reason the category
/// gets skipped.
pub fn cluster(points: &[GpsPoint], spec: &TechniqueSpec) -> Result<Vec<Label>, SkipReason> {
    let algorithm = Algorithm::from_spec(spec).map_err(SkipReason::Configuration)?;
    algorithm.fit(points).map_err(SkipReason::Clustering)
}

/// Number of distinct labels, noise included.
pub fn distinct_labels(labels: &[Label]) -> usize {
    let mut seen: Vec<Label> = labels.to_vec();
    seen.sort_unstable();
    seen.dedup();
    seen.len()
}

// =============================================================================
// Shared Helpers
// =============================================================================

/// Points as dense row vectors `[lat, lng]`.
pub(crate) fn as_rows(points: &[GpsPoint]) -> Vec<Vec<f64>> {
    points.iter().map(|p| vec![p.latitude, p.longitude]).collect()
}

/// Full pairwise Euclidean distance matrix, row-major.
pub(crate) fn distance_matrix(points: &[GpsPoint]) -> Vec<f64> {
    let n = points.len();
    let mut dist = vec![0.0; n * n];
    for i in 0..n {
        for j in (i + 1)..n {
            let d = crate::geo_utils::euclidean_distance(&points[i], &points[j]);
            dist[i * n + j] = d;
            dist[j * n + i] = d;
        }
    }
    dist
}

/// A point with its input index, for R-tree queries.
#[derive(Debug, Clone, Copy)]
struct IndexedPoint {
    idx: usize,
    lat: f64,
    lng: f64,
}

impl RTreeObject for IndexedPoint {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.lat, self.lng])
    }
}

impl PointDistance for IndexedPoint {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dlat = self.lat - point[0];
        let dlng = self.lng - point[1];
        dlat * dlat + dlng * dlng
    }
}

/// Spatial index over a point set, answering radius and k-nearest queries.
pub(crate) struct PointIndex {
    tree: RTree<IndexedPoint>,
}

impl PointIndex {
    pub(crate) fn new(points: &[GpsPoint]) -> Self {
        let indexed: Vec<IndexedPoint> = points
            .iter()
            .enumerate()
            .map(|(idx, p)| IndexedPoint { idx, lat: p.latitude, lng: p.longitude })
            .collect();
        Self { tree: RTree::bulk_load(indexed) }
    }

    /// Indices of points within `radius` of `point` (inclusive), including itself.
    pub(crate) fn within(&self, point: &GpsPoint, radius: f64) -> Vec<usize> {
        let query = [point.latitude, point.longitude];
        if radius.is_infinite() {
            return self.tree.iter().map(|p| p.idx).collect();
        }
        self.tree
            .locate_within_distance(query, radius * radius)
            .map(|p| p.idx)
            .collect()
    }

    /// Indices of the `k` nearest points to `point`, nearest first.
    /// The point itself is included when it belongs to the index.
    pub(crate) fn k_nearest(&self, point: &GpsPoint, k: usize) -> Vec<usize> {
        self.tree
            .nearest_neighbor_iter(&[point.latitude, point.longitude])
            .take(k)
            .map(|p| p.idx)
            .collect()
    }

    /// Distance to the `k`-th nearest point (1-based, the point itself counts).
    pub(crate) fn kth_distance(&self, point: &GpsPoint, k: usize) -> f64 {
        let query = [point.latitude, point.longitude];
        self.tree
            .nearest_neighbor_iter(&query)
            .nth(k.saturating_sub(1))
            .map(|p| p.distance_2(&query).sqrt())
            .unwrap_or(f64::INFINITY)
    }
}
