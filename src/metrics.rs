//! Cluster quality scores.
//!
//! Noise is scored as a cluster of its own, so an algorithm that marks
//! points as noise is compared on the same footing as one that doesn't.

use serde::{Deserialize, Serialize};

use crate::clustering::Label;
use crate::geo_utils::{euclidean_distance, squared_distance};
use crate::GpsPoint;

/// Silhouette, Calinski-Harabasz and Davies-Bouldin scores of one labelling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClusterMetrics {
    /// In [-1, 1]; higher is better
    pub silhouette: f64,
    /// Non-negative; higher is better
    pub calinski_harabasz: f64,
    /// Non-negative; lower is better
    pub davies_bouldin: f64,
}

/// Score a labelling of `points`.
///
/// # Arguments
///
/// * `points` - The clustered points
/// * `labels` - One label per point; [`NOISE`](crate::NOISE) counts as a label
///
/// # Returns
///
/// `None` when the scores are undefined: fewer than two distinct labels,
/// as many labels as points, or mismatched lengths.
///
/// ```rust
/// use urban_clusters::{GpsPoint, metrics::score};
///
/// let points = vec![
///     GpsPoint::new(0.0, 0.0), GpsPoint::new(0.0, 0.1),
///     GpsPoint::new(5.0, 5.0), GpsPoint::new(5.0, 5.1),
/// ];
/// let metrics = score(&points, &[0, 0, 1, 1]).unwrap();
/// assert!(metrics.silhouette > 0.9);
///
/// assert!(score(&points, &[-1, -1, -1, -1]).is_none());
/// ```
pub fn score(points: &[GpsPoint], labels: &[Label]) -> Option<ClusterMetrics> {
    if points.len() != labels.len() {
        return None;
    }
    let groups = Groups::new(labels);
    let k = groups.members.len();
    if k < 2 || k >= points.len() {
        return None;
    }

    Some(ClusterMetrics {
        silhouette: silhouette(points, &groups),
        calinski_harabasz: calinski_harabasz(points, &groups),
        davies_bouldin: davies_bouldin(points, &groups),
    })
}

/// Point indices per distinct label, plus the group of each point.
struct Groups {
    members: Vec<Vec<usize>>,
    group_of: Vec<usize>,
}

impl Groups {
    fn new(labels: &[Label]) -> Self {
        let mut distinct: Vec<Label> = labels.to_vec();
        distinct.sort_unstable();
        distinct.dedup();

        let group_of: Vec<usize> = labels
            .iter()
            .map(|l| distinct.binary_search(l).unwrap_or(0))
            .collect();
        let mut members = vec![Vec::new(); distinct.len()];
        for (i, g) in group_of.iter().enumerate() {
            members[*g].push(i);
        }
        Self { members, group_of }
    }

    fn centroid(&self, points: &[GpsPoint], group: usize) -> GpsPoint {
        let idx = &self.members[group];
        let n = idx.len() as f64;
        let (lat, lng) = idx.iter().fold((0.0, 0.0), |(a, b), i| {
            (a + points[*i].latitude, b + points[*i].longitude)
        });
        GpsPoint::new(lat / n, lng / n)
    }
}

fn silhouette(points: &[GpsPoint], groups: &Groups) -> f64 {
    let n = points.len();
    let k = groups.members.len();
    let mut total = 0.0;

    for i in 0..n {
        let own = groups.group_of[i];
        if groups.members[own].len() == 1 {
            continue;
        }
        let mut sums = vec![0.0; k];
        for j in 0..n {
            if i != j {
                sums[groups.group_of[j]] += euclidean_distance(&points[i], &points[j]);
            }
        }
        let a = sums[own] / (groups.members[own].len() - 1) as f64;
        let b = (0..k)
            .filter(|g| *g != own)
            .map(|g| sums[g] / groups.members[g].len() as f64)
            .fold(f64::INFINITY, f64::min);
        let denom = a.max(b);
        if denom > 0.0 {
            total += (b - a) / denom;
        }
    }

    total / n as f64
}

fn calinski_harabasz(points: &[GpsPoint], groups: &Groups) -> f64 {
    let n = points.len();
    let k = groups.members.len();
    let overall = crate::geo_utils::compute_center(points);

    let mut between = 0.0;
    let mut within = 0.0;
    for g in 0..k {
        let centroid = groups.centroid(points, g);
        between += groups.members[g].len() as f64 * squared_distance(&centroid, &overall);
        within += groups.members[g]
            .iter()
            .map(|i| squared_distance(&points[*i], &centroid))
            .sum::<f64>();
    }

    if within == 0.0 {
        1.0
    } else {
        between * (n - k) as f64 / (within * (k - 1) as f64)
    }
}

fn davies_bouldin(points: &[GpsPoint], groups: &Groups) -> f64 {
    let k = groups.members.len();
    let centroids: Vec<GpsPoint> = (0..k).map(|g| groups.centroid(points, g)).collect();
    let scatter: Vec<f64> = (0..k)
        .map(|g| {
            let idx = &groups.members[g];
            idx.iter()
                .map(|i| euclidean_distance(&points[*i], &centroids[g]))
                .sum::<f64>()
                / idx.len() as f64
        })
        .collect();

    let total: f64 = (0..k)
        .map(|i| {
            (0..k)
                .filter(|j| *j != i)
                .map(|j| {
                    let separation = euclidean_distance(&centroids[i], &centroids[j]);
                    // coincident centroids contribute nothing
                    if separation == 0.0 {
                        0.0
                    } else {
                        (scatter[i] + scatter[j]) / separation
                    }
                })
                .fold(0.0, f64::max)
        })
        .sum();

    total / k as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clustering::NOISE;

    fn two_groups() -> Vec<GpsPoint> {
        vec![
            GpsPoint::new(0.0, 0.0),
            GpsPoint::new(0.0, 1.0),
            GpsPoint::new(10.0, 0.0),
            GpsPoint::new(10.0, 1.0),
        ]
    }

    #[test]
    fn test_undefined_cases() {
        let points = two_groups();
        assert!(score(&points, &[0, 0, 0, 0]).is_none());
        assert!(score(&points, &[NOISE; 4]).is_none());
        assert!(score(&points, &[0, 1, 2, 3]).is_none());
        assert!(score(&points, &[0, 1]).is_none());
    }

    #[test]
    fn test_known_values() {
        let points = two_groups();
        let m = score(&points, &[0, 0, 1, 1]).unwrap();

        // a = 1, b = (10 + sqrt(101)) / 2 for every point
        let b = (10.0 + 101f64.sqrt()) / 2.0;
        assert!((m.silhouette - (b - 1.0) / b).abs() < 1e-12);

        // between = 4 * 25 = 100, within = 4 * 0.25 = 1, (n-k)/(k-1) = 2
        assert!((m.calinski_harabasz - 200.0).abs() < 1e-9);

        // scatter 0.5 each, centroid separation 10
        assert!((m.davies_bouldin - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_noise_counts_as_a_label() {
        let points = two_groups();
        let with_noise = score(&points, &[0, 0, NOISE, NOISE]).unwrap();
        let plain = score(&points, &[0, 0, 1, 1]).unwrap();
        assert!((with_noise.silhouette - plain.silhouette).abs() < 1e-12);
        assert!((with_noise.calinski_harabasz - plain.calinski_harabasz).abs() < 1e-9);
        assert!((with_noise.davies_bouldin - plain.davies_bouldin).abs() < 1e-12);
    }

    #[test]
    fn test_singleton_cluster_scores_zero_silhouette() {
        let points = vec![
            GpsPoint::new(0.0, 0.0),
            GpsPoint::new(0.0, 1.0),
            GpsPoint::new(10.0, 0.0),
        ];
        let m = score(&points, &[0, 0, 1]).unwrap();
        // the singleton contributes 0 to the mean
        let s0 = (10.0 - 1.0) / 10.0;
        let s1 = (101f64.sqrt() - 1.0) / 101f64.sqrt();
        let expected = (s0 + s1) / 3.0;
        assert!((m.silhouette - expected).abs() < 1e-12);
    }

    #[test]
    fn test_shared_centroid_keeps_davies_bouldin_finite() {
        // labels 0 and 1 both center on the origin
        let points = vec![
            GpsPoint::new(-1.0, 0.0),
            GpsPoint::new(1.0, 0.0),
            GpsPoint::new(0.0, -1.0),
            GpsPoint::new(0.0, 1.0),
            GpsPoint::new(5.0, 5.0),
            GpsPoint::new(5.0, 5.1),
        ];
        let m = score(&points, &[0, 0, 1, 1, 2, 2]).unwrap();
        assert!(m.davies_bouldin.is_finite());
        assert!(m.davies_bouldin >= 0.0);

        let json = serde_json::to_value(m).unwrap();
        assert!(json["davies_bouldin"].is_number());
    }

    #[test]
    fn test_bad_labelling_scores_worse() {
        let points = two_groups();
        let good = score(&points, &[0, 0, 1, 1]).unwrap();
        let bad = score(&points, &[0, 1, 0, 1]).unwrap();
        assert!(bad.silhouette < good.silhouette);
        assert!(bad.calinski_harabasz < good.calinski_harabasz);
        assert!(bad.davies_bouldin > good.davies_bouldin);
    }
}
