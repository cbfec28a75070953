//! OPTICS ordering with DBSCAN-style cluster extraction.
//!
//! The reachability ordering is computed once up to `max_eps`; clusters are
//! then cut at `eps`. A new cluster starts at every core point whose
//! reachability exceeds `eps`; non-core points beyond `eps` are noise.

use log::debug;

use super::{Clusterer, Label, PointIndex, NOISE};
use crate::config::Params;
use crate::error::{ClusterError, ConfigError};
use crate::geo_utils::euclidean_distance;
use crate::GpsPoint;

#[derive(Debug, Clone, PartialEq)]
pub struct Optics {
    /// Neighborhood size (including the point itself) for a core point.
    /// Default: 5
    pub min_samples: usize,

    /// Largest neighborhood radius considered, in degrees.
    /// Default: unbounded
    pub max_eps: f64,

    /// Extraction radius, in degrees. Defaults to `max_eps`.
    pub eps: Option<f64>,
}

impl Default for Optics {
    fn default() -> Self {
        Self {
            min_samples: 5,
            max_eps: f64::INFINITY,
            eps: None,
        }
    }
}

/// Reachability plot produced by the ordering pass.
#[derive(Debug, Clone)]
pub struct Reachability {
    /// Point indices in processing order
    pub ordering: Vec<usize>,
    /// Reachability distance per point (input order), infinite when undefined
    pub reachability: Vec<f64>,
    /// Core distance per point (input order), infinite for non-core points
    pub core_distances: Vec<f64>,
}

impl Optics {
    pub fn from_params(params: &Params) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let mut r = params.reader("optics");
        let optics = Self {
            min_samples: r.usize("min_samples", defaults.min_samples)?,
            max_eps: r.f64("max_eps", defaults.max_eps)?,
            eps: r.opt_f64("eps")?,
        };
        r.finish()?;

        if optics.min_samples < 2 {
            return Err(ConfigError::invalid("min_samples", "must be at least 2"));
        }
        if !(optics.max_eps > 0.0) {
            return Err(ConfigError::invalid("max_eps", "must be positive"));
        }
        if let Some(eps) = optics.eps {
            if !(eps > 0.0) || eps > optics.max_eps {
                return Err(ConfigError::invalid("eps", "must be positive and at most max_eps"));
            }
        }
        Ok(optics)
    }

    /// Compute the reachability ordering.
    pub fn reachability(&self, points: &[GpsPoint]) -> Reachability {
        let n = points.len();
        let index = PointIndex::new(points);

        let core_distances: Vec<f64> = points
            .iter()
            .map(|p| {
                let d = index.kth_distance(p, self.min_samples);
                if d <= self.max_eps { d } else { f64::INFINITY }
            })
            .collect();

        let mut reachability = vec![f64::INFINITY; n];
        let mut processed = vec![false; n];
        let mut ordering = Vec::with_capacity(n);

        while ordering.len() < n {
            // Unprocessed point with the smallest reachability, lowest index on ties
            let mut next = None;
            for i in (0..n).filter(|i| !processed[*i]) {
                match next {
                    None => next = Some(i),
                    Some(j) if reachability[i] < reachability[j] => next = Some(i),
                    _ => {}
                }
            }
            let Some(current) = next else { break };

            processed[current] = true;
            ordering.push(current);

            let core = core_distances[current];
            if core.is_infinite() {
                continue;
            }
            for neighbor in index.within(&points[current], self.max_eps) {
                if processed[neighbor] {
                    continue;
                }
                let d = euclidean_distance(&points[current], &points[neighbor]);
                let reach = core.max(d);
                if reach < reachability[neighbor] {
                    reachability[neighbor] = reach;
                }
            }
        }

        Reachability { ordering, reachability, core_distances }
    }

    fn extract(&self, plot: &Reachability) -> Vec<Label> {
        let eps = self.eps.unwrap_or(self.max_eps);
        let mut labels = vec![NOISE; plot.reachability.len()];
        let mut current: Label = NOISE;

        for &i in &plot.ordering {
            let reach = plot.reachability[i];
            let far = reach.is_infinite() || reach > eps;
            let core = plot.core_distances[i] <= eps;

            if far && core {
                current += 1;
            }
            labels[i] = if far && !core { NOISE } else { current };
        }

        labels
    }
}

impl Clusterer for Optics {
    fn fit(&self, points: &[GpsPoint]) -> Result<Vec<Label>, ClusterError> {
        let plot = self.reachability(points);
        let labels = self.extract(&plot);
        debug!(
            "OPTICS: {} clusters, {} noise points",
            labels.iter().max().map_or(0, |m| m + 1),
            labels.iter().filter(|l| **l == NOISE).count()
        );
        Ok(labels)
    }
}
