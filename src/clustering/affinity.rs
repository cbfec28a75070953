//! Affinity propagation.
//!
//! Points exchange responsibility and availability messages until a stable
//! set of exemplars emerges; every point joins its most similar exemplar.
//! Similarity is the negative squared distance. The number of clusters is
//! not chosen up front: it follows from `preference` (default: the median
//! similarity).
//!
//! Memory is three dense `n × n` matrices, so this is meant for the point
//! counts of a single category within one window.

use log::{debug, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{Clusterer, Label, NOISE};
use crate::config::Params;
use crate::error::{ClusterError, ConfigError};
use crate::geo_utils::squared_distance;
use crate::GpsPoint;

#[derive(Debug, Clone, PartialEq)]
pub struct AffinityPropagation {
    /// Weight of the previous message in each update, in [0.5, 1).
    /// Default: 0.5
    pub damping: f64,
    /// Default: 200
    pub max_iter: usize,
    /// Iterations with an unchanged exemplar set before stopping.
    /// Default: 15
    pub convergence_iter: usize,
    /// Self-similarity. Defaults to the median similarity.
    pub preference: Option<f64>,
    /// Seed for the tie-breaking jitter added to similarities.
    /// Default: 0
    pub random_state: u64,
}

impl Default for AffinityPropagation {
    fn default() -> Self {
        Self {
            damping: 0.5,
            max_iter: 200,
            convergence_iter: 15,
            preference: None,
            random_state: 0,
        }
    }
}

impl AffinityPropagation {
    pub fn from_params(params: &Params) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let mut r = params.reader("affinity");
        let ap = Self {
            damping: r.f64("damping", defaults.damping)?,
            max_iter: r.usize("max_iter", defaults.max_iter)?,
            convergence_iter: r.usize("convergence_iter", defaults.convergence_iter)?,
            preference: r.opt_f64("preference")?,
            random_state: r.u64("random_state", defaults.random_state)?,
        };
        r.finish()?;

        if !(0.5..1.0).contains(&ap.damping) {
            return Err(ConfigError::invalid("damping", "must be in [0.5, 1)"));
        }
        if ap.max_iter == 0 || ap.convergence_iter == 0 {
            return Err(ConfigError::invalid(
                "max_iter",
                "max_iter and convergence_iter must be at least 1",
            ));
        }
        Ok(ap)
    }

    fn similarity(&self, points: &[GpsPoint]) -> (Vec<f64>, f64) {
        let n = points.len();
        let mut s = vec![0.0; n * n];
        for i in 0..n {
            for j in (i + 1)..n {
                let v = -squared_distance(&points[i], &points[j]);
                s[i * n + j] = v;
                s[j * n + i] = v;
            }
        }
        let preference = self.preference.unwrap_or_else(|| median(&s));
        (s, preference)
    }

    /// Run message passing; returns exemplar indices, or `None` when the
    /// exemplar set never settled.
    fn exemplars(&self, s: &[f64], n: usize) -> Option<Vec<usize>> {
        let damping = self.damping;
        let mut r = vec![0.0; n * n];
        let mut a = vec![0.0; n * n];
        let mut history: Vec<Vec<bool>> = Vec::with_capacity(self.convergence_iter);

        for iteration in 0..self.max_iter {
            // Responsibilities
            for i in 0..n {
                let row = i * n;
                let (mut first, mut second, mut arg) = (f64::NEG_INFINITY, f64::NEG_INFINITY, 0);
                for k in 0..n {
                    let v = a[row + k] + s[row + k];
                    if v > first {
                        second = first;
                        first = v;
                        arg = k;
                    } else if v > second {
                        second = v;
                    }
                }
                for k in 0..n {
                    let competitor = if k == arg { second } else { first };
                    let update = s[row + k] - competitor;
                    r[row + k] = damping * r[row + k] + (1.0 - damping) * update;
                }
            }

            // Availabilities
            for k in 0..n {
                let positive_sum: f64 = (0..n)
                    .map(|i| if i == k { r[k * n + k] } else { r[i * n + k].max(0.0) })
                    .sum();
                for i in 0..n {
                    let own = if i == k { r[k * n + k] } else { r[i * n + k].max(0.0) };
                    let mut update = positive_sum - own;
                    if i != k {
                        update = update.min(0.0);
                    }
                    a[i * n + k] = damping * a[i * n + k] + (1.0 - damping) * update;
                }
            }

            let current: Vec<bool> = (0..n).map(|k| a[k * n + k] + r[k * n + k] > 0.0).collect();
            if history.len() == self.convergence_iter {
                history.remove(0);
            }
            history.push(current);

            let stable = history.len() == self.convergence_iter
                && history.windows(2).all(|w| w[0] == w[1]);
            let found = history.last().map_or(false, |e| e.iter().any(|x| *x));
            if stable && found {
                debug!("Affinity propagation converged after {} iterations", iteration + 1);
                let last = history.last()?;
                return Some((0..n).filter(|k| last[*k]).collect());
            }
        }

        None
    }
}

impl Clusterer for AffinityPropagation {
    fn fit(&self, points: &[GpsPoint]) -> Result<Vec<Label>, ClusterError> {
        let n = points.len();
        if n == 0 {
            return Ok(Vec::new());
        }

        let (mut s, preference) = self.similarity(points);

        // All points coincide: either each is its own exemplar or they share one
        let off_diagonal_equal = (0..n * n)
            .filter(|idx| idx / n != idx % n)
            .all(|idx| s[idx] == s[1.min(n * n - 1)]);
        if n == 1 || off_diagonal_equal {
            let similarity = if n == 1 { 0.0 } else { s[1] };
            return Ok(if preference >= similarity {
                (0..n as Label).collect()
            } else {
                vec![0; n]
            });
        }

        for k in 0..n {
            s[k * n + k] = preference;
        }

        // Jitter to break ties between equally good exemplars
        let mut rng = StdRng::seed_from_u64(self.random_state);
        for v in s.iter_mut() {
            let scale = f64::EPSILON * v.abs() + f64::MIN_POSITIVE * 100.0;
            *v += scale * rng.gen_range(-1.0..1.0);
        }

        let Some(mut exemplars) = self.exemplars(&s, n) else {
            warn!(
                "Affinity propagation did not converge in {} iterations; labelling all points as noise",
                self.max_iter
            );
            return Ok(vec![NOISE; n]);
        };

        let nearest = |exemplars: &[usize]| -> Vec<usize> {
            (0..n)
                .map(|i| {
                    if let Some(pos) = exemplars.iter().position(|e| *e == i) {
                        return pos;
                    }
                    let mut best = 0;
                    for (pos, &e) in exemplars.iter().enumerate() {
                        if s[i * n + e] > s[i * n + exemplars[best]] {
                            best = pos;
                        }
                    }
                    best
                })
                .collect()
        };

        // Refine: each cluster's exemplar becomes the member most similar to the rest
        let assignment = nearest(&exemplars);
        for (c, exemplar) in exemplars.iter_mut().enumerate() {
            let members: Vec<usize> = (0..n).filter(|i| assignment[*i] == c).collect();
            let mut best = (*exemplar, f64::NEG_INFINITY);
            for &candidate in &members {
                let total: f64 = members.iter().map(|&m| s[m * n + candidate]).sum();
                if total > best.1 {
                    best = (candidate, total);
                }
            }
            *exemplar = best.0;
        }
        exemplars.sort_unstable();
        exemplars.dedup();

        debug!("Affinity propagation: {} exemplars", exemplars.len());
        Ok(nearest(&exemplars).into_iter().map(|c| c as Label).collect())
    }
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_unstable_by(f64::total_cmp);
    let len = sorted.len();
    if len == 0 {
        0.0
    } else if len % 2 == 1 {
        sorted[len / 2]
    } else {
        (sorted[len / 2 - 1] + sorted[len / 2]) / 2.0
    }
}
