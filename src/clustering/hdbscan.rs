//! HDBSCAN: hierarchical density clustering with excess-of-mass selection.
//!
//! 1. Core distance of each point: distance to its `min_samples`-th neighbor.
//! 2. Minimum spanning tree over mutual reachability distances.
//! 3. Single-linkage hierarchy from the sorted tree edges.
//! 4. Condensed tree: splits smaller than `min_cluster_size` are points
//!    falling out of their parent rather than new clusters.
//! 5. The most stable non-overlapping clusters are kept; other points are noise.

use log::debug;

use super::{distance_matrix, Clusterer, Label, NOISE};
use crate::config::Params;
use crate::error::{ClusterError, ConfigError};
use crate::GpsPoint;

/// Floor on merge distances, so duplicate points get a finite lambda.
const MIN_MERGE_DISTANCE: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq)]
pub struct Hdbscan {
    /// Smallest group that counts as a cluster.
    /// Default: 5
    pub min_cluster_size: usize,

    /// Neighbor rank used for core distances. Defaults to `min_cluster_size`.
    pub min_samples: Option<usize>,

    /// Allow the whole data set to be returned as one cluster.
    /// Default: false
    pub allow_single_cluster: bool,
}

impl Default for Hdbscan {
    fn default() -> Self {
        Self {
            min_cluster_size: 5,
            min_samples: None,
            allow_single_cluster: false,
        }
    }
}

/// One merge of the single-linkage hierarchy.
#[derive(Debug, Clone, Copy)]
struct Merge {
    left: usize,
    right: usize,
    distance: f64,
    size: usize,
}

/// Edge of the condensed tree. `child < n_points` is a point.
#[derive(Debug, Clone, Copy)]
struct CondensedEdge {
    parent: usize,
    child: usize,
    lambda: f64,
    child_size: usize,
}

impl Hdbscan {
    pub fn new(min_cluster_size: usize) -> Self {
        Self { min_cluster_size, ..Self::default() }
    }

    pub fn from_params(params: &Params) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let mut r = params.reader("hdbscan");
        let hdbscan = Self {
            min_cluster_size: r.usize("min_cluster_size", defaults.min_cluster_size)?,
            min_samples: r.opt_usize("min_samples")?,
            allow_single_cluster: r.bool("allow_single_cluster", defaults.allow_single_cluster)?,
        };
        r.finish()?;

        if hdbscan.min_cluster_size < 2 {
            return Err(ConfigError::invalid("min_cluster_size", "must be at least 2"));
        }
        if hdbscan.min_samples == Some(0) {
            return Err(ConfigError::invalid("min_samples", "must be at least 1"));
        }
        Ok(hdbscan)
    }

    fn core_distances(&self, dist: &[f64], n: usize) -> Vec<f64> {
        let k = self.min_samples.unwrap_or(self.min_cluster_size).min(n).max(1);
        (0..n)
            .map(|i| {
                let mut row: Vec<f64> = dist[i * n..(i + 1) * n].to_vec();
                row.sort_unstable_by(f64::total_cmp);
                row[k - 1]
            })
            .collect()
    }

    /// Prim's algorithm on the dense mutual reachability graph.
    fn spanning_tree(dist: &[f64], core: &[f64], n: usize) -> Vec<(usize, usize, f64)> {
        let mut in_tree = vec![false; n];
        let mut best = vec![f64::INFINITY; n];
        let mut from = vec![0usize; n];
        let mut edges = Vec::with_capacity(n.saturating_sub(1));

        let mut current = 0;
        in_tree[0] = true;
        for _ in 1..n {
            for j in 0..n {
                if in_tree[j] {
                    continue;
                }
                let reach = dist[current * n + j].max(core[current]).max(core[j]);
                if reach < best[j] {
                    best[j] = reach;
                    from[j] = current;
                }
            }
            let mut next = None;
            for j in (0..n).filter(|j| !in_tree[*j]) {
                if next.map_or(true, |m: usize| best[j] < best[m]) {
                    next = Some(j);
                }
            }
            let Some(next) = next else { break };
            in_tree[next] = true;
            edges.push((from[next], next, best[next]));
            current = next;
        }

        edges
    }

    /// Single-linkage merges from tree edges; node `n + i` is merge `i`.
    fn single_linkage(mut edges: Vec<(usize, usize, f64)>, n: usize) -> Vec<Merge> {
        edges.sort_by(|a, b| a.2.total_cmp(&b.2));

        let mut parent: Vec<usize> = (0..2 * n).collect();
        let mut size = vec![1usize; 2 * n];
        let mut merges = Vec::with_capacity(edges.len());

        fn find(parent: &mut [usize], mut x: usize) -> usize {
            while parent[x] != x {
                parent[x] = parent[parent[x]];
                x = parent[x];
            }
            x
        }

        for (i, (a, b, distance)) in edges.into_iter().enumerate() {
            let left = find(&mut parent, a);
            let right = find(&mut parent, b);
            let node = n + i;
            size[node] = size[left] + size[right];
            parent[left] = node;
            parent[right] = node;
            merges.push(Merge { left, right, distance, size: size[node] });
        }

        merges
    }

    fn condense(&self, merges: &[Merge], n: usize) -> Vec<CondensedEdge> {
        let root = 2 * n - 2;
        let node_size = |node: usize| if node < n { 1 } else { merges[node - n].size };
        let children = |node: usize| {
            let m = merges[node - n];
            (m.left, m.right)
        };

        // Every node below `node`, itself included
        let descendants = |node: usize| {
            let mut out = vec![node];
            let mut i = 0;
            while i < out.len() {
                if out[i] >= n {
                    let (l, r) = children(out[i]);
                    out.push(l);
                    out.push(r);
                }
                i += 1;
            }
            out
        };

        let mut relabel = vec![0usize; 2 * n - 1];
        relabel[root] = n;
        let mut next_label = n + 1;
        let mut ignore = vec![false; 2 * n - 1];
        let mut result = Vec::new();

        for node in descendants(root) {
            if node < n || ignore[node] {
                continue;
            }
            let (left, right) = children(node);
            let distance = merges[node - n].distance.max(MIN_MERGE_DISTANCE);
            let lambda = 1.0 / distance;
            let parent = relabel[node];
            let (left_size, right_size) = (node_size(left), node_size(right));
            let min = self.min_cluster_size;

            match (left_size >= min, right_size >= min) {
                (true, true) => {
                    for (child, child_size) in [(left, left_size), (right, right_size)] {
                        relabel[child] = next_label;
                        next_label += 1;
                        result.push(CondensedEdge { parent, child: relabel[child], lambda, child_size });
                    }
                }
                (false, false) => {
                    for side in [left, right] {
                        for sub in descendants(side) {
                            if sub < n {
                                result.push(CondensedEdge { parent, child: sub, lambda, child_size: 1 });
                            }
                            ignore[sub] = true;
                        }
                    }
                }
                (keep_left, _) => {
                    let (kept, dropped) = if keep_left { (left, right) } else { (right, left) };
                    relabel[kept] = parent;
                    for sub in descendants(dropped) {
                        if sub < n {
                            result.push(CondensedEdge { parent, child: sub, lambda, child_size: 1 });
                        }
                        ignore[sub] = true;
                    }
                }
            }
        }

        result
    }

    /// Excess-of-mass selection. Returns the selected cluster ids.
    fn select(&self, tree: &[CondensedEdge], n: usize) -> Vec<usize> {
        let max_cluster = tree.iter().map(|e| e.parent).max().unwrap_or(n);
        let count = max_cluster - n + 1;

        let mut birth = vec![0.0; count];
        for e in tree.iter().filter(|e| e.child >= n) {
            birth[e.child - n] = e.lambda;
        }
        let mut stability = vec![0.0; count];
        for e in tree {
            stability[e.parent - n] += (e.lambda - birth[e.parent - n]) * e.child_size as f64;
        }

        let mut cluster_children: Vec<Vec<usize>> = vec![Vec::new(); count];
        for e in tree.iter().filter(|e| e.child >= n) {
            cluster_children[e.parent - n].push(e.child);
        }

        let mut selected = vec![true; count];
        let first = if self.allow_single_cluster {
            0
        } else {
            selected[0] = false;
            1
        };

        // Children carry larger ids than their parents: walk bottom-up
        for c in (first..count).rev() {
            let subtree: f64 = cluster_children[c].iter().map(|child| stability[child - n]).sum();
            if subtree > stability[c] {
                selected[c] = false;
                stability[c] = subtree;
            } else {
                let mut stack = cluster_children[c].clone();
                while let Some(d) = stack.pop() {
                    selected[d - n] = false;
                    stack.extend(cluster_children[d - n].iter().copied());
                }
            }
        }

        (0..count).filter(|c| selected[*c]).map(|c| c + n).collect()
    }

    fn label(tree: &[CondensedEdge], selected: &[usize], n: usize) -> Vec<Label> {
        let size = tree.iter().map(|e| e.parent.max(e.child)).max().map_or(n + 1, |m| m + 1);
        let mut parent: Vec<usize> = (0..size).collect();

        fn find(parent: &mut [usize], mut x: usize) -> usize {
            while parent[x] != x {
                parent[x] = parent[parent[x]];
                x = parent[x];
            }
            x
        }

        for e in tree {
            if selected.contains(&e.child) {
                continue;
            }
            let top = find(&mut parent, e.parent);
            let below = find(&mut parent, e.child);
            if top != below {
                parent[below] = top;
            }
        }

        (0..n)
            .map(|i| {
                let top = find(&mut parent, i);
                selected
                    .iter()
                    .position(|c| *c == top)
                    .map_or(NOISE, |p| p as Label)
            })
            .collect()
    }
}

impl Clusterer for Hdbscan {
    fn fit(&self, points: &[GpsPoint]) -> Result<Vec<Label>, ClusterError> {
        let n = points.len();
        if n < 2 || n < self.min_cluster_size {
            return Ok(vec![NOISE; n]);
        }

        let dist = distance_matrix(points);
        let core = self.core_distances(&dist, n);
        let edges = Self::spanning_tree(&dist, &core, n);
        let merges = Self::single_linkage(edges, n);
        let tree = self.condense(&merges, n);
        let mut selected = self.select(&tree, n);
        selected.sort_unstable();
        let labels = Self::label(&tree, &selected, n);

        debug!(
            "HDBSCAN: {} clusters, {} noise points",
            selected.len(),
            labels.iter().filter(|l| **l == NOISE).count()
        );
        Ok(labels)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{blobs, separates_blobs};
    use super::*;

    /// Non-noise labels used by each blob, and whether blobs share any.
    fn blob_labels(labels: &[Label], per_blob: usize) -> (Vec<Vec<Label>>, bool) {
        let sets: Vec<Vec<Label>> = labels
            .chunks(per_blob)
            .map(|chunk| {
                let mut set: Vec<Label> = chunk.iter().copied().filter(|l| *l != NOISE).collect();
                set.sort_unstable();
                set.dedup();
                set
            })
            .collect();
        let shared = sets.iter().enumerate().any(|(i, a)| {
            sets.iter().skip(i + 1).any(|b| a.iter().any(|l| b.contains(l)))
        });
        (sets, shared)
    }

    #[test]
    fn test_separates_dense_blobs() {
        let points = blobs(&[(0.0, 0.0), (1.0, 1.0), (2.0, 0.0)], 20, 0.03, 4);
        let labels = Hdbscan::new(5).fit(&points).unwrap();
        let (sets, shared) = blob_labels(&labels, 20);
        assert!(!shared);
        assert!(sets.iter().all(|s| !s.is_empty()));
    }

    #[test]
    fn test_far_outlier_is_noise() {
        let mut points = blobs(&[(0.0, 0.0), (1.0, 1.0)], 20, 0.03, 6);
        points.push(GpsPoint::new(10.0, -10.0));
        let labels = Hdbscan::new(5).fit(&points).unwrap();
        assert_eq!(labels[40], NOISE);
        let (sets, shared) = blob_labels(&labels[..40], 20);
        assert!(!shared);
        assert!(sets.iter().all(|s| !s.is_empty()));
    }

    #[test]
    fn test_single_group_is_noise_unless_allowed() {
        let points = vec![GpsPoint::new(55.75, 48.74); 12];
        assert_eq!(Hdbscan::new(5).fit(&points).unwrap(), vec![NOISE; 12]);

        let single = Hdbscan { allow_single_cluster: true, ..Hdbscan::new(5) };
        assert_eq!(single.fit(&points).unwrap(), vec![0; 12]);
    }

    #[test]
    fn test_too_few_points_is_all_noise() {
        let points = blobs(&[(0.0, 0.0)], 3, 0.05, 2);
        assert_eq!(Hdbscan::new(5).fit(&points).unwrap(), vec![NOISE; 3]);
        assert!(Hdbscan::new(5).fit(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_duplicates_do_not_break_stability() {
        let mut points = vec![GpsPoint::new(0.0, 0.0); 10];
        points.extend(vec![GpsPoint::new(1.0, 1.0); 10]);
        let labels = Hdbscan::new(5).fit(&points).unwrap();
        assert!(separates_blobs(&labels, 10));
    }

    #[test]
    fn test_from_params() {
        let h = Hdbscan::from_params(&Params::new().with("min_cluster_size", 8)).unwrap();
        assert_eq!(h.min_cluster_size, 8);
        assert_eq!(h.min_samples, None);
        assert!(Hdbscan::from_params(&Params::new().with("min_cluster_size", 1)).is_err());
    }
}
