//! # Pipeline
//!
//! Ties the stages together for one run:
//!
//! 1. Classify every POI through the rule table
//! 2. Group points by category
//! 3. Per category: filter to the area of interest, cluster with the
//!    configured technique, score the labelling and extract boundaries
//!
//! Categories are independent. A category that is unconfigured, too sparse,
//! misconfigured or rejected by its algorithm is reported as skipped with a
//! [`SkipReason`]; the others are unaffected.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use log::{info, warn};

use crate::area::{filter_points, AreaMetrics, AreaOfInterest};
use crate::classifier::{group_by_category, Classifier};
use crate::clustering::{self, distinct_labels, Label};
use crate::config::ClusteringConfig;
use crate::error::SkipReason;
use crate::hull::{boundaries, ClusterBoundary};
use crate::metrics::{score, ClusterMetrics};
use crate::rules::{Category, RuleTable};
use crate::{GpsPoint, Poi};

/// Result of processing one category.
#[derive(Debug)]
pub enum CategoryOutcome {
    Skipped {
        reason: SkipReason,
    },
    Clustered {
        /// Points inside the area of interest, in the order they were clustered
        points: Vec<GpsPoint>,
        /// One label per point
        labels: Vec<Label>,
        /// `None` when the scores are undefined for this labelling
        metrics: Option<ClusterMetrics>,
        /// Ordered by cluster id; degenerate clusters are absent
        boundaries: Vec<ClusterBoundary>,
    },
}

impl CategoryOutcome {
    fn skipped(reason: SkipReason) -> Self {
        CategoryOutcome::Skipped { reason }
    }
}

/// Everything a run produced.
#[derive(Debug)]
pub struct PipelineReport {
    pub area: AreaOfInterest,
    pub area_metrics: AreaMetrics,
    /// One entry per category that had points or a configured technique
    pub outcomes: BTreeMap<Category, CategoryOutcome>,
}

impl PipelineReport {
    /// All boundaries, ordered by category then cluster id.
    pub fn boundaries(&self) -> impl Iterator<Item = &ClusterBoundary> {
        self.outcomes
            .values()
            .filter_map(|outcome| match outcome {
                CategoryOutcome::Clustered { boundaries, .. } => Some(boundaries),
                CategoryOutcome::Skipped { .. } => None,
            })
            .flatten()
    }

    /// Quality scores of every clustered category where they are defined.
    pub fn metrics(&self) -> BTreeMap<Category, ClusterMetrics> {
        self.outcomes
            .iter()
            .filter_map(|(category, outcome)| match outcome {
                CategoryOutcome::Clustered { metrics: Some(m), .. } => Some((*category, *m)),
                _ => None,
            })
            .collect()
    }

    /// Skipped categories with their reasons.
    pub fn skipped(&self) -> Vec<(Category, &SkipReason)> {
        self.outcomes
            .iter()
            .filter_map(|(category, outcome)| match outcome {
                CategoryOutcome::Skipped { reason } => Some((*category, reason)),
                _ => None,
            })
            .collect()
    }

    pub fn outcome(&self, category: Category) -> Option<&CategoryOutcome> {
        self.outcomes.get(&category)
    }
}

/// A configured run over a rule table.
#[derive(Debug, Clone)]
pub struct Pipeline {
    rules: RuleTable,
    config: ClusteringConfig,
}

impl Pipeline {
    pub fn new(rules: RuleTable, config: ClusteringConfig) -> Self {
        Self { rules, config }
    }

    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    pub fn config(&self) -> &ClusteringConfig {
        &self.config
    }

    /// Run every category sequentially.
    ///
    /// ```rust
    /// use urban_clusters::{
    ///     AreaOfInterest, Category, ClusteringConfig, Params, Pipeline, Poi, RuleTable,
    ///     TechniqueSpec,
    /// };
    ///
    /// let pois: Vec<Poi> = (0..12)
    ///     .map(|i| {
    ///         let lat = 55.70 + (i % 2) as f64 * 0.05 + (i / 2) as f64 * 0.001;
    ///         let lng = 48.70 + (i / 2) as f64 * 0.002 * (1 + i % 3) as f64;
    ///         Poi::new("Park", lat, lng).with_tag("leisure", "park")
    ///     })
    ///     .collect();
    ///
    /// let config = ClusteringConfig::new(AreaOfInterest::new(55.72, 48.72, 0.1))
    ///     .with_technique(
    ///         Category::Nature,
    ///         TechniqueSpec::new("kmeans", Params::new().with("n_clusters", 2)),
    ///     );
    ///
    /// let report = Pipeline::new(RuleTable::standard(), config).run(&pois);
    /// assert!(report.metrics().contains_key(&Category::Nature));
    /// // Tourist has points but no technique
    /// assert_eq!(report.skipped()[0].0, Category::Tourist);
    /// ```
    pub fn run(&self, pois: &[Poi]) -> PipelineReport {
        self.run_with_cancel(pois, &AtomicBool::new(false))
    }

    /// Run sequentially, checking `cancel` before each category.
    ///
    /// Categories not started when the flag is raised are reported as
    /// [`SkipReason::Cancelled`].
    pub fn run_with_cancel(&self, pois: &[Poi], cancel: &AtomicBool) -> PipelineReport {
        let start = Instant::now();
        let groups = self.group(pois);

        let outcomes: BTreeMap<Category, CategoryOutcome> = groups
            .iter()
            .map(|(category, points)| {
                let outcome = if cancel.load(Ordering::Relaxed) {
                    CategoryOutcome::skipped(SkipReason::Cancelled)
                } else {
                    self.process_category(*category, points)
                };
                (*category, outcome)
            })
            .collect();

        self.finish(outcomes, start)
    }

    /// Run categories concurrently on the rayon pool. Results are identical
    /// to [`Pipeline::run`].
    #[cfg(feature = "parallel")]
    pub fn run_parallel(&self, pois: &[Poi]) -> PipelineReport {
        use rayon::prelude::*;

        let start = Instant::now();
        let groups: Vec<(Category, Vec<GpsPoint>)> = self.group(pois).into_iter().collect();

        let outcomes: BTreeMap<Category, CategoryOutcome> = groups
            .par_iter()
            .map(|(category, points)| (*category, self.process_category(*category, points)))
            .collect::<Vec<_>>()
            .into_iter()
            .collect();

        self.finish(outcomes, start)
    }

    /// Classified point sets for every category that has points, plus an
    /// empty set for every configured category that has none.
    fn group(&self, pois: &[Poi]) -> BTreeMap<Category, Vec<GpsPoint>> {
        let classifier = Classifier::new(&self.rules);
        let classified = classifier.classify_all(pois);
        let mut groups = group_by_category(&classified, self.config.options.skip_unnamed);

        let configured: BTreeSet<Category> = self.config.techniques.keys().copied().collect();
        for category in configured {
            groups.entry(category).or_default();
        }
        groups
    }

    fn process_category(&self, category: Category, points: &[GpsPoint]) -> CategoryOutcome {
        let start = Instant::now();
        let options = &self.config.options;

        let Some(spec) = self.config.technique(category) else {
            info!("{}: no clustering technique configured, skipping", category);
            return CategoryOutcome::skipped(SkipReason::NotConfigured);
        };

        let inside = filter_points(points, &self.config.area().bounds());
        if inside.len() < options.min_points {
            info!(
                "{}: skipping, too few points ({} < {})",
                category,
                inside.len(),
                options.min_points
            );
            return CategoryOutcome::skipped(SkipReason::InsufficientData {
                found: inside.len(),
                required: options.min_points,
            });
        }

        let labels = match clustering::cluster(&inside, spec) {
            Ok(labels) => labels,
            Err(reason) => {
                warn!("{}: skipping, {}", category, reason);
                return CategoryOutcome::skipped(reason);
            }
        };

        let metrics = score(&inside, &labels);
        let boundaries = boundaries(
            category,
            &inside,
            &labels,
            options.concavity,
            options.include_noise,
        );

        match &metrics {
            Some(m) => info!(
                "{}: {} points, {} labels via {} in {:?} (silhouette {:.2}, calinski_harabasz {:.2}, davies_bouldin {:.2})",
                category,
                inside.len(),
                distinct_labels(&labels),
                spec.method,
                start.elapsed(),
                m.silhouette,
                m.calinski_harabasz,
                m.davies_bouldin
            ),
            None => info!(
                "{}: {} points, {} labels via {} in {:?} (metrics undefined)",
                category,
                inside.len(),
                distinct_labels(&labels),
                spec.method,
                start.elapsed()
            ),
        }

        CategoryOutcome::Clustered {
            points: inside,
            labels,
            metrics,
            boundaries,
        }
    }

    fn finish(&self, outcomes: BTreeMap<Category, CategoryOutcome>, start: Instant) -> PipelineReport {
        let area = self.config.area();
        let report = PipelineReport {
            area,
            area_metrics: area.metrics(),
            outcomes,
        };
        info!(
            "Pipeline finished in {:?}: {} boundaries, {} categories skipped, window {:.1} km²",
            start.elapsed(),
            report.boundaries().count(),
            report.skipped().len(),
            report.area_metrics.area_km2
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::config::{Params, PipelineOptions, TechniqueSpec};
    use crate::error::ClusterError;

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    /// `n` POIs with one tag, uniformly inside the 1°×1° box at (55..56, 48..49).
    fn pois(n: usize, key: &str, value: &str, seed: u64) -> Vec<Poi> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|i| {
                Poi::new(&format!("poi-{}", i), rng.gen_range(55.0..56.0), rng.gen_range(48.0..49.0))
                    .with_tag(key, value)
            })
            .collect()
    }

    fn config() -> ClusteringConfig {
        ClusteringConfig::new(AreaOfInterest::new(55.5, 48.5, 0.5))
    }

    fn kmeans(k: i64) -> TechniqueSpec {
        TechniqueSpec::new("kmeans", Params::new().with("n_clusters", k).with("random_state", 42))
    }

    #[test]
    fn test_end_to_end_kmeans() {
        init_logging();
        let pois = pois(20, "natural", "wood", 1);
        let config = config().with_technique(Category::Nature, kmeans(2));
        let report = Pipeline::new(RuleTable::standard(), config).run(&pois);

        let Some(CategoryOutcome::Clustered { labels, metrics, boundaries, points }) =
            report.outcome(Category::Nature)
        else {
            panic!("Nature was not clustered");
        };
        assert_eq!(points.len(), 20);
        assert_eq!(distinct_labels(labels), 2);
        assert_eq!(boundaries.len(), 2);
        assert_eq!(boundaries[0].cluster_id, 0);
        assert_eq!(boundaries[1].cluster_id, 1);
        assert!(boundaries.iter().all(|b| b.coordinates.first() == b.coordinates.last()));

        let silhouette = metrics.unwrap().silhouette;
        assert!(silhouette > -1.0 && silhouette <= 1.0);
        assert_eq!(report.boundaries().count(), 2);
    }

    #[test]
    fn test_unconfigured_category_does_not_block_others() {
        init_logging();
        let mut all = pois(20, "natural", "wood", 2);
        all.extend(pois(15, "building", "university", 3));
        let config = config().with_technique(Category::Nature, kmeans(2));
        let report = Pipeline::new(RuleTable::standard(), config).run(&all);

        let skipped = report.skipped();
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].0, Category::University);
        assert!(matches!(skipped[0].1, SkipReason::NotConfigured));
        assert!(report.metrics().contains_key(&Category::Nature));
    }

    #[test]
    fn test_sparse_and_misconfigured_categories_are_skipped() {
        init_logging();
        let mut all = pois(20, "natural", "wood", 4);
        all.extend(pois(5, "amenity", "bar", 5));
        all.extend(pois(12, "amenity", "cafe", 6));

        let config = config()
            .with_technique(Category::Nature, TechniqueSpec::new("kmeans", Params::new().with("n_clusters", 50)))
            .with_technique(Category::Nightlife, kmeans(2))
            .with_technique(Category::CafeStreet, TechniqueSpec::new("meanshift", Params::new()))
            .with_technique(Category::Downtown, kmeans(2));
        let report = Pipeline::new(RuleTable::standard(), config).run(&all);

        let reason = |c| match report.outcome(c) {
            Some(CategoryOutcome::Skipped { reason }) => reason,
            other => panic!("{} not skipped: {:?}", c, other),
        };
        assert!(matches!(
            reason(Category::Nature),
            SkipReason::Clustering(ClusterError::TooFewSamples { samples: 20, clusters: 50 })
        ));
        assert!(matches!(
            reason(Category::Nightlife),
            SkipReason::InsufficientData { found: 5, required: 10 }
        ));
        assert!(matches!(reason(Category::CafeStreet), SkipReason::Configuration(_)));
        assert!(matches!(
            reason(Category::Downtown),
            SkipReason::InsufficientData { found: 0, required: 10 }
        ));
        assert_eq!(report.boundaries().count(), 0);
    }

    #[test]
    fn test_points_outside_window_are_ignored() {
        init_logging();
        let mut all = pois(20, "natural", "wood", 7);
        all.push(Poi::new("far", 10.0, 10.0).with_tag("natural", "wood"));
        let config = config().with_technique(Category::Nature, kmeans(2));
        let report = Pipeline::new(RuleTable::standard(), config).run(&all);

        match report.outcome(Category::Nature) {
            Some(CategoryOutcome::Clustered { points, .. }) => assert_eq!(points.len(), 20),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_cancellation_skips_remaining_categories() {
        init_logging();
        let mut all = pois(20, "natural", "wood", 8);
        all.extend(pois(20, "building", "university", 9));
        let config = config()
            .with_technique(Category::Nature, kmeans(2))
            .with_technique(Category::University, kmeans(2));
        let pipeline = Pipeline::new(RuleTable::standard(), config);

        let report = pipeline.run_with_cancel(&all, &AtomicBool::new(true));
        assert_eq!(report.skipped().len(), 2);
        assert!(report
            .skipped()
            .iter()
            .all(|(_, reason)| matches!(reason, SkipReason::Cancelled)));
    }

    #[test]
    fn test_include_noise_and_area_metrics() {
        init_logging();
        let pois = pois(30, "natural", "wood", 10);
        let options = PipelineOptions { include_noise: true, min_points: 5, ..Default::default() };
        let config = config()
            .with_options(options)
            .with_technique(
                Category::Nature,
                TechniqueSpec::new("optics", Params::new().with("min_samples", 3).with("eps", 0.3)),
            );
        let report = Pipeline::new(RuleTable::standard(), config).run(&pois);

        assert!(report.area_metrics.area_km2 > 0.0);
        assert!(matches!(
            report.outcome(Category::Nature),
            Some(CategoryOutcome::Clustered { .. })
        ));
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn test_parallel_matches_sequential() {
        init_logging();
        let mut all = pois(20, "natural", "wood", 11);
        all.extend(pois(25, "building", "university", 12));
        let config = config()
            .with_technique(Category::Nature, kmeans(2))
            .with_technique(Category::University, kmeans(3));
        let pipeline = Pipeline::new(RuleTable::standard(), config);

        let sequential = pipeline.run(&all);
        let parallel = pipeline.run_parallel(&all);
        let a: Vec<&ClusterBoundary> = sequential.boundaries().collect();
        let b: Vec<&ClusterBoundary> = parallel.boundaries().collect();
        assert_eq!(a, b);
        assert_eq!(sequential.metrics(), parallel.metrics());
    }
}
