//! # Urban Clusters
//!
//! Urban-function zoning from OpenStreetMap points of interest.
//!
//! This library provides:
//! - Tag-based classification of POIs into urban-function categories
//! - Per-category clustering with six interchangeable algorithms
//! - Cluster quality scores (silhouette, Calinski-Harabasz, Davies-Bouldin)
//! - Concave boundary extraction for every cluster
//!
//! ## Features
//!
//! - **`parallel`** - Process categories in parallel with rayon
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use urban_clusters::{
//!     AreaOfInterest, Category, ClusteringConfig, Params, Pipeline, Poi, RuleTable,
//!     TechniqueSpec,
//! };
//!
//! // Two groups of cafes a few kilometers apart
//! let pois: Vec<Poi> = (0..20)
//!     .map(|i| {
//!         let offset = if i < 10 { 0.0 } else { 0.04 };
//!         let lat = 55.74 + offset + (i % 5) as f64 * 0.001;
//!         let lng = 48.72 + offset + (i % 3) as f64 * 0.002;
//!         Poi::new("Cafe", lat, lng).with_tag("amenity", "cafe")
//!     })
//!     .collect();
//!
//! let config = ClusteringConfig::new(AreaOfInterest::new(55.75, 48.74, 0.05))
//!     .with_technique(
//!         Category::CafeStreet,
//!         TechniqueSpec::new("kmeans", Params::new().with("n_clusters", 2)),
//!     );
//!
//! let report = Pipeline::new(RuleTable::standard(), config).run(&pois);
//! for boundary in report.boundaries() {
//!     println!(
//!         "{} #{}: {} points, {:.2} km²",
//!         boundary.category, boundary.cluster_id, boundary.point_count, boundary.area_km2
//!     );
//! }
//! assert_eq!(report.boundaries().count(), 2);
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub mod area;
pub mod classifier;
pub mod clustering;
pub mod config;
pub mod error;
pub mod geo_utils;
pub mod hull;
pub mod metrics;
pub mod pipeline;
pub mod rules;

pub use area::{AreaMetrics, AreaOfInterest};
pub use classifier::{ClassifiedPoi, Classifier};
pub use clustering::{Algorithm, Clusterer, Label, NOISE};
pub use config::{ClusteringConfig, Params, PipelineOptions, TechniqueSpec};
pub use error::{ClusterError, ConfigError, SkipReason};
pub use hull::ClusterBoundary;
pub use metrics::ClusterMetrics;
pub use pipeline::{CategoryOutcome, Pipeline, PipelineReport};
pub use rules::{Category, RuleTable};

// ============================================================================
// Core Types
// ============================================================================

/// A GPS coordinate with latitude and longitude.
///
/// # Example
/// ```
/// use urban_clusters::GpsPoint;
/// let point = GpsPoint::new(55.7525, 48.7445); // Innopolis
/// assert!(point.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// Axis-aligned bounding box in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Create bounds from GPS points.
    pub fn from_points(points: &[GpsPoint]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        Some(geo_utils::compute_bounds(points))
    }

    /// Whether `point` lies inside, edges included.
    pub fn contains(&self, point: &GpsPoint) -> bool {
        point.latitude >= self.min_lat
            && point.latitude <= self.max_lat
            && point.longitude >= self.min_lng
            && point.longitude <= self.max_lng
    }

    /// Get the center point of the bounds.
    pub fn center(&self) -> GpsPoint {
        GpsPoint::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }
}

/// Name the data provider gives to POIs without one.
pub const UNNAMED: &str = "Unnamed";

/// A point of interest with its raw OpenStreetMap tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Poi {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl Poi {
    pub fn new(name: &str, latitude: f64, longitude: f64) -> Self {
        Self {
            name: name.to_string(),
            latitude,
            longitude,
            tags: BTreeMap::new(),
        }
    }

    /// Builder-style tag insertion.
    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.to_string(), value.to_string());
        self
    }

    pub fn point(&self) -> GpsPoint {
        GpsPoint::new(self.latitude, self.longitude)
    }

    /// True unless the name is empty or the provider placeholder.
    pub fn is_named(&self) -> bool {
        let name = self.name.trim();
        !name.is_empty() && name != UNNAMED
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
