//! # Geographic Utilities
//!
//! Small geometric helpers shared by the filter, the clustering algorithms,
//! the scorer and the hull extractor.
//!
//! ## Overview
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`haversine_distance`] | Great-circle distance between two points, in meters |
//! | [`squared_distance`] | Squared Euclidean distance in raw degree space |
//! | [`euclidean_distance`] | Euclidean distance in raw degree space |
//! | [`compute_bounds`] | Bounding box of a point set |
//! | [`compute_center`] | Arithmetic centroid of a point set |
//! | [`is_collinear`] | Whether all points lie on one line |
//! | [`ring_area_km2`] | Approximate area of a closed ring in km² |
//!
//! ## Coordinate Space
//!
//! Clustering happens directly on (latitude, longitude) degrees. At city
//! scale one degree of latitude and one degree of longitude differ by a
//! constant factor, so Euclidean distance on raw degrees keeps cluster
//! shapes faithful to the map. Only the reporting helpers ([`haversine_distance`],
//! [`ring_area_km2`]) convert to metric units.
//!
//! ```rust
//! use urban_clusters::{GpsPoint, geo_utils};
//!
//! let a = GpsPoint::new(55.75, 48.74);
//! let b = GpsPoint::new(55.76, 48.74);
//!
//! // ~1.1 km between the two points
//! let meters = geo_utils::haversine_distance(&a, &b);
//! assert!((meters - 1_112.0).abs() < 10.0);
//!
//! // 0.01 degrees in raw coordinate space
//! assert!((geo_utils::euclidean_distance(&a, &b) - 0.01).abs() < 1e-9);
//! ```

use geo::{Distance, Haversine, Point};

use crate::{Bounds, GpsPoint};

/// Kilometers per degree used for quick area estimates.
pub const KM_PER_DEGREE: f64 = 111.32;

// =============================================================================
// Distance Functions
// =============================================================================

/// Great-circle distance between two points, in meters.
///
/// # Example
///
/// ```rust
/// use urban_clusters::{GpsPoint, geo_utils};
///
/// let london = GpsPoint::new(51.5074, -0.1278);
/// let paris = GpsPoint::new(48.8566, 2.3522);
///
/// let distance = geo_utils::haversine_distance(&london, &paris);
/// assert!((distance - 343_560.0).abs() < 1000.0);
/// ```
#[inline]
pub fn haversine_distance(p1: &GpsPoint, p2: &GpsPoint) -> f64 {
    let point1 = Point::new(p1.longitude, p1.latitude);
    let point2 = Point::new(p2.longitude, p2.latitude);
    Haversine::distance(point1, point2)
}

/// Squared Euclidean distance in raw (lat, lon) degree space.
#[inline]
pub fn squared_distance(p1: &GpsPoint, p2: &GpsPoint) -> f64 {
    let dlat = p1.latitude - p2.latitude;
    let dlng = p1.longitude - p2.longitude;
    dlat * dlat + dlng * dlng
}

/// Euclidean distance in raw (lat, lon) degree space.
#[inline]
pub fn euclidean_distance(p1: &GpsPoint, p2: &GpsPoint) -> f64 {
    squared_distance(p1, p2).sqrt()
}

// =============================================================================
// Bounding Box / Center
// =============================================================================

/// Compute the bounding box of a point set.
///
/// For empty input the result has inverted MIN/MAX bounds that contain nothing.
///
/// ```rust
/// use urban_clusters::{GpsPoint, geo_utils};
///
/// let points = vec![
///     GpsPoint::new(51.50, -0.13),
///     GpsPoint::new(51.51, -0.12),
/// ];
/// let bounds = geo_utils::compute_bounds(&points);
/// assert_eq!(bounds.min_lat, 51.50);
/// assert_eq!(bounds.max_lng, -0.12);
/// ```
pub fn compute_bounds(points: &[GpsPoint]) -> Bounds {
    let mut min_lat = f64::MAX;
    let mut max_lat = f64::MIN;
    let mut min_lng = f64::MAX;
    let mut max_lng = f64::MIN;

    for p in points {
        min_lat = min_lat.min(p.latitude);
        max_lat = max_lat.max(p.latitude);
        min_lng = min_lng.min(p.longitude);
        max_lng = max_lng.max(p.longitude);
    }

    Bounds { min_lat, max_lat, min_lng, max_lng }
}

/// Arithmetic mean of all coordinates. Returns (0, 0) for empty input.
pub fn compute_center(points: &[GpsPoint]) -> GpsPoint {
    if points.is_empty() {
        return GpsPoint::new(0.0, 0.0);
    }

    let sum_lat: f64 = points.iter().map(|p| p.latitude).sum();
    let sum_lng: f64 = points.iter().map(|p| p.longitude).sum();
    let n = points.len() as f64;

    GpsPoint::new(sum_lat / n, sum_lng / n)
}

// =============================================================================
// Shape Predicates
// =============================================================================

/// Returns true when every point lies on a single line (or there are fewer than 3).
pub fn is_collinear(points: &[GpsPoint]) -> bool {
    let Some(first) = points.first() else {
        return true;
    };

    // The point farthest from `first` defines the candidate line; picking the
    // farthest one keeps the cross products well-conditioned.
    let Some(far) = points
        .iter()
        .max_by(|a, b| squared_distance(first, a).total_cmp(&squared_distance(first, b)))
    else {
        return true;
    };

    let dx = far.longitude - first.longitude;
    let dy = far.latitude - first.latitude;
    let len = (dx * dx + dy * dy).sqrt();
    if len == 0.0 {
        return true;
    }

    let eps = 1e-12 * len.max(1.0);
    points.iter().all(|p| {
        let px = p.longitude - first.longitude;
        let py = p.latitude - first.latitude;
        ((dx * py - dy * px) / len).abs() <= eps
    })
}

/// Approximate area of a closed ring in km².
///
/// Shoelace area in square degrees scaled by [`KM_PER_DEGREE`]². Coarse, but
/// matches what search backends index for geo-shape metadata.
pub fn ring_area_km2(ring: &[GpsPoint]) -> f64 {
    if ring.len() < 3 {
        return 0.0;
    }

    let twice_area: f64 = ring
        .iter()
        .zip(ring.iter().cycle().skip(1))
        .map(|(a, b)| a.longitude * b.latitude - b.longitude * a.latitude)
        .sum();

    0.5 * twice_area.abs() * KM_PER_DEGREE * KM_PER_DEGREE
}

// =============================================================================
// Unit Tests
// =============================================================================
