//! Area-of-interest filtering.
//!
//! The window is a square in degree space: `center ± half_diagonal` on both
//! axes, bounds inclusive, no reprojection.

use serde::{Deserialize, Serialize};

use crate::geo_utils::haversine_distance;
use crate::{Bounds, GpsPoint};

/// Query window around a center point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AreaOfInterest {
    pub center: GpsPoint,
    /// Half the side of the square window, in degrees
    pub half_diagonal: f64,
}

/// Physical size of an area of interest.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AreaMetrics {
    pub width_km: f64,
    pub height_km: f64,
    pub area_km2: f64,
}

impl AreaOfInterest {
    pub fn new(latitude: f64, longitude: f64, half_diagonal: f64) -> Self {
        Self {
            center: GpsPoint::new(latitude, longitude),
            half_diagonal,
        }
    }

    /// Bounding box of the window.
    pub fn bounds(&self) -> Bounds {
        Bounds {
            min_lat: self.center.latitude - self.half_diagonal,
            max_lat: self.center.latitude + self.half_diagonal,
            min_lng: self.center.longitude - self.half_diagonal,
            max_lng: self.center.longitude + self.half_diagonal,
        }
    }

    /// Width and height measured through the center, and their product.
    pub fn metrics(&self) -> AreaMetrics {
        let b = self.bounds();
        let c = self.center;
        let width_km = haversine_distance(
            &GpsPoint::new(c.latitude, b.min_lng),
            &GpsPoint::new(c.latitude, b.max_lng),
        ) / 1000.0;
        let height_km = haversine_distance(
            &GpsPoint::new(b.min_lat, c.longitude),
            &GpsPoint::new(b.max_lat, c.longitude),
        ) / 1000.0;

        AreaMetrics {
            width_km,
            height_km,
            area_km2: width_km * height_km,
        }
    }
}

/// Keep the points inside `bounds` (inclusive), preserving order.
///
/// ```rust
/// use urban_clusters::{GpsPoint, area::{AreaOfInterest, filter_points}};
///
/// let aoi = AreaOfInterest::new(55.75, 48.74, 0.01);
/// let points = vec![
///     GpsPoint::new(55.75, 48.74),
///     GpsPoint::new(55.755, 48.745),
///     GpsPoint::new(55.80, 48.74),
/// ];
/// let inside = filter_points(&points, &aoi.bounds());
/// assert_eq!(inside.len(), 2);
/// ```
pub fn filter_points(points: &[GpsPoint], bounds: &Bounds) -> Vec<GpsPoint> {
    points
        .iter()
        .filter(|p| bounds.contains(p))
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> Vec<GpsPoint> {
        (0..10)
            .flat_map(|i| (0..10).map(move |j| GpsPoint::new(i as f64 * 0.1, j as f64 * 0.1)))
            .collect()
    }

    #[test]
    fn test_bounds_are_center_plus_minus_half_diagonal() {
        let aoi = AreaOfInterest::new(55.0, 48.0, 0.5);
        let b = aoi.bounds();
        assert_eq!(b.min_lat, 54.5);
        assert_eq!(b.max_lat, 55.5);
        assert_eq!(b.min_lng, 47.5);
        assert_eq!(b.max_lng, 48.5);
    }

    #[test]
    fn test_filter_is_inclusive() {
        let bounds = AreaOfInterest::new(0.5, 0.5, 0.25).bounds();
        let inside = filter_points(&[GpsPoint::new(0.25, 0.75), GpsPoint::new(0.2, 0.5)], &bounds);
        assert_eq!(inside, vec![GpsPoint::new(0.25, 0.75)]);
    }

    #[test]
    fn test_filter_is_idempotent() {
        let bounds = AreaOfInterest::new(0.45, 0.45, 0.2).bounds();
        let once = filter_points(&grid(), &bounds);
        let twice = filter_points(&once, &bounds);
        assert!(!once.is_empty());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_metrics() {
        // 0.1 degree at the equator is ~11.1 km each way
        let metrics = AreaOfInterest::new(0.0, 0.0, 0.05).metrics();
        assert!((metrics.width_km - 11.12).abs() < 0.05);
        assert!((metrics.height_km - 11.12).abs() < 0.05);
        assert!((metrics.area_km2 - metrics.width_km * metrics.height_km).abs() < 1e-9);
    }
}
