//! Concave boundary extraction for clusters.
//!
//! Each cluster's points are reduced to a closed ring using geo's concave
//! hull. Degenerate clusters (too few distinct points, collinear points or a
//! zero-area result) produce no boundary and do not affect their siblings.

use std::collections::BTreeMap;

use geo::{ConcaveHull, Coord, MultiPoint, Point};
use log::{debug, warn};
use serde::{Serialize, Serializer};
use serde_json::{json, Value};

use crate::clustering::{Label, NOISE};
use crate::geo_utils::{is_collinear, ring_area_km2};
use crate::rules::Category;
use crate::GpsPoint;

/// Default concavity; smaller is more concave.
pub const DEFAULT_CONCAVITY: f64 = 0.5;

/// Boundary of one cluster.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterBoundary {
    #[serde(rename = "group")]
    pub category: Category,
    #[serde(rename = "cluster_number")]
    pub cluster_id: Label,
    /// Closed ring: the first coordinate is repeated as the last.
    /// Serialized as `[lat, lon]` pairs.
    #[serde(serialize_with = "serialize_lat_lon_pairs")]
    pub coordinates: Vec<GpsPoint>,
    /// Points in the cluster, before hull reduction
    pub point_count: usize,
    /// Ring points over cluster points
    pub compression_ratio: f64,
    /// Approximate ring area
    pub area_km2: f64,
}

impl ClusterBoundary {
    /// GeoJSON polygon geometry, `[lon, lat]` order.
    ///
    /// ```rust
    /// use urban_clusters::{Category, GpsPoint, hull::boundaries};
    ///
    /// let points = vec![
    ///     GpsPoint::new(0.0, 0.0),
    ///     GpsPoint::new(0.0, 1.0),
    ///     GpsPoint::new(1.0, 0.5),
    /// ];
    /// let b = &boundaries(Category::Nature, &points, &[0, 0, 0], 0.5, false)[0];
    /// let geojson = b.to_geojson();
    /// assert_eq!(geojson["type"], "Polygon");
    /// assert_eq!(geojson["coordinates"][0].as_array().unwrap().len(), 4);
    /// ```
    pub fn to_geojson(&self) -> Value {
        let ring: Vec<[f64; 2]> = self
            .coordinates
            .iter()
            .map(|p| [p.longitude, p.latitude])
            .collect();
        json!({
            "type": "Polygon",
            "coordinates": [ring],
        })
    }
}

fn serialize_lat_lon_pairs<S: Serializer>(ring: &[GpsPoint], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(ring.iter().map(|p| [p.latitude, p.longitude]))
}

/// Concave hull of `points` as a closed ring, or `None` when degenerate.
///
/// # Arguments
///
/// * `points` - Cluster members; duplicates are collapsed first
/// * `concavity` - Smaller values hug the points more tightly
///
/// # Returns
///
/// A ring whose first coordinate is repeated as the last. `None` for fewer
/// than three distinct points, collinear points or a zero-area result.
pub fn concave_hull(points: &[GpsPoint], concavity: f64) -> Option<Vec<GpsPoint>> {
    let mut distinct: Vec<GpsPoint> = points.to_vec();
    distinct.sort_by(|a, b| {
        a.latitude
            .total_cmp(&b.latitude)
            .then(a.longitude.total_cmp(&b.longitude))
    });
    distinct.dedup();

    if distinct.len() < 3 || is_collinear(&distinct) {
        return None;
    }

    let multi: MultiPoint<f64> = distinct
        .iter()
        .map(|p| Point::from(Coord { x: p.longitude, y: p.latitude }))
        .collect();
    let polygon = multi.concave_hull(concavity);

    let mut ring: Vec<GpsPoint> = polygon
        .exterior()
        .coords()
        .map(|c| GpsPoint::new(c.y, c.x))
        .collect();
    if let (Some(first), Some(last)) = (ring.first().copied(), ring.last().copied()) {
        if first != last {
            ring.push(first);
        }
    }

    // A closed triangle has 4 coordinates
    if ring.len() < 4 || ring_area_km2(&ring) <= 0.0 {
        return None;
    }
    Some(ring)
}

/// Boundaries for every cluster of one category, ordered by cluster id.
///
/// # Arguments
///
/// * `category` - Category the boundaries are tagged with
/// * `points` - All points of the category
/// * `labels` - One label per point
/// * `concavity` - Passed to [`concave_hull`]
/// * `include_noise` - Give noise points a boundary of their own
///
/// Degenerate clusters are logged and left out.
pub fn boundaries(
    category: Category,
    points: &[GpsPoint],
    labels: &[Label],
    concavity: f64,
    include_noise: bool,
) -> Vec<ClusterBoundary> {
    let mut clusters: BTreeMap<Label, Vec<GpsPoint>> = BTreeMap::new();
    for (point, label) in points.iter().zip(labels) {
        if *label == NOISE && !include_noise {
            continue;
        }
        clusters.entry(*label).or_default().push(*point);
    }

    clusters
        .into_iter()
        .filter_map(|(cluster_id, members)| {
            let Some(coordinates) = concave_hull(&members, concavity) else {
                warn!(
                    "{}: cluster {} is degenerate ({} points), no boundary",
                    category,
                    cluster_id,
                    members.len()
                );
                return None;
            };
            let compression_ratio = coordinates.len() as f64 / members.len() as f64;
            debug!(
                "{}: cluster {} reduced to {:.1}% of {} points",
                category,
                cluster_id,
                compression_ratio * 100.0,
                members.len()
            );
            Some(ClusterBoundary {
                category,
                cluster_id,
                area_km2: ring_area_km2(&coordinates),
                coordinates,
                point_count: members.len(),
                compression_ratio,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<GpsPoint> {
        vec![
            GpsPoint::new(0.0, 0.0),
            GpsPoint::new(0.0, 1.0),
            GpsPoint::new(1.0, 1.0),
            GpsPoint::new(1.0, 0.0),
            GpsPoint::new(0.5, 0.5),
        ]
    }

    #[test]
    fn test_too_few_points() {
        assert!(concave_hull(&[], 0.5).is_none());
        assert!(concave_hull(&[GpsPoint::new(0.0, 0.0), GpsPoint::new(1.0, 1.0)], 0.5).is_none());
        // three points, two of them identical
        let dup = vec![
            GpsPoint::new(0.0, 0.0),
            GpsPoint::new(0.0, 0.0),
            GpsPoint::new(1.0, 1.0),
        ];
        assert!(concave_hull(&dup, 0.5).is_none());
    }

    #[test]
    fn test_collinear_points() {
        let line: Vec<GpsPoint> = (0..6).map(|i| GpsPoint::new(i as f64, i as f64 * 2.0)).collect();
        assert!(concave_hull(&line, 0.5).is_none());
    }

    #[test]
    fn test_triangle_is_closed_ring() {
        let triangle = vec![
            GpsPoint::new(0.0, 0.0),
            GpsPoint::new(0.0, 1.0),
            GpsPoint::new(1.0, 0.0),
        ];
        let ring = concave_hull(&triangle, 0.5).unwrap();
        assert_eq!(ring.len(), 4);
        assert_eq!(ring.first(), ring.last());
        for p in &triangle {
            assert!(ring.contains(p));
        }
    }

    #[test]
    fn test_square_area() {
        let ring = concave_hull(&square(), 2.0).unwrap();
        assert_eq!(ring.first(), ring.last());
        let expected = KM2_PER_DEGREE2;
        let area = ring_area_km2(&ring);
        // the center point may be carved in by a concave hull; never grows
        assert!(area <= expected + 1e-6);
        assert!(area > 0.0);
    }

    const KM2_PER_DEGREE2: f64 = crate::geo_utils::KM_PER_DEGREE * crate::geo_utils::KM_PER_DEGREE;

    #[test]
    fn test_boundaries_exclude_noise_by_default() {
        let mut points = square();
        let shifted: Vec<GpsPoint> = square()
            .iter()
            .map(|p| GpsPoint::new(p.latitude + 5.0, p.longitude))
            .collect();
        points.extend(shifted);
        let labels = [0, 0, 0, 0, 0, NOISE, NOISE, NOISE, NOISE, NOISE];

        let without = boundaries(Category::Nature, &points, &labels, 0.5, false);
        assert_eq!(without.len(), 1);
        assert_eq!(without[0].cluster_id, 0);
        assert_eq!(without[0].point_count, 5);
        assert!(without[0].compression_ratio > 0.0);

        let with = boundaries(Category::Nature, &points, &labels, 0.5, true);
        assert_eq!(with.len(), 2);
        assert_eq!(with[0].cluster_id, NOISE);
    }

    #[test]
    fn test_degenerate_cluster_does_not_affect_siblings() {
        let mut points = square();
        points.push(GpsPoint::new(9.0, 9.0));
        points.push(GpsPoint::new(9.0, 9.5));
        let labels = [1, 1, 1, 1, 1, 0, 0];
        let result = boundaries(Category::Tourist, &points, &labels, 0.5, false);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].cluster_id, 1);
        assert_eq!(result[0].category, Category::Tourist);
    }

    #[test]
    fn test_serialized_record_field_names() {
        let result = boundaries(Category::CafeStreet, &square(), &[3; 5], 0.5, false);
        let json = serde_json::to_value(&result[0]).unwrap();
        assert_eq!(json["group"], "Cafe street");
        assert_eq!(json["cluster_number"], 3);
        let pairs = json["coordinates"].as_array().unwrap();
        assert_eq!(pairs.len(), result[0].coordinates.len());
        for (pair, point) in pairs.iter().zip(&result[0].coordinates) {
            assert_eq!(pair[0].as_f64().unwrap(), point.latitude);
            assert_eq!(pair[1].as_f64().unwrap(), point.longitude);
        }

        let geojson = result[0].to_geojson();
        let ring = geojson["coordinates"][0].as_array().unwrap();
        assert_eq!(ring.first(), ring.last());
    }
}
