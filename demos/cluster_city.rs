//! Load a clustering configuration, cluster a synthetic city and print the
//! resulting boundaries.
//!
//! Run with: cargo run --example cluster_city [-- path/to/config.yaml]

use std::error::Error;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use urban_clusters::{CategoryOutcome, ClusteringConfig, Pipeline, Poi, RuleTable};

/// `count` POIs with one tag, scattered around `center`.
fn scatter(
    rng: &mut StdRng,
    name: &str,
    (key, value): (&str, &str),
    center: (f64, f64),
    count: usize,
) -> Vec<Poi> {
    (0..count)
        .map(|_| {
            let lat = center.0 + rng.gen_range(-0.004..0.004);
            let lng = center.1 + rng.gen_range(-0.006..0.006);
            Poi::new(name, lat, lng).with_tag(key, value)
        })
        .collect()
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| concat!(env!("CARGO_MANIFEST_DIR"), "/demos/innopolis.yaml").to_string());
    let config = ClusteringConfig::from_yaml_file(&path)?;
    println!(
        "City: {} ({:.4}, {:.4}), half diagonal {}°\n",
        config.general.city.as_deref().unwrap_or("unknown"),
        config.general.latitude,
        config.general.longitude,
        config.general.half_diagonal
    );

    let mut rng = StdRng::seed_from_u64(2024);
    let mut pois = Vec::new();
    for center in [(55.735, 48.725), (55.750, 48.745), (55.765, 48.760)] {
        pois.extend(scatter(&mut rng, "Cafe", ("amenity", "cafe"), center, 15));
    }
    for center in [(55.742, 48.770), (55.760, 48.715)] {
        pois.extend(scatter(&mut rng, "Park", ("leisure", "park"), center, 20));
    }
    for center in [(55.748, 48.738), (55.756, 48.752)] {
        pois.extend(scatter(&mut rng, "Office", ("office", "company"), center, 12));
    }
    // Outside the window; never clustered
    pois.extend(scatter(&mut rng, "Cafe", ("amenity", "cafe"), (55.90, 49.10), 10));

    let report = Pipeline::new(RuleTable::standard(), config).run(&pois);

    println!(
        "Window: {:.1} km x {:.1} km ({:.1} km²)\n",
        report.area_metrics.width_km, report.area_metrics.height_km, report.area_metrics.area_km2
    );

    for (category, outcome) in &report.outcomes {
        match outcome {
            CategoryOutcome::Skipped { reason } => println!("{}: skipped, {}", category, reason),
            CategoryOutcome::Clustered { points, metrics, boundaries, .. } => {
                println!("{}: {} points, {} boundaries", category, points.len(), boundaries.len());
                if let Some(m) = metrics {
                    println!(
                        "   silhouette {:.3}, Calinski-Harabasz {:.1}, Davies-Bouldin {:.3}",
                        m.silhouette, m.calinski_harabasz, m.davies_bouldin
                    );
                }
            }
        }
    }

    println!("\nBoundaries:");
    for boundary in report.boundaries() {
        println!(
            "  {} #{}: {} points -> {} ring coordinates, {:.3} km²",
            boundary.category,
            boundary.cluster_id,
            boundary.point_count,
            boundary.coordinates.len(),
            boundary.area_km2
        );
    }

    if let Some(first) = report.boundaries().next() {
        println!("\nFirst boundary as GeoJSON:\n{}", first.to_geojson());
    }

    Ok(())
}
