//! Clustering configuration.
//!
//! The configuration names the query window and, per category, which
//! clustering method to run with which parameters:
//!
//! ```yaml
//! general_parameters:
//!   city: Innopolis
//!   latitude: 55.75
//!   longitude: 48.74
//!   half_diagonal_coor: 0.05
//! clustering_techniques:
//!   Nature:
//!     method: kmeans
//!     params: { n_clusters: 4, random_state: 42 }
//!   Tourist:
//!     method: hdbscan
//!     params: { min_cluster_size: 5 }
//! pipeline:
//!   min_points: 10
//!   concavity: 0.5
//! ```
//!
//! Loading fails only when the document itself is malformed. Category names
//! that match no known category are logged and ignored; method names and
//! parameters are validated later, per category, so a bad entry only skips
//! that category.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::area::AreaOfInterest;
use crate::error::ConfigError;
use crate::rules::Category;

/// Query window parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralParameters {
    #[serde(default)]
    pub city: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(rename = "half_diagonal_coor", alias = "half_diagonal")]
    pub half_diagonal: f64,
}

/// Per-run options that are not tied to a single algorithm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    /// Minimum number of points inside the window for a category to be clustered.
    /// Default: 10
    pub min_points: usize,

    /// Concavity passed to the hull extractor. Smaller is more concave.
    /// Default: 0.5
    pub concavity: f64,

    /// Whether points labelled as noise get a boundary of their own.
    /// Default: false
    pub include_noise: bool,

    /// Drop POIs without a real name before grouping.
    /// Default: false
    pub skip_unnamed: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            min_points: 10,
            concavity: 0.5,
            include_noise: false,
            skip_unnamed: false,
        }
    }
}

/// Method identifier plus its untyped parameter map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechniqueSpec {
    pub method: String,
    #[serde(default)]
    pub params: Params,
}

impl TechniqueSpec {
    pub fn new(method: &str, params: Params) -> Self {
        Self { method: method.to_string(), params }
    }
}

/// Untyped parameter map, forwarded verbatim to the selected algorithm.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params(BTreeMap<String, Value>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.0.insert(name.to_string(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Start reading parameters for `method`; see [`ParamReader`].
    pub fn reader<'a>(&'a self, method: &'a str) -> ParamReader<'a> {
        ParamReader {
            method,
            params: self,
            seen: BTreeSet::new(),
        }
    }
}

/// Typed access to a [`Params`] map that remembers which names were read.
///
/// [`ParamReader::finish`] rejects any parameter that was never read, so an
/// option the algorithm does not understand fails closed instead of being
/// silently ignored. `null` values read as the default.
pub struct ParamReader<'a> {
    method: &'a str,
    params: &'a Params,
    seen: BTreeSet<&'static str>,
}

impl ParamReader<'_> {
    fn value(&mut self, name: &'static str) -> Option<&Value> {
        self.seen.insert(name);
        self.params.get(name).filter(|v| !v.is_null())
    }

    pub fn f64(&mut self, name: &'static str, default: f64) -> Result<f64, ConfigError> {
        Ok(self.opt_f64(name)?.unwrap_or(default))
    }

    pub fn opt_f64(&mut self, name: &'static str) -> Result<Option<f64>, ConfigError> {
        match self.value(name) {
            None => Ok(None),
            Some(v) => v
                .as_f64()
                .map(Some)
                .ok_or_else(|| ConfigError::invalid(name, format!("expected a number, got {}", v))),
        }
    }

    pub fn usize(&mut self, name: &'static str, default: usize) -> Result<usize, ConfigError> {
        Ok(self.opt_usize(name)?.unwrap_or(default))
    }

    pub fn opt_usize(&mut self, name: &'static str) -> Result<Option<usize>, ConfigError> {
        match self.value(name) {
            None => Ok(None),
            Some(v) => {
                let as_int = v.as_u64().or_else(|| {
                    v.as_f64()
                        .filter(|f| *f >= 0.0 && f.fract() == 0.0)
                        .map(|f| f as u64)
                });
                as_int.map(|n| Some(n as usize)).ok_or_else(|| {
                    ConfigError::invalid(name, format!("expected a non-negative integer, got {}", v))
                })
            }
        }
    }

    pub fn u64(&mut self, name: &'static str, default: u64) -> Result<u64, ConfigError> {
        Ok(self.opt_usize(name)?.map(|n| n as u64).unwrap_or(default))
    }

    pub fn bool(&mut self, name: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.value(name) {
            None => Ok(default),
            Some(v) => v
                .as_bool()
                .ok_or_else(|| ConfigError::invalid(name, format!("expected a boolean, got {}", v))),
        }
    }

    pub fn string(&mut self, name: &'static str, default: &str) -> Result<String, ConfigError> {
        match self.value(name) {
            None => Ok(default.to_string()),
            Some(v) => v
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| ConfigError::invalid(name, format!("expected a string, got {}", v))),
        }
    }

    /// Fail on any parameter that was not read.
    pub fn finish(self) -> Result<(), ConfigError> {
        match self.params.0.keys().find(|k| !self.seen.contains(k.as_str())) {
            Some(unknown) => Err(ConfigError::UnknownParameter {
                method: self.method.to_string(),
                param: unknown.clone(),
            }),
            None => Ok(()),
        }
    }
}

/// Full clustering configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusteringConfig {
    pub general: GeneralParameters,
    pub techniques: BTreeMap<Category, TechniqueSpec>,
    pub options: PipelineOptions,
}

#[derive(Deserialize)]
struct RawConfig {
    general_parameters: GeneralParameters,
    #[serde(default)]
    clustering_techniques: BTreeMap<String, TechniqueSpec>,
    #[serde(default)]
    pipeline: PipelineOptions,
}

impl ClusteringConfig {
    /// Configuration with a window and no techniques.
    pub fn new(area: AreaOfInterest) -> Self {
        Self {
            general: GeneralParameters {
                city: None,
                latitude: area.center.latitude,
                longitude: area.center.longitude,
                half_diagonal: area.half_diagonal,
            },
            techniques: BTreeMap::new(),
            options: PipelineOptions::default(),
        }
    }

    /// Builder-style technique registration.
    pub fn with_technique(mut self, category: Category, spec: TechniqueSpec) -> Self {
        self.techniques.insert(category, spec);
        self
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_yaml::from_str(yaml)?;

        let mut techniques = BTreeMap::new();
        for (name, spec) in raw.clustering_techniques {
            match name.parse::<Category>() {
                Ok(category) => {
                    techniques.insert(category, spec);
                }
                Err(e) => warn!("Ignoring clustering technique: {}", e),
            }
        }

        Ok(Self {
            general: raw.general_parameters,
            techniques,
            options: raw.pipeline,
        })
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&contents)
    }

    /// The query window.
    pub fn area(&self) -> AreaOfInterest {
        AreaOfInterest::new(
            self.general.latitude,
            self.general.longitude,
            self.general.half_diagonal,
        )
    }

    pub fn technique(&self, category: Category) -> Option<&TechniqueSpec> {
        self.techniques.get(&category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
general_parameters:
  city: Innopolis
  latitude: 55.75
  longitude: 48.74
  half_diagonal_coor: 0.05
clustering_techniques:
  Nature:
    method: kmeans
    params: { n_clusters: 4, random_state: 42 }
  Elite r.e.:
    method: affinity
  Spaceport:
    method: kmeans
pipeline:
  min_points: 15
"#;

    #[test]
    fn test_parse_config() {
        let config = ClusteringConfig::from_yaml_str(YAML).unwrap();
        assert_eq!(config.general.city.as_deref(), Some("Innopolis"));
        assert_eq!(config.general.half_diagonal, 0.05);
        assert_eq!(config.techniques.len(), 2);

        let nature = config.technique(Category::Nature).unwrap();
        assert_eq!(nature.method, "kmeans");
        assert_eq!(nature.params.get("n_clusters"), Some(&Value::from(4)));

        let elite = config.technique(Category::EliteResidential).unwrap();
        assert!(elite.params.is_empty());

        assert_eq!(config.options.min_points, 15);
        assert_eq!(config.options.concavity, 0.5);
        assert!(!config.options.include_noise);

        let area = config.area();
        assert_eq!(area.center.latitude, 55.75);
    }

    #[test]
    fn test_malformed_config_is_fatal() {
        assert!(ClusteringConfig::from_yaml_str("clustering_techniques: {}").is_err());
        assert!(matches!(
            ClusteringConfig::from_yaml_file("/nonexistent/clustering.yaml"),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_technique_without_method_is_a_yaml_error() {
        let yaml = "general_parameters: { latitude: 1.0, longitude: 2.0, half_diagonal: 0.1 }\n\
                    clustering_techniques:\n  Nature: { params: { n_clusters: 2 } }\n";
        assert!(matches!(
            ClusteringConfig::from_yaml_str(yaml),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn test_bundled_demo_config() {
        let config = ClusteringConfig::from_yaml_str(include_str!("../demos/innopolis.yaml")).unwrap();
        assert_eq!(config.techniques.len(), 3);
        assert_eq!(config.technique(Category::CafeStreet).unwrap().method, "kmeans");
        assert_eq!(config.technique(Category::BusinessCenter).unwrap().method, "gmm");
        for spec in config.techniques.values() {
            assert!(crate::Algorithm::from_spec(spec).is_ok());
        }
    }

    #[test]
    fn test_param_reader() {
        let params = Params::new()
            .with("n_clusters", 3)
            .with("tol", 0.5)
            .with("affinity", "rbf")
            .with("random_state", Value::Null)
            .with("whole_float", 4.0);
        let mut reader = params.reader("test");
        assert_eq!(reader.usize("n_clusters", 8).unwrap(), 3);
        assert_eq!(reader.f64("tol", 1e-4).unwrap(), 0.5);
        assert_eq!(reader.f64("gamma", 1.0).unwrap(), 1.0);
        assert_eq!(reader.string("affinity", "nearest_neighbors").unwrap(), "rbf");
        assert_eq!(reader.u64("random_state", 7).unwrap(), 7);
        assert_eq!(reader.usize("whole_float", 0).unwrap(), 4);
        assert!(reader.finish().is_ok());
    }

    #[test]
    fn test_param_reader_rejects_unknown_and_mistyped() {
        let params = Params::new().with("n_clusters", 3).with("colour", "red");
        let mut reader = params.reader("kmeans");
        reader.usize("n_clusters", 8).unwrap();
        assert!(matches!(
            reader.finish(),
            Err(ConfigError::UnknownParameter { ref param, .. }) if param == "colour"
        ));

        let params = Params::new().with("n_clusters", "three");
        let mut reader = params.reader("kmeans");
        assert!(matches!(
            reader.usize("n_clusters", 8),
            Err(ConfigError::InvalidParameter { .. })
        ));

        let params = Params::new().with("n_clusters", -2);
        assert!(params.reader("kmeans").usize("n_clusters", 8).is_err());
    }
}
