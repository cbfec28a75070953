//! # Category Rule Table
//!
//! Declarative mapping from OSM-style `key=value` tags to urban-function
//! [`Category`] values.
//!
//! A [`RuleTable`] is built once (either [`RuleTable::standard`] or loaded
//! from YAML) and is read-only afterwards; the classifier borrows it.
//!
//! ## Resolution
//!
//! For one `(key, value)` pair:
//! 1. If an exact rule exists for `value`, its overrides are checked in
//!    order and the first satisfied one wins; otherwise the exact rule's own
//!    categories apply.
//! 2. Otherwise the key's wildcard (`*`) categories apply, if any.
//! 3. Otherwise the pair does not classify.
//!
//! Overrides inspect other tags of the same POI. Numeric attributes use a
//! parse-or-zero policy: missing or malformed values read as `0.0`.
//!
//! ## YAML Format
//!
//! ```yaml
//! keys:
//!   - key: leisure
//!     values:
//!       park: [Nature, Tourist]
//!       outdoor_seating: Cafe street
//!   - key: natural
//!     wildcard: Nature
//!   - key: building
//!     values:
//!       office:
//!         categories: [Business center]
//!         overrides:
//!           - when: { gt: { attr: height, value: 20 } }
//!             categories: [Business center]
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use log::debug;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ConfigError;

// ============================================================================
// Category
// ============================================================================

/// Urban-function category a POI can be classified into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    Nature,
    Tourist,
    Ethnic,
    CafeStreet,
    Nightlife,
    University,
    BusinessCenter,
    Downtown,
    EliteResidential,
    UpperResidential,
    MiddleResidential,
    LowerResidential,
    CottageSettlement,
}

impl Category {
    /// Every category, in processing order.
    pub const ALL: [Category; 13] = [
        Category::Nature,
        Category::Tourist,
        Category::Ethnic,
        Category::CafeStreet,
        Category::Nightlife,
        Category::University,
        Category::BusinessCenter,
        Category::Downtown,
        Category::EliteResidential,
        Category::UpperResidential,
        Category::MiddleResidential,
        Category::LowerResidential,
        Category::CottageSettlement,
    ];

    /// Display name used in configuration files and output records.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Nature => "Nature",
            Category::Tourist => "Tourist",
            Category::Ethnic => "Ethnic",
            Category::CafeStreet => "Cafe street",
            Category::Nightlife => "Nightlife",
            Category::University => "University",
            Category::BusinessCenter => "Business center",
            Category::Downtown => "Downtown",
            Category::EliteResidential => "Elite residential",
            Category::UpperResidential => "Upper residential",
            Category::MiddleResidential => "Middle residential",
            Category::LowerResidential => "Lower residential",
            Category::CottageSettlement => "Cottage settlement",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = ConfigError;

    /// Case-insensitive. The short real-estate names ("Elite r.e.") used by
    /// older datasets are accepted as aliases.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        if let Some(category) = Category::ALL
            .iter()
            .find(|c| c.as_str().to_lowercase() == wanted)
        {
            return Ok(*category);
        }

        match wanted.as_str() {
            "elite r.e." => Ok(Category::EliteResidential),
            "upper r.e." | "upper" => Ok(Category::UpperResidential),
            "middle r.e." | "middle" => Ok(Category::MiddleResidential),
            "lower r.e." | "lower" => Ok(Category::LowerResidential),
            _ => Err(ConfigError::UnknownCategory(s.to_string())),
        }
    }
}

impl Serialize for Category {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Category {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Predicates
// ============================================================================

/// Condition over the raw tags of a POI.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    /// Satisfied when any inner predicate is.
    Any(Vec<Predicate>),
    /// Satisfied when every inner predicate is.
    All(Vec<Predicate>),
    /// numeric(attr) > value
    Gt { attr: String, value: f64 },
    /// numeric(attr) >= value
    Ge { attr: String, value: f64 },
    /// numeric(attr) < value
    Lt { attr: String, value: f64 },
    /// min <= numeric(attr) < max
    Range { attr: String, min: f64, max: f64 },
    /// lowercase(attr) is one of `values`
    OneOf { attr: String, values: Vec<String> },
    /// lowercase(attr) == value, missing attributes read as `default`
    Eq {
        attr: String,
        value: String,
        #[serde(default)]
        default: String,
    },
}

impl Predicate {
    fn gt(attr: &str, value: f64) -> Self {
        Predicate::Gt { attr: attr.to_string(), value }
    }

    fn ge(attr: &str, value: f64) -> Self {
        Predicate::Ge { attr: attr.to_string(), value }
    }

    fn lt(attr: &str, value: f64) -> Self {
        Predicate::Lt { attr: attr.to_string(), value }
    }

    fn range(attr: &str, min: f64, max: f64) -> Self {
        Predicate::Range { attr: attr.to_string(), min, max }
    }

    fn one_of(attr: &str, values: &[&str]) -> Self {
        Predicate::OneOf {
            attr: attr.to_string(),
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    fn equals(attr: &str, value: &str, default: &str) -> Self {
        Predicate::Eq {
            attr: attr.to_string(),
            value: value.to_string(),
            default: default.to_string(),
        }
    }

    /// Evaluate against a tag map.
    pub fn matches(&self, tags: &BTreeMap<String, String>) -> bool {
        match self {
            Predicate::Any(inner) => inner.iter().any(|p| p.matches(tags)),
            Predicate::All(inner) => inner.iter().all(|p| p.matches(tags)),
            Predicate::Gt { attr, value } => numeric_attr(tags, attr) > *value,
            Predicate::Ge { attr, value } => numeric_attr(tags, attr) >= *value,
            Predicate::Lt { attr, value } => numeric_attr(tags, attr) < *value,
            Predicate::Range { attr, min, max } => {
                let v = numeric_attr(tags, attr);
                *min <= v && v < *max
            }
            Predicate::OneOf { attr, values } => {
                let v = text_attr(tags, attr, "");
                values.iter().any(|candidate| candidate.to_lowercase() == v)
            }
            Predicate::Eq { attr, value, default } => {
                text_attr(tags, attr, default) == value.to_lowercase()
            }
        }
    }
}

/// Read a numeric attribute, treating missing or malformed values as 0.
pub fn numeric_attr(tags: &BTreeMap<String, String>, attr: &str) -> f64 {
    let Some(raw) = tags.get(attr) else {
        return 0.0;
    };
    match raw.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => v,
        _ => {
            debug!("Attribute {}='{}' is not numeric, using 0", attr, raw);
            0.0
        }
    }
}

fn text_attr(tags: &BTreeMap<String, String>, attr: &str, default: &str) -> String {
    tags.get(attr)
        .map(|v| v.trim().to_lowercase())
        .unwrap_or_else(|| default.to_lowercase())
}

// ============================================================================
// Rules
// ============================================================================

/// Attribute-conditioned replacement for an exact rule's categories.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Override {
    pub when: Predicate,
    #[serde(deserialize_with = "one_or_many")]
    pub categories: Vec<Category>,
}

/// Rule for one exact tag value.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueRule {
    pub categories: Vec<Category>,
    pub overrides: Vec<Override>,
}

impl ValueRule {
    fn resolve(&self, tags: &BTreeMap<String, String>) -> &[Category] {
        self.overrides
            .iter()
            .find(|o| o.when.matches(tags))
            .map(|o| o.categories.as_slice())
            .unwrap_or(self.categories.as_slice())
    }
}

impl<'de> Deserialize<'de> for ValueRule {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            One(Category),
            Many(Vec<Category>),
            Full {
                #[serde(deserialize_with = "one_or_many")]
                categories: Vec<Category>,
                #[serde(default)]
                overrides: Vec<Override>,
            },
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::One(c) => ValueRule { categories: vec![c], overrides: vec![] },
            Raw::Many(categories) => ValueRule { categories, overrides: vec![] },
            Raw::Full { categories, overrides } => ValueRule { categories, overrides },
        })
    }
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Category>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        One(Category),
        Many(Vec<Category>),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::One(c) => vec![c],
        Raw::Many(v) => v,
    })
}

fn optional_one_or_many<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Vec<Category>>, D::Error> {
    one_or_many(deserializer).map(Some)
}

/// All rules for one tag key.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct KeyRules {
    pub key: String,
    #[serde(default)]
    pub values: BTreeMap<String, ValueRule>,
    #[serde(default, deserialize_with = "optional_one_or_many")]
    pub wildcard: Option<Vec<Category>>,
}

impl KeyRules {
    fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            values: BTreeMap::new(),
            wildcard: None,
        }
    }

    fn map(mut self, values: &[&str], category: Category) -> Self {
        self.insert(values, &[category]);
        self
    }

    fn map_many(mut self, values: &[&str], categories: &[Category]) -> Self {
        self.insert(values, categories);
        self
    }

    fn insert(&mut self, values: &[&str], categories: &[Category]) {
        for value in values {
            self.values.insert(
                value.to_string(),
                ValueRule { categories: categories.to_vec(), overrides: vec![] },
            );
        }
    }

    fn wildcard(mut self, category: Category) -> Self {
        self.wildcard = Some(vec![category]);
        self
    }

    fn with_override(mut self, value: &str, when: Predicate, category: Category) -> Self {
        if let Some(rule) = self.values.get_mut(value) {
            rule.overrides.push(Override { when, categories: vec![category] });
        }
        self
    }

    /// Resolve one value of this key.
    pub fn resolve(&self, value: &str, tags: &BTreeMap<String, String>) -> Option<&[Category]> {
        if let Some(rule) = self.values.get(value) {
            return Some(rule.resolve(tags));
        }
        self.wildcard.as_deref()
    }
}

/// Immutable tag → category mapping.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RuleTable {
    keys: Vec<KeyRules>,
}

impl RuleTable {
    /// Build a table from per-key rules, validating that no rule is empty.
    pub fn new(keys: Vec<KeyRules>) -> Result<Self, ConfigError> {
        let table = Self { keys };
        table.validate()?;
        Ok(table)
    }

    /// Parse a table from YAML.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let table: RuleTable = serde_yaml::from_str(yaml)?;
        table.validate()?;
        Ok(table)
    }

    /// Read and parse a YAML table from disk.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&contents)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for rules in &self.keys {
            for (value, rule) in &rules.values {
                let empty_override = rule.overrides.iter().any(|o| o.categories.is_empty());
                if rule.categories.is_empty() || empty_override {
                    return Err(ConfigError::EmptyRule {
                        key: rules.key.clone(),
                        value: value.clone(),
                    });
                }
            }
            if matches!(&rules.wildcard, Some(w) if w.is_empty()) {
                return Err(ConfigError::EmptyRule {
                    key: rules.key.clone(),
                    value: "*".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Recognized keys, in evaluation order.
    pub fn keys(&self) -> impl Iterator<Item = &KeyRules> {
        self.keys.iter()
    }

    /// Resolve a single `(key, value)` pair in the context of the POI's tags.
    pub fn resolve(
        &self,
        key: &str,
        value: &str,
        tags: &BTreeMap<String, String>,
    ) -> Option<&[Category]> {
        self.keys
            .iter()
            .find(|k| k.key == key)
            .and_then(|k| k.resolve(value, tags))
    }

    /// The built-in OpenStreetMap mapping.
    pub fn standard() -> Self {
        use Category::*;

        const GLASS: &[&str] = &["glass", "mirrored-glass"];

        let building = KeyRules::new("building")
            .map(&["dormitory", "college", "school", "university"], University)
            .map(&["religious", "cathedral", "church", "monastery"], Ethnic)
            .map(&["museum", "public", "stadium", "grandstand", "ship", "tower"], Tourist)
            .map(&["office"], BusinessCenter)
            .map(&["hotel"], EliteResidential)
            .map(&["apartments", "commercial", "government"], UpperResidential)
            .map(
                &["residential", "retail", "supermarket", "civic", "parking", "garages"],
                MiddleResidential,
            )
            .map(&["static_caravan", "warehouse", "ruins"], LowerResidential)
            .map(
                &[
                    "bungalow", "cabin", "detached", "annexe", "farm", "ger", "house",
                    "semidetached_house", "terrace",
                ],
                CottageSettlement,
            )
            .with_override(
                "office",
                Predicate::Any(vec![
                    Predicate::one_of("building:material", GLASS),
                    Predicate::gt("height", 20.0),
                ]),
                BusinessCenter,
            )
            .with_override(
                "hotel",
                Predicate::Any(vec![
                    Predicate::gt("levels", 20.0),
                    Predicate::gt("height", 60.0),
                    Predicate::one_of("building:material", GLASS),
                ]),
                EliteResidential,
            )
            // Residential tiers: levels are checked before height and the
            // first satisfied tier wins.
            .with_override(
                "residential",
                Predicate::Any(vec![Predicate::ge("levels", 10.0), Predicate::ge("height", 30.0)]),
                UpperResidential,
            )
            .with_override(
                "residential",
                Predicate::Any(vec![
                    Predicate::range("levels", 5.0, 10.0),
                    Predicate::range("height", 15.0, 30.0),
                ]),
                MiddleResidential,
            )
            .with_override(
                "residential",
                Predicate::Any(vec![Predicate::lt("levels", 5.0), Predicate::lt("height", 15.0)]),
                LowerResidential,
            )
            .with_override(
                "house",
                Predicate::All(vec![
                    Predicate::equals("detached", "yes", "no"),
                    Predicate::one_of("landuse", &["residential", "village", "farmyard"]),
                ]),
                CottageSettlement,
            );

        let keys = vec![
            KeyRules::new("amenity")
                .map(&["bbq", "bench"], Nature)
                .map(&["theatre", "place_of_worship"], Ethnic)
                .map(
                    &["cinema", "fountain", "stage", "theater", "marketplace", "public_bath"],
                    Tourist,
                )
                .map(&["cafe", "fast_food", "restaurant"], CafeStreet)
                .map(
                    &["bar", "biergarten", "brothel", "casino", "gambling", "nightclub", "stripclub"],
                    Nightlife,
                )
                .map(&["lounge"], EliteResidential)
                .map(&["prison", "grave_yard"], LowerResidential),
            building,
            KeyRules::new("club").wildcard(Tourist),
            KeyRules::new("education").wildcard(University),
            KeyRules::new("highway")
                .map(&["living_street"], MiddleResidential)
                .map(&["tertiary", "residential"], CottageSettlement),
            KeyRules::new("landcover").wildcard(Nature),
            KeyRules::new("historic").wildcard(Tourist),
            KeyRules::new("landuse").wildcard(Nature),
            KeyRules::new("leisure")
                .map_many(
                    &[
                        "water_park", "stadium", "park", "picnic_table", "firepit",
                        "beach_resort", "swimming_area",
                    ],
                    &[Nature, Tourist],
                )
                .map(&["outdoor_seating"], CafeStreet),
            KeyRules::new("man_made")
                .map(&["advertising", "obelisk"], Tourist)
                .wildcard(LowerResidential),
            KeyRules::new("natural").wildcard(Nature),
            KeyRules::new("office").wildcard(BusinessCenter),
            KeyRules::new("shop")
                .map(&["jewelry", "leather", "shoes", "watches", "perfumery"], Downtown)
                .map(&["butcher", "chocolate", "coffee", "seafood", "alcohol"], CafeStreet)
                // boutique is listed as both Downtown and Elite; the later entry wins
                .map(&["boutique"], EliteResidential)
                .map(&["beauty", "hairdresser", "massage"], UpperResidential)
                .map(
                    &[
                        "bakery", "convenience", "dairy", "supermarket", "wholesale", "mall",
                        "chemist", "doityourself",
                    ],
                    MiddleResidential,
                )
                .map(&["second_hand", "variety_store", "trade"], LowerResidential),
            KeyRules::new("tourism")
                .map(&["hotel"], UpperResidential)
                .map(&["hostel", "motel"], MiddleResidential)
                .wildcard(Tourist),
            KeyRules::new("waterway").wildcard(Nature),
        ];

        Self { keys }
    }
}

impl Default for RuleTable {
    fn default() -> Self {
        Self::standard()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_category_names_round_trip() {
        for category in Category::ALL {
            assert_eq!(category.as_str().parse::<Category>().unwrap(), category);
        }
        assert_eq!("elite r.e.".parse::<Category>().unwrap(), Category::EliteResidential);
        assert!("Spaceport".parse::<Category>().is_err());
    }

    #[test]
    fn test_exact_beats_wildcard() {
        let table = RuleTable::standard();
        let empty = BTreeMap::new();
        assert_eq!(
            table.resolve("tourism", "hotel", &empty),
            Some(&[Category::UpperResidential][..])
        );
        assert_eq!(
            table.resolve("tourism", "viewpoint", &empty),
            Some(&[Category::Tourist][..])
        );
    }

    #[test]
    fn test_no_wildcard_no_match() {
        let table = RuleTable::standard();
        assert_eq!(table.resolve("amenity", "parking", &BTreeMap::new()), None);
        assert_eq!(table.resolve("cuisine", "pizza", &BTreeMap::new()), None);
    }

    #[test]
    fn test_numeric_attr_parse_or_zero() {
        let t = tags(&[("height", "25.5"), ("levels", "five"), ("min_height", " 3 ")]);
        assert_eq!(numeric_attr(&t, "height"), 25.5);
        assert_eq!(numeric_attr(&t, "levels"), 0.0);
        assert_eq!(numeric_attr(&t, "min_height"), 3.0);
        assert_eq!(numeric_attr(&t, "missing"), 0.0);
        assert_eq!(numeric_attr(&tags(&[("height", "NaN")]), "height"), 0.0);
    }

    #[test]
    fn test_residential_tiers_levels_first() {
        let table = RuleTable::standard();
        let tier = |pairs: &[(&str, &str)]| {
            table.resolve("building", "residential", &tags(pairs)).unwrap()[0]
        };
        assert_eq!(tier(&[("levels", "12")]), Category::UpperResidential);
        assert_eq!(tier(&[("levels", "7")]), Category::MiddleResidential);
        assert_eq!(tier(&[("levels", "2")]), Category::LowerResidential);
        assert_eq!(tier(&[("height", "35")]), Category::UpperResidential);
        // few levels but mid-rise height: the middle tier matches on height
        assert_eq!(tier(&[("levels", "3"), ("height", "20")]), Category::MiddleResidential);
        assert_eq!(tier(&[]), Category::LowerResidential);
    }

    #[test]
    fn test_cottage_override_requires_all() {
        let table = RuleTable::standard();
        let t = tags(&[("detached", "yes"), ("landuse", "Village")]);
        assert_eq!(
            table.resolve("building", "house", &t),
            Some(&[Category::CottageSettlement][..])
        );
        let pred = Predicate::All(vec![
            Predicate::equals("detached", "yes", "no"),
            Predicate::one_of("landuse", &["village"]),
        ]);
        assert!(pred.matches(&t));
        assert!(!pred.matches(&tags(&[("landuse", "village")])));
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
keys:
  - key: leisure
    values:
      park: [Nature, Tourist]
      outdoor_seating: Cafe street
  - key: natural
    wildcard: Nature
  - key: building
    values:
      office:
        categories: Downtown
        overrides:
          - when: { gt: { attr: height, value: 20 } }
            categories: [Business center]
"#;
        let table = RuleTable::from_yaml_str(yaml).unwrap();
        assert_eq!(table.keys().count(), 3);
        assert_eq!(
            table.resolve("leisure", "park", &BTreeMap::new()),
            Some(&[Category::Nature, Category::Tourist][..])
        );
        assert_eq!(
            table.resolve("natural", "wood", &BTreeMap::new()),
            Some(&[Category::Nature][..])
        );
        assert_eq!(
            table.resolve("building", "office", &tags(&[("height", "40")])),
            Some(&[Category::BusinessCenter][..])
        );
        assert_eq!(
            table.resolve("building", "office", &BTreeMap::new()),
            Some(&[Category::Downtown][..])
        );
    }

    #[test]
    fn test_from_yaml_rejects_bad_tables() {
        assert!(RuleTable::from_yaml_str("keys: [{ key: shop, values: { bakery: Bakery } }]").is_err());
        assert!(matches!(
            RuleTable::from_yaml_str("keys: [{ key: shop, values: { bakery: [] } }]"),
            Err(ConfigError::EmptyRule { .. })
        ));
        assert!(RuleTable::from_yaml_str("not a table").is_err());
    }
}
