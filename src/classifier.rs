//! POI classification.
//!
//! Resolves each POI's raw tags through a borrowed [`RuleTable`] into a set
//! of [`Category`] values, then flattens the classified POIs into one point
//! set per category.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info};

use crate::rules::{Category, RuleTable};
use crate::{GpsPoint, Poi};

/// A POI together with the categories it resolved to.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedPoi<'a> {
    pub poi: &'a Poi,
    /// Possibly empty; categories are not mutually exclusive
    pub categories: BTreeSet<Category>,
    /// `key:value` of the last recognized tag, for provenance
    pub source_tag: Option<String>,
}

impl ClassifiedPoi<'_> {
    /// True when no rule matched any of the POI's tags.
    pub fn is_miss(&self) -> bool {
        self.categories.is_empty()
    }
}

/// Tag → category classifier over an immutable rule table.
#[derive(Debug, Clone, Copy)]
pub struct Classifier<'r> {
    rules: &'r RuleTable,
}

impl<'r> Classifier<'r> {
    pub fn new(rules: &'r RuleTable) -> Self {
        Self { rules }
    }

    /// Categories for a single POI.
    ///
    /// Every recognized key present on the POI contributes its resolved
    /// categories; the union is returned. Unrecognized keys are ignored.
    ///
    /// ```rust
    /// use urban_clusters::{Poi, RuleTable, Classifier, Category};
    ///
    /// let rules = RuleTable::standard();
    /// let classifier = Classifier::new(&rules);
    ///
    /// let park = Poi::new("Central Park", 55.75, 48.74).with_tag("leisure", "park");
    /// let categories = classifier.classify(&park);
    /// assert!(categories.contains(&Category::Nature));
    /// assert!(categories.contains(&Category::Tourist));
    /// ```
    pub fn classify(&self, poi: &Poi) -> BTreeSet<Category> {
        self.resolve(poi).0
    }

    /// Classify a POI, keeping a reference to it and the provenance tag.
    pub fn classify_poi<'p>(&self, poi: &'p Poi) -> ClassifiedPoi<'p> {
        let (categories, source_tag) = self.resolve(poi);
        ClassifiedPoi { poi, categories, source_tag }
    }

    /// Classify a batch of POIs, preserving input order.
    pub fn classify_all<'p>(&self, pois: &'p [Poi]) -> Vec<ClassifiedPoi<'p>> {
        let classified: Vec<ClassifiedPoi<'p>> =
            pois.iter().map(|poi| self.classify_poi(poi)).collect();

        let misses = classified.iter().filter(|c| c.is_miss()).count();
        info!(
            "Classified {} POIs ({} matched no rule)",
            classified.len(),
            misses
        );

        classified
    }

    fn resolve(&self, poi: &Poi) -> (BTreeSet<Category>, Option<String>) {
        let mut categories = BTreeSet::new();
        let mut source_tag = None;

        for rules in self.rules.keys() {
            let Some(value) = poi.tags.get(&rules.key) else {
                continue;
            };
            if let Some(mapped) = rules.resolve(value, &poi.tags) {
                categories.extend(mapped.iter().copied());
            }
            source_tag = Some(format!("{}:{}", rules.key, value));
        }

        if categories.is_empty() {
            debug!("No category for POI '{}'", poi.name);
        }

        (categories, source_tag)
    }
}

/// Flatten classified POIs into one point set per category.
///
/// A POI with several categories contributes its point to each of them.
/// POIs with invalid coordinates are dropped, as are unnamed POIs when
/// `skip_unnamed` is set. Points keep input order within a category.
pub fn group_by_category(
    classified: &[ClassifiedPoi<'_>],
    skip_unnamed: bool,
) -> BTreeMap<Category, Vec<GpsPoint>> {
    let mut groups: BTreeMap<Category, Vec<GpsPoint>> = BTreeMap::new();

    for item in classified {
        if skip_unnamed && !item.poi.is_named() {
            continue;
        }
        let point = item.poi.point();
        if !point.is_valid() {
            debug!("Dropping POI '{}' with invalid coordinates", item.poi.name);
            continue;
        }
        for category in &item.categories {
            groups.entry(*category).or_default().push(point);
        }
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn poi(tags: &[(&str, &str)]) -> Poi {
        tags.iter()
            .fold(Poi::new("test", 55.75, 48.74), |p, (k, v)| p.with_tag(k, v))
    }

    fn classify(tags: &[(&str, &str)]) -> BTreeSet<Category> {
        let rules = RuleTable::standard();
        Classifier::new(&rules).classify(&poi(tags))
    }

    #[test]
    fn test_unrecognized_keys_classify_empty() {
        assert!(classify(&[("cuisine", "pizza"), ("opening_hours", "24/7")]).is_empty());
        assert!(classify(&[]).is_empty());
    }

    #[test]
    fn test_park_fans_out() {
        let categories = classify(&[("leisure", "park")]);
        assert_eq!(
            categories,
            BTreeSet::from([Category::Nature, Category::Tourist])
        );
    }

    #[test]
    fn test_glass_office_is_business_center() {
        for height in ["0", "5", "100", "not-a-number"] {
            let categories = classify(&[
                ("building", "office"),
                ("building:material", "glass"),
                ("height", height),
            ]);
            assert_eq!(categories, BTreeSet::from([Category::BusinessCenter]));
        }
    }

    #[test]
    fn test_residential_tiers() {
        let tier = |levels: &str| classify(&[("building", "residential"), ("levels", levels)]);
        assert_eq!(tier("12"), BTreeSet::from([Category::UpperResidential]));
        assert_eq!(tier("10"), BTreeSet::from([Category::UpperResidential]));
        assert_eq!(tier("7"), BTreeSet::from([Category::MiddleResidential]));
        assert_eq!(tier("5"), BTreeSet::from([Category::MiddleResidential]));
        assert_eq!(tier("2"), BTreeSet::from([Category::LowerResidential]));
        assert_eq!(tier("garbage"), BTreeSet::from([Category::LowerResidential]));
    }

    #[test]
    fn test_union_across_keys_is_deduplicated() {
        let categories = classify(&[
            ("natural", "wood"),
            ("landuse", "forest"),
            ("amenity", "cafe"),
        ]);
        assert_eq!(
            categories,
            BTreeSet::from([Category::Nature, Category::CafeStreet])
        );
    }

    #[test]
    fn test_source_tag_is_last_recognized_key() {
        let rules = RuleTable::standard();
        let p = poi(&[("amenity", "cafe"), ("shop", "coffee"), ("cuisine", "coffee_shop")]);
        let classified = Classifier::new(&rules).classify_poi(&p);
        assert_eq!(classified.source_tag.as_deref(), Some("shop:coffee"));
        assert!(!classified.is_miss());
    }

    #[test]
    fn test_group_by_category() {
        let rules = RuleTable::standard();
        let classifier = Classifier::new(&rules);
        let pois = vec![
            Poi::new("Park", 55.0, 48.0).with_tag("leisure", "park"),
            Poi::new("Unnamed", 55.1, 48.1).with_tag("natural", "tree"),
            Poi::new("Bad", 95.0, 48.1).with_tag("natural", "tree"),
            Poi::new("Nothing", 55.2, 48.2).with_tag("cuisine", "pizza"),
        ];
        let classified = classifier.classify_all(&pois);

        let groups = group_by_category(&classified, false);
        assert_eq!(groups[&Category::Nature].len(), 2);
        assert_eq!(groups[&Category::Tourist].len(), 1);
        assert_eq!(groups.len(), 2);

        let named_only = group_by_category(&classified, true);
        assert_eq!(named_only[&Category::Nature], vec![GpsPoint::new(55.0, 48.0)]);
    }
}
