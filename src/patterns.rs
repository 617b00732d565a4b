// Pattern records, the raw -> finalized transition and analyzer results
use crate::corpus::{PreprocessedCorpus, SiteId};
use crate::normalize::truncate_value;
use crate::options::AnalysisOptions;
use crate::semantic_classifier::PatternCategory;
use crate::stats::ratio;
use chrono::{DateTime, Utc};
use fxhash::{FxHashMap, FxHashSet};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};

const MAX_EXAMPLE_LENGTH: usize = 100;

/// Every analyzer that reads the corpus directly.
pub trait CorpusAnalyzer {
    type Specific;

    fn name(&self) -> &'static str;

    fn analyze(
        &self,
        corpus: &PreprocessedCorpus,
        options: &AnalysisOptions,
    ) -> AnalysisResult<Self::Specific>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    Primary,
    Secondary,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PageDistribution {
    pub primary: f64,
    pub secondary: f64,
}

impl Default for PageDistribution {
    fn default() -> Self {
        Self {
            primary: 1.0,
            secondary: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<PatternCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discriminative_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_distribution: Option<PageDistribution>,
    /// Share of the pattern's sites belonging to each platform.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_specificity: Option<BTreeMap<String, f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueFrequency {
    pub value: String,
    pub site_count: usize,
    pub frequency: f64,
}

/// A pattern counted once per site. `site_count` is derived from the site
/// set when the record is built and never set independently.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternRecord {
    pattern: String,
    site_count: usize,
    #[serde(skip)]
    sites: BTreeSet<SiteId>,
    frequency: f64,
    examples: Vec<String>,
    value_frequencies: Vec<ValueFrequency>,
    values_truncated: bool,
    metadata: PatternMetadata,
}

impl PatternRecord {
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn site_count(&self) -> usize {
        self.site_count
    }

    pub fn sites(&self) -> &BTreeSet<SiteId> {
        &self.sites
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    pub fn examples(&self) -> &[String] {
        &self.examples
    }

    pub fn value_frequencies(&self) -> &[ValueFrequency] {
        &self.value_frequencies
    }

    pub fn values_truncated(&self) -> bool {
        self.values_truncated
    }

    pub fn metadata(&self) -> &PatternMetadata {
        &self.metadata
    }

    pub fn has_site(&self, site: SiteId) -> bool {
        self.sites.contains(&site)
    }

    fn renamed(&self, key: String) -> Self {
        Self {
            pattern: key,
            ..self.clone()
        }
    }
}

/// Per-site dedup ledger. The only way to register a site against a pattern
/// is through `PatternAccumulator::record`, which demands one of these.
pub struct SiteVisit {
    site: SiteId,
    seen: FxHashSet<String>,
}

impl SiteVisit {
    pub fn new(site: SiteId) -> Self {
        Self {
            site,
            seen: FxHashSet::default(),
        }
    }

    pub fn site(&self) -> SiteId {
        self.site
    }

    pub fn registered(&self) -> usize {
        self.seen.len()
    }
}

#[derive(Default)]
struct RawPattern {
    sites: BTreeSet<SiteId>,
    primary_sites: BTreeSet<SiteId>,
    examples: Vec<String>,
    values: FxHashMap<String, BTreeSet<SiteId>>,
    values_truncated: bool,
}

/// Raw counts collected in a single pass over the corpus. Consumed by
/// `finalize`, so a collection can be filtered exactly once.
pub struct PatternAccumulator {
    patterns: FxHashMap<String, RawPattern>,
    max_examples: usize,
    max_value_length: usize,
    max_tracked_values: usize,
    max_value_frequencies: usize,
}

impl PatternAccumulator {
    pub fn new(options: &AnalysisOptions) -> Self {
        Self {
            patterns: FxHashMap::default(),
            max_examples: options.example_limit(),
            max_value_length: options.thresholds.max_value_length,
            max_tracked_values: options.thresholds.max_tracked_values,
            max_value_frequencies: options.thresholds.max_value_frequencies,
        }
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Register one occurrence of `key` on the visited site.
    pub fn record(&mut self, visit: &mut SiteVisit, key: &str, value: Option<&str>, page: PageKind) {
        let raw = self.patterns.entry(key.to_string()).or_default();
        if visit.seen.insert(key.to_string()) {
            raw.sites.insert(visit.site);
        }
        if page == PageKind::Primary {
            raw.primary_sites.insert(visit.site);
        }

        let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
            return;
        };
        let value = truncate_value(value, self.max_value_length);

        if raw.examples.len() < self.max_examples {
            let example = truncate_value(&value, MAX_EXAMPLE_LENGTH);
            if !raw.examples.contains(&example) {
                raw.examples.push(example);
            }
        }

        if let Some(sites) = raw.values.get_mut(&value) {
            sites.insert(visit.site);
        } else if raw.values.len() < self.max_tracked_values {
            raw.values.entry(value).or_default().insert(visit.site);
        } else {
            raw.values_truncated = true;
        }
    }

    /// Compute frequencies, then drop patterns below `min_occurrences`.
    pub fn finalize(self, total_sites: usize, min_occurrences: usize) -> FinalizedPatterns {
        let total_found = self.patterns.len();
        let max_values = self.max_value_frequencies;

        let records: Vec<PatternRecord> = self
            .patterns
            .into_iter()
            .map(|(key, raw)| build_record(key, raw, total_sites, max_values))
            .filter(|record| record.site_count >= min_occurrences)
            .collect();

        FinalizedPatterns::from_records(records, total_found)
    }
}

fn build_record(key: String, raw: RawPattern, total_sites: usize, max_values: usize) -> PatternRecord {
    let site_count = raw.sites.len();

    let mut value_frequencies: Vec<ValueFrequency> = raw
        .values
        .into_iter()
        .map(|(value, sites)| ValueFrequency {
            site_count: sites.len(),
            frequency: ratio(sites.len(), site_count),
            value,
        })
        .collect();
    value_frequencies.sort_by(|a, b| {
        b.site_count
            .cmp(&a.site_count)
            .then_with(|| a.value.cmp(&b.value))
    });
    let values_truncated = raw.values_truncated || value_frequencies.len() > max_values;
    value_frequencies.truncate(max_values);

    let primary = ratio(raw.primary_sites.len(), site_count);
    let page_distribution = if site_count == 0 {
        PageDistribution::default()
    } else {
        PageDistribution {
            primary,
            secondary: 1.0 - primary,
        }
    };

    PatternRecord {
        pattern: key,
        site_count,
        frequency: ratio(site_count, total_sites).clamp(0.0, 1.0),
        sites: raw.sites,
        examples: raw.examples,
        value_frequencies,
        values_truncated,
        metadata: PatternMetadata {
            page_distribution: Some(page_distribution),
            ..Default::default()
        },
    }
}

/// Final, filtered pattern collection ordered by descending frequency with
/// ties broken on the key. Offers no filtering or insertion; derived views
/// keep membership intact.
#[derive(Debug, Clone, Default)]
pub struct FinalizedPatterns {
    records: Vec<PatternRecord>,
    index: FxHashMap<String, usize>,
    total_found: usize,
}

impl FinalizedPatterns {
    fn from_records(mut records: Vec<PatternRecord>, total_found: usize) -> Self {
        records.sort_by(|a, b| {
            b.frequency
                .total_cmp(&a.frequency)
                .then_with(|| a.pattern.cmp(&b.pattern))
        });
        let index = records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.pattern.clone(), i))
            .collect();
        Self {
            records,
            index,
            total_found,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Distinct keys seen before filtering.
    pub fn total_found(&self) -> usize {
        self.total_found
    }

    pub fn get(&self, key: &str) -> Option<&PatternRecord> {
        self.index.get(key).map(|&i| &self.records[i])
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PatternRecord> {
        self.records.iter()
    }

    pub fn as_slice(&self) -> &[PatternRecord] {
        &self.records
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|r| r.pattern.as_str())
    }

    /// Same patterns with replaced metadata.
    pub fn annotate<F>(&self, mut annotate: F) -> Self
    where
        F: FnMut(&PatternRecord) -> PatternMetadata,
    {
        let records = self
            .records
            .iter()
            .map(|record| PatternRecord {
                metadata: annotate(record),
                ..record.clone()
            })
            .collect();
        Self {
            records,
            index: self.index.clone(),
            total_found: self.total_found,
        }
    }

    /// Union of several collections under `prefix:key` names.
    pub fn merge_prefixed(parts: &[(&str, &FinalizedPatterns)]) -> Self {
        let mut records = Vec::new();
        let mut total_found = 0;
        for (prefix, patterns) in parts {
            total_found += patterns.total_found;
            records.extend(
                patterns
                    .records
                    .iter()
                    .map(|r| r.renamed(format!("{}:{}", prefix, r.pattern))),
            );
        }
        Self::from_records(records, total_found)
    }
}

impl Serialize for FinalizedPatterns {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.records.len()))?;
        for record in &self.records {
            map.serialize_entry(&record.pattern, record)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisMetadata {
    pub analyzer: String,
    pub timestamp: DateTime<Utc>,
    pub total_patterns_found: usize,
    pub total_patterns_after_filtering: usize,
    pub options: AnalysisOptions,
    /// Upstream inputs that were missing or unusable for this run.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub degraded: Vec<String>,
}

/// Output of one analyzer run. Read-only once constructed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult<T> {
    patterns: FinalizedPatterns,
    total_sites: usize,
    metadata: AnalysisMetadata,
    analyzer_specific: T,
}

impl<T> AnalysisResult<T> {
    pub fn new(
        analyzer: &str,
        patterns: FinalizedPatterns,
        total_sites: usize,
        options: &AnalysisOptions,
        analyzer_specific: T,
    ) -> Self {
        let metadata = AnalysisMetadata {
            analyzer: analyzer.to_string(),
            timestamp: Utc::now(),
            total_patterns_found: patterns.total_found(),
            total_patterns_after_filtering: patterns.len(),
            options: options.clone(),
            degraded: Vec::new(),
        };
        Self {
            patterns,
            total_sites,
            metadata,
            analyzer_specific,
        }
    }

    /// Result carrying no patterns, for empty or degenerate input.
    pub fn empty(analyzer: &str, total_sites: usize, options: &AnalysisOptions, specific: T) -> Self {
        Self::new(analyzer, FinalizedPatterns::default(), total_sites, options, specific)
    }

    pub fn with_degraded(mut self, notes: Vec<String>) -> Self {
        self.metadata.degraded = notes;
        self
    }

    pub fn patterns(&self) -> &FinalizedPatterns {
        &self.patterns
    }

    pub fn total_sites(&self) -> usize {
        self.total_sites
    }

    pub fn metadata(&self) -> &AnalysisMetadata {
        &self.metadata
    }

    pub fn specific(&self) -> &T {
        &self.analyzer_specific
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> AnalysisOptions {
        AnalysisOptions::default().with_min_occurrences(1)
    }

    #[test]
    fn test_site_registered_once_per_pattern() {
        let mut acc = PatternAccumulator::new(&options());
        let mut visit = SiteVisit::new(0);
        for value in ["a", "b", "c", "a"] {
            acc.record(&mut visit, "x-cache", Some(value), PageKind::Primary);
        }
        let patterns = acc.finalize(1, 1);
        let record = patterns.get("x-cache").unwrap();
        assert_eq!(record.site_count(), 1);
        assert_eq!(record.sites().len(), record.site_count());
        assert_eq!(record.value_frequencies().len(), 3);
        assert_eq!(visit.registered(), 1);
    }

    #[test]
    fn test_frequency_and_single_filter() {
        let mut acc = PatternAccumulator::new(&options());
        for site in 0..4 {
            let mut visit = SiteVisit::new(site);
            acc.record(&mut visit, "server", Some("nginx"), PageKind::Primary);
            if site < 2 {
                acc.record(&mut visit, "x-rare", None, PageKind::Primary);
            }
            if site == 0 {
                acc.record(&mut visit, "x-once", None, PageKind::Primary);
            }
        }
        let patterns = acc.finalize(4, 2);
        assert_eq!(patterns.total_found(), 3);
        assert_eq!(patterns.len(), 2);
        assert!(!patterns.contains("x-once"));
        assert_eq!(patterns.get("server").unwrap().frequency(), 1.0);
        assert_eq!(patterns.get("x-rare").unwrap().frequency(), 0.5);
        for record in patterns.iter() {
            assert!(record.site_count() >= 2);
            assert!((0.0..=1.0).contains(&record.frequency()));
        }
    }

    #[test]
    fn test_sorted_by_frequency_then_key() {
        let mut acc = PatternAccumulator::new(&options());
        for site in 0..3 {
            let mut visit = SiteVisit::new(site);
            acc.record(&mut visit, "b-header", None, PageKind::Primary);
            acc.record(&mut visit, "a-header", None, PageKind::Primary);
            if site == 0 {
                acc.record(&mut visit, "c-header", None, PageKind::Primary);
            }
        }
        let patterns = acc.finalize(3, 1);
        let keys: Vec<&str> = patterns.keys().collect();
        assert_eq!(keys, vec!["a-header", "b-header", "c-header"]);
    }

    #[test]
    fn test_examples_are_capped_and_truncated() {
        let opts = options().with_examples(true, 2);
        let mut acc = PatternAccumulator::new(&opts);
        let long = "v".repeat(500);
        let mut visit = SiteVisit::new(0);
        acc.record(&mut visit, "x-long", Some(&long), PageKind::Primary);
        acc.record(&mut visit, "x-long", Some("two"), PageKind::Primary);
        acc.record(&mut visit, "x-long", Some("three"), PageKind::Primary);
        let patterns = acc.finalize(1, 1);
        let record = patterns.get("x-long").unwrap();
        assert_eq!(record.examples().len(), 2);
        assert!(record.examples()[0].chars().count() <= MAX_EXAMPLE_LENGTH + 1);
        assert!(record.value_frequencies()[0].value.chars().count() <= 201);
    }

    #[test]
    fn test_tracked_values_are_bounded() {
        let mut opts = options();
        opts.thresholds.max_tracked_values = 3;
        let mut acc = PatternAccumulator::new(&opts);
        let mut visit = SiteVisit::new(0);
        for i in 0..10 {
            acc.record(&mut visit, "x-id", Some(&format!("value-{}", i)), PageKind::Primary);
        }
        let patterns = acc.finalize(1, 1);
        let record = patterns.get("x-id").unwrap();
        assert_eq!(record.value_frequencies().len(), 3);
        assert!(record.values_truncated());
    }

    #[test]
    fn test_page_distribution() {
        let mut acc = PatternAccumulator::new(&options());
        let mut first = SiteVisit::new(0);
        acc.record(&mut first, "x-robots-tag", None, PageKind::Primary);
        let mut second = SiteVisit::new(1);
        acc.record(&mut second, "x-robots-tag", None, PageKind::Secondary);
        let patterns = acc.finalize(2, 1);
        let dist = patterns
            .get("x-robots-tag")
            .unwrap()
            .metadata()
            .page_distribution
            .unwrap();
        assert_eq!(dist.primary, 0.5);
        assert_eq!(dist.secondary, 0.5);
    }

    #[test]
    fn test_empty_accumulator_finalizes_to_empty() {
        let acc = PatternAccumulator::new(&options());
        let patterns = acc.finalize(0, 1);
        assert!(patterns.is_empty());
        assert_eq!(patterns.total_found(), 0);
    }

    #[test]
    fn test_annotate_keeps_membership_and_order() {
        let mut acc = PatternAccumulator::new(&options());
        let mut visit = SiteVisit::new(0);
        acc.record(&mut visit, "server", None, PageKind::Primary);
        acc.record(&mut visit, "via", None, PageKind::Primary);
        let patterns = acc.finalize(1, 1);
        let annotated = patterns.annotate(|r| PatternMetadata {
            vendor: Some(format!("vendor-of-{}", r.pattern())),
            ..r.metadata().clone()
        });
        assert_eq!(
            annotated.keys().collect::<Vec<_>>(),
            patterns.keys().collect::<Vec<_>>()
        );
        assert_eq!(
            annotated.get("via").unwrap().metadata().vendor.as_deref(),
            Some("vendor-of-via")
        );
    }

    #[test]
    fn test_serializes_as_ordered_map() {
        let mut acc = PatternAccumulator::new(&options());
        let mut visit = SiteVisit::new(0);
        acc.record(&mut visit, "server", Some("nginx"), PageKind::Primary);
        let patterns = acc.finalize(2, 1);
        let json = serde_json::to_value(&patterns).unwrap();
        assert_eq!(json["server"]["siteCount"], 1);
        assert_eq!(json["server"]["frequency"], 0.5);
        assert!(json["server"].get("sites").is_none());
    }
}
