// Analysis options and tunable thresholds
use crate::error::{AnalysisError, Result};
use crate::normalize::normalize_key;
use crate::skip_lists::{default_skip_headers, default_skip_meta};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AnalysisOptions {
    /// Minimum number of distinct sites a pattern needs to be retained.
    pub min_occurrences: usize,
    pub include_examples: bool,
    pub max_examples: usize,
    /// Drop non-informative names (generic caching headers, boilerplate meta) before counting.
    pub semantic_filtering: bool,
    /// Header names dropped under semantic filtering. Replaces the built-in list.
    #[serde(deserialize_with = "normalized_names")]
    pub skip_headers: BTreeSet<String>,
    #[serde(deserialize_with = "normalized_names")]
    pub skip_meta: BTreeSet<String>,
    /// Recommendations scoring below this are suppressed.
    pub confidence_threshold: f64,
    pub bias_aware_analysis: bool,
    pub cross_analyzer_intelligence: bool,
    pub thresholds: Thresholds,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            min_occurrences: 2,
            include_examples: true,
            max_examples: 5,
            semantic_filtering: true,
            skip_headers: default_skip_headers(),
            skip_meta: default_skip_meta(),
            confidence_threshold: 0.3,
            bias_aware_analysis: true,
            cross_analyzer_intelligence: true,
            thresholds: Thresholds::default(),
        }
    }
}

impl AnalysisOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_occurrences(mut self, min: usize) -> Self {
        self.min_occurrences = min;
        self
    }

    pub fn with_examples(mut self, include: bool, max: usize) -> Self {
        self.include_examples = include;
        self.max_examples = max;
        self
    }

    pub fn with_semantic_filtering(mut self, enabled: bool) -> Self {
        self.semantic_filtering = enabled;
        self
    }

    /// Replace the header skip list.
    pub fn with_skip_headers<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.skip_headers = normalize_names(names);
        self
    }

    /// Add names to the header skip list.
    pub fn with_extra_skip_headers<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.skip_headers.extend(normalize_names(names));
        self
    }

    pub fn with_skip_meta<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.skip_meta = normalize_names(names);
        self
    }

    /// Whether a normalized header name is dropped before counting.
    pub fn skips_header(&self, key: &str) -> bool {
        self.semantic_filtering && self.skip_headers.contains(key)
    }

    /// Whether a normalized meta name is dropped before counting.
    pub fn skips_meta(&self, key: &str) -> bool {
        self.semantic_filtering && self.skip_meta.contains(key)
    }

    pub fn with_confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn with_bias_aware_analysis(mut self, enabled: bool) -> Self {
        self.bias_aware_analysis = enabled;
        self
    }

    pub fn with_cross_analyzer_intelligence(mut self, enabled: bool) -> Self {
        self.cross_analyzer_intelligence = enabled;
        self
    }

    pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Effective example cap (zero when examples are disabled).
    pub fn example_limit(&self) -> usize {
        if self.include_examples {
            self.max_examples
        } else {
            0
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_occurrences == 0 {
            return Err(AnalysisError::invalid(
                "minOccurrences",
                "must be at least 1 site",
            ));
        }
        check_unit("confidenceThreshold", self.confidence_threshold)?;
        self.thresholds.validate()
    }
}

/// Empirically chosen cutoffs. Every one of them is configuration so that
/// domain validation can move them without code changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Thresholds {
    /// Pairs co-occurring on fewer sites are noise and never reported.
    pub min_pair_support: usize,
    pub strong_correlation_threshold: f64,
    pub platform_combination_min_frequency: f64,
    pub platform_combination_min_exclusivity: f64,
    pub mutual_exclusion_min_frequency: f64,
    pub mutual_exclusion_max_overlap: f64,
    pub mutual_exclusion_candidate_limit: usize,
    pub signature_min_specificity: f64,
    pub signature_min_platform_frequency: f64,
    pub correlation_boost_per_dimension: f64,
    pub min_sites_per_cms: usize,
    pub min_sample_size: usize,
    pub max_value_length: usize,
    pub max_tracked_values: usize,
    pub max_value_frequencies: usize,
    pub max_pair_headers_per_site: usize,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_pair_support: 3,
            strong_correlation_threshold: 0.8,
            platform_combination_min_frequency: 0.3,
            platform_combination_min_exclusivity: 0.8,
            mutual_exclusion_min_frequency: 0.05,
            mutual_exclusion_max_overlap: 0.02,
            mutual_exclusion_candidate_limit: 50,
            signature_min_specificity: 0.6,
            signature_min_platform_frequency: 0.2,
            correlation_boost_per_dimension: 0.1,
            min_sites_per_cms: 30,
            min_sample_size: 30,
            max_value_length: 200,
            max_tracked_values: 500,
            max_value_frequencies: 20,
            max_pair_headers_per_site: 256,
        }
    }
}

impl Thresholds {
    pub fn validate(&self) -> Result<()> {
        if self.min_pair_support == 0 {
            return Err(AnalysisError::invalid("minPairSupport", "must be at least 1"));
        }
        check_unit("strongCorrelationThreshold", self.strong_correlation_threshold)?;
        check_unit(
            "platformCombinationMinFrequency",
            self.platform_combination_min_frequency,
        )?;
        check_unit(
            "platformCombinationMinExclusivity",
            self.platform_combination_min_exclusivity,
        )?;
        check_unit("mutualExclusionMinFrequency", self.mutual_exclusion_min_frequency)?;
        check_unit("mutualExclusionMaxOverlap", self.mutual_exclusion_max_overlap)?;
        check_unit("signatureMinSpecificity", self.signature_min_specificity)?;
        check_unit(
            "signatureMinPlatformFrequency",
            self.signature_min_platform_frequency,
        )?;
        check_unit(
            "correlationBoostPerDimension",
            self.correlation_boost_per_dimension,
        )?;
        if self.max_value_length == 0 {
            return Err(AnalysisError::invalid("maxValueLength", "must be positive"));
        }
        Ok(())
    }
}

fn normalize_names<I, S>(names: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .map(|name| normalize_key(name.as_ref()))
        .filter(|name| !name.is_empty())
        .collect()
}

fn normalized_names<'de, D>(deserializer: D) -> std::result::Result<BTreeSet<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let names = Vec::<String>::deserialize(deserializer)?;
    Ok(normalize_names(names))
}

fn check_unit(name: &'static str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) || value.is_nan() {
        return Err(AnalysisError::invalid(
            name,
            format!("{} is outside [0, 1]", value),
        ));
    }
    Ok(())
}
