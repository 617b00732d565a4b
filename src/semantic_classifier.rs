// Semantic Classifier - Rule-based category, vendor and discriminative score per header
use crate::header_analyzer::HeaderSpecific;
use crate::normalize::normalize_key;
use crate::options::AnalysisOptions;
use crate::patterns::AnalysisResult;
use crate::skip_lists::is_generic_header;
use crate::vendor_classifier::detect_vendor_by_header;
use lazy_static::lazy_static;
use rayon::prelude::*;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PatternCategory {
    Generic,
    CmsIndicative,
    Infrastructure,
    Platform,
    Custom,
    Security,
    Caching,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilterRecommendation {
    AlwaysFilter,
    NeverFilter,
    ContextDependent,
}

impl PatternCategory {
    /// Generic is always filtered, platform never; everything else depends on context.
    pub fn filter_recommendation(self) -> FilterRecommendation {
        match self {
            PatternCategory::Generic => FilterRecommendation::AlwaysFilter,
            PatternCategory::Platform => FilterRecommendation::NeverFilter,
            _ => FilterRecommendation::ContextDependent,
        }
    }
}

pub const SECURITY_HEADERS: &[&str] = &[
    "strict-transport-security",
    "content-security-policy",
    "content-security-policy-report-only",
    "x-frame-options",
    "x-content-type-options",
    "x-xss-protection",
    "referrer-policy",
    "permissions-policy",
    "feature-policy",
    "cross-origin-opener-policy",
    "cross-origin-embedder-policy",
    "cross-origin-resource-policy",
    "expect-ct",
];

const EXTRA_GENERIC: &[&str] = &[
    "set-cookie",
    "location",
    "p3p",
    "x-ua-compatible",
    "access-control-allow-origin",
    "access-control-allow-methods",
    "access-control-allow-headers",
    "access-control-expose-headers",
    "access-control-allow-credentials",
    "access-control-max-age",
    "content-disposition",
    "x-robots-tag",
];

const CMS_INDICATIVE: &[&str] = &[
    "x-powered-by",
    "x-generator",
    "x-cms",
    "x-powered-cms",
    "x-content-powered-by",
    "x-content-encoded-by",
    "x-platform",
    "x-framework",
    "link",
];

const INFRASTRUCTURE: &[&str] = &[
    "server",
    "via",
    "x-served-by",
    "x-timer",
    "x-runtime",
    "x-request-id",
    "x-correlation-id",
    "x-backend-server",
    "x-server",
    "x-host",
    "x-cdn",
    "x-iinfo",
];

lazy_static! {
    static ref PLATFORM_RULES: Vec<(Regex, &'static str)> = vec![
        (Regex::new(r"^x-(wp|wordpress)-").unwrap(), "WordPress"),
        (Regex::new(r"^x-(pingback|redirect-by)$").unwrap(), "WordPress"),
        (Regex::new(r"^x-drupal-").unwrap(), "Drupal"),
        (Regex::new(r"^x-joomla").unwrap(), "Joomla"),
        (Regex::new(r"^x-(shopify-|shopid$|shardid$|sorting-hat-)").unwrap(), "Shopify"),
        (Regex::new(r"^x-wix-").unwrap(), "Wix"),
        (Regex::new(r"^x-(squarespace-|contextid$)").unwrap(), "Squarespace"),
        (Regex::new(r"^x-magento-").unwrap(), "Magento"),
        (Regex::new(r"^x-ghost-").unwrap(), "Ghost"),
        (Regex::new(r"^x-(hs-|hubspot-)").unwrap(), "HubSpot"),
        (Regex::new(r"^x-duda-").unwrap(), "Duda"),
        (Regex::new(r"^x-typo3-").unwrap(), "TYPO3"),
        (Regex::new(r"^x-craft-").unwrap(), "Craft CMS"),
    ];
    static ref INFRASTRUCTURE_PREFIX: Regex = Regex::new(
        r"^(cf-|x-amz|x-goog-|x-azure-|x-ms-|x-akamai-|akamai-|x-fastly-|fastly-|x-vercel-|x-nf-|x-varnish|x-litespeed-|x-envoy-|x-sucuri-|x-aspnet|x-nextjs-)"
    )
    .unwrap();
    static ref CACHING: Regex = Regex::new(r"(^|-)cache(-|$)|^x-proxy-cache|^x-cache").unwrap();
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderClassification {
    pub category: PatternCategory,
    pub filter_recommendation: FilterRecommendation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    pub discriminative_score: f64,
}

impl HeaderClassification {
    fn new(category: PatternCategory, score: f64, platform: Option<&str>, key: &str) -> Self {
        Self {
            category,
            filter_recommendation: category.filter_recommendation(),
            vendor: detect_vendor_by_header(key).map(|v| v.name.to_string()),
            platform: platform.map(str::to_string),
            discriminative_score: score.clamp(0.0, 1.0),
        }
    }
}

/// Classify a header name. Case-insensitive and idempotent.
pub fn classify_header(name: &str) -> HeaderClassification {
    let key = normalize_key(name);
    let key = key.as_str();

    if is_generic_header(key) || EXTRA_GENERIC.contains(&key) {
        return HeaderClassification::new(PatternCategory::Generic, 0.05, None, key);
    }
    if let Some((_, platform)) = PLATFORM_RULES.iter().find(|(re, _)| re.is_match(key)) {
        return HeaderClassification::new(PatternCategory::Platform, 0.95, Some(*platform), key);
    }
    if SECURITY_HEADERS.contains(&key) {
        return HeaderClassification::new(PatternCategory::Security, 0.2, None, key);
    }
    if CMS_INDICATIVE.contains(&key) {
        return HeaderClassification::new(PatternCategory::CmsIndicative, 0.65, None, key);
    }
    if INFRASTRUCTURE.contains(&key) || INFRASTRUCTURE_PREFIX.is_match(key) {
        return HeaderClassification::new(PatternCategory::Infrastructure, 0.35, None, key);
    }
    if CACHING.is_match(key) {
        return HeaderClassification::new(PatternCategory::Caching, 0.3, None, key);
    }
    let score = if key.starts_with("x-") { 0.5 } else { 0.4 };
    HeaderClassification::new(PatternCategory::Custom, score, None, key)
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryStats {
    pub pattern_count: usize,
    /// Share of sites exhibiting at least one pattern of the category.
    pub site_coverage: f64,
    pub average_frequency: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterSummary {
    pub always_filter: usize,
    pub never_filter: usize,
    pub context_dependent: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticSpecific {
    pub classifications: BTreeMap<String, HeaderClassification>,
    pub category_distribution: BTreeMap<PatternCategory, CategoryStats>,
    pub filter_summary: FilterSummary,
    /// Platform-category headers grouped by the platform they name.
    pub platform_hints: BTreeMap<String, BTreeSet<String>>,
}

pub struct SemanticAnalyzer;

impl SemanticAnalyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze(
        &self,
        header: &AnalysisResult<HeaderSpecific>,
        options: &AnalysisOptions,
    ) -> AnalysisResult<SemanticSpecific> {
        let total_sites = header.total_sites();
        if header.patterns().is_empty() {
            debug!("Semantic analysis skipped: no header patterns");
            return AnalysisResult::empty("semantic", total_sites, options, SemanticSpecific::default());
        }
        info!("Classifying {} header patterns...", header.patterns().len());

        let classifications: BTreeMap<String, HeaderClassification> = header
            .patterns()
            .as_slice()
            .par_iter()
            .map(|record| (record.pattern().to_string(), classify_header(record.pattern())))
            .collect::<Vec<_>>()
            .into_iter()
            .collect();

        let mut filter_summary = FilterSummary::default();
        let mut platform_hints: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut by_category: BTreeMap<PatternCategory, (usize, BTreeSet<usize>, Vec<f64>)> = BTreeMap::new();

        for record in header.patterns().iter() {
            let Some(classification) = classifications.get(record.pattern()) else {
                continue;
            };
            match classification.filter_recommendation {
                FilterRecommendation::AlwaysFilter => filter_summary.always_filter += 1,
                FilterRecommendation::NeverFilter => filter_summary.never_filter += 1,
                FilterRecommendation::ContextDependent => filter_summary.context_dependent += 1,
            }
            if let Some(platform) = &classification.platform {
                platform_hints
                    .entry(platform.clone())
                    .or_default()
                    .insert(record.pattern().to_string());
            }
            let entry = by_category.entry(classification.category).or_default();
            entry.0 += 1;
            entry.1.extend(record.sites().iter().copied());
            entry.2.push(record.frequency());
        }

        let category_distribution = by_category
            .into_iter()
            .map(|(category, (count, sites, frequencies))| {
                let average_frequency = if frequencies.is_empty() {
                    0.0
                } else {
                    statistical::mean(&frequencies)
                };
                let site_coverage = if total_sites == 0 {
                    0.0
                } else {
                    sites.len() as f64 / total_sites as f64
                };
                (
                    category,
                    CategoryStats {
                        pattern_count: count,
                        site_coverage,
                        average_frequency,
                    },
                )
            })
            .collect();

        let patterns = header.patterns().annotate(|record| {
            let mut metadata = record.metadata().clone();
            if let Some(c) = classifications.get(record.pattern()) {
                metadata.category = Some(c.category);
                metadata.vendor = c.vendor.clone();
                metadata.discriminative_score = Some(c.discriminative_score);
            }
            metadata
        });

        info!(
            "Semantic analysis: {} always-filter, {} never-filter, {} context-dependent",
            filter_summary.always_filter, filter_summary.never_filter, filter_summary.context_dependent
        );
        let specific = SemanticSpecific {
            classifications,
            category_distribution,
            filter_summary,
            platform_hints,
        };
        AnalysisResult::new("semantic", patterns, total_sites, options, specific)
    }
}

impl Default for SemanticAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}
