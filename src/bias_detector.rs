// Bias Detector - Separates platform affinity from dataset skew
use crate::corpus::{shared_sites, PreprocessedCorpus, SiteId};
use crate::normalize::{normalize_key, UNKNOWN_CMS};
use crate::options::AnalysisOptions;
use crate::patterns::{AnalysisResult, CorpusAnalyzer, PageKind, PatternAccumulator, PatternRecord, SiteVisit};
use crate::stats::{dispersion, normalized_entropy, ratio};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BiasLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl BiasLevel {
    pub fn from_score(score: f64) -> Self {
        if score < 0.25 {
            BiasLevel::Low
        } else if score < 0.5 {
            BiasLevel::Medium
        } else if score < 0.75 {
            BiasLevel::High
        } else {
            BiasLevel::Critical
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationRisk {
    Low,
    Medium,
    High,
}

/// Sites of one CMS carrying a pattern, relative to that CMS's own size.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CmsFrequency {
    pub occurrences: usize,
    pub total_sites_for_cms: usize,
    pub frequency: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderCorrelation {
    pub header: String,
    pub overall_occurrences: usize,
    pub overall_frequency: f64,
    /// P(pattern | cms), keyed by CMS.
    #[serde(rename = "perCMSFrequency")]
    pub per_cms_frequency: BTreeMap<String, CmsFrequency>,
    /// P(cms | pattern). Dominated by large categories; never a platform claim.
    #[serde(rename = "cmsGivenPattern")]
    pub cms_given_pattern: BTreeMap<String, f64>,
    /// Spread of per-CMS frequencies, 0 = uniform across categories.
    pub platform_specificity: f64,
    /// Mean per-CMS frequency across adequately sampled categories.
    pub bias_adjusted_frequency: f64,
    pub recommendation_risk: RecommendationRisk,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub bias_warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CmsShare {
    pub count: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetBias {
    pub total_sites: usize,
    pub cms_distribution: BTreeMap<String, CmsShare>,
    /// Herfindahl-Hirschman index of the label distribution.
    pub concentration_score: f64,
    /// Normalized label entropy in [0, 1].
    pub diversity_score: f64,
    pub unknown_fraction: f64,
    pub adequate_categories: Vec<String>,
    pub inadequate_categories: Vec<String>,
    pub bias_score: f64,
    pub bias_level: BiasLevel,
    pub warnings: Vec<String>,
}

impl Default for DatasetBias {
    fn default() -> Self {
        Self {
            total_sites: 0,
            cms_distribution: BTreeMap::new(),
            concentration_score: 0.0,
            diversity_score: 0.0,
            unknown_fraction: 0.0,
            adequate_categories: Vec::new(),
            inadequate_categories: Vec::new(),
            bias_score: 0.0,
            bias_level: BiasLevel::Low,
            warnings: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BiasSpecific {
    pub header_correlations: Vec<HeaderCorrelation>,
    pub dataset_bias: DatasetBias,
}

impl BiasSpecific {
    pub fn correlation(&self, header: &str) -> Option<&HeaderCorrelation> {
        self.header_correlations.iter().find(|c| c.header == header)
    }
}

pub struct BiasDetector;

impl BiasDetector {
    pub fn new() -> Self {
        Self
    }
}

impl Default for BiasDetector {
    fn default() -> Self {
        Self::new()
    }
}

fn dataset_bias(corpus: &PreprocessedCorpus, min_sites_per_cms: usize) -> DatasetBias {
    let total = corpus.total_sites();
    if total == 0 {
        return DatasetBias {
            warnings: vec!["Empty corpus: no label distribution to assess".to_string()],
            ..Default::default()
        };
    }

    let counts = corpus.platform_counts();
    let values: Vec<usize> = counts.values().copied().collect();
    let cms_distribution = counts
        .iter()
        .map(|(cms, &count)| {
            (
                cms.clone(),
                CmsShare {
                    count,
                    percentage: ratio(count, total),
                },
            )
        })
        .collect();
    let concentration_score = values.iter().map(|&c| ratio(c, total).powi(2)).sum();
    let diversity_score = normalized_entropy(&values);
    let (adequate, inadequate): (Vec<_>, Vec<_>) = counts.iter().partition(|(_, &c)| c >= min_sites_per_cms);
    let adequate_categories: Vec<String> = adequate.into_iter().map(|(k, _)| k.clone()).collect();
    let inadequate_categories: Vec<String> = inadequate.into_iter().map(|(k, _)| k.clone()).collect();
    let unknown_fraction = ratio(counts.get(UNKNOWN_CMS).copied().unwrap_or(0), total);

    let adequacy = ratio(adequate_categories.len(), counts.len());
    let bias_score = (1.0 - (0.5 * adequacy + 0.5 * diversity_score)).clamp(0.0, 1.0);

    let mut warnings = Vec::new();
    if counts.len() == 1 {
        warnings.push("Single CMS category: platform correlations cannot be measured".to_string());
    }
    for cms in &inadequate_categories {
        warnings.push(format!(
            "{} has {} sites, below the {} needed for reliable frequencies",
            cms, counts[cms], min_sites_per_cms
        ));
    }
    if unknown_fraction > 0.5 {
        warnings.push(format!(
            "{:.1}% of sites carry no CMS label",
            unknown_fraction * 100.0
        ));
    }
    if concentration_score > 0.5 && counts.len() > 1 {
        warnings.push(format!(
            "Label distribution is concentrated (HHI {:.2})",
            concentration_score
        ));
    }

    DatasetBias {
        total_sites: total,
        cms_distribution,
        concentration_score,
        diversity_score,
        unknown_fraction,
        adequate_categories,
        inadequate_categories,
        bias_score,
        bias_level: BiasLevel::from_score(bias_score),
        warnings,
    }
}

fn header_correlation(
    record: &PatternRecord,
    groups: &BTreeMap<String, BTreeSet<SiteId>>,
    adequate: &BTreeSet<&str>,
    total_sites: usize,
) -> HeaderCorrelation {
    let site_count = record.site_count();
    let mut per_cms_frequency = BTreeMap::new();
    let mut cms_given_pattern = BTreeMap::new();
    for (cms, sites) in groups {
        let occurrences = shared_sites(record.sites(), sites);
        per_cms_frequency.insert(
            cms.clone(),
            CmsFrequency {
                occurrences,
                total_sites_for_cms: sites.len(),
                frequency: ratio(occurrences, sites.len()),
            },
        );
        if occurrences > 0 {
            cms_given_pattern.insert(cms.clone(), ratio(occurrences, site_count));
        }
    }

    let adequate_freqs: Vec<f64> = per_cms_frequency
        .iter()
        .filter(|(cms, _)| adequate.contains(cms.as_str()))
        .map(|(_, f)| f.frequency)
        .collect();
    let overall_frequency = ratio(site_count, total_sites);
    let bias_adjusted_frequency = if adequate_freqs.is_empty() {
        overall_frequency
    } else {
        statistical::mean(&adequate_freqs)
    };
    let all_freqs: Vec<f64> = per_cms_frequency.values().map(|f| f.frequency).collect();
    let platform_specificity = if adequate_freqs.len() >= 2 {
        dispersion(&adequate_freqs)
    } else {
        dispersion(&all_freqs)
    };

    // The category where the pattern is most prevalent relative to its own size
    let mut warnings = Vec::new();
    let top = per_cms_frequency
        .iter()
        .filter(|(_, f)| f.occurrences > 0)
        .max_by(|a, b| a.1.frequency.total_cmp(&b.1.frequency).then_with(|| b.0.cmp(a.0)));
    let mut risk = RecommendationRisk::Low;
    if let Some((cms, freq)) = top {
        if !adequate.contains(cms.as_str()) {
            risk = RecommendationRisk::High;
            warnings.push(format!(
                "Peak frequency on {} rests on {} sites",
                cms, freq.total_sites_for_cms
            ));
        }
    }
    let dominant = cms_given_pattern
        .iter()
        .max_by(|a, b| a.1.total_cmp(b.1).then_with(|| b.0.cmp(a.0)));
    if let (Some((top_cms, _)), Some((dominant_cms, share))) = (top, dominant) {
        if top_cms != dominant_cms && *share > 0.5 {
            risk = risk.max(RecommendationRisk::Medium);
            warnings.push(format!(
                "{:.0}% of carrying sites are {} but the pattern is most prevalent on {}",
                share * 100.0,
                dominant_cms,
                top_cms
            ));
        }
    }

    HeaderCorrelation {
        header: record.pattern().to_string(),
        overall_occurrences: site_count,
        overall_frequency,
        per_cms_frequency,
        cms_given_pattern,
        platform_specificity,
        bias_adjusted_frequency,
        recommendation_risk: risk,
        bias_warnings: warnings,
    }
}

impl CorpusAnalyzer for BiasDetector {
    type Specific = BiasSpecific;

    fn name(&self) -> &'static str {
        "bias"
    }

    fn analyze(&self, corpus: &PreprocessedCorpus, options: &AnalysisOptions) -> AnalysisResult<BiasSpecific> {
        let min_sites = options.thresholds.min_sites_per_cms;
        let dataset_bias = dataset_bias(corpus, min_sites);
        if corpus.is_empty() {
            debug!("Bias detection skipped: empty corpus");
            let specific = BiasSpecific {
                header_correlations: Vec::new(),
                dataset_bias,
            };
            return AnalysisResult::empty(self.name(), 0, options, specific);
        }
        info!(
            "Assessing dataset bias over {} sites in {} CMS categories...",
            corpus.total_sites(),
            dataset_bias.cms_distribution.len()
        );
        for warning in &dataset_bias.warnings {
            warn!("Dataset bias: {}", warning);
        }

        let mut acc = PatternAccumulator::new(options);
        for (id, site) in corpus.iter() {
            let mut visit = SiteVisit::new(id);
            let pages = [(&site.headers, PageKind::Primary), (&site.secondary_headers, PageKind::Secondary)];
            for (map, page) in pages {
                for (raw_name, values) in map {
                    let key = normalize_key(raw_name);
                    if key.is_empty() || options.skips_header(&key) {
                        continue;
                    }
                    acc.record(&mut visit, &key, values.iter().next().map(String::as_str), page);
                }
            }
        }
        let patterns = acc.finalize(corpus.total_sites(), options.min_occurrences);

        let groups = corpus.platform_sites();
        let adequate: BTreeSet<&str> = dataset_bias.adequate_categories.iter().map(String::as_str).collect();
        let header_correlations: Vec<HeaderCorrelation> = patterns
            .as_slice()
            .par_iter()
            .map(|record| header_correlation(record, &groups, &adequate, corpus.total_sites()))
            .collect();

        info!(
            "Bias assessment: score {:.2} ({:?}), {} header correlations",
            dataset_bias.bias_score,
            dataset_bias.bias_level,
            header_correlations.len()
        );
        let specific = BiasSpecific {
            header_correlations,
            dataset_bias,
        };
        AnalysisResult::new(self.name(), patterns, corpus.total_sites(), options, specific)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::SiteRecord;
    use crate::fixtures::{joomla_unknown_corpus, multi_platform_corpus};

    #[test]
    fn test_per_cms_frequency_uses_cms_size() {
        let result = BiasDetector::new().analyze(&joomla_unknown_corpus(), &AnalysisOptions::default());
        let correlation = result.specific().correlation("x-content-encoded-by").unwrap();

        let joomla = &correlation.per_cms_frequency["Joomla"];
        assert_eq!(joomla.occurrences, 2);
        assert_eq!(joomla.total_sites_for_cms, 2);
        assert!((joomla.frequency - 1.0).abs() < 1e-9);

        let unknown = &correlation.per_cms_frequency["Unknown"];
        assert_eq!(unknown.occurrences, 35);
        assert!((unknown.frequency - 0.0364).abs() < 1e-4);

        // The reverse conditional is reported separately and is not the Joomla frequency
        assert!((correlation.cms_given_pattern["Joomla"] - 2.0 / 37.0).abs() < 1e-9);
        assert!((correlation.cms_given_pattern["Unknown"] - 35.0 / 37.0).abs() < 1e-9);
        assert_eq!(correlation.recommendation_risk, RecommendationRisk::High);
        assert!((correlation.bias_adjusted_frequency - 35.0 / 963.0).abs() < 1e-9);
    }

    #[test]
    fn test_dataset_bias_on_skewed_corpus() {
        let result = BiasDetector::new().analyze(&joomla_unknown_corpus(), &AnalysisOptions::default());
        let bias = &result.specific().dataset_bias;
        assert_eq!(bias.total_sites, 965);
        assert_eq!(bias.adequate_categories, vec!["Unknown".to_string()]);
        assert_eq!(bias.inadequate_categories, vec!["Joomla".to_string()]);
        assert!(bias.concentration_score > 0.9);
        assert!(bias.bias_level >= BiasLevel::High);
        assert!(bias.warnings.iter().any(|w| w.contains("Joomla")));
        let total: f64 = bias.cms_distribution.values().map(|s| s.percentage).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_balanced_corpus_is_low_bias() {
        let result = BiasDetector::new().analyze(&multi_platform_corpus(30), &AnalysisOptions::default());
        let bias = &result.specific().dataset_bias;
        assert_eq!(bias.adequate_categories.len(), 3);
        assert!(bias.bias_score < 1e-9);
        assert_eq!(bias.bias_level, BiasLevel::Low);

        let server = result.specific().correlation("server").unwrap();
        assert!(server.platform_specificity < 1e-9);
        assert_eq!(server.recommendation_risk, RecommendationRisk::Low);
        let pingback = result.specific().correlation("x-pingback").unwrap();
        assert!((pingback.platform_specificity - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_bias_level_bands() {
        assert_eq!(BiasLevel::from_score(0.0), BiasLevel::Low);
        assert_eq!(BiasLevel::from_score(0.3), BiasLevel::Medium);
        assert_eq!(BiasLevel::from_score(0.6), BiasLevel::High);
        assert_eq!(BiasLevel::from_score(0.9), BiasLevel::Critical);
    }

    #[test]
    fn test_empty_and_single_site() {
        let result = BiasDetector::new().analyze(&PreprocessedCorpus::default(), &AnalysisOptions::default());
        assert!(result.specific().header_correlations.is_empty());
        assert_eq!(result.specific().dataset_bias.bias_score, 0.0);
        assert_eq!(result.specific().dataset_bias.bias_level, BiasLevel::Low);
        assert!(!result.specific().dataset_bias.warnings.is_empty());

        let single = PreprocessedCorpus::new(vec![SiteRecord::new("https://a.example").with_header("x-a", "1")]);
        let result = BiasDetector::new().analyze(&single, &AnalysisOptions::default().with_min_occurrences(1));
        assert_eq!(result.specific().header_correlations.len(), 1);
        assert!(result.specific().dataset_bias.warnings.iter().any(|w| w.contains("Single")));
    }

    #[test]
    fn test_serialized_field_names() {
        let result = BiasDetector::new().analyze(&joomla_unknown_corpus(), &AnalysisOptions::default());
        let json = serde_json::to_value(result.specific()).unwrap();
        let first = &json["headerCorrelations"][0];
        assert!(first.get("perCMSFrequency").is_some());
        assert!(first.get("cmsGivenPattern").is_some());
        assert!(json["datasetBias"].get("biasLevel").is_some());
    }
}
