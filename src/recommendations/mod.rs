// Recommendation Coordinator - Turns aggregated analyzer output into
// confidence-scored filtering, retention and refinement recommendations
mod confidence;
mod filtering;
mod refinement;
mod retention;

pub use confidence::{ConfidenceLevel, ConfidenceScore, ConfidenceSource, PlatformContrast, StatisticalBasis};
pub use filtering::FilteringGenerator;
pub use refinement::RefinementGenerator;
pub use retention::RetentionGenerator;

use crate::bias_detector::{BiasLevel, HeaderCorrelation, RecommendationRisk};
use crate::corpus::{shared_sites, PreprocessedCorpus, SiteId};
use crate::normalize::normalize_key;
use crate::options::AnalysisOptions;
use crate::patterns::{FinalizedPatterns, PatternMetadata, PatternRecord};
use crate::pipeline::AggregatedResults;
use crate::stats::ratio;
use crate::technology_signatures::expected_headers;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::{debug, info, warn};

const ADD_THRESHOLD: f64 = 0.25;
const KEEP_THRESHOLD: f64 = 0.15;
const CONSIDER_THRESHOLD: f64 = 0.10;
const MAX_CONSIDER: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationAction {
    Retain,
    Filter,
    Refine,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reasoning {
    pub primary_factors: Vec<String>,
    pub statistical_basis: StatisticalBasis,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BiasAssessment {
    pub risk: RecommendationRisk,
    pub bias_adjusted_frequency: f64,
    pub platform_specificity: f64,
    pub dataset_bias_level: BiasLevel,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub pattern: String,
    pub action: RecommendationAction,
    pub confidence: ConfidenceScore,
    pub reasoning: Reasoning,
    pub evidence: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bias_assessment: Option<BiasAssessment>,
}

/// A generator that could not run because an upstream result is absent.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{generator} recommendations skipped: {input} result unavailable")]
pub struct MissingInput {
    pub generator: &'static str,
    pub input: &'static str,
}

/// Read-only view over everything the generators may consult.
pub struct GeneratorContext<'a> {
    pub corpus: &'a PreprocessedCorpus,
    pub options: &'a AnalysisOptions,
    pub results: &'a AggregatedResults,
    /// Labeled platform groups, built once per run.
    pub platforms: BTreeMap<String, BTreeSet<SiteId>>,
}

impl<'a> GeneratorContext<'a> {
    pub fn new(corpus: &'a PreprocessedCorpus, options: &'a AnalysisOptions, results: &'a AggregatedResults) -> Self {
        Self {
            corpus,
            options,
            results,
            platforms: corpus.labeled_platform_sites(),
        }
    }

    /// Header patterns, preferring the most annotated copy available.
    pub fn header_patterns(&self) -> Option<&'a FinalizedPatterns> {
        let results = self.results;
        results
            .semantic
            .as_ref()
            .map(|r| r.patterns())
            .or_else(|| results.vendor.as_ref().map(|r| r.patterns()))
            .or_else(|| results.header.as_ref().map(|r| r.patterns()))
    }

    pub fn require_headers(&self, generator: &'static str) -> Result<&'a FinalizedPatterns, MissingInput> {
        self.header_patterns().ok_or(MissingInput {
            generator,
            input: "header",
        })
    }

    /// Category and vendor for a header, merged from the classifier results.
    pub fn metadata(&self, key: &str) -> PatternMetadata {
        let semantic = self
            .results
            .semantic
            .as_ref()
            .and_then(|r| r.patterns().get(key))
            .map(|r| r.metadata().clone())
            .unwrap_or_default();
        let vendor = semantic.vendor.clone().or_else(|| {
            self.results
                .vendor
                .as_ref()
                .and_then(|r| r.patterns().get(key))
                .and_then(|r| r.metadata().vendor.clone())
        });
        PatternMetadata { vendor, ..semantic }
    }

    pub fn correlation(&self, key: &str) -> Option<&'a HeaderCorrelation> {
        if !self.options.bias_aware_analysis {
            return None;
        }
        self.results.bias.as_ref()?.specific().correlation(key)
    }

    /// Build a scored recommendation, discounting strength for bias risk.
    pub fn recommend(
        &self,
        record: &PatternRecord,
        pattern: String,
        action: RecommendationAction,
        strength: f64,
        mut factors: Vec<String>,
        mut evidence: Vec<String>,
    ) -> Recommendation {
        let mut strength = strength;
        let bias_assessment = self.correlation(record.pattern()).map(|c| {
            match c.recommendation_risk {
                RecommendationRisk::High => {
                    strength *= 0.7;
                    factors.push("high dataset-bias risk".to_string());
                }
                RecommendationRisk::Medium => strength *= 0.85,
                RecommendationRisk::Low => {}
            }
            BiasAssessment {
                risk: c.recommendation_risk,
                bias_adjusted_frequency: c.bias_adjusted_frequency,
                platform_specificity: c.platform_specificity,
                dataset_bias_level: self
                    .results
                    .bias
                    .as_ref()
                    .map(|b| b.specific().dataset_bias.bias_level)
                    .unwrap_or(BiasLevel::Low),
                warnings: c.bias_warnings.clone(),
            }
        });

        let contrast = PlatformContrast::of(record, self.corpus.total_sites(), &self.platforms);
        if let Some(platform) = &contrast.platform {
            evidence.push(format!(
                "{:.1}% of {} sites vs {:.1}% elsewhere",
                contrast.observed * 100.0,
                platform,
                contrast.baseline * 100.0
            ));
        }
        evidence.push(format!(
            "{} of {} sites ({:.1}%)",
            record.site_count(),
            self.corpus.total_sites(),
            record.frequency() * 100.0
        ));

        let (confidence, statistical_basis) = confidence::score(strength, &contrast, self.options);
        Recommendation {
            pattern,
            action,
            confidence,
            reasoning: Reasoning {
                primary_factors: factors,
                statistical_basis,
            },
            evidence,
            bias_assessment,
        }
    }
}

/// One independent recommendation source.
pub trait RecommendationGenerator {
    fn name(&self) -> &'static str;

    fn generate(&self, ctx: &GeneratorContext<'_>) -> Result<Vec<Recommendation>, MissingInput>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfidenceDistribution {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
    pub very_high: f64,
}

impl ConfidenceDistribution {
    /// Shares per level; an empty set counts as entirely low.
    pub fn from_levels(levels: &[ConfidenceLevel]) -> Self {
        if levels.is_empty() {
            return Self {
                low: 1.0,
                medium: 0.0,
                high: 0.0,
                very_high: 0.0,
            };
        }
        let share = |level| ratio(levels.iter().filter(|&&l| l == level).count(), levels.len());
        Self {
            low: share(ConfidenceLevel::Low),
            medium: share(ConfidenceLevel::Medium),
            high: share(ConfidenceLevel::High),
            very_high: share(ConfidenceLevel::VeryHigh),
        }
    }

    pub fn total(&self) -> f64 {
        self.low + self.medium + self.high + self.very_high
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanEntry {
    pub pattern: String,
    pub site_count: usize,
    pub frequency: f64,
}

/// Header rule changes for one platform, measured against the headers its
/// signature templates already expect.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformPlan {
    pub platform: String,
    pub sites_analyzed: usize,
    /// Unexpected patterns on at least a quarter of the platform's sites.
    pub add: Vec<PlanEntry>,
    /// Expected patterns found on enough of the platform's sites.
    pub keep: Vec<PlanEntry>,
    /// Expected headers no site of the platform carries.
    pub remove: Vec<String>,
    pub consider: Vec<PlanEntry>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationSummary {
    pub total_recommendations: usize,
    pub confidence_distribution: ConfidenceDistribution,
    pub average_confidence: f64,
    pub suppressed_below_threshold: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationSet {
    pub generated_at: DateTime<Utc>,
    pub filtering: Vec<Recommendation>,
    pub retention: Vec<Recommendation>,
    pub refinement: Vec<Recommendation>,
    pub platform_plans: Vec<PlatformPlan>,
    pub summary: RecommendationSummary,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub degraded: Vec<String>,
}

impl RecommendationSet {
    pub fn iter(&self) -> impl Iterator<Item = &Recommendation> {
        self.filtering
            .iter()
            .chain(&self.retention)
            .chain(&self.refinement)
    }

    pub fn len(&self) -> usize {
        self.filtering.len() + self.retention.len() + self.refinement.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn sort_recommendations(recommendations: &mut [Recommendation]) {
    recommendations.sort_by(|a, b| {
        b.confidence
            .value
            .total_cmp(&a.confidence.value)
            .then_with(|| a.pattern.cmp(&b.pattern))
    });
}

fn platform_plans(ctx: &GeneratorContext<'_>) -> Vec<PlatformPlan> {
    let Some(patterns) = ctx.header_patterns() else {
        return Vec::new();
    };
    let mut plans = Vec::new();
    for (platform, sites) in &ctx.platforms {
        if sites.is_empty() {
            continue;
        }
        let expected = expected_headers(platform);
        let mut plan = PlatformPlan {
            platform: platform.clone(),
            sites_analyzed: sites.len(),
            add: Vec::new(),
            keep: Vec::new(),
            remove: Vec::new(),
            consider: Vec::new(),
        };
        for record in patterns.iter() {
            let site_count = shared_sites(record.sites(), sites);
            let frequency = ratio(site_count, sites.len());
            if frequency < CONSIDER_THRESHOLD {
                continue;
            }
            let entry = PlanEntry {
                pattern: record.pattern().to_string(),
                site_count,
                frequency,
            };
            if expected.contains(record.pattern()) {
                if frequency >= KEEP_THRESHOLD {
                    plan.keep.push(entry);
                }
            } else if frequency >= ADD_THRESHOLD {
                plan.add.push(entry);
            } else {
                plan.consider.push(entry);
            }
        }

        // Raw site headers, so filtered or sub-threshold patterns still count as seen
        let seen: BTreeSet<String> = sites
            .iter()
            .filter_map(|&id| ctx.corpus.site(id))
            .flat_map(|site| site.headers.keys().chain(site.secondary_headers.keys()))
            .map(|name| normalize_key(name))
            .collect();
        plan.remove = expected
            .iter()
            .filter(|name| !seen.contains(**name))
            .map(|name| name.to_string())
            .collect();

        for list in [&mut plan.add, &mut plan.keep, &mut plan.consider] {
            list.sort_by(|a, b| {
                b.frequency
                    .total_cmp(&a.frequency)
                    .then_with(|| a.pattern.cmp(&b.pattern))
            });
        }
        plan.consider.truncate(MAX_CONSIDER);
        plans.push(plan);
    }
    plans
}

/// Run every generator against the aggregated results.
pub fn generate(corpus: &PreprocessedCorpus, options: &AnalysisOptions, results: &AggregatedResults) -> RecommendationSet {
    let ctx = GeneratorContext::new(corpus, options, results);
    info!("Generating recommendations...");

    let generators: [&dyn RecommendationGenerator; 3] =
        [&FilteringGenerator, &RetentionGenerator, &RefinementGenerator];
    let mut degraded = Vec::new();
    let mut suppressed = 0;
    let mut lists: Vec<Vec<Recommendation>> = Vec::with_capacity(generators.len());
    for generator in generators {
        let produced = match generator.generate(&ctx) {
            Ok(recommendations) => recommendations,
            Err(missing) => {
                warn!("{}", missing);
                degraded.push(missing.to_string());
                Vec::new()
            }
        };
        let before = produced.len();
        let mut kept: Vec<Recommendation> = produced
            .into_iter()
            .filter(|r| r.confidence.value >= options.confidence_threshold)
            .collect();
        suppressed += before - kept.len();
        sort_recommendations(&mut kept);
        debug!("{}: {} recommendations kept of {}", generator.name(), kept.len(), before);
        lists.push(kept);
    }
    let refinement = lists.pop().unwrap_or_default();
    let retention = lists.pop().unwrap_or_default();
    let filtering = lists.pop().unwrap_or_default();

    let mut set = RecommendationSet {
        generated_at: Utc::now(),
        filtering,
        retention,
        refinement,
        platform_plans: platform_plans(&ctx),
        summary: RecommendationSummary {
            total_recommendations: 0,
            confidence_distribution: ConfidenceDistribution::from_levels(&[]),
            average_confidence: 0.0,
            suppressed_below_threshold: suppressed,
        },
        degraded,
    };
    let levels: Vec<ConfidenceLevel> = set.iter().map(|r| r.confidence.level).collect();
    let values: Vec<f64> = set.iter().map(|r| r.confidence.value).collect();
    set.summary.total_recommendations = set.len();
    set.summary.confidence_distribution = ConfidenceDistribution::from_levels(&levels);
    set.summary.average_confidence = if values.is_empty() {
        0.0
    } else {
        statistical::mean(&values)
    };

    info!(
        "Recommendations: {} filter, {} retain, {} refine ({} suppressed below {:.2})",
        set.filtering.len(),
        set.retention.len(),
        set.refinement.len(),
        suppressed,
        options.confidence_threshold
    );
    set
}
