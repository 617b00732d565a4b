// Platform Signature Analyzer - Fuses header, meta and script evidence into
// per-platform signatures with conflict tracking and rankings
use crate::cooccurrence::CooccurrenceSpecific;
use crate::corpus::{shared_sites, PreprocessedCorpus, SiteId};
use crate::normalize::UNKNOWN_CMS;
use crate::options::AnalysisOptions;
use crate::patterns::{AnalysisResult, FinalizedPatterns, PatternMetadata, PatternRecord};
use crate::stats::ratio;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

const MAX_CONFLICT_EXAMPLES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Header,
    Meta,
    Script,
}

impl Dimension {
    pub const ALL: [Dimension; 3] = [Dimension::Header, Dimension::Meta, Dimension::Script];

    pub fn prefix(self) -> &'static str {
        match self {
            Dimension::Header => "header",
            Dimension::Meta => "meta",
            Dimension::Script => "script",
        }
    }

    fn of_key(key: &str) -> Option<Self> {
        let (prefix, _) = key.split_once(':')?;
        Self::ALL.into_iter().find(|d| d.prefix() == prefix)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectionMethod {
    SingleDimension,
    Correlative,
}

/// Pattern collections per evidence dimension. Missing dimensions are `None`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DimensionInputs<'a> {
    pub header: Option<&'a FinalizedPatterns>,
    pub meta: Option<&'a FinalizedPatterns>,
    pub script: Option<&'a FinalizedPatterns>,
}

impl<'a> DimensionInputs<'a> {
    fn present(&self) -> Vec<(&'static str, &'a FinalizedPatterns)> {
        [
            (Dimension::Header, self.header),
            (Dimension::Meta, self.meta),
            (Dimension::Script, self.script),
        ]
        .into_iter()
        .filter_map(|(dim, patterns)| patterns.map(|p| (dim.prefix(), p)))
        .collect()
    }

    fn missing(&self) -> Vec<Dimension> {
        let mut missing = Vec::new();
        if self.header.is_none() {
            missing.push(Dimension::Header);
        }
        if self.meta.is_none() {
            missing.push(Dimension::Meta);
        }
        if self.script.is_none() {
            missing.push(Dimension::Script);
        }
        missing
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureEvidence {
    pub pattern: String,
    pub dimension: Dimension,
    /// Share of the pattern's sites belonging to the platform.
    pub specificity: f64,
    /// Share of the platform's sites carrying the pattern.
    pub platform_frequency: f64,
    pub discriminative_score: f64,
    #[serde(skip)]
    sites: BTreeSet<SiteId>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformSignature {
    pub platform: String,
    pub detection_method: DetectionMethod,
    pub dimensions: Vec<Dimension>,
    pub evidence: Vec<SignatureEvidence>,
    pub evidence_count: usize,
    pub base_confidence: f64,
    pub correlation_boost: f64,
    pub confidence: f64,
    /// Share of the platform's sites carrying at least one evidence pattern.
    pub site_coverage: f64,
    /// Header groups the co-occurrence stage found exclusive to this platform.
    pub exclusive_header_groups: Vec<Vec<String>>,
    pub composite_score: f64,
    pub rank: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformConflict {
    pub platform_a: String,
    pub platform_b: String,
    /// Sites carrying evidence for both platforms.
    pub site_count: usize,
    pub example_sites: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossDimensionalMetrics {
    pub total_platforms: usize,
    pub multi_dimensional_fraction: f64,
    pub average_correlation_boost: f64,
    /// Among sites with evidence from two or more dimensions, the share whose
    /// dimensions point to a common platform.
    pub dimension_agreement_rate: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformSignatureSpecific {
    /// Ranked best first.
    pub signatures: Vec<PlatformSignature>,
    pub conflict_matrix: Vec<PlatformConflict>,
    pub cross_dimensional: CrossDimensionalMetrics,
}

pub struct PlatformSignatureAnalyzer;

impl PlatformSignatureAnalyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn name(&self) -> &'static str {
        "platform-signature"
    }

    pub fn analyze(
        &self,
        corpus: &PreprocessedCorpus,
        inputs: DimensionInputs<'_>,
        cooccurrence: Option<&AnalysisResult<CooccurrenceSpecific>>,
        options: &AnalysisOptions,
    ) -> AnalysisResult<PlatformSignatureSpecific> {
        let mut degraded: Vec<String> = inputs
            .missing()
            .into_iter()
            .map(|d| format!("{} patterns unavailable", d.prefix()))
            .collect();
        if cooccurrence.is_none() {
            degraded.push("co-occurrence result unavailable".to_string());
        }
        for note in &degraded {
            warn!("Platform signatures degraded: {}", note);
        }

        let parts = inputs.present();
        if corpus.is_empty() || parts.is_empty() {
            debug!("Platform signature analysis skipped: no input");
            return AnalysisResult::empty(
                self.name(),
                corpus.total_sites(),
                options,
                PlatformSignatureSpecific::default(),
            )
            .with_degraded(degraded);
        }
        info!("Fusing {} evidence dimensions into platform signatures...", parts.len());

        let platforms: BTreeMap<String, BTreeSet<SiteId>> = corpus
            .platform_sites()
            .into_iter()
            .filter(|(label, _)| label != UNKNOWN_CMS)
            .collect();

        let merged = FinalizedPatterns::merge_prefixed(&parts);
        let patterns = merged.annotate(|record| annotate_platforms(record, &platforms));

        let thresholds = &options.thresholds;
        let mut evidence: BTreeMap<String, Vec<SignatureEvidence>> = BTreeMap::new();
        for record in patterns.iter() {
            let Some(dimension) = Dimension::of_key(record.pattern()) else {
                continue;
            };
            let Some(specificity) = record.metadata().platform_specificity.as_ref() else {
                continue;
            };
            for (platform, &share) in specificity {
                let platform_sites = &platforms[platform];
                let in_platform = shared_sites(record.sites(), platform_sites);
                let platform_frequency = ratio(in_platform, platform_sites.len());
                if share < thresholds.signature_min_specificity
                    || platform_frequency < thresholds.signature_min_platform_frequency
                {
                    continue;
                }
                evidence.entry(platform.clone()).or_default().push(SignatureEvidence {
                    pattern: record.pattern().to_string(),
                    dimension,
                    specificity: share,
                    platform_frequency,
                    discriminative_score: share * platform_frequency,
                    sites: record.sites().clone(),
                });
            }
        }

        let mut signatures: Vec<PlatformSignature> = evidence
            .into_par_iter()
            .map(|(platform, items)| {
                let combos = cooccurrence
                    .map(|c| {
                        c.specific()
                            .platform_combinations
                            .iter()
                            .filter(|pc| pc.platform == platform)
                            .map(|pc| pc.header_group.clone())
                            .collect()
                    })
                    .unwrap_or_default();
                build_signature(platform.clone(), items, &platforms[&platform], combos, options)
            })
            .collect();
        rank(&mut signatures);

        let conflict_matrix = conflict_matrix(&signatures, corpus);
        let cross_dimensional = cross_dimensional_metrics(&signatures);
        for signature in &signatures {
            debug!(
                "#{} {}: {:?} confidence {:.2} over {} evidence patterns",
                signature.rank,
                signature.platform,
                signature.detection_method,
                signature.confidence,
                signature.evidence_count
            );
        }
        info!(
            "Platform signatures: {} platforms, {} conflicting pairs",
            signatures.len(),
            conflict_matrix.len()
        );

        let specific = PlatformSignatureSpecific {
            signatures,
            conflict_matrix,
            cross_dimensional,
        };
        AnalysisResult::new(self.name(), patterns, corpus.total_sites(), options, specific).with_degraded(degraded)
    }
}

impl Default for PlatformSignatureAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

fn annotate_platforms(record: &PatternRecord, platforms: &BTreeMap<String, BTreeSet<SiteId>>) -> PatternMetadata {
    let mut specificity = BTreeMap::new();
    let mut best: f64 = 0.0;
    for (platform, sites) in platforms {
        let in_platform = shared_sites(record.sites(), sites);
        if in_platform == 0 {
            continue;
        }
        let share = ratio(in_platform, record.site_count());
        best = best.max(share * ratio(in_platform, sites.len()));
        specificity.insert(platform.clone(), share);
    }
    PatternMetadata {
        discriminative_score: Some(best),
        platform_specificity: Some(specificity),
        ..record.metadata().clone()
    }
}

fn build_signature(
    platform: String,
    mut evidence: Vec<SignatureEvidence>,
    platform_sites: &BTreeSet<SiteId>,
    exclusive_header_groups: Vec<Vec<String>>,
    options: &AnalysisOptions,
) -> PlatformSignature {
    evidence.sort_by(|a, b| {
        b.discriminative_score
            .total_cmp(&a.discriminative_score)
            .then_with(|| a.pattern.cmp(&b.pattern))
    });

    let mut best_per_dimension: BTreeMap<Dimension, f64> = BTreeMap::new();
    let mut covered: BTreeSet<SiteId> = BTreeSet::new();
    for item in &evidence {
        let best = best_per_dimension.entry(item.dimension).or_insert(0.0);
        *best = best.max(item.discriminative_score);
        covered.extend(item.sites.intersection(platform_sites).copied());
    }
    let dimensions: Vec<Dimension> = best_per_dimension.keys().copied().collect();
    let best_scores: Vec<f64> = best_per_dimension.values().copied().collect();

    let base_confidence = statistical::mean(&best_scores);
    let detection_method = if dimensions.len() > 1 {
        DetectionMethod::Correlative
    } else {
        DetectionMethod::SingleDimension
    };
    let correlation_boost = match detection_method {
        DetectionMethod::SingleDimension => 0.0,
        DetectionMethod::Correlative => {
            let specificities: Vec<f64> = evidence.iter().map(|e| e.specificity).collect();
            options.thresholds.correlation_boost_per_dimension
                * (dimensions.len() - 1) as f64
                * statistical::mean(&specificities)
        }
    };
    let confidence = (base_confidence + correlation_boost).clamp(0.0, 1.0);
    let site_coverage = ratio(covered.len(), platform_sites.len());
    let composite_score = 0.5 * confidence + 0.3 * (dimensions.len() as f64 / 3.0) + 0.2 * site_coverage;

    PlatformSignature {
        platform,
        detection_method,
        evidence_count: evidence.len(),
        dimensions,
        evidence,
        base_confidence,
        correlation_boost,
        confidence,
        site_coverage,
        exclusive_header_groups,
        composite_score,
        rank: 0,
    }
}

fn rank(signatures: &mut [PlatformSignature]) {
    signatures.sort_by(|a, b| {
        b.composite_score
            .total_cmp(&a.composite_score)
            .then_with(|| b.evidence_count.cmp(&a.evidence_count))
            .then_with(|| a.platform.cmp(&b.platform))
    });
    for (i, signature) in signatures.iter_mut().enumerate() {
        signature.rank = i + 1;
    }
}

fn evidence_sites(signature: &PlatformSignature) -> BTreeSet<SiteId> {
    signature
        .evidence
        .iter()
        .flat_map(|e| e.sites.iter().copied())
        .collect()
}

fn conflict_matrix(signatures: &[PlatformSignature], corpus: &PreprocessedCorpus) -> Vec<PlatformConflict> {
    let mut ordered: Vec<(&str, BTreeSet<SiteId>)> = signatures
        .iter()
        .map(|s| (s.platform.as_str(), evidence_sites(s)))
        .collect();
    ordered.sort_by(|a, b| a.0.cmp(b.0));

    let mut conflicts = Vec::new();
    for (i, (a, sites_a)) in ordered.iter().enumerate() {
        for (b, sites_b) in &ordered[i + 1..] {
            let shared: Vec<SiteId> = sites_a.intersection(sites_b).copied().collect();
            if shared.is_empty() {
                continue;
            }
            conflicts.push(PlatformConflict {
                platform_a: a.to_string(),
                platform_b: b.to_string(),
                site_count: shared.len(),
                example_sites: shared
                    .iter()
                    .take(MAX_CONFLICT_EXAMPLES)
                    .map(|&id| corpus.url(id).to_string())
                    .collect(),
            });
        }
    }
    conflicts.sort_by(|x, y| {
        y.site_count
            .cmp(&x.site_count)
            .then_with(|| (&x.platform_a, &x.platform_b).cmp(&(&y.platform_a, &y.platform_b)))
    });
    conflicts
}

fn cross_dimensional_metrics(signatures: &[PlatformSignature]) -> CrossDimensionalMetrics {
    if signatures.is_empty() {
        return CrossDimensionalMetrics::default();
    }
    let correlative = signatures
        .iter()
        .filter(|s| s.detection_method == DetectionMethod::Correlative)
        .count();
    let boosts: Vec<f64> = signatures.iter().map(|s| s.correlation_boost).collect();

    // site -> dimension -> platforms evidenced there
    let mut per_site: BTreeMap<SiteId, BTreeMap<Dimension, BTreeSet<&str>>> = BTreeMap::new();
    for signature in signatures {
        for item in &signature.evidence {
            for &site in &item.sites {
                per_site
                    .entry(site)
                    .or_default()
                    .entry(item.dimension)
                    .or_default()
                    .insert(signature.platform.as_str());
            }
        }
    }
    let mut multi = 0;
    let mut agreeing = 0;
    for dims in per_site.values().filter(|d| d.len() > 1) {
        multi += 1;
        let mut sets = dims.values();
        let Some(first) = sets.next() else {
            continue;
        };
        let common = sets.fold(first.clone(), |acc, s| acc.intersection(s).copied().collect());
        if !common.is_empty() {
            agreeing += 1;
        }
    }

    CrossDimensionalMetrics {
        total_platforms: signatures.len(),
        multi_dimensional_fraction: ratio(correlative, signatures.len()),
        average_correlation_boost: statistical::mean(&boosts),
        dimension_agreement_rate: ratio(agreeing, multi),
    }
}
