// Confidence scoring: statistical bounds when the sample allows, heuristics otherwise
use crate::corpus::{shared_sites, SiteId};
use crate::options::AnalysisOptions;
use crate::patterns::PatternRecord;
use crate::stats::{binomial_test, margin_of_error, ratio, POWER_THRESHOLD, SIGNIFICANCE_LEVEL};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
    VeryHigh,
}

impl ConfidenceLevel {
    pub fn from_value(value: f64) -> Self {
        if value < 0.4 {
            ConfidenceLevel::Low
        } else if value < 0.65 {
            ConfidenceLevel::Medium
        } else if value < 0.85 {
            ConfidenceLevel::High
        } else {
            ConfidenceLevel::VeryHigh
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConfidenceSource {
    StatisticalTest,
    Heuristic,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfidenceScore {
    pub value: f64,
    pub level: ConfidenceLevel,
    pub source: ConfidenceSource,
    /// Margin of error for statistical scores, heuristic spread otherwise.
    pub uncertainty: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticalBasis {
    pub test: String,
    pub sample_size: usize,
    pub observed_frequency: f64,
    pub baseline_frequency: f64,
    pub p_value: f64,
    pub significance_level: f64,
    pub power_threshold: f64,
    pub observed_power: f64,
    pub margin_of_error: f64,
    pub significant: bool,
}

/// Frequency of a pattern inside its strongest labeled platform versus the
/// rest of the corpus. `platforms` holds the labeled groups only.
#[derive(Debug, Clone, PartialEq)]
pub struct PlatformContrast {
    pub platform: Option<String>,
    pub observed: f64,
    pub baseline: f64,
    pub sample_size: usize,
}

impl PlatformContrast {
    pub fn of(record: &PatternRecord, total: usize, platforms: &BTreeMap<String, BTreeSet<SiteId>>) -> Self {
        let overall = ratio(record.site_count(), total);
        let best = platforms
            .iter()
            .map(|(label, sites)| {
                let inside = shared_sites(record.sites(), sites);
                (label, inside, sites.len())
            })
            .filter(|(_, inside, _)| *inside > 0)
            .max_by(|a, b| {
                ratio(a.1, a.2)
                    .total_cmp(&ratio(b.1, b.2))
                    .then_with(|| b.0.cmp(&a.0))
            });

        match best {
            Some((platform, inside, size)) => {
                let rest = total - size;
                let baseline = if rest == 0 {
                    overall
                } else {
                    ratio(record.site_count() - inside, rest)
                };
                Self {
                    platform: Some(platform.clone()),
                    observed: ratio(inside, size),
                    baseline,
                    sample_size: size,
                }
            }
            None => Self {
                platform: None,
                observed: overall,
                baseline: overall,
                sample_size: total,
            },
        }
    }
}

/// Scale `strength` by the precision the sample affords.
pub fn score(strength: f64, contrast: &PlatformContrast, options: &AnalysisOptions) -> (ConfidenceScore, StatisticalBasis) {
    let n = contrast.sample_size;
    let test = binomial_test(contrast.observed, contrast.baseline, n);
    let moe = margin_of_error(contrast.observed, n);

    let (source, uncertainty) = if n >= options.thresholds.min_sample_size {
        (ConfidenceSource::StatisticalTest, moe)
    } else {
        (ConfidenceSource::Heuristic, (1.0 / ((n + 1) as f64).sqrt()).min(0.5))
    };
    let value = (strength.clamp(0.0, 1.0) * (1.0 - uncertainty)).clamp(0.0, 1.0);

    let confidence = ConfidenceScore {
        value,
        level: ConfidenceLevel::from_value(value),
        source,
        uncertainty,
    };
    let basis = StatisticalBasis {
        test: "binomial".to_string(),
        sample_size: n,
        observed_frequency: contrast.observed,
        baseline_frequency: contrast.baseline,
        p_value: test.p_value,
        significance_level: SIGNIFICANCE_LEVEL,
        power_threshold: POWER_THRESHOLD,
        observed_power: test.power,
        margin_of_error: moe,
        significant: test.significant,
    };
    (confidence, basis)
}
