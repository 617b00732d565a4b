// Co-occurrence Analyzer - Pairwise header statistics, technology signatures,
// platform-exclusive combinations and mutually exclusive groups
use crate::corpus::{shared_sites, PreprocessedCorpus, SiteId};
use crate::normalize::{normalize_key, UNKNOWN_CMS};
use crate::options::{AnalysisOptions, Thresholds};
use crate::patterns::{AnalysisResult, CorpusAnalyzer, PageKind, PatternAccumulator, SiteVisit};
use crate::stats::{ratio, Contingency};
use crate::technology_signatures::{SignatureTemplate, SiteEvidence, TemplateMatch, TEMPLATES};
use crate::vendor_classifier::VendorCategory;
use fxhash::FxHashMap;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

const MAX_SUPPORTING_SITES: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CooccurrencePair {
    /// Lexicographically first header of the pair.
    pub header1: String,
    pub header2: String,
    /// Sites carrying both headers.
    pub count: usize,
    /// P(header2 | header1).
    pub conditional_probability: f64,
    /// P(header1 | header2).
    pub reverse_conditional_probability: f64,
    pub mutual_information: f64,
}

impl CooccurrencePair {
    pub fn involves(&self, a: &str, b: &str) -> bool {
        (self.header1 == a && self.header2 == b) || (self.header1 == b && self.header2 == a)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TechnologySignature {
    pub name: String,
    pub vendor: String,
    pub category: VendorCategory,
    pub required: Vec<String>,
    pub optional: Vec<String>,
    pub conflicting: Vec<String>,
    pub confidence: f64,
    /// Sites with all required and none of the conflicting evidence.
    pub occurrence_count: usize,
    /// Sites with all required evidence plus some conflicting evidence.
    pub conflicting_sites: usize,
    pub supporting_sites: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformCombination {
    pub platform: String,
    pub header_group: Vec<String>,
    /// Share of the platform's sites carrying the whole group.
    pub frequency: f64,
    /// Share of the group's sites that belong to the platform.
    pub exclusivity: f64,
    pub site_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MutuallyExclusiveGroup {
    pub headers: Vec<String>,
    /// Share of all sites carrying any member.
    pub combined_coverage: f64,
    /// Largest pairwise overlap ratio inside the group.
    pub max_overlap: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CooccurrenceSpecific {
    pub cooccurrences: Vec<CooccurrencePair>,
    pub technology_signatures: Vec<TechnologySignature>,
    pub platform_combinations: Vec<PlatformCombination>,
    pub mutually_exclusive_groups: Vec<MutuallyExclusiveGroup>,
    pub strong_correlations: Vec<CooccurrencePair>,
    /// Distinct co-occurring pairs dropped for insufficient support.
    pub pairs_below_support: usize,
    /// Sites whose eligible header list was cut to the per-site cap.
    pub sites_capped: usize,
    pub malformed_entries: usize,
}

pub struct CooccurrenceAnalyzer;

impl CooccurrenceAnalyzer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CooccurrenceAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

/// Header presence per site, interned for pair counting.
struct HeaderIndex {
    names: Vec<String>,
    sites: Vec<BTreeSet<SiteId>>,
}

impl HeaderIndex {
    fn support(&self, id: usize) -> usize {
        self.sites[id].len()
    }
}

fn count_pairs(site_headers: &[Vec<u32>]) -> FxHashMap<(u32, u32), usize> {
    site_headers
        .par_iter()
        .fold(FxHashMap::default, |mut counts, ids| {
            for (i, &a) in ids.iter().enumerate() {
                for &b in &ids[i + 1..] {
                    *counts.entry((a, b)).or_insert(0) += 1;
                }
            }
            counts
        })
        .reduce(FxHashMap::default, |mut left, right| {
            for (pair, n) in right {
                *left.entry(pair).or_insert(0) += n;
            }
            left
        })
}

fn evaluate_template(
    template: &SignatureTemplate,
    evidence: &[SiteEvidence],
    corpus: &PreprocessedCorpus,
) -> Option<TechnologySignature> {
    let mut fractions = Vec::new();
    let mut supporting = Vec::new();
    let mut conflicting_sites = 0;

    for (id, site) in evidence.iter().enumerate() {
        match template.evaluate(site) {
            TemplateMatch::Absent => {}
            TemplateMatch::Conflicted => conflicting_sites += 1,
            TemplateMatch::Supported(fraction) => {
                fractions.push(fraction);
                if supporting.len() < MAX_SUPPORTING_SITES {
                    supporting.push(corpus.url(id).to_string());
                }
            }
        }
    }

    if fractions.is_empty() && conflicting_sites == 0 {
        return None;
    }

    let confidence = if conflicting_sites > 0 || fractions.is_empty() {
        0.0
    } else {
        (0.6 + 0.4 * statistical::mean(&fractions)).clamp(0.0, 1.0)
    };

    Some(TechnologySignature {
        name: template.name.to_string(),
        vendor: template.vendor.to_string(),
        category: template.category,
        required: SignatureTemplate::labels(template.required),
        optional: SignatureTemplate::labels(template.optional),
        conflicting: SignatureTemplate::labels(template.conflicting),
        confidence,
        occurrence_count: fractions.len(),
        conflicting_sites,
        supporting_sites: supporting,
    })
}

fn technology_signatures(corpus: &PreprocessedCorpus) -> Vec<TechnologySignature> {
    let evidence: Vec<SiteEvidence> = corpus
        .sites()
        .par_iter()
        .map(SiteEvidence::from_record)
        .collect();

    let mut signatures: Vec<TechnologySignature> = TEMPLATES
        .par_iter()
        .filter_map(|template| evaluate_template(template, &evidence, corpus))
        .collect();
    signatures.sort_by(|a, b| {
        b.occurrence_count
            .cmp(&a.occurrence_count)
            .then_with(|| a.name.cmp(&b.name))
    });
    signatures
}

fn platform_combinations(
    index: &HeaderIndex,
    pairs: &[CooccurrencePair],
    corpus: &PreprocessedCorpus,
    thresholds: &Thresholds,
) -> Vec<PlatformCombination> {
    let platforms: Vec<(String, BTreeSet<SiteId>)> = corpus
        .platform_sites()
        .into_iter()
        .filter(|(label, _)| label != UNKNOWN_CMS)
        .collect();
    if platforms.is_empty() {
        return Vec::new();
    }

    let by_name: FxHashMap<&str, usize> = index
        .names
        .iter()
        .enumerate()
        .map(|(i, n)| (n.as_str(), i))
        .collect();

    let mut groups: Vec<(Vec<String>, BTreeSet<SiteId>)> = (0..index.names.len())
        .filter(|&i| index.support(i) >= thresholds.min_pair_support)
        .map(|i| (vec![index.names[i].clone()], index.sites[i].clone()))
        .collect();
    for pair in pairs {
        let (Some(&a), Some(&b)) = (by_name.get(pair.header1.as_str()), by_name.get(pair.header2.as_str())) else {
            continue;
        };
        let sites = index.sites[a].intersection(&index.sites[b]).copied().collect();
        groups.push((vec![pair.header1.clone(), pair.header2.clone()], sites));
    }

    let mut combinations: Vec<PlatformCombination> = groups
        .par_iter()
        .flat_map_iter(|(headers, group_sites)| {
            platforms.iter().filter_map(move |(platform, platform_sites)| {
                let in_platform = shared_sites(group_sites, platform_sites);
                if in_platform == 0 {
                    return None;
                }
                let frequency = ratio(in_platform, platform_sites.len());
                let exclusivity = ratio(in_platform, group_sites.len());
                (frequency >= thresholds.platform_combination_min_frequency
                    && exclusivity >= thresholds.platform_combination_min_exclusivity)
                    .then(|| PlatformCombination {
                        platform: platform.clone(),
                        header_group: headers.clone(),
                        frequency,
                        exclusivity,
                        site_count: in_platform,
                    })
            })
        })
        .collect();

    combinations.sort_by(|a, b| {
        a.platform
            .cmp(&b.platform)
            .then_with(|| b.exclusivity.total_cmp(&a.exclusivity))
            .then_with(|| b.frequency.total_cmp(&a.frequency))
            .then_with(|| a.header_group.cmp(&b.header_group))
    });
    combinations
}

fn mutually_exclusive_groups(
    index: &HeaderIndex,
    total_sites: usize,
    thresholds: &Thresholds,
) -> Vec<MutuallyExclusiveGroup> {
    let min_support = ((thresholds.mutual_exclusion_min_frequency * total_sites as f64).ceil() as usize).max(1);
    let mut candidates: Vec<usize> = (0..index.names.len())
        .filter(|&i| index.support(i) >= min_support)
        .collect();
    candidates.sort_by(|&a, &b| {
        index
            .support(b)
            .cmp(&index.support(a))
            .then_with(|| index.names[a].cmp(&index.names[b]))
    });
    candidates.truncate(thresholds.mutual_exclusion_candidate_limit);
    if candidates.len() < 2 {
        return Vec::new();
    }

    let n = candidates.len();
    let overlap: Vec<Vec<f64>> = (0..n)
        .into_par_iter()
        .map(|i| {
            (0..n)
                .map(|j| {
                    let (a, b) = (candidates[i], candidates[j]);
                    let both = shared_sites(&index.sites[a], &index.sites[b]);
                    ratio(both, index.support(a).min(index.support(b)))
                })
                .collect()
        })
        .collect();
    let exclusive = |i: usize, j: usize| overlap[i][j] <= thresholds.mutual_exclusion_max_overlap;

    let mut seen: BTreeSet<Vec<usize>> = BTreeSet::new();
    let mut groups = Vec::new();
    for anchor in 0..n {
        let mut members = vec![anchor];
        for other in 0..n {
            if other != anchor && members.iter().all(|&m| exclusive(m, other)) {
                members.push(other);
            }
        }
        if members.len() < 2 {
            continue;
        }
        members.sort_unstable();
        if !seen.insert(members.clone()) {
            continue;
        }

        let mut union: BTreeSet<SiteId> = BTreeSet::new();
        let mut max_overlap: f64 = 0.0;
        for (k, &i) in members.iter().enumerate() {
            union.extend(index.sites[candidates[i]].iter().copied());
            for &j in &members[k + 1..] {
                max_overlap = max_overlap.max(overlap[i][j]);
            }
        }
        let mut headers: Vec<String> = members.iter().map(|&i| index.names[candidates[i]].clone()).collect();
        headers.sort();
        groups.push(MutuallyExclusiveGroup {
            headers,
            combined_coverage: ratio(union.len(), total_sites),
            max_overlap,
        });
    }

    groups.sort_by(|a, b| {
        b.headers
            .len()
            .cmp(&a.headers.len())
            .then_with(|| b.combined_coverage.total_cmp(&a.combined_coverage))
            .then_with(|| a.headers.cmp(&b.headers))
    });
    groups
}

impl CorpusAnalyzer for CooccurrenceAnalyzer {
    type Specific = CooccurrenceSpecific;

    fn name(&self) -> &'static str {
        "cooccurrence"
    }

    fn analyze(&self, corpus: &PreprocessedCorpus, options: &AnalysisOptions) -> AnalysisResult<CooccurrenceSpecific> {
        let mut stats = CooccurrenceSpecific::default();
        if corpus.is_empty() {
            debug!("Co-occurrence analysis skipped: empty corpus");
            return AnalysisResult::empty(self.name(), 0, options, stats);
        }
        let thresholds = &options.thresholds;
        let total_sites = corpus.total_sites();
        info!("Analyzing header co-occurrence across {} sites...", total_sites);

        // Single pass: presence per site, deduplicated across primary and secondary fetches
        let mut acc = PatternAccumulator::new(options);
        let mut presence: BTreeMap<String, BTreeSet<SiteId>> = BTreeMap::new();
        let mut per_site: Vec<BTreeSet<String>> = Vec::with_capacity(total_sites);
        for (id, site) in corpus.iter() {
            let mut visit = SiteVisit::new(id);
            let mut keys = BTreeSet::new();
            let pages = [(&site.headers, PageKind::Primary), (&site.secondary_headers, PageKind::Secondary)];
            for (map, page) in pages {
                for raw_name in map.keys() {
                    let key = normalize_key(raw_name);
                    if key.is_empty() {
                        stats.malformed_entries += 1;
                        continue;
                    }
                    if options.skips_header(&key) {
                        continue;
                    }
                    acc.record(&mut visit, &key, None, page);
                    presence.entry(key.clone()).or_default().insert(id);
                    keys.insert(key);
                }
            }
            per_site.push(keys);
        }

        let index = HeaderIndex {
            names: presence.keys().cloned().collect(),
            sites: presence.into_values().collect(),
        };
        let ids: FxHashMap<&str, u32> = index
            .names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.as_str(), i as u32))
            .collect();

        // A pair can never outnumber either member, so rarer headers are skipped up front
        let cap = thresholds.max_pair_headers_per_site;
        let site_headers: Vec<Vec<u32>> = per_site
            .iter()
            .map(|keys| {
                let mut eligible: Vec<u32> = keys
                    .iter()
                    .map(|k| ids[k.as_str()])
                    .filter(|&i| index.support(i as usize) >= thresholds.min_pair_support)
                    .collect();
                if eligible.len() > cap {
                    stats.sites_capped += 1;
                    eligible.sort_by(|&a, &b| {
                        index
                            .support(b as usize)
                            .cmp(&index.support(a as usize))
                            .then_with(|| a.cmp(&b))
                    });
                    eligible.truncate(cap);
                    eligible.sort_unstable();
                }
                eligible
            })
            .collect();

        let pair_counts = count_pairs(&site_headers);
        let mut cooccurrences: Vec<CooccurrencePair> = pair_counts
            .par_iter()
            .filter(|(_, &count)| count >= thresholds.min_pair_support)
            .map(|(&(a, b), &count)| {
                let (a, b) = (a as usize, b as usize);
                let (support_a, support_b) = (index.support(a), index.support(b));
                CooccurrencePair {
                    header1: index.names[a].clone(),
                    header2: index.names[b].clone(),
                    count,
                    conditional_probability: ratio(count, support_a),
                    reverse_conditional_probability: ratio(count, support_b),
                    mutual_information: Contingency::from_counts(support_a, support_b, count, total_sites)
                        .mutual_information(),
                }
            })
            .collect();
        stats.pairs_below_support = pair_counts.len() - cooccurrences.len();
        cooccurrences.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| b.mutual_information.total_cmp(&a.mutual_information))
                .then_with(|| (&a.header1, &a.header2).cmp(&(&b.header1, &b.header2)))
        });
        debug!(
            "{} pairs retained, {} below support {}",
            cooccurrences.len(),
            stats.pairs_below_support,
            thresholds.min_pair_support
        );

        stats.strong_correlations = cooccurrences
            .iter()
            .filter(|p| {
                p.conditional_probability.min(p.reverse_conditional_probability)
                    >= thresholds.strong_correlation_threshold
            })
            .cloned()
            .collect();
        stats.technology_signatures = technology_signatures(corpus);
        stats.platform_combinations = platform_combinations(&index, &cooccurrences, corpus, thresholds);
        stats.mutually_exclusive_groups = mutually_exclusive_groups(&index, total_sites, thresholds);
        stats.cooccurrences = cooccurrences;

        info!(
            "Co-occurrence analysis: {} pairs, {} signatures, {} combinations, {} exclusive groups",
            stats.cooccurrences.len(),
            stats.technology_signatures.len(),
            stats.platform_combinations.len(),
            stats.mutually_exclusive_groups.len()
        );

        let patterns = acc.finalize(total_sites, options.min_occurrences);
        AnalysisResult::new(self.name(), patterns, total_sites, options, stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::SiteRecord;
    use crate::fixtures::wordpress_drupal_corpus;

    fn options(min_pair_support: usize) -> AnalysisOptions {
        let mut options = AnalysisOptions::default();
        options.thresholds.min_pair_support = min_pair_support;
        options
    }

    fn find<'a>(pairs: &'a [CooccurrencePair], a: &str, b: &str) -> Option<&'a CooccurrencePair> {
        pairs.iter().find(|p| p.involves(a, b))
    }

    #[test]
    fn test_wordpress_drupal_scenario() {
        let result = CooccurrenceAnalyzer::new().analyze(&wordpress_drupal_corpus(), &options(2));
        let specific = result.specific();

        let pair = find(&specific.cooccurrences, "x-wp-total", "x-pingback").unwrap();
        assert_eq!(pair.count, 2);
        assert_eq!(pair.conditional_probability, 1.0);
        assert_eq!(pair.reverse_conditional_probability, 1.0);
        assert!(pair.mutual_information > 0.0);

        let wordpress = specific
            .technology_signatures
            .iter()
            .find(|s| s.name == "WordPress")
            .unwrap();
        assert_eq!(wordpress.occurrence_count, 2);
        assert!(wordpress.confidence >= 0.6);

        assert!(specific.mutually_exclusive_groups.iter().any(|g| {
            g.headers.contains(&"x-wp-total".to_string()) && g.headers.contains(&"x-drupal-cache".to_string())
        }));
        assert!(find(&specific.strong_correlations, "x-wp-total", "x-pingback").is_some());
    }

    #[test]
    fn test_pairs_below_support_never_reported() {
        let corpus = wordpress_drupal_corpus();
        let result = CooccurrenceAnalyzer::new().analyze(&corpus, &AnalysisOptions::default());
        assert!(result.specific().cooccurrences.is_empty());
        assert!(result.specific().strong_correlations.is_empty());

        for support in 1..=4 {
            let result = CooccurrenceAnalyzer::new().analyze(&corpus, &options(support));
            assert!(result.specific().cooccurrences.iter().all(|p| p.count >= support));
        }
    }

    #[test]
    fn test_always_together_headers() {
        let mut records = Vec::new();
        for i in 0..10 {
            let mut site = SiteRecord::new(format!("https://s{}.example", i)).with_header("server", "nginx");
            if i < 4 {
                site = site.with_header("x-shopid", "1").with_header("x-shardid", "2");
            }
            records.push(site);
        }
        let corpus = PreprocessedCorpus::new(records);
        let result = CooccurrenceAnalyzer::new().analyze(&corpus, &AnalysisOptions::default());
        let pair = find(&result.specific().cooccurrences, "x-shopid", "x-shardid").unwrap();
        assert_eq!(pair.count, 4);
        assert_eq!(pair.conditional_probability, 1.0);
        assert!(pair.mutual_information > 0.0);

        // server is on every site, so it carries no information about x-shopid
        let with_server = find(&result.specific().cooccurrences, "server", "x-shopid").unwrap();
        assert!(with_server.mutual_information.abs() < 1e-12);
    }

    #[test]
    fn test_conflicting_evidence_zeroes_confidence() {
        let corpus = PreprocessedCorpus::new(vec![
            SiteRecord::new("https://a.example").with_header("x-pingback", "/xmlrpc.php"),
            SiteRecord::new("https://b.example")
                .with_header("x-pingback", "/xmlrpc.php")
                .with_header("x-drupal-cache", "MISS"),
        ]);
        let result = CooccurrenceAnalyzer::new().analyze(&corpus, &options(2));
        let wordpress = result
            .specific()
            .technology_signatures
            .iter()
            .find(|s| s.name == "WordPress")
            .unwrap();
        assert_eq!(wordpress.occurrence_count, 1);
        assert_eq!(wordpress.conflicting_sites, 1);
        assert_eq!(wordpress.confidence, 0.0);
    }

    #[test]
    fn test_platform_combinations() {
        let result = CooccurrenceAnalyzer::new().analyze(&wordpress_drupal_corpus(), &options(2));
        let combos = &result.specific().platform_combinations;
        let pingback = combos
            .iter()
            .find(|c| c.header_group == vec!["x-pingback".to_string()])
            .unwrap();
        assert_eq!(pingback.platform, "WordPress");
        assert_eq!(pingback.frequency, 1.0);
        assert_eq!(pingback.exclusivity, 1.0);
        // server is spread across both platforms
        assert!(combos.iter().all(|c| c.header_group != vec!["server".to_string()]));
        assert!(combos.iter().all(|c| c.platform != UNKNOWN_CMS));
    }

    #[test]
    fn test_per_site_header_cap() {
        let mut site = SiteRecord::new("https://wide.example");
        for i in 0..40 {
            site = site.with_header(&format!("x-h{:02}", i), "v");
        }
        let twin = SiteRecord {
            url: "https://wide-twin.example".into(),
            ..site.clone()
        };
        let corpus = PreprocessedCorpus::new(vec![site, twin]);
        let mut opts = options(2);
        opts.thresholds.max_pair_headers_per_site = 10;
        let result = CooccurrenceAnalyzer::new().analyze(&corpus, &opts);
        assert_eq!(result.specific().sites_capped, 2);
        assert_eq!(result.specific().cooccurrences.len(), 45);
    }

    #[test]
    fn test_empty_and_single_site() {
        let empty = CooccurrenceAnalyzer::new().analyze(&PreprocessedCorpus::default(), &AnalysisOptions::default());
        assert!(empty.patterns().is_empty());
        assert!(empty.specific().cooccurrences.is_empty());
        assert!(empty.specific().technology_signatures.is_empty());

        let single = PreprocessedCorpus::new(vec![SiteRecord::new("https://a.example")
            .with_header("x-pingback", "")
            .with_header("x-wp-total", "1")]);
        let result = CooccurrenceAnalyzer::new().analyze(&single, &AnalysisOptions::default());
        assert!(result.specific().cooccurrences.is_empty());
        assert!(result.specific().mutually_exclusive_groups.is_empty());
    }
}
