// Header Analyzer - Counts HTTP header names once per site
use crate::corpus::{PreprocessedCorpus, ValueMap};
use crate::normalize::normalize_key;
use crate::options::AnalysisOptions;
use crate::patterns::{AnalysisResult, CorpusAnalyzer, PageKind, PatternAccumulator, SiteVisit};
use crate::semantic_classifier::SECURITY_HEADERS;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderSpecific {
    /// Retained headers that are standard security controls.
    pub security_headers: BTreeSet<String>,
    /// Retained non-standard `x-` headers.
    pub custom_headers: BTreeSet<String>,
    pub skipped_by_semantic_filter: usize,
    pub malformed_entries: usize,
    /// Sites that had headers from a secondary fetch.
    pub sites_with_secondary_data: usize,
}

pub struct HeaderAnalyzer;

impl HeaderAnalyzer {
    pub fn new() -> Self {
        Self
    }

    fn visit_map(
        acc: &mut PatternAccumulator,
        visit: &mut SiteVisit,
        headers: &ValueMap,
        page: PageKind,
        options: &AnalysisOptions,
        stats: &mut HeaderSpecific,
    ) {
        for (raw_name, values) in headers {
            let key = normalize_key(raw_name);
            if key.is_empty() {
                stats.malformed_entries += 1;
                continue;
            }
            if options.skips_header(&key) {
                stats.skipped_by_semantic_filter += 1;
                continue;
            }
            if values.is_empty() {
                acc.record(visit, &key, None, page);
                continue;
            }
            for value in values {
                acc.record(visit, &key, Some(value), page);
            }
        }
    }
}

impl Default for HeaderAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl CorpusAnalyzer for HeaderAnalyzer {
    type Specific = HeaderSpecific;

    fn name(&self) -> &'static str {
        "header"
    }

    fn analyze(
        &self,
        corpus: &PreprocessedCorpus,
        options: &AnalysisOptions,
    ) -> AnalysisResult<HeaderSpecific> {
        let mut stats = HeaderSpecific::default();
        if corpus.is_empty() {
            debug!("Header analysis skipped: empty corpus");
            return AnalysisResult::empty(self.name(), 0, options, stats);
        }
        info!("Analyzing headers across {} sites...", corpus.total_sites());

        let mut acc = PatternAccumulator::new(options);
        for (id, site) in corpus.iter() {
            let mut visit = SiteVisit::new(id);
            Self::visit_map(&mut acc, &mut visit, &site.headers, PageKind::Primary, options, &mut stats);
            if !site.secondary_headers.is_empty() {
                stats.sites_with_secondary_data += 1;
                Self::visit_map(
                    &mut acc,
                    &mut visit,
                    &site.secondary_headers,
                    PageKind::Secondary,
                    options,
                    &mut stats,
                );
            }
        }

        let patterns = acc.finalize(corpus.total_sites(), options.min_occurrences);
        for key in patterns.keys() {
            if SECURITY_HEADERS.contains(&key) {
                stats.security_headers.insert(key.to_string());
            } else if key.starts_with("x-") {
                stats.custom_headers.insert(key.to_string());
            }
        }

        info!(
            "Header analysis: {} headers found, {} retained",
            patterns.total_found(),
            patterns.len()
        );
        AnalysisResult::new(self.name(), patterns, corpus.total_sites(), options, stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::SiteRecord;

    fn corpus() -> PreprocessedCorpus {
        PreprocessedCorpus::new(vec![
            SiteRecord::new("https://a.example")
                .with_header("X-Powered-By", "PHP/8.1")
                .with_header("x-powered-by", "PHP/8.2")
                .with_header("Cache-Control", "no-cache")
                .with_header("Strict-Transport-Security", "max-age=1"),
            SiteRecord::new("https://b.example")
                .with_header("x-powered-by", "Express")
                .with_header("cache-control", "max-age=0")
                .with_header("Strict-Transport-Security", "max-age=1"),
            SiteRecord::new("https://c.example")
                .with_header("server", "nginx")
                .with_secondary_header("x-powered-by", "PHP/8.1"),
        ])
    }

    #[test]
    fn test_counts_each_site_once() {
        let options = AnalysisOptions::default().with_min_occurrences(1);
        let result = HeaderAnalyzer::new().analyze(&corpus(), &options);
        let powered = result.patterns().get("x-powered-by").unwrap();
        assert_eq!(powered.site_count(), 3);
        assert_eq!(powered.sites().len(), 3);
        assert!((powered.frequency() - 1.0).abs() < 1e-9);
        assert_eq!(result.total_sites(), 3);
    }

    #[test]
    fn test_semantic_filtering_drops_generic_headers() {
        let options = AnalysisOptions::default().with_min_occurrences(1);
        let result = HeaderAnalyzer::new().analyze(&corpus(), &options);
        assert!(!result.patterns().contains("cache-control"));
        assert_eq!(result.specific().skipped_by_semantic_filter, 2);

        let unfiltered = HeaderAnalyzer::new()
            .analyze(&corpus(), &options.clone().with_semantic_filtering(false));
        assert_eq!(unfiltered.patterns().get("cache-control").unwrap().site_count(), 2);
    }

    #[test]
    fn test_user_skip_list_drops_named_headers() {
        let options = AnalysisOptions::default()
            .with_min_occurrences(1)
            .with_extra_skip_headers(["Strict-Transport-Security"]);
        let result = HeaderAnalyzer::new().analyze(&corpus(), &options);
        assert!(!result.patterns().contains("strict-transport-security"));
        assert!(!result.patterns().contains("cache-control"));
        assert_eq!(result.specific().skipped_by_semantic_filter, 4);

        let replaced = options.with_skip_headers(["x-powered-by"]);
        let result = HeaderAnalyzer::new().analyze(&corpus(), &replaced);
        assert!(!result.patterns().contains("x-powered-by"));
        assert_eq!(result.patterns().get("cache-control").unwrap().site_count(), 2);
    }

    #[test]
    fn test_min_occurrences_filter() {
        let options = AnalysisOptions::default().with_min_occurrences(2);
        let result = HeaderAnalyzer::new().analyze(&corpus(), &options);
        assert!(!result.patterns().contains("server"));
        assert!(result.patterns().iter().all(|p| p.site_count() >= 2));
        assert_eq!(result.metadata().total_patterns_after_filtering, result.patterns().len());
        assert!(result.metadata().total_patterns_found > result.patterns().len());
    }

    #[test]
    fn test_classifies_security_and_custom_headers() {
        let options = AnalysisOptions::default().with_min_occurrences(1);
        let result = HeaderAnalyzer::new().analyze(&corpus(), &options);
        assert!(result.specific().security_headers.contains("strict-transport-security"));
        assert!(result.specific().custom_headers.contains("x-powered-by"));
        assert_eq!(result.specific().sites_with_secondary_data, 1);
    }

    #[test]
    fn test_secondary_page_distribution() {
        let options = AnalysisOptions::default().with_min_occurrences(1);
        let result = HeaderAnalyzer::new().analyze(&corpus(), &options);
        let dist = result
            .patterns()
            .get("x-powered-by")
            .unwrap()
            .metadata()
            .page_distribution
            .unwrap();
        assert!((dist.primary - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_names_are_skipped() {
        let corpus = PreprocessedCorpus::new(vec![SiteRecord::new("https://a.example")
            .with_header("  ", "x")
            .with_header("x-ok", "")]);
        let options = AnalysisOptions::default().with_min_occurrences(1);
        let result = HeaderAnalyzer::new().analyze(&corpus, &options);
        assert_eq!(result.specific().malformed_entries, 1);
        let ok = result.patterns().get("x-ok").unwrap();
        assert_eq!(ok.site_count(), 1);
        assert!(ok.examples().is_empty());
    }

    #[test]
    fn test_empty_corpus() {
        let result = HeaderAnalyzer::new()
            .analyze(&PreprocessedCorpus::default(), &AnalysisOptions::default());
        assert!(result.patterns().is_empty());
        assert_eq!(result.total_sites(), 0);
    }

    #[test]
    fn test_many_headers_per_site_complete() {
        let mut site = SiteRecord::new("https://big.example");
        for i in 0..5000 {
            site = site.with_header(&format!("x-h-{}", i), &"v".repeat(10_000));
        }
        let corpus = PreprocessedCorpus::new(vec![site]);
        let options = AnalysisOptions::default().with_min_occurrences(1);
        let result = HeaderAnalyzer::new().analyze(&corpus, &options);
        assert_eq!(result.patterns().len(), 5000);
        let sample = result.patterns().get("x-h-42").unwrap();
        assert!(sample.value_frequencies()[0].value.chars().count() <= 201);
    }
}
