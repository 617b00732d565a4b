// Meta Analyzer - Counts meta tag names once per site
use crate::corpus::PreprocessedCorpus;
use crate::normalize::{normalize_cms_label, normalize_key};
use crate::options::AnalysisOptions;
use crate::patterns::{AnalysisResult, CorpusAnalyzer, PageKind, PatternAccumulator, SiteVisit};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

lazy_static! {
    // Product name up to the first version number or separator
    static ref GENERATOR_PRODUCT: Regex =
        Regex::new(r"^([A-Za-z][A-Za-z0-9.!&' ]*?)(?:\s+v?\d|\s*[-(;,/|]|$)").unwrap();
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaSpecific {
    /// Sites per product named in `generator` meta tags.
    pub generator_products: BTreeMap<String, usize>,
    pub open_graph_tags: usize,
    pub skipped_by_semantic_filter: usize,
    pub malformed_entries: usize,
}

pub struct MetaAnalyzer;

impl MetaAnalyzer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MetaAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

/// Canonical product from a generator string ("WordPress 6.4.2" -> "WordPress").
pub fn generator_product(content: &str) -> Option<String> {
    let caps = GENERATOR_PRODUCT.captures(content.trim())?;
    let product = caps.get(1)?.as_str().trim();
    if product.is_empty() {
        return None;
    }
    Some(normalize_cms_label(Some(product)))
}

impl CorpusAnalyzer for MetaAnalyzer {
    type Specific = MetaSpecific;

    fn name(&self) -> &'static str {
        "meta"
    }

    fn analyze(&self, corpus: &PreprocessedCorpus, options: &AnalysisOptions) -> AnalysisResult<MetaSpecific> {
        let mut stats = MetaSpecific::default();
        if corpus.is_empty() {
            debug!("Meta analysis skipped: empty corpus");
            return AnalysisResult::empty(self.name(), 0, options, stats);
        }
        info!("Analyzing meta tags across {} sites...", corpus.total_sites());

        let mut acc = PatternAccumulator::new(options);
        for (id, site) in corpus.iter() {
            let mut visit = SiteVisit::new(id);
            let mut products: BTreeSet<String> = BTreeSet::new();

            for (raw_name, contents) in &site.meta_tags {
                let key = normalize_key(raw_name);
                if key.is_empty() {
                    stats.malformed_entries += 1;
                    continue;
                }
                if options.skips_meta(&key) {
                    stats.skipped_by_semantic_filter += 1;
                    continue;
                }
                if key == "generator" {
                    products.extend(contents.iter().filter_map(|c| generator_product(c)));
                }
                if contents.is_empty() {
                    acc.record(&mut visit, &key, None, PageKind::Primary);
                }
                for content in contents {
                    acc.record(&mut visit, &key, Some(content), PageKind::Primary);
                }
            }

            for product in products {
                *stats.generator_products.entry(product).or_insert(0) += 1;
            }
        }

        let patterns = acc.finalize(corpus.total_sites(), options.min_occurrences);
        stats.open_graph_tags = patterns.keys().filter(|k| k.starts_with("og:")).count();

        info!(
            "Meta analysis: {} tags found, {} retained",
            patterns.total_found(),
            patterns.len()
        );
        AnalysisResult::new(self.name(), patterns, corpus.total_sites(), options, stats)
    }
}
