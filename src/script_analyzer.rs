// Script Analyzer - Derives script signatures (host, CMS paths, libraries, trackers)
use crate::corpus::PreprocessedCorpus;
use crate::options::AnalysisOptions;
use crate::patterns::{AnalysisResult, CorpusAnalyzer, PageKind, PatternAccumulator, SiteVisit};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

pub const INLINE_SCRIPT: &str = "inline:script";

const PATH_MARKERS: &[(&str, &str)] = &[
    ("/wp-content/", "path:wp-content"),
    ("/wp-includes/", "path:wp-includes"),
    ("/sites/all/", "path:drupal-sites"),
    ("/sites/default/files/", "path:drupal-sites"),
    ("/core/misc/", "path:drupal-core"),
    ("/misc/drupal.js", "path:drupal-core"),
    ("/media/jui/", "path:joomla-media"),
    ("/media/system/js/", "path:joomla-media"),
    ("/components/com_", "path:joomla-components"),
    ("/skin/frontend/", "path:magento-skin"),
    ("/static/version", "path:magento-static"),
    ("/_next/", "path:next"),
    ("/_nuxt/", "path:nuxt"),
    ("/typo3conf/", "path:typo3"),
    ("/typo3temp/", "path:typo3"),
];

const TRACKERS: &[(&str, &str)] = &[
    ("googletagmanager.com", "tracking:google-tag-manager"),
    ("google-analytics.com", "tracking:google-analytics"),
    ("connect.facebook.net", "tracking:facebook-pixel"),
    ("static.hotjar.com", "tracking:hotjar"),
    ("cdn.segment.com", "tracking:segment"),
    ("js.hs-scripts.com", "tracking:hubspot"),
    ("matomo.js", "tracking:matomo"),
    ("piwik.js", "tracking:matomo"),
    ("snap.licdn.com", "tracking:linkedin-insight"),
];

lazy_static! {
    static ref LIBRARY: Regex = Regex::new(
        r"(?i)(?:^|[/._-])(jquery|react|react-dom|vue|angular|bootstrap|lodash|underscore|backbone|modernizr|require|alpine|htmx|swiper|gsap)(?:[._-]|\.min|\d|$)"
    )
    .unwrap();
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptSpecific {
    /// Retained `domain:` signatures.
    pub external_domains: usize,
    pub library_usage: BTreeMap<String, usize>,
    pub tracking_usage: BTreeMap<String, usize>,
    pub sites_with_inline_scripts: usize,
    pub malformed_entries: usize,
}

pub struct ScriptAnalyzer;

impl ScriptAnalyzer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ScriptAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

fn script_host(src: &str) -> Option<String> {
    let rest = if let Some(stripped) = src.strip_prefix("//") {
        stripped
    } else {
        let (_, after) = src.split_once("://")?;
        after
    };
    let authority = rest.split(['/', '?', '#']).next()?;
    let host = authority
        .rsplit('@')
        .next()?
        .split(':')
        .next()?
        .trim()
        .to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

/// Pattern keys implied by a single script reference.
pub fn script_signatures(src: &str) -> Vec<String> {
    let src = src.trim();
    if src.is_empty() {
        return Vec::new();
    }
    let lowered = src.to_lowercase();
    if lowered.starts_with("inline") || !(lowered.contains('/') || lowered.ends_with(".js")) {
        return vec![INLINE_SCRIPT.to_string()];
    }

    let mut keys = Vec::new();
    if let Some(host) = script_host(&lowered) {
        keys.push(format!("domain:{}", host));
    }
    for (needle, key) in PATH_MARKERS {
        if lowered.contains(needle) && !keys.iter().any(|k| k == key) {
            keys.push(key.to_string());
        }
    }
    let path = lowered.split(['?', '#']).next().unwrap_or(&lowered);
    let file = path.rsplit('/').next().unwrap_or(path);
    if let Some(caps) = LIBRARY.captures(file) {
        let name = caps[1].to_lowercase();
        let name = if name == "react-dom" { "react".to_string() } else { name };
        keys.push(format!("library:{}", name));
    }
    for (needle, key) in TRACKERS {
        if lowered.contains(needle) && !keys.iter().any(|k| k == key) {
            keys.push(key.to_string());
        }
    }
    keys
}

impl CorpusAnalyzer for ScriptAnalyzer {
    type Specific = ScriptSpecific;

    fn name(&self) -> &'static str {
        "script"
    }

    fn analyze(&self, corpus: &PreprocessedCorpus, options: &AnalysisOptions) -> AnalysisResult<ScriptSpecific> {
        let mut stats = ScriptSpecific::default();
        if corpus.is_empty() {
            debug!("Script analysis skipped: empty corpus");
            return AnalysisResult::empty(self.name(), 0, options, stats);
        }
        info!("Analyzing scripts across {} sites...", corpus.total_sites());

        let mut acc = PatternAccumulator::new(options);
        for (id, site) in corpus.iter() {
            let mut visit = SiteVisit::new(id);
            for src in &site.scripts {
                let keys = script_signatures(src);
                if keys.is_empty() {
                    stats.malformed_entries += 1;
                    continue;
                }
                for key in keys {
                    acc.record(&mut visit, &key, Some(src), PageKind::Primary);
                }
            }
        }

        let patterns = acc.finalize(corpus.total_sites(), options.min_occurrences);
        for record in patterns.iter() {
            let key = record.pattern();
            if key.starts_with("domain:") {
                stats.external_domains += 1;
            } else if let Some(lib) = key.strip_prefix("library:") {
                stats.library_usage.insert(lib.to_string(), record.site_count());
            } else if let Some(tracker) = key.strip_prefix("tracking:") {
                stats.tracking_usage.insert(tracker.to_string(), record.site_count());
            } else if key == INLINE_SCRIPT {
                stats.sites_with_inline_scripts = record.site_count();
            }
        }

        info!(
            "Script analysis: {} signatures found, {} retained",
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

    #[test]
    fn test_signatures_for_wordpress_script() {
        let keys = script_signatures("https://www.shop.example/wp-includes/js/jquery/jquery.min.js?ver=3.7");
        assert!(keys.contains(&"domain:shop.example".to_string()));
        assert!(keys.contains(&"path:wp-includes".to_string()));
        assert!(keys.contains(&"library:jquery".to_string()));
    }

    #[test]
    fn test_signatures_for_trackers_and_relative_paths() {
        let keys = script_signatures("//www.googletagmanager.com/gtm.js?id=GTM-1");
        assert_eq!(keys[0], "domain:googletagmanager.com");
        assert!(keys.contains(&"tracking:google-tag-manager".to_string()));

        let keys = script_signatures("/core/misc/drupal.js");
        assert_eq!(keys, vec!["path:drupal-core".to_string()]);

        assert_eq!(script_signatures("inline"), vec![INLINE_SCRIPT.to_string()]);
        assert!(script_signatures("  ").is_empty());
    }

    #[test]
    fn test_script_counting() {
        let corpus = PreprocessedCorpus::new(vec![
            SiteRecord::new("https://a.example")
                .with_script("/wp-content/themes/x/app.js")
                .with_script("/wp-content/plugins/y/other.js")
                .with_script(""),
            SiteRecord::new("https://b.example").with_script("/wp-content/themes/z/app.js"),
        ]);
        let options = AnalysisOptions::default().with_min_occurrences(1);
        let result = ScriptAnalyzer::new().analyze(&corpus, &options);
        let wp = result.patterns().get("path:wp-content").unwrap();
        assert_eq!(wp.site_count(), 2);
        assert_eq!(result.specific().malformed_entries, 1);
    }
}
