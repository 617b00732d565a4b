// Vendor Classifier - Maps header names, header values and script hosts to vendors
use crate::corpus::{PreprocessedCorpus, SiteId};
use crate::header_analyzer::HeaderSpecific;
use crate::normalize::normalize_key;
use crate::options::AnalysisOptions;
use crate::patterns::{AnalysisResult, PatternMetadata};
use crate::script_analyzer::ScriptSpecific;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum VendorCategory {
    Cdn,
    Cms,
    Ecommerce,
    Hosting,
    Analytics,
    Security,
    Framework,
    WebServer,
    Caching,
}

#[derive(Debug)]
pub struct VendorSignature {
    pub name: &'static str,
    pub category: VendorCategory,
    pub header_names: &'static [&'static str],
    pub header_prefixes: &'static [&'static str],
    /// `(header, substring)` pairs matched against lowercase header values.
    pub value_markers: &'static [(&'static str, &'static str)],
    pub script_hosts: &'static [&'static str],
}

// Ordered: more specific prefixes precede broader ones from the same provider.
pub static VENDORS: &[VendorSignature] = &[
    VendorSignature {
        name: "Cloudflare",
        category: VendorCategory::Cdn,
        header_names: &["cf-ray", "cf-cache-status", "cf-request-id"],
        header_prefixes: &["cf-"],
        value_markers: &[("server", "cloudflare")],
        script_hosts: &["cdnjs.cloudflare.com", "static.cloudflareinsights.com"],
    },
    VendorSignature {
        name: "Amazon CloudFront",
        category: VendorCategory::Cdn,
        header_names: &["x-amz-cf-id", "x-amz-cf-pop"],
        header_prefixes: &["x-amz-cf-"],
        value_markers: &[("via", "cloudfront"), ("x-cache", "cloudfront")],
        script_hosts: &["cloudfront.net"],
    },
    VendorSignature {
        name: "Amazon Web Services",
        category: VendorCategory::Hosting,
        header_names: &["x-amzn-requestid", "x-amzn-trace-id"],
        header_prefixes: &["x-amz-", "x-amzn-"],
        value_markers: &[("server", "amazons3"), ("server", "awselb")],
        script_hosts: &["amazonaws.com"],
    },
    VendorSignature {
        name: "Fastly",
        category: VendorCategory::Cdn,
        header_names: &["fastly-debug-digest", "x-fastly-request-id"],
        header_prefixes: &["x-fastly-", "fastly-"],
        value_markers: &[("x-served-by", "cache-")],
        script_hosts: &[],
    },
    VendorSignature {
        name: "Akamai",
        category: VendorCategory::Cdn,
        header_names: &["x-check-cacheable", "akamai-grn"],
        header_prefixes: &["x-akamai-", "akamai-"],
        value_markers: &[("server", "akamaighost")],
        script_hosts: &["akamaihd.net", "akamaized.net"],
    },
    VendorSignature {
        name: "Vercel",
        category: VendorCategory::Hosting,
        header_names: &["x-vercel-id", "x-vercel-cache"],
        header_prefixes: &["x-vercel-"],
        value_markers: &[("server", "vercel")],
        script_hosts: &[],
    },
    VendorSignature {
        name: "Netlify",
        category: VendorCategory::Hosting,
        header_names: &["x-nf-request-id"],
        header_prefixes: &["x-nf-"],
        value_markers: &[("server", "netlify")],
        script_hosts: &[],
    },
    VendorSignature {
        name: "Google Cloud",
        category: VendorCategory::Hosting,
        header_names: &["x-guploader-uploadid", "x-cloud-trace-context"],
        header_prefixes: &["x-goog-"],
        value_markers: &[("server", "google frontend"), ("via", "google")],
        script_hosts: &["storage.googleapis.com"],
    },
    VendorSignature {
        name: "Microsoft Azure",
        category: VendorCategory::Hosting,
        header_names: &["x-azure-ref", "x-msedge-ref"],
        header_prefixes: &["x-azure-", "x-ms-"],
        value_markers: &[],
        script_hosts: &["azureedge.net"],
    },
    VendorSignature {
        name: "Varnish",
        category: VendorCategory::Caching,
        header_names: &["x-varnish"],
        header_prefixes: &["x-varnish-"],
        value_markers: &[("via", "varnish")],
        script_hosts: &[],
    },
    VendorSignature {
        name: "LiteSpeed",
        category: VendorCategory::WebServer,
        header_names: &["x-litespeed-cache", "x-litespeed-tag"],
        header_prefixes: &["x-litespeed-"],
        value_markers: &[("server", "litespeed")],
        script_hosts: &[],
    },
    VendorSignature {
        name: "Nginx",
        category: VendorCategory::WebServer,
        header_names: &[],
        header_prefixes: &[],
        value_markers: &[("server", "nginx")],
        script_hosts: &[],
    },
    VendorSignature {
        name: "Apache",
        category: VendorCategory::WebServer,
        header_names: &[],
        header_prefixes: &[],
        value_markers: &[("server", "apache")],
        script_hosts: &[],
    },
    VendorSignature {
        name: "Microsoft IIS",
        category: VendorCategory::WebServer,
        header_names: &[],
        header_prefixes: &[],
        value_markers: &[("server", "microsoft-iis")],
        script_hosts: &[],
    },
    VendorSignature {
        name: "ASP.NET",
        category: VendorCategory::Framework,
        header_names: &["x-aspnet-version", "x-aspnetmvc-version"],
        header_prefixes: &[],
        value_markers: &[("x-powered-by", "asp.net")],
        script_hosts: &[],
    },
    VendorSignature {
        name: "PHP",
        category: VendorCategory::Framework,
        header_names: &[],
        header_prefixes: &[],
        value_markers: &[("x-powered-by", "php")],
        script_hosts: &[],
    },
    VendorSignature {
        name: "Express",
        category: VendorCategory::Framework,
        header_names: &[],
        header_prefixes: &[],
        value_markers: &[("x-powered-by", "express")],
        script_hosts: &[],
    },
    VendorSignature {
        name: "Next.js",
        category: VendorCategory::Framework,
        header_names: &["x-nextjs-cache", "x-nextjs-prerender"],
        header_prefixes: &["x-nextjs-"],
        value_markers: &[("x-powered-by", "next.js")],
        script_hosts: &[],
    },
    VendorSignature {
        name: "WordPress",
        category: VendorCategory::Cms,
        header_names: &["x-pingback", "x-redirect-by"],
        header_prefixes: &["x-wp-"],
        value_markers: &[("x-redirect-by", "wordpress"), ("link", "wp-json")],
        script_hosts: &["s.w.org", "wp.com"],
    },
    VendorSignature {
        name: "Drupal",
        category: VendorCategory::Cms,
        header_names: &["x-drupal-cache", "x-drupal-dynamic-cache"],
        header_prefixes: &["x-drupal-"],
        value_markers: &[("x-generator", "drupal")],
        script_hosts: &[],
    },
    VendorSignature {
        name: "Joomla",
        category: VendorCategory::Cms,
        header_names: &["x-content-encoded-by"],
        header_prefixes: &["x-joomla-"],
        value_markers: &[("x-content-encoded-by", "joomla")],
        script_hosts: &[],
    },
    VendorSignature {
        name: "Shopify",
        category: VendorCategory::Ecommerce,
        header_names: &["x-shopid", "x-shardid", "x-sorting-hat-shopid"],
        header_prefixes: &["x-shopify-"],
        value_markers: &[],
        script_hosts: &["cdn.shopify.com"],
    },
    VendorSignature {
        name: "Magento",
        category: VendorCategory::Ecommerce,
        header_names: &["x-magento-cache-debug", "x-magento-tags"],
        header_prefixes: &["x-magento-"],
        value_markers: &[],
        script_hosts: &[],
    },
    VendorSignature {
        name: "Wix",
        category: VendorCategory::Cms,
        header_names: &["x-wix-request-id"],
        header_prefixes: &["x-wix-"],
        value_markers: &[],
        script_hosts: &["static.parastorage.com", "static.wixstatic.com"],
    },
    VendorSignature {
        name: "Squarespace",
        category: VendorCategory::Cms,
        header_names: &["x-contextid"],
        header_prefixes: &["x-squarespace-"],
        value_markers: &[("server", "squarespace")],
        script_hosts: &["static1.squarespace.com", "assets.squarespace.com"],
    },
    VendorSignature {
        name: "Duda",
        category: VendorCategory::Cms,
        header_names: &[],
        header_prefixes: &["x-duda-"],
        value_markers: &[],
        script_hosts: &["irp.cdn-website.com", "multiscreensite.com"],
    },
    VendorSignature {
        name: "HubSpot",
        category: VendorCategory::Cms,
        header_names: &["x-hs-cache-config"],
        header_prefixes: &["x-hs-", "x-hubspot-"],
        value_markers: &[],
        script_hosts: &["js.hs-scripts.com", "js.hs-analytics.net"],
    },
    VendorSignature {
        name: "Google Analytics",
        category: VendorCategory::Analytics,
        header_names: &[],
        header_prefixes: &[],
        value_markers: &[],
        script_hosts: &["google-analytics.com", "googletagmanager.com"],
    },
    VendorSignature {
        name: "Sucuri",
        category: VendorCategory::Security,
        header_names: &["x-sucuri-id", "x-sucuri-cache"],
        header_prefixes: &["x-sucuri-"],
        value_markers: &[("server", "sucuri")],
        script_hosts: &[],
    },
    VendorSignature {
        name: "Imperva",
        category: VendorCategory::Security,
        header_names: &["x-iinfo"],
        header_prefixes: &[],
        value_markers: &[("x-cdn", "incapsula"), ("x-cdn", "imperva")],
        script_hosts: &[],
    },
];

/// Vendor owning a header name. Exact names win over prefixes.
pub fn detect_vendor_by_header(name: &str) -> Option<&'static VendorSignature> {
    let key = normalize_key(name);
    VENDORS
        .iter()
        .find(|v| v.header_names.contains(&key.as_str()))
        .or_else(|| {
            VENDORS
                .iter()
                .find(|v| v.header_prefixes.iter().any(|p| key.starts_with(p)))
        })
}

/// Vendor announced by a header value (`server: nginx/1.25`).
pub fn detect_vendor_by_value(header: &str, value: &str) -> Option<&'static VendorSignature> {
    let key = normalize_key(header);
    let value = value.to_lowercase();
    VENDORS.iter().find(|v| {
        v.value_markers
            .iter()
            .any(|(h, needle)| *h == key && value.contains(needle))
    })
}

/// Vendor serving scripts from `host`.
pub fn detect_vendor_by_script_host(host: &str) -> Option<&'static VendorSignature> {
    let host = host.to_lowercase();
    VENDORS.iter().find(|v| {
        v.script_hosts
            .iter()
            .any(|h| host == *h || host.ends_with(&format!(".{}", h)))
    })
}

fn is_value_marker_header(key: &str) -> bool {
    VENDORS
        .iter()
        .any(|v| v.value_markers.iter().any(|(h, _)| *h == key))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorStats {
    pub category: VendorCategory,
    pub patterns: BTreeSet<String>,
    pub site_count: usize,
    pub coverage: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueDetection {
    pub header: String,
    pub vendor: String,
    pub site_count: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorSpecific {
    pub vendors_detected: usize,
    pub vendor_stats: BTreeMap<String, VendorStats>,
    pub technology_stack: BTreeMap<VendorCategory, BTreeSet<String>>,
    pub value_detections: Vec<ValueDetection>,
    /// Share of retained header patterns attributed to a vendor.
    pub header_attribution_rate: f64,
}

pub struct VendorAnalyzer;

impl VendorAnalyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze(
        &self,
        corpus: &PreprocessedCorpus,
        header: &AnalysisResult<HeaderSpecific>,
        script: Option<&AnalysisResult<ScriptSpecific>>,
        options: &AnalysisOptions,
    ) -> AnalysisResult<VendorSpecific> {
        let total_sites = header.total_sites();
        if header.patterns().is_empty() && script.is_none_or(|s| s.patterns().is_empty()) {
            debug!("Vendor analysis skipped: no patterns");
            return AnalysisResult::empty("vendor", total_sites, options, VendorSpecific::default());
        }
        info!("Attributing {} header patterns to vendors...", header.patterns().len());

        let mut vendor_sites: BTreeMap<&'static str, BTreeSet<SiteId>> = BTreeMap::new();
        let mut vendor_patterns: BTreeMap<&'static str, BTreeSet<String>> = BTreeMap::new();
        let mut attributed = 0usize;

        let patterns = header.patterns().annotate(|record| {
            let vendor = detect_vendor_by_header(record.pattern());
            if let Some(v) = vendor {
                attributed += 1;
                vendor_sites
                    .entry(v.name)
                    .or_default()
                    .extend(record.sites().iter().copied());
                vendor_patterns
                    .entry(v.name)
                    .or_default()
                    .insert(format!("header:{}", record.pattern()));
            }
            PatternMetadata {
                vendor: vendor.map(|v| v.name.to_string()),
                ..record.metadata().clone()
            }
        });

        if let Some(script) = script {
            for record in script.patterns().iter() {
                let Some(host) = record.pattern().strip_prefix("domain:") else {
                    continue;
                };
                if let Some(v) = detect_vendor_by_script_host(host) {
                    vendor_sites
                        .entry(v.name)
                        .or_default()
                        .extend(record.sites().iter().copied());
                    vendor_patterns
                        .entry(v.name)
                        .or_default()
                        .insert(format!("script:{}", record.pattern()));
                }
            }
        }

        // Value-based detections read the corpus so every site is attributed exactly
        let mut value_sites: BTreeMap<(String, &'static str), BTreeSet<SiteId>> = BTreeMap::new();
        for (id, site) in corpus.iter() {
            for (raw_name, values) in site.headers.iter().chain(&site.secondary_headers) {
                let key = normalize_key(raw_name);
                if !is_value_marker_header(&key) {
                    continue;
                }
                for value in values {
                    if let Some(v) = detect_vendor_by_value(&key, value) {
                        value_sites.entry((key.clone(), v.name)).or_default().insert(id);
                    }
                }
            }
        }

        let mut value_detections = Vec::new();
        for ((header_name, vendor), sites) in value_sites {
            value_detections.push(ValueDetection {
                header: header_name.clone(),
                vendor: vendor.to_string(),
                site_count: sites.len(),
            });
            vendor_patterns
                .entry(vendor)
                .or_default()
                .insert(format!("value:{}", header_name));
            vendor_sites.entry(vendor).or_default().extend(sites);
        }
        value_detections.sort_by(|a, b| b.site_count.cmp(&a.site_count).then_with(|| a.vendor.cmp(&b.vendor)));

        let mut vendor_stats = BTreeMap::new();
        let mut technology_stack: BTreeMap<VendorCategory, BTreeSet<String>> = BTreeMap::new();
        for (name, sites) in &vendor_sites {
            let Some(signature) = VENDORS.iter().find(|v| v.name == *name) else {
                continue;
            };
            technology_stack
                .entry(signature.category)
                .or_default()
                .insert(name.to_string());
            vendor_stats.insert(
                name.to_string(),
                VendorStats {
                    category: signature.category,
                    patterns: vendor_patterns.remove(name).unwrap_or_default(),
                    site_count: sites.len(),
                    coverage: if total_sites == 0 {
                        0.0
                    } else {
                        sites.len() as f64 / total_sites as f64
                    },
                },
            );
        }

        let header_attribution_rate = if header.patterns().is_empty() {
            0.0
        } else {
            attributed as f64 / header.patterns().len() as f64
        };

        info!("Vendor analysis: {} vendors detected", vendor_stats.len());
        let specific = VendorSpecific {
            vendors_detected: vendor_stats.len(),
            vendor_stats,
            technology_stack,
            value_detections,
            header_attribution_rate,
        };
        let mut degraded = Vec::new();
        if script.is_none() {
            degraded.push("script analysis unavailable: script host attribution skipped".to_string());
        }
        AnalysisResult::new("vendor", patterns, total_sites, options, specific).with_degraded(degraded)
    }
}

impl Default for VendorAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::SiteRecord;
    use crate::header_analyzer::HeaderAnalyzer;
    use crate::patterns::CorpusAnalyzer;
    use crate::script_analyzer::ScriptAnalyzer;

    #[test]
    fn test_detect_by_header_is_case_insensitive() {
        let upper = detect_vendor_by_header("CF-RAY").map(|v| v.name);
        let lower = detect_vendor_by_header("cf-ray").map(|v| v.name);
        assert_eq!(upper, Some("Cloudflare"));
        assert_eq!(upper, lower);
    }

    #[test]
    fn test_specific_prefix_wins() {
        assert_eq!(detect_vendor_by_header("x-amz-cf-pop").unwrap().name, "Amazon CloudFront");
        assert_eq!(detect_vendor_by_header("x-amz-request-id").unwrap().name, "Amazon Web Services");
        assert!(detect_vendor_by_header("x-custom-thing").is_none());
    }

    #[test]
    fn test_detect_by_value_and_script_host() {
        assert_eq!(detect_vendor_by_value("Server", "nginx/1.25.3").unwrap().name, "Nginx");
        assert_eq!(detect_vendor_by_value("x-powered-by", "PHP/8.2").unwrap().name, "PHP");
        assert!(detect_vendor_by_value("x-powered-by", "nginx").is_none());
        assert_eq!(detect_vendor_by_script_host("cdn.shopify.com").unwrap().name, "Shopify");
        assert_eq!(
            detect_vendor_by_script_host("www.google-analytics.com").unwrap().name,
            "Google Analytics"
        );
    }

    #[test]
    fn test_vendor_analysis() {
        let corpus = PreprocessedCorpus::new(vec![
            SiteRecord::new("https://a.example")
                .with_header("cf-ray", "abc")
                .with_header("server", "cloudflare")
                .with_script("https://cdn.shopify.com/s/app.js"),
            SiteRecord::new("https://b.example")
                .with_header("server", "nginx")
                .with_header("x-pingback", "https://b.example/xmlrpc.php"),
            SiteRecord::new("https://c.example").with_header("server", "nginx/1.2"),
        ]);
        let options = AnalysisOptions::default().with_min_occurrences(1);
        let header = HeaderAnalyzer::new().analyze(&corpus, &options);
        let script = ScriptAnalyzer::new().analyze(&corpus, &options);
        let result = VendorAnalyzer::new().analyze(&corpus, &header, Some(&script), &options);
        let specific = result.specific();

        assert_eq!(specific.vendor_stats["Cloudflare"].site_count, 1);
        assert_eq!(specific.vendor_stats["Nginx"].site_count, 2);
        assert!((specific.vendor_stats["Nginx"].coverage - 2.0 / 3.0).abs() < 1e-9);
        assert!(specific.vendor_stats["Shopify"].patterns.contains("script:domain:cdn.shopify.com"));
        assert!(specific.technology_stack[&VendorCategory::Cms].contains("WordPress"));
        assert_eq!(
            result.patterns().get("x-pingback").unwrap().metadata().vendor.as_deref(),
            Some("WordPress")
        );
        assert!(result.patterns().get("server").unwrap().metadata().vendor.is_none());
        assert!(result.metadata().degraded.is_empty());
    }

    #[test]
    fn test_value_detection_reads_secondary_headers() {
        let corpus = PreprocessedCorpus::new(vec![
            SiteRecord::new("https://a.example").with_header("server", "nginx"),
            SiteRecord::new("https://b.example").with_secondary_header("Server", "nginx/1.25"),
        ]);
        let options = AnalysisOptions::default().with_min_occurrences(1);
        let header = HeaderAnalyzer::new().analyze(&corpus, &options);
        let result = VendorAnalyzer::new().analyze(&corpus, &header, None, &options);
        let specific = result.specific();

        assert_eq!(specific.vendor_stats["Nginx"].site_count, 2);
        let detection = specific
            .value_detections
            .iter()
            .find(|d| d.vendor == "Nginx")
            .unwrap();
        assert_eq!(detection.header, "server");
        assert_eq!(detection.site_count, 2);
    }

    #[test]
    fn test_empty_input() {
        let corpus = PreprocessedCorpus::default();
        let options = AnalysisOptions::default();
        let header = HeaderAnalyzer::new().analyze(&corpus, &options);
        let result = VendorAnalyzer::new().analyze(&corpus, &header, None, &options);
        assert_eq!(result.specific().vendors_detected, 0);
        assert!(result.patterns().is_empty());
    }
}
