// Technology Signatures - Curated multi-pattern evidence templates
use crate::corpus::SiteRecord;
use crate::normalize::{normalize_cms_label, normalize_key};
use crate::script_analyzer::script_signatures;
use crate::vendor_classifier::VendorCategory;
use fxhash::FxHashSet;
use serde::Serialize;
use std::collections::BTreeSet;

/// One observable a template can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evidence {
    /// Header name present.
    Header(&'static str),
    /// Meta tag present, optionally with content containing a needle.
    Meta {
        name: &'static str,
        contains: Option<&'static str>,
    },
    /// Script signature key (`path:wp-content`, `domain:cdn.shopify.com`, ...).
    Script(&'static str),
}

impl Evidence {
    pub fn label(&self) -> String {
        match self {
            Evidence::Header(name) => format!("header:{}", name),
            Evidence::Meta {
                name,
                contains: Some(needle),
            } => format!("meta:{}~{}", name, needle),
            Evidence::Meta { name, contains: None } => format!("meta:{}", name),
            Evidence::Script(key) => format!("script:{}", key),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SignatureTemplate {
    pub name: &'static str,
    pub vendor: &'static str,
    pub category: VendorCategory,
    pub required: &'static [Evidence],
    pub optional: &'static [Evidence],
    pub conflicting: &'static [Evidence],
}

use Evidence::{Header, Meta, Script};

pub static TEMPLATES: &[SignatureTemplate] = &[
    SignatureTemplate {
        name: "WordPress",
        vendor: "WordPress",
        category: VendorCategory::Cms,
        required: &[Header("x-pingback")],
        optional: &[
            Header("x-wp-total"),
            Header("x-wp-totalpages"),
            Header("x-redirect-by"),
            Meta {
                name: "generator",
                contains: Some("wordpress"),
            },
            Script("path:wp-content"),
            Script("path:wp-includes"),
        ],
        conflicting: &[
            Header("x-drupal-cache"),
            Header("x-drupal-dynamic-cache"),
            Header("x-shopify-stage"),
        ],
    },
    SignatureTemplate {
        name: "WordPress REST API",
        vendor: "WordPress",
        category: VendorCategory::Cms,
        required: &[Header("x-wp-total")],
        optional: &[Header("x-wp-totalpages"), Header("x-pingback")],
        conflicting: &[Header("x-drupal-cache")],
    },
    SignatureTemplate {
        name: "Drupal",
        vendor: "Drupal",
        category: VendorCategory::Cms,
        required: &[Header("x-drupal-cache")],
        optional: &[
            Header("x-drupal-dynamic-cache"),
            Header("x-generator"),
            Meta {
                name: "generator",
                contains: Some("drupal"),
            },
            Script("path:drupal-core"),
            Script("path:drupal-sites"),
        ],
        conflicting: &[Header("x-pingback"), Header("x-wp-total")],
    },
    SignatureTemplate {
        name: "Drupal 8+",
        vendor: "Drupal",
        category: VendorCategory::Cms,
        required: &[Header("x-drupal-dynamic-cache")],
        optional: &[Header("x-drupal-cache"), Script("path:drupal-core")],
        conflicting: &[Header("x-pingback")],
    },
    SignatureTemplate {
        name: "Joomla",
        vendor: "Joomla",
        category: VendorCategory::Cms,
        required: &[Meta {
            name: "generator",
            contains: Some("joomla"),
        }],
        optional: &[
            Header("x-content-encoded-by"),
            Script("path:joomla-media"),
            Script("path:joomla-components"),
        ],
        conflicting: &[Header("x-pingback"), Header("x-drupal-cache")],
    },
    SignatureTemplate {
        name: "Shopify",
        vendor: "Shopify",
        category: VendorCategory::Ecommerce,
        required: &[Header("x-shopid")],
        optional: &[
            Header("x-shopify-stage"),
            Header("x-sorting-hat-shopid"),
            Header("x-shardid"),
            Script("domain:cdn.shopify.com"),
        ],
        conflicting: &[Header("x-pingback"), Header("x-magento-cache-debug")],
    },
    SignatureTemplate {
        name: "Magento",
        vendor: "Magento",
        category: VendorCategory::Ecommerce,
        required: &[Header("x-magento-cache-debug")],
        optional: &[
            Header("x-magento-tags"),
            Header("x-magento-vary"),
            Script("path:magento-static"),
            Script("path:magento-skin"),
        ],
        conflicting: &[Header("x-shopid")],
    },
    SignatureTemplate {
        name: "Wix",
        vendor: "Wix",
        category: VendorCategory::Cms,
        required: &[Header("x-wix-request-id")],
        optional: &[
            Header("x-wix-renderer-server"),
            Meta {
                name: "generator",
                contains: Some("wix"),
            },
            Script("domain:static.parastorage.com"),
        ],
        conflicting: &[Header("x-pingback"), Header("x-drupal-cache")],
    },
    SignatureTemplate {
        name: "Squarespace",
        vendor: "Squarespace",
        category: VendorCategory::Cms,
        required: &[Meta {
            name: "generator",
            contains: Some("squarespace"),
        }],
        optional: &[
            Header("x-servedby"),
            Script("domain:static1.squarespace.com"),
            Script("domain:assets.squarespace.com"),
        ],
        conflicting: &[Header("x-pingback")],
    },
    SignatureTemplate {
        name: "Duda",
        vendor: "Duda",
        category: VendorCategory::Cms,
        required: &[Script("domain:irp.cdn-website.com")],
        optional: &[
            Script("domain:static.cdn-website.com"),
            Meta {
                name: "generator",
                contains: Some("duda"),
            },
        ],
        conflicting: &[Header("x-pingback"), Header("x-drupal-cache")],
    },
    SignatureTemplate {
        name: "Cloudflare",
        vendor: "Cloudflare",
        category: VendorCategory::Cdn,
        required: &[Header("cf-ray")],
        optional: &[Header("cf-cache-status"), Header("cf-request-id")],
        conflicting: &[],
    },
    SignatureTemplate {
        name: "Fastly",
        vendor: "Fastly",
        category: VendorCategory::Cdn,
        required: &[Header("x-served-by"), Header("x-timer")],
        optional: &[Header("x-fastly-request-id"), Header("fastly-debug-digest")],
        conflicting: &[],
    },
    SignatureTemplate {
        name: "Next.js",
        vendor: "Vercel",
        category: VendorCategory::Framework,
        required: &[Script("path:next")],
        optional: &[Header("x-nextjs-cache"), Header("x-powered-by"), Header("x-vercel-id")],
        conflicting: &[Script("path:nuxt")],
    },
    SignatureTemplate {
        name: "ASP.NET",
        vendor: "Microsoft",
        category: VendorCategory::Framework,
        required: &[Header("x-aspnet-version")],
        optional: &[Header("x-aspnetmvc-version"), Header("x-powered-by")],
        conflicting: &[],
    },
];

/// Headers the templates of one platform expect as required or optional
/// evidence. Templates match by normalized name or vendor.
pub fn expected_headers(platform: &str) -> BTreeSet<&'static str> {
    TEMPLATES
        .iter()
        .filter(|t| {
            normalize_cms_label(Some(t.name)) == platform || normalize_cms_label(Some(t.vendor)) == platform
        })
        .flat_map(|t| t.required.iter().chain(t.optional))
        .filter_map(|e| match e {
            Evidence::Header(name) => Some(*name),
            _ => None,
        })
        .collect()
}

/// Observables of one site, normalized once for template matching.
#[derive(Debug, Default)]
pub struct SiteEvidence {
    headers: FxHashSet<String>,
    meta: Vec<(String, Vec<String>)>,
    scripts: FxHashSet<String>,
}

impl SiteEvidence {
    pub fn from_record(site: &SiteRecord) -> Self {
        let headers = site
            .headers
            .keys()
            .chain(site.secondary_headers.keys())
            .map(|k| normalize_key(k))
            .filter(|k| !k.is_empty())
            .collect();
        let meta = site
            .meta_tags
            .iter()
            .map(|(name, contents)| {
                (
                    normalize_key(name),
                    contents.iter().map(|c| c.to_lowercase()).collect(),
                )
            })
            .collect();
        let scripts = site
            .scripts
            .iter()
            .flat_map(|src| script_signatures(src))
            .collect();
        Self {
            headers,
            meta,
            scripts,
        }
    }

    pub fn has(&self, evidence: &Evidence) -> bool {
        match evidence {
            Evidence::Header(name) => self.headers.contains(*name),
            Evidence::Meta { name, contains } => self.meta.iter().any(|(key, contents)| {
                key == name
                    && contains.is_none_or(|needle| contents.iter().any(|c| c.contains(needle)))
            }),
            Evidence::Script(key) => self.scripts.contains(*key),
        }
    }
}

/// How a single site relates to a template.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TemplateMatch {
    /// Some required evidence is missing.
    Absent,
    /// All required evidence and no conflicting evidence; carries the
    /// fraction of optional evidence present.
    Supported(f64),
    /// All required evidence but also conflicting evidence.
    Conflicted,
}

impl SignatureTemplate {
    pub fn evaluate(&self, site: &SiteEvidence) -> TemplateMatch {
        if !self.required.iter().all(|e| site.has(e)) {
            return TemplateMatch::Absent;
        }
        if self.conflicting.iter().any(|e| site.has(e)) {
            return TemplateMatch::Conflicted;
        }
        let optional = if self.optional.is_empty() {
            1.0
        } else {
            let present = self.optional.iter().filter(|e| site.has(e)).count();
            present as f64 / self.optional.len() as f64
        };
        TemplateMatch::Supported(optional)
    }

    pub fn labels(evidence: &[Evidence]) -> Vec<String> {
        evidence.iter().map(Evidence::label).collect()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateSummary {
    pub name: &'static str,
    pub vendor: &'static str,
    pub category: VendorCategory,
    pub required: Vec<String>,
}

pub fn catalog() -> Vec<TemplateSummary> {
    TEMPLATES
        .iter()
        .map(|t| TemplateSummary {
            name: t.name,
            vendor: t.vendor,
            category: t.category,
            required: SignatureTemplate::labels(t.required),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(name: &str) -> &'static SignatureTemplate {
        TEMPLATES.iter().find(|t| t.name == name).unwrap()
    }

    #[test]
    fn test_wordpress_match_levels() {
        let wp = template("WordPress");
        let bare = SiteEvidence::from_record(&SiteRecord::new("a").with_header("X-Pingback", "/xmlrpc.php"));
        let TemplateMatch::Supported(fraction) = wp.evaluate(&bare) else {
            panic!("expected a supported match");
        };
        assert_eq!(fraction, 0.0);

        let rich = SiteEvidence::from_record(
            &SiteRecord::new("b")
                .with_header("x-pingback", "/xmlrpc.php")
                .with_header("x-wp-total", "10")
                .with_meta("generator", "WordPress 6.4")
                .with_script("/wp-content/themes/t/app.js"),
        );
        let TemplateMatch::Supported(fraction) = wp.evaluate(&rich) else {
            panic!("expected a supported match");
        };
        assert!((fraction - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_conflicting_and_absent() {
        let wp = template("WordPress");
        let mixed = SiteEvidence::from_record(
            &SiteRecord::new("a")
                .with_header("x-pingback", "")
                .with_header("x-drupal-cache", "HIT"),
        );
        assert_eq!(wp.evaluate(&mixed), TemplateMatch::Conflicted);

        let other = SiteEvidence::from_record(&SiteRecord::new("b").with_header("server", "nginx"));
        assert_eq!(wp.evaluate(&other), TemplateMatch::Absent);
    }

    #[test]
    fn test_meta_needle_is_case_insensitive() {
        let joomla = template("Joomla");
        let site = SiteEvidence::from_record(
            &SiteRecord::new("a").with_meta("Generator", "Joomla! - Open Source Content Management"),
        );
        assert!(matches!(joomla.evaluate(&site), TemplateMatch::Supported(_)));
    }

    #[test]
    fn test_template_names_are_unique() {
        let mut names: Vec<&str> = TEMPLATES.iter().map(|t| t.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), TEMPLATES.len());
        assert_eq!(catalog().len(), TEMPLATES.len());
    }

    #[test]
    fn test_expected_headers_are_per_platform() {
        let wordpress = expected_headers("WordPress");
        assert!(wordpress.contains("x-pingback"));
        // From the REST API template, matched through its vendor
        assert!(wordpress.contains("x-wp-totalpages"));
        // Conflicting evidence is not expected
        assert!(!wordpress.contains("x-drupal-cache"));
        assert!(!wordpress.contains("cf-ray"));

        let drupal = expected_headers("Drupal");
        assert!(drupal.contains("x-drupal-cache"));
        assert!(drupal.contains("x-drupal-dynamic-cache"));
        assert!(expected_headers("Unknown").is_empty());
    }

    #[test]
    fn test_evidence_labels() {
        assert_eq!(Header("x-pingback").label(), "header:x-pingback");
        assert_eq!(Script("path:next").label(), "script:path:next");
        assert_eq!(
            Meta {
                name: "generator",
                contains: Some("wix")
            }
            .label(),
            "meta:generator~wix"
        );
    }
}
