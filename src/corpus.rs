// Preprocessed corpus: normalized per-site fingerprint records
use crate::error::{AnalysisError, Result};
use crate::normalize::{normalize_cms_label, UNKNOWN_CMS};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Position of a site inside its corpus. Pattern site-sets hold these.
pub type SiteId = usize;

pub type ValueMap = BTreeMap<String, BTreeSet<String>>;

/// Number of sites present in both sets.
pub fn shared_sites(a: &BTreeSet<SiteId>, b: &BTreeSet<SiteId>) -> usize {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    small.iter().filter(|s| large.contains(s)).count()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteRecord {
    pub url: String,
    #[serde(default)]
    pub cms: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub confidence: f64,
    #[serde(default, deserialize_with = "lenient_value_map")]
    pub headers: ValueMap,
    /// Headers seen only on a secondary fetch (robots.txt and similar).
    #[serde(default, deserialize_with = "lenient_value_map")]
    pub secondary_headers: ValueMap,
    #[serde(default, deserialize_with = "lenient_value_map")]
    pub meta_tags: ValueMap,
    #[serde(default, deserialize_with = "lenient_string_set")]
    pub scripts: BTreeSet<String>,
    #[serde(default, deserialize_with = "lenient_string_set")]
    pub technologies: BTreeSet<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub captured_at: Option<DateTime<Utc>>,
}

impl SiteRecord {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            confidence: 1.0,
            ..Default::default()
        }
    }

    pub fn with_cms(mut self, cms: impl Into<String>) -> Self {
        self.cms = Some(cms.into());
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .entry(name.to_string())
            .or_default()
            .insert(value.to_string());
        self
    }

    pub fn with_secondary_header(mut self, name: &str, value: &str) -> Self {
        self.secondary_headers
            .entry(name.to_string())
            .or_default()
            .insert(value.to_string());
        self
    }

    pub fn with_meta(mut self, name: &str, content: &str) -> Self {
        self.meta_tags
            .entry(name.to_string())
            .or_default()
            .insert(content.to_string());
        self
    }

    pub fn with_script(mut self, src: &str) -> Self {
        self.scripts.insert(src.to_string());
        self
    }
}

/// Immutable input to every analyzer. `total_sites` always counts distinct
/// sites, never pattern occurrences.
#[derive(Debug, Clone, Default)]
pub struct PreprocessedCorpus {
    sites: Vec<SiteRecord>,
    platforms: Vec<String>,
    total_sites: usize,
    duplicates_dropped: usize,
    malformed_dropped: usize,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CorpusDocument {
    Wrapped { sites: Vec<SiteRecord> },
    Bare(Vec<SiteRecord>),
}

impl PreprocessedCorpus {
    /// Build a corpus, keeping the first record per URL.
    pub fn new(records: Vec<SiteRecord>) -> Self {
        let mut seen: HashSet<String> = HashSet::with_capacity(records.len());
        let mut sites = Vec::with_capacity(records.len());
        let mut duplicates_dropped = 0;
        let mut malformed_dropped = 0;

        for record in records {
            let key = record.url.trim().to_lowercase();
            if key.is_empty() {
                malformed_dropped += 1;
                continue;
            }
            if !seen.insert(key) {
                debug!("Duplicate site record dropped: {}", record.url);
                duplicates_dropped += 1;
                continue;
            }
            sites.push(record);
        }

        if duplicates_dropped > 0 || malformed_dropped > 0 {
            warn!(
                "Corpus cleanup: {} duplicate and {} url-less records dropped",
                duplicates_dropped, malformed_dropped
            );
        }

        let platforms = sites
            .iter()
            .map(|s| normalize_cms_label(s.cms.as_deref()))
            .collect();

        Self {
            total_sites: sites.len(),
            sites,
            platforms,
            duplicates_dropped,
            malformed_dropped,
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let doc: CorpusDocument = serde_json::from_str(json)?;
        let records = match doc {
            CorpusDocument::Wrapped { sites } => sites,
            CorpusDocument::Bare(sites) => sites,
        };
        Ok(Self::new(records))
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| AnalysisError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn total_sites(&self) -> usize {
        self.total_sites
    }

    pub fn is_empty(&self) -> bool {
        self.total_sites == 0
    }

    pub fn sites(&self) -> &[SiteRecord] {
        &self.sites
    }

    pub fn site(&self, id: SiteId) -> Option<&SiteRecord> {
        self.sites.get(id)
    }

    pub fn url(&self, id: SiteId) -> &str {
        self.sites.get(id).map(|s| s.url.as_str()).unwrap_or("")
    }

    /// Iterate `(id, record)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (SiteId, &SiteRecord)> {
        self.sites.iter().enumerate()
    }

    /// Normalized platform label of a site (`Unknown` when unlabeled).
    pub fn platform(&self, id: SiteId) -> &str {
        self.platforms
            .get(id)
            .map(String::as_str)
            .unwrap_or(UNKNOWN_CMS)
    }

    /// Site count per normalized label, `Unknown` included.
    pub fn platform_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for label in &self.platforms {
            *counts.entry(label.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Site ids per normalized label.
    pub fn platform_sites(&self) -> BTreeMap<String, BTreeSet<SiteId>> {
        let mut groups: BTreeMap<String, BTreeSet<SiteId>> = BTreeMap::new();
        for (id, label) in self.platforms.iter().enumerate() {
            groups.entry(label.clone()).or_default().insert(id);
        }
        groups
    }

    /// Site ids per normalized label, without `Unknown`.
    pub fn labeled_platform_sites(&self) -> BTreeMap<String, BTreeSet<SiteId>> {
        let mut groups = self.platform_sites();
        groups.remove(UNKNOWN_CMS);
        groups
    }

    pub fn duplicates_dropped(&self) -> usize {
        self.duplicates_dropped
    }

    pub fn malformed_dropped(&self) -> usize {
        self.malformed_dropped
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn lenient_value_map<'de, D>(deserializer: D) -> std::result::Result<ValueMap, D::Error>
where
    D: Deserializer<'de>,
{
    let Value::Object(raw) = Value::deserialize(deserializer)? else {
        return Ok(ValueMap::new());
    };
    let mut map = ValueMap::new();
    for (name, value) in raw {
        let values = map.entry(name).or_default();
        match value {
            Value::Array(items) => values.extend(items.iter().filter_map(scalar_to_string)),
            other => values.extend(scalar_to_string(&other)),
        }
    }
    Ok(map)
}

fn lenient_string_set<'de, D>(deserializer: D) -> std::result::Result<BTreeSet<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    Ok(match raw {
        Value::Array(items) => items.iter().filter_map(scalar_to_string).collect(),
        other => scalar_to_string(&other).into_iter().collect(),
    })
}

fn lenient_f64<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    Ok(match raw {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    })
}

fn lenient_timestamp<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    Ok(match raw {
        Value::String(s) => DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    })
}
