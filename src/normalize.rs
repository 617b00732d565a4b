// Key, value and CMS label normalization shared by every analyzer
use unicode_normalization::UnicodeNormalization;

pub const UNKNOWN_CMS: &str = "Unknown";

/// Canonical form of a pattern name: NFKC, trimmed, lowercase.
pub fn normalize_key(raw: &str) -> String {
    raw.nfkc().collect::<String>().trim().to_lowercase()
}

/// Truncate on a char boundary, marking the cut with an ellipsis.
pub fn truncate_value(value: &str, max_chars: usize) -> String {
    let trimmed = value.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(max_chars).collect();
    out.push('…');
    out
}

/// Map raw collector labels onto one name per platform.
pub fn normalize_cms_label(raw: Option<&str>) -> String {
    let Some(raw) = raw else {
        return UNKNOWN_CMS.to_string();
    };
    let lowered = normalize_key(raw);
    let cleaned = lowered.trim_end_matches('!').trim();
    if cleaned.is_empty() || cleaned == "unknown" || cleaned == "none" || cleaned == "null" {
        return UNKNOWN_CMS.to_string();
    }

    // Strip trailing version numbers ("drupal 7", "wordpress 6.4")
    let base = cleaned
        .split_whitespace()
        .take_while(|part| !part.chars().next().is_some_and(|c| c.is_ascii_digit()))
        .collect::<Vec<_>>()
        .join(" ");
    let base = if base.is_empty() { cleaned.to_string() } else { base };

    let canonical = match base.as_str() {
        "wordpress" | "wp" => "WordPress",
        "drupal" => "Drupal",
        "joomla" => "Joomla",
        "duda" => "Duda",
        "shopify" => "Shopify",
        "wix" => "Wix",
        "squarespace" => "Squarespace",
        "magento" | "adobe commerce" => "Magento",
        "typo3" | "typo3 cms" => "TYPO3",
        "ghost" => "Ghost",
        "webflow" => "Webflow",
        "hubspot" | "hubspot cms" => "HubSpot",
        _ => return title_case(&base),
    };
    canonical.to_string()
}

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_key_is_case_insensitive() {
        assert_eq!(normalize_key("X-Powered-By"), normalize_key("x-powered-by"));
        assert_eq!(normalize_key("  Server "), "server");
    }

    #[test]
    fn test_normalize_key_folds_compatibility_forms() {
        // Fullwidth letters collapse under NFKC
        assert_eq!(normalize_key("ＳＥＲＶＥＲ"), "server");
    }

    #[test]
    fn test_truncate_value() {
        assert_eq!(truncate_value("short", 10), "short");
        assert_eq!(truncate_value("abcdefghij", 4), "abcd…");
        // Multi-byte characters never split
        assert_eq!(truncate_value("ééééé", 2), "éé…");
    }

    #[test]
    fn test_cms_label_variants() {
        assert_eq!(normalize_cms_label(Some("drupal 7")), "Drupal");
        assert_eq!(normalize_cms_label(Some("Joomla!")), "Joomla");
        assert_eq!(normalize_cms_label(Some("WordPress")), "WordPress");
        assert_eq!(normalize_cms_label(Some("  ")), UNKNOWN_CMS);
        assert_eq!(normalize_cms_label(None), UNKNOWN_CMS);
        assert_eq!(normalize_cms_label(Some("craft cms")), "Craft Cms");
    }
}
