// Non-informative names excluded before counting when semantic filtering is on
use lazy_static::lazy_static;
use std::collections::{BTreeSet, HashSet};

lazy_static! {
    /// Protocol and caching headers every stack emits.
    static ref GENERIC_HEADERS: HashSet<&'static str> = [
        "date",
        "content-type",
        "content-length",
        "content-encoding",
        "content-language",
        "connection",
        "keep-alive",
        "transfer-encoding",
        "cache-control",
        "expires",
        "pragma",
        "etag",
        "last-modified",
        "vary",
        "accept-ranges",
        "age",
        "upgrade",
        "alt-svc",
        "server-timing",
        "timing-allow-origin",
        "nel",
        "report-to",
    ]
    .into_iter()
    .collect();

    /// Boilerplate meta tags carrying page content rather than stack hints.
    static ref BOILERPLATE_META: HashSet<&'static str> = [
        "viewport",
        "charset",
        "description",
        "keywords",
        "author",
        "robots",
        "googlebot",
        "theme-color",
        "format-detection",
        "referrer",
        "title",
        "og:title",
        "og:description",
        "og:url",
        "og:image",
        "og:image:width",
        "og:image:height",
        "og:image:alt",
        "twitter:title",
        "twitter:description",
        "twitter:image",
        "twitter:card",
        "apple-mobile-web-app-capable",
        "apple-mobile-web-app-title",
        "mobile-web-app-capable",
        "msapplication-tilecolor",
        "msapplication-tileimage",
    ]
    .into_iter()
    .collect();
}

/// Expects a normalized key. Checks the built-in list only.
pub fn is_generic_header(key: &str) -> bool {
    GENERIC_HEADERS.contains(key)
}

/// Built-in header skip list, the default for `skipHeaders`.
pub fn default_skip_headers() -> BTreeSet<String> {
    GENERIC_HEADERS.iter().map(|s| s.to_string()).collect()
}

/// Built-in meta skip list, the default for `skipMeta`.
pub fn default_skip_meta() -> BTreeSet<String> {
    BOILERPLATE_META.iter().map(|s| s.to_string()).collect()
}
