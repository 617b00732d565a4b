// Test corpora shared across analyzer tests
use crate::corpus::{PreprocessedCorpus, SiteRecord};

/// Two WordPress sites sharing `x-wp-total` + `x-pingback`, one Drupal site.
pub fn wordpress_drupal_corpus() -> PreprocessedCorpus {
    PreprocessedCorpus::new(vec![
        SiteRecord::new("https://wp-one.example")
            .with_cms("WordPress")
            .with_header("x-wp-total", "12")
            .with_header("x-pingback", "https://wp-one.example/xmlrpc.php")
            .with_header("server", "nginx"),
        SiteRecord::new("https://wp-two.example")
            .with_cms("wordpress")
            .with_header("X-WP-Total", "40")
            .with_header("X-Pingback", "https://wp-two.example/xmlrpc.php")
            .with_header("server", "Apache"),
        SiteRecord::new("https://drupal.example")
            .with_cms("Drupal 9")
            .with_header("x-drupal-cache", "HIT")
            .with_header("server", "nginx"),
    ])
}

/// A header on 2/2 Joomla sites and 35/963 unlabeled sites.
pub fn joomla_unknown_corpus() -> PreprocessedCorpus {
    let mut records = Vec::with_capacity(965);
    for i in 0..2 {
        records.push(
            SiteRecord::new(format!("https://joomla-{}.example", i))
                .with_cms("Joomla")
                .with_header("x-content-encoded-by", "Joomla! 4")
                .with_meta("generator", "Joomla! - Open Source Content Management"),
        );
    }
    for i in 0..963 {
        let mut site = SiteRecord::new(format!("https://site-{}.example", i)).with_header("server", "nginx");
        if i < 35 {
            site = site.with_header("x-content-encoded-by", "Joomla! 3");
        }
        records.push(site);
    }
    PreprocessedCorpus::new(records)
}

/// Labeled corpus with enough sites per platform for statistical confidence.
pub fn multi_platform_corpus(per_platform: usize) -> PreprocessedCorpus {
    let mut records = Vec::new();
    for i in 0..per_platform {
        records.push(
            SiteRecord::new(format!("https://wp-{}.example", i))
                .with_cms("WordPress")
                .with_header("x-pingback", "/xmlrpc.php")
                .with_header("link", "<https://wp.example/wp-json/>; rel=\"https://api.w.org/\"")
                .with_header("server", "nginx")
                .with_header("cache-control", "no-cache")
                .with_meta("generator", "WordPress 6.4")
                .with_script("/wp-content/themes/theme/app.js"),
        );
        records.push(
            SiteRecord::new(format!("https://drupal-{}.example", i))
                .with_cms("Drupal")
                .with_header("x-drupal-cache", "HIT")
                .with_header("x-generator", "Drupal 10 (https://www.drupal.org)")
                .with_header("server", "Apache")
                .with_header("cache-control", "max-age=300")
                .with_meta("generator", "Drupal 10")
                .with_script("/core/misc/drupal.js"),
        );
        let mut shop = SiteRecord::new(format!("https://shop-{}.example", i))
            .with_cms("Shopify")
            .with_header("x-shopid", "1234")
            .with_header("x-shardid", "7")
            .with_header("server", "cloudflare")
            .with_header("cf-ray", "8a1b2c3d4e-AMS")
            .with_script("https://cdn.shopify.com/s/files/1/theme.js");
        if i % 2 == 0 {
            shop = shop.with_header("x-custom-trace", "abc");
        }
        records.push(shop);
    }
    PreprocessedCorpus::new(records)
}
