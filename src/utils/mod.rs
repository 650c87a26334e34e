//! Utility functions and helpers.

pub mod http;
pub mod progress;

use url::Url;

/// Resolve a potentially relative URL against a base URL.
pub fn resolve_url(base: &Url, href: &str) -> String {
    base.join(href)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_url() {
        let base = Url::parse("https://example.com/feeds/").unwrap();
        assert_eq!(
            resolve_url(&base, "region.xml"),
            "https://example.com/feeds/region.xml"
        );
        assert_eq!(
            resolve_url(&base, "/root.xml"),
            "https://example.com/root.xml"
        );
        assert_eq!(
            resolve_url(&base, "https://other.com/x.zip"),
            "https://other.com/x.zip"
        );
    }

    #[test]
    fn test_resolve_parent_segment() {
        let base = Url::parse("https://example.com/a/b.xml").unwrap();
        assert_eq!(resolve_url(&base, "../c.zip"), "https://example.com/c.zip");
    }
}
