pub const DEFAULT_PROXY_ROOT: &str = "https://images.weserv.nl/";

const PROXY_MAX_WIDTH: u32 = 1200;
const PROXY_MAX_HEIGHT: u32 = 1200;
const PROXY_QUALITY: u32 = 85;

/// Build the last-resort fetch path through a public image-resizing proxy.
///
/// Purely textual: the original URL is encoded into the `url` query parameter
/// alongside fixed output parameters (JPEG, quality 85, bounded to 1200px,
/// fit inside). No network call is made here.
pub fn build_proxy_url(root: &str, original: &str) -> String {
    format!(
        "{}/?url={}&w={PROXY_MAX_WIDTH}&h={PROXY_MAX_HEIGHT}&fit=inside&output=jpg&q={PROXY_QUALITY}",
        root.trim_end_matches('/'),
        urlencoding::encode(original)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_original_url_into_query() {
        let url = build_proxy_url(DEFAULT_PROXY_ROOT, "https://shop.test/a b.jpg?v=1");

        assert!(url.starts_with("https://images.weserv.nl/?url="));
        assert!(url.contains("https%3A%2F%2Fshop.test%2Fa%20b.jpg%3Fv%3D1"));
        assert!(url.contains("output=jpg"));
        assert!(url.contains("fit=inside"));
        assert!(url.contains("w=1200"));
        assert!(url.contains("q=85"));
    }

    #[test]
    fn is_deterministic() {
        let first = build_proxy_url(DEFAULT_PROXY_ROOT, "https://shop.test/x.png");
        let second = build_proxy_url(DEFAULT_PROXY_ROOT, "https://shop.test/x.png");
        assert_eq!(first, second);
    }

    #[test]
    fn tolerates_roots_without_trailing_slash() {
        let url = build_proxy_url("https://proxy.test", "https://shop.test/x.png");
        assert!(url.starts_with("https://proxy.test/?url="));
    }
}
