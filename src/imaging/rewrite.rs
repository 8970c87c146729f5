use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;

// Amazon-family image CDNs encode render directives (size, quality, format)
// in a `._<DIRECTIVES>_.` path segment. The bare object URL without that
// segment is more reliably fetchable by third-party clients.
const CDN_HOST_SUFFIXES: &[&str] = &["ssl-images-amazon.com", "media-amazon.com"];

const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".gif", ".webp", ".bmp"];

static DIRECTIVE_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\._[A-Za-z0-9_,+%-]+_\.").unwrap());
static TRAILING_DIRECTIVE_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\._[A-Za-z0-9_,+%-]+_$").unwrap());

/// Strip render directives from a known e-commerce CDN image URL.
///
/// Returns `Some(rewritten)` only when the host belongs to the recognized CDN
/// family and the transformation actually changed the URL; `None` means
/// "nothing to try". The rewrite is a heuristic and its output must be
/// re-validated by the prober before use. If the stripped URL has no
/// recognized image extension left, `.jpg` is appended.
pub fn strip_cdn_directives(url: &str) -> Option<String> {
    if !is_cdn_host(url) {
        return None;
    }
    let mut rewritten = DIRECTIVE_BLOCK.replace_all(url, ".").into_owned();
    rewritten = TRAILING_DIRECTIVE_BLOCK
        .replace_all(&rewritten, "")
        .into_owned();
    if !has_image_extension(&rewritten) {
        rewritten.push_str(".jpg");
    }
    if rewritten == url { None } else { Some(rewritten) }
}

fn is_cdn_host(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };
    let host = host.to_ascii_lowercase();
    CDN_HOST_SUFFIXES
        .iter()
        .any(|suffix| host == *suffix || host.ends_with(&format!(".{suffix}")))
}

fn has_image_extension(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    IMAGE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}
