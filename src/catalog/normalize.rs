use serde_json::Value;
use std::collections::HashSet;

use super::models::{ImageField, ScrapedProduct};

const MAX_IMAGES: usize = 8;
const MAX_BULLETS: usize = 6;

/// Reshape one raw scraper dataset item into a usable product. Tolerant by
/// construction: unknown shapes decay to an empty product rather than failing,
/// and the requested URL backfills the missing pieces.
pub fn normalize_scrape_item(raw: &Value, requested_url: &str) -> ScrapedProduct {
    let mut product: ScrapedProduct = serde_json::from_value(raw.clone()).unwrap_or_default();

    if product
        .title
        .as_deref()
        .map(|t| t.trim().is_empty())
        .unwrap_or(true)
    {
        product.title = Some(title_from_url(requested_url));
    }

    let images = dedupe_urls(product.image_list());
    product.images = if images.is_empty() {
        None
    } else {
        Some(ImageField::Multiple(
            images.into_iter().take(MAX_IMAGES).collect(),
        ))
    };

    if let Some(bullets) = &product.bullets {
        let cleaned: Vec<String> = bullets
            .iter()
            .map(|b| b.trim().to_string())
            .filter(|b| !b.is_empty())
            .take(MAX_BULLETS)
            .collect();
        product.bullets = if cleaned.is_empty() { None } else { Some(cleaned) };
    }

    if !requested_url.trim().is_empty()
        && product
            .source_url
            .as_deref()
            .map(|u| u.trim().is_empty())
            .unwrap_or(true)
    {
        product.source_url = Some(requested_url.to_string());
    }

    product
}

fn dedupe_urls(urls: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    urls.into_iter()
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty() && seen.insert(url.clone()))
        .collect()
}

/// Derive a readable title from the last meaningful path segment of the
/// product URL, e.g. ".../wireless-noise-cancelling-headphones/dp/B0..." has
/// a usable slug two segments up.
fn title_from_url(url: &str) -> String {
    let Ok(parsed) = reqwest::Url::parse(url) else {
        return "Untitled product".to_string();
    };
    let candidate = parsed
        .path_segments()
        .into_iter()
        .flatten()
        .filter(|segment| {
            let s = segment.trim();
            s.len() > 2 && s.contains('-') && !s.eq_ignore_ascii_case("dp")
        })
        .max_by_key(|segment| segment.len());

    match candidate {
        Some(slug) => {
            let words = slug
                .split(['-', '_', '+'])
                .filter(|w| !w.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            let mut chars = words.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => "Untitled product".to_string(),
            }
        }
        None => "Untitled product".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fills_title_from_url_slug() {
        let raw = json!({ "price": 19.99 });
        let product = normalize_scrape_item(
            &raw,
            "https://www.amazon.com/wireless-noise-cancelling-headphones/dp/B0TEST",
        );
        assert_eq!(
            product.display_title(),
            "Wireless noise cancelling headphones"
        );
        assert_eq!(
            product.source_url.as_deref(),
            Some("https://www.amazon.com/wireless-noise-cancelling-headphones/dp/B0TEST")
        );
    }

    #[test]
    fn dedupes_images_preserving_order() {
        let raw = json!({
            "title": "Lamp",
            "images": [
                "https://cdn.test/a.jpg",
                "https://cdn.test/b.jpg",
                "https://cdn.test/a.jpg",
                "  ",
            ]
        });
        let product = normalize_scrape_item(&raw, "https://shop.test/lamp");
        assert_eq!(
            product.image_list(),
            vec!["https://cdn.test/a.jpg", "https://cdn.test/b.jpg"]
        );
    }

    #[test]
    fn drops_empty_bullets_and_caps_the_list() {
        let raw = json!({
            "title": "Desk",
            "features": ["solid oak", "", "  ", "easy assembly", "a", "b", "c", "d", "e"]
        });
        let product = normalize_scrape_item(&raw, "https://shop.test/desk");
        let bullets = product.bullet_list();
        assert_eq!(bullets.len(), 6);
        assert_eq!(bullets[0], "solid oak");
        assert_eq!(bullets[1], "easy assembly");
    }

    #[test]
    fn unknown_payload_shapes_decay_to_defaults() {
        let raw = json!("not an object");
        let product = normalize_scrape_item(&raw, "https://shop.test/item-one");
        assert_eq!(product.display_title(), "Item one");
        assert!(product.image_list().is_empty());
    }
}
