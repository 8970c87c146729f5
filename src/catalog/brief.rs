use rand::SeedableRng;
use rand::rngs::SmallRng;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};

use super::models::ScrapedProduct;
use crate::models::AspectRatio;

const COPY_PROMPT: &str = r#"
You are an advertising copywriter. Given a product fact sheet, respond with a
valid JSON object with exactly these string fields: "headline" (max 8 words),
"caption" (one or two sentences), "call_to_action" (max 4 words). Write punchy
consumer ad copy grounded in the facts. Output JSON only.
"#;

const IMAGE_PROMPT: &str = "Studio-quality advertising photograph of the product, \
hero composition on a clean backdrop, soft key light, subtle reflection, \
no text overlays, no watermarks.";

const VIDEO_PROMPT: &str = "Short product showcase: a slow cinematic orbit around \
the product with soft studio lighting, shallow depth of field, premium \
commercial feel.";

const FALLBACK_HEADLINES: &[&str] = &[
    "Meet {title}",
    "Say hello to {title}",
    "{title}, upgraded",
    "Your next favorite: {title}",
];

const FALLBACK_CTAS: &[&str] = &["Shop now", "Get yours today", "See it in action", "Learn more"];

/// Final ad copy for one creative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdCopy {
    pub headline: String,
    pub caption: String,
    pub call_to_action: String,
}

/// Prompt bundle assembled from one product. Everything downstream providers
/// need is derived here so the pipeline stages stay thin.
#[derive(Debug, Clone)]
pub struct CreativeBrief {
    pub fact_sheet: String,
    pub copy_prompt: String,
    pub image_prompt: String,
    pub video_prompt: String,
}

pub fn build_brief(
    product: &ScrapedProduct,
    style: Option<&str>,
    aspect: AspectRatio,
) -> CreativeBrief {
    let fact_sheet = build_fact_sheet(product);
    let style_line = style
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| format!("\nCreative style direction: {s}."))
        .unwrap_or_default();

    let copy_prompt = format!("{COPY_PROMPT}\nFact sheet:\n{fact_sheet}{style_line}");
    let image_prompt = format!(
        "{IMAGE_PROMPT} The product: {}.{style_line} Aspect ratio {}.",
        product.display_title(),
        aspect.label()
    );
    let video_prompt = format!(
        "{VIDEO_PROMPT} The product: {}.{style_line}",
        product.display_title()
    );

    CreativeBrief {
        fact_sheet,
        copy_prompt,
        image_prompt,
        video_prompt,
    }
}

fn build_fact_sheet(product: &ScrapedProduct) -> String {
    let mut lines = vec![format!("Product: {}", product.display_title())];
    if let Some(brand) = product.brand.as_deref().filter(|b| !b.trim().is_empty()) {
        lines.push(format!("Brand: {brand}"));
    }
    if let Some(price) = product.price_tag() {
        lines.push(format!("Price: {price}"));
    }
    if let Some(rating) = product.rating {
        match product.reviews_count {
            Some(count) => lines.push(format!("Rating: {rating:.1} ({count} reviews)")),
            None => lines.push(format!("Rating: {rating:.1}")),
        }
    }
    let bullets = product.bullet_list();
    if !bullets.is_empty() {
        lines.push("Highlights:".to_string());
        for bullet in bullets {
            lines.push(format!("- {bullet}"));
        }
    }
    if let Some(description) = product
        .description
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
    {
        lines.push(truncate(description, 400));
    }
    lines.join("\n")
}

/// Parse the model's JSON reply into ad copy, shedding any markdown fence it
/// wrapped around the payload.
pub fn parse_copy_reply(reply: &str) -> Option<AdCopy> {
    let cleaned = strip_markdown_fence(reply);
    let copy: AdCopy = serde_json::from_str(&cleaned).ok()?;
    if copy.headline.trim().is_empty() {
        return None;
    }
    Some(copy)
}

pub fn strip_markdown_fence(input: &str) -> String {
    let trimmed = input.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    let mut body = Vec::new();
    for line in trimmed.lines().skip(1) {
        if line.trim_start().starts_with("```") {
            break;
        }
        body.push(line);
    }
    body.join("\n")
}

/// Deterministic copy used when the text model is unavailable. The seed keeps
/// repeated runs for the same product stable.
pub fn fallback_copy(product: &ScrapedProduct, seed: u64) -> AdCopy {
    let mut rng = SmallRng::seed_from_u64(seed);
    let title = truncate(product.display_title(), 60);

    let headline = FALLBACK_HEADLINES
        .choose(&mut rng)
        .unwrap_or(&FALLBACK_HEADLINES[0])
        .replace("{title}", &title);
    let call_to_action = FALLBACK_CTAS
        .choose(&mut rng)
        .unwrap_or(&FALLBACK_CTAS[0])
        .to_string();

    let mut caption_parts = Vec::new();
    if let Some(brand) = product.brand.as_deref().filter(|b| !b.trim().is_empty()) {
        caption_parts.push(format!("From {brand}."));
    }
    if let Some(bullet) = product.bullet_list().first() {
        caption_parts.push(format!("{}.", bullet.trim_end_matches('.')));
    }
    if let Some(price) = product.price_tag() {
        caption_parts.push(format!("Now {price}."));
    }
    if caption_parts.is_empty() {
        caption_parts.push(format!("{title} is here."));
    }

    AdCopy {
        headline,
        caption: caption_parts.join(" "),
        call_to_action,
    }
}

fn truncate(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let cut: String = value.chars().take(limit.saturating_sub(3)).collect();
    format!("{}...", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::models::PriceField;

    fn sample_product() -> ScrapedProduct {
        ScrapedProduct {
            title: Some("Aurora Desk Lamp".to_string()),
            brand: Some("Lumen".to_string()),
            price: Some(PriceField::Number(39.99)),
            currency: Some("USD".to_string()),
            bullets: Some(vec!["Warm dimmable light".to_string()]),
            ..ScrapedProduct::default()
        }
    }

    #[test]
    fn brief_carries_product_facts_into_every_prompt() {
        let brief = build_brief(&sample_product(), Some("cozy evening"), AspectRatio::Portrait);

        assert!(brief.fact_sheet.contains("Product: Aurora Desk Lamp"));
        assert!(brief.fact_sheet.contains("Brand: Lumen"));
        assert!(brief.fact_sheet.contains("39.99 USD"));
        assert!(brief.copy_prompt.contains("cozy evening"));
        assert!(brief.image_prompt.contains("Aurora Desk Lamp"));
        assert!(brief.image_prompt.contains("9:16"));
        assert!(brief.video_prompt.contains("Aurora Desk Lamp"));
    }

    #[test]
    fn parses_fenced_copy_replies() {
        let reply = "```json\n{\"headline\":\"Light, Reimagined\",\"caption\":\"Warm light on demand.\",\"call_to_action\":\"Shop now\"}\n```";
        let copy = parse_copy_reply(reply).unwrap();
        assert_eq!(copy.headline, "Light, Reimagined");
        assert_eq!(copy.call_to_action, "Shop now");
    }

    #[test]
    fn rejects_replies_without_a_headline() {
        let reply = "{\"headline\":\" \",\"caption\":\"x\",\"call_to_action\":\"y\"}";
        assert!(parse_copy_reply(reply).is_none());

        assert!(parse_copy_reply("not json at all").is_none());
    }

    #[test]
    fn fallback_copy_is_stable_per_seed() {
        let product = sample_product();
        let first = fallback_copy(&product, 42);
        let second = fallback_copy(&product, 42);
        assert_eq!(first, second);

        assert!(first.headline.contains("Aurora Desk Lamp"));
        assert!(first.caption.contains("From Lumen."));
        assert!(first.caption.contains("Warm dimmable light."));
        assert!(!first.call_to_action.is_empty());
    }
}
