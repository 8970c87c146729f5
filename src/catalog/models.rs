use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ImageField {
    Single(String),
    Multiple(Vec<String>),
}

impl ImageField {
    pub fn as_vec(&self) -> Vec<String> {
        match self {
            ImageField::Single(value) => vec![value.clone()],
            ImageField::Multiple(values) => values.clone(),
        }
    }
}

// Scrapers disagree on price shape: some emit numbers, some "$1,299.00".
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum PriceField {
    Number(f64),
    Text(String),
}

impl PriceField {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PriceField::Number(value) => Some(*value),
            PriceField::Text(raw) => {
                let cleaned: String = raw
                    .chars()
                    .filter(|c| c.is_ascii_digit() || *c == '.')
                    .collect();
                cleaned.parse::<f64>().ok()
            }
        }
    }
}

/// Product fields as different scraping actors report them. Every field is
/// optional; aliases absorb the common naming variants so one model covers
/// the actors we have seen in the wild.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct ScrapedProduct {
    #[serde(default, alias = "name")]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(
        default,
        alias = "image",
        alias = "imageUrls",
        alias = "image_urls",
        alias = "thumbnailImage"
    )]
    pub images: Option<ImageField>,
    #[serde(default)]
    pub price: Option<PriceField>,
    #[serde(default, alias = "priceCurrency", alias = "currencyCode")]
    pub currency: Option<String>,
    #[serde(default, alias = "brandName", alias = "manufacturer")]
    pub brand: Option<String>,
    #[serde(default, alias = "stars")]
    pub rating: Option<f64>,
    #[serde(
        default,
        alias = "reviewsCount",
        alias = "ratingsTotal",
        alias = "review_count"
    )]
    pub reviews_count: Option<u64>,
    #[serde(
        default,
        alias = "features",
        alias = "bulletPoints",
        alias = "feature_bullets"
    )]
    pub bullets: Option<Vec<String>>,
    #[serde(default, alias = "inStockText")]
    pub availability: Option<String>,
    #[serde(default, alias = "url", alias = "productUrl")]
    pub source_url: Option<String>,
}

impl ScrapedProduct {
    pub fn display_title(&self) -> &str {
        self.title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or("Untitled product")
    }

    pub fn image_list(&self) -> Vec<String> {
        self.images.as_ref().map(ImageField::as_vec).unwrap_or_default()
    }

    pub fn price_value(&self) -> Option<f64> {
        self.price.as_ref().and_then(PriceField::as_f64)
    }

    /// Display form like "49.99 USD", falling back to the raw scraped text.
    pub fn price_tag(&self) -> Option<String> {
        match (&self.price, self.price_value()) {
            (Some(_), Some(value)) => {
                let currency = self.currency.as_deref().unwrap_or("USD");
                Some(format!("{value:.2} {currency}"))
            }
            (Some(PriceField::Text(raw)), None) if !raw.trim().is_empty() => {
                Some(raw.trim().to_string())
            }
            _ => None,
        }
    }

    pub fn bullet_list(&self) -> Vec<String> {
        self.bullets
            .as_ref()
            .map(|bullets| {
                bullets
                    .iter()
                    .map(|b| b.trim().to_string())
                    .filter(|b| !b.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}
