//! Product catalog domain: the scraped-product model, the normalizer that
//! tames raw scraper payloads, and the creative brief assembled from them.

pub mod brief;
pub mod models;
pub mod normalize;

pub use brief::{AdCopy, CreativeBrief};
pub use models::{ImageField, PriceField, ScrapedProduct};
pub use normalize::normalize_scrape_item;
