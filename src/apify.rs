use reqwest::Client;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

use crate::http::build_client;

const DEFAULT_API_BASE: &str = "https://api.apify.com";
const DEFAULT_ACTOR: &str = "junglee~amazon-crawler";

/// Client for the Apify actor that scrapes product pages.
#[derive(Debug, Clone)]
pub struct ApifyClient {
    api_base: String,
    actor: String,
    token: String,
    http: Client,
}

#[derive(Debug, Error)]
pub enum ApifyError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("invalid response: {0}")]
    Deserialize(String),
    #[error("actor run returned no dataset items")]
    EmptyDataset,
}

impl ApifyClient {
    pub fn from_env() -> Option<Self> {
        let token = std::env::var("APIFY_TOKEN").ok()?;
        let api_base = std::env::var("APIFY_API_BASE")
            .unwrap_or_else(|_| DEFAULT_API_BASE.to_string());
        let actor =
            std::env::var("APIFY_ACTOR").unwrap_or_else(|_| DEFAULT_ACTOR.to_string());
        Some(Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            actor,
            token,
            http: build_client(),
        })
    }

    /// Runs the actor synchronously against one product URL and returns the
    /// first dataset item as raw JSON.
    pub async fn scrape_product(&self, product_url: &str) -> Result<Value, ApifyError> {
        let endpoint = format!(
            "{}/v2/acts/{}/run-sync-get-dataset-items?token={}",
            self.api_base, self.actor, self.token
        );
        let body = json!({
            "startUrls": [{ "url": product_url }],
            "maxItemsPerStartUrl": 1,
        });

        debug!(target = "iris.apify", actor = %self.actor, "starting scrape run");

        let response = self
            .http
            .post(endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|err| ApifyError::Request(err.to_string()))?;

        if !response.status().is_success() {
            return Err(ApifyError::Request(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let mut items: Vec<Value> = response
            .json()
            .await
            .map_err(|err| ApifyError::Deserialize(err.to_string()))?;

        if items.is_empty() {
            return Err(ApifyError::EmptyDataset);
        }
        Ok(items.remove(0))
    }
}
