use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CreativeRequest {
    #[serde(default)]
    pub product_url: Option<String>,
    #[serde(default)]
    pub images: Option<ImagesSource>,
    #[serde(default)]
    pub base_origin: Option<String>,
    #[serde(default)]
    pub format: CreativeFormat,
    #[serde(default)]
    pub aspect_ratio: AspectRatio,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub overrides: Option<PipelineOverrides>,
    #[serde(default)]
    pub dry_run: bool,
}

impl CreativeRequest {
    /// Candidate image URLs supplied directly on the request, if any.
    pub fn image_list(&self) -> Vec<String> {
        match &self.images {
            Some(ImagesSource::Single(url)) => vec![url.clone()],
            Some(ImagesSource::Multiple(urls)) => urls.clone(),
            None => Vec::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CreativeResponse {
    pub creative_id: String,
    pub assets: CreativeAssets,
    pub stages: Vec<StageReport>,
}

#[skip_serializing_none]
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct CreativeAssets {
    pub image_url: Option<String>,
    pub video_url: Option<String>,
    pub headline: Option<String>,
    pub caption: Option<String>,
    pub call_to_action: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StageReport {
    pub name: String,
    pub elapsed_ms: u128,
    pub timestamp: DateTime<Utc>,
    pub output: Value,
}

impl StageReport {
    pub fn new(name: &str, elapsed_ms: u128, output: Value) -> Self {
        Self {
            name: name.to_string(),
            elapsed_ms,
            timestamp: Utc::now(),
            output,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdCopyInput {
    pub headline: String,
    pub caption: String,
    pub call_to_action: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineOverrides {
    #[serde(default)]
    pub resolved_images: Option<Vec<String>>,
    #[serde(default)]
    pub copy: Option<AdCopyInput>,
    #[serde(default)]
    pub product: Option<Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CreativeFormat {
    #[default]
    Image,
    Video,
    Bundle,
}

impl CreativeFormat {
    pub fn wants_image(&self) -> bool {
        matches!(self, CreativeFormat::Image | CreativeFormat::Bundle)
    }

    pub fn wants_video(&self) -> bool {
        matches!(self, CreativeFormat::Video | CreativeFormat::Bundle)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AspectRatio {
    #[default]
    Square,
    Portrait,
    Landscape,
}

impl AspectRatio {
    pub fn label(&self) -> &'static str {
        match self {
            AspectRatio::Square => "1:1",
            AspectRatio::Portrait => "9:16",
            AspectRatio::Landscape => "16:9",
        }
    }

    pub fn from_str(input: &str) -> Option<Self> {
        match input.trim().to_lowercase().as_str() {
            "square" | "1:1" => Some(AspectRatio::Square),
            "portrait" | "9:16" => Some(AspectRatio::Portrait),
            "landscape" | "16:9" => Some(AspectRatio::Landscape),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ImagesSource {
    Single(String),
    Multiple(Vec<String>),
}
