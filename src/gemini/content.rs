use crate::http::build_client;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::config;

#[derive(Debug, Error)]
pub enum GeminiError {
    #[error("missing api key")]
    MissingApiKey,
    #[error("http error: {0}")]
    Http(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Base64 image payload inlined into a request or returned from one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InlinePayload {
    pub mime_type: String,
    pub data: String,
}

pub struct GeminiClient {
    http: Client,
}

impl GeminiClient {
    pub fn new() -> Self {
        Self {
            http: build_client(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !config::GEMINI_API_KEY.trim().is_empty()
    }

    /// Send a text prompt, optionally conditioned on an inlined image, and
    /// return the concatenated text parts of the first candidate.
    pub async fn generate_text(
        &self,
        prompt: &str,
        image: Option<&InlinePayload>,
    ) -> Result<String, GeminiError> {
        let response = self
            .generate(config::TEXT_MODEL.as_str(), prompt, image, false)
            .await?;
        let text = response.text();
        if text.trim().is_empty() {
            return Err(GeminiError::InvalidResponse("no text parts".into()));
        }
        Ok(text)
    }

    pub(super) async fn generate(
        &self,
        model: &str,
        prompt: &str,
        image: Option<&InlinePayload>,
        want_image: bool,
    ) -> Result<GenerateResponse, GeminiError> {
        if !self.is_configured() {
            return Err(GeminiError::MissingApiKey);
        }

        let mut parts = vec![Part {
            text: Some(prompt.to_string()),
            inline_data: None,
        }];
        if let Some(payload) = image {
            parts.push(Part {
                text: None,
                inline_data: Some(InlineData {
                    mime_type: payload.mime_type.clone(),
                    data: payload.data.clone(),
                }),
            });
        }

        let body = GenerateRequest {
            contents: vec![Content { parts }],
            generation_config: want_image.then(|| GenerationConfig {
                response_modalities: vec!["TEXT".to_string(), "IMAGE".to_string()],
            }),
        };

        let url = format!(
            "{}/models/{}:generateContent?key={}",
            config::ROOT.trim_end_matches('/'),
            model,
            config::GEMINI_API_KEY.as_str()
        );

        let response = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|err| GeminiError::Http(err.to_string()))?;

        if !response.status().is_success() {
            return Err(GeminiError::Http(format!("HTTP {}", response.status())));
        }

        response
            .json::<GenerateResponse>()
            .await
            .map_err(|err| GeminiError::InvalidResponse(err.to_string()))
    }
}

impl Default for GeminiClient {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    #[serde(rename = "responseModalities")]
    response_modalities: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

impl GenerateResponse {
    pub(super) fn text(&self) -> String {
        self.parts()
            .filter_map(|part| part.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub(super) fn inline_image(&self) -> Option<InlinePayload> {
        self.parts().find_map(|part| {
            part.inline_data.as_ref().map(|inline| InlinePayload {
                mime_type: inline
                    .mime_type
                    .clone()
                    .unwrap_or_else(|| "image/png".to_string()),
                data: inline.data.clone(),
            })
        })
    }

    fn parts(&self) -> impl Iterator<Item = &ResponsePart> {
        self.candidates
            .iter()
            .filter_map(|candidate| candidate.content.as_ref())
            .flat_map(|content| content.parts.iter())
    }
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default, alias = "inlineData")]
    inline_data: Option<ResponseInline>,
}

#[derive(Debug, Deserialize)]
struct ResponseInline {
    #[serde(alias = "mimeType")]
    mime_type: Option<String>,
    data: String,
}
