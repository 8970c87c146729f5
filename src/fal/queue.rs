use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

use crate::http::build_client;

const DEFAULT_QUEUE_ROOT: &str = "https://queue.fal.run";
const DEFAULT_VIDEO_MODEL: &str = "fal-ai/kling-video/v1.6/standard/image-to-video";
const DEFAULT_POLL_INTERVAL_MS: u64 = 3_000;
const DEFAULT_POLL_ATTEMPTS: u32 = 100;

#[derive(Debug, Clone)]
pub struct FalConfig {
    pub api_key: String,
    pub queue_root: String,
    pub video_model: String,
    pub poll_interval: Duration,
    pub poll_attempts: u32,
}

impl FalConfig {
    pub fn from_env() -> Self {
        let poll_interval_ms = std::env::var("FAL_POLL_INTERVAL_MS")
            .ok()
            .and_then(|raw| raw.parse::<u64>().ok())
            .unwrap_or(DEFAULT_POLL_INTERVAL_MS);
        let poll_attempts = std::env::var("FAL_POLL_ATTEMPTS")
            .ok()
            .and_then(|raw| raw.parse::<u32>().ok())
            .unwrap_or(DEFAULT_POLL_ATTEMPTS);
        Self {
            api_key: std::env::var("FAL_KEY").unwrap_or_default(),
            queue_root: std::env::var("FAL_QUEUE_ROOT")
                .unwrap_or_else(|_| DEFAULT_QUEUE_ROOT.to_string()),
            video_model: std::env::var("FAL_VIDEO_MODEL")
                .unwrap_or_else(|_| DEFAULT_VIDEO_MODEL.to_string()),
            poll_interval: Duration::from_millis(poll_interval_ms),
            poll_attempts,
        }
    }
}

#[derive(Debug, Error)]
pub enum FalError {
    #[error("FAL_KEY is not configured")]
    MissingApiKey,
    #[error("fal http error: {0}")]
    Http(String),
    #[error("fal request failed: {0}")]
    Request(String),
    #[error("fal returned an invalid response: {0}")]
    InvalidResponse(String),
    #[error("fal generation still pending after {0} polls")]
    TimedOut(u32),
    #[error("fal generation failed with status {0}")]
    Failed(String),
}

/// Handle returned by the queue when a generation request is accepted.
#[derive(Debug, Clone, Deserialize)]
pub struct VideoJob {
    pub request_id: String,
    pub status_url: String,
    pub response_url: String,
}

pub struct FalClient {
    http: Client,
    config: FalConfig,
}

impl FalClient {
    pub fn new(config: FalConfig) -> Self {
        Self {
            http: build_client(),
            config,
        }
    }

    pub fn from_env() -> Self {
        Self::new(FalConfig::from_env())
    }

    pub fn is_configured(&self) -> bool {
        !self.config.api_key.trim().is_empty()
    }

    pub fn video_model(&self) -> &str {
        &self.config.video_model
    }

    /// Enqueues an image-to-video generation and returns the queue handle.
    pub async fn submit_video(
        &self,
        prompt: &str,
        image_url: &str,
        aspect_ratio: &str,
    ) -> Result<VideoJob, FalError> {
        if !self.is_configured() {
            return Err(FalError::MissingApiKey);
        }

        let endpoint = format!(
            "{}/{}",
            self.config.queue_root.trim_end_matches('/'),
            self.config.video_model.trim_matches('/')
        );
        let body = json!({
            "prompt": prompt,
            "image_url": image_url,
            "aspect_ratio": aspect_ratio,
        });

        debug!(target = "iris.fal", endpoint = %endpoint, "submitting video generation");

        let response = self
            .http
            .post(&endpoint)
            .header("Authorization", format!("Key {}", self.config.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|err| FalError::Request(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(FalError::Http(format!("{status}: {detail}")));
        }

        let job = response
            .json::<VideoJob>()
            .await
            .map_err(|err| FalError::InvalidResponse(err.to_string()))?;

        debug!(target = "iris.fal", request_id = %job.request_id, "video generation queued");
        Ok(job)
    }

    /// Polls the queue until the job completes, then returns the video URL.
    pub async fn await_video(&self, job: &VideoJob) -> Result<String, FalError> {
        for poll in 1..=self.config.poll_attempts {
            let status = self.fetch_status(&job.status_url).await?;
            match status.as_str() {
                "COMPLETED" => return self.fetch_video_url(&job.response_url).await,
                "FAILED" | "ERROR" | "CANCELLED" => return Err(FalError::Failed(status)),
                _ => {
                    debug!(
                        target = "iris.fal",
                        request_id = %job.request_id,
                        status = %status,
                        poll,
                        "video generation pending"
                    );
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }

        Err(FalError::TimedOut(self.config.poll_attempts))
    }

    /// Submits a generation and blocks until the queue yields a video URL.
    pub async fn generate_video(
        &self,
        prompt: &str,
        image_url: &str,
        aspect_ratio: &str,
    ) -> Result<String, FalError> {
        let job = self.submit_video(prompt, image_url, aspect_ratio).await?;
        self.await_video(&job).await
    }

    async fn fetch_status(&self, status_url: &str) -> Result<String, FalError> {
        #[derive(serde::Deserialize)]
        struct StatusReply {
            status: String,
        }

        let response = self
            .http
            .get(status_url)
            .header("Authorization", format!("Key {}", self.config.api_key))
            .send()
            .await
            .map_err(|err| FalError::Request(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(FalError::Http(format!("{status}: {detail}")));
        }

        let reply = response
            .json::<StatusReply>()
            .await
            .map_err(|err| FalError::InvalidResponse(err.to_string()))?;
        Ok(reply.status)
    }

    async fn fetch_video_url(&self, response_url: &str) -> Result<String, FalError> {
        let response = self
            .http
            .get(response_url)
            .header("Authorization", format!("Key {}", self.config.api_key))
            .send()
            .await
            .map_err(|err| FalError::Request(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(FalError::Http(format!("{status}: {detail}")));
        }

        let payload = response
            .json::<Value>()
            .await
            .map_err(|err| FalError::InvalidResponse(err.to_string()))?;

        extract_video_url(&payload)
            .ok_or_else(|| FalError::InvalidResponse("no video url in completed result".to_string()))
    }
}

/// Models publish the result under slightly different shapes; check the common spots.
fn extract_video_url(payload: &Value) -> Option<String> {
    if let Some(url) = payload
        .get("video")
        .and_then(|video| video.get("url"))
        .and_then(Value::as_str)
    {
        return Some(url.to_string());
    }
    if let Some(url) = payload
        .get("videos")
        .and_then(Value::as_array)
        .and_then(|videos| videos.first())
        .and_then(|video| video.get("url"))
        .and_then(Value::as_str)
    {
        return Some(url.to_string());
    }
    if let Some(url) = payload.get("url").and_then(Value::as_str) {
        return Some(url.to_string());
    }
    payload
        .get("output")
        .and_then(|output| output.get("url").and_then(Value::as_str).or(output.as_str()))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_nested_video_url() {
        let payload = json!({"video": {"url": "https://cdn.fal.test/clip.mp4", "content_type": "video/mp4"}});
        assert_eq!(
            extract_video_url(&payload),
            Some("https://cdn.fal.test/clip.mp4".to_string())
        );
    }

    #[test]
    fn extracts_first_of_video_list() {
        let payload = json!({"videos": [{"url": "https://cdn.fal.test/a.mp4"}, {"url": "https://cdn.fal.test/b.mp4"}]});
        assert_eq!(
            extract_video_url(&payload),
            Some("https://cdn.fal.test/a.mp4".to_string())
        );
    }

    #[test]
    fn extracts_flat_and_output_shapes() {
        let flat = json!({"url": "https://cdn.fal.test/flat.mp4"});
        assert_eq!(
            extract_video_url(&flat),
            Some("https://cdn.fal.test/flat.mp4".to_string())
        );

        let output = json!({"output": {"url": "https://cdn.fal.test/out.mp4"}});
        assert_eq!(
            extract_video_url(&output),
            Some("https://cdn.fal.test/out.mp4".to_string())
        );

        assert_eq!(extract_video_url(&json!({"status": "COMPLETED"})), None);
    }

    #[tokio::test]
    async fn submit_requires_api_key() {
        let client = FalClient::new(FalConfig {
            api_key: String::new(),
            queue_root: DEFAULT_QUEUE_ROOT.to_string(),
            video_model: DEFAULT_VIDEO_MODEL.to_string(),
            poll_interval: Duration::from_millis(1),
            poll_attempts: 1,
        });
        assert!(!client.is_configured());
        let result = client.submit_video("a product spin", "https://img.test/a.jpg", "16:9").await;
        assert!(matches!(result, Err(FalError::MissingApiKey)));
    }
}
