use async_trait::async_trait;
use reqwest::Url;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::http;

/// What a single HEAD request revealed, reduced to the two facts the prober
/// cares about.
#[derive(Debug, Clone)]
pub struct ProbeSnapshot {
    pub status: u16,
    pub content_type: Option<String>,
}

impl ProbeSnapshot {
    pub fn confirms_image(&self) -> bool {
        (200..300).contains(&self.status)
            && self
                .content_type
                .as_deref()
                .map(|ct| ct.trim_start().to_ascii_lowercase().starts_with("image/"))
                .unwrap_or(false)
    }
}

#[derive(Debug, Error)]
pub enum FetchFailure {
    #[error("request failed: {0}")]
    Request(String),
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
}

/// Transport behind the prober. Production uses reqwest HEAD requests; tests
/// substitute a scripted transport and count calls.
#[async_trait]
pub trait ProbeFetch: Send + Sync {
    async fn head(&self, url: &str, timeout: Duration) -> Result<ProbeSnapshot, FetchFailure>;
}

pub struct HttpFetch {
    client: reqwest::Client,
}

impl HttpFetch {
    pub fn new() -> Self {
        Self {
            client: http::build_client(),
        }
    }
}

impl Default for HttpFetch {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProbeFetch for HttpFetch {
    async fn head(&self, url: &str, timeout: Duration) -> Result<ProbeSnapshot, FetchFailure> {
        let response = self
            .client
            .head(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    FetchFailure::TimedOut(timeout)
                } else {
                    FetchFailure::Request(err.to_string())
                }
            })?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());
        Ok(ProbeSnapshot {
            status: response.status().as_u16(),
            content_type,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub attempt_timeout: Duration,
    pub attempts: u32,
    pub backoff_step: Duration,
    pub bypass_loopback: bool,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(10),
            attempts: 3,
            backoff_step: Duration::from_secs(1),
            bypass_loopback: true,
        }
    }
}

impl ProbeConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            attempt_timeout: env_u64("IMAGE_PROBE_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.attempt_timeout),
            attempts: env_u64("IMAGE_PROBE_ATTEMPTS")
                .map(|n| n.clamp(1, 10) as u32)
                .unwrap_or(defaults.attempts),
            backoff_step: env_u64("IMAGE_PROBE_BACKOFF_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.backoff_step),
            bypass_loopback: env_bool("IMAGE_PROBE_BYPASS_LOOPBACK")
                .unwrap_or(defaults.bypass_loopback),
        }
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse::<u64>().ok())
}

fn env_bool(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

/// Bounded-retry existence check. Answers reachable-and-image-typed or not;
/// it never distinguishes "absent" from "timed out repeatedly".
pub struct Prober {
    fetch: Arc<dyn ProbeFetch>,
    config: ProbeConfig,
}

impl Prober {
    pub fn new(config: ProbeConfig) -> Self {
        Self::with_fetch(config, Arc::new(HttpFetch::new()))
    }

    pub fn with_fetch(config: ProbeConfig, fetch: Arc<dyn ProbeFetch>) -> Self {
        Self { fetch, config }
    }

    /// True when the URL answers a HEAD request with a success status and an
    /// `image/*` content type within the attempt budget. Backoff between
    /// attempts grows linearly (1s, 2s, ...). Loopback hosts short-circuit to
    /// reachable when the bypass is on.
    pub async fn is_accessible(&self, url: &str) -> bool {
        if self.config.bypass_loopback && is_loopback_url(url) {
            debug!(target = "iris.imaging", url = url, "probe_loopback_bypass");
            return true;
        }
        for attempt in 1..=self.config.attempts {
            match self.fetch.head(url, self.config.attempt_timeout).await {
                Ok(snapshot) if snapshot.confirms_image() => {
                    debug!(
                        target = "iris.imaging",
                        url = url,
                        attempt = attempt,
                        "probe_confirmed"
                    );
                    return true;
                }
                Ok(snapshot) => {
                    debug!(
                        target = "iris.imaging",
                        url = url,
                        attempt = attempt,
                        status = snapshot.status,
                        content_type = snapshot.content_type.as_deref().unwrap_or("none"),
                        "probe_rejected"
                    );
                }
                Err(failure) => {
                    debug!(
                        target = "iris.imaging",
                        url = url,
                        attempt = attempt,
                        error = %failure,
                        "probe_attempt_failed"
                    );
                }
            }
            if attempt < self.config.attempts {
                tokio::time::sleep(self.config.backoff_step * attempt).await;
            }
        }
        false
    }
}

fn is_loopback_url(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    matches!(
        parsed.host_str().map(|h| h.to_ascii_lowercase()).as_deref(),
        Some("localhost") | Some("127.0.0.1") | Some("[::1]")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct AlwaysFails {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ProbeFetch for AlwaysFails {
        async fn head(&self, _url: &str, timeout: Duration) -> Result<ProbeSnapshot, FetchFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(FetchFailure::TimedOut(timeout))
        }
    }

    struct FixedSnapshot {
        status: u16,
        content_type: Option<&'static str>,
    }

    #[async_trait]
    impl ProbeFetch for FixedSnapshot {
        async fn head(&self, _url: &str, _timeout: Duration) -> Result<ProbeSnapshot, FetchFailure> {
            Ok(ProbeSnapshot {
                status: self.status,
                content_type: self.content_type.map(|ct| ct.to_string()),
            })
        }
    }

    fn quick_config() -> ProbeConfig {
        ProbeConfig {
            attempt_timeout: Duration::from_millis(50),
            attempts: 3,
            backoff_step: Duration::from_millis(1),
            bypass_loopback: true,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_three_attempts_with_linear_backoff() {
        let fetch = Arc::new(AlwaysFails {
            calls: AtomicUsize::new(0),
        });
        let prober = Prober::with_fetch(ProbeConfig::default(), fetch.clone());

        let started = tokio::time::Instant::now();
        let accessible = prober.is_accessible("https://slow.test/img.jpg").await;

        assert!(!accessible);
        assert_eq!(fetch.calls.load(Ordering::SeqCst), 3);
        // Two gaps between three attempts: 1s then 2s.
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test]
    async fn accepts_success_status_with_image_content_type() {
        let fetch = Arc::new(FixedSnapshot {
            status: 200,
            content_type: Some("image/jpeg"),
        });
        let prober = Prober::with_fetch(quick_config(), fetch);
        assert!(prober.is_accessible("https://cdn.test/a.jpg").await);
    }

    #[tokio::test]
    async fn rejects_non_image_content_type() {
        let fetch = Arc::new(FixedSnapshot {
            status: 200,
            content_type: Some("text/html; charset=utf-8"),
        });
        let prober = Prober::with_fetch(quick_config(), fetch);
        assert!(!prober.is_accessible("https://cdn.test/page").await);
    }

    #[tokio::test]
    async fn rejects_error_status_even_with_image_content_type() {
        let fetch = Arc::new(FixedSnapshot {
            status: 403,
            content_type: Some("image/png"),
        });
        let prober = Prober::with_fetch(quick_config(), fetch);
        assert!(!prober.is_accessible("https://cdn.test/blocked.png").await);
    }

    #[tokio::test]
    async fn loopback_bypass_skips_network() {
        let fetch = Arc::new(AlwaysFails {
            calls: AtomicUsize::new(0),
        });
        let prober = Prober::with_fetch(quick_config(), fetch.clone());

        assert!(prober.is_accessible("http://localhost:3000/img.png").await);
        assert!(prober.is_accessible("http://127.0.0.1/img.png").await);
        assert_eq!(fetch.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn loopback_bypass_can_be_disabled() {
        let fetch = Arc::new(AlwaysFails {
            calls: AtomicUsize::new(0),
        });
        let config = ProbeConfig {
            bypass_loopback: false,
            ..quick_config()
        };
        let prober = Prober::with_fetch(config, fetch.clone());

        assert!(!prober.is_accessible("http://localhost:3000/img.png").await);
        assert_eq!(fetch.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn snapshot_requires_both_status_and_type() {
        let ok = ProbeSnapshot {
            status: 204,
            content_type: Some("image/webp".into()),
        };
        assert!(ok.confirms_image());

        let missing_type = ProbeSnapshot {
            status: 200,
            content_type: None,
        };
        assert!(!missing_type.confirms_image());
    }
}
