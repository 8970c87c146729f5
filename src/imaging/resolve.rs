use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use super::probe::{ProbeConfig, ProbeFetch, Prober};
use super::{proxy, rewrite};
use crate::metrics;

pub const DEFAULT_BASE_ORIGIN: &str = "http://localhost:3000";
pub const DEFAULT_FALLBACK_URL: &str = "https://placehold.co/800x600.jpg?text=Image+Unavailable";

/// True only for well-formed absolute URLs with an `http` or `https` scheme.
pub fn is_valid_image_url(candidate: &str) -> bool {
    match reqwest::Url::parse(candidate) {
        Ok(url) => matches!(url.scheme(), "http" | "https"),
        Err(_) => false,
    }
}

/// Which pipeline stage produced the final URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMethod {
    Original,
    Converted,
    Proxy,
    Fallback,
}

impl ProcessingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingMethod::Original => "original",
            ProcessingMethod::Converted => "converted",
            ProcessingMethod::Proxy => "proxy",
            ProcessingMethod::Fallback => "fallback",
        }
    }

    /// Selection rank, lower is better.
    pub fn priority(&self) -> u8 {
        match self {
            ProcessingMethod::Original => 0,
            ProcessingMethod::Converted => 1,
            ProcessingMethod::Proxy => 2,
            ProcessingMethod::Fallback => 3,
        }
    }
}

/// Outcome of resolving one image reference. `processed_url` is always a
/// non-empty absolute URL; when nothing could be confirmed it is either the
/// pass-through original (lenient mode) or the placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub processed_url: String,
    pub is_valid: bool,
    pub original_url: String,
    pub processing_method: ProcessingMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProcessingResult {
    fn resolved(original: &str, processed: String, method: ProcessingMethod) -> Self {
        Self {
            processed_url: processed,
            is_valid: true,
            original_url: original.to_string(),
            processing_method: method,
            error: None,
        }
    }
}

#[derive(Debug, Error)]
enum ResolveFailure {
    #[error("not an absolute http(s) url: `{candidate}`")]
    Malformed { candidate: String },
    #[error("no method confirmed `{url}` reachable")]
    Unreachable { url: String },
}

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub probe: ProbeConfig,
    pub base_origin: String,
    pub fallback_url: String,
    pub proxy_root: String,
    /// Prefer passing a well-formed original through over the placeholder
    /// when only probing failed. Probe failure is a hint, not proof.
    pub lenient_fallback: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            probe: ProbeConfig::default(),
            base_origin: DEFAULT_BASE_ORIGIN.to_string(),
            fallback_url: DEFAULT_FALLBACK_URL.to_string(),
            proxy_root: proxy::DEFAULT_PROXY_ROOT.to_string(),
            lenient_fallback: true,
        }
    }
}

impl ResolverConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            probe: ProbeConfig::from_env(),
            base_origin: env_or("IMAGE_BASE_ORIGIN", defaults.base_origin),
            fallback_url: env_or("IMAGE_FALLBACK_URL", defaults.fallback_url),
            proxy_root: env_or("IMAGE_PROXY_ROOT", defaults.proxy_root),
            lenient_fallback: std::env::var("IMAGE_LENIENT_FALLBACK")
                .map(|v| !matches!(v.trim().to_lowercase().as_str(), "0" | "false" | "no" | "off"))
                .unwrap_or(defaults.lenient_fallback),
        }
    }
}

fn env_or(name: &str, default: String) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or(default)
}

/// Ordered attempt list over one URL: direct probe, CDN rewrite, proxy,
/// fallback. Public entry points never fail; degradation is encoded in the
/// returned [`ProcessingResult`].
pub struct ImageResolver {
    config: ResolverConfig,
    prober: Prober,
}

impl ImageResolver {
    pub fn new(config: ResolverConfig) -> Self {
        let prober = Prober::new(config.probe.clone());
        Self { config, prober }
    }

    pub fn with_fetch(config: ResolverConfig, fetch: Arc<dyn ProbeFetch>) -> Self {
        let prober = Prober::with_fetch(config.probe.clone(), fetch);
        Self { config, prober }
    }

    pub fn from_env() -> Self {
        Self::new(ResolverConfig::from_env())
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolve one image reference. Empty input short-circuits to the
    /// placeholder without any network activity.
    pub async fn process_image_url(
        &self,
        url: &str,
        base_origin: Option<&str>,
    ) -> ProcessingResult {
        if url.trim().is_empty() {
            metrics::resolution_method(ProcessingMethod::Fallback.as_str());
            return self.placeholder_result(url, "empty image url");
        }
        let result = match self.resolve(url, base_origin).await {
            Ok(result) => result,
            Err(failure) => self.demote(url, failure),
        };
        metrics::resolution_method(result.processing_method.as_str());
        result
    }

    /// Resolve every candidate concurrently. Order-preserving, one result per
    /// input; a failed candidate yields its own fallback result instead of
    /// aborting the batch.
    pub async fn process_multiple_image_urls(
        &self,
        urls: &[String],
        base_origin: Option<&str>,
    ) -> Vec<ProcessingResult> {
        join_all(
            urls.iter()
                .map(|url| self.process_image_url(url, base_origin)),
        )
        .await
    }

    /// Resolve every candidate and keep the one with the best method in the
    /// order original > converted > proxy > fallback. Ties keep the earliest
    /// candidate, so an all-fallback batch returns the first result.
    pub async fn get_best_image_url(
        &self,
        urls: &[String],
        base_origin: Option<&str>,
    ) -> ProcessingResult {
        if urls.is_empty() {
            return self.placeholder_result("", "no candidate urls");
        }
        self.process_multiple_image_urls(urls, base_origin)
            .await
            .into_iter()
            .min_by_key(|result| result.processing_method.priority())
            .unwrap_or_else(|| self.placeholder_result("", "no candidate urls"))
    }

    async fn resolve(
        &self,
        original: &str,
        base_origin: Option<&str>,
    ) -> Result<ProcessingResult, ResolveFailure> {
        let absolute = self.absolutize(original.trim(), base_origin);
        if !is_valid_image_url(&absolute) {
            return Err(ResolveFailure::Malformed { candidate: absolute });
        }

        if self.prober.is_accessible(&absolute).await {
            return Ok(ProcessingResult::resolved(
                original,
                absolute,
                ProcessingMethod::Original,
            ));
        }

        if let Some(rewritten) = rewrite::strip_cdn_directives(&absolute)
            && self.prober.is_accessible(&rewritten).await
        {
            debug!(
                target = "iris.imaging",
                original = absolute,
                rewritten = rewritten,
                "cdn_rewrite_confirmed"
            );
            return Ok(ProcessingResult::resolved(
                original,
                rewritten,
                ProcessingMethod::Converted,
            ));
        }

        let proxied = proxy::build_proxy_url(&self.config.proxy_root, &absolute);
        if self.prober.is_accessible(&proxied).await {
            return Ok(ProcessingResult::resolved(
                original,
                proxied,
                ProcessingMethod::Proxy,
            ));
        }

        Err(ResolveFailure::Unreachable { url: absolute })
    }

    fn absolutize(&self, input: &str, base_origin: Option<&str>) -> String {
        if input.starts_with('/') {
            let base = base_origin.unwrap_or(&self.config.base_origin);
            format!("{}{}", base.trim_end_matches('/'), input)
        } else {
            input.to_string()
        }
    }

    fn demote(&self, original: &str, failure: ResolveFailure) -> ProcessingResult {
        match failure {
            ResolveFailure::Unreachable { url } if self.config.lenient_fallback => {
                debug!(
                    target = "iris.imaging",
                    url = url,
                    "lenient_passthrough_of_unconfirmed_original"
                );
                ProcessingResult {
                    processed_url: url,
                    is_valid: true,
                    original_url: original.to_string(),
                    processing_method: ProcessingMethod::Fallback,
                    error: Some("probe could not confirm url; passing original through".into()),
                }
            }
            failure => self.placeholder_result(original, &failure.to_string()),
        }
    }

    fn placeholder_result(&self, original: &str, error: &str) -> ProcessingResult {
        ProcessingResult {
            processed_url: self.config.fallback_url.clone(),
            is_valid: true,
            original_url: original.to_string(),
            processing_method: ProcessingMethod::Fallback,
            error: Some(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::probe::{FetchFailure, ProbeSnapshot};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    struct ScriptedFetch {
        reachable: Vec<&'static str>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedFetch {
        fn new(reachable: &[&'static str]) -> Arc<Self> {
            Arc::new(Self {
                reachable: reachable.to_vec(),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        fn first_call(&self) -> Option<String> {
            self.calls.lock().unwrap().first().cloned()
        }
    }

    #[async_trait]
    impl ProbeFetch for ScriptedFetch {
        async fn head(
            &self,
            url: &str,
            _timeout: Duration,
        ) -> Result<ProbeSnapshot, FetchFailure> {
            self.calls.lock().unwrap().push(url.to_string());
            if self.reachable.iter().any(|pattern| url.contains(pattern)) {
                Ok(ProbeSnapshot {
                    status: 200,
                    content_type: Some("image/jpeg".to_string()),
                })
            } else {
                Err(FetchFailure::Request("connection refused".to_string()))
            }
        }
    }

    fn quick_config() -> ResolverConfig {
        ResolverConfig {
            probe: ProbeConfig {
                attempt_timeout: Duration::from_millis(50),
                attempts: 3,
                backoff_step: Duration::ZERO,
                bypass_loopback: true,
            },
            ..ResolverConfig::default()
        }
    }

    fn resolver(fetch: Arc<ScriptedFetch>) -> ImageResolver {
        ImageResolver::with_fetch(quick_config(), fetch)
    }

    #[test]
    fn validator_accepts_only_absolute_http_urls() {
        assert!(is_valid_image_url("http://shop.test/a.jpg"));
        assert!(is_valid_image_url("https://shop.test/a.jpg?w=1"));

        assert!(!is_valid_image_url(""));
        assert!(!is_valid_image_url("/relative/path.jpg"));
        assert!(!is_valid_image_url("ftp://shop.test/a.jpg"));
        assert!(!is_valid_image_url("not a url"));
        assert!(!is_valid_image_url("https://"));
    }

    #[tokio::test]
    async fn empty_and_whitespace_inputs_fall_back_without_network() {
        let fetch = ScriptedFetch::new(&[]);
        let resolver = resolver(fetch.clone());

        for input in ["", "   ", "\t\n"] {
            let result = resolver.process_image_url(input, None).await;
            assert_eq!(result.processing_method, ProcessingMethod::Fallback);
            assert_eq!(result.processed_url, DEFAULT_FALLBACK_URL);
            assert!(result.is_valid);
            assert!(result.error.is_some());
        }
        assert_eq!(fetch.call_count(), 0);
    }

    #[tokio::test]
    async fn malformed_inputs_fall_back_to_placeholder_without_probing() {
        let fetch = ScriptedFetch::new(&[]);
        let resolver = resolver(fetch.clone());

        for input in ["not a url", "ftp://shop.test/a.jpg", "shop.test/a.jpg"] {
            let result = resolver.process_image_url(input, None).await;
            assert_eq!(result.processing_method, ProcessingMethod::Fallback);
            assert_eq!(result.processed_url, DEFAULT_FALLBACK_URL);
            assert!(result.is_valid);
            assert_eq!(result.original_url, input);
        }
        assert_eq!(fetch.call_count(), 0);
    }

    #[tokio::test]
    async fn reachable_url_resolves_as_original_and_is_idempotent() {
        let fetch = ScriptedFetch::new(&["https://good.test/real.jpg"]);
        let resolver = resolver(fetch);

        let first = resolver
            .process_image_url("https://good.test/real.jpg", None)
            .await;
        let second = resolver
            .process_image_url("https://good.test/real.jpg", None)
            .await;

        assert_eq!(first.processing_method, ProcessingMethod::Original);
        assert_eq!(first.processed_url, "https://good.test/real.jpg");
        assert!(first.error.is_none());
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn relative_input_prepends_supplied_base_origin() {
        let fetch = ScriptedFetch::new(&["https://example.test/img/hero.png"]);
        let resolver = resolver(fetch.clone());

        let result = resolver
            .process_image_url("/img/hero.png", Some("https://example.test"))
            .await;

        assert_eq!(
            fetch.first_call().as_deref(),
            Some("https://example.test/img/hero.png")
        );
        assert_eq!(result.processed_url, "https://example.test/img/hero.png");
        assert_eq!(result.processing_method, ProcessingMethod::Original);
        assert_eq!(result.original_url, "/img/hero.png");
    }

    #[tokio::test]
    async fn relative_input_defaults_to_local_origin_and_loopback_bypass() {
        let fetch = ScriptedFetch::new(&[]);
        let resolver = resolver(fetch.clone());

        let result = resolver.process_image_url("/img/hero.png", None).await;

        // localhost origin short-circuits the prober entirely.
        assert_eq!(result.processed_url, "http://localhost:3000/img/hero.png");
        assert_eq!(result.processing_method, ProcessingMethod::Original);
        assert_eq!(fetch.call_count(), 0);
    }

    #[tokio::test]
    async fn cdn_urls_fall_back_to_stripped_rewrite() {
        let reachable = "https://images-na.ssl-images-amazon.com/images/I/abc.jpg";
        let fetch = ScriptedFetch::new(&[reachable]);
        let resolver = resolver(fetch);

        let result = resolver
            .process_image_url(
                "https://images-na.ssl-images-amazon.com/images/I/abc._SX300_QL70_FMwebp_.jpg",
                None,
            )
            .await;

        assert_eq!(result.processing_method, ProcessingMethod::Converted);
        assert_eq!(result.processed_url, reachable);
    }

    #[tokio::test]
    async fn proxy_attempt_follows_direct_and_rewrite_failures() {
        let fetch = ScriptedFetch::new(&["images.weserv.nl"]);
        let resolver = resolver(fetch);

        let result = resolver
            .process_image_url("https://blocked.test/photo.png", None)
            .await;

        assert_eq!(result.processing_method, ProcessingMethod::Proxy);
        assert!(result.processed_url.starts_with("https://images.weserv.nl/?url="));
        assert!(
            result
                .processed_url
                .contains("https%3A%2F%2Fblocked.test%2Fphoto.png")
        );
    }

    #[tokio::test]
    async fn unreachable_wellformed_url_passes_through_when_lenient() {
        let fetch = ScriptedFetch::new(&[]);
        let resolver = resolver(fetch.clone());

        let result = resolver
            .process_image_url("https://dead.test/x.jpg", None)
            .await;

        assert_eq!(result.processing_method, ProcessingMethod::Fallback);
        assert_eq!(result.processed_url, "https://dead.test/x.jpg");
        assert!(result.error.is_some());
        // Direct and proxy stages probed, three attempts each; the CDN
        // rewrite stage is skipped for unrecognized hosts.
        assert_eq!(fetch.call_count(), 6);
    }

    #[tokio::test]
    async fn unreachable_url_degrades_to_placeholder_when_strict() {
        let fetch = ScriptedFetch::new(&[]);
        let config = ResolverConfig {
            lenient_fallback: false,
            ..quick_config()
        };
        let resolver = ImageResolver::with_fetch(config, fetch);

        let result = resolver
            .process_image_url("https://dead.test/x.jpg", None)
            .await;

        assert_eq!(result.processing_method, ProcessingMethod::Fallback);
        assert_eq!(result.processed_url, DEFAULT_FALLBACK_URL);
    }

    #[tokio::test]
    async fn batch_preserves_order_and_isolates_failures() {
        let fetch = ScriptedFetch::new(&["https://good.test/real.jpg"]);
        let resolver = resolver(fetch);
        let inputs = vec![
            "".to_string(),
            "https://good.test/real.jpg".to_string(),
            "https://dead.test/x.png".to_string(),
        ];

        let results = resolver.process_multiple_image_urls(&inputs, None).await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].processing_method, ProcessingMethod::Fallback);
        assert_eq!(results[1].processing_method, ProcessingMethod::Original);
        assert_eq!(results[2].processing_method, ProcessingMethod::Fallback);
        for (input, result) in inputs.iter().zip(&results) {
            assert_eq!(&result.original_url, input);
        }
    }

    #[tokio::test]
    async fn best_image_prefers_original_over_proxy_regardless_of_order() {
        let fetch = ScriptedFetch::new(&["https://good.test/real.jpg", "images.weserv.nl"]);
        let resolver = resolver(fetch);

        let proxy_only = "https://blocked.test/pic.png".to_string();
        let direct = "https://good.test/real.jpg".to_string();

        for candidates in [
            vec![proxy_only.clone(), direct.clone()],
            vec![direct.clone(), proxy_only.clone()],
        ] {
            let best = resolver.get_best_image_url(&candidates, None).await;
            assert_eq!(best.processing_method, ProcessingMethod::Original);
            assert_eq!(best.processed_url, direct);
        }
    }

    #[tokio::test]
    async fn best_image_keeps_first_result_when_all_fall_back() {
        let fetch = ScriptedFetch::new(&[]);
        let resolver = resolver(fetch);
        let candidates = vec![
            "https://dead-one.test/a.jpg".to_string(),
            "https://dead-two.test/b.jpg".to_string(),
        ];

        let best = resolver.get_best_image_url(&candidates, None).await;

        assert_eq!(best.processing_method, ProcessingMethod::Fallback);
        assert_eq!(best.original_url, "https://dead-one.test/a.jpg");
    }

    #[tokio::test]
    async fn best_image_handles_empty_candidate_list() {
        let fetch = ScriptedFetch::new(&[]);
        let resolver = resolver(fetch.clone());

        let best = resolver.get_best_image_url(&[], None).await;

        assert_eq!(best.processing_method, ProcessingMethod::Fallback);
        assert_eq!(best.processed_url, DEFAULT_FALLBACK_URL);
        assert_eq!(fetch.call_count(), 0);
    }

    #[tokio::test]
    async fn end_to_end_candidate_list_selects_reachable_original() {
        let fetch = ScriptedFetch::new(&["https://good.test/real.jpg"]);
        let resolver = resolver(fetch);
        let candidates = vec![
            "".to_string(),
            "https://bad.invalid.test/x.png".to_string(),
            "https://good.test/real.jpg".to_string(),
        ];

        let best = resolver.get_best_image_url(&candidates, None).await;

        assert_eq!(best.processing_method, ProcessingMethod::Original);
        assert_eq!(best.processed_url, "https://good.test/real.jpg");
    }
}
