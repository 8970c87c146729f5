use crate::apify::ApifyClient;
use crate::cache::ScrapeCache;
use crate::catalog::brief::{self, CreativeBrief};
use crate::catalog::{AdCopy, ScrapedProduct, normalize_scrape_item};
use crate::fal::FalClient;
use crate::gemini::{GeminiClient, InlinePayload};
use crate::imaging::{ImageResolver, ProcessingMethod, ProcessingResult};
use crate::models::{CreativeAssets, CreativeRequest, CreativeResponse, StageReport};
use serde::Serialize;
use serde_json::{Value, json};
use std::{
    collections::hash_map::DefaultHasher,
    future::Future,
    hash::{Hash, Hasher},
    sync::Arc,
    time::Instant,
};
use thiserror::Error;
use tokio::time::{Duration, sleep};
use tracing::warn;
use uuid::Uuid;

#[derive(Clone)]
pub struct Pipeline {
    pub config: Arc<PipelineConfig>,
    pub resolver: Arc<ImageResolver>,
    gemini: Arc<GeminiClient>,
    fal: Arc<FalClient>,
    scraper: Option<ApifyClient>,
    cache: ScrapeCache,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config: Arc::new(config),
            resolver: Arc::new(ImageResolver::from_env()),
            gemini: Arc::new(GeminiClient::new()),
            fal: Arc::new(FalClient::from_env()),
            scraper: ApifyClient::from_env(),
            cache: ScrapeCache::from_env(),
        }
    }

    pub fn demo() -> Self {
        Self::new(PipelineConfig::default())
    }

    /// Swap the resolver, keeping the rest of the wiring. Lets callers (and
    /// tests) run resolution against a scripted transport.
    #[allow(dead_code)]
    pub fn with_resolver(self, resolver: ImageResolver) -> Self {
        Self {
            resolver: Arc::new(resolver),
            ..self
        }
    }

    // Public wrappers for granular stage endpoints
    pub async fn stage_fetch_product(
        &self,
        request: &CreativeRequest,
    ) -> Result<ScrapedProduct, PipelineError> {
        let out = stages::fetch_product(request, self.scraper.as_ref(), &self.cache).await?;
        Ok(out.value)
    }

    pub async fn stage_resolve_images(
        &self,
        request: &CreativeRequest,
    ) -> Result<ImageSelection, PipelineError> {
        let product = stages::synthesized_product(request);
        let out = stages::resolve_images(request, &product, &self.resolver).await?;
        Ok(out.value)
    }

    pub async fn stage_draft_copy(
        &self,
        request: &CreativeRequest,
    ) -> Result<AdCopy, PipelineError> {
        let product = stages::fetch_product(request, self.scraper.as_ref(), &self.cache)
            .await?
            .value;
        let seed = compute_seed(request, &product);
        let brief = self.build_brief(request, &product);
        let out = stages::draft_copy(request, &product, &brief, seed, &self.gemini).await?;
        Ok(out.value)
    }

    fn build_brief(&self, request: &CreativeRequest, product: &ScrapedProduct) -> CreativeBrief {
        let style = self.config.style_direction(request.style.as_deref());
        brief::build_brief(product, style.as_deref(), request.aspect_ratio)
    }

    pub async fn run(&self, request: CreativeRequest) -> Result<CreativeResponse, PipelineError> {
        validate_request(&request)?;
        let request = Arc::new(request);
        let mut stages = Vec::new();

        let product = self
            .capture_stage("fetch_product", &mut stages, {
                let req = request.clone();
                let scraper = self.scraper.clone();
                let cache = self.cache.clone();
                async move { stages::fetch_product(&req, scraper.as_ref(), &cache).await }
            })
            .await?;

        let selection = self
            .capture_stage("resolve_images", &mut stages, {
                let req = request.clone();
                let product = product.clone();
                let resolver = self.resolver.clone();
                async move { stages::resolve_images(&req, &product, &resolver).await }
            })
            .await?;

        let seed = compute_seed(&request, &product);
        let brief = self.build_brief(&request, &product);

        let copy = self
            .capture_stage("draft_copy", &mut stages, {
                let req = request.clone();
                let product = product.clone();
                let brief = brief.clone();
                let gemini = self.gemini.clone();
                async move { stages::draft_copy(&req, &product, &brief, seed, &gemini).await }
            })
            .await?;

        if request.dry_run {
            return Ok(CreativeResponse {
                creative_id: format!("PREVIEW-{}", Uuid::new_v4().simple()),
                assets: assets_from_copy(copy, None, None),
                stages,
            });
        }

        let image_url = if request.format.wants_image() {
            let asset = self
                .capture_stage("render_image", &mut stages, {
                    let brief = brief.clone();
                    let primary = selection.primary.clone();
                    let gemini = self.gemini.clone();
                    async move { stages::render_image(&brief, &primary, &gemini).await }
                })
                .await?;
            Some(asset)
        } else {
            None
        };

        let video_url = if request.format.wants_video() {
            // The video provider fetches its source image over HTTP, so a
            // data: URL from the render stage cannot anchor it.
            let anchor = match image_url.as_deref() {
                Some(url) if !url.starts_with("data:") => url.to_string(),
                _ => selection.primary.processed_url.clone(),
            };
            let aspect = request.aspect_ratio;
            let asset = self
                .capture_stage("render_video", &mut stages, {
                    let brief = brief.clone();
                    let fal = self.fal.clone();
                    async move { stages::render_video(&brief, &anchor, aspect, &fal).await }
                })
                .await?;
            Some(asset)
        } else {
            None
        };

        Ok(CreativeResponse {
            creative_id: format!("IRIS-{}", Uuid::new_v4().simple()),
            assets: assets_from_copy(copy, image_url, video_url),
            stages,
        })
    }

    async fn capture_stage<T, Fut>(
        &self,
        name: &'static str,
        stages: &mut Vec<StageReport>,
        fut: Fut,
    ) -> Result<T, PipelineError>
    where
        Fut: Future<Output = Result<StageOutcome<T>, PipelineError>>,
    {
        let started = Instant::now();
        let outcome = fut.await?;
        let elapsed_ms = started.elapsed().as_millis();
        crate::metrics::stage_elapsed(name, elapsed_ms);
        stages.push(StageReport::new(name, elapsed_ms, outcome.output));
        Ok(outcome.value)
    }
}

#[derive(Clone)]
pub struct PipelineConfig {
    pub styles: &'static [StylePreset],
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            styles: &STYLE_POOL,
        }
    }
}

impl PipelineConfig {
    /// Map a requested style onto prompt direction text. Preset names and
    /// their keywords win; anything unrecognized passes through verbatim as
    /// free-form direction.
    pub fn style_direction(&self, requested: Option<&str>) -> Option<String> {
        let requested = requested.map(str::trim).filter(|s| !s.is_empty())?;
        let lowered = requested.to_lowercase();
        for preset in self.styles {
            if preset.name == lowered || preset.keywords.contains(&lowered.as_str()) {
                return Some(preset.direction.to_string());
            }
        }
        Some(requested.to_string())
    }
}

#[derive(Clone, Copy)]
pub struct StylePreset {
    name: &'static str,
    direction: &'static str,
    keywords: &'static [&'static str],
}

const STYLE_POOL: [StylePreset; 5] = [
    StylePreset {
        name: "studio",
        direction: "clean seamless backdrop, soft key light, catalog hero composition",
        keywords: &["minimal", "catalog", "clean"],
    },
    StylePreset {
        name: "lifestyle",
        direction: "product placed in a warm, lived-in scene with natural window light",
        keywords: &["home", "cozy", "everyday"],
    },
    StylePreset {
        name: "bold",
        direction: "saturated color blocking, hard shadows, high-contrast graphic look",
        keywords: &["vivid", "graphic", "punchy"],
    },
    StylePreset {
        name: "luxury",
        direction: "dark backdrop, rim lighting, premium editorial mood",
        keywords: &["premium", "editorial", "elegant"],
    },
    StylePreset {
        name: "outdoor",
        direction: "golden-hour exterior setting with environmental context",
        keywords: &["adventure", "nature", "active"],
    },
];

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct PipelineError {
    stage: &'static str,
    message: String,
    kind: PipelineErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineErrorKind {
    InvalidInput,
    Internal,
}

impl PipelineError {
    pub fn invalid_input(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::InvalidInput,
        }
    }

    pub fn internal(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::Internal,
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> PipelineErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}

#[derive(Debug)]
pub struct StageOutcome<T> {
    pub value: T,
    pub output: Value,
}

impl<T> StageOutcome<T> {
    fn new(value: T, output: Value) -> Self {
        Self { value, output }
    }
}

/// Result of the image-resolution stage: the primary asset candidate plus the
/// full ordered gallery, one resolution per candidate URL.
#[derive(Debug, Clone, Serialize)]
pub struct ImageSelection {
    pub primary: ProcessingResult,
    pub gallery: Vec<ProcessingResult>,
}

pub fn compute_seed(request: &CreativeRequest, product: &ScrapedProduct) -> u64 {
    let mut hasher = DefaultHasher::new();
    request.product_url.hash(&mut hasher);
    request.style.hash(&mut hasher);
    request.format.hash(&mut hasher);
    request.aspect_ratio.hash(&mut hasher);
    product.display_title().hash(&mut hasher);
    for image in product.image_list().iter().take(3) {
        image.hash(&mut hasher);
    }
    hasher.finish()
}

fn validate_request(request: &CreativeRequest) -> Result<(), PipelineError> {
    let has_url = request
        .product_url
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .is_some();
    let has_images = request
        .image_list()
        .iter()
        .any(|url| !url.trim().is_empty());
    let has_override = request
        .overrides
        .as_ref()
        .map(|ov| {
            ov.product.is_some()
                || ov
                    .resolved_images
                    .as_ref()
                    .map(|urls| !urls.is_empty())
                    .unwrap_or(false)
        })
        .unwrap_or(false);

    if has_url || has_images || has_override {
        Ok(())
    } else {
        Err(PipelineError::invalid_input(
            "fetch_product",
            "product_url or images required",
        ))
    }
}

fn assets_from_copy(
    copy: AdCopy,
    image_url: Option<String>,
    video_url: Option<String>,
) -> CreativeAssets {
    CreativeAssets {
        image_url,
        video_url,
        headline: Some(copy.headline),
        caption: Some(copy.caption),
        call_to_action: Some(copy.call_to_action),
    }
}

pub mod stages {
    use super::*;
    use base64::{Engine, engine::general_purpose::STANDARD as BASE64};

    pub async fn fetch_product(
        request: &CreativeRequest,
        scraper: Option<&ApifyClient>,
        cache: &ScrapeCache,
    ) -> Result<StageOutcome<ScrapedProduct>, PipelineError> {
        if let Some(overrides) = &request.overrides
            && let Some(raw) = &overrides.product
        {
            let requested = request.product_url.as_deref().unwrap_or_default();
            let product = normalize_scrape_item(raw, requested);
            return Ok(StageOutcome::new(
                product.clone(),
                product_output(&product, "override"),
            ));
        }

        let Some(url) = request
            .product_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
        else {
            let product = synthesized_product(request);
            return Ok(StageOutcome::new(
                product.clone(),
                product_output(&product, "request"),
            ));
        };

        if let Some(cached) = cache.get(url).await {
            return Ok(StageOutcome::new(
                cached.clone(),
                product_output(&cached, "cache"),
            ));
        }

        if let Some(client) = scraper {
            match client.scrape_product(url).await {
                Ok(raw) => {
                    let product = normalize_scrape_item(&raw, url);
                    cache.set(url, &product, cache.ttl()).await;
                    return Ok(StageOutcome::new(
                        product.clone(),
                        product_output(&product, "scraper"),
                    ));
                }
                Err(err) => {
                    warn!(
                        target = "iris.pipeline",
                        url = %url,
                        error = %err,
                        "scrape_failed_synthesizing_product"
                    );
                }
            }
        }

        let product = synthesized_product(request);
        Ok(StageOutcome::new(
            product.clone(),
            product_output(&product, "fallback"),
        ))
    }

    pub async fn resolve_images(
        request: &CreativeRequest,
        product: &ScrapedProduct,
        resolver: &ImageResolver,
    ) -> Result<StageOutcome<ImageSelection>, PipelineError> {
        if let Some(overrides) = &request.overrides
            && let Some(resolved) = &overrides.resolved_images
        {
            let resolved: Vec<String> = resolved
                .iter()
                .map(|url| url.trim().to_string())
                .filter(|url| !url.is_empty())
                .collect();
            if resolved.is_empty() {
                return Err(PipelineError::invalid_input(
                    "resolve_images",
                    "resolved_images override is empty",
                ));
            }
            let gallery: Vec<ProcessingResult> = resolved
                .iter()
                .map(|url| ProcessingResult {
                    processed_url: url.clone(),
                    is_valid: true,
                    original_url: url.clone(),
                    processing_method: ProcessingMethod::Original,
                    error: None,
                })
                .collect();
            let selection = ImageSelection {
                primary: gallery[0].clone(),
                gallery,
            };
            return Ok(StageOutcome::new(
                selection.clone(),
                json!({
                    "count": selection.gallery.len(),
                    "primary": selection.primary.processed_url,
                    "source": "override",
                }),
            ));
        }

        let (candidates, source) = image_candidates(request, product);
        let gallery = resolver
            .process_multiple_image_urls(&candidates, request.base_origin.as_deref())
            .await;
        let primary = gallery
            .iter()
            .min_by_key(|result| result.processing_method.priority())
            .cloned()
            .ok_or_else(|| {
                PipelineError::internal("resolve_images", "resolver returned no results")
            })?;

        let methods: Vec<&'static str> = gallery
            .iter()
            .map(|result| result.processing_method.as_str())
            .collect();
        let selection = ImageSelection { primary, gallery };
        Ok(StageOutcome::new(
            selection.clone(),
            json!({
                "count": selection.gallery.len(),
                "primary": selection.primary.processed_url,
                "primary_method": selection.primary.processing_method.as_str(),
                "methods": methods,
                "source": source,
            }),
        ))
    }

    pub async fn draft_copy(
        request: &CreativeRequest,
        product: &ScrapedProduct,
        brief: &CreativeBrief,
        seed: u64,
        gemini: &GeminiClient,
    ) -> Result<StageOutcome<AdCopy>, PipelineError> {
        if let Some(overrides) = &request.overrides
            && let Some(given) = &overrides.copy
        {
            let copy = AdCopy {
                headline: given.headline.clone(),
                caption: given.caption.clone(),
                call_to_action: given.call_to_action.clone(),
            };
            return Ok(StageOutcome::new(
                copy.clone(),
                json!({
                    "headline": copy.headline,
                    "call_to_action": copy.call_to_action,
                    "source": "override",
                }),
            ));
        }

        let (copy, used_fallback) = if gemini.is_configured() {
            match gemini.generate_text(&brief.copy_prompt, None).await {
                Ok(reply) => match brief::parse_copy_reply(&reply) {
                    Some(copy) => (copy, false),
                    None => {
                        warn!(
                            target = "iris.pipeline",
                            "copy_reply_unparseable_using_fallback"
                        );
                        (brief::fallback_copy(product, seed), true)
                    }
                },
                Err(err) => {
                    warn!(
                        target = "iris.pipeline",
                        error = %err,
                        "copy_generation_failed_using_fallback"
                    );
                    (brief::fallback_copy(product, seed), true)
                }
            }
        } else {
            (brief::fallback_copy(product, seed), true)
        };

        Ok(StageOutcome::new(
            copy.clone(),
            json!({
                "headline": copy.headline,
                "call_to_action": copy.call_to_action,
                "used_fallback": used_fallback,
            }),
        ))
    }

    pub async fn render_image(
        brief: &CreativeBrief,
        primary: &ProcessingResult,
        gemini: &GeminiClient,
    ) -> Result<StageOutcome<String>, PipelineError> {
        if !gemini.is_configured() {
            short_pause(30).await;
            return Ok(StageOutcome::new(
                primary.processed_url.clone(),
                json!({
                    "asset": primary.processed_url,
                    "source_method": primary.processing_method.as_str(),
                    "simulated": true,
                }),
            ));
        }

        let reference = match fetch_inline_image(&primary.processed_url).await {
            Ok(payload) => Some(payload),
            Err(err) => {
                warn!(
                    target = "iris.pipeline",
                    url = %primary.processed_url,
                    error = %err,
                    "reference_image_fetch_failed"
                );
                None
            }
        };

        let generated = gemini
            .generate_image(&brief.image_prompt, reference.as_ref())
            .await
            .map_err(|err| PipelineError::internal("render_image", err.to_string()))?;

        let asset = generated.to_data_url();
        Ok(StageOutcome::new(
            asset,
            json!({
                "mime_type": generated.payload.mime_type,
                "payload_base64_len": generated.payload.data.len(),
                "reference_attached": reference.is_some(),
            }),
        ))
    }

    pub async fn render_video(
        brief: &CreativeBrief,
        image_url: &str,
        aspect: crate::models::AspectRatio,
        fal: &FalClient,
    ) -> Result<StageOutcome<String>, PipelineError> {
        if !fal.is_configured() {
            short_pause(45).await;
            let asset = format!(
                "https://stream.iris.local/previews/{}.mp4",
                Uuid::new_v4().simple()
            );
            return Ok(StageOutcome::new(
                asset.clone(),
                json!({
                    "asset": asset,
                    "simulated": true,
                }),
            ));
        }

        let video_url = fal
            .generate_video(&brief.video_prompt, image_url, aspect.label())
            .await
            .map_err(|err| PipelineError::internal("render_video", err.to_string()))?;

        Ok(StageOutcome::new(
            video_url.clone(),
            json!({
                "asset": video_url,
                "model": fal.video_model(),
                "source_image": image_url,
            }),
        ))
    }

    /// Product stand-in assembled from nothing but the request, used when no
    /// scraper is configured or the scrape failed.
    pub(super) fn synthesized_product(request: &CreativeRequest) -> ScrapedProduct {
        let requested = request.product_url.as_deref().unwrap_or_default();
        let raw = json!({ "images": request.image_list() });
        normalize_scrape_item(&raw, requested)
    }

    fn image_candidates(
        request: &CreativeRequest,
        product: &ScrapedProduct,
    ) -> (Vec<String>, &'static str) {
        let from_request: Vec<String> = request
            .image_list()
            .into_iter()
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .collect();
        if !from_request.is_empty() {
            return (from_request, "request");
        }

        let from_product = product.image_list();
        if !from_product.is_empty() {
            return (from_product, "product");
        }

        // An empty candidate degrades to the placeholder inside the resolver.
        (vec![String::new()], "none")
    }

    fn product_output(product: &ScrapedProduct, source: &'static str) -> Value {
        json!({
            "title": product.display_title(),
            "images": product.image_list().len(),
            "price": product.price_tag(),
            "source": source,
        })
    }

    async fn fetch_inline_image(url: &str) -> Result<InlinePayload, reqwest::Error> {
        let response = crate::http::build_client()
            .get(url)
            .send()
            .await?
            .error_for_status()?;
        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(';').next())
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| "image/jpeg".to_string());
        let bytes = response.bytes().await?;
        Ok(InlinePayload {
            mime_type,
            data: BASE64.encode(&bytes),
        })
    }

    fn short_pause(ms: u64) -> impl Future<Output = ()> {
        sleep(Duration::from_millis(ms))
    }
}
