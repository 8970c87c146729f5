mod apify;
mod cache;
mod catalog;
mod fal;
mod gemini;
mod http;
mod imaging;
mod jobs;
mod metrics;
mod models;
mod pipeline;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use catalog::{AdCopy, ScrapedProduct};
use imaging::ProcessingResult;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{ApiError, CreativeRequest, CreativeResponse};
use pipeline::{ImageSelection, Pipeline, PipelineError, PipelineErrorKind};
use serde_json::json;
use std::{net::SocketAddr, sync::Arc};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "iris.api", "server crashed: {err}");
    }
}

async fn run() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let pipeline = Pipeline::demo();
    let (queue, _worker) = jobs::JobQueue::spawn(pipeline.clone());
    let openapi_raw = include_str!("../docs/openapi.yaml");
    let openapi: serde_json::Value =
        serde_yaml::from_str(openapi_raw).unwrap_or(serde_json::json!({"openapi":"3.0.3"}));
    let prometheus_handle = PrometheusBuilder::new().install_recorder()?;
    let state = AppState {
        pipeline,
        queue,
        openapi: Arc::new(openapi),
        prometheus_handle,
    };

    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .route("/docs", get(swagger_ui))
        .route("/creatives", post(create_creative))
        .nest(
            "/images",
            Router::new()
                .route("/resolve", post(resolve_image))
                .route("/batch", post(resolve_image_batch))
                .route("/best", post(best_image)),
        )
        .nest(
            "/stages",
            Router::new()
                .route("/scrape_product", post(stage_scrape_product))
                .route("/resolve_images", post(stage_resolve_images))
                .route("/draft_copy", post(stage_draft_copy)),
        )
        .nest(
            "/jobs",
            Router::new()
                .route("/creatives", post(enqueue_creative_job))
                .route("/{id}", get(get_job_status)),
        )
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum::extract::DefaultBodyLimit::max(body_limit_from_env()));

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "iris.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    pipeline: Pipeline,
    queue: jobs::JobQueue,
    openapi: Arc<serde_json::Value>,
    prometheus_handle: PrometheusHandle,
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
///
/// Returns a small JSON payload with `status`, `service` and `version`.
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "iris-api-rs",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn openapi_json(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    if let Ok(key) = std::env::var("OPENAPI_KEY") {
        let presented = headers
            .get("X-Docs-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != key {
            return Err(AppError::Pipeline(PipelineError::invalid_input(
                "docs",
                "unauthorized",
            )));
        }
    }
    Ok(Json((*state.openapi).clone()))
}

async fn swagger_ui() -> axum::http::Response<String> {
    let html = r#"<!doctype html>
<html>
<head>
  <meta charset='utf-8'/>
  <title>Iris API Docs</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    window.onload = () => {
      window.ui = SwaggerUIBundle({ url: '/openapi.json', dom_id: '#swagger-ui' });
    };
  </script>
</body>
</html>"#;
    axum::http::Response::builder()
        .header("Content-Type", "text/html; charset=utf-8")
        .body(html.to_string())
        .unwrap()
}

fn body_limit_from_env() -> usize {
    std::env::var("REQUEST_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(2 * 1024 * 1024)
}

async fn metrics_endpoint(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> axum::http::Response<String> {
    if let Ok(secret) = std::env::var("METRICS_KEY") {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return axum::http::Response::builder()
                .status(axum::http::StatusCode::UNAUTHORIZED)
                .body("unauthorized".into())
                .unwrap();
        }
    }
    let body = state.prometheus_handle.render();
    axum::http::Response::builder()
        .header("Content-Type", "text/plain; version=0.0.4")
        .body(body)
        .unwrap()
}

/// Run the product → ad creative pipeline.
///
/// - Method: `POST`
/// - Path: `/creatives`
/// - Body: `CreativeRequest`
/// - Response: `CreativeResponse` (synthetic `creative_id` + per-stage transcript)
async fn create_creative(
    State(state): State<AppState>,
    Json(payload): Json<CreativeRequest>,
) -> Result<Json<CreativeResponse>, AppError> {
    crate::metrics::inc_requests("/creatives");
    info!(
        target = "iris.api",
        format = ?payload.format,
        dry_run = payload.dry_run,
        "creative pipeline invoked",
    );
    let response = state.pipeline.run(payload).await?;
    Ok(Json(response))
}

/// Resolve one image URL to something the render providers can fetch.
///
/// - Method: `POST`
/// - Path: `/images/resolve`
/// - Body: `{ url, base_origin? }`
/// - Response: `ProcessingResult` (never an error status; failures are
///   encoded in the result itself)
async fn resolve_image(
    State(state): State<AppState>,
    Json(req): Json<ResolveImageRequest>,
) -> Json<ProcessingResult> {
    crate::metrics::inc_requests("/images/resolve");
    let result = state
        .pipeline
        .resolver
        .process_image_url(&req.url, req.base_origin.as_deref())
        .await;
    Json(result)
}

async fn resolve_image_batch(
    State(state): State<AppState>,
    Json(req): Json<ImageBatchRequest>,
) -> Json<Vec<ProcessingResult>> {
    crate::metrics::inc_requests("/images/batch");
    let results = state
        .pipeline
        .resolver
        .process_multiple_image_urls(&req.urls, req.base_origin.as_deref())
        .await;
    Json(results)
}

async fn best_image(
    State(state): State<AppState>,
    Json(req): Json<ImageBatchRequest>,
) -> Json<ProcessingResult> {
    crate::metrics::inc_requests("/images/best");
    let result = state
        .pipeline
        .resolver
        .get_best_image_url(&req.urls, req.base_origin.as_deref())
        .await;
    Json(result)
}

#[derive(Debug)]
enum AppError {
    Pipeline(PipelineError),
    QueueFull,
    UnknownJob,
}

impl From<PipelineError> for AppError {
    fn from(value: PipelineError) -> Self {
        Self::Pipeline(value)
    }
}

#[derive(Debug, Serialize)]
struct EnqueueResponse {
    job_id: String,
}

async fn enqueue_creative_job(
    State(state): State<AppState>,
    Json(payload): Json<CreativeRequest>,
) -> Result<(StatusCode, Json<EnqueueResponse>), AppError> {
    crate::metrics::inc_requests("/jobs/creatives");
    let id = state
        .queue
        .enqueue_creative(payload)
        .await
        .map_err(|err| match err {
            jobs::EnqueueError::Full => AppError::QueueFull,
            other => AppError::Pipeline(PipelineError::internal("enqueue", other.to_string())),
        })?;
    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueueResponse {
            job_id: id.to_string(),
        }),
    ))
}

async fn get_job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<jobs::JobInfo>, AppError> {
    let Ok(uuid) = uuid::Uuid::parse_str(&id) else {
        return Err(AppError::Pipeline(PipelineError::invalid_input(
            "jobs",
            "invalid_job_id",
        )));
    };
    match state.queue.get(uuid).await {
        Some(info) => Ok(Json(info)),
        None => Err(AppError::UnknownJob),
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Pipeline(err) => {
                let status = match err.kind() {
                    PipelineErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
                    PipelineErrorKind::Internal => StatusCode::BAD_GATEWAY,
                };
                let payload = ApiError {
                    error: err.stage().to_string(),
                    detail: Some(err.detail().to_string()),
                };
                (status, Json(payload)).into_response()
            }
            AppError::QueueFull => {
                let payload = ApiError {
                    error: "enqueue".to_string(),
                    detail: Some("job queue is full".to_string()),
                };
                (StatusCode::SERVICE_UNAVAILABLE, Json(payload)).into_response()
            }
            AppError::UnknownJob => {
                let payload = ApiError {
                    error: "jobs".to_string(),
                    detail: Some("not_found".to_string()),
                };
                (StatusCode::NOT_FOUND, Json(payload)).into_response()
            }
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
// -------- Image endpoint bodies --------
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
struct ResolveImageRequest {
    url: String,
    #[serde(default)]
    base_origin: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImageBatchRequest {
    urls: Vec<String>,
    #[serde(default)]
    base_origin: Option<String>,
}

// -------- Stage endpoints (manual granular control) --------

#[derive(Debug, Deserialize)]
struct ScrapeProductRequest {
    product_url: String,
}

#[derive(Debug, Serialize)]
struct ScrapeProductResponse {
    product: ScrapedProduct,
}

async fn stage_scrape_product(
    State(state): State<AppState>,
    Json(req): Json<ScrapeProductRequest>,
) -> Result<Json<ScrapeProductResponse>, AppError> {
    crate::metrics::inc_requests("/stages/scrape_product");
    let request = CreativeRequest {
        product_url: Some(req.product_url),
        images: None,
        base_origin: None,
        format: models::CreativeFormat::default(),
        aspect_ratio: models::AspectRatio::default(),
        style: None,
        overrides: None,
        dry_run: false,
    };
    let product = state
        .pipeline
        .stage_fetch_product(&request)
        .await
        .map_err(AppError::from)?;
    Ok(Json(ScrapeProductResponse { product }))
}

#[derive(Debug, Deserialize)]
struct ResolveImagesRequest {
    images: models::ImagesSource,
    #[serde(default)]
    base_origin: Option<String>,
}

#[derive(Debug, Serialize)]
struct ResolveImagesResponse {
    selection: ImageSelection,
}

async fn stage_resolve_images(
    State(state): State<AppState>,
    Json(req): Json<ResolveImagesRequest>,
) -> Result<Json<ResolveImagesResponse>, AppError> {
    crate::metrics::inc_requests("/stages/resolve_images");
    let request = CreativeRequest {
        product_url: None,
        images: Some(req.images),
        base_origin: req.base_origin,
        format: models::CreativeFormat::default(),
        aspect_ratio: models::AspectRatio::default(),
        style: None,
        overrides: None,
        dry_run: false,
    };
    let selection = state
        .pipeline
        .stage_resolve_images(&request)
        .await
        .map_err(AppError::from)?;
    Ok(Json(ResolveImagesResponse { selection }))
}

#[derive(Debug, Deserialize)]
struct DraftCopyRequest {
    #[serde(default)]
    product_url: Option<String>,
    #[serde(default)]
    product: Option<serde_json::Value>,
    #[serde(default)]
    style: Option<String>,
    #[serde(default)]
    aspect_ratio: models::AspectRatio,
}

#[derive(Debug, Serialize)]
struct DraftCopyResponse {
    copy: AdCopy,
}

async fn stage_draft_copy(
    State(state): State<AppState>,
    Json(req): Json<DraftCopyRequest>,
) -> Result<Json<DraftCopyResponse>, AppError> {
    crate::metrics::inc_requests("/stages/draft_copy");
    let overrides = req.product.map(|product| models::PipelineOverrides {
        resolved_images: None,
        copy: None,
        product: Some(product),
    });
    let request = CreativeRequest {
        product_url: req.product_url,
        images: None,
        base_origin: None,
        format: models::CreativeFormat::default(),
        aspect_ratio: req.aspect_ratio,
        style: req.style,
        overrides,
        dry_run: false,
    };
    let copy = state
        .pipeline
        .stage_draft_copy(&request)
        .await
        .map_err(AppError::from)?;
    Ok(Json(DraftCopyResponse { copy }))
}
