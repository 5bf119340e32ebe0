use crate::{
    config::Config,
    engine::{CategorySummary, EngineError, HealthStatus, ProductDetails, SearchEngine},
    semantic::{SearchRequest, SearchResponse},
};
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::{Arc, OnceLock};
use tokio::signal;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

const DEFAULT_FEATURED_LIMIT: usize = 12;
const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// Engine slot, filled once the background build finishes.
pub type EngineSlot = Arc<OnceLock<Arc<SearchEngine>>>;

#[derive(Clone)]
struct SharedState {
    engine: EngineSlot,
    config: Arc<Config>,
}

impl SharedState {
    fn engine(&self) -> Result<Arc<SearchEngine>, HttpError> {
        self.engine
            .get()
            .cloned()
            .ok_or(HttpError(EngineError::NotReady))
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin.trim()) {
            Ok(value) => Some(value),
            Err(_) => {
                log::warn!("ignoring invalid CORS origin {origin:?}");
                None
            }
        })
        .collect();

    layer.allow_origin(AllowOrigin::list(origins))
}

pub fn router(engine: EngineSlot, config: Arc<Config>) -> Router {
    let cors = cors_layer(&config.cors_origins);
    let shared_state = SharedState { engine, config };

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/api/search", post(search))
        .route("/api/recommend", post(recommend))
        .route("/api/upload", post(upload))
        .route("/api/upload-with-text", post(upload_with_text))
        .route("/api/product/:id", get(product))
        .route("/api/image/:id", get(image))
        .route("/api/categories", get(categories))
        .route("/api/featured", get(featured))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(shared_state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("failed to listen for Ctrl+C: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => log::error!("failed to install signal handler: {e}"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    log::warn!("shutting down");
}

async fn start_app(config: Arc<Config>) -> anyhow::Result<()> {
    let engine: EngineSlot = Arc::new(OnceLock::new());

    // Model loading and catalog embedding can take minutes; serve 503 meanwhile.
    {
        let engine = engine.clone();
        let config = config.clone();
        tokio::task::spawn_blocking(move || match SearchEngine::from_config(&config) {
            Ok(built) => {
                log::info!("search engine ready");
                let _ = engine.set(Arc::new(built));
            }
            Err(e) => log::error!("failed to build search engine: {e}"),
        });
    }

    let app = router(engine, config.clone());

    let listener = tokio::net::TcpListener::bind(&config.listen).await?;
    log::info!("listening on {}", config.listen);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

pub fn start_daemon(config: Config) -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(start_app(Arc::new(config)))
}

#[derive(Debug)]
struct HttpError(EngineError);

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self.0 {
            EngineError::NotReady => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::InvalidArgument(_) => StatusCode::NOT_FOUND,
            EngineError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            EngineError::Embedding(_)
            | EngineError::Index(_)
            | EngineError::Io(_)
            | EngineError::Other(_) => {
                log::error!("{self:?}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(json!({"error": self.0.to_string()}))).into_response()
    }
}

impl<E> From<E> for HttpError
where
    E: Into<EngineError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

fn bad_request(msg: impl Into<String>) -> HttpError {
    HttpError(EngineError::InvalidRequest(msg.into()))
}

async fn root() -> impl IntoResponse {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [
            "/health",
            "/api/search",
            "/api/recommend",
            "/api/upload",
            "/api/upload-with-text",
            "/api/product/:id",
            "/api/image/:id",
            "/api/categories",
            "/api/featured"
        ]
    }))
}

async fn health(State(state): State<SharedState>) -> Result<Json<HealthStatus>, HttpError> {
    Ok(Json(state.engine()?.health()))
}

/// Body of `POST /api/search`; omitted tuning takes the configured defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequestBody {
    pub query: String,
    pub categories: Option<Vec<String>>,
    pub top_k: Option<usize>,
    pub max_decoration_score: Option<f32>,
    pub min_plain_score: Option<f32>,
    pub semantic_top_k: Option<usize>,
}

impl SearchRequestBody {
    fn into_request(self, config: &Config) -> SearchRequest {
        let defaults = SearchRequest::new(self.query, &config.search);
        SearchRequest {
            categories: self.categories,
            top_k: self.top_k.unwrap_or(defaults.top_k),
            max_decoration_score: self
                .max_decoration_score
                .unwrap_or(defaults.max_decoration_score),
            min_plain_score: self.min_plain_score.unwrap_or(defaults.min_plain_score),
            semantic_top_k: self.semantic_top_k.unwrap_or(defaults.semantic_top_k),
            ..defaults
        }
    }
}

async fn search(
    State(state): State<SharedState>,
    Json(payload): Json<SearchRequestBody>,
) -> Result<Json<SearchResponse>, HttpError> {
    log::debug!("payload: {payload:?}");

    let engine = state.engine()?;
    let request = payload.into_request(&state.config);

    tokio::task::block_in_place(move || engine.search(&request))
        .map(Json)
        .map_err(Into::into)
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecommendRequestBody {
    pub image_id: u64,
    pub top_k: Option<usize>,
}

async fn recommend(
    State(state): State<SharedState>,
    Json(payload): Json<RecommendRequestBody>,
) -> Result<Json<SearchResponse>, HttpError> {
    log::debug!("payload: {payload:?}");

    let engine = state.engine()?;

    tokio::task::block_in_place(move || engine.recommend(payload.image_id, payload.top_k))
        .map(Json)
        .map_err(Into::into)
}

/// Fields of an upload form.
#[derive(Default)]
struct UploadForm {
    file: Option<Vec<u8>>,
    query: Option<String>,
    top_k: Option<usize>,
}

async fn read_upload(mut multipart: Multipart) -> Result<UploadForm, HttpError> {
    let mut form = UploadForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let bytes = field.bytes().await.map_err(|e| bad_request(e.body_text()))?;
                form.file = Some(bytes.to_vec());
            }
            "query" => {
                form.query = Some(field.text().await.map_err(|e| bad_request(e.body_text()))?);
            }
            "top_k" => {
                let text = field.text().await.map_err(|e| bad_request(e.body_text()))?;
                let top_k = text
                    .trim()
                    .parse()
                    .map_err(|_| bad_request(format!("top_k must be an integer, got {text:?}")))?;
                form.top_k = Some(top_k);
            }
            other => log::debug!("ignoring form field {other:?}"),
        }
    }

    Ok(form)
}

async fn upload(
    State(state): State<SharedState>,
    multipart: Multipart,
) -> Result<Json<SearchResponse>, HttpError> {
    let engine = state.engine()?;
    let form = read_upload(multipart).await?;
    let file = form.file.ok_or_else(|| bad_request("missing file field"))?;

    log::debug!("upload: {} bytes, top_k={:?}", file.len(), form.top_k);

    tokio::task::block_in_place(move || engine.search_by_image(&file, form.top_k))
        .map(Json)
        .map_err(Into::into)
}

async fn upload_with_text(
    State(state): State<SharedState>,
    multipart: Multipart,
) -> Result<Json<SearchResponse>, HttpError> {
    let engine = state.engine()?;
    let form = read_upload(multipart).await?;
    let file = form.file.ok_or_else(|| bad_request("missing file field"))?;
    let query = form.query.ok_or_else(|| bad_request("missing query field"))?;

    log::debug!(
        "upload with text: {} bytes, query={query:?}, top_k={:?}",
        file.len(),
        form.top_k
    );

    tokio::task::block_in_place(move || engine.search_by_image_and_text(&file, &query, form.top_k))
        .map(Json)
        .map_err(Into::into)
}

async fn product(
    State(state): State<SharedState>,
    Path(id): Path<u64>,
) -> Result<Json<ProductDetails>, HttpError> {
    let engine = state.engine()?;

    tokio::task::block_in_place(move || engine.product(id))
        .map(Json)
        .map_err(Into::into)
}

async fn image(
    State(state): State<SharedState>,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse, HttpError> {
    let engine = state.engine()?;
    let path = engine.image_path(id)?;

    let bytes = tokio::task::block_in_place(|| std::fs::read(&path)).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => {
            HttpError(EngineError::InvalidArgument(format!("Image file for {id} not found")))
        }
        _ => e.into(),
    })?;

    let content_type = infer::get(&bytes)
        .map(|kind| kind.mime_type())
        .unwrap_or("application/octet-stream");

    Ok(([(header::CONTENT_TYPE, content_type)], bytes))
}

async fn categories(State(state): State<SharedState>) -> Result<Json<CategorySummary>, HttpError> {
    Ok(Json(state.engine()?.categories()))
}

#[derive(Debug, Deserialize)]
struct FeaturedParams {
    limit: Option<usize>,
}

async fn featured(
    State(state): State<SharedState>,
    Query(params): Query<FeaturedParams>,
) -> Result<Json<SearchResponse>, HttpError> {
    let limit = params.limit.unwrap_or(DEFAULT_FEATURED_LIMIT);
    Ok(Json(state.engine()?.featured(limit)))
}
