//! HTTP front end for catalog search.
//!
//! Routes:
//! - `GET /` : the search page (HTML)
//! - `GET /api/search?q=&k=` : ranked results as JSON with presigned image URLs
//! - `POST /api/reload` : load the table again and swap it in if it fits the encoder
//! - `GET /health` : liveness

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::catalog::Catalog;
use crate::encoder::SharedEncoder;
use crate::error::{Result, SearchError};
use crate::gallery::{Gallery, caption_for};
use crate::page::{self, PageBody, UiSettings};
use crate::table::TableCache;

/// Configuration for the search server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to.
    pub bind_addr: SocketAddr,
    /// Whether to enable CORS.
    pub enable_cors: bool,
    /// Whether to enable request tracing (HTTP layer).
    pub enable_tracing: bool,
    /// Page settings.
    pub ui: UiSettings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            enable_cors: true,
            enable_tracing: true,
            ui: UiSettings::default(),
        }
    }
}

impl ServerConfig {
    /// Create a new server config with the given bind address.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    /// Enable or disable CORS.
    pub fn with_cors(mut self, enable: bool) -> Self {
        self.enable_cors = enable;
        self
    }

    /// Set the page settings.
    pub fn with_ui(mut self, ui: UiSettings) -> Self {
        self.ui = ui;
        self
    }
}

/// Shared, read-only resources handed to every handler.
pub struct AppState {
    /// Location of the embedding table.
    pub table_location: String,
    /// Process-wide table cache.
    pub tables: Arc<TableCache>,
    /// Loaded text encoder.
    pub encoder: SharedEncoder,
    /// Image resolution and fetching.
    pub gallery: Gallery,
    /// Page settings.
    pub ui: UiSettings,
}

impl AppState {
    /// Pair the cached table with the encoder.
    pub async fn catalog(&self) -> Result<Catalog> {
        let table = self.tables.load(&self.table_location).await?;
        Catalog::new(table, self.encoder.clone())
    }

    fn check_k(&self, k: Option<usize>) -> Result<usize> {
        self.ui.check_k(k)
    }
}

/// The search HTTP server.
pub struct SearchServer {
    config: ServerConfig,
    state: Arc<AppState>,
}

impl SearchServer {
    /// Create a server over already initialized resources.
    pub fn new(
        config: ServerConfig,
        table_location: impl Into<String>,
        tables: Arc<TableCache>,
        encoder: SharedEncoder,
        gallery: Gallery,
    ) -> Self {
        let state = Arc::new(AppState {
            table_location: table_location.into(),
            tables,
            encoder,
            gallery,
            ui: config.ui.clone(),
        });
        Self { config, state }
    }

    /// Shared handler state.
    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Build the axum router.
    pub fn router(&self) -> Router {
        let mut router = Router::new()
            .route("/", get(handle_page))
            .route("/api/search", get(handle_search))
            .route("/api/reload", post(handle_reload))
            .route("/health", get(handle_health))
            .with_state(self.state.clone());

        if self.config.enable_cors {
            router = router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            );
        }

        if self.config.enable_tracing {
            router = router.layer(TraceLayer::new_for_http());
        }

        router
    }

    /// Run the server.
    pub async fn run(self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!(addr = %self.config.bind_addr, "Starting search server");
        axum::serve(listener, self.router()).await
    }

    /// Run the server with graceful shutdown.
    pub async fn run_with_shutdown(
        self,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!(addr = %self.config.bind_addr, "Starting search server");
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
    }
}

/// Query string for the page and the JSON API.
#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    /// Query text.
    #[serde(default)]
    pub q: String,
    /// Number of results.
    pub k: Option<usize>,
}

/// One result in the JSON API.
#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResultItem {
    /// 1-based position.
    pub rank: usize,
    /// Row index in the table.
    pub index: usize,
    /// Item id.
    pub id: String,
    /// Caption derived from the id.
    pub caption: String,
    /// Cosine similarity.
    pub score: f32,
    /// Presigned image URL, absent if the id could not be signed.
    pub url: Option<String>,
}

/// JSON API response.
#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    /// The query as received.
    pub query: String,
    /// Requested result count.
    pub k: usize,
    /// Ranked results.
    pub results: Vec<SearchResultItem>,
}

/// Handle GET /
async fn handle_page(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> impl IntoResponse {
    let shown_k = params.k.unwrap_or(state.ui.default_k).clamp(1, state.ui.max_k.max(1));

    let k = match state.check_k(params.k) {
        Ok(k) => k,
        Err(e) => {
            let html = page::render(&state.ui, &params.q, shown_k, PageBody::Error(&e.to_string()));
            return (StatusCode::BAD_REQUEST, Html(html));
        }
    };

    if params.q.is_empty() {
        return (
            StatusCode::OK,
            Html(page::render(&state.ui, "", k, PageBody::Empty)),
        );
    }

    let start = Instant::now();
    let matches = match state.catalog().await {
        Ok(catalog) => catalog.query(&params.q, k).await,
        Err(e) => Err(e),
    };

    match matches {
        Ok(matches) => {
            let items = state.gallery.render(&matches).await;
            tracing::info!(
                k,
                results = items.len(),
                failed_images = items.iter().filter(|i| i.image.is_none()).count(),
                duration_ms = start.elapsed().as_millis() as u64,
                "Rendered search page"
            );
            let html = page::render(&state.ui, &params.q, k, PageBody::Results(&items));
            (StatusCode::OK, Html(html))
        }
        Err(e) => {
            tracing::warn!(error = %e, "Search failed");
            let html = page::render(&state.ui, &params.q, k, PageBody::Error(&e.to_string()));
            (status_for(&e), Html(html))
        }
    }
}

/// Handle GET /api/search
async fn handle_search(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> std::result::Result<Json<SearchResponse>, ServerError> {
    let k = state.check_k(params.k)?;

    if params.q.is_empty() {
        return Ok(Json(SearchResponse {
            query: params.q,
            k,
            results: Vec::new(),
        }));
    }

    let catalog = state.catalog().await?;
    let matches = catalog.query(&params.q, k).await?;

    let results = matches
        .into_iter()
        .enumerate()
        .map(|(position, m)| {
            let url = match state.gallery.link(&m.id) {
                Ok(url) => Some(url),
                Err(e) => {
                    tracing::warn!(id = %m.id, error = %e, "Failed to presign result");
                    None
                }
            };
            SearchResultItem {
                rank: position + 1,
                index: m.index,
                caption: caption_for(&m.id).to_string(),
                id: m.id,
                score: m.score,
                url,
            }
        })
        .collect();

    Ok(Json(SearchResponse {
        query: params.q,
        k,
        results,
    }))
}

/// Handle POST /api/reload
async fn handle_reload(
    State(state): State<Arc<AppState>>,
) -> std::result::Result<Json<serde_json::Value>, ServerError> {
    let encoder = state.encoder.clone();
    let catalog = state
        .tables
        .reload(&state.table_location, |table| Catalog::new(table, encoder))
        .await?;
    tracing::info!(location = %state.table_location, rows = catalog.table().len(), "Reloaded embedding table");

    Ok(Json(serde_json::json!({
        "location": state.table_location,
        "rows": catalog.table().len(),
        "dim": catalog.table().dim(),
    })))
}

/// Handle GET /health
async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "vitrine",
        "model": state.encoder.name(),
        "table_loaded": state.tables.contains(&state.table_location),
    }))
}

fn status_for(err: &SearchError) -> StatusCode {
    match err {
        SearchError::InvalidLocation(_)
        | SearchError::UnsupportedLocation { .. }
        | SearchError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        SearchError::Access(_) => StatusCode::FORBIDDEN,
        SearchError::Fetch(_) | SearchError::Encode(_) => StatusCode::BAD_GATEWAY,
        SearchError::Parse(_)
        | SearchError::ModelLoad(_)
        | SearchError::DimensionMismatch { .. }
        | SearchError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Error type for API responses.
#[derive(Debug)]
pub struct ServerError(SearchError);

impl From<SearchError> for ServerError {
    fn from(err: SearchError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({
            "type": "error",
            "error": {
                "type": self.0.kind(),
                "message": self.0.to_string()
            }
        });

        (status_for(&self.0), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::TableLoader;
    use crate::testing::{MemoryStore, MockEncoder, StaticResolver, fixtures};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    const TABLE: &str = "s3://casa/table.csv";

    fn test_encoder() -> Arc<MockEncoder> {
        Arc::new(
            MockEncoder::new(2)
                .with_vector("red", vec![1.0, 0.0])
                .with_vector("blue", vec![0.0, 1.0]),
        )
    }

    fn create_test_server(store: Arc<MemoryStore>) -> SearchServer {
        create_test_server_with(store, test_encoder())
    }

    fn create_test_server_with(
        store: Arc<MemoryStore>,
        encoder: Arc<MockEncoder>,
    ) -> SearchServer {
        let resolver = Arc::new(StaticResolver);
        let tables = Arc::new(TableCache::new(TableLoader::new(
            resolver.clone(),
            store.clone(),
        )));
        let gallery = Gallery::new(resolver, store);
        SearchServer::new(ServerConfig::default(), TABLE, tables, encoder, gallery)
    }

    async fn post(router: Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    fn seeded_store() -> Arc<MemoryStore> {
        Arc::new(
            MemoryStore::new()
                .with_object(TABLE, fixtures::three_item_csv())
                .with_object("s3://casa/bottles/red.png", fixtures::png_bytes())
                .with_object("s3://casa/bottles/purple.png", fixtures::png_bytes()),
        )
    }

    async fn get(router: Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let server = create_test_server(seeded_store());
        let (status, body) = get(server.router(), "/health").await;
        assert_eq!(status, StatusCode::OK);

        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["table_loaded"], false);
    }

    #[tokio::test]
    async fn test_api_search_ranks_and_presigns() {
        let server = create_test_server(seeded_store());
        let (status, body) = get(server.router(), "/api/search?q=red&k=2").await;
        assert_eq!(status, StatusCode::OK);

        let parsed: SearchResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.k, 2);
        assert_eq!(parsed.results.len(), 2);
        assert_eq!(parsed.results[0].caption, "red");
        assert_eq!(parsed.results[0].index, 0);
        assert!((parsed.results[0].score - 1.0).abs() < 1e-6);
        assert_eq!(parsed.results[1].caption, "purple");
        assert_eq!(
            parsed.results[1].url.as_deref(),
            Some("s3://casa/bottles/purple.png")
        );
    }

    #[tokio::test]
    async fn test_api_search_empty_query_returns_nothing() {
        let store = seeded_store();
        let encoder = test_encoder();
        let server = create_test_server_with(store.clone(), encoder.clone());
        let (status, body) = get(server.router(), "/api/search?q=").await;
        assert_eq!(status, StatusCode::OK);

        let parsed: SearchResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.k, 5);
        assert!(parsed.results.is_empty());
        // Nothing was loaded or encoded for an empty query.
        assert_eq!(store.fetch_count(), 0);
        assert!(encoder.captured_requests().is_empty());

        get(server.router(), "/api/search?q=red&k=1").await;
        assert_eq!(encoder.captured_requests(), vec!["red".to_string()]);
    }

    #[tokio::test]
    async fn test_api_search_rejects_out_of_range_k() {
        let server = create_test_server(seeded_store());
        for uri in ["/api/search?q=red&k=0", "/api/search?q=red&k=11"] {
            let (status, body) = get(server.router(), uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
            assert_eq!(parsed["type"], "error");
            assert_eq!(parsed["error"]["type"], "invalid_request");
        }
    }

    #[tokio::test]
    async fn test_missing_table_is_bad_gateway() {
        let server = create_test_server(Arc::new(MemoryStore::new()));
        let (status, body) = get(server.router(), "/api/search?q=red").await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["error"]["type"], "fetch_error");
    }

    #[tokio::test]
    async fn test_page_renders_grid_with_isolated_failure() {
        let server = create_test_server(seeded_store());
        // blue.png is not in the store; the other two images are.
        let (status, body) = get(server.router(), "/?q=blue&k=3").await;
        assert_eq!(status, StatusCode::OK);

        let html = String::from_utf8(body).unwrap();
        assert!(html.contains("Top products found for you:"));
        assert_eq!(html.matches("<figure>").count(), 3);
        assert_eq!(html.matches("data:image/png;base64,").count(), 2);
        assert!(html.contains("Image unavailable"));
    }

    #[tokio::test]
    async fn test_page_without_query_has_no_results() {
        let server = create_test_server(seeded_store());
        let (status, body) = get(server.router(), "/").await;
        assert_eq!(status, StatusCode::OK);
        let html = String::from_utf8(body).unwrap();
        assert!(!html.contains("Top products"));
    }

    #[tokio::test]
    async fn test_table_is_loaded_once_across_requests() {
        let store = seeded_store();
        let server = create_test_server(store.clone());

        get(server.router(), "/api/search?q=red&k=1").await;
        get(server.router(), "/api/search?q=blue&k=1").await;

        // One table fetch; the JSON API never fetches images.
        assert_eq!(store.fetch_count(), 1);
        assert!(server.state().tables.contains(TABLE));
    }

    #[tokio::test]
    async fn test_reload_refetches_table() {
        let store = seeded_store();
        let server = create_test_server(store.clone());

        get(server.router(), "/api/search?q=red&k=1").await;
        let (status, body) = post(server.router(), "/api/reload").await;
        assert_eq!(status, StatusCode::OK);
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["rows"], 3);
        assert_eq!(parsed["dim"], 2);
        assert_eq!(store.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_reload_keeps_table_on_dimension_mismatch() {
        let store = seeded_store();
        let server = create_test_server(store.clone());
        get(server.router(), "/api/search?q=red&k=1").await;

        store.put(TABLE, "id,e0,e1,e2\ns3://casa/bottles/red.png,1.0,0.0,0.0\n");
        let (status, body) = post(server.router(), "/api/reload").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["error"]["type"], "dimension_mismatch");

        // The two-dimensional table still serves queries without a refetch.
        assert!(server.state().tables.contains(TABLE));
        let (status, body) = get(server.router(), "/api/search?q=red&k=3").await;
        assert_eq!(status, StatusCode::OK);
        let parsed: SearchResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.results.len(), 3);
        assert_eq!(store.fetch_count(), 2);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&SearchError::Access("denied".into())),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_for(&SearchError::UnsupportedLocation {
                scheme: "http".into()
            }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&SearchError::Encode("down".into())),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_server_config_builder() {
        let config = ServerConfig::new("0.0.0.0:3000".parse().unwrap()).with_cors(false);
        assert!(!config.enable_cors);
        assert_eq!(config.bind_addr.port(), 3000);
        assert_eq!(config.ui.max_k, 10);
    }
}
