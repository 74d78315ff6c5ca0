//! Cross-crate integration and E2E tests
//!
//! These run the real presigner, HTTP fetcher and HTTP encoder against the
//! mock storage/embeddings server, and drive the search server over HTTP.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use vitrine_search::testing::{MockServer, fixtures};
use vitrine_search::{
    Catalog, Credentials, EncoderConfig, Gallery, HttpEncoder, HttpFetcher, PresignConfig,
    S3Presigner, SearchError, SearchServer, ServerConfig, SharedEncoder, SharedFetcher,
    SharedResolver, TableCache, TableLayout, TableLoader, TextEncoder,
};

const TABLE: &str = "s3://casa/bottles-embeddings.csv";

// ============================================================================
// Helpers
// ============================================================================

/// Get an available port for testing.
fn get_test_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Presigner and fetcher pointed at the mock store, path-style.
fn storage_for(mock: &MockServer) -> (SharedResolver, SharedFetcher) {
    let config = PresignConfig::new(Credentials::new("AKIDEXAMPLE", "secret"))
        .with_endpoint(mock.url())
        .with_path_style(true);
    let resolver: SharedResolver = Arc::new(S3Presigner::new(config).unwrap());
    let fetcher: SharedFetcher = Arc::new(HttpFetcher::new().unwrap());
    (resolver, fetcher)
}

/// A running search server, stopped on [`RunningServer::stop`].
struct RunningServer {
    addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<std::io::Result<()>>,
}

impl RunningServer {
    async fn start(
        mock: &MockServer,
        table: &str,
        layout: TableLayout,
        encoder: SharedEncoder,
    ) -> Self {
        let (resolver, fetcher) = storage_for(mock);
        let tables = Arc::new(TableCache::new(
            TableLoader::new(resolver.clone(), fetcher.clone()).with_layout(layout),
        ));
        let gallery = Gallery::new(resolver, fetcher);

        let addr: SocketAddr = format!("127.0.0.1:{}", get_test_port()).parse().unwrap();
        let server = SearchServer::new(ServerConfig::new(addr), table, tables, encoder, gallery);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            server
                .run_with_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
        });

        // Give the server time to start
        tokio::time::sleep(Duration::from_millis(100)).await;

        Self {
            addr,
            shutdown_tx,
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn stop(self) {
        self.shutdown_tx.send(()).ok();
        let _ = self.handle.await;
    }
}

/// Mock store with the three-bottle table and all three images.
async fn seeded_mock() -> MockServer {
    let mock = MockServer::start().await;
    mock.put_object("casa", "bottles-embeddings.csv", fixtures::three_item_csv());
    for name in ["red", "blue", "purple"] {
        mock.put_object("casa", &format!("bottles/{name}.png"), fixtures::png_bytes());
    }
    mock.set_default_embedding(vec![0.5, 0.5]);
    mock.set_embedding("red", vec![1.0, 0.0]);
    mock.set_embedding("blue", vec![0.0, 1.0]);
    mock
}

async fn encoder_for(mock: &MockServer) -> SharedEncoder {
    let config = EncoderConfig::new()
        .with_base_url(mock.embeddings_url())
        .with_model("clip-test");
    Arc::new(HttpEncoder::load(config).await.unwrap())
}

/// E2E Test: query over HTTP returns ranked items with working signed URLs
#[tokio::test]
async fn test_e2e_search_api() {
    let mock = seeded_mock().await;
    let encoder = encoder_for(&mock).await;
    let server = RunningServer::start(&mock, TABLE, TableLayout::default(), encoder).await;

    let client = reqwest::Client::new();
    let response = client
        .get(server.url("/api/search?q=red&k=2"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["query"], "red");
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["caption"], "red");
    assert_eq!(results[0]["index"], 0);
    assert_eq!(results[1]["caption"], "purple");
    let second = results[1]["score"].as_f64().unwrap();
    assert!((second - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-4);

    // The presigned URL is directly fetchable from the store.
    let url = results[0]["url"].as_str().unwrap();
    assert!(url.contains("/casa/bottles/red.png?"));
    assert!(url.contains("X-Amz-Signature="));
    let image = client.get(url).send().await.unwrap();
    assert_eq!(image.status(), 200);
    assert_eq!(image.bytes().await.unwrap().to_vec(), fixtures::png_bytes());

    // One startup probe, then the query text as typed.
    assert_eq!(mock.embedding_requests(), vec!["product", "red"]);

    server.stop().await;
    mock.shutdown().await;
}

/// E2E Test: a denied image leaves the rest of the grid intact
#[tokio::test]
async fn test_e2e_page_isolates_denied_image() {
    let mock = seeded_mock().await;
    mock.deny_object("casa", "bottles/blue.png");
    let encoder = encoder_for(&mock).await;
    let server = RunningServer::start(&mock, TABLE, TableLayout::default(), encoder).await;

    let response = reqwest::get(server.url("/?q=blue&k=3")).await.unwrap();
    assert_eq!(response.status(), 200);
    let html = response.text().await.unwrap();

    assert!(html.contains("Top products found for you:"));
    assert_eq!(html.matches("<figure>").count(), 3);
    assert_eq!(html.matches("data:image/png;base64,").count(), 2);
    assert!(html.contains("Image unavailable: Access error"));

    server.stop().await;
    mock.shutdown().await;
}

/// E2E Test: the table is fetched once and a failed first load is retried
#[tokio::test]
async fn test_e2e_table_load_retry_and_cache() {
    let mock = MockServer::start().await;
    mock.set_default_embedding(vec![1.0, 0.0]);
    let encoder = encoder_for(&mock).await;
    let server = RunningServer::start(&mock, TABLE, TableLayout::default(), encoder).await;
    let client = reqwest::Client::new();

    // Table not uploaded yet.
    let response = client
        .get(server.url("/api/search?q=anything"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 502);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["type"], "error");
    assert_eq!(body["error"]["type"], "fetch_error");

    mock.put_object("casa", "bottles-embeddings.csv", fixtures::three_item_csv());
    for _ in 0..3 {
        let response = client
            .get(server.url("/api/search?q=anything&k=1"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }

    // One failed attempt, then a single successful load.
    assert_eq!(mock.object_request_count(), 2);

    let health: serde_json::Value = client
        .get(server.url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["table_loaded"], true);

    server.stop().await;
    mock.shutdown().await;
}

/// E2E Test: encoder failures after startup surface as 502
#[tokio::test]
async fn test_e2e_encoder_failure() {
    let mock = seeded_mock().await;
    let encoder = encoder_for(&mock).await;
    let server = RunningServer::start(&mock, TABLE, TableLayout::default(), encoder).await;

    mock.fail_embeddings(true);
    let response = reqwest::get(server.url("/api/search?q=red")).await.unwrap();
    assert_eq!(response.status(), 502);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"]["type"], "encode_error");

    server.stop().await;
    mock.shutdown().await;
}

#[tokio::test]
async fn test_indexed_table_layout() {
    let mock = seeded_mock().await;
    mock.put_object("casa", "indexed.csv", fixtures::three_item_indexed_csv());
    let (resolver, fetcher) = storage_for(&mock);

    let layout = TableLayout {
        has_header: true,
        index_column: true,
    };
    let tables = TableCache::new(TableLoader::new(resolver, fetcher).with_layout(layout));
    let table = tables.load("s3://casa/indexed.csv").await.unwrap();

    assert_eq!(table.len(), 3);
    assert_eq!(table.dim(), 2);
    assert_eq!(table.id(2), Some("s3://casa/bottles/purple.png"));

    let catalog = Catalog::new(table, encoder_for(&mock).await).unwrap();
    let matches = catalog.query("blue", 1).await.unwrap();
    assert_eq!(matches[0].id, "s3://casa/bottles/blue.png");

    mock.shutdown().await;
}

#[tokio::test]
async fn test_model_load_failure() {
    let mock = MockServer::start().await;
    mock.fail_embeddings(true);

    let config = EncoderConfig::new().with_base_url(mock.embeddings_url());
    let err = HttpEncoder::load(config).await.unwrap_err();
    assert!(matches!(err, SearchError::ModelLoad(_)));

    mock.shutdown().await;
}

#[tokio::test]
async fn test_encoder_table_dimension_mismatch() {
    let mock = seeded_mock().await;
    mock.set_default_embedding(vec![0.1, 0.2, 0.3]);
    let encoder = encoder_for(&mock).await;
    assert_eq!(encoder.dimension(), Some(3));

    let (resolver, fetcher) = storage_for(&mock);
    let tables = TableCache::new(TableLoader::new(resolver, fetcher));
    let table = tables.load(TABLE).await.unwrap();

    let err = Catalog::new(table, encoder).err().unwrap();
    assert!(matches!(
        err,
        SearchError::DimensionMismatch {
            expected: 2,
            actual: 3
        }
    ));

    mock.shutdown().await;
}

#[tokio::test]
async fn test_unsigned_fetch_is_denied() {
    let mock = seeded_mock().await;
    let response = reqwest::get(format!("{}/casa/bottles/red.png", mock.url()))
        .await
        .unwrap();
    assert_eq!(response.status(), 403);
    mock.shutdown().await;
}
