//! HTTP mock server for integration testing.
//!
//! Serves two things on one local port:
//! - path-style S3 object GETs (`/{bucket}/{key}`) that require a presigned
//!   query string, like a private bucket would
//! - an OpenAI-compatible `POST /v1/embeddings`
//!
//! # Example
//!
//! ```ignore
//! use vitrine_search::testing::MockServer;
//!
//! let server = MockServer::start().await;
//! server.put_object("casa", "table.csv", csv);
//! server.set_default_embedding(vec![1.0, 0.0]);
//!
//! let presign = PresignConfig::new(Credentials::new("AKID", "SECRET"))
//!     .with_endpoint(server.url())
//!     .with_path_style(true);
//!
//! server.shutdown().await;
//! ```

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use bytes::Bytes;
use serde::Deserialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

#[derive(Default)]
struct MockState {
    objects: Mutex<HashMap<String, Bytes>>,
    denied: Mutex<HashSet<String>>,
    object_requests: AtomicUsize,
    embeddings: Mutex<HashMap<String, Vec<f32>>>,
    default_embedding: Mutex<Vec<f32>>,
    embedding_requests: Mutex<Vec<String>>,
    fail_embeddings: Mutex<bool>,
}

/// A local S3 + embeddings server for tests.
pub struct MockServer {
    /// Server address.
    addr: SocketAddr,
    /// Shared state behind the handlers.
    state: Arc<MockState>,
    /// Shutdown signal sender.
    shutdown_tx: Option<oneshot::Sender<()>>,
    /// Server task handle.
    handle: Option<JoinHandle<()>>,
}

impl MockServer {
    /// Start a new mock server on a random available port.
    pub async fn start() -> Self {
        let state = Arc::new(MockState::default());

        let app = Router::new()
            .route("/v1/embeddings", post(handle_embeddings))
            .route("/{bucket}/{*key}", get(handle_object))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock server");
        let addr = listener.local_addr().expect("Failed to get local address");

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .ok();
        });

        // Give the server a moment to start
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Base URL, usable as a path-style storage endpoint.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Base URL for the embeddings API.
    pub fn embeddings_url(&self) -> String {
        format!("{}/v1", self.url())
    }

    /// Store an object.
    pub fn put_object(&self, bucket: &str, key: &str, body: impl Into<Bytes>) {
        self.state
            .objects
            .lock()
            .unwrap()
            .insert(format!("{bucket}/{key}"), body.into());
    }

    /// Answer 403 for this object even with a signed URL.
    pub fn deny_object(&self, bucket: &str, key: &str) {
        self.state
            .denied
            .lock()
            .unwrap()
            .insert(format!("{bucket}/{key}"));
    }

    /// Number of object GETs received.
    pub fn object_request_count(&self) -> usize {
        self.state.object_requests.load(Ordering::SeqCst)
    }

    /// Map an input text to an embedding.
    pub fn set_embedding(&self, text: &str, vector: Vec<f32>) {
        self.state
            .embeddings
            .lock()
            .unwrap()
            .insert(text.to_string(), vector);
    }

    /// Embedding returned for texts without an explicit mapping.
    pub fn set_default_embedding(&self, vector: Vec<f32>) {
        *self.state.default_embedding.lock().unwrap() = vector;
    }

    /// Make the embeddings endpoint answer 500.
    pub fn fail_embeddings(&self, fail: bool) {
        *self.state.fail_embeddings.lock().unwrap() = fail;
    }

    /// Texts received by the embeddings endpoint, in order.
    pub fn embedding_requests(&self) -> Vec<String> {
        self.state.embedding_requests.lock().unwrap().clone()
    }

    /// Shutdown the server.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            tx.send(()).ok();
        }
        if let Some(handle) = self.handle.take() {
            handle.await.ok();
        }
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            tx.send(()).ok();
        }
    }
}

async fn handle_object(
    State(state): State<Arc<MockState>>,
    Path((bucket, key)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    state.object_requests.fetch_add(1, Ordering::SeqCst);
    let object = format!("{bucket}/{key}");

    if !params.contains_key("X-Amz-Signature") || !params.contains_key("X-Amz-Credential") {
        return (StatusCode::FORBIDDEN, "AccessDenied: request is not signed").into_response();
    }
    if state.denied.lock().unwrap().contains(&object) {
        return (StatusCode::FORBIDDEN, "AccessDenied").into_response();
    }

    match state.objects.lock().unwrap().get(&object) {
        Some(body) => (StatusCode::OK, body.clone()).into_response(),
        None => (StatusCode::NOT_FOUND, "NoSuchKey").into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingsBody {
    #[allow(dead_code)]
    model: String,
    input: Vec<String>,
}

async fn handle_embeddings(
    State(state): State<Arc<MockState>>,
    Json(body): Json<EmbeddingsBody>,
) -> Response {
    if *state.fail_embeddings.lock().unwrap() {
        return (StatusCode::INTERNAL_SERVER_ERROR, "model crashed").into_response();
    }

    let embeddings = state.embeddings.lock().unwrap();
    let default = state.default_embedding.lock().unwrap().clone();
    let mut requests = state.embedding_requests.lock().unwrap();

    let data: Vec<serde_json::Value> = body
        .input
        .iter()
        .enumerate()
        .map(|(index, text)| {
            requests.push(text.clone());
            let embedding = embeddings.get(text).cloned().unwrap_or_else(|| default.clone());
            serde_json::json!({"object": "embedding", "index": index, "embedding": embedding})
        })
        .collect();

    Json(serde_json::json!({
        "object": "list",
        "data": data,
        "model": "mock-embedding",
    }))
    .into_response()
}
