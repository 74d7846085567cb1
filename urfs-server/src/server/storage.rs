use super::{build_event_bus, build_registry, response_error, shutdown_signal};
use crate::config::Config;
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::time::{Duration, interval};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use urfs_core::codec;
use urfs_core::wire::{
    CONTENT_TYPE_ARMORED, CONTENT_TYPE_FRAMED, CONTENT_TYPE_OCTET_STREAM, ChunkEncoding,
    DownloadRequest, HealthResponse, ReadChunkQuery, SessionCreatedResponse, UploadRequest,
};
use urfs_core::{
    DynRegistry, HttpStorageClient, NodeRole, PeerContentLocator, Result, StorageNode, UrfsError,
};

pub(crate) struct StorageState {
    pub(crate) node: Arc<StorageNode>,
}

pub async fn run_storage_server(config: Config) -> Result<()> {
    let storage_config = config.storage_or_err()?.clone();
    let bus = build_event_bus(&config).await?;
    let registry = build_registry(&config).await?;
    let locator = Arc::new(PeerContentLocator::new(
        registry.clone(),
        Arc::new(HttpStorageClient::new()?),
    ));

    let node = Arc::new(
        StorageNode::open(
            config.node.node_ref(),
            storage_config.options(&config.retry),
            bus,
        )
        .await?
        .with_content_locator(locator),
    );

    registry.register_storage_node(node.node_ref()).await?;

    let heartbeat = {
        let registry = registry.clone();
        let node_ref = node.node_ref().clone();
        let period = Duration::from_secs(storage_config.heartbeat_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                ticker.tick().await;
                if let Err(error) = registry.register_storage_node(&node_ref).await {
                    tracing::warn!("Failed to refresh storage node registration: {}", error);
                }
            }
        })
    };
    let reaper =
        node.spawn_session_reaper(Duration::from_secs(storage_config.reaper_interval_secs.max(1)));

    let app = storage_router(Arc::new(StorageState { node: node.clone() }));
    let listener = TcpListener::bind(&config.node.bind_addr).await?;
    tracing::info!("Urfs storage node listening on {}", config.node.bind_addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|error| UrfsError::Http(error.to_string()));

    heartbeat.abort();
    reaper.abort();
    deregister(registry.as_ref(), &node).await;
    served
}

async fn deregister(registry: &DynRegistry, node: &StorageNode) {
    if let Err(error) = registry
        .deregister_storage_node(&node.node_ref().node_id)
        .await
    {
        tracing::warn!("Failed to deregister storage node: {}", error);
    }
}

pub(crate) fn storage_router(state: Arc<StorageState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/uploads", post(create_upload_session))
        .route("/downloads", post(create_download_session))
        .route(
            "/sessions/:session_id/chunks",
            put(send_chunk).get(read_chunk),
        )
        .route("/sessions/:session_id/finish", post(finish_upload))
        .route("/sessions/:session_id", delete(destroy_session))
        .route("/objects/:hash", delete(remove_object).head(object_status))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

async fn health(State(state): State<Arc<StorageState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        node_id: state.node.node_ref().node_id.clone(),
        role: NodeRole::Storage,
        replica_state: None,
    })
}

async fn create_upload_session(
    State(state): State<Arc<StorageState>>,
    Json(request): Json<UploadRequest>,
) -> Response {
    match state.node.create_upload_session(&request.name).await {
        Ok(session_id) => {
            (StatusCode::CREATED, Json(SessionCreatedResponse { session_id })).into_response()
        }
        Err(error) => response_error(&error),
    }
}

async fn create_download_session(
    State(state): State<Arc<StorageState>>,
    Json(request): Json<DownloadRequest>,
) -> Response {
    match state.node.create_download_session(&request.hash).await {
        Ok(session_id) => {
            (StatusCode::CREATED, Json(SessionCreatedResponse { session_id })).into_response()
        }
        Err(error) => response_error(&error),
    }
}

async fn send_chunk(
    State(state): State<Arc<StorageState>>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or(CONTENT_TYPE_OCTET_STREAM);

    let result = if content_type.starts_with(CONTENT_TYPE_ARMORED) {
        match std::str::from_utf8(&body) {
            Ok(text) => {
                state
                    .node
                    .upload_send_armored(&session_id, text.trim_end())
                    .await
            }
            Err(error) => Err(UrfsError::InvalidChunk(format!(
                "armored chunk is not utf-8: {}",
                error
            ))),
        }
    } else if content_type.starts_with(CONTENT_TYPE_FRAMED) {
        send_frames(&state.node, &session_id, body).await
    } else {
        state.node.upload_send(&session_id, body).await
    };

    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => response_error(&error),
    }
}

/// Frames are all checked before any is appended, so a bad body leaves the
/// upload untouched.
async fn send_frames(node: &StorageNode, session_id: &str, mut body: Bytes) -> Result<()> {
    let mut frames = Vec::new();
    while let Some(frame) = codec::decode_frame(&mut body) {
        frames.push(frame);
    }
    if !body.is_empty() {
        return Err(UrfsError::InvalidChunk(format!(
            "{} trailing bytes after last frame",
            body.len()
        )));
    }

    for frame in frames {
        node.upload_send(session_id, frame).await?;
    }
    Ok(())
}

async fn finish_upload(
    State(state): State<Arc<StorageState>>,
    Path(session_id): Path<String>,
) -> Response {
    match state.node.upload_save(&session_id).await {
        Ok(info) => (StatusCode::OK, Json(info)).into_response(),
        Err(error) => response_error(&error),
    }
}

async fn read_chunk(
    State(state): State<Arc<StorageState>>,
    Path(session_id): Path<String>,
    Query(query): Query<ReadChunkQuery>,
) -> Response {
    let chunk = match state.node.download_recv(&session_id, query.size).await {
        Ok(chunk) => chunk,
        Err(error) => return response_error(&error),
    };

    match query.encoding {
        ChunkEncoding::Raw => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, CONTENT_TYPE_OCTET_STREAM)],
            chunk,
        )
            .into_response(),
        ChunkEncoding::Armored => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, CONTENT_TYPE_ARMORED)],
            codec::armor(&chunk),
        )
            .into_response(),
        ChunkEncoding::Framed => match codec::encode_frame(&chunk) {
            Ok(frame) => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, CONTENT_TYPE_FRAMED)],
                frame,
            )
                .into_response(),
            Err(error) => response_error(&error),
        },
    }
}

async fn destroy_session(
    State(state): State<Arc<StorageState>>,
    Path(session_id): Path<String>,
) -> Response {
    state.node.destroy_session(&session_id).await;
    StatusCode::NO_CONTENT.into_response()
}

async fn object_status(
    State(state): State<Arc<StorageState>>,
    Path(hash): Path<String>,
) -> Response {
    match state.node.holds_object(&hash) {
        Ok(true) => StatusCode::OK.into_response(),
        Ok(false) => StatusCode::NOT_FOUND.into_response(),
        Err(error) => response_error(&error),
    }
}

async fn remove_object(
    State(state): State<Arc<StorageState>>,
    Path(hash): Path<String>,
) -> Response {
    match state.node.remove_file(&hash).await {
        Ok(_) => StatusCode::ACCEPTED.into_response(),
        Err(error) => response_error(&error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::test_support::{bind, call, empty_request, json_request, serve};
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::json;
    use urfs_core::{
        FileInfo, MemoryEventBus, NodeRef, SessionHandle, SessionKind, StorageClient,
        StorageNodeOptions, compute_hash,
    };

    async fn setup(dir: &std::path::Path) -> Router {
        let node = StorageNode::open(
            NodeRef::new("fm1", "127.0.0.1:9001"),
            StorageNodeOptions::new(dir.to_path_buf()),
            Arc::new(MemoryEventBus::new()),
        )
        .await
        .unwrap();
        storage_router(Arc::new(StorageState {
            node: Arc::new(node),
        }))
    }

    fn chunk_request(session_id: &str, content_type: &str, body: impl Into<Body>) -> Request<Body> {
        Request::builder()
            .method("PUT")
            .uri(format!("/sessions/{}/chunks", session_id))
            .header("content-type", content_type)
            .body(body.into())
            .unwrap()
    }

    async fn open_session(app: &Router, uri: &str, body: serde_json::Value) -> String {
        let (status, body) = call(app, json_request("POST", uri, body)).await;
        assert_eq!(status, StatusCode::CREATED);
        let created: SessionCreatedResponse = serde_json::from_slice(&body).unwrap();
        created.session_id
    }

    #[tokio::test]
    async fn test_upload_accepts_every_chunk_encoding() {
        let dir = tempfile::tempdir().unwrap();
        let app = setup(dir.path()).await;
        let session_id = open_session(&app, "/uploads", json!({"name": "mixed.bin"})).await;

        let (status, _) = call(&app, chunk_request(&session_id, CONTENT_TYPE_OCTET_STREAM, "raw-")).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let armored = codec::armor(b"armored-");
        let (status, _) = call(&app, chunk_request(&session_id, "text/plain; charset=utf-8", armored)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let mut framed = codec::encode_frame(b"framed-").unwrap().to_vec();
        framed.extend_from_slice(&codec::encode_frame(b"twice").unwrap());
        let (status, _) = call(&app, chunk_request(&session_id, CONTENT_TYPE_FRAMED, framed)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = call(&app, empty_request("POST", &format!("/sessions/{}/finish", session_id))).await;
        assert_eq!(status, StatusCode::OK);
        let info: FileInfo = serde_json::from_slice(&body).unwrap();
        assert_eq!(info.name, "mixed.bin");
        assert_eq!(info.hash, compute_hash(b"raw-armored-framed-twice"));
    }

    #[tokio::test]
    async fn test_malformed_chunks_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let app = setup(dir.path()).await;
        let session_id = open_session(&app, "/uploads", json!({"name": "a.txt"})).await;

        let (status, body) = call(&app, chunk_request(&session_id, CONTENT_TYPE_ARMORED, "no wrapper")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let error: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(error["kind"], "invalid_chunk");

        let mut truncated = codec::encode_frame(b"whole").unwrap().to_vec();
        truncated.extend_from_slice(&[0, 0, 0, 9, 1]);
        let (status, _) = call(&app, chunk_request(&session_id, CONTENT_TYPE_FRAMED, truncated)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(&app, empty_request("POST", &format!("/sessions/{}/finish", session_id))).await;
        assert_eq!(status, StatusCode::OK);
        let info: FileInfo = serde_json::from_slice(&body).unwrap();
        assert_eq!(info.hash, compute_hash(b""));
    }

    #[tokio::test]
    async fn test_download_encodings_and_removal() {
        let dir = tempfile::tempdir().unwrap();
        let app = setup(dir.path()).await;
        let upload_id = open_session(&app, "/uploads", json!({"name": "d.txt"})).await;
        call(&app, chunk_request(&upload_id, CONTENT_TYPE_OCTET_STREAM, "0123456789")).await;
        let (_, body) = call(&app, empty_request("POST", &format!("/sessions/{}/finish", upload_id))).await;
        let info: FileInfo = serde_json::from_slice(&body).unwrap();

        let duplicate_id = open_session(&app, "/uploads", json!({"name": "copy.txt"})).await;
        call(&app, chunk_request(&duplicate_id, CONTENT_TYPE_OCTET_STREAM, "0123456789")).await;
        let (status, body) = call(&app, empty_request("POST", &format!("/sessions/{}/finish", duplicate_id))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        let error: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(error["kind"], "file_already_exists");
        assert_eq!(error["detail"], info.hash);

        let session_id = open_session(&app, "/downloads", json!({"hash": info.hash})).await;
        let uri = |size: usize, encoding: &str| {
            format!("/sessions/{}/chunks?size={}&encoding={}", session_id, size, encoding)
        };

        let (_, body) = call(&app, empty_request("GET", &uri(4, "raw"))).await;
        assert_eq!(&body[..], b"0123");

        let (_, body) = call(&app, empty_request("GET", &uri(4, "armored"))).await;
        assert_eq!(&codec::unarmor(std::str::from_utf8(&body).unwrap()).unwrap()[..], b"4567");

        let (_, body) = call(&app, empty_request("GET", &uri(4, "framed"))).await;
        let mut body = body;
        assert_eq!(&codec::decode_frame(&mut body).unwrap()[..], b"89");

        let delete_session = format!("/sessions/{}", session_id);
        let (status, _) = call(&app, empty_request("DELETE", &delete_session)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = call(&app, empty_request("DELETE", &delete_session)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = call(&app, empty_request("DELETE", &format!("/objects/{}", info.hash))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let (status, _) = call(&app, empty_request("DELETE", &format!("/objects/{}", info.hash))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    async fn serve_storage(dir: &std::path::Path) -> NodeRef {
        let (listener, address) = bind().await;
        serve(listener, setup(dir).await);
        NodeRef::new("fm1", address)
    }

    async fn send_all(client: &HttpStorageClient, node: &NodeRef, name: &str, data: &[u8]) -> Result<FileInfo> {
        let session = client.create_upload_session(node, name).await?;
        for block in data.chunks(1024) {
            client
                .send_chunk(&session, bytes::Bytes::copy_from_slice(block))
                .await?;
        }
        let result = client.finish_upload(&session).await;
        client.close_session(&session).await?;
        result
    }

    #[tokio::test]
    async fn test_http_client_round_trip_in_every_encoding() {
        let dir = tempfile::tempdir().unwrap();
        let node = serve_storage(dir.path()).await;
        let encodings = [ChunkEncoding::Raw, ChunkEncoding::Armored, ChunkEncoding::Framed];

        for (i, encoding) in encodings.into_iter().enumerate() {
            let client = HttpStorageClient::with_encoding(encoding).unwrap();
            let mut data: Vec<u8> = (0..3000u32).map(|n| (n % 253) as u8).collect();
            data.push(i as u8);

            let info = send_all(&client, &node, &format!("file-{}.bin", i), &data)
                .await
                .unwrap();
            assert_eq!(info.hash, compute_hash(&data));
            assert!(client.holds_object(&node, &info.hash).await.unwrap());

            let session = client.create_download_session(&node, &info.hash).await.unwrap();
            let mut received = Vec::new();
            let mut reads = Vec::new();
            loop {
                let chunk = client.read_chunk(&session, 1024).await.unwrap();
                reads.push(chunk.len());
                received.extend_from_slice(&chunk);
                if chunk.len() < 1024 {
                    break;
                }
            }
            client.close_session(&session).await.unwrap();
            client.close_session(&session).await.unwrap();

            assert_eq!(reads, vec![1024, 1024, 953], "{:?}", encoding);
            assert_eq!(received, data, "{:?}", encoding);
        }
    }

    #[tokio::test]
    async fn test_http_client_rebuilds_typed_errors() {
        let dir = tempfile::tempdir().unwrap();
        let node = serve_storage(dir.path()).await;
        let client = HttpStorageClient::new().unwrap();

        let info = send_all(&client, &node, "a.txt", b"duplicated").await.unwrap();
        let duplicate = send_all(&client, &node, "b.txt", b"duplicated").await;
        assert!(matches!(duplicate, Err(UrfsError::FileAlreadyExists(hash)) if hash == info.hash));

        let missing = client.create_download_session(&node, "missing").await;
        assert!(matches!(missing, Err(UrfsError::FileNotFound(hash)) if hash == "missing"));
        assert!(!client.holds_object(&node, "missing").await.unwrap());

        let unknown = SessionHandle {
            session_id: "unknown".to_string(),
            kind: SessionKind::Download,
            node: node.clone(),
        };
        let read = client.read_chunk(&unknown, 16).await;
        assert!(matches!(read, Err(UrfsError::SessionNotFound(id)) if id == "unknown"));

        client.remove_file(&node, &info.hash).await.unwrap();
        let again = client.remove_file(&node, &info.hash).await;
        assert!(matches!(again, Err(UrfsError::FileNotFound(_))));
        assert!(!client.holds_object(&node, &info.hash).await.unwrap());
    }
}
