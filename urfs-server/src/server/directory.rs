use super::{build_event_bus, build_registry, response_error, shutdown_signal};
use crate::config::{Config, ReplicaTransport};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use urfs_core::wire::{
    AnnounceRequest, DownloadRequest, HealthResponse, ReplicaEventsRequest, ReplicaEventsResponse,
    UploadRequest,
};
use urfs_core::{
    BusReplicaPeer, DirectoryNode, DirectoryNodeDeps, DirectoryService, DynReplicaPeer,
    HttpReplicaPeer, HttpStorageClient, NodeRole, Result, UrfsError,
};

pub(crate) struct DirectoryState {
    pub(crate) node: Arc<DirectoryNode>,
}

pub async fn run_directory_server(config: Config) -> Result<()> {
    let bus = build_event_bus(&config).await?;
    let registry = build_registry(&config).await?;

    let peer: Arc<DynReplicaPeer> = match config.directory.replica_transport {
        ReplicaTransport::Bus => Arc::new(BusReplicaPeer::new(bus.clone(), config.retry.clone())),
        ReplicaTransport::Http => Arc::new(HttpReplicaPeer::new()?),
    };

    let node = Arc::new(DirectoryNode::new(
        config.node.node_ref(),
        DirectoryNodeDeps {
            bus,
            registry,
            storage: Arc::new(HttpStorageClient::new()?),
            peer,
        },
        config.directory.options(),
    ));

    // Listen before announcing so direct replays from peers can land.
    let listener = TcpListener::bind(&config.node.bind_addr).await?;
    tracing::info!("Urfs directory node listening on {}", config.node.bind_addr);

    node.start().await?;

    let app = directory_router(Arc::new(DirectoryState { node: node.clone() }));
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|error| UrfsError::Http(error.to_string()));

    node.shutdown().await;
    served
}

pub(crate) fn directory_router(state: Arc<DirectoryState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/files", get(list_files))
        .route("/files/:hash", delete(remove_file))
        .route("/uploads", post(begin_upload))
        .route("/downloads", post(begin_download))
        .route("/internal/replica/announce", post(announce_replica))
        .route("/internal/replica/events", post(replica_events))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

async fn health(State(state): State<Arc<DirectoryState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        node_id: state.node.node_ref().node_id.clone(),
        role: NodeRole::Directory,
        replica_state: Some(state.node.state()),
    })
}

async fn list_files(State(state): State<Arc<DirectoryState>>) -> Response {
    match state.node.list_files().await {
        Ok(files) => (StatusCode::OK, Json(files)).into_response(),
        Err(error) => response_error(&error),
    }
}

async fn begin_upload(
    State(state): State<Arc<DirectoryState>>,
    Json(request): Json<UploadRequest>,
) -> Response {
    match state.node.begin_upload(&request.name).await {
        Ok(handle) => (StatusCode::CREATED, Json(handle)).into_response(),
        Err(error) => response_error(&error),
    }
}

async fn begin_download(
    State(state): State<Arc<DirectoryState>>,
    Json(request): Json<DownloadRequest>,
) -> Response {
    match state.node.begin_download(&request.hash).await {
        Ok(handle) => (StatusCode::CREATED, Json(handle)).into_response(),
        Err(error) => response_error(&error),
    }
}

async fn remove_file(
    State(state): State<Arc<DirectoryState>>,
    Path(hash): Path<String>,
) -> Response {
    match state.node.remove(&hash).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(error) => response_error(&error),
    }
}

async fn announce_replica(
    State(state): State<Arc<DirectoryState>>,
    Json(request): Json<AnnounceRequest>,
) -> Response {
    state.node.handle_announcement(request.node).await;
    StatusCode::ACCEPTED.into_response()
}

async fn replica_events(
    State(state): State<Arc<DirectoryState>>,
    Json(request): Json<ReplicaEventsRequest>,
) -> Response {
    let applied = state.node.apply_events(request.events).await;
    (StatusCode::OK, Json(ReplicaEventsResponse { applied })).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::test_support::{bind, call, empty_request, json_request, serve};
    use serde_json::json;
    use std::time::Duration;
    use urfs_core::{
        DirectoryNodeOptions, FileInfo, HttpDirectoryClient, LocalStorageClient, MemoryEventBus,
        NodeRef, RetryPolicy, StaticRegistry, StorageNode, StorageNodeOptions, upload_bytes,
    };

    async fn setup(dir: &std::path::Path) -> (Router, Arc<DirectoryNode>, Arc<StorageNode>) {
        let bus = Arc::new(MemoryEventBus::new());
        let storage_ref = NodeRef::new("fm1", "127.0.0.1:9001");
        let storage_node = Arc::new(
            StorageNode::open(
                storage_ref.clone(),
                StorageNodeOptions::new(dir.to_path_buf()),
                bus.clone(),
            )
            .await
            .unwrap(),
        );
        let storage = Arc::new(LocalStorageClient::new());
        storage.add_node(storage_node.clone()).await;

        let node = Arc::new(DirectoryNode::new(
            NodeRef::new("fe1", "127.0.0.1:8080"),
            DirectoryNodeDeps {
                bus: bus.clone(),
                registry: Arc::new(StaticRegistry::new(vec![storage_ref])),
                storage,
                peer: Arc::new(BusReplicaPeer::new(bus, RetryPolicy::default())),
            },
            DirectoryNodeOptions::default(),
        ));
        node.start().await.unwrap();

        let app = directory_router(Arc::new(DirectoryState { node: node.clone() }));
        (app, node, storage_node)
    }

    #[tokio::test]
    async fn test_upload_conflict_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let (app, node, storage_node) = setup(dir.path()).await;

        let (status, body) = call(&app, json_request("POST", "/uploads", json!({"name": "a.txt"}))).await;
        assert_eq!(status, StatusCode::CREATED);
        let handle: urfs_core::SessionHandle = serde_json::from_slice(&body).unwrap();
        assert_eq!(handle.node.node_id, "fm1");

        storage_node
            .upload_send(&handle.session_id, bytes::Bytes::from("hello"))
            .await
            .unwrap();
        let info = storage_node.upload_save(&handle.session_id).await.unwrap();
        storage_node.destroy_session(&handle.session_id).await;

        for _ in 0..100 {
            if !node.list_files().await.unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let (status, body) = call(&app, empty_request("GET", "/files")).await;
        assert_eq!(status, StatusCode::OK);
        let files: Vec<FileInfo> = serde_json::from_slice(&body).unwrap();
        assert_eq!(files, vec![info.clone()]);

        let (status, body) = call(&app, json_request("POST", "/uploads", json!({"name": "a.txt"}))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        let error: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(error["kind"], "file_name_in_use");

        let (status, _) = call(&app, empty_request("DELETE", &format!("/files/{}", info.hash))).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_hash_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (app, node, _) = setup(dir.path()).await;

        let (status, body) = call(&app, json_request("POST", "/downloads", json!({"hash": "nope"}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let error: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(error["kind"], "file_not_found");
        assert_eq!(error["detail"], "nope");

        let (status, _) = call(&app, empty_request("DELETE", "/files/nope")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_replica_events_endpoint_applies_addressed_replays() {
        let dir = tempfile::tempdir().unwrap();
        let (app, node, _) = setup(dir.path()).await;

        let record = json!({
            "name": "r.txt",
            "hash": "h-replayed",
            "storage_node": {"node_id": "fm1", "address": "127.0.0.1:9001"}
        });
        let body = json!({
            "events": [
                {"type": "replay", "target": "fe1", "record": record},
                {"type": "replay", "target": "fe9", "record": record},
            ]
        });

        let (status, body) = call(&app, json_request("POST", "/internal/replica/events", body)).await;
        assert_eq!(status, StatusCode::OK);
        let response: ReplicaEventsResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(response.applied, 1);
        assert!(node.index().read().await.contains_hash("h-replayed"));

        let (status, body) = call(&app, empty_request("GET", "/health")).await;
        assert_eq!(status, StatusCode::OK);
        let health: HealthResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(health.role, NodeRole::Directory);
        assert!(health.replica_state.is_some());

        node.shutdown().await;
    }

    /// A directory node reachable over HTTP that replays its index to peers
    /// over HTTP. It is not started here.
    async fn serve_directory(
        node_id: &str,
        bus: Arc<MemoryEventBus>,
        storage_ref: NodeRef,
        storage: Arc<LocalStorageClient>,
    ) -> (Arc<DirectoryNode>, HttpDirectoryClient) {
        let (listener, address) = bind().await;
        let node = Arc::new(DirectoryNode::new(
            NodeRef::new(node_id, address),
            DirectoryNodeDeps {
                bus,
                registry: Arc::new(StaticRegistry::new(vec![storage_ref])),
                storage,
                peer: Arc::new(HttpReplicaPeer::new().unwrap()),
            },
            DirectoryNodeOptions {
                catch_up_batch_size: 1,
                ..DirectoryNodeOptions::default()
            },
        ));
        serve(
            listener,
            directory_router(Arc::new(DirectoryState { node: node.clone() })),
        );
        let client = HttpDirectoryClient::new(node.node_ref().clone()).unwrap();
        (node, client)
    }

    async fn lists_exactly(client: &HttpDirectoryClient, expected: &[FileInfo]) -> bool {
        let mut files = client.list_files().await.unwrap();
        files.sort_by(|a, b| a.hash.cmp(&b.hash));
        files == expected
    }

    #[tokio::test]
    async fn test_http_announce_replays_index_to_new_replica() {
        let dir = tempfile::tempdir().unwrap();
        let bus = Arc::new(MemoryEventBus::new());
        let storage_ref = NodeRef::new("fm1", "127.0.0.1:9001");
        let storage_node = Arc::new(
            StorageNode::open(
                storage_ref.clone(),
                StorageNodeOptions::new(dir.path().to_path_buf()),
                bus.clone(),
            )
            .await
            .unwrap(),
        );
        let storage = Arc::new(LocalStorageClient::new());
        storage.add_node(storage_node).await;

        let (first, first_client) =
            serve_directory("fe1", bus.clone(), storage_ref.clone(), storage.clone()).await;
        first.start().await.unwrap();

        let mut expected = Vec::new();
        for (name, data) in [("a.txt", b"alpha".as_slice()), ("b.txt", b"beta".as_slice())] {
            let info = upload_bytes(&first_client, storage.as_ref(), name, data, 1024)
                .await
                .unwrap();
            expected.push(info);
        }
        expected.sort_by(|a, b| a.hash.cmp(&b.hash));

        let mut listed = false;
        for _ in 0..200 {
            if lists_exactly(&first_client, &expected).await {
                listed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(listed);

        let conflict = first_client.begin_upload("a.txt").await;
        assert!(matches!(conflict, Err(UrfsError::FileNameInUse(name)) if name == "a.txt"));
        let missing = first_client.begin_download("missing").await;
        assert!(matches!(missing, Err(UrfsError::FileNotFound(hash)) if hash == "missing"));

        let (second, second_client) =
            serve_directory("fe2", bus.clone(), storage_ref, storage.clone()).await;
        assert!(second_client.list_files().await.unwrap().is_empty());

        first_client
            .announce_replica(second.node_ref())
            .await
            .unwrap();

        let mut caught_up = false;
        for _ in 0..200 {
            if lists_exactly(&second_client, &expected).await {
                caught_up = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(caught_up);

        first.shutdown().await;
    }
}
