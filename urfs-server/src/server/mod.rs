use crate::config::Config;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use urfs_core::wire::ErrorResponse;
use urfs_core::{DynEventBus, DynRegistry, EventBusBuilder, NodeRef, RegistryBuilder, Result, UrfsError};

mod directory;
mod storage;

pub use directory::run_directory_server;
pub use storage::run_storage_server;

pub(crate) async fn build_event_bus(config: &Config) -> Result<Arc<DynEventBus>> {
    let mut builder = EventBusBuilder::new()
        .backend(config.event_bus.backend.clone())
        .namespace(config.event_bus.namespace_or_default());
    if let Some(redis) = config.event_bus.redis.as_ref() {
        builder = builder.redis_url(redis.url.clone());
    }
    builder.build().await
}

pub(crate) async fn build_registry(config: &Config) -> Result<Arc<DynRegistry>> {
    let mut builder = RegistryBuilder::new()
        .backend(config.registry.backend.clone())
        .namespace(config.registry.namespace_or_default())
        .static_nodes(
            config
                .registry
                .static_nodes
                .iter()
                .map(NodeRef::from)
                .collect(),
        );
    if let Some(redis) = config.registry.redis.as_ref() {
        builder = builder.redis_url(redis.url.clone());
    }
    builder.build().await
}

pub(crate) fn error_status(error: &UrfsError) -> StatusCode {
    match error {
        UrfsError::FileNotFound(_) | UrfsError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        UrfsError::FileNameInUse(_) | UrfsError::FileAlreadyExists(_) => StatusCode::CONFLICT,
        UrfsError::InvalidChunk(_) | UrfsError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        UrfsError::InvalidReference(_) | UrfsError::EventBus(_) => StatusCode::SERVICE_UNAVAILABLE,
        UrfsError::Http(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) fn response_error(error: &UrfsError) -> Response {
    let status = error_status(error);
    if status.is_server_error() {
        tracing::error!("Request failed: {}", error);
    }
    (status, Json(ErrorResponse::from(error))).into_response()
}

pub(crate) async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", error);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
