use super::{EventBus, MemoryEventBus, RedisEventBus};
use crate::{Result, UrfsError};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct EventBusBuilder {
    backend: Option<String>,
    namespace: Option<String>,
    redis_url: Option<String>,
}

impl EventBusBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = Some(url.into());
        self
    }

    fn resolve_namespace(&self) -> Result<String> {
        let namespace = self
            .namespace
            .as_deref()
            .unwrap_or("default")
            .trim()
            .to_string();
        if namespace.is_empty() {
            return Err(UrfsError::Config(
                "event bus namespace cannot be empty".to_string(),
            ));
        }

        Ok(namespace)
    }

    fn resolve_backend(&self) -> Result<String> {
        let backend = self
            .backend
            .as_deref()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        if backend.is_empty() {
            return Err(UrfsError::Config(
                "event bus backend cannot be empty".to_string(),
            ));
        }

        Ok(backend)
    }

    pub async fn build(&self) -> Result<Arc<dyn EventBus>> {
        let namespace = self.resolve_namespace()?;
        let backend = self.resolve_backend()?;

        match backend.as_str() {
            "memory" => Ok(Arc::new(MemoryEventBus::new())),
            "redis" => {
                let url = self.redis_url.as_deref().unwrap_or_default().trim();
                if url.is_empty() {
                    return Err(UrfsError::Config(
                        "redis url is required for redis event bus".to_string(),
                    ));
                }

                let bus = RedisEventBus::new(url, &namespace).await?;
                Ok(Arc::new(bus))
            }
            other => Err(UrfsError::Config(format!(
                "unsupported event bus backend: {}",
                other
            ))),
        }
    }
}
