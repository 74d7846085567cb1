use super::{EventBus, FILE_UPDATES_TOPIC, FRONTEND_UPDATES_TOPIC, FileEvent, Subscription};
use crate::error::{Result, UrfsError};
use crate::node::NodeRef;
use async_trait::async_trait;
use futures_util::StreamExt;
use redis::{AsyncCommands, Client};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, mpsc};

/// Redis pub/sub event bus. Topics map to channels
/// `urfs:{namespace}:{topic}`; payloads are JSON.
pub struct RedisEventBus {
    client: Client,
    conn: Mutex<redis::aio::MultiplexedConnection>,
    prefix: String,
}

impl RedisEventBus {
    /// Connect and verify the server answers. Failure here is meant to stop
    /// node startup.
    pub async fn new(url: &str, namespace: &str) -> Result<Self> {
        let client = Client::open(url)
            .map_err(|e| UrfsError::EventBus(format!("Failed to connect to Redis: {}", e)))?;

        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| UrfsError::EventBus(format!("Failed to connect to Redis: {}", e)))?;

        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| UrfsError::EventBus(format!("Redis ping failed: {}", e)))?;

        Ok(Self {
            client,
            conn: Mutex::new(conn),
            prefix: format!("urfs:{}", namespace),
        })
    }

    fn channel(&self, topic: &str) -> String {
        format!("{}:{}", self.prefix, topic)
    }

    async fn publish<T: Serialize + ?Sized>(&self, topic: &str, message: &T) -> Result<()> {
        let payload = serde_json::to_string(message)?;
        let mut conn = self.conn.lock().await;

        let receivers: i64 = conn
            .publish(self.channel(topic), payload)
            .await
            .map_err(|e| UrfsError::EventBus(format!("Failed to publish to Redis: {}", e)))?;

        tracing::trace!("Published on {} to {} receivers", topic, receivers);
        Ok(())
    }

    async fn subscribe<T: DeserializeOwned + Send + 'static>(
        &self,
        topic: &str,
    ) -> Result<Subscription<T>> {
        let channel = self.channel(topic);
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| UrfsError::EventBus(format!("Failed to open Redis pubsub: {}", e)))?;

        pubsub
            .subscribe(&channel)
            .await
            .map_err(|e| UrfsError::EventBus(format!("Failed to subscribe {}: {}", channel, e)))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let forwarder = tokio::spawn(async move {
            let mut messages = Box::pin(pubsub.into_on_message());
            while let Some(message) = messages.next().await {
                let payload: String = match message.get_payload() {
                    Ok(payload) => payload,
                    Err(error) => {
                        tracing::warn!("Unreadable payload on {}: {}", channel, error);
                        continue;
                    }
                };

                match serde_json::from_str::<T>(&payload) {
                    Ok(decoded) => {
                        if tx.send(decoded).is_err() {
                            break;
                        }
                    }
                    Err(error) => {
                        tracing::warn!("Undecodable message on {}: {}", channel, error);
                    }
                }
            }
            tracing::debug!("Redis subscription to {} closed", channel);
        });

        Ok(Subscription::new(rx, Some(forwarder)))
    }
}

#[async_trait]
impl EventBus for RedisEventBus {
    async fn publish_file_event(&self, event: &FileEvent) -> Result<()> {
        self.publish(FILE_UPDATES_TOPIC, event).await
    }

    async fn subscribe_file_events(&self) -> Result<Subscription<FileEvent>> {
        self.subscribe(FILE_UPDATES_TOPIC).await
    }

    async fn announce_replica(&self, replica: &NodeRef) -> Result<()> {
        self.publish(FRONTEND_UPDATES_TOPIC, replica).await
    }

    async fn subscribe_announcements(&self) -> Result<Subscription<NodeRef>> {
        self.subscribe(FRONTEND_UPDATES_TOPIC).await
    }
}
