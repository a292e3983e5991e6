//! Redis session store.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use voxline_core::{CallError, Result, SessionField, SessionStore, TranscriptSegment};

/// Session store over a shared Redis connection manager.
///
/// The connection manager reconnects internally; individual command
/// failures surface as `StoreUnavailable`, which callers treat as
/// degradation.
#[derive(Clone)]
pub struct RedisSessionStore {
    connection: ConnectionManager,
}

impl RedisSessionStore {
    /// Connects and verifies the server with a ping.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(store_error)?;
        let mut connection = client
            .get_connection_manager()
            .await
            .map_err(store_error)?;
        redis::cmd("PING")
            .query_async::<()>(&mut connection)
            .await
            .map_err(store_error)?;
        tracing::info!("connected to redis session store");
        Ok(Self { connection })
    }
}

fn store_error(e: redis::RedisError) -> CallError {
    CallError::StoreUnavailable {
        message: e.to_string(),
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn set(
        &self,
        call_id: &str,
        field: SessionField,
        value: serde_json::Value,
        ttl: Duration,
    ) -> Result<()> {
        let key = crate::store_key(call_id, field);
        let serialized =
            serde_json::to_string(&value).map_err(|e| CallError::internal(e.to_string()))?;
        let mut connection = self.connection.clone();
        connection
            .set_ex::<_, _, ()>(key, serialized, ttl.as_secs().max(1))
            .await
            .map_err(store_error)
    }

    async fn get(&self, call_id: &str, field: SessionField) -> Result<Option<serde_json::Value>> {
        let key = crate::store_key(call_id, field);
        let mut connection = self.connection.clone();
        let raw: Option<String> = connection.get(key).await.map_err(store_error)?;
        match raw {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| CallError::internal(e.to_string())),
            None => Ok(None),
        }
    }

    async fn append_segment(&self, call_id: &str, segment: &TranscriptSegment) -> Result<()> {
        let key = crate::store_key(call_id, SessionField::TranscriptHistory);
        let serialized =
            serde_json::to_string(segment).map_err(|e| CallError::internal(e.to_string()))?;
        let ttl = SessionField::TranscriptHistory.default_ttl().as_secs() as i64;
        let mut connection = self.connection.clone();
        connection
            .rpush::<_, _, ()>(&key, serialized)
            .await
            .map_err(store_error)?;
        connection
            .expire::<_, ()>(&key, ttl)
            .await
            .map_err(store_error)
    }

    async fn clear(&self, call_id: &str) -> Result<()> {
        let keys: Vec<String> = SessionField::ALL
            .iter()
            .map(|field| crate::store_key(call_id, *field))
            .collect();
        let mut connection = self.connection.clone();
        connection.del::<_, ()>(keys).await.map_err(store_error)
    }
}
