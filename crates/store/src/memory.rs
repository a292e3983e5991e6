//! In-memory session store.
//!
//! Used in tests and as the degraded mode when no external store is
//! configured or reachable. Honors TTLs lazily on read.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;

use voxline_core::{Result, SessionField, SessionStore, TranscriptSegment};

#[derive(Default)]
pub struct InMemorySessionStore {
    entries: RwLock<HashMap<String, Entry>>,
}

struct Entry {
    value: serde_json::Value,
    expires_at: Instant,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn live_value(&self, key: &str) -> Option<serde_json::Value> {
        let entries = self.entries.read();
        let entry = entries.get(key)?;
        if entry.expires_at <= Instant::now() {
            return None;
        }
        Some(entry.value.clone())
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn set(
        &self,
        call_id: &str,
        field: SessionField,
        value: serde_json::Value,
        ttl: Duration,
    ) -> Result<()> {
        self.entries.write().insert(
            crate::store_key(call_id, field),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, call_id: &str, field: SessionField) -> Result<Option<serde_json::Value>> {
        Ok(self.live_value(&crate::store_key(call_id, field)))
    }

    async fn append_segment(&self, call_id: &str, segment: &TranscriptSegment) -> Result<()> {
        let key = crate::store_key(call_id, SessionField::TranscriptHistory);
        let appended = serde_json::to_value(segment)
            .map_err(|e| voxline_core::CallError::internal(e.to_string()))?;

        let mut entries = self.entries.write();
        let now = Instant::now();
        let entry = entries.entry(key).or_insert_with(|| Entry {
            value: serde_json::Value::Array(Vec::new()),
            expires_at: now + SessionField::TranscriptHistory.default_ttl(),
        });
        if entry.expires_at <= now || !entry.value.is_array() {
            entry.value = serde_json::Value::Array(Vec::new());
        }
        if let Some(list) = entry.value.as_array_mut() {
            list.push(appended);
        }
        entry.expires_at = now + SessionField::TranscriptHistory.default_ttl();
        Ok(())
    }

    async fn clear(&self, call_id: &str) -> Result<()> {
        let mut entries = self.entries.write();
        for field in SessionField::ALL {
            entries.remove(&crate::store_key(call_id, field));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxline_core::Speaker;

    #[tokio::test]
    async fn set_then_get_observes_written_value() {
        let store = InMemorySessionStore::new();
        store
            .set(
                "c1",
                SessionField::IsAiSpeaking,
                serde_json::json!(true),
                Duration::from_secs(60),
            )
            .await
            .unwrap();

        let value = store.get("c1", SessionField::IsAiSpeaking).await.unwrap();
        assert_eq!(value, Some(serde_json::json!(true)));
    }

    #[tokio::test]
    async fn expired_values_read_as_empty() {
        let store = InMemorySessionStore::new();
        store
            .set(
                "c1",
                SessionField::CurrentStatus,
                serde_json::json!("answered"),
                Duration::from_millis(0),
            )
            .await
            .unwrap();

        assert_eq!(store.get("c1", SessionField::CurrentStatus).await.unwrap(), None);
    }

    #[tokio::test]
    async fn clear_removes_every_field() {
        let store = InMemorySessionStore::new();
        for field in SessionField::ALL {
            store
                .set("c1", field, serde_json::json!("x"), Duration::from_secs(60))
                .await
                .unwrap();
        }
        store
            .append_segment("c1", &TranscriptSegment::new("c1", Speaker::User, "hi"))
            .await
            .unwrap();

        store.clear("c1").await.unwrap();
        for field in SessionField::ALL {
            assert_eq!(store.get("c1", field).await.unwrap(), None);
        }
    }

    #[tokio::test]
    async fn segments_accumulate_in_order() {
        let store = InMemorySessionStore::new();
        store
            .append_segment("c1", &TranscriptSegment::new("c1", Speaker::User, "one"))
            .await
            .unwrap();
        store
            .append_segment("c1", &TranscriptSegment::new("c1", Speaker::Assistant, "two"))
            .await
            .unwrap();

        let history = store
            .get("c1", SessionField::TranscriptHistory)
            .await
            .unwrap()
            .unwrap();
        let texts: Vec<&str> = history
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["text"].as_str().unwrap())
            .collect();
        assert_eq!(texts, vec!["one", "two"]);
    }
}
