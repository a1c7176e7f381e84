//! The persistence boundary standing in for the out-of-scope BadgerDB-backed
//! `responses`/`conversations` store.
//!
//! Per SPEC_FULL.md §10.5, the gateway never fabricates a fake BadgerDB
//! dependency. `ConversationStore` is the entire contract an out-of-scope
//! durable KV engine would need to satisfy; [`InMemoryConversationStore`]
//! is a body sufficient to exercise the HTTP CRUD surface in tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

/// One stored record: an opaque JSON body plus bookkeeping.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StoredRecord {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub body: Value,
}

/// CRUD boundary for `/v1/responses` and `/v1/conversations`.
///
/// Both endpoint families share this contract: store is keyed by a
/// generated id, bodies are opaque JSON, and `list` returns every record
/// currently stored.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn put(&self, body: Value) -> StoredRecord;
    async fn get(&self, id: Uuid) -> Option<StoredRecord>;
    async fn delete(&self, id: Uuid) -> bool;
    async fn list(&self) -> Vec<StoredRecord>;
}

/// In-memory `ConversationStore`. Data does not survive a restart — per
/// §1's explicit non-goal, the gateway "does not persist routing state
/// across restarts," and this store inherits the same posture for
/// response/conversation records.
#[derive(Default)]
pub struct InMemoryConversationStore {
    records: Mutex<HashMap<Uuid, StoredRecord>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        InMemoryConversationStore::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn put(&self, body: Value) -> StoredRecord {
        let record = StoredRecord {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            body,
        };
        self.records.lock().unwrap().insert(record.id, record.clone());
        record
    }

    async fn get(&self, id: Uuid) -> Option<StoredRecord> {
        self.records.lock().unwrap().get(&id).cloned()
    }

    async fn delete(&self, id: Uuid) -> bool {
        self.records.lock().unwrap().remove(&id).is_some()
    }

    async fn list(&self) -> Vec<StoredRecord> {
        self.records.lock().unwrap().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = InMemoryConversationStore::new();
        let record = store.put(json!({"hello": "world"})).await;
        let fetched = store.get(record.id).await.expect("record should exist");
        assert_eq!(fetched.body, json!({"hello": "world"}));
    }

    #[tokio::test]
    async fn delete_removes_record() {
        let store = InMemoryConversationStore::new();
        let record = store.put(json!({})).await;
        assert!(store.delete(record.id).await);
        assert!(store.get(record.id).await.is_none());
        assert!(!store.delete(record.id).await);
    }

    #[tokio::test]
    async fn list_returns_every_stored_record() {
        let store = InMemoryConversationStore::new();
        store.put(json!({"n": 1})).await;
        store.put(json!({"n": 2})).await;
        assert_eq!(store.list().await.len(), 2);
    }
}
