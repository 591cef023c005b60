use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::common::error::{ChatError, ChatResult};
use crate::common::models::Document;

/// Collection/document store holding user profiles.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get_document(&self, collection: &str, id: &str) -> ChatResult<Option<Document>>;
    async fn set_document(&self, collection: &str, id: &str, fields: Document) -> ChatResult<()>;
    /// Documents whose `field` equals `value`, with their ids.
    async fn find_by_field(&self, collection: &str, field: &str, value: &str) -> ChatResult<Vec<(String, Document)>>;
}

#[derive(Default)]
struct Collections {
    docs: HashMap<String, HashMap<String, Document>>,
    offline: bool,
}

#[derive(Clone, Default)]
pub struct InMemoryDocumentStore {
    inner: Arc<Mutex<Collections>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every call fails with a remote error.
    pub async fn set_offline(&self, offline: bool) {
        self.inner.lock().await.offline = offline;
    }
}

fn unreachable_store() -> ChatError {
    ChatError::Remote("Document store unreachable".to_string())
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get_document(&self, collection: &str, id: &str) -> ChatResult<Option<Document>> {
        let store = self.inner.lock().await;
        if store.offline {
            return Err(unreachable_store());
        }
        Ok(store.docs.get(collection).and_then(|c| c.get(id)).cloned())
    }

    async fn set_document(&self, collection: &str, id: &str, fields: Document) -> ChatResult<()> {
        let mut store = self.inner.lock().await;
        if store.offline {
            return Err(unreachable_store());
        }
        debug!("[DOCS:MEM] set {}/{}", collection, id);
        store.docs.entry(collection.to_string()).or_default().insert(id.to_string(), fields);
        Ok(())
    }

    async fn find_by_field(&self, collection: &str, field: &str, value: &str) -> ChatResult<Vec<(String, Document)>> {
        let store = self.inner.lock().await;
        if store.offline {
            return Err(unreachable_store());
        }
        let mut found: Vec<(String, Document)> = store
            .docs
            .get(collection)
            .map(|c| {
                c.iter()
                    .filter(|(_, doc)| doc.get(field) == Some(&Value::String(value.to_string())))
                    .map(|(id, doc)| (id.clone(), doc.clone()))
                    .collect()
            })
            .unwrap_or_default();
        found.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn find_by_field_matches_exact_value() {
        let store = InMemoryDocumentStore::new();
        store.set_document("users", "u1", doc(json!({"phone_number": "0811", "name": "Ana"}))).await.unwrap();
        store.set_document("users", "u2", doc(json!({"phone_number": "0812", "name": "Budi"}))).await.unwrap();

        let found = store.find_by_field("users", "phone_number", "0812").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, "u2");
        assert!(store.find_by_field("users", "phone_number", "0899").await.unwrap().is_empty());
        assert!(store.get_document("users", "u3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn offline_store_fails_every_call() {
        let store = InMemoryDocumentStore::new();
        store.set_offline(true).await;
        assert!(matches!(store.get_document("users", "u1").await, Err(ChatError::Remote(_))));
    }
}
