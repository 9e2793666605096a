// Copyright (C) 2025 Placeflow Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Document store adapter.
//!
//! The engine never holds binary content; it stores opaque `DocRef` strings
//! and leaves blob storage to an injected backend. Uploads happen before the
//! case lock is taken, so slow storage never serializes transitions.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{EngineError, Result};

/// Binary artifact storage (IDs, contracts, quote sheets, signatures).
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Store a blob, returning an opaque reference.
    async fn put(&self, content: Vec<u8>, label: &str) -> Result<String>;

    /// Fetch a blob by reference. `None` if the reference is unknown.
    async fn get(&self, doc_ref: &str) -> Result<Option<Vec<u8>>>;
}

/// In-memory document store for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryDocumentStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn put(&self, content: Vec<u8>, label: &str) -> Result<String> {
        let doc_ref = format!("mem://{}/{}", Uuid::new_v4(), label);
        self.blobs
            .lock()
            .map_err(|_| EngineError::Database {
                operation: "document_put".to_string(),
                details: "store poisoned".to_string(),
            })?
            .insert(doc_ref.clone(), content);
        Ok(doc_ref)
    }

    async fn get(&self, doc_ref: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .blobs
            .lock()
            .map_err(|_| EngineError::Database {
                operation: "document_get".to_string(),
                details: "store poisoned".to_string(),
            })?
            .get(doc_ref)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_then_get() {
        let store = MemoryDocumentStore::new();
        let doc_ref = store.put(b"passport scan".to_vec(), "passport").await.unwrap();
        assert!(doc_ref.starts_with("mem://"));
        assert!(doc_ref.ends_with("/passport"));

        let content = store.get(&doc_ref).await.unwrap();
        assert_eq!(content.as_deref(), Some(b"passport scan".as_ref()));
        assert_eq!(store.get("mem://nope").await.unwrap(), None);
    }
}
