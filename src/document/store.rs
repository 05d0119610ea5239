// src/document/store.rs
// Document access behind a trait so prompts can live outside the process

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Serialize;

/// Read-all / read-slice access keyed by document id.
///
/// The action interpreter is the sole caller and accounts every read
/// against the environment budget, whatever the backend.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn read_all(&self, doc_id: &str) -> Result<String>;

    /// `start..end` in characters, clamped to the document bounds.
    async fn read_slice(&self, doc_id: &str, start: usize, end: usize) -> Result<String>;
}

/// Character-based slice with clamping; shared by store impls.
pub(crate) fn slice_chars(text: &str, start: usize, end: usize) -> String {
    let end = end.min(text.chars().count());
    let start = start.min(end);
    text.chars().skip(start).take(end - start).collect()
}

/// In-memory map of documents
#[derive(Debug, Default)]
pub struct InMemoryDocStore {
    docs: HashMap<String, String>,
}

impl InMemoryDocStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-document convenience constructor.
    pub fn with_doc(doc_id: impl Into<String>, text: impl Into<String>) -> Self {
        let mut docs = HashMap::new();
        docs.insert(doc_id.into(), text.into());
        Self { docs }
    }

    pub fn insert(&mut self, doc_id: impl Into<String>, text: impl Into<String>) {
        self.docs.insert(doc_id.into(), text.into());
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocStore {
    async fn read_all(&self, doc_id: &str) -> Result<String> {
        self.docs
            .get(doc_id)
            .cloned()
            .ok_or_else(|| anyhow!("document not found: {}", doc_id))
    }

    async fn read_slice(&self, doc_id: &str, start: usize, end: usize) -> Result<String> {
        let text = self
            .docs
            .get(doc_id)
            .ok_or_else(|| anyhow!("document not found: {}", doc_id))?;
        Ok(slice_chars(text, start, end))
    }
}

/// Request shape handed to a remote document service
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRequest {
    pub doc_id: String,
    pub start: Option<usize>,
    pub end: Option<usize>,
}

/// Caller-supplied `readDocument` function
pub type ReadDocumentFn =
    Arc<dyn Fn(DocumentRequest) -> BoxFuture<'static, Result<String>> + Send + Sync>;

/// Store backed by an external document service
pub struct RemoteDocStore {
    read_document: ReadDocumentFn,
}

impl RemoteDocStore {
    pub fn new(read_document: ReadDocumentFn) -> Self {
        Self { read_document }
    }
}

#[async_trait]
impl DocumentStore for RemoteDocStore {
    async fn read_all(&self, doc_id: &str) -> Result<String> {
        (self.read_document)(DocumentRequest {
            doc_id: doc_id.to_string(),
            start: None,
            end: None,
        })
        .await
    }

    async fn read_slice(&self, doc_id: &str, start: usize, end: usize) -> Result<String> {
        (self.read_document)(DocumentRequest {
            doc_id: doc_id.to_string(),
            start: Some(start),
            end: Some(end),
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_roundtrip() {
        let store = InMemoryDocStore::with_doc("d1", "hello world");
        assert_eq!(store.read_all("d1").await.unwrap(), "hello world");
        assert_eq!(store.read_slice("d1", 6, 11).await.unwrap(), "world");
        assert!(store.read_all("missing").await.is_err());
    }

    #[tokio::test]
    async fn test_slice_clamps() {
        let store = InMemoryDocStore::with_doc("d1", "abc");
        assert_eq!(store.read_slice("d1", 1, 100).await.unwrap(), "bc");
        assert_eq!(store.read_slice("d1", 5, 9).await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_remote_delegates() {
        let read: ReadDocumentFn = Arc::new(|req: DocumentRequest| {
            Box::pin(async move {
                match (req.start, req.end) {
                    (Some(s), Some(e)) => Ok(format!("slice {}..{} of {}", s, e, req.doc_id)),
                    _ => Ok(format!("all of {}", req.doc_id)),
                }
            }) as BoxFuture<'static, Result<String>>
        });
        let store = RemoteDocStore::new(read);
        assert_eq!(store.read_all("x").await.unwrap(), "all of x");
        assert_eq!(store.read_slice("x", 1, 2).await.unwrap(), "slice 1..2 of x");
    }
}
