// src/env/mod.rs
// Per-call runtime state: scratch, document handle, budget, trace, final

pub mod scratch;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::core::budget::Budget;
use crate::core::error::RlmResult;
use crate::core::fingerprint::fingerprint;
use crate::document::{DocumentStore, InMemoryDocStore};
use crate::trace::Trace;

pub use scratch::{format_number, get_path, set_path, ScratchMap, ScratchValue};

/// Sub-call memo table, shared by reference across the whole root tree.
/// Insertion is last-writer-wins on identical fingerprints.
pub type SubCallCache = Arc<Mutex<HashMap<String, String>>>;

pub fn new_cache() -> SubCallCache {
    Arc::new(Mutex::new(HashMap::new()))
}

/// State for one root or child call. The document body itself stays in
/// the store; the environment only holds its id, fingerprint, and length.
pub struct Environment {
    pub doc_id: String,
    pub prompt_id: String,
    pub prompt_len: usize,
    pub doc_store: Arc<dyn DocumentStore>,
    pub scratch: ScratchMap,
    pub cache: SubCallCache,
    pub budget: Budget,
    pub trace: Trace,
    pub task: Option<String>,
    final_answer: Option<String>,
}

impl Environment {
    /// Environment over a prompt held in memory.
    pub fn for_prompt(
        prompt: &str,
        cache: SubCallCache,
        budget: Budget,
        task: Option<String>,
    ) -> Self {
        let prompt_id = fingerprint(prompt);
        let store = InMemoryDocStore::with_doc(prompt_id.clone(), prompt);
        Self {
            doc_id: prompt_id.clone(),
            prompt_id,
            prompt_len: prompt.chars().count(),
            doc_store: Arc::new(store),
            scratch: ScratchMap::new(),
            cache,
            budget,
            trace: Trace::new(),
            task,
            final_answer: None,
        }
    }

    /// Environment over a document that lives in an external store. Reads
    /// the document once (uncharged) to fingerprint and measure it.
    pub async fn for_document(
        doc_id: impl Into<String>,
        store: Arc<dyn DocumentStore>,
        cache: SubCallCache,
        budget: Budget,
        task: Option<String>,
    ) -> RlmResult<Self> {
        let doc_id = doc_id.into();
        let text = store.read_all(&doc_id).await?;
        Ok(Self {
            doc_id,
            prompt_id: fingerprint(&text),
            prompt_len: text.chars().count(),
            doc_store: store,
            scratch: ScratchMap::new(),
            cache,
            budget,
            trace: Trace::new(),
            task,
            final_answer: None,
        })
    }

    pub fn depth(&self) -> u32 {
        self.budget.depth()
    }

    /// First write wins; `final` is immutable once set.
    pub fn set_final(&mut self, value: impl Into<String>) -> bool {
        if self.final_answer.is_some() {
            return false;
        }
        self.final_answer = Some(value.into());
        true
    }

    pub fn final_answer(&self) -> Option<&str> {
        self.final_answer.as_deref()
    }

    pub fn cache_get(&self, key: &str) -> Option<String> {
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned()
    }

    pub fn cache_put(&self, key: impl Into<String>, value: impl Into<String>) {
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key.into(), value.into());
    }

    pub fn scratch_keys(&self) -> Vec<String> {
        self.scratch.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BudgetConfig;

    fn env_for(prompt: &str) -> Environment {
        Environment::for_prompt(
            prompt,
            new_cache(),
            Budget::root(&BudgetConfig::default()),
            None,
        )
    }

    #[test]
    fn test_prompt_id_is_stable() {
        let a = env_for("same prompt");
        let b = env_for("same prompt");
        assert_eq!(a.prompt_id, b.prompt_id);
        assert_eq!(a.prompt_len, "same prompt".chars().count());
    }

    #[test]
    fn test_final_first_write_wins() {
        let mut env = env_for("doc");
        assert!(env.set_final("first"));
        assert!(!env.set_final("second"));
        assert_eq!(env.final_answer(), Some("first"));
    }

    #[test]
    fn test_cache_shared_by_reference() {
        let cache = new_cache();
        let a = Environment::for_prompt(
            "p1",
            cache.clone(),
            Budget::root(&BudgetConfig::default()),
            None,
        );
        let b = Environment::for_prompt(
            "p2",
            cache,
            Budget::root(&BudgetConfig::default()),
            None,
        );
        a.cache_put("fp", "value");
        assert_eq!(b.cache_get("fp").as_deref(), Some("value"));
    }
}
