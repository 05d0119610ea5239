// src/symbols/mod.rs
// Caller-supplied capabilities the runtime can invoke by name

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;

/// Everything a symbol sees about the calling environment
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolCall {
    pub symbol: String,
    pub prompt: String,
    pub prompt_id: String,
    pub depth: u32,
    pub scratch: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
}

/// External symbol. Metric symbols must return a finite number.
#[async_trait]
pub trait ExternalSymbol: Send + Sync {
    async fn call(&self, call: SymbolCall) -> Result<Value>;
}

/// Adapter so plain async closures can serve as symbols.
pub struct FnSymbol<F>(pub F);

#[async_trait]
impl<F> ExternalSymbol for FnSymbol<F>
where
    F: Fn(SymbolCall) -> BoxFuture<'static, Result<Value>> + Send + Sync,
{
    async fn call(&self, call: SymbolCall) -> Result<Value> {
        (self.0)(call).await
    }
}

/// Name → handler map handed to the runtime at construction
#[derive(Clone, Default)]
pub struct SymbolTable {
    inner: HashMap<String, Arc<dyn ExternalSymbol>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, symbol: Arc<dyn ExternalSymbol>) {
        self.inner.insert(name.into(), symbol);
    }

    pub fn with(mut self, name: impl Into<String>, symbol: Arc<dyn ExternalSymbol>) -> Self {
        self.insert(name, symbol);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ExternalSymbol>> {
        self.inner.get(name).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.inner.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_fn_symbol_roundtrip() {
        let table = SymbolTable::new().with(
            "double",
            Arc::new(FnSymbol(|call: SymbolCall| {
                Box::pin(async move {
                    let n = call.args.and_then(|a| a["n"].as_f64()).unwrap_or(0.0);
                    Ok(json!(n * 2.0))
                }) as BoxFuture<'static, Result<Value>>
            })),
        );
        let symbol = table.get("double").unwrap();
        let result = symbol
            .call(SymbolCall {
                symbol: "double".into(),
                prompt: String::new(),
                prompt_id: "abc".into(),
                depth: 0,
                scratch: json!({}),
                args: Some(json!({"n": 4})),
                input: None,
            })
            .await
            .unwrap();
        assert_eq!(result, json!(8.0));
        assert!(table.get("missing").is_none());
    }
}
