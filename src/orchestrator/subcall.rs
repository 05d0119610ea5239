// src/orchestrator/subcall.rs
// Sub-RLM dispatch: memoized, depth-checked, budget-derived child runs

use serde_json::json;
use tracing::debug;

use crate::config::BudgetOverrides;
use crate::core::budget::Budget;
use crate::core::error::{RlmError, RlmResult};
use crate::core::fingerprint::fingerprint_value;
use crate::core::preview::preview;
use crate::env::{Environment, SubCallCache};
use crate::trace::TraceEvent;

use super::Rlm;

/// Per-call knobs for a child run
#[derive(Debug, Clone, Default)]
pub struct SubCallOptions {
    /// Optional task override handed to the child loop.
    pub sub_prompt: Option<String>,
    pub budget: BudgetOverrides,
}

/// The slice of parent state a sub-call needs. Holding clones of the
/// shared handles (not `&mut Environment`) lets `sub_map` fan out while
/// the parent environment stays borrowed.
pub(crate) struct SubCallSeed<'a> {
    pub prompt_id: String,
    pub cache: SubCallCache,
    pub budget: &'a Budget,
}

impl Rlm {
    /// Run one child RLM to its final answer, through the shared cache.
    ///
    /// A hit returns without consuming any budget but still surfaces a
    /// `sub_call` trace event. A miss checks depth, consumes one sub-call,
    /// and runs the full root loop in a derived environment. Child
    /// failures (including the child's own budget breaches) come back as
    /// recoverable action errors; parent-side breaches stay fatal.
    pub(crate) async fn dispatch_sub_call(
        &self,
        seed: &SubCallSeed<'_>,
        query: &str,
        prompt: &str,
        options: &SubCallOptions,
    ) -> RlmResult<(String, TraceEvent)> {
        let key = fingerprint_value(&json!({
            "promptId": seed.prompt_id,
            "query": query,
            "subPrompt": options.sub_prompt,
            "options": {
                "prompt": prompt,
                "budget": options.budget,
            },
        }));
        let preview_chars = self.config().preview_chars;

        let cached = seed
            .cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&key)
            .cloned();
        if let Some(answer) = cached {
            debug!(fingerprint = %key, "sub-call cache hit");
            let event = TraceEvent::SubCall {
                fingerprint: key,
                cached: true,
                depth: seed.budget.depth() + 1,
                query_preview: preview(query, preview_chars),
                result_len: answer.chars().count(),
                result_preview: preview(&answer, preview_chars),
                elapsed_ms: seed.budget.elapsed_ms(),
            };
            return Ok((answer, event));
        }

        seed.budget.ensure_next_depth()?;
        seed.budget.consume_sub_call()?;

        let child_budget = seed
            .budget
            .child(&self.config().sub_budget.apply(&options.budget));
        let task = options.sub_prompt.clone().unwrap_or_else(|| query.to_string());
        let mut child = Environment::for_prompt(
            prompt,
            seed.cache.clone(),
            child_budget,
            Some(task),
        );

        self.run_loop_boxed(&mut child)
            .await
            .map_err(|e| RlmError::failed(format!("sub-call failed: {}", e)))?;
        let answer = child
            .final_answer()
            .map(str::to_string)
            .ok_or_else(|| RlmError::failed("sub-call returned no final answer"))?;

        seed.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key.clone(), answer.clone());
        debug!(fingerprint = %key, depth = child.depth(), "sub-call complete");

        let event = TraceEvent::SubCall {
            fingerprint: key,
            cached: false,
            depth: child.depth(),
            query_preview: preview(query, preview_chars),
            result_len: answer.chars().count(),
            result_preview: preview(&answer, preview_chars),
            elapsed_ms: seed.budget.elapsed_ms(),
        };
        Ok((answer, event))
    }
}
