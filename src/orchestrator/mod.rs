// src/orchestrator/mod.rs
// Root loop: the LM <-> environment turn cycle

pub mod heuristics;
pub mod prompts;
pub mod subcall;

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, info, warn};

use crate::actions::{coerce_action, ActionInterpreter};
use crate::config::{BudgetOverrides, RlmConfig};
use crate::core::budget::{Budget, BudgetReport};
use crate::core::error::{RlmError, RlmResult};
use crate::core::preview::preview;
use crate::document::DocumentStore;
use crate::env::scratch::ScratchValue;
use crate::env::{new_cache, Environment};
use crate::llm::schema::action_response_format;
use crate::llm::{extract_first_json, ChatMessage, CompletionOptions, LmProvider, TokenUsage};
use crate::symbols::SymbolTable;
use crate::trace::{Trace, TraceEvent};

pub use subcall::SubCallOptions;

/// The document a root call operates on
pub enum DocumentInput {
    /// Prompt text held in memory for the duration of the call.
    Text(String),
    /// Document resident in an external store.
    Stored {
        doc_id: String,
        store: Arc<dyn DocumentStore>,
    },
}

/// Per-run options layered over the runtime config
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub task: Option<String>,
    pub budget: BudgetOverrides,
}

/// What a finished root call returns
#[derive(Debug)]
pub struct RlmOutcome {
    pub final_answer: String,
    pub trace: Trace,
    pub budget: BudgetReport,
    pub steps: u32,
    pub usage: TokenUsage,
}

/// The recursive step engine. Cheap to clone; provider and symbols are
/// shared handles.
#[derive(Clone)]
pub struct Rlm {
    provider: Arc<dyn LmProvider>,
    config: RlmConfig,
    symbols: SymbolTable,
}

impl Rlm {
    pub fn new(provider: Arc<dyn LmProvider>, config: RlmConfig) -> Self {
        Self {
            provider,
            config,
            symbols: SymbolTable::new(),
        }
    }

    pub fn with_symbols(mut self, symbols: SymbolTable) -> Self {
        self.symbols = symbols;
        self
    }

    pub fn config(&self) -> &RlmConfig {
        &self.config
    }

    pub(crate) fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    /// Run one root task to its final answer.
    pub async fn run(&self, input: DocumentInput, options: RunOptions) -> RlmResult<RlmOutcome> {
        let budget = Budget::root(&self.config.budget.apply(&options.budget));
        let cache = new_cache();
        let mut env = match input {
            DocumentInput::Text(text) => {
                Environment::for_prompt(&text, cache, budget, options.task)
            }
            DocumentInput::Stored { doc_id, store } => {
                Environment::for_document(doc_id, store, cache, budget, options.task).await?
            }
        };

        let usage = self.run_loop(&mut env).await?;
        Ok(RlmOutcome {
            final_answer: env.final_answer().unwrap_or_default().to_string(),
            steps: env.budget.steps_used(),
            budget: env.budget.report(),
            trace: std::mem::take(&mut env.trace),
            usage,
        })
    }

    /// Boxed entry point for recursion out of sub-call dispatch.
    pub(crate) fn run_loop_boxed<'a>(
        &'a self,
        env: &'a mut Environment,
    ) -> BoxFuture<'a, RlmResult<TokenUsage>> {
        Box::pin(self.run_loop(env))
    }

    /// The turn cycle: request an action, execute it, feed the
    /// observation back, until `final` is set or the budget is gone.
    async fn run_loop(&self, env: &mut Environment) -> RlmResult<TokenUsage> {
        let interpreter = ActionInterpreter::new(self);
        let task = env.task.clone();
        let preview_chars = self.config.preview_chars;

        let mut history = vec![
            ChatMessage::system(prompts::SYSTEM_PROMPT),
            ChatMessage::user(prompts::init_turn(env, task.as_deref())),
        ];
        let options = CompletionOptions {
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            response_format: Some(action_response_format()),
            cancel: self.config.cancel.clone(),
            ..Default::default()
        };

        let mut usage_total = TokenUsage::default();
        let mut consecutive_errors = 0u32;
        info!(depth = env.depth(), prompt_id = %env.prompt_id, "rlm loop start");

        loop {
            env.budget.consume_step()?;
            let step = env.budget.steps_used();

            let completion = self
                .provider
                .complete(&history, &options)
                .await
                .map_err(|e| RlmError::provider(self.provider.name(), e.to_string()))?;
            if let Some(usage) = completion.usage {
                usage_total.add(usage);
            }
            history.push(ChatMessage::assistant(completion.text.clone()));

            let result = match extract_first_json(&completion.text)
                .and_then(|value| coerce_action(&value))
            {
                Ok(action) => {
                    let op = action.op();
                    debug!(step, op, "executing action");
                    interpreter.exec(env, action).await.map(|stdout| (op, stdout))
                }
                Err(error) => Err(error),
            };

            match result {
                Ok((op, stdout)) => {
                    consecutive_errors = 0;
                    let stdout_preview = preview(&stdout, preview_chars);
                    env.trace.push(TraceEvent::ReplExec {
                        step,
                        op: op.to_string(),
                        stdout: stdout_preview.clone(),
                        scratch_keys: env.scratch_keys(),
                        elapsed_ms: env.budget.elapsed_ms(),
                    });
                    env.trace.push(TraceEvent::RootStep {
                        step,
                        depth: env.depth(),
                        output_preview: preview(&completion.text, preview_chars),
                        stdout_preview: Some(stdout_preview.clone()),
                        usage: completion.usage,
                        elapsed_ms: env.budget.elapsed_ms(),
                    });
                    history.push(ChatMessage::user(prompts::stdout_turn(
                        env.depth(),
                        &stdout_preview,
                        &env.budget,
                    )));
                }
                Err(error) if error.is_recoverable() => {
                    consecutive_errors += 1;
                    warn!(step, %error, consecutive_errors, "recoverable action error");
                    env.trace.push(TraceEvent::RootStep {
                        step,
                        depth: env.depth(),
                        output_preview: preview(&completion.text, preview_chars),
                        stdout_preview: None,
                        usage: completion.usage,
                        elapsed_ms: env.budget.elapsed_ms(),
                    });
                    history.push(ChatMessage::user(prompts::error_turn(
                        env.depth(),
                        &error.to_string(),
                        &env.budget,
                    )));

                    if self.config.profile.enable_error_fallback
                        && consecutive_errors >= self.config.max_consecutive_errors_for_early_stop
                    {
                        if let Some(task) = &task {
                            let raw = env.doc_store.read_all(&env.doc_id).await?;
                            if let Some(answer) = heuristics::derive_from_prompt(task, &raw) {
                                warn!(step, "heuristic fallback finalized the run");
                                env.set_final(answer);
                            }
                        }
                    }
                }
                Err(error) => return Err(error),
            }

            if env.final_answer().is_none() {
                self.try_early_stop(env, task.as_deref()).await?;
            }
            if env.final_answer().is_some() {
                break;
            }
        }

        info!(
            depth = env.depth(),
            steps = env.budget.steps_used(),
            sub_calls = env.budget.sub_calls_used(),
            "rlm loop final"
        );
        Ok(usage_total)
    }

    /// Adopt the first non-empty scratch hint as the final answer, in
    /// task-dependent order, with optional post-processing.
    async fn try_early_stop(&self, env: &mut Environment, task: Option<&str>) -> RlmResult<()> {
        if !self.config.profile.enable_early_stop_heuristic {
            return Ok(());
        }
        if self.config.profile.require_prompt_read_before_finalize
            && env.budget.prompt_read_chars_used() == 0
        {
            return Ok(());
        }

        let candidate = hint_order(task)
            .iter()
            .find_map(|key| env.scratch.get(*key).and_then(ScratchValue::as_answer));
        let Some(candidate) = candidate else {
            return Ok(());
        };

        let answer = match task {
            Some(task) if self.config.profile.enable_heuristic_postprocess => {
                let raw = env.doc_store.read_all(&env.doc_id).await?;
                heuristics::postprocess(task, &raw, candidate)
            }
            _ => candidate,
        };
        info!(depth = env.depth(), "early stop on scratch hint");
        env.set_final(answer);
        Ok(())
    }
}

/// Privileged hint keys; the task text promotes the likeliest one.
fn hint_order(task: Option<&str>) -> [&'static str; 5] {
    let Some(task) = task else {
        return ["answer", "total", "picked", "joined", "result"];
    };
    let lowered = task.to_lowercase();
    if lowered.contains("sum") || task.contains("合計") {
        ["total", "answer", "picked", "joined", "result"]
    } else if lowered.contains("join") {
        ["joined", "answer", "total", "picked", "result"]
    } else if lowered.contains("word") || task.contains("単語") {
        ["picked", "answer", "total", "joined", "result"]
    } else {
        ["answer", "total", "picked", "joined", "result"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hint_order_task_promotion() {
        assert_eq!(hint_order(None)[0], "answer");
        assert_eq!(hint_order(Some("compute the sum"))[0], "total");
        assert_eq!(hint_order(Some("合計を出して"))[0], "total");
        assert_eq!(hint_order(Some("join the parts"))[0], "joined");
        assert_eq!(hint_order(Some("answer in one word"))[0], "picked");
    }
}
