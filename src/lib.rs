// src/lib.rs
// rlm - recursive language model runtime
//
// Drives an LM through a small JSON action language against an external
// environment, keeping the document body out of the chat context.
// Recursion is explicit: actions may spawn child runtimes under a
// shared budget and sub-call cache.

pub mod actions;
pub mod config;
pub mod core;
pub mod document;
pub mod env;
pub mod improve;
pub mod llm;
pub mod orchestrator;
pub mod planner;
pub mod symbols;
pub mod trace;

pub use crate::config::{BudgetConfig, BudgetOverrides, RlmConfig, RunProfile};
pub use crate::core::{Budget, BudgetKind, BudgetReport, RlmError, RlmResult};
pub use crate::document::{DocumentStore, InMemoryDocStore, RemoteDocStore, StructuredDocument};
pub use crate::improve::{
    run_improvement_loop, run_long_improvement_loop, Candidate, CandidateEvaluator,
    CandidateGenerator, Comparator, Constraint, ConstraintSource, Direction, LongRunConfig,
    LongRunReport, MetricSnapshot, Objective, Policy, RoundContext, RoundOptions, RoundReport,
};
pub use crate::llm::{
    ChatMessage, Completion, CompletionOptions, LmProvider, OpenAiCompatProvider, ResponseFormat,
    Role, ScriptedProvider, TokenUsage,
};
pub use crate::orchestrator::{DocumentInput, Rlm, RlmOutcome, RunOptions};
pub use crate::planner::{coerce_plan, Plan, PlanMode, PlannedExecutor, PlannedOutcome, Planner};
pub use crate::symbols::{ExternalSymbol, FnSymbol, SymbolCall, SymbolTable};
pub use crate::trace::{Trace, TraceEvent};
