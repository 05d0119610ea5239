// src/planner/mod.rs
// One LM call that turns a user request into an execution plan

pub mod executor;

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::config::{BudgetOverrides, RunProfile};
use crate::improve::{Comparator, Constraint, ConstraintSource, Direction, Objective};
use crate::llm::schema::plan_response_format;
use crate::llm::{extract_first_json, ChatMessage, CompletionOptions, LmProvider};

pub use executor::{PlannedExecutor, PlannedOutcome};

const PLANNER_SYSTEM: &str = r#"You convert a user request into an execution plan for a recursive language model runtime.

Reply with a single JSON object:
- "mode": "single" for one document task, "long_run" for iterative metric-driven optimization.
- "task": the task statement the runtime should execute.
- "profile": "pure" or "hybrid" (hybrid enables heuristic recovery), or null.
- "budget": optional overrides {"maxSteps", "maxSubCalls", "maxDepth", "maxPromptReadChars", "maxTimeMs"}.
- "symbols": names of external functions the plan relies on.
- "longRun" (long_run mode only): {"objectives":[{"key","direction","symbol","weight"}], "constraints":[{"key","comparator","value","symbol","source"}], "maxIterations", "stopWhenNoAccept", "minScoreDelta"}.

Prefer "single" unless the request clearly asks for repeated measure-and-improve iterations against named metrics.
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanMode {
    Single,
    LongRun,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanProfile {
    Pure,
    Hybrid,
}

impl PlanProfile {
    pub fn to_run_profile(self) -> RunProfile {
        match self {
            PlanProfile::Pure => RunProfile::pure(),
            PlanProfile::Hybrid => RunProfile::hybrid(),
        }
    }
}

/// Long-run section of a plan
#[derive(Debug, Clone)]
pub struct LongRunPlan {
    pub objectives: Vec<Objective>,
    pub constraints: Vec<Constraint>,
    pub max_iterations: Option<u32>,
    pub stop_when_no_accept: Option<bool>,
    pub min_score_delta: Option<f64>,
}

/// Planner output
#[derive(Debug, Clone)]
pub struct Plan {
    pub mode: PlanMode,
    pub task: String,
    pub profile: Option<PlanProfile>,
    pub symbols: Vec<String>,
    pub budget: BudgetOverrides,
    pub long_run: Option<LongRunPlan>,
}

impl Plan {
    /// The safe default when planning fails: run the raw request as a
    /// single-mode task.
    pub fn single_fallback(user_input: &str) -> Self {
        Self {
            mode: PlanMode::Single,
            task: user_input.to_string(),
            profile: None,
            symbols: Vec::new(),
            budget: BudgetOverrides::default(),
            long_run: None,
        }
    }
}

/// Field-by-field plan coercion. Never fails: anything unusable becomes
/// the single-mode fallback. A `long_run` plan without a usable
/// `longRun` block degrades to single; nothing is ever promoted the
/// other way.
pub fn coerce_plan(value: &Value, user_input: &str) -> Plan {
    let Some(obj) = value.as_object() else {
        return Plan::single_fallback(user_input);
    };

    let task = obj
        .get("task")
        .and_then(Value::as_str)
        .filter(|t| !t.trim().is_empty())
        .unwrap_or(user_input)
        .to_string();
    let profile = match obj.get("profile").and_then(Value::as_str) {
        Some("pure") => Some(PlanProfile::Pure),
        Some("hybrid") => Some(PlanProfile::Hybrid),
        _ => None,
    };
    let symbols: Vec<String> = obj
        .get("symbols")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let budget: BudgetOverrides = obj
        .get("budget")
        .cloned()
        .and_then(|b| serde_json::from_value(b).ok())
        .unwrap_or_default();

    match obj.get("mode").and_then(Value::as_str) {
        Some("single") => Plan {
            mode: PlanMode::Single,
            task,
            profile,
            symbols,
            budget,
            long_run: None,
        },
        Some("long_run") => match coerce_long_run(obj.get("longRun")) {
            Some(long_run) => Plan {
                mode: PlanMode::LongRun,
                task,
                profile,
                symbols,
                budget,
                long_run: Some(long_run),
            },
            None => {
                warn!("long_run plan without usable longRun block, degrading to single");
                Plan {
                    mode: PlanMode::Single,
                    task,
                    profile,
                    symbols,
                    budget,
                    long_run: None,
                }
            }
        },
        _ => Plan::single_fallback(user_input),
    }
}

fn coerce_long_run(value: Option<&Value>) -> Option<LongRunPlan> {
    let obj = value?.as_object()?;

    let objectives: Vec<Objective> = obj
        .get("objectives")?
        .as_array()?
        .iter()
        .filter_map(coerce_objective)
        .collect();
    if objectives.is_empty() {
        return None;
    }

    let constraints: Vec<Constraint> = obj
        .get("constraints")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(coerce_constraint).collect())
        .unwrap_or_default();

    Some(LongRunPlan {
        objectives,
        constraints,
        max_iterations: obj
            .get("maxIterations")
            .and_then(Value::as_u64)
            .map(|n| n as u32),
        stop_when_no_accept: obj.get("stopWhenNoAccept").and_then(Value::as_bool),
        min_score_delta: obj.get("minScoreDelta").and_then(Value::as_f64),
    })
}

fn coerce_objective(value: &Value) -> Option<Objective> {
    let obj = value.as_object()?;
    let key = obj.get("key")?.as_str()?.to_string();
    let direction: Direction = obj.get("direction")?.as_str()?.parse().ok()?;
    let symbol = obj.get("symbol")?.as_str()?.to_string();
    let weight = obj
        .get("weight")
        .and_then(Value::as_f64)
        .filter(|w| *w >= 0.0);
    Some(Objective { key, direction, symbol: Some(symbol), weight })
}

fn coerce_constraint(value: &Value) -> Option<Constraint> {
    let obj = value.as_object()?;
    let key = obj.get("key")?.as_str()?.to_string();
    let comparator: Comparator = obj.get("comparator")?.as_str()?.parse().ok()?;
    let target = obj.get("value")?.as_f64()?;
    let symbol = obj.get("symbol").and_then(Value::as_str).map(str::to_string);
    let source: ConstraintSource = obj
        .get("source")
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
        .unwrap_or_default();
    Some(Constraint { key, comparator, value: target, symbol, source })
}

/// Asks the LM for a plan; malformed responses fall back to single mode.
pub struct Planner {
    provider: Arc<dyn LmProvider>,
}

impl Planner {
    pub fn new(provider: Arc<dyn LmProvider>) -> Self {
        Self { provider }
    }

    pub async fn plan(&self, user_input: &str) -> Plan {
        let messages = vec![
            ChatMessage::system(PLANNER_SYSTEM),
            ChatMessage::user(user_input),
        ];
        let options = CompletionOptions {
            temperature: Some(0.0),
            response_format: Some(plan_response_format()),
            ..Default::default()
        };

        match self.provider.complete(&messages, &options).await {
            Ok(completion) => match extract_first_json(&completion.text) {
                Ok(value) => {
                    let plan = coerce_plan(&value, user_input);
                    info!(mode = ?plan.mode, "plan ready");
                    plan
                }
                Err(error) => {
                    warn!(%error, "unparseable plan, using single fallback");
                    Plan::single_fallback(user_input)
                }
            },
            Err(error) => {
                warn!(%error, "planner call failed, using single fallback");
                Plan::single_fallback(user_input)
            }
        }
    }
}
