// src/planner/executor.rs
// Bridges a plan to the root loop or the long-run loop

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::config::{BudgetOverrides, RlmConfig};
use crate::core::error::{RlmError, RlmResult};
use crate::improve::{
    run_long_improvement_loop, Candidate, CandidateEvaluator, CandidateGenerator, LongRunConfig,
    LongRunReport, MetricSnapshot, Policy, RoundContext,
};
use crate::llm::LmProvider;
use crate::orchestrator::{DocumentInput, Rlm, RlmOutcome, RunOptions};
use crate::symbols::{ExternalSymbol, SymbolCall, SymbolTable};

use super::{LongRunPlan, Plan, PlanMode, Planner};

/// What a planned execution produced
#[derive(Debug)]
pub enum PlannedOutcome {
    Single(Box<RlmOutcome>),
    LongRun(Box<LongRunReport>),
}

/// Obtains a plan, then dispatches it.
pub struct PlannedExecutor {
    provider: Arc<dyn LmProvider>,
    planner: Planner,
    base_config: RlmConfig,
    base_budget: BudgetOverrides,
    symbols: SymbolTable,
    generator: Option<Arc<dyn CandidateGenerator>>,
    baseline: Option<MetricSnapshot>,
}

impl PlannedExecutor {
    pub fn new(provider: Arc<dyn LmProvider>, base_config: RlmConfig) -> Self {
        Self {
            planner: Planner::new(provider.clone()),
            provider,
            base_config,
            base_budget: BudgetOverrides::default(),
            symbols: SymbolTable::new(),
            generator: None,
            baseline: None,
        }
    }

    pub fn with_budget(mut self, budget: BudgetOverrides) -> Self {
        self.base_budget = budget;
        self
    }

    pub fn with_symbols(mut self, symbols: SymbolTable) -> Self {
        self.symbols = symbols;
        self
    }

    /// Candidate source for long-run plans; without one a long-run plan
    /// is rejected instead of guessed at.
    pub fn with_generator(mut self, generator: Arc<dyn CandidateGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Baseline measurement long-run plans are scored against.
    pub fn with_baseline(mut self, baseline: MetricSnapshot) -> Self {
        self.baseline = Some(baseline);
        self
    }

    pub async fn execute(
        &self,
        user_input: &str,
        input: DocumentInput,
    ) -> RlmResult<PlannedOutcome> {
        let plan = self.planner.plan(user_input).await;
        self.execute_plan(plan, input).await
    }

    /// Dispatch an already-obtained plan.
    pub async fn execute_plan(
        &self,
        plan: Plan,
        input: DocumentInput,
    ) -> RlmResult<PlannedOutcome> {
        match plan.mode {
            PlanMode::Single => {
                let mut config = self.base_config.clone();
                if let Some(profile) = plan.profile {
                    config.profile = profile.to_run_profile();
                }
                // Budget layering: defaults <- plan <- caller base.
                let budget = plan.budget.merged_with(&self.base_budget);
                info!(task = %plan.task, "executing single-mode plan");
                let outcome = Rlm::new(self.provider.clone(), config)
                    .with_symbols(self.symbols.clone())
                    .run(input, RunOptions { task: Some(plan.task), budget })
                    .await?;
                Ok(PlannedOutcome::Single(Box::new(outcome)))
            }
            PlanMode::LongRun => {
                let long_run = plan
                    .long_run
                    .as_ref()
                    .ok_or_else(|| RlmError::Plan("long_run plan without longRun block".into()))?;
                let generator = self.generator.clone().ok_or_else(|| {
                    RlmError::Plan("long_run plan requires a candidate generator".into())
                })?;
                let baseline = self.baseline.clone().ok_or_else(|| {
                    RlmError::Plan("long_run plan requires a baseline snapshot".into())
                })?;

                let policy = Policy {
                    objectives: long_run.objectives.clone(),
                    constraints: long_run.constraints.clone(),
                    min_score_delta: long_run.min_score_delta.unwrap_or(0.0),
                };
                let config = LongRunConfig {
                    max_iterations: long_run.max_iterations.unwrap_or(8),
                    stop_when_no_accept: long_run.stop_when_no_accept.unwrap_or(true),
                    ..Default::default()
                };
                let evaluator = self.symbol_evaluator(long_run, &plan.task)?;

                info!(task = %plan.task, iterations = config.max_iterations, "executing long-run plan");
                let report = run_long_improvement_loop(
                    &policy,
                    baseline,
                    &config,
                    generator.as_ref(),
                    &evaluator,
                    None,
                    Some(plan.task.clone()),
                )
                .await?;
                Ok(PlannedOutcome::LongRun(Box::new(report)))
            }
        }
    }

    /// Resolve every metric key to its reader symbol up front so a bad
    /// plan fails before the loop starts.
    fn symbol_evaluator(&self, long_run: &LongRunPlan, task: &str) -> RlmResult<SymbolEvaluator> {
        let mut readers: BTreeMap<String, (String, Arc<dyn ExternalSymbol>)> = BTreeMap::new();
        let bindings = long_run
            .objectives
            .iter()
            .map(|o| (&o.key, &o.symbol))
            .chain(long_run.constraints.iter().map(|c| (&c.key, &c.symbol)));
        for (key, symbol) in bindings {
            let Some(symbol_name) = symbol else {
                continue;
            };
            if readers.contains_key(key) {
                continue;
            }
            let handler = self.symbols.get(symbol_name).ok_or_else(|| {
                RlmError::Plan(format!("unknown symbol: {}", symbol_name))
            })?;
            readers.insert(key.clone(), (symbol_name.clone(), handler));
        }
        Ok(SymbolEvaluator { readers, task: task.to_string() })
    }
}

/// Evaluator that reads every metric through an external symbol.
struct SymbolEvaluator {
    readers: BTreeMap<String, (String, Arc<dyn ExternalSymbol>)>,
    task: String,
}

#[async_trait]
impl CandidateEvaluator for SymbolEvaluator {
    async fn evaluate(
        &self,
        candidate: &Candidate,
        _baseline: &MetricSnapshot,
        ctx: &RoundContext,
    ) -> anyhow::Result<MetricSnapshot> {
        let mut metrics = BTreeMap::new();
        for (key, (symbol_name, handler)) in &self.readers {
            let value = handler
                .call(SymbolCall {
                    symbol: symbol_name.clone(),
                    prompt: String::new(),
                    prompt_id: String::new(),
                    depth: 0,
                    scratch: json!({}),
                    args: Some(json!({
                        "candidate": candidate.data,
                        "iteration": ctx.iteration,
                        "state": ctx.state,
                        "metricKey": key,
                        "task": self.task,
                    })),
                    input: None,
                })
                .await?;
            let number = value.as_f64().ok_or_else(|| {
                anyhow!("symbol {} returned a non-number for {}", symbol_name, key)
            })?;
            metrics.insert(key.clone(), number);
        }
        Ok(MetricSnapshot { metrics, gates: BTreeMap::new(), meta: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::improve::{Comparator, Constraint, ConstraintSource, Direction, Objective};
    use crate::llm::ScriptedProvider;
    use crate::symbols::FnSymbol;
    use futures::future::BoxFuture;
    use serde_json::Value;

    fn latency_symbol() -> Arc<dyn ExternalSymbol> {
        Arc::new(FnSymbol(|call: SymbolCall| {
            Box::pin(async move {
                let args = call.args.unwrap_or_default();
                // Candidate data carries the metric table directly.
                let key = args["metricKey"].as_str().unwrap_or_default().to_string();
                Ok(args["candidate"][&key].clone())
            }) as BoxFuture<'static, anyhow::Result<Value>>
        }))
    }

    fn long_run_plan() -> Plan {
        Plan {
            mode: PlanMode::LongRun,
            task: "cut latency".into(),
            profile: None,
            symbols: vec!["measure".into()],
            budget: BudgetOverrides::default(),
            long_run: Some(LongRunPlan {
                objectives: vec![Objective {
                    key: "latencyP95".into(),
                    direction: Direction::Minimize,
                    symbol: Some("measure".into()),
                    weight: None,
                }],
                constraints: vec![Constraint {
                    key: "throughput".into(),
                    comparator: Comparator::Gte,
                    value: 80.0,
                    symbol: Some("measure".into()),
                    source: ConstraintSource::Absolute,
                }],
                max_iterations: Some(1),
                stop_when_no_accept: Some(true),
                min_score_delta: None,
            }),
        }
    }

    struct OneBatch;

    #[async_trait]
    impl CandidateGenerator for OneBatch {
        async fn generate(
            &self,
            ctx: &crate::improve::LongRunContext,
        ) -> anyhow::Result<Vec<Candidate>> {
            if ctx.iteration > 0 {
                return Ok(Vec::new());
            }
            Ok(vec![Candidate::new(
                "c1",
                json!({"latencyP95": 90.0, "throughput": 100.0}),
            )])
        }
    }

    #[tokio::test]
    async fn test_long_run_plan_requires_generator() {
        let provider = Arc::new(ScriptedProvider::new(Vec::<String>::new()));
        let executor = PlannedExecutor::new(provider, RlmConfig::default())
            .with_symbols(SymbolTable::new().with("measure", latency_symbol()))
            .with_baseline(MetricSnapshot::from_metrics([
                ("latencyP95", 120.0),
                ("throughput", 100.0),
            ]));
        let err = executor
            .execute_plan(long_run_plan(), DocumentInput::Text(String::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, RlmError::Plan(_)));
    }

    #[tokio::test]
    async fn test_long_run_plan_executes_via_symbols() {
        let provider = Arc::new(ScriptedProvider::new(Vec::<String>::new()));
        let executor = PlannedExecutor::new(provider, RlmConfig::default())
            .with_symbols(SymbolTable::new().with("measure", latency_symbol()))
            .with_generator(Arc::new(OneBatch))
            .with_baseline(MetricSnapshot::from_metrics([
                ("latencyP95", 120.0),
                ("throughput", 100.0),
            ]));
        let outcome = executor
            .execute_plan(long_run_plan(), DocumentInput::Text(String::new()))
            .await
            .unwrap();
        let PlannedOutcome::LongRun(report) = outcome else { panic!() };
        assert_eq!(report.final_baseline.metrics["latencyP95"], 90.0);
        assert_eq!(report.accepted_history.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_symbol_rejected_up_front() {
        let provider = Arc::new(ScriptedProvider::new(Vec::<String>::new()));
        let executor = PlannedExecutor::new(provider, RlmConfig::default())
            .with_generator(Arc::new(OneBatch))
            .with_baseline(MetricSnapshot::from_metrics([("latencyP95", 120.0)]));
        let err = executor
            .execute_plan(long_run_plan(), DocumentInput::Text(String::new()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown symbol"));
    }
}
