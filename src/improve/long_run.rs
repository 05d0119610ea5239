// src/improve/long_run.rs
// Iterated candidate rounds with rolling baseline and folded state

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use crate::core::error::RlmResult;

use super::{
    run_improvement_loop, score_snapshot, Candidate, CandidateEvaluator, CandidateOutcome,
    MetricSnapshot, Policy, RoundContext, RoundOptions, RoundReport,
};

/// Loop bounds and stop behavior
#[derive(Debug, Clone)]
pub struct LongRunConfig {
    pub max_iterations: u32,
    /// Stop after the first round with no accepted candidate.
    pub stop_when_no_accept: bool,
    pub round: RoundOptions,
}

impl Default for LongRunConfig {
    fn default() -> Self {
        Self {
            max_iterations: 8,
            stop_when_no_accept: true,
            round: RoundOptions::default(),
        }
    }
}

/// Context handed to the candidate generator each iteration
#[derive(Debug, Clone)]
pub struct LongRunContext {
    pub iteration: u32,
    pub state: Value,
    pub baseline: MetricSnapshot,
    pub baseline_score: f64,
    pub rounds_completed: usize,
    pub accepted_history: Vec<CandidateOutcome>,
}

#[async_trait]
pub trait CandidateGenerator: Send + Sync {
    /// An empty batch ends the loop.
    async fn generate(&self, ctx: &LongRunContext) -> Result<Vec<Candidate>>;
}

/// Folds an accepted outcome into the loop state between iterations.
pub type StateFold = dyn Fn(Value, &CandidateOutcome) -> Value + Send + Sync;

/// Final report of a long run
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LongRunReport {
    pub rounds: Vec<RoundReport>,
    pub accepted_history: Vec<CandidateOutcome>,
    pub final_baseline: MetricSnapshot,
    pub final_baseline_score: f64,
    pub final_state: Value,
}

/// Iterate generate -> score -> fold until the iteration bound, an empty
/// candidate batch, or (optionally) a round with no acceptance.
pub async fn run_long_improvement_loop(
    policy: &Policy,
    baseline: MetricSnapshot,
    config: &LongRunConfig,
    generator: &dyn CandidateGenerator,
    evaluator: &dyn CandidateEvaluator,
    on_accepted: Option<&StateFold>,
    task: Option<String>,
) -> RlmResult<LongRunReport> {
    let mut current_baseline = baseline;
    let mut baseline_score = score_snapshot(policy, &current_baseline)?;
    let mut state = Value::Null;
    let mut rounds: Vec<RoundReport> = Vec::new();
    let mut accepted_history: Vec<CandidateOutcome> = Vec::new();

    for iteration in 0..config.max_iterations {
        let ctx = LongRunContext {
            iteration,
            state: state.clone(),
            baseline: current_baseline.clone(),
            baseline_score,
            rounds_completed: rounds.len(),
            accepted_history: accepted_history.clone(),
        };
        let candidates = generator.generate(&ctx).await?;
        if candidates.is_empty() {
            info!(iteration, "candidate generator returned nothing, stopping");
            break;
        }

        let round_ctx = RoundContext {
            iteration,
            state: state.clone(),
            task: task.clone(),
        };
        let report = run_improvement_loop(
            policy,
            &current_baseline,
            candidates,
            evaluator,
            &round_ctx,
            &config.round,
        )
        .await?;

        accepted_history.extend(report.results.iter().filter(|r| r.accepted).cloned());

        let best = report.best_accepted().cloned();
        rounds.push(report);

        match best {
            Some(best) => {
                if let (Some(snapshot), Some(score)) = (&best.snapshot, best.score) {
                    current_baseline = snapshot.clone();
                    baseline_score = score;
                }
                if let Some(fold) = on_accepted {
                    state = fold(state, &best);
                }
                debug!(iteration, score = baseline_score, "baseline advanced");
            }
            None if config.stop_when_no_accept => {
                info!(iteration, "no candidate accepted, stopping");
                break;
            }
            None => {}
        }
    }

    Ok(LongRunReport {
        rounds,
        accepted_history,
        final_baseline: current_baseline,
        final_baseline_score: baseline_score,
        final_state: state,
    })
}
