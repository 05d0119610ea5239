// src/improve/mod.rs
// Metric snapshots, policies, and the single-round improvement loop

pub mod long_run;

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::error::{RlmError, RlmResult};

pub use long_run::{
    run_long_improvement_loop, CandidateGenerator, LongRunConfig, LongRunContext, LongRunReport,
    StateFold,
};

/// A finite-valued metric bundle produced by an evaluator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub metrics: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub gates: BTreeMap<String, bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl MetricSnapshot {
    pub fn from_metrics<I, K>(metrics: I) -> Self
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<String>,
    {
        Self {
            metrics: metrics.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            gates: BTreeMap::new(),
            meta: None,
        }
    }

    pub fn with_gate(mut self, name: impl Into<String>, passed: bool) -> Self {
        self.gates.insert(name.into(), passed);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Minimize,
    Maximize,
}

impl std::str::FromStr for Direction {
    type Err = RlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "minimize" => Ok(Direction::Minimize),
            "maximize" => Ok(Direction::Maximize),
            other => Err(RlmError::invalid(format!("unknown direction: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparator {
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
}

impl Comparator {
    pub fn holds(&self, lhs: f64, rhs: f64) -> bool {
        match self {
            Comparator::Lt => lhs < rhs,
            Comparator::Lte => lhs <= rhs,
            Comparator::Gt => lhs > rhs,
            Comparator::Gte => lhs >= rhs,
            Comparator::Eq => lhs == rhs,
        }
    }
}

impl std::str::FromStr for Comparator {
    type Err = RlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lt" => Ok(Comparator::Lt),
            "lte" => Ok(Comparator::Lte),
            "gt" => Ok(Comparator::Gt),
            "gte" => Ok(Comparator::Gte),
            "eq" => Ok(Comparator::Eq),
            other => Err(RlmError::invalid(format!("unknown comparator: {}", other))),
        }
    }
}

/// How a constraint's test value is derived from candidate and baseline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintSource {
    #[default]
    Absolute,
    Delta,
    Ratio,
    DeltaRatio,
}

impl std::str::FromStr for ConstraintSource {
    type Err = RlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "absolute" => Ok(ConstraintSource::Absolute),
            "delta" => Ok(ConstraintSource::Delta),
            "ratio" => Ok(ConstraintSource::Ratio),
            "delta_ratio" => Ok(ConstraintSource::DeltaRatio),
            other => Err(RlmError::invalid(format!("unknown constraint source: {}", other))),
        }
    }
}

/// One scored dimension; weight defaults to 1 and must be non-negative.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Objective {
    pub key: String,
    pub direction: Direction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

impl Objective {
    pub fn weight(&self) -> f64 {
        self.weight.unwrap_or(1.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Constraint {
    pub key: String,
    pub comparator: Comparator,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(default)]
    pub source: ConstraintSource,
}

/// Objectives plus constraints plus the acceptance threshold
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    pub objectives: Vec<Objective>,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
    #[serde(default)]
    pub min_score_delta: f64,
}

/// Linear, direction-respecting score: maximize adds, minimize subtracts,
/// each scaled by its weight.
pub fn score_snapshot(policy: &Policy, snapshot: &MetricSnapshot) -> RlmResult<f64> {
    let mut score = 0.0;
    for objective in &policy.objectives {
        let value = snapshot
            .metrics
            .get(&objective.key)
            .copied()
            .filter(|v| v.is_finite())
            .ok_or_else(|| {
                RlmError::invalid(format!("objective metric missing or non-finite: {}", objective.key))
            })?;
        let weight = objective.weight();
        if weight < 0.0 {
            return Err(RlmError::invalid(format!(
                "objective weight must be non-negative: {}",
                objective.key
            )));
        }
        let signed = match objective.direction {
            Direction::Maximize => value,
            Direction::Minimize => -value,
        };
        score += signed * weight;
    }
    Ok(score)
}

/// A candidate under evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    #[serde(default)]
    pub data: Value,
}

impl Candidate {
    pub fn new(id: impl Into<String>, data: Value) -> Self {
        Self { id: id.into(), data }
    }
}

/// Context handed to the evaluator alongside each candidate
#[derive(Debug, Clone, Default)]
pub struct RoundContext {
    pub iteration: u32,
    pub state: Value,
    pub task: Option<String>,
}

#[async_trait]
pub trait CandidateEvaluator: Send + Sync {
    async fn evaluate(
        &self,
        candidate: &Candidate,
        baseline: &MetricSnapshot,
        ctx: &RoundContext,
    ) -> Result<MetricSnapshot>;
}

/// Per-candidate verdict
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateOutcome {
    pub candidate: Candidate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<MetricSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_delta: Option<f64>,
    pub accepted: bool,
    pub reasons: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of one round
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundReport {
    pub results: Vec<CandidateOutcome>,
    /// Index into `results` of the accepted candidate with the best score.
    pub best_accepted: Option<usize>,
    pub baseline: MetricSnapshot,
    pub baseline_score: f64,
}

impl RoundReport {
    pub fn best_accepted(&self) -> Option<&CandidateOutcome> {
        self.best_accepted.map(|i| &self.results[i])
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RoundOptions {
    /// Refresh the comparison baseline after each acceptance in sequence.
    pub update_baseline_on_accept: bool,
}

/// Score every candidate against the policy, in input order.
/// Evaluation errors are candidate-local; the round always completes.
pub async fn run_improvement_loop(
    policy: &Policy,
    baseline: &MetricSnapshot,
    candidates: Vec<Candidate>,
    evaluator: &dyn CandidateEvaluator,
    ctx: &RoundContext,
    options: &RoundOptions,
) -> RlmResult<RoundReport> {
    let mut current_baseline = baseline.clone();
    let mut baseline_score = score_snapshot(policy, &current_baseline)?;
    let mut results: Vec<CandidateOutcome> = Vec::with_capacity(candidates.len());

    for candidate in candidates {
        let snapshot = match evaluator.evaluate(&candidate, &current_baseline, ctx).await {
            Ok(snapshot) => snapshot,
            Err(error) => {
                warn!(candidate = %candidate.id, %error, "candidate evaluation failed");
                results.push(CandidateOutcome {
                    candidate,
                    snapshot: None,
                    score: None,
                    score_delta: None,
                    accepted: false,
                    reasons: vec!["evaluation_error".to_string()],
                    error: Some(error.to_string()),
                });
                continue;
            }
        };

        let (reasons, valid) = validate_snapshot(policy, &current_baseline, &snapshot);
        let mut reasons = reasons;
        let (score, score_delta) = if valid {
            let score = score_snapshot(policy, &snapshot)?;
            let delta = score - baseline_score;
            if delta < policy.min_score_delta {
                reasons.push("score_delta_too_small".to_string());
            }
            (Some(score), Some(delta))
        } else {
            (None, None)
        };

        let accepted = reasons.is_empty();
        debug!(candidate = %candidate.id, accepted, ?reasons, "candidate scored");
        results.push(CandidateOutcome {
            candidate,
            snapshot: Some(snapshot),
            score,
            score_delta,
            accepted,
            reasons,
            error: None,
        });

        if options.update_baseline_on_accept {
            if let Some(last) = results.last() {
                if last.accepted {
                    if let (Some(snapshot), Some(score)) = (&last.snapshot, last.score) {
                        current_baseline = snapshot.clone();
                        baseline_score = score;
                    }
                }
            }
        }
    }

    let best_accepted = results
        .iter()
        .enumerate()
        .filter(|(_, r)| r.accepted)
        .max_by(|(_, a), (_, b)| {
            a.score
                .unwrap_or(f64::NEG_INFINITY)
                .total_cmp(&b.score.unwrap_or(f64::NEG_INFINITY))
        })
        .map(|(i, _)| i);

    Ok(RoundReport {
        results,
        best_accepted,
        baseline: current_baseline,
        baseline_score,
    })
}

/// All validation reasons for one snapshot, plus whether scoring is
/// allowed (no missing or invalid reasons; failed constraints and gates
/// do not block scoring).
fn validate_snapshot(
    policy: &Policy,
    baseline: &MetricSnapshot,
    snapshot: &MetricSnapshot,
) -> (Vec<String>, bool) {
    let mut reasons = Vec::new();
    let mut invalid = false;

    for (key, value) in &snapshot.metrics {
        if !value.is_finite() {
            reasons.push(format!("invalid_metric:{}", key));
            invalid = true;
        }
    }

    for objective in &policy.objectives {
        if !snapshot.metrics.contains_key(&objective.key) {
            reasons.push(format!("metric_missing:{}", objective.key));
            invalid = true;
        }
    }

    for constraint in &policy.constraints {
        let Some(value) = snapshot.metrics.get(&constraint.key).copied() else {
            reasons.push(format!("metric_missing:{}", constraint.key));
            invalid = true;
            continue;
        };
        let target = match constraint.source {
            ConstraintSource::Absolute => Some(value),
            ConstraintSource::Delta => baseline
                .metrics
                .get(&constraint.key)
                .map(|base| value - base),
            ConstraintSource::Ratio => baseline
                .metrics
                .get(&constraint.key)
                .filter(|base| **base != 0.0)
                .map(|base| value / base),
            ConstraintSource::DeltaRatio => baseline
                .metrics
                .get(&constraint.key)
                .filter(|base| **base != 0.0)
                .map(|base| (value - base) / base),
        };
        match target {
            None => {
                reasons.push(format!("invalid_constraint_source:{}", constraint.key));
                invalid = true;
            }
            Some(target) => {
                if !constraint.comparator.holds(target, constraint.value) {
                    reasons.push(format!("constraint_failed:{}", constraint.key));
                }
            }
        }
    }

    for (name, passed) in &snapshot.gates {
        if !passed {
            reasons.push(format!("gate_failed:{}", name));
        }
    }

    if invalid {
        reasons.insert(0, "invalid_snapshot".to_string());
    }
    (reasons, !invalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct TableEvaluator;

    #[async_trait]
    impl CandidateEvaluator for TableEvaluator {
        async fn evaluate(
            &self,
            candidate: &Candidate,
            _baseline: &MetricSnapshot,
            _ctx: &RoundContext,
        ) -> Result<MetricSnapshot> {
            if candidate.id == "boom" {
                anyhow::bail!("evaluator exploded");
            }
            let metrics: BTreeMap<String, f64> =
                serde_json::from_value(candidate.data.clone())?;
            Ok(MetricSnapshot { metrics, gates: BTreeMap::new(), meta: None })
        }
    }

    fn latency_policy() -> Policy {
        Policy {
            objectives: vec![Objective {
                key: "latencyP95".into(),
                direction: Direction::Minimize,
                symbol: None,
                weight: None,
            }],
            constraints: vec![Constraint {
                key: "throughput".into(),
                comparator: Comparator::Gte,
                value: 80.0,
                symbol: None,
                source: ConstraintSource::Absolute,
            }],
            min_score_delta: 0.0,
        }
    }

    fn baseline() -> MetricSnapshot {
        MetricSnapshot::from_metrics([
            ("latencyP95", 120.0),
            ("throughput", 100.0),
            ("testFailures", 0.0),
        ])
    }

    #[test]
    fn test_score_is_linear_and_direction_respecting() {
        let policy = Policy {
            objectives: vec![Objective {
                key: "latencyP95".into(),
                direction: Direction::Minimize,
                symbol: None,
                weight: Some(2.0),
            }],
            ..Default::default()
        };
        let snapshot = MetricSnapshot::from_metrics([("latencyP95", 90.0)]);
        assert_eq!(score_snapshot(&policy, &snapshot).unwrap(), -180.0);
    }

    #[tokio::test]
    async fn test_constraint_failure_rejects() {
        let report = run_improvement_loop(
            &latency_policy(),
            &baseline(),
            vec![Candidate::new(
                "b",
                json!({"latencyP95": 90.0, "throughput": 70.0, "testFailures": 0.0}),
            )],
            &TableEvaluator,
            &RoundContext::default(),
            &RoundOptions::default(),
        )
        .await
        .unwrap();
        let outcome = &report.results[0];
        assert!(!outcome.accepted);
        assert!(outcome.reasons.contains(&"constraint_failed:throughput".to_string()));
        // Constraint failure does not block scoring.
        assert!(outcome.score.is_some());
        assert!(report.best_accepted.is_none());
    }

    #[tokio::test]
    async fn test_accepted_iff_no_reasons() {
        let report = run_improvement_loop(
            &latency_policy(),
            &baseline(),
            vec![
                Candidate::new(
                    "good",
                    json!({"latencyP95": 90.0, "throughput": 100.0, "testFailures": 0.0}),
                ),
                Candidate::new("boom", json!({})),
            ],
            &TableEvaluator,
            &RoundContext::default(),
            &RoundOptions::default(),
        )
        .await
        .unwrap();
        assert!(report.results[0].accepted);
        assert!(report.results[0].reasons.is_empty());
        assert!(!report.results[1].accepted);
        assert_eq!(report.results[1].reasons, vec!["evaluation_error"]);
        assert!(report.results[1].error.is_some());
        assert_eq!(report.best_accepted, Some(0));
    }

    #[tokio::test]
    async fn test_missing_metric_marks_invalid() {
        let report = run_improvement_loop(
            &latency_policy(),
            &baseline(),
            vec![Candidate::new("partial", json!({"throughput": 90.0}))],
            &TableEvaluator,
            &RoundContext::default(),
            &RoundOptions::default(),
        )
        .await
        .unwrap();
        let outcome = &report.results[0];
        assert_eq!(outcome.reasons[0], "invalid_snapshot");
        assert!(outcome.reasons.contains(&"metric_missing:latencyP95".to_string()));
        assert!(outcome.score.is_none());
    }

    #[tokio::test]
    async fn test_ratio_with_zero_baseline_is_invalid_source() {
        let policy = Policy {
            objectives: vec![Objective {
                key: "latencyP95".into(),
                direction: Direction::Minimize,
                symbol: None,
                weight: None,
            }],
            constraints: vec![Constraint {
                key: "testFailures".into(),
                comparator: Comparator::Lte,
                value: 1.5,
                symbol: None,
                source: ConstraintSource::Ratio,
            }],
            min_score_delta: 0.0,
        };
        let report = run_improvement_loop(
            &policy,
            &baseline(),
            vec![Candidate::new(
                "c",
                json!({"latencyP95": 100.0, "testFailures": 0.0}),
            )],
            &TableEvaluator,
            &RoundContext::default(),
            &RoundOptions::default(),
        )
        .await
        .unwrap();
        let outcome = &report.results[0];
        assert!(outcome
            .reasons
            .contains(&"invalid_constraint_source:testFailures".to_string()));
        assert_eq!(outcome.reasons[0], "invalid_snapshot");
    }

    #[tokio::test]
    async fn test_score_delta_threshold() {
        let mut policy = latency_policy();
        policy.min_score_delta = 5.0;
        let report = run_improvement_loop(
            &policy,
            &baseline(),
            vec![Candidate::new(
                "tiny",
                json!({"latencyP95": 117.0, "throughput": 100.0}),
            )],
            &TableEvaluator,
            &RoundContext::default(),
            &RoundOptions::default(),
        )
        .await
        .unwrap();
        let outcome = &report.results[0];
        // Delta is +3, below the 5.0 threshold.
        assert!(outcome.reasons.contains(&"score_delta_too_small".to_string()));
        assert!(!outcome.accepted);
    }

    #[tokio::test]
    async fn test_rolling_baseline() {
        let report = run_improvement_loop(
            &latency_policy(),
            &baseline(),
            vec![
                Candidate::new(
                    "first",
                    json!({"latencyP95": 100.0, "throughput": 100.0}),
                ),
                // Better than the original baseline, worse than "first".
                Candidate::new(
                    "second",
                    json!({"latencyP95": 110.0, "throughput": 100.0}),
                ),
            ],
            &TableEvaluator,
            &RoundContext::default(),
            &RoundOptions { update_baseline_on_accept: true },
        )
        .await
        .unwrap();
        assert!(report.results[0].accepted);
        assert!(!report.results[1].accepted);
        assert!(report.results[1]
            .reasons
            .contains(&"score_delta_too_small".to_string()));
        assert_eq!(report.best_accepted, Some(0));
    }

    #[test]
    fn test_gate_failure_reason() {
        let snapshot = MetricSnapshot::from_metrics([("latencyP95", 100.0), ("throughput", 90.0)])
            .with_gate("lint", false);
        let (reasons, valid) = validate_snapshot(&latency_policy(), &baseline(), &snapshot);
        assert!(valid);
        assert_eq!(reasons, vec!["gate_failed:lint"]);
    }
}
