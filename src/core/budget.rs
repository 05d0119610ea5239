// src/core/budget.rs
// Step/subcall/depth/char/time accounting shared by every environment

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;

use crate::config::BudgetConfig;
use crate::core::error::{BudgetKind, RlmError, RlmResult};

/// Per-environment budget: fixed limits plus monotone counters.
///
/// Counters are atomic so concurrent `sub_map` fan-out can consume against
/// `&Budget` without a lock. Counters never decrease and a breach never
/// increments.
#[derive(Debug)]
pub struct Budget {
    max_steps: u32,
    max_sub_calls: u32,
    max_depth: u32,
    max_prompt_read_chars: u64,
    max_time_ms: u64,
    steps_used: AtomicU32,
    sub_calls_used: AtomicU32,
    prompt_read_chars_used: AtomicU64,
    depth: u32,
    started_at: Instant,
}

impl Budget {
    /// Root budget: depth 0, clock starts now.
    pub fn root(config: &BudgetConfig) -> Self {
        Self {
            max_steps: config.max_steps,
            max_sub_calls: config.max_sub_calls,
            max_depth: config.max_depth,
            max_prompt_read_chars: config.max_prompt_read_chars,
            max_time_ms: config.max_time_ms,
            steps_used: AtomicU32::new(0),
            sub_calls_used: AtomicU32::new(0),
            prompt_read_chars_used: AtomicU64::new(0),
            depth: 0,
            started_at: Instant::now(),
        }
    }

    /// Child budget: fresh counters, limits from `config`, but `max_depth`
    /// and the clock are inherited from the parent. Depth increases by one.
    pub fn child(&self, config: &BudgetConfig) -> Self {
        Self {
            max_steps: config.max_steps,
            max_sub_calls: config.max_sub_calls,
            max_depth: self.max_depth,
            max_prompt_read_chars: config.max_prompt_read_chars,
            max_time_ms: config.max_time_ms,
            steps_used: AtomicU32::new(0),
            sub_calls_used: AtomicU32::new(0),
            prompt_read_chars_used: AtomicU64::new(0),
            depth: self.depth + 1,
            started_at: self.started_at,
        }
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn steps_used(&self) -> u32 {
        self.steps_used.load(Ordering::SeqCst)
    }

    pub fn sub_calls_used(&self) -> u32 {
        self.sub_calls_used.load(Ordering::SeqCst)
    }

    pub fn prompt_read_chars_used(&self) -> u64 {
        self.prompt_read_chars_used.load(Ordering::SeqCst)
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    /// Time check runs before any accounting step.
    pub fn check_time(&self) -> RlmResult<()> {
        if self.elapsed_ms() > self.max_time_ms {
            return Err(RlmError::budget(BudgetKind::MaxTimeMs, self.max_time_ms));
        }
        Ok(())
    }

    pub fn consume_step(&self) -> RlmResult<()> {
        self.check_time()?;
        self.consume_u32(&self.steps_used, self.max_steps, BudgetKind::MaxSteps)
    }

    pub fn consume_sub_call(&self) -> RlmResult<()> {
        self.check_time()?;
        self.consume_u32(&self.sub_calls_used, self.max_sub_calls, BudgetKind::MaxSubCalls)
    }

    /// A breach throws before the child environment is constructed; the
    /// child itself carries the incremented depth.
    pub fn ensure_next_depth(&self) -> RlmResult<()> {
        self.check_time()?;
        if self.depth + 1 > self.max_depth {
            return Err(RlmError::budget(BudgetKind::MaxDepth, self.max_depth as u64));
        }
        Ok(())
    }

    pub fn consume_prompt_chars(&self, n: u64) -> RlmResult<()> {
        if n == 0 {
            return Ok(());
        }
        self.check_time()?;
        self.prompt_read_chars_used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                used.checked_add(n).filter(|next| *next <= self.max_prompt_read_chars)
            })
            .map(|_| ())
            .map_err(|_| {
                RlmError::budget(BudgetKind::MaxPromptReadChars, self.max_prompt_read_chars)
            })
    }

    fn consume_u32(&self, counter: &AtomicU32, limit: u32, kind: BudgetKind) -> RlmResult<()> {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                used.checked_add(1).filter(|next| *next <= limit)
            })
            .map(|_| ())
            .map_err(|_| RlmError::budget(kind, limit as u64))
    }

    /// Serializable snapshot for outcomes and LM-facing turn metadata.
    pub fn report(&self) -> BudgetReport {
        BudgetReport {
            max_steps: self.max_steps,
            max_sub_calls: self.max_sub_calls,
            max_depth: self.max_depth,
            max_prompt_read_chars: self.max_prompt_read_chars,
            max_time_ms: self.max_time_ms,
            steps_used: self.steps_used(),
            sub_calls_used: self.sub_calls_used(),
            prompt_read_chars_used: self.prompt_read_chars_used(),
            depth: self.depth,
            elapsed_ms: self.elapsed_ms(),
        }
    }

    /// Compact usage view injected into every LM-facing turn.
    pub fn used_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "steps": self.steps_used(),
            "subCalls": self.sub_calls_used(),
            "promptReadChars": self.prompt_read_chars_used(),
            "elapsedMs": self.elapsed_ms(),
        })
    }
}

/// Point-in-time budget snapshot
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetReport {
    pub max_steps: u32,
    pub max_sub_calls: u32,
    pub max_depth: u32,
    pub max_prompt_read_chars: u64,
    pub max_time_ms: u64,
    pub steps_used: u32,
    pub sub_calls_used: u32,
    pub prompt_read_chars_used: u64,
    pub depth: u32,
    pub elapsed_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> BudgetConfig {
        BudgetConfig {
            max_steps: 2,
            max_sub_calls: 1,
            max_depth: 1,
            max_prompt_read_chars: 10,
            max_time_ms: 30_000,
        }
    }

    #[test]
    fn test_step_limit() {
        let budget = Budget::root(&small());
        assert!(budget.consume_step().is_ok());
        assert!(budget.consume_step().is_ok());
        let err = budget.consume_step().unwrap_err();
        assert!(matches!(
            err,
            RlmError::BudgetExceeded { kind: BudgetKind::MaxSteps, limit: 2 }
        ));
        // Breach did not increment.
        assert_eq!(budget.steps_used(), 2);
    }

    #[test]
    fn test_prompt_chars_skip_zero() {
        let budget = Budget::root(&small());
        assert!(budget.consume_prompt_chars(0).is_ok());
        assert_eq!(budget.prompt_read_chars_used(), 0);
        assert!(budget.consume_prompt_chars(10).is_ok());
        assert!(budget.consume_prompt_chars(1).is_err());
        assert_eq!(budget.prompt_read_chars_used(), 10);
    }

    #[test]
    fn test_child_inherits_depth_and_clock() {
        let root = Budget::root(&small());
        let child = root.child(&BudgetConfig::default());
        assert_eq!(child.depth(), 1);
        assert_eq!(child.steps_used(), 0);
        // Child of child breaches max_depth=1 before construction.
        assert!(child.ensure_next_depth().is_err());
        assert!(root.ensure_next_depth().is_ok());
    }

    #[test]
    fn test_child_takes_all_non_inherited_limits_from_config() {
        let root = Budget::root(&small());
        let child = root.child(&BudgetConfig {
            max_steps: 7,
            max_sub_calls: 5,
            max_depth: 9,
            max_prompt_read_chars: 11,
            max_time_ms: 100,
        });
        let report = child.report();
        assert_eq!(report.max_steps, 7);
        assert_eq!(report.max_sub_calls, 5);
        assert_eq!(report.max_prompt_read_chars, 11);
        // Wall-clock limit is overridable like the other counters.
        assert_eq!(report.max_time_ms, 100);
        // Depth stays inherited from the parent, not the config.
        assert_eq!(report.max_depth, 1);
    }

    #[test]
    fn test_report_shape() {
        let budget = Budget::root(&small());
        budget.consume_step().unwrap();
        let report = budget.report();
        assert_eq!(report.steps_used, 1);
        assert_eq!(report.max_steps, 2);
        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("stepsUsed").is_some());
        assert!(json.get("maxPromptReadChars").is_some());
    }
}
