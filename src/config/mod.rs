// src/config/mod.rs
// Runtime configuration: budget limits, run profiles, loop tuning

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::core::preview::DEFAULT_PREVIEW_CHARS;

/// Budget limits for one environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetConfig {
    pub max_steps: u32,
    pub max_sub_calls: u32,
    pub max_depth: u32,
    pub max_prompt_read_chars: u64,
    pub max_time_ms: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_steps: 32,
            max_sub_calls: 32,
            max_depth: 4,
            max_prompt_read_chars: 200_000,
            max_time_ms: 30_000,
        }
    }
}

impl BudgetConfig {
    pub fn apply(&self, overrides: &BudgetOverrides) -> Self {
        Self {
            max_steps: overrides.max_steps.unwrap_or(self.max_steps),
            max_sub_calls: overrides.max_sub_calls.unwrap_or(self.max_sub_calls),
            max_depth: overrides.max_depth.unwrap_or(self.max_depth),
            max_prompt_read_chars: overrides
                .max_prompt_read_chars
                .unwrap_or(self.max_prompt_read_chars),
            max_time_ms: overrides.max_time_ms.unwrap_or(self.max_time_ms),
        }
    }
}

/// Partial budget; unset fields fall through to the layer below.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BudgetOverrides {
    pub max_steps: Option<u32>,
    pub max_sub_calls: Option<u32>,
    pub max_depth: Option<u32>,
    pub max_prompt_read_chars: Option<u64>,
    pub max_time_ms: Option<u64>,
}

impl BudgetOverrides {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Shallow merge: fields set on `other` win.
    pub fn merged_with(&self, other: &BudgetOverrides) -> Self {
        Self {
            max_steps: other.max_steps.or(self.max_steps),
            max_sub_calls: other.max_sub_calls.or(self.max_sub_calls),
            max_depth: other.max_depth.or(self.max_depth),
            max_prompt_read_chars: other.max_prompt_read_chars.or(self.max_prompt_read_chars),
            max_time_ms: other.max_time_ms.or(self.max_time_ms),
        }
    }
}

/// Heuristic switches bundled per profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunProfile {
    pub enable_early_stop_heuristic: bool,
    pub enable_heuristic_postprocess: bool,
    pub enable_error_fallback: bool,
    pub require_prompt_read_before_finalize: bool,
}

impl RunProfile {
    /// Pure mode: the LM drives everything, no task heuristics.
    pub fn pure() -> Self {
        Self {
            enable_early_stop_heuristic: false,
            enable_heuristic_postprocess: false,
            enable_error_fallback: false,
            require_prompt_read_before_finalize: false,
        }
    }

    /// Hybrid mode: scratch-hint early stop plus task-keyed recovery.
    pub fn hybrid() -> Self {
        Self {
            enable_early_stop_heuristic: true,
            enable_heuristic_postprocess: true,
            enable_error_fallback: true,
            require_prompt_read_before_finalize: true,
        }
    }
}

impl Default for RunProfile {
    fn default() -> Self {
        Self::pure()
    }
}

/// Main runtime configuration
#[derive(Debug, Clone)]
pub struct RlmConfig {
    pub profile: RunProfile,
    pub budget: BudgetConfig,
    /// Default limits for child environments, before per-call overrides.
    pub sub_budget: BudgetConfig,
    /// Consecutive recoverable errors before the hybrid fallback fires.
    pub max_consecutive_errors_for_early_stop: u32,
    pub preview_chars: usize,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// Abort signal threaded into every LM call of the root tree.
    pub cancel: Option<CancellationToken>,
}

impl Default for RlmConfig {
    fn default() -> Self {
        Self {
            profile: RunProfile::pure(),
            budget: BudgetConfig::default(),
            sub_budget: BudgetConfig::default(),
            max_consecutive_errors_for_early_stop: 2,
            preview_chars: DEFAULT_PREVIEW_CHARS,
            max_tokens: None,
            temperature: Some(0.0),
            cancel: None,
        }
    }
}

impl RlmConfig {
    pub fn hybrid() -> Self {
        Self {
            profile: RunProfile::hybrid(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_contract() {
        let budget = BudgetConfig::default();
        assert_eq!(budget.max_steps, 32);
        assert_eq!(budget.max_sub_calls, 32);
        assert_eq!(budget.max_depth, 4);
        assert_eq!(budget.max_prompt_read_chars, 200_000);
        assert_eq!(budget.max_time_ms, 30_000);
    }

    #[test]
    fn test_override_layering() {
        let plan = BudgetOverrides { max_steps: Some(8), max_depth: Some(2), ..Default::default() };
        let base = BudgetOverrides { max_steps: Some(16), ..Default::default() };
        let merged = plan.merged_with(&base);
        assert_eq!(merged.max_steps, Some(16));
        assert_eq!(merged.max_depth, Some(2));
        let config = BudgetConfig::default().apply(&merged);
        assert_eq!(config.max_steps, 16);
        assert_eq!(config.max_depth, 2);
        assert_eq!(config.max_sub_calls, 32);
    }

    #[test]
    fn test_profiles() {
        assert!(!RunProfile::pure().enable_early_stop_heuristic);
        assert!(RunProfile::hybrid().enable_heuristic_postprocess);
        assert_eq!(RlmConfig::default().max_consecutive_errors_for_early_stop, 2);
    }
}
