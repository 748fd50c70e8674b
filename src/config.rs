//! Tunable configuration for the advisor, with defaults matched to the
//! original implementation.

use serde::{Deserialize, Serialize};

/// All knobs the advisor's components read.
///
/// Defaults mirror the reference implementation: a 30 second runtime budget, a
/// maximum composite-index width of 3, a single required usage to consider a
/// column, and a Pareto weight of 2.0 on storage relative to cost.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DtaConfig {
    /// Storage budget in megabytes; negative disables the budget.
    pub budget_mb: i64,
    /// Wall-clock budget for the search, in seconds; 0 means unlimited.
    pub max_runtime_seconds: u64,
    /// Maximum number of columns in a single candidate index.
    pub max_index_width: usize,
    /// Minimum number of workload queries that must reference a column before
    /// it is considered for candidate generation.
    pub min_column_usage: usize,
    /// Number of single-column seeds to try in addition to the empty seed.
    /// Zero disables multi-seed search (the default path).
    pub seed_columns_count: usize,
    /// Weight of `ln(space)` in the search objective.
    pub pareto_alpha: f64,
    /// Minimum relative cost improvement required for a candidate to be
    /// accepted at any greedy step.
    pub min_time_improvement: f64,
    /// Threshold, in bytes, above which a text/varchar column is treated as
    /// too wide to index without confirmation from catalog statistics.
    pub max_text_length: usize,
}

impl Default for DtaConfig {
    fn default() -> Self {
        Self {
            budget_mb: -1,
            max_runtime_seconds: 30,
            max_index_width: 3,
            min_column_usage: 1,
            seed_columns_count: 0,
            pareto_alpha: 2.0,
            min_time_improvement: 0.1,
            max_text_length: 100,
        }
    }
}

impl DtaConfig {
    /// Load overrides from environment variables, falling back to defaults
    /// for anything unset or unparsable.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("DTA_BUDGET_MB") {
            if let Ok(v) = v.parse() {
                config.budget_mb = v;
            }
        }
        if let Ok(v) = std::env::var("DTA_MAX_RUNTIME_SECONDS") {
            if let Ok(v) = v.parse() {
                config.max_runtime_seconds = v;
            }
        }
        if let Ok(v) = std::env::var("DTA_MAX_INDEX_WIDTH") {
            if let Ok(v) = v.parse() {
                config.max_index_width = v;
            }
        }
        if let Ok(v) = std::env::var("DTA_PARETO_ALPHA") {
            if let Ok(v) = v.parse() {
                config.pareto_alpha = v;
            }
        }

        config
    }

    /// Budget in bytes, or `None` when disabled.
    pub fn budget_bytes(&self) -> Option<i64> {
        if self.budget_mb < 0 {
            None
        } else {
            Some(self.budget_mb * 1024 * 1024)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_reference_constants() {
        let config = DtaConfig::default();
        assert_eq!(config.max_runtime_seconds, 30);
        assert_eq!(config.max_index_width, 3);
        assert_eq!(config.pareto_alpha, 2.0);
        assert_eq!(config.min_time_improvement, 0.1);
    }

    #[test]
    fn negative_budget_disables_cap() {
        let config = DtaConfig::default();
        assert_eq!(config.budget_bytes(), None);
    }

    #[test]
    fn positive_budget_converts_to_bytes() {
        let mut config = DtaConfig::default();
        config.budget_mb = 50;
        assert_eq!(config.budget_bytes(), Some(50 * 1024 * 1024));
    }
}
