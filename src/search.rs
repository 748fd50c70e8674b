//! The Search Engine: greedy, anytime search over index candidates, guided
//! by a Pareto objective of execution cost against storage footprint.

use crate::config::DtaConfig;
use crate::cost::CostEstimator;
use crate::model::{improvement_multiple, Index, IndexConfig, IndexRecommendation, WorkloadEntry};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

/// One greedy run from a starting configuration ("seed") to its local
/// optimum.
struct SeedResult {
    chosen: Vec<IndexConfig>,
    final_objective: f64,
}

pub struct SearchEngine {
    estimator: Arc<dyn CostEstimator>,
    config: DtaConfig,
}

impl SearchEngine {
    pub fn new(estimator: Arc<dyn CostEstimator>, config: DtaConfig) -> Self {
        Self { estimator, config }
    }

    /// Runs the full seeded-greedy search and formats the accepted indexes
    /// into [`IndexRecommendation`]s. `base_relation_bytes` is the sum of
    /// total relation sizes for every table referenced by a candidate.
    pub async fn search(
        &self,
        workload: &[WorkloadEntry],
        candidates: &[Index],
        base_relation_bytes: i64,
    ) -> crate::error::Result<Vec<IndexRecommendation>> {
        let started_at = Instant::now();
        let budget_bytes = self.config.budget_mb;
        let budget_bytes = if budget_bytes < 0 {
            None
        } else {
            Some(budget_bytes * 1024 * 1024)
        };

        let mut seeds: Vec<BTreeSet<IndexConfig>> = vec![BTreeSet::new()];
        if self.config.seed_columns_count > 0 {
            seeds.extend(self.single_column_seeds(candidates));
        }

        let mut best: Option<SeedResult> = None;
        for seed in seeds {
            let result = self
                .run_greedy(workload, candidates, seed, base_relation_bytes, budget_bytes, started_at)
                .await?;
            best = match best {
                Some(current) if current.final_objective <= result.final_objective => Some(current),
                _ => Some(result),
            };
        }

        let best = best.expect("at least the empty seed always runs");
        self.format_recommendations(workload, candidates, &best.chosen, budget_bytes)
            .await
    }

    /// Restricted greedy runs seeded from each individually-improving single
    /// column, per §4.6's optional multi-seed provision. Disabled by default
    /// (`seed_columns_count == 0`).
    fn single_column_seeds(&self, candidates: &[Index]) -> Vec<BTreeSet<IndexConfig>> {
        candidates
            .iter()
            .filter(|c| c.config.width() == 1)
            .take(self.config.seed_columns_count)
            .map(|c| {
                let mut set = BTreeSet::new();
                set.insert(c.config.clone());
                set
            })
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_greedy(
        &self,
        workload: &[WorkloadEntry],
        candidates: &[Index],
        seed: BTreeSet<IndexConfig>,
        base_relation_bytes: i64,
        budget_bytes: Option<i64>,
        started_at: Instant,
    ) -> crate::error::Result<SeedResult> {
        let size_of = |config: &IndexConfig| -> i64 {
            candidates
                .iter()
                .find(|c| &c.config == config)
                .map(|c| c.estimated_size_bytes)
                .unwrap_or(0)
        };

        let mut current = seed;
        let mut current_space = base_relation_bytes
            + current.iter().map(size_of).sum::<i64>();
        let mut current_cost = self.estimator.evaluate(workload, &current).await?;

        let mut iterations = 0u32;
        loop {
            if self.time_exceeded(started_at) && iterations > 0 {
                break;
            }

            // A candidate is only accepted if it beats both the current
            // configuration's objective and a zero time-improvement floor;
            // seeding from `current` (not `None`) is what makes "no candidate
            // improves on staying put" a reachable outcome.
            let current_objective = objective(current_cost, current_space, self.config.pareto_alpha);
            let mut best_objective = current_objective;
            let mut best_improvement = 0.0;
            let mut best_candidate: Option<(IndexConfig, f64)> = None; // (config, trial_cost)

            for candidate in candidates {
                if current.contains(&candidate.config) {
                    continue;
                }

                let trial_space = current_space + candidate.estimated_size_bytes;
                if let Some(budget) = budget_bytes {
                    if (trial_space - base_relation_bytes) > budget {
                        continue;
                    }
                }

                let mut trial = current.clone();
                trial.insert(candidate.config.clone());
                let trial_cost = self.estimator.evaluate(workload, &trial).await?;

                if current_cost <= 0.0 || !current_cost.is_finite() {
                    continue;
                }
                let time_improvement = (current_cost - trial_cost) / current_cost;
                if time_improvement < self.config.min_time_improvement {
                    continue;
                }

                let trial_objective = objective(trial_cost, trial_space, self.config.pareto_alpha);

                if trial_objective < best_objective && time_improvement > best_improvement {
                    best_objective = trial_objective;
                    best_improvement = time_improvement;
                    best_candidate = Some((candidate.config.clone(), trial_cost));
                }
            }

            match best_candidate {
                Some((config, trial_cost)) => {
                    current_space += size_of(&config);
                    current.insert(config);
                    current_cost = trial_cost;
                }
                None => break,
            }

            iterations += 1;
        }

        let final_objective = objective(current_cost, current_space, self.config.pareto_alpha);
        Ok(SeedResult {
            chosen: current.into_iter().collect(),
            final_objective,
        })
    }

    fn time_exceeded(&self, started_at: Instant) -> bool {
        self.config.max_runtime_seconds > 0
            && started_at.elapsed().as_secs() >= self.config.max_runtime_seconds
    }

    async fn format_recommendations(
        &self,
        workload: &[WorkloadEntry],
        candidates: &[Index],
        chosen: &[IndexConfig],
        budget_bytes: Option<i64>,
    ) -> crate::error::Result<Vec<IndexRecommendation>> {
        let empty = BTreeSet::new();
        let individual_base_cost = self.estimator.evaluate(workload, &empty).await?;

        let mut progressive = BTreeSet::new();
        let mut cumulative_size = 0i64;
        let mut recommendations = Vec::new();

        for config in chosen {
            let candidate = match candidates.iter().find(|c| &c.config == config) {
                Some(c) => c,
                None => continue,
            };

            if let Some(budget) = budget_bytes {
                if cumulative_size + candidate.estimated_size_bytes > budget {
                    continue;
                }
            }

            let progressive_base_cost = self.estimator.evaluate(workload, &progressive).await?;

            let mut individual_set = BTreeSet::new();
            individual_set.insert(config.clone());
            let individual_recommendation_cost =
                self.estimator.evaluate(workload, &individual_set).await?;

            progressive.insert(config.clone());
            let progressive_recommendation_cost =
                self.estimator.evaluate(workload, &progressive).await?;

            cumulative_size += candidate.estimated_size_bytes;

            recommendations.push(IndexRecommendation {
                index: config.clone(),
                estimated_size_bytes: candidate.estimated_size_bytes,
                potential_problematic_reason: candidate.potential_problematic_reason.clone(),
                individual_base_cost,
                individual_recommendation_cost,
                progressive_base_cost,
                progressive_recommendation_cost,
                definition: config.definition(),
                queries: workload.iter().map(|w| w.query_text.clone()).collect(),
            });
        }

        Ok(recommendations)
    }
}

/// `ln(exec_cost) + alpha * ln(space)`, the scalarization the greedy search
/// minimizes. Degenerate zero/negative inputs are clamped to a tiny positive
/// value so `ln` never produces NaN or -infinity from a legitimately
/// zero-cost (empty) plan.
fn objective(exec_cost: f64, space_bytes: i64, alpha: f64) -> f64 {
    let cost = exec_cost.max(f64::MIN_POSITIVE);
    let space = (space_bytes as f64).max(1.0);
    cost.ln() + alpha * space.ln()
}

pub fn progressive_improvement(r: &IndexRecommendation) -> f64 {
    improvement_multiple(r.progressive_base_cost, r.progressive_recommendation_cost)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn objective_is_monotone_in_cost_and_space() {
        let low = objective(10.0, 1_000_000, 2.0);
        let high = objective(100.0, 1_000_000, 2.0);
        assert!(low < high);

        let small_space = objective(10.0, 1_000_000, 2.0);
        let big_space = objective(10.0, 10_000_000, 2.0);
        assert!(small_space < big_space);
    }

    #[test]
    fn objective_never_panics_on_zero_cost() {
        let value = objective(0.0, 0, 2.0);
        assert!(value.is_finite());
    }
}
