//! The Candidate Generator: turns a workload and the current physical design
//! into a list of plausible index candidates with estimated sizes.

use crate::config::DtaConfig;
use crate::hypothetical::HypotheticalIndexManager;
use crate::model::{AccessMethod, Index, IndexConfig, WorkloadEntry};
use crate::parser::{expr_is_simple_column, extract_indexable_columns, SqlParser};
use crate::sql::SqlDriver;
use serde_json::Value;
use sqlparser::ast::Statement;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// An index already present in the database, used to suppress redundant
/// candidates. Equivalence is AST-structural via [`IndexConfig::equivalent_to`],
/// never a textual comparison.
#[derive(Debug, Clone)]
pub struct ExistingIndex {
    pub config: IndexConfig,
    pub unique: bool,
}

pub struct CandidateGenerator {
    driver: Arc<dyn SqlDriver>,
    hypothetical: Arc<HypotheticalIndexManager>,
    config: DtaConfig,
    parser: SqlParser,
}

impl CandidateGenerator {
    pub fn new(
        driver: Arc<dyn SqlDriver>,
        hypothetical: Arc<HypotheticalIndexManager>,
        config: DtaConfig,
    ) -> Self {
        Self {
            driver,
            hypothetical,
            config,
            parser: SqlParser::new(),
        }
    }

    /// Runs the full six-step algorithm of the Candidate Generator: usage
    /// aggregation, combinatorial enumeration, existing-index suppression,
    /// predicate-relevance filtering, the long-text heuristic, and batch size
    /// estimation.
    pub async fn generate(&self, workload: &[WorkloadEntry]) -> crate::error::Result<Vec<Index>> {
        let per_table_usage = self.aggregate_column_usage(workload);
        let per_table_condition_columns = self.aggregate_condition_columns(workload);

        let mut raw_candidates = Vec::new();
        for (table, columns) in &per_table_usage {
            let kept: Vec<String> = columns.iter().cloned().collect();
            let max_width = self.config.max_index_width.min(kept.len());
            for width in 1..=max_width {
                for perm in ordered_combinations(&kept, width) {
                    raw_candidates.push(IndexConfig::new(table.clone(), perm, AccessMethod::Btree));
                }
            }
        }

        let tables: HashSet<String> = per_table_usage.keys().cloned().collect();
        let existing = self.fetch_existing_indexes(&tables).await?;
        raw_candidates.retain(|candidate| {
            !existing
                .iter()
                .any(|ex| ex.config.equivalent_to(candidate))
        });

        raw_candidates.retain(|candidate| {
            per_table_condition_columns
                .get(&candidate.table)
                .map(|allowed| candidate.columns.iter().all(|c| allowed.contains(c)))
                .unwrap_or(false)
        });

        let column_stats = self.fetch_column_stats(&tables).await?;
        let mut candidates: Vec<Index> = Vec::new();
        for config in raw_candidates {
            let mut problematic = None;
            let mut drop = false;
            for column in &config.columns {
                if let Some(stats) = column_stats.get(&(config.table.clone(), column.clone())) {
                    if stats.is_long_text(self.config.max_text_length) {
                        drop = true;
                        break;
                    }
                    if let Some(reason) = stats.potential_problematic_reason(self.config.max_text_length) {
                        problematic = Some(reason);
                    }
                }
            }
            if drop {
                continue;
            }
            let mut index = Index::new(config, 0);
            index.potential_problematic_reason = problematic;
            candidates.push(index);
        }

        self.estimate_sizes(&mut candidates, &column_stats).await?;
        Ok(candidates)
    }

    fn aggregate_column_usage(&self, workload: &[WorkloadEntry]) -> HashMap<String, HashSet<String>> {
        let mut usage_counts: HashMap<(String, String), usize> = HashMap::new();
        for entry in workload {
            let per_table = extract_indexable_columns(&entry.statement);
            for (table, columns) in per_table {
                for column in columns {
                    *usage_counts.entry((table.clone(), column)).or_insert(0) += 1;
                }
            }
        }

        let mut kept: HashMap<String, HashSet<String>> = HashMap::new();
        for ((table, column), count) in usage_counts {
            if count >= self.config.min_column_usage {
                kept.entry(table).or_default().insert(column);
            }
        }
        kept
    }

    fn aggregate_condition_columns(
        &self,
        workload: &[WorkloadEntry],
    ) -> HashMap<String, HashSet<String>> {
        let mut merged: HashMap<String, HashSet<String>> = HashMap::new();
        for entry in workload {
            let per_table = extract_indexable_columns(&entry.statement);
            for (table, columns) in per_table {
                merged.entry(table).or_default().extend(columns);
            }
        }
        merged
    }

    async fn fetch_existing_indexes(
        &self,
        tables: &HashSet<String>,
    ) -> crate::error::Result<Vec<ExistingIndex>> {
        let rows = self
            .driver
            .query(
                "SELECT tablename, indexdef, indexname FROM pg_indexes \
                 WHERE schemaname NOT IN ('pg_catalog', 'information_schema')",
                &[],
            )
            .await?;

        let mut existing = Vec::new();
        for row in rows {
            let table = row
                .get("tablename")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if !tables.contains(table) {
                continue;
            }
            let def = row.get("indexdef").and_then(Value::as_str).unwrap_or_default();
            if let Some(parsed) = self.parse_index_definition(def) {
                existing.push(parsed);
            }
        }
        Ok(existing)
    }

    /// Parses an existing `CREATE [UNIQUE] INDEX ... ON table USING method
    /// (cols)` definition the same way the Parser parses queries, so
    /// suppression is an AST comparison rather than a string comparison —
    /// whitespace, quoting, schema prefixes, and keyword case never matter.
    fn parse_index_definition(&self, def: &str) -> Option<ExistingIndex> {
        let statement = self.parser.parse(def).ok()?;
        if let Statement::CreateIndex(create) = statement {
            let table = create
                .table_name
                .0
                .last()
                .map(|i| i.value.clone())
                .unwrap_or_default();
            let using = create
                .using
                .as_ref()
                .map(|u| AccessMethod::from_sql(&u.to_string()))
                .unwrap_or(AccessMethod::Btree);
            let columns: Vec<String> = create
                .columns
                .iter()
                .filter_map(|c| expr_is_simple_column(&c.expr).map(|(_, name)| name))
                .collect();
            if columns.is_empty() {
                return None;
            }
            return Some(ExistingIndex {
                config: IndexConfig::new(table, columns, using),
                unique: create.unique,
            });
        }
        None
    }

    async fn fetch_column_stats(
        &self,
        tables: &HashSet<String>,
    ) -> crate::error::Result<HashMap<(String, String), ColumnStats>> {
        if tables.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = self
            .driver
            .query(
                "SELECT c.table_name, c.column_name, c.data_type, c.character_maximum_length, \
                        s.avg_width, s.n_distinct \
                 FROM information_schema.columns c \
                 LEFT JOIN pg_stats s \
                   ON s.tablename = c.table_name AND s.attname = c.column_name",
                &[],
            )
            .await?;

        let mut stats = HashMap::new();
        for row in rows {
            let table = row
                .get("table_name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            if !tables.contains(&table) {
                continue;
            }
            let column = row
                .get("column_name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let data_type = row
                .get("data_type")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let char_max_length = row.get("character_maximum_length").and_then(Value::as_i64);
            let avg_width = row.get("avg_width").and_then(Value::as_i64);
            let n_distinct = row.get("n_distinct").and_then(Value::as_f64);
            stats.insert(
                (table, column),
                ColumnStats {
                    data_type,
                    char_max_length,
                    avg_width,
                    n_distinct,
                },
            );
        }
        Ok(stats)
    }

    async fn estimate_sizes(
        &self,
        candidates: &mut [Index],
        column_stats: &HashMap<(String, String), ColumnStats>,
    ) -> crate::error::Result<()> {
        let definitions: Vec<String> = candidates.iter().map(|c| c.definition()).collect();
        if definitions.is_empty() {
            return Ok(());
        }

        match self.hypothetical.create_many(&definitions).await {
            Ok(sizes) => {
                for (candidate, (_, size)) in candidates.iter_mut().zip(sizes.into_iter()) {
                    candidate.estimated_size_bytes = size;
                }
            }
            Err(_) => {
                for candidate in candidates.iter_mut() {
                    candidate.estimated_size_bytes =
                        self.estimate_size_fallback(&candidate.config, column_stats);
                }
            }
        }
        self.hypothetical.reset().await?;
        Ok(())
    }

    /// Catalog-statistics fallback when the hypothetical-index extension
    /// cannot size a candidate directly: `width = sum(avg_width) + 8`,
    /// `ndistinct = max(sum(n_distinct), 1.0)`, `size = width * ndistinct *
    /// 2.0`, matching the reference implementation's formula.
    fn estimate_size_fallback(
        &self,
        config: &IndexConfig,
        column_stats: &HashMap<(String, String), ColumnStats>,
    ) -> i64 {
        let mut width = 8i64;
        let mut ndistinct = 0.0f64;
        for column in &config.columns {
            if let Some(stats) = column_stats.get(&(config.table.clone(), column.clone())) {
                width += stats.avg_width.unwrap_or(0);
                ndistinct += stats.n_distinct.unwrap_or(0.0);
            }
        }
        let ndistinct = ndistinct.max(1.0);
        (width as f64 * ndistinct * 2.0) as i64
    }
}

/// Every ordered arrangement of `width` distinct columns drawn from `pool`,
/// without repetition. Column order is significant for composite btree
/// indexes, so this is permutations, not combinations: `(a, b)` and `(b, a)`
/// are both emitted and left for the search to tell apart.
fn ordered_combinations(pool: &[String], width: usize) -> Vec<Vec<String>> {
    if width == 0 || width > pool.len() {
        return Vec::new();
    }
    let mut results = Vec::new();
    let mut used = vec![false; pool.len()];
    let mut current = Vec::with_capacity(width);
    permute(pool, width, &mut used, &mut current, &mut results);
    results
}

fn permute(
    pool: &[String],
    width: usize,
    used: &mut [bool],
    current: &mut Vec<String>,
    results: &mut Vec<Vec<String>>,
) {
    if current.len() == width {
        results.push(current.clone());
        return;
    }
    for i in 0..pool.len() {
        if used[i] {
            continue;
        }
        used[i] = true;
        current.push(pool[i].clone());
        permute(pool, width, used, current, results);
        current.pop();
        used[i] = false;
    }
}

#[derive(Debug, Clone)]
struct ColumnStats {
    data_type: String,
    char_max_length: Option<i64>,
    avg_width: Option<i64>,
    n_distinct: Option<f64>,
}

impl ColumnStats {
    /// Drop outright: confirmed unbounded text/varchar, or confirmed wide
    /// beyond the threshold.
    fn is_long_text(&self, max_text_length: usize) -> bool {
        let unbounded = matches!(self.data_type.as_str(), "text")
            || (self.data_type.starts_with("character") && self.char_max_length.is_none());
        if !unbounded {
            return false;
        }
        match self.avg_width {
            Some(width) => (width as f64) > (max_text_length as f64) * 0.4,
            None => true,
        }
    }

    /// Keep but tag: unbounded type with width either unknown or under the
    /// threshold, but close enough to be worth flagging to the caller.
    fn potential_problematic_reason(&self, max_text_length: usize) -> Option<String> {
        let is_unbounded = matches!(self.data_type.as_str(), "text")
            || (self.data_type.starts_with("character") && self.char_max_length.is_none());
        if is_unbounded && !self.is_long_text(max_text_length) {
            Some("potential_problematic_reason: long_text_column".to_string())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirmed_wide_text_is_dropped() {
        let stats = ColumnStats {
            data_type: "text".to_string(),
            char_max_length: None,
            avg_width: Some(500),
            n_distinct: None,
        };
        assert!(stats.is_long_text(100));
    }

    #[test]
    fn bounded_varchar_is_never_long_text() {
        let stats = ColumnStats {
            data_type: "character varying".to_string(),
            char_max_length: Some(50),
            avg_width: Some(500),
            n_distinct: None,
        };
        assert!(!stats.is_long_text(100));
    }

    #[test]
    fn unconfirmed_text_is_tagged_not_dropped() {
        let stats = ColumnStats {
            data_type: "text".to_string(),
            char_max_length: None,
            avg_width: Some(20),
            n_distinct: None,
        };
        assert!(!stats.is_long_text(100));
        assert!(stats.potential_problematic_reason(100).is_some());
    }

    #[test]
    fn size_fallback_sums_width_and_distinctness_across_columns() {
        let generator_config = IndexConfig::new(
            "orders".to_string(),
            vec!["customer_id".to_string(), "status".to_string()],
            AccessMethod::Btree,
        );
        let mut stats = HashMap::new();
        stats.insert(
            ("orders".to_string(), "customer_id".to_string()),
            ColumnStats {
                data_type: "integer".to_string(),
                char_max_length: None,
                avg_width: Some(4),
                n_distinct: Some(500.0),
            },
        );
        stats.insert(
            ("orders".to_string(), "status".to_string()),
            ColumnStats {
                data_type: "character varying".to_string(),
                char_max_length: Some(20),
                avg_width: Some(8),
                n_distinct: Some(3.0),
            },
        );

        let driver: Arc<dyn crate::sql::SqlDriver> = Arc::new(crate::sql::MockDriver::new());
        let hypothetical = Arc::new(crate::hypothetical::HypotheticalIndexManager::new(driver.clone()));
        let generator = CandidateGenerator::new(driver, hypothetical, DtaConfig::default());

        // width = (4 + 8) + 8 = 20, ndistinct = 500 + 3 = 503, size = 20 * 503 * 2.0
        let size = generator.estimate_size_fallback(&generator_config, &stats);
        assert_eq!(size, 20 * 503 * 2);
    }

    #[test]
    fn size_fallback_clamps_ndistinct_to_one_when_unknown() {
        let config = IndexConfig::new("t".to_string(), vec!["a".to_string()], AccessMethod::Btree);
        let driver: Arc<dyn crate::sql::SqlDriver> = Arc::new(crate::sql::MockDriver::new());
        let hypothetical = Arc::new(crate::hypothetical::HypotheticalIndexManager::new(driver.clone()));
        let generator = CandidateGenerator::new(driver, hypothetical, DtaConfig::default());

        let size = generator.estimate_size_fallback(&config, &HashMap::new());
        assert_eq!(size, 8 * 1 * 2);
    }
}
