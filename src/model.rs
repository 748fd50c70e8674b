//! Core entities shared across the advisor's pipeline: indexes, workload
//! entries, recommendations, and the session that ties a single
//! `analyze_workload` invocation together.

use serde::{Deserialize, Serialize};
use sqlparser::ast::Statement;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use uuid::Uuid;

/// Index access method. Determines whether column order in a composite index
/// carries semantic meaning: for `Hash`, it does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessMethod {
    Btree,
    Hash,
    Gist,
    Gin,
}

impl AccessMethod {
    pub fn as_sql(&self) -> &'static str {
        match self {
            AccessMethod::Btree => "btree",
            AccessMethod::Hash => "hash",
            AccessMethod::Gist => "gist",
            AccessMethod::Gin => "gin",
        }
    }

    pub fn from_sql(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "hash" => AccessMethod::Hash,
            "gist" => AccessMethod::Gist,
            "gin" => AccessMethod::Gin,
            _ => AccessMethod::Btree,
        }
    }
}

impl fmt::Display for AccessMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_sql())
    }
}

/// An immutable, hashable index identity: table, ordered columns, and access
/// method. Two configs are equal iff all three match; for the hash access
/// method, column order is ignored when testing equivalence against an
/// *existing* index (see `IndexConfig::equivalent_to`), though the struct's
/// own `Eq`/`Hash` remain order-sensitive so candidates with different column
/// orders are tracked as distinct search options.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexConfig {
    pub table: String,
    pub columns: Vec<String>,
    pub using: AccessMethod,
}

impl IndexConfig {
    pub fn new(table: impl Into<String>, columns: Vec<String>, using: AccessMethod) -> Self {
        Self {
            table: table.into(),
            columns,
            using,
        }
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// The canonical textual definition used both for existence checks and as
    /// the argument to the hypothetical-index extension.
    pub fn definition(&self) -> String {
        format!(
            "CREATE INDEX ON {} USING {} ({})",
            self.table,
            self.using,
            self.columns.join(", ")
        )
    }

    /// AST-structural equivalence against an existing index: same table, same
    /// access method, same columns — order-insensitive under `hash`, order-
    /// sensitive otherwise.
    pub fn equivalent_to(&self, other: &IndexConfig) -> bool {
        if self.table != other.table || self.using != other.using {
            return false;
        }
        match self.using {
            AccessMethod::Hash => {
                let a: BTreeSet<&str> = self.columns.iter().map(String::as_str).collect();
                let b: BTreeSet<&str> = other.columns.iter().map(String::as_str).collect();
                a == b
            }
            _ => self.columns == other.columns,
        }
    }
}

/// A materialized (or hypothetical) index with an estimated size, as produced
/// by the Candidate Generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Index {
    pub config: IndexConfig,
    pub estimated_size_bytes: i64,
    /// Set when the long-text filter kept this candidate only tentatively.
    pub potential_problematic_reason: Option<String>,
}

impl Index {
    pub fn new(config: IndexConfig, estimated_size_bytes: i64) -> Self {
        Self {
            config,
            estimated_size_bytes,
            potential_problematic_reason: None,
        }
    }

    pub fn table(&self) -> &str {
        &self.config.table
    }

    pub fn definition(&self) -> String {
        self.config.definition()
    }
}

/// One query in the workload, normalized: bind parameters replaced with dummy
/// literals, parsed, and weighted by call frequency.
#[derive(Debug, Clone)]
pub struct WorkloadEntry {
    pub query_text: String,
    pub statement: Statement,
    pub calls: Option<i64>,
    pub avg_exec_time_ms: Option<f64>,
}

impl WorkloadEntry {
    /// Weight used by the Cost Estimator's weighted average: `calls *
    /// avg_exec_time` when both are known, else 1.
    pub fn weight(&self) -> f64 {
        match (self.calls, self.avg_exec_time_ms) {
            (Some(calls), Some(avg)) => (calls as f64) * avg,
            _ => 1.0,
        }
    }
}

/// A single accepted index, with both its individual and progressive cost
/// impact recorded at the moment the Search Engine accepted it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexRecommendation {
    pub index: IndexConfig,
    pub estimated_size_bytes: i64,
    pub potential_problematic_reason: Option<String>,
    pub individual_base_cost: f64,
    pub individual_recommendation_cost: f64,
    pub progressive_base_cost: f64,
    pub progressive_recommendation_cost: f64,
    pub definition: String,
    pub queries: Vec<String>,
}

impl IndexRecommendation {
    pub fn progressive_improvement_multiple(&self) -> f64 {
        improvement_multiple(
            self.progressive_base_cost,
            self.progressive_recommendation_cost,
        )
    }

    pub fn individual_improvement_multiple(&self) -> f64 {
        improvement_multiple(
            self.individual_base_cost,
            self.individual_recommendation_cost,
        )
    }
}

/// `base_cost / new_cost`, with the degenerate cases the original
/// implementation defines: infinite improvement when the new cost collapses
/// to zero or below, and a flat 1.0 when there was no meaningful base cost to
/// improve upon.
pub fn improvement_multiple(base_cost: f64, new_cost: f64) -> f64 {
    if new_cost <= 0.0 {
        return f64::INFINITY;
    }
    if base_cost <= 0.0 {
        return 1.0;
    }
    base_cost / new_cost
}

/// Where the workload for a session came from, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkloadSource {
    Args,
    QueryList,
    SqlFile,
    QueryStore,
}

impl fmt::Display for WorkloadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkloadSource::Args => "args",
            WorkloadSource::QueryList => "query_list",
            WorkloadSource::SqlFile => "sql_file",
            WorkloadSource::QueryStore => "query_store",
        };
        write!(f, "{s}")
    }
}

/// The result of one `analyze_workload` invocation: exactly one of `error` or
/// a populated `recommendations` is authoritative, but `trace` always
/// accumulates regardless of outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub budget_mb: i64,
    pub workload_source: WorkloadSource,
    #[serde(skip)]
    pub workload: Vec<String>,
    pub recommendations: Vec<IndexRecommendation>,
    pub error: Option<String>,
    pub trace: Vec<String>,
}

impl Session {
    pub fn new(budget_mb: i64, workload_source: WorkloadSource) -> Self {
        Self {
            id: Uuid::new_v4(),
            budget_mb,
            workload_source,
            workload: Vec::new(),
            recommendations: Vec::new(),
            error: None,
            trace: Vec::new(),
        }
    }

    pub fn log(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(session_id = %self.id, "{message}");
        self.trace.push(message);
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(session_id = %self.id, "{message}");
        self.trace.push(message.clone());
        self.error = Some(message);
    }
}

/// Cache of `(query text, frozen index set) -> JSON plan`, owned by a single
/// session and dropped with it.
#[derive(Debug, Default)]
pub struct PlanCache {
    entries: HashMap<(String, BTreeSet<IndexConfig>), serde_json::Value>,
}

impl PlanCache {
    pub fn get(&self, query: &str, indexes: &BTreeSet<IndexConfig>) -> Option<&serde_json::Value> {
        self.entries.get(&(query.to_string(), indexes.clone()))
    }

    pub fn insert(&mut self, query: &str, indexes: BTreeSet<IndexConfig>, plan: serde_json::Value) {
        self.entries.insert((query.to_string(), indexes), plan);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Cache of `frozen index set -> scalar cost`, owned by a single session.
#[derive(Debug, Default)]
pub struct CostCache {
    entries: HashMap<BTreeSet<IndexConfig>, f64>,
}

impl CostCache {
    pub fn get(&self, indexes: &BTreeSet<IndexConfig>) -> Option<f64> {
        self.entries.get(indexes).copied()
    }

    pub fn insert(&mut self, indexes: BTreeSet<IndexConfig>, cost: f64) {
        self.entries.insert(indexes, cost);
    }
}

impl PartialOrd for IndexConfig {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexConfig {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (&self.table, &self.columns, self.using.as_sql()).cmp(&(
            &other.table,
            &other.columns,
            other.using.as_sql(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(table: &str, cols: &[&str], using: AccessMethod) -> IndexConfig {
        IndexConfig::new(table, cols.iter().map(|c| c.to_string()).collect(), using)
    }

    #[test]
    fn definition_matches_canonical_form() {
        let c = cfg("users", &["email"], AccessMethod::Btree);
        assert_eq!(c.definition(), "CREATE INDEX ON users USING btree (email)");
    }

    #[test]
    fn btree_equivalence_is_order_sensitive() {
        let a = cfg("t", &["a", "b"], AccessMethod::Btree);
        let b = cfg("t", &["b", "a"], AccessMethod::Btree);
        assert!(!a.equivalent_to(&b));
    }

    #[test]
    fn hash_equivalence_ignores_order() {
        let a = cfg("t", &["a", "b"], AccessMethod::Hash);
        let b = cfg("t", &["b", "a"], AccessMethod::Hash);
        assert!(a.equivalent_to(&b));
    }

    #[test]
    fn improvement_multiple_degenerate_cases() {
        assert_eq!(improvement_multiple(10.0, 0.0), f64::INFINITY);
        assert_eq!(improvement_multiple(0.0, 5.0), 1.0);
        assert_eq!(improvement_multiple(10.0, 5.0), 2.0);
    }
}
