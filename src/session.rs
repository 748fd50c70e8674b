//! The Session Orchestrator: `analyze_workload`, the advisor's single
//! external entry point. Validates preconditions, ingests the workload from
//! whichever source was provided, drives candidate generation and search,
//! and guarantees a hypothetical-index reset on every exit path.

use crate::candidates::CandidateGenerator;
use crate::config::DtaConfig;
use crate::cost::{CostEstimator, ExplainCostEstimator};
use crate::hypothetical::HypotheticalIndexManager;
use crate::model::{Session, WorkloadEntry, WorkloadSource};
use crate::parser::{is_analyzable_statement, is_system_catalog_only, SqlParser};
use crate::search::SearchEngine;
use crate::sql::SqlDriver;
use serde_json::Value;
use std::sync::Arc;

/// One raw workload entry as supplied by a caller, before parsing.
#[derive(Debug, Clone)]
pub struct RawWorkloadEntry {
    pub query: String,
    pub calls: Option<i64>,
    pub avg_exec_time_ms: Option<f64>,
}

/// Parameters to `analyze_workload`, mirroring the external interface
/// exactly: at most one workload source is consulted, in priority order.
#[derive(Debug, Clone, Default)]
pub struct AnalyzeWorkloadInput {
    pub workload: Option<Vec<RawWorkloadEntry>>,
    pub sql_file: Option<String>,
    pub query_list: Option<Vec<String>>,
    pub min_calls: i64,
    pub min_avg_time_ms: f64,
    pub limit: i64,
    pub max_index_size_mb: i64,
}

pub struct DtaOrchestrator {
    driver: Arc<dyn SqlDriver>,
    hypothetical: Arc<HypotheticalIndexManager>,
    parser: SqlParser,
    base_config: DtaConfig,
    server_version: u32,
}

impl DtaOrchestrator {
    pub fn new(driver: Arc<dyn SqlDriver>, base_config: DtaConfig, server_version: u32) -> Self {
        let hypothetical = Arc::new(HypotheticalIndexManager::new(driver.clone()));
        Self {
            driver,
            hypothetical,
            parser: SqlParser::new(),
            base_config,
            server_version,
        }
    }

    pub async fn analyze_workload(&self, input: AnalyzeWorkloadInput) -> Session {
        let mut config = self.base_config.clone();
        config.budget_mb = input.max_index_size_mb;

        let mut session = Session::new(input.max_index_size_mb, WorkloadSource::Args);

        if let Err(err) = self.run_prechecks().await {
            session.fail(format!("precondition failed: {err}"));
            let _ = self.hypothetical.reset().await;
            return session;
        }

        let (source, raw_entries) = match self.resolve_workload_source(&input).await {
            Ok(pair) => pair,
            Err(err) => {
                session.fail(format!("failed to load workload: {err}"));
                let _ = self.hypothetical.reset().await;
                return session;
            }
        };
        session.workload_source = source;
        session.log(format!("workload source: {source} ({} entries)", raw_entries.len()));

        let workload = self.validate_and_parse(&mut session, raw_entries);

        if workload.is_empty() {
            session.log("no analyzable queries in workload");
            let _ = self.hypothetical.reset().await;
            return session;
        }

        let result = self.run_pipeline(&mut session, &config, &workload).await;
        if let Err(err) = result {
            session.fail(format!("search failed: {err}"));
        }

        // Mandatory teardown regardless of outcome.
        if let Err(err) = self.hypothetical.reset().await {
            session.log(format!("final reset failed: {err}"));
        }

        session
    }

    async fn run_prechecks(&self) -> crate::error::Result<()> {
        self.hypothetical.check_installed().await?;

        let rows = self
            .driver
            .query(
                "SELECT 1 FROM pg_stat_user_tables WHERE last_analyze IS NOT NULL \
                 OR last_autoanalyze IS NOT NULL LIMIT 1",
                &[],
            )
            .await?;
        if rows.is_empty() {
            return Err(crate::error::DtaError::Precondition(
                "no relation has been analyzed; statistics are not fresh".to_string(),
            ));
        }
        Ok(())
    }

    async fn resolve_workload_source(
        &self,
        input: &AnalyzeWorkloadInput,
    ) -> crate::error::Result<(WorkloadSource, Vec<RawWorkloadEntry>)> {
        if let Some(workload) = &input.workload {
            return Ok((WorkloadSource::Args, workload.clone()));
        }
        if let Some(query_list) = &input.query_list {
            let entries = query_list
                .iter()
                .map(|q| RawWorkloadEntry {
                    query: q.clone(),
                    calls: Some(1),
                    avg_exec_time_ms: None,
                })
                .collect();
            return Ok((WorkloadSource::QueryList, entries));
        }
        if let Some(path) = &input.sql_file {
            let text = std::fs::read_to_string(path)?;
            let entries = text
                .split(';')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|q| RawWorkloadEntry {
                    query: q.to_string(),
                    calls: Some(1),
                    avg_exec_time_ms: None,
                })
                .collect();
            return Ok((WorkloadSource::SqlFile, entries));
        }

        let entries = self.fetch_from_query_store(input).await?;
        Ok((WorkloadSource::QueryStore, entries))
    }

    /// Falls back to `pg_stat_statements`, selecting version-appropriate
    /// column names (`total_exec_time`/`mean_exec_time` on v13+,
    /// `total_time`/`mean_time` on earlier servers).
    async fn fetch_from_query_store(
        &self,
        input: &AnalyzeWorkloadInput,
    ) -> crate::error::Result<Vec<RawWorkloadEntry>> {
        let (total_col, mean_col) = if self.server_version >= 130000 {
            ("total_exec_time", "mean_exec_time")
        } else {
            ("total_time", "mean_time")
        };

        let query = format!(
            "SELECT query, calls, {mean_col} AS avg_time \
             FROM pg_stat_statements \
             WHERE calls >= {min_calls} AND {mean_col} >= {min_avg_time} \
             ORDER BY {total_col} DESC \
             LIMIT {limit}",
            min_calls = input.min_calls,
            min_avg_time = input.min_avg_time_ms,
            limit = input.limit,
        );

        let rows = self.driver.query(&query, &[]).await?;
        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let text = row.get("query").and_then(Value::as_str).unwrap_or_default();
            let calls = row.get("calls").and_then(Value::as_i64);
            let avg_time = row.get("avg_time").and_then(Value::as_f64);
            entries.push(RawWorkloadEntry {
                query: text.to_string(),
                calls,
                avg_exec_time_ms: avg_time,
            });
        }
        Ok(entries)
    }

    /// Parses every raw entry, silently skipping anything unparsable,
    /// non-`SELECT`-shaped, or exclusively referencing system catalogs.
    fn validate_and_parse(
        &self,
        session: &mut Session,
        raw_entries: Vec<RawWorkloadEntry>,
    ) -> Vec<WorkloadEntry> {
        let mut workload = Vec::new();
        for raw in raw_entries {
            let has_bind = self.parser.has_bind_variables(&raw.query);
            let normalized = if has_bind {
                self.parser.substitute_bind_params(&raw.query)
            } else {
                raw.query.clone()
            };

            let statement = match self.parser.parse(&normalized) {
                Ok(stmt) => stmt,
                Err(err) => {
                    session.log(format!("skipped unparsable query: {err}"));
                    continue;
                }
            };

            if !is_analyzable_statement(&statement) {
                session.log("skipped non-SELECT statement");
                continue;
            }
            if is_system_catalog_only(&statement) {
                session.log("skipped system-catalog-only query");
                continue;
            }

            session.workload.push(raw.query.clone());
            workload.push(WorkloadEntry {
                query_text: normalized,
                statement,
                calls: raw.calls,
                avg_exec_time_ms: raw.avg_exec_time_ms,
            });
        }
        workload
    }

    async fn run_pipeline(
        &self,
        session: &mut Session,
        config: &DtaConfig,
        workload: &[WorkloadEntry],
    ) -> crate::error::Result<()> {
        let generator = CandidateGenerator::new(
            self.driver.clone(),
            self.hypothetical.clone(),
            config.clone(),
        );
        let candidates = generator.generate(workload).await?;
        session.log(format!("{} candidates after filtering", candidates.len()));

        let base_relation_bytes = self.estimate_base_relation_bytes(workload).await;

        let estimator: Arc<dyn CostEstimator> = Arc::new(ExplainCostEstimator::new(
            self.hypothetical.clone(),
            self.server_version,
        ));
        let engine = SearchEngine::new(estimator, config.clone());
        let recommendations = engine
            .search(workload, &candidates, base_relation_bytes)
            .await?;

        session.log(format!("{} indexes recommended", recommendations.len()));
        session.recommendations = recommendations;
        Ok(())
    }

    async fn estimate_base_relation_bytes(&self, workload: &[WorkloadEntry]) -> i64 {
        let mut tables = std::collections::HashSet::new();
        for entry in workload {
            for (_, table) in crate::parser::extract_tables(&entry.statement) {
                tables.insert(table);
            }
        }

        let mut total = 0i64;
        for table in tables {
            total += self.table_size(&table).await;
        }
        total
    }

    async fn table_size(&self, table: &str) -> i64 {
        let quoted = crate::sql::quote_ident(table);
        let query = format!("SELECT pg_total_relation_size('{quoted}') AS size_bytes");
        match self.driver.query(&query, &[]).await {
            Ok(rows) => rows
                .first()
                .and_then(|r| r.get("size_bytes"))
                .and_then(Value::as_i64)
                .unwrap_or_else(|| self.estimate_table_size_fallback()),
            Err(_) => self.estimate_table_size_fallback(),
        }
    }

    /// `row_count * 1 KiB`, or 10 MiB when row count is unavailable, matching
    /// the reference implementation's conservative defaults.
    fn estimate_table_size_fallback(&self) -> i64 {
        10 * 1024 * 1024
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::{MockDriver, RowResult};
    use serde_json::json;

    fn hypopg_installed(driver: &MockDriver) {
        let mut row = RowResult::default();
        row.cells.insert("extname".to_string(), json!("hypopg"));
        driver.set_rows(
            "SELECT extname FROM pg_extension WHERE extname = 'hypopg'",
            vec![row],
        );
    }

    fn statistics_fresh(driver: &MockDriver) {
        let mut row = RowResult::default();
        row.cells.insert("?column?".to_string(), json!(1));
        driver.set_rows(
            "SELECT 1 FROM pg_stat_user_tables WHERE last_analyze IS NOT NULL \
             OR last_autoanalyze IS NOT NULL LIMIT 1",
            vec![row],
        );
    }

    #[tokio::test]
    async fn empty_workload_produces_no_recommendations_and_no_error() {
        let driver = Arc::new(MockDriver::new());
        hypopg_installed(&driver);
        statistics_fresh(&driver);

        let orchestrator = DtaOrchestrator::new(driver, DtaConfig::default(), 160000);
        let input = AnalyzeWorkloadInput {
            query_list: Some(Vec::new()),
            ..Default::default()
        };

        let session = orchestrator.analyze_workload(input).await;
        assert!(session.recommendations.is_empty());
        assert!(session.error.is_none());
    }

    #[tokio::test]
    async fn missing_hypopg_fails_precondition() {
        let driver = Arc::new(MockDriver::new());
        statistics_fresh(&driver);

        let orchestrator = DtaOrchestrator::new(driver, DtaConfig::default(), 160000);
        let input = AnalyzeWorkloadInput {
            query_list: Some(vec!["select 1".to_string()]),
            ..Default::default()
        };

        let session = orchestrator.analyze_workload(input).await;
        assert!(session.error.is_some());
        assert!(session.recommendations.is_empty());
    }

    #[tokio::test]
    async fn system_catalog_only_workload_yields_no_recommendations() {
        let driver = Arc::new(MockDriver::new());
        hypopg_installed(&driver);
        statistics_fresh(&driver);

        let orchestrator = DtaOrchestrator::new(driver, DtaConfig::default(), 160000);
        let input = AnalyzeWorkloadInput {
            query_list: Some(vec!["select * from pg_stat_user_tables".to_string()]),
            ..Default::default()
        };

        let session = orchestrator.analyze_workload(input).await;
        assert!(session.error.is_none());
        assert!(session.recommendations.is_empty());
    }
}
