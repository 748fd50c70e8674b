//! Wraps HypoPG, Postgres's hypothetical-index extension: registers virtual
//! indexes for cost estimation, reads their estimated sizes, and resets all
//! session-local state. Every effect here is scoped to the current database
//! session and vanishes when the connection closes.

use crate::error::{DtaError, Result};
use crate::model::IndexConfig;
use crate::sql::{Param, SqlDriver};
use serde_json::Value;
use std::sync::Arc;

pub struct HypotheticalIndexManager {
    driver: Arc<dyn SqlDriver>,
}

impl HypotheticalIndexManager {
    pub fn new(driver: Arc<dyn SqlDriver>) -> Self {
        Self { driver }
    }

    /// Fails the session precheck unless the extension is installed.
    pub async fn check_installed(&self) -> Result<()> {
        let rows = self
            .driver
            .query(
                "SELECT extname FROM pg_extension WHERE extname = 'hypopg'",
                &[],
            )
            .await?;
        if rows.is_empty() {
            return Err(DtaError::Precondition(
                "hypopg extension is not installed".to_string(),
            ));
        }
        Ok(())
    }

    /// Registers every definition in one batch, then reads back estimated
    /// sizes from `hypopg_list_indexes`. Returns `(index name, size bytes)`
    /// pairs in the order HypoPG reports them.
    pub async fn create_many(&self, definitions: &[String]) -> Result<Vec<(String, i64)>> {
        for definition in definitions {
            self.driver
                .query("SELECT hypopg_create_index($1)", &[Param::Text(definition.clone())])
                .await?;
        }

        let rows = self
            .driver
            .query(
                "SELECT indexname, hypopg_relation_size(indexrelid) AS size_bytes \
                 FROM hypopg_list_indexes()",
                &[],
            )
            .await?;

        let mut sizes = Vec::with_capacity(rows.len());
        for row in rows {
            let name = row
                .get("indexname")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let size = row.get("size_bytes").and_then(Value::as_i64).unwrap_or(0);
            sizes.push((name, size));
        }
        Ok(sizes)
    }

    /// Resets, creates each index in `indexes`, runs the given EXPLAIN query
    /// text (caller supplies the full `EXPLAIN (...) <query>` text so the
    /// manager stays agnostic to generic-plan vs. literal-substitution mode),
    /// and returns the raw plan JSON.
    pub async fn explain_with(&self, indexes: &[IndexConfig], explain_sql: &str) -> Result<Value> {
        self.reset().await?;
        for index in indexes {
            self.driver
                .query(
                    "SELECT hypopg_create_index($1)",
                    &[Param::Text(index.definition())],
                )
                .await?;
        }

        let rows = self.driver.query(explain_sql, &[]).await?;
        let plan = rows
            .first()
            .and_then(|r| r.get("QUERY PLAN"))
            .and_then(|v| v.as_array())
            .and_then(|a| a.first())
            .cloned()
            .ok_or_else(|| DtaError::Estimation("no plan returned from EXPLAIN".to_string()))?;
        Ok(plan)
    }

    /// Clears all session-local hypothetical indexes. Must be called on
    /// every exit path, including error paths — callers are expected to wrap
    /// a session in a guard (see [`crate::session`]) that guarantees this.
    pub async fn reset(&self) -> Result<()> {
        self.driver.query("SELECT hypopg_reset()", &[]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::MockDriver;
    use serde_json::json;

    #[tokio::test]
    async fn check_installed_fails_precondition_when_missing() {
        let driver = Arc::new(MockDriver::new());
        let manager = HypotheticalIndexManager::new(driver);
        let err = manager.check_installed().await.unwrap_err();
        assert!(matches!(err, DtaError::Precondition(_)));
    }

    #[tokio::test]
    async fn check_installed_succeeds_when_present() {
        let driver = Arc::new(MockDriver::new());
        let mut row = crate::sql::RowResult::default();
        row.cells.insert("extname".to_string(), json!("hypopg"));
        driver.set_rows(
            "SELECT extname FROM pg_extension WHERE extname = 'hypopg'",
            vec![row],
        );
        let manager = HypotheticalIndexManager::new(driver);
        manager.check_installed().await.unwrap();
    }

    #[tokio::test]
    async fn explain_with_extracts_plan_json() {
        let driver = Arc::new(MockDriver::new());
        driver.set_explain_plan("select 1", json!({"Node Type": "Seq Scan", "Total Cost": 10.0}));
        let manager = HypotheticalIndexManager::new(driver.clone());
        let plan = manager
            .explain_with(&[], "EXPLAIN (FORMAT JSON) select 1")
            .await
            .unwrap();
        assert_eq!(plan["Total Cost"], 10.0);
        // reset-on-entry plus explicit reset calls: at least one reset issued.
        assert!(driver.calls().iter().any(|c| c.contains("hypopg_reset")));
    }
}
