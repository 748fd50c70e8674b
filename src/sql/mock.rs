//! An in-memory [`SqlDriver`] used by the advisor's own test suite and by the
//! testable-properties scenarios of the specification (fault injection, slow
//! EXPLAIN, version probing).

use super::{Param, RowResult, SqlDriver};
use crate::error::{DtaError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// Canned behavior for one query text: either a fixed row set, or an
/// injected failure.
#[derive(Debug, Clone)]
enum Response {
    Rows(Vec<RowResult>),
    ConnectionFailure(String),
    ExecutionFailure(String),
}

/// A deterministic, in-process stand-in for a real Postgres connection.
/// Responses are registered by exact query text match; EXPLAIN-shaped
/// queries are recognized by a `starts_with("EXPLAIN")` prefix match against
/// a separate table so tests don't need to predict the driver's exact EXPLAIN
/// wrapping.
#[derive(Default)]
pub struct MockDriver {
    responses: Mutex<HashMap<String, Response>>,
    explain_plans: Mutex<HashMap<String, Value>>,
    explain_delay: Mutex<Option<Duration>>,
    call_log: Mutex<Vec<String>>,
    invalid: Mutex<bool>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_rows(&self, query: &str, rows: Vec<RowResult>) {
        self.responses
            .lock()
            .insert(query.to_string(), Response::Rows(rows));
    }

    pub fn fail_with_connection_error(&self, query: &str, message: &str) {
        self.responses.lock().insert(
            query.to_string(),
            Response::ConnectionFailure(message.to_string()),
        );
    }

    pub fn fail_with_execution_error(&self, query: &str, message: &str) {
        self.responses.lock().insert(
            query.to_string(),
            Response::ExecutionFailure(message.to_string()),
        );
    }

    /// Registers the JSON plan returned for any EXPLAIN of `query_substring`
    /// (matched by substring so callers don't need to predict bind-marker
    /// substitution or EXPLAIN option wrapping).
    pub fn set_explain_plan(&self, query_substring: &str, plan: Value) {
        self.explain_plans
            .lock()
            .insert(query_substring.to_string(), plan);
    }

    pub fn set_explain_delay(&self, delay: Duration) {
        *self.explain_delay.lock() = Some(delay);
    }

    pub fn calls(&self) -> Vec<String> {
        self.call_log.lock().clone()
    }

    pub fn explain_call_count(&self) -> usize {
        self.call_log
            .lock()
            .iter()
            .filter(|c| c.starts_with("EXPLAIN"))
            .count()
    }

    pub fn mark_invalid(&self) {
        *self.invalid.lock() = true;
    }
}

#[async_trait]
impl SqlDriver for MockDriver {
    async fn execute(
        &self,
        query: &str,
        _params: &[Param],
        _read_only: bool,
    ) -> Result<Option<Vec<RowResult>>> {
        if *self.invalid.lock() {
            return Err(DtaError::Connection("mock driver invalidated".to_string()));
        }

        self.call_log.lock().push(query.to_string());

        if query.starts_with("EXPLAIN") {
            if let Some(delay) = *self.explain_delay.lock() {
                tokio::time::sleep(delay).await;
            }
            let plans = self.explain_plans.lock();
            for (substring, plan) in plans.iter() {
                if query.contains(substring) {
                    let mut row = RowResult::default();
                    row.cells
                        .insert("QUERY PLAN".to_string(), Value::Array(vec![plan.clone()]));
                    return Ok(Some(vec![row]));
                }
            }
            return Ok(Some(Vec::new()));
        }

        match self.responses.lock().get(query) {
            Some(Response::Rows(rows)) => Ok(Some(rows.clone())),
            Some(Response::ConnectionFailure(message)) => {
                *self.invalid.lock() = true;
                Err(DtaError::Connection(message.clone()))
            }
            Some(Response::ExecutionFailure(message)) => {
                Err(DtaError::Execution(message.clone()))
            }
            None => Ok(Some(Vec::new())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registered_rows_are_returned() {
        let driver = MockDriver::new();
        let mut row = RowResult::default();
        row.cells.insert("n".to_string(), Value::from(1));
        driver.set_rows("select 1", vec![row]);

        let rows = driver.query("select 1", &[]).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn connection_failure_invalidates_driver() {
        let driver = MockDriver::new();
        driver.fail_with_connection_error("select 1", "reset by peer");

        let err = driver.query("select 1", &[]).await.unwrap_err();
        assert!(err.is_connection_error());

        let err = driver.query("select 2", &[]).await.unwrap_err();
        assert!(err.is_connection_error());
    }

    #[tokio::test]
    async fn explain_calls_are_counted() {
        let driver = MockDriver::new();
        driver.set_explain_plan("select 1", serde_json::json!({"Plan": {"Total Cost": 1.0}}));
        driver
            .query("EXPLAIN (FORMAT JSON) select 1", &[])
            .await
            .unwrap();
        assert_eq!(driver.explain_call_count(), 1);
    }
}
