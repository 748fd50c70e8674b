//! The SQL Driver contract: a single-session, parameterized query executor
//! the rest of the advisor depends on only through this trait.

mod mock;
mod postgres;

pub use mock::MockDriver;
pub use postgres::PostgresDriver;

use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

/// One returned row: an ordered field-name to value mapping, matching the
/// reference driver's `RowResult`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowResult {
    pub cells: HashMap<String, Value>,
}

impl RowResult {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.cells.get(field)
    }
}

/// A bind parameter. Identifier parameters must already be quoted by the
/// caller via [`quote_ident`]; value parameters are passed through to the
/// underlying client's native parameter binding.
#[derive(Debug, Clone)]
pub enum Param {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

/// Quotes a SQL identifier for safe interpolation into a query. Doubles any
/// embedded double-quote per the standard SQL escaping rule.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// The contract every component of the advisor uses to reach the database.
/// Implementations must uphold: read-only transactions are opened and rolled
/// back regardless of outcome when `read_only` is true; any connection-layer
/// failure must surface as [`crate::error::DtaError::Connection`] so callers
/// know not to retry on the same driver instance.
#[async_trait]
pub trait SqlDriver: Send + Sync {
    /// Executes a query, returning `None` for statements that produce no row
    /// set (DDL-shaped statements), or `Some(rows)` otherwise.
    async fn execute(
        &self,
        query: &str,
        params: &[Param],
        read_only: bool,
    ) -> Result<Option<Vec<RowResult>>>;

    /// Convenience wrapper for the common case: a read-only query that is
    /// expected to return rows.
    async fn query(&self, query: &str, params: &[Param]) -> Result<Vec<RowResult>> {
        Ok(self.execute(query, params, true).await?.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_ident_escapes_embedded_quotes() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("weird\"name"), "\"weird\"\"name\"");
    }
}
