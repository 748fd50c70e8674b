//! The production [`SqlDriver`]: a thin wrapper over a single
//! [`tokio_postgres::Client`].
//!
//! Grounded on the reference driver's connection discipline: a read-only
//! request opens `BEGIN TRANSACTION READ ONLY` and always rolls back,
//! regardless of success, so the advisor can never leave a write-intent
//! transaction open; a mutating request commits on success and rolls back on
//! error. Any I/O-layer failure from the underlying client is classified as a
//! connection error — the advisor does not retry, matching the documented
//! pool-invalidation limitation.

use super::{Param, RowResult, SqlDriver};
use crate::error::{DtaError, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio_postgres::types::ToSql;
use tokio_postgres::Client;

pub struct PostgresDriver {
    client: Client,
}

impl PostgresDriver {
    /// Connects using a Postgres connection string, spawning the driver's
    /// background I/O task the way `tokio_postgres::connect` requires.
    pub async fn connect(conninfo: &str) -> Result<Self> {
        let (client, connection) = tokio_postgres::connect(conninfo, tokio_postgres::NoTls)
            .await
            .map_err(|e| DtaError::Connection(e.to_string()))?;

        tokio::spawn(async move {
            if let Err(err) = connection.await {
                tracing::error!(error = %err, "postgres connection task terminated");
            }
        });

        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

fn bind_values(params: &[Param]) -> Vec<Box<dyn ToSql + Sync + Send>> {
    params
        .iter()
        .map(|p| -> Box<dyn ToSql + Sync + Send> {
            match p {
                Param::Text(s) => Box::new(s.clone()),
                Param::Int(i) => Box::new(*i),
                Param::Float(f) => Box::new(*f),
                Param::Bool(b) => Box::new(*b),
            }
        })
        .collect()
}

fn row_to_result(row: &tokio_postgres::Row) -> RowResult {
    let mut cells = std::collections::HashMap::new();
    for (idx, column) in row.columns().iter().enumerate() {
        // JSON-typed columns (EXPLAIN output, jsonb catalog columns) decode
        // directly; everything else is read as text and carried as a JSON
        // string, matching the row-as-field-map contract the advisor only
        // ever inspects for scalars or JSON plans.
        let value: Value = row
            .try_get::<_, Option<Value>>(idx)
            .unwrap_or(None)
            .or_else(|| row.try_get::<_, Option<String>>(idx).ok().flatten().map(Value::String))
            .unwrap_or(Value::Null);
        cells.insert(column.name().to_string(), value);
    }
    RowResult { cells }
}

#[async_trait]
impl SqlDriver for PostgresDriver {
    async fn execute(
        &self,
        query: &str,
        params: &[Param],
        read_only: bool,
    ) -> Result<Option<Vec<RowResult>>> {
        let bound = bind_values(params);
        let refs: Vec<&(dyn ToSql + Sync)> = bound.iter().map(|b| b.as_ref() as &(dyn ToSql + Sync)).collect();

        let begin = if read_only {
            "BEGIN TRANSACTION READ ONLY"
        } else {
            "BEGIN"
        };
        self.client.batch_execute(begin).await.map_err(classify)?;

        let result = self.client.query(query, &refs).await;

        match result {
            Ok(rows) => {
                // Roll back read-only transactions unconditionally; commit
                // mutating ones on success.
                let end = if read_only { "ROLLBACK" } else { "COMMIT" };
                self.client.batch_execute(end).await.map_err(classify)?;
                if rows.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(rows.iter().map(row_to_result).collect()))
                }
            }
            Err(err) => {
                let _ = self.client.batch_execute("ROLLBACK").await;
                Err(classify(err))
            }
        }
    }
}

fn classify(err: tokio_postgres::Error) -> DtaError {
    DtaError::from(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_values_preserves_order_and_count() {
        let params = vec![Param::Int(1), Param::Text("x".to_string())];
        let bound = bind_values(&params);
        assert_eq!(bound.len(), 2);
    }
}
