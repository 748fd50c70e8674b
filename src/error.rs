//! Error types for the database tuning advisor.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, DtaError>;

/// The advisor's error taxonomy.
///
/// Variants map directly onto the failure classes the advisor must distinguish:
/// precondition failures abort a session before any search begins, connection
/// failures are terminal for the session (the pool is not retried), execution
/// failures are local to one evaluation, and parse failures are only fatal when
/// a caller parses a statement directly rather than through the workload
/// ingestion path (which silently skips unparsable entries).
#[derive(Debug, Error)]
pub enum DtaError {
    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("sql parse error: {0}")]
    Parse(#[from] sqlparser::parser::ParserError),

    #[error("cost estimation failed: {0}")]
    Estimation(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("query execution error: {0}")]
    Execution(String),

    #[error("hypothetical index extension error: {0}")]
    HypotheticalIndex(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl DtaError {
    /// True for failures that invalidate the underlying connection pool, as
    /// opposed to failures local to a single query.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, DtaError::Connection(_))
    }
}

impl From<tokio_postgres::Error> for DtaError {
    fn from(err: tokio_postgres::Error) -> Self {
        if err.is_closed() {
            DtaError::Connection(err.to_string())
        } else {
            DtaError::Execution(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_errors_are_flagged() {
        let err = DtaError::Connection("reset by peer".to_string());
        assert!(err.is_connection_error());

        let err = DtaError::Execution("syntax error".to_string());
        assert!(!err.is_connection_error());
    }
}
