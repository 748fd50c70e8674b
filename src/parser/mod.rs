//! SQL parsing and semantic extraction.
//!
//! Turns raw query text into a normalized [`sqlparser`] AST and into the
//! per-table sets of columns that appear in positions an index could help:
//! `WHERE`, `JOIN ... ON`, `HAVING`, and `ORDER BY`.

mod extractor;

use crate::error::{DtaError, Result};
use regex::Regex;
use sqlparser::ast::{Expr, ObjectName, Query, SetExpr, Statement, TableFactor, TableWithJoins};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use std::collections::HashSet;

pub use extractor::extract_indexable_columns;

/// Prefixes that mark a table name as belonging to the system catalog rather
/// than user data.
const SYSTEM_PREFIXES: &[&str] = &["pg_", "aurora_", "information_schema"];

fn bind_marker_re() -> &'static Regex {
    static RE: once_cell::sync::OnceCell<Regex> = once_cell::sync::OnceCell::new();
    RE.get_or_init(|| Regex::new(r"\$(\d+)").expect("static regex"))
}

/// Parses SQL text against the Postgres dialect and reports whether it is an
/// analyzable, read-only statement.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqlParser;

impl SqlParser {
    pub fn new() -> Self {
        Self
    }

    /// Parses a single statement. Input is lowercased first as a
    /// normalization step matching the reference implementation.
    pub fn parse(&self, text: &str) -> Result<Statement> {
        let normalized = text.to_lowercase();
        let mut statements = Parser::parse_sql(&PostgreSqlDialect {}, &normalized)?;
        if statements.is_empty() {
            return Err(DtaError::Parse(sqlparser::parser::ParserError::ParserError(
                "empty statement".to_string(),
            )));
        }
        Ok(statements.remove(0))
    }

    /// Parses every `;`-delimited statement in a file's contents, skipping
    /// blank segments.
    pub fn parse_many(&self, text: &str) -> Vec<Result<Statement>> {
        text.split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| self.parse(s))
            .collect()
    }

    /// Replaces `$N` bind markers with typed dummy literals so the statement
    /// can be planned without generic-plan support. The integer-by-default
    /// fallback matches the reference implementation: without richer type
    /// information from the catalog, every marker becomes `1`.
    pub fn substitute_bind_params(&self, text: &str) -> String {
        bind_marker_re().replace_all(text, "1").to_string()
    }

    pub fn has_bind_variables(&self, text: &str) -> bool {
        bind_marker_re().is_match(text)
    }

    pub fn has_like_expression(&self, text: &str) -> bool {
        text.to_ascii_uppercase().contains("LIKE")
    }
}

/// Only `SELECT`-shaped statements are analyzable; everything else (DDL, DML,
/// control statements) is rejected up front.
pub fn is_analyzable_statement(statement: &Statement) -> bool {
    matches!(statement, Statement::Query(_))
}

/// Recursively collects every `(schema, table)` pair referenced anywhere in
/// the statement, including subqueries and CTEs.
pub fn extract_tables(statement: &Statement) -> HashSet<(Option<String>, String)> {
    let mut tables = HashSet::new();
    if let Statement::Query(query) = statement {
        collect_tables_in_query(query, &mut tables);
    }
    tables
}

fn collect_tables_in_query(query: &Query, tables: &mut HashSet<(Option<String>, String)>) {
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            collect_tables_in_query(&cte.query, tables);
        }
    }
    collect_tables_in_set_expr(&query.body, tables);
}

fn collect_tables_in_set_expr(body: &SetExpr, tables: &mut HashSet<(Option<String>, String)>) {
    match body {
        SetExpr::Select(select) => {
            for twj in &select.from {
                collect_tables_in_twj(twj, tables);
            }
        }
        SetExpr::Query(q) => collect_tables_in_query(q, tables),
        SetExpr::SetOperation { left, right, .. } => {
            collect_tables_in_set_expr(left, tables);
            collect_tables_in_set_expr(right, tables);
        }
        _ => {}
    }
}

fn collect_tables_in_twj(twj: &TableWithJoins, tables: &mut HashSet<(Option<String>, String)>) {
    collect_tables_in_factor(&twj.relation, tables);
    for join in &twj.joins {
        collect_tables_in_factor(&join.relation, tables);
    }
}

fn collect_tables_in_factor(factor: &TableFactor, tables: &mut HashSet<(Option<String>, String)>) {
    match factor {
        TableFactor::Table { name, .. } => {
            let (schema, table) = split_object_name(name);
            tables.insert((schema, table));
        }
        TableFactor::Derived { subquery, .. } => collect_tables_in_query(subquery, tables),
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => collect_tables_in_twj(table_with_joins, tables),
        _ => {}
    }
}

fn split_object_name(name: &ObjectName) -> (Option<String>, String) {
    let parts: Vec<String> = name.0.iter().map(|ident| ident.value.clone()).collect();
    match parts.len() {
        0 => (None, String::new()),
        1 => (None, parts[0].clone()),
        _ => (
            Some(parts[..parts.len() - 1].join(".")),
            parts[parts.len() - 1].clone(),
        ),
    }
}

/// True when every table referenced by the statement is a recognized system
/// catalog relation; such statements are rejected as non-analyzable even
/// though they may be syntactically valid `SELECT`s.
pub fn is_system_catalog_only(statement: &Statement) -> bool {
    let tables = extract_tables(statement);
    if tables.is_empty() {
        return false;
    }
    tables.iter().all(|(schema, table)| {
        let qualifies = |name: &str| SYSTEM_PREFIXES.iter().any(|p| name.starts_with(p));
        schema.as_deref().map(qualifies).unwrap_or(false) || qualifies(table)
    })
}

pub fn expr_is_simple_column(expr: &Expr) -> Option<(Option<String>, String)> {
    match expr {
        Expr::Identifier(ident) => Some((None, ident.value.clone())),
        Expr::CompoundIdentifier(parts) if parts.len() == 2 => {
            Some((Some(parts[0].value.clone()), parts[1].value.clone()))
        }
        Expr::Nested(inner) => expr_is_simple_column(inner),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_select() {
        let parser = SqlParser::new();
        let stmt = parser.parse("SELECT * FROM users WHERE email = 'x'").unwrap();
        assert!(is_analyzable_statement(&stmt));
    }

    #[test]
    fn rejects_non_select_statements() {
        let parser = SqlParser::new();
        let stmt = parser.parse("DELETE FROM users WHERE id = 1").unwrap();
        assert!(!is_analyzable_statement(&stmt));
    }

    #[test]
    fn extracts_tables_including_joins() {
        let parser = SqlParser::new();
        let stmt = parser
            .parse("SELECT * FROM orders o JOIN users u ON o.user_id = u.id")
            .unwrap();
        let tables = extract_tables(&stmt);
        let names: HashSet<String> = tables.into_iter().map(|(_, t)| t).collect();
        assert!(names.contains("orders"));
        assert!(names.contains("users"));
    }

    #[test]
    fn detects_system_catalog_only_queries() {
        let parser = SqlParser::new();
        let stmt = parser.parse("SELECT * FROM pg_stat_user_tables").unwrap();
        assert!(is_system_catalog_only(&stmt));

        let stmt = parser.parse("SELECT * FROM users").unwrap();
        assert!(!is_system_catalog_only(&stmt));
    }

    #[test]
    fn bind_marker_substitution_round_trips_non_bind_positions() {
        let parser = SqlParser::new();
        let original = "select * from users where id = $1 and name = 'bob'";
        let substituted = parser.substitute_bind_params(original);
        assert!(!parser.has_bind_variables(&substituted));
        assert!(substituted.contains("name = 'bob'"));
    }
}
