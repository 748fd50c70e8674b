//! Indexable-column extraction: walks a parsed statement and attributes every
//! column reference found in `WHERE`, `JOIN ... ON`, `HAVING`, and `ORDER BY`
//! to the table(s) it could benefit an index on.
//!
//! Alias resolution uses an explicit per-query-nesting-level scope rather than
//! AST node identity, so an inner and outer query can reuse the same alias or
//! projection name without one level's resolution leaking into the other.

use super::expr_is_simple_column;
use sqlparser::ast::{
    Expr, FunctionArg, FunctionArgExpr, FunctionArguments, Join, JoinConstraint, JoinOperator,
    OrderByExpr, Query, Select, SelectItem, SetExpr, Statement, TableFactor, TableWithJoins,
};
use std::collections::HashMap;

/// Per-level resolution context: which tables are in scope (alias or bare
/// name -> real table name) and which projection aliases resolve to which
/// expression, at this query-nesting depth only.
struct Scope<'a> {
    tables: Vec<String>,
    table_aliases: HashMap<String, String>,
    projection_aliases: HashMap<String, &'a Expr>,
}

/// Entry point: returns, per table, the set of columns referenced in an
/// indexable position anywhere in the statement.
pub fn extract_indexable_columns(statement: &Statement) -> HashMap<String, std::collections::HashSet<String>> {
    let mut result: HashMap<String, std::collections::HashSet<String>> = HashMap::new();
    if let Statement::Query(query) = statement {
        collect_query(query, &mut result);
    }
    result
}

fn collect_query(query: &Query, result: &mut HashMap<String, std::collections::HashSet<String>>) {
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            collect_query(&cte.query, result);
        }
    }

    let order_by_exprs: Vec<&Expr> = query
        .order_by
        .as_ref()
        .map(|ob| order_by_exprs(ob))
        .unwrap_or_default();

    collect_set_expr(&query.body, &order_by_exprs, result);
}

fn order_by_exprs(order_by: &sqlparser::ast::OrderBy) -> Vec<&Expr> {
    match &order_by.kind {
        sqlparser::ast::OrderByKind::Expressions(exprs) => {
            exprs.iter().map(|e: &OrderByExpr| &e.expr).collect()
        }
        _ => Vec::new(),
    }
}

fn collect_set_expr(
    body: &SetExpr,
    order_by_exprs: &[&Expr],
    result: &mut HashMap<String, std::collections::HashSet<String>>,
) {
    match body {
        SetExpr::Select(select) => collect_select(select, order_by_exprs, result),
        SetExpr::Query(q) => collect_query(q, result),
        SetExpr::SetOperation { left, right, .. } => {
            collect_set_expr(left, &[], result);
            collect_set_expr(right, &[], result);
        }
        _ => {}
    }
}

fn collect_select(
    select: &Select,
    order_by_exprs: &[&Expr],
    result: &mut HashMap<String, std::collections::HashSet<String>>,
) {
    let mut tables = Vec::new();
    let mut table_aliases = HashMap::new();
    for twj in &select.from {
        gather_tables(twj, &mut tables, &mut table_aliases, result);
    }

    let mut projection_aliases = HashMap::new();
    for item in &select.projection {
        if let SelectItem::ExprWithAlias { expr, alias } = item {
            projection_aliases.insert(alias.value.clone(), expr);
        }
    }

    let scope = Scope {
        tables,
        table_aliases,
        projection_aliases,
    };

    if let Some(selection) = &select.selection {
        walk_expr(selection, true, &scope, result);
    }

    for twj in &select.from {
        for join in &twj.joins {
            if let Some(constraint_expr) = join_constraint_expr(join) {
                walk_expr(constraint_expr, true, &scope, result);
            }
            if let TableFactor::Derived { subquery, .. } = &join.relation {
                collect_query(subquery, result);
            }
        }
        if let TableFactor::Derived { subquery, .. } = &twj.relation {
            collect_query(subquery, result);
        }
    }

    if let Some(having) = &select.having {
        walk_expr(having, true, &scope, result);
    }

    for expr in order_by_exprs {
        walk_expr(expr, true, &scope, result);
    }
}

fn join_constraint_expr(join: &Join) -> Option<&Expr> {
    let constraint = match &join.join_operator {
        JoinOperator::Inner(c)
        | JoinOperator::LeftOuter(c)
        | JoinOperator::RightOuter(c)
        | JoinOperator::FullOuter(c) => Some(c),
        _ => None,
    }?;
    match constraint {
        JoinConstraint::On(expr) => Some(expr),
        _ => None,
    }
}

fn gather_tables(
    twj: &TableWithJoins,
    tables: &mut Vec<String>,
    table_aliases: &mut HashMap<String, String>,
    result: &mut HashMap<String, std::collections::HashSet<String>>,
) {
    register_factor(&twj.relation, tables, table_aliases);
    for join in &twj.joins {
        register_factor(&join.relation, tables, table_aliases);
    }
    // Ensure every referenced table has an entry even if no column is ever
    // attributed to it, so downstream consumers can tell "no indexable
    // columns" from "table never seen".
    for t in tables.iter() {
        result.entry(t.clone()).or_default();
    }
}

fn register_factor(
    factor: &TableFactor,
    tables: &mut Vec<String>,
    table_aliases: &mut HashMap<String, String>,
) {
    if let TableFactor::Table { name, alias, .. } = factor {
        let real_name = name
            .0
            .last()
            .map(|i| i.value.clone())
            .unwrap_or_default();
        if let Some(alias) = alias {
            table_aliases.insert(alias.name.value.clone(), real_name.clone());
        }
        table_aliases.insert(real_name.clone(), real_name.clone());
        tables.push(real_name);
    }
}

fn walk_expr(
    expr: &Expr,
    in_condition: bool,
    scope: &Scope,
    result: &mut HashMap<String, std::collections::HashSet<String>>,
) {
    if !in_condition {
        return;
    }

    if let Some((qualifier, column)) = expr_is_simple_column(expr) {
        match qualifier {
            Some(alias_or_table) => {
                let real_table = scope
                    .table_aliases
                    .get(&alias_or_table)
                    .cloned()
                    .unwrap_or(alias_or_table);
                result.entry(real_table).or_default().insert(column);
            }
            None => {
                if let Some(aliased_expr) = scope.projection_aliases.get(&column) {
                    walk_expr(aliased_expr, true, scope, result);
                } else {
                    for table in &scope.tables {
                        result.entry(table.clone()).or_default().insert(column.clone());
                    }
                }
            }
        }
        return;
    }

    match expr {
        Expr::BinaryOp { left, right, .. } => {
            walk_expr(left, true, scope, result);
            walk_expr(right, true, scope, result);
        }
        Expr::UnaryOp { expr, .. } => walk_expr(expr, true, scope, result),
        Expr::Nested(inner) => walk_expr(inner, true, scope, result),
        Expr::IsNull(inner) | Expr::IsNotNull(inner) => walk_expr(inner, true, scope, result),
        Expr::InList { expr, list, .. } => {
            walk_expr(expr, true, scope, result);
            for item in list {
                walk_expr(item, true, scope, result);
            }
        }
        Expr::Between {
            expr, low, high, ..
        } => {
            walk_expr(expr, true, scope, result);
            walk_expr(low, true, scope, result);
            walk_expr(high, true, scope, result);
        }
        Expr::Like { expr, pattern, .. } | Expr::ILike { expr, pattern, .. } => {
            walk_expr(expr, true, scope, result);
            walk_expr(pattern, true, scope, result);
        }
        Expr::Subquery(q) | Expr::Exists { subquery: q, .. } => {
            collect_query(q, result);
        }
        Expr::InSubquery { expr, subquery, .. } => {
            walk_expr(expr, true, scope, result);
            collect_query(subquery, result);
        }
        Expr::Function(func) => {
            if let FunctionArguments::List(list) = &func.args {
                for arg in &list.args {
                    if let FunctionArg::Unnamed(FunctionArgExpr::Expr(e))
                    | FunctionArg::Named {
                        arg: FunctionArgExpr::Expr(e),
                        ..
                    } = arg
                    {
                        walk_expr(e, true, scope, result);
                    }
                }
            }
        }
        Expr::Case {
            conditions,
            else_result,
            ..
        } => {
            for when in conditions {
                walk_expr(&when.condition, true, scope, result);
                walk_expr(&when.result, true, scope, result);
            }
            if let Some(else_result) = else_result {
                walk_expr(else_result, true, scope, result);
            }
        }
        Expr::Cast { expr, .. } => walk_expr(expr, true, scope, result),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::SqlParser;

    fn columns_for(sql: &str) -> HashMap<String, std::collections::HashSet<String>> {
        let parser = SqlParser::new();
        let stmt = parser.parse(sql).unwrap();
        extract_indexable_columns(&stmt)
    }

    #[test]
    fn collects_where_columns() {
        let cols = columns_for("select * from users where email = 'x'");
        assert!(cols["users"].contains("email"));
    }

    #[test]
    fn collects_join_on_columns() {
        let cols = columns_for("select * from orders o join users u on o.user_id = u.id");
        assert!(cols["orders"].contains("user_id"));
        assert!(cols["users"].contains("id"));
    }

    #[test]
    fn collects_order_by_columns() {
        let cols = columns_for("select * from users order by created_at");
        assert!(cols["users"].contains("created_at"));
    }

    #[test]
    fn unqualified_column_attributed_to_all_tables_in_scope() {
        let cols = columns_for("select * from orders, users where status = 'open'");
        assert!(cols["orders"].contains("status"));
        assert!(cols["users"].contains("status"));
    }

    #[test]
    fn projection_alias_resolved_before_extraction_in_order_by() {
        let cols = columns_for("select region as r from sales order by r");
        assert!(cols["sales"].contains("region"));
    }

    #[test]
    fn qualified_reference_resolves_through_alias() {
        let cols = columns_for("select * from users u where u.email = 'x'");
        assert!(cols["users"].contains("email"));
    }
}
