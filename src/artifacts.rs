//! Human-readable rendering of EXPLAIN plans: a recursive plan-tree
//! formatter and a before/after unified diff, supplementing the session
//! trace with the same presentation the reference implementation's
//! artifacts module produces.

use serde_json::Value;
use std::fmt::Write as _;

/// Formats a JSON plan (as returned by `EXPLAIN (FORMAT JSON)`) into an
/// indented, human-readable summary.
pub fn format_plan_summary(plan_data: &Value) -> String {
    let Some(plan) = plan_data.get("Plan") else {
        return String::new();
    };
    let mut output = Vec::new();
    format_plan_node(plan, &mut output, 0);
    output.join("\n")
}

fn format_plan_node(node: &Value, output: &mut Vec<String>, depth: usize) {
    let indent = "  ".repeat(depth);
    let node_type = node
        .get("Node Type")
        .and_then(Value::as_str)
        .unwrap_or("Unknown");
    let startup_cost = node.get("Startup Cost").and_then(Value::as_f64).unwrap_or(0.0);
    let total_cost = node.get("Total Cost").and_then(Value::as_f64).unwrap_or(0.0);
    let rows = node.get("Plan Rows").and_then(Value::as_i64).unwrap_or(0);
    let width = node.get("Plan Width").and_then(Value::as_i64).unwrap_or(0);

    let mut line = format!("{indent}-> {node_type}");
    let _ = write!(
        line,
        " (cost={startup_cost:.2}..{total_cost:.2} rows={rows} width={width})"
    );

    let filter = node.get("Filter").and_then(Value::as_str);

    match node_type {
        "Seq Scan" => {
            let relation = node.get("Relation Name").and_then(Value::as_str).unwrap_or("");
            let _ = write!(line, " on {relation}");
            if let Some(filter) = filter {
                output.push(line);
                output.push(format!("{indent}   Filter: {filter}"));
                return;
            }
        }
        "Index Scan" | "Index Only Scan" => {
            let relation = node.get("Relation Name").and_then(Value::as_str).unwrap_or("");
            let index_name = node.get("Index Name").and_then(Value::as_str).unwrap_or("");
            let _ = write!(line, " on {relation} using {index_name}");
            if let Some(filter) = filter {
                output.push(line);
                output.push(format!("{indent}   Filter: {filter}"));
                return;
            }
        }
        _ => {}
    }

    output.push(line);

    if let Some(children) = node.get("Plans").and_then(Value::as_array) {
        for child in children {
            format_plan_node(child, output, depth + 1);
        }
    }
}

/// A minimal unified diff between two formatted plan summaries, line by
/// line; not a general-purpose diff algorithm, just enough to show what
/// changed between a before and an after plan in the session trace.
pub fn plan_diff(before_plan: &Value, after_plan: &Value) -> String {
    let before = format_plan_summary(before_plan);
    let after = format_plan_summary(after_plan);
    if before == after {
        return String::new();
    }

    let before_lines: Vec<&str> = before.lines().collect();
    let after_lines: Vec<&str> = after.lines().collect();

    let mut out = vec!["--- before".to_string(), "+++ after".to_string()];
    for line in &before_lines {
        if !after_lines.contains(line) {
            out.push(format!("-{line}"));
        }
    }
    for line in &after_lines {
        if !before_lines.contains(line) {
            out.push(format!("+{line}"));
        }
    }
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn formats_seq_scan_with_filter() {
        let plan = json!({
            "Plan": {
                "Node Type": "Seq Scan",
                "Relation Name": "users",
                "Startup Cost": 0.0,
                "Total Cost": 100.0,
                "Plan Rows": 10,
                "Plan Width": 8,
                "Filter": "(email = 'x'::text)"
            }
        });
        let summary = format_plan_summary(&plan);
        assert!(summary.contains("Seq Scan"));
        assert!(summary.contains("on users"));
        assert!(summary.contains("Filter:"));
    }

    #[test]
    fn empty_plan_data_formats_to_empty_string() {
        assert_eq!(format_plan_summary(&json!({})), "");
    }

    #[test]
    fn diff_is_empty_for_identical_plans() {
        let plan = json!({"Plan": {"Node Type": "Seq Scan", "Relation Name": "t"}});
        assert_eq!(plan_diff(&plan, &plan), "");
    }
}
