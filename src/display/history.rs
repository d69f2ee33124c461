//! Audit history display formatting
//!
//! Renders audit rows as tables, single-row detail views, and one-line
//! human-readable change summaries.

use serde_json::Value;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::audit::ActionKind;
use crate::reader::AuditPage;
use crate::storage::{AuditRow, AuditTableName, TIMESTAMP_FORMAT};

/// Longest string shown in a change summary before truncation
const MAX_VALUE_CHARS: usize = 50;

#[derive(Tabled)]
struct HistoryLine {
    #[tabled(rename = "ID")]
    id: i64,
    #[tabled(rename = "Type")]
    action: String,
    #[tabled(rename = "Object")]
    object_id: String,
    #[tabled(rename = "Changer")]
    changer: String,
    #[tabled(rename = "When")]
    created_at: String,
    #[tabled(rename = "Changes")]
    changes: String,
}

impl From<&AuditRow> for HistoryLine {
    fn from(row: &AuditRow) -> Self {
        Self {
            id: row.id,
            action: row.action.code().to_string(),
            object_id: row.object_id.clone(),
            changer: row.changer.clone().unwrap_or_else(|| "-".to_string()),
            created_at: row.created_at.format(TIMESTAMP_FORMAT).to_string(),
            changes: summarize_change(row.action, row.diff.as_ref()),
        }
    }
}

#[derive(Tabled)]
struct TableLine {
    #[tabled(rename = "Audit table")]
    table: String,
    #[tabled(rename = "Rows")]
    rows: usize,
}

/// Format one page of history as a table with a paging footer
pub fn format_history(table: &AuditTableName, page: &AuditPage) -> String {
    if page.rows.is_empty() {
        return format!("No audit entries found in {}.", table);
    }

    let lines: Vec<HistoryLine> = page.rows.iter().map(HistoryLine::from).collect();
    let mut output = Table::new(lines).with(Style::rounded()).to_string();
    output.push('\n');
    output.push_str(&format!(
        "Page {} of {} ({} entries)\n",
        page.page,
        page.total_pages(),
        page.total
    ));
    output
}

/// Format audit tables with their row counts
pub fn format_table_list(tables: &[(AuditTableName, usize)]) -> String {
    if tables.is_empty() {
        return "No audit tables found.".to_string();
    }

    let lines: Vec<TableLine> = tables
        .iter()
        .map(|(table, rows)| TableLine {
            table: table.to_string(),
            rows: *rows,
        })
        .collect();
    Table::new(lines).with(Style::rounded()).to_string()
}

/// Format a single audit row with its full payload
pub fn format_row_details(table: &AuditTableName, row: &AuditRow) -> String {
    let mut output = String::new();

    output.push_str(&format!("Audit entry #{} in {}\n", row.id, table));
    output.push_str(&format!(
        "  Type:     {} ({})\n",
        row.action.code(),
        row.action.label()
    ));
    output.push_str(&format!("  Object:   {}\n", row.object_id));
    output.push_str(&format!(
        "  Changer:  {}\n",
        row.changer.as_deref().unwrap_or("-")
    ));
    output.push_str(&format!(
        "  When:     {}\n",
        row.created_at.format(TIMESTAMP_FORMAT)
    ));
    output.push_str(&format!(
        "  Summary:  {}\n",
        summarize_change(row.action, row.diff.as_ref())
    ));

    if let Some(diff) = &row.diff {
        let pretty = serde_json::to_string_pretty(diff).unwrap_or_else(|_| diff.to_string());
        output.push_str("\nPayload:\n");
        for line in pretty.lines() {
            output.push_str(&format!("  {}\n", line));
        }
    }

    output
}

/// One-line description of a stored change payload
pub fn summarize_change(action: ActionKind, diff: Option<&Value>) -> String {
    let Some(diff) = diff else {
        return "(no payload)".to_string();
    };

    match action {
        ActionKind::Insert => describe_fields(diff, |field, _, new| {
            format!("{} = {}", field, format_value(new))
        }),
        ActionKind::Update => describe_fields(diff, |field, old, new| {
            format!("{}: {} -> {}", field, format_value(old), format_value(new))
        }),
        ActionKind::Delete => match diff.as_object() {
            Some(fields) => format!("{} fields captured", fields.len()),
            None => format_value(diff),
        },
        ActionKind::Associate => describe_relation(diff, "->"),
        ActionKind::Dissociate => describe_relation(diff, "-x-"),
    }
}

fn describe_fields<F>(diff: &Value, describe: F) -> String
where
    F: Fn(&str, &Value, &Value) -> String,
{
    let Some(fields) = diff.as_object() else {
        return format_value(diff);
    };
    if fields.is_empty() {
        return "(no field changes)".to_string();
    }

    fields
        .iter()
        .map(|(field, change)| {
            let old = change.get("old").unwrap_or(&Value::Null);
            let new = change.get("new").unwrap_or(&Value::Null);
            describe(field, old, new)
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn describe_relation(diff: &Value, arrow: &str) -> String {
    let label = |end: &str| {
        diff.get(end)
            .and_then(|summary| summary.get("label"))
            .and_then(Value::as_str)
            .unwrap_or("?")
            .to_string()
    };

    let mut output = format!("{} {} {}", label("source"), arrow, label("target"));
    if let Some(table) = diff.get("table").and_then(Value::as_str) {
        output.push_str(&format!(" (via {})", table));
    }
    output
}

/// Format a JSON value for human-readable display
fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => {
            if s.chars().count() > MAX_VALUE_CHARS {
                let head: String = s.chars().take(MAX_VALUE_CHARS - 3).collect();
                format!("\"{}...\"", head)
            } else {
                format!("\"{}\"", s)
            }
        }
        Value::Array(arr) => format!("[{} items]", arr.len()),
        Value::Object(obj) => format!("{{{} fields}}", obj.len()),
    }
}
