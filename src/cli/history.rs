//! History CLI commands
//!
//! Read-only commands over the audit store: audit table listing, paginated
//! history and single entries.

use clap::Args;

use crate::audit::ActionKind;
use crate::config::AuditSettings;
use crate::display::history::{format_history, format_row_details, format_table_list};
use crate::error::{AuditError, AuditResult};
use crate::reader::AuditReader;
use crate::storage::{AuditQuery, AuditStore, AuditTableName, TableNaming};

/// Arguments of `history`
#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Source table name (its audit table is derived from prefix and suffix)
    pub table: String,
    /// Schema of the source table
    #[arg(short, long)]
    pub schema: Option<String>,
    /// Only entries of this object id
    #[arg(short, long)]
    pub id: Option<String>,
    /// Only entries of this type (INS, UPD, DEL, CASC, CDSC or insert, update, ...)
    #[arg(short = 't', long = "type")]
    pub action: Option<String>,
    /// Page number, starting at 1
    #[arg(short, long, default_value = "1")]
    pub page: usize,
    /// Entries per page (defaults to the configured page size)
    #[arg(long)]
    pub page_size: Option<usize>,
    /// Print the page as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments of `show`
#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Source table name
    pub table: String,
    /// Audit row id
    pub row_id: i64,
    /// Schema of the source table
    #[arg(short, long)]
    pub schema: Option<String>,
    /// Print the entry as JSON
    #[arg(long)]
    pub json: bool,
}

/// Handle `history`
pub fn handle_history(
    store: &dyn AuditStore,
    settings: &AuditSettings,
    args: HistoryArgs,
) -> AuditResult<()> {
    let naming = TableNaming::from_settings(settings);
    let table = naming.audit_table(args.schema.as_deref(), &args.table);
    let action = parse_action(args.action.as_deref())?;
    let page_size = args.page_size.unwrap_or(settings.page_size);

    let reader = AuditReader::new(store, naming).filter_by(action);
    let page = reader.table_pager(&table, args.id.as_deref(), args.page, page_size)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&page)?);
    } else {
        println!("{}", format_history(&table, &page));
    }
    Ok(())
}

/// Handle `show`
pub fn handle_show(store: &dyn AuditStore, settings: &AuditSettings, args: ShowArgs) -> AuditResult<()> {
    let naming = TableNaming::from_settings(settings);
    let table = naming.audit_table(args.schema.as_deref(), &args.table);

    let reader = AuditReader::new(store, naming);
    let row = reader.table_audit(&table, args.row_id)?.ok_or_else(|| {
        AuditError::Validation(format!("No audit entry #{} in {}", args.row_id, table))
    })?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&row)?);
    } else {
        print!("{}", format_row_details(&table, &row));
    }
    Ok(())
}

/// Handle `tables`
pub fn handle_tables(store: &dyn AuditStore) -> AuditResult<()> {
    let mut tables: Vec<(AuditTableName, usize)> = Vec::new();
    for table in store.tables()? {
        let rows = store.count(&table, &AuditQuery::new())?;
        tables.push((table, rows));
    }
    println!("{}", format_table_list(&tables));
    Ok(())
}

fn parse_action(action: Option<&str>) -> AuditResult<Option<ActionKind>> {
    action.map(|s| s.parse::<ActionKind>()).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_action() {
        assert_eq!(parse_action(None).unwrap(), None);
        assert_eq!(parse_action(Some("UPD")).unwrap(), Some(ActionKind::Update));
        assert_eq!(
            parse_action(Some("dissociate")).unwrap(),
            Some(ActionKind::Dissociate)
        );
        assert!(matches!(
            parse_action(Some("bogus")),
            Err(AuditError::Validation(_))
        ));
    }
}
