//! Schema CLI commands
//!
//! Creates audit tables for raw source table names.

use clap::Args;

use crate::config::AuditSettings;
use crate::error::AuditResult;
use crate::schema::provision_table;
use crate::storage::{AuditStore, TableNaming};

/// Arguments of `provision`
#[derive(Args, Debug)]
pub struct ProvisionArgs {
    /// Source table names
    #[arg(required = true)]
    pub tables: Vec<String>,
    /// Schema of the source tables
    #[arg(short, long)]
    pub schema: Option<String>,
}

/// Handle `provision`
pub fn handle_provision(
    store: &mut dyn AuditStore,
    settings: &AuditSettings,
    args: ProvisionArgs,
) -> AuditResult<()> {
    let naming = TableNaming::from_settings(settings);

    for source in &args.tables {
        let result = provision_table(&mut *store, &naming, args.schema.as_deref(), source)?;
        if result.created {
            println!("Created audit table: {}", result.table);
        } else {
            println!("Audit table already exists: {}", result.table);
        }
    }
    Ok(())
}
