use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use audit_trail::cli::{
    handle_history, handle_provision, handle_show, handle_tables, HistoryArgs, ProvisionArgs,
    ShowArgs,
};
use audit_trail::config::{AuditPaths, AuditSettings};
use audit_trail::storage::open_store;

/// Environment variable holding the log filter
const LOG_ENV_VAR: &str = "AUDIT_TRAIL_LOG";

#[derive(Parser)]
#[command(
    name = "audit-trail",
    author = "Kaylee Beyene",
    version,
    about = "Field-level audit trail for unit-of-work persistence layers",
    long_about = "audit-trail records every insert, update, delete and relation change \
                  of audited entities into per-table audit tables. This tool sets up \
                  the audit store and browses the recorded history."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write default settings and create the audit store
    Init,

    /// Show current configuration and paths
    Config,

    /// Create audit tables for source tables
    Provision(ProvisionArgs),

    /// List audit tables with their row counts
    Tables,

    /// Show the audit history of a source table
    #[command(alias = "log")]
    History(HistoryArgs),

    /// Show a single audit entry
    Show(ShowArgs),
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let paths = AuditPaths::new()?;
    let settings = AuditSettings::load_or_create(&paths)?;
    let store_path = settings.storage_path(&paths);

    match cli.command {
        Some(Commands::Init) => {
            println!("Initializing audit-trail at: {}", paths.base_dir().display());
            settings.save(&paths)?;
            open_store(&settings, &store_path)?;
            println!("Initialization complete!");
            println!();
            println!("Settings:    {}", paths.settings_file().display());
            println!("Audit store: {}", store_path.display());
            println!();
            println!("List audited classes under \"entities\" in the settings file,");
            println!("then run 'audit-trail provision <table>...' to create audit tables.");
        }
        Some(Commands::Config) => {
            println!("audit-trail Configuration");
            println!("=========================");
            println!("Base directory: {}", paths.base_dir().display());
            println!("Settings file:  {}", paths.settings_file().display());
            println!("Audit store:    {}", store_path.display());
            println!(
                "Initialized:    {}",
                if paths.is_initialized() { "yes" } else { "no" }
            );
            println!();
            println!("Settings:");
            println!("  Storage backend:  {:?}", settings.storage.backend);
            println!("  Table prefix:     {:?}", settings.table_prefix);
            println!("  Table suffix:     {:?}", settings.table_suffix);
            println!("  Page size:        {}", settings.page_size);
            println!("  Ignored columns:  {}", settings.ignored_columns.join(", "));
            println!("  Audited entities: {}", settings.entities.len());
            for (class, entity) in &settings.entities {
                let state = if entity.enabled { "enabled" } else { "disabled" };
                println!("    {} ({})", class, state);
            }
        }
        Some(Commands::Provision(args)) => {
            let mut store = open_store(&settings, &store_path)?;
            handle_provision(store.as_mut(), &settings, args)?;
        }
        Some(Commands::Tables) => {
            let store = open_store(&settings, &store_path)?;
            handle_tables(store.as_ref())?;
        }
        Some(Commands::History(args)) => {
            let store = open_store(&settings, &store_path)?;
            handle_history(store.as_ref(), &settings, args)?;
        }
        Some(Commands::Show(args)) => {
            let store = open_store(&settings, &store_path)?;
            handle_show(store.as_ref(), &settings, args)?;
        }
        None => {
            println!("audit-trail - field-level audit trail");
            println!();
            println!("Run 'audit-trail --help' for usage information.");
        }
    }

    Ok(())
}
