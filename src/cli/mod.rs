//! CLI command handlers
//!
//! Bridges the clap argument parsing with the reader and the schema
//! provisioning.

pub mod history;
pub mod schema;

pub use history::{handle_history, handle_show, handle_tables, HistoryArgs, ShowArgs};
pub use schema::{handle_provision, ProvisionArgs};
