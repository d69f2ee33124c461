//! Display formatting for terminal output
//!
//! Renders audit history, audit tables and single audit entries.

pub mod history;

pub use history::{format_history, format_row_details, format_table_list, summarize_change};
