//! audit-trail - field-level audit trail for unit-of-work persistence layers
//!
//! This library records, for every audited entity, which fields changed,
//! from what to what, who changed them and when. It hooks into the two
//! phases of a host persistence layer's commit cycle: changes are captured
//! while the host flushes, and written to per-table audit tables after the
//! host has committed.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - `host`: The contract a persistence layer implements (entities,
//!   metadata, pending mutations), plus an in-memory reference host
//! - `audit`: Change collection, diffing, value normalization and the
//!   audit writer
//! - `policy`: Which classes and fields are audited, and who the actor is
//! - `storage`: SQLite and JSON-file audit stores
//! - `schema`: Audit table provisioning
//! - `reader`: Paginated read access to audit history
//! - `config`: Configuration and path management
//! - `display`: Terminal formatting of audit history
//! - `cli`: Command handlers of the `audit-trail` binary
//! - `error`: Custom error types
//!
//! # Example
//!
//! ```rust,ignore
//! use audit_trail::audit::{AuditSession, Auditor};
//! use audit_trail::config::{AuditPaths, AuditSettings};
//! use audit_trail::policy::ConfiguredPolicy;
//! use audit_trail::storage::open_store;
//!
//! let paths = AuditPaths::new()?;
//! let settings = AuditSettings::load_or_create(&paths)?;
//! let store = open_store(&settings, &settings.storage_path(&paths))?;
//! let mut auditor = Auditor::new(ConfiguredPolicy::new(settings), store);
//! ```

pub mod audit;
pub mod cli;
pub mod config;
pub mod display;
pub mod error;
pub mod host;
pub mod policy;
pub mod reader;
pub mod schema;
pub mod storage;

pub use error::{AuditError, AuditResult};
