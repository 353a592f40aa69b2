//! Schema reconciliation and vector-extension bootstrap for Postgres.
//!
//! This crate provides:
//! - A declarative [`SchemaBuilder`] that turns table declarations into a
//!   [`DatabaseSchema`], with authoring mistakes collected as warnings
//! - A schema differ that compares a declared schema against a live one and
//!   plans an ordered list of [`DiffAction`]s
//! - A [`DatabaseService`] that runs the startup sequence: Postgres version
//!   check, vector extension reconciliation, migrations, reindexing
//!
//! # Naming Convention
//!
//! The **source** schema is the one the application declares; the
//! **target** schema is the one found in the database. An object that only
//! exists in the source is "missing in target" and gets created; an object
//! that only exists in the target is "missing in source" and gets dropped.
//!
//! # Planning migrations
//!
//! ```
//! use keel::{ColumnDecl, SchemaBuilder, TableDecl, schema_diff};
//!
//! let declared = SchemaBuilder::new("immich", "public")
//!     .table(
//!         TableDecl::new("User")
//!             .column(ColumnDecl::new("id", "uuid").primary())
//!             .column(ColumnDecl::new("email", "character varying")),
//!     )
//!     .build();
//!
//! let live = keel::DatabaseSchema::default();
//! let diff = schema_diff(&declared, &live);
//! assert_eq!(diff.items[0].name(), "TableCreate");
//! ```

mod action;
pub mod bootstrap;
pub mod builder;
pub mod compare;
pub mod config;
mod diff;
mod error;
pub mod extension;
pub mod postgres;
pub mod repository;
pub mod solver;
mod sql;
mod validate;
pub mod version;

pub use action::{ColumnChanges, DiffAction, Reason};
pub use bootstrap::{BootstrapOptions, DatabaseService};
pub use builder::{
    ColumnDecl, ForeignKeyDecl, IndexDecl, SchemaBuilder, TableDecl, TableRef, TriggerDecl,
    to_snake_case,
};
pub use config::{ConfigError, Connection, DatabaseConfig};
pub use diff::{DiffOptions, SchemaDiff, schema_diff, schema_diff_with};
pub use error::Error;
pub use extension::{VectorExtension, VectorIndex};
pub use postgres::PgDatabase;
pub use repository::{DatabaseRepository, ExtensionUpdate, ExtensionVersion};
pub use solver::{SolverError, verify_order};
pub use validate::Validator;

// Re-export the schema model for convenience
pub use keel_schema::*;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Tracing target for the startup sequence.
pub const TRACING_TARGET_BOOTSTRAP: &str = "keel::bootstrap";

/// Tracing target for vector extension management and reindexing.
pub const TRACING_TARGET_EXTENSION: &str = "keel::extension";

/// Tracing target for migration planning and execution.
pub const TRACING_TARGET_MIGRATION: &str = "keel::migration";

/// Tracing target for individual queries.
pub const TRACING_TARGET_QUERY: &str = "keel::query";
