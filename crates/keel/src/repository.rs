//! The database primitives the bootstrap sequence is built on.

use std::future::Future;

use crate::Result;
use crate::extension::{VectorExtension, VectorIndex};

/// One row of the extension catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionVersion {
    pub name: VectorExtension,
    /// The version `CREATE EXTENSION` would install.
    pub available_version: String,
    /// The version currently installed in the database, if any.
    pub installed_version: Option<String>,
}

/// Outcome of an extension update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtensionUpdate {
    /// The new version only takes effect after Postgres restarts.
    pub restart_required: bool,
}

/// Raw schema and version operations against one database.
///
/// Implemented by [`PgDatabase`](crate::postgres::PgDatabase) for a live
/// server. Each method is a single step; sequencing lives in
/// [`DatabaseService`](crate::bootstrap::DatabaseService).
pub trait DatabaseRepository: Send + Sync {
    /// The server version string (`SHOW server_version`).
    fn postgres_version(&self) -> impl Future<Output = Result<String>> + Send;

    /// The vector extension this application uses: configured, else
    /// installed, else the default.
    fn vector_extension(&self) -> impl Future<Output = Result<VectorExtension>> + Send;

    /// The supported version range for `extension`, in semver syntax.
    fn extension_version_range(&self, extension: VectorExtension) -> String {
        extension.version_range().to_string()
    }

    /// Catalog rows for the given extensions. Extensions the server does not
    /// ship are absent from the result.
    fn extension_versions(
        &self,
        extensions: &[VectorExtension],
    ) -> impl Future<Output = Result<Vec<ExtensionVersion>>> + Send;

    fn create_extension(
        &self,
        extension: VectorExtension,
    ) -> impl Future<Output = Result<()>> + Send;

    fn update_vector_extension(
        &self,
        extension: VectorExtension,
        target_version: &str,
    ) -> impl Future<Output = Result<ExtensionUpdate>> + Send;

    fn drop_extension(&self, extension: VectorExtension)
    -> impl Future<Output = Result<()>> + Send;

    /// Bring the database schema in line with the application schema.
    fn run_migrations(&self) -> impl Future<Output = Result<()>> + Send;

    /// Rebuild the given embedding indexes where they are missing or do not
    /// match the active extension.
    fn reindex_vectors_if_needed(
        &self,
        indexes: &[VectorIndex],
    ) -> impl Future<Output = Result<()>> + Send;
}
