use thiserror::Error;

use crate::config::ConfigError;
use crate::extension::VectorExtension;
use crate::solver::SolverError;

/// Errors surfaced by the database bootstrap and the Postgres collaborator.
///
/// The `Display` output of the extension and version variants is read by
/// operators in the startup log, so the wording is stable.
#[derive(Debug, Error)]
pub enum Error {
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Any other failure reported by a database primitive.
    #[error("{0}")]
    Database(String),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("migration plan cannot be applied: {0}")]
    Solver(#[from] SolverError),

    #[error(
        "Invalid PostgreSQL version. Found {found}, but needed {required}. Please use a supported version."
    )]
    UnsupportedDatabaseVersion { found: String, required: String },

    #[error(
        "The {name} extension is not available in this Postgres instance. If using a container image, ensure the image has the extension installed."
    )]
    ExtensionUnavailable { name: &'static str },

    #[error("The {name} extension version is {version}, but Immich only supports {range}.")]
    ExtensionVersionOutOfRange {
        name: &'static str,
        version: String,
        range: String,
    },

    #[error("The {name} extension version is {version}, which means it is a nightly release.")]
    ExtensionVersionIsNightly { name: &'static str, version: String },

    #[error(
        "The database currently has {name} {installed} activated, but the Postgres instance only has {available} available."
    )]
    ExtensionDowngradeDetected {
        name: &'static str,
        installed: String,
        available: String,
    },

    /// Creating the vector extension failed; the original failure is kept verbatim.
    #[error("{source}")]
    ExtensionCreateFailed {
        extension: VectorExtension,
        source: Box<Error>,
    },

    /// Updating the vector extension failed; the original failure is kept verbatim.
    #[error("{source}")]
    ExtensionUpdateFailed {
        extension: VectorExtension,
        version: String,
        source: Box<Error>,
    },

    #[error("could not drop unused extension {extension}: {source}")]
    ExtensionDropFailed {
        extension: VectorExtension,
        source: Box<Error>,
    },

    #[error("vector reindexing failed: {source}")]
    ReindexFailed { source: Box<Error> },
}

impl Error {
    /// Whether this error aborts the bootstrap sequence.
    ///
    /// Dropping an unused extension and reindexing are best-effort; every
    /// other failure is fatal.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Error::ExtensionDropFailed { .. } | Error::ReindexFailed { .. }
        )
    }
}
