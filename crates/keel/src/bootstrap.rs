//! The database startup sequence.
//!
//! [`DatabaseService::bootstrap`] runs, in order: the Postgres version check,
//! vector extension reconciliation (create, update, drop unused), migrations
//! and vector reindexing. Each step gates the next; a fatal failure stops the
//! sequence and is returned unchanged. Dropping unused extensions and
//! reindexing are best-effort and only log a warning when they fail.

use semver::{Version, VersionReq};
use tracing::{error, info, warn};

use crate::extension::{VectorExtension, VectorIndex};
use crate::repository::{DatabaseRepository, ExtensionVersion};
use crate::version::{RangeCheck, check_range, coerce_version};
use crate::{Error, Result, TRACING_TARGET_BOOTSTRAP, TRACING_TARGET_EXTENSION};

/// The Postgres server versions this application runs against.
pub const POSTGRES_VERSION_RANGE: &str = ">=14";

/// Knobs for [`DatabaseService::bootstrap`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BootstrapOptions {
    /// Leave the schema alone. Reindexing is skipped as well.
    pub skip_migrations: bool,
}

/// Runs the startup sequence against a [`DatabaseRepository`].
pub struct DatabaseService<R> {
    repository: R,
    options: BootstrapOptions,
}

impl<R: DatabaseRepository> DatabaseService<R> {
    pub fn new(repository: R, options: BootstrapOptions) -> Self {
        Self {
            repository,
            options,
        }
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    pub fn into_repository(self) -> R {
        self.repository
    }

    /// Bring the database to a state the application can start against.
    pub async fn bootstrap(&self) -> Result<()> {
        self.check_postgres_version().await?;

        let extension = self.repository.vector_extension().await?;
        let versions = self
            .repository
            .extension_versions(&VectorExtension::ALL)
            .await?;
        self.reconcile_extension(extension, &versions).await?;
        self.drop_unused_extensions(extension, &versions).await;

        if self.options.skip_migrations {
            info!(target: TRACING_TARGET_BOOTSTRAP, "Skipping migrations");
            return Ok(());
        }

        info!(target: TRACING_TARGET_BOOTSTRAP, "Running migrations");
        self.repository.run_migrations().await?;

        if let Err(err) = self
            .repository
            .reindex_vectors_if_needed(&VectorIndex::ALL)
            .await
        {
            let err = Error::ReindexFailed {
                source: Box::new(err),
            };
            warn!(
                target: TRACING_TARGET_EXTENSION,
                error = %err,
                "Could not run vector reindexing checks. If the extension was updated, please restart the Postgres instance."
            );
        }

        Ok(())
    }

    async fn check_postgres_version(&self) -> Result<()> {
        let found = self.repository.postgres_version().await?;
        let range = parse_range(POSTGRES_VERSION_RANGE)?;

        let unsupported = |found: String| Error::UnsupportedDatabaseVersion {
            found,
            required: POSTGRES_VERSION_RANGE.to_string(),
        };
        let version = coerce_version(&found).ok_or_else(|| unsupported(found.clone()))?;
        if !range.matches(&version) {
            return Err(unsupported(found));
        }

        info!(target: TRACING_TARGET_BOOTSTRAP, version = %version, "Postgres version is supported");
        Ok(())
    }

    async fn reconcile_extension(
        &self,
        extension: VectorExtension,
        versions: &[ExtensionVersion],
    ) -> Result<()> {
        let name = extension.display_name();
        let Some(record) = versions.iter().find(|v| v.name == extension) else {
            return Err(Error::ExtensionUnavailable { name });
        };

        let range_text = self.repository.extension_version_range(extension);
        let range = parse_range(&range_text)?;
        let out_of_range = |version: &str| Error::ExtensionVersionOutOfRange {
            name,
            version: version.to_string(),
            range: range_text.clone(),
        };

        let available = parse_version(&record.available_version)?;
        match check_range(&available, &range) {
            RangeCheck::InRange => {}
            RangeCheck::Nightly => {
                return Err(Error::ExtensionVersionIsNightly {
                    name,
                    version: record.available_version.clone(),
                });
            }
            RangeCheck::Below | RangeCheck::Above => {
                return Err(out_of_range(&record.available_version));
            }
        }

        let Some(installed_text) = &record.installed_version else {
            return self.create_extension(extension).await;
        };
        let installed = parse_version(installed_text)?;

        if available > installed {
            return self
                .update_extension(extension, &record.available_version)
                .await;
        }

        if check_range(&installed, &range) != RangeCheck::InRange {
            return Err(out_of_range(installed_text));
        }

        if installed > available {
            return Err(Error::ExtensionDowngradeDetected {
                name,
                installed: installed_text.clone(),
                available: record.available_version.clone(),
            });
        }

        Ok(())
    }

    async fn create_extension(&self, extension: VectorExtension) -> Result<()> {
        let name = extension.display_name();
        info!(target: TRACING_TARGET_EXTENSION, "Creating {} extension", name);

        if let Err(err) = self.repository.create_extension(extension).await {
            error!(
                target: TRACING_TARGET_EXTENSION,
                fatal = true,
                error = %err,
                "Failed to activate {name} extension.\nPlease ensure the Postgres instance has {name} installed.\n\nIf the Postgres instance already has {name} installed, Immich may not have the necessary permissions to activate it.\nIn this case, please run 'CREATE EXTENSION IF NOT EXISTS {db} CASCADE' manually as a superuser.",
                name = name,
                db = extension.name(),
            );
            return Err(Error::ExtensionCreateFailed {
                extension,
                source: Box::new(err),
            });
        }

        Ok(())
    }

    async fn update_extension(&self, extension: VectorExtension, version: &str) -> Result<()> {
        let name = extension.display_name();
        info!(
            target: TRACING_TARGET_EXTENSION,
            "Updating {} extension to {}", name, version
        );

        match self
            .repository
            .update_vector_extension(extension, version)
            .await
        {
            Ok(update) => {
                if update.restart_required {
                    warn!(
                        target: TRACING_TARGET_EXTENSION,
                        "The {} extension has been updated to {}. Please restart the Postgres instance to complete the update.",
                        name, version
                    );
                }
                Ok(())
            }
            Err(err) => {
                warn!(
                    target: TRACING_TARGET_EXTENSION,
                    error = %err,
                    "The {name} extension can be updated to {version}. Immich attempted to update the extension, but failed to do so.\nThis may be because Immich does not have the necessary permissions to update the extension.\n\nPlease run 'ALTER EXTENSION {db} UPDATE' manually as a superuser.",
                    name = name,
                    version = version,
                    db = extension.name(),
                );
                Err(Error::ExtensionUpdateFailed {
                    extension,
                    version: version.to_string(),
                    source: Box::new(err),
                })
            }
        }
    }

    async fn drop_unused_extensions(&self, active: VectorExtension, versions: &[ExtensionVersion]) {
        for record in versions {
            let unused = record.name;
            if unused == active || record.installed_version.is_none() {
                continue;
            }
            // vchord is built on top of pgvector
            if active == VectorExtension::VectorChord && unused == VectorExtension::Vector {
                continue;
            }

            info!(
                target: TRACING_TARGET_EXTENSION,
                "Dropping unused {} extension",
                unused.display_name()
            );
            if let Err(err) = self.repository.drop_extension(unused).await {
                let err = Error::ExtensionDropFailed {
                    extension: unused,
                    source: Box::new(err),
                };
                warn!(
                    target: TRACING_TARGET_EXTENSION,
                    error = %err,
                    "The {name} extension is no longer used, but could not be dropped.\nThis may be because Immich does not have the necessary permissions to drop the extension.\n\nPlease run 'DROP EXTENSION {db};' manually as a superuser.",
                    name = unused.display_name(),
                    db = unused.name(),
                );
            }
        }
    }
}

fn parse_range(range: &str) -> Result<VersionReq> {
    VersionReq::parse(range)
        .map_err(|e| Error::Database(format!("invalid version range '{}': {}", range, e)))
}

fn parse_version(text: &str) -> Result<Version> {
    coerce_version(text)
        .ok_or_else(|| Error::Database(format!("unrecognized extension version '{}'", text)))
}
