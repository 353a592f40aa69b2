//! The Postgres-backed [`DatabaseRepository`].

use keel_schema::{DatabaseSchema, Lit, quote_ident};
use tracing::{debug, info, warn};

use crate::config::DatabaseConfig;
use crate::diff::{DiffOptions, SchemaDiff, schema_diff_with};
use crate::extension::{
    VectorExtension, VectorIndex, needs_reindex, target_list_count, vector_index_sql,
};
use crate::repository::{DatabaseRepository, ExtensionUpdate, ExtensionVersion};
use crate::solver::verify_order;
use crate::version::{coerce_version, crosses_minor};
use crate::{Error, Result, TRACING_TARGET_EXTENSION, TRACING_TARGET_MIGRATION};

mod introspect;
mod traced;

pub use introspect::schema_from_database;
pub use traced::{TracedObject, TracedPool};

/// A live database plus the schema the application declares for it.
pub struct PgDatabase {
    pool: TracedPool,
    config: DatabaseConfig,
    declared: DatabaseSchema,
}

impl PgDatabase {
    pub fn new(pool: deadpool_postgres::Pool, config: DatabaseConfig, declared: DatabaseSchema) -> Self {
        Self {
            pool: TracedPool::new(pool),
            config,
            declared,
        }
    }

    /// Build a pool from `config` and wrap it.
    pub fn connect(config: DatabaseConfig, declared: DatabaseSchema) -> Result<Self> {
        let pool = config.create_pool()?;
        Ok(Self::new(pool, config, declared))
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn declared_schema(&self) -> &DatabaseSchema {
        &self.declared
    }

    /// Read the live schema.
    pub async fn introspect(&self) -> Result<DatabaseSchema> {
        let conn = self.pool.get().await?;
        schema_from_database(&conn, &self.declared.schema_name).await
    }

    /// The migration plan for the current database, with the live schema it
    /// was computed against.
    ///
    /// Vector indexes are left out of the plan; they are maintained by
    /// [`DatabaseRepository::reindex_vectors_if_needed`].
    pub async fn plan_migrations(&self) -> Result<(DatabaseSchema, SchemaDiff)> {
        let mut live = self.introspect().await?;
        for table in &mut live.tables {
            for index in &mut table.indexes {
                if VectorIndex::ALL.iter().any(|v| v.name() == index.name) {
                    index.synchronize = false;
                }
            }
        }
        let diff = schema_diff_with(&self.declared, &live, &DiffOptions::for_migrations());
        Ok((live, diff))
    }

    async fn installed_version(
        &self,
        conn: &TracedObject,
        extension: VectorExtension,
    ) -> Result<Option<String>> {
        let row = conn
            .query_opt(
                "SELECT extversion::text FROM pg_extension WHERE extname::text = $1",
                &[&extension.name()],
            )
            .await?;
        Ok(row.map(|r| r.try_get(0)).transpose()?)
    }
}

impl DatabaseRepository for PgDatabase {
    async fn postgres_version(&self) -> Result<String> {
        let conn = self.pool.get().await?;
        let row = conn.query_one("SHOW server_version", &[]).await?;
        Ok(row.try_get(0)?)
    }

    async fn vector_extension(&self) -> Result<VectorExtension> {
        if let Some(extension) = self.config.vector_extension {
            return Ok(extension);
        }

        let conn = self.pool.get().await?;
        let names: Vec<&str> = VectorExtension::ALL.iter().map(|e| e.name()).collect();
        let rows = conn
            .query(
                "SELECT extname::text FROM pg_extension WHERE extname::text = ANY($1::text[])",
                &[&names],
            )
            .await?;
        let installed = rows
            .iter()
            .map(|r| r.try_get::<_, String>(0))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(VectorExtension::ALL
            .into_iter()
            .find(|e| installed.iter().any(|name| name == e.name()))
            .unwrap_or(VectorExtension::DEFAULT))
    }

    async fn extension_versions(
        &self,
        extensions: &[VectorExtension],
    ) -> Result<Vec<ExtensionVersion>> {
        let conn = self.pool.get().await?;
        let names: Vec<&str> = extensions.iter().map(|e| e.name()).collect();
        let rows = conn
            .query(
                "SELECT name::text, default_version::text, installed_version::text \
                 FROM pg_available_extensions WHERE name::text = ANY($1::text[])",
                &[&names],
            )
            .await?;

        let mut versions = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get(0)?;
            let Ok(extension) = name.parse::<VectorExtension>() else {
                continue;
            };
            versions.push(ExtensionVersion {
                name: extension,
                available_version: row.try_get(1)?,
                installed_version: row.try_get(2)?,
            });
        }
        versions.sort_by_key(|v| extensions.iter().position(|e| *e == v.name));
        Ok(versions)
    }

    async fn create_extension(&self, extension: VectorExtension) -> Result<()> {
        let conn = self.pool.get().await?;
        conn.batch_execute(&format!(
            "CREATE EXTENSION IF NOT EXISTS {} CASCADE",
            quote_ident(extension.name())
        ))
        .await?;
        Ok(())
    }

    async fn update_vector_extension(
        &self,
        extension: VectorExtension,
        target_version: &str,
    ) -> Result<ExtensionUpdate> {
        let mut conn = self.pool.get().await?;
        let current = self.installed_version(&conn, extension).await?;

        let mut statements = Vec::new();
        if extension == VectorExtension::VectorChord {
            // vchord is built on pgvector, which has to keep up
            statements.push(format!(
                "ALTER EXTENSION {} UPDATE",
                quote_ident(VectorExtension::Vector.name())
            ));
        }
        statements.push(format!(
            "ALTER EXTENSION {} UPDATE TO {}",
            quote_ident(extension.name()),
            Lit(target_version)
        ));
        conn.execute_in_transaction(&statements).await?;

        let crosses = match (
            current.as_deref().and_then(coerce_version),
            coerce_version(target_version),
        ) {
            (Some(from), Some(to)) => crosses_minor(&from, &to),
            _ => true,
        };
        Ok(ExtensionUpdate {
            restart_required: crosses || extension.update_requires_restart(),
        })
    }

    async fn drop_extension(&self, extension: VectorExtension) -> Result<()> {
        let conn = self.pool.get().await?;
        conn.batch_execute(&format!(
            "DROP EXTENSION IF EXISTS {}",
            quote_ident(extension.name())
        ))
        .await?;
        Ok(())
    }

    async fn run_migrations(&self) -> Result<()> {
        for warning in &self.declared.warnings {
            warn!(target: TRACING_TARGET_MIGRATION, "{}", warning);
        }

        let (live, diff) = self.plan_migrations().await?;
        if diff.is_empty() {
            info!(target: TRACING_TARGET_MIGRATION, "Schema is up to date");
            return Ok(());
        }

        verify_order(&live, &diff.items)?;
        for action in &diff.items {
            debug!(target: TRACING_TARGET_MIGRATION, reason = %action.reason(), "{}", action);
        }

        let statements = diff.statements();
        info!(
            target: TRACING_TARGET_MIGRATION,
            changes = diff.len(),
            statements = statements.len(),
            "Applying schema changes"
        );
        let mut conn = self.pool.get().await?;
        conn.execute_in_transaction(&statements)
            .await
            .map_err(|e| Error::Migration(describe(&e)))?;

        info!(target: TRACING_TARGET_MIGRATION, "Schema changes applied");
        Ok(())
    }

    async fn reindex_vectors_if_needed(&self, indexes: &[VectorIndex]) -> Result<()> {
        let extension = self.vector_extension().await?;
        let mut conn = self.pool.get().await?;
        let schema_name = &self.declared.schema_name;

        for &index in indexes {
            let table = format!("{}.{}", quote_ident(schema_name), quote_ident(index.table()));
            let exists: Option<String> = conn
                .query_one("SELECT to_regclass($1)::text", &[&table])
                .await?
                .try_get(0)?;
            if exists.is_none() {
                debug!(target: TRACING_TARGET_EXTENSION, index = %index, "Table does not exist, skipping");
                continue;
            }

            let definition: Option<String> = conn
                .query_opt(
                    "SELECT indexdef FROM pg_indexes WHERE schemaname = $1 AND indexname = $2",
                    &[&schema_name.as_str(), &index.name()],
                )
                .await?
                .map(|row| row.try_get(0))
                .transpose()?;

            let lists = if extension == VectorExtension::VectorChord {
                let rows: i64 = conn
                    .query_one(&format!("SELECT count(*) FROM {}", table), &[])
                    .await?
                    .try_get(0)?;
                Some(target_list_count(rows.max(0) as u64))
            } else {
                None
            };

            if !needs_reindex(definition.as_deref(), extension, lists) {
                debug!(target: TRACING_TARGET_EXTENSION, index = %index, "Index is up to date");
                continue;
            }

            info!(
                target: TRACING_TARGET_EXTENSION,
                index = %index,
                extension = %extension,
                "Rebuilding vector index"
            );
            conn.execute_in_transaction(&[
                format!("DROP INDEX IF EXISTS {}.{}", quote_ident(schema_name), quote_ident(index.name())),
                vector_index_sql(schema_name, extension, index, lists.unwrap_or(1)),
            ])
            .await?;
        }

        Ok(())
    }
}

/// The server's message for database errors, which `Display` leaves out.
fn describe(err: &tokio_postgres::Error) -> String {
    match err.as_db_error() {
        Some(db) => match db.detail() {
            Some(detail) => format!("{}: {}", db.message(), detail),
            None => db.message().to_string(),
        },
        None => err.to_string(),
    }
}
