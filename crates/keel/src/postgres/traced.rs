//! Traced database connection wrapper.
//!
//! Wraps a deadpool pool and logs every statement via tracing, under the
//! `keel::query` target.

use std::ops::Deref;

use tokio_postgres::types::ToSql;
use tokio_postgres::{Error, Row};
use tracing::Instrument;

use crate::TRACING_TARGET_QUERY;

/// A traced connection pool.
///
/// Wraps a `deadpool_postgres::Pool` and returns [`TracedObject`] from
/// `get()`, so every statement the repository runs is recorded.
#[derive(Clone)]
pub struct TracedPool {
    inner: deadpool_postgres::Pool,
}

impl TracedPool {
    pub fn new(pool: deadpool_postgres::Pool) -> Self {
        Self { inner: pool }
    }

    /// Check out a traced connection.
    pub async fn get(&self) -> Result<TracedObject, deadpool_postgres::PoolError> {
        let conn = self.inner.get().await?;
        Ok(TracedObject { inner: conn })
    }

    pub fn inner(&self) -> &deadpool_postgres::Pool {
        &self.inner
    }
}

/// A pooled connection whose statements are logged.
pub struct TracedObject {
    inner: deadpool_postgres::Object,
}

impl TracedObject {
    fn client(&self) -> &tokio_postgres::Client {
        self.inner.deref()
    }

    /// Execute a statement, returning the number of rows affected.
    pub async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<u64, Error> {
        let span = tracing::debug_span!(
            target: TRACING_TARGET_QUERY,
            "db.execute",
            sql = %sql,
            params = params.len(),
            affected = tracing::field::Empty,
        );
        let affected = self
            .client()
            .execute(sql, params)
            .instrument(span.clone())
            .await?;
        span.record("affected", affected);
        Ok(affected)
    }

    /// Execute a query, returning all rows.
    pub async fn query(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<Row>, Error> {
        let span = tracing::debug_span!(
            target: TRACING_TARGET_QUERY,
            "db.query",
            sql = %sql,
            params = params.len(),
            rows = tracing::field::Empty,
        );
        let rows = self
            .client()
            .query(sql, params)
            .instrument(span.clone())
            .await?;
        span.record("rows", rows.len());
        Ok(rows)
    }

    /// Execute a query, returning at most one row.
    pub async fn query_opt(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Option<Row>, Error> {
        let span = tracing::debug_span!(
            target: TRACING_TARGET_QUERY,
            "db.query",
            sql = %sql,
            params = params.len(),
            rows = tracing::field::Empty,
        );
        let row = self
            .client()
            .query_opt(sql, params)
            .instrument(span.clone())
            .await?;
        span.record("rows", if row.is_some() { 1u64 } else { 0u64 });
        Ok(row)
    }

    /// Execute a query, returning exactly one row.
    pub async fn query_one(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<Row, Error> {
        let span = tracing::debug_span!(
            target: TRACING_TARGET_QUERY,
            "db.query",
            sql = %sql,
            params = params.len(),
            rows = 1u64,
        );
        self.client()
            .query_one(sql, params)
            .instrument(span)
            .await
    }

    /// Run several statements separated by semicolons, without parameters.
    pub async fn batch_execute(&self, sql: &str) -> Result<(), Error> {
        let span = tracing::debug_span!(target: TRACING_TARGET_QUERY, "db.batch", sql = %sql);
        self.client().batch_execute(sql).instrument(span).await
    }

    /// Run `statements` in order inside one transaction.
    ///
    /// Nothing is committed unless every statement succeeds.
    pub async fn execute_in_transaction(&mut self, statements: &[String]) -> Result<(), Error> {
        let span = tracing::debug_span!(
            target: TRACING_TARGET_QUERY,
            "db.transaction",
            statements = statements.len(),
        );
        async {
            let tx = self.inner.transaction().await?;
            for sql in statements {
                let step = tracing::debug_span!(target: TRACING_TARGET_QUERY, "db.execute", sql = %sql);
                tx.batch_execute(sql).instrument(step).await?;
            }
            tx.commit().await
        }
        .instrument(span)
        .await
    }
}
