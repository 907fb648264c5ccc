//! The pooled client surface.

use async_trait::async_trait;
use sqlserver_pool::{
    run_retrying, ErrorDisposition, Lease, Manager, Pool, PoolError, PoolStatus,
};
use tds_wire::Param;

use crate::config::Config;
use crate::conn::Connection;
use crate::error::{Error, Result};
use crate::result::ExecutionResult;
use crate::row::Row;
use crate::script::split_batches;

/// Opens and validates TDS connections for the pool.
pub(crate) struct TdsManager {
    config: Config,
}

#[async_trait]
impl Manager for TdsManager {
    type Connection = Connection;
    type Error = Error;

    async fn create(&self) -> Result<Connection> {
        Connection::open(&self.config).await
    }

    async fn validate(&self, conn: &mut Connection) -> Result<()> {
        conn.execute(&self.config.validation_query).await?;
        Ok(())
    }

    fn is_open(&self, conn: &Connection) -> bool {
        !conn.is_broken()
    }

    fn classify(&self, error: &Error) -> ErrorDisposition {
        if error.is_retryable() {
            ErrorDisposition::Retryable
        } else {
            ErrorDisposition::Fatal
        }
    }
}

/// A pooled SQL Server client.
///
/// The client owns the pool; cloning it is cheap and every clone shares the
/// same connections. Individual connections are only ever used exclusively:
/// each operation leases one for its duration, and [`Client::with_connection`]
/// hands the lease to the caller.
#[derive(Clone)]
pub struct Client {
    pool: Pool<TdsManager>,
    config: Config,
}

impl Client {
    /// Build a client over a fresh pool.
    ///
    /// Connections open lazily: the first operation performs the first
    /// prelogin/login exchange.
    pub fn connect(config: Config) -> Result<Self> {
        config.validate()?;
        let pool = Pool::new(
            TdsManager {
                config: config.clone(),
            },
            config.pool.clone(),
        )
        .map_err(flatten_pool_error)?;
        Ok(Self { pool, config })
    }

    /// Run a query and return the rows of its first result set.
    ///
    /// Queries are idempotent, so transient failures are retried under the
    /// configured [`sqlserver_pool::RetryPolicy`].
    pub async fn query(&self, sql: &str) -> Result<Vec<Row>> {
        let retry = self.config.retry.clone();
        run_retrying(&self.pool, &retry, async |conn: &mut Connection| {
            conn.query(sql).await
        })
        .await
        .map_err(flatten_pool_error)
    }

    /// Run a query expected to produce at most one row.
    pub async fn query_one(&self, sql: &str) -> Result<Option<Row>> {
        let mut rows = self.query(sql).await?;
        if rows.len() > 1 {
            tracing::warn!(rows = rows.len(), "query_one discarded surplus rows");
        }
        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.swap_remove(0))
        })
    }

    /// Run a SQL batch and return the full result.
    ///
    /// Not retried: statements may not be idempotent.
    pub async fn execute(&self, sql: &str) -> Result<ExecutionResult> {
        let mut lease = self.acquire().await?;
        guard_lease(lease.execute(sql).await, &mut lease)
    }

    /// Run a parameterised statement through `sp_executesql`.
    pub async fn execute_params(&self, sql: &str, params: Vec<Param>) -> Result<ExecutionResult> {
        let mut lease = self.acquire().await?;
        guard_lease(lease.execute_params(sql, params).await, &mut lease)
    }

    /// Call a stored procedure.
    pub async fn call(&self, procedure: &str, params: Vec<Param>) -> Result<ExecutionResult> {
        let mut lease = self.acquire().await?;
        guard_lease(lease.call(procedure, params).await, &mut lease)
    }

    /// Split `script` at `GO` separators and run each batch in order on one
    /// connection.
    ///
    /// Empty batches run nothing; `GO <count>` repeats its batch. The first
    /// failing batch aborts the script, and the error is annotated with the
    /// batch's starting line.
    pub async fn execute_script(&self, script: &str) -> Result<Vec<ExecutionResult>> {
        let batches = split_batches(script);
        let mut results = Vec::with_capacity(batches.len());

        let mut lease = self.acquire().await?;
        for batch in batches {
            for _ in 0..batch.repeat {
                match lease.execute(&batch.sql).await {
                    Ok(result) => results.push(result),
                    Err(error) => {
                        if lease.is_broken() {
                            lease.poison();
                        }
                        tracing::warn!(
                            line = batch.line,
                            column = batch.column,
                            %error,
                            "script batch failed"
                        );
                        return Err(error);
                    }
                }
            }
        }
        Ok(results)
    }

    /// Lease a connection exclusively for the duration of `f`.
    ///
    /// The lease is released on every exit path. A connection that comes
    /// back broken, or with a transaction still open (committed nor rolled
    /// back), is discarded rather than returned to the idle set — closing a
    /// connection rolls its open transaction back server-side.
    pub async fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        F: AsyncFnOnce(&mut Connection) -> Result<T>,
    {
        let mut lease = self.acquire().await?;
        let outcome = f(&mut *lease).await;
        if lease.is_broken() || lease.in_transaction() {
            lease.poison();
        }
        outcome
    }

    /// Pool occupancy.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        self.pool.status()
    }

    /// The configuration this client was built with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Refuse new work, drain waiters, and close every connection.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }

    async fn acquire(&self) -> Result<Lease<TdsManager>> {
        self.pool.acquire().await.map_err(flatten_pool_error)
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("host", &self.config.host)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

/// Poison the lease when an operation broke the connection, then pass the
/// outcome through.
fn guard_lease<T>(outcome: Result<T>, lease: &mut Lease<TdsManager>) -> Result<T> {
    if lease.is_broken() {
        lease.poison();
    }
    outcome
}

/// Collapse pool-layer errors into the client taxonomy.
fn flatten_pool_error(error: PoolError<Error>) -> Error {
    match error {
        PoolError::Closed => Error::ShutdownInProgress,
        PoolError::AcquireTimeout(_) => Error::PoolExhausted,
        PoolError::Configuration(message) => Error::Config(message),
        PoolError::Create(inner) | PoolError::Operation(inner) => inner,
    }
}
