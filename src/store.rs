//! Relational store capability used by the record-insert handlers.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres};
use tracing::info;
use uuid::Uuid;

use crate::error::{Error, Result};

/// A bound statement parameter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Param {
    Uuid(Uuid),
    Text(String),
}

impl From<Uuid> for Param {
    fn from(u: Uuid) -> Self { Self::Uuid(u) }
}

impl From<&str> for Param {
    fn from(s: &str) -> Self { Self::Text(s.to_owned()) }
}

impl From<String> for Param {
    fn from(s: String) -> Self { Self::Text(s) }
}

#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Runs `statement` with positional `params` (`$1`, `$2`, ...) and returns
    /// the number of affected rows.
    async fn execute(&self, statement: &str, params: &[Param]) -> Result<u64>;

    /// Cheap reachability check for readiness probes.
    async fn ping(&self) -> Result<()>;
}

/// Postgres store over an `sqlx` connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Opens a pool and verifies the database answers.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect(url)
            .await
            .map_err(|e| Error::Store(format!("unable to establish connection pool: {e}")))?;
        let store = Self { pool };
        store.ping().await?;
        info!("postgres pool connected");
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool { &self.pool }
}

#[async_trait]
impl Store for PgStore {
    async fn execute(&self, statement: &str, params: &[Param]) -> Result<u64> {
        let mut query = sqlx::query::<Postgres>(statement);
        for param in params {
            query = match param {
                Param::Uuid(u) => query.bind(*u),
                Param::Text(s) => query.bind(s.clone()),
            };
        }
        let done = query.execute(&self.pool).await?;
        Ok(done.rows_affected())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
