use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::{
    IdempotencyLedger, MessageId, Result, SagaId, SagaRecord, SagaStore, StoreError, Version,
};

/// SQLite-backed saga store and idempotency ledger.
///
/// Records are stored as JSON next to a few indexed columns; the ledger is a
/// plain `message_id` primary-key table. Both survive process restarts.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Creates a store over an existing pool. Does not run migrations.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connects to a database URL (e.g. `sqlite://saga.db`), creating the
    /// file if needed, and runs the migrations.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?;
        Self::connect_with(options).await
    }

    /// Opens (or creates) a database file and runs the migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::connect_with(SqliteConnectOptions::new().filename(path)).await
    }

    async fn connect_with(options: SqliteConnectOptions) -> Result<Self> {
        let options = options
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self::new(pool);
        store.run_migrations().await?;
        Ok(store)
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        tracing::debug!("saga store migrations applied");
        Ok(())
    }

    /// Closes the pool, waiting for connections to finish.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl SagaStore for SqliteStore {
    async fn get(&self, saga_id: SagaId) -> Result<Option<SagaRecord>> {
        let body: Option<String> = sqlx::query_scalar("SELECT record FROM sagas WHERE saga_id = ?1")
            .bind(saga_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        body.map(|body| serde_json::from_str(&body).map_err(StoreError::from))
            .transpose()
    }

    #[tracing::instrument(skip(self, record), fields(saga_id = %record.saga_id()))]
    async fn put(&self, record: &mut SagaRecord) -> Result<()> {
        let saga_id = record.saga_id();
        let mut tx = self.pool.begin().await?;

        let current: Option<i64> =
            sqlx::query_scalar("SELECT version FROM sagas WHERE saga_id = ?1")
                .bind(saga_id.to_string())
                .fetch_optional(&mut *tx)
                .await?;
        let actual = current.map(Version::new).unwrap_or(Version::initial());

        if actual != record.version() {
            tracing::warn!(expected = %record.version(), %actual, "saga version conflict");
            return Err(StoreError::ConcurrencyConflict {
                saga_id,
                expected: record.version(),
                actual,
            });
        }

        // Stamp a copy so a failed write leaves the caller's record untouched.
        let mut stamped = record.clone();
        stamped.stamp(actual.next(), Utc::now());
        let body = serde_json::to_string(&stamped)?;

        sqlx::query(
            r#"
            INSERT INTO sagas (saga_id, state, version, has_pending, record, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT (saga_id) DO UPDATE SET
                state = excluded.state,
                version = excluded.version,
                has_pending = excluded.has_pending,
                record = excluded.record,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(saga_id.to_string())
        .bind(stamped.state().as_str())
        .bind(stamped.version().as_i64())
        .bind(stamped.has_pending_commands())
        .bind(body)
        .bind(stamped.updated_at().to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        *record = stamped;
        Ok(())
    }

    async fn pending(&self) -> Result<Vec<SagaRecord>> {
        let bodies: Vec<String> = sqlx::query_scalar(
            "SELECT record FROM sagas WHERE has_pending = 1 ORDER BY updated_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        bodies
            .iter()
            .map(|body| serde_json::from_str(body).map_err(StoreError::from))
            .collect()
    }
}

#[async_trait]
impl IdempotencyLedger for SqliteStore {
    async fn is_processed(&self, message_id: MessageId) -> Result<bool> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM processed_messages WHERE message_id = ?1")
                .bind(message_id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        Ok(found.is_some())
    }

    async fn mark_processed(&self, message_id: MessageId) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO processed_messages (message_id, processed_at) VALUES (?1, ?2)",
        )
        .bind(message_id.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
