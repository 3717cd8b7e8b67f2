// ledger/src/adapters/sqlite.rs
use crate::{
    GlobalFund, LedgerStore, Operation, Request, StoreError, TransactionLogEntry, User, WritePlan,
};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::{
    Row, Sqlite, Transaction,
    error::DatabaseError,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions},
};
use std::time::Duration;
use uuid::Uuid;

/// How long a connection waits on another writer before SQLite reports busy.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite adapter storing each aggregate as a JSON document next to its version.
///
/// Schema:
/// ```sql
/// CREATE TABLE users (id TEXT PRIMARY KEY, version INTEGER NOT NULL, data TEXT NOT NULL);
/// CREATE TABLE requests (id TEXT PRIMARY KEY, user_id TEXT NOT NULL, status TEXT NOT NULL,
///                        version INTEGER NOT NULL, data TEXT NOT NULL);
/// CREATE TABLE global_fund (id INTEGER PRIMARY KEY CHECK (id = 1), version INTEGER NOT NULL,
///                           data TEXT NOT NULL);
/// CREATE TABLE transactions (id TEXT PRIMARY KEY, request_id TEXT NOT NULL, data TEXT NOT NULL);
/// ```
pub struct SqliteAdapter {
    pub(crate) pool: SqlitePool,
}

/// `SQLITE_BUSY` (5) and `SQLITE_LOCKED` (6), including their extended codes.
fn is_busy(db: &dyn DatabaseError) -> bool {
    db.code()
        .and_then(|code| code.parse::<i32>().ok())
        .is_some_and(|code| matches!(code & 0xff, 5 | 6))
}

fn storage_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(err.to_string())
        }
        sqlx::Error::Database(ref db) if is_busy(&**db) => {
            StoreError::Unavailable(err.to_string())
        }
        other => StoreError::Storage(other.to_string()),
    }
}

fn encode<T: Serialize>(value: &T) -> Result<String, StoreError> {
    Ok(serde_json::to_string(value)?)
}

fn decode<T: DeserializeOwned>(data: &str) -> Result<T, StoreError> {
    serde_json::from_str(data).map_err(|e| StoreError::Serialize(e.to_string()))
}

impl SqliteAdapter {
    /// Create a new SQLite adapter with a file-based database
    pub async fn new_file(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(storage_error)?;

        Ok(Self { pool })
    }

    /// Create a new SQLite adapter with an in-memory database
    pub async fn new_memory() -> Result<Self, StoreError> {
        // One connection that never expires: each connection would otherwise see its own database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_error)?;

        Ok(Self { pool })
    }

    /// Create from an existing pool
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the database schema
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                version INTEGER NOT NULL,
                data TEXT NOT NULL
            )
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(storage_error)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS requests (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                status TEXT NOT NULL,
                version INTEGER NOT NULL,
                data TEXT NOT NULL
            )
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(storage_error)?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_requests_status ON requests(status)
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(storage_error)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS global_fund (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL,
                data TEXT NOT NULL
            )
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(storage_error)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS transactions (
                id TEXT PRIMARY KEY,
                request_id TEXT NOT NULL,
                data TEXT NOT NULL
            )
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(storage_error)?;

        tx.commit().await.map_err(storage_error)?;

        Ok(())
    }

    async fn stored_version(
        tx: &mut Transaction<'_, Sqlite>,
        sql: &str,
        id: Option<String>,
    ) -> Result<u64, StoreError> {
        let mut query = sqlx::query(sql);
        if let Some(id) = id {
            query = query.bind(id);
        }
        let row = query
            .fetch_optional(&mut **tx)
            .await
            .map_err(storage_error)?;
        Ok(row.map_or(0, |r| r.get::<i64, _>("version") as u64))
    }

    async fn put_user(tx: &mut Transaction<'_, Sqlite>, user: &User) -> Result<(), StoreError> {
        let found = Self::stored_version(
            tx,
            "SELECT version FROM users WHERE id = ?",
            Some(user.id.to_string()),
        )
        .await?;
        if found != user.version {
            return Err(StoreError::VersionConflict {
                entity: "user",
                id: user.id,
                expected: user.version,
                found,
            });
        }

        let mut stored = user.clone();
        stored.version += 1;
        sqlx::query(
            r#"
            INSERT INTO users (id, version, data) VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET version = excluded.version, data = excluded.data
            "#,
        )
        .bind(stored.id.to_string())
        .bind(stored.version as i64)
        .bind(encode(&stored)?)
        .execute(&mut **tx)
        .await
        .map_err(storage_error)?;

        Ok(())
    }

    async fn put_request(
        tx: &mut Transaction<'_, Sqlite>,
        request: &Request,
    ) -> Result<(), StoreError> {
        let found = Self::stored_version(
            tx,
            "SELECT version FROM requests WHERE id = ?",
            Some(request.id.to_string()),
        )
        .await?;
        if found != request.version {
            return Err(StoreError::VersionConflict {
                entity: "request",
                id: request.id,
                expected: request.version,
                found,
            });
        }

        let mut stored = request.clone();
        stored.version += 1;
        sqlx::query(
            r#"
            INSERT INTO requests (id, user_id, status, version, data) VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                version = excluded.version,
                data = excluded.data
            "#,
        )
        .bind(stored.id.to_string())
        .bind(stored.user_id.to_string())
        .bind(stored.status.as_str())
        .bind(stored.version as i64)
        .bind(encode(&stored)?)
        .execute(&mut **tx)
        .await
        .map_err(storage_error)?;

        Ok(())
    }

    async fn put_fund(tx: &mut Transaction<'_, Sqlite>, fund: &GlobalFund) -> Result<(), StoreError> {
        let found =
            Self::stored_version(tx, "SELECT version FROM global_fund WHERE id = 1", None).await?;
        if found != fund.version {
            return Err(StoreError::VersionConflict {
                entity: "fund",
                id: Uuid::nil(),
                expected: fund.version,
                found,
            });
        }

        let mut stored = fund.clone();
        stored.version += 1;
        sqlx::query(
            r#"
            INSERT INTO global_fund (id, version, data) VALUES (1, ?, ?)
            ON CONFLICT(id) DO UPDATE SET version = excluded.version, data = excluded.data
            "#,
        )
        .bind(stored.version as i64)
        .bind(encode(&stored)?)
        .execute(&mut **tx)
        .await
        .map_err(storage_error)?;

        Ok(())
    }

    async fn append_log(
        tx: &mut Transaction<'_, Sqlite>,
        entry: &TransactionLogEntry,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("INSERT INTO transactions (id, request_id, data) VALUES (?, ?, ?)")
            .bind(&entry.id)
            .bind(entry.request_id.to_string())
            .bind(encode(entry)?)
            .execute(&mut **tx)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::Duplicate(format!("transaction {}", entry.id)))
            }
            Err(e) => Err(storage_error(e)),
        }
    }

    async fn fetch_documents<T: DeserializeOwned>(&self, sql: &str) -> Result<Vec<T>, StoreError> {
        let rows = sqlx::query(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;

        rows.iter()
            .map(|row| decode(row.get::<&str, _>("data")))
            .collect()
    }

    async fn fetch_document<T: DeserializeOwned>(
        &self,
        sql: &str,
        id: Uuid,
    ) -> Result<Option<T>, StoreError> {
        let row = sqlx::query(sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;

        row.map(|r| decode(r.get::<&str, _>("data"))).transpose()
    }
}

#[async_trait]
impl LedgerStore for SqliteAdapter {
    async fn execute_plan(&self, plan: &WritePlan) -> Result<(), StoreError> {
        // Take the write lock up front: a deferred transaction reads versions
        // under a shared lock and deadlocks with other writers on upgrade
        let mut tx = self
            .pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(storage_error)?;

        // Any early return drops `tx`, which rolls the whole plan back
        for op in plan.operations() {
            match op {
                Operation::PutUser { user } => Self::put_user(&mut tx, user).await?,
                Operation::PutRequest { request } => Self::put_request(&mut tx, request).await?,
                Operation::PutFund { fund } => Self::put_fund(&mut tx, fund).await?,
                Operation::AppendLog { entry } => Self::append_log(&mut tx, entry).await?,
            }
        }

        tx.commit().await.map_err(storage_error)?;
        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        self.fetch_document("SELECT data FROM users WHERE id = ?", id)
            .await
    }

    async fn get_users(&self) -> Result<Vec<User>, StoreError> {
        self.fetch_documents("SELECT data FROM users ORDER BY rowid")
            .await
    }

    async fn count_users(&self) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM users")
            .fetch_one(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(row.get::<i64, _>("count") as u64)
    }

    async fn get_request(&self, id: Uuid) -> Result<Option<Request>, StoreError> {
        self.fetch_document("SELECT data FROM requests WHERE id = ?", id)
            .await
    }

    async fn get_requests(&self) -> Result<Vec<Request>, StoreError> {
        self.fetch_documents("SELECT data FROM requests ORDER BY rowid")
            .await
    }

    async fn get_global_fund(&self) -> Result<Option<GlobalFund>, StoreError> {
        let row = sqlx::query("SELECT data FROM global_fund WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;

        row.map(|r| decode(r.get::<&str, _>("data"))).transpose()
    }

    async fn get_transaction_log(&self) -> Result<Vec<TransactionLogEntry>, StoreError> {
        self.fetch_documents("SELECT data FROM transactions ORDER BY rowid")
            .await
    }
}
