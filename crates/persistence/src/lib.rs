//! Persistence layer for OTC Pilot
//!
//! Provides SQLite storage for recovery sequence snapshots and the
//! append-only trade log that survive process restarts.

pub mod repository;
pub mod schema;

pub use sqlx::sqlite::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database connection error: {0}")]
    Connection(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type DbResult<T> = Result<T, DbError>;

// Applied once per pool, in order
const PRAGMAS: &[&str] = &[
    // WAL keeps reads (status command) live while a sequence task writes
    "PRAGMA journal_mode=WAL",
    "PRAGMA synchronous=NORMAL",
    // negative value = KiB, so 8 MB page cache
    "PRAGMA cache_size=-8000",
];

/// Database connection pool
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) the database file at `path`
    pub async fn new(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        Self::open(&format!("sqlite:{}?mode=rwc", path.display()), 5).await
    }

    /// In-memory database for tests; a single connection so every
    /// query sees the same store
    pub async fn in_memory() -> DbResult<Self> {
        Self::open("sqlite::memory:", 1).await
    }

    async fn open(url: &str, max_connections: u32) -> DbResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| DbError::Connection(e.to_string()))?;

        let db = Self { pool };
        db.apply_schema().await?;
        db.apply_pragmas().await?;

        Ok(db)
    }

    /// Execute the schema DDL one statement at a time
    async fn apply_schema(&self) -> DbResult<()> {
        for statement in schema::CREATE_TABLES.split(';') {
            // SQL comments would make a statement look non-empty
            let body: String = statement
                .lines()
                .filter(|line| !line.trim_start().starts_with("--"))
                .collect::<Vec<_>>()
                .join("\n");
            let body = body.trim();
            if body.is_empty() {
                continue;
            }

            sqlx::query(body)
                .execute(&self.pool)
                .await
                .map_err(|e| DbError::Migration(format!("{e}: {body}")))?;
        }

        Ok(())
    }

    async fn apply_pragmas(&self) -> DbResult<()> {
        for pragma in PRAGMAS {
            sqlx::query(pragma)
                .execute(&self.pool)
                .await
                .map_err(|e| DbError::Connection(format!("{pragma} failed: {e}")))?;
        }

        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Clone the pool for use in spawned tasks
    pub fn pool_clone(&self) -> SqlitePool {
        self.pool.clone()
    }
}
