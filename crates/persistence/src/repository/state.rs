//! Sequence state repository — durable per-asset recovery snapshots

use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// One recovery sequence snapshot as stored on disk.
///
/// Stake and profit are kept as strings so Decimal values round-trip
/// without precision loss; parsing back is the engine's concern.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SequenceStateRecord {
    pub asset: String,
    pub current_stake: String,
    pub consecutive_losses: i64,
    pub total_profit: String,
    pub trade_count: i64,
    pub last_update: String,
}

/// Repository for per-asset sequence snapshots
pub struct StateRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> StateRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Load the snapshot for one asset, if any has been written
    pub async fn load(&self, asset: &str) -> DbResult<Option<SequenceStateRecord>> {
        let record = sqlx::query_as::<_, SequenceStateRecord>(
            r#"
            SELECT asset, current_stake, consecutive_losses,
                   total_profit, trade_count, last_update
            FROM sequence_states
            WHERE asset = ?
            "#,
        )
        .bind(asset)
        .fetch_optional(self.pool)
        .await?;

        Ok(record)
    }

    /// Load all snapshots, ordered by asset name
    pub async fn load_all(&self) -> DbResult<Vec<SequenceStateRecord>> {
        let records = sqlx::query_as::<_, SequenceStateRecord>(
            r#"
            SELECT asset, current_stake, consecutive_losses,
                   total_profit, trade_count, last_update
            FROM sequence_states
            ORDER BY asset
            "#,
        )
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }

    /// Overwrite the snapshot for an asset (single UPSERT, atomic in SQLite)
    pub async fn upsert(&self, record: &SequenceStateRecord) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sequence_states (
                asset, current_stake, consecutive_losses,
                total_profit, trade_count, last_update
            ) VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(asset) DO UPDATE SET
                current_stake = excluded.current_stake,
                consecutive_losses = excluded.consecutive_losses,
                total_profit = excluded.total_profit,
                trade_count = excluded.trade_count,
                last_update = excluded.last_update
            "#,
        )
        .bind(&record.asset)
        .bind(&record.current_stake)
        .bind(record.consecutive_losses)
        .bind(&record.total_profit)
        .bind(record.trade_count)
        .bind(&record.last_update)
        .execute(self.pool)
        .await?;

        Ok(())
    }
}
