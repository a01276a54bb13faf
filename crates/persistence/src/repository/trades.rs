//! Trade log repository — append-only audit trail of placement attempts

use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// A single trade log row.
///
/// `profit` holds the asset's running profit total after the trade
/// settled, not the per-trade delta. `outcome` is one of
/// win / loss / unknown / error.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TradeLogRecord {
    pub id: Option<i64>,
    pub timestamp: String,
    pub asset: String,
    pub direction: String,
    pub stake: String,
    pub outcome: String,
    pub balance: String,
    pub profit: String,
    pub recovery_step: i64,
    pub info: String,
}

/// Aggregated stats over the whole trade log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeStats {
    pub total_trades: i64,
    pub wins: i64,
    pub losses: i64,
    pub win_rate: f64,
    pub last_profit: String,
}

/// Repository for the append-only trade log
pub struct TradeLogRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> TradeLogRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Append one trade record, returning its rowid
    pub async fn append(&self, record: &TradeLogRecord) -> DbResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO trade_log (
                timestamp, asset, direction, stake, outcome,
                balance, profit, recovery_step, info
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.timestamp)
        .bind(&record.asset)
        .bind(&record.direction)
        .bind(&record.stake)
        .bind(&record.outcome)
        .bind(&record.balance)
        .bind(&record.profit)
        .bind(record.recovery_step)
        .bind(&record.info)
        .execute(self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Most recent trades, newest first
    pub async fn recent(&self, limit: i64) -> DbResult<Vec<TradeLogRecord>> {
        let records = sqlx::query_as::<_, TradeLogRecord>(
            r#"
            SELECT id, timestamp, asset, direction, stake, outcome,
                   balance, profit, recovery_step, info
            FROM trade_log
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }

    /// All trades for one asset, oldest first
    pub async fn for_asset(&self, asset: &str) -> DbResult<Vec<TradeLogRecord>> {
        let records = sqlx::query_as::<_, TradeLogRecord>(
            r#"
            SELECT id, timestamp, asset, direction, stake, outcome,
                   balance, profit, recovery_step, info
            FROM trade_log
            WHERE asset = ?
            ORDER BY id ASC
            "#,
        )
        .bind(asset)
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }

    /// Aggregated win/loss stats across the whole log
    pub async fn get_stats(&self) -> DbResult<TradeStats> {
        let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM trade_log")
            .fetch_one(self.pool)
            .await?;

        let wins: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM trade_log WHERE outcome = 'win'")
            .fetch_one(self.pool)
            .await?;

        let losses: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM trade_log WHERE outcome = 'loss'")
                .fetch_one(self.pool)
                .await?;

        // Running profit of the most recent settled trade
        let last: Option<(String,)> =
            sqlx::query_as("SELECT profit FROM trade_log ORDER BY id DESC LIMIT 1")
                .fetch_optional(self.pool)
                .await?;

        let resolved = wins.0 + losses.0;
        let win_rate = if resolved > 0 {
            wins.0 as f64 / resolved as f64 * 100.0
        } else {
            0.0
        };

        Ok(TradeStats {
            total_trades: total.0,
            wins: wins.0,
            losses: losses.0,
            win_rate,
            last_profit: last.map(|(p,)| p).unwrap_or_else(|| "0".to_string()),
        })
    }
}
