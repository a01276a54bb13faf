//! Database schema definitions

/// SQL to create all tables
/// NOTE: All stakes/profits stored as TEXT to preserve rust_decimal::Decimal precision
pub const CREATE_TABLES: &str = r#"
-- Per-asset recovery sequence snapshots (one row per asset, overwritten in place)
CREATE TABLE IF NOT EXISTS sequence_states (
    asset TEXT PRIMARY KEY,
    current_stake TEXT NOT NULL,
    consecutive_losses INTEGER NOT NULL DEFAULT 0,
    total_profit TEXT NOT NULL DEFAULT '0',
    trade_count INTEGER NOT NULL DEFAULT 0,
    last_update TEXT NOT NULL
);

-- Append-only trade log (one row per placement attempt, never rewritten)
CREATE TABLE IF NOT EXISTS trade_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    asset TEXT NOT NULL,
    direction TEXT NOT NULL,
    stake TEXT NOT NULL,
    outcome TEXT NOT NULL,
    balance TEXT NOT NULL DEFAULT '0',
    profit TEXT NOT NULL DEFAULT '0',
    recovery_step INTEGER NOT NULL DEFAULT 0,
    info TEXT NOT NULL DEFAULT ''
);

-- ========== INDEXES ==========

-- Trade log indexes
CREATE INDEX IF NOT EXISTS idx_trade_log_asset ON trade_log(asset);
CREATE INDEX IF NOT EXISTS idx_trade_log_timestamp ON trade_log(timestamp)
"#;
