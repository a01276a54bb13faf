//! Core types shared across the signal pipeline and executor

use serde::{Deserialize, Serialize};

/// A single candlestick (OHLCV) as normalized from the broker feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Side of a binary option
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Call,
    Put,
}

impl Direction {
    pub fn opposite(&self) -> Self {
        match self {
            Direction::Call => Direction::Put,
            Direction::Put => Direction::Call,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Call => "call",
            Direction::Put => "put",
        }
    }
}

/// Settled result of one placed option.
///
/// Unknown covers every case where the broker could not confirm the
/// result before the resolution timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeOutcome {
    Win,
    Loss,
    Unknown,
}

impl TradeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeOutcome::Win => "win",
            TradeOutcome::Loss => "loss",
            TradeOutcome::Unknown => "unknown",
        }
    }
}

/// Broker account to trade against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountMode {
    Practice,
    Real,
}

impl AccountMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountMode::Practice => "PRACTICE",
            AccountMode::Real => "REAL",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "REAL" => AccountMode::Real,
            _ => AccountMode::Practice,
        }
    }
}
