//! Weighted signal scorer
//!
//! Combines indicator events, candlestick shapes and historical pattern
//! matches into directional tallies. A direction is only emitted when its
//! tally reaches the threshold and strictly beats the opposing side; the
//! weights below are tuned as a set and individual bumps shift the whole
//! dispatch rate.

use crate::candlesticks::{self, CandleShape};
use crate::indicators;
use crate::patterns::{PatternMemory, PatternOutcome, MATCH_THRESHOLD, PATTERN_WINDOW};
use crate::types::{Candle, Direction};
use serde::{Deserialize, Serialize};

/// Minimum candle history before any scoring happens
pub const MIN_CANDLES: usize = 30;

const EMA_FAST_SPAN: usize = 10;
const EMA_SLOW_SPAN: usize = 20;
const RSI_WINDOW: usize = 14;
const RSI_OVERSOLD: f64 = 30.0;
const RSI_OVERBOUGHT: f64 = 70.0;
const MACD_FAST: usize = 12;
const MACD_SLOW: usize = 26;
const MACD_SIGNAL: usize = 9;
const LEVEL_WINDOW: usize = 20;
const LEVEL_PROXIMITY_PCT: f64 = 0.01;
const PATTERN_MIN_SIMILARITY: f64 = 0.85;

const WEIGHT_REVERSAL_SHAPE: u32 = 2;
const WEIGHT_EMA_CROSS: u32 = 2;
const WEIGHT_RSI_EXTREME: u32 = 1;
const WEIGHT_MACD_FLIP: u32 = 2;
const WEIGHT_EMA_SIDE: u32 = 1;
const WEIGHT_LEVEL_PROXIMITY: u32 = 1;
const WEIGHT_PATTERN_MATCH: u32 = 2;

/// Tally a side must reach before a signal is emitted
const SIGNAL_THRESHOLD: u32 = 5;

/// Everything the scorer looked at, kept for log lines and postmortems
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignalSnapshot {
    pub ema_fast: f64,
    pub ema_slow: f64,
    pub rsi: f64,
    pub macd_hist_prev: f64,
    pub macd_hist_last: f64,
    pub support: f64,
    pub resistance: f64,
    pub shapes: Vec<CandleShape>,
    pub top_similarity: Option<f64>,
    pub top_outcome: Option<PatternOutcome>,
    pub bull_score: u32,
    pub bear_score: u32,
}

/// Scorer verdict for one asset at one scan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub direction: Option<Direction>,
    pub confidence: f64,
    pub snapshot: SignalSnapshot,
}

impl Signal {
    /// Hold verdict with nothing computed
    pub fn hold() -> Self {
        Self {
            direction: None,
            confidence: 0.0,
            snapshot: SignalSnapshot::default(),
        }
    }
}

fn near_level(price: f64, level: f64) -> bool {
    level.is_finite() && level > 0.0 && ((price - level) / level).abs() <= LEVEL_PROXIMITY_PCT
}

/// Turn tallies into a verdict. Confidence is tally / 10 capped at 1.0.
fn decide(bull: u32, bear: u32) -> (Option<Direction>, f64) {
    if bull >= SIGNAL_THRESHOLD && bull > bear {
        (Some(Direction::Call), confidence(bull))
    } else if bear >= SIGNAL_THRESHOLD && bear > bull {
        (Some(Direction::Put), confidence(bear))
    } else {
        (None, 0.0)
    }
}

fn confidence(tally: u32) -> f64 {
    (tally as f64 / 10.0).min(1.0)
}

/// Score one asset's candle history against the pattern memory.
///
/// Series shorter than [`MIN_CANDLES`] return a hold verdict without
/// touching the indicators; identical inputs always produce identical
/// verdicts.
pub fn evaluate(asset: &str, candles: &[Candle], memory: &PatternMemory) -> Signal {
    if candles.len() < MIN_CANDLES {
        return Signal::hold();
    }

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let highs: Vec<f64> = candles.iter().map(|c| c.high).collect();
    let lows: Vec<f64> = candles.iter().map(|c| c.low).collect();
    let last = closes.len() - 1;

    let ema_fast = indicators::ema(&closes, EMA_FAST_SPAN);
    let ema_slow = indicators::ema(&closes, EMA_SLOW_SPAN);
    let rsi = indicators::rsi(&closes, RSI_WINDOW);
    let macd = indicators::macd(&closes, MACD_FAST, MACD_SLOW, MACD_SIGNAL);
    let (support, resistance) = indicators::support_resistance(&highs, &lows, LEVEL_WINDOW);

    let shapes = candlesticks::detect(&candles[last - 1], &candles[last]);

    let window = &closes[closes.len() - PATTERN_WINDOW..];
    let matches = memory.query(asset, window, MATCH_THRESHOLD);
    let top = matches.first();

    let mut bull: u32 = 0;
    let mut bear: u32 = 0;

    // One reversal bonus per side no matter how many shapes fired
    if shapes.iter().any(|s| s.is_bullish()) {
        bull += WEIGHT_REVERSAL_SHAPE;
    }
    if shapes.iter().any(|s| s.is_bearish()) {
        bear += WEIGHT_REVERSAL_SHAPE;
    }

    // Cross events compare the previous bar against the latest one
    if ema_fast[last - 1] <= ema_slow[last - 1] && ema_fast[last] > ema_slow[last] {
        bull += WEIGHT_EMA_CROSS;
    }
    if ema_fast[last - 1] >= ema_slow[last - 1] && ema_fast[last] < ema_slow[last] {
        bear += WEIGHT_EMA_CROSS;
    }

    let rsi_last = rsi[last];
    if rsi_last < RSI_OVERSOLD {
        bull += WEIGHT_RSI_EXTREME;
    }
    if rsi_last > RSI_OVERBOUGHT {
        bear += WEIGHT_RSI_EXTREME;
    }

    let hist_prev = macd.histogram[last - 1];
    let hist_last = macd.histogram[last];
    if hist_prev <= 0.0 && hist_last > 0.0 {
        bull += WEIGHT_MACD_FLIP;
    }
    if hist_prev >= 0.0 && hist_last < 0.0 {
        bear += WEIGHT_MACD_FLIP;
    }

    let close = closes[last];
    if close > ema_slow[last] {
        bull += WEIGHT_EMA_SIDE;
    }
    if close < ema_slow[last] {
        bear += WEIGHT_EMA_SIDE;
    }

    if near_level(close, support) {
        bull += WEIGHT_LEVEL_PROXIMITY;
    }
    if near_level(close, resistance) {
        bear += WEIGHT_LEVEL_PROXIMITY;
    }

    if let Some(m) = top {
        if m.similarity > PATTERN_MIN_SIMILARITY {
            match m.outcome {
                PatternOutcome::Call => bull += WEIGHT_PATTERN_MATCH,
                PatternOutcome::Put => bear += WEIGHT_PATTERN_MATCH,
                PatternOutcome::Unknown => {}
            }
        }
    }

    let (direction, confidence) = decide(bull, bear);

    Signal {
        direction,
        confidence,
        snapshot: SignalSnapshot {
            ema_fast: ema_fast[last],
            ema_slow: ema_slow[last],
            rsi: rsi_last,
            macd_hist_prev: hist_prev,
            macd_hist_last: hist_last,
            support,
            resistance,
            shapes,
            top_similarity: top.map(|m| m.similarity),
            top_outcome: top.map(|m| m.outcome),
            bull_score: bull,
            bear_score: bear,
        },
    }
}
