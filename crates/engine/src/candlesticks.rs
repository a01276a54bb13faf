//! Candlestick shape classifier
//!
//! Geometric predicates over one or two candles. Shapes feed the signal
//! scorer as reversal evidence; doji is detected but carries no direction.

use crate::types::Candle;
use serde::{Deserialize, Serialize};

/// A recognized candlestick shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandleShape {
    Hammer,
    ShootingStar,
    BullishEngulfing,
    BearishEngulfing,
    Doji,
}

impl CandleShape {
    /// Bullish reversal evidence
    pub fn is_bullish(&self) -> bool {
        matches!(self, CandleShape::Hammer | CandleShape::BullishEngulfing)
    }

    /// Bearish reversal evidence
    pub fn is_bearish(&self) -> bool {
        matches!(
            self,
            CandleShape::ShootingStar | CandleShape::BearishEngulfing
        )
    }
}

fn body(c: &Candle) -> f64 {
    (c.close - c.open).abs()
}

fn upper_shadow(c: &Candle) -> f64 {
    c.high - c.open.max(c.close)
}

fn lower_shadow(c: &Candle) -> f64 {
    c.open.min(c.close) - c.low
}

/// Hammer: bullish close, long lower shadow, clipped upper shadow.
///
/// Requires a nonzero body; the lower shadow must exceed twice the body
/// and the upper shadow must stay below one body.
pub fn is_hammer(c: &Candle) -> bool {
    let b = body(c);
    b > 0.0 && c.close > c.open && lower_shadow(c) > 2.0 * b && upper_shadow(c) < b
}

/// Shooting star: bearish close with the hammer geometry mirrored.
pub fn is_shooting_star(c: &Candle) -> bool {
    let b = body(c);
    b > 0.0 && c.close < c.open && upper_shadow(c) > 2.0 * b && lower_shadow(c) < b
}

/// Bullish engulfing: a bullish body that fully contains the prior
/// bearish body.
pub fn is_bullish_engulfing(prev: &Candle, curr: &Candle) -> bool {
    prev.close < prev.open
        && curr.close > curr.open
        && curr.open < prev.close
        && curr.close > prev.open
}

/// Bearish engulfing: mirror of the bullish case.
pub fn is_bearish_engulfing(prev: &Candle, curr: &Candle) -> bool {
    prev.close > prev.open
        && curr.close < curr.open
        && curr.open > prev.close
        && curr.close < prev.open
}

/// Doji: body under 10% of the candle range. Zero-range candles are not
/// classified.
pub fn is_doji(c: &Candle) -> bool {
    let range = c.high - c.low;
    range > 0.0 && body(c) / range < 0.10
}

/// All shapes present on the latest candle, engulfing checks included.
pub fn detect(prev: &Candle, curr: &Candle) -> Vec<CandleShape> {
    let mut shapes = Vec::new();
    if is_hammer(curr) {
        shapes.push(CandleShape::Hammer);
    }
    if is_shooting_star(curr) {
        shapes.push(CandleShape::ShootingStar);
    }
    if is_bullish_engulfing(prev, curr) {
        shapes.push(CandleShape::BullishEngulfing);
    }
    if is_bearish_engulfing(prev, curr) {
        shapes.push(CandleShape::BearishEngulfing);
    }
    if is_doji(curr) {
        shapes.push(CandleShape::Doji);
    }
    shapes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            timestamp: 0,
            open,
            high,
            low,
            close,
            volume: 100.0,
        }
    }

    #[test]
    fn test_hammer_geometry() {
        // Small bullish body, long lower wick, almost no upper wick
        let h = candle(100.0, 100.6, 98.5, 100.5);
        assert!(is_hammer(&h));
        assert!(!is_shooting_star(&h));

        // Same wick but bearish close is not a hammer
        let bearish = candle(100.5, 100.6, 98.5, 100.0);
        assert!(!is_hammer(&bearish));
    }

    #[test]
    fn test_shooting_star_geometry() {
        let s = candle(100.5, 102.0, 99.9, 100.0);
        assert!(is_shooting_star(&s));
        assert!(!is_hammer(&s));
    }

    #[test]
    fn test_zero_body_is_neither_hammer_nor_star() {
        let flat = candle(100.0, 101.0, 99.0, 100.0);
        assert!(!is_hammer(&flat));
        assert!(!is_shooting_star(&flat));
    }

    #[test]
    fn test_bullish_engulfing_requires_body_containment() {
        let prev = candle(101.0, 101.2, 99.8, 100.0);
        let engulfing = candle(99.9, 101.6, 99.7, 101.5);
        assert!(is_bullish_engulfing(&prev, &engulfing));

        // Opens inside the prior body: no engulfing
        let inside = candle(100.5, 101.6, 100.3, 101.5);
        assert!(!is_bullish_engulfing(&prev, &inside));
    }

    #[test]
    fn test_bearish_engulfing_mirrors_bullish() {
        let prev = candle(100.0, 101.2, 99.8, 101.0);
        let engulfing = candle(101.1, 101.3, 99.4, 99.5);
        assert!(is_bearish_engulfing(&prev, &engulfing));
        assert!(!is_bullish_engulfing(&prev, &engulfing));
    }

    #[test]
    fn test_doji_thresholds() {
        // Body is 5% of the range
        let d = candle(100.0, 101.0, 99.0, 100.1);
        assert!(is_doji(&d));

        // Body is 50% of the range
        let solid = candle(100.0, 101.0, 99.0, 101.0);
        assert!(!is_doji(&solid));

        // Zero range never classifies
        let flat = candle(100.0, 100.0, 100.0, 100.0);
        assert!(!is_doji(&flat));
    }

    #[test]
    fn test_detect_collects_shapes_on_latest_candle() {
        let prev = candle(101.0, 101.2, 99.8, 100.0);
        let engulfing = candle(99.9, 101.6, 99.7, 101.5);
        let shapes = detect(&prev, &engulfing);
        assert!(shapes.contains(&CandleShape::BullishEngulfing));
        assert!(!shapes.contains(&CandleShape::BearishEngulfing));
    }

    #[test]
    fn test_bullish_and_bearish_shapes_are_exclusive() {
        let prev = candle(101.0, 101.2, 99.8, 100.0);
        let curr = candle(100.0, 100.6, 98.5, 100.5);
        let shapes = detect(&prev, &curr);
        let bull = shapes.iter().any(|s| s.is_bullish());
        let bear = shapes.iter().any(|s| s.is_bearish());
        assert!(!(bull && bear), "one candle cannot argue both directions");
    }
}
