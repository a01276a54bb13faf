//! Technical indicators for the signal scorer
//!
//! Batch implementations over close/high/low series. The exact formulas
//! here are load-bearing: the scorer thresholds were tuned against EMA
//! seeded from the first sample and RSI built from simple rolling means
//! of clipped deltas, so these must not be swapped for smoothed variants.

// ============================================================================
// Moving averages
// ============================================================================

/// Exponential moving average with alpha = 2 / (span + 1).
///
/// The first output equals the first input sample; every later value
/// follows `ema = prev + alpha * (x - prev)`. Output length matches input.
pub fn ema(series: &[f64], span: usize) -> Vec<f64> {
    let alpha = 2.0 / (span as f64 + 1.0);
    let mut out = Vec::with_capacity(series.len());
    let mut prev = match series.first() {
        Some(&first) => first,
        None => return out,
    };
    out.push(prev);
    for &x in &series[1..] {
        prev += alpha * (x - prev);
        out.push(prev);
    }
    out
}

// ============================================================================
// RSI
// ============================================================================

/// Relative strength index from simple rolling means of clipped deltas.
///
/// `rs = mean(gains) / (mean(losses) + 1e-9)` over the trailing `window`
/// deltas, `rsi = 100 - 100 / (1 + rs)`. Entries before a full window of
/// deltas exists are NaN. Values always land in [0, 100].
pub fn rsi(series: &[f64], window: usize) -> Vec<f64> {
    let n = series.len();
    let mut out = vec![f64::NAN; n];
    if n < 2 || window == 0 {
        return out;
    }

    // gains[i] / losses[i] describe the move from series[i-1] to series[i]
    let mut gains = vec![0.0; n];
    let mut losses = vec![0.0; n];
    for i in 1..n {
        let delta = series[i] - series[i - 1];
        if delta > 0.0 {
            gains[i] = delta;
        } else {
            losses[i] = -delta;
        }
    }

    for i in window..n {
        let start = i + 1 - window;
        let up: f64 = gains[start..=i].iter().sum::<f64>() / window as f64;
        let down: f64 = losses[start..=i].iter().sum::<f64>() / window as f64;
        let rs = up / (down + 1e-9);
        out[i] = 100.0 - 100.0 / (1.0 + rs);
    }

    out
}

// ============================================================================
// MACD
// ============================================================================

/// MACD line, signal line and histogram, all aligned to the input series
#[derive(Debug, Clone)]
pub struct MacdSeries {
    pub macd: Vec<f64>,
    pub signal: Vec<f64>,
    pub histogram: Vec<f64>,
}

/// MACD: `ema(fast) - ema(slow)` with an EMA of the line as signal.
pub fn macd(series: &[f64], fast: usize, slow: usize, signal_span: usize) -> MacdSeries {
    let fast_ema = ema(series, fast);
    let slow_ema = ema(series, slow);
    let line: Vec<f64> = fast_ema
        .iter()
        .zip(slow_ema.iter())
        .map(|(f, s)| f - s)
        .collect();
    let signal = ema(&line, signal_span);
    let histogram: Vec<f64> = line
        .iter()
        .zip(signal.iter())
        .map(|(m, s)| m - s)
        .collect();

    MacdSeries {
        macd: line,
        signal,
        histogram,
    }
}

// ============================================================================
// Support / resistance
// ============================================================================

/// Latest rolling support and resistance levels.
///
/// Support is the minimum low and resistance the maximum high over the
/// trailing `window` candles (the whole series when shorter). Returns
/// `(support, resistance)`; NaN for empty input.
pub fn support_resistance(highs: &[f64], lows: &[f64], window: usize) -> (f64, f64) {
    if highs.is_empty() || lows.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    let lo_start = lows.len().saturating_sub(window);
    let hi_start = highs.len().saturating_sub(window);

    let support = lows[lo_start..]
        .iter()
        .copied()
        .fold(f64::INFINITY, f64::min);
    let resistance = highs[hi_start..]
        .iter()
        .copied()
        .fold(f64::NEG_INFINITY, f64::max);

    (support, resistance)
}
