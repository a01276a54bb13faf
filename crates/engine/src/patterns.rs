//! Historical pattern memory
//!
//! Stores normalized close-price windows per asset together with the
//! outcome that followed, and retrieves the closest matches for the shape
//! currently on the chart. Memory is bounded per asset; the oldest entry
//! falls out once an asset reaches capacity.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};

/// Number of trailing closes that make up one pattern window
pub const PATTERN_WINDOW: usize = 10;

/// Per-asset history bound
pub const PATTERN_CAPACITY: usize = 500;

/// Query cutoff on mean absolute difference between normalized windows
pub const MATCH_THRESHOLD: f64 = 0.15;

/// How many matches a query returns at most
pub const TOP_MATCHES: usize = 5;

/// Direction that would have won the option placed after the pattern.
///
/// Unknown marks windows whose follow-up trade never resolved; they are
/// retained for shape statistics but never argue a direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternOutcome {
    Call,
    Put,
    Unknown,
}

/// One stored window with its realized outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternRecord {
    pub shape: Vec<f64>,
    pub outcome: PatternOutcome,
    pub hash: String,
}

/// A query hit, strongest similarity first
#[derive(Debug, Clone)]
pub struct PatternMatch {
    pub similarity: f64,
    pub outcome: PatternOutcome,
    pub hash: String,
}

/// Bounded per-asset pattern store
#[derive(Debug)]
pub struct PatternMemory {
    histories: HashMap<String, VecDeque<PatternRecord>>,
    capacity: usize,
}

impl Default for PatternMemory {
    fn default() -> Self {
        Self::new()
    }
}

/// Min-max normalize a window into [0, 1].
///
/// Degenerate windows (all values equal) map to a constant 0.5 so they
/// stay comparable instead of dividing by zero.
pub fn normalize(window: &[f64]) -> Vec<f64> {
    let min = window.iter().copied().fold(f64::INFINITY, f64::min);
    let max = window.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    if range == 0.0 || !range.is_finite() {
        return vec![0.5; window.len()];
    }
    window.iter().map(|v| (v - min) / range).collect()
}

/// Short content hash of a normalized shape, for log lines and dedup checks
fn shape_hash(shape: &[f64]) -> String {
    let joined = shape
        .iter()
        .map(|v| format!("{v:.6}"))
        .collect::<Vec<_>>()
        .join(",");
    let digest = Sha256::digest(joined.as_bytes());
    format!("{digest:x}")[..12].to_string()
}

impl PatternMemory {
    pub fn new() -> Self {
        Self::with_capacity(PATTERN_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            histories: HashMap::new(),
            capacity,
        }
    }

    /// Store a window for an asset, evicting the oldest entry at capacity.
    /// Asset histories are created lazily on first record.
    pub fn record(&mut self, asset: &str, window: &[f64], outcome: PatternOutcome) {
        let shape = normalize(window);
        let hash = shape_hash(&shape);
        let history = self
            .histories
            .entry(asset.to_string())
            .or_insert_with(|| VecDeque::with_capacity(self.capacity.min(64)));
        if history.len() >= self.capacity {
            history.pop_front();
        }
        history.push_back(PatternRecord {
            shape,
            outcome,
            hash,
        });
    }

    /// Closest stored windows for an asset, strongest first.
    ///
    /// Distance is the mean absolute difference between normalized windows;
    /// only records under `threshold` qualify and similarity is reported as
    /// `1 - distance`. Unknown assets and mismatched window lengths yield
    /// nothing. Ties keep insertion order, so repeated queries against the
    /// same history are deterministic.
    pub fn query(&self, asset: &str, window: &[f64], threshold: f64) -> Vec<PatternMatch> {
        let history = match self.histories.get(asset) {
            Some(h) => h,
            None => return Vec::new(),
        };
        let current = normalize(window);

        let mut matches: Vec<PatternMatch> = history
            .iter()
            .filter(|record| record.shape.len() == current.len())
            .filter_map(|record| {
                let distance = current
                    .iter()
                    .zip(record.shape.iter())
                    .map(|(a, b)| (a - b).abs())
                    .sum::<f64>()
                    / current.len().max(1) as f64;
                if distance < threshold {
                    Some(PatternMatch {
                        similarity: 1.0 - distance,
                        outcome: record.outcome,
                        hash: record.hash.clone(),
                    })
                } else {
                    None
                }
            })
            .collect();

        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(TOP_MATCHES);
        matches
    }

    /// Number of stored windows for an asset
    pub fn len(&self, asset: &str) -> usize {
        self.histories.get(asset).map(|h| h.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, asset: &str) -> bool {
        self.len(asset) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_maps_to_unit_range() {
        let out = normalize(&[10.0, 20.0, 15.0]);
        assert_eq!(out, vec![0.0, 1.0, 0.5]);
    }

    #[test]
    fn test_normalize_degenerate_window_is_half() {
        let out = normalize(&[7.0; 5]);
        assert_eq!(out, vec![0.5; 5]);
    }

    #[test]
    fn test_query_unknown_asset_is_empty() {
        let memory = PatternMemory::new();
        assert!(memory
            .query("EURUSD-OTC", &[1.0, 2.0, 3.0], MATCH_THRESHOLD)
            .is_empty());
    }

    #[test]
    fn test_identical_window_matches_with_full_similarity() {
        let mut memory = PatternMemory::new();
        let window = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0];
        memory.record("EURUSD-OTC", &window, PatternOutcome::Call);

        let hits = memory.query("EURUSD-OTC", &window, MATCH_THRESHOLD);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].similarity, 1.0);
        assert_eq!(hits[0].outcome, PatternOutcome::Call);
    }

    #[test]
    fn test_scale_invariance_of_shapes() {
        // Same shape at a different price level still matches exactly
        let mut memory = PatternMemory::new();
        memory.record("EURUSD-OTC", &[1.0, 2.0, 3.0], PatternOutcome::Put);

        let hits = memory.query("EURUSD-OTC", &[100.0, 200.0, 300.0], MATCH_THRESHOLD);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].similarity, 1.0);
    }

    #[test]
    fn test_distant_shapes_fall_below_threshold() {
        let mut memory = PatternMemory::new();
        // Rising shape normalizes to 0..1; falling shape is its mirror,
        // mean abs difference well above the cutoff
        memory.record("EURUSD-OTC", &[1.0, 2.0, 3.0, 4.0], PatternOutcome::Call);

        let hits = memory.query("EURUSD-OTC", &[4.0, 3.0, 2.0, 1.0], MATCH_THRESHOLD);
        assert!(hits.is_empty(), "mirrored shape must not match");
    }

    #[test]
    fn test_mismatched_window_lengths_never_match() {
        let mut memory = PatternMemory::new();
        memory.record("EURUSD-OTC", &[1.0, 2.0, 3.0], PatternOutcome::Call);

        let hits = memory.query("EURUSD-OTC", &[1.0, 2.0, 3.0, 4.0], MATCH_THRESHOLD);
        assert!(hits.is_empty());
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut memory = PatternMemory::with_capacity(3);
        memory.record("EURUSD-OTC", &[1.0, 2.0, 1.0], PatternOutcome::Call);
        memory.record("EURUSD-OTC", &[5.0, 6.0, 5.0], PatternOutcome::Put);
        memory.record("EURUSD-OTC", &[2.0, 3.0, 2.0], PatternOutcome::Put);
        memory.record("EURUSD-OTC", &[8.0, 9.0, 8.0], PatternOutcome::Put);

        assert_eq!(memory.len("EURUSD-OTC"), 3);
        // The evicted record was the only Call; every normalized shape here
        // is identical, so all three survivors match as Put
        let hits = memory.query("EURUSD-OTC", &[1.0, 2.0, 1.0], MATCH_THRESHOLD);
        assert_eq!(hits.len(), 3);
        assert!(hits.iter().all(|m| m.outcome == PatternOutcome::Put));
    }

    #[test]
    fn test_histories_are_isolated_per_asset() {
        let mut memory = PatternMemory::new();
        memory.record("EURUSD-OTC", &[1.0, 2.0, 3.0], PatternOutcome::Call);

        assert!(memory
            .query("GBPUSD-OTC", &[1.0, 2.0, 3.0], MATCH_THRESHOLD)
            .is_empty());
        assert_eq!(memory.len("GBPUSD-OTC"), 0);
    }

    #[test]
    fn test_query_caps_result_count() {
        let mut memory = PatternMemory::new();
        for _ in 0..10 {
            memory.record("EURUSD-OTC", &[1.0, 2.0, 3.0], PatternOutcome::Call);
        }

        let hits = memory.query("EURUSD-OTC", &[1.0, 2.0, 3.0], MATCH_THRESHOLD);
        assert_eq!(hits.len(), TOP_MATCHES);
    }

    #[test]
    fn test_tie_break_keeps_insertion_order() {
        let mut memory = PatternMemory::new();
        memory.record("EURUSD-OTC", &[1.0, 2.0, 3.0], PatternOutcome::Call);
        memory.record("EURUSD-OTC", &[10.0, 20.0, 30.0], PatternOutcome::Put);

        // Both normalize identically; the earlier record must come first
        let hits = memory.query("EURUSD-OTC", &[1.0, 2.0, 3.0], MATCH_THRESHOLD);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].outcome, PatternOutcome::Call);
        assert_eq!(hits[1].outcome, PatternOutcome::Put);
    }
}
