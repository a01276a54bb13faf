//! OTC Pilot Engine — signal evaluation and trade sequencing
//!
//! Self-contained crate with everything between the broker's REST API
//! and the SQLite store. Provides:
//! - EMA / RSI / MACD / support-resistance indicator kernels
//! - Candlestick shape classifier and historical pattern memory
//! - Weighted signal scorer with per-asset diagnostics
//! - Martingale-style recovery sequencer with durable state
//! - Scan-loop coordinator running one sequence task per asset

pub mod broker;
pub mod candlesticks;
pub mod config;
pub mod coordinator;
pub mod indicators;
pub mod patterns;
pub mod scorer;
pub mod sequencer;
pub mod types;

// Re-exports for convenience
pub use broker::{Broker, OrderTicket, PlaceResult, RestBroker};
pub use candlesticks::{detect, CandleShape};
pub use config::BotConfig;
pub use coordinator::{Coordinator, ShutdownToken};
pub use patterns::{PatternMemory, PatternOutcome};
pub use scorer::{evaluate, Signal, SignalSnapshot};
pub use sequencer::{
    BalanceTracker, RecoverySequencer, SequenceEnd, SequenceReport, SequenceState,
    SequencerSettings,
};
pub use types::*;
