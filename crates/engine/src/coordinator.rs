//! Execution coordinator
//!
//! Owns the scan loop: polls candles per asset, evaluates signals, and
//! spawns one recovery sequence per firing asset. The loop itself never
//! awaits a trade; sequences run as independent tasks and are reaped on
//! the next pass.

use crate::broker::Broker;
use crate::config::BotConfig;
use crate::patterns::{PatternMemory, PatternOutcome, PATTERN_WINDOW};
use crate::scorer::{evaluate, MIN_CANDLES};
use crate::sequencer::{
    BalanceTracker, RecoverySequencer, SequenceReport, SequenceState, SequencerSettings,
};
use crate::types::{Candle, Direction, TradeOutcome};
use anyhow::{Context, Result};
use persistence::repository::StateRepository;
use persistence::SqlitePool;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Granularity of the idle wait between scan passes
const IDLE_CHUNK: Duration = Duration::from_millis(250);

/// Rolling window the dispatch limiter counts against
const DISPATCH_WINDOW: Duration = Duration::from_secs(60);

// ============================================================================
// Shutdown signalling
// ============================================================================

/// Cooperative stop flag shared between the coordinator and its sequences.
///
/// Requesting shutdown stops new placements; trades already awaiting
/// resolution run to completion.
#[derive(Debug, Clone, Default)]
pub struct ShutdownToken {
    flag: Arc<AtomicBool>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Dispatch rate limiting
// ============================================================================

/// Caps sequence dispatches inside a rolling window
struct DispatchLimiter {
    max: usize,
    window: Duration,
    stamps: VecDeque<Instant>,
}

impl DispatchLimiter {
    fn new(max: usize, window: Duration) -> Self {
        Self {
            max,
            window,
            stamps: VecDeque::new(),
        }
    }

    /// Take a dispatch slot at `now`. Refusals do not consume a slot.
    fn try_acquire(&mut self, now: Instant) -> bool {
        while let Some(front) = self.stamps.front() {
            if now.duration_since(*front) >= self.window {
                self.stamps.pop_front();
            } else {
                break;
            }
        }
        if self.stamps.len() < self.max {
            self.stamps.push_back(now);
            true
        } else {
            false
        }
    }
}

// ============================================================================
// Pattern labelling
// ============================================================================

/// Label a dispatch window by how the sequence's opening trade resolved:
/// a win confirms the placed direction, a loss confirms its opposite, and
/// anything unresolved is kept without a direction.
fn realized_label(direction: Direction, first_outcome: Option<TradeOutcome>) -> PatternOutcome {
    match first_outcome {
        Some(TradeOutcome::Win) => direction_label(direction),
        Some(TradeOutcome::Loss) => direction_label(direction.opposite()),
        _ => PatternOutcome::Unknown,
    }
}

fn direction_label(direction: Direction) -> PatternOutcome {
    match direction {
        Direction::Call => PatternOutcome::Call,
        Direction::Put => PatternOutcome::Put,
    }
}

// ============================================================================
// Coordinator
// ============================================================================

struct ActiveSequence {
    handle: JoinHandle<Result<SequenceReport>>,
    /// Trailing closes at dispatch time, kept for pattern learning
    window: Vec<f64>,
}

/// Scan loop owner. Holds the pattern memory, the set of halted assets
/// and the per-asset cooldowns; sequences only share the broker, the
/// pool and the balance tracker.
pub struct Coordinator {
    cfg: BotConfig,
    broker: Arc<dyn Broker>,
    pool: SqlitePool,
    patterns: PatternMemory,
    balance: Arc<BalanceTracker>,
    active: HashMap<String, ActiveSequence>,
    halted: HashSet<String>,
    cooldown_until: HashMap<String, Instant>,
    limiter: DispatchLimiter,
    shutdown: ShutdownToken,
}

impl Coordinator {
    pub fn new(
        cfg: BotConfig,
        broker: Arc<dyn Broker>,
        pool: SqlitePool,
        shutdown: ShutdownToken,
    ) -> Self {
        let balance = Arc::new(BalanceTracker::new(cfg.fallback_balance));
        let limiter = DispatchLimiter::new(cfg.max_trades_per_min, DISPATCH_WINDOW);
        Self {
            cfg,
            broker,
            pool,
            patterns: PatternMemory::new(),
            balance,
            active: HashMap::new(),
            halted: HashSet::new(),
            cooldown_until: HashMap::new(),
            limiter,
            shutdown,
        }
    }

    /// Drive scan passes until shutdown, then wait out in-flight sequences.
    pub async fn run(mut self) -> Result<()> {
        self.seed_balance().await;
        self.preload_halted().await?;

        info!(
            assets = self.cfg.assets.len(),
            interval_secs = self.cfg.scan_interval_secs,
            "Scan loop started"
        );

        while !self.shutdown.is_requested() {
            self.reap_finished().await;
            self.scan_assets().await;
            self.idle_wait().await;
        }

        self.drain().await;
        Ok(())
    }

    async fn seed_balance(&self) {
        match self.broker.get_balance().await {
            Ok(remote) => {
                self.balance.set(remote);
                info!(balance = %remote, "Account balance");
            }
            Err(e) => {
                warn!(
                    error = %e,
                    fallback = %self.cfg.fallback_balance,
                    "Balance unavailable; tracking locally from the fallback seed"
                );
            }
        }
    }

    /// Assets whose saved state already violates a stop condition start
    /// halted instead of immediately re-dispatching after a restart.
    async fn preload_halted(&mut self) -> Result<()> {
        let settings = SequencerSettings::from_config(&self.cfg);
        let repo = StateRepository::new(&self.pool);
        let records = repo
            .load_all()
            .await
            .context("loading saved sequence states")?;

        for record in records {
            match SequenceState::from_record(&record) {
                Ok(state) => {
                    if let Some(reason) = settings.stop_reason(&state) {
                        warn!(
                            asset = %record.asset,
                            reason = ?reason,
                            losses = state.consecutive_losses,
                            profit = %state.total_profit,
                            "Asset starts halted from saved state"
                        );
                        self.halted.insert(record.asset);
                    }
                }
                Err(e) => {
                    warn!(asset = %record.asset, error = %e, "Ignoring unreadable saved state");
                }
            }
        }
        Ok(())
    }

    async fn scan_assets(&mut self) {
        let now = Instant::now();
        self.cooldown_until.retain(|_, until| *until > now);

        let assets = self.cfg.assets.clone();
        for asset in assets {
            if self.shutdown.is_requested() {
                return;
            }
            if !self.is_eligible(&asset, now) {
                continue;
            }

            let candles = match self
                .broker
                .fetch_candles(&asset, self.cfg.timeframe_secs, self.cfg.candle_count)
                .await
            {
                Ok(candles) => candles,
                Err(e) => {
                    warn!(asset = %asset, error = %e, "Candle fetch failed");
                    continue;
                }
            };
            if candles.len() < MIN_CANDLES {
                debug!(asset = %asset, count = candles.len(), "Insufficient candle history");
                continue;
            }

            let signal = evaluate(&asset, &candles, &self.patterns);
            let Some(direction) = signal.direction else {
                debug!(
                    asset = %asset,
                    bull = signal.snapshot.bull_score,
                    bear = signal.snapshot.bear_score,
                    "Hold"
                );
                continue;
            };

            if !self.limiter.try_acquire(Instant::now()) {
                info!(asset = %asset, "Dispatch budget exhausted; deferring to next scan");
                break;
            }

            info!(
                asset = %asset,
                direction = direction.as_str(),
                confidence = signal.confidence,
                "Signal fired"
            );
            self.dispatch(&asset, direction, &candles);
        }
    }

    /// One active sequence per asset; the asset stays off the scan list
    /// until the sequence is reaped.
    fn dispatch(&mut self, asset: &str, direction: Direction, candles: &[Candle]) {
        let window: Vec<f64> = candles[candles.len() - PATTERN_WINDOW..]
            .iter()
            .map(|c| c.close)
            .collect();

        let sequencer = RecoverySequencer::new(
            asset,
            direction,
            SequencerSettings::from_config(&self.cfg),
            Arc::clone(&self.broker),
            self.pool.clone(),
            Arc::clone(&self.balance),
            self.shutdown.clone(),
        );
        let handle = tokio::spawn(sequencer.run());

        self.active
            .insert(asset.to_string(), ActiveSequence { handle, window });
    }

    async fn reap_finished(&mut self) {
        let done: Vec<String> = self
            .active
            .iter()
            .filter(|(_, seq)| seq.handle.is_finished())
            .map(|(asset, _)| asset.clone())
            .collect();

        for asset in done {
            let Some(seq) = self.active.remove(&asset) else {
                continue;
            };
            match seq.handle.await {
                Ok(Ok(report)) => {
                    self.absorb_report(&asset, &seq.window, &report, Instant::now());
                }
                Ok(Err(e)) => {
                    error!(asset = %asset, error = %e, "Sequence aborted");
                    self.cooldown_until
                        .insert(asset, Instant::now() + self.cfg.cooldown_after_loss());
                }
                Err(e) => {
                    error!(asset = %asset, error = %e, "Sequence task failed");
                    self.cooldown_until
                        .insert(asset, Instant::now() + self.cfg.cooldown_after_loss());
                }
            }
        }
    }

    fn absorb_report(
        &mut self,
        asset: &str,
        window: &[f64],
        report: &SequenceReport,
        now: Instant,
    ) {
        self.patterns.record(
            asset,
            window,
            realized_label(report.direction, report.first_outcome),
        );

        if report.halts_asset() {
            warn!(
                asset = %asset,
                end = ?report.end,
                profit_delta = %report.profit_delta,
                "Asset halted"
            );
            self.halted.insert(asset.to_string());
        } else if report.profit_delta < Decimal::ZERO {
            info!(
                asset = %asset,
                cooldown_secs = self.cfg.cooldown_after_loss_secs,
                "Losing sequence; asset cooling down"
            );
            self.cooldown_until
                .insert(asset.to_string(), now + self.cfg.cooldown_after_loss());
        }
    }

    fn is_eligible(&self, asset: &str, now: Instant) -> bool {
        if self.active.contains_key(asset) || self.halted.contains(asset) {
            return false;
        }
        match self.cooldown_until.get(asset) {
            Some(until) => *until <= now,
            None => true,
        }
    }

    /// Sleep the scan interval in small chunks so a shutdown request is
    /// honored within a fraction of a second.
    async fn idle_wait(&self) {
        let deadline = Instant::now() + self.cfg.scan_interval();
        while !self.shutdown.is_requested() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep((deadline - now).min(IDLE_CHUNK)).await;
        }
    }

    /// In-flight sequences already saw the shutdown token; wait for their
    /// current trade to settle rather than abandoning open positions.
    async fn drain(&mut self) {
        if self.active.is_empty() {
            info!("Shutdown complete");
            return;
        }
        info!(active = self.active.len(), "Waiting for in-flight sequences");
        for (asset, seq) in self.active.drain() {
            match seq.handle.await {
                Ok(Ok(report)) => {
                    info!(
                        asset = %asset,
                        end = ?report.end,
                        profit_delta = %report.profit_delta,
                        "Sequence drained"
                    );
                }
                Ok(Err(e)) => error!(asset = %asset, error = %e, "Sequence aborted during shutdown"),
                Err(e) => error!(asset = %asset, error = %e, "Sequence task failed during shutdown"),
            }
        }
        info!("Shutdown complete");
    }
}
