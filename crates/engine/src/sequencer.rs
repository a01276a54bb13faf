//! Recovery sequencer
//!
//! Runs one stake-scaling sequence for one asset: place, await the
//! settlement, book the outcome, persist, repeat until the sequence wins
//! or a stop condition fires. Every resolution lands in SQLite before
//! the next placement, so a restart resumes exactly where the process
//! died.

use crate::broker::{Broker, PlaceResult};
use crate::config::BotConfig;
use crate::coordinator::ShutdownToken;
use crate::types::{Direction, TradeOutcome};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use persistence::repository::{SequenceStateRecord, StateRepository, TradeLogRecord, TradeLogRepository};
use persistence::SqlitePool;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

/// Fixed payout applied to a winning stake
pub const PAYOUT_RATE: Decimal = dec!(0.80);

// ============================================================================
// Durable sequence state
// ============================================================================

/// Mutable recovery state for one asset, mirrored to SQLite after every
/// settled trade
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceState {
    pub current_stake: Decimal,
    pub consecutive_losses: u32,
    pub total_profit: Decimal,
    pub trade_count: u64,
    pub last_update: DateTime<Utc>,
}

impl SequenceState {
    pub fn fresh(base_stake: Decimal) -> Self {
        Self {
            current_stake: base_stake,
            consecutive_losses: 0,
            total_profit: Decimal::ZERO,
            trade_count: 0,
            last_update: Utc::now(),
        }
    }

    /// Book a win on the current stake: bank the payout, reset the
    /// progression to the base stake.
    pub fn apply_win(&mut self, base_stake: Decimal) {
        self.total_profit += self.current_stake * PAYOUT_RATE;
        self.consecutive_losses = 0;
        self.current_stake = base_stake;
        self.trade_count += 1;
        self.last_update = Utc::now();
    }

    /// Book a loss: subtract the stake, scale the next one. Rounding is
    /// banker's, to cents.
    pub fn apply_loss(&mut self, multiplier: Decimal) {
        self.total_profit -= self.current_stake;
        self.consecutive_losses += 1;
        self.current_stake = (self.current_stake * multiplier).round_dp(2);
        self.trade_count += 1;
        self.last_update = Utc::now();
    }

    /// A placement that never became a position: counts as an attempt,
    /// leaves the progression untouched.
    pub fn apply_failed_attempt(&mut self) {
        self.trade_count += 1;
        self.last_update = Utc::now();
    }

    pub fn to_record(&self, asset: &str) -> SequenceStateRecord {
        SequenceStateRecord {
            asset: asset.to_string(),
            current_stake: self.current_stake.to_string(),
            consecutive_losses: self.consecutive_losses as i64,
            total_profit: self.total_profit.to_string(),
            trade_count: self.trade_count as i64,
            last_update: self.last_update.to_rfc3339(),
        }
    }

    pub fn from_record(record: &SequenceStateRecord) -> Result<Self> {
        Ok(Self {
            current_stake: Decimal::from_str_exact(record.current_stake.trim())
                .context("unreadable current_stake")?,
            consecutive_losses: u32::try_from(record.consecutive_losses)
                .context("unreadable consecutive_losses")?,
            total_profit: Decimal::from_str_exact(record.total_profit.trim())
                .context("unreadable total_profit")?,
            trade_count: u64::try_from(record.trade_count).context("unreadable trade_count")?,
            last_update: DateTime::parse_from_rfc3339(record.last_update.trim())
                .context("unreadable last_update")?
                .with_timezone(&Utc),
        })
    }
}

/// Load an asset's snapshot, falling back to a fresh progression when the
/// row is missing or unreadable. Fallbacks are logged as fresh starts so
/// an operator can tell recovery from first runs.
pub async fn load_or_default(
    repo: &StateRepository<'_>,
    asset: &str,
    base_stake: Decimal,
) -> SequenceState {
    match repo.load(asset).await {
        Ok(Some(record)) => match SequenceState::from_record(&record) {
            Ok(state) => {
                info!(
                    asset,
                    stake = %state.current_stake,
                    losses = state.consecutive_losses,
                    profit = %state.total_profit,
                    "Resuming saved sequence state"
                );
                state
            }
            Err(e) => {
                warn!(asset, error = %e, "Saved sequence state unreadable; starting fresh");
                SequenceState::fresh(base_stake)
            }
        },
        Ok(None) => {
            info!(asset, "No saved sequence state; starting fresh");
            SequenceState::fresh(base_stake)
        }
        Err(e) => {
            warn!(asset, error = %e, "Sequence state load failed; starting fresh");
            SequenceState::fresh(base_stake)
        }
    }
}

// ============================================================================
// Settings and reports
// ============================================================================

/// Knobs one sequence runs under
#[derive(Debug, Clone)]
pub struct SequencerSettings {
    pub base_stake: Decimal,
    pub recovery_multiplier: Decimal,
    pub max_losses: u32,
    pub take_profit: Decimal,
    pub expiry_minutes: u32,
    pub resolution_timeout: Duration,
}

impl SequencerSettings {
    pub fn from_config(cfg: &BotConfig) -> Self {
        Self {
            base_stake: cfg.base_stake,
            recovery_multiplier: cfg.recovery_multiplier,
            max_losses: cfg.max_losses,
            take_profit: cfg.take_profit,
            expiry_minutes: cfg.expiry_minutes,
            resolution_timeout: cfg.resolution_timeout(),
        }
    }

    /// Stop conditions are checked before every placement, including the
    /// first one after a restart.
    pub fn stop_reason(&self, state: &SequenceState) -> Option<SequenceEnd> {
        if state.consecutive_losses >= self.max_losses {
            Some(SequenceEnd::MaxLossesReached)
        } else if state.total_profit >= self.take_profit {
            Some(SequenceEnd::TakeProfitReached)
        } else {
            None
        }
    }
}

/// Why a sequence stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceEnd {
    Won,
    MaxLossesReached,
    TakeProfitReached,
    UnresolvedHalt,
    PlacementFailed,
    ShutdownRequested,
}

/// Summary handed back to the coordinator when a sequence finishes
#[derive(Debug, Clone)]
pub struct SequenceReport {
    pub asset: String,
    pub direction: Direction,
    pub end: SequenceEnd,
    pub first_outcome: Option<TradeOutcome>,
    pub profit_delta: Decimal,
    pub trades_placed: u32,
}

impl SequenceReport {
    /// Stop conditions take the asset out of the scan rotation
    pub fn halts_asset(&self) -> bool {
        matches!(
            self.end,
            SequenceEnd::MaxLossesReached | SequenceEnd::TakeProfitReached
        )
    }
}

// ============================================================================
// Balance tracking
// ============================================================================

/// Last known account balance, shared across sequences.
///
/// Kept locally so trade records stay meaningful when the broker's
/// balance endpoint is down; a successful remote read overwrites it.
#[derive(Debug)]
pub struct BalanceTracker {
    inner: Mutex<Decimal>,
}

impl BalanceTracker {
    pub fn new(initial: Decimal) -> Self {
        Self {
            inner: Mutex::new(initial),
        }
    }

    pub fn set(&self, value: Decimal) {
        *self.inner.lock().unwrap() = value;
    }

    pub fn apply(&self, delta: Decimal) -> Decimal {
        let mut guard = self.inner.lock().unwrap();
        *guard += delta;
        *guard
    }

    pub fn get(&self) -> Decimal {
        *self.inner.lock().unwrap()
    }
}

// ============================================================================
// The sequencer itself
// ============================================================================

/// One recovery sequence for one asset and direction
pub struct RecoverySequencer {
    asset: String,
    direction: Direction,
    settings: SequencerSettings,
    broker: Arc<dyn Broker>,
    pool: SqlitePool,
    balance: Arc<BalanceTracker>,
    shutdown: ShutdownToken,
}

impl RecoverySequencer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        asset: impl Into<String>,
        direction: Direction,
        settings: SequencerSettings,
        broker: Arc<dyn Broker>,
        pool: SqlitePool,
        balance: Arc<BalanceTracker>,
        shutdown: ShutdownToken,
    ) -> Self {
        Self {
            asset: asset.into(),
            direction,
            settings,
            broker,
            pool,
            balance,
            shutdown,
        }
    }

    /// Drive the sequence to its end. Errors out only when persistence
    /// fails; broker trouble is absorbed into outcomes.
    pub async fn run(self) -> Result<SequenceReport> {
        let state_repo = StateRepository::new(&self.pool);
        let trade_repo = TradeLogRepository::new(&self.pool);

        let mut state = load_or_default(&state_repo, &self.asset, self.settings.base_stake).await;
        let profit_before = state.total_profit;
        let mut trades_placed: u32 = 0;
        let mut first_outcome: Option<TradeOutcome> = None;

        let end = loop {
            if self.shutdown.is_requested() {
                info!(asset = %self.asset, "Shutdown requested; no further placements");
                break SequenceEnd::ShutdownRequested;
            }
            if let Some(stop) = self.settings.stop_reason(&state) {
                warn!(
                    asset = %self.asset,
                    reason = ?stop,
                    losses = state.consecutive_losses,
                    profit = %state.total_profit,
                    "Stop condition reached"
                );
                break stop;
            }

            let stake = state.current_stake;
            let step = state.consecutive_losses;
            info!(
                asset = %self.asset,
                direction = self.direction.as_str(),
                stake = %stake,
                step,
                "Placing order"
            );

            let ticket = match self
                .broker
                .place_order(&self.asset, stake, self.direction, self.settings.expiry_minutes)
                .await
            {
                Ok(PlaceResult::Placed(ticket)) => ticket,
                Ok(PlaceResult::Failed) => {
                    warn!(asset = %self.asset, "Placement rejected; ending sequence");
                    trades_placed += 1;
                    state.apply_failed_attempt();
                    self.settle(
                        &trade_repo,
                        &state_repo,
                        &state,
                        stake,
                        step,
                        "error",
                        "placement rejected by broker",
                        Decimal::ZERO,
                    )
                    .await?;
                    break SequenceEnd::PlacementFailed;
                }
                Err(e) => {
                    warn!(asset = %self.asset, error = %e, "Placement errored; ending sequence");
                    trades_placed += 1;
                    state.apply_failed_attempt();
                    self.settle(
                        &trade_repo,
                        &state_repo,
                        &state,
                        stake,
                        step,
                        "error",
                        &format!("placement error: {e}"),
                        Decimal::ZERO,
                    )
                    .await?;
                    break SequenceEnd::PlacementFailed;
                }
            };
            trades_placed += 1;

            let outcome = match tokio::time::timeout(
                self.settings.resolution_timeout,
                self.broker.resolve_outcome(&ticket),
            )
            .await
            {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => {
                    warn!(asset = %self.asset, error = %e, "Resolution failed");
                    TradeOutcome::Unknown
                }
                Err(_) => {
                    warn!(
                        asset = %self.asset,
                        timeout_secs = self.settings.resolution_timeout.as_secs(),
                        "Resolution timed out"
                    );
                    TradeOutcome::Unknown
                }
            };
            if first_outcome.is_none() {
                first_outcome = Some(outcome);
            }

            let note = match ticket.order_id {
                Some(id) => format!("order {id}"),
                None => "order without id".to_string(),
            };

            match outcome {
                TradeOutcome::Win => {
                    state.apply_win(self.settings.base_stake);
                    info!(
                        asset = %self.asset,
                        stake = %stake,
                        profit = %state.total_profit,
                        "Trade won; sequence complete"
                    );
                    self.settle(
                        &trade_repo,
                        &state_repo,
                        &state,
                        stake,
                        step,
                        "win",
                        &note,
                        stake * PAYOUT_RATE,
                    )
                    .await?;
                    break SequenceEnd::Won;
                }
                TradeOutcome::Loss => {
                    state.apply_loss(self.settings.recovery_multiplier);
                    warn!(
                        asset = %self.asset,
                        stake = %stake,
                        losses = state.consecutive_losses,
                        next_stake = %state.current_stake,
                        "Trade lost; scaling stake"
                    );
                    self.settle(
                        &trade_repo, &state_repo, &state, stake, step, "loss", &note, -stake,
                    )
                    .await?;
                    // loop back; the stop check runs before the next placement
                }
                TradeOutcome::Unknown => {
                    state.apply_loss(self.settings.recovery_multiplier);
                    warn!(
                        asset = %self.asset,
                        stake = %stake,
                        "Outcome unknown; booked as loss, halting sequence"
                    );
                    self.settle(
                        &trade_repo,
                        &state_repo,
                        &state,
                        stake,
                        step,
                        "unknown",
                        "unresolved within timeout",
                        -stake,
                    )
                    .await?;
                    break SequenceEnd::UnresolvedHalt;
                }
            }
        };

        let report = SequenceReport {
            asset: self.asset.clone(),
            direction: self.direction,
            end,
            first_outcome,
            profit_delta: state.total_profit - profit_before,
            trades_placed,
        };
        info!(
            asset = %report.asset,
            end = ?report.end,
            delta = %report.profit_delta,
            trades = report.trades_placed,
            "Sequence finished"
        );
        Ok(report)
    }

    /// Append the trade record and overwrite the snapshot. Both writes
    /// must land before the sequence moves on; a failure here is fatal to
    /// the sequence and surfaced to the operator.
    #[allow(clippy::too_many_arguments)]
    async fn settle(
        &self,
        trades: &TradeLogRepository<'_>,
        states: &StateRepository<'_>,
        state: &SequenceState,
        stake: Decimal,
        step: u32,
        outcome: &str,
        note: &str,
        balance_delta: Decimal,
    ) -> Result<()> {
        let balance = match self.broker.get_balance().await {
            Ok(remote) => {
                self.balance.set(remote);
                remote
            }
            Err(_) => self.balance.apply(balance_delta),
        };

        let record = TradeLogRecord {
            id: None,
            timestamp: state.last_update.to_rfc3339(),
            asset: self.asset.clone(),
            direction: self.direction.as_str().to_string(),
            stake: stake.to_string(),
            outcome: outcome.to_string(),
            balance: balance.to_string(),
            profit: state.total_profit.to_string(),
            recovery_step: step as i64,
            info: note.to_string(),
        };

        trades
            .append(&record)
            .await
            .context("appending trade record")?;
        states
            .upsert(&state.to_record(&self.asset))
            .await
            .context("persisting sequence state")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::OrderTicket;
    use async_trait::async_trait;
    use persistence::Database;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, Copy)]
    enum Step {
        Win,
        Loss,
        Unknown,
        RejectPlacement,
        Hang,
    }

    struct ScriptedBroker {
        script: Mutex<VecDeque<Step>>,
        placements: Mutex<Vec<Decimal>>,
        pending: Mutex<VecDeque<Step>>,
    }

    impl ScriptedBroker {
        fn new(steps: &[Step]) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(steps.iter().copied().collect()),
                placements: Mutex::new(Vec::new()),
                pending: Mutex::new(VecDeque::new()),
            })
        }

        fn placements(&self) -> Vec<Decimal> {
            self.placements.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Broker for ScriptedBroker {
        async fn fetch_candles(
            &self,
            _asset: &str,
            _timeframe_secs: u32,
            _count: u32,
        ) -> Result<Vec<crate::types::Candle>> {
            Ok(Vec::new())
        }

        async fn place_order(
            &self,
            asset: &str,
            stake: Decimal,
            direction: Direction,
            expiry_minutes: u32,
        ) -> Result<PlaceResult> {
            let step = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .expect("script exhausted");
            self.placements.lock().unwrap().push(stake);
            match step {
                Step::RejectPlacement => Ok(PlaceResult::Failed),
                other => {
                    self.pending.lock().unwrap().push_back(other);
                    Ok(PlaceResult::Placed(OrderTicket {
                        order_id: Some(1),
                        asset: asset.to_string(),
                        direction,
                        stake,
                        placed_at: Utc::now(),
                        expiry_minutes,
                    }))
                }
            }
        }

        async fn resolve_outcome(&self, _ticket: &OrderTicket) -> Result<TradeOutcome> {
            let step = self
                .pending
                .lock()
                .unwrap()
                .pop_front()
                .expect("no pending order");
            match step {
                Step::Win => Ok(TradeOutcome::Win),
                Step::Loss => Ok(TradeOutcome::Loss),
                Step::Unknown => Ok(TradeOutcome::Unknown),
                Step::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(TradeOutcome::Win)
                }
                Step::RejectPlacement => unreachable!(),
            }
        }

        async fn get_balance(&self) -> Result<Decimal> {
            anyhow::bail!("balance endpoint unavailable")
        }
    }

    fn settings(max_losses: u32) -> SequencerSettings {
        SequencerSettings {
            base_stake: dec!(1),
            recovery_multiplier: dec!(2.2),
            max_losses,
            take_profit: dec!(50),
            expiry_minutes: 1,
            resolution_timeout: Duration::from_millis(50),
        }
    }

    async fn run_sequence(
        db: &Database,
        broker: Arc<ScriptedBroker>,
        settings: SequencerSettings,
    ) -> SequenceReport {
        let sequencer = RecoverySequencer::new(
            "EURUSD-OTC",
            Direction::Call,
            settings,
            broker,
            db.pool_clone(),
            Arc::new(BalanceTracker::new(dec!(1000))),
            ShutdownToken::new(),
        );
        sequencer.run().await.unwrap()
    }

    async fn saved_state(db: &Database) -> SequenceState {
        let repo = StateRepository::new(db.pool());
        let record = repo.load("EURUSD-OTC").await.unwrap().unwrap();
        SequenceState::from_record(&record).unwrap()
    }

    fn profit(state: &SequenceState) -> Decimal {
        state.total_profit
    }

    #[test]
    fn test_stake_progression_uses_bankers_rounding() {
        let mut state = SequenceState::fresh(dec!(0.375));
        state.apply_loss(dec!(2.2));
        // 0.825 rounds to the even cent, not up
        assert_eq!(state.current_stake, dec!(0.82));
    }

    #[test]
    fn test_loss_chain_fixture() {
        let mut state = SequenceState::fresh(dec!(1));
        state.apply_loss(dec!(2.2));
        assert_eq!(state.current_stake, dec!(2.2));
        state.apply_loss(dec!(2.2));
        assert_eq!(state.current_stake, dec!(4.84));
        state.apply_loss(dec!(2.2));
        assert_eq!(state.current_stake, dec!(10.65));
        assert_eq!(state.total_profit, dec!(-8.04));
        assert_eq!(state.consecutive_losses, 3);
        assert_eq!(state.trade_count, 3);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let state = SequenceState {
            current_stake: dec!(4.84),
            consecutive_losses: 2,
            total_profit: dec!(-7.5),
            trade_count: 5,
            last_update: Utc::now(),
        };
        let rebuilt = SequenceState::from_record(&state.to_record("EURUSD-OTC")).unwrap();
        assert_eq!(rebuilt, state);
    }

    #[tokio::test]
    async fn test_win_on_first_trade_banks_payout_and_resets() {
        let db = Database::in_memory().await.unwrap();
        let broker = ScriptedBroker::new(&[Step::Win]);

        let report = run_sequence(&db, broker.clone(), settings(5)).await;
        assert_eq!(report.end, SequenceEnd::Won);
        assert_eq!(report.first_outcome, Some(TradeOutcome::Win));
        assert_eq!(report.trades_placed, 1);
        assert_eq!(report.profit_delta, dec!(0.80));
        assert!(!report.halts_asset());

        let state = saved_state(&db).await;
        assert_eq!(state.current_stake, dec!(1));
        assert_eq!(state.consecutive_losses, 0);
        assert_eq!(profit(&state), dec!(0.80));
        assert_eq!(state.trade_count, 1);
    }

    #[tokio::test]
    async fn test_three_losses_reach_max_and_stop() {
        let db = Database::in_memory().await.unwrap();
        let broker = ScriptedBroker::new(&[Step::Loss, Step::Loss, Step::Loss]);

        let report = run_sequence(&db, broker.clone(), settings(3)).await;
        assert_eq!(report.end, SequenceEnd::MaxLossesReached);
        assert_eq!(report.trades_placed, 3);
        assert_eq!(report.profit_delta, dec!(-8.04));
        assert!(report.halts_asset());

        assert_eq!(broker.placements(), vec![dec!(1), dec!(2.2), dec!(4.84)]);

        let state = saved_state(&db).await;
        assert_eq!(state.consecutive_losses, 3);
        assert_eq!(profit(&state), dec!(-8.04));
        assert_eq!(state.current_stake, dec!(10.65));

        let trades = TradeLogRepository::new(db.pool());
        let rows = trades.for_asset("EURUSD-OTC").await.unwrap();
        assert_eq!(rows.len(), 3);
        let steps: Vec<i64> = rows.iter().map(|r| r.recovery_step).collect();
        assert_eq!(steps, vec![0, 1, 2]);
        assert!(rows.iter().all(|r| r.outcome == "loss"));
    }

    #[tokio::test]
    async fn test_loss_then_win_recovers() {
        let db = Database::in_memory().await.unwrap();
        let broker = ScriptedBroker::new(&[Step::Loss, Step::Win]);

        let report = run_sequence(&db, broker.clone(), settings(5)).await;
        assert_eq!(report.end, SequenceEnd::Won);
        assert_eq!(report.first_outcome, Some(TradeOutcome::Loss));
        assert_eq!(report.trades_placed, 2);
        // -1 + 2.2 * 0.80
        assert_eq!(report.profit_delta, dec!(0.76));

        assert_eq!(broker.placements(), vec![dec!(1), dec!(2.2)]);

        let state = saved_state(&db).await;
        assert_eq!(state.current_stake, dec!(1));
        assert_eq!(state.consecutive_losses, 0);
    }

    #[tokio::test]
    async fn test_unknown_books_loss_and_halts_sequence() {
        let db = Database::in_memory().await.unwrap();
        let broker = ScriptedBroker::new(&[Step::Unknown]);

        let report = run_sequence(&db, broker.clone(), settings(5)).await;
        assert_eq!(report.end, SequenceEnd::UnresolvedHalt);
        assert_eq!(report.trades_placed, 1, "must not keep betting blind");
        assert!(!report.halts_asset());

        let state = saved_state(&db).await;
        assert_eq!(state.consecutive_losses, 1);
        assert_eq!(state.current_stake, dec!(2.2));
        assert_eq!(profit(&state), dec!(-1));

        let trades = TradeLogRepository::new(db.pool());
        let rows = trades.for_asset("EURUSD-OTC").await.unwrap();
        assert_eq!(rows[0].outcome, "unknown");
    }

    #[tokio::test]
    async fn test_placement_failure_leaves_progression_untouched() {
        let db = Database::in_memory().await.unwrap();
        let broker = ScriptedBroker::new(&[Step::RejectPlacement]);

        let report = run_sequence(&db, broker.clone(), settings(5)).await;
        assert_eq!(report.end, SequenceEnd::PlacementFailed);
        assert_eq!(report.first_outcome, None);
        assert_eq!(report.profit_delta, Decimal::ZERO);

        let state = saved_state(&db).await;
        assert_eq!(state.current_stake, dec!(1));
        assert_eq!(state.consecutive_losses, 0);
        assert_eq!(state.trade_count, 1, "failed attempts still count");

        let trades = TradeLogRepository::new(db.pool());
        let rows = trades.for_asset("EURUSD-OTC").await.unwrap();
        assert_eq!(rows[0].outcome, "error");
    }

    #[tokio::test]
    async fn test_resumes_progression_from_saved_snapshot() {
        let db = Database::in_memory().await.unwrap();
        let repo = StateRepository::new(db.pool());
        repo.upsert(&SequenceStateRecord {
            asset: "EURUSD-OTC".to_string(),
            current_stake: "4.84".to_string(),
            consecutive_losses: 2,
            total_profit: "-7.5".to_string(),
            trade_count: 5,
            last_update: Utc::now().to_rfc3339(),
        })
        .await
        .unwrap();

        let broker = ScriptedBroker::new(&[Step::Loss]);
        let report = run_sequence(&db, broker.clone(), settings(3)).await;

        // First placement picks up the saved 4.84 stake
        assert_eq!(broker.placements(), vec![dec!(4.84)]);
        assert_eq!(report.end, SequenceEnd::MaxLossesReached);

        let state = saved_state(&db).await;
        assert_eq!(state.consecutive_losses, 3);
        assert_eq!(profit(&state), dec!(-12.34));
        assert_eq!(state.trade_count, 6);
    }

    #[tokio::test]
    async fn test_win_after_recovery_resets_stake_to_base() {
        let db = Database::in_memory().await.unwrap();
        let repo = StateRepository::new(db.pool());
        repo.upsert(&SequenceStateRecord {
            asset: "EURUSD-OTC".to_string(),
            current_stake: "4.84".to_string(),
            consecutive_losses: 2,
            total_profit: "-7.5".to_string(),
            trade_count: 5,
            last_update: Utc::now().to_rfc3339(),
        })
        .await
        .unwrap();

        let broker = ScriptedBroker::new(&[Step::Win]);
        let report = run_sequence(&db, broker.clone(), settings(5)).await;
        assert_eq!(report.end, SequenceEnd::Won);

        let state = saved_state(&db).await;
        // -7.5 + 4.84 * 0.80
        assert_eq!(profit(&state), dec!(-3.628));
        assert_eq!(state.current_stake, dec!(1));
        assert_eq!(state.consecutive_losses, 0);
        assert_eq!(state.trade_count, 6);
    }

    #[tokio::test]
    async fn test_take_profit_stops_before_placing() {
        let db = Database::in_memory().await.unwrap();
        let repo = StateRepository::new(db.pool());
        repo.upsert(&SequenceStateRecord {
            asset: "EURUSD-OTC".to_string(),
            current_stake: "1".to_string(),
            consecutive_losses: 0,
            total_profit: "55".to_string(),
            trade_count: 9,
            last_update: Utc::now().to_rfc3339(),
        })
        .await
        .unwrap();

        let broker = ScriptedBroker::new(&[Step::Win]);
        let report = run_sequence(&db, broker.clone(), settings(5)).await;

        assert_eq!(report.end, SequenceEnd::TakeProfitReached);
        assert_eq!(report.trades_placed, 0);
        assert!(broker.placements().is_empty(), "no order may be placed");
        assert!(report.halts_asset());
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_starts_fresh() {
        let db = Database::in_memory().await.unwrap();
        let repo = StateRepository::new(db.pool());
        repo.upsert(&SequenceStateRecord {
            asset: "EURUSD-OTC".to_string(),
            current_stake: "garbage".to_string(),
            consecutive_losses: 2,
            total_profit: "-7.5".to_string(),
            trade_count: 5,
            last_update: Utc::now().to_rfc3339(),
        })
        .await
        .unwrap();

        let broker = ScriptedBroker::new(&[Step::Win]);
        run_sequence(&db, broker.clone(), settings(5)).await;

        // Fresh defaults, not the corrupt 4.84 progression
        assert_eq!(broker.placements(), vec![dec!(1)]);
    }

    #[tokio::test]
    async fn test_shutdown_prevents_any_placement() {
        let db = Database::in_memory().await.unwrap();
        let broker = ScriptedBroker::new(&[Step::Win]);
        let shutdown = ShutdownToken::new();
        shutdown.request();

        let sequencer = RecoverySequencer::new(
            "EURUSD-OTC",
            Direction::Call,
            settings(5),
            broker.clone(),
            db.pool_clone(),
            Arc::new(BalanceTracker::new(dec!(1000))),
            shutdown,
        );
        let report = sequencer.run().await.unwrap();

        assert_eq!(report.end, SequenceEnd::ShutdownRequested);
        assert_eq!(report.trades_placed, 0);
        assert!(broker.placements().is_empty());
    }

    #[tokio::test]
    async fn test_resolution_timeout_books_unknown() {
        let db = Database::in_memory().await.unwrap();
        let broker = ScriptedBroker::new(&[Step::Hang]);

        let report = run_sequence(&db, broker.clone(), settings(5)).await;
        assert_eq!(report.end, SequenceEnd::UnresolvedHalt);
        assert_eq!(report.first_outcome, Some(TradeOutcome::Unknown));

        let trades = TradeLogRepository::new(db.pool());
        let rows = trades.for_asset("EURUSD-OTC").await.unwrap();
        assert_eq!(rows[0].outcome, "unknown");
    }

    #[tokio::test]
    async fn test_balance_tracker_falls_back_locally() {
        let db = Database::in_memory().await.unwrap();
        let broker = ScriptedBroker::new(&[Step::Loss, Step::Win]);
        let balance = Arc::new(BalanceTracker::new(dec!(1000)));

        let sequencer = RecoverySequencer::new(
            "EURUSD-OTC",
            Direction::Call,
            settings(5),
            broker,
            db.pool_clone(),
            balance.clone(),
            ShutdownToken::new(),
        );
        sequencer.run().await.unwrap();

        // 1000 - 1 + 2.2 * 0.80
        assert_eq!(balance.get(), dec!(1000.76));
    }
}
