//! Broker boundary
//!
//! The engine talks to the outside world only through the [`Broker`]
//! trait; the REST adapter absorbs every quirk of the real feed so the
//! scorer and sequencer stay deterministic.

pub mod rest;

pub use rest::RestBroker;

use crate::types::{Candle, Direction, TradeOutcome};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Handle for one placed option
#[derive(Debug, Clone)]
pub struct OrderTicket {
    /// Broker-side id; None when the broker confirmed the placement
    /// without returning a handle, which makes the outcome unverifiable
    pub order_id: Option<i64>,
    pub asset: String,
    pub direction: Direction,
    pub stake: Decimal,
    pub placed_at: DateTime<Utc>,
    pub expiry_minutes: u32,
}

/// Result of an order placement attempt
#[derive(Debug, Clone)]
pub enum PlaceResult {
    Placed(OrderTicket),
    Failed,
}

/// Everything a trading session needs from the outside world.
///
/// `fetch_candles` reports transient upstream trouble as an empty series
/// rather than an error; the scan loop treats short series as
/// insufficient data either way.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn fetch_candles(
        &self,
        asset: &str,
        timeframe_secs: u32,
        count: u32,
    ) -> Result<Vec<Candle>>;

    async fn place_order(
        &self,
        asset: &str,
        stake: Decimal,
        direction: Direction,
        expiry_minutes: u32,
    ) -> Result<PlaceResult>;

    /// Wait out the option's lifetime, then report how it settled
    async fn resolve_outcome(&self, ticket: &OrderTicket) -> Result<TradeOutcome>;

    async fn get_balance(&self) -> Result<Decimal>;
}
