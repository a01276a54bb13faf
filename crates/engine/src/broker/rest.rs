//! REST broker adapter
//!
//! The OTC feed is loosely shaped: candle fields drift between payload
//! versions, placements answer with anything from a bare boolean to a
//! full order object, and settled positions spell their result three
//! different ways. All of that probing lives here, in pure helpers the
//! tests can hit without a server.

use crate::broker::{Broker, OrderTicket, PlaceResult};
use crate::config::BotConfig;
use crate::types::{Candle, Direction, TradeOutcome};
use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

/// Seconds past expiry before the first settlement check
const RESOLUTION_BUFFER_SECS: u64 = 5;
/// Settlement check attempts before giving up as unknown
const RESOLUTION_POLLS: u32 = 3;
const RESOLUTION_POLL_INTERVAL_SECS: u64 = 5;
/// Closed positions pulled per settlement check
const HISTORY_LIMIT: u32 = 20;

/// Authenticated client for the broker's REST API
pub struct RestBroker {
    client: Client,
    base_url: String,
    token: String,
}

impl RestBroker {
    /// Log in and build an authenticated client. Fails fast on rejected
    /// credentials so the bot never starts half-connected.
    pub async fn connect(cfg: &BotConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        let url = format!("{}/api/login", cfg.broker_url.trim_end_matches('/'));
        let response = client
            .post(&url)
            .json(&json!({
                "email": cfg.email,
                "password": cfg.password,
                "mode": cfg.account_mode.as_str(),
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Broker login failed {}: {}", status, body);
        }

        let body: Value = response.json().await?;
        let token = match session_token(&body) {
            Some(token) => token,
            None => bail!("Broker login response carried no session token"),
        };

        debug!(mode = cfg.account_mode.as_str(), "Broker session established");

        Ok(Self {
            client,
            base_url: cfg.broker_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    async fn fetch_history(&self) -> Result<Value> {
        let url = format!("{}/api/history?limit={}", self.base_url, HISTORY_LIMIT);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;

        if !response.status().is_success() {
            bail!("history fetch returned {}", response.status());
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl Broker for RestBroker {
    async fn fetch_candles(
        &self,
        asset: &str,
        timeframe_secs: u32,
        count: u32,
    ) -> Result<Vec<Candle>> {
        let url = format!(
            "{}/api/candles?asset={}&timeframe={}&count={}",
            self.base_url, asset, timeframe_secs, count
        );

        let response = match self.client.get(&url).bearer_auth(&self.token).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(asset, error = %e, "Candle fetch failed");
                return Ok(Vec::new());
            }
        };

        if !response.status().is_success() {
            warn!(asset, status = %response.status(), "Candle fetch rejected");
            return Ok(Vec::new());
        }

        let body: Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                warn!(asset, error = %e, "Candle payload was not JSON");
                return Ok(Vec::new());
            }
        };

        let mut candles = parse_candles(&body);
        candles.sort_by_key(|c| c.timestamp);
        debug!(asset, count = candles.len(), "Fetched candles");
        Ok(candles)
    }

    async fn place_order(
        &self,
        asset: &str,
        stake: Decimal,
        direction: Direction,
        expiry_minutes: u32,
    ) -> Result<PlaceResult> {
        let url = format!("{}/api/orders", self.base_url);
        let response = match self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&json!({
                "asset": asset,
                "stake": stake,
                "direction": direction.as_str(),
                "expiry_minutes": expiry_minutes,
            }))
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(asset, error = %e, "Order request failed");
                return Ok(PlaceResult::Failed);
            }
        };

        if !response.status().is_success() {
            warn!(asset, status = %response.status(), "Order rejected");
            return Ok(PlaceResult::Failed);
        }

        let body: Value = response.json().await.unwrap_or(Value::Null);
        match parse_place_response(&body) {
            PlacementReply::Placed(order_id) => Ok(PlaceResult::Placed(OrderTicket {
                order_id,
                asset: asset.to_string(),
                direction,
                stake,
                placed_at: Utc::now(),
                expiry_minutes,
            })),
            PlacementReply::Failed => Ok(PlaceResult::Failed),
        }
    }

    async fn resolve_outcome(&self, ticket: &OrderTicket) -> Result<TradeOutcome> {
        // Hold until the option expires plus a settlement buffer
        let wait = Duration::from_secs(ticket.expiry_minutes as u64 * 60 + RESOLUTION_BUFFER_SECS);
        tokio::time::sleep(wait).await;

        let order_id = match ticket.order_id {
            Some(id) => id,
            None => {
                warn!(asset = %ticket.asset, "Order has no id; outcome unverifiable");
                return Ok(TradeOutcome::Unknown);
            }
        };

        for attempt in 0..RESOLUTION_POLLS {
            match self.fetch_history().await {
                Ok(history) => {
                    let outcome = outcome_from_history(&history, order_id);
                    if outcome != TradeOutcome::Unknown {
                        return Ok(outcome);
                    }
                }
                Err(e) => warn!(order_id, error = %e, "Settlement check failed"),
            }
            if attempt + 1 < RESOLUTION_POLLS {
                tokio::time::sleep(Duration::from_secs(RESOLUTION_POLL_INTERVAL_SECS)).await;
            }
        }

        Ok(TradeOutcome::Unknown)
    }

    async fn get_balance(&self) -> Result<Decimal> {
        let url = format!("{}/api/balance", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;

        if !response.status().is_success() {
            bail!("balance fetch returned {}", response.status());
        }

        let body: Value = response.json().await?;
        match parse_balance(&body) {
            Some(balance) => Ok(balance),
            None => bail!("balance payload carried no readable amount"),
        }
    }
}

// ============================================================================
// Payload probing helpers
// ============================================================================

/// What a placement response boils down to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlacementReply {
    Placed(Option<i64>),
    Failed,
}

fn session_token(body: &Value) -> Option<String> {
    for key in ["token", "session", "ssid"] {
        if let Some(token) = body.get(key).and_then(Value::as_str) {
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }
    None
}

/// Read a numeric field that may arrive as a JSON number or numeric string
fn number_field(entry: &Value, keys: &[&str]) -> Option<f64> {
    for key in keys {
        match entry.get(key) {
            Some(Value::Number(n)) => return n.as_f64(),
            Some(Value::String(s)) => {
                if let Ok(v) = s.trim().parse::<f64>() {
                    return Some(v);
                }
            }
            _ => {}
        }
    }
    None
}

fn int_field(entry: &Value, keys: &[&str]) -> Option<i64> {
    for key in keys {
        match entry.get(key) {
            Some(Value::Number(n)) => return n.as_i64(),
            Some(Value::String(s)) => {
                if let Ok(v) = s.trim().parse::<i64>() {
                    return Some(v);
                }
            }
            _ => {}
        }
    }
    None
}

/// Normalize one raw candle entry. Feeds disagree on key names, so high
/// and low probe max/min as fallbacks and the timestamp tries ts, time
/// and from in that order.
fn candle_from_value(entry: &Value) -> Option<Candle> {
    let timestamp = int_field(entry, &["ts", "time", "from"])?;
    let open = number_field(entry, &["open"])?;
    let close = number_field(entry, &["close"])?;
    let high = number_field(entry, &["high", "max"])?;
    let low = number_field(entry, &["low", "min"])?;
    let volume = number_field(entry, &["volume"]).unwrap_or(0.0);

    Some(Candle {
        timestamp,
        open,
        high,
        low,
        close,
        volume,
    })
}

/// Extract candles from a bare array or a wrapped {"candles": [...]} /
/// {"data": [...]} payload, skipping entries that fail to normalize.
fn parse_candles(body: &Value) -> Vec<Candle> {
    let entries = match body {
        Value::Array(items) => items.as_slice(),
        Value::Object(_) => {
            let nested = ["candles", "data"]
                .iter()
                .find_map(|key| body.get(key).and_then(Value::as_array));
            match nested {
                Some(items) => items.as_slice(),
                None => return Vec::new(),
            }
        }
        _ => return Vec::new(),
    };

    entries.iter().filter_map(candle_from_value).collect()
}

/// Classify a placement response.
///
/// `true` means placed without a handle; objects are probed for an order
/// id and an explicit `success: false` wins over everything else.
fn parse_place_response(body: &Value) -> PlacementReply {
    match body {
        Value::Bool(true) => PlacementReply::Placed(None),
        Value::Bool(false) | Value::Null => PlacementReply::Failed,
        Value::Number(n) => match n.as_i64() {
            Some(id) => PlacementReply::Placed(Some(id)),
            None => PlacementReply::Failed,
        },
        Value::String(s) => match s.trim().parse::<i64>() {
            Ok(id) => PlacementReply::Placed(Some(id)),
            Err(_) => PlacementReply::Failed,
        },
        Value::Object(_) => {
            if body.get("success").and_then(Value::as_bool) == Some(false) {
                return PlacementReply::Failed;
            }
            PlacementReply::Placed(int_field(body, &["id", "position_id", "order_id"]))
        }
        Value::Array(_) => PlacementReply::Failed,
    }
}

/// Settle an order against a closed-positions payload.
///
/// Entries may arrive as an array, an id-keyed map, or wrapped in a
/// positions/history/data envelope. A matching entry resolves through
/// profit sign first, then win flags; no match means unknown.
fn outcome_from_history(history: &Value, order_id: i64) -> TradeOutcome {
    let entries: Vec<&Value> = match history {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => {
            let nested = ["positions", "history", "data"]
                .iter()
                .find_map(|key| history.get(key).and_then(Value::as_array));
            match nested {
                Some(items) => items.iter().collect(),
                None => map.values().collect(),
            }
        }
        _ => return TradeOutcome::Unknown,
    };

    for entry in entries {
        let matches = int_field(entry, &["id", "position_id", "order_id"]) == Some(order_id);
        if !matches {
            continue;
        }

        if let Some(profit) = number_field(entry, &["profit", "pnl"]) {
            return if profit > 0.0 {
                TradeOutcome::Win
            } else {
                TradeOutcome::Loss
            };
        }

        if let Some(win) = entry.get("win") {
            match win {
                Value::Bool(true) => return TradeOutcome::Win,
                Value::Bool(false) => return TradeOutcome::Loss,
                Value::String(s) => match s.as_str() {
                    "win" => return TradeOutcome::Win,
                    "loose" | "lose" | "loss" => return TradeOutcome::Loss,
                    _ => return TradeOutcome::Unknown,
                },
                _ => return TradeOutcome::Unknown,
            }
        }

        return TradeOutcome::Unknown;
    }

    TradeOutcome::Unknown
}

/// Pull a balance out of a bare number, numeric string, or an object with
/// a balance/amount field. String amounts keep full Decimal precision;
/// JSON numbers are rounded to cents.
fn parse_balance(body: &Value) -> Option<Decimal> {
    match body {
        Value::Number(n) => n
            .as_f64()
            .and_then(Decimal::from_f64_retain)
            .map(|d| d.round_dp(2)),
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        Value::Object(_) => {
            for key in ["balance", "amount"] {
                match body.get(key) {
                    Some(Value::Number(n)) => {
                        return n
                            .as_f64()
                            .and_then(Decimal::from_f64_retain)
                            .map(|d| d.round_dp(2));
                    }
                    Some(Value::String(s)) => return Decimal::from_str(s.trim()).ok(),
                    _ => {}
                }
            }
            None
        }
        _ => None,
    }
}
