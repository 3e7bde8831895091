// src/types.rs
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One OHLCV interval. The venue returns these in ascending `open_time` order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalDecision {
    None,
    EnterLong(Decimal),
    EnterShort(Decimal),
}

impl SignalDecision {
    /// Side and trigger price of an entry, if any.
    pub fn entry(&self) -> Option<(Side, Decimal)> {
        match *self {
            SignalDecision::None => None,
            SignalDecision::EnterLong(trigger) => Some((Side::Buy, trigger)),
            SignalDecision::EnterShort(trigger) => Some((Side::Sell, trigger)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    StopLimit,
    Market,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub side: Side,
    pub order_type: OrderType,
    pub price: Option<Decimal>,
    pub trigger_price: Option<Decimal>,
    pub quantity: Decimal,
    pub leverage: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResponse {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderStatus {
    Open,
    Filled,
    Cancelled,
    Rejected,
    Unknown(String),
}

impl OrderStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "open" | "init" | "new" | "partially_filled" => OrderStatus::Open,
            "filled" => OrderStatus::Filled,
            "cancelled" | "canceled" | "partially_cancelled" => OrderStatus::Cancelled,
            "rejected" => OrderStatus::Rejected,
            other => OrderStatus::Unknown(other.to_string()),
        }
    }
}

/// An entry from the venue's outstanding-order listing.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderReport {
    pub id: String,
    pub side: Side,
    pub status: OrderStatus,
    pub filled_price: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingOrder {
    pub order_id: String,
    pub side: Side,
    pub trigger_price: Decimal,
    pub quantity: Decimal,
    pub placed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub side: Side,
    pub entry_price: Decimal,
    pub stop_loss_price: Decimal,
    pub quantity: Decimal,
}

impl Position {
    /// Directional profit per unit at `price`.
    pub fn profit_at(&self, price: Decimal) -> Decimal {
        match self.side {
            Side::Buy => price - self.entry_price,
            Side::Sell => self.entry_price - price,
        }
    }
}

// --- Operator surface ---

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControllerSnapshot {
    pub mode: &'static str,
    pub active: bool,
    pub in_session: bool,
    pub last_price: Option<Decimal>,
    pub position: Option<Position>,
    pub pending_order_id: Option<String>,
    pub pending_side: Option<Side>,
}

#[derive(Debug, Clone)]
pub enum UiEvent {
    Snapshot(ControllerSnapshot),
    Log(String),
}
