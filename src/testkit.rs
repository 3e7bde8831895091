// src/testkit.rs
//! Scripted collaborators shared by the unit tests.

use crate::config::{AppConfig, BotConfig, Timeframe};
use crate::connectors::traits::{ExchangeGateway, MarketData};
use crate::core::reliability::RetryPolicy;
use crate::error::GatewayError;
use crate::types::{Candle, OrderReport, OrderRequest, OrderResponse, OrderStatus, Side};
use crate::utils::clock::Clock;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, TimeZone, Utc};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub fn quick_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 2,
        backoff: Duration::ZERO,
        call_timeout: Duration::from_millis(200),
    }
}

/// Reference tunables: size 1, stop 25, trail 10, breakeven 25, IST 08:00-05:00.
pub fn bot_config() -> BotConfig {
    AppConfig::from_toml("").expect("default config").bot
}

/// UTC instant whose IST wall-clock reading is `h:m` on a fixed day.
pub fn ist(h: u32, m: u32) -> DateTime<Utc> {
    FixedOffset::east_opt(330 * 60)
        .unwrap()
        .with_ymd_and_hms(2026, 3, 10, h, m, 0)
        .unwrap()
        .with_timezone(&Utc)
}

pub struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self(Mutex::new(now))
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.0.lock().unwrap() = now;
    }

    pub fn advance_secs(&self, secs: i64) {
        let mut now = self.0.lock().unwrap();
        *now += ChronoDuration::seconds(secs);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Place(OrderRequest),
    Cancel(String),
    List,
}

/// Records every call; listing returns whatever the test scripted.
#[derive(Default)]
pub struct MockExchange {
    calls: Mutex<Vec<Call>>,
    orders: Mutex<Vec<OrderReport>>,
    next_id: AtomicU32,
    fail_place: AtomicBool,
    fail_cancel: AtomicBool,
    fail_list: AtomicBool,
    fill_on_cancel: AtomicBool,
}

impl MockExchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn placed(&self) -> Vec<OrderRequest> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Place(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Cancel(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn set_order(&self, id: &str, side: Side, status: OrderStatus, filled: Option<Decimal>) {
        let mut orders = self.orders.lock().unwrap();
        orders.retain(|o| o.id != id);
        orders.push(OrderReport {
            id: id.to_string(),
            side,
            status,
            filled_price: filled,
        });
    }

    pub fn fail_place(&self, fail: bool) {
        self.fail_place.store(fail, Ordering::SeqCst);
    }

    pub fn fail_cancel(&self, fail: bool) {
        self.fail_cancel.store(fail, Ordering::SeqCst);
    }

    pub fn fail_list(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    /// The cancelled order fills first and the cancel is still acknowledged.
    pub fn fill_on_cancel(&self, fill: bool) {
        self.fill_on_cancel.store(fill, Ordering::SeqCst);
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

fn unavailable() -> GatewayError {
    GatewayError::Api {
        status: 503,
        body: "unavailable".to_string(),
    }
}

#[async_trait]
impl ExchangeGateway for MockExchange {
    async fn place_order(&self, request: &OrderRequest) -> Result<OrderResponse, GatewayError> {
        self.record(Call::Place(request.clone()));
        if self.fail_place.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(OrderResponse {
            id: format!("ord-{}", n),
        })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), GatewayError> {
        self.record(Call::Cancel(order_id.to_string()));
        if self.fail_cancel.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        if self.fill_on_cancel.load(Ordering::SeqCst) {
            let mut orders = self.orders.lock().unwrap();
            for order in orders.iter_mut().filter(|o| o.id == order_id) {
                order.status = OrderStatus::Filled;
            }
        }
        Ok(())
    }

    async fn list_orders(&self) -> Result<Vec<OrderReport>, GatewayError> {
        self.record(Call::List);
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(self.orders.lock().unwrap().clone())
    }
}

/// Serves a fixed candle window and a settable last price.
#[derive(Default)]
pub struct ScriptedMarket {
    candles: Mutex<Vec<Candle>>,
    price: Mutex<Option<Decimal>>,
    candle_requests: AtomicU32,
    fail: AtomicBool,
}

impl ScriptedMarket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_candles(&self, candles: Vec<Candle>) {
        *self.candles.lock().unwrap() = candles;
    }

    pub fn set_price(&self, price: Decimal) {
        *self.price.lock().unwrap() = Some(price);
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn candle_requests(&self) -> u32 {
        self.candle_requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketData for ScriptedMarket {
    async fn candles(
        &self,
        _symbol: &str,
        _interval: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, GatewayError> {
        self.candle_requests.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        let candles = self.candles.lock().unwrap();
        let start = candles.len().saturating_sub(limit);
        Ok(candles[start..].to_vec())
    }

    async fn latest_price(
        &self,
        _symbol: &str,
        _interval: Timeframe,
    ) -> Result<Option<Decimal>, GatewayError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(*self.price.lock().unwrap())
    }
}
