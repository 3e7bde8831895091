// src/connectors/coindcx.rs
use crate::config::Timeframe;
use crate::connectors::traits::{ExchangeGateway, MarketData};
use crate::error::GatewayError;
use crate::types::{
    Candle, OrderReport, OrderRequest, OrderResponse, OrderStatus, OrderType, Side,
};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, StatusCode};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, info};

type HmacSha256 = Hmac<Sha256>;

const CREATE_ORDER: &str = "/exchange/v1/orders/create";
const CANCEL_ORDER: &str = "/exchange/v1/orders/cancel";
const LIST_ORDERS: &str = "/exchange/v1/orders";
const CANDLES: &str = "/market_data/candles";

pub struct CoinDcxClient {
    api_key: String,
    secret_key: String,
    market: String,
    http_client: Client,
    base_rest_url: String,
    public_url: String,
}

impl CoinDcxClient {
    pub fn new(
        api_key: String,
        secret_key: String,
        market: String,
        base_rest_url: String,
        public_url: String,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        Ok(Self {
            api_key,
            secret_key,
            market,
            http_client: Client::builder().timeout(timeout).build()?,
            base_rest_url,
            public_url,
        })
    }

    async fn send_signed_request(
        &self,
        endpoint: &str,
        mut payload: Value,
    ) -> Result<(StatusCode, String), GatewayError> {
        if let Value::Object(map) = &mut payload {
            map.insert("timestamp".into(), json!(Utc::now().timestamp_millis()));
        }
        // the signed bytes must be exactly the bytes sent
        let body = serde_json::to_string(&payload)?;
        let signature = sign(&self.secret_key, &body)?;
        let url = format!("{}{}", self.base_rest_url, endpoint);

        let response = self
            .http_client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("X-AUTH-APIKEY", &self.api_key)
            .header("X-AUTH-SIGNATURE", signature)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        Ok((status, text))
    }

    async fn signed_json(&self, endpoint: &str, payload: Value) -> Result<Value, GatewayError> {
        let (status, text) = self.send_signed_request(endpoint, payload).await?;
        if !status.is_success() {
            return Err(GatewayError::Api {
                status: status.as_u16(),
                body: text,
            });
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }
}

pub fn sign(secret: &str, body: &str) -> Result<String, GatewayError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| GatewayError::Signing(e.to_string()))?;
    mac.update(body.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn order_type_str(order_type: OrderType) -> &'static str {
    match order_type {
        OrderType::StopLimit => "stop_limit",
        OrderType::Market => "market_order",
    }
}

fn order_payload(market: &str, request: &OrderRequest) -> Value {
    let mut payload = json!({
        "side": request.side.as_str(),
        "order_type": order_type_str(request.order_type),
        "market": market,
        "total_quantity": request.quantity.to_string(),
    });
    if let Value::Object(map) = &mut payload {
        if let Some(price) = request.price {
            map.insert("price_per_unit".into(), json!(price.to_string()));
        }
        if let Some(trigger) = request.trigger_price {
            map.insert("trigger_price".into(), json!(trigger.to_string()));
        }
        if request.leverage > 1 {
            map.insert("leverage".into(), json!(request.leverage));
        }
    }
    payload
}

/// Reads a decimal that the venue may encode as a string or a JSON number.
fn decimal_field(value: Option<&Value>) -> Option<Decimal> {
    match value? {
        Value::String(s) => Decimal::from_str(s).ok(),
        Value::Number(n) => {
            let s = n.to_string();
            Decimal::from_str(&s)
                .or_else(|_| Decimal::from_scientific(&s))
                .ok()
        }
        _ => None,
    }
}

fn string_field(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_order_id(resp: &Value) -> Result<String, GatewayError> {
    string_field(resp.get("id"))
        .or_else(|| {
            resp.get("orders")
                .and_then(|o| o.get(0))
                .and_then(|o| string_field(o.get("id")))
        })
        .ok_or_else(|| GatewayError::Decode(format!("no order id in response: {}", resp)))
}

fn parse_side(raw: &str) -> Option<Side> {
    match raw.to_ascii_lowercase().as_str() {
        "buy" => Some(Side::Buy),
        "sell" => Some(Side::Sell),
        _ => None,
    }
}

fn parse_orders(resp: &Value) -> Result<Vec<OrderReport>, GatewayError> {
    let entries = match resp {
        Value::Array(a) => a,
        Value::Object(o) => match o.get("orders") {
            Some(Value::Array(a)) => a,
            _ => return Err(GatewayError::Decode("expected an order list".to_string())),
        },
        Value::Null => return Ok(Vec::new()),
        _ => return Err(GatewayError::Decode("expected an order list".to_string())),
    };

    let mut orders = Vec::with_capacity(entries.len());
    for entry in entries {
        let (Some(id), Some(side), Some(status)) = (
            string_field(entry.get("id")),
            entry.get("side").and_then(Value::as_str).and_then(parse_side),
            entry.get("status").and_then(Value::as_str),
        ) else {
            debug!(%entry, "skipping unreadable order entry");
            continue;
        };
        let filled_price = decimal_field(entry.get("avg_price"))
            .filter(|p| !p.is_zero())
            .or_else(|| decimal_field(entry.get("price_per_unit")));
        orders.push(OrderReport {
            id,
            side,
            status: OrderStatus::parse(status),
            filled_price,
        });
    }
    Ok(orders)
}

fn parse_candle(entry: &Value) -> Option<Candle> {
    match entry {
        Value::Array(a) if a.len() >= 6 => Some(Candle {
            open_time: a[0].as_i64().or_else(|| a[0].as_f64().map(|t| t as i64))?,
            open: decimal_field(a.get(1))?,
            high: decimal_field(a.get(2))?,
            low: decimal_field(a.get(3))?,
            close: decimal_field(a.get(4))?,
            volume: decimal_field(a.get(5))?,
        }),
        Value::Object(o) => Some(Candle {
            open_time: o
                .get("time")
                .and_then(|t| t.as_i64().or_else(|| t.as_f64().map(|f| f as i64)))?,
            open: decimal_field(o.get("open"))?,
            high: decimal_field(o.get("high"))?,
            low: decimal_field(o.get("low"))?,
            close: decimal_field(o.get("close"))?,
            volume: decimal_field(o.get("volume"))?,
        }),
        _ => None,
    }
}

fn parse_candles(resp: &Value) -> Result<Vec<Candle>, GatewayError> {
    let Value::Array(entries) = resp else {
        return Err(GatewayError::Decode("expected a candle array".to_string()));
    };
    let mut candles: Vec<Candle> = entries.iter().filter_map(parse_candle).collect();
    candles.sort_by_key(|c| c.open_time);
    Ok(candles)
}

/// Venue answers for cancelling an order that already left the book.
fn is_terminal_cancel(status: StatusCode, body: &str) -> bool {
    if !matches!(status.as_u16(), 400 | 404 | 422) {
        return false;
    }
    let body = body.to_ascii_lowercase();
    ["already", "not found", "filled", "cancelled"]
        .iter()
        .any(|needle| body.contains(needle))
}

#[async_trait]
impl ExchangeGateway for CoinDcxClient {
    async fn place_order(&self, request: &OrderRequest) -> Result<OrderResponse, GatewayError> {
        info!(
            "🚀 Sending Order: {} {} {} @ {:?} (trigger {:?})",
            request.side,
            request.quantity,
            self.market,
            request.price,
            request.trigger_price
        );
        let resp = self
            .signed_json(CREATE_ORDER, order_payload(&self.market, request))
            .await?;
        Ok(OrderResponse {
            id: parse_order_id(&resp)?,
        })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), GatewayError> {
        let (status, body) = self
            .send_signed_request(CANCEL_ORDER, json!({ "id": order_id }))
            .await?;
        if status.is_success() || is_terminal_cancel(status, &body) {
            return Ok(());
        }
        Err(GatewayError::Api {
            status: status.as_u16(),
            body,
        })
    }

    async fn list_orders(&self) -> Result<Vec<OrderReport>, GatewayError> {
        let resp = self
            .signed_json(LIST_ORDERS, json!({ "market": self.market }))
            .await?;
        parse_orders(&resp)
    }
}

#[async_trait]
impl MarketData for CoinDcxClient {
    async fn candles(
        &self,
        symbol: &str,
        interval: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, GatewayError> {
        let url = format!("{}{}", self.public_url, CANDLES);
        let limit = limit.to_string();
        let resp = self
            .http_client
            .get(&url)
            .query(&[
                ("pair", symbol),
                ("interval", interval.as_str()),
                ("limit", limit.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?;
        parse_candles(&resp)
    }
}
