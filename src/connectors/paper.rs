// src/connectors/paper.rs
use crate::config::Timeframe;
use crate::connectors::traits::{ExchangeGateway, MarketData};
use crate::error::GatewayError;
use crate::types::{OrderReport, OrderRequest, OrderResponse, OrderStatus, OrderType, Side};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct PaperOrder {
    side: Side,
    order_type: OrderType,
    trigger: Option<Decimal>,
    status: OrderStatus,
    filled_price: Option<Decimal>,
}

/// Simulated venue backed by live market data.
///
/// Stop-limit orders rest until the last price crosses their trigger and then
/// fill at the trigger. Market orders fill immediately at the supplied price,
/// or the last price when none is given. Filled and cancelled orders appear
/// in one listing and are dropped from the book afterwards.
pub struct PaperExchange {
    market: Arc<dyn MarketData>,
    symbol: String,
    interval: Timeframe,
    orders: Mutex<HashMap<String, PaperOrder>>,
}

impl PaperExchange {
    pub fn new(market: Arc<dyn MarketData>, symbol: String, interval: Timeframe) -> Self {
        Self {
            market,
            symbol,
            interval,
            orders: Mutex::new(HashMap::new()),
        }
    }

    async fn last_price(&self) -> Result<Option<Decimal>, GatewayError> {
        self.market.latest_price(&self.symbol, self.interval).await
    }

    fn book(&self) -> std::sync::MutexGuard<'_, HashMap<String, PaperOrder>> {
        // a poisoned book still holds consistent entries
        self.orders.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn crossed(side: Side, trigger: Decimal, price: Decimal) -> bool {
    match side {
        Side::Buy => price >= trigger,
        Side::Sell => price <= trigger,
    }
}

#[async_trait]
impl ExchangeGateway for PaperExchange {
    async fn place_order(&self, request: &OrderRequest) -> Result<OrderResponse, GatewayError> {
        let id = Uuid::new_v4().to_string();
        let order = match request.order_type {
            OrderType::Market => {
                let price = match request.price {
                    Some(p) => p,
                    None => self
                        .last_price()
                        .await?
                        .ok_or_else(|| GatewayError::Decode("no price to fill against".into()))?,
                };
                info!("📝 PAPER FILL: {} {} @ {}", request.side, request.quantity, price);
                PaperOrder {
                    side: request.side,
                    order_type: request.order_type,
                    trigger: None,
                    status: OrderStatus::Filled,
                    filled_price: Some(price),
                }
            }
            OrderType::StopLimit => {
                let trigger = request
                    .trigger_price
                    .or(request.price)
                    .ok_or_else(|| GatewayError::Decode("stop order without trigger".into()))?;
                info!("📝 PAPER STOP: {} {} @ {}", request.side, request.quantity, trigger);
                PaperOrder {
                    side: request.side,
                    order_type: request.order_type,
                    trigger: Some(trigger),
                    status: OrderStatus::Open,
                    filled_price: None,
                }
            }
        };
        self.book().insert(id.clone(), order);
        Ok(OrderResponse { id })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), GatewayError> {
        if let Some(order) = self.book().get_mut(order_id) {
            if order.status == OrderStatus::Open {
                order.status = OrderStatus::Cancelled;
            }
        }
        Ok(())
    }

    async fn list_orders(&self) -> Result<Vec<OrderReport>, GatewayError> {
        let price = self.last_price().await?;
        let mut book = self.book();
        if let Some(price) = price {
            for order in book.values_mut() {
                let Some(trigger) = order.trigger else { continue };
                if order.order_type == OrderType::StopLimit
                    && order.status == OrderStatus::Open
                    && crossed(order.side, trigger, price)
                {
                    order.status = OrderStatus::Filled;
                    order.filled_price = Some(trigger);
                }
            }
        }
        let reports: Vec<OrderReport> = book
            .iter()
            .map(|(id, o)| OrderReport {
                id: id.clone(),
                side: o.side,
                status: o.status.clone(),
                filled_price: o.filled_price,
            })
            .collect();
        // terminal orders are reported once, then forgotten
        book.retain(|_, o| o.status == OrderStatus::Open);
        Ok(reports)
    }
}
