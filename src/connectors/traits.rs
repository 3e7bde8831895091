// src/connectors/traits.rs
use crate::config::Timeframe;
use crate::error::GatewayError;
use crate::types::{Candle, OrderReport, OrderRequest, OrderResponse};
use async_trait::async_trait;
use rust_decimal::Decimal;

#[async_trait]
pub trait MarketData: Send + Sync {
    /// Candles in ascending time order; the last one may still be forming.
    async fn candles(
        &self,
        symbol: &str,
        interval: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, GatewayError>;

    async fn latest_price(
        &self,
        symbol: &str,
        interval: Timeframe,
    ) -> Result<Option<Decimal>, GatewayError> {
        let candles = self.candles(symbol, interval, 1).await?;
        Ok(candles.last().map(|c| c.close))
    }
}

/// Order entry for the single instrument the gateway was built for.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    async fn place_order(&self, request: &OrderRequest) -> Result<OrderResponse, GatewayError>;

    /// Cancelling an order that is already terminal must succeed.
    async fn cancel_order(&self, order_id: &str) -> Result<(), GatewayError>;

    async fn list_orders(&self) -> Result<Vec<OrderReport>, GatewayError>;
}
