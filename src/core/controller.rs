// src/core/controller.rs
//! Order and position lifecycle.
//!
//! The controller holds at most one intent: a pending entry order or an open
//! position, never both. Every state change happens inside one method call;
//! an [`Emergency`] leaves the intent untouched so the flatten path can see it.

use crate::config::BotConfig;
use crate::connectors::traits::ExchangeGateway;
use crate::core::reliability::{Retrier, RetryPolicy};
use crate::core::stop::{self, StopMove, StopParams};
use crate::error::Emergency;
use crate::types::{
    OrderRequest, OrderStatus, OrderType, PendingOrder, Position, Side, SignalDecision,
};
use crate::utils::precision::{normalize_price, normalize_quantity};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Intent {
    #[default]
    Idle,
    Pending(PendingOrder),
    InPosition(Position),
}

impl Intent {
    pub fn label(&self) -> &'static str {
        match self {
            Intent::Idle => "Idle",
            Intent::Pending(_) => "Pending",
            Intent::InPosition(_) => "InPosition",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    StopLoss,
    SessionEnd,
    Flatten,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StopLoss => write!(f, "StopLoss"),
            Self::SessionEnd => write!(f, "SessionEnd"),
            Self::Flatten => write!(f, "Flatten"),
        }
    }
}

/// What a controller call changed, for the operator log.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Placed(PendingOrder),
    Filled(Position),
    Dropped {
        order_id: String,
        status: OrderStatus,
    },
    Cancelled {
        order_id: String,
    },
    StopMoved {
        from: Decimal,
        to: Decimal,
        kind: StopMove,
    },
    Exited {
        side: Side,
        quantity: Decimal,
        price: Option<Decimal>,
        reason: ExitReason,
    },
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Placed(p) => write!(
                f,
                "placed {} stop-limit {} @ {} ({})",
                p.side, p.quantity, p.trigger_price, p.order_id
            ),
            Self::Filled(p) => write!(
                f,
                "filled {} {} @ {}, stop {}",
                p.side, p.quantity, p.entry_price, p.stop_loss_price
            ),
            Self::Dropped { order_id, status } => {
                write!(f, "order {} dropped: {:?}", order_id, status)
            }
            Self::Cancelled { order_id } => write!(f, "cancelled pending {}", order_id),
            Self::StopMoved { from, to, kind } => {
                write!(f, "stop {} -> {} ({:?})", from, to, kind)
            }
            Self::Exited {
                side,
                quantity,
                price,
                reason,
            } => match price {
                Some(p) => write!(f, "exit {} {} @ ~{} [{}]", side, quantity, p, reason),
                None => write!(f, "exit {} {} at market [{}]", side, quantity, reason),
            },
        }
    }
}

pub struct OrderController {
    gateway: Arc<dyn ExchangeGateway>,
    retrier: Retrier,
    intent: Intent,
    tick_size: Decimal,
    step_size: Decimal,
}

impl OrderController {
    pub fn new(
        gateway: Arc<dyn ExchangeGateway>,
        retry: RetryPolicy,
        tick_size: Decimal,
        step_size: Decimal,
    ) -> Self {
        Self {
            gateway,
            retrier: Retrier::new(retry),
            intent: Intent::Idle,
            tick_size,
            step_size,
        }
    }

    pub fn intent(&self) -> &Intent {
        &self.intent
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.intent, Intent::Idle)
    }

    /// Places a stop-limit entry for `decision`. Only acts when idle.
    pub async fn enter(
        &mut self,
        decision: SignalDecision,
        cfg: &BotConfig,
        now: DateTime<Utc>,
    ) -> Result<Option<Transition>, Emergency> {
        if !self.is_idle() {
            return Ok(None);
        }
        let Some((side, raw_trigger)) = decision.entry() else {
            return Ok(None);
        };

        let quantity = normalize_quantity(cfg.order_size, self.step_size);
        if quantity.is_zero() {
            warn!(
                order_size = %cfg.order_size,
                step_size = %self.step_size,
                "quantity is zero after normalization, skipping entry"
            );
            return Ok(None);
        }
        let trigger = normalize_price(raw_trigger, self.tick_size);

        let request = OrderRequest {
            side,
            order_type: OrderType::StopLimit,
            price: Some(trigger),
            trigger_price: Some(trigger),
            quantity,
            leverage: cfg.leverage,
        };
        let gateway = self.gateway.as_ref();
        let req = &request;
        let response = self
            .retrier
            .call("place_order", move || gateway.place_order(req))
            .await?;

        let pending = PendingOrder {
            order_id: response.id,
            side,
            trigger_price: trigger,
            quantity,
            placed_at: now,
        };
        info!(
            order_id = %pending.order_id,
            %side,
            trigger = %trigger,
            %quantity,
            "entry stop-limit placed"
        );
        self.intent = Intent::Pending(pending.clone());
        Ok(Some(Transition::Placed(pending)))
    }

    /// Reconciles the pending order against the venue's order listing.
    ///
    /// Without a pending order this makes no call and changes nothing. An
    /// order missing from the listing is left pending.
    pub async fn poll_fills(
        &mut self,
        cfg: &BotConfig,
    ) -> Result<Option<Transition>, Emergency> {
        let Intent::Pending(pending) = &self.intent else {
            return Ok(None);
        };
        let order_id = pending.order_id.clone();

        let gateway = self.gateway.as_ref();
        let orders = self
            .retrier
            .call("list_orders", move || gateway.list_orders())
            .await?;

        let Some(report) = orders.into_iter().find(|o| o.id == order_id) else {
            debug!(%order_id, "pending order not in listing yet");
            return Ok(None);
        };
        let Intent::Pending(pending) = &self.intent else {
            return Ok(None);
        };

        match report.status {
            OrderStatus::Filled => {
                let position = filled_position(pending, report.filled_price, cfg);
                self.intent = Intent::InPosition(position.clone());
                Ok(Some(Transition::Filled(position)))
            }
            OrderStatus::Cancelled | OrderStatus::Rejected => {
                info!(%order_id, status = ?report.status, "entry order dropped by venue");
                self.intent = Intent::Idle;
                Ok(Some(Transition::Dropped {
                    order_id,
                    status: report.status,
                }))
            }
            OrderStatus::Open | OrderStatus::Unknown(_) => Ok(None),
        }
    }

    /// Runs the stop engine against `latest_price` and exits on a breach.
    pub async fn manage_position(
        &mut self,
        latest_price: Decimal,
        cfg: &BotConfig,
    ) -> Result<Vec<Transition>, Emergency> {
        let Intent::InPosition(position) = &mut self.intent else {
            return Ok(Vec::new());
        };

        let params = StopParams {
            breakeven_threshold: cfg.breakeven_threshold,
            trail_step: cfg.trail_step,
        };
        let update = stop::update(position, latest_price, &params);

        let mut transitions = Vec::new();
        if let Some(kind) = update.moved {
            let from = position.stop_loss_price;
            position.stop_loss_price = update.new_stop;
            info!(%from, to = %update.new_stop, ?kind, "stop ratcheted");
            transitions.push(Transition::StopMoved {
                from,
                to: update.new_stop,
                kind,
            });
        }

        if update.exit_now {
            let position = position.clone();
            info!(
                price = %latest_price,
                stop = %update.new_stop,
                "stop loss hit"
            );
            transitions.push(
                self.exit_position(&position, Some(latest_price), ExitReason::StopLoss, cfg)
                    .await?,
            );
        }
        Ok(transitions)
    }

    /// Reacts to the in-session → out-of-session edge.
    ///
    /// A pending entry is cancelled and then looked up once more: a venue
    /// reports a cancel of an order that filled in the meantime as success,
    /// and that fill is flattened here.
    pub async fn on_session_end(
        &mut self,
        latest_price: Option<Decimal>,
        cfg: &BotConfig,
    ) -> Result<Vec<Transition>, Emergency> {
        match &self.intent {
            Intent::Idle => Ok(Vec::new()),
            Intent::Pending(pending) => {
                let pending = pending.clone();
                info!(order_id = %pending.order_id, "session ended, cancelling pending entry");
                let gateway = self.gateway.as_ref();
                let id = pending.order_id.as_str();
                self.retrier
                    .call("cancel_order", move || gateway.cancel_order(id))
                    .await?;

                let orders = self
                    .retrier
                    .call("list_orders", move || gateway.list_orders())
                    .await?;
                let report = orders.into_iter().find(|o| o.id == pending.order_id);

                match report {
                    Some(report) if report.status == OrderStatus::Filled => {
                        warn!(
                            order_id = %pending.order_id,
                            "entry filled before the cancel landed, flattening"
                        );
                        let position = filled_position(&pending, report.filled_price, cfg);
                        self.intent = Intent::InPosition(position.clone());
                        let exited = self
                            .exit_position(&position, latest_price, ExitReason::SessionEnd, cfg)
                            .await?;
                        Ok(vec![Transition::Filled(position), exited])
                    }
                    _ => {
                        self.intent = Intent::Idle;
                        Ok(vec![Transition::Cancelled {
                            order_id: pending.order_id,
                        }])
                    }
                }
            }
            Intent::InPosition(position) => {
                let position = position.clone();
                info!("session ended, flattening position");
                let exited = self
                    .exit_position(&position, latest_price, ExitReason::SessionEnd, cfg)
                    .await?;
                Ok(vec![exited])
            }
        }
    }

    async fn exit_position(
        &mut self,
        position: &Position,
        latest_price: Option<Decimal>,
        reason: ExitReason,
        cfg: &BotConfig,
    ) -> Result<Transition, Emergency> {
        let request = market_exit(position, latest_price, cfg.leverage);

        let gateway = self.gateway.as_ref();
        let req = &request;
        self.retrier
            .call("place_order", move || gateway.place_order(req))
            .await?;

        info!(side = %request.side, quantity = %request.quantity, %reason, "position closed");
        self.intent = Intent::Idle;
        Ok(Transition::Exited {
            side: request.side,
            quantity: request.quantity,
            price: latest_price,
            reason,
        })
    }

    /// Best-effort flatten: one attempt per call, failures logged and
    /// ignored, state cleared regardless. Used on emergency and shutdown.
    pub async fn flatten_all(
        &mut self,
        latest_price: Option<Decimal>,
        leverage: u8,
    ) -> Vec<Transition> {
        let mut transitions = Vec::new();
        let gateway = self.gateway.as_ref();

        match std::mem::take(&mut self.intent) {
            Intent::Idle => {}
            Intent::Pending(pending) => {
                let id = pending.order_id.as_str();
                if self
                    .retrier
                    .once("cancel_order", move || gateway.cancel_order(id))
                    .await
                    .is_ok()
                {
                    transitions.push(Transition::Cancelled {
                        order_id: pending.order_id.clone(),
                    });
                } else {
                    error!(
                        order_id = %pending.order_id,
                        "could not cancel pending order during flatten"
                    );
                }
            }
            Intent::InPosition(position) => {
                let request = market_exit(&position, latest_price, leverage);
                let req = &request;
                if self
                    .retrier
                    .once("place_order", move || gateway.place_order(req))
                    .await
                    .is_ok()
                {
                    transitions.push(Transition::Exited {
                        side: request.side,
                        quantity: request.quantity,
                        price: latest_price,
                        reason: ExitReason::Flatten,
                    });
                } else {
                    error!(
                        side = %position.side,
                        quantity = %position.quantity,
                        "could not flatten position, manual intervention required"
                    );
                }
            }
        }
        transitions
    }
}

fn filled_position(pending: &PendingOrder, fill: Option<Decimal>, cfg: &BotConfig) -> Position {
    let entry_price = match fill {
        Some(p) => p,
        None => {
            warn!(order_id = %pending.order_id, "fill reported without price, using trigger");
            pending.trigger_price
        }
    };
    let stop_loss_price = match pending.side {
        Side::Buy => entry_price - cfg.stop_loss_distance,
        Side::Sell => entry_price + cfg.stop_loss_distance,
    };
    info!(
        order_id = %pending.order_id,
        side = %pending.side,
        entry = %entry_price,
        stop = %stop_loss_price,
        "entry filled"
    );
    Position {
        side: pending.side,
        entry_price,
        stop_loss_price,
        quantity: pending.quantity,
    }
}

fn market_exit(position: &Position, latest_price: Option<Decimal>, leverage: u8) -> OrderRequest {
    OrderRequest {
        side: position.side.opposite(),
        order_type: OrderType::Market,
        price: latest_price,
        trigger_price: None,
        quantity: position.quantity,
        leverage,
    }
}
