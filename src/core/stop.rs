// src/core/stop.rs
//! Breakeven and stepwise trailing stop.
//!
//! The stop is a ratchet: every candidate is compared against the current
//! stop and adopted only when it is more favorable for the position's side.

use crate::types::{Position, Side};
use rust_decimal::Decimal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopParams {
    pub breakeven_threshold: Decimal,
    pub trail_step: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMove {
    Breakeven,
    Trail { steps: Decimal },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopUpdate {
    pub new_stop: Decimal,
    pub moved: Option<StopMove>,
    pub exit_now: bool,
}

/// `true` when `candidate` protects more profit than `current` for `side`.
fn tighter(side: Side, candidate: Decimal, current: Decimal) -> bool {
    match side {
        Side::Buy => candidate > current,
        Side::Sell => candidate < current,
    }
}

pub fn update(position: &Position, latest_price: Decimal, params: &StopParams) -> StopUpdate {
    let profit = position.profit_at(latest_price);
    let mut stop = position.stop_loss_price;
    let mut moved = None;

    if profit >= params.breakeven_threshold && tighter(position.side, position.entry_price, stop) {
        stop = position.entry_price;
        moved = Some(StopMove::Breakeven);
    }

    if profit > params.breakeven_threshold && params.trail_step > Decimal::ZERO {
        let steps = ((profit - params.breakeven_threshold) / params.trail_step).floor();
        let offset = steps * params.trail_step;
        let candidate = match position.side {
            Side::Buy => position.entry_price + offset,
            Side::Sell => position.entry_price - offset,
        };
        if tighter(position.side, candidate, stop) {
            stop = candidate;
            moved = Some(StopMove::Trail { steps });
        }
    }

    let exit_now = match position.side {
        Side::Buy => latest_price <= stop,
        Side::Sell => latest_price >= stop,
    };

    StopUpdate {
        new_stop: stop,
        moved,
        exit_now,
    }
}
