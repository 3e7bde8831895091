// src/strategies/traits.rs
use crate::types::{Candle, SignalDecision};

pub trait Strategy: Send + Sync {
    fn name(&self) -> String;

    /// Minimum number of candles `evaluate` needs before it can signal.
    fn min_candles(&self) -> usize;

    // Pure decision over an ascending candle window; the last candle may still be open
    fn evaluate(&self, candles: &[Candle]) -> SignalDecision;
}
