// src/strategies/vwap_trend.rs
use crate::indicators::{IndicatorProvider, Trend};
use crate::strategies::traits::Strategy;
use crate::types::{Candle, SignalDecision};
use tracing::debug;

const MIN_CANDLES: usize = 4;

/// Breakout entry: two closed candles on the same side of a short VWAP,
/// confirmed by the trend direction of the most recent closed candle.
pub struct VwapTrend<P> {
    indicators: P,
    vwap_window: usize,
}

impl<P: IndicatorProvider> VwapTrend<P> {
    /// Creates the strategy.
    ///
    /// # Arguments
    /// * `indicators` - VWAP and trend provider.
    /// * `vwap_window` - Number of trailing candles (including the open one) the VWAP covers.
    pub fn new(indicators: P, vwap_window: usize) -> Self {
        Self {
            indicators,
            vwap_window: vwap_window.max(1),
        }
    }
}

impl<P: IndicatorProvider> Strategy for VwapTrend<P> {
    fn name(&self) -> String {
        "vwap-trend".to_string()
    }

    fn min_candles(&self) -> usize {
        MIN_CANDLES
    }

    fn evaluate(&self, candles: &[Candle]) -> SignalDecision {
        let n = candles.len();
        if n < MIN_CANDLES {
            debug!(candles = n, "not enough candles to evaluate");
            return SignalDecision::None;
        }

        let window = &candles[n.saturating_sub(self.vwap_window)..];
        let Some(vwap) = self.indicators.vwap(window) else {
            debug!("VWAP undefined (zero volume), skipping");
            return SignalDecision::None;
        };

        let trend = self.indicators.trend(candles);
        let Some(&last_closed_trend) = trend.get(n - 2) else {
            return SignalDecision::None;
        };

        // candles[n - 1] is still forming
        let last = &candles[n - 2];
        let prior = &candles[n - 3];

        if prior.close > vwap && last.close > vwap && last_closed_trend == Trend::Bullish {
            SignalDecision::EnterLong(last.high)
        } else if prior.close < vwap && last.close < vwap && last_closed_trend == Trend::Bearish {
            SignalDecision::EnterShort(last.low)
        } else {
            SignalDecision::None
        }
    }
}
