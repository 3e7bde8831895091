// src/indicators.rs
use crate::types::Candle;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use ta::indicators::AverageTrueRange;
use ta::{DataItem, Next};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Bullish,
    Bearish,
}

/// Indicator math consumed by the signal evaluator.
pub trait IndicatorProvider: Send + Sync {
    /// Volume-weighted average of the typical price; `None` when volume sums to zero.
    fn vwap(&self, candles: &[Candle]) -> Option<Decimal>;

    /// One trend reading per candle, same length and order as `candles`.
    fn trend(&self, candles: &[Candle]) -> Vec<Trend>;
}

/// VWAP plus the Supertrend direction, banded on `ta`'s ATR.
#[derive(Debug, Clone)]
pub struct Supertrend {
    pub atr_period: usize,
    pub multiplier: f64,
}

impl Default for Supertrend {
    fn default() -> Self {
        Self {
            atr_period: 7,
            multiplier: 2.0,
        }
    }
}

impl IndicatorProvider for Supertrend {
    fn vwap(&self, candles: &[Candle]) -> Option<Decimal> {
        let three = Decimal::from(3);
        let (tpv, volume) = candles
            .iter()
            .fold((Decimal::ZERO, Decimal::ZERO), |(tpv, vol), c| {
                let typical = (c.high + c.low + c.close) / three;
                (tpv + typical * c.volume, vol + c.volume)
            });
        if volume.is_zero() {
            None
        } else {
            Some(tpv / volume)
        }
    }

    fn trend(&self, candles: &[Candle]) -> Vec<Trend> {
        if self.atr_period == 0 || candles.len() <= self.atr_period {
            return vec![Trend::Bearish; candles.len()];
        }
        let Ok(mut atr) = AverageTrueRange::new(self.atr_period) else {
            return vec![Trend::Bearish; candles.len()];
        };

        let mut colors = Vec::with_capacity(candles.len());
        let mut trend = Trend::Bearish;
        let mut bands: Option<(f64, f64)> = None;
        let mut prev_close: Option<f64> = None;

        for (i, c) in candles.iter().enumerate() {
            let (Some(high), Some(low), Some(close)) =
                (c.high.to_f64(), c.low.to_f64(), c.close.to_f64())
            else {
                colors.push(trend);
                continue;
            };
            let item = DataItem::builder()
                .open(c.open.to_f64().unwrap_or(close))
                .high(high)
                .low(low)
                .close(close)
                .volume(c.volume.to_f64().unwrap_or(0.0))
                .build();
            let Ok(item) = item else {
                colors.push(trend);
                continue;
            };
            let range = atr.next(&item);

            let mid = (high + low) / 2.0;
            let basic_upper = mid + self.multiplier * range;
            let basic_lower = mid - self.multiplier * range;

            // final bands only tighten unless the previous close broke through them
            let (upper, lower) = match (bands, prev_close) {
                (Some((prev_upper, prev_lower)), Some(pc)) => (
                    if basic_upper < prev_upper || pc > prev_upper {
                        basic_upper
                    } else {
                        prev_upper
                    },
                    if basic_lower > prev_lower || pc < prev_lower {
                        basic_lower
                    } else {
                        prev_lower
                    },
                ),
                _ => (basic_upper, basic_lower),
            };
            bands = Some((upper, lower));
            prev_close = Some(close);

            if i >= self.atr_period {
                trend = match trend {
                    Trend::Bearish if close > upper => Trend::Bullish,
                    Trend::Bullish if close < lower => Trend::Bearish,
                    current => current,
                };
            }
            colors.push(trend);
        }
        colors
    }
}
