pub mod traits;
pub mod vwap_trend;
