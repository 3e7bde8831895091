pub mod coindcx;
pub mod paper;
pub mod traits;
