// src/config.rs

use crate::core::reliability::RetryPolicy;
use crate::error::ConfigError;
use crate::session::TradingSession;
use config::{Config, ConfigBuilder, File, FileFormat};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
}

impl Timeframe {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        match raw.trim() {
            "1m" => Ok(Timeframe::M1),
            "5m" => Ok(Timeframe::M5),
            "15m" => Ok(Timeframe::M15),
            "30m" => Ok(Timeframe::M30),
            "1h" => Ok(Timeframe::H1),
            "4h" => Ok(Timeframe::H4),
            "1d" => Ok(Timeframe::D1),
            other => Err(ConfigError::Timeframe(other.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }

    /// Length of one candle, which is also the entry-evaluation cadence.
    pub fn duration(self) -> Duration {
        let minutes = match self {
            Timeframe::M1 => 1,
            Timeframe::M5 => 5,
            Timeframe::M15 => 15,
            Timeframe::M30 => 30,
            Timeframe::H1 => 60,
            Timeframe::H4 => 240,
            Timeframe::D1 => 1440,
        };
        Duration::from_secs(minutes * 60)
    }
}

/// Raw operator tunables as they appear in `Settings.toml` / `APP_BOT__*`.
#[derive(Debug, Deserialize, Clone)]
struct BotSettings {
    active: bool,
    order_size: Decimal,
    stop_loss_distance: Decimal,
    trail_step: Decimal,
    breakeven_threshold: Decimal,
    timeframe: String,
    session_start: String,
    session_end: String,
    session_utc_offset_minutes: i32,
    leverage: u8,
}

/// Tunables the operator may change at any time. The driver loop copies this
/// once per tick and uses only that copy for the rest of the tick.
#[derive(Debug, Clone, PartialEq)]
pub struct BotConfig {
    pub active: bool,
    pub order_size: Decimal,
    pub stop_loss_distance: Decimal,
    pub trail_step: Decimal,
    pub breakeven_threshold: Decimal,
    pub timeframe: Timeframe,
    pub session: TradingSession,
    pub leverage: u8,
}

impl BotConfig {
    fn from_settings(raw: BotSettings) -> Result<Self, ConfigError> {
        positive("order_size", raw.order_size)?;
        positive("stop_loss_distance", raw.stop_loss_distance)?;
        positive("trail_step", raw.trail_step)?;
        if raw.breakeven_threshold.is_sign_negative() {
            return Err(ConfigError::NonPositive {
                field: "breakeven_threshold",
                value: raw.breakeven_threshold.to_string(),
            });
        }
        if raw.leverage == 0 {
            return Err(ConfigError::NonPositive {
                field: "leverage",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            active: raw.active,
            order_size: raw.order_size,
            stop_loss_distance: raw.stop_loss_distance,
            trail_step: raw.trail_step,
            breakeven_threshold: raw.breakeven_threshold,
            timeframe: Timeframe::parse(&raw.timeframe)?,
            session: TradingSession::parse(
                &raw.session_start,
                &raw.session_end,
                raw.session_utc_offset_minutes,
            )?,
            leverage: raw.leverage,
        })
    }
}

fn positive(field: &'static str, value: Decimal) -> Result<(), ConfigError> {
    if value > Decimal::ZERO {
        Ok(())
    } else {
        Err(ConfigError::NonPositive {
            field,
            value: value.to_string(),
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
struct AppSettings {
    api_key: String,
    secret_key: String,
    symbol: String,
    rest_base_url: String,
    public_base_url: String,
    live_trading: bool,
    headless: bool,
    tick_interval_ms: u64,
    candle_limit: usize,
    max_retries: u32,
    retry_backoff_ms: u64,
    call_timeout_ms: u64,
    tick_size: Decimal,
    step_size: Decimal,
    bot: BotSettings,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_key: String,
    pub secret_key: String,
    pub symbol: String,
    pub rest_base_url: String,
    pub public_base_url: String,
    pub live_trading: bool,
    pub headless: bool,
    pub tick_interval: Duration,
    pub candle_limit: usize,
    pub retry: RetryPolicy,
    pub tick_size: Decimal,
    pub step_size: Decimal,
    pub bot: BotConfig,
}

impl AppConfig {
    pub fn new() -> Result<Self, ConfigError> {
        Self::load("Settings")
    }

    /// Loads `<name>.toml` (optional) layered under `APP_*` environment variables.
    pub fn load(name: &str) -> Result<Self, ConfigError> {
        let builder = defaults()?
            .add_source(File::with_name(name).required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );
        Self::build(builder)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let builder = defaults()?.add_source(File::from_str(contents, FileFormat::Toml));
        Self::build(builder)
    }

    fn build(
        builder: ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self, ConfigError> {
        let raw: AppSettings = builder.build()?.try_deserialize()?;

        if raw.max_retries == 0 {
            return Err(ConfigError::NonPositive {
                field: "max_retries",
                value: "0".to_string(),
            });
        }
        if raw.candle_limit < 4 {
            return Err(ConfigError::NonPositive {
                field: "candle_limit",
                value: raw.candle_limit.to_string(),
            });
        }

        Ok(Self {
            api_key: raw.api_key,
            secret_key: raw.secret_key,
            symbol: raw.symbol,
            rest_base_url: raw.rest_base_url,
            public_base_url: raw.public_base_url,
            live_trading: raw.live_trading,
            headless: raw.headless,
            tick_interval: Duration::from_millis(raw.tick_interval_ms),
            candle_limit: raw.candle_limit,
            retry: RetryPolicy {
                max_retries: raw.max_retries,
                backoff: Duration::from_millis(raw.retry_backoff_ms),
                call_timeout: Duration::from_millis(raw.call_timeout_ms),
            },
            tick_size: raw.tick_size,
            step_size: raw.step_size,
            bot: BotConfig::from_settings(raw.bot)?,
        })
    }
}

fn defaults() -> Result<ConfigBuilder<config::builder::DefaultState>, ConfigError> {
    let builder = Config::builder()
        .set_default("api_key", "")?
        .set_default("secret_key", "")?
        .set_default("symbol", "ETHUSDT")?
        .set_default("rest_base_url", "https://api.coindcx.com")?
        .set_default("public_base_url", "https://public.coindcx.com")?
        .set_default("live_trading", false)?
        .set_default("headless", false)?
        .set_default("tick_interval_ms", 1000)?
        .set_default("candle_limit", 20)?
        .set_default("max_retries", 2)?
        .set_default("retry_backoff_ms", 1000)?
        .set_default("call_timeout_ms", 5000)?
        .set_default("tick_size", "0.01")?
        .set_default("step_size", "0.001")?
        .set_default("bot.active", true)?
        .set_default("bot.order_size", "1.0")?
        .set_default("bot.stop_loss_distance", "25.0")?
        .set_default("bot.trail_step", "10.0")?
        .set_default("bot.breakeven_threshold", "25.0")?
        .set_default("bot.timeframe", "1m")?
        .set_default("bot.session_start", "08:00")?
        .set_default("bot.session_end", "05:00")?
        .set_default("bot.session_utc_offset_minutes", 330)?
        .set_default("bot.leverage", 1)?;
    Ok(builder)
}
