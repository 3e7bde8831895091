// src/main.rs
use dotenvy::dotenv;
use std::sync::Arc;
use stoplimit_bot::config::AppConfig;
use stoplimit_bot::connectors::coindcx::CoinDcxClient;
use stoplimit_bot::connectors::paper::PaperExchange;
use stoplimit_bot::connectors::traits::{ExchangeGateway, MarketData};
use stoplimit_bot::core::controller::OrderController;
use stoplimit_bot::core::engine::{EngineExit, OperatorCommand, TradingEngine};
use stoplimit_bot::indicators::Supertrend;
use stoplimit_bot::strategies::vwap_trend::VwapTrend;
use stoplimit_bot::tui;
use stoplimit_bot::utils::clock::SystemClock;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const VWAP_WINDOW: usize = 5;

/// File logging always; stdout only when no TUI owns the terminal.
fn init_logging(headless: bool) -> WorkerGuard {
    let file_appender = tracing_appender::rolling::daily("logs", "stoplimit_bot.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,stoplimit_bot=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(file_writer).with_ansi(false))
        .with(headless.then(|| fmt::layer().with_target(false)))
        .init();
    guard
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    // 1. Load Configuration
    let cfg = AppConfig::new()?;
    let log_guard = init_logging(cfg.headless);

    info!("========================================");
    info!("       STOP-LIMIT BOT - v{}", env!("CARGO_PKG_VERSION"));
    info!("========================================");
    info!(
        symbol = %cfg.symbol,
        timeframe = cfg.bot.timeframe.as_str(),
        mode = if cfg.live_trading { "🚨 LIVE TRADING" } else { "📝 PAPER TRADING" },
        "configuration loaded"
    );

    // 2. Initialize Components
    let client = Arc::new(CoinDcxClient::new(
        cfg.api_key.clone(),
        cfg.secret_key.clone(),
        cfg.symbol.clone(),
        cfg.rest_base_url.clone(),
        cfg.public_base_url.clone(),
        cfg.retry.call_timeout,
    )?);
    let market: Arc<dyn MarketData> = client.clone();
    let gateway: Arc<dyn ExchangeGateway> = if cfg.live_trading {
        client
    } else {
        Arc::new(PaperExchange::new(
            market.clone(),
            cfg.symbol.clone(),
            cfg.bot.timeframe,
        ))
    };

    let strategy = VwapTrend::new(Supertrend::default(), VWAP_WINDOW);
    let controller = OrderController::new(gateway, cfg.retry, cfg.tick_size, cfg.step_size);

    // 3. Create Channels
    let (cmd_tx, cmd_rx) = mpsc::channel(32);
    let (ui_tx, ui_rx) = mpsc::channel(100);

    let ctrl_c_tx = cmd_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl+C received");
            let _ = ctrl_c_tx.send(OperatorCommand::Shutdown).await;
        }
    });

    let ui_sender = if cfg.headless {
        None
    } else {
        let symbol = cfg.symbol.clone();
        tokio::spawn(async move {
            if let Err(e) = tui::run(ui_rx, cmd_tx, symbol).await {
                error!("TUI error: {}", e);
            }
        });
        Some(ui_tx)
    };

    // 4. Run Engine
    let mut engine = TradingEngine::new(
        cfg.symbol.clone(),
        strategy,
        market,
        controller,
        Arc::new(SystemClock),
        cfg.bot.clone(),
        cmd_rx,
        ui_sender,
    )
    .with_tick_interval(cfg.tick_interval)
    .with_candle_limit(cfg.candle_limit);

    match engine.run().await {
        EngineExit::Shutdown => {
            info!("engine stopped cleanly");
            if !cfg.headless {
                tui::restore_terminal();
            }
            Ok(())
        }
        EngineExit::Emergency(emergency) => {
            error!(error = %emergency, "engine halted after emergency flatten");
            if !cfg.headless {
                tui::restore_terminal();
            }
            drop(log_guard);
            std::process::exit(1);
        }
    }
}
