// src/core/engine.rs
use crate::config::BotConfig;
use crate::connectors::traits::MarketData;
use crate::core::controller::{Intent, OrderController, Transition};
use crate::error::Emergency;
use crate::session::SessionGate;
use crate::strategies::traits::Strategy;
use crate::types::{ControllerSnapshot, SignalDecision, UiEvent};
use crate::utils::clock::Clock;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Operator requests, applied at the start of the next tick.
#[derive(Debug, Clone)]
pub enum OperatorCommand {
    SetActive(bool),
    ToggleActive,
    ReplaceConfig(Box<BotConfig>),
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    Shutdown,
}

#[derive(Debug)]
pub enum EngineExit {
    Shutdown,
    Emergency(Emergency),
}

pub struct TradingEngine<S> {
    symbol: String,
    strategy: S,
    market: Arc<dyn MarketData>,
    controller: OrderController,
    gate: SessionGate,
    clock: Arc<dyn Clock>,
    config: BotConfig,
    commands: mpsc::Receiver<OperatorCommand>,
    ui_sender: Option<mpsc::Sender<UiEvent>>,
    tick_interval: Duration,
    candle_limit: usize,
    last_signal_check: Option<DateTime<Utc>>,
    last_price: Option<Decimal>,
    in_session: bool,
}

impl<S> TradingEngine<S>
where
    S: Strategy,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: String,
        strategy: S,
        market: Arc<dyn MarketData>,
        controller: OrderController,
        clock: Arc<dyn Clock>,
        config: BotConfig,
        commands: mpsc::Receiver<OperatorCommand>,
        ui_sender: Option<mpsc::Sender<UiEvent>>,
    ) -> Self {
        Self {
            symbol,
            strategy,
            market,
            controller,
            gate: SessionGate::new(),
            clock,
            config,
            commands,
            ui_sender,
            tick_interval: Duration::from_secs(1),
            candle_limit: 20,
            last_signal_check: None,
            last_price: None,
            in_session: false,
        }
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn with_candle_limit(mut self, limit: usize) -> Self {
        self.candle_limit = limit;
        self
    }

    pub fn controller(&self) -> &OrderController {
        &self.controller
    }

    fn send_ui_event(&self, event: UiEvent) {
        let Some(sender) = &self.ui_sender else {
            return;
        };
        match sender.try_send(event) {
            Ok(_) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {}
            Err(mpsc::error::TrySendError::Closed(_)) => {
                error!("UI Channel closed! Interface is likely dead.");
            }
        }
    }

    fn report(&self, transition: &Transition) {
        self.send_ui_event(UiEvent::Log(transition.to_string()));
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        let (position, pending_order_id, pending_side) = match self.controller.intent() {
            Intent::Idle => (None, None, None),
            Intent::Pending(p) => (None, Some(p.order_id.clone()), Some(p.side)),
            Intent::InPosition(p) => (Some(p.clone()), None, None),
        };
        ControllerSnapshot {
            mode: self.controller.intent().label(),
            active: self.config.active,
            in_session: self.in_session,
            last_price: self.last_price,
            position,
            pending_order_id,
            pending_side,
        }
    }

    /// Drives ticks until an operator shutdown or an emergency.
    ///
    /// Both endings flatten whatever is open before returning.
    pub async fn run(&mut self) -> EngineExit {
        info!(
            symbol = %self.symbol,
            strategy = %self.strategy.name(),
            "Engine loop running"
        );

        loop {
            match self.tick().await {
                Ok(TickOutcome::Continue) => {}
                Ok(TickOutcome::Shutdown) => {
                    info!("shutdown requested, flattening");
                    self.flatten().await;
                    return EngineExit::Shutdown;
                }
                Err(emergency) => {
                    error!(error = %emergency, "EMERGENCY: flattening and halting");
                    self.send_ui_event(UiEvent::Log(format!("EMERGENCY: {}", emergency)));
                    self.flatten().await;
                    return EngineExit::Emergency(emergency);
                }
            }
            tokio::time::sleep(self.tick_interval).await;
        }
    }

    /// One short-cadence step. Entry evaluation runs only when idle and the
    /// long cadence has elapsed.
    pub async fn tick(&mut self) -> Result<TickOutcome, Emergency> {
        if self.apply_commands() {
            return Ok(TickOutcome::Shutdown);
        }
        let cfg = self.config.clone();
        let now = self.clock.now();

        let session = self.gate.observe(now, &cfg.session);
        self.in_session = session.in_session;

        // reconcile first so a fill racing the session end is flattened, not cancelled
        if let Some(t) = self.controller.poll_fills(&cfg).await? {
            self.report(&t);
        }

        if session.just_ended {
            info!("trading session ended");
            // a pending entry may turn out filled during the cancel, so price it too
            let price = match self.controller.intent() {
                Intent::Idle => None,
                _ => self.latest_price(&cfg).await,
            };
            for t in self.controller.on_session_end(price, &cfg).await? {
                self.report(&t);
            }
        } else if matches!(self.controller.intent(), Intent::InPosition(_)) {
            if let Some(price) = self.latest_price(&cfg).await {
                for t in self.controller.manage_position(price, &cfg).await? {
                    self.report(&t);
                }
            }
        } else if self.controller.is_idle()
            && cfg.active
            && session.in_session
            && self.signal_due(now, &cfg)
        {
            self.last_signal_check = Some(now);
            self.evaluate_entry(&cfg, now).await?;
        }

        self.send_ui_event(UiEvent::Snapshot(self.snapshot()));
        Ok(TickOutcome::Continue)
    }

    /// Applies queued operator commands; `true` means shut down.
    fn apply_commands(&mut self) -> bool {
        while let Ok(cmd) = self.commands.try_recv() {
            match cmd {
                OperatorCommand::SetActive(active) => {
                    info!(active, "operator set active flag");
                    self.config.active = active;
                }
                OperatorCommand::ToggleActive => {
                    self.config.active = !self.config.active;
                    info!(active = self.config.active, "operator toggled active flag");
                }
                OperatorCommand::ReplaceConfig(cfg) => {
                    info!(?cfg, "operator replaced config");
                    self.config = *cfg;
                }
                OperatorCommand::Shutdown => return true,
            }
        }
        false
    }

    fn signal_due(&self, now: DateTime<Utc>, cfg: &BotConfig) -> bool {
        match self.last_signal_check {
            None => true,
            Some(last) => (now - last)
                .to_std()
                .map(|elapsed| elapsed >= cfg.timeframe.duration())
                .unwrap_or(false),
        }
    }

    async fn evaluate_entry(
        &mut self,
        cfg: &BotConfig,
        now: DateTime<Utc>,
    ) -> Result<(), Emergency> {
        let candles = match self
            .market
            .candles(&self.symbol, cfg.timeframe, self.candle_limit)
            .await
        {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "candle fetch failed, skipping evaluation");
                return Ok(());
            }
        };
        if candles.len() < self.strategy.min_candles() {
            warn!(candles = candles.len(), "not enough candles, skipping evaluation");
            return Ok(());
        }
        if let Some(c) = candles.last() {
            self.last_price = Some(c.close);
        }

        let decision = self.strategy.evaluate(&candles);
        if decision == SignalDecision::None {
            return Ok(());
        }
        info!(?decision, "entry signal");
        self.send_ui_event(UiEvent::Log(format!("signal: {:?}", decision)));

        if let Some(t) = self.controller.enter(decision, cfg, now).await? {
            self.report(&t);
        }
        Ok(())
    }

    async fn latest_price(&mut self, cfg: &BotConfig) -> Option<Decimal> {
        match self.market.latest_price(&self.symbol, cfg.timeframe).await {
            Ok(Some(price)) => {
                self.last_price = Some(price);
                Some(price)
            }
            Ok(None) => {
                warn!("no price available this tick");
                None
            }
            Err(e) => {
                warn!(error = %e, "price fetch failed this tick");
                None
            }
        }
    }

    async fn flatten(&mut self) {
        let cfg = self.config.clone();
        let price = match self.controller.intent() {
            Intent::InPosition(_) => self.latest_price(&cfg).await,
            _ => None,
        };
        for t in self.controller.flatten_all(price, cfg.leverage).await {
            self.report(&t);
        }
        self.send_ui_event(UiEvent::Snapshot(self.snapshot()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{
        bot_config, ist, quick_retry, Call, ManualClock, MockExchange, ScriptedMarket,
    };
    use crate::types::{Candle, OrderStatus, OrderType, Side};
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    struct Scripted(Mutex<SignalDecision>);

    impl Scripted {
        fn new(decision: SignalDecision) -> Self {
            Self(Mutex::new(decision))
        }
    }

    impl Strategy for Scripted {
        fn name(&self) -> String {
            "scripted".to_string()
        }

        fn min_candles(&self) -> usize {
            4
        }

        fn evaluate(&self, _candles: &[Candle]) -> SignalDecision {
            *self.0.lock().unwrap()
        }
    }

    fn candles() -> Vec<Candle> {
        (0..5)
            .map(|i| Candle {
                open_time: i,
                open: dec!(100),
                high: dec!(101),
                low: dec!(99),
                close: dec!(100),
                volume: dec!(1),
            })
            .collect()
    }

    struct Harness {
        engine: TradingEngine<Scripted>,
        exchange: Arc<MockExchange>,
        market: Arc<ScriptedMarket>,
        clock: Arc<ManualClock>,
        commands: mpsc::Sender<OperatorCommand>,
    }

    fn harness(decision: SignalDecision) -> Harness {
        let exchange = Arc::new(MockExchange::new());
        let market = Arc::new(ScriptedMarket::new());
        market.set_candles(candles());
        market.set_price(dec!(100));
        let clock = Arc::new(ManualClock::at(ist(10, 0)));
        let (tx, rx) = mpsc::channel(8);

        let controller =
            OrderController::new(exchange.clone(), quick_retry(), dec!(0.01), dec!(0.001));
        let engine = TradingEngine::new(
            "ETHUSDT".to_string(),
            Scripted::new(decision),
            market.clone(),
            controller,
            clock.clone(),
            bot_config(),
            rx,
            None,
        )
        .with_tick_interval(Duration::from_millis(1));

        Harness {
            engine,
            exchange,
            market,
            clock,
            commands: tx,
        }
    }

    #[tokio::test]
    async fn test_full_cycle_entry_fill_trail_and_stop_exit() {
        let mut h = harness(SignalDecision::EnterLong(dec!(100)));

        h.engine.tick().await.unwrap();
        assert_eq!(h.engine.snapshot().mode, "Pending");

        h.exchange.set_order("ord-1", Side::Buy, OrderStatus::Filled, Some(dec!(100)));
        h.market.set_price(dec!(138));
        h.clock.advance_secs(1);
        h.engine.tick().await.unwrap();

        let snap = h.engine.snapshot();
        assert_eq!(snap.mode, "InPosition");
        assert_eq!(snap.position.as_ref().unwrap().stop_loss_price, dec!(110));

        h.market.set_price(dec!(109));
        h.clock.advance_secs(1);
        h.engine.tick().await.unwrap();
        assert_eq!(h.engine.snapshot().mode, "Idle");

        let placed = h.exchange.placed();
        assert_eq!(placed.len(), 2);
        assert_eq!(placed[1].side, Side::Sell);
        assert_eq!(placed[1].order_type, OrderType::Market);
    }

    #[tokio::test]
    async fn test_entry_evaluation_follows_long_cadence() {
        let mut h = harness(SignalDecision::None);

        h.engine.tick().await.unwrap();
        assert_eq!(h.market.candle_requests(), 1);

        for _ in 0..59 {
            h.clock.advance_secs(1);
            h.engine.tick().await.unwrap();
        }
        assert_eq!(h.market.candle_requests(), 1);

        h.clock.advance_secs(1);
        h.engine.tick().await.unwrap();
        assert_eq!(h.market.candle_requests(), 2);
    }

    #[tokio::test]
    async fn test_no_entry_outside_session_or_when_inactive() {
        let mut h = harness(SignalDecision::EnterLong(dec!(100)));
        h.clock.set(ist(6, 0));
        h.engine.tick().await.unwrap();
        assert!(h.exchange.calls().is_empty());

        let mut h = harness(SignalDecision::EnterLong(dec!(100)));
        h.commands.try_send(OperatorCommand::SetActive(false)).unwrap();
        h.engine.tick().await.unwrap();
        assert!(h.exchange.calls().is_empty());
        assert!(!h.engine.snapshot().active);
    }

    #[tokio::test]
    async fn test_inactive_bot_still_flattens_at_session_end() {
        let mut h = harness(SignalDecision::EnterLong(dec!(100)));
        h.engine.tick().await.unwrap();
        h.exchange.set_order("ord-1", Side::Buy, OrderStatus::Filled, Some(dec!(100)));
        h.clock.set(ist(4, 59));
        h.engine.tick().await.unwrap();
        assert_eq!(h.engine.snapshot().mode, "InPosition");

        h.commands.try_send(OperatorCommand::ToggleActive).unwrap();
        h.clock.set(ist(5, 0));
        h.engine.tick().await.unwrap();

        assert_eq!(h.engine.snapshot().mode, "Idle");
        let placed = h.exchange.placed();
        assert_eq!(placed.last().unwrap().order_type, OrderType::Market);
    }

    #[tokio::test]
    async fn test_session_end_cancels_pending_once() {
        let mut h = harness(SignalDecision::EnterLong(dec!(100)));
        h.clock.set(ist(4, 59));
        h.engine.tick().await.unwrap();
        assert_eq!(h.engine.snapshot().mode, "Pending");

        h.clock.set(ist(5, 0));
        h.engine.tick().await.unwrap();
        h.clock.set(ist(5, 1));
        h.engine.tick().await.unwrap();

        assert_eq!(h.exchange.cancelled(), vec!["ord-1".to_string()]);
        assert_eq!(h.engine.snapshot().mode, "Idle");
    }

    #[tokio::test]
    async fn test_fill_racing_session_end_is_flattened() {
        let mut h = harness(SignalDecision::EnterLong(dec!(100)));
        h.clock.set(ist(4, 59));
        h.engine.tick().await.unwrap();

        h.exchange.set_order("ord-1", Side::Buy, OrderStatus::Filled, Some(dec!(100)));
        h.clock.set(ist(5, 0));
        h.engine.tick().await.unwrap();

        assert!(h.exchange.cancelled().is_empty());
        let placed = h.exchange.placed();
        assert_eq!(placed.len(), 2);
        assert_eq!(placed[1].side, Side::Sell);
        assert_eq!(h.engine.snapshot().mode, "Idle");
    }

    #[tokio::test]
    async fn test_missing_market_data_skips_tick() {
        let mut h = harness(SignalDecision::EnterLong(dec!(100)));
        h.market.fail(true);
        assert_eq!(h.engine.tick().await.unwrap(), TickOutcome::Continue);
        assert!(h.exchange.calls().is_empty());

        let mut h = harness(SignalDecision::EnterLong(dec!(100)));
        h.market.set_candles(candles()[..3].to_vec());
        h.engine.tick().await.unwrap();
        assert!(h.exchange.calls().is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_retries_flatten_once_and_halt() {
        let mut h = harness(SignalDecision::EnterLong(dec!(100)));
        h.engine.tick().await.unwrap();
        h.exchange.clear_calls();
        h.exchange.fail_list(true);

        let exit = h.engine.run().await;

        match exit {
            EngineExit::Emergency(e) => assert_eq!(e.operation, "list_orders"),
            other => panic!("expected emergency, got {:?}", other),
        }
        assert_eq!(
            h.exchange.calls(),
            vec![Call::List, Call::List, Call::Cancel("ord-1".to_string())]
        );
        assert_eq!(h.engine.snapshot().mode, "Idle");
    }

    #[tokio::test]
    async fn test_exhausted_session_end_cancel_flattens_once_and_halts() {
        let mut h = harness(SignalDecision::EnterLong(dec!(100)));
        h.clock.set(ist(4, 59));
        h.engine.tick().await.unwrap();
        assert_eq!(h.engine.snapshot().mode, "Pending");
        h.exchange.clear_calls();

        h.exchange.fail_cancel(true);
        h.clock.set(ist(5, 0));
        let exit = h.engine.run().await;

        match exit {
            EngineExit::Emergency(e) => assert_eq!(e.operation, "cancel_order"),
            other => panic!("expected emergency, got {:?}", other),
        }
        // fill check, two retried cancels, then the single flatten cancel
        assert_eq!(
            h.exchange.calls(),
            vec![
                Call::List,
                Call::Cancel("ord-1".to_string()),
                Call::Cancel("ord-1".to_string()),
                Call::Cancel("ord-1".to_string()),
            ]
        );
        assert_eq!(h.engine.snapshot().mode, "Idle");
    }

    #[tokio::test]
    async fn test_fill_during_session_end_cancel_is_flattened() {
        let mut h = harness(SignalDecision::EnterLong(dec!(100)));
        h.clock.set(ist(4, 59));
        h.engine.tick().await.unwrap();
        h.exchange.set_order("ord-1", Side::Buy, OrderStatus::Open, None);
        h.exchange.fill_on_cancel(true);

        h.clock.set(ist(5, 0));
        h.engine.tick().await.unwrap();

        assert_eq!(h.engine.snapshot().mode, "Idle");
        let placed = h.exchange.placed();
        assert_eq!(placed.len(), 2);
        assert_eq!(placed[1].side, Side::Sell);
        assert_eq!(placed[1].order_type, OrderType::Market);

        // nothing left behind for later ticks
        h.exchange.clear_calls();
        h.clock.set(ist(5, 1));
        h.engine.tick().await.unwrap();
        assert!(h.exchange.calls().is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_exit_still_attempts_one_flatten() {
        let mut h = harness(SignalDecision::EnterLong(dec!(100)));
        h.engine.tick().await.unwrap();
        h.exchange.set_order("ord-1", Side::Buy, OrderStatus::Filled, Some(dec!(100)));
        h.clock.advance_secs(1);
        h.engine.tick().await.unwrap();
        h.exchange.clear_calls();

        h.exchange.fail_place(true);
        h.market.set_price(dec!(60));
        h.clock.advance_secs(1);
        let exit = h.engine.run().await;

        assert!(matches!(exit, EngineExit::Emergency(_)));
        // two retried exits, then one flatten attempt
        assert_eq!(h.exchange.placed().len(), 3);
        assert_eq!(h.engine.snapshot().mode, "Idle");
    }

    #[tokio::test]
    async fn test_operator_shutdown_flattens_and_stops() {
        let mut h = harness(SignalDecision::EnterLong(dec!(100)));
        h.engine.tick().await.unwrap();
        h.commands.try_send(OperatorCommand::Shutdown).unwrap();

        let exit = h.engine.run().await;
        assert!(matches!(exit, EngineExit::Shutdown));
        assert_eq!(h.exchange.cancelled(), vec!["ord-1".to_string()]);
    }

    #[tokio::test]
    async fn test_replaced_config_applies_from_next_tick() {
        let mut h = harness(SignalDecision::EnterLong(dec!(100)));
        let mut cfg = bot_config();
        cfg.order_size = dec!(3);
        cfg.stop_loss_distance = dec!(40);
        h.commands
            .try_send(OperatorCommand::ReplaceConfig(Box::new(cfg)))
            .unwrap();

        h.engine.tick().await.unwrap();
        assert_eq!(h.exchange.placed()[0].quantity, dec!(3));

        h.exchange.set_order("ord-1", Side::Buy, OrderStatus::Filled, Some(dec!(100)));
        h.clock.advance_secs(1);
        h.engine.tick().await.unwrap();
        assert_eq!(
            h.engine.snapshot().position.unwrap().stop_loss_price,
            dec!(60)
        );
    }
}
