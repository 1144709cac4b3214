//! End-to-end scenarios for the execution core
//!
//! Drives the matching + risk engines through the public API with the
//! in-memory store implementations. Latency and the SL/TP grace window
//! are zeroed unless a test is specifically about them.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use propsim::bus::{EventBus, OrderEventKind, TradeEventKind};
use propsim::config::EngineConfig;
use propsim::errors::RejectReason;
use propsim::instruments::{Contract, InstrumentRegistry, TradingHours};
use propsim::kv::memory::MemoryKv;
use propsim::kv::KvStore;
use propsim::marks::MarkStore;
use propsim::matching::{MatchingEngine, OrderRequest, PlaceOutcome};
use propsim::models::{
    Account, AccountStatus, AccountTier, ExitReason, OrderStatus, OrderType, Side, Tick,
    TrailingDdMode,
};
use propsim::persistence::{DynTradeStore, MemoryStore};
use propsim::risk::RiskEngine;
use propsim::state::SharedTradeState;

struct Harness {
    engine: Arc<MatchingEngine>,
    state: Arc<SharedTradeState>,
    store: Arc<MemoryStore>,
    kv: Arc<MemoryKv>,
    bus: EventBus,
}

fn test_engine_config() -> EngineConfig {
    EngineConfig {
        execution_latency_ms: 0,
        sltp_grace_ms: 0,
        // Scenarios submit same-shape orders back to back; the
        // suppression window gets its own dedicated test
        duplicate_order_ms: 0,
        ..EngineConfig::default()
    }
}

/// Contract with no costs, for scenarios about pure PnL math
fn frictionless_btc() -> Contract {
    Contract {
        symbol: "BTCUSD".into(),
        display: "Bitcoin".into(),
        price_key: "btcusdt".into(),
        qty_step: dec!(0.01),
        min_qty: dec!(0.01),
        tick_value: Decimal::ONE,
        convert_to_inr: false,
        max_lots_evaluation: dec!(5),
        max_lots_funded: dec!(10),
        trading_hours: None,
        daily_loss_limit: dec!(2500),
        commission: Decimal::ZERO,
        spread: Decimal::ZERO,
        allow_partial_fills: None,
        partial_fill_ratio: None,
    }
}

fn account(id: &str, start: Decimal) -> Account {
    Account {
        id: id.into(),
        user_id: "u1".into(),
        tier: AccountTier::Evaluation,
        status: AccountStatus::Active,
        start_balance: start,
        current_balance: start,
        peak_balance: start,
        max_loss: dec!(2000),
        daily_loss_limit: dec!(1000),
        max_intraday_loss: Decimal::ZERO,
        trail_drawdown: dec!(2000),
        trailing_dd_mode: TrailingDdMode::Live,
        profit_target: dec!(3000),
        total_profit: Decimal::ZERO,
        best_day_profit: Decimal::ZERO,
        consistency_flag: false,
        start_of_day_equity: start,
        session_day: Utc::now().date_naive(),
        close_on_daily_reset: false,
        blown_reason: None,
    }
}

fn harness(cfg: EngineConfig, contracts: Vec<Contract>, accounts: Vec<Account>) -> Harness {
    let registry = Arc::new(InstrumentRegistry::with_defaults());
    if !contracts.is_empty() {
        registry.install(contracts);
    }

    let bus = EventBus::new();
    let state = Arc::new(SharedTradeState::new(bus.clone()));
    state.install_accounts(accounts);

    let marks = Arc::new(MarkStore::new());
    let store = Arc::new(MemoryStore::new());
    let kv = Arc::new(MemoryKv::new());

    let dyn_store: DynTradeStore = store.clone();
    let risk = Arc::new(RiskEngine::new(
        state.clone(),
        registry.clone(),
        dyn_store.clone(),
        bus.clone(),
    ));

    let engine = Arc::new(MatchingEngine::new(
        state.clone(),
        registry,
        dyn_store,
        kv.clone() as Arc<dyn KvStore>,
        bus.clone(),
        marks,
        risk.clone(),
        cfg,
        None,
    ));
    risk.set_closer(engine.clone());

    Harness {
        engine,
        state,
        store,
        kv,
        bus,
    }
}

async fn tick(h: &Harness, symbol: &str, price: Decimal) {
    h.engine
        .process_tick(&Tick {
            symbol: symbol.into(),
            price,
            ts: Utc::now().timestamp_millis(),
        })
        .await;
}

fn market_buy(account_id: &str, qty: Decimal) -> OrderRequest {
    OrderRequest {
        account_id: account_id.into(),
        user_id: "u1".into(),
        symbol: "BTCUSD".into(),
        side: Side::Buy,
        quantity: qty,
        order_type: OrderType::Market,
        limit_price: None,
        stop_loss: None,
        take_profit: None,
        idempotency_key: None,
    }
}

// ============================================================
// S1: market buy, profit exit via TP
// ============================================================

#[tokio::test]
async fn test_market_buy_tp_exit_settles_exact_pnl() {
    // Default BTCUSD: tick_value=1, spread=5, commission=50
    let h = harness(test_engine_config(), vec![], vec![account("A1", dec!(50000))]);
    let mut trade_events = h.bus.subscribe_trades();
    let mut order_events = h.bus.subscribe_orders();

    tick(&h, "BTCUSD", dec!(30000)).await;
    tick(&h, "BTCUSD", dec!(30010)).await;

    let mut req = market_buy("A1", dec!(1.0));
    req.take_profit = Some(dec!(30200));
    let outcome = h.engine.place_order(req).await.unwrap();

    // Fill at 30010 + spread 5; entry commission carried in pnl
    let trade = match outcome {
        PlaceOutcome::Placed { trade: Some(t), .. } => t,
        other => panic!("expected fill, got {other:?}"),
    };
    assert_eq!(trade.entry_price, dec!(30015));
    assert_eq!(trade.pnl, dec!(-50));
    assert_eq!(h.state.get_account("A1").unwrap().current_balance, dec!(50000));

    tick(&h, "BTCUSD", dec!(30100)).await;
    assert_eq!(h.state.get_open_trades().len(), 1, "TP must not fire below 30200");

    tick(&h, "BTCUSD", dec!(30250)).await;

    // Closed at the TP barrier, not the tick: (30200-30015)*1 - 50 = 135
    assert!(h.state.get_open_trades().is_empty());
    let account = h.state.get_account("A1").unwrap();
    assert_eq!(account.current_balance, dec!(50135));
    assert_eq!(account.total_profit, dec!(135));

    let rows = h.store.trade_rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].pnl, dec!(135));
    assert_eq!(rows[0].exit_price, Some(dec!(30200)));
    assert_eq!(rows[0].exit_reason, Some(ExitReason::TpHit));

    // Session PnL mirrors the closed trade net of entry commission
    let session = h.state.get_session("A1");
    assert_eq!(session.realized, dec!(135));

    // Event order: ORDER_FILLED, then TRADE_OPENED before TRADE_CLOSED
    assert_eq!(order_events.try_recv().unwrap().kind, OrderEventKind::Filled);
    assert_eq!(trade_events.try_recv().unwrap().kind, TradeEventKind::Opened);
    let closed = trade_events.try_recv().unwrap();
    assert_eq!(closed.kind, TradeEventKind::Closed);
    assert_eq!(closed.reason, Some(ExitReason::TpHit));
}

// ============================================================
// S2: limit sell not filled
// ============================================================

#[tokio::test]
async fn test_limit_sell_rests_until_crossed() {
    let h = harness(test_engine_config(), vec![], vec![account("A1", dec!(50000))]);

    tick(&h, "BTCUSD", dec!(34000)).await;

    let req = OrderRequest {
        side: Side::Sell,
        quantity: dec!(0.1),
        order_type: OrderType::Limit,
        limit_price: Some(dec!(35000)),
        ..market_buy("A1", dec!(0.1))
    };
    let outcome = h.engine.place_order(req).await.unwrap();
    assert!(matches!(outcome, PlaceOutcome::Placed { trade: None, .. }));

    tick(&h, "BTCUSD", dec!(34500)).await;
    tick(&h, "BTCUSD", dec!(34900)).await;

    // Nothing crossed 35000: order still pending, no trade produced
    assert_eq!(h.state.get_pending_orders().len(), 1);
    assert!(h.state.get_open_trades().is_empty());
    assert!(h.store.trade_rows().is_empty());
    let row = &h.store.order_rows()[0];
    assert_eq!(row.status, OrderStatus::Pending);

    // The crossing tick fills before process_tick returns
    tick(&h, "BTCUSD", dec!(35000)).await;
    assert!(h.state.get_pending_orders().is_empty());
    assert_eq!(h.state.get_open_trades().len(), 1);
}

// ============================================================
// S3: SL cascade, then intraday-loss breach
// ============================================================

async fn sl_breach_setup(max_intraday_loss: Decimal) -> Harness {
    let mut a2 = account("A2", dec!(100000));
    a2.max_loss = dec!(100000);
    a2.trail_drawdown = Decimal::ZERO;
    a2.daily_loss_limit = Decimal::ZERO;
    a2.max_intraday_loss = max_intraday_loss;

    let h = harness(test_engine_config(), vec![frictionless_btc()], vec![a2]);

    tick(&h, "BTCUSD", dec!(30000)).await;
    let mut req = market_buy("A2", dec!(0.1));
    req.stop_loss = Some(dec!(29500));
    h.engine.place_order(req).await.unwrap();

    tick(&h, "BTCUSD", dec!(30100)).await;
    let mut req = market_buy("A2", dec!(0.1));
    req.stop_loss = Some(dec!(29600));
    h.engine.place_order(req).await.unwrap();

    tick(&h, "BTCUSD", dec!(29400)).await;
    h
}

#[tokio::test]
async fn test_sl_cascade_within_intraday_budget() {
    let h = sl_breach_setup(dec!(1000)).await;

    // Both stops hit at their barrier: (29500-30000)*0.1 + (29600-30100)*0.1
    assert!(h.state.get_open_trades().is_empty());
    let account = h.state.get_account("A2").unwrap();
    assert_eq!(account.current_balance, dec!(99900));
    assert_eq!(account.status, AccountStatus::Active);
    assert_eq!(h.state.get_session("A2").realized, dec!(-100));
}

#[tokio::test]
async fn test_sl_cascade_breaches_tight_intraday_limit() {
    let h = sl_breach_setup(dec!(80)).await;

    let account = h.state.get_account("A2").unwrap();
    assert_eq!(account.status, AccountStatus::Blown);
    assert_eq!(account.blown_reason.as_deref(), Some("MAX_INTRADAY_LOSS"));

    // The blown transition was audited
    let audits = h.store.audit_rows();
    assert!(audits.iter().any(|(event, _)| event == "MAX_INTRADAY_LOSS"));

    // Invariant: a blown account takes no new fills
    let err = h.engine.place_order(market_buy("A2", dec!(0.1))).await;
    assert_eq!(err.unwrap_err(), RejectReason::AccountInactive);
}

#[tokio::test]
async fn test_breach_liquidates_open_position_with_slippage() {
    // Trade 1 realizes the breach via SL; trade 2 has no stop and must be
    // force-closed by the liquidation path at a slipped price
    let mut a2 = account("A2", dec!(100000));
    a2.max_loss = dec!(100000);
    a2.trail_drawdown = Decimal::ZERO;
    a2.daily_loss_limit = Decimal::ZERO;
    a2.max_intraday_loss = dec!(40);

    let h = harness(test_engine_config(), vec![frictionless_btc()], vec![a2]);

    tick(&h, "BTCUSD", dec!(30000)).await;
    let mut req = market_buy("A2", dec!(0.1));
    req.stop_loss = Some(dec!(29500));
    h.engine.place_order(req).await.unwrap();

    tick(&h, "BTCUSD", dec!(30100)).await;
    h.engine.place_order(market_buy("A2", dec!(0.1))).await.unwrap();

    tick(&h, "BTCUSD", dec!(29400)).await;

    let account = h.state.get_account("A2").unwrap();
    assert_eq!(account.status, AccountStatus::Blown);
    assert!(h.state.get_open_trades().is_empty());

    // Breach exit: 29400 - (30100*0.0001 + |29400-30100|*0.25) = 29221.99
    let rows = h.store.trade_rows();
    let liquidated = rows
        .iter()
        .find(|t| t.exit_reason == Some(ExitReason::MaxIntradayLoss))
        .expect("liquidated trade");
    assert_eq!(liquidated.exit_price, Some(dec!(29221.99)));
}

// ============================================================
// S4: idempotent replay
// ============================================================

#[tokio::test]
async fn test_idempotency_key_replay_returns_original_order() {
    let h = harness(test_engine_config(), vec![], vec![account("A1", dec!(50000))]);
    let mut trade_events = h.bus.subscribe_trades();

    tick(&h, "BTCUSD", dec!(30000)).await;

    let mut req = market_buy("A1", dec!(0.01));
    req.idempotency_key = Some("k1".into());

    let first = h.engine.place_order(req.clone()).await.unwrap();
    let PlaceOutcome::Placed { order_id, .. } = first else {
        panic!("first submission must fill");
    };

    let second = h.engine.place_order(req).await.unwrap();
    match second {
        PlaceOutcome::Duplicate { order_id: dup } => assert_eq!(dup, order_id),
        other => panic!("expected duplicate, got {other:?}"),
    }

    // Exactly one row, one open trade, one TRADE_OPENED event
    assert_eq!(h.store.order_rows().len(), 1);
    assert_eq!(h.state.get_open_trades().len(), 1);
    assert_eq!(trade_events.try_recv().unwrap().kind, TradeEventKind::Opened);
    assert!(trade_events.try_recv().is_err());
}

#[tokio::test]
async fn test_same_shape_resubmission_suppressed() {
    let cfg = EngineConfig {
        duplicate_order_ms: 500,
        ..test_engine_config()
    };
    let h = harness(cfg, vec![], vec![account("A1", dec!(50000))]);
    tick(&h, "BTCUSD", dec!(30000)).await;

    h.engine.place_order(market_buy("A1", dec!(0.01))).await.unwrap();
    let err = h.engine.place_order(market_buy("A1", dec!(0.01))).await;
    assert_eq!(err.unwrap_err(), RejectReason::DuplicateOrder);
}

// ============================================================
// S5: partial fill cascade
// ============================================================

#[tokio::test]
async fn test_partial_fill_cascade_consumes_full_quantity() {
    let cfg = EngineConfig {
        enable_partial_fills: true,
        partial_fill_ratio: 0.5,
        partial_fill_random: false,
        ..test_engine_config()
    };
    let h = harness(cfg, vec![frictionless_btc()], vec![account("A1", dec!(50000))]);

    tick(&h, "BTCUSD", dec!(30000)).await;
    let outcome = h.engine.place_order(market_buy("A1", dec!(1.0))).await.unwrap();

    // First slice is half; the remainder rests under a fresh id
    let PlaceOutcome::Placed { order_id, trade: Some(first) } = outcome else {
        panic!("expected partial fill");
    };
    assert_eq!(first.quantity, dec!(0.5));
    let pending = h.state.get_pending_orders();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].quantity, dec!(0.5));
    assert_ne!(pending[0].id, order_id);

    // Each further tick halves the remainder until the tail (< min_qty
    // would remain) fills whole
    for _ in 0..10 {
        if h.state.get_pending_orders().is_empty() {
            break;
        }
        tick(&h, "BTCUSD", dec!(30000)).await;
    }

    assert!(h.state.get_pending_orders().is_empty());
    let total: Decimal = h.state.get_open_trades().iter().map(|t| t.quantity).sum();
    assert_eq!(total, dec!(1.0));
    assert!(h.state.get_open_trades().len() >= 3);
}

// ============================================================
// S6: trailing drawdown freezes on pass
// ============================================================

#[tokio::test]
async fn test_pass_freezes_trailing_drawdown() {
    let mut a1 = account("A1", dec!(50000));
    a1.current_balance = dec!(53500);
    a1.peak_balance = dec!(53500);
    a1.total_profit = dec!(3200);
    a1.best_day_profit = dec!(1400); // under half the target: no flag

    let h = harness(test_engine_config(), vec![], vec![a1]);

    tick(&h, "BTCUSD", dec!(30000)).await;

    let account = h.state.get_account("A1").unwrap();
    assert_eq!(account.status, AccountStatus::Passed);
    assert_eq!(account.trailing_dd_mode, TrailingDdMode::Frozen);
    let floor_at_pass = dec!(51500); // peak 53500 - trail 2000

    // New equity highs must not raise the frozen floor
    h.state.update_account("A1", |a| a.current_balance = dec!(56000));
    tick(&h, "BTCUSD", dec!(30100)).await;

    let account = h.state.get_account("A1").unwrap();
    assert_eq!(account.peak_balance, dec!(53500));
    assert_eq!(
        account.peak_balance - account.trail_drawdown,
        floor_at_pass
    );
    assert!(h
        .store
        .audit_rows()
        .iter()
        .any(|(event, _)| event == "ACCOUNT_PASSED"));
}

#[tokio::test]
async fn test_consistency_flag_blocks_pass() {
    let mut a1 = account("A1", dec!(50000));
    a1.current_balance = dec!(53500);
    a1.peak_balance = dec!(53500);
    a1.total_profit = dec!(3200);
    a1.best_day_profit = dec!(1600); // over half the 3000 target

    let h = harness(test_engine_config(), vec![], vec![a1]);
    tick(&h, "BTCUSD", dec!(30000)).await;

    let account = h.state.get_account("A1").unwrap();
    assert!(account.consistency_flag);
    assert_eq!(account.status, AccountStatus::Active);
}

// ============================================================
// Grace window
// ============================================================

#[tokio::test]
async fn test_tp_blocked_inside_grace_window() {
    let cfg = EngineConfig {
        sltp_grace_ms: 60_000,
        ..test_engine_config()
    };
    let h = harness(cfg, vec![], vec![account("A1", dec!(50000))]);

    tick(&h, "BTCUSD", dec!(30000)).await;
    let mut req = market_buy("A1", dec!(0.1));
    req.take_profit = Some(dec!(30050));
    h.engine.place_order(req).await.unwrap();

    // The very next tick crosses the TP but the trade is newborn
    tick(&h, "BTCUSD", dec!(30100)).await;
    let open = h.state.get_open_trades();
    assert_eq!(open.len(), 1, "grace must keep the fresh trade open");

    // Age the trade past the window; the same tick now closes it
    let mut aged = h.state.remove_open_trade(&open[0].id).unwrap();
    aged.time_opened -= 120_000;
    h.state.add_open_trade(aged);

    tick(&h, "BTCUSD", dec!(30100)).await;
    assert!(h.state.get_open_trades().is_empty());
}

// ============================================================
// Boundaries and gates
// ============================================================

#[tokio::test]
async fn test_lot_size_boundaries() {
    let h = harness(test_engine_config(), vec![], vec![account("A1", dec!(50000))]);
    tick(&h, "BTCUSD", dec!(30000)).await;

    // min_qty exactly is accepted
    assert!(h.engine.place_order(market_buy("A1", dec!(0.01))).await.is_ok());

    // below min_qty
    let err = h.engine.place_order(market_buy("A1", dec!(0.005))).await;
    assert_eq!(err.unwrap_err(), RejectReason::InvalidLotSize);

    // not a step multiple
    let err = h.engine.place_order(market_buy("A1", dec!(0.015))).await;
    assert_eq!(err.unwrap_err(), RejectReason::InvalidLotSize);

    // over the evaluation tier cap (5 lots)
    let err = h.engine.place_order(market_buy("A1", dec!(5.01))).await;
    assert_eq!(err.unwrap_err(), RejectReason::MaxLotSize);
}

#[tokio::test]
async fn test_sl_triggers_on_exact_touch_tick() {
    let h = harness(test_engine_config(), vec![frictionless_btc()], vec![account("A1", dec!(50000))]);

    tick(&h, "BTCUSD", dec!(30000)).await;
    let mut req = market_buy("A1", dec!(0.1));
    req.stop_loss = Some(dec!(29500));
    h.engine.place_order(req).await.unwrap();

    tick(&h, "BTCUSD", dec!(29500)).await;

    let rows = h.store.trade_rows();
    assert_eq!(rows[0].exit_reason, Some(ExitReason::SlHit));
    assert_eq!(rows[0].exit_price, Some(dec!(29500)));
}

#[tokio::test]
async fn test_unknown_symbol_rejected() {
    let h = harness(test_engine_config(), vec![], vec![account("A1", dec!(50000))]);
    let mut req = market_buy("A1", dec!(0.01));
    req.symbol = "DOGEUSD".into();
    let err = h.engine.place_order(req).await;
    assert_eq!(err.unwrap_err(), RejectReason::SymbolNotSupported);
}

#[tokio::test]
async fn test_no_live_price_without_mark_or_fallback() {
    let h = harness(test_engine_config(), vec![], vec![account("A1", dec!(50000))]);
    // No tick ever processed and no REST fetcher wired
    let err = h.engine.place_order(market_buy("A1", dec!(0.01))).await;
    assert_eq!(err.unwrap_err(), RejectReason::NoLivePrice);
}

#[tokio::test]
async fn test_market_closed_outside_trading_hours() {
    let now_hour = chrono::Timelike::hour(&Utc::now());
    let mut contract = frictionless_btc();
    // A one-hour window that is never "now"
    contract.trading_hours = Some(TradingHours {
        start_hour: (now_hour + 2) % 24,
        end_hour: (now_hour + 3) % 24,
        utc_offset_minutes: 0,
    });

    let h = harness(test_engine_config(), vec![contract], vec![account("A1", dec!(50000))]);
    tick(&h, "BTCUSD", dec!(30000)).await;

    let err = h.engine.place_order(market_buy("A1", dec!(0.01))).await;
    assert_eq!(err.unwrap_err(), RejectReason::MarketClosed);
}

#[tokio::test]
async fn test_post_fill_gate_rejects_without_trade() {
    // Balance one commission away from max loss: the pre-trade gate
    // passes but the hypothetical post-fill balance breaches
    let mut a1 = account("A1", dec!(50000));
    a1.current_balance = dec!(48025);
    a1.trail_drawdown = Decimal::ZERO;

    let h = harness(test_engine_config(), vec![], vec![a1]);
    tick(&h, "BTCUSD", dec!(30000)).await;

    // commission 50 * 1.0 lot: 48025 - 50 = 47975 <= 48000
    let err = h.engine.place_order(market_buy("A1", dec!(1.0))).await;
    assert_eq!(err.unwrap_err(), RejectReason::MaxLoss);

    assert!(h.state.get_open_trades().is_empty());
    assert!(h.store.trade_rows().is_empty());
    let row = &h.store.order_rows()[0];
    assert_eq!(row.status, OrderStatus::Rejected);
}

// ============================================================
// Equity observation
// ============================================================

#[tokio::test]
async fn test_account_upnl_tracks_open_exposure() {
    let h = harness(test_engine_config(), vec![frictionless_btc()], vec![account("A1", dec!(50000))]);
    let mut account_events = h.bus.subscribe_accounts();

    tick(&h, "BTCUSD", dec!(30000)).await;
    h.engine.place_order(market_buy("A1", dec!(0.5))).await.unwrap();

    tick(&h, "BTCUSD", dec!(30040)).await;

    // Reported equity = balance + uPnL: 50000 + (30040-30000)*0.5 = 50020
    let mut upnl = None;
    while let Ok(event) = account_events.try_recv() {
        if let propsim::bus::AccountEvent::Upnl { account_id, upnl: value, .. } = event {
            assert_eq!(account_id, "A1");
            upnl = Some(value);
        }
    }
    assert_eq!(upnl, Some(dec!(20)));
    let balance = h.state.get_account("A1").unwrap().current_balance;
    assert_eq!(balance + upnl.unwrap(), dec!(50020));
}

// ============================================================
// KV publication side
// ============================================================

#[tokio::test]
async fn test_trade_lifecycle_published_to_kv_channels() {
    let h = harness(test_engine_config(), vec![], vec![account("A1", dec!(50000))]);

    tick(&h, "BTCUSD", dec!(30000)).await;
    let mut req = market_buy("A1", dec!(0.1));
    req.take_profit = Some(dec!(30050));
    h.engine.place_order(req).await.unwrap();
    tick(&h, "BTCUSD", dec!(30100)).await;

    let events = h.kv.published_on("trade_events");
    assert_eq!(events.len(), 2);
    assert!(events[0].contains("TRADE_OPENED"));
    assert!(events[1].contains("TRADE_CLOSED"));

    // Order lifecycle also lands on the audit ring
    assert!(!h.kv.audit_entries().is_empty());
}
