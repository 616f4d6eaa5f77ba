use chrono::{DateTime, Duration, TimeZone, Utc};
use engine::indicators::compute_atr_series;
use engine::models::{Bar, BarSeries, SignalAction};
use engine::observer::{BacktestEvent, NullObserver, RecordingObserver};
use engine::{BacktestSettings, BreakoutParams, Engine};
use std::sync::Once;

fn ensure_test_env() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

fn create_date(offset: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 1, 2, 0, 0, 0).unwrap() + Duration::days(offset)
}

fn bar(day: i64, open: f64, high: f64, low: f64, close: f64, volume: u64) -> Bar {
    Bar {
        date: create_date(day),
        open,
        high,
        low,
        close,
        volume,
    }
}

/// 50 bars trading inside [96, 104] on steady volume.
fn consolidation() -> Vec<Bar> {
    (0..50)
        .map(|i| bar(i, 100.0, 104.0, 96.0, 100.0, 1_000))
        .collect()
}

fn with_breakout(volume: u64) -> Vec<Bar> {
    let mut bars = consolidation();
    bars.push(bar(50, 100.0, 111.0, 99.0, 110.0, volume));
    bars
}

fn default_engine() -> Engine {
    Engine::new(BreakoutParams::default(), BacktestSettings::default()).unwrap()
}

fn fills(observer: &RecordingObserver) -> Vec<SignalAction> {
    observer
        .events()
        .iter()
        .filter_map(|event| match event {
            BacktestEvent::BuyFilled { .. } => Some(SignalAction::Buy),
            BacktestEvent::SellFilled { .. } => Some(SignalAction::Sell),
            _ => None,
        })
        .collect()
}

#[test]
fn confirmed_breakout_opens_position_with_atr_stop() {
    ensure_test_env();
    let bars = with_breakout(2_000);
    let expected_atr = compute_atr_series(&bars, 14)[50].unwrap();
    let series = BarSeries::new("BRK", bars).unwrap();

    let mut observer = RecordingObserver::new();
    let report = default_engine().run(&series, &mut observer);

    assert!(report.success, "{:?}", report.error);
    assert_eq!(fills(&observer), vec![SignalAction::Buy]);

    let initial_stop = observer
        .events()
        .iter()
        .find_map(|event| match event {
            BacktestEvent::InitialStopSet { stop, .. } => Some(*stop),
            _ => None,
        })
        .expect("initial stop event");
    assert!((initial_stop - (110.0 - expected_atr * 2.0)).abs() < 1e-9);

    let open = report.open_position.expect("position left open");
    assert_eq!(open.entry_price, 110.0);
    assert_eq!(open.entry_index, 50);
    assert_eq!(open.quantity, 908);
    assert!((open.trailing_stop_price - initial_stop).abs() < 1e-9);
    assert!(report.trades.is_empty());
    assert_eq!(report.metrics.unwrap().total_trades, 0);
}

#[test]
fn breakout_without_volume_confirmation_is_ignored() {
    ensure_test_env();
    let series = BarSeries::new("BRK", with_breakout(1_200)).unwrap();
    let mut observer = RecordingObserver::new();
    let report = default_engine().run(&series, &mut observer);

    assert!(report.success);
    assert!(report.open_position.is_none());
    assert_eq!(report.metrics.unwrap().total_trades, 0);
    assert_eq!(
        observer.count(|event| matches!(event, BacktestEvent::BuySignal { .. })),
        0
    );
}

#[test]
fn close_below_trailing_stop_exits_at_that_close() {
    ensure_test_env();
    let mut bars = with_breakout(2_000);
    bars.push(bar(51, 110.0, 114.0, 109.0, 113.0, 1_000));
    bars.push(bar(52, 100.0, 101.0, 85.0, 86.0, 1_000));
    bars.push(bar(53, 86.0, 90.0, 84.0, 88.0, 1_000));
    let series = BarSeries::new("BRK", bars).unwrap();

    let mut observer = RecordingObserver::new();
    let report = default_engine().run(&series, &mut observer);

    assert!(report.success);
    assert_eq!(fills(&observer), vec![SignalAction::Buy, SignalAction::Sell]);
    assert_eq!(report.trades.len(), 1);

    let trade = &report.trades[0];
    assert_eq!(trade.entry_index, 50);
    assert_eq!(trade.exit_index, 52);
    assert_eq!(trade.exit_price, 86.0);
    assert_eq!(trade.exit_date, create_date(52));
    assert!(trade.net_pnl < trade.gross_pnl);

    let stop_at_exit = observer
        .events()
        .iter()
        .find_map(|event| match event {
            BacktestEvent::SellSignal { stop, .. } => *stop,
            _ => None,
        })
        .unwrap();
    assert!(86.0 < stop_at_exit);

    let metrics = report.metrics.unwrap();
    assert_eq!(metrics.total_trades, 1);
    assert_eq!(metrics.win_rate, 0.0);
    assert!((metrics.pnl_net - trade.net_pnl).abs() < 1e-9);
    assert_eq!(metrics.sqn, None);
    assert!(metrics.max_drawdown > 0.0);
}

#[test]
fn rising_trend_ratchets_stop_before_exit() {
    ensure_test_env();
    let mut bars = with_breakout(2_000);
    for k in 1..=10 {
        let close = 110.0 + 3.0 * k as f64;
        bars.push(bar(50 + k, close - 1.0, close + 1.0, close - 2.0, close, 1_000));
    }
    bars.push(bar(61, 130.0, 131.0, 100.0, 101.0, 1_000));
    let series = BarSeries::new("TREND", bars).unwrap();

    let mut observer = RecordingObserver::new();
    let report = default_engine().run(&series, &mut observer);
    assert!(report.success);

    let mut stops = Vec::new();
    for event in observer.events() {
        match event {
            BacktestEvent::InitialStopSet { stop, .. } => stops.push(*stop),
            BacktestEvent::TrailingStopRaised { stop, .. } => stops.push(*stop),
            _ => {}
        }
    }
    assert!(stops.len() > 1);
    assert!(stops.windows(2).all(|pair| pair[1] > pair[0]));

    assert_eq!(report.trades.len(), 1);
    let trade = &report.trades[0];
    assert_eq!(trade.exit_index, 61);
    assert_eq!(trade.exit_price, 101.0);
    assert!(*stops.last().unwrap() > 101.0);
    assert_eq!(report.metrics.unwrap().winning_trades, 0);
}

#[test]
fn flat_series_reports_zero_trade_defaults() {
    ensure_test_env();
    let bars: Vec<Bar> = (0..100)
        .map(|i| bar(i, 100.0, 101.0, 99.0, 100.0, 1_000))
        .collect();
    let series = BarSeries::new("FLAT", bars).unwrap();
    let report = default_engine().run(&series, &mut NullObserver);

    assert!(report.success);
    assert_eq!(report.start_value, Some(100_000.0));
    assert_eq!(report.end_value, Some(100_000.0));
    assert_eq!(report.equity_curve.len(), 100);

    let metrics = report.metrics.unwrap();
    assert_eq!(metrics.total_trades, 0);
    assert_eq!(metrics.win_rate, 0.0);
    assert_eq!(metrics.pnl_net, 0.0);
    assert_eq!(metrics.max_drawdown, 0.0);
    assert_eq!(metrics.total_return, 0.0);
    assert_eq!(metrics.sqn, None);
    assert_eq!(metrics.sharpe_ratio, None);
}

#[test]
fn unaffordable_breakout_is_rejected_and_run_completes() {
    ensure_test_env();
    let mut bars = with_breakout(2_000);
    bars.push(bar(51, 110.0, 111.0, 108.0, 109.0, 1_000));
    let series = BarSeries::new("POOR", bars).unwrap();
    let engine = Engine::new(
        BreakoutParams::default(),
        BacktestSettings {
            initial_cash: 50.0,
            ..BacktestSettings::default()
        },
    )
    .unwrap();

    let mut observer = RecordingObserver::new();
    let report = engine.run(&series, &mut observer);

    assert!(report.success);
    assert_eq!(
        observer.count(|event| matches!(event, BacktestEvent::BuyRejected { .. })),
        1
    );
    assert!(fills(&observer).is_empty());
    assert!(report.open_position.is_none());
    assert!(report.trades.is_empty());
    assert_eq!(report.end_value, Some(50.0));
}

#[test]
fn rejected_breakout_leaves_later_breakouts_tradable() {
    ensure_test_env();
    let mut bars = with_breakout(2_000);
    // A lower consolidation that rolls the rejected bar out of the lookback.
    for day in 51..=100 {
        bars.push(bar(day, 40.0, 44.0, 36.0, 40.0, 1_000));
    }
    bars.push(bar(101, 44.0, 49.0, 43.0, 48.0, 2_000));
    let series = BarSeries::new("RETRY", bars).unwrap();
    let engine = Engine::new(
        BreakoutParams::default(),
        BacktestSettings {
            initial_cash: 50.0,
            ..BacktestSettings::default()
        },
    )
    .unwrap();

    let mut observer = RecordingObserver::new();
    let report = engine.run(&series, &mut observer);

    assert!(report.success, "{:?}", report.error);
    let rejected_dates: Vec<_> = observer
        .events()
        .iter()
        .filter_map(|event| match event {
            BacktestEvent::BuyRejected { date, .. } => Some(*date),
            _ => None,
        })
        .collect();
    assert_eq!(rejected_dates, vec![create_date(50)]);
    assert_eq!(fills(&observer), vec![SignalAction::Buy]);

    let open = report.open_position.expect("cheaper breakout filled");
    assert_eq!(open.entry_index, 101);
    assert_eq!(open.entry_price, 48.0);
    assert_eq!(open.quantity, 1);
    assert!((report.end_value.unwrap() - (50.0 - 48.0 * 0.001)).abs() < 1e-9);
}

#[test]
fn empty_series_fails_without_start_value() {
    ensure_test_env();
    let series = BarSeries::new("NONE", Vec::new()).unwrap();
    let report = default_engine().run(&series, &mut NullObserver);
    assert!(!report.success);
    assert_eq!(report.start_value, None);
    assert_eq!(report.end_value, None);
    assert!(report.metrics.is_none());
}

#[test]
fn identical_inputs_produce_identical_reports() {
    ensure_test_env();
    let mut bars = with_breakout(2_000);
    bars.push(bar(51, 110.0, 114.0, 109.0, 113.0, 1_000));
    bars.push(bar(52, 100.0, 101.0, 85.0, 86.0, 1_000));
    let series = BarSeries::new("DET", bars).unwrap();
    let engine = default_engine();

    let (first, second) = std::thread::scope(|scope| {
        let a = scope.spawn(|| engine.run(&series, &mut NullObserver));
        let b = scope.spawn(|| engine.run(&series, &mut NullObserver));
        (a.join().unwrap(), b.join().unwrap())
    });
    assert_eq!(first, second);
    assert_eq!(first, engine.run(&series, &mut NullObserver));

    let json = serde_json::to_value(&first).unwrap();
    assert_eq!(json["success"], true);
    assert!(json["metrics"]["winRate"].is_number());
    assert!(json["metrics"]["sqn"].is_null());
    assert!(json["equityCurve"].is_array());
}
