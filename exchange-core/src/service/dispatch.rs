// =================================================================
// service/dispatch.rs - Event dispatch
// =================================================================

use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};

use exchange_common::data::{OrderBookResponse, Trade, TradesResponse};
use exchange_common::ExchangeError;
use parking_lot::RwLock;
use tracing::{debug, error, trace, warn};

use super::types::{ErrorCallback, OrderbookCallback, SignalCallback, TradesCallback};
use crate::exchange::EventHandler;

/// Routes inbound events to the callbacks registered for them.
///
/// Orderbook and trade callbacks are keyed by market; error, ping and
/// disconnect callbacks are global. Each dispatch works on a snapshot of the
/// registered callbacks taken under a read lock, so registration never waits
/// on a running callback and a callback may register more callbacks.
#[derive(Default)]
pub struct EventDispatcher {
    orderbook: RwLock<HashMap<String, Vec<OrderbookCallback>>>,
    trades: RwLock<HashMap<String, Vec<TradesCallback>>>,
    errors: RwLock<Vec<ErrorCallback>>,
    pings: RwLock<Vec<SignalCallback>>,
    disconnects: RwLock<Vec<SignalCallback>>,
    closed: AtomicBool,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registration after `close` is dropped. The flag is read under the
    /// list's write lock so a concurrent `close` always clears what lands.
    pub fn register_orderbook(&self, market: &str, callback: OrderbookCallback) {
        let mut orderbook = self.orderbook.write();
        if self.is_closed() {
            trace!("Dispatcher closed, ignoring orderbook callback for {}", market);
            return;
        }
        orderbook.entry(market.to_string()).or_default().push(callback);
        debug!("Registered orderbook callback for {}", market);
    }

    pub fn register_trades(&self, market: &str, callback: TradesCallback) {
        let mut trades = self.trades.write();
        if self.is_closed() {
            trace!("Dispatcher closed, ignoring trades callback for {}", market);
            return;
        }
        trades.entry(market.to_string()).or_default().push(callback);
        debug!("Registered trades callback for {}", market);
    }

    pub fn register_error(&self, callback: ErrorCallback) {
        let mut errors = self.errors.write();
        if !self.is_closed() {
            errors.push(callback);
        }
    }

    pub fn register_ping(&self, callback: SignalCallback) {
        let mut pings = self.pings.write();
        if !self.is_closed() {
            pings.push(callback);
        }
    }

    pub fn register_disconnect(&self, callback: SignalCallback) {
        let mut disconnects = self.disconnects.write();
        if !self.is_closed() {
            disconnects.push(callback);
        }
    }

    pub fn orderbook_subscribers(&self, market: &str) -> usize {
        self.orderbook.read().get(market).map_or(0, Vec::len)
    }

    pub fn trades_subscribers(&self, market: &str) -> usize {
        self.trades.read().get(market).map_or(0, Vec::len)
    }

    /// Stop all further delivery. Registered callbacks are dropped.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("Closing event dispatcher");
            self.orderbook.write().clear();
            self.trades.write().clear();
            self.errors.write().clear();
            self.pings.write().clear();
            self.disconnects.write().clear();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn dispatch_orderbook(&self, orderbook: &OrderBookResponse) {
        if self.is_closed() {
            return;
        }
        let callbacks = match self.orderbook.read().get(&orderbook.market) {
            Some(callbacks) => callbacks.clone(),
            None => {
                trace!("No orderbook subscribers for {}", orderbook.market);
                return;
            }
        };

        for callback in callbacks {
            self.guarded("orderbook", || callback(orderbook));
        }
    }

    pub fn dispatch_trades(&self, trades: &TradesResponse) {
        if self.is_closed() {
            return;
        }
        let callbacks = match self.trades.read().get(&trades.market) {
            Some(callbacks) => callbacks.clone(),
            None => {
                trace!("No trades subscribers for {}", trades.market);
                return;
            }
        };

        for callback in callbacks {
            self.guarded("trades", || callback(trades));
        }
    }

    pub fn dispatch_error(&self, err: &ExchangeError) {
        if self.is_closed() {
            return;
        }
        let callbacks = self.errors.read().clone();
        if callbacks.is_empty() {
            warn!("Unhandled exchange error: {}", err);
            return;
        }

        for callback in callbacks {
            // a failing error handler has nowhere left to report to
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback(err))) {
                error!("Error callback panicked: {}", panic_message(payload.as_ref()));
            }
        }
    }

    pub fn dispatch_ping(&self) {
        if self.is_closed() {
            return;
        }
        let callbacks = self.pings.read().clone();
        for callback in callbacks {
            self.guarded("ping", || callback());
        }
    }

    pub fn dispatch_disconnect(&self) {
        if self.is_closed() {
            return;
        }
        let callbacks = self.disconnects.read().clone();
        for callback in callbacks {
            self.guarded("disconnect", || callback());
        }
    }

    /// Run one callback; a panic is reported on the error channel and the
    /// remaining callbacks still run.
    fn guarded(&self, channel: &str, f: impl FnOnce()) {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(f)) {
            let message = format!(
                "{} callback panicked: {}",
                channel,
                panic_message(payload.as_ref())
            );
            warn!("{}", message);
            self.dispatch_error(&ExchangeError::Callback(message));
        }
    }
}

impl EventHandler for EventDispatcher {
    fn on_orderbook(&self, orderbook: OrderBookResponse) {
        self.dispatch_orderbook(&orderbook);
    }

    fn on_trades(&self, market: &str, trades: Vec<Trade>) {
        self.dispatch_trades(&TradesResponse {
            market: market.to_string(),
            trades,
        });
    }

    fn on_ping(&self) {
        self.dispatch_ping();
    }

    fn on_disconnect(&self) {
        self.dispatch_disconnect();
    }

    fn on_error(&self, error: ExchangeError) {
        self.dispatch_error(&error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn counter() -> (Arc<AtomicUsize>, OrderbookCallback) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let callback: OrderbookCallback = Arc::new(move |_: &OrderBookResponse| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (count, callback)
    }

    #[test]
    fn test_dispatch_without_subscribers_is_noop() {
        let dispatcher = EventDispatcher::new();
        dispatcher.dispatch_orderbook(&OrderBookResponse::new("btc_usdc"));
        dispatcher.dispatch_trades(&TradesResponse {
            market: "btc_usdc".into(),
            trades: vec![],
        });
        dispatcher.dispatch_ping();
        dispatcher.dispatch_error(&ExchangeError::Transport("nobody listens".into()));
    }

    #[test]
    fn test_callbacks_run_once_in_registration_order() {
        let dispatcher = EventDispatcher::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let order = Arc::clone(&order);
            dispatcher.register_orderbook("btc_usdc", Arc::new(move |_: &OrderBookResponse| order.lock().push(i)));
        }

        dispatcher.dispatch_orderbook(&OrderBookResponse::new("btc_usdc"));
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_routing_is_per_market() {
        let dispatcher = EventDispatcher::new();
        let (count, callback) = counter();
        dispatcher.register_orderbook("btc_usdc", callback);

        dispatcher.dispatch_orderbook(&OrderBookResponse::new("eth_btc"));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        dispatcher.dispatch_orderbook(&OrderBookResponse::new("btc_usdc"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_late_registration_sees_no_past_events() {
        let dispatcher = EventDispatcher::new();
        dispatcher.dispatch_orderbook(&OrderBookResponse::new("btc_usdc"));

        let (count, callback) = counter();
        dispatcher.register_orderbook("btc_usdc", callback);
        assert_eq!(count.load(Ordering::SeqCst), 0);

        dispatcher.dispatch_orderbook(&OrderBookResponse::new("btc_usdc"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_trades_through_event_handler() {
        let dispatcher = EventDispatcher::new();
        let markets = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&markets);
        dispatcher.register_trades(
            "eth_btc",
            Arc::new(move |resp: &TradesResponse| seen.lock().push(resp.market.clone())),
        );

        dispatcher.on_trades("eth_btc", vec![]);
        dispatcher.on_trades("btc_usdc", vec![]);
        assert_eq!(*markets.lock(), vec!["eth_btc".to_string()]);
    }

    #[test]
    fn test_panicking_callback_is_isolated() {
        let dispatcher = EventDispatcher::new();
        let errors = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&errors);
        dispatcher.register_error(Arc::new(move |e: &ExchangeError| seen.lock().push(e.clone())));

        dispatcher.register_orderbook("btc_usdc", Arc::new(|_: &OrderBookResponse| panic!("boom")));
        let (count, callback) = counter();
        dispatcher.register_orderbook("btc_usdc", callback);

        dispatcher.dispatch_orderbook(&OrderBookResponse::new("btc_usdc"));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        let errors = errors.lock();
        assert_eq!(errors.len(), 1);
        assert!(matches!(&errors[0], ExchangeError::Callback(msg) if msg.contains("boom")));
    }

    #[test]
    fn test_panicking_error_callback_is_contained() {
        let dispatcher = EventDispatcher::new();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        dispatcher.register_error(Arc::new(|_: &ExchangeError| panic!("error handler broke")));
        dispatcher.register_error(Arc::new(move |_: &ExchangeError| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        dispatcher.on_error(ExchangeError::Transport("x".into()));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_may_register_more_callbacks() {
        let dispatcher = Arc::new(EventDispatcher::new());
        let inner = Arc::clone(&dispatcher);
        dispatcher.register_orderbook(
            "btc_usdc",
            Arc::new(move |_: &OrderBookResponse| {
                inner.register_orderbook("btc_usdc", Arc::new(|_: &OrderBookResponse| {}))
            }),
        );

        dispatcher.dispatch_orderbook(&OrderBookResponse::new("btc_usdc"));
        assert_eq!(dispatcher.orderbook_subscribers("btc_usdc"), 2);
    }

    #[test]
    fn test_signals() {
        let dispatcher = EventDispatcher::new();
        let pings = Arc::new(AtomicUsize::new(0));
        let disconnects = Arc::new(AtomicUsize::new(0));
        let p = Arc::clone(&pings);
        let d = Arc::clone(&disconnects);
        dispatcher.register_ping(Arc::new(move || {
            p.fetch_add(1, Ordering::SeqCst);
        }));
        dispatcher.register_disconnect(Arc::new(move || {
            d.fetch_add(1, Ordering::SeqCst);
        }));

        dispatcher.on_ping();
        dispatcher.on_ping();
        dispatcher.on_disconnect();
        assert_eq!(pings.load(Ordering::SeqCst), 2);
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_close_stops_delivery() {
        let dispatcher = EventDispatcher::new();
        let (count, callback) = counter();
        dispatcher.register_orderbook("btc_usdc", callback);

        dispatcher.close();
        dispatcher.close();
        dispatcher.dispatch_orderbook(&OrderBookResponse::new("btc_usdc"));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(dispatcher.is_closed());
    }

    #[test]
    fn test_registration_after_close_is_dropped() {
        let dispatcher = EventDispatcher::new();
        dispatcher.close();

        let (_, callback) = counter();
        dispatcher.register_orderbook("btc_usdc", callback);
        dispatcher.register_trades("btc_usdc", Arc::new(|_: &TradesResponse| {}));
        dispatcher.register_error(Arc::new(|_: &ExchangeError| {}));
        dispatcher.register_ping(Arc::new(|| {}));
        dispatcher.register_disconnect(Arc::new(|| {}));

        assert_eq!(dispatcher.orderbook_subscribers("btc_usdc"), 0);
        assert_eq!(dispatcher.trades_subscribers("btc_usdc"), 0);
        assert!(dispatcher.errors.read().is_empty());
        assert!(dispatcher.pings.read().is_empty());
        assert!(dispatcher.disconnects.read().is_empty());
    }

    #[test]
    fn test_concurrent_registration_and_dispatch() {
        let dispatcher = Arc::new(EventDispatcher::new());
        let (count, callback) = counter();
        dispatcher.register_orderbook("btc_usdc", callback);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let dispatcher = Arc::clone(&dispatcher);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        dispatcher.register_orderbook("eth_btc", Arc::new(|_: &OrderBookResponse| {}));
                        dispatcher.dispatch_orderbook(&OrderBookResponse::new("btc_usdc"));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(count.load(Ordering::SeqCst), 400);
        assert_eq!(dispatcher.orderbook_subscribers("eth_btc"), 400);
    }
}
