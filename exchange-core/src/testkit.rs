//! In-memory connector and transport for exercising the client without a
//! venue. Every transport built by one `FakeConnector` shares its script and
//! counters, so behaviour carries across client rebuilds.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use exchange_common::data::{
    Balance, CancelAllOrdersRequest, CancelOrderRequest, Candle, GetHistoricRatesRequest,
    GetHistoricTradesRequest, GetOrderHistoryRequest, GetOrderRequest, GetPriceTickerRequest,
    LimitRequest, MarketPair, MarketRequest, Order, OrderBookRequest, OrderBookResponse,
    OrderCanceled, OrderStatus, OrderType, Paginator, Side, Subscription, Ticker, Trade,
    TradeHistoryRequest,
};
use exchange_common::{ExchangeConfig, ExchangeError, Venue};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::exchange::{Connector, EventHandler, Transport};

#[derive(Default)]
struct FakeState {
    connects: AtomicUsize,
    calls: AtomicUsize,
    disconnects: AtomicUsize,
    failures: Mutex<VecDeque<ExchangeError>>,
    delays: Mutex<VecDeque<Duration>>,
    connect_failures: Mutex<VecDeque<ExchangeError>>,
    subscribe_failures: Mutex<VecDeque<ExchangeError>>,
    subscriptions: Mutex<Vec<Subscription>>,
    events: Mutex<Option<Arc<dyn EventHandler>>>,
    echo: AtomicBool,
}

/// Scriptable `Connector`; clones share state
#[derive(Clone, Default)]
pub struct FakeConnector {
    state: Arc<FakeState>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next request/response call fails with `error`. Queued failures are
    /// consumed in order, one per call.
    pub fn fail_next(&self, error: ExchangeError) {
        self.state.failures.lock().push_back(error);
    }

    /// The next request/response call takes `delay` before answering. A
    /// transport disconnected in the meantime answers with a connection error.
    pub fn slow_next(&self, delay: Duration) {
        self.state.delays.lock().push_back(delay);
    }

    pub fn fail_next_connect(&self, error: ExchangeError) {
        self.state.connect_failures.lock().push_back(error);
    }

    pub fn fail_next_subscribe(&self, error: ExchangeError) {
        self.state.subscribe_failures.lock().push_back(error);
    }

    /// Make `subscribe` emit one empty event for the subscribed market before
    /// returning, the way a venue answers with an immediate snapshot.
    pub fn echo_subscriptions(&self, echo: bool) {
        self.state.echo.store(echo, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.state.disconnects.load(Ordering::SeqCst)
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.state.subscriptions.lock().clone()
    }

    fn events(&self) -> Option<Arc<dyn EventHandler>> {
        self.state.events.lock().clone()
    }

    /// Deliver events as the most recently built transport would
    pub fn emit_orderbook(&self, orderbook: OrderBookResponse) {
        if let Some(events) = self.events() {
            events.on_orderbook(orderbook);
        }
    }

    pub fn emit_trades(&self, market: &str, trades: Vec<Trade>) {
        if let Some(events) = self.events() {
            events.on_trades(market, trades);
        }
    }

    pub fn emit_error(&self, error: ExchangeError) {
        if let Some(events) = self.events() {
            events.on_error(error);
        }
    }

    pub fn emit_ping(&self) {
        if let Some(events) = self.events() {
            events.on_ping();
        }
    }

    pub fn emit_disconnect(&self) {
        if let Some(events) = self.events() {
            events.on_disconnect();
        }
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        config: &ExchangeConfig,
        events: Arc<dyn EventHandler>,
    ) -> Result<Box<dyn Transport>, ExchangeError> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.state.connect_failures.lock().pop_front() {
            return Err(error);
        }

        *self.state.events.lock() = Some(Arc::clone(&events));
        Ok(Box::new(FakeTransport {
            venue: config.venue(),
            state: Arc::clone(&self.state),
            events,
            closed: AtomicBool::new(false),
        }))
    }
}

/// Transport answering from the connector's script
pub struct FakeTransport {
    venue: Venue,
    state: Arc<FakeState>,
    events: Arc<dyn EventHandler>,
    closed: AtomicBool,
}

impl FakeTransport {
    /// Count the call, wait like real I/O would, then pop the script
    async fn answer(&self) -> Result<(), ExchangeError> {
        self.state.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.state.delays.lock().pop_front();
        match delay {
            Some(delay) => tokio::time::sleep(delay).await,
            None => tokio::task::yield_now().await,
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(ExchangeError::Connection("transport closed".to_string()));
        }
        match self.state.failures.lock().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn order(&self, side: Side, market: &str, size: Decimal, price: Option<Decimal>) -> Order {
        Order {
            id: Uuid::new_v4().to_string(),
            market: market.to_string(),
            client_order_id: None,
            created_at: Utc::now(),
            order_type: if price.is_some() {
                OrderType::Limit
            } else {
                OrderType::Market
            },
            side,
            status: OrderStatus::New,
            size,
            price,
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    fn venue(&self) -> Venue {
        self.venue
    }

    async fn place_limit_order(&self, side: Side, req: &LimitRequest) -> Result<Order, ExchangeError> {
        self.answer().await?;
        let mut order = self.order(side, &req.market, req.size, Some(req.price));
        order.client_order_id = req.client_order_id.clone();
        Ok(order)
    }

    async fn place_market_order(&self, side: Side, req: &MarketRequest) -> Result<Order, ExchangeError> {
        self.answer().await?;
        Ok(self.order(side, &req.market, req.size, None))
    }

    async fn cancel_order(&self, req: &CancelOrderRequest) -> Result<OrderCanceled, ExchangeError> {
        self.answer().await?;
        Ok(OrderCanceled { id: req.id.clone() })
    }

    async fn cancel_all_orders(
        &self,
        _req: &CancelAllOrdersRequest,
    ) -> Result<Vec<OrderCanceled>, ExchangeError> {
        self.answer().await?;
        Ok(Vec::new())
    }

    async fn get_order(&self, req: &GetOrderRequest) -> Result<Order, ExchangeError> {
        self.answer().await?;
        let market = req.market.clone().unwrap_or_default();
        let mut order = self.order(Side::Buy, &market, Decimal::ONE, Some(Decimal::ONE));
        order.id = req.id.clone();
        Ok(order)
    }

    async fn get_order_history(&self, _req: &GetOrderHistoryRequest) -> Result<Vec<Order>, ExchangeError> {
        self.answer().await?;
        Ok(Vec::new())
    }

    async fn get_all_open_orders(&self) -> Result<Vec<Order>, ExchangeError> {
        self.answer().await?;
        Ok(Vec::new())
    }

    async fn get_trade_history(&self, _req: &TradeHistoryRequest) -> Result<Vec<Trade>, ExchangeError> {
        self.answer().await?;
        Ok(Vec::new())
    }

    async fn get_account_balances(&self, _paginator: Option<&Paginator>) -> Result<Vec<Balance>, ExchangeError> {
        self.answer().await?;
        Ok(Vec::new())
    }

    async fn order_book(&self, req: &OrderBookRequest) -> Result<OrderBookResponse, ExchangeError> {
        self.answer().await?;
        Ok(OrderBookResponse::new(req.market.clone()))
    }

    async fn get_price_ticker(&self, _req: &GetPriceTickerRequest) -> Result<Ticker, ExchangeError> {
        self.answer().await?;
        Ok(Ticker { price: None })
    }

    async fn get_historic_rates(&self, _req: &GetHistoricRatesRequest) -> Result<Vec<Candle>, ExchangeError> {
        self.answer().await?;
        Ok(Vec::new())
    }

    async fn get_historic_trades(&self, _req: &GetHistoricTradesRequest) -> Result<Vec<Trade>, ExchangeError> {
        self.answer().await?;
        Ok(Vec::new())
    }

    async fn retrieve_pairs(&self) -> Result<Vec<MarketPair>, ExchangeError> {
        self.answer().await?;
        Ok(Vec::new())
    }

    async fn subscribe(&self, subscription: Subscription) -> Result<(), ExchangeError> {
        if let Some(error) = self.state.subscribe_failures.lock().pop_front() {
            return Err(error);
        }
        self.state.subscriptions.lock().push(subscription.clone());

        if self.state.echo.load(Ordering::SeqCst) {
            match &subscription {
                Subscription::OrderBook { market, .. } => {
                    self.events.on_orderbook(OrderBookResponse::new(market.clone()))
                }
                Subscription::Trades { market } => self.events.on_trades(market, Vec::new()),
            }
        }
        Ok(())
    }

    async fn disconnect(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.state.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}
