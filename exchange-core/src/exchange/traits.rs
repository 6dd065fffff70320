// exchange/traits.rs

use std::sync::Arc;

use async_trait::async_trait;
use exchange_common::data::{
    Balance, CancelAllOrdersRequest, CancelOrderRequest, Candle, GetHistoricRatesRequest,
    GetHistoricTradesRequest, GetOrderHistoryRequest, GetOrderRequest, GetPriceTickerRequest,
    LimitRequest, MarketPair, MarketRequest, Order, OrderBookRequest, OrderBookResponse,
    OrderCanceled, Paginator, Side, Subscription, Ticker, Trade, TradeHistoryRequest,
};
use exchange_common::{ExchangeConfig, ExchangeError, Venue};

/// Receiver for inbound live events. Transports call these from their own
/// delivery task, so implementations must not block.
pub trait EventHandler: Send + Sync {
    fn on_orderbook(&self, orderbook: OrderBookResponse);

    /// A batch of trades for `market`, keyed by the caller's market string
    fn on_trades(&self, market: &str, trades: Vec<Trade>);

    fn on_ping(&self);

    fn on_disconnect(&self);

    fn on_error(&self, error: ExchangeError);
}

/// Main exchange interface that all venue transports must follow
#[async_trait]
pub trait Transport: Send + Sync {
    fn venue(&self) -> Venue;

    async fn place_limit_order(&self, side: Side, req: &LimitRequest)
        -> Result<Order, ExchangeError>;

    async fn place_market_order(
        &self,
        side: Side,
        req: &MarketRequest,
    ) -> Result<Order, ExchangeError>;

    async fn cancel_order(&self, req: &CancelOrderRequest) -> Result<OrderCanceled, ExchangeError>;

    async fn cancel_all_orders(
        &self,
        req: &CancelAllOrdersRequest,
    ) -> Result<Vec<OrderCanceled>, ExchangeError>;

    async fn get_order(&self, req: &GetOrderRequest) -> Result<Order, ExchangeError>;

    async fn get_order_history(
        &self,
        req: &GetOrderHistoryRequest,
    ) -> Result<Vec<Order>, ExchangeError>;

    async fn get_all_open_orders(&self) -> Result<Vec<Order>, ExchangeError>;

    async fn get_trade_history(&self, req: &TradeHistoryRequest)
        -> Result<Vec<Trade>, ExchangeError>;

    async fn get_account_balances(
        &self,
        paginator: Option<&Paginator>,
    ) -> Result<Vec<Balance>, ExchangeError>;

    async fn order_book(&self, req: &OrderBookRequest) -> Result<OrderBookResponse, ExchangeError>;

    async fn get_price_ticker(&self, req: &GetPriceTickerRequest) -> Result<Ticker, ExchangeError>;

    async fn get_historic_rates(
        &self,
        req: &GetHistoricRatesRequest,
    ) -> Result<Vec<Candle>, ExchangeError>;

    async fn get_historic_trades(
        &self,
        req: &GetHistoricTradesRequest,
    ) -> Result<Vec<Trade>, ExchangeError>;

    async fn retrieve_pairs(&self) -> Result<Vec<MarketPair>, ExchangeError>;

    /// Ask the venue for a live channel. Events for it arrive on the
    /// `EventHandler` given at connect time.
    async fn subscribe(&self, subscription: Subscription) -> Result<(), ExchangeError>;

    /// Tear down any live connection. Must be safe to call more than once.
    async fn disconnect(&self);
}

/// Builds a transport for a configuration. One connector can build many
/// transports, which is what lets a client be rebuilt from scratch.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        config: &ExchangeConfig,
        events: Arc<dyn EventHandler>,
    ) -> Result<Box<dyn Transport>, ExchangeError>;
}
