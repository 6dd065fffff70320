// =================================================================
// service/client.rs - Exchange client
// =================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use exchange_common::data::{
    Balance, CancelAllOrdersRequest, CancelOrderRequest, Candle, GetHistoricRatesRequest,
    GetHistoricTradesRequest, GetOrderHistoryRequest, GetOrderRequest, GetPriceTickerRequest,
    LimitRequest, MarketPair, MarketRequest, Order, OrderBookRequest, OrderBookResponse,
    OrderCanceled, Paginator, Side, Subscription, Ticker, Trade, TradeHistoryRequest,
    TradesResponse,
};
use exchange_common::{ExchangeConfig, ExchangeError, Venue};
use tracing::{debug, info, warn};

use super::dispatch::EventDispatcher;
use crate::exchange::{Connector, DefaultConnector, Transport};

/// One venue behind one interface: request/response calls go straight to the
/// transport, live data fans out through the client's own dispatcher.
pub struct ExchangeClient {
    venue: Venue,
    transport: Box<dyn Transport>,
    dispatcher: Arc<EventDispatcher>,
    connected: AtomicBool,
}

impl ExchangeClient {
    /// Connect with the transports bundled in this crate
    pub async fn new(config: ExchangeConfig) -> Result<Self, ExchangeError> {
        Self::with_connector(config, &DefaultConnector).await
    }

    pub async fn with_connector(
        config: ExchangeConfig,
        connector: &dyn Connector,
    ) -> Result<Self, ExchangeError> {
        config.validate()?;

        let dispatcher = Arc::new(EventDispatcher::new());
        let transport = connector.connect(&config, dispatcher.clone()).await?;
        info!("Exchange client ready for {}", config.venue());

        Ok(Self {
            venue: config.venue(),
            transport,
            dispatcher,
            connected: AtomicBool::new(true),
        })
    }

    pub fn venue(&self) -> Venue {
        self.venue
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// The dispatcher behind this client's subscriptions
    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    fn ensure_connected(&self) -> Result<(), ExchangeError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(ExchangeError::Connection(format!(
                "{} client is disconnected",
                self.venue
            )))
        }
    }

    async fn place_limit(&self, side: Side, req: &LimitRequest) -> Result<Order, ExchangeError> {
        self.ensure_connected()?;
        req.validate()?;
        debug!("Limit {} {} {} @ {}", side, req.size, req.market, req.price);
        self.transport.place_limit_order(side, req).await
    }

    async fn place_market(&self, side: Side, req: &MarketRequest) -> Result<Order, ExchangeError> {
        self.ensure_connected()?;
        req.validate()?;
        debug!("Market {} {} {}", side, req.size, req.market);
        self.transport.place_market_order(side, req).await
    }

    pub async fn limit_buy(&self, req: &LimitRequest) -> Result<Order, ExchangeError> {
        self.place_limit(Side::Buy, req).await
    }

    pub async fn limit_sell(&self, req: &LimitRequest) -> Result<Order, ExchangeError> {
        self.place_limit(Side::Sell, req).await
    }

    pub async fn market_buy(&self, req: &MarketRequest) -> Result<Order, ExchangeError> {
        self.place_market(Side::Buy, req).await
    }

    pub async fn market_sell(&self, req: &MarketRequest) -> Result<Order, ExchangeError> {
        self.place_market(Side::Sell, req).await
    }

    pub async fn cancel_order(&self, req: &CancelOrderRequest) -> Result<OrderCanceled, ExchangeError> {
        self.ensure_connected()?;
        self.transport.cancel_order(req).await
    }

    pub async fn cancel_all_orders(
        &self,
        req: &CancelAllOrdersRequest,
    ) -> Result<Vec<OrderCanceled>, ExchangeError> {
        self.ensure_connected()?;
        self.transport.cancel_all_orders(req).await
    }

    pub async fn get_order(&self, req: &GetOrderRequest) -> Result<Order, ExchangeError> {
        self.ensure_connected()?;
        self.transport.get_order(req).await
    }

    pub async fn get_order_history(
        &self,
        req: &GetOrderHistoryRequest,
    ) -> Result<Vec<Order>, ExchangeError> {
        self.ensure_connected()?;
        self.transport.get_order_history(req).await
    }

    pub async fn get_all_open_orders(&self) -> Result<Vec<Order>, ExchangeError> {
        self.ensure_connected()?;
        self.transport.get_all_open_orders().await
    }

    pub async fn get_trade_history(&self, req: &TradeHistoryRequest) -> Result<Vec<Trade>, ExchangeError> {
        self.ensure_connected()?;
        self.transport.get_trade_history(req).await
    }

    pub async fn get_account_balances(
        &self,
        paginator: Option<&Paginator>,
    ) -> Result<Vec<Balance>, ExchangeError> {
        self.ensure_connected()?;
        self.transport.get_account_balances(paginator).await
    }

    pub async fn order_book(&self, req: &OrderBookRequest) -> Result<OrderBookResponse, ExchangeError> {
        self.ensure_connected()?;
        self.transport.order_book(req).await
    }

    pub async fn get_price_ticker(&self, req: &GetPriceTickerRequest) -> Result<Ticker, ExchangeError> {
        self.ensure_connected()?;
        self.transport.get_price_ticker(req).await
    }

    pub async fn get_historic_rates(
        &self,
        req: &GetHistoricRatesRequest,
    ) -> Result<Vec<Candle>, ExchangeError> {
        self.ensure_connected()?;
        self.transport.get_historic_rates(req).await
    }

    pub async fn get_historic_trades(
        &self,
        req: &GetHistoricTradesRequest,
    ) -> Result<Vec<Trade>, ExchangeError> {
        self.ensure_connected()?;
        self.transport.get_historic_trades(req).await
    }

    pub async fn retrieve_pairs(&self) -> Result<Vec<MarketPair>, ExchangeError> {
        self.ensure_connected()?;
        self.transport.retrieve_pairs().await
    }

    /// Receive orderbook snapshots and deltas for `market`
    pub async fn subscribe_orderbook<F>(&self, market: &str, callback: F)
    where
        F: Fn(&OrderBookResponse) + Send + Sync + 'static,
    {
        self.dispatcher.register_orderbook(market, Arc::new(callback));
        self.request(Subscription::orderbook(market)).await;
    }

    /// Like `subscribe_orderbook`, limited to the top `depth` levels where
    /// the venue supports it
    pub async fn subscribe_orderbook_depth<F>(&self, market: &str, depth: usize, callback: F)
    where
        F: Fn(&OrderBookResponse) + Send + Sync + 'static,
    {
        self.dispatcher.register_orderbook(market, Arc::new(callback));
        self.request(Subscription::orderbook_depth(market, depth)).await;
    }

    pub async fn subscribe_trades<F>(&self, market: &str, callback: F)
    where
        F: Fn(&TradesResponse) + Send + Sync + 'static,
    {
        self.dispatcher.register_trades(market, Arc::new(callback));
        self.request(Subscription::trades(market)).await;
    }

    pub fn subscribe_error<F>(&self, callback: F)
    where
        F: Fn(&ExchangeError) + Send + Sync + 'static,
    {
        self.dispatcher.register_error(Arc::new(callback));
    }

    pub fn subscribe_ping<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.dispatcher.register_ping(Arc::new(callback));
    }

    pub fn subscribe_disconnect<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.dispatcher.register_disconnect(Arc::new(callback));
    }

    /// Callbacks are registered before this runs, so nothing the venue sends
    /// in answer can be missed. Failures go to the error channel.
    async fn request(&self, subscription: Subscription) {
        let result = match self.ensure_connected() {
            Ok(()) => self.transport.subscribe(subscription.clone()).await,
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            warn!("Subscription {:?} failed: {}", subscription, e);
            self.dispatcher.dispatch_error(&e);
        }
    }

    /// Tear down the transport and stop event delivery. Later calls fail with
    /// a connection error. Safe to call more than once.
    pub async fn disconnect(&self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }

        info!("Disconnecting {} client", self.venue);
        self.transport.disconnect().await;
        self.dispatcher.dispatch_disconnect();
        self.dispatcher.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::FakeConnector;
    use exchange_common::{BinanceConfig, Environment, NashConfig, NashCredentials};
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn nash_config() -> ExchangeConfig {
        ExchangeConfig::from(NashConfig::new(
            Some(NashCredentials::new("secret", "session")),
            Environment::Sandbox,
        ))
    }

    async fn fake_client() -> (ExchangeClient, FakeConnector) {
        let connector = FakeConnector::new();
        let client = ExchangeClient::with_connector(nash_config(), &connector)
            .await
            .unwrap();
        (client, connector)
    }

    #[tokio::test]
    async fn test_invalid_config_never_reaches_connector() {
        let connector = FakeConnector::new();
        let config = ExchangeConfig::from(NashConfig::new(
            Some(NashCredentials::new("", "")),
            Environment::Sandbox,
        ));

        let result = ExchangeClient::with_connector(config, &connector).await;
        assert!(matches!(result, Err(ExchangeError::Configuration(_))));
        assert_eq!(connector.connects(), 0);
    }

    #[tokio::test]
    async fn test_connect_failure_propagates() {
        let connector = FakeConnector::new();
        connector.fail_next_connect(ExchangeError::Connection("refused".into()));

        let result = ExchangeClient::with_connector(nash_config(), &connector).await;
        assert!(matches!(result, Err(ExchangeError::Connection(_))));
    }

    #[tokio::test]
    async fn test_default_connector_rejects_nash() {
        let result = ExchangeClient::new(nash_config()).await;
        assert!(matches!(result, Err(ExchangeError::Unsupported(_))));
    }

    #[tokio::test]
    async fn test_buy_sell_split() {
        let (client, _) = fake_client().await;
        let req = LimitRequest::new(dec!(100), dec!(2), "btc_usdc");

        assert_eq!(client.limit_buy(&req).await.unwrap().side, Side::Buy);
        assert_eq!(client.limit_sell(&req).await.unwrap().side, Side::Sell);

        let req = MarketRequest::new(dec!(1), "btc_usdc");
        let order = client.market_sell(&req).await.unwrap();
        assert_eq!(order.side, Side::Sell);
        assert_eq!(order.price, None);
    }

    #[tokio::test]
    async fn test_local_validation_happens_before_transport() {
        let (client, connector) = fake_client().await;
        let req = LimitRequest::new(dec!(100), dec!(2), "btc_usdc")
            .with_time_in_force(exchange_common::data::TimeInForce::GoodTillTime(Duration::ZERO));

        let result = client.limit_buy(&req).await;
        assert!(matches!(result, Err(ExchangeError::InvalidRequest(_))));
        assert_eq!(connector.calls(), 0);
    }

    #[tokio::test]
    async fn test_venue_errors_pass_through() {
        let (client, connector) = fake_client().await;
        connector.fail_next(ExchangeError::Application("insufficient balance".into()));

        let result = client.market_buy(&MarketRequest::new(dec!(1), "btc_usdc")).await;
        assert_eq!(
            result.unwrap_err(),
            ExchangeError::Application("insufficient balance".into())
        );
    }

    #[tokio::test]
    async fn test_subscription_routes_by_market() {
        let (client, connector) = fake_client().await;
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&hits);

        client
            .subscribe_orderbook("btc_usdc", move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        assert_eq!(connector.subscriptions(), vec![Subscription::orderbook("btc_usdc")]);

        connector.emit_orderbook(OrderBookResponse::new("btc_usdc"));
        connector.emit_orderbook(OrderBookResponse::new("eth_btc"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_immediate_answer_is_not_lost() {
        let (client, connector) = fake_client().await;
        connector.echo_subscriptions(true);
        let trades = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&trades);

        client
            .subscribe_trades("eth_btc", move |resp| seen.lock().push(resp.market.clone()))
            .await;
        assert_eq!(*trades.lock(), vec!["eth_btc".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_events_racing_the_subscription_are_delivered() {
        let (client, connector) = fake_client().await;
        connector.echo_subscriptions(true);

        let stop = Arc::new(AtomicBool::new(false));
        let emitter = connector.clone();
        let stopped = Arc::clone(&stop);
        let racer = tokio::spawn(async move {
            while !stopped.load(Ordering::SeqCst) {
                emitter.emit_orderbook(OrderBookResponse::new("btc_usdc"));
                tokio::task::yield_now().await;
            }
        });

        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        client
            .subscribe_orderbook("btc_usdc", move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            })
            .await;

        // the venue's immediate answer landed before subscribe returned
        let registered = count.load(Ordering::SeqCst);
        assert!(registered >= 1);

        let delivered = tokio::time::timeout(Duration::from_secs(5), async {
            while count.load(Ordering::SeqCst) == registered {
                tokio::task::yield_now().await;
            }
        })
        .await;
        stop.store(true, Ordering::SeqCst);
        racer.await.unwrap();

        assert!(delivered.is_ok(), "events from the other task never arrived");
    }

    #[tokio::test]
    async fn test_depth_subscription_is_forwarded() {
        let (client, connector) = fake_client().await;
        client.subscribe_orderbook_depth("btc_usdc", 10, |_| {}).await;
        assert_eq!(
            connector.subscriptions(),
            vec![Subscription::orderbook_depth("btc_usdc", 10)]
        );
    }

    #[tokio::test]
    async fn test_subscribe_failure_goes_to_error_channel() {
        let (client, connector) = fake_client().await;
        let errors = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&errors);
        client.subscribe_error(move |e| seen.lock().push(e.clone()));

        connector.fail_next_subscribe(ExchangeError::Transport("socket closed".into()));
        client.subscribe_trades("btc_usdc", |_| {}).await;

        assert_eq!(
            *errors.lock(),
            vec![ExchangeError::Transport("socket closed".into())]
        );
    }

    #[tokio::test]
    async fn test_pings_reach_global_callbacks() {
        let (client, connector) = fake_client().await;
        let pings = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&pings);
        client.subscribe_ping(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        connector.emit_ping();
        assert_eq!(pings.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disconnect() {
        let (client, connector) = fake_client().await;
        let disconnects = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&disconnects);
        client.subscribe_disconnect(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        let hits = Arc::new(AtomicUsize::new(0));
        let hit = Arc::clone(&hits);
        client
            .subscribe_orderbook("btc_usdc", move |_| {
                hit.fetch_add(1, Ordering::SeqCst);
            })
            .await;

        client.disconnect().await;
        client.disconnect().await;

        assert!(!client.is_connected());
        assert_eq!(connector.disconnects(), 1);
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);

        let result = client.get_all_open_orders().await;
        assert!(matches!(result, Err(ExchangeError::Connection(_))));

        connector.emit_orderbook(OrderBookResponse::new("btc_usdc"));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_binance_config_with_fake_transport() {
        let connector = FakeConnector::new();
        let config = ExchangeConfig::from(BinanceConfig::new(true, None));
        let client = ExchangeClient::with_connector(config, &connector)
            .await
            .unwrap();
        assert_eq!(client.venue(), Venue::Binance);
        assert!(client.retrieve_pairs().await.unwrap().is_empty());
    }
}
