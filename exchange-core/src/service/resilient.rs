// =================================================================
// service/resilient.rs - Client rebuild on broker failure
// =================================================================

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use exchange_common::data::{
    Balance, CancelAllOrdersRequest, CancelOrderRequest, Candle, GetHistoricRatesRequest,
    GetHistoricTradesRequest, GetOrderHistoryRequest, GetOrderRequest, GetPriceTickerRequest,
    LimitRequest, MarketPair, MarketRequest, Order, OrderBookRequest, OrderBookResponse,
    OrderCanceled, Paginator, Ticker, Trade, TradeHistoryRequest,
};
use exchange_common::{ExchangeConfig, ExchangeError};
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::client::ExchangeClient;
use super::types::ResilienceConfig;
use crate::exchange::{Connector, DefaultConnector};

/// Wraps an `ExchangeClient` and replaces it whenever a call fails with the
/// broker-registration failure. Every other error is returned as is.
///
/// Subscriptions live on the wrapped client and are not replayed onto a
/// replacement. Dropping a call's future is the only way to stop its retry
/// loop.
pub struct ResilientClient {
    config: ExchangeConfig,
    connector: Arc<dyn Connector>,
    settings: ResilienceConfig,
    /// Current client and the generation it was built in
    current: RwLock<(u64, Arc<ExchangeClient>)>,
    rebuild_lock: Mutex<()>,
    rebuilds: AtomicU64,
}

impl ResilientClient {
    pub async fn new(config: ExchangeConfig) -> Result<Self, ExchangeError> {
        Self::with_connector(config, Arc::new(DefaultConnector), ResilienceConfig::default()).await
    }

    pub async fn with_connector(
        config: ExchangeConfig,
        connector: Arc<dyn Connector>,
        settings: ResilienceConfig,
    ) -> Result<Self, ExchangeError> {
        let client = ExchangeClient::with_connector(config.clone(), connector.as_ref()).await?;

        Ok(Self {
            config,
            connector,
            settings,
            current: RwLock::new((0, Arc::new(client))),
            rebuild_lock: Mutex::new(()),
            rebuilds: AtomicU64::new(0),
        })
    }

    /// The client calls currently run against
    pub fn client(&self) -> Arc<ExchangeClient> {
        Arc::clone(&self.current.read().1)
    }

    /// Number of times the client has been replaced
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds.load(Ordering::SeqCst)
    }

    fn snapshot(&self) -> (u64, Arc<ExchangeClient>) {
        let current = self.current.read();
        (current.0, Arc::clone(&current.1))
    }

    /// Run `op` against the current client, rebuilding and retrying for as
    /// long as it fails with the broker-registration failure.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T, ExchangeError>
    where
        F: Fn(Arc<ExchangeClient>) -> Fut,
        Fut: Future<Output = Result<T, ExchangeError>>,
    {
        loop {
            let (generation, client) = self.snapshot();
            let result = op(Arc::clone(&client)).await;

            match result {
                Err(e) if e.is_broker_registration_failure() => {
                    warn!("Broker rejected request, rebuilding {} client: {}", self.config.venue(), e);
                    let rebuilt = self.rebuild(generation).await;
                    self.retire(generation, client).await;
                    rebuilt?;

                    warn!("Retrying in {:?}...", self.settings.rebuild_delay);
                    sleep(self.settings.rebuild_delay).await;
                }
                other => {
                    self.retire(generation, client).await;
                    return other;
                }
            }
        }
    }

    /// Drop a finished call's handle. A replaced client is disconnected by
    /// whoever releases it last, so calls still running on it are unaffected.
    async fn retire(&self, generation: u64, client: Arc<ExchangeClient>) {
        let replaced = self.current.read().0 != generation;
        if !replaced {
            return;
        }
        if let Ok(client) = Arc::try_unwrap(client) {
            debug!("Disconnecting client from generation {}", generation);
            client.disconnect().await;
        }
    }

    /// Replace the client built in `seen`. Callers that saw the same
    /// generation fail together; only the first one rebuilds.
    async fn rebuild(&self, seen: u64) -> Result<(), ExchangeError> {
        let _guard = self.rebuild_lock.lock().await;

        if self.current.read().0 != seen {
            debug!("Client already rebuilt since generation {}", seen);
            return Ok(());
        }

        let fresh =
            ExchangeClient::with_connector(self.config.clone(), self.connector.as_ref()).await?;
        // the failing caller still holds the old client and retires it
        *self.current.write() = (seen + 1, Arc::new(fresh));

        let total = self.rebuilds.fetch_add(1, Ordering::SeqCst) + 1;
        info!("Rebuilt {} client (rebuild #{})", self.config.venue(), total);
        Ok(())
    }

    pub async fn limit_buy(&self, req: &LimitRequest) -> Result<Order, ExchangeError> {
        self.call(|c| async move { c.limit_buy(req).await }).await
    }

    pub async fn limit_sell(&self, req: &LimitRequest) -> Result<Order, ExchangeError> {
        self.call(|c| async move { c.limit_sell(req).await }).await
    }

    pub async fn market_buy(&self, req: &MarketRequest) -> Result<Order, ExchangeError> {
        self.call(|c| async move { c.market_buy(req).await }).await
    }

    pub async fn market_sell(&self, req: &MarketRequest) -> Result<Order, ExchangeError> {
        self.call(|c| async move { c.market_sell(req).await }).await
    }

    pub async fn cancel_order(&self, req: &CancelOrderRequest) -> Result<OrderCanceled, ExchangeError> {
        self.call(|c| async move { c.cancel_order(req).await }).await
    }

    pub async fn cancel_all_orders(
        &self,
        req: &CancelAllOrdersRequest,
    ) -> Result<Vec<OrderCanceled>, ExchangeError> {
        self.call(|c| async move { c.cancel_all_orders(req).await }).await
    }

    pub async fn get_order(&self, req: &GetOrderRequest) -> Result<Order, ExchangeError> {
        self.call(|c| async move { c.get_order(req).await }).await
    }

    pub async fn get_order_history(
        &self,
        req: &GetOrderHistoryRequest,
    ) -> Result<Vec<Order>, ExchangeError> {
        self.call(|c| async move { c.get_order_history(req).await }).await
    }

    pub async fn get_all_open_orders(&self) -> Result<Vec<Order>, ExchangeError> {
        self.call(|c| async move { c.get_all_open_orders().await }).await
    }

    pub async fn get_trade_history(&self, req: &TradeHistoryRequest) -> Result<Vec<Trade>, ExchangeError> {
        self.call(|c| async move { c.get_trade_history(req).await }).await
    }

    pub async fn get_account_balances(
        &self,
        paginator: Option<&Paginator>,
    ) -> Result<Vec<Balance>, ExchangeError> {
        self.call(|c| async move { c.get_account_balances(paginator).await })
            .await
    }

    pub async fn order_book(&self, req: &OrderBookRequest) -> Result<OrderBookResponse, ExchangeError> {
        self.call(|c| async move { c.order_book(req).await }).await
    }

    pub async fn get_price_ticker(&self, req: &GetPriceTickerRequest) -> Result<Ticker, ExchangeError> {
        self.call(|c| async move { c.get_price_ticker(req).await }).await
    }

    pub async fn get_historic_rates(
        &self,
        req: &GetHistoricRatesRequest,
    ) -> Result<Vec<Candle>, ExchangeError> {
        self.call(|c| async move { c.get_historic_rates(req).await }).await
    }

    pub async fn get_historic_trades(
        &self,
        req: &GetHistoricTradesRequest,
    ) -> Result<Vec<Trade>, ExchangeError> {
        self.call(|c| async move { c.get_historic_trades(req).await }).await
    }

    pub async fn retrieve_pairs(&self) -> Result<Vec<MarketPair>, ExchangeError> {
        self.call(|c| async move { c.retrieve_pairs().await }).await
    }
}
