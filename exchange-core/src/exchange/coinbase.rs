// =================================================================
// exchange/coinbase.rs - Coinbase Exchange Implementation
// =================================================================

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use exchange_common::data::{
    AskBid, Balance, CancelAllOrdersRequest, CancelOrderRequest, Candle, GetHistoricRatesRequest,
    GetHistoricTradesRequest, GetOrderHistoryRequest, GetOrderRequest, GetPriceTickerRequest,
    Interval, LimitRequest, Liquidity, MarketPair, MarketRequest, Order, OrderBookRequest,
    OrderBookResponse, OrderCanceled, OrderStatus, OrderType, Paginator, Side, Subscription,
    Ticker, TimeInForce, Trade, TradeHistoryRequest,
};
use exchange_common::{CoinbaseConfig, CoinbaseCredentials, ExchangeError, Venue};
use parking_lot::RwLock;
use reqwest::Method;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{
    errors::{from_json, from_reqwest, from_status},
    signer::sign_coinbase,
    traits::{EventHandler, Transport},
    types::{
        CoinbaseAccount, CoinbaseBook, CoinbaseErrorBody, CoinbaseFeedMessage, CoinbaseFill,
        CoinbaseOrder, CoinbaseOrderBody, CoinbaseProduct, CoinbaseSubscribeMessage,
        CoinbaseTicker, CoinbaseTrade,
    },
    utils::{coinbase_product, datetime_from_secs, decimal_from_json, parse_decimal, parse_levels, MarketNames},
    websocket::{FrameDecoder, StreamEvent, StreamSession},
};

// Constants
const COINBASE_WS_URL: &str = "wss://ws-feed.exchange.coinbase.com";
const COINBASE_API_URL: &str = "https://api.exchange.coinbase.com";
const COINBASE_SANDBOX_WS_URL: &str = "wss://ws-feed-public.sandbox.exchange.coinbase.com";
const COINBASE_SANDBOX_API_URL: &str = "https://api-public.sandbox.exchange.coinbase.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = concat!("exchange-client/", env!("CARGO_PKG_VERSION"));
const MAX_LIMIT: u64 = 100;

const BOOK_CHANNEL: &str = "level2_batch";
const TRADES_CHANNEL: &str = "matches";

/// Maps product ids back to caller markets and trims snapshots to the
/// requested depth
#[derive(Default)]
struct CoinbaseDecoder {
    markets: MarketNames,
    /// Snapshot limit per product; `None` once any subscriber asked for the
    /// full book
    depths: RwLock<HashMap<String, Option<usize>>>,
    channels: RwLock<BTreeSet<(&'static str, String)>>,
}

impl CoinbaseDecoder {
    fn route(&self, channel: &'static str, product: &str, market: &str, depth: Option<usize>) {
        self.markets.remember(product, market);
        if channel == BOOK_CHANNEL {
            let mut depths = self.depths.write();
            let limit = depths.entry(product.to_string()).or_insert(depth);
            *limit = match (*limit, depth) {
                (Some(current), Some(requested)) => Some(current.max(requested)),
                _ => None,
            };
        }
        self.channels.write().insert((channel, product.to_string()));
    }

    fn depth_for(&self, product: &str) -> Option<usize> {
        self.depths.read().get(product).copied().flatten()
    }

    /// Every caller market for a product, or its `base_quote` form if none
    fn markets_for(&self, product: &str) -> Vec<String> {
        let markets = self.markets.markets(product);
        if markets.is_empty() {
            vec![product_market(&self.markets, product)]
        } else {
            markets
        }
    }

    fn routes(&self) -> Vec<(&'static str, String)> {
        self.channels.read().iter().cloned().collect()
    }

    fn market_for(&self, product: &str) -> String {
        product_market(&self.markets, product)
    }

    /// Decode one feed message into events, one per subscribed market.
    /// Acknowledgements and heartbeats yield nothing.
    fn parse_feed_message(&self, text: &str) -> Result<Vec<StreamEvent>, ExchangeError> {
        let message: CoinbaseFeedMessage = serde_json::from_str(text).map_err(from_json)?;

        match message {
            CoinbaseFeedMessage::Snapshot {
                product_id,
                bids,
                asks,
            } => {
                let markets = self.markets_for(&product_id);
                let mut book = OrderBookResponse::new(markets[0].clone());
                book.bids = parse_levels(&bids)?;
                book.asks = parse_levels(&asks)?;
                if let Some(depth) = self.depth_for(&product_id) {
                    book.bids.truncate(depth);
                    book.asks.truncate(depth);
                }
                Ok(StreamEvent::OrderBook(book).fan_out(&markets))
            }
            CoinbaseFeedMessage::L2update {
                product_id,
                changes,
            } => {
                let markets = self.markets_for(&product_id);
                let mut book = OrderBookResponse::new(markets[0].clone());
                for change in &changes {
                    match change.as_slice() {
                        [side, price, size] => {
                            let level = AskBid::new(
                                parse_decimal("price", price)?,
                                parse_decimal("size", size)?,
                            );
                            match side.as_str() {
                                "buy" => book.bids.push(level),
                                "sell" => book.asks.push(level),
                                other => {
                                    return Err(ExchangeError::Transport(format!(
                                        "Unknown book side {}",
                                        other
                                    )))
                                }
                            }
                        }
                        _ => {
                            return Err(ExchangeError::Transport(format!(
                                "Malformed l2update change {:?}",
                                change
                            )))
                        }
                    }
                }
                Ok(StreamEvent::OrderBook(book).fan_out(&markets))
            }
            CoinbaseFeedMessage::Match {
                trade_id,
                maker_order_id,
                taker_order_id,
                time,
                product_id,
                size,
                price,
                side,
                ..
            } => {
                let maker_side = parse_side(&side)?;
                let (buyer, seller) = match maker_side {
                    Side::Buy => (maker_order_id, taker_order_id),
                    Side::Sell => (taker_order_id, maker_order_id),
                };
                let markets = self.markets_for(&product_id);
                let market = markets[0].clone();
                let trade = Trade {
                    id: trade_id.to_string(),
                    buyer_order_id: Some(buyer),
                    seller_order_id: Some(seller),
                    market: market.clone(),
                    price: parse_decimal("price", &price)?,
                    qty: parse_decimal("size", &size)?,
                    fees: None,
                    side: taker_side(maker_side),
                    liquidity: None,
                    created_at: time,
                };
                Ok(StreamEvent::Trades(market, vec![trade]).fan_out(&markets))
            }
            CoinbaseFeedMessage::Error { message, reason } => Err(ExchangeError::Application(
                match reason {
                    Some(reason) => format!("{}: {}", message, reason),
                    None => message,
                },
            )),
            CoinbaseFeedMessage::Subscriptions {} => {
                debug!("Received subscription confirmation");
                Ok(Vec::new())
            }
            CoinbaseFeedMessage::Heartbeat {} | CoinbaseFeedMessage::Other => Ok(Vec::new()),
        }
    }
}

impl FrameDecoder for CoinbaseDecoder {
    fn decode(&self, text: &str, events: &dyn EventHandler) {
        match self.parse_feed_message(text) {
            Ok(parsed) => parsed.into_iter().for_each(|event| event.deliver(events)),
            Err(e) => {
                warn!("Parse error: {}", e);
                events.on_error(e);
            }
        }
    }
}

/// Caller market for a product; unknown products become `base_quote`
fn product_market(names: &MarketNames, product: &str) -> String {
    names
        .lookup(product)
        .unwrap_or_else(|| product.replace('-', "_").to_lowercase())
}

fn parse_side(side: &str) -> Result<Side, ExchangeError> {
    match side {
        "buy" => Ok(Side::Buy),
        "sell" => Ok(Side::Sell),
        other => Err(ExchangeError::Transport(format!("Unknown side {}", other))),
    }
}

/// Public trades report the maker's side
fn taker_side(maker_side: Side) -> Side {
    match maker_side {
        Side::Buy => Side::Sell,
        Side::Sell => Side::Buy,
    }
}

fn parse_status(status: &str, done_reason: Option<&str>) -> OrderStatus {
    match (status, done_reason) {
        ("received", _) | ("pending", _) => OrderStatus::New,
        ("open", _) | ("active", _) => OrderStatus::Open,
        ("done", Some("filled")) => OrderStatus::Filled,
        ("done", Some("canceled")) => OrderStatus::Canceled,
        ("rejected", _) => OrderStatus::Rejected,
        (other, _) => OrderStatus::Other(other.to_string()),
    }
}

fn parse_order_type(order_type: &str) -> OrderType {
    match order_type {
        "limit" => OrderType::Limit,
        "market" => OrderType::Market,
        other => OrderType::Other(other.to_string()),
    }
}

fn convert_order(order: CoinbaseOrder, market: String) -> Result<Order, ExchangeError> {
    // market orders placed by funds carry no size
    let size = match (&order.size, &order.funds) {
        (Some(size), _) => parse_decimal("size", size)?,
        (None, Some(funds)) => parse_decimal("funds", funds)?,
        (None, None) => {
            return Err(ExchangeError::Transport(format!(
                "Order {} has neither size nor funds",
                order.id
            )))
        }
    };
    let price = order
        .price
        .as_deref()
        .map(|p| parse_decimal("price", p))
        .transpose()?;

    Ok(Order {
        market,
        client_order_id: order.client_oid,
        created_at: order.created_at,
        order_type: parse_order_type(&order.order_type),
        side: parse_side(&order.side)?,
        status: parse_status(&order.status, order.done_reason.as_deref()),
        size,
        price,
        id: order.id,
    })
}

fn convert_fill(fill: CoinbaseFill, market: String) -> Result<Trade, ExchangeError> {
    let side = parse_side(&fill.side)?;
    let (buyer_order_id, seller_order_id) = match side {
        Side::Buy => (Some(fill.order_id), None),
        Side::Sell => (None, Some(fill.order_id)),
    };
    let liquidity = match fill.liquidity.as_str() {
        "M" => Some(Liquidity::Maker),
        "T" => Some(Liquidity::Taker),
        _ => None,
    };

    Ok(Trade {
        id: fill.trade_id.to_string(),
        buyer_order_id,
        seller_order_id,
        market,
        price: parse_decimal("price", &fill.price)?,
        qty: parse_decimal("size", &fill.size)?,
        fees: Some(parse_decimal("fee", &fill.fee)?),
        side,
        liquidity,
        created_at: fill.created_at,
    })
}

fn convert_public_trade(trade: CoinbaseTrade, market: &str) -> Result<Trade, ExchangeError> {
    Ok(Trade {
        id: trade.trade_id.to_string(),
        buyer_order_id: None,
        seller_order_id: None,
        market: market.to_string(),
        price: parse_decimal("price", &trade.price)?,
        qty: parse_decimal("size", &trade.size)?,
        fees: None,
        side: taker_side(parse_side(&trade.side)?),
        liquidity: None,
        created_at: trade.time,
    })
}

/// Rows are `[time, low, high, open, close, volume]`
fn convert_candle(row: &[serde_json::Value]) -> Result<Candle, ExchangeError> {
    if row.len() < 6 {
        return Err(ExchangeError::Transport(format!(
            "Malformed candle with {} fields",
            row.len()
        )));
    }
    let time = row[0]
        .as_i64()
        .ok_or_else(|| ExchangeError::Transport("Candle time is not a number".to_string()))?;

    Ok(Candle {
        time: datetime_from_secs(time)?,
        low: decimal_from_json("low", &row[1])?,
        high: decimal_from_json("high", &row[2])?,
        open: decimal_from_json("open", &row[3])?,
        close: decimal_from_json("close", &row[4])?,
        volume: decimal_from_json("volume", &row[5])?,
    })
}

fn granularity(interval: Interval) -> Result<u64, ExchangeError> {
    match interval {
        Interval::OneMinute
        | Interval::FiveMinutes
        | Interval::FifteenMinutes
        | Interval::OneHour
        | Interval::SixHours
        | Interval::OneDay => Ok(interval.as_secs()),
        other => Err(ExchangeError::Unsupported(format!(
            "Coinbase has no {:?} candles",
            other
        ))),
    }
}

/// Coinbase only knows three good-till-time lifetimes. The shortest one that
/// does not cut the order short wins.
fn cancel_after(duration: Duration) -> Result<&'static str, ExchangeError> {
    let secs = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
    match secs {
        0 => Err(ExchangeError::InvalidRequest(
            "good-till-time requires a positive duration".to_string(),
        )),
        1..=60 => Ok("min"),
        61..=3_600 => Ok("hour"),
        3_601..=86_400 => Ok("day"),
        _ => Err(ExchangeError::Unsupported(format!(
            "Coinbase good-till-time lasts at most one day, got {:?}",
            duration
        ))),
    }
}

fn push_paginator(params: &mut Vec<(&'static str, String)>, paginator: Option<&Paginator>) {
    let Some(paginator) = paginator else {
        return;
    };
    if let Some(limit) = paginator.limit {
        params.push(("limit", limit.min(MAX_LIMIT).to_string()));
    }
    if let Some(before) = &paginator.before {
        params.push(("before", before.clone()));
    }
    if let Some(after) = &paginator.after {
        params.push(("after", after.clone()));
    }
}

fn path_with_query(path: &str, params: &[(&str, String)]) -> String {
    if params.is_empty() {
        return path.to_string();
    }
    let query = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params.iter().map(|(k, v)| (*k, v.as_str())))
        .finish();
    format!("{}?{}", path, query)
}

/// Coinbase exchange implementation
pub struct CoinbaseExchange {
    ws_url: String,
    api_url: String,
    client: reqwest::Client,
    credentials: Option<CoinbaseCredentials>,
    events: Arc<dyn EventHandler>,
    decoder: Arc<CoinbaseDecoder>,
    session: Mutex<Option<StreamSession>>,
}

impl CoinbaseExchange {
    pub fn new(config: &CoinbaseConfig, events: Arc<dyn EventHandler>) -> Result<Self, ExchangeError> {
        let (ws_url, api_url) = if config.sandbox {
            (COINBASE_SANDBOX_WS_URL, COINBASE_SANDBOX_API_URL)
        } else {
            (COINBASE_WS_URL, COINBASE_API_URL)
        };
        Self::with_urls(config, events, ws_url, api_url)
    }

    pub fn with_urls(
        config: &CoinbaseConfig,
        events: Arc<dyn EventHandler>,
        ws_url: &str,
        api_url: &str,
    ) -> Result<Self, ExchangeError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ExchangeError::Connection(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            ws_url: ws_url.to_string(),
            api_url: api_url.to_string(),
            client,
            credentials: config.credentials.clone(),
            events,
            decoder: Arc::new(CoinbaseDecoder::default()),
            session: Mutex::new(None),
        })
    }

    fn credentials(&self) -> Result<&CoinbaseCredentials, ExchangeError> {
        self.credentials.as_ref().ok_or_else(|| {
            ExchangeError::Configuration(
                "Coinbase credentials are required for account endpoints".to_string(),
            )
        })
    }

    fn product(&self, market: &str) -> Result<String, ExchangeError> {
        let product = coinbase_product(market)?;
        self.decoder.markets.remember(&product, market);
        Ok(product)
    }

    fn market_for(&self, product: &str) -> String {
        self.decoder.market_for(product)
    }

    async fn read_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ExchangeError> {
        let status = response.status();
        let body = response.text().await.map_err(from_reqwest)?;

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<CoinbaseErrorBody>(&body) {
                if status.is_client_error() {
                    return Err(ExchangeError::Application(error.message));
                }
            }
            return Err(from_status(status, &body));
        }

        serde_json::from_str(&body).map_err(from_json)
    }

    async fn public_get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, ExchangeError> {
        let request_path = path_with_query(path, params);
        debug!("GET {}{}", self.api_url, request_path);

        let response = self
            .client
            .get(format!("{}{}", self.api_url, request_path))
            .send()
            .await
            .map_err(from_reqwest)?;

        Self::read_response(response).await
    }

    async fn signed_request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
        body: Option<String>,
    ) -> Result<T, ExchangeError> {
        let credentials = self.credentials()?;
        let request_path = path_with_query(path, params);
        let body = body.unwrap_or_default();
        let timestamp = Utc::now().timestamp().to_string();
        let signature = sign_coinbase(
            &credentials.api_secret,
            &timestamp,
            method.as_str(),
            &request_path,
            &body,
        )?;
        debug!("{} {}{}", method, self.api_url, request_path);

        let mut request = self
            .client
            .request(method, format!("{}{}", self.api_url, request_path))
            .header("CB-ACCESS-KEY", &credentials.api_key)
            .header("CB-ACCESS-SIGN", signature)
            .header("CB-ACCESS-TIMESTAMP", timestamp)
            .header("CB-ACCESS-PASSPHRASE", &credentials.passphrase);
        if !body.is_empty() {
            request = request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body);
        }

        let response = request.send().await.map_err(from_reqwest)?;
        Self::read_response(response).await
    }

    async fn place_order(&self, body: CoinbaseOrderBody, market: &str) -> Result<Order, ExchangeError> {
        let payload = serde_json::to_string(&body).map_err(from_json)?;
        let order: CoinbaseOrder = self
            .signed_request(Method::POST, "/orders", &[], Some(payload))
            .await?;

        info!("Placed {} order {} on {}", body.side, order.id, market);
        convert_order(order, market.to_string())
    }

    fn subscribe_message(
        &self,
        channel: &'static str,
        product: String,
    ) -> Result<CoinbaseSubscribeMessage, ExchangeError> {
        let mut message = CoinbaseSubscribeMessage {
            kind: "subscribe",
            product_ids: vec![product],
            channels: vec![channel],
            signature: None,
            key: None,
            passphrase: None,
            timestamp: None,
        };

        if let Some(credentials) = &self.credentials {
            let timestamp = Utc::now().timestamp().to_string();
            message.signature = Some(sign_coinbase(
                &credentials.api_secret,
                &timestamp,
                "GET",
                "/users/self/verify",
                "",
            )?);
            message.key = Some(credentials.api_key.clone());
            message.passphrase = Some(credentials.passphrase.clone());
            message.timestamp = Some(timestamp);
        }

        Ok(message)
    }

    async fn request_channel(&self, channel: &'static str, product: String) -> Result<(), ExchangeError> {
        let mut guard = self.session.lock().await;

        let routes = match guard.as_ref() {
            Some(session) if session.is_open() => vec![(channel, product)],
            _ => {
                info!("Connecting to Coinbase feed at {}", self.ws_url);
                let decoder: Arc<dyn FrameDecoder> = self.decoder.clone();
                let session =
                    StreamSession::connect(&self.ws_url, decoder, Arc::clone(&self.events)).await?;
                *guard = Some(session);
                // a fresh socket carries none of the earlier channels
                self.decoder.routes()
            }
        };

        let session = guard.as_ref().ok_or_else(|| {
            ExchangeError::Connection("Coinbase feed is not connected".to_string())
        })?;
        for (channel, product) in routes {
            let frame = serde_json::to_string(&self.subscribe_message(channel, product)?)
                .map_err(from_json)?;
            session.send(frame)?;
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for CoinbaseExchange {
    fn venue(&self) -> Venue {
        Venue::Coinbase
    }

    async fn place_limit_order(&self, side: Side, req: &LimitRequest) -> Result<Order, ExchangeError> {
        let (time_in_force, cancel_after) = match req.time_in_force {
            TimeInForce::GoodTillCancelled => ("GTC", None),
            TimeInForce::ImmediateOrCancel => ("IOC", None),
            TimeInForce::FillOrKill => ("FOK", None),
            TimeInForce::GoodTillTime(duration) => ("GTT", Some(cancel_after(duration)?)),
        };

        let body = CoinbaseOrderBody {
            order_type: "limit",
            side: side_code(side),
            product_id: self.product(&req.market)?,
            price: Some(req.price.to_string()),
            size: req.size.to_string(),
            time_in_force: Some(time_in_force),
            cancel_after,
            post_only: req.post_only.then_some(true),
            client_oid: req.client_order_id.clone(),
        };
        self.place_order(body, &req.market).await
    }

    async fn place_market_order(&self, side: Side, req: &MarketRequest) -> Result<Order, ExchangeError> {
        let body = CoinbaseOrderBody {
            order_type: "market",
            side: side_code(side),
            product_id: self.product(&req.market)?,
            price: None,
            size: req.size.to_string(),
            time_in_force: None,
            cancel_after: None,
            post_only: None,
            client_oid: req.client_order_id.clone(),
        };
        self.place_order(body, &req.market).await
    }

    async fn cancel_order(&self, req: &CancelOrderRequest) -> Result<OrderCanceled, ExchangeError> {
        let mut params = Vec::new();
        if let Some(market) = &req.market {
            params.push(("product_id", self.product(market)?));
        }

        let id: String = self
            .signed_request(Method::DELETE, &format!("/orders/{}", req.id), &params, None)
            .await?;
        Ok(OrderCanceled { id })
    }

    async fn cancel_all_orders(
        &self,
        req: &CancelAllOrdersRequest,
    ) -> Result<Vec<OrderCanceled>, ExchangeError> {
        let mut params = Vec::new();
        if let Some(market) = &req.market {
            params.push(("product_id", self.product(market)?));
        }

        let ids: Vec<String> = self
            .signed_request(Method::DELETE, "/orders", &params, None)
            .await?;

        info!("Canceled {} Coinbase orders", ids.len());
        Ok(ids.into_iter().map(|id| OrderCanceled { id }).collect())
    }

    async fn get_order(&self, req: &GetOrderRequest) -> Result<Order, ExchangeError> {
        let order: CoinbaseOrder = self
            .signed_request(Method::GET, &format!("/orders/{}", req.id), &[], None)
            .await?;
        let market = self.market_for(&order.product_id);
        convert_order(order, market)
    }

    async fn get_order_history(&self, req: &GetOrderHistoryRequest) -> Result<Vec<Order>, ExchangeError> {
        let mut params = vec![("status", "all".to_string())];
        if let Some(market) = &req.market {
            params.push(("product_id", self.product(market)?));
        }
        push_paginator(&mut params, req.paginator.as_ref());

        let orders: Vec<CoinbaseOrder> = self
            .signed_request(Method::GET, "/orders", &params, None)
            .await?;
        orders
            .into_iter()
            .map(|o| {
                let market = self.market_for(&o.product_id);
                convert_order(o, market)
            })
            .collect()
    }

    async fn get_all_open_orders(&self) -> Result<Vec<Order>, ExchangeError> {
        // without a status filter the venue lists open, pending and active
        let orders: Vec<CoinbaseOrder> = self
            .signed_request(Method::GET, "/orders", &[], None)
            .await?;
        orders
            .into_iter()
            .map(|o| {
                let market = self.market_for(&o.product_id);
                convert_order(o, market)
            })
            .collect()
    }

    async fn get_trade_history(&self, req: &TradeHistoryRequest) -> Result<Vec<Trade>, ExchangeError> {
        let mut params = Vec::new();
        if let Some(market) = &req.market {
            params.push(("product_id", self.product(market)?));
        }
        if let Some(order_id) = &req.order_id {
            params.push(("order_id", order_id.clone()));
        }
        if params.is_empty() {
            return Err(ExchangeError::InvalidRequest(
                "Coinbase trade history needs a market or an order id".to_string(),
            ));
        }
        push_paginator(&mut params, req.paginator.as_ref());

        let fills: Vec<CoinbaseFill> = self
            .signed_request(Method::GET, "/fills", &params, None)
            .await?;
        fills
            .into_iter()
            .map(|f| {
                let market = self.market_for(&f.product_id);
                convert_fill(f, market)
            })
            .collect()
    }

    async fn get_account_balances(&self, _paginator: Option<&Paginator>) -> Result<Vec<Balance>, ExchangeError> {
        let accounts: Vec<CoinbaseAccount> = self
            .signed_request(Method::GET, "/accounts", &[], None)
            .await?;

        accounts
            .into_iter()
            .map(|a| {
                Ok(Balance {
                    total: parse_decimal("balance", &a.balance)?,
                    free: parse_decimal("available", &a.available)?,
                    asset: a.currency,
                })
            })
            .collect()
    }

    async fn order_book(&self, req: &OrderBookRequest) -> Result<OrderBookResponse, ExchangeError> {
        let product = self.product(&req.market)?;
        let book: CoinbaseBook = self
            .public_get(&format!("/products/{}/book", product), &[("level", "2".to_string())])
            .await?;

        let levels = |side: &[(String, String, serde_json::Value)]| {
            side.iter()
                .map(|(price, size, _)| {
                    Ok(AskBid::new(
                        parse_decimal("price", price)?,
                        parse_decimal("size", size)?,
                    ))
                })
                .collect::<Result<Vec<_>, ExchangeError>>()
        };

        Ok(OrderBookResponse {
            market: req.market.clone(),
            asks: levels(&book.asks)?,
            bids: levels(&book.bids)?,
            last_update_id: Some(book.sequence),
            update_id: None,
        })
    }

    async fn get_price_ticker(&self, req: &GetPriceTickerRequest) -> Result<Ticker, ExchangeError> {
        let product = self.product(&req.market)?;
        let ticker: CoinbaseTicker = self
            .public_get(&format!("/products/{}/ticker", product), &[])
            .await?;

        Ok(Ticker {
            price: ticker
                .price
                .as_deref()
                .map(|p| parse_decimal("price", p))
                .transpose()?,
        })
    }

    async fn get_historic_rates(&self, req: &GetHistoricRatesRequest) -> Result<Vec<Candle>, ExchangeError> {
        let product = self.product(&req.market)?;
        let mut params = vec![("granularity", granularity(req.interval)?.to_string())];
        if let Some(paginator) = &req.paginator {
            if let Some(start) = paginator.start_time {
                params.push(("start", start.to_rfc3339_opts(SecondsFormat::Secs, true)));
            }
            if let Some(end) = paginator.end_time {
                params.push(("end", end.to_rfc3339_opts(SecondsFormat::Secs, true)));
            }
        }

        let rows: Vec<Vec<serde_json::Value>> = self
            .public_get(&format!("/products/{}/candles", product), &params)
            .await?;
        rows.iter().map(|row| convert_candle(row)).collect()
    }

    async fn get_historic_trades(&self, req: &GetHistoricTradesRequest) -> Result<Vec<Trade>, ExchangeError> {
        let product = self.product(&req.market)?;
        let mut params = Vec::new();
        push_paginator(&mut params, req.paginator.as_ref());

        let trades: Vec<CoinbaseTrade> = self
            .public_get(&format!("/products/{}/trades", product), &params)
            .await?;
        trades
            .into_iter()
            .map(|t| convert_public_trade(t, &req.market))
            .collect()
    }

    async fn retrieve_pairs(&self) -> Result<Vec<MarketPair>, ExchangeError> {
        let products: Vec<CoinbaseProduct> = self.public_get("/products", &[]).await?;

        let mut pairs = Vec::with_capacity(products.len());
        for product in products {
            let pair = MarketPair {
                base_increment: parse_decimal("base_increment", &product.base_increment)?,
                quote_increment: parse_decimal("quote_increment", &product.quote_increment)?,
                min_base_size: product
                    .base_min_size
                    .as_deref()
                    .map(|v| parse_decimal("base_min_size", v))
                    .transpose()?,
                min_quote_size: product
                    .min_market_funds
                    .as_deref()
                    .map(|v| parse_decimal("min_market_funds", v))
                    .transpose()?,
                base: product.base_currency,
                quote: product.quote_currency,
                symbol: product.id,
            };
            self.decoder.markets.remember(&pair.symbol, &pair.market());
            pairs.push(pair);
        }

        info!("Retrieved {} Coinbase market pairs", pairs.len());
        Ok(pairs)
    }

    async fn subscribe(&self, subscription: Subscription) -> Result<(), ExchangeError> {
        let market = subscription.market();
        let product = coinbase_product(market)?;
        let (channel, depth) = match &subscription {
            Subscription::OrderBook { depth, .. } => (BOOK_CHANNEL, *depth),
            Subscription::Trades { .. } => (TRADES_CHANNEL, None),
        };

        info!("Subscribing to Coinbase {} for {}", channel, market);
        self.decoder.route(channel, &product, market, depth);
        self.request_channel(channel, product).await
    }

    async fn disconnect(&self) {
        if let Some(session) = self.session.lock().await.take() {
            info!("Closing Coinbase feed");
            session.close().await;
        }
    }
}

fn side_code(side: Side) -> &'static str {
    match side {
        Side::Buy => "buy",
        Side::Sell => "sell",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn decoder() -> CoinbaseDecoder {
        let decoder = CoinbaseDecoder::default();
        decoder.route(TRADES_CHANNEL, "BTC-USD", "btc_usd", None);
        decoder.route(BOOK_CHANNEL, "ETH-BTC", "eth_btc", Some(1));
        decoder
    }

    fn single_event(decoder: &CoinbaseDecoder, text: &str) -> StreamEvent {
        let mut events = decoder.parse_feed_message(text).unwrap();
        assert_eq!(events.len(), 1, "expected one event, got {:?}", events);
        events.remove(0)
    }

    fn snapshot_for(product: &str) -> String {
        format!(
            r#"{{"type":"snapshot","product_id":"{}","bids":[["0.05","1.5"],["0.04","2"]],"asks":[["0.06","3"],["0.07","4"]]}}"#,
            product
        )
    }

    #[test]
    fn test_match_reports_taker_side() {
        let msg = r#"{
            "type": "match",
            "trade_id": 10,
            "sequence": 50,
            "maker_order_id": "ac928c66-ca53-498f-9c13-a110027a60e8",
            "taker_order_id": "132fb6ae-456b-4654-b4e0-d681ac05cea1",
            "time": "2014-11-07T08:19:27.028459Z",
            "product_id": "BTC-USD",
            "size": "5.23512",
            "price": "400.23",
            "side": "sell"
        }"#;

        match single_event(&decoder(), msg) {
            StreamEvent::Trades(market, trades) => {
                assert_eq!(market, "btc_usd");
                let trade = &trades[0];
                // maker sold, so the taker bought
                assert_eq!(trade.side, Side::Buy);
                assert_eq!(trade.price, dec!(400.23));
                assert_eq!(trade.qty, dec!(5.23512));
                assert_eq!(
                    trade.buyer_order_id.as_deref(),
                    Some("132fb6ae-456b-4654-b4e0-d681ac05cea1")
                );
                assert_eq!(
                    trade.seller_order_id.as_deref(),
                    Some("ac928c66-ca53-498f-9c13-a110027a60e8")
                );
            }
            other => panic!("expected trades, got {:?}", other),
        }
    }

    #[test]
    fn test_snapshot_is_trimmed_to_depth() {
        let msg = r#"{
            "type": "snapshot",
            "product_id": "ETH-BTC",
            "bids": [["0.05", "1.5"], ["0.04", "2"]],
            "asks": [["0.06", "3"], ["0.07", "4"]]
        }"#;

        match single_event(&decoder(), msg) {
            StreamEvent::OrderBook(book) => {
                assert_eq!(book.market, "eth_btc");
                assert_eq!(book.bids, vec![AskBid::new(dec!(0.05), dec!(1.5))]);
                assert_eq!(book.asks, vec![AskBid::new(dec!(0.06), dec!(3))]);
            }
            other => panic!("expected orderbook, got {:?}", other),
        }
    }

    #[test]
    fn test_l2update_splits_sides() {
        let msg = r#"{
            "type": "l2update",
            "product_id": "BTC-USD",
            "time": "2019-08-14T20:42:27.265Z",
            "changes": [["buy", "10101.80", "0.162567"], ["sell", "10102.00", "0"]]
        }"#;

        match single_event(&decoder(), msg) {
            StreamEvent::OrderBook(book) => {
                assert_eq!(book.market, "btc_usd");
                assert_eq!(book.bids.len(), 1);
                assert_eq!(book.asks[0].qty, dec!(0));
            }
            other => panic!("expected orderbook, got {:?}", other),
        }
    }

    #[test]
    fn test_control_and_error_messages() {
        let decoder = decoder();
        let ack = r#"{"type":"subscriptions","channels":[{"name":"matches","product_ids":["BTC-USD"]}]}"#;
        assert!(decoder.parse_feed_message(ack).unwrap().is_empty());

        let heartbeat = r#"{"type":"heartbeat","sequence":90,"last_trade_id":20,"product_id":"BTC-USD","time":"2014-11-07T08:19:28.464459Z"}"#;
        assert!(decoder.parse_feed_message(heartbeat).unwrap().is_empty());

        let unknown = r#"{"type":"status","products":[]}"#;
        assert!(decoder.parse_feed_message(unknown).unwrap().is_empty());

        let error = r#"{"type":"error","message":"Failed to subscribe","reason":"ETH-XYZ is not a valid product"}"#;
        assert!(matches!(
            decoder.parse_feed_message(error),
            Err(ExchangeError::Application(msg)) if msg.contains("ETH-XYZ")
        ));
    }

    #[test]
    fn test_full_book_subscription_lifts_depth_limit() {
        let decoder = CoinbaseDecoder::default();
        decoder.route(BOOK_CHANNEL, "BTC-USD", "btc_usd", Some(1));

        match single_event(&decoder, &snapshot_for("BTC-USD")) {
            StreamEvent::OrderBook(book) => assert_eq!(book.bids.len(), 1),
            other => panic!("expected orderbook, got {:?}", other),
        }

        decoder.route(BOOK_CHANNEL, "BTC-USD", "btc_usd", None);
        // a later limited request does not shrink the full book again
        decoder.route(BOOK_CHANNEL, "BTC-USD", "btc_usd", Some(1));

        match single_event(&decoder, &snapshot_for("BTC-USD")) {
            StreamEvent::OrderBook(book) => {
                assert_eq!(book.bids.len(), 2);
                assert_eq!(book.asks.len(), 2);
            }
            other => panic!("expected orderbook, got {:?}", other),
        }
    }

    #[test]
    fn test_depth_limits_keep_the_largest() {
        let decoder = CoinbaseDecoder::default();
        decoder.route(BOOK_CHANNEL, "ETH-BTC", "eth_btc", Some(1));
        decoder.route(BOOK_CHANNEL, "ETH-BTC", "eth_btc", Some(2));
        decoder.route(BOOK_CHANNEL, "ETH-BTC", "eth_btc", Some(1));
        // trades carry no depth and leave the book limit alone
        decoder.route(TRADES_CHANNEL, "ETH-BTC", "eth_btc", None);

        assert_eq!(decoder.depth_for("ETH-BTC"), Some(2));
        assert_eq!(decoder.depth_for("BTC-USD"), None);
    }

    #[test]
    fn test_product_reaches_every_spelling() {
        let decoder = decoder();
        decoder.route(TRADES_CHANNEL, "BTC-USD", "BTC-USD", None);

        let msg = r#"{"type":"match","trade_id":11,"maker_order_id":"m","taker_order_id":"t","time":"2014-11-07T08:19:27.028459Z","product_id":"BTC-USD","size":"1","price":"400","side":"buy"}"#;
        let markets: Vec<_> = decoder
            .parse_feed_message(msg)
            .unwrap()
            .into_iter()
            .map(|event| match event {
                StreamEvent::Trades(market, trades) => {
                    assert_eq!(trades[0].market, market);
                    market
                }
                other => panic!("expected trades, got {:?}", other),
            })
            .collect();

        assert_eq!(markets, vec!["btc_usd".to_string(), "BTC-USD".to_string()]);
    }

    #[test]
    fn test_unknown_product_falls_back_to_market_form() {
        assert_eq!(decoder().market_for("SOL-EUR"), "sol_eur");
    }

    #[test]
    fn test_cancel_after_buckets() {
        assert_eq!(cancel_after(Duration::from_secs(30)).unwrap(), "min");
        assert_eq!(cancel_after(Duration::from_millis(500)).unwrap(), "min");
        assert_eq!(cancel_after(Duration::from_secs(60)).unwrap(), "min");
        assert_eq!(cancel_after(Duration::from_secs(61)).unwrap(), "hour");
        assert_eq!(cancel_after(Duration::from_secs(86_400)).unwrap(), "day");
        assert!(matches!(
            cancel_after(Duration::from_secs(86_401)),
            Err(ExchangeError::Unsupported(_))
        ));
        assert!(matches!(
            cancel_after(Duration::ZERO),
            Err(ExchangeError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_granularity() {
        assert_eq!(granularity(Interval::OneHour).unwrap(), 3600);
        assert!(matches!(
            granularity(Interval::OneWeek),
            Err(ExchangeError::Unsupported(_))
        ));
    }

    #[test]
    fn test_convert_order() {
        let order: CoinbaseOrder = serde_json::from_str(
            r#"{
                "id": "d0c5340b-6d6c-49d9-b567-48c4bfca13d2",
                "price": "0.10000000",
                "size": "0.01000000",
                "product_id": "BTC-USD",
                "side": "buy",
                "stp": "dc",
                "type": "limit",
                "time_in_force": "GTC",
                "post_only": false,
                "created_at": "2016-12-08T20:02:28.53864Z",
                "fill_fees": "0.0000000000000000",
                "filled_size": "0.00000000",
                "executed_value": "0.0000000000000000",
                "status": "done",
                "done_reason": "canceled",
                "settled": false
            }"#,
        )
        .unwrap();

        let order = convert_order(order, "btc_usd".to_string()).unwrap();
        assert_eq!(order.status, OrderStatus::Canceled);
        assert_eq!(order.order_type, OrderType::Limit);
        assert_eq!(order.price, Some(dec!(0.1)));
        assert_eq!(order.size, dec!(0.01));
        assert_eq!(order.side, Side::Buy);
    }

    #[test]
    fn test_convert_candle() {
        let row: Vec<serde_json::Value> =
            serde_json::from_str("[1415398768, 0.32, 4.2, 0.35, 4.2, 12.3]").unwrap();
        let candle = convert_candle(&row).unwrap();
        assert_eq!(candle.time.timestamp(), 1415398768);
        assert_eq!(candle.low, dec!(0.32));
        assert_eq!(candle.open, dec!(0.35));
        assert_eq!(candle.volume, dec!(12.3));
    }

    #[test]
    fn test_path_with_query() {
        assert_eq!(path_with_query("/orders", &[]), "/orders");
        assert_eq!(
            path_with_query(
                "/orders",
                &[("status", "all".to_string()), ("product_id", "BTC-USD".to_string())]
            ),
            "/orders?status=all&product_id=BTC-USD"
        );
    }

    #[test]
    fn test_fill_liquidity() {
        let fill: CoinbaseFill = serde_json::from_str(
            r#"{
                "trade_id": 74,
                "product_id": "BTC-USD",
                "price": "10.00",
                "size": "0.01",
                "order_id": "d50ec984-77a8-460a-b958-66f114b0de9b",
                "created_at": "2014-11-07T22:19:28.578544Z",
                "liquidity": "T",
                "fee": "0.00025",
                "settled": true,
                "side": "sell"
            }"#,
        )
        .unwrap();

        let trade = convert_fill(fill, "btc_usd".to_string()).unwrap();
        assert_eq!(trade.liquidity, Some(Liquidity::Taker));
        assert_eq!(trade.fees, Some(dec!(0.00025)));
        assert!(trade.buyer_order_id.is_none());
        assert_eq!(trade.side, Side::Sell);
    }
}
