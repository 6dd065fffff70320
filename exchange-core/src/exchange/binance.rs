// =================================================================
// exchange/binance.rs - Binance Exchange Implementation
// =================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use exchange_common::data::{
    Balance, CancelAllOrdersRequest, CancelOrderRequest, Candle, GetHistoricRatesRequest,
    GetHistoricTradesRequest, GetOrderHistoryRequest, GetOrderRequest, GetPriceTickerRequest,
    Interval, Liquidity, LimitRequest, MarketPair, MarketRequest, Order, OrderBookRequest,
    OrderBookResponse, OrderCanceled, OrderStatus, OrderType, Paginator, Side, Subscription,
    Ticker, TimeInForce, Trade, TradeHistoryRequest,
};
use exchange_common::{BinanceConfig, BinanceCredentials, ExchangeError, Venue};
use parking_lot::RwLock;
use reqwest::Method;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{
    errors::{from_json, from_reqwest, from_status},
    signer::sign_binance,
    traits::{EventHandler, Transport},
    types::{
        BinanceAccount, BinanceAccountTrade, BinanceAggTrade, BinanceCanceledOrder,
        BinanceDepthSnapshot, BinanceDepthUpdate, BinanceErrorBody, BinanceExchangeInfo,
        BinanceFilter, BinanceOrder, BinanceStreamMessage, BinanceSubscribeMessage,
        BinanceTickerPrice, BinanceTradeMessage,
    },
    utils::{binance_symbol, datetime_from_millis, decimal_from_json, parse_decimal, parse_levels, MarketNames},
    websocket::{FrameDecoder, StreamEvent, StreamSession},
};

// Constants
const BINANCE_WS_URL: &str = "wss://stream.binance.com:9443/stream";
const BINANCE_API_URL: &str = "https://api.binance.com";
const BINANCE_TESTNET_WS_URL: &str = "wss://stream.testnet.binance.vision/stream";
const BINANCE_TESTNET_API_URL: &str = "https://testnet.binance.vision";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const RECV_WINDOW_MS: u64 = 5000;
// Binance API has a maximum limit of 1000
const MAX_LIMIT: u64 = 1000;
const PARTIAL_DEPTHS: [usize; 3] = [5, 10, 20];

/// Routes combined-stream names back to every market string a caller
/// subscribed under
#[derive(Default)]
struct BinanceDecoder {
    routes: RwLock<HashMap<String, Vec<String>>>,
}

impl BinanceDecoder {
    fn route(&self, stream: &str, market: &str) {
        let mut routes = self.routes.write();
        let markets = routes.entry(stream.to_string()).or_default();
        if !markets.iter().any(|m| m == market) {
            markets.push(market.to_string());
        }
    }

    fn streams(&self) -> Vec<String> {
        self.routes.read().keys().cloned().collect()
    }

    fn markets_for(&self, stream: &str) -> Vec<String> {
        self.routes.read().get(stream).cloned().unwrap_or_default()
    }

    /// Parse WebSocket message into events, one per subscribed market.
    /// Confirmations and unrouted streams yield nothing.
    fn parse_stream_message(&self, text: &str) -> Result<Vec<StreamEvent>, ExchangeError> {
        if let Ok(stream_msg) = serde_json::from_str::<BinanceStreamMessage>(text) {
            let markets = self.markets_for(&stream_msg.stream);
            let market = match markets.first() {
                Some(market) => market.clone(),
                None => {
                    debug!("Frame for unrouted stream {}", stream_msg.stream);
                    return Ok(Vec::new());
                }
            };

            let event = if stream_msg.stream.ends_with("@trade") {
                let msg: BinanceTradeMessage =
                    serde_json::from_value(stream_msg.data).map_err(from_json)?;
                let trade = convert_trade_message(msg, &market)?;
                StreamEvent::Trades(market, vec![trade])
            } else if stream_msg.stream.contains("@depth") {
                // Partial book streams carry a snapshot, diff streams a delta
                if stream_msg.data.get("lastUpdateId").is_some() {
                    let snapshot: BinanceDepthSnapshot =
                        serde_json::from_value(stream_msg.data).map_err(from_json)?;
                    StreamEvent::OrderBook(convert_snapshot(snapshot, &market)?)
                } else {
                    let update: BinanceDepthUpdate =
                        serde_json::from_value(stream_msg.data).map_err(from_json)?;
                    StreamEvent::OrderBook(convert_depth_update(update, &market)?)
                }
            } else {
                return Err(ExchangeError::Transport(format!(
                    "Unknown stream kind: {}",
                    stream_msg.stream
                )));
            };

            return Ok(event.fan_out(&markets));
        }

        if let Ok(value) = serde_json::from_str::<serde_json::Value>(text) {
            if let Some(error) = value.get("error") {
                return Err(ExchangeError::Application(format!(
                    "Subscription rejected: {}",
                    error
                )));
            }
            if value.get("result").is_some() || value.get("id").is_some() {
                // This is a subscription confirmation, not an error
                debug!("Received subscription confirmation: {}", text);
                return Ok(Vec::new());
            }
        }

        Err(ExchangeError::Transport(format!(
            "Unable to parse message: {}",
            text
        )))
    }
}

impl FrameDecoder for BinanceDecoder {
    fn decode(&self, text: &str, events: &dyn EventHandler) {
        match self.parse_stream_message(text) {
            Ok(parsed) => parsed.into_iter().for_each(|event| event.deliver(events)),
            Err(e) => {
                warn!("Parse error: {}", e);
                events.on_error(e);
            }
        }
    }
}

/// Convert Binance trade message to the common trade format
fn convert_trade_message(msg: BinanceTradeMessage, market: &str) -> Result<Trade, ExchangeError> {
    let created_at = datetime_from_millis(msg.trade_time)?;
    let price = parse_decimal("price", &msg.price)?;
    let qty = parse_decimal("quantity", &msg.quantity)?;

    // If buyer is maker, it means a sell order was filled (seller was taker)
    // If buyer is not maker, it means a buy order was filled (buyer was taker)
    let side = if msg.is_buyer_maker {
        Side::Sell
    } else {
        Side::Buy
    };

    Ok(Trade {
        id: msg.trade_id.to_string(),
        buyer_order_id: msg.buyer_order_id.map(|id| id.to_string()),
        seller_order_id: msg.seller_order_id.map(|id| id.to_string()),
        market: market.to_string(),
        price,
        qty,
        fees: None,
        side,
        liquidity: None,
        created_at,
    })
}

fn convert_snapshot(
    snapshot: BinanceDepthSnapshot,
    market: &str,
) -> Result<OrderBookResponse, ExchangeError> {
    Ok(OrderBookResponse {
        market: market.to_string(),
        asks: parse_levels(&snapshot.asks)?,
        bids: parse_levels(&snapshot.bids)?,
        last_update_id: Some(snapshot.last_update_id),
        update_id: None,
    })
}

fn convert_depth_update(
    update: BinanceDepthUpdate,
    market: &str,
) -> Result<OrderBookResponse, ExchangeError> {
    Ok(OrderBookResponse {
        market: market.to_string(),
        asks: parse_levels(&update.asks)?,
        bids: parse_levels(&update.bids)?,
        last_update_id: Some(update.final_update_id),
        update_id: Some(update.first_update_id),
    })
}

fn has_unknown_symbol<'a>(names: &MarketNames, mut symbols: impl Iterator<Item = &'a str>) -> bool {
    symbols.any(|symbol| names.lookup(symbol).is_none())
}

/// Query string to sign. The serializer is not `Send`, so it never lives
/// across an await.
fn signed_query(params: &[(&str, String)], timestamp_ms: i64) -> String {
    let mut query = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in params {
        query.append_pair(key, value);
    }
    query.append_pair("recvWindow", &RECV_WINDOW_MS.to_string());
    query.append_pair("timestamp", &timestamp_ms.to_string());
    query.finish()
}

fn parse_side(side: &str) -> Result<Side, ExchangeError> {
    match side {
        "BUY" => Ok(Side::Buy),
        "SELL" => Ok(Side::Sell),
        other => Err(ExchangeError::Transport(format!("Unknown side {}", other))),
    }
}

fn parse_status(status: &str) -> OrderStatus {
    match status {
        "NEW" => OrderStatus::New,
        "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
        "FILLED" => OrderStatus::Filled,
        "CANCELED" => OrderStatus::Canceled,
        "PENDING_CANCEL" => OrderStatus::PendingCancel,
        "REJECTED" => OrderStatus::Rejected,
        "EXPIRED" | "EXPIRED_IN_MATCH" => OrderStatus::Expired,
        other => OrderStatus::Other(other.to_string()),
    }
}

fn parse_order_type(order_type: &str) -> OrderType {
    match order_type {
        "LIMIT" | "LIMIT_MAKER" => OrderType::Limit,
        "MARKET" => OrderType::Market,
        "STOP_LOSS_LIMIT" | "TAKE_PROFIT_LIMIT" => OrderType::StopLimit,
        "STOP_LOSS" | "TAKE_PROFIT" => OrderType::StopMarket,
        other => OrderType::Other(other.to_string()),
    }
}

fn convert_order(order: BinanceOrder, market: &str) -> Result<Order, ExchangeError> {
    let millis = order.time.or(order.transact_time).ok_or_else(|| {
        ExchangeError::Transport(format!("Order {} has no timestamp", order.order_id))
    })?;
    let price = parse_decimal("price", &order.price)?;

    Ok(Order {
        id: order.order_id.to_string(),
        market: market.to_string(),
        client_order_id: order.client_order_id,
        created_at: datetime_from_millis(millis)?,
        order_type: parse_order_type(&order.order_type),
        side: parse_side(&order.side)?,
        status: parse_status(&order.status),
        size: parse_decimal("quantity", &order.orig_qty)?,
        // market orders report a zero price
        price: (!price.is_zero()).then_some(price),
    })
}

fn convert_account_trade(trade: BinanceAccountTrade, market: &str) -> Result<Trade, ExchangeError> {
    let order_id = trade.order_id.to_string();
    let (side, buyer_order_id, seller_order_id) = if trade.is_buyer {
        (Side::Buy, Some(order_id), None)
    } else {
        (Side::Sell, None, Some(order_id))
    };

    Ok(Trade {
        id: trade.id.to_string(),
        buyer_order_id,
        seller_order_id,
        market: market.to_string(),
        price: parse_decimal("price", &trade.price)?,
        qty: parse_decimal("quantity", &trade.qty)?,
        fees: Some(parse_decimal("commission", &trade.commission)?),
        side,
        liquidity: Some(if trade.is_maker {
            Liquidity::Maker
        } else {
            Liquidity::Taker
        }),
        created_at: datetime_from_millis(trade.time)?,
    })
}

fn convert_kline(row: &[serde_json::Value]) -> Result<Candle, ExchangeError> {
    if row.len() < 6 {
        return Err(ExchangeError::Transport(format!(
            "Malformed kline with {} fields",
            row.len()
        )));
    }
    let open_time = row[0]
        .as_u64()
        .ok_or_else(|| ExchangeError::Transport("Kline open time is not a number".to_string()))?;

    Ok(Candle {
        time: datetime_from_millis(open_time)?,
        open: decimal_from_json("open", &row[1])?,
        high: decimal_from_json("high", &row[2])?,
        low: decimal_from_json("low", &row[3])?,
        close: decimal_from_json("close", &row[4])?,
        volume: decimal_from_json("volume", &row[5])?,
    })
}

fn interval_code(interval: Interval) -> &'static str {
    match interval {
        Interval::OneMinute => "1m",
        Interval::ThreeMinutes => "3m",
        Interval::FiveMinutes => "5m",
        Interval::FifteenMinutes => "15m",
        Interval::ThirtyMinutes => "30m",
        Interval::OneHour => "1h",
        Interval::TwoHours => "2h",
        Interval::FourHours => "4h",
        Interval::SixHours => "6h",
        Interval::EightHours => "8h",
        Interval::TwelveHours => "12h",
        Interval::OneDay => "1d",
        Interval::ThreeDays => "3d",
        Interval::OneWeek => "1w",
        Interval::OneMonth => "1M",
    }
}

/// Stream name for a subscription on an already-resolved symbol
fn stream_name(subscription: &Subscription, symbol: &str) -> Result<String, ExchangeError> {
    let symbol = symbol.to_lowercase();
    match subscription {
        Subscription::OrderBook { depth: None, .. } => Ok(format!("{}@depth@100ms", symbol)),
        Subscription::OrderBook {
            depth: Some(depth), ..
        } => {
            if !PARTIAL_DEPTHS.contains(depth) {
                return Err(ExchangeError::InvalidRequest(format!(
                    "Binance partial book depth must be one of {:?}, got {}",
                    PARTIAL_DEPTHS, depth
                )));
            }
            Ok(format!("{}@depth{}@100ms", symbol, depth))
        }
        Subscription::Trades { .. } => Ok(format!("{}@trade", symbol)),
    }
}

/// Time window and limit as query params; `after` goes out as `cursor` when
/// the endpoint has one.
fn push_paginator(
    params: &mut Vec<(&'static str, String)>,
    paginator: Option<&Paginator>,
    cursor: Option<&'static str>,
) {
    let Some(paginator) = paginator else {
        return;
    };
    if let Some(start) = paginator.start_time {
        params.push(("startTime", start.timestamp_millis().to_string()));
    }
    if let Some(end) = paginator.end_time {
        params.push(("endTime", end.timestamp_millis().to_string()));
    }
    if let Some(limit) = paginator.limit {
        params.push(("limit", limit.min(MAX_LIMIT).to_string()));
    }
    if let (Some(cursor), Some(after)) = (cursor, &paginator.after) {
        params.push((cursor, after.clone()));
    }
}

fn require_market<'a>(market: Option<&'a String>, operation: &str) -> Result<&'a str, ExchangeError> {
    market.map(String::as_str).ok_or_else(|| {
        ExchangeError::InvalidRequest(format!("Binance {} requires a market", operation))
    })
}

/// Binance exchange implementation
pub struct BinanceExchange {
    ws_url: String,
    api_url: String,
    client: reqwest::Client,
    credentials: Option<BinanceCredentials>,
    events: Arc<dyn EventHandler>,
    decoder: Arc<BinanceDecoder>,
    session: Mutex<Option<StreamSession>>,
    names: MarketNames,
    next_request_id: AtomicU64,
}

impl BinanceExchange {
    /// Create a new Binance exchange instance
    pub fn new(config: &BinanceConfig, events: Arc<dyn EventHandler>) -> Result<Self, ExchangeError> {
        let (ws_url, api_url) = if config.sandbox {
            (BINANCE_TESTNET_WS_URL, BINANCE_TESTNET_API_URL)
        } else {
            (BINANCE_WS_URL, BINANCE_API_URL)
        };
        Self::with_urls(config, events, ws_url, api_url)
    }

    /// Point the transport at other endpoints (local mocks, proxies)
    pub fn with_urls(
        config: &BinanceConfig,
        events: Arc<dyn EventHandler>,
        ws_url: &str,
        api_url: &str,
    ) -> Result<Self, ExchangeError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ExchangeError::Connection(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            ws_url: ws_url.to_string(),
            api_url: api_url.to_string(),
            client,
            credentials: config.credentials.clone(),
            events,
            decoder: Arc::new(BinanceDecoder::default()),
            session: Mutex::new(None),
            names: MarketNames::new(),
            next_request_id: AtomicU64::new(1),
        })
    }

    fn credentials(&self) -> Result<&BinanceCredentials, ExchangeError> {
        self.credentials.as_ref().ok_or_else(|| {
            ExchangeError::Configuration(
                "Binance credentials are required for account endpoints".to_string(),
            )
        })
    }

    /// Resolve a caller market and remember it for inbound data
    fn symbol(&self, market: &str) -> Result<String, ExchangeError> {
        let symbol = binance_symbol(market)?;
        self.names.remember(&symbol, market);
        Ok(symbol)
    }

    async fn read_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ExchangeError> {
        let status = response.status();
        let body = response.text().await.map_err(from_reqwest)?;

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<BinanceErrorBody>(&body) {
                if status.is_client_error() {
                    return Err(ExchangeError::Application(format!(
                        "{} (code {})",
                        error.msg, error.code
                    )));
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
        let url = format!("{}{}", self.api_url, path);
        debug!("GET {} {:?}", url, params);

        let response = self
            .client
            .get(&url)
            .query(params)
            .send()
            .await
            .map_err(from_reqwest)?;

        Self::read_response(response).await
    }

    async fn signed_request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: Vec<(&str, String)>,
    ) -> Result<T, ExchangeError> {
        let credentials = self.credentials()?;

        let query = signed_query(&params, Utc::now().timestamp_millis());

        let signature = sign_binance(&credentials.api_secret, &query)?;
        let url = format!("{}{}?{}&signature={}", self.api_url, path, query, signature);
        debug!("{} {}{}", method, self.api_url, path);

        let response = self
            .client
            .request(method, &url)
            .header("X-MBX-APIKEY", &credentials.api_key)
            .send()
            .await
            .map_err(from_reqwest)?;

        Self::read_response(response).await
    }

    async fn place_order(
        &self,
        side: Side,
        market: &str,
        order_params: Vec<(&'static str, String)>,
    ) -> Result<Order, ExchangeError> {
        let side_code = match side {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        };
        let mut params = vec![("symbol", self.symbol(market)?), ("side", side_code.to_string())];
        params.extend(order_params);

        let order: BinanceOrder = self
            .signed_request(Method::POST, "/api/v3/order", params)
            .await?;

        info!("Placed {} order {} on {}", side, order.order_id, market);
        convert_order(order, market)
    }

    /// Make sure a socket is up and ask for `stream` on it
    async fn request_stream(&self, stream: String) -> Result<(), ExchangeError> {
        let mut guard = self.session.lock().await;

        let streams = match guard.as_ref() {
            Some(session) if session.is_open() => vec![stream],
            _ => {
                info!("Connecting to Binance WebSocket at {}", self.ws_url);
                let decoder: Arc<dyn FrameDecoder> = self.decoder.clone();
                let session =
                    StreamSession::connect(&self.ws_url, decoder, Arc::clone(&self.events)).await?;
                *guard = Some(session);
                // a fresh socket carries none of the earlier streams
                self.decoder.streams()
            }
        };

        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let frame = serde_json::to_string(&BinanceSubscribeMessage::new(streams, id))
            .map_err(from_json)?;

        match guard.as_ref() {
            Some(session) => session.send(frame),
            None => Err(ExchangeError::Connection(
                "Binance WebSocket is not connected".to_string(),
            )),
        }
    }
}

#[async_trait]
impl Transport for BinanceExchange {
    fn venue(&self) -> Venue {
        Venue::Binance
    }

    async fn place_limit_order(&self, side: Side, req: &LimitRequest) -> Result<Order, ExchangeError> {
        let mut params = Vec::new();
        if req.post_only {
            params.push(("type", "LIMIT_MAKER".to_string()));
        } else {
            let tif = match req.time_in_force {
                TimeInForce::GoodTillCancelled => "GTC",
                TimeInForce::ImmediateOrCancel => "IOC",
                TimeInForce::FillOrKill => "FOK",
                TimeInForce::GoodTillTime(_) => {
                    return Err(ExchangeError::Unsupported(
                        "Binance spot does not support good-till-time orders".to_string(),
                    ))
                }
            };
            params.push(("type", "LIMIT".to_string()));
            params.push(("timeInForce", tif.to_string()));
        }
        params.push(("quantity", req.size.to_string()));
        params.push(("price", req.price.to_string()));
        if let Some(id) = &req.client_order_id {
            params.push(("newClientOrderId", id.clone()));
        }

        self.place_order(side, &req.market, params).await
    }

    async fn place_market_order(&self, side: Side, req: &MarketRequest) -> Result<Order, ExchangeError> {
        let mut params = vec![
            ("type", "MARKET".to_string()),
            ("quantity", req.size.to_string()),
        ];
        if let Some(id) = &req.client_order_id {
            params.push(("newClientOrderId", id.clone()));
        }

        self.place_order(side, &req.market, params).await
    }

    async fn cancel_order(&self, req: &CancelOrderRequest) -> Result<OrderCanceled, ExchangeError> {
        let market = require_market(req.market.as_ref(), "cancel order")?;
        let params = vec![("symbol", self.symbol(market)?), ("orderId", req.id.clone())];

        let canceled: BinanceCanceledOrder = self
            .signed_request(Method::DELETE, "/api/v3/order", params)
            .await?;

        Ok(OrderCanceled {
            id: canceled.order_id.to_string(),
        })
    }

    async fn cancel_all_orders(
        &self,
        req: &CancelAllOrdersRequest,
    ) -> Result<Vec<OrderCanceled>, ExchangeError> {
        let market = require_market(req.market.as_ref(), "cancel all orders")?;
        let params = vec![("symbol", self.symbol(market)?)];

        let canceled: Vec<BinanceCanceledOrder> = self
            .signed_request(Method::DELETE, "/api/v3/openOrders", params)
            .await?;

        info!("Canceled {} orders on {}", canceled.len(), market);
        Ok(canceled
            .into_iter()
            .map(|c| OrderCanceled {
                id: c.order_id.to_string(),
            })
            .collect())
    }

    async fn get_order(&self, req: &GetOrderRequest) -> Result<Order, ExchangeError> {
        let market = require_market(req.market.as_ref(), "order lookup")?;
        let params = vec![("symbol", self.symbol(market)?), ("orderId", req.id.clone())];

        let order: BinanceOrder = self
            .signed_request(Method::GET, "/api/v3/order", params)
            .await?;
        convert_order(order, market)
    }

    async fn get_order_history(&self, req: &GetOrderHistoryRequest) -> Result<Vec<Order>, ExchangeError> {
        let market = require_market(req.market.as_ref(), "order history")?;
        let mut params = vec![("symbol", self.symbol(market)?)];
        push_paginator(&mut params, req.paginator.as_ref(), Some("orderId"));

        let orders: Vec<BinanceOrder> = self
            .signed_request(Method::GET, "/api/v3/allOrders", params)
            .await?;
        orders.into_iter().map(|o| convert_order(o, market)).collect()
    }

    async fn get_all_open_orders(&self) -> Result<Vec<Order>, ExchangeError> {
        let orders: Vec<BinanceOrder> = self
            .signed_request(Method::GET, "/api/v3/openOrders", Vec::new())
            .await?;

        // symbols never requested through this transport have no caller
        // spelling yet; exchange info supplies the `base_quote` form
        if has_unknown_symbol(&self.names, orders.iter().map(|o| o.symbol.as_str())) {
            debug!("Resolving open order symbols through exchange info");
            if let Err(e) = self.retrieve_pairs().await {
                warn!("Could not load exchange info, keeping venue symbols: {}", e);
            }
        }

        orders
            .into_iter()
            .map(|o| {
                let market = self.names.market_for(&o.symbol);
                convert_order(o, &market)
            })
            .collect()
    }

    async fn get_trade_history(&self, req: &TradeHistoryRequest) -> Result<Vec<Trade>, ExchangeError> {
        let market = require_market(req.market.as_ref(), "trade history")?;
        let mut params = vec![("symbol", self.symbol(market)?)];
        if let Some(order_id) = &req.order_id {
            params.push(("orderId", order_id.clone()));
        }
        push_paginator(&mut params, req.paginator.as_ref(), Some("fromId"));

        let trades: Vec<BinanceAccountTrade> = self
            .signed_request(Method::GET, "/api/v3/myTrades", params)
            .await?;
        trades
            .into_iter()
            .map(|t| convert_account_trade(t, market))
            .collect()
    }

    async fn get_account_balances(&self, _paginator: Option<&Paginator>) -> Result<Vec<Balance>, ExchangeError> {
        // the account endpoint is not paginated
        let account: BinanceAccount = self
            .signed_request(Method::GET, "/api/v3/account", Vec::new())
            .await?;

        account
            .balances
            .into_iter()
            .map(|b| {
                let free = parse_decimal("free", &b.free)?;
                let locked = parse_decimal("locked", &b.locked)?;
                Ok(Balance {
                    asset: b.asset,
                    total: free + locked,
                    free,
                })
            })
            .collect()
    }

    async fn order_book(&self, req: &OrderBookRequest) -> Result<OrderBookResponse, ExchangeError> {
        let params = [("symbol", self.symbol(&req.market)?), ("limit", "100".to_string())];
        let snapshot: BinanceDepthSnapshot = self.public_get("/api/v3/depth", &params).await?;
        convert_snapshot(snapshot, &req.market)
    }

    async fn get_price_ticker(&self, req: &GetPriceTickerRequest) -> Result<Ticker, ExchangeError> {
        let params = [("symbol", self.symbol(&req.market)?)];
        let ticker: BinanceTickerPrice = self.public_get("/api/v3/ticker/price", &params).await?;
        debug!("Ticker for {}: {}", ticker.symbol, ticker.price);

        Ok(Ticker {
            price: Some(parse_decimal("price", &ticker.price)?),
        })
    }

    async fn get_historic_rates(&self, req: &GetHistoricRatesRequest) -> Result<Vec<Candle>, ExchangeError> {
        let mut params = vec![
            ("symbol", self.symbol(&req.market)?),
            ("interval", interval_code(req.interval).to_string()),
        ];
        push_paginator(&mut params, req.paginator.as_ref(), None);

        let rows: Vec<Vec<serde_json::Value>> = self.public_get("/api/v3/klines", &params).await?;
        rows.iter().map(|row| convert_kline(row)).collect()
    }

    async fn get_historic_trades(&self, req: &GetHistoricTradesRequest) -> Result<Vec<Trade>, ExchangeError> {
        let mut params = vec![("symbol", self.symbol(&req.market)?)];
        push_paginator(&mut params, req.paginator.as_ref(), Some("fromId"));

        info!("Fetching historical trades for market: {}", req.market);
        let trades: Vec<BinanceAggTrade> = self.public_get("/api/v3/aggTrades", &params).await?;

        let mut converted = Vec::with_capacity(trades.len());
        for trade in trades {
            let msg = BinanceTradeMessage {
                symbol: String::new(),
                trade_id: trade.id,
                price: trade.price,
                quantity: trade.quantity,
                buyer_order_id: None,
                seller_order_id: None,
                trade_time: trade.time,
                is_buyer_maker: trade.is_buyer_maker,
            };
            converted.push(convert_trade_message(msg, &req.market)?);
        }

        info!(
            "Successfully fetched {} historical trades for {}",
            converted.len(),
            req.market
        );
        Ok(converted)
    }

    async fn retrieve_pairs(&self) -> Result<Vec<MarketPair>, ExchangeError> {
        let info: BinanceExchangeInfo = self.public_get("/api/v3/exchangeInfo", &[]).await?;

        let mut pairs = Vec::with_capacity(info.symbols.len());
        for symbol in info.symbols.into_iter().filter(|s| s.status == "TRADING") {
            let mut pair = MarketPair {
                base: symbol.base_asset,
                quote: symbol.quote_asset,
                symbol: symbol.symbol,
                base_increment: Decimal::ZERO,
                quote_increment: Decimal::ZERO,
                min_base_size: None,
                min_quote_size: None,
            };
            for filter in symbol.filters {
                match filter {
                    BinanceFilter::Price { tick_size } => {
                        pair.quote_increment = parse_decimal("tickSize", &tick_size)?;
                    }
                    BinanceFilter::LotSize { step_size, min_qty } => {
                        pair.base_increment = parse_decimal("stepSize", &step_size)?;
                        pair.min_base_size = Some(parse_decimal("minQty", &min_qty)?);
                    }
                    BinanceFilter::Notional { min_notional }
                    | BinanceFilter::MinNotional { min_notional } => {
                        pair.min_quote_size = Some(parse_decimal("minNotional", &min_notional)?);
                    }
                    BinanceFilter::Other => {}
                }
            }
            self.names.remember(&pair.symbol, &pair.market());
            pairs.push(pair);
        }

        info!("Retrieved {} Binance market pairs", pairs.len());
        Ok(pairs)
    }

    async fn subscribe(&self, subscription: Subscription) -> Result<(), ExchangeError> {
        let market = subscription.market();
        let symbol = self.symbol(market)?;
        let stream = stream_name(&subscription, &symbol)?;

        info!("Subscribing to Binance stream {} for {}", stream, market);
        self.decoder.route(&stream, market);
        self.request_stream(stream).await
    }

    async fn disconnect(&self) {
        if let Some(session) = self.session.lock().await.take() {
            info!("Closing Binance WebSocket");
            session.close().await;
        }
    }
}
