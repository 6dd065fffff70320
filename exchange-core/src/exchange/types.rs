// =================================================================
// exchange/types.rs - Venue wire formats
// =================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// -----------------------------------------------------------------
// Binance
// -----------------------------------------------------------------

/// Binance specific trade message format
#[derive(Debug, Deserialize, Clone)]
pub struct BinanceTradeMessage {
    /// Symbol
    #[serde(rename = "s")]
    pub symbol: String,

    /// Trade ID
    #[serde(rename = "t")]
    pub trade_id: u64,

    /// Price
    #[serde(rename = "p")]
    pub price: String,

    /// Quantity
    #[serde(rename = "q")]
    pub quantity: String,

    /// Buyer order ID (dropped from newer stream payloads)
    #[serde(rename = "b", default)]
    pub buyer_order_id: Option<u64>,

    /// Seller order ID (dropped from newer stream payloads)
    #[serde(rename = "a", default)]
    pub seller_order_id: Option<u64>,

    /// Trade time
    #[serde(rename = "T")]
    pub trade_time: u64,

    /// Is the buyer the market maker?
    #[serde(rename = "m")]
    pub is_buyer_maker: bool,
}

/// Diff. depth stream event
#[derive(Debug, Deserialize, Clone)]
pub struct BinanceDepthUpdate {
    #[serde(rename = "s")]
    pub symbol: String,

    /// First update ID in event
    #[serde(rename = "U")]
    pub first_update_id: u64,

    /// Final update ID in event
    #[serde(rename = "u")]
    pub final_update_id: u64,

    #[serde(rename = "b")]
    pub bids: Vec<Vec<String>>,

    #[serde(rename = "a")]
    pub asks: Vec<Vec<String>>,
}

/// REST depth snapshot, also the payload of partial depth streams
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct BinanceDepthSnapshot {
    pub last_update_id: u64,
    pub bids: Vec<Vec<String>>,
    pub asks: Vec<Vec<String>>,
}

/// Binance WebSocket stream wrapper for combined streams
#[derive(Debug, Deserialize)]
pub struct BinanceStreamMessage {
    /// Stream name (e.g., "btcusdt@trade")
    pub stream: String,

    /// The event payload, decoded once the stream kind is known
    pub data: serde_json::Value,
}

/// Binance subscription message format
#[derive(Debug, Serialize)]
pub struct BinanceSubscribeMessage {
    pub method: String,
    pub params: Vec<String>,
    pub id: u64,
}

impl BinanceSubscribeMessage {
    pub fn new(streams: Vec<String>, id: u64) -> Self {
        Self {
            method: "SUBSCRIBE".to_string(),
            params: streams,
            id,
        }
    }
}

/// Error body returned with 4xx responses
#[derive(Debug, Deserialize)]
pub struct BinanceErrorBody {
    pub code: i64,
    pub msg: String,
}

#[derive(Debug, Deserialize)]
pub struct BinanceTickerPrice {
    pub symbol: String,
    pub price: String,
}

/// Aggregate trade from `/api/v3/aggTrades`
#[derive(Debug, Deserialize)]
pub struct BinanceAggTrade {
    #[serde(rename = "a")]
    pub id: u64,
    #[serde(rename = "p")]
    pub price: String,
    #[serde(rename = "q")]
    pub quantity: String,
    #[serde(rename = "T")]
    pub time: u64,
    #[serde(rename = "m")]
    pub is_buyer_maker: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinanceOrder {
    pub symbol: String,
    pub order_id: u64,
    #[serde(default)]
    pub client_order_id: Option<String>,
    pub price: String,
    pub orig_qty: String,
    pub status: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub side: String,
    /// Present on queries
    #[serde(default)]
    pub time: Option<u64>,
    /// Present on placement
    #[serde(default)]
    pub transact_time: Option<u64>,
}

/// Cancel response; only the id is used
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinanceCanceledOrder {
    pub order_id: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinanceAccountTrade {
    pub symbol: String,
    pub id: u64,
    pub order_id: u64,
    pub price: String,
    pub qty: String,
    pub commission: String,
    pub time: u64,
    pub is_buyer: bool,
    pub is_maker: bool,
}

#[derive(Debug, Deserialize)]
pub struct BinanceBalance {
    pub asset: String,
    pub free: String,
    pub locked: String,
}

#[derive(Debug, Deserialize)]
pub struct BinanceAccount {
    pub balances: Vec<BinanceBalance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinanceExchangeInfo {
    pub symbols: Vec<BinanceSymbolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinanceSymbolInfo {
    pub symbol: String,
    pub status: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub filters: Vec<BinanceFilter>,
}

/// Symbol filters; only the ones feeding `MarketPair` are decoded
#[derive(Debug, Deserialize)]
#[serde(tag = "filterType")]
pub enum BinanceFilter {
    #[serde(rename = "PRICE_FILTER", rename_all = "camelCase")]
    Price { tick_size: String },
    #[serde(rename = "LOT_SIZE", rename_all = "camelCase")]
    LotSize { step_size: String, min_qty: String },
    #[serde(rename = "NOTIONAL", rename_all = "camelCase")]
    Notional { min_notional: String },
    #[serde(rename = "MIN_NOTIONAL", rename_all = "camelCase")]
    MinNotional { min_notional: String },
    #[serde(other)]
    Other,
}

// -----------------------------------------------------------------
// Coinbase
// -----------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CoinbaseProduct {
    pub id: String,
    pub base_currency: String,
    pub quote_currency: String,
    pub base_increment: String,
    pub quote_increment: String,
    #[serde(default)]
    pub base_min_size: Option<String>,
    #[serde(default)]
    pub min_market_funds: Option<String>,
}

/// Level 2 book; levels are `[price, size, num_orders]`
#[derive(Debug, Deserialize)]
pub struct CoinbaseBook {
    pub sequence: u64,
    pub bids: Vec<(String, String, serde_json::Value)>,
    pub asks: Vec<(String, String, serde_json::Value)>,
}

#[derive(Debug, Deserialize)]
pub struct CoinbaseTicker {
    #[serde(default)]
    pub price: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CoinbaseTrade {
    pub trade_id: u64,
    pub price: String,
    pub size: String,
    /// Maker side
    pub side: String,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CoinbaseOrder {
    pub id: String,
    pub product_id: String,
    pub side: String,
    #[serde(rename = "type")]
    pub order_type: String,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub funds: Option<String>,
    pub status: String,
    #[serde(default)]
    pub done_reason: Option<String>,
    #[serde(default)]
    pub client_oid: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CoinbaseFill {
    pub trade_id: u64,
    pub product_id: String,
    pub order_id: String,
    pub price: String,
    pub size: String,
    pub fee: String,
    /// Our order's side
    pub side: String,
    /// "M" maker, "T" taker
    pub liquidity: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CoinbaseAccount {
    pub currency: String,
    pub balance: String,
    pub available: String,
}

#[derive(Debug, Serialize)]
pub struct CoinbaseOrderBody {
    #[serde(rename = "type")]
    pub order_type: &'static str,
    pub side: &'static str,
    pub product_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    pub size: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_in_force: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_after: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_only: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_oid: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CoinbaseErrorBody {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct CoinbaseSubscribeMessage {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub product_ids: Vec<String>,
    pub channels: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// Feed messages this client cares about, tagged by `type`
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoinbaseFeedMessage {
    Snapshot {
        product_id: String,
        bids: Vec<Vec<String>>,
        asks: Vec<Vec<String>>,
    },
    L2update {
        product_id: String,
        /// `[side, price, size]`
        changes: Vec<Vec<String>>,
    },
    #[serde(alias = "last_match")]
    Match {
        trade_id: u64,
        sequence: u64,
        maker_order_id: String,
        taker_order_id: String,
        time: DateTime<Utc>,
        product_id: String,
        size: String,
        price: String,
        side: String,
    },
    Heartbeat {},
    Subscriptions {},
    Error {
        message: String,
        #[serde(default)]
        reason: Option<String>,
    },
    #[serde(other)]
    Other,
}
