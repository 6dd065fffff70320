use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{ExchangeError, Result};

/// Trade or order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "Buy"),
            Side::Sell => write!(f, "Sell"),
        }
    }
}

/// Whether our side of a fill added or removed liquidity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Liquidity {
    Maker,
    Taker,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Limit,
    Market,
    StopLimit,
    StopMarket,
    /// Venue-specific type with no common counterpart
    Other(String),
}

/// Venue-reported order state. Transitions are not validated here; this is a
/// projection of whatever the venue last said.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    Open,
    PartiallyFilled,
    Filled,
    Canceled,
    PendingCancel,
    Rejected,
    Expired,
    Other(String),
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired
        )
    }
}

/// Order lifetime policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    GoodTillCancelled,
    ImmediateOrCancel,
    FillOrKill,
    GoodTillTime(Duration),
}

impl TimeInForce {
    /// Good-till-time with a strictly positive lifetime
    pub fn good_till_time(duration: Duration) -> Result<Self> {
        let tif = TimeInForce::GoodTillTime(duration);
        tif.validate()?;
        Ok(tif)
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            TimeInForce::GoodTillTime(duration) if duration.is_zero() => Err(
                ExchangeError::InvalidRequest("good-till-time requires a positive duration".into()),
            ),
            _ => Ok(()),
        }
    }
}

impl Default for TimeInForce {
    fn default() -> Self {
        TimeInForce::GoodTillCancelled
    }
}

/// Candle width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    OneMinute,
    ThreeMinutes,
    FiveMinutes,
    FifteenMinutes,
    ThirtyMinutes,
    OneHour,
    TwoHours,
    FourHours,
    SixHours,
    EightHours,
    TwelveHours,
    OneDay,
    ThreeDays,
    OneWeek,
    OneMonth,
}

impl Interval {
    /// Width in seconds; a month counts as 30 days
    pub fn as_secs(&self) -> u64 {
        const MINUTE: u64 = 60;
        const HOUR: u64 = 60 * MINUTE;
        const DAY: u64 = 24 * HOUR;
        match self {
            Interval::OneMinute => MINUTE,
            Interval::ThreeMinutes => 3 * MINUTE,
            Interval::FiveMinutes => 5 * MINUTE,
            Interval::FifteenMinutes => 15 * MINUTE,
            Interval::ThirtyMinutes => 30 * MINUTE,
            Interval::OneHour => HOUR,
            Interval::TwoHours => 2 * HOUR,
            Interval::FourHours => 4 * HOUR,
            Interval::SixHours => 6 * HOUR,
            Interval::EightHours => 8 * HOUR,
            Interval::TwelveHours => 12 * HOUR,
            Interval::OneDay => DAY,
            Interval::ThreeDays => 3 * DAY,
            Interval::OneWeek => 7 * DAY,
            Interval::OneMonth => 30 * DAY,
        }
    }
}

impl FromStr for Interval {
    type Err = ExchangeError;

    fn from_str(s: &str) -> Result<Self> {
        let interval = match s {
            "OneMinute" => Interval::OneMinute,
            "ThreeMinutes" => Interval::ThreeMinutes,
            "FiveMinutes" => Interval::FiveMinutes,
            "FifteenMinutes" => Interval::FifteenMinutes,
            "ThirtyMinutes" => Interval::ThirtyMinutes,
            "OneHour" => Interval::OneHour,
            "TwoHours" => Interval::TwoHours,
            "FourHours" => Interval::FourHours,
            "SixHours" => Interval::SixHours,
            "EightHours" => Interval::EightHours,
            "TwelveHours" => Interval::TwelveHours,
            "OneDay" => Interval::OneDay,
            "ThreeDays" => Interval::ThreeDays,
            "OneWeek" => Interval::OneWeek,
            "OneMonth" => Interval::OneMonth,
            other => {
                return Err(ExchangeError::InvalidRequest(format!(
                    "Invalid interval string {}",
                    other
                )))
            }
        };
        Ok(interval)
    }
}

/// History query window. Every field is optional; absent means venue default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paginator {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub limit: Option<u64>,
    /// Opaque venue cursor
    pub before: Option<String>,
    /// Opaque venue cursor
    pub after: Option<String>,
}

impl Paginator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_time_range(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start_time = Some(start);
        self.end_time = Some(end);
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_before(mut self, cursor: impl Into<String>) -> Self {
        self.before = Some(cursor.into());
        self
    }

    pub fn with_after(mut self, cursor: impl Into<String>) -> Self {
        self.after = Some(cursor.into());
        self
    }
}

/// Tradeable market reference data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketPair {
    pub base: String,
    pub quote: String,
    /// Venue symbol, e.g. "BTCUSDC" or "BTC-USD"
    pub symbol: String,
    /// Size granularity
    pub base_increment: Decimal,
    /// Price granularity
    pub quote_increment: Decimal,
    pub min_base_size: Option<Decimal>,
    pub min_quote_size: Option<Decimal>,
}

impl MarketPair {
    /// Common market key in `base_quote` form
    pub fn market(&self) -> String {
        format!("{}_{}", self.base.to_lowercase(), self.quote.to_lowercase())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub market: String,
    pub client_order_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub order_type: OrderType,
    pub side: Side,
    pub status: OrderStatus,
    pub size: Decimal,
    /// None for market orders
    pub price: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCanceled {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub buyer_order_id: Option<String>,
    pub seller_order_id: Option<String>,
    pub market: String,
    pub price: Decimal,
    pub qty: Decimal,
    pub fees: Option<Decimal>,
    pub side: Side,
    pub liquidity: Option<Liquidity>,
    pub created_at: DateTime<Utc>,
}

/// A batch of trades for one market, as delivered to trade subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradesResponse {
    pub market: String,
    pub trades: Vec<Trade>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub asset: String,
    pub total: Decimal,
    pub free: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    /// Open time of the bucket
    pub time: DateTime<Utc>,
    pub low: Decimal,
    pub high: Decimal,
    pub open: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticker {
    /// Last traded price, if the market has traded at all
    pub price: Option<Decimal>,
}

/// One price level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AskBid {
    pub price: Decimal,
    pub qty: Decimal,
}

impl AskBid {
    pub fn new(price: Decimal, qty: Decimal) -> Self {
        Self { price, qty }
    }
}

/// Orderbook snapshot or delta, forwarded as the venue sent it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookResponse {
    pub market: String,
    pub asks: Vec<AskBid>,
    pub bids: Vec<AskBid>,
    /// Last update id covered by this message; non-decreasing per market
    pub last_update_id: Option<u64>,
    /// First update id covered by this delta, when the venue reports one
    pub update_id: Option<u64>,
}

impl OrderBookResponse {
    pub fn new(market: impl Into<String>) -> Self {
        Self {
            market: market.into(),
            asks: Vec::new(),
            bids: Vec::new(),
            last_update_id: None,
            update_id: None,
        }
    }

    /// True when `next` does not continue directly from this message.
    /// Unknown when either side lacks ids, which reports no gap.
    pub fn has_gap_before(&self, next: &OrderBookResponse) -> bool {
        match (self.last_update_id, next.update_id) {
            (Some(last), Some(first)) => first > last + 1,
            _ => false,
        }
    }
}
