use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::types::{Interval, Paginator, TimeInForce};
use crate::error::{ExchangeError, Result};

fn require_market(market: &str) -> Result<()> {
    if market.trim().is_empty() {
        return Err(ExchangeError::InvalidRequest(
            "market cannot be empty".to_string(),
        ));
    }
    Ok(())
}

fn require_positive(field: &str, value: Decimal) -> Result<()> {
    if value <= Decimal::ZERO {
        return Err(ExchangeError::InvalidRequest(format!(
            "{} must be positive, got {}",
            field, value
        )));
    }
    Ok(())
}

/// Limit order parameters; the side is chosen by the call (buy or sell)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitRequest {
    pub price: Decimal,
    pub size: Decimal,
    pub market: String,
    pub time_in_force: TimeInForce,
    pub post_only: bool,
    pub client_order_id: Option<String>,
}

impl LimitRequest {
    pub fn new(price: Decimal, size: Decimal, market: impl Into<String>) -> Self {
        Self {
            price,
            size,
            market: market.into(),
            time_in_force: TimeInForce::default(),
            post_only: false,
            client_order_id: None,
        }
    }

    pub fn with_time_in_force(mut self, time_in_force: TimeInForce) -> Self {
        self.time_in_force = time_in_force;
        self
    }

    pub fn post_only(mut self) -> Self {
        self.post_only = true;
        self
    }

    pub fn with_client_order_id(mut self, id: impl Into<String>) -> Self {
        self.client_order_id = Some(id.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        require_market(&self.market)?;
        require_positive("price", self.price)?;
        require_positive("size", self.size)?;
        self.time_in_force.validate()?;
        if self.post_only
            && matches!(
                self.time_in_force,
                TimeInForce::ImmediateOrCancel | TimeInForce::FillOrKill
            )
        {
            return Err(ExchangeError::InvalidRequest(
                "post-only orders cannot be immediate-or-cancel or fill-or-kill".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketRequest {
    pub size: Decimal,
    pub market: String,
    pub client_order_id: Option<String>,
}

impl MarketRequest {
    pub fn new(size: Decimal, market: impl Into<String>) -> Self {
        Self {
            size,
            market: market.into(),
            client_order_id: None,
        }
    }

    pub fn with_client_order_id(mut self, id: impl Into<String>) -> Self {
        self.client_order_id = Some(id.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        require_market(&self.market)?;
        require_positive("size", self.size)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOrderRequest {
    pub id: String,
    /// Required by venues that key orders per market (Binance)
    pub market: Option<String>,
}

impl CancelOrderRequest {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            market: None,
        }
    }

    pub fn for_market(id: impl Into<String>, market: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            market: Some(market.into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelAllOrdersRequest {
    /// None cancels across every market where the venue allows it
    pub market: Option<String>,
}

impl CancelAllOrdersRequest {
    pub fn new(market: impl Into<String>) -> Self {
        Self {
            market: Some(market.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetOrderRequest {
    pub id: String,
    pub market: Option<String>,
}

impl GetOrderRequest {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            market: None,
        }
    }

    pub fn for_market(id: impl Into<String>, market: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            market: Some(market.into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetOrderHistoryRequest {
    pub market: Option<String>,
    pub paginator: Option<Paginator>,
}

impl GetOrderHistoryRequest {
    pub fn new(market: impl Into<String>) -> Self {
        Self {
            market: Some(market.into()),
            paginator: None,
        }
    }

    pub fn with_paginator(mut self, paginator: Paginator) -> Self {
        self.paginator = Some(paginator);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeHistoryRequest {
    pub market: Option<String>,
    pub order_id: Option<String>,
    pub paginator: Option<Paginator>,
}

impl TradeHistoryRequest {
    pub fn new(market: impl Into<String>) -> Self {
        Self {
            market: Some(market.into()),
            ..Self::default()
        }
    }

    pub fn with_order_id(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = Some(order_id.into());
        self
    }

    pub fn with_paginator(mut self, paginator: Paginator) -> Self {
        self.paginator = Some(paginator);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetHistoricRatesRequest {
    pub market: String,
    pub interval: Interval,
    pub paginator: Option<Paginator>,
}

impl GetHistoricRatesRequest {
    pub fn new(market: impl Into<String>, interval: Interval) -> Self {
        Self {
            market: market.into(),
            interval,
            paginator: None,
        }
    }

    pub fn with_paginator(mut self, paginator: Paginator) -> Self {
        self.paginator = Some(paginator);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetHistoricTradesRequest {
    pub market: String,
    pub paginator: Option<Paginator>,
}

impl GetHistoricTradesRequest {
    pub fn new(market: impl Into<String>) -> Self {
        Self {
            market: market.into(),
            paginator: None,
        }
    }

    pub fn with_paginator(mut self, paginator: Paginator) -> Self {
        self.paginator = Some(paginator);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetPriceTickerRequest {
    pub market: String,
}

impl GetPriceTickerRequest {
    pub fn new(market: impl Into<String>) -> Self {
        Self {
            market: market.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookRequest {
    pub market: String,
}

impl OrderBookRequest {
    pub fn new(market: impl Into<String>) -> Self {
        Self {
            market: market.into(),
        }
    }
}

/// Live channel request sent to the transport
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Subscription {
    OrderBook { market: String, depth: Option<usize> },
    Trades { market: String },
}

impl Subscription {
    pub fn orderbook(market: impl Into<String>) -> Self {
        Subscription::OrderBook {
            market: market.into(),
            depth: None,
        }
    }

    pub fn orderbook_depth(market: impl Into<String>, depth: usize) -> Self {
        Subscription::OrderBook {
            market: market.into(),
            depth: Some(depth),
        }
    }

    pub fn trades(market: impl Into<String>) -> Self {
        Subscription::Trades {
            market: market.into(),
        }
    }

    pub fn market(&self) -> &str {
        match self {
            Subscription::OrderBook { market, .. } | Subscription::Trades { market } => market,
        }
    }
}
