// =================================================================
// exchange/utils.rs - Utility Functions
// =================================================================

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use exchange_common::data::AskBid;
use exchange_common::ExchangeError;
use parking_lot::RwLock;
use rust_decimal::Decimal;

/// Split a common market key (`btc_usdc`) into lowercase base and quote.
/// `-` and `/` are accepted as separators too.
pub fn split_market(market: &str) -> Result<(String, String), ExchangeError> {
    let market = market.trim();
    if market.is_empty() {
        return Err(ExchangeError::InvalidRequest(
            "Market cannot be empty".to_string(),
        ));
    }

    let mut parts = market.split(|c| c == '_' || c == '-' || c == '/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(base), Some(quote), None) if !base.is_empty() && !quote.is_empty() => {
            if !base.chars().chain(quote.chars()).all(char::is_alphanumeric) {
                return Err(ExchangeError::InvalidRequest(format!(
                    "Market '{}' contains invalid characters",
                    market
                )));
            }
            Ok((base.to_lowercase(), quote.to_lowercase()))
        }
        _ => Err(ExchangeError::InvalidRequest(format!(
            "Market '{}' is not in base_quote form",
            market
        ))),
    }
}

/// Binance symbol for a market: `btc_usdc` -> `BTCUSDC`. A bare symbol is
/// accepted as-is after validation.
pub fn binance_symbol(market: &str) -> Result<String, ExchangeError> {
    let symbol = match split_market(market) {
        Ok((base, quote)) => format!("{}{}", base, quote).to_uppercase(),
        Err(_) => market.trim().to_uppercase(),
    };

    if symbol.is_empty() {
        return Err(ExchangeError::InvalidRequest(
            "Symbol cannot be empty".to_string(),
        ));
    }

    if !symbol.chars().all(char::is_alphanumeric) {
        return Err(ExchangeError::InvalidRequest(format!(
            "Symbol '{}' contains invalid characters",
            symbol
        )));
    }

    if symbol.len() < 3 || symbol.len() > 20 {
        return Err(ExchangeError::InvalidRequest(format!(
            "Symbol '{}' has invalid length",
            symbol
        )));
    }

    Ok(symbol)
}

/// Coinbase product id for a market: `btc_usd` -> `BTC-USD`
pub fn coinbase_product(market: &str) -> Result<String, ExchangeError> {
    let (base, quote) = split_market(market)?;
    Ok(format!("{}-{}", base, quote).to_uppercase())
}

pub fn parse_decimal(field: &str, value: &str) -> Result<Decimal, ExchangeError> {
    Decimal::from_str(value).map_err(|e| {
        ExchangeError::Transport(format!("Invalid {} '{}': {}", field, value, e))
    })
}

/// Decimal from a JSON number or numeric string
pub fn decimal_from_json(field: &str, value: &serde_json::Value) -> Result<Decimal, ExchangeError> {
    match value {
        serde_json::Value::String(s) => parse_decimal(field, s),
        serde_json::Value::Number(n) => parse_decimal(field, &n.to_string()),
        other => Err(ExchangeError::Transport(format!(
            "Invalid {}: expected number, got {}",
            field, other
        ))),
    }
}

pub fn datetime_from_millis(millis: u64) -> Result<DateTime<Utc>, ExchangeError> {
    DateTime::from_timestamp_millis(millis as i64)
        .ok_or_else(|| ExchangeError::Transport(format!("Invalid timestamp {}", millis)))
}

pub fn datetime_from_secs(secs: i64) -> Result<DateTime<Utc>, ExchangeError> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| ExchangeError::Transport(format!("Invalid timestamp {}", secs)))
}

/// Convert `[price, qty, ..]` string levels. Extra trailing fields (order
/// counts) are ignored.
pub fn parse_levels(levels: &[Vec<String>]) -> Result<Vec<AskBid>, ExchangeError> {
    levels
        .iter()
        .map(|level| match level.as_slice() {
            [price, qty, ..] => Ok(AskBid::new(
                parse_decimal("price", price)?,
                parse_decimal("quantity", qty)?,
            )),
            _ => Err(ExchangeError::Transport(format!(
                "Malformed price level {:?}",
                level
            ))),
        })
        .collect()
}

/// Remembers which caller market strings a venue symbol was requested under,
/// so inbound data is keyed the way the caller subscribed.
#[derive(Debug, Default)]
pub struct MarketNames {
    names: RwLock<HashMap<String, Vec<String>>>,
}

impl MarketNames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remember(&self, venue_symbol: &str, market: &str) {
        let mut names = self.names.write();
        let markets = names.entry(venue_symbol.to_string()).or_default();
        if !markets.iter().any(|m| m == market) {
            markets.push(market.to_string());
        }
    }

    /// First market remembered for `venue_symbol`
    pub fn lookup(&self, venue_symbol: &str) -> Option<String> {
        self.names
            .read()
            .get(venue_symbol)
            .and_then(|markets| markets.first().cloned())
    }

    /// Every market remembered for `venue_symbol`, in the order first seen
    pub fn markets(&self, venue_symbol: &str) -> Vec<String> {
        self.names
            .read()
            .get(venue_symbol)
            .cloned()
            .unwrap_or_default()
    }

    /// Caller market for a venue symbol; unknown symbols are lowercased
    pub fn market_for(&self, venue_symbol: &str) -> String {
        self.lookup(venue_symbol)
            .unwrap_or_else(|| venue_symbol.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_split_market() {
        assert_eq!(
            split_market("btc_usdc").unwrap(),
            ("btc".to_string(), "usdc".to_string())
        );
        assert_eq!(
            split_market("BTC-USD").unwrap(),
            ("btc".to_string(), "usd".to_string())
        );
        assert!(split_market("").is_err());
        assert!(split_market("btcusdc").is_err());
        assert!(split_market("btc_usd_x").is_err());
        assert!(split_market("btc_u$d").is_err());
    }

    #[test]
    fn test_symbol_validation() {
        assert_eq!(binance_symbol("btc_usdt").unwrap(), "BTCUSDT");
        assert_eq!(binance_symbol("btcusdt").unwrap(), "BTCUSDT");
        assert!(binance_symbol("").is_err());
        assert!(binance_symbol("BT").is_err());
        assert!(binance_symbol("BTC USDT").is_err());
    }

    #[test]
    fn test_coinbase_product() {
        assert_eq!(coinbase_product("eth_btc").unwrap(), "ETH-BTC");
        assert!(coinbase_product("ethbtc").is_err());
    }

    #[test]
    fn test_parse_levels() {
        let levels = vec![
            vec!["100.5".to_string(), "2".to_string()],
            vec!["100.4".to_string(), "0.5".to_string(), "3".to_string()],
        ];
        let parsed = parse_levels(&levels).unwrap();
        assert_eq!(parsed[0], AskBid::new(dec!(100.5), dec!(2)));
        assert_eq!(parsed[1], AskBid::new(dec!(100.4), dec!(0.5)));

        assert!(parse_levels(&[vec!["1".to_string()]]).is_err());
        assert!(parse_levels(&[vec!["x".to_string(), "1".to_string()]]).is_err());
    }

    #[test]
    fn test_decimal_from_json() {
        let value = serde_json::json!(1234.5);
        assert_eq!(decimal_from_json("price", &value).unwrap(), dec!(1234.5));
        let value = serde_json::json!("0.001");
        assert_eq!(decimal_from_json("price", &value).unwrap(), dec!(0.001));
        assert!(decimal_from_json("price", &serde_json::json!(null)).is_err());
    }

    #[test]
    fn test_market_names() {
        let names = MarketNames::new();
        names.remember("BTCUSDC", "btc_usdc");
        assert_eq!(names.market_for("BTCUSDC"), "btc_usdc");
        assert_eq!(names.market_for("ETHBTC"), "ethbtc");
        assert_eq!(names.lookup("ETHBTC"), None);
        assert!(names.markets("ETHBTC").is_empty());
    }

    #[test]
    fn test_market_names_keep_every_spelling() {
        let names = MarketNames::new();
        names.remember("BTC-USDT", "btc_usdt");
        names.remember("BTC-USDT", "BTC-USDT");
        names.remember("BTC-USDT", "btc_usdt");

        assert_eq!(names.market_for("BTC-USDT"), "btc_usdt");
        assert_eq!(
            names.markets("BTC-USDT"),
            vec!["btc_usdt".to_string(), "BTC-USDT".to_string()]
        );
    }
}
