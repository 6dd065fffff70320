// exchange/connector.rs

use std::sync::Arc;

use async_trait::async_trait;
use exchange_common::{ExchangeConfig, ExchangeError};
use tracing::info;

use super::binance::BinanceExchange;
use super::coinbase::CoinbaseExchange;
use super::traits::{Connector, EventHandler, Transport};

/// Builds the transports bundled with this crate.
///
/// Nash speaks GraphQL over a Phoenix channel with MPC request signing and has
/// no bundled transport; supply a `Connector` for it through
/// `ExchangeClient::with_connector`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConnector;

#[async_trait]
impl Connector for DefaultConnector {
    async fn connect(
        &self,
        config: &ExchangeConfig,
        events: Arc<dyn EventHandler>,
    ) -> Result<Box<dyn Transport>, ExchangeError> {
        info!(
            "Building {} transport (sandbox: {})",
            config.venue(),
            config.is_sandbox()
        );

        match config {
            ExchangeConfig::Binance(binance) => {
                Ok(Box::new(BinanceExchange::new(binance, events)?))
            }
            ExchangeConfig::Coinbase(coinbase) => {
                Ok(Box::new(CoinbaseExchange::new(coinbase, events)?))
            }
            ExchangeConfig::Nash(_) => Err(ExchangeError::Unsupported(
                "no bundled Nash transport; provide a Connector".to_string(),
            )),
        }
    }
}
