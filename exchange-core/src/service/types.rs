use std::sync::Arc;
use std::time::Duration;

use exchange_common::data::{OrderBookResponse, TradesResponse};
use exchange_common::ExchangeError;

/// Callback for orderbook snapshots and deltas of one market
pub type OrderbookCallback = Arc<dyn Fn(&OrderBookResponse) + Send + Sync>;

/// Callback for trade batches of one market
pub type TradesCallback = Arc<dyn Fn(&TradesResponse) + Send + Sync>;

pub type ErrorCallback = Arc<dyn Fn(&ExchangeError) + Send + Sync>;

/// Ping and disconnect notifications carry no payload
pub type SignalCallback = Arc<dyn Fn() + Send + Sync>;

/// Rebuild policy for `ResilientClient`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResilienceConfig {
    /// Pause between rebuilding the client and retrying the call
    pub rebuild_delay: Duration,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            rebuild_delay: Duration::from_secs(1),
        }
    }
}

impl ResilienceConfig {
    pub fn with_rebuild_delay(mut self, delay: Duration) -> Self {
        self.rebuild_delay = delay;
        self
    }
}
