// exchange/mod.rs
pub mod binance;
pub mod coinbase;
pub mod connector;
pub(crate) mod errors;
pub mod signer;
pub mod traits;
pub mod types;
pub mod utils;
pub mod websocket;

// Re-export main interfaces for easy access
pub use binance::BinanceExchange;
pub use coinbase::CoinbaseExchange;
pub use connector::DefaultConnector;
pub use traits::{Connector, EventHandler, Transport};
