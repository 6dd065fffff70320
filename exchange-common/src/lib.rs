//! Venue-agnostic configuration, value types and errors for the exchange
//! client.

pub mod config;
pub mod data;
pub mod error;

pub use config::{
    BinanceConfig, BinanceCredentials, CoinbaseConfig, CoinbaseCredentials, Environment,
    ExchangeConfig, NashConfig, NashCredentials, Venue, VenueSections,
};
pub use error::{ExchangeError, Result, BROKER_REGISTRATION_FAILURE};
