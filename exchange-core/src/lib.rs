//! Unified client for spot crypto venues.
//!
//! `ExchangeClient` puts one venue behind one interface; `ResilientClient`
//! rebuilds it when the venue's broker stops accepting requests.

pub mod config;
pub mod exchange;
pub mod service;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

pub use exchange::{Connector, DefaultConnector, EventHandler, Transport};
pub use service::{EventDispatcher, ExchangeClient, ResilienceConfig, ResilientClient};
