pub mod client;
pub mod dispatch;
pub mod resilient;
pub mod types;

// Re-export main interfaces
pub use client::ExchangeClient;
pub use dispatch::EventDispatcher;
pub use resilient::ResilientClient;
pub use types::*;
