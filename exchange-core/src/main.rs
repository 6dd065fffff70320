use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use dotenv::dotenv;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use exchange_common::data::{
    GetHistoricRatesRequest, GetPriceTickerRequest, Interval, OrderBookRequest, OrderBookResponse,
};
use exchange_core::{config::Settings, DefaultConnector, ResilientClient};

#[derive(Parser)]
#[command(name = "exchange-client")]
#[command(about = "Query and stream market data from the configured venue")]
enum Commands {
    /// List tradeable markets
    Pairs,
    /// Print the current orderbook
    Orderbook {
        #[arg(short, long, default_value = "btc_usdt")]
        market: String,
    },
    /// Print the last traded price
    Ticker {
        #[arg(short, long, default_value = "btc_usdt")]
        market: String,
    },
    /// Print historic candles
    Candles {
        #[arg(short, long, default_value = "btc_usdt")]
        market: String,
        /// Interval name, e.g. OneMinute, OneHour, OneDay
        #[arg(short, long, default_value = "OneHour")]
        interval: String,
    },
    /// Stream orderbook and trades until Ctrl+C
    Watch {
        #[arg(short, long, default_value = "btc_usdt")]
        market: String,
        /// Top levels only (venue permitting)
        #[arg(short, long)]
        depth: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let command = Commands::parse();

    let settings = Settings::new().context("Failed to load settings")?;
    let config = settings.exchange_config()?;
    info!("Using {} (sandbox: {})", config.venue(), config.is_sandbox());

    let client = ResilientClient::with_connector(
        config,
        Arc::new(DefaultConnector),
        settings.resilience_config(),
    )
    .await?;

    match command {
        Commands::Pairs => {
            let pairs = client.retrieve_pairs().await?;
            for pair in &pairs {
                println!(
                    "{:<12} {:<14} tick {} step {}",
                    pair.market(),
                    pair.symbol,
                    pair.quote_increment,
                    pair.base_increment
                );
            }
            info!("{} pairs", pairs.len());
        }

        Commands::Orderbook { market } => {
            let book = client.order_book(&OrderBookRequest::new(&market)).await?;
            println!("{:>20} {:>20}", "bid", "ask");
            for (bid, ask) in book.bids.iter().zip(book.asks.iter()).take(10) {
                println!(
                    "{:>20} {:>20}",
                    format!("{} @ {}", bid.qty, bid.price),
                    format!("{} @ {}", ask.qty, ask.price)
                );
            }
        }

        Commands::Ticker { market } => {
            let ticker = client
                .get_price_ticker(&GetPriceTickerRequest::new(&market))
                .await?;
            match ticker.price {
                Some(price) => println!("{} {}", market, price),
                None => println!("{} has not traded", market),
            }
        }

        Commands::Candles { market, interval } => {
            let interval: Interval = interval.parse()?;
            let candles = client
                .get_historic_rates(&GetHistoricRatesRequest::new(&market, interval))
                .await?;
            for candle in &candles {
                println!(
                    "{} o {} h {} l {} c {} v {}",
                    candle.time, candle.open, candle.high, candle.low, candle.close, candle.volume
                );
            }
        }

        Commands::Watch { market, depth } => {
            let live = client.client();

            live.subscribe_error(|e| error!("Stream error: {}", e));
            live.subscribe_disconnect(|| warn!("Stream disconnected"));

            let book_market = market.clone();
            let on_book = move |book: &OrderBookResponse| {
                info!(
                    "{} book: {} bids / {} asks (update {:?})",
                    book_market,
                    book.bids.len(),
                    book.asks.len(),
                    book.last_update_id
                );
            };
            match depth {
                Some(depth) => live.subscribe_orderbook_depth(&market, depth, on_book).await,
                None => live.subscribe_orderbook(&market, on_book).await,
            }

            live.subscribe_trades(&market, |trades| {
                for trade in &trades.trades {
                    info!(
                        "{} trade {} {} @ {}",
                        trades.market, trade.side, trade.qty, trade.price
                    );
                }
            })
            .await;

            info!("Streaming {}. Press Ctrl+C to stop.", market);
            tokio::signal::ctrl_c().await?;
            info!("Shutting down...");
            live.disconnect().await;
            info!("Shutdown complete");
        }
    }

    Ok(())
}
