use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use exchange_common::data::{AskBid, OrderBookResponse, Side, Trade, TradesResponse};
use exchange_core::EventDispatcher;
use rust_decimal::Decimal;

fn create_book(market: &str, levels: usize) -> OrderBookResponse {
    let mut book = OrderBookResponse::new(market);
    for i in 0..levels {
        let offset = Decimal::from(i as u64);
        book.bids.push(AskBid::new(Decimal::from(50_000) - offset, Decimal::ONE));
        book.asks.push(AskBid::new(Decimal::from(50_001) + offset, Decimal::ONE));
    }
    book.last_update_id = Some(1);
    book
}

fn create_trades(market: &str, count: usize) -> TradesResponse {
    let trades = (0..count)
        .map(|i| Trade {
            id: i.to_string(),
            buyer_order_id: None,
            seller_order_id: None,
            market: market.to_string(),
            price: Decimal::from(50_000),
            qty: Decimal::ONE,
            fees: None,
            side: if i % 2 == 0 { Side::Buy } else { Side::Sell },
            liquidity: None,
            created_at: Utc::now(),
        })
        .collect();
    TradesResponse {
        market: market.to_string(),
        trades,
    }
}

fn bench_orderbook_fanout(c: &mut Criterion) {
    let book = create_book("btc_usdc", 20);

    let mut group = c.benchmark_group("orderbook_fanout");
    for subscribers in [1usize, 10, 100].iter() {
        let dispatcher = EventDispatcher::new();
        let seen = Arc::new(AtomicU64::new(0));
        for _ in 0..*subscribers {
            let seen = seen.clone();
            dispatcher.register_orderbook(
                "btc_usdc",
                Arc::new(move |_: &OrderBookResponse| {
                    seen.fetch_add(1, Ordering::Relaxed);
                }),
            );
        }

        group.bench_with_input(
            BenchmarkId::from_parameter(subscribers),
            &book,
            |b, book| {
                b.iter(|| dispatcher.dispatch_orderbook(black_box(book)));
            },
        );
    }
    group.finish();
}

fn bench_unrouted_market(c: &mut Criterion) {
    let dispatcher = EventDispatcher::new();
    for i in 0..50 {
        dispatcher.register_orderbook(
            &format!("asset{}_usdc", i),
            Arc::new(|_: &OrderBookResponse| {}),
        );
    }
    let book = create_book("eth_btc", 5);

    c.bench_function("unrouted_market", |b| {
        b.iter(|| dispatcher.dispatch_orderbook(black_box(&book)));
    });
}

fn bench_trades_batch(c: &mut Criterion) {
    let dispatcher = EventDispatcher::new();
    let volume = Arc::new(AtomicU64::new(0));
    {
        let volume = volume.clone();
        dispatcher.register_trades(
            "btc_usdc",
            Arc::new(move |trades: &TradesResponse| {
                volume.fetch_add(trades.trades.len() as u64, Ordering::Relaxed);
            }),
        );
    }

    let mut group = c.benchmark_group("trades_batch");
    group.sample_size(50);
    for size in [1usize, 100, 1000].iter() {
        let trades = create_trades("btc_usdc", *size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &trades, |b, trades| {
            b.iter(|| dispatcher.dispatch_trades(black_box(trades)));
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_orderbook_fanout,
    bench_unrouted_market,
    bench_trades_batch
);
criterion_main!(benches);
