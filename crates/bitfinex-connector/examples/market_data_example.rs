/*
[INPUT]:  Pair identifier (e.g., "tBTCUSD") and candle period
[OUTPUT]: Market data (trade history, candles, ticker, portfolio value)
[POS]:    Examples - public market data queries
[UPDATE]: When adding new market data endpoints
*/

use bitfinex_connector::*;
use std::sync::Arc;

use rust_decimal::Decimal;

/// Example: Query public market data over REST
///
/// None of these endpoints need credentials.
#[tokio::main]
async fn main() {
    println!("=== Bitfinex Market Data Example ===\n");

    let client = match BitfinexClient::new() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to create client: {}", e);
            return;
        }
    };
    println!("✓ HTTP client created\n");

    let pair = "tBTCUSD";

    println!("Querying last 5 trades for {}...", pair);
    match client.fetch_trades(pair, &HistoryQuery::new().limit(5)).await {
        Ok(trades) => {
            for trade in trades {
                let side = if trade.is_buy() { "buy " } else { "sell" };
                println!("  {} {} {} @ {}", trade.time, side, trade.amount.abs(), trade.price);
            }
        }
        Err(e) => println!("✗ Error: {}", e),
    }

    // 900 seconds and "15m" name the same period
    println!("\nQuerying 15m candles for {}...", pair);
    match client.fetch_candles(pair, 900u32, &HistoryQuery::new().limit(3)).await {
        Ok(candles) => {
            for candle in candles {
                println!(
                    "  {} o={} h={} l={} c={} v={}",
                    candle.open_time, candle.open, candle.high, candle.low, candle.close, candle.volume
                );
            }
        }
        Err(e) => println!("✗ Error: {}", e),
    }

    println!("\nQuerying ticker for {}...", pair);
    match client.fetch_ticker(pair).await {
        Ok(ticker) => println!("✓ bid={} ask={} mid={}", ticker.bid, ticker.ask, ticker.mid_price()),
        Err(e) => println!("✗ Error: {}", e),
    }

    let portfolio = Portfolio::new()
        .with_holding("BTC", Decimal::ONE)
        .with_holding("ETH", Decimal::from(10))
        .with_holding("USD", Decimal::from(2500));
    let connector = BitfinexConnector::with_parts(
        Arc::new(client),
        Arc::new(BitfinexWebSocket::new(StreamConfig::default())),
        16,
    );

    println!("\nValuing portfolio...");
    for currency in ["USD", "BTC"] {
        match connector.portfolio_value(&portfolio, currency).await {
            Ok(value) => println!("✓ {} {}", value.round_dp(8), currency),
            Err(e) => println!("✗ Error: {}", e),
        }
    }

    println!("\n✓ Market data example complete");
}
