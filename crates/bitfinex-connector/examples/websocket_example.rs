/*
[INPUT]:  Pairs to follow and a candle period
[OUTPUT]: Real-time trade and candle events, backfilled from history
[POS]:    Examples - WebSocket stream handling
[UPDATE]: When WebSocket API changes
*/

use bitfinex_connector::*;
use tokio::time::{Duration, Instant};

/// Example: Follow live trades and candles
///
/// Each subscription first replays recent history, then continues with the
/// live stream. Events already delivered are never repeated, including across
/// reconnects.
#[tokio::main]
async fn main() {
    println!("=== Bitfinex WebSocket Example ===\n");

    let mut connector = match BitfinexConnector::connect(ConnectorConfig::default()).await {
        Ok(connector) => connector,
        Err(e) => {
            eprintln!("Failed to connect: {}", e);
            return;
        }
    };
    println!("✓ Connected to {}", ws::PUBLIC_STREAM_URL);

    let mut events = connector.events();

    for pair in ["tBTCUSD", "tETHUSD"] {
        match connector.subscribe_trades(pair).await {
            Ok(subscription) => println!("✓ Subscribed {}", subscription),
            Err(e) => println!("✗ {}: {}", pair, e),
        }
    }
    match connector.subscribe_candles("tBTCUSD", "1m").await {
        Ok(subscription) => println!("✓ Subscribed {}", subscription),
        Err(e) => println!("✗ candles: {}", e),
    }

    println!("\nPrinting events for 30 seconds...");
    let deadline = Instant::now() + Duration::from_secs(30);
    loop {
        let event = match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Ok(event)) => event,
            Ok(Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped))) => {
                println!("  (skipped {} events)", skipped);
                continue;
            }
            Ok(Err(_)) | Err(_) => break,
        };

        match &event {
            MarketEvent::BuyTrade(trade) | MarketEvent::SellTrade(trade) => println!(
                "  {} {:?} {} @ {} (#{})",
                trade.pair, trade.side, trade.amount.abs(), trade.price, trade.id
            ),
            MarketEvent::Candle(candle) => println!(
                "  {} candle {} close={} vol={}",
                candle.pair, candle.open_time, candle.close, candle.volume
            ),
        }
    }

    connector.disconnect().await;
    println!("\n✓ WebSocket example complete");
}
