/*
[INPUT]:  CLI arguments, YAML configuration file, OS shutdown signals
[OUTPUT]: Logged market events for the configured pairs until shutdown
[POS]:    Binary entry point
[UPDATE]: When changing CLI flags, startup flow, or shutdown handling
*/

mod config;

use anyhow::{anyhow, bail, Context, Result};
use bitfinex_connector::{BitfinexConnector, MarketEvent};
use clap::Parser;
use futures_util::future::join_all;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::StreamRunConfig;

#[derive(Parser, Debug)]
#[command(name = "bitfinex-stream", version, about = "Bitfinex trade and candle stream follower")]
struct Cli {
    #[arg(long = "config", value_name = "PATH")]
    config_path: PathBuf,
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    log_level: String,
    #[arg(long = "dry-run")]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(&args.log_level)?;

    info!(
        config_path = %args.config_path.display(),
        dry_run = args.dry_run,
        "starting bitfinex-stream"
    );

    let config = load_config(&args.config_path)?;
    let requests = config.subscribe_requests();
    info!(
        pair_count = config.pairs.len(),
        subscription_count = requests.len(),
        "configuration loaded"
    );

    if args.dry_run {
        info!("dry-run requested; configuration validated");
        return Ok(());
    }

    let shutdown = CancellationToken::new();
    setup_signal_handlers(shutdown.clone());

    let mut connector = BitfinexConnector::connect(config.connector_config())
        .await
        .context("connect to bitfinex")?;
    let mut events = connector.events();

    if let Some((portfolio, quote)) = config.portfolio() {
        match connector.portfolio_value(&portfolio, quote).await {
            Ok(value) => info!(%value, quote, "portfolio valued"),
            Err(err) => warn!(error = %err, quote, "portfolio valuation failed"),
        }
    }

    let results = join_all(requests.into_iter().map(|request| connector.subscribe(request))).await;
    let mut subscribed = 0usize;
    for result in results {
        match result {
            Ok(subscription) => {
                subscribed += 1;
                debug!(%subscription, "subscription armed");
            }
            Err(err) => warn!(error = %err, "subscribe failed"),
        }
    }
    if subscribed == 0 {
        connector.disconnect().await;
        bail!("no subscription succeeded");
    }
    info!(subscribed, "streaming; press ctrl-c to stop");

    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Ok(event) => {
                log_event(&event);
                *counts.entry(event.key().to_string()).or_default() += 1;
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "event receiver lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
    info!("shutdown signal received");

    connector.disconnect().await;
    for (slot, count) in &counts {
        info!(%slot, count, "events received");
    }
    Ok(())
}

fn log_event(event: &MarketEvent) {
    match event {
        MarketEvent::BuyTrade(trade) | MarketEvent::SellTrade(trade) => info!(
            pair = %trade.pair,
            id = trade.id,
            side = ?trade.side,
            price = %trade.price,
            amount = %trade.amount,
            time = %trade.time,
            "trade"
        ),
        MarketEvent::Candle(candle) => info!(
            pair = %candle.pair,
            open_time = %candle.open_time,
            open = %candle.open,
            close = %candle.close,
            high = %candle.high,
            low = %candle.low,
            volume = %candle.volume,
            "candle"
        ),
    }
}

fn init_tracing(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(log_level).context("invalid log level")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|err| anyhow!(err))
        .context("initialize tracing subscriber")?;
    Ok(())
}

fn load_config(path: &PathBuf) -> Result<StreamRunConfig> {
    let path_str = path
        .to_str()
        .context("config path must be valid utf-8")?;
    StreamRunConfig::from_file(path_str).context("load config")
}

fn setup_signal_handlers(shutdown: CancellationToken) {
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to install SIGINT handler");
            return;
        }
        info!("received SIGINT");
        shutdown_clone.cancel();
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let shutdown_clone = shutdown.clone();
        tokio::spawn(async move {
            match signal(SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                    info!("received SIGTERM");
                    shutdown_clone.cancel();
                }
                Err(err) => {
                    warn!(error = %err, "failed to install SIGTERM handler");
                }
            }
        });
    }
}
