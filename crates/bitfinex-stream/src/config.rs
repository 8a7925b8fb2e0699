/*
[INPUT]:  YAML configuration file
[OUTPUT]: Parsed stream configuration and subscribe requests
[POS]:    Configuration layer - what to follow and where to connect
[UPDATE]: When adding new configuration options
*/

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{bail, Context};
use bitfinex_connector::http::PUBLIC_BASE_URL;
use bitfinex_connector::ws::PUBLIC_STREAM_URL;
use bitfinex_connector::{
    CandlePeriod, ConnectorConfig, Pair, Portfolio, StreamConfig, SubscribeRequest,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Top-level configuration for the stream runner
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamRunConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Pairs to follow
    pub pairs: Vec<PairConfig>,
    /// Holdings valued once at startup
    #[serde(default)]
    pub portfolio: Option<PortfolioConfig>,
}

/// Endpoints and reconnect policy
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_rest_url")]
    pub rest_url: String,
    #[serde(default = "default_stream_url")]
    pub stream_url: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            rest_url: default_rest_url(),
            stream_url: default_stream_url(),
            max_retries: default_max_retries(),
            max_backoff_secs: default_max_backoff_secs(),
            event_capacity: default_event_capacity(),
        }
    }
}

/// Channels for a single pair
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PairConfig {
    /// Prefixed pair (e.g., "tBTCUSD")
    pub pair: String,
    #[serde(default = "default_trades")]
    pub trades: bool,
    /// Candle periods, as seconds (300) or codes ("5m")
    #[serde(default)]
    pub candles: Vec<CandlePeriod>,
    /// History records replayed before the live feed
    #[serde(default)]
    pub history_limit: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PortfolioConfig {
    #[serde(default = "default_quote")]
    pub quote: String,
    pub holdings: BTreeMap<String, Decimal>,
}

fn default_rest_url() -> String {
    PUBLIC_BASE_URL.to_string()
}

fn default_stream_url() -> String {
    PUBLIC_STREAM_URL.to_string()
}

fn default_max_retries() -> u32 {
    StreamConfig::default().max_retries
}

fn default_max_backoff_secs() -> u64 {
    StreamConfig::default().max_backoff.as_secs()
}

fn default_event_capacity() -> usize {
    ConnectorConfig::default().event_capacity
}

fn default_trades() -> bool {
    true
}

fn default_quote() -> String {
    "USD".to_string()
}

impl StreamRunConfig {
    /// Load configuration from YAML file
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would fail on the first subscribe
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.pairs.is_empty() {
            bail!("no pairs configured");
        }
        for pair in &self.pairs {
            Pair::parse(&pair.pair).with_context(|| format!("pair `{}`", pair.pair))?;
            if !pair.trades && pair.candles.is_empty() {
                bail!("pair `{}` selects no channels", pair.pair);
            }
        }
        self.connector_config()
            .validate()
            .context("connection settings")?;
        Ok(())
    }

    pub fn connector_config(&self) -> ConnectorConfig {
        let connection = &self.connection;
        ConnectorConfig {
            rest_base_url: connection.rest_url.clone(),
            stream: StreamConfig {
                url: connection.stream_url.clone(),
                max_retries: connection.max_retries,
                max_backoff: Duration::from_secs(connection.max_backoff_secs),
                ..StreamConfig::default()
            },
            event_capacity: connection.event_capacity,
            ..ConnectorConfig::default()
        }
    }

    /// One request per configured channel, in file order
    pub fn subscribe_requests(&self) -> Vec<SubscribeRequest> {
        let mut requests = Vec::new();
        for pair in &self.pairs {
            if pair.trades {
                requests.push(with_limit(SubscribeRequest::trades(&pair.pair), pair.history_limit));
            }
            for period in &pair.candles {
                requests.push(with_limit(
                    SubscribeRequest::candles(&pair.pair, *period),
                    pair.history_limit,
                ));
            }
        }
        requests
    }

    pub fn portfolio(&self) -> Option<(Portfolio, &str)> {
        let config = self.portfolio.as_ref()?;
        let portfolio = config
            .holdings
            .iter()
            .fold(Portfolio::new(), |portfolio, (currency, amount)| {
                portfolio.with_holding(currency.clone(), *amount)
            });
        Some((portfolio, config.quote.as_str()))
    }
}

fn with_limit(request: SubscribeRequest, limit: Option<u32>) -> SubscribeRequest {
    match limit {
        Some(limit) => request.limit(limit),
        None => request,
    }
}
