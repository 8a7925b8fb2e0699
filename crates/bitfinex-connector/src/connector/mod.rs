/*
[INPUT]:  Subscribe/unsubscribe calls, REST history, live frames via the router
[OUTPUT]: One ordered, de-duplicated MarketEvent stream per (pair, kind) plus REST passthroughs
[POS]:    Connector layer - public facade merging history with the live feed
[UPDATE]: When changing backfill order, subscription semantics or lifecycle
*/

pub mod gate;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use rust_decimal::Decimal;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::http::{
    BitfinexClient, BitfinexError, ClientConfig, HistoryQuery, HistorySource, PUBLIC_BASE_URL,
    Result,
};
use crate::portfolio::{usd_pair, Portfolio, RateTable, QUOTE_CURRENCY};
use crate::types::{
    Candle, CandlePeriod, Channel, ChannelKind, MarketEvent, Pair, PeriodInput, Subscription,
    SubscriptionKey, Ticker, Trade,
};
use crate::ws::{
    BitfinexWebSocket, ChannelId, ConnectionState, ReconnectSupervisor, RequestSink, StreamConfig,
    StreamRouter, SubscriptionRegistry, WsRequest,
};

pub use gate::AcceptGate;

/// History depth used by [`BitfinexConnector::subscribe_trades`]
pub const DEFAULT_TRADE_HISTORY_LIMIT: u32 = 125;
const DEFAULT_EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    pub rest_base_url: String,
    pub client: ClientConfig,
    pub stream: StreamConfig,
    /// Broadcast buffer; slow receivers lag past this many events
    pub event_capacity: usize,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            rest_base_url: PUBLIC_BASE_URL.to_string(),
            client: ClientConfig::default(),
            stream: StreamConfig::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl ConnectorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.rest_base_url.trim().is_empty() {
            return Err(BitfinexError::Config("rest_base_url is empty".to_string()));
        }
        if self.stream.url.trim().is_empty() {
            return Err(BitfinexError::Config("stream url is empty".to_string()));
        }
        if self.event_capacity == 0 {
            return Err(BitfinexError::Config("event_capacity must be > 0".to_string()));
        }
        if self.stream.outbound_capacity == 0 {
            return Err(BitfinexError::Config(
                "outbound_capacity must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Channel selection before validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelRequest {
    Trades,
    Candles(PeriodInput),
}

/// Caller-facing subscribe parameters; validated by [`BitfinexConnector::subscribe`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeRequest {
    pub pair: String,
    pub channel: ChannelRequest,
    /// Oldest history to backfill
    pub from: Option<DateTime<Utc>>,
    /// Maximum history records to backfill
    pub limit: Option<u32>,
}

impl SubscribeRequest {
    pub fn trades(pair: impl Into<String>) -> Self {
        Self {
            pair: pair.into(),
            channel: ChannelRequest::Trades,
            from: None,
            limit: None,
        }
    }

    pub fn candles(pair: impl Into<String>, period: impl Into<PeriodInput>) -> Self {
        Self {
            pair: pair.into(),
            channel: ChannelRequest::Candles(period.into()),
            from: None,
            limit: None,
        }
    }

    pub fn from(mut self, from: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Validate pair and period without touching the network
    pub fn resolve(&self) -> Result<Subscription> {
        let pair = Pair::parse(&self.pair)?;
        match &self.channel {
            ChannelRequest::Trades => Ok(Subscription::trades(pair)),
            ChannelRequest::Candles(period) => Ok(Subscription::candles(
                pair,
                CandlePeriod::resolve(period.clone())?,
            )),
        }
    }

    fn history_query(&self) -> HistoryQuery {
        HistoryQuery {
            limit: self.limit,
            start: self.from,
            end: None,
        }
    }
}

struct Transport {
    ws: Arc<BitfinexWebSocket>,
    supervisor: JoinHandle<()>,
    shutdown: CancellationToken,
}

/// Market-data connector: REST history, live stream, and the merge between them
pub struct BitfinexConnector {
    history: Arc<dyn HistorySource>,
    requests: Arc<dyn RequestSink>,
    registry: Arc<SubscriptionRegistry>,
    gate: Arc<AcceptGate>,
    transport: Option<Transport>,
}

impl BitfinexConnector {
    /// Assemble a connector from its seams; no transport task is started
    pub fn with_parts(
        history: Arc<dyn HistorySource>,
        requests: Arc<dyn RequestSink>,
        event_capacity: usize,
    ) -> Self {
        Self {
            history,
            requests,
            registry: Arc::new(SubscriptionRegistry::new()),
            gate: Arc::new(AcceptGate::new(event_capacity.max(1))),
            transport: None,
        }
    }

    /// Build the REST client and stream, start the transport and wait for the first session
    pub async fn connect(config: ConnectorConfig) -> Result<Self> {
        config.validate()?;
        let client =
            BitfinexClient::with_config_and_base_url(config.client.clone(), &config.rest_base_url)?;
        let ws = Arc::new(BitfinexWebSocket::new(config.stream.clone()));

        let mut connector = Self::with_parts(
            Arc::new(client),
            ws.clone(),
            config.event_capacity,
        );
        ws.start(Arc::new(connector.router()))?;

        let shutdown = CancellationToken::new();
        let supervisor = ReconnectSupervisor::new(connector.registry.clone()).spawn(
            ws.subscribe_connection_state(),
            ws.clone(),
            shutdown.clone(),
        );
        connector.transport = Some(Transport {
            ws: ws.clone(),
            supervisor,
            shutdown,
        });

        let session = ws.wait_connected().await?;
        info!(session, url = %config.stream.url, "bitfinex connector ready");
        Ok(connector)
    }

    /// Stop the transport and supervisor tasks
    pub async fn disconnect(&mut self) {
        let Some(transport) = self.transport.take() else {
            return;
        };
        transport.shutdown.cancel();
        transport.ws.shutdown().await;
        if let Err(err) = transport.supervisor.await {
            warn!(error = %err, "reconnect supervisor ended abnormally");
        }
        info!("bitfinex connector disconnected");
    }

    pub fn connection_state(&self) -> Option<watch::Receiver<ConnectionState>> {
        self.transport
            .as_ref()
            .map(|transport| transport.ws.subscribe_connection_state())
    }

    /// Router feeding this connector's registry and gate
    pub fn router(&self) -> StreamRouter {
        StreamRouter::new(self.registry.clone(), self.gate.clone())
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    pub fn gate(&self) -> &Arc<AcceptGate> {
        &self.gate
    }

    /// New receiver for every accepted event; drop it to stop listening
    pub fn events(&self) -> broadcast::Receiver<MarketEvent> {
        self.gate.subscribe()
    }

    /// Backfill history through the gate, then enable the live feed
    pub async fn subscribe(&self, request: SubscribeRequest) -> Result<Subscription> {
        let subscription = request.resolve()?;
        let key = subscription.key();

        // a new candle period is a new series: stop routing the old channel before the mark resets
        if let Some(previous) = self.registry.subscription(&key)
            && previous.channel != subscription.channel
        {
            if let Some(chan_id) = self.registry.unsubscribe(&key) {
                self.release_channel(&previous, chan_id).await;
            }
            self.gate.clear(&key);
        }

        let history = self.load_history(&subscription, &request.history_query()).await?;
        let fetched = history.len();
        let backfilled = history
            .into_iter()
            .filter(|event| self.gate.accept(event.clone()))
            .count();

        let registration = self.registry.register(subscription.clone());
        if let Some(chan_id) = registration.superseded {
            self.release_channel(&subscription, chan_id).await;
        }

        if let Err(err) = self
            .requests
            .send(&WsRequest::subscribe(subscription.clone()))
            .await
        {
            self.registry.discard(&key, registration.token);
            return Err(err);
        }

        info!(%subscription, fetched, backfilled, "subscribed");
        Ok(subscription)
    }

    /// Trades with the default history depth
    pub async fn subscribe_trades(&self, pair: &str) -> Result<Subscription> {
        self.subscribe(SubscribeRequest::trades(pair).limit(DEFAULT_TRADE_HISTORY_LIMIT))
            .await
    }

    /// Candles; `period` accepts seconds or a code
    pub async fn subscribe_candles(
        &self,
        pair: &str,
        period: impl Into<PeriodInput>,
    ) -> Result<Subscription> {
        self.subscribe(SubscribeRequest::candles(pair, period)).await
    }

    /// Stop the live feed for (pair, kind); `false` if nothing was active
    pub async fn unsubscribe(&self, pair: &str, kind: ChannelKind) -> Result<bool> {
        let key = SubscriptionKey::new(Pair::parse(pair)?, kind);

        let Some(chan_id) = self.registry.unsubscribe(&key) else {
            self.gate.clear(&key);
            return Ok(false);
        };
        if let Err(err) = self.requests.send(&WsRequest::unsubscribe(chan_id)).await {
            self.registry.reactivate(&key, chan_id);
            return Err(err);
        }
        self.gate.clear(&key);
        info!(%key, chan_id = chan_id.0, "unsubscribed");
        Ok(true)
    }

    /// Best-effort release of a channel that no longer has a live entry
    async fn release_channel(&self, subscription: &Subscription, chan_id: ChannelId) {
        if let Err(err) = self.requests.send(&WsRequest::unsubscribe(chan_id)).await {
            warn!(%subscription, chan_id = chan_id.0, error = %err, "failed to release superseded channel");
        }
    }

    /// Sorted history as events, oldest first
    async fn load_history(
        &self,
        subscription: &Subscription,
        query: &HistoryQuery,
    ) -> Result<Vec<MarketEvent>> {
        let mut events: Vec<MarketEvent> = match subscription.channel {
            Channel::Trades => self
                .history
                .trades(&subscription.pair, query)
                .await?
                .into_iter()
                .map(MarketEvent::from_trade)
                .collect(),
            Channel::Candles(period) => self
                .history
                .candles(&subscription.pair, period, query)
                .await?
                .into_iter()
                .map(MarketEvent::Candle)
                .collect(),
        };
        events.sort_by_key(MarketEvent::sequence_key);
        Ok(events)
    }

    pub async fn fetch_trades(&self, pair: &str, query: &HistoryQuery) -> Result<Vec<Trade>> {
        let pair = Pair::parse(pair)?;
        self.history.trades(&pair, query).await
    }

    pub async fn fetch_candles(
        &self,
        pair: &str,
        period: impl Into<PeriodInput>,
        query: &HistoryQuery,
    ) -> Result<Vec<Candle>> {
        let pair = Pair::parse(pair)?;
        let period = CandlePeriod::resolve(period)?;
        self.history.candles(&pair, period, query).await
    }

    pub async fn fetch_ticker(&self, pair: &str) -> Result<Ticker> {
        let pair = Pair::parse(pair)?;
        self.history.ticker(&pair).await
    }

    pub async fn fetch_pairs(&self) -> Result<Vec<Pair>> {
        self.history.pairs().await
    }

    /// USD rates for `currencies`, fetched concurrently
    pub async fn fetch_usd_rates(&self, currencies: &[&str]) -> Result<RateTable> {
        let pairs = currencies
            .iter()
            .filter(|currency| **currency != QUOTE_CURRENCY)
            .map(|currency| usd_pair(currency))
            .collect::<Result<Vec<_>>>()?;

        let tickers = join_all(pairs.iter().map(|pair| self.history.ticker(pair))).await;
        let mut rates = RateTable::new();
        for ticker in tickers {
            rates.insert_ticker(&ticker?)?;
        }
        Ok(rates)
    }

    /// Value `portfolio` in `currency` using live ticker mids
    pub async fn portfolio_value(&self, portfolio: &Portfolio, currency: &str) -> Result<Decimal> {
        let mut currencies: Vec<&str> = portfolio.currencies().collect();
        if !currencies.contains(&currency) {
            currencies.push(currency);
        }
        let rates = self.fetch_usd_rates(&currencies).await?;
        portfolio.total_in(currency, &rates)
    }
}

impl Drop for BitfinexConnector {
    fn drop(&mut self) {
        if let Some(transport) = &self.transport {
            transport.shutdown.cancel();
        }
    }
}
