/*
[INPUT]:  Optional limit / time bounds from callers
[OUTPUT]: History query parameters and the HistorySource seam used by the facade
[POS]:    HTTP layer - abstraction over REST history for backfill
[UPDATE]: When adding query parameters or new history endpoints
*/

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::http::{BitfinexClient, Result};
use crate::types::{CandlePeriod, Candle, Pair, Ticker, Trade};

/// Bounds for a history request. `None` fields are not sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryQuery {
    pub limit: Option<u32>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl HistoryQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn start(mut self, start: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self
    }

    pub fn end(mut self, end: DateTime<Utc>) -> Self {
        self.end = Some(end);
        self
    }

    /// Query pairs with epoch-millisecond bounds
    pub(crate) fn to_params(&self) -> [(&'static str, Option<String>); 3] {
        [
            ("limit", self.limit.map(|limit| limit.to_string())),
            ("start", self.start.map(|start| start.timestamp_millis().to_string())),
            ("end", self.end.map(|end| end.timestamp_millis().to_string())),
        ]
    }
}

/// Source of REST history and snapshots for the connector
#[async_trait]
pub trait HistorySource: Send + Sync {
    async fn trades(&self, pair: &Pair, query: &HistoryQuery) -> Result<Vec<Trade>>;

    async fn candles(
        &self,
        pair: &Pair,
        period: CandlePeriod,
        query: &HistoryQuery,
    ) -> Result<Vec<Candle>>;

    async fn ticker(&self, pair: &Pair) -> Result<Ticker>;

    async fn pairs(&self) -> Result<Vec<Pair>>;
}

#[async_trait]
impl HistorySource for BitfinexClient {
    async fn trades(&self, pair: &Pair, query: &HistoryQuery) -> Result<Vec<Trade>> {
        self.trades_for(pair, query).await
    }

    async fn candles(
        &self,
        pair: &Pair,
        period: CandlePeriod,
        query: &HistoryQuery,
    ) -> Result<Vec<Candle>> {
        self.candles_for(pair, period, query).await
    }

    async fn ticker(&self, pair: &Pair) -> Result<Ticker> {
        self.ticker_for(pair).await
    }

    async fn pairs(&self) -> Result<Vec<Pair>> {
        self.fetch_pairs().await
    }
}
