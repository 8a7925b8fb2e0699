/*
[INPUT]:  Pair identifiers, candle periods and history bounds
[OUTPUT]: Market data (trade history, candle history, ticker, pair list)
[POS]:    HTTP layer - public market data endpoints (no auth required)
[UPDATE]: When adding new public endpoints or changing response format
*/

use reqwest::Method;
use serde_json::Value;
use tracing::debug;

use crate::codec::{decode_all, decode_candle, decode_ticker, decode_trade};
use crate::http::{BitfinexClient, BitfinexError, HistoryQuery, Result};
use crate::types::{Candle, CandlePeriod, Pair, PeriodInput, Subscription, Ticker, Trade};

const PAIR_LIST_ENDPOINT: &str = "conf/pub:list:pair:exchange";

impl BitfinexClient {
    /// Get trade history
    ///
    /// GET trades/{pair}/hist?limit&start&end
    pub async fn fetch_trades(&self, pair: &str, query: &HistoryQuery) -> Result<Vec<Trade>> {
        let pair = Pair::parse(pair)?;
        self.trades_for(&pair, query).await
    }

    /// Get candle history; `period` accepts seconds or a code such as `5m`
    ///
    /// GET candles/trade:{period}:{pair}/hist?limit&start&end
    pub async fn fetch_candles(
        &self,
        pair: &str,
        period: impl Into<PeriodInput>,
        query: &HistoryQuery,
    ) -> Result<Vec<Candle>> {
        let pair = Pair::parse(pair)?;
        let period = CandlePeriod::resolve(period)?;
        self.candles_for(&pair, period, query).await
    }

    /// Get the current ticker
    ///
    /// GET ticker/{pair}
    pub async fn fetch_ticker(&self, pair: &str) -> Result<Ticker> {
        let pair = Pair::parse(pair)?;
        self.ticker_for(&pair).await
    }

    /// List exchange trading pairs, prefixed
    ///
    /// GET conf/pub:list:pair:exchange
    pub async fn fetch_pairs(&self) -> Result<Vec<Pair>> {
        let builder = self.public_request(Method::GET, PAIR_LIST_ENDPOINT, &[])?;
        let body: Vec<Vec<String>> = self.send_json(builder).await?;
        let symbols = body
            .into_iter()
            .next()
            .ok_or_else(|| BitfinexError::malformed("pair list: empty response"))?;
        symbols.iter().map(|symbol| Pair::from_symbol(symbol)).collect()
    }

    pub(crate) async fn trades_for(&self, pair: &Pair, query: &HistoryQuery) -> Result<Vec<Trade>> {
        let endpoint = format!("trades/{pair}/hist");
        let builder = self.public_request(Method::GET, &endpoint, &query.to_params())?;
        let body: Value = self.send_json(builder).await?;
        let trades = decode_all(&body, pair, decode_trade)?;
        debug!(%pair, count = trades.len(), "fetched trade history");
        Ok(trades)
    }

    pub(crate) async fn candles_for(
        &self,
        pair: &Pair,
        period: CandlePeriod,
        query: &HistoryQuery,
    ) -> Result<Vec<Candle>> {
        let key = Subscription::candles(pair.clone(), period)
            .candle_key()
            .ok_or_else(|| BitfinexError::malformed("candle subscription without key"))?;
        let endpoint = format!("candles/{key}/hist");
        let builder = self.public_request(Method::GET, &endpoint, &query.to_params())?;
        let body: Value = self.send_json(builder).await?;
        let candles = decode_all(&body, pair, decode_candle)?;
        debug!(%pair, %period, count = candles.len(), "fetched candle history");
        Ok(candles)
    }

    pub(crate) async fn ticker_for(&self, pair: &Pair) -> Result<Ticker> {
        let endpoint = format!("ticker/{pair}");
        let builder = self.public_request(Method::GET, &endpoint, &[])?;
        let body: Value = self.send_json(builder).await?;
        decode_ticker(&body, pair)
    }
}
