/*
[INPUT]:  Test configuration and mock server requirements
[OUTPUT]: Shared test utilities, fixtures, and mock helpers
[POS]:    Test infrastructure - shared across all test modules
[UPDATE]: When adding new test patterns or fixtures
*/

//! Common test utilities for bitfinex-connector tests

#![allow(dead_code)]

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use bitfinex_connector::{
    BitfinexError, Candle, CandlePeriod, HistoryQuery, HistorySource, MarketEvent, Pair,
    RequestSink, Result, Ticker, Trade, WsRequest,
};
use chrono::DateTime;
use rust_decimal::Decimal;
use tokio::sync::broadcast;
use wiremock::MockServer;

/// Route library logs to the test harness; `RUST_LOG` selects the level
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Setup a mock HTTP server for testing
pub async fn setup_mock_server() -> MockServer {
    MockServer::start().await
}

pub fn pair(raw: &str) -> Pair {
    Pair::parse(raw).expect("test pair")
}

pub fn trade(raw_pair: &str, id: i64, mts: i64, amount: Decimal) -> Trade {
    Trade::new(
        pair(raw_pair),
        id,
        DateTime::from_timestamp_millis(mts).expect("test time"),
        Decimal::from(100),
        amount,
    )
}

pub fn candle(raw_pair: &str, mts: i64, close: Decimal) -> Candle {
    Candle {
        pair: pair(raw_pair),
        open_time: DateTime::from_timestamp_millis(mts).expect("test time"),
        open: close,
        close,
        high: close,
        low: close,
        volume: Decimal::ONE,
    }
}

pub fn ticker(raw_pair: &str, bid: Decimal, ask: Decimal) -> Ticker {
    Ticker {
        pair: pair(raw_pair),
        bid,
        bid_size: Decimal::ONE,
        ask,
        ask_size: Decimal::ONE,
        daily_change: Decimal::ZERO,
        daily_change_relative: Decimal::ZERO,
        last_price: bid,
        volume: Decimal::ZERO,
        high: ask,
        low: bid,
    }
}

/// Everything currently buffered on the receiver
pub fn drain(rx: &mut broadcast::Receiver<MarketEvent>) -> Vec<MarketEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn trade_ids(events: &[MarketEvent]) -> Vec<i64> {
    events
        .iter()
        .filter_map(|event| event.as_trade().map(|trade| trade.id))
        .collect()
}

/// RequestSink that records what would have gone on the wire
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<WsRequest>>,
    fail: AtomicBool,
}

impl RecordingSink {
    pub fn failing() -> Self {
        let sink = Self::default();
        sink.fail.store(true, Ordering::SeqCst);
        sink
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<WsRequest> {
        self.sent.lock().expect("sent lock").clone()
    }

    pub fn sent_json(&self) -> Vec<serde_json::Value> {
        self.sent()
            .iter()
            .map(|request| request.to_json().expect("request json"))
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().expect("sent lock").clear();
    }
}

#[async_trait]
impl RequestSink for RecordingSink {
    async fn send(&self, request: &WsRequest) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(BitfinexError::NotConnected);
        }
        self.sent.lock().expect("sent lock").push(request.clone());
        Ok(())
    }
}

type FetchHook = Box<dyn Fn() + Send + Sync>;

/// In-memory history keyed by pair
#[derive(Default)]
pub struct StubHistory {
    pub trades: Vec<Trade>,
    pub candles: Vec<Candle>,
    pub tickers: Vec<Ticker>,
    pub calls: AtomicUsize,
    pub during_fetch: Mutex<Option<FetchHook>>,
}

impl StubHistory {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Run `hook` inside every later trades/candles fetch, before it returns
    pub fn during_fetch(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.during_fetch.lock().expect("hook lock") = Some(Box::new(hook));
    }

    fn fetched(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(hook) = self.during_fetch.lock().expect("hook lock").as_ref() {
            hook();
        }
    }
}

#[async_trait]
impl HistorySource for StubHistory {
    async fn trades(&self, pair: &Pair, _query: &HistoryQuery) -> Result<Vec<Trade>> {
        self.fetched();
        Ok(self
            .trades
            .iter()
            .filter(|trade| &trade.pair == pair)
            .cloned()
            .collect())
    }

    async fn candles(
        &self,
        pair: &Pair,
        _period: CandlePeriod,
        _query: &HistoryQuery,
    ) -> Result<Vec<Candle>> {
        self.fetched();
        Ok(self
            .candles
            .iter()
            .filter(|candle| &candle.pair == pair)
            .cloned()
            .collect())
    }

    async fn ticker(&self, pair: &Pair) -> Result<Ticker> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.tickers
            .iter()
            .find(|ticker| &ticker.pair == pair)
            .cloned()
            .ok_or_else(|| BitfinexError::Api {
                status: 404,
                message: format!("no ticker for {pair}"),
            })
    }

    async fn pairs(&self) -> Result<Vec<Pair>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.tickers.iter().map(|ticker| ticker.pair.clone()).collect())
    }
}
