/*
[INPUT]:  Pair + channel selection from callers or `subscribed` confirmations
[OUTPUT]: Logical subscription identities and their wire keys
[POS]:    Data layer - subscription identity shared by registry, router and facade
[UPDATE]: When adding channels or changing the candle key format
*/

use std::fmt;

use serde::{Deserialize, Serialize};

use super::enums::{CandlePeriod, ChannelKind};
use super::models::Pair;
use crate::http::{BitfinexError, Result};

const CANDLE_KEY_SOURCE: &str = "trade";

/// Channel selection, carrying the candle period when relevant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "period", rename_all = "lowercase")]
pub enum Channel {
    Trades,
    Candles(CandlePeriod),
}

impl Channel {
    pub fn kind(&self) -> ChannelKind {
        match self {
            Channel::Trades => ChannelKind::Trades,
            Channel::Candles(_) => ChannelKind::Candles,
        }
    }

    pub fn period(&self) -> Option<CandlePeriod> {
        match self {
            Channel::Trades => None,
            Channel::Candles(period) => Some(*period),
        }
    }
}

/// Registry slot identity: one live stream per pair and channel kind
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionKey {
    pub pair: Pair,
    pub kind: ChannelKind,
}

impl SubscriptionKey {
    pub fn new(pair: Pair, kind: ChannelKind) -> Self {
        Self { pair, kind }
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.pair, self.kind)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subscription {
    pub pair: Pair,
    pub channel: Channel,
}

impl Subscription {
    pub fn trades(pair: Pair) -> Self {
        Self {
            pair,
            channel: Channel::Trades,
        }
    }

    pub fn candles(pair: Pair, period: CandlePeriod) -> Self {
        Self {
            pair,
            channel: Channel::Candles(period),
        }
    }

    pub fn kind(&self) -> ChannelKind {
        self.channel.kind()
    }

    pub fn key(&self) -> SubscriptionKey {
        SubscriptionKey::new(self.pair.clone(), self.kind())
    }

    /// Candle channel key, e.g. `trade:5m:tBTCUSD`
    pub fn candle_key(&self) -> Option<String> {
        self.channel
            .period()
            .map(|period| format_candle_key(period, &self.pair))
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.channel {
            Channel::Trades => write!(f, "{}/trades", self.pair),
            Channel::Candles(period) => write!(f, "{}/candles:{}", self.pair, period),
        }
    }
}

pub fn format_candle_key(period: CandlePeriod, pair: &Pair) -> String {
    format!("{CANDLE_KEY_SOURCE}:{}:{}", period.as_code(), pair)
}

/// Parse `trade:{period}:{pair}`. Pairs may contain `:` themselves.
pub fn parse_candle_key(key: &str) -> Result<(CandlePeriod, Pair)> {
    let mut parts = key.splitn(3, ':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(CANDLE_KEY_SOURCE), Some(period), Some(pair)) => {
            Ok((CandlePeriod::from_code(period)?, Pair::parse(pair)?))
        }
        _ => Err(BitfinexError::malformed(format!("candle key `{key}`"))),
    }
}
