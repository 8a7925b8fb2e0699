/*
[INPUT]:  Decoded wire fields (ids, millisecond timestamps, decimals)
[OUTPUT]: Immutable market records (Pair, Trade, Candle, Ticker)
[POS]:    Data layer - domain records shared by REST and streaming paths
[UPDATE]: When record fields or pair validation rules change
*/

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

use super::enums::Side;
use crate::http::{BitfinexError, Result};

/// Market-type prefix for exchange trading pairs
pub const TRADING_PAIR_PREFIX: char = 't';

/// Validated trading pair identifier, e.g. `tBTCUSD`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Pair(String);

impl Pair {
    /// Validate a prefixed pair. The prefix is never added implicitly.
    pub fn parse(raw: &str) -> Result<Self> {
        let valid = raw
            .strip_prefix(TRADING_PAIR_PREFIX)
            .is_some_and(|symbol| {
                !symbol.is_empty() && !symbol.chars().any(|c| c.is_whitespace() || c == '/')
            });
        if !valid {
            return Err(BitfinexError::InvalidPair(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    /// Build a pair from a bare exchange symbol such as `BTCUSD`
    pub fn from_symbol(symbol: &str) -> Result<Self> {
        Self::parse(&format!("{TRADING_PAIR_PREFIX}{symbol}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Symbol without the market-type prefix
    pub fn symbol(&self) -> &str {
        &self.0[TRADING_PAIR_PREFIX.len_utf8()..]
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Pair {
    type Err = BitfinexError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl AsRef<str> for Pair {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for Pair {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Pair::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Ordering key used for snapshot sorting and de-duplication.
///
/// Compared lexicographically: event time first, then the per-kind tie-break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SequenceKey {
    pub time_ms: i64,
    pub tie: i64,
}

impl SequenceKey {
    pub fn new(time_ms: i64, tie: i64) -> Self {
        Self { time_ms, tie }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub pair: Pair,
    pub id: i64,
    pub time: DateTime<Utc>,
    pub price: Decimal,
    /// Signed amount; the sign encodes the aggressor side
    pub amount: Decimal,
    pub side: Side,
}

impl Trade {
    pub fn new(pair: Pair, id: i64, time: DateTime<Utc>, price: Decimal, amount: Decimal) -> Self {
        Self {
            pair,
            id,
            time,
            price,
            amount,
            side: Side::from_amount(amount),
        }
    }

    pub fn is_buy(&self) -> bool {
        self.side == Side::Buy
    }

    pub fn sequence_key(&self) -> SequenceKey {
        SequenceKey::new(self.time.timestamp_millis(), self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    pub pair: Pair,
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub close: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub volume: Decimal,
}

impl Candle {
    pub fn sequence_key(&self) -> SequenceKey {
        SequenceKey::new(self.open_time.timestamp_millis(), 0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticker {
    pub pair: Pair,
    pub bid: Decimal,
    pub bid_size: Decimal,
    pub ask: Decimal,
    pub ask_size: Decimal,
    pub daily_change: Decimal,
    /// Fraction, e.g. 0.05 for +5%
    pub daily_change_relative: Decimal,
    pub last_price: Decimal,
    pub volume: Decimal,
    pub high: Decimal,
    pub low: Decimal,
}

impl Ticker {
    /// Midpoint between best bid and best ask
    pub fn mid_price(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::from(2)
    }
}
