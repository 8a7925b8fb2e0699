/*
[INPUT]:  Exchange enumerations (sides, channel kinds, candle periods)
[OUTPUT]: Typed Rust enums with serialization support
[POS]:    Data layer - type definitions for API communication
[UPDATE]: When the exchange adds channels or candle widths
*/

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::http::{BitfinexError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Positive amounts are buys; zero and negative amounts are sells.
    pub fn from_amount(amount: Decimal) -> Self {
        if amount > Decimal::ZERO {
            Side::Buy
        } else {
            Side::Sell
        }
    }
}

/// Logical stream kind multiplexed over the public WebSocket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Trades,
    Candles,
}

impl ChannelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelKind::Trades => "trades",
            ChannelKind::Candles => "candles",
        }
    }

    /// Map a wire channel name; `None` for channels this connector does not route.
    pub fn from_wire(channel: &str) -> Option<Self> {
        match channel {
            "trades" => Some(ChannelKind::Trades),
            "candles" => Some(ChannelKind::Candles),
            _ => None,
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Candle bucket widths supported by the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CandlePeriod {
    OneMinute,
    FiveMinutes,
    FifteenMinutes,
    ThirtyMinutes,
    OneHour,
    ThreeHours,
    SixHours,
    TwelveHours,
    OneDay,
    OneWeek,
    TwoWeeks,
    OneMonth,
}

const PERIOD_TABLE: [(CandlePeriod, u32, &str); 12] = [
    (CandlePeriod::OneMinute, 60, "1m"),
    (CandlePeriod::FiveMinutes, 300, "5m"),
    (CandlePeriod::FifteenMinutes, 900, "15m"),
    (CandlePeriod::ThirtyMinutes, 1_800, "30m"),
    (CandlePeriod::OneHour, 3_600, "1h"),
    (CandlePeriod::ThreeHours, 10_800, "3h"),
    (CandlePeriod::SixHours, 21_600, "6h"),
    (CandlePeriod::TwelveHours, 43_200, "12h"),
    (CandlePeriod::OneDay, 86_400, "1D"),
    (CandlePeriod::OneWeek, 604_800, "7D"),
    (CandlePeriod::TwoWeeks, 1_209_600, "14D"),
    (CandlePeriod::OneMonth, 2_592_000, "1M"),
];

impl CandlePeriod {
    pub const ALL: [CandlePeriod; 12] = [
        CandlePeriod::OneMinute,
        CandlePeriod::FiveMinutes,
        CandlePeriod::FifteenMinutes,
        CandlePeriod::ThirtyMinutes,
        CandlePeriod::OneHour,
        CandlePeriod::ThreeHours,
        CandlePeriod::SixHours,
        CandlePeriod::TwelveHours,
        CandlePeriod::OneDay,
        CandlePeriod::OneWeek,
        CandlePeriod::TwoWeeks,
        CandlePeriod::OneMonth,
    ];

    /// Look up a period by its length in seconds
    pub fn from_seconds(seconds: u32) -> Result<Self> {
        PERIOD_TABLE
            .iter()
            .find(|(_, secs, _)| *secs == seconds)
            .map(|(period, _, _)| *period)
            .ok_or_else(|| BitfinexError::UnsupportedPeriod(seconds.to_string()))
    }

    /// Look up a period by its exchange code (case-sensitive: `1m` is not `1M`)
    pub fn from_code(code: &str) -> Result<Self> {
        PERIOD_TABLE
            .iter()
            .find(|(_, _, c)| *c == code)
            .map(|(period, _, _)| *period)
            .ok_or_else(|| BitfinexError::UnsupportedPeriod(code.to_string()))
    }

    /// Resolve caller input (seconds or code) against the period table
    pub fn resolve(input: impl Into<PeriodInput>) -> Result<Self> {
        match input.into() {
            PeriodInput::Seconds(seconds) => Self::from_seconds(seconds),
            PeriodInput::Code(code) => Self::from_code(&code),
            PeriodInput::Period(period) => Ok(period),
        }
    }

    pub fn as_seconds(self) -> u32 {
        self.entry().1
    }

    pub fn as_code(self) -> &'static str {
        self.entry().2
    }

    fn entry(self) -> &'static (CandlePeriod, u32, &'static str) {
        &PERIOD_TABLE[self as usize]
    }
}

impl fmt::Display for CandlePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_code())
    }
}

impl FromStr for CandlePeriod {
    type Err = BitfinexError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_code(s)
    }
}

impl TryFrom<u32> for CandlePeriod {
    type Error = BitfinexError;

    fn try_from(seconds: u32) -> Result<Self> {
        Self::from_seconds(seconds)
    }
}

impl Serialize for CandlePeriod {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_code())
    }
}

impl<'de> Deserialize<'de> for CandlePeriod {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        // serde_json hands exact numbers to untagged enums as `Number`
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Seconds(u32),
            Code(String),
            Number(serde_json::Number),
        }

        let input = match Raw::deserialize(deserializer)? {
            Raw::Seconds(seconds) => PeriodInput::Seconds(seconds),
            Raw::Code(code) => PeriodInput::Code(code),
            Raw::Number(number) => match number.as_u64().and_then(|n| u32::try_from(n).ok()) {
                Some(seconds) => PeriodInput::Seconds(seconds),
                None => return Err(serde::de::Error::custom(BitfinexError::UnsupportedPeriod(number.to_string()))),
            },
        };
        CandlePeriod::resolve(input).map_err(serde::de::Error::custom)
    }
}

/// Candle period as supplied by a caller, before validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeriodInput {
    Seconds(u32),
    Code(String),
    Period(CandlePeriod),
}

impl From<u32> for PeriodInput {
    fn from(seconds: u32) -> Self {
        PeriodInput::Seconds(seconds)
    }
}

impl From<&str> for PeriodInput {
    fn from(code: &str) -> Self {
        PeriodInput::Code(code.to_string())
    }
}

impl From<String> for PeriodInput {
    fn from(code: String) -> Self {
        PeriodInput::Code(code)
    }
}

impl From<CandlePeriod> for PeriodInput {
    fn from(period: CandlePeriod) -> Self {
        PeriodInput::Period(period)
    }
}
