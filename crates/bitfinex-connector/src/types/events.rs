/*
[INPUT]:  Decoded trades and candles from history or the live stream
[OUTPUT]: Tagged public events (BuyTrade, SellTrade, Candle)
[POS]:    Data layer - the single event type fanned out to consumers
[UPDATE]: When adding new event kinds
*/

use serde::{Deserialize, Serialize};

use super::enums::ChannelKind;
use super::models::{Candle, Pair, SequenceKey, Trade};
use super::subscription::SubscriptionKey;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum MarketEvent {
    BuyTrade(Trade),
    SellTrade(Trade),
    Candle(Candle),
}

impl MarketEvent {
    /// Classify a trade by the sign of its amount
    pub fn from_trade(trade: Trade) -> Self {
        if trade.is_buy() {
            MarketEvent::BuyTrade(trade)
        } else {
            MarketEvent::SellTrade(trade)
        }
    }

    pub fn pair(&self) -> &Pair {
        match self {
            MarketEvent::BuyTrade(trade) | MarketEvent::SellTrade(trade) => &trade.pair,
            MarketEvent::Candle(candle) => &candle.pair,
        }
    }

    pub fn kind(&self) -> ChannelKind {
        match self {
            MarketEvent::BuyTrade(_) | MarketEvent::SellTrade(_) => ChannelKind::Trades,
            MarketEvent::Candle(_) => ChannelKind::Candles,
        }
    }

    pub fn key(&self) -> SubscriptionKey {
        SubscriptionKey::new(self.pair().clone(), self.kind())
    }

    pub fn sequence_key(&self) -> SequenceKey {
        match self {
            MarketEvent::BuyTrade(trade) | MarketEvent::SellTrade(trade) => trade.sequence_key(),
            MarketEvent::Candle(candle) => candle.sequence_key(),
        }
    }

    pub fn as_trade(&self) -> Option<&Trade> {
        match self {
            MarketEvent::BuyTrade(trade) | MarketEvent::SellTrade(trade) => Some(trade),
            MarketEvent::Candle(_) => None,
        }
    }

    pub fn as_candle(&self) -> Option<&Candle> {
        match self {
            MarketEvent::Candle(candle) => Some(candle),
            _ => None,
        }
    }
}

impl From<Trade> for MarketEvent {
    fn from(trade: Trade) -> Self {
        MarketEvent::from_trade(trade)
    }
}

impl From<Candle> for MarketEvent {
    fn from(candle: Candle) -> Self {
        MarketEvent::Candle(candle)
    }
}
