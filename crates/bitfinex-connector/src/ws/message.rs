/*
[INPUT]:  Raw WebSocket text frames and outbound subscription commands
[OUTPUT]: Classified InboundFrame values and serialized WsRequest payloads
[POS]:    WebSocket layer - message parsing and validation
[UPDATE]: When adding new message types or changing format
*/

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::http::{BitfinexError, Result};
use crate::types::{parse_candle_key, ChannelKind, Pair, Subscription};

const UPDATE_TAG: &str = "tu";

/// Server-assigned channel id, valid for one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub i64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Client to server command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsRequest {
    Subscribe(Subscription),
    Unsubscribe(ChannelId),
}

#[derive(Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum OutboundPayload<'a> {
    Subscribe {
        channel: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        symbol: Option<&'a str>,
        #[serde(skip_serializing_if = "Option::is_none")]
        key: Option<String>,
    },
    Unsubscribe {
        #[serde(rename = "chanId")]
        chan_id: ChannelId,
    },
}

impl WsRequest {
    pub fn subscribe(subscription: Subscription) -> Self {
        WsRequest::Subscribe(subscription)
    }

    pub fn unsubscribe(chan_id: ChannelId) -> Self {
        WsRequest::Unsubscribe(chan_id)
    }

    pub fn to_json(&self) -> Result<Value> {
        Ok(serde_json::to_value(self.payload())?)
    }

    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.payload())?)
    }

    fn payload(&self) -> OutboundPayload<'_> {
        match self {
            WsRequest::Subscribe(subscription) => match subscription.kind() {
                ChannelKind::Trades => OutboundPayload::Subscribe {
                    channel: ChannelKind::Trades.as_str(),
                    symbol: Some(subscription.pair.as_str()),
                    key: None,
                },
                ChannelKind::Candles => OutboundPayload::Subscribe {
                    channel: ChannelKind::Candles.as_str(),
                    symbol: None,
                    key: subscription.candle_key(),
                },
            },
            WsRequest::Unsubscribe(chan_id) => OutboundPayload::Unsubscribe { chan_id: *chan_id },
        }
    }
}

impl fmt::Display for WsRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WsRequest::Subscribe(subscription) => write!(f, "subscribe {subscription}"),
            WsRequest::Unsubscribe(chan_id) => write!(f, "unsubscribe chan {chan_id}"),
        }
    }
}

/// A text frame, classified once at the router entry
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Event(ServerEvent),
    Data {
        chan_id: ChannelId,
        payload: DataPayload,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Subscribed {
        chan_id: ChannelId,
        subscription: Subscription,
    },
    Unsubscribed {
        chan_id: ChannelId,
    },
    Info {
        version: Option<u64>,
        code: Option<i64>,
        message: Option<String>,
    },
    Error {
        code: Option<i64>,
        message: String,
    },
    /// Any other event, or a confirmation for a channel this connector does not route
    Other(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum DataPayload {
    /// `[chanId, "tu", record]`
    Update(Value),
    /// `[chanId, "hb"]`, `[chanId, "te", ..]` and other tags that carry nothing to route
    Tag(String),
    /// `[chanId, record]`
    Record(Value),
    /// `[chanId, [record, ..]]`
    Snapshot(Vec<Value>),
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    event: String,
    #[serde(rename = "chanId")]
    chan_id: Option<i64>,
    channel: Option<String>,
    symbol: Option<String>,
    key: Option<String>,
    version: Option<u64>,
    code: Option<i64>,
    msg: Option<String>,
}

impl InboundFrame {
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|err| BitfinexError::malformed(format!("frame is not JSON: {err}")))?;
        match value {
            Value::Object(_) => {
                let raw: RawEvent = serde_json::from_value(value)
                    .map_err(|err| BitfinexError::malformed(format!("event frame: {err}")))?;
                Ok(InboundFrame::Event(ServerEvent::from_raw(raw)?))
            }
            Value::Array(items) => Self::parse_data(items),
            _ => Err(BitfinexError::malformed("frame is neither object nor array")),
        }
    }

    fn parse_data(mut items: Vec<Value>) -> Result<Self> {
        if items.len() < 2 {
            return Err(BitfinexError::malformed(format!(
                "data frame has {} elements",
                items.len()
            )));
        }
        let chan_id = items[0]
            .as_i64()
            .map(ChannelId)
            .ok_or_else(|| BitfinexError::malformed("data frame without channel id"))?;

        let payload = match items.swap_remove(1) {
            Value::String(tag) if tag == UPDATE_TAG => {
                // swap_remove moved the last element into slot 1
                if items.len() != 2 {
                    return Err(BitfinexError::malformed("update frame without record"));
                }
                DataPayload::Update(items.swap_remove(1))
            }
            Value::String(tag) => DataPayload::Tag(tag),
            Value::Array(inner) if inner.first().is_some_and(Value::is_array) || inner.is_empty() => {
                DataPayload::Snapshot(inner)
            }
            record @ Value::Array(_) => DataPayload::Record(record),
            other => {
                return Err(BitfinexError::malformed(format!(
                    "unexpected data payload {other}"
                )));
            }
        };

        Ok(InboundFrame::Data { chan_id, payload })
    }
}

impl ServerEvent {
    fn from_raw(raw: RawEvent) -> Result<Self> {
        match raw.event.as_str() {
            "subscribed" => {
                let chan_id = raw
                    .chan_id
                    .map(ChannelId)
                    .ok_or_else(|| BitfinexError::malformed("subscribed without chanId"))?;
                let channel = raw.channel.unwrap_or_default();
                let subscription = match ChannelKind::from_wire(&channel) {
                    Some(ChannelKind::Trades) => {
                        let symbol = raw
                            .symbol
                            .ok_or_else(|| BitfinexError::malformed("trades subscribed without symbol"))?;
                        Subscription::trades(Pair::parse(&symbol)?)
                    }
                    Some(ChannelKind::Candles) => {
                        let key = raw
                            .key
                            .ok_or_else(|| BitfinexError::malformed("candles subscribed without key"))?;
                        let (period, pair) = parse_candle_key(&key)?;
                        Subscription::candles(pair, period)
                    }
                    None => return Ok(ServerEvent::Other(format!("subscribed:{channel}"))),
                };
                Ok(ServerEvent::Subscribed {
                    chan_id,
                    subscription,
                })
            }
            "unsubscribed" => raw
                .chan_id
                .map(|chan_id| ServerEvent::Unsubscribed {
                    chan_id: ChannelId(chan_id),
                })
                .ok_or_else(|| BitfinexError::malformed("unsubscribed without chanId")),
            "info" => Ok(ServerEvent::Info {
                version: raw.version,
                code: raw.code,
                message: raw.msg,
            }),
            "error" => Ok(ServerEvent::Error {
                code: raw.code,
                message: raw.msg.unwrap_or_default(),
            }),
            _ => Ok(ServerEvent::Other(raw.event)),
        }
    }
}
