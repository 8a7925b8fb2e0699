/*
[INPUT]:  Crate modules and public type definitions
[OUTPUT]: Public Bitfinex market-data connector surface
[POS]:    Crate root - module wiring
[UPDATE]: When public modules or exports change
*/

pub mod codec;
pub mod connector;
pub mod http;
pub mod portfolio;
pub mod types;
pub mod ws;

// Re-export the facade
pub use connector::{
    AcceptGate,
    BitfinexConnector,
    ChannelRequest,
    ConnectorConfig,
    DEFAULT_TRADE_HISTORY_LIMIT,
    SubscribeRequest,
};

// Re-export commonly used types from http
pub use http::{
    BitfinexClient,
    BitfinexError,
    ClientConfig,
    HistoryQuery,
    HistorySource,
    Result,
};

pub use portfolio::{Portfolio, RateTable};

// Re-export all types
pub use types::*;

// Re-export commonly used types from ws
pub use ws::{
    BitfinexWebSocket,
    ChannelId,
    ConnectionState,
    EventSink,
    InboundFrame,
    ReconnectSupervisor,
    RequestSink,
    StreamConfig,
    StreamRouter,
    SubscriptionRegistry,
    SubscriptionState,
    WsRequest,
};
