/*
[INPUT]:  WebSocket configuration and subscription channels
[OUTPUT]: Routed market events, subscription state and reconnect replay
[POS]:    WebSocket layer - real-time data streams
[UPDATE]: When adding new channels or changing connection logic
*/

pub mod client;
mod log;
pub mod message;
pub mod registry;
pub mod router;
pub mod supervisor;

pub use client::{
    BitfinexWebSocket, ConnectionState, PUBLIC_STREAM_URL, RequestSink, StreamConfig,
};
pub use message::{ChannelId, DataPayload, InboundFrame, ServerEvent, WsRequest};
pub use registry::{Registration, SubscriptionRegistry, SubscriptionState};
pub use router::{EventSink, RouteOutcome, StreamRouter};
pub use supervisor::ReconnectSupervisor;
