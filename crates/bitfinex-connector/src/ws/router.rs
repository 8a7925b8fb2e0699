/*
[INPUT]:  Text frames from the transport, in arrival order
[OUTPUT]: Registry transitions and MarketEvents handed to an EventSink
[POS]:    WebSocket layer - single-threaded frame dispatch
[UPDATE]: When adding channels or new frame shapes
*/

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::codec::{decode_all, decode_candle, decode_trade};
use crate::http::Result;
use crate::types::{ChannelKind, MarketEvent, Subscription};
use crate::ws::log::{log_other_message_once, log_parse_fail_once, log_snapshot_sample_once};
use crate::ws::message::{ChannelId, DataPayload, InboundFrame, ServerEvent};
use crate::ws::registry::SubscriptionRegistry;

/// Receiver of routed events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: MarketEvent);
}

/// What the router did with one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Emitted(usize),
    Subscribed(ChannelId),
    Unsubscribed(ChannelId),
    Ignored,
    Unresolved(ChannelId),
    Malformed,
}

pub struct StreamRouter {
    registry: Arc<SubscriptionRegistry>,
    sink: Arc<dyn EventSink>,
}

impl StreamRouter {
    pub fn new(registry: Arc<SubscriptionRegistry>, sink: Arc<dyn EventSink>) -> Self {
        Self { registry, sink }
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Route one frame. Malformed frames are logged and dropped.
    pub fn route_text(&self, text: &str) -> RouteOutcome {
        let frame = match InboundFrame::parse(text) {
            Ok(frame) => frame,
            Err(err) => {
                log_parse_fail_once(&err, text);
                return RouteOutcome::Malformed;
            }
        };

        match frame {
            InboundFrame::Event(event) => self.route_event(event, text),
            InboundFrame::Data { chan_id, payload } => match self.route_data(chan_id, payload) {
                Ok(outcome) => outcome,
                Err(err) => {
                    log_parse_fail_once(&err, text);
                    RouteOutcome::Malformed
                }
            },
        }
    }

    fn route_event(&self, event: ServerEvent, raw: &str) -> RouteOutcome {
        match event {
            ServerEvent::Subscribed {
                chan_id,
                subscription,
            } => {
                info!(chan_id = chan_id.0, %subscription, "ws channel subscribed");
                self.registry.confirm_subscribe(chan_id, subscription);
                RouteOutcome::Subscribed(chan_id)
            }
            ServerEvent::Unsubscribed { chan_id } => {
                let removed = self.registry.confirm_unsubscribe(chan_id);
                info!(chan_id = chan_id.0, removed = removed.is_some(), "ws channel unsubscribed");
                RouteOutcome::Unsubscribed(chan_id)
            }
            ServerEvent::Info {
                version,
                code,
                message,
            } => {
                info!(?version, ?code, message = message.as_deref().unwrap_or(""), "ws info");
                RouteOutcome::Ignored
            }
            ServerEvent::Error { code, message } => {
                warn!(?code, %message, "ws error event");
                RouteOutcome::Ignored
            }
            ServerEvent::Other(_) => {
                log_other_message_once(raw);
                RouteOutcome::Ignored
            }
        }
    }

    fn route_data(&self, chan_id: ChannelId, payload: DataPayload) -> Result<RouteOutcome> {
        if let DataPayload::Tag(_) = payload {
            return Ok(RouteOutcome::Ignored);
        }
        let Some(subscription) = self.registry.resolve(chan_id) else {
            debug!(chan_id = chan_id.0, "data for unknown channel dropped");
            return Ok(RouteOutcome::Unresolved(chan_id));
        };

        let events = match payload {
            DataPayload::Update(record) | DataPayload::Record(record) => {
                decode_record(&subscription, &record)?
            }
            DataPayload::Snapshot(records) => {
                log_snapshot_sample_once(chan_id, records.len());
                decode_snapshot(&subscription, records)?
            }
            DataPayload::Tag(_) => Vec::new(),
        };

        let emitted = events.len();
        for event in events {
            self.sink.emit(event);
        }
        Ok(RouteOutcome::Emitted(emitted))
    }
}

fn decode_record(subscription: &Subscription, record: &Value) -> Result<Vec<MarketEvent>> {
    let event = match subscription.kind() {
        ChannelKind::Trades => MarketEvent::from_trade(decode_trade(record, &subscription.pair)?),
        ChannelKind::Candles => MarketEvent::Candle(decode_candle(record, &subscription.pair)?),
    };
    Ok(vec![event])
}

/// Decode every record, then emit oldest first; equal keys keep arrival order
fn decode_snapshot(subscription: &Subscription, records: Vec<Value>) -> Result<Vec<MarketEvent>> {
    let batch = Value::Array(records);
    let mut events: Vec<MarketEvent> = match subscription.kind() {
        ChannelKind::Trades => decode_all(&batch, &subscription.pair, decode_trade)?
            .into_iter()
            .map(MarketEvent::from_trade)
            .collect(),
        ChannelKind::Candles => decode_all(&batch, &subscription.pair, decode_candle)?
            .into_iter()
            .map(MarketEvent::Candle)
            .collect(),
    };
    events.sort_by_key(MarketEvent::sequence_key);
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CandlePeriod, Pair};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<MarketEvent>>);

    impl EventSink for Collect {
        fn emit(&self, event: MarketEvent) {
            if let Ok(mut events) = self.0.lock() {
                events.push(event);
            }
        }
    }

    impl Collect {
        fn take(&self) -> Vec<MarketEvent> {
            std::mem::take(&mut *self.0.lock().expect("lock"))
        }
    }

    fn router() -> (StreamRouter, Arc<Collect>) {
        let sink = Arc::new(Collect::default());
        let router = StreamRouter::new(Arc::new(SubscriptionRegistry::new()), sink.clone());
        (router, sink)
    }

    fn trade_ids(events: &[MarketEvent]) -> Vec<i64> {
        events
            .iter()
            .filter_map(|event| event.as_trade().map(|trade| trade.id))
            .collect()
    }

    #[test]
    fn trade_snapshot_is_emitted_in_sequence_order() {
        let (router, sink) = router();
        router.route_text(
            r#"{"event":"subscribed","channel":"trades","chanId":17,"symbol":"tBTCUSD"}"#,
        );

        let outcome = router.route_text(
            "[17, [[3, 1700000003000, 0.5, 100], [1, 1700000001000, -0.1, 100], [2, 1700000001000, 0.2, 100]]]",
        );

        assert_eq!(outcome, RouteOutcome::Emitted(3));
        let events = sink.take();
        assert_eq!(trade_ids(&events), [1, 2, 3]);
        assert!(matches!(events[0], MarketEvent::SellTrade(_)));
        assert!(matches!(events[1], MarketEvent::BuyTrade(_)));
    }

    #[test]
    fn candle_snapshot_ties_keep_arrival_order() {
        let (router, sink) = router();
        router.route_text(
            r#"{"event":"subscribed","channel":"candles","chanId":20,"key":"trade:5m:tBTCUSD"}"#,
        );
        router.route_text(
            "[20, [[1700000600000, 1, 1, 1, 1, 1], [1700000300000, 2, 2, 2, 2, 2], [1700000300000, 3, 3, 3, 3, 3]]]",
        );

        let opens: Vec<String> = sink
            .take()
            .iter()
            .filter_map(|event| event.as_candle().map(|candle| candle.open.to_string()))
            .collect();
        assert_eq!(opens, ["2", "3", "1"]);
    }

    #[test]
    fn updates_emit_and_tags_are_ignored() {
        let (router, sink) = router();
        router.route_text(
            r#"{"event":"subscribed","channel":"trades","chanId":17,"symbol":"tETHUSD"}"#,
        );

        assert_eq!(router.route_text(r#"[17, "hb"]"#), RouteOutcome::Ignored);
        assert_eq!(
            router.route_text(r#"[17, "te", [9, 1700000000000, 1, 2000]]"#),
            RouteOutcome::Ignored
        );
        assert_eq!(
            router.route_text(r#"[17, "tu", [9, 1700000000000, 1, 2000]]"#),
            RouteOutcome::Emitted(1)
        );

        let events = sink.take();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].pair(), &Pair::parse("tETHUSD").expect("pair"));
    }

    #[test]
    fn candle_updates_arrive_as_flat_records() {
        let (router, sink) = router();
        router.registry().confirm_subscribe(
            ChannelId(30),
            Subscription::candles(Pair::parse("tBTCUSD").expect("pair"), CandlePeriod::OneMinute),
        );

        assert_eq!(
            router.route_text("[30, [1700000060000, 10, 11, 12, 9, 5]]"),
            RouteOutcome::Emitted(1)
        );
        assert!(matches!(sink.take()[0], MarketEvent::Candle(_)));
    }

    #[test]
    fn unknown_channels_and_bad_records_are_dropped() {
        let (router, sink) = router();
        assert_eq!(
            router.route_text(r#"[99, "tu", [1, 1700000000000, 1, 1]]"#),
            RouteOutcome::Unresolved(ChannelId(99))
        );

        router.route_text(
            r#"{"event":"subscribed","channel":"trades","chanId":17,"symbol":"tBTCUSD"}"#,
        );
        assert_eq!(
            router.route_text(r#"[17, "tu", [1, "soon", 1, 1]]"#),
            RouteOutcome::Malformed
        );
        assert_eq!(router.route_text("{broken"), RouteOutcome::Malformed);
        assert!(sink.take().is_empty());
    }

    #[test]
    fn unsubscribed_confirmation_stops_routing() {
        let (router, sink) = router();
        router.route_text(
            r#"{"event":"subscribed","channel":"trades","chanId":17,"symbol":"tBTCUSD"}"#,
        );
        assert_eq!(
            router.route_text(r#"{"event":"unsubscribed","status":"OK","chanId":17}"#),
            RouteOutcome::Unsubscribed(ChannelId(17))
        );
        assert_eq!(
            router.route_text(r#"[17, "tu", [1, 1700000000000, 1, 1]]"#),
            RouteOutcome::Unresolved(ChannelId(17))
        );
        assert!(sink.take().is_empty());
    }
}
