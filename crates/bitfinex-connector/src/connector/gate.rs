/*
[INPUT]:  MarketEvents from history backfill and the stream router
[OUTPUT]: De-duplicated, per-key ordered events on a broadcast channel
[POS]:    Connector layer - high-water-mark gate and public fan-out
[UPDATE]: When changing ordering keys or the fan-out channel
*/

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::broadcast;
use tracing::trace;

use crate::types::{MarketEvent, SequenceKey, SubscriptionKey};
use crate::ws::EventSink;

/// Drops events at or below the last accepted key for their (pair, kind) slot.
///
/// The mark update and the broadcast happen under the slot's entry lock, so
/// emission order per slot equals acceptance order.
#[derive(Debug)]
pub struct AcceptGate {
    marks: DashMap<SubscriptionKey, SequenceKey>,
    events: broadcast::Sender<MarketEvent>,
}

impl AcceptGate {
    pub fn new(capacity: usize) -> Self {
        let (events, _rx) = broadcast::channel(capacity);
        Self {
            marks: DashMap::new(),
            events,
        }
    }

    /// Accept `event` if it is newer than the slot's mark; returns whether it was emitted
    pub fn accept(&self, event: MarketEvent) -> bool {
        let candidate = event.sequence_key();
        match self.marks.entry(event.key()) {
            Entry::Occupied(mut occupied) => {
                if candidate <= *occupied.get() {
                    trace!(key = %occupied.key(), ?candidate, "stale event dropped");
                    return false;
                }
                occupied.insert(candidate);
                let _ = self.events.send(event);
            }
            Entry::Vacant(vacant) => {
                let _marked = vacant.insert(candidate);
                let _ = self.events.send(event);
            }
        }
        true
    }

    /// Forget the slot's mark
    pub fn clear(&self, key: &SubscriptionKey) -> Option<SequenceKey> {
        self.marks.remove(key).map(|(_, mark)| mark)
    }

    pub fn mark(&self, key: &SubscriptionKey) -> Option<SequenceKey> {
        self.marks.get(key).map(|mark| *mark)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MarketEvent> {
        self.events.subscribe()
    }
}

impl EventSink for AcceptGate {
    fn emit(&self, event: MarketEvent) {
        self.accept(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Candle, Pair, Trade};
    use chrono::DateTime;
    use rust_decimal_macros::dec;

    fn trade(id: i64, mts: i64) -> MarketEvent {
        MarketEvent::from_trade(Trade::new(
            Pair::parse("tBTCUSD").expect("pair"),
            id,
            DateTime::from_timestamp_millis(mts).expect("time"),
            dec!(100),
            dec!(0.5),
        ))
    }

    fn candle(pair: &str, mts: i64) -> MarketEvent {
        MarketEvent::Candle(Candle {
            pair: Pair::parse(pair).expect("pair"),
            open_time: DateTime::from_timestamp_millis(mts).expect("time"),
            open: dec!(1),
            close: dec!(1),
            high: dec!(1),
            low: dec!(1),
            volume: dec!(1),
        })
    }

    #[test]
    fn duplicate_event_is_emitted_once() {
        let gate = AcceptGate::new(16);
        let mut rx = gate.subscribe();

        assert!(gate.accept(trade(1, 1_000)));
        assert!(!gate.accept(trade(1, 1_000)));
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn older_and_equal_keys_are_dropped() {
        let gate = AcceptGate::new(16);
        assert!(gate.accept(trade(5, 2_000)));
        assert!(!gate.accept(trade(4, 1_000)));
        assert!(!gate.accept(trade(5, 2_000)));
        // same millisecond, higher id
        assert!(gate.accept(trade(6, 2_000)));
        assert_eq!(
            gate.mark(&trade(6, 2_000).key()),
            Some(SequenceKey::new(2_000, 6))
        );
    }

    #[test]
    fn slots_are_independent() {
        let gate = AcceptGate::new(16);
        assert!(gate.accept(candle("tBTCUSD", 60_000)));
        assert!(gate.accept(candle("tETHUSD", 0)));
        assert!(gate.accept(trade(1, 0)));
        assert!(!gate.accept(candle("tBTCUSD", 60_000)));
    }

    #[test]
    fn clear_resets_the_mark() {
        let gate = AcceptGate::new(16);
        let event = candle("tBTCUSD", 60_000);
        assert!(gate.accept(event.clone()));
        assert_eq!(gate.clear(&event.key()), Some(SequenceKey::new(60_000, 0)));
        assert!(gate.accept(event));
    }

    #[test]
    fn accepts_without_subscribers() {
        let gate = AcceptGate::new(4);
        assert!(gate.accept(trade(1, 1)));
        assert!(gate.accept(trade(2, 2)));
    }
}
