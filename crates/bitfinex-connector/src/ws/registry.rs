/*
[INPUT]:  Subscribe/unsubscribe intents from the facade, confirmations from the router
[OUTPUT]: Channel id -> subscription resolution and the set of subscriptions to replay
[POS]:    WebSocket layer - per-connection subscription state machine
[UPDATE]: When changing subscription lifecycle or slot identity
*/

//! Subscription lifecycle:
//!
//! ```text
//! Unsubscribed -> PendingSubscribe -> Active(chan) -> PendingUnsubscribe(chan) -> Unsubscribed
//! ```
//!
//! Entries are keyed by [`SubscriptionKey`] (pair + channel kind); a second
//! registration for the same key supersedes the first. A reverse index maps
//! channel ids back to keys. Neither map guard is held while touching the other.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use crate::types::{Subscription, SubscriptionKey};
use crate::ws::message::ChannelId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    PendingSubscribe,
    Active(ChannelId),
    PendingUnsubscribe(ChannelId),
}

impl SubscriptionState {
    pub fn channel(&self) -> Option<ChannelId> {
        match self {
            SubscriptionState::PendingSubscribe => None,
            SubscriptionState::Active(chan_id) | SubscriptionState::PendingUnsubscribe(chan_id) => {
                Some(*chan_id)
            }
        }
    }
}

/// Handle returned by [`SubscriptionRegistry::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub token: u64,
    /// Channel of the active entry this registration replaced; the caller releases it on the wire
    pub superseded: Option<ChannelId>,
}

#[derive(Debug, Clone)]
struct RegistryEntry {
    subscription: Subscription,
    state: SubscriptionState,
    token: u64,
}

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: DashMap<SubscriptionKey, RegistryEntry>,
    channels: DashMap<ChannelId, SubscriptionKey>,
    next_token: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a PendingSubscribe entry, superseding any entry for the same key
    pub fn register(&self, subscription: Subscription) -> Registration {
        let key = subscription.key();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed) + 1;
        let previous = self.entries.insert(
            key.clone(),
            RegistryEntry {
                subscription,
                state: SubscriptionState::PendingSubscribe,
                token,
            },
        );

        let mut superseded = None;
        if let Some(previous) = previous {
            if let Some(chan_id) = previous.state.channel() {
                self.channels.remove_if(&chan_id, |_, bound| bound == &key);
            }
            if let SubscriptionState::Active(chan_id) = previous.state {
                superseded = Some(chan_id);
            }
            debug!(%key, token, superseded = ?superseded, "subscription superseded");
        }

        Registration { token, superseded }
    }

    /// Bind `chan_id` to `subscription` and mark it Active; the latest confirmation wins
    pub fn confirm_subscribe(&self, chan_id: ChannelId, subscription: Subscription) {
        let key = subscription.key();

        if let Some(stale_key) = self.channels.insert(chan_id, key.clone())
            && stale_key != key
            && let Some(mut stale) = self.entries.get_mut(&stale_key)
            && stale.state.channel() == Some(chan_id)
        {
            stale.state = SubscriptionState::PendingSubscribe;
        }

        let replaced = match self.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                let replaced = entry.state.channel().filter(|previous| *previous != chan_id);
                entry.subscription = subscription;
                entry.state = SubscriptionState::Active(chan_id);
                replaced
            }
            Entry::Vacant(vacant) => {
                let token = self.next_token.fetch_add(1, Ordering::Relaxed) + 1;
                vacant.insert(RegistryEntry {
                    subscription,
                    state: SubscriptionState::Active(chan_id),
                    token,
                });
                None
            }
        };

        if let Some(previous) = replaced {
            self.channels.remove_if(&previous, |_, bound| bound == &key);
        }
        debug!(%key, chan_id = chan_id.0, "subscription active");
    }

    /// Move an Active entry to PendingUnsubscribe, returning the channel to release
    pub fn unsubscribe(&self, key: &SubscriptionKey) -> Option<ChannelId> {
        let mut entry = self.entries.get_mut(key)?;
        match entry.state {
            SubscriptionState::Active(chan_id) => {
                entry.state = SubscriptionState::PendingUnsubscribe(chan_id);
                Some(chan_id)
            }
            _ => None,
        }
    }

    /// Undo [`Self::unsubscribe`] when the release request never reached the wire
    pub fn reactivate(&self, key: &SubscriptionKey, chan_id: ChannelId) -> bool {
        let Some(mut entry) = self.entries.get_mut(key) else {
            return false;
        };
        if entry.state != SubscriptionState::PendingUnsubscribe(chan_id) {
            return false;
        }
        entry.state = SubscriptionState::Active(chan_id);
        true
    }

    /// Drop the entry bound to `chan_id`
    pub fn confirm_unsubscribe(&self, chan_id: ChannelId) -> Option<Subscription> {
        let (_, key) = self.channels.remove(&chan_id)?;
        let (_, entry) = self
            .entries
            .remove_if(&key, |_, entry| entry.state.channel() == Some(chan_id))?;
        debug!(%key, chan_id = chan_id.0, "subscription removed");
        Some(entry.subscription)
    }

    /// Subscription currently delivering data on `chan_id`
    pub fn resolve(&self, chan_id: ChannelId) -> Option<Subscription> {
        let key = self.channels.get(&chan_id)?.value().clone();
        let entry = self.entries.get(&key)?;
        match entry.state {
            SubscriptionState::Active(bound) if bound == chan_id => Some(entry.subscription.clone()),
            _ => None,
        }
    }

    /// Subscriptions to replay after a reconnect (Active and PendingSubscribe)
    pub fn snapshot_active(&self) -> Vec<Subscription> {
        let mut subscriptions: Vec<Subscription> = self
            .entries
            .iter()
            .filter(|entry| {
                matches!(
                    entry.state,
                    SubscriptionState::Active(_) | SubscriptionState::PendingSubscribe
                )
            })
            .map(|entry| entry.subscription.clone())
            .collect();
        subscriptions.sort_by(|a, b| a.key().cmp(&b.key()));
        subscriptions
    }

    /// Forget entries whose unsubscribe was in flight; returns how many were dropped
    pub fn purge_pending_unsubscribes(&self) -> usize {
        let mut released = Vec::new();
        self.entries.retain(|_, entry| match entry.state {
            SubscriptionState::PendingUnsubscribe(chan_id) => {
                released.push(chan_id);
                false
            }
            _ => true,
        });
        for chan_id in &released {
            self.channels.remove(chan_id);
        }
        released.len()
    }

    /// Roll back a registration whose wire request was never sent
    pub fn discard(&self, key: &SubscriptionKey, token: u64) -> bool {
        self.entries
            .remove_if(key, |_, entry| {
                entry.token == token && entry.state == SubscriptionState::PendingSubscribe
            })
            .is_some()
    }

    pub fn state(&self, key: &SubscriptionKey) -> Option<SubscriptionState> {
        self.entries.get(key).map(|entry| entry.state)
    }

    pub fn subscription(&self, key: &SubscriptionKey) -> Option<Subscription> {
        self.entries.get(key).map(|entry| entry.subscription.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CandlePeriod, ChannelKind, Pair};

    fn trades(pair: &str) -> Subscription {
        Subscription::trades(Pair::parse(pair).expect("pair"))
    }

    fn candles(pair: &str, period: CandlePeriod) -> Subscription {
        Subscription::candles(Pair::parse(pair).expect("pair"), period)
    }

    #[test]
    fn register_twice_keeps_one_entry() {
        let registry = SubscriptionRegistry::new();
        let first = registry.register(trades("tBTCUSD"));
        let second = registry.register(trades("tBTCUSD"));

        assert_eq!(registry.len(), 1);
        assert_ne!(first.token, second.token);
        assert_eq!(second.superseded, None);
        assert_eq!(
            registry.state(&trades("tBTCUSD").key()),
            Some(SubscriptionState::PendingSubscribe)
        );
    }

    #[test]
    fn confirmation_activates_and_resolves() {
        let registry = SubscriptionRegistry::new();
        registry.register(trades("tBTCUSD"));
        registry.confirm_subscribe(ChannelId(7), trades("tBTCUSD"));

        assert_eq!(registry.resolve(ChannelId(7)), Some(trades("tBTCUSD")));
        assert_eq!(registry.resolve(ChannelId(8)), None);
    }

    #[test]
    fn confirmation_without_pending_entry_is_accepted() {
        let registry = SubscriptionRegistry::new();
        registry.confirm_subscribe(ChannelId(3), candles("tETHUSD", CandlePeriod::OneHour));

        assert_eq!(
            registry.resolve(ChannelId(3)),
            Some(candles("tETHUSD", CandlePeriod::OneHour))
        );
    }

    #[test]
    fn resolve_fails_after_unsubscribe_confirmation() {
        let registry = SubscriptionRegistry::new();
        registry.register(trades("tBTCUSD"));
        registry.confirm_subscribe(ChannelId(7), trades("tBTCUSD"));

        assert_eq!(registry.unsubscribe(&trades("tBTCUSD").key()), Some(ChannelId(7)));
        assert_eq!(registry.resolve(ChannelId(7)), None);
        assert_eq!(registry.confirm_unsubscribe(ChannelId(7)), Some(trades("tBTCUSD")));
        assert_eq!(registry.resolve(ChannelId(7)), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn unsubscribe_requires_active_entry() {
        let registry = SubscriptionRegistry::new();
        assert_eq!(registry.unsubscribe(&trades("tBTCUSD").key()), None);

        registry.register(trades("tBTCUSD"));
        assert_eq!(registry.unsubscribe(&trades("tBTCUSD").key()), None);
    }

    #[test]
    fn new_period_supersedes_active_candles() {
        let registry = SubscriptionRegistry::new();
        registry.register(candles("tBTCUSD", CandlePeriod::OneMinute));
        registry.confirm_subscribe(ChannelId(10), candles("tBTCUSD", CandlePeriod::OneMinute));

        let registration = registry.register(candles("tBTCUSD", CandlePeriod::FiveMinutes));
        assert_eq!(registration.superseded, Some(ChannelId(10)));
        assert_eq!(registry.resolve(ChannelId(10)), None);

        registry.confirm_subscribe(ChannelId(11), candles("tBTCUSD", CandlePeriod::FiveMinutes));
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.resolve(ChannelId(11)),
            Some(candles("tBTCUSD", CandlePeriod::FiveMinutes))
        );

        // late confirmation for the released channel does not remove the new entry
        assert_eq!(registry.confirm_unsubscribe(ChannelId(10)), None);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn reused_channel_id_demotes_stale_binding() {
        let registry = SubscriptionRegistry::new();
        registry.confirm_subscribe(ChannelId(1), trades("tBTCUSD"));
        registry.confirm_subscribe(ChannelId(1), trades("tETHUSD"));

        assert_eq!(registry.resolve(ChannelId(1)), Some(trades("tETHUSD")));
        assert_eq!(
            registry.state(&trades("tBTCUSD").key()),
            Some(SubscriptionState::PendingSubscribe)
        );
    }

    #[test]
    fn rebinding_releases_previous_channel() {
        let registry = SubscriptionRegistry::new();
        registry.confirm_subscribe(ChannelId(1), trades("tBTCUSD"));
        registry.confirm_subscribe(ChannelId(2), trades("tBTCUSD"));

        assert_eq!(registry.resolve(ChannelId(1)), None);
        assert_eq!(registry.resolve(ChannelId(2)), Some(trades("tBTCUSD")));
    }

    #[test]
    fn snapshot_skips_pending_unsubscribes() {
        let registry = SubscriptionRegistry::new();
        registry.confirm_subscribe(ChannelId(1), trades("tBTCUSD"));
        registry.confirm_subscribe(ChannelId(2), candles("tETHUSD", CandlePeriod::FiveMinutes));
        registry.register(trades("tLTCUSD"));
        registry.confirm_subscribe(ChannelId(3), trades("tXRPUSD"));
        registry.unsubscribe(&trades("tXRPUSD").key());

        let snapshot = registry.snapshot_active();
        assert_eq!(snapshot.len(), 3);
        assert!(!snapshot.contains(&trades("tXRPUSD")));

        assert_eq!(registry.purge_pending_unsubscribes(), 1);
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.resolve(ChannelId(3)), None);
    }

    #[test]
    fn discard_only_removes_matching_pending_registration() {
        let registry = SubscriptionRegistry::new();
        let key = SubscriptionKey::new(Pair::parse("tBTCUSD").expect("pair"), ChannelKind::Trades);
        let stale = registry.register(trades("tBTCUSD"));
        let current = registry.register(trades("tBTCUSD"));

        assert!(!registry.discard(&key, stale.token));
        assert!(registry.discard(&key, current.token));
        assert!(registry.is_empty());
    }

    #[test]
    fn reactivate_restores_channel_after_failed_release() {
        let registry = SubscriptionRegistry::new();
        let key = trades("tBTCUSD").key();
        registry.confirm_subscribe(ChannelId(4), trades("tBTCUSD"));

        assert!(!registry.reactivate(&key, ChannelId(4)));
        assert_eq!(registry.unsubscribe(&key), Some(ChannelId(4)));
        assert_eq!(registry.resolve(ChannelId(4)), None);

        assert!(!registry.reactivate(&key, ChannelId(5)));
        assert!(registry.reactivate(&key, ChannelId(4)));
        assert_eq!(registry.state(&key), Some(SubscriptionState::Active(ChannelId(4))));
        assert_eq!(registry.resolve(ChannelId(4)), Some(trades("tBTCUSD")));
    }
}
