/*
[INPUT]:  Concurrent registry and gate operations
[OUTPUT]: Test results for subscription bookkeeping under contention
[POS]:    Integration tests - registry and accept gate
[UPDATE]: When registry locking or gate ordering changes
*/

mod common;

use std::sync::Arc;

use bitfinex_connector::{
    AcceptGate, ChannelId, ChannelKind, MarketEvent, Subscription, SubscriptionKey,
    SubscriptionRegistry, SubscriptionState,
};
use common::{drain, pair, trade};
use futures_util::future::join_all;
use rust_decimal_macros::dec;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_registers_leave_one_entry_per_slot() {
    let registry = Arc::new(SubscriptionRegistry::new());

    let tasks = (0..32).map(|i| {
        let registry = registry.clone();
        tokio::spawn(async move {
            let raw = if i % 2 == 0 { "tBTCUSD" } else { "tETHUSD" };
            registry.register(Subscription::trades(pair(raw)))
        })
    });
    let registrations: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.expect("register task"))
        .collect();

    assert_eq!(registry.len(), 2);
    assert!(registrations.iter().all(|registration| registration.superseded.is_none()));
    for raw in ["tBTCUSD", "tETHUSD"] {
        let key = SubscriptionKey::new(pair(raw), ChannelKind::Trades);
        assert_eq!(
            registry.state(&key),
            Some(SubscriptionState::PendingSubscribe)
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_confirms_and_resolves_across_threads() {
    let registry = Arc::new(SubscriptionRegistry::new());
    let pairs = ["tBTCUSD", "tETHUSD", "tLTCUSD", "tXRPUSD"];

    let confirms = pairs.iter().enumerate().map(|(i, raw)| {
        let registry = registry.clone();
        let subscription = Subscription::trades(pair(raw));
        tokio::spawn(async move {
            registry.register(subscription.clone());
            registry.confirm_subscribe(ChannelId(i as i64 + 1), subscription);
        })
    });
    for joined in join_all(confirms).await {
        joined.expect("confirm task");
    }

    let resolves = (1..=pairs.len() as i64).map(|chan| {
        let registry = registry.clone();
        tokio::spawn(async move { registry.resolve(ChannelId(chan)) })
    });
    let resolved: Vec<_> = join_all(resolves)
        .await
        .into_iter()
        .map(|joined| joined.expect("resolve task").expect("bound channel"))
        .collect();

    for (i, subscription) in resolved.iter().enumerate() {
        assert_eq!(subscription.pair, pair(pairs[i]));
    }
    assert_eq!(registry.snapshot_active().len(), pairs.len());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_gate_emits_each_key_once_under_contention() {
    let gate = Arc::new(AcceptGate::new(1024));
    let mut events = gate.subscribe();

    // every task offers the same 50 trades
    let tasks = (0..8).map(|_| {
        let gate = gate.clone();
        tokio::spawn(async move {
            (1..=50)
                .filter(|id| {
                    let event = MarketEvent::from_trade(trade("tBTCUSD", *id, *id * 1_000, dec!(1)));
                    gate.accept(event)
                })
                .count()
        })
    });
    let accepted: usize = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.expect("gate task"))
        .sum();

    let received = drain(&mut events);
    assert_eq!(accepted, received.len());
    let keys: Vec<_> = received.iter().map(MarketEvent::sequence_key).collect();
    assert!(keys.windows(2).all(|window| window[0] < window[1]));
    assert_eq!(keys.last().map(|key| key.time_ms), Some(50_000));
}
