/*
[INPUT]:  Connection state changes from the transport, the subscription registry
[OUTPUT]: One subscribe request per live subscription after every reconnect
[POS]:    WebSocket layer - resubscription on reconnect
[UPDATE]: When changing which subscriptions survive a reconnect
*/

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::http::Result;
use crate::ws::client::{ConnectionState, RequestSink};
use crate::ws::message::WsRequest;
use crate::ws::registry::SubscriptionRegistry;

/// Replays the registry onto a fresh connection.
///
/// Bindings from the old connection stay in place until the server confirms
/// the new channels; high-water marks are not touched here.
#[derive(Debug, Clone)]
pub struct ReconnectSupervisor {
    registry: Arc<SubscriptionRegistry>,
}

impl ReconnectSupervisor {
    pub fn new(registry: Arc<SubscriptionRegistry>) -> Self {
        Self { registry }
    }

    /// Send one subscribe per Active/PendingSubscribe entry; returns how many were sent
    pub async fn replay(&self, sink: &dyn RequestSink) -> Result<usize> {
        let purged = self.registry.purge_pending_unsubscribes();
        let subscriptions = self.registry.snapshot_active();
        info!(
            subscriptions = subscriptions.len(),
            purged, "replaying subscriptions after reconnect"
        );

        for subscription in &subscriptions {
            sink.send(&WsRequest::subscribe(subscription.clone())).await?;
        }
        Ok(subscriptions.len())
    }

    /// Watch the transport and replay on every session after the first
    pub fn spawn(
        self,
        mut state_rx: watch::Receiver<ConnectionState>,
        sink: Arc<dyn RequestSink>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut last_session = 0u64;
            loop {
                let state = state_rx.borrow_and_update().clone();
                match state {
                    ConnectionState::Connected { session } if session != last_session => {
                        if last_session != 0
                            && let Err(err) = self.replay(sink.as_ref()).await
                        {
                            warn!(session, error = %err, "subscription replay failed");
                        }
                        last_session = session;
                    }
                    ConnectionState::Closed => break,
                    _ => {}
                }

                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    changed = state_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        })
    }
}
