/*
[INPUT]:  Stream URL, reconnect policy and a StreamRouter for inbound frames
[OUTPUT]: A reconnecting WebSocket session, outbound request sending, connection state
[POS]:    WebSocket layer - transport task (one reader per connection)
[UPDATE]: When changing connection logic, backoff or shutdown semantics
*/

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::http::{BitfinexError, Result};
use crate::ws::log::log_request_sent;
use crate::ws::message::WsRequest;
use crate::ws::router::StreamRouter;

/// Public WebSocket endpoint
pub const PUBLIC_STREAM_URL: &str = "wss://api-pub.bitfinex.com/ws/2";
const DEFAULT_MAX_RETRIES: u32 = 10;

/// Transport configuration
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub url: String,
    /// Consecutive failed connects before the worker gives up
    pub max_retries: u32,
    pub max_backoff: Duration,
    pub outbound_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: PUBLIC_STREAM_URL.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            max_backoff: Duration::from_secs(30),
            outbound_capacity: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    /// `session` starts at 1 and increments on every successful (re)connect
    Connected { session: u64 },
    Disconnected { retry_count: u32 },
    Closed,
}

/// Outbound side of the stream, as seen by the registry owners
#[async_trait]
pub trait RequestSink: Send + Sync {
    async fn send(&self, request: &WsRequest) -> Result<()>;
}

type OutboundSlot = Arc<Mutex<Option<mpsc::Sender<WsMessage>>>>;
type ErrorSlot = Arc<std::sync::Mutex<Option<BitfinexError>>>;

/// Reconnecting WebSocket client for the public Bitfinex stream
#[derive(Debug)]
pub struct BitfinexWebSocket {
    config: StreamConfig,
    outbound_tx: OutboundSlot,
    connection_state: Arc<watch::Sender<ConnectionState>>,
    /// Most recent connect failure, reported once the worker gives up
    last_error: ErrorSlot,
    shutdown: CancellationToken,
    worker_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl BitfinexWebSocket {
    pub fn new(config: StreamConfig) -> Self {
        let (connection_state, _rx) =
            watch::channel(ConnectionState::Disconnected { retry_count: 0 });
        Self {
            config,
            outbound_tx: Arc::new(Mutex::new(None)),
            connection_state: Arc::new(connection_state),
            last_error: Arc::new(std::sync::Mutex::new(None)),
            shutdown: CancellationToken::new(),
            worker_handle: std::sync::Mutex::new(None),
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Spawn the transport worker; every inbound frame goes to `router`
    pub fn start(&self, router: Arc<StreamRouter>) -> Result<()> {
        let mut handle = self
            .worker_handle
            .lock()
            .map_err(|_| BitfinexError::WebSocket("worker handle poisoned".to_string()))?;
        if handle.is_some() {
            return Err(BitfinexError::WebSocket("stream already started".to_string()));
        }

        let worker = StreamWorker {
            config: self.config.clone(),
            outbound_tx: self.outbound_tx.clone(),
            connection_state: self.connection_state.clone(),
            last_error: self.last_error.clone(),
            shutdown: self.shutdown.clone(),
            router,
        };
        *handle = Some(tokio::spawn(worker.run()));
        Ok(())
    }

    /// Wait until a session is up; fails with the last connect error if the worker closes first
    pub async fn wait_connected(&self) -> Result<u64> {
        let mut rx = self.connection_state.subscribe();
        let state = rx
            .wait_for(|state| {
                matches!(
                    state,
                    ConnectionState::Connected { .. } | ConnectionState::Closed
                )
            })
            .await
            .map_err(|_| BitfinexError::NotConnected)?
            .clone();
        match state {
            ConnectionState::Connected { session } => Ok(session),
            _ => Err(self.take_last_error().unwrap_or(BitfinexError::NotConnected)),
        }
    }

    fn take_last_error(&self) -> Option<BitfinexError> {
        self.last_error.lock().ok().and_then(|mut slot| slot.take())
    }

    pub fn subscribe_connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection_state.subscribe()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection_state.borrow().clone()
    }

    /// Stop the worker and wait for it to exit
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self
            .worker_handle
            .lock()
            .ok()
            .and_then(|mut handle| handle.take());
        if let Some(handle) = handle
            && let Err(err) = handle.await
        {
            warn!(error = %err, "stream worker ended abnormally");
        }
    }

    pub async fn send_request(&self, request: &WsRequest) -> Result<()> {
        let text = request.to_text()?;
        let sender = {
            let guard = self.outbound_tx.lock().await;
            guard.clone().ok_or(BitfinexError::NotConnected)?
        };

        sender
            .send(WsMessage::Text(text.into()))
            .await
            .map_err(|_| BitfinexError::NotConnected)?;

        log_request_sent(request);
        Ok(())
    }
}

#[async_trait]
impl RequestSink for BitfinexWebSocket {
    async fn send(&self, request: &WsRequest) -> Result<()> {
        self.send_request(request).await
    }
}

impl Drop for BitfinexWebSocket {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

struct StreamWorker {
    config: StreamConfig,
    outbound_tx: OutboundSlot,
    connection_state: Arc<watch::Sender<ConnectionState>>,
    last_error: ErrorSlot,
    shutdown: CancellationToken,
    router: Arc<StreamRouter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamExit {
    Disconnected,
    Shutdown,
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

impl StreamWorker {
    async fn run(self) {
        let mut retry_count: u32 = 0;
        let mut session: u64 = 0;

        'run: loop {
            if self.shutdown.is_cancelled() {
                break 'run;
            }

            self.set_state(ConnectionState::Connecting);
            info!(url = %self.config.url, "connecting to bitfinex stream");

            let connected = tokio::select! {
                _ = self.shutdown.cancelled() => break 'run,
                connected = connect_async(self.config.url.as_str()) => connected,
            };

            match connected {
                Ok((ws_stream, _response)) => {
                    retry_count = 0;
                    session += 1;
                    self.record_error(None);

                    let (outbound_tx, outbound_rx) = mpsc::channel(self.config.outbound_capacity);
                    *self.outbound_tx.lock().await = Some(outbound_tx);
                    self.set_state(ConnectionState::Connected { session });
                    info!(session, "bitfinex stream connected");

                    let exit = self.stream_loop(ws_stream, outbound_rx).await;
                    *self.outbound_tx.lock().await = None;

                    match exit {
                        StreamExit::Shutdown => break 'run,
                        StreamExit::Disconnected => {
                            self.set_state(ConnectionState::Disconnected { retry_count });
                            warn!(session, "bitfinex stream disconnected; reconnecting");
                            if !self.pause(backoff_duration(1, self.config.max_backoff)).await {
                                break 'run;
                            }
                        }
                    }
                }
                Err(err) => {
                    let err = BitfinexError::from(err);
                    retry_count = retry_count.saturating_add(1);
                    warn_connect_failed(retry_count, &self.config, &err);
                    self.record_error(Some(err));
                    self.set_state(ConnectionState::Disconnected { retry_count });

                    if retry_count >= self.config.max_retries {
                        break 'run;
                    }
                    if !self.pause(backoff_duration(retry_count, self.config.max_backoff)).await {
                        break 'run;
                    }
                }
            }
        }

        *self.outbound_tx.lock().await = None;
        self.set_state(ConnectionState::Closed);
        debug!("bitfinex stream worker stopped");
    }

    fn set_state(&self, state: ConnectionState) {
        self.connection_state.send_replace(state);
    }

    fn record_error(&self, err: Option<BitfinexError>) {
        if let Ok(mut slot) = self.last_error.lock() {
            *slot = err;
        }
    }

    /// Sleep unless shutdown is requested first; `false` means stop
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.shutdown.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    async fn stream_loop(
        &self,
        ws_stream: WsStream,
        mut outbound_rx: mpsc::Receiver<WsMessage>,
    ) -> StreamExit {
        let (mut write, mut read) = ws_stream.split();

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    let _ = write.send(WsMessage::Close(None)).await;
                    return StreamExit::Shutdown;
                }
                outbound = outbound_rx.recv() => {
                    match outbound {
                        Some(message) => {
                            if let Err(err) = write.send(message).await {
                                warn!(error = %err, "ws write failed");
                                return StreamExit::Disconnected;
                            }
                        }
                        None => return StreamExit::Disconnected,
                    }
                }
                incoming = read.next() => {
                    match incoming {
                        Some(Ok(WsMessage::Text(text))) => {
                            self.router.route_text(text.as_str());
                        }
                        Some(Ok(WsMessage::Binary(bytes))) => {
                            if let Ok(text) = std::str::from_utf8(&bytes) {
                                self.router.route_text(text);
                            }
                        }
                        Some(Ok(WsMessage::Close(_))) => {
                            let _ = write.send(WsMessage::Close(None)).await;
                            return StreamExit::Disconnected;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            warn!(error = %err, "ws read failed");
                            return StreamExit::Disconnected;
                        }
                        None => return StreamExit::Disconnected,
                    }
                }
            }
        }
    }
}

fn warn_connect_failed(retry_count: u32, config: &StreamConfig, err: &BitfinexError) {
    if retry_count >= config.max_retries {
        warn!(retry_count, max_retries = config.max_retries, error = %err, "bitfinex stream gave up reconnecting");
    } else {
        let backoff = backoff_duration(retry_count, config.max_backoff);
        warn!(retry_count, ?backoff, error = %err, "bitfinex stream connect failed; retrying with backoff");
    }
}

fn backoff_duration(retry_count: u32, max_backoff: Duration) -> Duration {
    let exp = retry_count.saturating_sub(1).min(63);
    let secs = 1u64 << exp;
    Duration::from_secs(secs).min(max_backoff)
}
