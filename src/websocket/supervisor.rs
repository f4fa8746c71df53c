//! Supervised KuCoin WebSocket connection.
//!
//! [`KucoinWebSocket::open`] spawns one session task that connects, runs the
//! receive loop and reconnects whenever the transport goes away, until
//! [`KucoinWebSocket::close`] is called. Inbound frames are dispatched through
//! the [`HandlerChain`] on that task, one at a time. Outbound frames (caller
//! sends, subscriptions, pings) go through a channel owned by the current
//! connection and are written from the same loop.
//!
//! # Lifecycle
//!
//! ```text
//! Ready --open--> Connected --transport lost--> Ready (reconnect)
//!   any --close--> Closing --session ends--> Ready
//! ```
//!
//! Every exit from `Connected` notifies all handlers with
//! [`Notification::ConnectionLost`] and then drops the connection-scoped ones
//! (welcome, pong, pending acks). Caller strategies survive.
//!
//! Handlers may register other handlers from inside `handle` or
//! `on_notification`. Insertions are queued and merged into the chain the
//! next time it is touched, so they never contend with a dispatch in progress.

use crate::cex::kucoin::types::{CandleTopic, PingRequest, TickerPair};
use crate::common::{Result, WiredExchangeError};
use crate::websocket::chain::HandlerChain;
use crate::websocket::config::ConnectionConfig;
use crate::websocket::handler::{
    CandleStrategy, MessageHandler, Notification, PongHandler, SubscriptionAckHandler,
    TickerStrategy, WelcomeHandler,
};
use crate::websocket::liveness::LivenessMonitor;
use crate::websocket::message::InboundMessage;
use crate::websocket::subscription::{CorrelationIds, Subscription};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

const INITIAL_BACKOFF: Duration = Duration::from_millis(250);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No transport; either never opened or between reconnects.
    Ready,
    /// A transport is open and the receive loop is running.
    Connected,
    /// `close` was called; the session is winding down.
    Closing,
}

struct Session {
    token: CancellationToken,
    task: JoinHandle<()>,
}

struct Inner {
    config: ConnectionConfig,
    state: Mutex<ConnectionState>,
    chain: Mutex<HandlerChain>,
    /// Handlers waiting to be merged into `chain`, oldest first.
    pending: Mutex<Vec<Box<dyn MessageHandler>>>,
    /// Raised by the welcome handler, lowered when the connection is lost.
    ready: Arc<watch::Sender<bool>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    ids: CorrelationIds,
    session: Mutex<Option<Session>>,
    /// Live subscriptions of the current session, one per topic.
    subscriptions: Mutex<Vec<Subscription>>,
    live_monitors: AtomicUsize,
}

impl Inner {
    /// Locks the chain with every queued insertion applied.
    fn lock_chain<T>(&self, f: impl FnOnce(&mut HandlerChain) -> T) -> T {
        let mut chain = self.chain.lock();
        self.merge_pending(&mut chain);
        f(&mut chain)
    }

    fn merge_pending(&self, chain: &mut HandlerChain) {
        let pending = std::mem::take(&mut *self.pending.lock());
        for handler in pending {
            chain.insert(handler);
        }
    }

    /// Records `subscription`, replacing an older one for the same topic.
    fn remember(&self, subscription: Subscription) {
        let mut subscriptions = self.subscriptions.lock();
        subscriptions.retain(|s| s.topic != subscription.topic);
        subscriptions.push(subscription);
    }
}

/// Handle to a supervised connection. Clones share the same connection.
#[derive(Clone)]
pub struct KucoinWebSocket {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for KucoinWebSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KucoinWebSocket")
            .field("endpoint", &self.inner.config.endpoint)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl KucoinWebSocket {
    pub fn new(config: ConnectionConfig) -> Self {
        Self::with_chain(config, HandlerChain::new())
    }

    /// Starts from a prepared chain, e.g. one built with a custom sink.
    pub fn with_chain(config: ConnectionConfig, chain: HandlerChain) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(ConnectionState::Ready),
                chain: Mutex::new(chain),
                pending: Mutex::new(Vec::new()),
                ready: Arc::new(ready),
                outbound: Mutex::new(None),
                ids: CorrelationIds::new(),
                session: Mutex::new(None),
                subscriptions: Mutex::new(Vec::new()),
                live_monitors: AtomicUsize::new(0),
            }),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// Starts the session task on the current runtime and returns at once.
    ///
    /// Calling it while a session is running does nothing. Calling it while a
    /// previous session is still closing queues the new one behind it.
    pub fn open(&self) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| WiredExchangeError::Config(format!("open requires a tokio runtime: {}", e)))?;
        let url = self.inner.config.url()?;

        let mut session = self.inner.session.lock();
        if let Some(current) = session.as_ref() {
            if !current.token.is_cancelled() && !current.task.is_finished() {
                debug!("session already running");
                return Ok(());
            }
        }
        let previous = session.take();
        let token = CancellationToken::new();
        let inner = self.inner.clone();
        let session_token = token.clone();
        let task = runtime.spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.task.await;
            }
            run_session(inner, session_token, url).await;
        });
        *session = Some(Session { token, task });
        Ok(())
    }

    /// Stops the session. The loop exits at its next checkpoint without
    /// reconnecting; pending sends fail with `NotConnected`.
    pub fn close(&self) {
        let session = self.inner.session.lock();
        if let Some(session) = session.as_ref() {
            if !session.token.is_cancelled() {
                info!("closing connection");
                *self.inner.state.lock() = ConnectionState::Closing;
                session.token.cancel();
            }
        }
    }

    /// [`close`](Self::close), then waits for the session task to finish.
    pub async fn shutdown(&self) {
        self.close();
        let session = self.inner.session.lock().take();
        if let Some(session) = session {
            if let Err(e) = session.task.await {
                error!(error = %e, "session task failed");
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    /// True once the server's welcome has been received on the current transport.
    pub fn is_connected(&self) -> bool {
        *self.inner.ready.borrow()
    }

    /// Waits up to `timeout` for the connection to become ready.
    pub async fn wait_connection(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, ready_signal(self.inner.ready.subscribe()))
            .await
            .unwrap_or(false)
    }

    /// Sends a text frame once the connection is ready, waiting at most the
    /// configured send timeout.
    pub async fn send(&self, frame: impl Into<String>) -> Result<()> {
        self.send_with_timeout(frame, self.inner.config.send_timeout).await
    }

    pub async fn send_with_timeout(&self, frame: impl Into<String>, timeout: Duration) -> Result<()> {
        let outbound = self.writer(timeout).await?;
        outbound
            .send(Message::Text(frame.into()))
            .map_err(|_| WiredExchangeError::NotConnected)
    }

    /// Waits for the ready signal and returns the current connection's writer.
    async fn writer(&self, timeout: Duration) -> Result<mpsc::UnboundedSender<Message>> {
        let token = self
            .session_token()
            .ok_or(WiredExchangeError::NotConnected)?;
        let ready = self.inner.ready.subscribe();
        tokio::select! {
            _ = token.cancelled() => return Err(WiredExchangeError::NotConnected),
            ready = tokio::time::timeout(timeout, ready_signal(ready)) => {
                if !matches!(ready, Ok(true)) {
                    return Err(WiredExchangeError::NotConnected);
                }
            }
        }

        self.inner
            .outbound
            .lock()
            .clone()
            .ok_or(WiredExchangeError::NotConnected)
    }

    /// Inserts `handler` in front of the chain. Safe to call from inside a
    /// handler.
    pub fn insert_handler(&self, handler: Box<dyn MessageHandler>) {
        debug!(handler = handler.name(), "handler queued");
        self.inner.pending.lock().push(handler);
    }

    pub fn register_handler<H: MessageHandler + 'static>(&self, handler: H) {
        self.insert_handler(Box::new(handler));
    }

    /// Handler names in dispatch order.
    pub fn handler_names(&self) -> Vec<String> {
        self.inner
            .lock_chain(|chain| chain.names().into_iter().map(str::to_string).collect())
    }

    pub fn has_pending_ack(&self, id: u64) -> bool {
        self.inner.lock_chain(|chain| chain.has_correlation(id))
    }

    /// Liveness monitors currently running; at most one, and none between
    /// connections.
    pub fn liveness_monitors(&self) -> usize {
        self.inner.live_monitors.load(Ordering::SeqCst)
    }

    /// Live subscriptions of this session, one per topic, with their latest ids.
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.inner.subscriptions.lock().clone()
    }

    pub async fn subscribe_candles(&self, topics: &[CandleTopic]) -> Result<Subscription> {
        let subscription = Subscription::candles(self.inner.ids.next(), topics)?;
        self.subscribe(subscription).await
    }

    /// `None` subscribes to every ticker.
    pub async fn subscribe_tickers(&self, pairs: Option<&[TickerPair]>) -> Result<Subscription> {
        let subscription = Subscription::tickers(self.inner.ids.next(), pairs);
        self.subscribe(subscription).await
    }

    /// Registers `strategy` and subscribes to its candle topics.
    pub async fn register_candle_strategy<S>(&self, strategy: S) -> Result<Subscription>
    where
        S: CandleStrategy + 'static,
    {
        let topics = strategy.topics();
        self.register_handler(strategy);
        self.subscribe_candles(&topics).await
    }

    /// Registers `strategy` and subscribes to its tickers.
    pub async fn register_ticker_strategy<S>(&self, strategy: S) -> Result<Subscription>
    where
        S: TickerStrategy + 'static,
    {
        let pairs = strategy.tickers();
        self.register_handler(strategy);
        self.subscribe_tickers(pairs.as_deref()).await
    }

    /// Waits for the connection, registers the ack handler, sends the request
    /// and returns without waiting for the ack.
    async fn subscribe(&self, subscription: Subscription) -> Result<Subscription> {
        let frame = subscription.frame()?;
        let outbound = self.writer(self.inner.config.send_timeout).await?;
        self.insert_handler(Box::new(SubscriptionAckHandler::new(
            subscription.id,
            &subscription.topic,
        )));
        if outbound.send(Message::Text(frame)).is_err() {
            self.inner
                .lock_chain(|chain| chain.remove_correlation(subscription.id));
            return Err(WiredExchangeError::NotConnected);
        }
        info!(id = subscription.id, topic = %subscription.topic, "subscription requested");
        spawn_ack_timer(&self.inner, subscription.id);
        self.inner.remember(subscription.clone());
        Ok(subscription)
    }

    fn session_token(&self) -> Option<CancellationToken> {
        self.inner
            .session
            .lock()
            .as_ref()
            .map(|s| s.token.clone())
            .filter(|t| !t.is_cancelled())
    }
}

async fn ready_signal(mut ready: watch::Receiver<bool>) -> bool {
    loop {
        if *ready.borrow_and_update() {
            return true;
        }
        if ready.changed().await.is_err() {
            return false;
        }
    }
}

/// Drops the ack handler for `id`, and the subscription it belongs to, if it
/// is still pending after the ack timeout.
fn spawn_ack_timer(inner: &Arc<Inner>, id: u64) {
    let weak = Arc::downgrade(inner);
    let wait = inner.config.ack_timeout;
    tokio::spawn(async move {
        tokio::time::sleep(wait).await;
        let Some(inner) = weak.upgrade() else {
            return;
        };
        if inner.lock_chain(|chain| chain.remove_correlation(id)) {
            inner.subscriptions.lock().retain(|s| s.id != id);
            let e = WiredExchangeError::SubscriptionTimeout { id };
            warn!(error = %e, "pending subscription dropped");
        }
    });
}

/// Sleeps `delay` unless the session ends first. Returns false if it did.
async fn pause(session: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = session.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

async fn run_session(inner: Arc<Inner>, session: CancellationToken, url: String) {
    let mut backoff = INITIAL_BACKOFF;
    let mut connections: u64 = 0;
    inner.subscriptions.lock().clear();
    info!(endpoint = %inner.config.endpoint, connect_id = %inner.config.connect_id, "session started");

    while !session.is_cancelled() {
        let attempt = tokio::select! {
            _ = session.cancelled() => break,
            attempt = tokio::time::timeout(
                inner.config.open_timeout,
                tokio_tungstenite::connect_async(url.as_str()),
            ) => attempt,
        };
        let stream = match attempt {
            Ok(Ok((stream, _))) => stream,
            Ok(Err(e)) => {
                warn!(error = %e, retry_in = ?backoff, "connection attempt failed");
                if !pause(&session, backoff).await {
                    break;
                }
                backoff = std::cmp::min(MAX_BACKOFF, backoff.saturating_mul(2));
                continue;
            }
            Err(_) => {
                warn!(timeout = ?inner.config.open_timeout, retry_in = ?backoff, "connection attempt timed out");
                if !pause(&session, backoff).await {
                    break;
                }
                backoff = std::cmp::min(MAX_BACKOFF, backoff.saturating_mul(2));
                continue;
            }
        };
        backoff = INITIAL_BACKOFF;

        if session.is_cancelled() {
            let mut stream = stream;
            let _ = stream.close(None).await;
            break;
        }

        connections += 1;
        *inner.state.lock() = ConnectionState::Connected;
        info!(connection = connections, "transport connected");
        run_connection(&inner, &session, stream, connections > 1).await;
        if !session.is_cancelled() {
            info!("transport lost, reconnecting");
        }
    }

    *inner.state.lock() = ConnectionState::Ready;
    info!(connections, "session ended");
}

async fn run_connection(
    inner: &Arc<Inner>,
    session: &CancellationToken,
    stream: WsStream,
    reconnected: bool,
) {
    let connection = session.child_token();
    let (mut write, mut read) = stream.split();
    let (outbound, mut frames) = mpsc::unbounded_channel::<Message>();

    let monitor = LivenessMonitor::new(inner.config.ping_interval, inner.config.ping_timeout);
    inner.lock_chain(|chain| {
        chain.insert(Box::new(PongHandler::new(
            monitor.pong_signal(),
            connection.clone(),
        )));
        chain.insert(Box::new(WelcomeHandler::new(inner.ready.clone())));
    });
    *inner.outbound.lock() = Some(outbound.clone());

    let ping_inner = inner.clone();
    let ping_outbound = outbound.clone();
    inner.live_monitors.fetch_add(1, Ordering::SeqCst);
    let liveness = tokio::spawn(monitor.run(connection.clone(), move || {
        let frame = serde_json::to_string(&PingRequest::new(ping_inner.ids.next()))?;
        ping_outbound
            .send(Message::Text(frame))
            .map_err(|_| WiredExchangeError::TransportClosed)
    }));

    let mut resubscribe = reconnected && inner.config.auto_resubscribe;
    loop {
        tokio::select! {
            _ = connection.cancelled() => break,
            Some(frame) = frames.recv() => {
                if let Err(e) = write.send(frame).await {
                    warn!(error = %e, "failed to write frame");
                    break;
                }
            }
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let message = InboundMessage::new(text);
                    let outcome = inner.lock_chain(|chain| {
                        let outcome = chain.dispatch(&message);
                        inner.merge_pending(chain);
                        outcome
                    });
                    trace!(handler = outcome.handler(), "message dispatched");
                    if session.is_cancelled() {
                        break;
                    }
                    if resubscribe && *inner.ready.borrow() {
                        resubscribe = false;
                        resubscribe_all(inner, &outbound);
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    info!(?frame, "server closed the connection");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let e = WiredExchangeError::from(e);
                    warn!(error = %e, "transport error");
                    break;
                }
                None => {
                    warn!(error = %WiredExchangeError::TransportClosed, "stream ended");
                    break;
                }
            }
        }
    }

    *inner.outbound.lock() = None;
    inner.ready.send_replace(false);
    if !session.is_cancelled() {
        *inner.state.lock() = ConnectionState::Ready;
    }
    inner.lock_chain(|chain| {
        chain.notify_all(Notification::ConnectionLost);
        inner.merge_pending(chain);
        let dropped = chain.retain_session_scoped();
        debug!(dropped, "connection-scoped handlers discarded");
    });

    connection.cancel();
    match liveness.await {
        Ok(stats) => debug!(pings = stats.pings, timeouts = stats.timeouts, "liveness monitor joined"),
        Err(e) => error!(error = %e, "liveness monitor failed"),
    }
    inner.live_monitors.fetch_sub(1, Ordering::SeqCst);

    if session.is_cancelled() {
        let closing = async {
            let _ = write.send(Message::Close(None)).await;
            let _ = write.close().await;
        };
        let _ = tokio::time::timeout(inner.config.send_timeout, closing).await;
    }
}

/// Re-sends every session subscription with a fresh correlation id.
fn resubscribe_all(inner: &Arc<Inner>, outbound: &mpsc::UnboundedSender<Message>) {
    let mut subscriptions = inner.subscriptions.lock();
    for subscription in subscriptions.iter_mut() {
        let renewed = subscription.with_id(inner.ids.next());
        let frame = match renewed.frame() {
            Ok(frame) => frame,
            Err(e) => {
                error!(error = %e, topic = %renewed.topic, "failed to build subscribe frame");
                continue;
            }
        };
        inner.lock_chain(|chain| {
            chain.insert(Box::new(SubscriptionAckHandler::new(renewed.id, &renewed.topic)))
        });
        if outbound.send(Message::Text(frame)).is_err() {
            inner.lock_chain(|chain| chain.remove_correlation(renewed.id));
            warn!(topic = %renewed.topic, "connection gone while resubscribing");
            return;
        }
        info!(previous = subscription.id, id = renewed.id, topic = %renewed.topic, "resubscribed");
        spawn_ack_timer(inner, renewed.id);
        *subscription = renewed;
    }
}
