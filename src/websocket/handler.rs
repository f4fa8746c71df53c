//! Message handlers and the built-in handler kinds.
//!
//! A handler claims a message with [`MessageHandler::can_handle`], processes it
//! with [`MessageHandler::handle`] and tells the chain whether to keep it
//! registered. One-shot handlers (welcome, subscription ack) return
//! `Ok(false)`; subscriptions and strategies return `Ok(true)`.

use crate::cex::kucoin::types::{CandleTopic, TickerPair};
use crate::common::Result;
use crate::websocket::message::InboundMessage;
use std::sync::Arc;
use tokio::sync::{Notify, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lifecycle events fanned out to every registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Notification {
    ConnectionLost,
}

/// How long a handler stays in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerScope {
    /// Dropped when the connection it was registered on is lost.
    Connection,
    /// Survives reconnects until it asks to be removed.
    Session,
}

pub trait MessageHandler: Send {
    /// Short name used in logs.
    fn name(&self) -> &str {
        short_type_name::<Self>()
    }

    fn can_handle(&self, message: &InboundMessage) -> bool;

    /// Processes a claimed message. `Ok(true)` keeps the handler registered,
    /// `Ok(false)` removes it. An error is logged and the handler is kept.
    fn handle(&mut self, message: &InboundMessage) -> Result<bool>;

    fn on_notification(&mut self, _notification: Notification) {}

    fn scope(&self) -> HandlerScope {
        HandlerScope::Session
    }

    /// Correlation id of the subscription this handler acknowledges, if any.
    fn correlation_id(&self) -> Option<u64> {
        None
    }
}

/// A caller handler subscribed to candle streams.
pub trait CandleStrategy: MessageHandler {
    fn topics(&self) -> Vec<CandleTopic>;
}

/// A caller handler subscribed to ticker streams; `None` means every ticker.
pub trait TickerStrategy: MessageHandler {
    fn tickers(&self) -> Option<Vec<TickerPair>>;
}

impl<H: MessageHandler + ?Sized> MessageHandler for Box<H> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn can_handle(&self, message: &InboundMessage) -> bool {
        (**self).can_handle(message)
    }

    fn handle(&mut self, message: &InboundMessage) -> Result<bool> {
        (**self).handle(message)
    }

    fn on_notification(&mut self, notification: Notification) {
        (**self).on_notification(notification)
    }

    fn scope(&self) -> HandlerScope {
        (**self).scope()
    }

    fn correlation_id(&self) -> Option<u64> {
        (**self).correlation_id()
    }
}

pub(crate) fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

// Built-in handlers

/// Claims the server's welcome frame and raises the ready signal.
pub struct WelcomeHandler {
    ready: Arc<watch::Sender<bool>>,
}

impl WelcomeHandler {
    pub fn new(ready: Arc<watch::Sender<bool>>) -> Self {
        Self { ready }
    }
}

impl MessageHandler for WelcomeHandler {
    fn can_handle(&self, message: &InboundMessage) -> bool {
        !*self.ready.borrow() && message.kind() == Some("welcome")
    }

    fn handle(&mut self, _message: &InboundMessage) -> Result<bool> {
        self.ready.send_replace(true);
        info!("connection acknowledged by server");
        Ok(false)
    }

    fn scope(&self) -> HandlerScope {
        HandlerScope::Connection
    }
}

/// Signals the liveness monitor on every pong; stops it when the connection is lost.
pub struct PongHandler {
    pong: Arc<Notify>,
    liveness: CancellationToken,
}

impl PongHandler {
    pub fn new(pong: Arc<Notify>, liveness: CancellationToken) -> Self {
        Self { pong, liveness }
    }
}

impl MessageHandler for PongHandler {
    fn can_handle(&self, message: &InboundMessage) -> bool {
        message.kind() == Some("pong")
    }

    fn handle(&mut self, _message: &InboundMessage) -> Result<bool> {
        self.pong.notify_one();
        Ok(true)
    }

    fn on_notification(&mut self, notification: Notification) {
        if notification == Notification::ConnectionLost {
            self.liveness.cancel();
        }
    }

    fn scope(&self) -> HandlerScope {
        HandlerScope::Connection
    }
}

/// Waits for the server's answer to one subscribe request, logs it and leaves.
pub struct SubscriptionAckHandler {
    id: u64,
    topic: String,
}

impl SubscriptionAckHandler {
    pub fn new(id: u64, topic: &str) -> Self {
        Self {
            id,
            topic: topic.to_string(),
        }
    }
}

impl MessageHandler for SubscriptionAckHandler {
    fn can_handle(&self, message: &InboundMessage) -> bool {
        message.id() == Some(self.id)
    }

    fn handle(&mut self, message: &InboundMessage) -> Result<bool> {
        if message.kind() == Some("ack") {
            info!(id = self.id, topic = %self.topic, "subscription acknowledged");
        } else {
            warn!(
                id = self.id,
                topic = %self.topic,
                response = %message.text(),
                "unexpected subscription response"
            );
        }
        Ok(false)
    }

    fn scope(&self) -> HandlerScope {
        HandlerScope::Connection
    }

    fn correlation_id(&self) -> Option<u64> {
        Some(self.id)
    }
}

/// Catch-all at the end of the chain.
#[derive(Debug, Default)]
pub struct SinkHandler;

impl MessageHandler for SinkHandler {
    fn can_handle(&self, _message: &InboundMessage) -> bool {
        true
    }

    fn handle(&mut self, message: &InboundMessage) -> Result<bool> {
        if message.is_well_formed() {
            debug!(message = %message.text(), "unhandled message received");
        } else {
            warn!(message = %message.text(), "malformed message received");
        }
        Ok(true)
    }
}
