//! Ordered handler chain with first-match dispatch.
//!
//! Newest handlers are tried first. The sink is held apart from the ordered
//! list so it is always last and always present, which makes dispatch total.

use crate::common::{Result, WiredExchangeError};
use crate::websocket::handler::{HandlerScope, MessageHandler, Notification, SinkHandler};
use crate::websocket::message::InboundMessage;
use std::panic::{AssertUnwindSafe, catch_unwind};
use tracing::{debug, error};

/// What happened to a dispatched message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Claimed by the named handler, which stays registered.
    Kept(String),
    /// Claimed by the named one-shot handler, which was removed.
    Removed(String),
    /// The named handler failed; it stays registered.
    Faulted(String),
    /// Nothing else claimed it; the sink took it.
    Sink,
}

impl Dispatch {
    pub fn handler(&self) -> &str {
        match self {
            Dispatch::Kept(name) | Dispatch::Removed(name) | Dispatch::Faulted(name) => name,
            Dispatch::Sink => "sink",
        }
    }
}

pub struct HandlerChain {
    handlers: Vec<Box<dyn MessageHandler>>,
    sink: Box<dyn MessageHandler>,
}

impl Default for HandlerChain {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerChain {
    pub fn new() -> Self {
        Self::with_sink(Box::new(SinkHandler))
    }

    /// Uses `sink` as the fallback; it receives every unclaimed message
    /// without being asked `can_handle`.
    pub fn with_sink(sink: Box<dyn MessageHandler>) -> Self {
        Self {
            handlers: Vec::new(),
            sink,
        }
    }

    /// Inserts `handler` in front of every registered handler.
    pub fn insert(&mut self, handler: Box<dyn MessageHandler>) {
        debug!(handler = handler.name(), "handler registered");
        self.handlers.insert(0, handler);
    }

    /// Number of handlers, sink included.
    pub fn handler_count(&self) -> usize {
        self.handlers.len() + 1
    }

    /// Handler names in dispatch order; the sink's name is always last.
    pub fn names(&self) -> Vec<&str> {
        self.handlers
            .iter()
            .map(|h| h.name())
            .chain(std::iter::once(self.sink.name()))
            .collect()
    }

    pub fn has_correlation(&self, id: u64) -> bool {
        self.handlers.iter().any(|h| h.correlation_id() == Some(id))
    }

    /// Removes the pending ack handler for `id`. Returns whether one was found.
    pub fn remove_correlation(&mut self, id: u64) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|h| h.correlation_id() != Some(id));
        before != self.handlers.len()
    }

    /// Routes `message` to exactly one handler.
    pub fn dispatch(&mut self, message: &InboundMessage) -> Dispatch {
        let position = self.handlers.iter().position(|h| {
            guarded(h.name(), || Ok(h.can_handle(message))).unwrap_or_else(|e| {
                error!(error = %e, "handler failed to match message");
                false
            })
        });

        let Some(index) = position else {
            let name = self.sink.name().to_string();
            let sink = &mut self.sink;
            if let Err(e) = guarded(&name, || sink.handle(message)) {
                error!(error = %e, message = %message.text(), "sink failed to process message");
            }
            return Dispatch::Sink;
        };

        let handler = &mut self.handlers[index];
        let name = handler.name().to_string();
        debug!(handler = %name, "handler found");
        match guarded(&name, || handler.handle(message)) {
            Ok(true) => Dispatch::Kept(name),
            Ok(false) => {
                self.handlers.remove(index);
                debug!(handler = %name, "handler unregistered");
                Dispatch::Removed(name)
            }
            Err(e) => {
                error!(error = %e, message = %message.text(), "something went wrong when processing message");
                Dispatch::Faulted(name)
            }
        }
    }

    /// Delivers `notification` once to every handler, sink included.
    pub fn notify_all(&mut self, notification: Notification) {
        for handler in self.handlers.iter_mut().chain(std::iter::once(&mut self.sink)) {
            let name = handler.name().to_string();
            let result = guarded(&name, || {
                handler.on_notification(notification);
                Ok(())
            });
            if let Err(e) = result {
                error!(error = %e, ?notification, "handler failed to process notification");
            }
        }
    }

    /// Drops connection-scoped handlers. Returns how many were removed.
    pub fn retain_session_scoped(&mut self) -> usize {
        let before = self.handlers.len();
        self.handlers.retain(|h| h.scope() == HandlerScope::Session);
        before - self.handlers.len()
    }
}

/// Runs handler code, turning a panic into a `HandlerFault`.
fn guarded<T>(name: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(WiredExchangeError::handler_fault(name, e.to_string())),
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "panic".to_string());
            Err(WiredExchangeError::handler_fault(name, message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::handler::SubscriptionAckHandler;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Claims messages whose `type` equals `kind` and counts calls.
    struct Probe {
        label: &'static str,
        kind: &'static str,
        keep: bool,
        scope: HandlerScope,
        handled: Arc<AtomicUsize>,
        notified: Arc<AtomicUsize>,
    }

    impl Probe {
        fn new(label: &'static str, kind: &'static str) -> Self {
            Self {
                label,
                kind,
                keep: true,
                scope: HandlerScope::Session,
                handled: Arc::new(AtomicUsize::new(0)),
                notified: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl MessageHandler for Probe {
        fn name(&self) -> &str {
            self.label
        }

        fn can_handle(&self, message: &InboundMessage) -> bool {
            message.kind() == Some(self.kind)
        }

        fn handle(&mut self, _message: &InboundMessage) -> Result<bool> {
            self.handled.fetch_add(1, Ordering::SeqCst);
            Ok(self.keep)
        }

        fn on_notification(&mut self, _notification: Notification) {
            self.notified.fetch_add(1, Ordering::SeqCst);
        }

        fn scope(&self) -> HandlerScope {
            self.scope
        }
    }

    struct Faulty {
        panics: bool,
    }

    impl MessageHandler for Faulty {
        fn can_handle(&self, message: &InboundMessage) -> bool {
            message.kind() == Some("message")
        }

        fn handle(&mut self, _message: &InboundMessage) -> Result<bool> {
            if self.panics {
                panic!("boom");
            }
            Err(WiredExchangeError::ApiError("bad payload".into()))
        }
    }

    fn msg(kind: &str) -> InboundMessage {
        InboundMessage::new(format!(r#"{{"type":"{}"}}"#, kind))
    }

    #[test]
    fn unmatched_messages_reach_the_sink() {
        let mut chain = HandlerChain::new();
        assert_eq!(chain.dispatch(&msg("anything")), Dispatch::Sink);
        assert_eq!(chain.dispatch(&InboundMessage::new("garbage")), Dispatch::Sink);

        let probe = Probe::new("probe", "pong");
        let handled = probe.handled.clone();
        chain.insert(Box::new(probe));
        assert_eq!(chain.dispatch(&msg("welcome")), Dispatch::Sink);
        assert_eq!(handled.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn newest_handler_wins_and_only_one_runs() {
        let mut chain = HandlerChain::new();
        let older = Probe::new("older", "message");
        let newer = Probe::new("newer", "message");
        let (older_count, newer_count) = (older.handled.clone(), newer.handled.clone());
        chain.insert(Box::new(older));
        chain.insert(Box::new(newer));

        assert_eq!(chain.names(), vec!["newer", "older", "SinkHandler"]);
        assert_eq!(chain.dispatch(&msg("message")), Dispatch::Kept("newer".into()));
        assert_eq!(newer_count.load(Ordering::SeqCst), 1);
        assert_eq!(older_count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn sink_stays_last_after_every_insert() {
        let mut chain = HandlerChain::new();
        for label in ["a", "b", "c"] {
            chain.insert(Box::new(Probe::new(label, "x")));
            assert_eq!(chain.names().last(), Some(&"SinkHandler"));
        }
        assert_eq!(chain.handler_count(), 4);
    }

    #[test]
    fn one_shot_handler_is_removed() {
        let mut chain = HandlerChain::new();
        let mut once = Probe::new("once", "welcome");
        once.keep = false;
        chain.insert(Box::new(once));

        assert_eq!(chain.dispatch(&msg("welcome")), Dispatch::Removed("once".into()));
        assert_eq!(chain.dispatch(&msg("welcome")), Dispatch::Sink);
        assert_eq!(chain.names(), vec!["SinkHandler"]);
    }

    #[test]
    fn stale_correlation_id_falls_through() {
        let mut chain = HandlerChain::new();
        chain.insert(Box::new(SubscriptionAckHandler::new(100_000_001, "t")));
        assert!(chain.has_correlation(100_000_001));

        let ack = InboundMessage::new(r#"{"id":"100000001","type":"ack"}"#);
        assert!(matches!(chain.dispatch(&ack), Dispatch::Removed(_)));
        assert!(!chain.has_correlation(100_000_001));
        assert_eq!(chain.dispatch(&ack), Dispatch::Sink);
    }

    #[test]
    fn remove_correlation_only_touches_that_id() {
        let mut chain = HandlerChain::new();
        chain.insert(Box::new(SubscriptionAckHandler::new(1, "a")));
        chain.insert(Box::new(SubscriptionAckHandler::new(2, "b")));
        assert!(chain.remove_correlation(1));
        assert!(!chain.remove_correlation(1));
        assert!(chain.has_correlation(2));
    }

    #[test]
    fn faulting_handlers_do_not_corrupt_the_chain() {
        let mut chain = HandlerChain::new();
        let tail = Probe::new("tail", "message");
        let tail_count = tail.handled.clone();
        chain.insert(Box::new(tail));
        chain.insert(Box::new(Faulty { panics: false }));

        assert_eq!(chain.dispatch(&msg("message")), Dispatch::Faulted("Faulty".into()));
        assert_eq!(chain.handler_count(), 3);

        chain.insert(Box::new(Faulty { panics: true }));
        assert_eq!(chain.dispatch(&msg("message")), Dispatch::Faulted("Faulty".into()));
        assert_eq!(chain.handler_count(), 4);
        assert_eq!(tail_count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn notify_all_reaches_each_handler_once() {
        let mut chain = HandlerChain::new();
        let a = Probe::new("a", "x");
        let b = Probe::new("b", "y");
        let (a_n, b_n) = (a.notified.clone(), b.notified.clone());
        chain.insert(Box::new(a));
        chain.insert(Box::new(b));

        chain.notify_all(Notification::ConnectionLost);
        assert_eq!(a_n.load(Ordering::SeqCst), 1);
        assert_eq!(b_n.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn connection_scoped_handlers_are_discarded() {
        let mut chain = HandlerChain::new();
        let mut transient = Probe::new("transient", "x");
        transient.scope = HandlerScope::Connection;
        chain.insert(Box::new(Probe::new("strategy", "y")));
        chain.insert(Box::new(transient));
        chain.insert(Box::new(SubscriptionAckHandler::new(7, "t")));

        assert_eq!(chain.retain_session_scoped(), 2);
        assert_eq!(chain.names(), vec!["strategy", "SinkHandler"]);
    }
}
