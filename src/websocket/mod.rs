//! Real-time market data over a supervised WebSocket connection.

pub mod chain;
pub mod config;
pub mod handler;
pub mod liveness;
pub mod message;
pub mod recorder;
pub mod subscription;
pub mod supervisor;

pub use chain::{Dispatch, HandlerChain};
pub use config::ConnectionConfig;
pub use handler::{
    CandleStrategy, HandlerScope, MessageHandler, Notification, PongHandler, SinkHandler,
    SubscriptionAckHandler, TickerStrategy, WelcomeHandler,
};
pub use liveness::{LivenessMonitor, LivenessStats};
pub use message::InboundMessage;
pub use recorder::{RecorderHandler, replay_file, replay_messages};
pub use subscription::{CorrelationIds, Subscription, TopicFamily, TopicMatcher};
pub use supervisor::{ConnectionState, KucoinWebSocket};
