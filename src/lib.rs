//! `wired-exchange`
//!
//! KuCoin market data over a supervised WebSocket: reconnects, ping/pong
//! liveness, and a chain of handlers that each claim the messages they
//! subscribed to.
//!
//! ## Quickstart (candle strategy)
//!
//! ```no_run
//! use wired_exchange::{
//!     Candle, CandleStickResolution, CandleStrategy, CandleTopic, InboundMessage, Kucoin,
//!     MessageHandler, TopicMatcher,
//! };
//!
//! struct PrintCandles {
//!     topics: Vec<CandleTopic>,
//!     matcher: TopicMatcher,
//! }
//!
//! impl MessageHandler for PrintCandles {
//!     fn can_handle(&self, message: &InboundMessage) -> bool {
//!         self.matcher.matches(message)
//!     }
//!
//!     fn handle(&mut self, message: &InboundMessage) -> wired_exchange::Result<bool> {
//!         let candle = Candle::from_message(message.text())?;
//!         println!("{}-{} close={}", candle.base, candle.quote, candle.close);
//!         Ok(true)
//!     }
//! }
//!
//! impl CandleStrategy for PrintCandles {
//!     fn topics(&self) -> Vec<CandleTopic> {
//!         self.topics.clone()
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> wired_exchange::Result<()> {
//! let topics = vec![CandleTopic::new("BTC", "USDT", CandleStickResolution::Min1)];
//! let strategy = PrintCandles { matcher: TopicMatcher::candles(&topics), topics };
//!
//! let kucoin = Kucoin::new()?;
//! kucoin.register_candle_strategy(strategy).await?;
//! tokio::time::sleep(std::time::Duration::from_secs(60)).await;
//! kucoin.stop_reading().await;
//! # Ok(())
//! # }
//! ```

pub mod cex;
pub mod common;
pub mod websocket;

// Re-export common types
pub use cex::Kucoin;
pub use cex::kucoin::{
    Candle, CandleStickResolution, CandleTopic, ConnectionToken, KucoinSigner, Ticker, TickerPair,
};
pub use common::{
    ApiCredentials, ExchangeConfig, ExchangeTrait, RequestSigner, Result,
    WiredExchangeError, load_dotenv,
};
pub use websocket::{
    CandleStrategy, ConnectionConfig, ConnectionState, Dispatch, HandlerChain, HandlerScope,
    InboundMessage, KucoinWebSocket, MessageHandler, Notification, RecorderHandler, Subscription,
    TickerStrategy, TopicMatcher, replay_file, replay_messages,
};
