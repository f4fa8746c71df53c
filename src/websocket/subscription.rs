//! Subscription requests, topic strings and correlation ids.

use crate::cex::kucoin::types::{
    ALL_TICKERS, CANDLES_TOPIC_PREFIX, CandleTopic, SubscribeRequest, TICKER_TOPIC_PREFIX,
    TickerPair,
};
use crate::common::{Result, WiredExchangeError};
use crate::websocket::message::InboundMessage;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

const ID_FLOOR: u64 = 100_000_000;
const ID_SPAN: u64 = 900_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicFamily {
    Candles,
    Tickers,
}

/// One subscribe request: the topic it covers and the id its ack will carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub id: u64,
    pub family: TopicFamily,
    pub topic: String,
}

impl Subscription {
    pub fn candles(id: u64, topics: &[CandleTopic]) -> Result<Self> {
        if topics.is_empty() {
            return Err(WiredExchangeError::InvalidSymbol(
                "At least one candle topic required".to_string(),
            ));
        }
        Ok(Self {
            id,
            family: TopicFamily::Candles,
            topic: format!("{}{}", CANDLES_TOPIC_PREFIX, candle_topic_keys(topics)),
        })
    }

    /// `None` or an empty slice subscribes to every ticker.
    pub fn tickers(id: u64, pairs: Option<&[TickerPair]>) -> Self {
        let keys = match pairs {
            Some(pairs) if !pairs.is_empty() => ticker_topic_keys(pairs),
            _ => ALL_TICKERS.to_string(),
        };
        Self {
            id,
            family: TopicFamily::Tickers,
            topic: format!("{}{}", TICKER_TOPIC_PREFIX, keys),
        }
    }

    /// Same topic under a fresh correlation id.
    pub fn with_id(&self, id: u64) -> Self {
        Self {
            id,
            ..self.clone()
        }
    }

    /// The JSON subscribe frame.
    pub fn frame(&self) -> Result<String> {
        Ok(serde_json::to_string(&SubscribeRequest::new(self.id, &self.topic))?)
    }
}

/// `AVAX-USDT_1min,MANA-USDT_1min`
pub fn candle_topic_keys(topics: &[CandleTopic]) -> String {
    topics
        .iter()
        .map(CandleTopic::key)
        .collect::<Vec<_>>()
        .join(",")
}

/// `BTC-USDT,ETH-USDT`
pub fn ticker_topic_keys(pairs: &[TickerPair]) -> String {
    pairs
        .iter()
        .map(TickerPair::symbol)
        .collect::<Vec<_>>()
        .join(",")
}

/// Monotonic correlation ids, seeded at random in `[100_000_000, 1_000_000_000)`.
#[derive(Debug)]
pub struct CorrelationIds {
    next: AtomicU64,
}

impl Default for CorrelationIds {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationIds {
    pub fn new() -> Self {
        let seed = (uuid::Uuid::new_v4().as_u128() % ID_SPAN as u128) as u64;
        Self::starting_at(ID_FLOOR + seed)
    }

    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

/// Matches data messages against the streams a strategy subscribed to.
///
/// KuCoin pushes one message per symbol even for a joined subscription, so
/// matching is per symbol: candle messages by exact topic, ticker messages by
/// topic, or by `subject` on the `all` topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicMatcher {
    Candles(HashSet<String>),
    Tickers(HashSet<String>),
    AllTickers,
}

impl TopicMatcher {
    pub fn candles(topics: &[CandleTopic]) -> Self {
        Self::Candles(
            topics
                .iter()
                .map(|t| format!("{}{}", CANDLES_TOPIC_PREFIX, t.key()))
                .collect(),
        )
    }

    pub fn tickers(pairs: Option<&[TickerPair]>) -> Self {
        match pairs {
            Some(pairs) if !pairs.is_empty() => {
                Self::Tickers(pairs.iter().map(TickerPair::symbol).collect())
            }
            _ => Self::AllTickers,
        }
    }

    pub fn matches(&self, message: &InboundMessage) -> bool {
        if message.kind() != Some("message") {
            return false;
        }
        let Some(topic) = message.topic() else {
            return false;
        };
        match self {
            Self::Candles(topics) => topics.contains(topic),
            Self::AllTickers => topic.starts_with(TICKER_TOPIC_PREFIX),
            Self::Tickers(symbols) => match topic.strip_prefix(TICKER_TOPIC_PREFIX) {
                Some(ALL_TICKERS) => message.subject().is_some_and(|s| symbols.contains(s)),
                Some(symbol) => symbols.contains(symbol),
                None => false,
            },
        }
    }
}
