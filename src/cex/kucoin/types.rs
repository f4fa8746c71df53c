use crate::common::{Result, WiredExchangeError, parse_decimal, parse_i64, split_symbol};
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const CANDLES_TOPIC_PREFIX: &str = "/market/candles:";
pub const TICKER_TOPIC_PREFIX: &str = "/market/ticker:";
pub const ALL_TICKERS: &str = "all";

// REST: bullet (connection token)

#[derive(Debug, Deserialize)]
pub struct KucoinResponse<T> {
    pub code: String,
    #[serde(default)]
    pub msg: Option<String>,
    pub data: Option<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulletData {
    pub token: String,
    #[serde(rename = "instanceServers")]
    pub instance_servers: Vec<InstanceServer>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstanceServer {
    pub endpoint: String,
    #[serde(default)]
    pub encrypt: bool,
    #[serde(default)]
    pub protocol: Option<String>,
    /// Milliseconds.
    #[serde(rename = "pingInterval")]
    pub ping_interval: u64,
    /// Milliseconds.
    #[serde(rename = "pingTimeout")]
    pub ping_timeout: u64,
}

/// What the token-issuing endpoint hands back, reduced to the first server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionToken {
    pub endpoint: String,
    pub token: String,
    pub encrypt: bool,
    pub ping_interval_ms: u64,
    pub ping_timeout_ms: u64,
}

impl TryFrom<BulletData> for ConnectionToken {
    type Error = WiredExchangeError;

    fn try_from(data: BulletData) -> Result<Self> {
        let server = data.instance_servers.into_iter().next().ok_or_else(|| {
            WiredExchangeError::ApiError("KuCoin API error: no instance server offered".to_string())
        })?;
        Ok(ConnectionToken {
            endpoint: server.endpoint,
            token: data.token,
            encrypt: server.encrypt,
            ping_interval_ms: server.ping_interval,
            ping_timeout_ms: server.ping_timeout,
        })
    }
}

// Topics

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CandleStickResolution {
    #[serde(rename = "1min")]
    Min1,
    #[serde(rename = "3min")]
    Min3,
    #[serde(rename = "5min")]
    Min5,
    #[serde(rename = "15min")]
    Min15,
    #[serde(rename = "30min")]
    Min30,
    #[serde(rename = "1hour")]
    Hour1,
    #[serde(rename = "2hour")]
    Hour2,
    #[serde(rename = "4hour")]
    Hour4,
    #[serde(rename = "6hour")]
    Hour6,
    #[serde(rename = "8hour")]
    Hour8,
    #[serde(rename = "12hour")]
    Hour12,
    #[serde(rename = "1day")]
    Day1,
    #[serde(rename = "1week")]
    Week1,
}

impl CandleStickResolution {
    pub const ALL: [CandleStickResolution; 13] = [
        Self::Min1,
        Self::Min3,
        Self::Min5,
        Self::Min15,
        Self::Min30,
        Self::Hour1,
        Self::Hour2,
        Self::Hour4,
        Self::Hour6,
        Self::Hour8,
        Self::Hour12,
        Self::Day1,
        Self::Week1,
    ];

    /// Wire value, e.g. `1min`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Min1 => "1min",
            Self::Min3 => "3min",
            Self::Min5 => "5min",
            Self::Min15 => "15min",
            Self::Min30 => "30min",
            Self::Hour1 => "1hour",
            Self::Hour2 => "2hour",
            Self::Hour4 => "4hour",
            Self::Hour6 => "6hour",
            Self::Hour8 => "8hour",
            Self::Hour12 => "12hour",
            Self::Day1 => "1day",
            Self::Week1 => "1week",
        }
    }

    pub fn to_seconds(&self) -> u64 {
        match self {
            Self::Min1 => 60,
            Self::Min3 => 180,
            Self::Min5 => 300,
            Self::Min15 => 900,
            Self::Min30 => 1_800,
            Self::Hour1 => 3_600,
            Self::Hour2 => 7_200,
            Self::Hour4 => 14_400,
            Self::Hour6 => 21_600,
            Self::Hour8 => 28_800,
            Self::Hour12 => 43_200,
            Self::Day1 => 86_400,
            Self::Week1 => 604_800,
        }
    }

    pub fn from_seconds(seconds: u64) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|r| r.to_seconds() == seconds)
            .ok_or_else(|| {
                WiredExchangeError::InvalidSymbol(format!(
                    "{}: no candlestick resolution match",
                    seconds
                ))
            })
    }
}

impl fmt::Display for CandleStickResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CandleStickResolution {
    type Err = WiredExchangeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| WiredExchangeError::InvalidSymbol(format!("unknown resolution: {}", s)))
    }
}

/// A `(base, quote)` trading pair, rendered `BASE-QUOTE`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TickerPair {
    pub base: String,
    pub quote: String,
}

impl TickerPair {
    pub fn new(base: &str, quote: &str) -> Self {
        Self {
            base: base.to_uppercase(),
            quote: quote.to_uppercase(),
        }
    }

    pub fn symbol(&self) -> String {
        format!("{}-{}", self.base, self.quote)
    }
}

/// A `(base, quote, resolution)` candle stream, rendered `BASE-QUOTE_res`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CandleTopic {
    pub base: String,
    pub quote: String,
    pub resolution: CandleStickResolution,
}

impl CandleTopic {
    pub fn new(base: &str, quote: &str, resolution: CandleStickResolution) -> Self {
        Self {
            base: base.to_uppercase(),
            quote: quote.to_uppercase(),
            resolution,
        }
    }

    pub fn symbol(&self) -> String {
        format!("{}-{}", self.base, self.quote)
    }

    pub fn key(&self) -> String {
        format!("{}-{}_{}", self.base, self.quote, self.resolution)
    }
}

impl From<(&str, &str, CandleStickResolution)> for CandleTopic {
    fn from((base, quote, resolution): (&str, &str, CandleStickResolution)) -> Self {
        Self::new(base, quote, resolution)
    }
}

impl From<(&str, &str)> for TickerPair {
    fn from((base, quote): (&str, &str)) -> Self {
        Self::new(base, quote)
    }
}

// Outbound frames

#[derive(Debug, Clone, Serialize)]
pub struct SubscribeRequest<'a> {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub topic: &'a str,
    pub response: bool,
}

impl<'a> SubscribeRequest<'a> {
    pub fn new(id: u64, topic: &'a str) -> Self {
        Self {
            id,
            kind: "subscribe",
            topic,
            response: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PingRequest {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: &'static str,
}

impl PingRequest {
    pub fn new(id: u64) -> Self {
        Self { id, kind: "ping" }
    }
}

// Inbound data

#[derive(Debug, Deserialize)]
pub struct KucoinWsData<T> {
    pub topic: String,
    #[serde(default)]
    pub subject: Option<String>,
    pub data: T,
}

#[derive(Debug, Deserialize)]
pub struct KucoinCandlesData {
    pub symbol: String,
    /// `[start, open, close, high, low, volume, amount]`
    pub candles: Vec<String>,
    /// Nanoseconds.
    #[serde(default)]
    pub time: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct KucoinTickerData {
    #[serde(default)]
    pub sequence: Option<String>,
    pub price: String,
    pub size: String,
    #[serde(rename = "bestAsk")]
    pub best_ask: String,
    #[serde(rename = "bestAskSize")]
    pub best_ask_size: String,
    #[serde(rename = "bestBid")]
    pub best_bid: String,
    #[serde(rename = "bestBidSize")]
    pub best_bid_size: String,
    /// Milliseconds.
    pub time: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub base: String,
    pub quote: String,
    pub resolution: CandleStickResolution,
    pub start_time: DateTime<Utc>,
    pub open: Decimal,
    pub close: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub volume: Decimal,
    pub amount: Decimal,
}

impl Candle {
    /// Parses a `/market/candles:` data message.
    pub fn from_message(text: &str) -> Result<Self> {
        let message: KucoinWsData<KucoinCandlesData> = serde_json::from_str(text)?;
        let key = message
            .topic
            .strip_prefix(CANDLES_TOPIC_PREFIX)
            .ok_or_else(|| WiredExchangeError::MalformedMessage(message.topic.clone()))?;
        let (_, resolution) = key
            .rsplit_once('_')
            .ok_or_else(|| WiredExchangeError::MalformedMessage(message.topic.clone()))?;
        let resolution = CandleStickResolution::from_str(resolution)?;
        let (base, quote) = split_symbol(&message.data.symbol)?;

        let c = &message.data.candles;
        if c.len() < 7 {
            return Err(WiredExchangeError::MalformedMessage(format!(
                "expected 7 candle fields, got {}",
                c.len()
            )));
        }
        let start = parse_i64(&c[0], "start time")?;
        let start_time = Utc
            .timestamp_opt(start, 0)
            .single()
            .ok_or_else(|| WiredExchangeError::MalformedMessage(format!("start time {}", start)))?;

        Ok(Candle {
            base,
            quote,
            resolution,
            start_time,
            open: parse_decimal(&c[1], "open")?,
            close: parse_decimal(&c[2], "close")?,
            high: parse_decimal(&c[3], "high")?,
            low: parse_decimal(&c[4], "low")?,
            volume: parse_decimal(&c[5], "volume")?,
            amount: parse_decimal(&c[6], "amount")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub base: String,
    pub quote: String,
    pub price: Decimal,
    pub size: Decimal,
    pub best_bid: Decimal,
    pub best_bid_size: Decimal,
    pub best_ask: Decimal,
    pub best_ask_size: Decimal,
    pub time: DateTime<Utc>,
}

impl Ticker {
    /// Parses a `/market/ticker:` data message; the `all` topic carries the
    /// symbol in `subject`.
    pub fn from_message(text: &str) -> Result<Self> {
        let message: KucoinWsData<KucoinTickerData> = serde_json::from_str(text)?;
        let symbol = message
            .topic
            .strip_prefix(TICKER_TOPIC_PREFIX)
            .ok_or_else(|| WiredExchangeError::MalformedMessage(message.topic.clone()))?;
        let symbol = if symbol == ALL_TICKERS {
            message
                .subject
                .as_deref()
                .ok_or_else(|| WiredExchangeError::MalformedMessage("missing subject".into()))?
        } else {
            symbol
        };
        let (base, quote) = split_symbol(symbol)?;
        let d = &message.data;
        let time = Utc
            .timestamp_millis_opt(d.time)
            .single()
            .ok_or_else(|| WiredExchangeError::MalformedMessage(format!("time {}", d.time)))?;

        Ok(Ticker {
            base,
            quote,
            price: parse_decimal(&d.price, "price")?,
            size: parse_decimal(&d.size, "size")?,
            best_bid: parse_decimal(&d.best_bid, "best bid")?,
            best_bid_size: parse_decimal(&d.best_bid_size, "best bid size")?,
            best_ask: parse_decimal(&d.best_ask, "best ask")?,
            best_ask_size: parse_decimal(&d.best_ask_size, "best ask size")?,
            time,
        })
    }
}
