pub mod auth;
pub mod types;

pub use auth::KucoinSigner;
pub use types::{
    Candle, CandleStickResolution, CandleTopic, ConnectionToken, Ticker, TickerPair,
};

use crate::common::{
    ExchangeConfig, ExchangeTrait, RequestSigner, Result, WiredExchangeError, create_http_client,
};
use crate::websocket::{
    CandleStrategy, ConnectionConfig, KucoinWebSocket, Subscription, TickerStrategy,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use types::{BulletData, KucoinResponse};

pub const KUCOIN_PLATFORM: &str = "kucoin";
pub const KUCOIN_HOST_URL: &str = "https://api.kucoin.com";
const SUCCESS_CODE: &str = "200000";

/// KuCoin spot client: REST bootstrap plus one market-data WebSocket.
pub struct Kucoin {
    client: reqwest::Client,
    api_base: String,
    signer: Option<KucoinSigner>,
    auto_resubscribe: bool,
    websocket: Mutex<Option<KucoinWebSocket>>,
}

impl Kucoin {
    /// Reads `KUCOIN_*` variables (see [`ExchangeConfig::from_env`]).
    pub fn new() -> Result<Self> {
        Self::with_config(ExchangeConfig::from_env(KUCOIN_PLATFORM, KUCOIN_HOST_URL))
    }

    pub fn with_config(config: ExchangeConfig) -> Result<Self> {
        Ok(Self {
            client: create_http_client()?,
            api_base: format!("{}/api/v1", config.host_url),
            signer: config.credentials.as_ref().map(KucoinSigner::new),
            auto_resubscribe: false,
            websocket: Mutex::new(None),
        })
    }

    /// Re-send subscriptions after every reconnect of the WebSocket opened later.
    pub fn with_auto_resubscribe(mut self, enabled: bool) -> Self {
        self.auto_resubscribe = enabled;
        self
    }

    /// Asks the bullet endpoint for a WebSocket token and server. The private
    /// endpoint needs credentials.
    pub async fn get_connection_token(&self, private: bool) -> Result<ConnectionToken> {
        let endpoint = if private {
            "bullet-private"
        } else {
            "bullet-public"
        };
        let response: KucoinResponse<BulletData> = self.post(endpoint, private).await?;
        let data = check_response(response)?;
        let token = ConnectionToken::try_from(data)?;
        tracing::debug!(endpoint = %token.endpoint, private, "connection token issued");
        Ok(token)
    }

    /// Opens the market-data connection, or returns the one already open.
    pub async fn open_websocket(&self, private: bool) -> Result<KucoinWebSocket> {
        if let Some(websocket) = self.websocket() {
            return Ok(websocket);
        }
        let token = self.get_connection_token(private).await?;
        let config = ConnectionConfig::from(token).with_auto_resubscribe(self.auto_resubscribe);

        let mut slot = self.websocket.lock();
        if let Some(websocket) = slot.as_ref() {
            return Ok(websocket.clone());
        }
        let websocket = KucoinWebSocket::new(config);
        websocket.open()?;
        *slot = Some(websocket.clone());
        Ok(websocket)
    }

    pub fn websocket(&self) -> Option<KucoinWebSocket> {
        self.websocket.lock().clone()
    }

    /// Opens the public connection if needed, registers `strategy` and
    /// subscribes to its candle topics.
    pub async fn register_candle_strategy<S>(&self, strategy: S) -> Result<Subscription>
    where
        S: CandleStrategy + 'static,
    {
        let websocket = self.open_websocket(false).await?;
        websocket.register_candle_strategy(strategy).await
    }

    /// Opens the public connection if needed, registers `strategy` and
    /// subscribes to its tickers.
    pub async fn register_ticker_strategy<S>(&self, strategy: S) -> Result<Subscription>
    where
        S: TickerStrategy + 'static,
    {
        let websocket = self.open_websocket(false).await?;
        websocket.register_ticker_strategy(strategy).await
    }

    /// Closes the WebSocket and waits for its session to end.
    pub async fn stop_reading(&self) {
        let websocket = self.websocket.lock().take();
        if let Some(websocket) = websocket {
            websocket.shutdown().await;
        }
    }
}

fn check_response<T>(response: KucoinResponse<T>) -> Result<T> {
    if response.code != SUCCESS_CODE {
        return Err(WiredExchangeError::ApiError(format!(
            "KuCoin API error: {} - {}",
            response.code,
            response.msg.as_deref().unwrap_or("Unknown error")
        )));
    }
    response.data.ok_or_else(|| {
        WiredExchangeError::ApiError("KuCoin API error: returned null data".to_string())
    })
}

#[async_trait]
impl ExchangeTrait for Kucoin {
    fn api_base(&self) -> &str {
        &self.api_base
    }

    fn client(&self) -> &reqwest::Client {
        &self.client
    }

    fn exchange_name(&self) -> &str {
        "KuCoin"
    }

    fn signer(&self) -> Option<&dyn RequestSigner> {
        self.signer.as_ref().map(|s| s as &dyn RequestSigner)
    }

    async fn health_check(&self) -> Result<()> {
        // Server time; any well-formed success answer means the API is reachable.
        let response: KucoinResponse<serde_json::Value> = self
            .get("timestamp")
            .await
            .map_err(|_| WiredExchangeError::HealthCheckFailed)?;
        check_response(response).map_err(|_| WiredExchangeError::HealthCheckFailed)?;
        Ok(())
    }
}
