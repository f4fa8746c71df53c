use crate::cex::kucoin::types::ConnectionToken;
use crate::common::{Result, WiredExchangeError};
use std::time::Duration;

/// Connect attempts that take longer are abandoned and retried.
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(10);
/// How long `send` waits for the connection to become ready.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(3);
/// How long a subscribe request may stay unacknowledged.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything the supervisor needs to open and keep a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub endpoint: String,
    pub token: String,
    /// Forces `wss://` when the endpoint is given as `ws://`.
    pub encrypt: bool,
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    /// Client-chosen connection id echoed by the server in its welcome.
    pub connect_id: String,
    pub open_timeout: Duration,
    pub send_timeout: Duration,
    pub ack_timeout: Duration,
    /// Re-send every subscription of the session after a reconnect.
    pub auto_resubscribe: bool,
}

impl ConnectionConfig {
    pub fn new(
        endpoint: &str,
        token: &str,
        ping_interval: Duration,
        ping_timeout: Duration,
    ) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            token: token.to_string(),
            encrypt: false,
            ping_interval,
            ping_timeout,
            connect_id: uuid::Uuid::new_v4().simple().to_string(),
            open_timeout: DEFAULT_OPEN_TIMEOUT,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            auto_resubscribe: false,
        }
    }

    pub fn with_encrypt(mut self, encrypt: bool) -> Self {
        self.encrypt = encrypt;
        self
    }

    pub fn with_connect_id(mut self, connect_id: &str) -> Self {
        self.connect_id = connect_id.to_string();
        self
    }

    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    pub fn with_auto_resubscribe(mut self, enabled: bool) -> Self {
        self.auto_resubscribe = enabled;
        self
    }

    /// `{endpoint}?token={token}&connectId={connect_id}`
    pub fn url(&self) -> Result<String> {
        let mut url = reqwest::Url::parse(&self.endpoint)
            .map_err(|e| WiredExchangeError::Config(format!("invalid endpoint {}: {}", self.endpoint, e)))?;
        if self.encrypt && url.scheme() == "ws" {
            url.set_scheme("wss")
                .map_err(|_| WiredExchangeError::Config(format!("cannot encrypt {}", self.endpoint)))?;
        }
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(WiredExchangeError::Config(format!(
                "endpoint must be ws:// or wss://, got {}",
                self.endpoint
            )));
        }
        url.query_pairs_mut()
            .append_pair("token", &self.token)
            .append_pair("connectId", &self.connect_id);
        Ok(url.to_string())
    }
}

impl From<ConnectionToken> for ConnectionConfig {
    fn from(token: ConnectionToken) -> Self {
        Self::new(
            &token.endpoint,
            &token.token,
            Duration::from_millis(token.ping_interval_ms),
            Duration::from_millis(token.ping_timeout_ms),
        )
        .with_encrypt(token.encrypt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_carries_token_and_connect_id() {
        let config = ConnectionConfig::new(
            "wss://ws-api-spot.kucoin.com/",
            "tok+en",
            Duration::from_secs(18),
            Duration::from_secs(10),
        )
        .with_connect_id("abc");
        assert_eq!(
            config.url().unwrap(),
            "wss://ws-api-spot.kucoin.com/?token=tok%2Ben&connectId=abc"
        );
    }

    #[test]
    fn encrypt_upgrades_plain_endpoint() {
        let config = ConnectionConfig::new("ws://127.0.0.1:9000", "t", Duration::ZERO, Duration::ZERO)
            .with_encrypt(true)
            .with_connect_id("c");
        assert_eq!(config.url().unwrap(), "wss://127.0.0.1:9000/?token=t&connectId=c");

        let bad = ConnectionConfig::new("https://example.com", "t", Duration::ZERO, Duration::ZERO);
        assert!(matches!(bad.url(), Err(WiredExchangeError::Config(_))));
    }

    #[test]
    fn from_connection_token() {
        let config = ConnectionConfig::from(ConnectionToken {
            endpoint: "wss://ws-api-spot.kucoin.com/".into(),
            token: "tok".into(),
            encrypt: true,
            ping_interval_ms: 18_000,
            ping_timeout_ms: 10_000,
        });
        assert_eq!(config.ping_interval, Duration::from_secs(18));
        assert_eq!(config.ping_timeout, Duration::from_secs(10));
        assert_eq!(config.connect_id.len(), 32);
        assert!(!config.auto_resubscribe);
        assert_eq!(config.open_timeout, DEFAULT_OPEN_TIMEOUT);
    }
}
