use crate::common::{Result, WiredExchangeError};

const DEFAULT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);
const USER_AGENT: &str = concat!("wired_exchange/", env!("CARGO_PKG_VERSION"));

pub fn create_http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| WiredExchangeError::Config(format!("Failed to create HTTP client: {}", e)))
}
