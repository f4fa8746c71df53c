//! Exchange credentials and endpoints.
//!
//! Values are passed explicitly or read from the environment. Variable names
//! follow `<PLATFORM>_<KEY>`, e.g. `KUCOIN_API_KEY`. A `.env` file in the
//! current or a parent directory is loaded first.

/// Loads `.env` from the current or project directory. Call before reading env vars (e.g. in tests).
pub fn load_dotenv() {
    let _ = dotenvy::dotenv();
}

/// API key triple used to sign private requests.
#[derive(Clone)]
pub struct ApiCredentials {
    pub api_key: String,
    pub api_secret: String,
    pub api_passphrase: String,
}

impl std::fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .field("api_passphrase", &"<redacted>")
            .finish()
    }
}

/// Configuration for one exchange REST client.
#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    /// Platform name, lowercase (`kucoin`).
    pub platform: String,
    /// REST host, without the `/api/...` suffix.
    pub host_url: String,
    /// Present only when all three credential variables are set.
    pub credentials: Option<ApiCredentials>,
}

impl ExchangeConfig {
    pub fn new(platform: &str, host_url: &str) -> Self {
        Self {
            platform: platform.to_lowercase(),
            host_url: host_url.trim_end_matches('/').to_string(),
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, credentials: ApiCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Reads `<PLATFORM>_HOST_URL`, `<PLATFORM>_API_KEY`, `<PLATFORM>_API_SECRET`
    /// and `<PLATFORM>_API_PASSPHRASE`, falling back to `default_host` for the URL.
    pub fn from_env(platform: &str, default_host: &str) -> Self {
        load_dotenv();
        let host_url = env_value(platform, "host_url").unwrap_or_else(|| default_host.to_string());
        let credentials = match (
            env_value(platform, "api_key"),
            env_value(platform, "api_secret"),
            env_value(platform, "api_passphrase"),
        ) {
            (Some(api_key), Some(api_secret), Some(api_passphrase)) => Some(ApiCredentials {
                api_key,
                api_secret,
                api_passphrase,
            }),
            _ => None,
        };
        Self {
            credentials,
            ..Self::new(platform, &host_url)
        }
    }
}

fn env_value(platform: &str, key: &str) -> Option<String> {
    let name = format!("{}_{}", platform, key).to_uppercase();
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_trims_trailing_slash() {
        let config = ExchangeConfig::new("KuCoin", "https://api.kucoin.com/");
        assert_eq!(config.platform, "kucoin");
        assert_eq!(config.host_url, "https://api.kucoin.com");
        assert!(config.credentials.is_none());
    }

    #[test]
    fn debug_redacts_secrets() {
        let creds = ApiCredentials {
            api_key: "key".into(),
            api_secret: "secret".into(),
            api_passphrase: "phrase".into(),
        };
        let printed = format!("{:?}", creds);
        assert!(printed.contains("key"));
        assert!(!printed.contains("secret\""));
        assert!(!printed.contains("phrase\""));
    }
}
