//! KuCoin API key v2 request signing.

use crate::common::{ApiCredentials, RequestSigner, Result, WiredExchangeError};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{HeaderName, HeaderValue};
use ring::hmac;

const KEY_VERSION: &str = "2";

pub struct KucoinSigner {
    api_key: String,
    key: hmac::Key,
    /// Passphrase signed once with the secret (key version 2).
    signed_passphrase: String,
}

impl std::fmt::Debug for KucoinSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KucoinSigner")
            .field("api_key", &self.api_key)
            .finish_non_exhaustive()
    }
}

impl KucoinSigner {
    pub fn new(credentials: &ApiCredentials) -> Self {
        let key = hmac::Key::new(hmac::HMAC_SHA256, credentials.api_secret.as_bytes());
        let signed_passphrase = sign_base64(&key, credentials.api_passphrase.as_bytes());
        Self {
            api_key: credentials.api_key.clone(),
            key,
            signed_passphrase,
        }
    }

    /// `base64(hmac_sha256(secret, timestamp + METHOD + path + body))`
    pub fn signature(&self, timestamp_ms: u64, method: &str, path: &str, body: &[u8]) -> String {
        let mut payload = Vec::with_capacity(32 + path.len() + body.len());
        payload.extend_from_slice(timestamp_ms.to_string().as_bytes());
        payload.extend_from_slice(method.to_uppercase().as_bytes());
        payload.extend_from_slice(path.as_bytes());
        payload.extend_from_slice(body);
        sign_base64(&self.key, &payload)
    }

    pub fn signed_passphrase(&self) -> &str {
        &self.signed_passphrase
    }

    fn sign_at(&self, request: &mut reqwest::Request, timestamp_ms: u64) -> Result<()> {
        let url = request.url();
        let path = match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        };
        let body = request
            .body()
            .and_then(|b| b.as_bytes())
            .unwrap_or_default();
        let signature = self.signature(timestamp_ms, request.method().as_str(), &path, body);
        tracing::debug!(timestamp = timestamp_ms, %path, "signing request");

        let timestamp = timestamp_ms.to_string();
        let headers = request.headers_mut();
        for (name, value) in [
            ("kc-api-sign", signature.as_str()),
            ("kc-api-timestamp", timestamp.as_str()),
            ("kc-api-key", self.api_key.as_str()),
            ("kc-api-passphrase", self.signed_passphrase.as_str()),
            ("kc-api-key-version", KEY_VERSION),
        ] {
            let value = HeaderValue::from_str(value)
                .map_err(|e| WiredExchangeError::Config(format!("invalid {} header: {}", name, e)))?;
            headers.insert(HeaderName::from_static(name), value);
        }
        Ok(())
    }
}

impl RequestSigner for KucoinSigner {
    fn sign(&self, request: &mut reqwest::Request) -> Result<()> {
        self.sign_at(request, crate::common::get_timestamp_millis())
    }
}

fn sign_base64(key: &hmac::Key, payload: &[u8]) -> String {
    STANDARD.encode(hmac::sign(key, payload).as_ref())
}
