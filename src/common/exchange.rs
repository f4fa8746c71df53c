use crate::common::{Result, WiredExchangeError};
use async_trait::async_trait;

/// Signs an outgoing REST request in place (adds the exchange's auth headers).
///
/// Implementations see the final method, path (with query string) and body.
pub trait RequestSigner: Send + Sync {
    fn sign(&self, request: &mut reqwest::Request) -> Result<()>;
}

// Common exchange trait definition
#[async_trait]
pub trait ExchangeTrait: Send + Sync {
    // Exchange specific methods
    fn api_base(&self) -> &str;
    fn client(&self) -> &reqwest::Client;
    fn exchange_name(&self) -> &str;

    /// Signer for private endpoints, if credentials are configured.
    fn signer(&self) -> Option<&dyn RequestSigner> {
        None
    }

    // Default implementations
    async fn get<T: for<'de> serde::Deserialize<'de>>(&self, endpoint: &str) -> Result<T> {
        let url = format!("{}/{}", self.api_base(), endpoint);
        let request = self.client().get(&url).build()?;
        self.execute(request).await
    }

    async fn post<T: for<'de> serde::Deserialize<'de>>(
        &self,
        endpoint: &str,
        authenticated: bool,
    ) -> Result<T> {
        let url = format!("{}/{}", self.api_base(), endpoint);
        let mut request = self.client().post(&url).build()?;
        if authenticated {
            let signer = self.signer().ok_or_else(|| {
                WiredExchangeError::Config(format!(
                    "{} credentials required for {}",
                    self.exchange_name(),
                    endpoint
                ))
            })?;
            signer.sign(&mut request)?;
        }
        self.execute(request).await
    }

    async fn execute<T: for<'de> serde::Deserialize<'de>>(
        &self,
        request: reqwest::Request,
    ) -> Result<T> {
        tracing::debug!(method = %request.method(), url = %request.url(), "sending request");
        let response = self.client().execute(request).await?;

        let status = response.status();
        tracing::debug!(%status, "response received");

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(WiredExchangeError::ApiError(format!(
                "{} API error: {} - {}",
                self.exchange_name(),
                status,
                error_text
            )));
        }

        Ok(response.json().await?)
    }

    // Trait methods
    async fn health_check(&self) -> Result<()>;
}
