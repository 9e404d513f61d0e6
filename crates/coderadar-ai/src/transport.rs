//! JSON-over-HTTP plumbing shared by the providers: one client per provider,
//! retries with exponential backoff for rate limits, server errors and
//! connection failures. Client errors (4xx other than 429) fail at once.

use crate::llm_provider::ProviderSettings;
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{provider} returned {status}: {body}")]
    Status {
        provider: &'static str,
        status: StatusCode,
        body: String,
    },

    #[error("{provider} request failed: {source}")]
    Transport {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{provider} response could not be decoded: {source}")]
    Decode {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{provider} response had no text")]
    Empty { provider: &'static str },
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            ProviderError::Transport { source, .. } => source.is_timeout() || source.is_connect(),
            ProviderError::Decode { .. } | ProviderError::Empty { .. } => false,
        }
    }
}

pub struct JsonTransport {
    provider: &'static str,
    client: Client,
    max_retries: u32,
}

impl JsonTransport {
    pub fn new(provider: &'static str, settings: &ProviderSettings) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(settings.timeout).build()?;
        Ok(Self {
            provider,
            client,
            max_retries: settings.max_retries,
        })
    }

    pub fn provider(&self) -> &'static str {
        self.provider
    }

    pub async fn post<B, R>(&self, url: &str, headers: HeaderMap, body: &B) -> Result<R, ProviderError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let mut attempt = 0;
        loop {
            match self.post_once(url, headers.clone(), body).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let delay = INITIAL_BACKOFF * 2u32.pow(attempt);
                    attempt += 1;
                    warn!(
                        provider = self.provider,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "LLM request failed, retrying: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn post_once<B, R>(&self, url: &str, headers: HeaderMap, body: &B) -> Result<R, ProviderError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let provider = self.provider;
        let response = self
            .client
            .post(url)
            .headers(headers)
            .json(body)
            .send()
            .await
            .map_err(|source| ProviderError::Transport { provider, source })?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            body.truncate(MAX_ERROR_BODY);
            return Err(ProviderError::Status {
                provider,
                status,
                body,
            });
        }
        response
            .json::<R>()
            .await
            .map_err(|source| ProviderError::Decode { provider, source })
    }
}
