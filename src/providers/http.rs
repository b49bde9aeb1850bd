use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, COOKIE};
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::config::HttpConfig;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("GET {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("GET {url} returned {status}")]
    Status { url: String, status: u16 },
    #[error("invalid JSON response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

impl FetchError {
    pub fn is_fatal(&self) -> bool {
        !matches!(self, FetchError::Status { .. })
    }
}

#[async_trait]
pub trait JsonFetcher: Send + Sync {
    async fn get_json(&self, url: &str) -> Result<Value, FetchError>;
}

#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn from_config(config: &HttpConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(cookies) = config.cookies.as_deref().filter(|c| !c.trim().is_empty()) {
            let value = HeaderValue::from_str(cookies.trim())
                .context("configured cookie header is not a valid header value")?;
            headers.insert(COOKIE, value);
        }
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl JsonFetcher for HttpClient {
    async fn get_json(&self, url: &str) -> Result<Value, FetchError> {
        debug!("GET {url}");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| FetchError::Transport {
                url: url.to_string(),
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let body = response
            .text()
            .await
            .map_err(|source| FetchError::Transport {
                url: url.to_string(),
                source,
            })?;
        serde_json::from_str(&body).map_err(|source| FetchError::Decode {
            url: url.to_string(),
            source,
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::Value;

    use super::{FetchError, JsonFetcher};

    pub(crate) enum Canned {
        Json(Value),
        Status(u16),
        Garbage,
    }

    #[derive(Default)]
    pub(crate) struct CannedFetcher {
        responses: HashMap<String, Canned>,
        requested: Mutex<Vec<String>>,
    }

    impl CannedFetcher {
        pub(crate) fn with(mut self, prefix: &str, response: Canned) -> Self {
            self.responses.insert(prefix.to_string(), response);
            self
        }

        pub(crate) fn requested(&self) -> Vec<String> {
            self.requested.lock().expect("requested mutex poisoned").clone()
        }
    }

    #[async_trait]
    impl JsonFetcher for CannedFetcher {
        async fn get_json(&self, url: &str) -> Result<Value, FetchError> {
            self.requested
                .lock()
                .expect("requested mutex poisoned")
                .push(url.to_string());
            let found = self
                .responses
                .iter()
                .filter(|(prefix, _)| url.starts_with(prefix.as_str()))
                .max_by_key(|(prefix, _)| prefix.len())
                .map(|(_, response)| response);
            match found {
                Some(Canned::Json(value)) => Ok(value.clone()),
                Some(Canned::Status(status)) => Err(FetchError::Status {
                    url: url.to_string(),
                    status: *status,
                }),
                Some(Canned::Garbage) => Err(FetchError::Decode {
                    url: url.to_string(),
                    source: serde_json::from_str::<Value>("<html>")
                        .expect_err("html is not json"),
                }),
                None => Err(FetchError::Status {
                    url: url.to_string(),
                    status: 404,
                }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::FetchError;

    #[test]
    fn only_status_failures_are_survivable() {
        let status = FetchError::Status {
            url: "https://example.test".to_string(),
            status: 503,
        };
        assert!(!status.is_fatal());

        let decode = FetchError::Decode {
            url: "https://example.test".to_string(),
            source: serde_json::from_str::<serde_json::Value>("{").expect_err("invalid"),
        };
        assert!(decode.is_fatal());
    }
}
