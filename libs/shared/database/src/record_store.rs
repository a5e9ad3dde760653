use anyhow::{anyhow, Result};
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_ENCODING, CONTENT_TYPE},
    Client,
};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, error};

use shared_config::AppConfig;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Authenticated HTTP client for the clinical-record store
#[derive(Debug)]
pub struct RecordStoreClient {
    client: Client,
    base_url: String,
    api_key: String,
    auth_token: Option<String>,
}

impl RecordStoreClient {
    pub fn new(config: &AppConfig) -> Result<Self> {
        Self::with_timeout(config, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Every request, body included, must finish within `timeout`
    pub fn with_timeout(config: &AppConfig, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: config.record_store_url.trim_end_matches('/').to_string(),
            api_key: config.record_store_api_key.clone(),
            auth_token: config.record_store_auth_token.clone(),
        })
    }

    fn get_headers(&self, content_encoding: Option<&str>) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();

        headers.insert("apikey", HeaderValue::from_str(&self.api_key)?);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(token) = &self.auth_token {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", token))?,
            );
        }

        if let Some(encoding) = content_encoding {
            headers.insert(CONTENT_ENCODING, HeaderValue::from_str(encoding)?);
        }

        Ok(headers)
    }

    /// POST an already-serialized body, optionally tagged with a content encoding
    pub async fn post_encoded<T>(
        &self,
        path: &str,
        body: Vec<u8>,
        content_encoding: Option<&str>,
    ) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!("Posting {} bytes to {} (encoding: {:?})", body.len(), url, content_encoding);

        let response = self
            .client
            .post(&url)
            .headers(self.get_headers(content_encoding)?)
            .body(body)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    async fn parse_response<T>(response: reqwest::Response) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await?;
            error!("Record store error ({}): {}", status, error_text);

            return Err(match status.as_u16() {
                401 | 403 => anyhow!("Record store rejected credentials: {}", error_text),
                413 => anyhow!("Batch too large for record store: {}", error_text),
                _ => anyhow!("Record store error ({}): {}", status, error_text),
            });
        }

        let data = response.json::<T>().await?;
        Ok(data)
    }
}
