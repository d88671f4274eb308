//! HTTP client for a push gateway
//!
//! Posts one JSON message per device token to `{server_url}/send`, using a
//! bearer API key. The gateway forwards to the device messaging provider.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Serialize;

use crate::config::PushConfig;
use crate::error::{Error, Result};

use super::{Messenger, PushMessage};

/// Request body for POST /send
#[derive(Serialize)]
struct SendRequest<'a> {
    token: &'a str,
    title: &'a str,
    body: &'a str,
    data: &'a std::collections::BTreeMap<String, String>,
}

/// HTTP push gateway client
pub struct PushClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl PushClient {
    /// Create a new push client from configuration
    ///
    /// Returns an error if the configuration is invalid or missing required fields.
    pub fn new(config: PushConfig) -> Result<Self> {
        config.validate()?;

        let base_url = config
            .server_url
            .clone()
            .ok_or_else(|| Error::Config("push.server_url is required".to_string()))?
            .trim_end_matches('/')
            .to_string();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(api_key) = &config.api_key {
            let auth_value = format!("Bearer {}", api_key);
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&auth_value)
                    .map_err(|e| Error::Config(format!("invalid api_key: {}", e)))?,
            );
        }

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url,
        })
    }

    /// Check if the gateway is reachable
    pub async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/health", self.base_url);

        match self.http_client.get(&url).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }
}

#[async_trait]
impl Messenger for PushClient {
    fn name(&self) -> &str {
        "push"
    }

    async fn send(&self, token: &str, message: &PushMessage) -> Result<()> {
        let url = format!("{}/send", self.base_url);

        let request_body = SendRequest {
            token,
            title: &message.title,
            body: &message.body,
            data: &message.data,
        };

        let response = self
            .http_client
            .post(&url)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| Error::Messaging(format!("HTTP request failed: {}", e)))?;

        let status = response.status();

        if status.is_success() {
            Ok(())
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            Err(Error::Messaging(format!(
                "gateway error ({}): {}",
                status, error_text
            )))
        }
    }
}
