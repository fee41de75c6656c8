use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::client::config::{
    ClientConfig, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY, DEFAULT_STREAM_TIMEOUT,
    DEFAULT_TIMEOUT,
};
use crate::error::{Result, SandboxError};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxctlConfig {
    pub sandbox: SandboxTarget,
    pub client: ClientSettings,
}

/// Which sandbox to talk to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxTarget {
    /// Full API base address (takes precedence over `domain`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Sandbox domain name; the API prefix is appended automatically
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Bearer credential
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Request timing and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Buffered request timeout in seconds
    pub timeout_seconds: u64,
    /// Retries after the first attempt on network errors and 5xx responses
    pub max_retries: u32,
    /// Linear backoff unit in milliseconds
    pub retry_delay_ms: u64,
    /// Streaming execution and log tailing timeout in seconds
    pub stream_timeout_seconds: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            timeout_seconds: DEFAULT_TIMEOUT.as_secs(),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY.as_millis() as u64,
            stream_timeout_seconds: DEFAULT_STREAM_TIMEOUT.as_secs(),
        }
    }
}

impl SandboxctlConfig {
    /// Apply command-line/environment overrides on top of file values.
    pub fn with_overrides(
        mut self,
        url: Option<String>,
        domain: Option<String>,
        token: Option<String>,
    ) -> Self {
        if url.is_some() || domain.is_some() {
            self.sandbox.url = url;
            self.sandbox.domain = domain;
        }
        if token.is_some() {
            self.sandbox.token = token;
        }
        self
    }

    /// Build the immutable client configuration.
    pub fn client_config(&self) -> Result<ClientConfig> {
        let mut builder = ClientConfig::builder()
            .timeout(Duration::from_secs(self.client.timeout_seconds))
            .max_retries(self.client.max_retries)
            .retry_delay(Duration::from_millis(self.client.retry_delay_ms))
            .stream_timeout(Duration::from_secs(self.client.stream_timeout_seconds));

        builder = match (&self.sandbox.url, &self.sandbox.domain) {
            (Some(url), _) => builder.base_url(url.as_str()),
            (None, Some(domain)) => builder.domain(domain),
            (None, None) => {
                return Err(SandboxError::Config(
                    "no sandbox configured; pass --url or --domain, or set sandbox.url in the config file"
                        .to_string(),
                ))
            }
        };

        if let Some(token) = &self.sandbox.token {
            builder = builder.token(token.as_str());
        }

        builder.build()
    }
}
