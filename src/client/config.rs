//! Client configuration.

use std::time::Duration;

use crate::error::{Result, SandboxError};

/// Path prefix every sandbox API route lives under.
pub const API_PREFIX: &str = "/_sandbox";

/// Default timeout for buffered requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Default number of additional attempts after a transient failure.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Backoff unit; the wait before retry `n` is `n * retry_delay`.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Default timeout for streaming execution and log tailing.
pub const DEFAULT_STREAM_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Upper bound on `max_retries`.
pub const MAX_RETRIES_CAP: u32 = 10;

/// Immutable configuration for a [`SandboxClient`](crate::client::SandboxClient).
#[derive(Clone)]
pub struct ClientConfig {
    /// Base address including the API prefix, without a trailing slash.
    pub base_url: String,
    /// Bearer credential sent on every request.
    pub token: String,
    /// Default timeout for buffered requests.
    pub timeout: Duration,
    /// Additional attempts after a network error or 5xx response.
    pub max_retries: u32,
    /// Linear backoff unit between attempts.
    pub retry_delay: Duration,
    /// Timeout for streaming requests.
    pub stream_timeout: Duration,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("token", &"<redacted>")
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .field("stream_timeout", &self.stream_timeout)
            .finish()
    }
}

impl ClientConfig {
    /// Create a new config builder.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Shorthand for a config with default timings.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        Self::builder().base_url(base_url).token(token).build()
    }

    /// Full URL for an API path such as `/run`.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

/// Base address for a sandbox reachable under `domain`.
///
/// A bare domain gets `https://`; an explicit scheme is kept as given.
pub fn base_url_for_domain(domain: &str) -> String {
    let domain = domain.trim().trim_end_matches('/');
    if domain.starts_with("http://") || domain.starts_with("https://") {
        format!("{}{}", domain, API_PREFIX)
    } else {
        format!("https://{}{}", domain, API_PREFIX)
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug)]
pub struct ClientConfigBuilder {
    base_url: Option<String>,
    token: Option<String>,
    timeout: Duration,
    max_retries: u32,
    retry_delay: Duration,
    stream_timeout: Duration,
}

impl Default for ClientConfigBuilder {
    fn default() -> Self {
        Self {
            base_url: None,
            token: None,
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            stream_timeout: DEFAULT_STREAM_TIMEOUT,
        }
    }
}

impl ClientConfigBuilder {
    /// Use an explicit base address (the API prefix must already be included).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        let url: String = url.into();
        self.base_url = Some(url.trim().trim_end_matches('/').to_string());
        self
    }

    /// Derive the base address from the sandbox's domain name.
    pub fn domain(mut self, domain: &str) -> Self {
        self.base_url = Some(base_url_for_domain(domain));
        self
    }

    /// Set the bearer credential.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Set the default buffered request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the number of retries after the first attempt.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the linear backoff unit.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Set the streaming request timeout.
    pub fn stream_timeout(mut self, timeout: Duration) -> Self {
        self.stream_timeout = timeout;
        self
    }

    /// Build the configuration, validating all required fields.
    pub fn build(self) -> Result<ClientConfig> {
        let base_url = self
            .base_url
            .filter(|u| !u.is_empty())
            .ok_or_else(|| SandboxError::Config("sandbox address is required".into()))?;
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(SandboxError::Config(format!(
                "sandbox address must be an http(s) URL: {}",
                base_url
            )));
        }

        let token = self
            .token
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| SandboxError::Config("sandbox token is required".into()))?;

        if self.timeout.is_zero() {
            return Err(SandboxError::Config("timeout must be > 0".into()));
        }
        if self.stream_timeout.is_zero() {
            return Err(SandboxError::Config("stream timeout must be > 0".into()));
        }
        if self.max_retries > MAX_RETRIES_CAP {
            return Err(SandboxError::Config(format!(
                "max_retries must be <= {}",
                MAX_RETRIES_CAP
            )));
        }

        Ok(ClientConfig {
            base_url,
            token,
            timeout: self.timeout,
            max_retries: self.max_retries,
            retry_delay: self.retry_delay,
            stream_timeout: self.stream_timeout,
        })
    }
}
