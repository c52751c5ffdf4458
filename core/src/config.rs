//! Client configuration.

use std::fmt;
use std::time::Duration;

use crate::error::ApiError;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub const ENV_BASE_URL: &str = "STOFWARE_BASE_URL";
pub const ENV_TOKEN: &str = "STOFWARE_TOKEN";
pub const ENV_TIMEOUT_SECS: &str = "STOFWARE_TIMEOUT_SECS";

/// Connection settings for a `StofwareClient`.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            token: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Read `STOFWARE_BASE_URL`, `STOFWARE_TOKEN` and `STOFWARE_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, ApiError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ApiError> {
        let base_url = lookup(ENV_BASE_URL)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ApiError::InvalidUrl(format!("{ENV_BASE_URL} is not set")))?;
        let mut config = Self::new(&base_url);
        config.token = lookup(ENV_TOKEN).filter(|v| !v.is_empty());
        if let Some(raw) = lookup(ENV_TIMEOUT_SECS) {
            let secs: u64 = raw
                .parse()
                .map_err(|_| ApiError::InvalidInput(format!("{ENV_TIMEOUT_SECS}={raw} is not a number")))?;
            config.timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}
