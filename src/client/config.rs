use std::time::Duration;

use secrecy::SecretString;

use crate::client::consts::{API_KEY, BASE_URL, DEFAULT_CAPACITY, DEFAULT_CONNECT_TIMEOUT, GEMINI_API_KEY};

pub struct Config {
    base_url: String,
    api_key: SecretString,
    capacity: usize,
    connect_timeout: Duration,
}

pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.config.base_url = base_url.to_string();
        self
    }

    pub fn with_api_key(mut self, api_key: &str) -> Self {
        self.config.api_key = SecretString::from(api_key.to_string());
        self
    }

    /// Outbound messages queued before `send_audio` starts refusing frames.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.config.capacity = capacity.max(1);
        self
    }

    /// Covers the socket handshake and the wait for `setupComplete`.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Defaults, with the key taken from `GEMINI_API_KEY` or `API_KEY`.
    pub fn new() -> Self {
        let api_key = std::env::var(GEMINI_API_KEY)
            .or_else(|_| std::env::var(API_KEY))
            .unwrap_or_default();
        Self {
            base_url: BASE_URL.to_string(),
            api_key: api_key.into(),
            capacity: DEFAULT_CAPACITY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn api_key(&self) -> &SecretString {
        &self.api_key
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("capacity", &self.capacity)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn builder_overrides_defaults() {
        let config = Config::builder()
            .with_base_url("ws://localhost:9000/live")
            .with_api_key("secret")
            .with_capacity(0)
            .with_connect_timeout(Duration::from_secs(3))
            .build();
        assert_eq!(config.base_url(), "ws://localhost:9000/live");
        assert_eq!(config.api_key().expose_secret(), "secret");
        assert_eq!(config.capacity(), 1);
        assert_eq!(config.connect_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn debug_output_hides_the_key() {
        let config = Config::builder().with_api_key("do-not-print").build();
        assert!(!format!("{:?}", config).contains("do-not-print"));
    }
}
