use std::time::Duration;

use url::Url;

use crate::error::Error;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// Tally backend configuration.
///
/// The base URL is a constructor parameter; everything else has a default
/// and a `with_*` override.
///
/// ```rust,ignore
/// use tally_session::BackendConfig;
///
/// let config = BackendConfig::new("https://api.tally.example/v1/".parse()?)
///     .with_timeout(std::time::Duration::from_secs(10));
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct BackendConfig {
    pub(crate) base_url: Url,
    pub(crate) timeout: Duration,
}

impl BackendConfig {
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url: with_trailing_slash(base_url),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Create config from environment variables.
    ///
    /// # Required env vars
    /// - `TALLY_API_URL`: backend base URL
    ///
    /// # Optional env vars
    /// - `TALLY_API_TIMEOUT_SECS`: request timeout in seconds (default 20)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `TALLY_API_URL` is missing or any value
    /// fails to parse.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let base_url: Url = lookup("TALLY_API_URL")
            .ok_or_else(|| Error::Config("TALLY_API_URL is required".into()))?
            .parse()
            .map_err(|e| Error::Config(format!("TALLY_API_URL: {e}")))?;

        let mut config = Self::new(base_url);

        if let Some(secs) = lookup("TALLY_API_TIMEOUT_SECS") {
            let secs: u64 = secs
                .trim()
                .parse()
                .map_err(|e| Error::Config(format!("TALLY_API_TIMEOUT_SECS: {e}")))?;
            config = config.with_timeout(Duration::from_secs(secs));
        }

        Ok(config)
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Backend base URL (always ends with `/`).
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Resolve a relative endpoint path against the base URL.
    pub(crate) fn endpoint(&self, path: &str) -> Result<Url, Error> {
        self.base_url
            .join(path)
            .map_err(|e| Error::Config(format!("endpoint {path}: {e}")))
    }
}

// Url::join drops the last path segment unless the base ends with '/'.
fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}
