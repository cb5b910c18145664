//! Configuration for the signing pipeline.
//!
//! The core never reads the environment itself: a [`SignerConfig`] is built
//! once (usually by [`SignerConfig::from_env`] in the binary) and passed to
//! the assertion issuer, the remote client and the orchestrator.

use crate::error::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Path of the remote signing endpoint, relative to the base URL's authority.
pub const TICKETS_PATH: &str = "/firma/v2/files/tickets";

/// Entity label embedded in assertions.
pub const DEFAULT_ENTITY: &str = "Universidad de Chile";

/// Default location of the credential decryption key.
pub const DEFAULT_PRIVATE_KEY_PATH: &str = "secret/private.pem";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const MIN_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_TIMEOUT: Duration = Duration::from_secs(300);

/// Signing pipeline configuration.
#[derive(Clone)]
pub struct SignerConfig {
    /// Base URL of the remote signing authority
    pub base_url: String,
    /// Shared secret for assertion MACs
    pub secret: String,
    /// API token key sent with every request
    pub api_token_key: String,
    /// IANA timezone for assertion expirations; the local zone when unset
    pub timezone: Option<String>,
    /// Per-attempt request timeout
    pub timeout: Duration,
    /// PKCS#8 PEM key used to decrypt one-time passwords
    pub private_key_path: PathBuf,
    /// Entity label embedded in assertions
    pub entity: String,
    /// Attempts made when no response is received
    pub max_attempts: u32,
    /// Pause between attempts
    pub retry_backoff: Duration,
}

impl std::fmt::Debug for SignerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignerConfig")
            .field("base_url", &self.base_url)
            .field("secret", &"[REDACTED]")
            .field("api_token_key", &"[REDACTED]")
            .field("timezone", &self.timezone)
            .field("timeout", &self.timeout)
            .field("private_key_path", &self.private_key_path)
            .field("entity", &self.entity)
            .field("max_attempts", &self.max_attempts)
            .field("retry_backoff", &self.retry_backoff)
            .finish()
    }
}

impl SignerConfig {
    /// Configuration with the mandatory values and defaults for the rest.
    pub fn new(base_url: impl Into<String>, secret: impl Into<String>, api_token_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            secret: secret.into(),
            api_token_key: api_token_key.into(),
            timezone: None,
            timeout: DEFAULT_TIMEOUT,
            private_key_path: PathBuf::from(DEFAULT_PRIVATE_KEY_PATH),
            entity: DEFAULT_ENTITY.to_string(),
            max_attempts: 3,
            retry_backoff: Duration::from_secs(1),
        }
    }

    /// Set the assertion timezone.
    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }

    /// Set the request timeout, clamped to 10..=300 seconds.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = clamp_timeout(timeout);
        self
    }

    /// Set the credential key path.
    pub fn with_private_key_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.private_key_path = path.into();
        self
    }

    /// Set the entity label.
    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = entity.into();
        self
    }

    /// Set the retry policy for transport failures.
    pub fn with_retry(mut self, max_attempts: u32, backoff: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_backoff = backoff;
        self
    }

    /// Load from the process environment.
    ///
    /// `SEGPRES_BASE_URL`, `SEGPRES_SECRET` and `SEGPRES_API_TOKEN_KEY` are
    /// mandatory. `APP_TIMEZONE`, `APP_TIMEOUT` (milliseconds) and
    /// `APP_PRIVATE_KEY` are optional.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary variable lookup.
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required =
            |key: &str| get(key).ok_or_else(|| Error::Config(format!("{} is not set", key)));

        let mut config = Self::new(
            required("SEGPRES_BASE_URL")?,
            required("SEGPRES_SECRET")?,
            required("SEGPRES_API_TOKEN_KEY")?,
        );

        if let Some(timezone) = get("APP_TIMEZONE") {
            config = config.with_timezone(timezone);
        }
        if let Some(timeout) = get("APP_TIMEOUT") {
            match timeout.trim().parse::<u64>() {
                Ok(ms) => config = config.with_timeout(Duration::from_millis(ms)),
                Err(e) => log::warn!(
                    "Unable to parse APP_TIMEOUT ({}), using {} ms",
                    e,
                    config.timeout.as_millis()
                ),
            }
        }
        if let Some(path) = get("APP_PRIVATE_KEY") {
            config = config.with_private_key_path(path);
        }

        config.validate()?;
        Ok(config)
    }

    /// `<scheme>://<authority>/firma/v2/files/tickets`; the base URL's own
    /// path, query and fragment are discarded.
    pub fn endpoint(&self) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(self.base_url.trim())
            .map_err(|e| Error::Config(format!("invalid base URL {:?}: {}", self.base_url, e)))?;
        if url.cannot_be_a_base() {
            return Err(Error::Config(format!("base URL {:?} has no authority", self.base_url)));
        }
        url.set_path(TICKETS_PATH);
        url.set_query(None);
        url.set_fragment(None);
        Ok(url)
    }

    /// Parsed assertion timezone, if one is configured.
    pub fn tz(&self) -> Result<Option<chrono_tz::Tz>> {
        self.timezone
            .as_deref()
            .map(|name| {
                name.trim()
                    .parse::<chrono_tz::Tz>()
                    .map_err(|e| Error::Config(format!("unknown timezone {:?}: {}", name, e)))
            })
            .transpose()
    }

    /// Check that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        if self.secret.is_empty() {
            return Err(Error::Config("assertion secret is empty".to_string()));
        }
        if self.api_token_key.is_empty() {
            return Err(Error::Config("API token key is empty".to_string()));
        }
        self.endpoint()?;
        self.tz()?;
        Ok(())
    }
}

fn clamp_timeout(timeout: Duration) -> Duration {
    let clamped = timeout.clamp(MIN_TIMEOUT, MAX_TIMEOUT);
    if clamped != timeout {
        log::warn!(
            "timeout of {} ms is outside {}..={} s, using {} ms",
            timeout.as_millis(),
            MIN_TIMEOUT.as_secs(),
            MAX_TIMEOUT.as_secs(),
            clamped.as_millis()
        );
    }
    clamped
}
