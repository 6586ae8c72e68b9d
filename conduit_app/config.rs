use dotenvy::dotenv;
use std::{env, str::FromStr, time::Duration};

use crate::registry::DuplicatePolicy;

#[derive(Debug, Clone)]
pub struct Config {
    /// Applied by `Mediator::send` when set.
    pub default_timeout: Option<Duration>,
    /// How long a timed out or cancelled call may keep running to release
    /// what it holds (rollbacks and the like) before the mediator abandons it.
    pub cancellation_grace: Duration,
    pub slow_request_threshold: Duration,
    pub cache_ttl: Duration,
    pub retry_max_attempts: u32,
    pub retry_base_delay: Duration,
    pub duplicate_policy: DuplicatePolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_timeout: None,
            cancellation_grace: Duration::from_millis(250),
            slow_request_threshold: Duration::from_millis(500),
            cache_ttl: Duration::from_secs(300),
            retry_max_attempts: 3,
            retry_base_delay: Duration::from_millis(100),
            duplicate_policy: DuplicatePolicy::Reject,
        }
    }
}

/// Parses `key` if present. Unparsable values are logged and ignored.
fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let val = lookup(key)?;
    match val.trim().parse::<T>() {
        Ok(parsed) => Some(parsed),
        Err(err) => {
            tracing::warn!(key, value = %val, "Ignoring invalid setting: {err}");
            None
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from any key/value source, using defaults for missing
    /// or invalid entries.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let millis = |key: &str| parse_var::<u64>(&lookup, key).map(Duration::from_millis);

        // Zero turns the default timeout off.
        let default_timeout = match parse_var::<u64>(&lookup, "CONDUIT_DEFAULT_TIMEOUT_MS") {
            Some(0) => None,
            Some(ms) => Some(Duration::from_millis(ms)),
            None => defaults.default_timeout,
        };

        let duplicate_policy = match lookup("CONDUIT_DUPLICATE_HANDLERS") {
            Some(val) => val.parse().unwrap_or_else(|err| {
                tracing::warn!("{err}, falling back to reject");
                DuplicatePolicy::Reject
            }),
            None => defaults.duplicate_policy,
        };

        Self {
            default_timeout,
            cancellation_grace: millis("CONDUIT_CANCELLATION_GRACE_MS")
                .unwrap_or(defaults.cancellation_grace),
            slow_request_threshold: millis("CONDUIT_SLOW_REQUEST_MS")
                .unwrap_or(defaults.slow_request_threshold),
            cache_ttl: parse_var::<u64>(&lookup, "CONDUIT_CACHE_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.cache_ttl),
            retry_max_attempts: parse_var::<u32>(&lookup, "CONDUIT_RETRY_MAX_ATTEMPTS")
                .unwrap_or(defaults.retry_max_attempts)
                .max(1),
            retry_base_delay: millis("CONDUIT_RETRY_BASE_DELAY_MS")
                .unwrap_or(defaults.retry_base_delay),
            duplicate_policy,
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    pub fn with_cancellation_grace(mut self, grace: Duration) -> Self {
        self.cancellation_grace = grace;
        self
    }

    pub fn with_slow_request_threshold(mut self, threshold: Duration) -> Self {
        self.slow_request_threshold = threshold;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_retry(mut self, max_attempts: u32, base_delay: Duration) -> Self {
        self.retry_max_attempts = max_attempts.max(1);
        self.retry_base_delay = base_delay;
        self
    }

    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }
}
