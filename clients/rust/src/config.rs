//! Engine configuration and debug logging switches.

use std::cell::Cell;
use std::sync::OnceLock;
use std::time::Duration;

use serde::Serialize;

pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(5000);
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 100;
/// Salt for new deployments. Buckets only line up with an existing
/// deployment when its salt is configured instead, e.g. through
/// `AB_TESTING_HASH_SALT=casskai-ab-testing`.
pub const DEFAULT_HASH_SALT: &str = "ab-testing";

const FLUSH_INTERVAL_ENV: &str = "AB_TESTING_FLUSH_INTERVAL_MS";
const MAX_QUEUE_SIZE_ENV: &str = "AB_TESTING_MAX_QUEUE_SIZE";
const HASH_SALT_ENV: &str = "AB_TESTING_HASH_SALT";
const DELIVERY_TIMEOUT_ENV: &str = "AB_TESTING_DELIVERY_TIMEOUT_MS";
const PERSIST_ENV: &str = "AB_TESTING_PERSIST";
const DEBUG_LOG_ENV: &str = "AB_TESTING_DEBUG_LOG";
const DEBUG_SAMPLE_RATE_ENV: &str = "AB_TESTING_DEBUG_LOG_SAMPLE_RATE";

/// Tunables for an [`crate::Engine`].
#[derive(Debug, Clone, Serialize)]
pub struct EngineConfig {
    /// Period of the background flush.
    #[serde(with = "duration_millis")]
    pub flush_interval: Duration,
    /// Queue length that triggers a flush ahead of the timer. Zero disables it.
    pub max_queue_size: usize,
    /// Prefix mixed into every bucketing hash.
    pub hash_salt: String,
    /// Upper bound on one sink delivery. `None` waits indefinitely.
    #[serde(with = "option_duration_millis")]
    pub delivery_timeout: Option<Duration>,
    /// Save new assignments through the assignment store.
    pub persist_assignments: bool,
    /// Attempt a last flush when the engine shuts down.
    pub flush_on_shutdown: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            hash_salt: DEFAULT_HASH_SALT.to_string(),
            delivery_timeout: None,
            persist_assignments: true,
            flush_on_shutdown: true,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `AB_TESTING_*` environment variables.
    ///
    /// Values that fail to parse are ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(ms) = lookup(FLUSH_INTERVAL_ENV).and_then(|v| v.parse::<u64>().ok())
            && ms > 0
        {
            config.flush_interval = Duration::from_millis(ms);
        }
        if let Some(size) = lookup(MAX_QUEUE_SIZE_ENV).and_then(|v| v.parse().ok()) {
            config.max_queue_size = size;
        }
        if let Some(salt) = lookup(HASH_SALT_ENV) {
            config.hash_salt = salt;
        }
        if let Some(ms) = lookup(DELIVERY_TIMEOUT_ENV).and_then(|v| v.parse::<u64>().ok()) {
            config.delivery_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(persist) = lookup(PERSIST_ENV) {
            config.persist_assignments = !matches!(persist.as_str(), "0" | "false" | "no");
        }
        config
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }

    pub fn with_hash_salt(mut self, salt: impl Into<String>) -> Self {
        self.hash_salt = salt.into();
        self
    }

    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = Some(timeout);
        self
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u128(d.as_millis())
    }
}

mod option_duration_millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&d.as_millis()),
            None => s.serialize_none(),
        }
    }
}

// Debug config

pub(crate) struct DebugConfig {
    pub(crate) log_parse: bool,
    pub(crate) log_match: bool,
    pub(crate) sample_rate: f64,
}

static DEBUG_CONFIG: OnceLock<DebugConfig> = OnceLock::new();

pub(crate) fn debug_config() -> &'static DebugConfig {
    DEBUG_CONFIG.get_or_init(|| {
        let level = std::env::var(DEBUG_LOG_ENV).unwrap_or_default();
        let sample_rate: f64 = std::env::var(DEBUG_SAMPLE_RATE_ENV)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(1.0);
        DebugConfig {
            log_parse: level == "all" || level == "parse",
            log_match: level == "all" || level == "match",
            sample_rate,
        }
    })
}

thread_local! {
    static SAMPLE_COUNTER: Cell<u64> = const { Cell::new(0) };
}

/// Every-Nth sampling for debug logs, N = round(1 / rate).
pub(crate) fn should_sample(sample_rate: f64) -> bool {
    if sample_rate >= 1.0 {
        return true;
    }
    if sample_rate <= 0.0 {
        return false;
    }
    let interval = (1.0 / sample_rate).round() as u64;
    SAMPLE_COUNTER.with(|c| {
        let n = c.get();
        c.set(n.wrapping_add(1));
        n % interval.max(1) == 0
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.flush_interval, Duration::from_secs(5));
        assert_eq!(config.max_queue_size, 100);
        assert_eq!(config.hash_salt, "ab-testing");
        assert!(config.delivery_timeout.is_none());
        assert!(config.persist_assignments);
    }

    #[test]
    fn test_env_overrides() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            (FLUSH_INTERVAL_ENV, "250"),
            (MAX_QUEUE_SIZE_ENV, "10"),
            (HASH_SALT_ENV, "other-salt"),
            (DELIVERY_TIMEOUT_ENV, "1500"),
            (PERSIST_ENV, "false"),
        ]));
        assert_eq!(config.flush_interval, Duration::from_millis(250));
        assert_eq!(config.max_queue_size, 10);
        assert_eq!(config.hash_salt, "other-salt");
        assert_eq!(config.delivery_timeout, Some(Duration::from_millis(1500)));
        assert!(!config.persist_assignments);
    }

    #[test]
    fn test_unparseable_env_falls_back() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            (FLUSH_INTERVAL_ENV, "soon"),
            (MAX_QUEUE_SIZE_ENV, "-3"),
            (DELIVERY_TIMEOUT_ENV, "0"),
        ]));
        assert_eq!(config.flush_interval, DEFAULT_FLUSH_INTERVAL);
        assert_eq!(config.max_queue_size, DEFAULT_MAX_QUEUE_SIZE);
        assert!(config.delivery_timeout.is_none());
    }

    #[test]
    fn test_sampling_bounds() {
        assert!(should_sample(1.0));
        assert!(!should_sample(0.0));
        let hits = (0..100).filter(|_| should_sample(0.25)).count();
        assert_eq!(hits, 25);
    }
}
