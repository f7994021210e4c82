//! Orchestrator configuration, loaded from environment variables with
//! defaults, following `Config::from_env`'s env-var-with-default idiom.

use std::env;

use serde::{Deserialize, Serialize};

/// Tunables recognised by the saga orchestrator (`SPEC_FULL.md` §6.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaConfig {
    /// Admissions allowed per user per 60-second window.
    pub rate_limit_per_user_per_min: u64,
    /// TTL, in seconds, of the per-request-id distributed lock.
    pub lock_ttl_seconds: u64,
    /// TTL, in seconds, of the hot-cache copy of an active saga record.
    pub hot_cache_ttl_seconds: u64,
    /// TTL, in seconds, of the per-saga step counters.
    pub steps_ttl_seconds: u64,
    /// Wall-clock timeout, in seconds, before a notification stream
    /// auto-closes without having observed a terminal event.
    pub notification_timeout_seconds: u64,
    /// Prefix prepended to generated booking ids.
    pub booking_id_prefix: String,
}

impl SagaConfig {
    /// Load configuration from the environment, falling back to the
    /// defaults in `SPEC_FULL.md` §6 for any unset variable.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            rate_limit_per_user_per_min: env::var("RATE_LIMIT_PER_USER_PER_MIN")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
            lock_ttl_seconds: env::var("SAGA_LOCK_TTL_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(300),
            hot_cache_ttl_seconds: env::var("SAGA_HOT_CACHE_TTL_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3600),
            steps_ttl_seconds: env::var("SAGA_STEPS_TTL_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(7200),
            notification_timeout_seconds: env::var("SAGA_NOTIFICATION_TIMEOUT_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(300),
            booking_id_prefix: env::var("BOOKING_ID_PREFIX")
                .unwrap_or_else(|_| "TRV-".to_string()),
        }
    }
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            rate_limit_per_user_per_min: 5,
            lock_ttl_seconds: 300,
            hot_cache_ttl_seconds: 3600,
            steps_ttl_seconds: 7200,
            notification_timeout_seconds: 300,
            booking_id_prefix: "TRV-".to_string(),
        }
    }
}
