//! # travel-saga Hot Store
//!
//! Redis-backed coordination layer for the saga orchestrator (component C4).
//!
//! Provides distributed locks, per-user rate limiting, a hot cache of active
//! saga state, a time-ordered pending queue, per-step counters, and saga
//! metadata — the ephemeral, TTL-scoped state described in `SPEC_FULL.md` §3.
//! The hot store is coordination only; it is never the source of truth for a
//! saga record (that is the durable store in `saga-postgres`).
//!
//! ## Key patterns
//!
//! - Lock: `saga:lock:{id}` (TTL 300s default)
//! - Hot cache: `saga:in-active:{request-id}` (TTL 3600s default)
//! - Step counters: `saga:steps:{request-id}` (TTL 7200s default)
//! - Metadata: `saga:metadata:{request-id}` (TTL 7200s default)
//! - Rate limit: `saga:ratelimit:{userId}` (TTL 60s default)
//! - Pending queue: `saga:pending` (sorted set, score = epoch ms)

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::{SystemTime, UNIX_EPOCH};

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use thiserror::Error;

/// Errors that can occur during coordination operations.
#[derive(Error, Debug)]
pub enum CoordinatorError {
    /// Failed to establish or use the Redis connection.
    #[error("hot store connection error: {0}")]
    Connection(String),

    /// A serialization/deserialization error occurred, e.g. encoding the
    /// cached saga record as JSON.
    #[error("hot store serialization error: {0}")]
    Serialization(String),
}

/// The Redis-backed coordination store, implementing component C4.
///
/// All operations are implemented with an atomic `redis::pipe()` where the
/// contract requires more than one round trip to stay correct under
/// concurrent callers (e.g. `check_rate_limit`'s increment-then-expire).
#[derive(Clone)]
pub struct RedisCoordinator {
    conn_manager: ConnectionManager,
}

impl RedisCoordinator {
    /// Connect to Redis at `redis_url`.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Connection`] if the client cannot be
    /// constructed or the initial connection fails.
    pub async fn new(redis_url: &str) -> Result<Self, CoordinatorError> {
        let client = Client::open(redis_url)
            .map_err(|e| CoordinatorError::Connection(format!("invalid redis url: {e}")))?;

        let conn_manager = ConnectionManager::new(client)
            .await
            .map_err(|e| CoordinatorError::Connection(format!("connect failed: {e}")))?;

        Ok(Self { conn_manager })
    }

    fn lock_key(id: &str) -> String {
        format!("saga:lock:{id}")
    }

    fn hot_cache_key(request_id: &str) -> String {
        format!("saga:in-active:{request_id}")
    }

    fn steps_key(request_id: &str) -> String {
        format!("saga:steps:{request_id}")
    }

    fn metadata_key(request_id: &str) -> String {
        format!("saga:metadata:{request_id}")
    }

    fn rate_limit_key(user_id: &str) -> String {
        format!("saga:ratelimit:{user_id}")
    }

    const PENDING_QUEUE_KEY: &'static str = "saga:pending";

    #[allow(clippy::cast_possible_truncation)] // fits until year 2554
    fn now_epoch_ms() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64
    }
}

/// Contract for the saga coordination layer (component C4).
///
/// Implemented by [`RedisCoordinator`] in production and by
/// `saga_testing::mocks::InMemoryCoordinator` in tests.
pub trait SagaCoordinator: Send + Sync {
    /// Set-if-absent lock acquisition with TTL. Returns `false` if already held.
    fn acquire_lock(
        &self,
        id: &str,
        ttl_seconds: u64,
    ) -> Pin<Box<dyn Future<Output = Result<bool, CoordinatorError>> + Send + '_>>;

    /// Unconditional lock release (fencing tokens are out of scope).
    fn release_lock(
        &self,
        id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), CoordinatorError>> + Send + '_>>;

    /// Fixed-window rate limit check: increments the counter for `user_id`,
    /// setting a TTL of `window_seconds` on first increment in the window.
    /// Returns `true` (admitted) when the post-increment counter is `<= limit`.
    fn check_rate_limit(
        &self,
        user_id: &str,
        limit: u64,
        window_seconds: u64,
    ) -> Pin<Box<dyn Future<Output = Result<bool, CoordinatorError>> + Send + '_>>;

    /// Cache a serialized saga record for fast reads.
    fn cache_active_saga_state(
        &self,
        request_id: &str,
        record_json: String,
        ttl_seconds: u64,
    ) -> Pin<Box<dyn Future<Output = Result<(), CoordinatorError>> + Send + '_>>;

    /// Fetch the cached saga record, if present.
    fn get_active_saga_state(
        &self,
        request_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>, CoordinatorError>> + Send + '_>>;

    /// Evict the cached saga record.
    fn clear_active_saga_state(
        &self,
        request_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), CoordinatorError>> + Send + '_>>;

    /// Add a request-id to the time-ordered pending queue.
    fn add_to_pending_queue(
        &self,
        request_id: &str,
        score: i64,
    ) -> Pin<Box<dyn Future<Output = Result<(), CoordinatorError>> + Send + '_>>;

    /// Remove a request-id from the pending queue.
    fn remove_from_pending_queue(
        &self,
        request_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), CoordinatorError>> + Send + '_>>;

    /// Increment a named step counter for a saga, returning the new count.
    /// Refreshes the counter hash's TTL to `ttl_seconds` on every call.
    fn increment_step_counter(
        &self,
        request_id: &str,
        step_name: &str,
        ttl_seconds: u64,
    ) -> Pin<Box<dyn Future<Output = Result<i64, CoordinatorError>> + Send + '_>>;

    /// Merge `fields` into the saga's metadata hash. Refreshes the
    /// metadata hash's TTL to `ttl_seconds`.
    fn set_saga_metadata(
        &self,
        request_id: &str,
        fields: HashMap<String, String>,
        ttl_seconds: u64,
    ) -> Pin<Box<dyn Future<Output = Result<(), CoordinatorError>> + Send + '_>>;

    /// Read the saga's metadata hash.
    fn get_saga_metadata(
        &self,
        request_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<HashMap<String, String>, CoordinatorError>> + Send + '_>>;

    /// Remove every coordination entry for a terminal saga: hot cache, step
    /// counters, metadata, and its pending-queue entry. The lock is released
    /// separately by the caller via [`SagaCoordinator::release_lock`].
    fn cleanup(
        &self,
        request_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), CoordinatorError>> + Send + '_>>;
}

impl SagaCoordinator for RedisCoordinator {
    fn acquire_lock(
        &self,
        id: &str,
        ttl_seconds: u64,
    ) -> Pin<Box<dyn Future<Output = Result<bool, CoordinatorError>> + Send + '_>> {
        let id = id.to_string();
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let key = Self::lock_key(&id);

            let acquired: bool = redis::cmd("SET")
                .arg(&key)
                .arg(1)
                .arg("NX")
                .arg("EX")
                .arg(ttl_seconds)
                .query_async::<Option<String>>(&mut conn)
                .await
                .map(|reply| reply.is_some())
                .map_err(|e| CoordinatorError::Connection(format!("acquire_lock: {e}")))?;

            tracing::debug!(lock_id = %id, acquired, "acquire_lock");
            metrics::counter!("hotstore.lock.acquire", "acquired" => acquired.to_string())
                .increment(1);

            Ok(acquired)
        })
    }

    fn release_lock(
        &self,
        id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), CoordinatorError>> + Send + '_>> {
        let id = id.to_string();
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let key = Self::lock_key(&id);

            let _: () = conn
                .del(&key)
                .await
                .map_err(|e| CoordinatorError::Connection(format!("release_lock: {e}")))?;

            tracing::debug!(lock_id = %id, "release_lock");
            Ok(())
        })
    }

    fn check_rate_limit(
        &self,
        user_id: &str,
        limit: u64,
        window_seconds: u64,
    ) -> Pin<Box<dyn Future<Output = Result<bool, CoordinatorError>> + Send + '_>> {
        let user_id = user_id.to_string();
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let key = Self::rate_limit_key(&user_id);

            // Atomic fixed-window increment: INCR then, only if this is the
            // first increment in the window (count == 1), set the TTL.
            let count: u64 = conn
                .incr(&key, 1_u64)
                .await
                .map_err(|e| CoordinatorError::Connection(format!("check_rate_limit: {e}")))?;

            if count == 1 {
                let _: () = conn.expire(&key, window_seconds as i64).await.map_err(|e| {
                    CoordinatorError::Connection(format!("check_rate_limit expire: {e}"))
                })?;
            }

            let admitted = count <= limit;
            tracing::debug!(user_id = %user_id, count, limit, admitted, "check_rate_limit");
            metrics::counter!("hotstore.ratelimit.check", "admitted" => admitted.to_string())
                .increment(1);

            Ok(admitted)
        })
    }

    fn cache_active_saga_state(
        &self,
        request_id: &str,
        record_json: String,
        ttl_seconds: u64,
    ) -> Pin<Box<dyn Future<Output = Result<(), CoordinatorError>> + Send + '_>> {
        let request_id = request_id.to_string();
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let key = Self::hot_cache_key(&request_id);

            let _: () = conn
                .set_ex(&key, record_json, ttl_seconds)
                .await
                .map_err(|e| CoordinatorError::Connection(format!("cache_active_saga_state: {e}")))?;

            Ok(())
        })
    }

    fn get_active_saga_state(
        &self,
        request_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>, CoordinatorError>> + Send + '_>> {
        let request_id = request_id.to_string();
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let key = Self::hot_cache_key(&request_id);

            let value: Option<String> = conn
                .get(&key)
                .await
                .map_err(|e| CoordinatorError::Connection(format!("get_active_saga_state: {e}")))?;

            Ok(value)
        })
    }

    fn clear_active_saga_state(
        &self,
        request_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), CoordinatorError>> + Send + '_>> {
        let request_id = request_id.to_string();
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let key = Self::hot_cache_key(&request_id);

            let _: () = conn
                .del(&key)
                .await
                .map_err(|e| CoordinatorError::Connection(format!("clear_active_saga_state: {e}")))?;

            Ok(())
        })
    }

    fn add_to_pending_queue(
        &self,
        request_id: &str,
        score: i64,
    ) -> Pin<Box<dyn Future<Output = Result<(), CoordinatorError>> + Send + '_>> {
        let request_id = request_id.to_string();
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();

            let _: () = conn
                .zadd(Self::PENDING_QUEUE_KEY, &request_id, score)
                .await
                .map_err(|e| CoordinatorError::Connection(format!("add_to_pending_queue: {e}")))?;

            Ok(())
        })
    }

    fn remove_from_pending_queue(
        &self,
        request_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), CoordinatorError>> + Send + '_>> {
        let request_id = request_id.to_string();
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();

            let _: () = conn
                .zrem(Self::PENDING_QUEUE_KEY, &request_id)
                .await
                .map_err(|e| {
                    CoordinatorError::Connection(format!("remove_from_pending_queue: {e}"))
                })?;

            Ok(())
        })
    }

    fn increment_step_counter(
        &self,
        request_id: &str,
        step_name: &str,
        ttl_seconds: u64,
    ) -> Pin<Box<dyn Future<Output = Result<i64, CoordinatorError>> + Send + '_>> {
        let request_id = request_id.to_string();
        let step_name = step_name.to_string();
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let key = Self::steps_key(&request_id);

            let (new_count,): (i64,) = redis::pipe()
                .atomic()
                .hincr(&key, &step_name, 1_i64)
                .expire(&key, ttl_seconds as i64)
                .ignore()
                .query_async(&mut conn)
                .await
                .map_err(|e| {
                    CoordinatorError::Connection(format!("increment_step_counter: {e}"))
                })?;

            tracing::debug!(request_id = %request_id, step = %step_name, new_count, "increment_step_counter");
            Ok(new_count)
        })
    }

    fn set_saga_metadata(
        &self,
        request_id: &str,
        fields: HashMap<String, String>,
        ttl_seconds: u64,
    ) -> Pin<Box<dyn Future<Output = Result<(), CoordinatorError>> + Send + '_>> {
        let request_id = request_id.to_string();
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let key = Self::metadata_key(&request_id);

            let pairs: Vec<(String, String)> = fields.into_iter().collect();
            if pairs.is_empty() {
                return Ok(());
            }

            let _: () = redis::pipe()
                .atomic()
                .hset_multiple(&key, &pairs)
                .ignore()
                .expire(&key, ttl_seconds as i64)
                .ignore()
                .query_async(&mut conn)
                .await
                .map_err(|e| CoordinatorError::Connection(format!("set_saga_metadata: {e}")))?;

            Ok(())
        })
    }

    fn get_saga_metadata(
        &self,
        request_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<HashMap<String, String>, CoordinatorError>> + Send + '_>>
    {
        let request_id = request_id.to_string();
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let key = Self::metadata_key(&request_id);

            let fields: HashMap<String, String> = conn
                .hgetall(&key)
                .await
                .map_err(|e| CoordinatorError::Connection(format!("get_saga_metadata: {e}")))?;

            Ok(fields)
        })
    }

    fn cleanup(
        &self,
        request_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), CoordinatorError>> + Send + '_>> {
        let request_id = request_id.to_string();
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();

            let _: () = redis::pipe()
                .atomic()
                .del(Self::hot_cache_key(&request_id))
                .ignore()
                .del(Self::steps_key(&request_id))
                .ignore()
                .del(Self::metadata_key(&request_id))
                .ignore()
                .zrem(Self::PENDING_QUEUE_KEY, &request_id)
                .ignore()
                .query_async(&mut conn)
                .await
                .map_err(|e| CoordinatorError::Connection(format!("cleanup: {e}")))?;

            tracing::debug!(request_id = %request_id, "coordination entries cleaned up");
            Ok(())
        })
    }
}

/// Compute the current epoch-millisecond score used by [`SagaCoordinator::add_to_pending_queue`].
#[must_use]
pub fn now_score() -> i64 {
    RedisCoordinator::now_epoch_ms()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_patterns_match_spec() {
        assert_eq!(RedisCoordinator::lock_key("abc"), "saga:lock:abc");
        assert_eq!(
            RedisCoordinator::hot_cache_key("abc"),
            "saga:in-active:abc"
        );
        assert_eq!(RedisCoordinator::steps_key("abc"), "saga:steps:abc");
        assert_eq!(RedisCoordinator::metadata_key("abc"), "saga:metadata:abc");
        assert_eq!(
            RedisCoordinator::rate_limit_key("u1"),
            "saga:ratelimit:u1"
        );
        assert_eq!(RedisCoordinator::PENDING_QUEUE_KEY, "saga:pending");
    }

    #[test]
    fn now_score_is_monotonic_enough() {
        let a = now_score();
        let b = now_score();
        assert!(b >= a);
    }
}
