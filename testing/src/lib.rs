//! # travel-saga Testing
//!
//! Testing utilities and helpers for the travel-saga orchestration platform.
//!
//! This crate provides:
//! - Mock implementations of Environment traits
//! - Test helpers and builders
//! - Property-based testing utilities
//! - Assertion helpers for reducers and stores
//!
//! ## Example
//!
//! ```ignore
//! use saga_testing::test_clock;
//! use saga_runtime::Store;
//!
//! #[tokio::test]
//! async fn test_order_flow() {
//!     let env = test_environment();
//!     let store = OrderStore::new(OrderState::default(), OrderReducer, env);
//!
//!     store.send(OrderAction::PlaceOrder {
//!         customer_id: CustomerId::new(1),
//!         items: vec![],
//!     }).await;
//!
//!     let state = store.state(|s| s.clone()).await;
//!     assert_eq!(state.orders.len(), 1);
//! }
//! ```

use chrono::{DateTime, Utc};
use saga_core::environment::Clock;

pub mod reducer_test;
pub use reducer_test::ReducerTest;

/// Mock implementations of Environment traits
///
/// # Phase 1 Implementation
///
/// This module will contain:
/// - `MockDatabase`: In-memory event store
/// - `FixedClock`: Deterministic time
/// - `MockEventPublisher`: Captures published events
/// - `MockHttpClient`: Stubbed HTTP responses
/// - `SequentialIdGenerator`: Predictable IDs
///
/// Mock implementations for testing.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use saga_testing::mocks::FixedClock;
    /// use saga_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    use saga_core::event::SerializedEvent;
    use saga_core::event_bus::{EventBus, EventBusError, EventStream};
    use saga_core::event_store::{EventStore, EventStoreError};
    use saga_core::stream::{StreamId, Version};
    use std::collections::HashMap;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;
    use tokio::sync::broadcast;

    /// Deterministic, in-process `EventStore` for unit and integration tests.
    ///
    /// Streams are kept in an in-memory map; optimistic concurrency is enforced
    /// exactly as the production store enforces it so reducer tests exercise
    /// real conflict behaviour.
    #[derive(Default)]
    pub struct InMemoryEventStore {
        streams: Mutex<HashMap<String, Vec<SerializedEvent>>>,
        snapshots: Mutex<HashMap<String, (Version, Vec<u8>)>>,
    }

    impl InMemoryEventStore {
        /// Create an empty store.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl EventStore for InMemoryEventStore {
        fn append_events(
            &self,
            stream_id: StreamId,
            expected_version: Option<Version>,
            events: Vec<SerializedEvent>,
        ) -> Pin<Box<dyn Future<Output = Result<Version, EventStoreError>> + Send + '_>> {
            Box::pin(async move {
                #[allow(clippy::unwrap_used)] // test mutex is never poisoned
                let mut streams = self.streams.lock().unwrap();
                let entry = streams.entry(stream_id.as_str().to_string()).or_default();
                let current = Version::new(entry.len() as u64);

                if let Some(expected) = expected_version {
                    if expected != current {
                        return Err(EventStoreError::ConcurrencyConflict {
                            stream_id,
                            expected,
                            actual: current,
                        });
                    }
                }

                entry.extend(events);
                Ok(Version::new(entry.len() as u64))
            })
        }

        fn load_events(
            &self,
            stream_id: StreamId,
            from_version: Option<Version>,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<SerializedEvent>, EventStoreError>> + Send + '_>>
        {
            Box::pin(async move {
                #[allow(clippy::unwrap_used)] // test mutex is never poisoned
                let streams = self.streams.lock().unwrap();
                let Some(events) = streams.get(stream_id.as_str()) else {
                    return Ok(Vec::new());
                };
                let skip = from_version.map_or(0, |v| v.value() as usize);
                Ok(events.iter().skip(skip).cloned().collect())
            })
        }

        fn save_snapshot(
            &self,
            stream_id: StreamId,
            version: Version,
            state: Vec<u8>,
        ) -> Pin<Box<dyn Future<Output = Result<(), EventStoreError>> + Send + '_>> {
            Box::pin(async move {
                #[allow(clippy::unwrap_used)] // test mutex is never poisoned
                let mut snapshots = self.snapshots.lock().unwrap();
                snapshots.insert(stream_id.into_inner(), (version, state));
                Ok(())
            })
        }

        fn load_snapshot(
            &self,
            stream_id: StreamId,
        ) -> Pin<Box<dyn Future<Output = Result<Option<(Version, Vec<u8>)>, EventStoreError>> + Send + '_>>
        {
            Box::pin(async move {
                #[allow(clippy::unwrap_used)] // test mutex is never poisoned
                let snapshots = self.snapshots.lock().unwrap();
                Ok(snapshots.get(stream_id.as_str()).cloned())
            })
        }
    }

    /// Synchronous, in-process `EventBus` for tests.
    ///
    /// Publishing fans the event out to every live subscriber via a
    /// broadcast channel; there is no persistence and no redelivery, so
    /// tests that need at-least-once semantics should exercise the
    /// production bus instead.
    pub struct InMemoryEventBus {
        sender: broadcast::Sender<(String, SerializedEvent)>,
    }

    impl Default for InMemoryEventBus {
        fn default() -> Self {
            let (sender, _) = broadcast::channel(1024);
            Self { sender }
        }
    }

    impl InMemoryEventBus {
        /// Create a new bus with a reasonably sized broadcast buffer.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl EventBus for InMemoryEventBus {
        fn publish(
            &self,
            topic: &str,
            event: &SerializedEvent,
        ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
            let topic = topic.to_string();
            let event = event.clone();
            Box::pin(async move {
                // No subscribers is not an error: mirrors at-least-once brokers
                // where a publish always succeeds regardless of consumers.
                let _ = self.sender.send((topic, event));
                Ok(())
            })
        }

        fn subscribe(
            &self,
            topics: &[&str],
        ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>> {
            let topics: Vec<String> = topics.iter().map(|t| (*t).to_string()).collect();
            let mut receiver = self.sender.subscribe();
            Box::pin(async move {
                let stream = async_stream::stream! {
                    loop {
                        match receiver.recv().await {
                            Ok((topic, event)) => {
                                if topics.iter().any(|t| t == &topic) {
                                    yield Ok(event);
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(_)) => continue,
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                };
                Ok(Box::pin(stream) as EventStream)
            })
        }
    }

    use saga_postgres::{RepositoryError, SagaRepository};
    use saga_core::{Leg, SagaRecord, SagaStatus};

    /// Deterministic, in-process `SagaRepository` for unit tests.
    ///
    /// Enforces the same conditional-update invariants (I1–I4) as
    /// `PostgresSagaRepository` so orchestrator tests exercise real
    /// write-once and terminal-state semantics without a database.
    #[derive(Default)]
    pub struct InMemorySagaRepository {
        records: Mutex<HashMap<String, SagaRecord>>,
    }

    impl InMemorySagaRepository {
        /// Create an empty repository.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        fn leg_field(record: &mut SagaRecord, leg: Leg) -> &mut Option<String> {
            match leg {
                Leg::Flight => &mut record.flight_reservation_id,
                Leg::Hotel => &mut record.hotel_reservation_id,
                Leg::Car => &mut record.car_reservation_id,
            }
        }
    }

    impl SagaRepository for InMemorySagaRepository {
        fn create(
            &self,
            record: &SagaRecord,
        ) -> Pin<Box<dyn Future<Output = Result<(), RepositoryError>> + Send + '_>> {
            let record = record.clone();
            Box::pin(async move {
                #[allow(clippy::unwrap_used)]
                let mut records = self.records.lock().unwrap();
                if records.contains_key(&record.request_id) {
                    return Err(RepositoryError::AlreadyExists(record.request_id));
                }
                records.insert(record.request_id.clone(), record);
                Ok(())
            })
        }

        fn find_by_request_id(
            &self,
            request_id: &str,
        ) -> Pin<Box<dyn Future<Output = Result<Option<SagaRecord>, RepositoryError>> + Send + '_>>
        {
            let request_id = request_id.to_string();
            Box::pin(async move {
                #[allow(clippy::unwrap_used)]
                Ok(self.records.lock().unwrap().get(&request_id).cloned())
            })
        }

        fn find_by_booking_id(
            &self,
            booking_id: &str,
        ) -> Pin<Box<dyn Future<Output = Result<Option<SagaRecord>, RepositoryError>> + Send + '_>>
        {
            let booking_id = booking_id.to_string();
            Box::pin(async move {
                #[allow(clippy::unwrap_used)]
                Ok(self
                    .records
                    .lock()
                    .unwrap()
                    .values()
                    .find(|r| r.booking_id.as_deref() == Some(booking_id.as_str()))
                    .cloned())
            })
        }

        fn update_status(
            &self,
            request_id: &str,
            from: SagaStatus,
            to: SagaStatus,
            booking_id: Option<&str>,
            error_message: Option<&str>,
        ) -> Pin<Box<dyn Future<Output = Result<bool, RepositoryError>> + Send + '_>> {
            let request_id = request_id.to_string();
            let booking_id = booking_id.map(str::to_string);
            let error_message = error_message.map(str::to_string);
            Box::pin(async move {
                #[allow(clippy::unwrap_used)]
                let mut records = self.records.lock().unwrap();
                let Some(record) = records.get_mut(&request_id) else {
                    return Ok(false);
                };
                if record.status != from {
                    return Ok(false);
                }
                record.status = to;
                if let Some(booking_id) = booking_id {
                    record.booking_id = Some(booking_id);
                }
                if let Some(error_message) = error_message {
                    record.error_message = Some(error_message);
                }
                let now = Utc::now();
                record.last_transition_at = now;
                record.updated_at = now;
                Ok(true)
            })
        }

        fn save_confirmed_reservation(
            &self,
            leg: Leg,
            request_id: &str,
            reservation_id: &str,
        ) -> Pin<Box<dyn Future<Output = Result<bool, RepositoryError>> + Send + '_>> {
            let request_id = request_id.to_string();
            let reservation_id = reservation_id.to_string();
            Box::pin(async move {
                #[allow(clippy::unwrap_used)]
                let mut records = self.records.lock().unwrap();
                let Some(record) = records.get_mut(&request_id) else {
                    return Ok(false);
                };
                let field = Self::leg_field(record, leg);
                if field.is_some() {
                    return Ok(false);
                }
                *field = Some(reservation_id);
                record.updated_at = Utc::now();
                Ok(true)
            })
        }

        fn set_error(
            &self,
            request_id: &str,
            message: &str,
        ) -> Pin<Box<dyn Future<Output = Result<(), RepositoryError>> + Send + '_>> {
            let request_id = request_id.to_string();
            let message = message.to_string();
            Box::pin(async move {
                #[allow(clippy::unwrap_used)]
                let mut records = self.records.lock().unwrap();
                if let Some(record) = records.get_mut(&request_id) {
                    record.error_message = Some(match record.error_message.take() {
                        Some(existing) if !existing.is_empty() => format!("{existing}; {message}"),
                        _ => message,
                    });
                    record.updated_at = Utc::now();
                }
                Ok(())
            })
        }
    }

    use saga_hotstore::{CoordinatorError, SagaCoordinator};

    /// Deterministic, in-process `SagaCoordinator` for unit tests.
    ///
    /// TTLs are tracked but never expire entries on their own; tests that
    /// need expiry behaviour should exercise `RedisCoordinator` against a
    /// `testcontainers` Redis instance instead.
    #[derive(Default)]
    pub struct InMemoryCoordinator {
        locks: Mutex<HashMap<String, ()>>,
        rate_counts: Mutex<HashMap<String, u64>>,
        hot_cache: Mutex<HashMap<String, String>>,
        pending_queue: Mutex<HashMap<String, i64>>,
        step_counters: Mutex<HashMap<String, HashMap<String, i64>>>,
        metadata: Mutex<HashMap<String, HashMap<String, String>>>,
    }

    impl InMemoryCoordinator {
        /// Create an empty coordinator.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl SagaCoordinator for InMemoryCoordinator {
        fn acquire_lock(
            &self,
            id: &str,
            _ttl_seconds: u64,
        ) -> Pin<Box<dyn Future<Output = Result<bool, CoordinatorError>> + Send + '_>> {
            let id = id.to_string();
            Box::pin(async move {
                #[allow(clippy::unwrap_used)]
                let mut locks = self.locks.lock().unwrap();
                if locks.contains_key(&id) {
                    Ok(false)
                } else {
                    locks.insert(id, ());
                    Ok(true)
                }
            })
        }

        fn release_lock(
            &self,
            id: &str,
        ) -> Pin<Box<dyn Future<Output = Result<(), CoordinatorError>> + Send + '_>> {
            let id = id.to_string();
            Box::pin(async move {
                #[allow(clippy::unwrap_used)]
                self.locks.lock().unwrap().remove(&id);
                Ok(())
            })
        }

        fn check_rate_limit(
            &self,
            user_id: &str,
            limit: u64,
            _window_seconds: u64,
        ) -> Pin<Box<dyn Future<Output = Result<bool, CoordinatorError>> + Send + '_>> {
            let user_id = user_id.to_string();
            Box::pin(async move {
                #[allow(clippy::unwrap_used)]
                let mut counts = self.rate_counts.lock().unwrap();
                let count = counts.entry(user_id).or_insert(0);
                *count += 1;
                Ok(*count <= limit)
            })
        }

        fn cache_active_saga_state(
            &self,
            request_id: &str,
            record_json: String,
            _ttl_seconds: u64,
        ) -> Pin<Box<dyn Future<Output = Result<(), CoordinatorError>> + Send + '_>> {
            let request_id = request_id.to_string();
            Box::pin(async move {
                #[allow(clippy::unwrap_used)]
                self.hot_cache
                    .lock()
                    .unwrap()
                    .insert(request_id, record_json);
                Ok(())
            })
        }

        fn get_active_saga_state(
            &self,
            request_id: &str,
        ) -> Pin<Box<dyn Future<Output = Result<Option<String>, CoordinatorError>> + Send + '_>>
        {
            let request_id = request_id.to_string();
            Box::pin(async move {
                #[allow(clippy::unwrap_used)]
                Ok(self.hot_cache.lock().unwrap().get(&request_id).cloned())
            })
        }

        fn clear_active_saga_state(
            &self,
            request_id: &str,
        ) -> Pin<Box<dyn Future<Output = Result<(), CoordinatorError>> + Send + '_>> {
            let request_id = request_id.to_string();
            Box::pin(async move {
                #[allow(clippy::unwrap_used)]
                self.hot_cache.lock().unwrap().remove(&request_id);
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
                #[allow(clippy::unwrap_used)]
                self.pending_queue.lock().unwrap().insert(request_id, score);
                Ok(())
            })
        }

        fn remove_from_pending_queue(
            &self,
            request_id: &str,
        ) -> Pin<Box<dyn Future<Output = Result<(), CoordinatorError>> + Send + '_>> {
            let request_id = request_id.to_string();
            Box::pin(async move {
                #[allow(clippy::unwrap_used)]
                self.pending_queue.lock().unwrap().remove(&request_id);
                Ok(())
            })
        }

        fn increment_step_counter(
            &self,
            request_id: &str,
            step_name: &str,
            _ttl_seconds: u64,
        ) -> Pin<Box<dyn Future<Output = Result<i64, CoordinatorError>> + Send + '_>> {
            let request_id = request_id.to_string();
            let step_name = step_name.to_string();
            Box::pin(async move {
                #[allow(clippy::unwrap_used)]
                let mut steps = self.step_counters.lock().unwrap();
                let entry = steps.entry(request_id).or_default();
                let count = entry.entry(step_name).or_insert(0);
                *count += 1;
                Ok(*count)
            })
        }

        fn set_saga_metadata(
            &self,
            request_id: &str,
            fields: HashMap<String, String>,
            _ttl_seconds: u64,
        ) -> Pin<Box<dyn Future<Output = Result<(), CoordinatorError>> + Send + '_>> {
            let request_id = request_id.to_string();
            Box::pin(async move {
                #[allow(clippy::unwrap_used)]
                let mut metadata = self.metadata.lock().unwrap();
                metadata.entry(request_id).or_default().extend(fields);
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
                #[allow(clippy::unwrap_used)]
                Ok(self
                    .metadata
                    .lock()
                    .unwrap()
                    .get(&request_id)
                    .cloned()
                    .unwrap_or_default())
            })
        }

        fn cleanup(
            &self,
            request_id: &str,
        ) -> Pin<Box<dyn Future<Output = Result<(), CoordinatorError>> + Send + '_>> {
            let request_id = request_id.to_string();
            Box::pin(async move {
                #[allow(clippy::unwrap_used)]
                {
                    self.hot_cache.lock().unwrap().remove(&request_id);
                    self.step_counters.lock().unwrap().remove(&request_id);
                    self.metadata.lock().unwrap().remove(&request_id);
                    self.pending_queue.lock().unwrap().remove(&request_id);
                }
                Ok(())
            })
        }
    }
}

/// Test helpers and utilities
///
/// # Phase 1 Implementation
///
/// This module will contain:
/// - Builder patterns for common test scenarios
/// - Assertion helpers
/// - Test data generators
///
/// Test helpers and utilities.
pub mod helpers {
    // Placeholder for test helpers
}

/// Property-based testing utilities
///
/// # Phase 1 Implementation
///
/// This module will contain:
/// - proptest Arbitrary implementations
/// - Custom strategies for domain types
/// - Property test helpers
///
/// Property-based testing utilities using proptest.
pub mod properties {
    // Placeholder for property test utilities
}

// Re-export commonly used items
pub use mocks::{FixedClock, test_clock};

// Placeholder test module
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }
}
