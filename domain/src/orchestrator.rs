//! Saga orchestrator (component C5): the state machine that accepts a
//! booking request, fans its three legs out to reservation clients,
//! correlates their asynchronous outcomes, and aggregates or compensates.
//!
//! Built as a plain async service struct over `Arc<dyn Trait>`
//! collaborators, the way the teacher's own production crates (`auth`,
//! `postgres`, `redpanda`) are built — not as a `Reducer`/`Effect`/`Store`
//! component. See `SPEC_FULL.md` §8.1 for the grounding for this choice:
//! `execute` must return a computed `(requestId, status)` once its async
//! admission protocol completes, which `Store::send`'s fire-and-forget
//! `EffectHandle` cannot express, and the saga's true state lives in the
//! durable store and hot cache, not in an in-memory `Store`.

use std::sync::Arc;

use saga_core::event::SerializedEvent;
use saga_core::event_bus::EventBus;
use saga_core::{BookingRequest, Leg, SagaRecord, SagaStatus};
use saga_hotstore::SagaCoordinator;
use saga_postgres::SagaRepository;
use saga_runtime::{CircuitBreaker, RetryPolicy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::SagaConfig;
use crate::error::SagaError;
use crate::notification::{NotificationHub, TerminalEvent};
use crate::reservation::{Confirmation, LegClients, ReservationRequest};
use crate::topics;

/// Result of [`SagaOrchestrator::execute`]: the synchronous admission
/// outcome (`SPEC_FULL.md` §4.1).
#[derive(Debug, Clone)]
pub struct ExecuteOutcome {
    /// The request id admitted (or rejected).
    pub request_id: String,
    /// PENDING on admission; FAILED on a pre-flight rejection; or the
    /// existing terminal status on idempotent replay.
    pub status: SagaStatus,
    /// A human-readable reason, set on rejection.
    pub message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TerminalPayload {
    request_id: String,
    booking_id: Option<String>,
    status: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct CompensationFailedPayload {
    request_id: String,
    booking_id: Option<String>,
    compensation_type: String,
    reservation_id: String,
    error_message: String,
    error_stack: Option<String>,
    timestamp: chrono::DateTime<chrono::Utc>,
}

/// The saga orchestrator (component C5).
pub struct SagaOrchestrator {
    repository: Arc<dyn SagaRepository>,
    coordinator: Arc<dyn SagaCoordinator>,
    event_bus: Arc<dyn EventBus>,
    reservation_clients: LegClients,
    notifications: Arc<NotificationHub>,
    config: SagaConfig,
    retry_policy: RetryPolicy,
    reservation_breaker: CircuitBreaker,
}

impl SagaOrchestrator {
    /// Assemble the orchestrator from its collaborators.
    #[must_use]
    pub fn new(
        repository: Arc<dyn SagaRepository>,
        coordinator: Arc<dyn SagaCoordinator>,
        event_bus: Arc<dyn EventBus>,
        reservation_clients: LegClients,
        notifications: Arc<NotificationHub>,
        config: SagaConfig,
    ) -> Self {
        Self {
            repository,
            coordinator,
            event_bus,
            reservation_clients,
            notifications,
            config,
            retry_policy: RetryPolicy::new(),
            reservation_breaker: CircuitBreaker::new(),
        }
    }

    /// Override the retry policy wrapping durable-store and broker I/O.
    #[must_use]
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Override the circuit breaker wrapping reservation-client calls.
    #[must_use]
    pub fn with_circuit_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.reservation_breaker = breaker;
        self
    }

    /// Synchronous accept (`SPEC_FULL.md` §4.1 admission protocol).
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::Validation`] if `request` itself is malformed.
    /// Coordination or repository failures surface as the corresponding
    /// error variant; all other rejections are reported as a FAILED
    /// [`ExecuteOutcome`], not as an `Err`.
    pub async fn execute(&self, request: BookingRequest) -> Result<ExecuteOutcome, SagaError> {
        request
            .validate()
            .map_err(|e| SagaError::Validation(e.to_string()))?;

        let request_id = request.request_id.clone();

        // Step 1: rate limit.
        let admitted = self
            .coordinator
            .check_rate_limit(&request.user_id, self.config.rate_limit_per_user_per_min, 60)
            .await?;
        if !admitted {
            metrics::counter!("orchestrator.execute.rate_limited").increment(1);
            return Ok(ExecuteOutcome {
                request_id,
                status: SagaStatus::Failed,
                message: Some("Rate limit exceeded for user".to_string()),
            });
        }

        // Step 2: distributed lock.
        let acquired = self
            .coordinator
            .acquire_lock(&request_id, self.config.lock_ttl_seconds)
            .await?;
        if !acquired {
            return Ok(ExecuteOutcome {
                request_id,
                status: SagaStatus::Failed,
                message: Some("concurrent execution for this request id".to_string()),
            });
        }

        let outcome = self.admit_locked(request).await;
        self.coordinator.release_lock(&request_id).await.ok();
        outcome
    }

    async fn admit_locked(&self, request: BookingRequest) -> Result<ExecuteOutcome, SagaError> {
        let request_id = request.request_id.clone();

        // Step 3: idempotent replay of an existing record.
        if let Some(existing) = self.repository.find_by_request_id(&request_id).await? {
            return Ok(ExecuteOutcome {
                request_id,
                status: existing.status,
                message: None,
            });
        }

        // Step 4: persist PENDING.
        let now = chrono::Utc::now();
        let record = SagaRecord {
            request_id: request_id.clone(),
            booking_id: None,
            user_id: request.user_id.clone(),
            request: request.clone(),
            flight_reservation_id: None,
            hotel_reservation_id: None,
            car_reservation_id: None,
            status: SagaStatus::Pending,
            error_message: None,
            last_transition_at: now,
            created_at: now,
            updated_at: now,
        };
        self.create_with_retry(&record).await?;

        // Step 5: hot cache.
        self.refresh_cache(&record).await;

        // Step 6: metadata + pending queue.
        self.coordinator
            .add_to_pending_queue(&request_id, now.timestamp_millis())
            .await?;

        // Step 7: fan out reservation commands.
        for leg in Leg::all() {
            let reservation_request = ReservationRequest {
                request_id: request_id.clone(),
                user_id: request.user_id.clone(),
                leg,
                idempotency_key: format!("{request_id}|{leg}"),
                fields: Self::leg_fields(&request, leg),
            };

            // `reserve` returns `Err(ReservationError::Pending)` on a
            // *successful* publish under the async correlation model
            // (`SPEC_FULL.md` §4.1): the real outcome arrives later via
            // `handle_leg_confirmed`/`handle_leg_failed`. That must not
            // reach the breaker as a failure, or three `Pending` results
            // per booking would trip `failure_threshold` after a couple of
            // bookings and never see an `Ok` to reset it. Fold `Pending`
            // into success here, before the breaker counts it.
            let result = self
                .reservation_breaker
                .call(|| async {
                    match self.reservation_clients.get(leg).reserve(reservation_request).await {
                        Ok(_) | Err(crate::reservation::ReservationError::Pending) => Ok(()),
                        Err(e) => Err(e),
                    }
                })
                .await;

            let fan_out_failed = match result {
                Ok(()) => None,
                Err(either) => Some(either.to_string()),
            };

            if let Some(reason) = fan_out_failed {
                self.repository
                    .update_status(
                        &request_id,
                        SagaStatus::Pending,
                        SagaStatus::Failed,
                        None,
                        Some(&format!("failed to send {leg} reservation command: {reason}")),
                    )
                    .await?;
                self.coordinator.cleanup(&request_id).await.ok();
                return Ok(ExecuteOutcome {
                    request_id,
                    status: SagaStatus::Failed,
                    message: Some(format!("failed to send {leg} reservation command: {reason}")),
                });
            }
        }

        // Step 8: return PENDING (lock released by the caller).
        Ok(ExecuteOutcome {
            request_id,
            status: SagaStatus::Pending,
            message: None,
        })
    }

    fn leg_fields(request: &BookingRequest, leg: Leg) -> serde_json::Value {
        match leg {
            Leg::Flight => serde_json::to_value(&request.flight),
            Leg::Hotel => serde_json::to_value(&request.hotel),
            Leg::Car => serde_json::to_value(&request.car),
        }
        .unwrap_or(serde_json::Value::Null)
    }

    /// Handle an asynchronous confirmation for `leg` (correlation protocol,
    /// `SPEC_FULL.md` §4.1).
    ///
    /// # Errors
    ///
    /// Propagates repository/coordinator failures.
    pub async fn handle_leg_confirmed(
        &self,
        request_id: &str,
        leg: Leg,
        confirmation: Confirmation,
    ) -> Result<(), SagaError> {
        let Some(record) = self.repository.find_by_request_id(request_id).await? else {
            tracing::warn!(request_id = %request_id, leg = %leg, "confirmation for unknown saga; acking");
            return Ok(());
        };
        if record.status.is_terminal() {
            tracing::debug!(request_id = %request_id, leg = %leg, "confirmation for terminal saga; acking");
            return Ok(());
        }

        self.repository
            .save_confirmed_reservation(leg, request_id, &confirmation.reservation_id)
            .await?;
        self.coordinator
            .increment_step_counter(
                request_id,
                &format!("{}_CONFIRMED", leg.as_str().to_uppercase()),
                self.config.steps_ttl_seconds,
            )
            .await?;

        if let Some(updated) = self.repository.find_by_request_id(request_id).await? {
            self.refresh_cache(&updated).await;
            if updated.all_legs_confirmed() {
                self.aggregate_results(request_id).await?;
            }
        }

        Ok(())
    }

    /// Handle an asynchronous failure for `leg`: triggers compensation
    /// immediately, without waiting for the other legs.
    ///
    /// # Errors
    ///
    /// Propagates repository/coordinator failures.
    pub async fn handle_leg_failed(
        &self,
        request_id: &str,
        leg: Leg,
        reason: &str,
    ) -> Result<(), SagaError> {
        let Some(record) = self.repository.find_by_request_id(request_id).await? else {
            tracing::warn!(request_id = %request_id, leg = %leg, "failure for unknown saga; acking");
            return Ok(());
        };
        if record.status.is_terminal() {
            return Ok(());
        }

        self.coordinator
            .increment_step_counter(
                request_id,
                &format!("{}_FAILED", leg.as_str().to_uppercase()),
                self.config.steps_ttl_seconds,
            )
            .await?;
        self.coordinator
            .set_saga_metadata(
                request_id,
                std::collections::HashMap::from([
                    ("failed_leg".to_string(), leg.as_str().to_string()),
                    ("failed_reason".to_string(), reason.to_string()),
                ]),
                self.config.steps_ttl_seconds,
            )
            .await?;
        self.repository
            .set_error(request_id, &format!("{leg} failed: {reason}"))
            .await?;

        self.compensate(request_id).await?;
        Ok(())
    }

    /// Idempotent finaliser (`SPEC_FULL.md` §4.1). Invoked by
    /// [`SagaOrchestrator::handle_leg_confirmed`] once all three legs are
    /// recorded, and independently callable (e.g. by an external sweeper).
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::NotFound`] if no record exists for
    /// `request_id`; propagates repository/coordinator/broker failures.
    pub async fn aggregate_results(&self, request_id: &str) -> Result<SagaRecord, SagaError> {
        let Some(record) = self.repository.find_by_request_id(request_id).await? else {
            return Err(SagaError::NotFound(request_id.to_string()));
        };
        if record.status.is_terminal() {
            return Ok(record);
        }

        if record.all_legs_confirmed() {
            let booking_id = format!("{}{}", self.config.booking_id_prefix, Uuid::new_v4().simple());
            let applied = self
                .repository
                .update_status(
                    request_id,
                    SagaStatus::Pending,
                    SagaStatus::Confirmed,
                    Some(&booking_id),
                    None,
                )
                .await?;

            let Some(final_record) = self.repository.find_by_request_id(request_id).await? else {
                return Err(SagaError::NotFound(request_id.to_string()));
            };
            if applied {
                self.finish_terminal(&final_record).await?;
            }
            return Ok(final_record);
        }

        if let Some(reason) = self
            .coordinator
            .get_saga_metadata(request_id)
            .await?
            .get("failed_reason")
            .cloned()
        {
            tracing::debug!(request_id = %request_id, reason = %reason, "aggregate_results observed a recorded leg failure");
            return self.compensate(request_id).await;
        }

        Ok(record)
    }

    async fn compensate(&self, request_id: &str) -> Result<SagaRecord, SagaError> {
        let guard_key = format!("compensating:{request_id}");
        let claimed = self
            .coordinator
            .acquire_lock(&guard_key, self.config.lock_ttl_seconds)
            .await?;
        if !claimed {
            // Another in-flight leg-failure handler is already compensating.
            let Some(record) = self.repository.find_by_request_id(request_id).await? else {
                return Err(SagaError::NotFound(request_id.to_string()));
            };
            return Ok(record);
        }

        let result = self.compensate_claimed(request_id).await;
        self.coordinator.release_lock(&guard_key).await.ok();
        result
    }

    async fn compensate_claimed(&self, request_id: &str) -> Result<SagaRecord, SagaError> {
        let Some(record) = self.repository.find_by_request_id(request_id).await? else {
            return Err(SagaError::NotFound(request_id.to_string()));
        };
        if record.status.is_terminal() {
            return Ok(record);
        }

        for leg in record.made_legs_for_compensation() {
            let Some(reservation_id) = record.reservation_id(leg).map(str::to_string) else {
                continue;
            };

            let cancel_result = self
                .reservation_breaker
                .call(|| self.reservation_clients.get(leg).cancel(&reservation_id))
                .await;

            if let Err(either) = cancel_result {
                let error_message = either.to_string();
                self.repository
                    .set_error(request_id, &format!("{leg} cancellation failed: {error_message}"))
                    .await?;

                let payload = CompensationFailedPayload {
                    request_id: request_id.to_string(),
                    booking_id: record.booking_id.clone(),
                    compensation_type: leg.as_str().to_string(),
                    reservation_id,
                    error_message,
                    error_stack: None,
                    timestamp: chrono::Utc::now(),
                };
                self.publish_event(topics::COMPENSATION_FAILED, "CompensationFailed", &payload)
                    .await
                    .ok();
            }
        }

        self.repository
            .update_status(request_id, SagaStatus::Pending, SagaStatus::Compensated, None, None)
            .await?;

        let Some(final_record) = self.repository.find_by_request_id(request_id).await? else {
            return Err(SagaError::NotFound(request_id.to_string()));
        };
        self.finish_terminal(&final_record).await?;
        Ok(final_record)
    }

    async fn finish_terminal(&self, record: &SagaRecord) -> Result<(), SagaError> {
        self.coordinator.cleanup(&record.request_id).await.ok();
        self.coordinator.remove_from_pending_queue(&record.request_id).await.ok();

        let topic = if record.status == SagaStatus::Confirmed {
            topics::BOOKING_CONFIRMED
        } else {
            topics::BOOKING_FAILED
        };
        let payload = TerminalPayload {
            request_id: record.request_id.clone(),
            booking_id: record.booking_id.clone(),
            status: record.status.as_str().to_string(),
        };
        self.publish_event(topic, "SagaTerminal", &payload).await.ok();

        self.notifications.publish_terminal(TerminalEvent {
            request_id: record.request_id.clone(),
            status: record.status,
            snapshot: record.clone(),
        });
        Ok(())
    }

    /// Retry a fresh `create` against the durable store on a transient
    /// database error; `AlreadyExists` and other precondition failures are
    /// not transient and are returned immediately.
    async fn create_with_retry(&self, record: &SagaRecord) -> Result<(), SagaError> {
        let mut attempt = 0;
        loop {
            match self.repository.create(record).await {
                Ok(()) => return Ok(()),
                Err(saga_postgres::RepositoryError::Database(reason))
                    if self.retry_policy.should_retry(attempt) =>
                {
                    tracing::warn!(attempt, reason = %reason, "retrying saga record creation after a database error");
                    tokio::time::sleep(self.retry_policy.delay_for_attempt(attempt)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn refresh_cache(&self, record: &SagaRecord) {
        if let Ok(json) = serde_json::to_string(record) {
            self.coordinator
                .cache_active_saga_state(&record.request_id, json, self.config.hot_cache_ttl_seconds)
                .await
                .ok();
        }
    }

    async fn publish_event<T: Serialize>(
        &self,
        topic: &str,
        event_type: &str,
        payload: &T,
    ) -> Result<(), SagaError> {
        let data = bincode::serialize(payload).map_err(|e| SagaError::Validation(e.to_string()))?;
        let event = SerializedEvent::new(event_type.to_string(), data, None);
        self.event_bus.publish(topic, &event).await?;
        Ok(())
    }

    /// Look up by request id: hot cache first, durable store on a miss.
    ///
    /// # Errors
    ///
    /// Propagates repository/coordinator failures.
    pub async fn find_by_request_id(&self, request_id: &str) -> Result<Option<SagaRecord>, SagaError> {
        if let Some(json) = self.coordinator.get_active_saga_state(request_id).await? {
            if let Ok(record) = serde_json::from_str::<SagaRecord>(&json) {
                return Ok(Some(record));
            }
        }
        Ok(self.repository.find_by_request_id(request_id).await?)
    }

    /// Look up by booking id. `bookingId` is `NULL` until CONFIRMED (I1), so
    /// this only ever resolves through the durable store.
    ///
    /// # Errors
    ///
    /// Propagates repository failures.
    pub async fn find_by_booking_id(&self, booking_id: &str) -> Result<Option<SagaRecord>, SagaError> {
        Ok(self.repository.find_by_booking_id(booking_id).await?)
    }
}
