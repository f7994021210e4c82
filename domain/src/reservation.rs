//! Reservation clients (component C1).
//!
//! `spec.md` §6 only specifies the broker-level wire contract for legs; it
//! does not specify the client-side shape. Grounded in
//! `examples/ticketing/src/payment_gateway.rs`'s trait-plus-mock-adapter
//! pattern (`PaymentGateway`/`MockPaymentGateway`): one trait, a mock per
//! leg for tests, and a broker-publish-based adapter for production.
//!
//! The production adapter reconciles C1's "send a command and receive a
//! confirmation" framing with the asynchronous, broker-mediated reality of
//! `SPEC_FULL.md` §4.1: `reserve` publishes the command and returns
//! [`ReservationError::Pending`] once the publish succeeds — the real
//! confirmation arrives later as a broker event, handled by
//! [`crate::orchestrator::SagaOrchestrator::handle_leg_confirmed`] /
//! [`handle_leg_failed`](crate::orchestrator::SagaOrchestrator::handle_leg_failed).
//! Only `cancel`, which has no asynchronous confirmation step in the wire
//! contract, behaves the same way in both the mock and broker adapters.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::Mutex;

use saga_core::event::SerializedEvent;
use saga_core::event_bus::EventBus;
use saga_core::Leg;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::topics;

/// Wire payload for an outbound reservation command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReserveCommandPayload {
    /// The originating saga's request id.
    pub request_id: String,
    /// The requesting user.
    pub user_id: String,
    /// `requestId|leg` idempotency key.
    pub idempotency_key: String,
    /// Leg-specific fields (flight/hotel/car segment), carried as JSON so
    /// the three legs can share one payload shape.
    pub fields: serde_json::Value,
}

/// Wire payload for an outbound cancellation command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelCommandPayload {
    /// The originating saga's request id.
    pub request_id: String,
    /// The reservation id to cancel.
    pub reservation_id: String,
}

/// Wire payload for an inbound `.confirmed`/`.failed` correlation event
/// (`SPEC_FULL.md` §6: "same shape" for all three legs).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegOutcomePayload {
    /// The originating saga's request id.
    pub request_id: String,
    /// Present when `status` is `"confirmed"`.
    pub reservation_id: Option<String>,
    /// Present when `status` is `"confirmed"`.
    pub confirmation_code: Option<String>,
    /// Present when `status` is `"confirmed"`.
    pub amount: Option<f64>,
    /// `"confirmed"` or `"failed"`.
    pub status: String,
    /// Present when `status` is `"failed"`.
    pub reason: Option<String>,
}

/// The two outcomes a [`LegOutcomePayload`] can decode to.
#[derive(Debug, Clone)]
pub enum LegOutcome {
    /// The leg was confirmed.
    Confirmed {
        /// The originating saga's request id.
        request_id: String,
        /// The confirmation details.
        confirmation: Confirmation,
    },
    /// The leg failed.
    Failed {
        /// The originating saga's request id.
        request_id: String,
        /// A human-readable failure reason.
        reason: String,
    },
}

impl LegOutcomePayload {
    /// Decode a bincode-serialized `.confirmed`/`.failed` event body.
    ///
    /// # Errors
    ///
    /// Returns [`ReservationError::Transport`] if the payload cannot be
    /// deserialized or reports an unrecognised `status`.
    pub fn decode(data: &[u8]) -> Result<LegOutcome, ReservationError> {
        let payload: Self =
            bincode::deserialize(data).map_err(|e| ReservationError::Transport(e.to_string()))?;
        match payload.status.as_str() {
            "confirmed" => Ok(LegOutcome::Confirmed {
                request_id: payload.request_id,
                confirmation: Confirmation {
                    reservation_id: payload.reservation_id.unwrap_or_default(),
                    confirmation_code: payload.confirmation_code.unwrap_or_default(),
                    amount: payload.amount.unwrap_or(0.0),
                },
            }),
            "failed" => Ok(LegOutcome::Failed {
                request_id: payload.request_id,
                reason: payload.reason.unwrap_or_else(|| "unknown reason".to_string()),
            }),
            other => Err(ReservationError::Transport(format!("unrecognised leg outcome status: {other}"))),
        }
    }
}

/// One leg's reservation request, passed to [`ReservationClient::reserve`].
#[derive(Debug, Clone)]
pub struct ReservationRequest {
    /// The originating saga's request id.
    pub request_id: String,
    /// The requesting user.
    pub user_id: String,
    /// Which leg this request is for.
    pub leg: Leg,
    /// `requestId|leg` idempotency key.
    pub idempotency_key: String,
    /// Leg-specific fields (flight/hotel/car segment).
    pub fields: serde_json::Value,
}

/// A successful reservation confirmation.
#[derive(Debug, Clone)]
pub struct Confirmation {
    /// The downstream service's reservation id.
    pub reservation_id: String,
    /// The downstream service's confirmation code.
    pub confirmation_code: String,
    /// The amount charged for this leg.
    pub amount: f64,
}

/// Errors returned by a [`ReservationClient`].
#[derive(Debug, Clone, Error)]
pub enum ReservationError {
    /// The downstream service rejected the reservation outright.
    #[error("reservation rejected: {0}")]
    Rejected(String),

    /// The command was sent; its outcome will arrive asynchronously as a
    /// broker event rather than as this call's return value. Not a true
    /// failure — admission treats this the same as a successful send.
    #[error("reservation command sent; awaiting asynchronous confirmation")]
    Pending,

    /// The command could not be sent at all (broker/transport failure).
    #[error("transport error: {0}")]
    Transport(String),
}

/// Contract for sending a reservation command for one leg and cancelling it
/// (component C1).
pub trait ReservationClient: Send + Sync {
    /// Send a reservation command for `request`.
    ///
    /// # Errors
    ///
    /// See [`ReservationError`].
    fn reserve(
        &self,
        request: ReservationRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Confirmation, ReservationError>> + Send + '_>>;

    /// Cancel a previously made reservation, best-effort.
    ///
    /// # Errors
    ///
    /// See [`ReservationError`].
    fn cancel(
        &self,
        reservation_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), ReservationError>> + Send + '_>>;
}

#[derive(Debug, Clone)]
enum ReserveOutcome {
    Succeed,
    Fail(String),
}

/// Mock reservation client: succeeds by default, like
/// `MockPaymentGateway`; tests can arm it to fail the next `reserve` or
/// `cancel` call.
pub struct MockReservationClient {
    leg: Leg,
    reserve_outcome: Mutex<ReserveOutcome>,
    cancel_failure: Mutex<Option<String>>,
    cancelled: Mutex<Vec<String>>,
}

impl MockReservationClient {
    /// Create a mock client for `leg` that always succeeds until armed
    /// otherwise.
    #[must_use]
    pub fn new(leg: Leg) -> Self {
        Self {
            leg,
            reserve_outcome: Mutex::new(ReserveOutcome::Succeed),
            cancel_failure: Mutex::new(None),
            cancelled: Mutex::new(Vec::new()),
        }
    }

    /// Reservation ids passed to `cancel`, in call order.
    #[must_use]
    #[allow(clippy::unwrap_used)] // test mutex is never poisoned
    pub fn cancelled_ids(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }

    /// Creates an Arc-wrapped instance for sharing.
    #[must_use]
    pub fn shared(leg: Leg) -> Arc<dyn ReservationClient> {
        Arc::new(Self::new(leg))
    }

    /// Arm the client so the next (and all subsequent) `reserve` calls fail
    /// with `reason`.
    #[allow(clippy::unwrap_used)] // test mutex is never poisoned
    pub fn fail_reservations(&self, reason: impl Into<String>) {
        *self.reserve_outcome.lock().unwrap() = ReserveOutcome::Fail(reason.into());
    }

    /// Arm the client so the next (and all subsequent) `cancel` calls fail
    /// with `reason`.
    #[allow(clippy::unwrap_used)] // test mutex is never poisoned
    pub fn fail_cancellations(&self, reason: impl Into<String>) {
        *self.cancel_failure.lock().unwrap() = Some(reason.into());
    }
}

impl ReservationClient for MockReservationClient {
    fn reserve(
        &self,
        request: ReservationRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Confirmation, ReservationError>> + Send + '_>> {
        Box::pin(async move {
            #[allow(clippy::unwrap_used)] // test mutex is never poisoned
            let outcome = self.reserve_outcome.lock().unwrap().clone();
            match outcome {
                ReserveOutcome::Succeed => Ok(Confirmation {
                    reservation_id: format!("{}-{}", self.leg.as_str(), request.request_id),
                    confirmation_code: format!("CONF-{}", uuid::Uuid::new_v4()),
                    amount: 0.0,
                }),
                ReserveOutcome::Fail(reason) => Err(ReservationError::Rejected(reason)),
            }
        })
    }

    fn cancel(
        &self,
        reservation_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), ReservationError>> + Send + '_>> {
        let reservation_id = reservation_id.to_string();
        Box::pin(async move {
            #[allow(clippy::unwrap_used)] // test mutex is never poisoned
            self.cancelled.lock().unwrap().push(reservation_id);
            #[allow(clippy::unwrap_used)] // test mutex is never poisoned
            let failure = self.cancel_failure.lock().unwrap().clone();
            match failure {
                None => Ok(()),
                Some(reason) => Err(ReservationError::Rejected(reason)),
            }
        })
    }
}

/// Production reservation client: publishes reservation and cancellation
/// commands through the broker adapter (C2). The actual confirmation is
/// delivered out of band; see the module docs.
pub struct BrokerReservationClient {
    leg: Leg,
    event_bus: Arc<dyn EventBus>,
}

impl BrokerReservationClient {
    /// Create a client for `leg` publishing through `event_bus`.
    #[must_use]
    pub fn new(leg: Leg, event_bus: Arc<dyn EventBus>) -> Self {
        Self { leg, event_bus }
    }

    /// Creates an Arc-wrapped instance for sharing.
    #[must_use]
    pub fn shared(leg: Leg, event_bus: Arc<dyn EventBus>) -> Arc<dyn ReservationClient> {
        Arc::new(Self::new(leg, event_bus))
    }
}

impl ReservationClient for BrokerReservationClient {
    fn reserve(
        &self,
        request: ReservationRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Confirmation, ReservationError>> + Send + '_>> {
        Box::pin(async move {
            let payload = ReserveCommandPayload {
                request_id: request.request_id.clone(),
                user_id: request.user_id.clone(),
                idempotency_key: request.idempotency_key.clone(),
                fields: request.fields.clone(),
            };
            let data = bincode::serialize(&payload)
                .map_err(|e| ReservationError::Transport(e.to_string()))?;
            let event = SerializedEvent::new(
                format!("{}.reserve", self.leg.as_str()),
                data,
                Some(serde_json::json!({ "idempotency_key": request.idempotency_key })),
            );

            self.event_bus
                .publish(topics::reserve_topic(self.leg), &event)
                .await
                .map_err(|e| ReservationError::Transport(e.to_string()))?;

            Err(ReservationError::Pending)
        })
    }

    fn cancel(
        &self,
        reservation_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), ReservationError>> + Send + '_>> {
        let reservation_id = reservation_id.to_string();
        Box::pin(async move {
            let payload = CancelCommandPayload {
                request_id: String::new(),
                reservation_id: reservation_id.clone(),
            };
            let data = bincode::serialize(&payload)
                .map_err(|e| ReservationError::Transport(e.to_string()))?;
            let event = SerializedEvent::new(format!("{}.cancel", self.leg.as_str()), data, None);

            self.event_bus
                .publish(topics::cancel_topic(self.leg), &event)
                .await
                .map_err(|e| ReservationError::Transport(e.to_string()))
        })
    }
}

/// One [`ReservationClient`] per leg.
pub struct LegClients {
    /// Flight reservation client.
    pub flight: Arc<dyn ReservationClient>,
    /// Hotel reservation client.
    pub hotel: Arc<dyn ReservationClient>,
    /// Car rental reservation client.
    pub car: Arc<dyn ReservationClient>,
}

impl LegClients {
    /// Build a set of mock clients, one per leg, all succeeding by default.
    #[must_use]
    pub fn mock() -> Self {
        Self {
            flight: MockReservationClient::shared(Leg::Flight),
            hotel: MockReservationClient::shared(Leg::Hotel),
            car: MockReservationClient::shared(Leg::Car),
        }
    }

    /// Build a set of broker-backed production clients sharing `event_bus`.
    #[must_use]
    pub fn broker(event_bus: Arc<dyn EventBus>) -> Self {
        Self {
            flight: BrokerReservationClient::shared(Leg::Flight, Arc::clone(&event_bus)),
            hotel: BrokerReservationClient::shared(Leg::Hotel, Arc::clone(&event_bus)),
            car: BrokerReservationClient::shared(Leg::Car, event_bus),
        }
    }

    /// The client responsible for `leg`.
    #[must_use]
    pub const fn get(&self, leg: Leg) -> &Arc<dyn ReservationClient> {
        match leg {
            Leg::Flight => &self.flight,
            Leg::Hotel => &self.hotel,
            Leg::Car => &self.car,
        }
    }
}
