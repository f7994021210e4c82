//! Error taxonomy for the saga domain (component boundary errors rolled up
//! into one enum per `SPEC_FULL.md` §7.1).

use saga_core::event_bus::EventBusError;
use saga_hotstore::CoordinatorError;
use saga_postgres::RepositoryError;
use thiserror::Error;

use crate::reservation::ReservationError;

/// Errors surfaced by [`crate::orchestrator::SagaOrchestrator`] and
/// [`crate::dispatcher::BookingDispatcher`].
#[derive(Debug, Error)]
pub enum SagaError {
    /// The booking request itself violated a data-model invariant
    /// (inverted dates, negative amount).
    #[error("invalid booking request: {0}")]
    Validation(String),

    /// The coordination layer (locks, rate limits, hot cache) failed.
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    /// The durable repository failed.
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// The broker adapter failed to publish or subscribe.
    #[error(transparent)]
    EventBus(#[from] EventBusError),

    /// A reservation client call failed outside of the expected pending path.
    #[error(transparent)]
    Reservation(#[from] ReservationError),

    /// No saga record exists for the given key.
    #[error("saga record not found: {0}")]
    NotFound(String),
}
