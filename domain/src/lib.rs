//! Saga domain crate: the orchestrator and its immediate collaborators
//! (components C1, C5, C6, C7).
//!
//! This crate owns no transport or storage concerns of its own — it is
//! wired against the trait objects exposed by `saga-core`, `saga-postgres`,
//! and `saga-hotstore`, and against the concrete broker adapter from
//! `saga-broker` by the `service` crate's composition root.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod notification;
pub mod orchestrator;
pub mod reservation;
pub mod topics;

pub use config::SagaConfig;
pub use dispatcher::BookingDispatcher;
pub use error::SagaError;
pub use notification::{NotificationHub, TerminalEvent};
pub use orchestrator::{ExecuteOutcome, SagaOrchestrator};
pub use reservation::{
    BrokerReservationClient, Confirmation, LegClients, LegOutcome, LegOutcomePayload,
    MockReservationClient, ReservationClient, ReservationError, ReservationRequest,
};
