//! Booking dispatcher (component C6): the single entry point external
//! callers (the HTTP/gRPC edge, the `service` crate's handlers) use to
//! submit a booking request, kept as a thin seam over
//! [`SagaOrchestrator`] so the edge never depends on orchestrator internals.

use std::sync::Arc;

use saga_core::BookingRequest;

use crate::error::SagaError;
use crate::orchestrator::{ExecuteOutcome, SagaOrchestrator};

/// Routes booking requests to the orchestrator.
pub struct BookingDispatcher {
    orchestrator: Arc<SagaOrchestrator>,
}

impl BookingDispatcher {
    /// Wrap an orchestrator.
    #[must_use]
    pub const fn new(orchestrator: Arc<SagaOrchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Submit a booking request for admission.
    ///
    /// # Errors
    ///
    /// See [`SagaOrchestrator::execute`].
    pub async fn dispatch(&self, request: BookingRequest) -> Result<ExecuteOutcome, SagaError> {
        self.orchestrator.execute(request).await
    }
}
