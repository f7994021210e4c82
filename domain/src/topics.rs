//! Broker topic names, one function per row of `SPEC_FULL.md` §6's topic
//! table. Keeping the mapping centralised here means the orchestrator,
//! the per-leg confirmation handlers, and the reservation clients all
//! agree on the exact same strings.

use saga_core::Leg;

/// Outbound reservation-request topic for `leg`.
#[must_use]
pub const fn reserve_topic(leg: Leg) -> &'static str {
    match leg {
        Leg::Flight => "booking.reserve.flight",
        Leg::Hotel => "booking.reserve.hotel",
        Leg::Car => "booking.reserve.car",
    }
}

/// Inbound success-confirmation topic for `leg`.
#[must_use]
pub const fn confirmed_topic(leg: Leg) -> &'static str {
    match leg {
        Leg::Flight => "booking.reserve.flight.confirmed",
        Leg::Hotel => "booking.reserve.hotel.confirmed",
        Leg::Car => "booking.reserve.car.confirmed",
    }
}

/// Inbound failure topic for `leg`.
#[must_use]
pub const fn failed_topic(leg: Leg) -> &'static str {
    match leg {
        Leg::Flight => "booking.reserve.flight.failed",
        Leg::Hotel => "booking.reserve.hotel.failed",
        Leg::Car => "booking.reserve.car.failed",
    }
}

/// Outbound cancellation topic for `leg`, used during compensation.
#[must_use]
pub const fn cancel_topic(leg: Leg) -> &'static str {
    match leg {
        Leg::Flight => "booking.cancel.flight",
        Leg::Hotel => "booking.cancel.hotel",
        Leg::Car => "booking.cancel.car",
    }
}

/// Outbound terminal-success event topic.
pub const BOOKING_CONFIRMED: &str = "booking.confirmed";

/// Outbound terminal-failure event topic.
pub const BOOKING_FAILED: &str = "booking.failed";

/// Outbound dead-letter topic for failed compensations.
pub const COMPENSATION_FAILED: &str = "compensation.failed";

/// All confirmation and failure topics, for a single `subscribe` call
/// covering every leg.
#[must_use]
pub fn all_correlation_topics() -> Vec<&'static str> {
    Leg::all()
        .into_iter()
        .flat_map(|leg| [confirmed_topic(leg), failed_topic(leg)])
        .collect()
}

/// Recover the leg a correlation event belongs to from its `event_type`
/// (`"{leg}.confirmed"` / `"{leg}.failed"`, the counterpart of
/// [`reserve_topic`]'s `"{leg}.reserve"` convention).
#[must_use]
pub fn leg_from_event_type(event_type: &str) -> Option<Leg> {
    let prefix = event_type.split('.').next()?;
    Leg::all().into_iter().find(|leg| leg.as_str() == prefix)
}
