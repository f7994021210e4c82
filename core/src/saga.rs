//! Shared saga domain types: the booking request, the durable saga record,
//! and the three-leg `Leg` tag used throughout the orchestrator, repository,
//! coordinator, and broker adapter.
//!
//! These types are intentionally storage-agnostic: `saga-postgres` maps them
//! to and from rows, `saga-hotstore` serializes them as JSON for the hot
//! cache, and `domain` operates on them as plain values inside `SagaState`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the three reservation legs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Leg {
    /// Flight reservation.
    Flight,
    /// Hotel reservation.
    Hotel,
    /// Car rental reservation.
    Car,
}

impl Leg {
    /// All three legs, in fan-out (acquisition) order.
    #[must_use]
    pub const fn all() -> [Self; 3] {
        [Self::Flight, Self::Hotel, Self::Car]
    }

    /// All three legs, in reverse-acquisition (compensation) order.
    #[must_use]
    pub const fn compensation_order() -> [Self; 3] {
        [Self::Car, Self::Hotel, Self::Flight]
    }

    /// Lowercase name used in topic names and error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Flight => "flight",
            Self::Hotel => "hotel",
            Self::Car => "car",
        }
    }
}

impl fmt::Display for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The saga's current state-machine status (`SPEC_FULL.md` §3, §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SagaStatus {
    /// Admitted and in flight; no terminal outcome yet.
    Pending,
    /// All three legs confirmed; `booking_id` is set.
    Confirmed,
    /// Admission was rejected before any leg was issued.
    Failed,
    /// At least one leg failed and compensation has completed.
    Compensated,
}

impl SagaStatus {
    /// Whether this status is terminal (no further status mutation is permitted).
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Confirmed | Self::Failed | Self::Compensated)
    }

    /// Database string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Confirmed => "CONFIRMED",
            Self::Failed => "FAILED",
            Self::Compensated => "COMPENSATED",
        }
    }

    /// Parse from the database string representation.
    ///
    /// # Errors
    ///
    /// Returns an error string if `s` does not match a known status.
    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "CONFIRMED" => Ok(Self::Confirmed),
            "FAILED" => Ok(Self::Failed),
            "COMPENSATED" => Ok(Self::Compensated),
            other => Err(format!("unknown saga status: {other}")),
        }
    }
}

impl fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The flight segment of a booking request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlightSegment {
    /// Origin airport/city code.
    pub origin: String,
    /// Destination airport/city code.
    pub destination: String,
    /// Departure date/time.
    pub depart: DateTime<Utc>,
    /// Return date/time.
    pub return_date: DateTime<Utc>,
}

/// The hotel segment of a booking request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotelSegment {
    /// Hotel identifier.
    pub hotel_id: String,
    /// Check-in date.
    pub check_in: DateTime<Utc>,
    /// Check-out date.
    pub check_out: DateTime<Utc>,
}

/// The car-rental segment of a booking request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarSegment {
    /// Pickup location.
    pub pickup_location: String,
    /// Dropoff location.
    pub dropoff_location: String,
    /// Pickup date/time.
    pub pickup_date: DateTime<Utc>,
    /// Dropoff date/time.
    pub dropoff_date: DateTime<Utc>,
}

/// An immutable booking request: the input to `execute` (`SPEC_FULL.md` §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingRequest {
    /// The requesting user.
    pub user_id: String,
    /// Client-supplied or server-generated idempotency/correlation key.
    pub request_id: String,
    /// The flight segment.
    pub flight: FlightSegment,
    /// The hotel segment.
    pub hotel: HotelSegment,
    /// The car-rental segment.
    pub car: CarSegment,
    /// Total amount for the booking; must be non-negative.
    pub total_amount: f64,
}

/// Errors returned when validating a [`BookingRequest`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BookingRequestError {
    /// Flight departure is after its return.
    #[error("flight departure must not be after return")]
    FlightDatesInverted,
    /// Hotel check-in is after check-out.
    #[error("hotel check-in must not be after check-out")]
    HotelDatesInverted,
    /// Car pickup is after dropoff.
    #[error("car pickup must not be after dropoff")]
    CarDatesInverted,
    /// `total_amount` is negative.
    #[error("total amount must be non-negative")]
    NegativeAmount,
}

impl BookingRequest {
    /// Validate the invariants from `SPEC_FULL.md` §3: departure ≤ return;
    /// check-in ≤ check-out; pickup ≤ dropoff; non-negative amount.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    pub fn validate(&self) -> Result<(), BookingRequestError> {
        if self.flight.depart > self.flight.return_date {
            return Err(BookingRequestError::FlightDatesInverted);
        }
        if self.hotel.check_in > self.hotel.check_out {
            return Err(BookingRequestError::HotelDatesInverted);
        }
        if self.car.pickup_date > self.car.dropoff_date {
            return Err(BookingRequestError::CarDatesInverted);
        }
        if self.total_amount < 0.0 {
            return Err(BookingRequestError::NegativeAmount);
        }
        Ok(())
    }
}

/// The durable saga record: one row per `request_id` (`SPEC_FULL.md` §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaRecord {
    /// Primary key; unique.
    pub request_id: String,
    /// Set only once status = CONFIRMED; unique when set; prefixed per config.
    pub booking_id: Option<String>,
    /// The user who placed the booking.
    pub user_id: String,
    /// A full copy of the original request, for replay/audit.
    pub request: BookingRequest,
    /// Flight leg's reservation id, write-once.
    pub flight_reservation_id: Option<String>,
    /// Hotel leg's reservation id, write-once.
    pub hotel_reservation_id: Option<String>,
    /// Car leg's reservation id, write-once.
    pub car_reservation_id: Option<String>,
    /// Current state-machine status.
    pub status: SagaStatus,
    /// Human-readable error reason(s), appended on each new failure.
    pub error_message: Option<String>,
    /// Timestamp of the most recent status transition.
    pub last_transition_at: DateTime<Utc>,
    /// Record creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp; bumped on every write.
    pub updated_at: DateTime<Utc>,
}

impl SagaRecord {
    /// Read the reservation id currently recorded for `leg`.
    #[must_use]
    pub fn reservation_id(&self, leg: Leg) -> Option<&str> {
        match leg {
            Leg::Flight => self.flight_reservation_id.as_deref(),
            Leg::Hotel => self.hotel_reservation_id.as_deref(),
            Leg::Car => self.car_reservation_id.as_deref(),
        }
    }

    /// Whether all three legs have a non-null reservation id (P1).
    #[must_use]
    pub fn all_legs_confirmed(&self) -> bool {
        Leg::all().iter().all(|leg| self.reservation_id(*leg).is_some())
    }

    /// The legs that hold a non-null reservation id ("made" legs for
    /// compensation), in reverse-acquisition order.
    #[must_use]
    pub fn made_legs_for_compensation(&self) -> Vec<Leg> {
        Leg::compensation_order()
            .into_iter()
            .filter(|leg| self.reservation_id(*leg).is_some())
            .collect()
    }
}
