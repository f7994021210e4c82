//! End-to-end scenarios for the saga orchestrator (`SPEC_FULL.md` §8),
//! wired entirely against in-memory fakes from `saga_testing` plus
//! `saga_domain`'s own `MockReservationClient`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use futures::StreamExt;
use saga_core::event_bus::EventBus;
use saga_core::{BookingRequest, CarSegment, FlightSegment, HotelSegment, Leg, SagaStatus};
use saga_domain::config::SagaConfig;
use saga_domain::notification::NotificationHub;
use saga_domain::orchestrator::SagaOrchestrator;
use saga_domain::reservation::{Confirmation, LegClients, MockReservationClient, ReservationClient};
use saga_hotstore::SagaCoordinator;
use saga_postgres::SagaRepository;
use saga_testing::mocks::{InMemoryCoordinator, InMemoryEventBus, InMemorySagaRepository};

struct Harness {
    orchestrator: Arc<SagaOrchestrator>,
    coordinator: Arc<dyn SagaCoordinator>,
    repository: Arc<dyn SagaRepository>,
    notifications: Arc<NotificationHub>,
    event_bus: Arc<dyn EventBus>,
    flight: Arc<MockReservationClient>,
    hotel: Arc<MockReservationClient>,
    car: Arc<MockReservationClient>,
}

fn build_harness() -> Harness {
    let repository: Arc<dyn SagaRepository> = Arc::new(InMemorySagaRepository::new());
    let coordinator: Arc<dyn SagaCoordinator> = Arc::new(InMemoryCoordinator::new());
    let event_bus: Arc<dyn EventBus> = Arc::new(InMemoryEventBus::new());
    let notifications = Arc::new(NotificationHub::new(300));

    let flight = Arc::new(MockReservationClient::new(Leg::Flight));
    let hotel = Arc::new(MockReservationClient::new(Leg::Hotel));
    let car = Arc::new(MockReservationClient::new(Leg::Car));
    let clients = LegClients {
        flight: Arc::clone(&flight) as Arc<dyn ReservationClient>,
        hotel: Arc::clone(&hotel) as Arc<dyn ReservationClient>,
        car: Arc::clone(&car) as Arc<dyn ReservationClient>,
    };

    let orchestrator = Arc::new(SagaOrchestrator::new(
        Arc::clone(&repository),
        Arc::clone(&coordinator),
        Arc::clone(&event_bus),
        clients,
        Arc::clone(&notifications),
        SagaConfig::default(),
    ));

    Harness {
        orchestrator,
        coordinator,
        repository,
        notifications,
        event_bus,
        flight,
        hotel,
        car,
    }
}

fn sample_request(request_id: &str, user_id: &str) -> BookingRequest {
    let now = Utc::now();
    BookingRequest {
        user_id: user_id.to_string(),
        request_id: request_id.to_string(),
        flight: FlightSegment {
            origin: "SFO".to_string(),
            destination: "JFK".to_string(),
            depart: now + ChronoDuration::days(10),
            return_date: now + ChronoDuration::days(17),
        },
        hotel: HotelSegment {
            hotel_id: "hotel-42".to_string(),
            check_in: now + ChronoDuration::days(10),
            check_out: now + ChronoDuration::days(17),
        },
        car: CarSegment {
            pickup_location: "JFK".to_string(),
            dropoff_location: "JFK".to_string(),
            pickup_date: now + ChronoDuration::days(10),
            dropoff_date: now + ChronoDuration::days(17),
        },
        total_amount: 1999.99,
    }
}

fn confirmation_for(leg: Leg, request_id: &str) -> Confirmation {
    Confirmation {
        reservation_id: format!("{leg}-{request_id}"),
        confirmation_code: format!("CONF-{leg}-{request_id}"),
        amount: 100.0,
    }
}

/// Scenario 1: happy path. All three legs confirm; aggregation fires off
/// the last confirmation; exactly one terminal event is delivered.
#[tokio::test]
async fn happy_path_confirms_and_notifies_once() {
    let h = build_harness();
    let request = sample_request("R1", "user-1");

    let outcome = h.orchestrator.execute(request).await.expect("execute");
    assert_eq!(outcome.status, SagaStatus::Pending);

    let mut stream = h.notifications.subscribe("R1");

    for leg in Leg::all() {
        h.orchestrator
            .handle_leg_confirmed("R1", leg, confirmation_for(leg, "R1"))
            .await
            .expect("confirm");
    }

    let record = h
        .orchestrator
        .find_by_request_id("R1")
        .await
        .expect("lookup")
        .expect("record exists");
    assert_eq!(record.status, SagaStatus::Confirmed);
    let booking_id = record.booking_id.expect("booking id set");
    assert!(booking_id.starts_with("TRV-"));
    assert!(record.flight_reservation_id.is_some());
    assert!(record.hotel_reservation_id.is_some());
    assert!(record.car_reservation_id.is_some());

    let event = tokio::time::timeout(Duration::from_secs(1), stream.next())
        .await
        .expect("no timeout")
        .expect("one terminal event");
    assert_eq!(event.status, SagaStatus::Confirmed);
    assert!(stream.next().await.is_none(), "stream closes after one event");
}

/// Scenario 2: the car leg fails after flight and hotel succeed. Only the
/// legs that actually hold a reservation id are cancelled, in reverse
/// acquisition order, and the error mentions the failing leg.
#[tokio::test]
async fn car_failure_compensates_hotel_then_flight_only() {
    let h = build_harness();
    let request = sample_request("R2", "user-2");
    h.orchestrator.execute(request).await.expect("execute");

    h.orchestrator
        .handle_leg_confirmed("R2", Leg::Flight, confirmation_for(Leg::Flight, "R2"))
        .await
        .expect("confirm flight");
    h.orchestrator
        .handle_leg_confirmed("R2", Leg::Hotel, confirmation_for(Leg::Hotel, "R2"))
        .await
        .expect("confirm hotel");
    h.orchestrator
        .handle_leg_failed("R2", Leg::Car, "no availability")
        .await
        .expect("fail car");

    let record = h
        .orchestrator
        .find_by_request_id("R2")
        .await
        .expect("lookup")
        .expect("record exists");
    assert_eq!(record.status, SagaStatus::Compensated);
    assert!(record.error_message.unwrap_or_default().contains("car"));

    assert_eq!(h.hotel.cancelled_ids().len(), 1);
    assert_eq!(h.flight.cancelled_ids().len(), 1);
    assert!(h.car.cancelled_ids().is_empty(), "car was never reserved, so never cancelled");
}

/// Scenario 3: compensation itself partially fails. The hotel cancel
/// errors but flight is still cancelled; a dead-letter event is emitted
/// exactly once and the error message records both failures.
#[tokio::test]
async fn failed_cancel_emits_dead_letter_and_still_cancels_remaining_legs() {
    let h = build_harness();
    let mut dead_letters = h
        .event_bus
        .subscribe(&["compensation.failed"])
        .await
        .expect("subscribe to dead-letter topic");

    let request = sample_request("R3", "user-3");
    h.orchestrator.execute(request).await.expect("execute");

    h.orchestrator
        .handle_leg_confirmed("R3", Leg::Flight, confirmation_for(Leg::Flight, "R3"))
        .await
        .expect("confirm flight");
    h.orchestrator
        .handle_leg_confirmed("R3", Leg::Hotel, confirmation_for(Leg::Hotel, "R3"))
        .await
        .expect("confirm hotel");
    h.hotel.fail_cancellations("hotel gateway down");
    h.orchestrator
        .handle_leg_failed("R3", Leg::Car, "no availability")
        .await
        .expect("fail car");

    let record = h
        .orchestrator
        .find_by_request_id("R3")
        .await
        .expect("lookup")
        .expect("record exists");
    assert_eq!(record.status, SagaStatus::Compensated);
    let error_message = record.error_message.unwrap_or_default();
    assert!(error_message.contains("car"));
    assert!(error_message.contains("hotel"));

    assert_eq!(h.flight.cancelled_ids().len(), 1, "flight is still cancelled");
    assert_eq!(h.hotel.cancelled_ids().len(), 1, "hotel cancel was attempted even though it failed");

    let dead_letter = tokio::time::timeout(Duration::from_millis(500), dead_letters.next())
        .await
        .expect("no timeout")
        .expect("one dead-letter event")
        .expect("not an error");
    assert_eq!(dead_letter.event_type, "CompensationFailed");
}

/// Scenario 4 / P7: at most five admissions per user per window; the
/// sixth is rejected with a rate-limit message.
#[tokio::test]
async fn rate_limit_admits_five_then_rejects_sixth() {
    let h = build_harness();
    for i in 0..5 {
        let request = sample_request(&format!("R4-{i}"), "user-4");
        let outcome = h.orchestrator.execute(request).await.expect("execute");
        assert_eq!(outcome.status, SagaStatus::Pending);
    }

    let rejected = sample_request("R4-5", "user-4");
    let outcome = h.orchestrator.execute(rejected).await.expect("execute");
    assert_eq!(outcome.status, SagaStatus::Failed);
    assert!(outcome.message.unwrap_or_default().contains("Rate limit"));
}

/// Scenario 5: replaying `execute` for a saga that already reached
/// CONFIRMED returns the existing snapshot, not a fresh admission.
#[tokio::test]
async fn idempotent_replay_returns_existing_terminal_snapshot() {
    let h = build_harness();
    let request = sample_request("R5", "user-5");
    h.orchestrator.execute(request.clone()).await.expect("execute");
    for leg in Leg::all() {
        h.orchestrator
            .handle_leg_confirmed("R5", leg, confirmation_for(leg, "R5"))
            .await
            .expect("confirm");
    }
    let first = h
        .orchestrator
        .find_by_request_id("R5")
        .await
        .expect("lookup")
        .expect("record exists");
    assert_eq!(first.status, SagaStatus::Confirmed);

    let replay_outcome = h.orchestrator.execute(request).await.expect("replay execute");
    assert_eq!(replay_outcome.status, SagaStatus::Confirmed);

    let second = h
        .orchestrator
        .find_by_request_id("R5")
        .await
        .expect("lookup")
        .expect("record exists");
    assert_eq!(first.booking_id, second.booking_id, "no duplicate booking id generated");
}

/// Scenario 6: a hot-cache miss falls back to the durable store and
/// returns the record unchanged.
#[tokio::test]
async fn hot_cache_miss_falls_back_to_durable_store() {
    let h = build_harness();
    let request = sample_request("R6", "user-6");
    h.orchestrator.execute(request).await.expect("execute");

    h.coordinator
        .clear_active_saga_state("R6")
        .await
        .expect("evict hot cache");

    let record = h
        .orchestrator
        .find_by_request_id("R6")
        .await
        .expect("lookup")
        .expect("record exists via durable store");
    assert_eq!(record.status, SagaStatus::Pending);
    assert_eq!(record.request_id, "R6");

    let direct = h
        .repository
        .find_by_request_id("R6")
        .await
        .expect("direct repository lookup")
        .expect("record exists");
    assert_eq!(direct.status, record.status);
}

/// P4: a leg's reservation id is write-once; a second, different
/// confirmation for the same leg does not overwrite the first.
#[tokio::test]
async fn reservation_id_is_write_once() {
    let h = build_harness();
    let request = sample_request("R7", "user-7");
    h.orchestrator.execute(request).await.expect("execute");

    h.orchestrator
        .handle_leg_confirmed("R7", Leg::Flight, confirmation_for(Leg::Flight, "R7"))
        .await
        .expect("first confirm");
    h.orchestrator
        .handle_leg_confirmed(
            "R7",
            Leg::Flight,
            Confirmation {
                reservation_id: "flight-different".to_string(),
                confirmation_code: "CONF-other".to_string(),
                amount: 1.0,
            },
        )
        .await
        .expect("second confirm is a no-op, not an error");

    let record = h
        .orchestrator
        .find_by_request_id("R7")
        .await
        .expect("lookup")
        .expect("record exists");
    assert_eq!(record.flight_reservation_id.as_deref(), Some("flight-R7"));
}
