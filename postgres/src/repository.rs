//! `PostgreSQL`-backed saga state repository (component C3).
//!
//! One row per `request_id` in the `saga_states` table, with a sparse unique
//! index on `booking_id` (null until CONFIRMED). All status and per-leg
//! writes are conditional updates so the invariants in `SPEC_FULL.md` §3
//! (I1–I4) are enforced by the database itself, not by application-level
//! locking.

use std::future::Future;
use std::pin::Pin;

use chrono::Utc;
use saga_core::{BookingRequest, Leg, SagaRecord, SagaStatus};
use sqlx::{PgPool, Row};
use thiserror::Error;

/// Errors that can occur while reading or writing saga records.
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// `create` was called with a `request_id` that already exists.
    #[error("saga record already exists for request_id {0}")]
    AlreadyExists(String),

    /// No record found for the given key.
    #[error("saga record not found: {0}")]
    NotFound(String),

    /// A conditional update's precondition did not hold (e.g. status had
    /// already moved on, or the column was already non-null).
    #[error("conditional update skipped: {0}")]
    PreconditionFailed(String),

    /// The underlying database driver returned an error.
    #[error("database error: {0}")]
    Database(String),

    /// The request/record JSON payload failed to (de)serialize.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Contract for the durable saga state repository (component C3).
pub trait SagaRepository: Send + Sync {
    /// Insert a new saga record. Fails with [`RepositoryError::AlreadyExists`]
    /// if `request_id` is already present.
    fn create(
        &self,
        record: &SagaRecord,
    ) -> Pin<Box<dyn Future<Output = Result<(), RepositoryError>> + Send + '_>>;

    /// Look up by the primary key.
    fn find_by_request_id(
        &self,
        request_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<SagaRecord>, RepositoryError>> + Send + '_>>;

    /// Look up by the (sparse, unique) booking id.
    fn find_by_booking_id(
        &self,
        booking_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<SagaRecord>, RepositoryError>> + Send + '_>>;

    /// Conditionally transition status; applies only if current status is
    /// `from`. When transitioning to CONFIRMED, `booking_id` must be
    /// supplied and is set atomically with the status change (I1).
    fn update_status(
        &self,
        request_id: &str,
        from: SagaStatus,
        to: SagaStatus,
        booking_id: Option<&str>,
        error_message: Option<&str>,
    ) -> Pin<Box<dyn Future<Output = Result<bool, RepositoryError>> + Send + '_>>;

    /// Conditionally write a leg's reservation id; applies only if the
    /// column is currently null (I3). Returns `true` if this call is the one
    /// that set it, `false` if it was already set (a benign duplicate).
    fn save_confirmed_reservation(
        &self,
        leg: Leg,
        request_id: &str,
        reservation_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<bool, RepositoryError>> + Send + '_>>;

    /// Append a human-readable error reason to the record's error message.
    fn set_error(
        &self,
        request_id: &str,
        message: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), RepositoryError>> + Send + '_>>;
}

/// `PostgreSQL` implementation of [`SagaRepository`].
#[derive(Clone)]
pub struct PostgresSagaRepository {
    pool: PgPool,
}

impl PostgresSagaRepository {
    /// Wrap an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the `saga_states` table and its indexes if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Database`] if the DDL statement fails.
    pub async fn migrate(&self) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS saga_states (
                request_id TEXT PRIMARY KEY,
                booking_id TEXT,
                user_id TEXT NOT NULL,
                request_json JSONB NOT NULL,
                flight_reservation_id TEXT,
                hotel_reservation_id TEXT,
                car_reservation_id TEXT,
                status TEXT NOT NULL,
                error_message TEXT,
                last_transition_at TIMESTAMPTZ NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        sqlx::query(
            r"
            CREATE UNIQUE INDEX IF NOT EXISTS saga_states_booking_id_idx
            ON saga_states (booking_id)
            WHERE booking_id IS NOT NULL
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        Ok(())
    }

    fn row_to_record(row: &sqlx::postgres::PgRow) -> Result<SagaRecord, RepositoryError> {
        let request_json: serde_json::Value = row
            .try_get("request_json")
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        let request: BookingRequest = serde_json::from_value(request_json)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;

        let status_str: String = row
            .try_get("status")
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        let status = SagaStatus::parse(&status_str).map_err(RepositoryError::Serialization)?;

        Ok(SagaRecord {
            request_id: row
                .try_get("request_id")
                .map_err(|e| RepositoryError::Database(e.to_string()))?,
            booking_id: row
                .try_get("booking_id")
                .map_err(|e| RepositoryError::Database(e.to_string()))?,
            user_id: row
                .try_get("user_id")
                .map_err(|e| RepositoryError::Database(e.to_string()))?,
            request,
            flight_reservation_id: row
                .try_get("flight_reservation_id")
                .map_err(|e| RepositoryError::Database(e.to_string()))?,
            hotel_reservation_id: row
                .try_get("hotel_reservation_id")
                .map_err(|e| RepositoryError::Database(e.to_string()))?,
            car_reservation_id: row
                .try_get("car_reservation_id")
                .map_err(|e| RepositoryError::Database(e.to_string()))?,
            status,
            error_message: row
                .try_get("error_message")
                .map_err(|e| RepositoryError::Database(e.to_string()))?,
            last_transition_at: row
                .try_get("last_transition_at")
                .map_err(|e| RepositoryError::Database(e.to_string()))?,
            created_at: row
                .try_get("created_at")
                .map_err(|e| RepositoryError::Database(e.to_string()))?,
            updated_at: row
                .try_get("updated_at")
                .map_err(|e| RepositoryError::Database(e.to_string()))?,
        })
    }

    fn leg_column(leg: Leg) -> &'static str {
        match leg {
            Leg::Flight => "flight_reservation_id",
            Leg::Hotel => "hotel_reservation_id",
            Leg::Car => "car_reservation_id",
        }
    }

    /// Delete every saga record for `user_id`. Test-only: must never be
    /// wired into a production dispatcher or HTTP surface.
    #[cfg(any(test, feature = "test-utils"))]
    pub async fn delete_by_user_id(&self, user_id: &str) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM saga_states WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        Ok(())
    }
}

impl SagaRepository for PostgresSagaRepository {
    fn create(
        &self,
        record: &SagaRecord,
    ) -> Pin<Box<dyn Future<Output = Result<(), RepositoryError>> + Send + '_>> {
        let record = record.clone();
        Box::pin(async move {
            let request_json = serde_json::to_value(&record.request)
                .map_err(|e| RepositoryError::Serialization(e.to_string()))?;

            let result = sqlx::query(
                r"
                INSERT INTO saga_states (
                    request_id, booking_id, user_id, request_json,
                    flight_reservation_id, hotel_reservation_id, car_reservation_id,
                    status, error_message, last_transition_at, created_at, updated_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                ",
            )
            .bind(&record.request_id)
            .bind(&record.booking_id)
            .bind(&record.user_id)
            .bind(request_json)
            .bind(&record.flight_reservation_id)
            .bind(&record.hotel_reservation_id)
            .bind(&record.car_reservation_id)
            .bind(record.status.as_str())
            .bind(&record.error_message)
            .bind(record.last_transition_at)
            .bind(record.created_at)
            .bind(record.updated_at)
            .execute(&self.pool)
            .await;

            match result {
                Ok(_) => {
                    metrics::counter!("repository.saga.created").increment(1);
                    Ok(())
                },
                Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                    Err(RepositoryError::AlreadyExists(record.request_id.clone()))
                },
                Err(e) => Err(RepositoryError::Database(e.to_string())),
            }
        })
    }

    fn find_by_request_id(
        &self,
        request_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<SagaRecord>, RepositoryError>> + Send + '_>>
    {
        let request_id = request_id.to_string();
        Box::pin(async move {
            let row = sqlx::query("SELECT * FROM saga_states WHERE request_id = $1")
                .bind(&request_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| RepositoryError::Database(e.to_string()))?;

            row.as_ref().map(Self::row_to_record).transpose()
        })
    }

    fn find_by_booking_id(
        &self,
        booking_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<SagaRecord>, RepositoryError>> + Send + '_>>
    {
        let booking_id = booking_id.to_string();
        Box::pin(async move {
            let row = sqlx::query("SELECT * FROM saga_states WHERE booking_id = $1")
                .bind(&booking_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| RepositoryError::Database(e.to_string()))?;

            row.as_ref().map(Self::row_to_record).transpose()
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
            let now = Utc::now();

            let result = sqlx::query(
                r"
                UPDATE saga_states
                SET status = $1,
                    booking_id = COALESCE($2, booking_id),
                    error_message = COALESCE($3, error_message),
                    last_transition_at = $4,
                    updated_at = $4
                WHERE request_id = $5 AND status = $6
                ",
            )
            .bind(to.as_str())
            .bind(&booking_id)
            .bind(&error_message)
            .bind(now)
            .bind(&request_id)
            .bind(from.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

            let applied = result.rows_affected() == 1;
            tracing::debug!(request_id = %request_id, ?from, ?to, applied, "update_status");
            metrics::counter!("repository.saga.status_transition", "applied" => applied.to_string())
                .increment(1);
            Ok(applied)
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
            let column = Self::leg_column(leg);
            let now = Utc::now();

            let sql = format!(
                "UPDATE saga_states SET {column} = $1, updated_at = $2 \
                 WHERE request_id = $3 AND {column} IS NULL"
            );

            let result = sqlx::query(&sql)
                .bind(&reservation_id)
                .bind(now)
                .bind(&request_id)
                .execute(&self.pool)
                .await
                .map_err(|e| RepositoryError::Database(e.to_string()))?;

            let applied = result.rows_affected() == 1;
            tracing::debug!(
                request_id = %request_id,
                leg = %leg,
                applied,
                "save_confirmed_reservation"
            );
            Ok(applied)
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
            let now = Utc::now();
            sqlx::query(
                r"
                UPDATE saga_states
                SET error_message = CASE
                        WHEN error_message IS NULL OR error_message = '' THEN $1
                        ELSE error_message || '; ' || $1
                    END,
                    updated_at = $2
                WHERE request_id = $3
                ",
            )
            .bind(&message)
            .bind(now)
            .bind(&request_id)
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

            Ok(())
        })
    }
}
