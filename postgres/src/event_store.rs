//! `PostgreSQL`-backed implementation of [`saga_core::EventStore`].
//!
//! Kept as general-purpose event-sourcing infrastructure alongside the
//! saga-specific [`crate::repository::PostgresSagaRepository`]; the saga
//! orchestrator itself uses plain CRUD against `saga_states`; this store
//! backs any aggregate in the workspace that chooses event sourcing.

use std::future::Future;
use std::pin::Pin;

use saga_core::event::SerializedEvent;
use saga_core::event_store::{EventStore, EventStoreError};
use saga_core::stream::{StreamId, Version};
use sqlx::{PgPool, Row};

/// `PostgreSQL` event store: one `events` table keyed by `(stream_id, version)`,
/// plus a `snapshots` table keyed by `stream_id`.
#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    /// Connect to `database_url` and prepare the store.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::DatabaseError`] if the connection fails.
    pub async fn new(database_url: &str) -> Result<Self, EventStoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| EventStoreError::DatabaseError(e.to_string()))?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool (used by tests and by the `service` crate, which
    /// owns a single shared pool across stores).
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the `events` and `snapshots` tables if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::DatabaseError`] if the DDL statement fails.
    pub async fn migrate(&self) -> Result<(), EventStoreError> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS events (
                stream_id TEXT NOT NULL,
                version BIGINT NOT NULL,
                event_type TEXT NOT NULL,
                event_data BYTEA NOT NULL,
                metadata JSONB,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                PRIMARY KEY (stream_id, version)
            );

            CREATE INDEX IF NOT EXISTS idx_events_created ON events(created_at);
            CREATE INDEX IF NOT EXISTS idx_events_type ON events(event_type);

            CREATE TABLE IF NOT EXISTS snapshots (
                stream_id TEXT PRIMARY KEY,
                version BIGINT NOT NULL,
                state_data BYTEA NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            );
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| EventStoreError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn current_version_in(
        tx: &mut sqlx::PgConnection,
        stream_id: &StreamId,
    ) -> Result<Option<Version>, EventStoreError> {
        let row: (Option<i64>,) =
            sqlx::query_as("SELECT MAX(version) FROM events WHERE stream_id = $1")
                .bind(stream_id.as_str())
                .fetch_one(tx)
                .await
                .map_err(|e| EventStoreError::DatabaseError(e.to_string()))?;

        #[allow(clippy::cast_sign_loss)]
        Ok(row.0.map(|max| Version::new(max as u64)))
    }
}

impl EventStore for PostgresEventStore {
    fn append_events(
        &self,
        stream_id: StreamId,
        expected_version: Option<Version>,
        events: Vec<SerializedEvent>,
    ) -> Pin<Box<dyn Future<Output = Result<Version, EventStoreError>> + Send + '_>> {
        Box::pin(async move {
            if events.is_empty() {
                return Err(EventStoreError::DatabaseError(
                    "cannot append an empty event list".to_string(),
                ));
            }

            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| EventStoreError::DatabaseError(e.to_string()))?;

            // SERIALIZABLE makes the version check below race-free against a
            // concurrent append on the same stream: one of the two
            // transactions gets a serialization failure on commit, which we
            // surface as a conflict too.
            sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
                .execute(&mut *tx)
                .await
                .map_err(|e| EventStoreError::DatabaseError(e.to_string()))?;

            let current = Self::current_version_in(&mut tx, &stream_id).await?;
            if expected_version != current {
                let actual = current.unwrap_or(Version::new(0));
                return Err(EventStoreError::ConcurrencyConflict {
                    stream_id,
                    expected: expected_version.unwrap_or(Version::new(0)),
                    actual,
                });
            }

            let mut next_version = current.map_or(0, |v| v.value() + 1);

            for event in &events {
                #[allow(clippy::cast_possible_wrap)]
                sqlx::query(
                    r"
                    INSERT INTO events (stream_id, version, event_type, event_data, metadata)
                    VALUES ($1, $2, $3, $4, $5)
                    ",
                )
                .bind(stream_id.as_str())
                .bind(next_version as i64)
                .bind(&event.event_type)
                .bind(&event.data)
                .bind(&event.metadata)
                .execute(&mut *tx)
                .await
                .map_err(|e| EventStoreError::DatabaseError(e.to_string()))?;

                next_version += 1;
            }

            tx.commit().await.map_err(|e| {
                if let sqlx::Error::Database(ref db_err) = e {
                    // Postgres SQLSTATE 40001 is serialization_failure.
                    if db_err.code().as_deref() == Some("40001") {
                        return EventStoreError::ConcurrencyConflict {
                            stream_id: stream_id.clone(),
                            expected: expected_version.unwrap_or(Version::new(0)),
                            actual: expected_version.unwrap_or(Version::new(0)),
                        };
                    }
                }
                EventStoreError::DatabaseError(e.to_string())
            })?;

            let new_version = Version::new(next_version - 1);
            metrics::counter!("event_store.append", "stream" => stream_id.as_str().to_string())
                .increment(events.len() as u64);

            Ok(new_version)
        })
    }

    fn load_events(
        &self,
        stream_id: StreamId,
        from_version: Option<Version>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SerializedEvent>, EventStoreError>> + Send + '_>>
    {
        Box::pin(async move {
            #[allow(clippy::cast_possible_wrap)]
            let from = from_version.map_or(0_i64, |v| v.value() as i64);

            let rows = sqlx::query(
                r"
                SELECT event_type, event_data, metadata
                FROM events
                WHERE stream_id = $1 AND version >= $2
                ORDER BY version ASC
                ",
            )
            .bind(stream_id.as_str())
            .bind(from)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| EventStoreError::DatabaseError(e.to_string()))?;

            rows.into_iter()
                .map(|row| {
                    Ok(SerializedEvent {
                        event_type: row
                            .try_get("event_type")
                            .map_err(|e| EventStoreError::DatabaseError(e.to_string()))?,
                        data: row
                            .try_get("event_data")
                            .map_err(|e| EventStoreError::DatabaseError(e.to_string()))?,
                        metadata: row
                            .try_get("metadata")
                            .map_err(|e| EventStoreError::DatabaseError(e.to_string()))?,
                    })
                })
                .collect()
        })
    }

    fn save_snapshot(
        &self,
        stream_id: StreamId,
        version: Version,
        state: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventStoreError>> + Send + '_>> {
        Box::pin(async move {
            #[allow(clippy::cast_possible_wrap)]
            let version_i64 = version.value() as i64;

            sqlx::query(
                r"
                INSERT INTO snapshots (stream_id, version, state_data)
                VALUES ($1, $2, $3)
                ON CONFLICT (stream_id)
                DO UPDATE SET version = EXCLUDED.version, state_data = EXCLUDED.state_data, created_at = now()
                ",
            )
            .bind(stream_id.as_str())
            .bind(version_i64)
            .bind(&state)
            .execute(&self.pool)
            .await
            .map_err(|e| EventStoreError::DatabaseError(e.to_string()))?;

            Ok(())
        })
    }

    fn load_snapshot(
        &self,
        stream_id: StreamId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<(Version, Vec<u8>)>, EventStoreError>> + Send + '_>>
    {
        Box::pin(async move {
            let row = sqlx::query("SELECT version, state_data FROM snapshots WHERE stream_id = $1")
                .bind(stream_id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| EventStoreError::DatabaseError(e.to_string()))?;

            row.map(|row| {
                let version: i64 = row
                    .try_get("version")
                    .map_err(|e| EventStoreError::DatabaseError(e.to_string()))?;
                let state_data: Vec<u8> = row
                    .try_get("state_data")
                    .map_err(|e| EventStoreError::DatabaseError(e.to_string()))?;
                #[allow(clippy::cast_sign_loss)]
                Ok((Version::new(version as u64), state_data))
            })
            .transpose()
        })
    }
}
