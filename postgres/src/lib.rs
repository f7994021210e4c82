//! `PostgreSQL` event store implementation for travel-saga.
//!
//! This crate provides a production-ready PostgreSQL-based event store that implements
//! the `EventStore` trait from `saga-core`. It uses sqlx for compile-time
//! checked queries and supports:
//!
//! - Event persistence with optimistic concurrency
//! - State snapshots for performance
//! - Connection pooling
//! - Transaction support
//!
//! # Example
//!
//! ```ignore
//! use saga_postgres::PostgresEventStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let event_store = PostgresEventStore::new("postgres://localhost/mydb").await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod dead_letter_queue;
pub mod event_store;
pub mod repository;

pub use dead_letter_queue::{DLQStatus, DeadLetterQueue, FailedEvent};
pub use event_store::PostgresEventStore;
pub use repository::{PostgresSagaRepository, RepositoryError, SagaRepository};
