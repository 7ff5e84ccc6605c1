//! Transactional outbox pipeline for an employee check-in/check-out service.
//!
//! State changes and their domain events are written in one database
//! transaction. A relay publishes pending outbox rows to a RabbitMQ fanout
//! exchange, and one consumer per queue drives a downstream handler behind a
//! circuit breaker, retry executor and rate limiter.

pub mod actors;
pub mod api;
pub mod config;
pub mod domain;
pub mod external;
pub mod handlers;
pub mod messaging;
pub mod metrics;
pub mod outbox;
pub mod utils;
