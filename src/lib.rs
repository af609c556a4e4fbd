//! # Periscope
//!
//! Error-event ingestion and alerting: SDK events are fingerprinted and grouped
//! in memory, flushed to storage in batches, and every new group raises an alert
//! that is delivered to the project's notification destinations.

pub mod alerting;
pub mod auth;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod ingestion;
pub mod models;
pub mod notification;
pub mod repositories;
pub mod seeds;
pub mod server;
pub mod service;
pub mod telemetry;
pub use migration;
