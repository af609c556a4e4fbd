//! Database seeding functionality
//!
//! Populates reference data the service needs before it can accept
//! destination configuration.

pub mod destination_types;

pub use destination_types::seed_destination_types;
