//! # Ingestion Pipeline
//!
//! Fingerprinting, in-memory aggregation and periodic persistence of inbound
//! error events.

pub mod aggregator;
pub mod fingerprint;
pub mod models;
pub mod persistence;

pub use aggregator::{Aggregator, AggregatorError, ExtractError, Subscription, extract};
pub use fingerprint::fingerprint;
pub use models::{AggregatedEvent, GlobalEventKey, ProjectEvent, ProjectEventMessage, SdkEvent};
pub use persistence::{FlushStats, MAX_BATCH_PERSIST_ATTEMPTS, PersistenceFlusher};
