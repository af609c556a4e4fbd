//! Injectable wall clock.
//!
//! Background components take a [`Clock`] rather than calling `Utc::now()`
//! directly so tests can pin time.

use std::sync::Arc;

use chrono::{DateTime, Utc};

/// Returns the current UTC time.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Clock backed by the system time.
pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// Clock that always returns `instant`.
pub fn fixed_clock(instant: DateTime<Utc>) -> Clock {
    Arc::new(move || instant)
}
