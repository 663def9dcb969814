//! Monotonic deadlines for blocking protocol calls.

use std::time::{Duration, Instant};

/// A point in time after which a blocking call must give up.
///
/// A deadline is either bounded (expires a fixed duration after creation)
/// or unbounded. Derived deadlines cap a fresh duration by an existing
/// parent so a short read slice can never outlive the call that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    expiry: Option<Instant>,
    duration: Option<Duration>,
}

impl Deadline {
    /// A deadline that never expires.
    #[must_use]
    pub fn none() -> Self {
        Self {
            expiry: None,
            duration: None,
        }
    }

    /// A deadline expiring `duration` from now.
    #[must_use]
    pub fn from_now(duration: Duration) -> Self {
        Self {
            expiry: Some(Instant::now() + duration),
            duration: Some(duration),
        }
    }

    /// A deadline that has already expired.
    #[must_use]
    pub fn expired() -> Self {
        Self::from_now(Duration::ZERO)
    }

    /// A deadline expiring `duration` from now, capped by `parent`.
    #[must_use]
    pub fn bounded_by(duration: Duration, parent: &Self) -> Self {
        let own = Instant::now() + duration;
        match parent.expiry {
            Some(parent_expiry) if parent_expiry < own => Self {
                expiry: Some(parent_expiry),
                duration: parent.duration,
            },
            _ => Self {
                expiry: Some(own),
                duration: Some(duration),
            },
        }
    }

    /// Whether the deadline has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expiry.is_some_and(|expiry| expiry <= Instant::now())
    }

    /// Time remaining until expiry; `None` for an unbounded deadline.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.expiry
            .map(|expiry| expiry.saturating_duration_since(Instant::now()))
    }

    /// The duration the deadline was created with, for diagnostics.
    #[must_use]
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    /// The duration in fractional seconds, for error messages.
    #[must_use]
    pub fn duration_secs(&self) -> f64 {
        self.duration.map_or(f64::INFINITY, |d| d.as_secs_f64())
    }
}
