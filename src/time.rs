// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Session clock and deadline arithmetic.
//!
//! All scheduling inside a session is done in terms of [`std::time::Instant`]
//! so comparisons stay monotonic even if wall-clock time is adjusted. The only
//! place wall-clock microseconds matter is MD session UUID generation
//! ([`crate::md::uuid`]), which reads [`std::time::SystemTime`] directly.

use std::time::{Duration, Instant};

/// A point in time on the session's monotonic clock, or "never" for
/// unsupervised entities (zero interval / zero timeout).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Deadline {
    /// Fires at the wrapped instant.
    At(Instant),
    /// Never fires (supervision disabled).
    Never,
}

impl Deadline {
    /// Build a deadline `interval` in the future, or [`Deadline::Never`] if
    /// `interval` is zero.
    #[must_use]
    pub fn after(now: Instant, interval: Duration) -> Self {
        if interval.is_zero() {
            Deadline::Never
        } else {
            Deadline::At(now + interval)
        }
    }

    /// Whether this deadline has passed `now`.
    #[must_use]
    pub fn has_elapsed(self, now: Instant) -> bool {
        match self {
            Deadline::At(at) => now >= at,
            Deadline::Never => false,
        }
    }

    /// The earlier of two deadlines (`Never` loses to anything concrete).
    #[must_use]
    pub fn earliest(self, other: Deadline) -> Deadline {
        match (self, other) {
            (Deadline::Never, other) => other,
            (this, Deadline::Never) => this,
            (Deadline::At(a), Deadline::At(b)) => Deadline::At(a.min(b)),
        }
    }

    /// Duration until this deadline, or `None` if it never fires or has
    /// already passed.
    #[must_use]
    pub fn remaining(self, now: Instant) -> Option<Duration> {
        match self {
            Deadline::Never => None,
            Deadline::At(at) if at > now => Some(at - now),
            Deadline::At(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_interval_never_fires() {
        let now = Instant::now();
        let d = Deadline::after(now, Duration::ZERO);
        assert_eq!(d, Deadline::Never);
        assert!(!d.has_elapsed(now + Duration::from_secs(1000)));
    }

    #[test]
    fn earliest_prefers_concrete_over_never() {
        let now = Instant::now();
        let concrete = Deadline::after(now, Duration::from_millis(10));
        assert_eq!(concrete.earliest(Deadline::Never), concrete);
        assert_eq!(Deadline::Never.earliest(concrete), concrete);
    }

    #[test]
    fn earliest_picks_smaller_instant() {
        let now = Instant::now();
        let a = Deadline::after(now, Duration::from_millis(10));
        let b = Deadline::after(now, Duration::from_millis(20));
        assert_eq!(a.earliest(b), a);
    }
}
