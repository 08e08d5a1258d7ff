// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Time conversion helpers
//!
//! Deadlines and durations are exchanged as `Timespec` values and handed
//! to the kernel as a single nanosecond count.

use core::time::Duration;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::sys;

/// Nanoseconds per second
pub const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Deadline value meaning "wait forever"
pub const WAIT_FOREVER: u64 = u64::MAX;

/// Seconds plus nanoseconds, as in `struct timespec`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timespec {
    /// Whole seconds
    pub sec: i64,
    /// Nanoseconds past `sec`
    pub nsec: i64,
}

impl Timespec {
    /// Zero duration / the clock origin
    pub const ZERO: Self = Self { sec: 0, nsec: 0 };

    /// Create a new timespec
    pub const fn new(sec: i64, nsec: i64) -> Self {
        Self { sec, nsec }
    }

    /// Split a nanosecond count into seconds and nanoseconds
    pub const fn from_nanoseconds(nanos: u64) -> Self {
        Self {
            sec: (nanos / NANOS_PER_SEC) as i64,
            nsec: (nanos % NANOS_PER_SEC) as i64,
        }
    }

    /// Collapse into a single nanosecond count (see [`to_nanoseconds`])
    pub const fn to_nanoseconds(&self) -> u64 {
        to_nanoseconds(self.sec, self.nsec)
    }

    /// This timespec moved forward by `delta`, saturating at the far end
    pub fn saturating_add(&self, delta: Duration) -> Self {
        let delta = u64::try_from(delta.as_nanos()).unwrap_or(u64::MAX);
        Self::from_nanoseconds(self.to_nanoseconds().saturating_add(delta))
    }
}

impl From<Duration> for Timespec {
    fn from(duration: Duration) -> Self {
        Self {
            sec: i64::try_from(duration.as_secs()).unwrap_or(i64::MAX),
            nsec: i64::from(duration.subsec_nanos()),
        }
    }
}

/// Convert seconds plus nanoseconds into nanoseconds
///
/// Unsigned arithmetic with wraparound; range checking is the caller's
/// business.
#[inline]
pub const fn to_nanoseconds(sec: i64, nsec: i64) -> u64 {
    (sec as u64)
        .wrapping_mul(NANOS_PER_SEC)
        .wrapping_add(nsec as u64)
}

/// Current value of the kernel monotonic clock
///
/// Absolute deadlines given to [`Condvar::timed_wait`] are measured on
/// this clock.
///
/// [`Condvar::timed_wait`]: crate::Condvar::timed_wait
pub fn now() -> Timespec {
    Timespec::from_nanoseconds(sys::monotonic_ns())
}

/// Current wall-clock time since the Unix epoch (C11 `TIME_UTC`)
pub fn utc_now() -> Timespec {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO);
    Timespec::from(since_epoch)
}

/// Move an absolute `TIME_UTC` deadline onto the clock of [`now`]
///
/// The distance from the current wall-clock time is kept; a deadline in
/// the past stays in the past.
pub fn utc_to_monotonic(deadline: &Timespec) -> Timespec {
    let target = deadline.to_nanoseconds();
    let wall = utc_now().to_nanoseconds();
    let mono = sys::monotonic_ns();

    let mapped = if target >= wall {
        mono.saturating_add(target - wall)
    } else {
        mono.saturating_sub(wall - target)
    };
    Timespec::from_nanoseconds(mapped)
}

/// Nanoseconds from now until an absolute deadline
///
/// Deadlines already in the past give zero; [`WAIT_FOREVER`] is kept.
pub(crate) fn remaining_until(deadline: u64) -> u64 {
    if deadline == WAIT_FOREVER {
        return WAIT_FOREVER;
    }
    deadline.saturating_sub(sys::monotonic_ns())
}
