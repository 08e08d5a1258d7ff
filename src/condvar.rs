// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Condition variable implementation
//!
//! This module provides condition variables for thread synchronization.
//! A condition variable may be used with any plain [`Mutex`]; recursive
//! mutexes are refused with `InvalidArgument`.

use log::warn;

use crate::error::{Error, Result};
use crate::mutex::Mutex;
use crate::sys::{RawCondvar, WaitOutcome};
use crate::time::{self, Timespec, WAIT_FOREVER};

/// A condition variable
pub struct Condvar {
    raw: RawCondvar,
}

impl Condvar {
    /// Create a new condition variable
    pub const fn new() -> Self {
        Self {
            raw: RawCondvar::new(),
        }
    }

    /// Initialize a condition variable; always succeeds
    pub fn init() -> Result<Self> {
        Ok(Self::new())
    }

    /// Wake one waiting thread
    pub fn signal(&self) -> Result<()> {
        self.raw.wake_one().map_err(|err| {
            warn!("condvar signal failed: {}", err);
            Error::from(err)
        })
    }

    /// Wake all waiting threads
    pub fn broadcast(&self) -> Result<()> {
        self.raw.wake_all().map_err(|err| {
            warn!("condvar broadcast failed: {}", err);
            Error::from(err)
        })
    }

    /// Wait on the condition variable
    ///
    /// Atomically releases `mutex` and blocks until woken, then
    /// reacquires `mutex` before returning. Wakeups may be spurious;
    /// recheck the predicate in a loop.
    pub fn wait(&self, mutex: &Mutex) -> Result<()> {
        self.wait_deadline_ns(mutex, WAIT_FOREVER)
    }

    /// Wait on the condition variable until an absolute deadline
    ///
    /// The deadline is measured on [`time::now`]. Returns
    /// `Err(Error::Timeout)` when it passes without a wake; the mutex is
    /// held again in that case too.
    pub fn timed_wait(&self, mutex: &Mutex, deadline: &Timespec) -> Result<()> {
        self.wait_deadline_ns(mutex, deadline.to_nanoseconds())
    }

    /// Shared wait path; `deadline` is absolute nanoseconds, or
    /// [`WAIT_FOREVER`]
    fn wait_deadline_ns(&self, mutex: &Mutex, deadline: u64) -> Result<()> {
        let raw_mutex = mutex.as_plain().ok_or(Error::InvalidArgument)?;

        match self.raw.wait_timeout(raw_mutex, time::remaining_until(deadline)) {
            Ok(WaitOutcome::Woken) => Ok(()),
            Ok(WaitOutcome::TimedOut) => Err(Error::Timeout),
            Err(err) => {
                warn!("condvar wait failed: {}", err);
                Err(Error::from(err))
            }
        }
    }

    /// Release the condition variable object
    pub fn destroy(self) {}
}

impl Default for Condvar {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for Condvar {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Condvar").field("waiters", &self.raw.waiters()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sys::SvcError;
    use core::time::Duration;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_init_and_destroy() {
        let cond = Condvar::init().unwrap();
        assert!(cond.signal().is_ok());
        assert!(cond.broadcast().is_ok());
        cond.destroy();
    }

    #[test]
    fn test_recursive_mutex_rejected() {
        let cond = Condvar::new();
        let mutex = Mutex::recursive();

        mutex.lock();
        assert_eq!(cond.wait(&mutex), Err(Error::InvalidArgument));
        assert_eq!(cond.timed_wait(&mutex, &Timespec::ZERO), Err(Error::InvalidArgument));
        mutex.unlock();
    }

    #[test]
    fn test_wait_without_holding_mutex_fails() {
        let cond = Condvar::new();
        let mutex = Mutex::plain();
        assert_eq!(
            cond.timed_wait(&mutex, &Timespec::ZERO),
            Err(Error::OperationFailed(SvcError::InvalidState))
        );
    }

    #[test]
    fn test_past_deadline_times_out() {
        let cond = Condvar::new();
        let mutex = Mutex::plain();

        mutex.lock();
        assert_eq!(cond.timed_wait(&mutex, &Timespec::ZERO), Err(Error::Timeout));
        // Mutex is held again after the timeout
        assert_eq!(mutex.try_lock(), Err(Error::AcquisitionFailed));
        mutex.unlock();
    }

    #[test]
    fn test_short_deadline_times_out() {
        let cond = Condvar::new();
        let mutex = Mutex::plain();
        let deadline = time::now().saturating_add(Duration::from_millis(20));

        mutex.lock();
        assert_eq!(cond.timed_wait(&mutex, &deadline), Err(Error::Timeout));
        assert!(time::now() >= deadline);
        mutex.unlock();
    }

    #[test]
    fn test_signal_before_deadline_wakes() {
        let shared = Arc::new((Mutex::plain(), Condvar::new(), AtomicBool::new(false)));

        let waiter = {
            let shared = shared.clone();
            thread::spawn(move || {
                let (mutex, cond, ready) = &*shared;
                let deadline = time::now().saturating_add(Duration::from_secs(30));

                mutex.lock();
                let mut result = Ok(());
                while !ready.load(Ordering::Relaxed) && result.is_ok() {
                    result = cond.timed_wait(mutex, &deadline);
                }
                mutex.unlock();
                result
            })
        };

        thread::sleep(Duration::from_millis(10));
        let (mutex, cond, ready) = &*shared;
        mutex.lock();
        ready.store(true, Ordering::Relaxed);
        cond.signal().unwrap();
        mutex.unlock();

        assert_eq!(waiter.join().unwrap(), Ok(()));
    }

    #[test]
    fn test_waiter_not_resumed_before_broadcast() {
        let shared = Arc::new((Mutex::plain(), Condvar::new(), AtomicBool::new(false)));
        let mut waiters = Vec::new();

        for _ in 0..3 {
            let shared = shared.clone();
            waiters.push(thread::spawn(move || {
                let (mutex, cond, released) = &*shared;
                mutex.lock();
                while !released.load(Ordering::Relaxed) {
                    cond.wait(mutex).unwrap();
                }
                // Resumed only after the broadcaster set the flag, holding the mutex
                let held = mutex.try_lock().is_err();
                mutex.unlock();
                held
            }));
        }

        thread::sleep(Duration::from_millis(20));
        let (mutex, cond, released) = &*shared;
        mutex.lock();
        released.store(true, Ordering::Relaxed);
        cond.broadcast().unwrap();
        mutex.unlock();

        for waiter in waiters {
            assert!(waiter.join().unwrap());
        }
    }
}
