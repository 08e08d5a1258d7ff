// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Kernel condition variable primitive
//!
//! # Design
//!
//! - **Tickets**: every waiter enqueues a ticket before releasing its
//!   mutex; a wake removes tickets from the front of the queue, so a wake
//!   issued after the mutex was released can never be lost
//! - **FIFO**: `wake_one` wakes the longest waiting thread
//! - **Relative timeouts**: `wait_timeout` takes nanoseconds from now,
//!   `u64::MAX` waits forever

use core::time::Duration;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::Instant;

use super::error::{SvcError, SvcResult};
use super::mutex::RawMutex;

/// Result from waiting on a condition variable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Woken by `wake_one` or `wake_all`
    Woken,
    /// Timeout elapsed without a wake
    TimedOut,
}

/// Waiter queue
struct CondState {
    /// Next ticket to hand out
    next_ticket: u64,
    /// Tickets of threads still waiting, oldest first
    queue: VecDeque<u64>,
}

/// A kernel condition variable
pub struct RawCondvar {
    state: Mutex<CondState>,
    /// Shared sleep queue; sleepers recheck their own ticket
    wake: Condvar,
}

impl RawCondvar {
    /// Create a new condition variable
    pub const fn new() -> Self {
        Self {
            state: parking_lot::const_mutex(CondState {
                next_ticket: 0,
                queue: VecDeque::new(),
            }),
            wake: Condvar::new(),
        }
    }

    /// Release `mutex`, wait for a wake or the timeout, then reacquire
    /// `mutex`
    ///
    /// The caller must hold `mutex`; otherwise the wait is refused with
    /// `InvalidState` and the mutex is left alone.
    pub fn wait_timeout(&self, mutex: &RawMutex, timeout_ns: u64) -> SvcResult<WaitOutcome> {
        if !mutex.is_locked_by_current() {
            return Err(SvcError::InvalidState);
        }

        let deadline = if timeout_ns == u64::MAX {
            None
        } else {
            Instant::now().checked_add(Duration::from_nanos(timeout_ns))
        };

        let mut state = self.state.lock();
        let ticket = state.next_ticket;
        state.next_ticket = state.next_ticket.wrapping_add(1);
        state.queue.push_back(ticket);

        // The ticket is queued before the mutex is dropped, so a waker
        // that takes the mutex next is guaranteed to see it
        mutex.unlock();

        let outcome = loop {
            let Some(position) = state.queue.iter().position(|t| *t == ticket) else {
                break WaitOutcome::Woken;
            };

            match deadline {
                None => self.wake.wait(&mut state),
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        state.queue.remove(position);
                        break WaitOutcome::TimedOut;
                    }
                    // Spurious or foreign wakeups just go around the loop
                    let _ = self.wake.wait_until(&mut state, deadline);
                }
            }
        };
        drop(state);

        mutex.lock();
        Ok(outcome)
    }

    /// Wake the longest waiting thread, if any
    pub fn wake_one(&self) -> SvcResult<()> {
        let mut state = self.state.lock();
        if state.queue.pop_front().is_some() {
            drop(state);
            self.wake.notify_all();
        }
        Ok(())
    }

    /// Wake every waiting thread
    pub fn wake_all(&self) -> SvcResult<()> {
        let mut state = self.state.lock();
        if !state.queue.is_empty() {
            state.queue.clear();
            drop(state);
            self.wake.notify_all();
        }
        Ok(())
    }

    /// Number of threads currently waiting
    pub fn waiters(&self) -> usize {
        self.state.lock().queue.len()
    }
}

impl Default for RawCondvar {
    fn default() -> Self {
        Self::new()
    }
}
