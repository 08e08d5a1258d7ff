// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! One-time initialization
//!
//! # States
//!
//! ```text
//! NotRun -> Running -> Done
//! ```
//!
//! The first caller moves the flag to `Running`, drops the private lock,
//! runs the initializer, then publishes `Done` and wakes everybody who
//! arrived in the meantime. The initializer runs with no lock held, so it
//! may block or take other locks freely.

use core::sync::atomic::{AtomicU8, Ordering};
use log::warn;

use crate::condvar::Condvar;
use crate::mutex::Mutex;

/// Once flag state
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnceState {
    /// Initializer has not started
    NotRun = 0,
    /// Initializer is running on some thread
    Running = 1,
    /// Initializer has completed
    Done = 2,
}

impl OnceState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => OnceState::NotRun,
            1 => OnceState::Running,
            _ => OnceState::Done,
        }
    }
}

/// A guard that runs an initializer exactly once
///
/// # Usage
///
/// ```rust
/// use thrd::OnceFlag;
///
/// static INIT: OnceFlag = OnceFlag::new();
///
/// INIT.call_once(|| println!("initialized"));
/// INIT.call_once(|| unreachable!());
/// ```
pub struct OnceFlag {
    /// `OnceState`, only changed with `mutex` held
    status: AtomicU8,
    mutex: Mutex,
    cond: Condvar,
}

impl OnceFlag {
    /// Create a new flag in the `NotRun` state
    pub const fn new() -> Self {
        Self {
            status: AtomicU8::new(OnceState::NotRun as u8),
            mutex: Mutex::plain(),
            cond: Condvar::new(),
        }
    }

    /// Current state
    pub fn state(&self) -> OnceState {
        OnceState::from_raw(self.status.load(Ordering::Acquire))
    }

    /// Run `func` if no caller has run it yet
    ///
    /// Returns once the initializer has completed, whether it ran on this
    /// thread or another.
    pub fn call_once<F: FnOnce()>(&self, func: F) {
        self.mutex.lock();

        match self.state() {
            OnceState::NotRun => {
                self.set_state(OnceState::Running);
                self.mutex.unlock();

                func();

                self.mutex.lock();
                self.set_state(OnceState::Done);
                if let Err(err) = self.cond.broadcast() {
                    warn!("call_once: waking waiters failed: {}", err);
                }
            }
            OnceState::Running => {
                while self.state() == OnceState::Running {
                    if let Err(err) = self.cond.wait(&self.mutex) {
                        warn!("call_once: wait failed: {}", err);
                    }
                }
            }
            OnceState::Done => {}
        }

        self.mutex.unlock();
    }

    fn set_state(&self, state: OnceState) {
        self.status.store(state as u8, Ordering::Release);
    }
}

impl Default for OnceFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for OnceFlag {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OnceFlag").field("state", &self.state()).finish()
    }
}
