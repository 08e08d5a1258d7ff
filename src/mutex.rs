// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Mutex implementation
//!
//! A C11 mutex is either plain or recursive. The kind is chosen once, at
//! initialization, and every operation dispatches on it.
//!
//! # Usage
//!
//! ```rust
//! use thrd::{Mutex, MutexKind};
//!
//! let mutex = Mutex::new(MutexKind::Recursive);
//!
//! mutex.lock();
//! mutex.lock();
//! // Critical section
//! mutex.unlock();
//! mutex.unlock();
//! ```

use crate::error::{Error, Result};
use crate::sys::{RawMutex, RawRecursiveMutex};

/// `mtx_plain`
pub const MTX_PLAIN: i32 = 1;

/// `mtx_recursive`
pub const MTX_RECURSIVE: i32 = 2;

/// `mtx_timed`; timed acquisition is not provided
pub const MTX_TIMED: i32 = 4;

/// Mutex kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutexKind {
    /// Non-reentrant; may be paired with a condition variable
    Plain,
    /// Reentrant for the owning thread; never a condition variable companion
    Recursive,
}

impl MutexKind {
    /// Convert a raw `mtx_*` kind
    ///
    /// Only `MTX_PLAIN` and `MTX_RECURSIVE` are accepted; anything else,
    /// `MTX_TIMED` combinations included, is `InvalidArgument`.
    pub fn from_raw(raw: i32) -> Result<Self> {
        match raw {
            MTX_PLAIN => Ok(MutexKind::Plain),
            MTX_RECURSIVE => Ok(MutexKind::Recursive),
            _ => Err(Error::InvalidArgument),
        }
    }

    /// Convert to the raw `mtx_*` value
    pub fn into_raw(self) -> i32 {
        match self {
            MutexKind::Plain => MTX_PLAIN,
            MutexKind::Recursive => MTX_RECURSIVE,
        }
    }
}

impl TryFrom<i32> for MutexKind {
    type Error = Error;

    fn try_from(raw: i32) -> Result<Self> {
        Self::from_raw(raw)
    }
}

/// A plain or recursive mutual exclusion lock
pub enum Mutex {
    /// Plain kernel mutex
    Plain(RawMutex),
    /// Recursive kernel mutex
    Recursive(RawRecursiveMutex),
}

impl Mutex {
    /// Create a new mutex of the given kind
    pub const fn new(kind: MutexKind) -> Self {
        match kind {
            MutexKind::Plain => Mutex::Plain(RawMutex::new()),
            MutexKind::Recursive => Mutex::Recursive(RawRecursiveMutex::new()),
        }
    }

    /// Create a plain mutex
    pub const fn plain() -> Self {
        Self::new(MutexKind::Plain)
    }

    /// Create a recursive mutex
    pub const fn recursive() -> Self {
        Self::new(MutexKind::Recursive)
    }

    /// Initialize a mutex from a raw `mtx_*` kind
    pub fn init(kind: i32) -> Result<Self> {
        MutexKind::from_raw(kind).map(Self::new)
    }

    /// Kind chosen at initialization
    pub fn kind(&self) -> MutexKind {
        match self {
            Mutex::Plain(_) => MutexKind::Plain,
            Mutex::Recursive(_) => MutexKind::Recursive,
        }
    }

    /// Acquire the mutex
    ///
    /// Blocks until the mutex is available. Locking a plain mutex the
    /// calling thread already holds deadlocks.
    pub fn lock(&self) {
        match self {
            Mutex::Plain(raw) => raw.lock(),
            Mutex::Recursive(raw) => raw.lock(),
        }
    }

    /// Try to acquire the mutex without blocking
    ///
    /// # Returns
    ///
    /// - `Ok(())` if the mutex was acquired
    /// - `Err(Error::AcquisitionFailed)` if it is held
    pub fn try_lock(&self) -> Result<()> {
        let acquired = match self {
            Mutex::Plain(raw) => raw.try_lock(),
            Mutex::Recursive(raw) => raw.try_lock(),
        };
        if acquired {
            Ok(())
        } else {
            Err(Error::AcquisitionFailed)
        }
    }

    /// Release the mutex (one level, for a recursive mutex)
    pub fn unlock(&self) {
        match self {
            Mutex::Plain(raw) => raw.unlock(),
            Mutex::Recursive(raw) => raw.unlock(),
        }
    }

    /// Acquire the mutex and release it when the guard is dropped
    pub fn guard(&self) -> MutexGuard<'_> {
        self.lock();
        MutexGuard { mutex: self }
    }

    /// Release the mutex object
    ///
    /// The kernel primitives need no teardown.
    pub fn destroy(self) {}

    /// Plain primitive, if this is a plain mutex
    pub(crate) fn as_plain(&self) -> Option<&RawMutex> {
        match self {
            Mutex::Plain(raw) => Some(raw),
            Mutex::Recursive(_) => None,
        }
    }
}

impl core::fmt::Debug for Mutex {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Mutex").field("kind", &self.kind()).finish_non_exhaustive()
    }
}

/// A guard that releases the mutex when dropped
#[derive(Debug)]
pub struct MutexGuard<'a> {
    mutex: &'a Mutex,
}

impl<'a> MutexGuard<'a> {
    /// The guarded mutex
    ///
    /// Handy for condition variable waits, which release and reacquire
    /// the mutex while the guard stays alive.
    pub fn mutex(&self) -> &'a Mutex {
        self.mutex
    }
}

impl<'a> Drop for MutexGuard<'a> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}
