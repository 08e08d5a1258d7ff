// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Kernel mutex primitives
//!
//! This module provides the two lock words the kernel offers: a plain
//! mutex and a recursive mutex built on top of it.
//!
//! # Design
//!
//! - **Ownership tracking**: the plain mutex stores the owner's thread tag
//!   (0 = unlocked), like a kernel mutex word stores the owner handle
//! - **Blocking**: contended lockers sleep until the owner releases
//! - **Recursion**: the recursive mutex keeps an owner tag and a counter
//!   next to a plain mutex and only touches the plain mutex on the
//!   outermost lock/unlock
//!
//! Neither lock returns a guard; callers pair `lock` and `unlock`
//! themselves, as the C11 layer above requires.

use core::sync::atomic::{AtomicU32, Ordering};
use parking_lot::{Condvar, Mutex};

use super::current_tag;

/// Mutex state values
const MUTEX_UNLOCKED: u32 = 0;

/// A plain (non-recursive) kernel mutex
///
/// Locking it twice from the same thread deadlocks.
pub struct RawMutex {
    /// Owner tag, or `MUTEX_UNLOCKED`
    owner: Mutex<u32>,
    /// Threads blocked in `lock`
    waiters: Condvar,
}

impl RawMutex {
    /// Create a new, unlocked mutex
    pub const fn new() -> Self {
        Self {
            owner: parking_lot::const_mutex(MUTEX_UNLOCKED),
            waiters: Condvar::new(),
        }
    }

    /// Acquire the mutex
    ///
    /// This function will block until the mutex is available.
    pub fn lock(&self) {
        let tag = current_tag();
        let mut owner = self.owner.lock();
        while *owner != MUTEX_UNLOCKED {
            self.waiters.wait(&mut owner);
        }
        *owner = tag;
    }

    /// Try to acquire the mutex without blocking
    ///
    /// Returns `true` if the mutex was acquired.
    pub fn try_lock(&self) -> bool {
        let mut owner = self.owner.lock();
        if *owner != MUTEX_UNLOCKED {
            return false;
        }
        *owner = current_tag();
        true
    }

    /// Release the mutex
    ///
    /// The kernel does not verify the caller; releasing a mutex held by
    /// another thread hands it to the next waiter all the same.
    pub fn unlock(&self) {
        let mut owner = self.owner.lock();
        *owner = MUTEX_UNLOCKED;
        drop(owner);
        self.waiters.notify_one();
    }

    /// Check if the mutex is currently locked
    pub fn is_locked(&self) -> bool {
        *self.owner.lock() != MUTEX_UNLOCKED
    }

    /// Check if the calling thread holds the mutex
    pub fn is_locked_by_current(&self) -> bool {
        *self.owner.lock() == current_tag()
    }
}

impl Default for RawMutex {
    fn default() -> Self {
        Self::new()
    }
}

/// A reentrant kernel mutex
///
/// A reentrant mutex allows the same thread to lock the mutex
/// multiple times without deadlocking.
pub struct RawRecursiveMutex {
    /// The underlying mutex
    lock: RawMutex,
    /// Owner tag (0 = none)
    tag: AtomicU32,
    /// Lock count, only touched by the owner
    counter: AtomicU32,
}

impl RawRecursiveMutex {
    /// Create a new reentrant mutex
    pub const fn new() -> Self {
        Self {
            lock: RawMutex::new(),
            tag: AtomicU32::new(MUTEX_UNLOCKED),
            counter: AtomicU32::new(0),
        }
    }

    /// Acquire the reentrant mutex
    pub fn lock(&self) {
        let tag = current_tag();

        if self.tag.load(Ordering::Acquire) != tag {
            // Different thread, lock the underlying mutex
            self.lock.lock();
            self.tag.store(tag, Ordering::Release);
        }
        self.counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Try to acquire the reentrant mutex without blocking
    pub fn try_lock(&self) -> bool {
        let tag = current_tag();

        if self.tag.load(Ordering::Acquire) != tag {
            if !self.lock.try_lock() {
                return false;
            }
            self.tag.store(tag, Ordering::Release);
        }
        self.counter.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Release one level of the reentrant mutex
    ///
    /// Does nothing when the calling thread is not the owner.
    pub fn unlock(&self) {
        if self.tag.load(Ordering::Acquire) != current_tag() {
            return;
        }

        if self.counter.fetch_sub(1, Ordering::Relaxed) == 1 {
            self.tag.store(MUTEX_UNLOCKED, Ordering::Release);
            self.lock.unlock();
        }
    }

    /// Current recursion depth (0 when unlocked)
    pub fn depth(&self) -> u32 {
        self.counter.load(Ordering::Relaxed)
    }

    /// Check if the mutex is currently locked
    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }
}

impl Default for RawRecursiveMutex {
    fn default() -> Self {
        Self::new()
    }
}
