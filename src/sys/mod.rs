// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Kernel interface
//!
//! Everything the threading layer needs from the kernel lives behind this
//! module:
//!
//! - **Raw primitives**: `RawMutex`, `RawRecursiveMutex`, `RawCondvar`
//! - **Thread services**: the [`Kernel`] trait (create, start, wait,
//!   close, exit, sleep, thread-local bookkeeping, core affinity)
//! - **Host implementation**: [`HostKernel`], which backs kernel thread
//!   objects with host OS threads
//!
//! # Design
//!
//! The thread services are injected as `Arc<dyn Kernel>` so callers can
//! substitute their own kernel (tests use this to inject failures). The
//! raw lock primitives are plain values embedded in the objects that use
//! them, the same way the kernel's mutex words are.

use bitflags::bitflags;
use core::any::Any;
use core::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

pub mod condvar;
pub mod error;
pub mod host;
pub mod mutex;

pub use condvar::{RawCondvar, WaitOutcome};
pub use error::{SvcError, SvcResult};
pub use host::{HostConfig, HostKernel};
pub use mutex::{RawMutex, RawRecursiveMutex};

/// Sleep value that yields to any ready thread, migrating if needed
pub const YIELD_WITH_MIGRATION: u64 = u64::MAX;

/// Preferred core meaning "use the process default core"
pub const CORE_PROCESS_DEFAULT: i32 = -2;

/// Preferred core meaning "leave the preferred core unchanged"
pub const CORE_KEEP: i32 = -1;

/// Highest (least urgent) thread priority the kernel accepts
pub const PRIORITY_LOWEST: i32 = 0x3F;

bitflags! {
    /// Set of cores a thread may run on
    #[repr(C)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CoreMask: u64 {
        const CORE_0 = 1 << 0;
        const CORE_1 = 1 << 1;
        const CORE_2 = 1 << 2;
        const CORE_3 = 1 << 3;
    }
}

impl CoreMask {
    /// Mask covering cores `0..count` (at most 64)
    pub fn first(count: u32) -> Self {
        match count {
            0 => Self::empty(),
            64.. => Self::from_bits_retain(u64::MAX),
            n => Self::from_bits_retain((1u64 << n) - 1),
        }
    }

    /// Check whether `core` is in the mask
    pub fn has_core(self, core: i32) -> bool {
        (0..64).contains(&core) && self.bits() & (1u64 << core) != 0
    }

    /// Lowest core in the mask
    pub fn lowest_core(self) -> Option<i32> {
        if self.is_empty() {
            None
        } else {
            Some(self.bits().trailing_zeros() as i32)
        }
    }
}

/// Handle to a kernel thread object
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(u32);

impl Handle {
    /// Invalid handle value (used for uninitialized handles)
    pub const INVALID: Self = Self(0);

    /// Create a handle from a raw value
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Get the raw handle value
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Check if this handle is valid
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

/// Code the kernel runs on a new thread once it is started
pub type KernelEntry = Box<dyn FnOnce() + Send + 'static>;

/// Per-thread user pointer kept by the kernel (the "thread vars" slot)
pub type ThreadVars = Arc<dyn Any + Send + Sync>;

/// Thread and scheduling services consumed by the threading layer
pub trait Kernel: Send + Sync {
    /// Core affinity mask of the calling process
    fn process_core_mask(&self) -> SvcResult<CoreMask>;

    /// Create a thread object that runs `entry` once started
    ///
    /// `vars` becomes the new thread's thread-local user pointer.
    fn thread_create(
        &self,
        entry: KernelEntry,
        vars: ThreadVars,
        stack_size: usize,
        priority: i32,
        preferred_core: i32,
    ) -> SvcResult<Handle>;

    /// Restrict a thread to `mask`
    fn thread_set_core_mask(&self, thread: Handle, preferred_core: i32, mask: CoreMask) -> SvcResult<()>;

    /// Make a created thread runnable
    fn thread_start(&self, thread: Handle) -> SvcResult<()>;

    /// Block until the thread has exited
    fn thread_wait_for_exit(&self, thread: Handle) -> SvcResult<()>;

    /// Release the thread object
    fn thread_close(&self, thread: Handle) -> SvcResult<()>;

    /// Handle of the calling thread
    fn thread_current(&self) -> Handle;

    /// Thread-local user pointer of the calling thread
    fn thread_vars(&self) -> Option<ThreadVars>;

    /// Replace the thread-local user pointer of the calling thread
    fn set_thread_vars(&self, vars: ThreadVars);

    /// Terminate the calling thread
    fn exit_thread(&self) -> !;

    /// Suspend the calling thread for `nanos`, or yield for
    /// [`YIELD_WITH_MIGRATION`]
    fn sleep_thread(&self, nanos: u64);
}

/// Thread tag allocator
///
/// Tags identify the calling host thread to the lock primitives, the
/// same way the kernel stores the owner's handle in a mutex word.
static TAG_ALLOCATOR: AtomicU32 = AtomicU32::new(1); // Tag 0 means "unowned"

std::thread_local! {
    static THREAD_TAG: u32 = TAG_ALLOCATOR.fetch_add(1, Ordering::Relaxed);
}

/// Owner tag of the calling thread (never zero)
pub fn current_tag() -> u32 {
    THREAD_TAG.with(|tag| *tag)
}

/// Kernel monotonic clock in nanoseconds
///
/// Counts from the first time anything in the process reads the clock.
pub fn monotonic_ns() -> u64 {
    static EPOCH: spin::Once<std::time::Instant> = spin::Once::new();

    let epoch = EPOCH.call_once(std::time::Instant::now);
    u64::try_from(epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
}
