// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Hosted kernel
//!
//! [`HostKernel`] implements the [`Kernel`] thread services on top of the
//! host operating system's threads.
//!
//! # Design
//!
//! - Kernel thread objects live in a handle table; handles are never
//!   reused within one kernel instance
//! - `thread_create` only records the object; the host thread is spawned
//!   by `thread_start`
//! - `exit_thread` unwinds to the base of the host thread with a private
//!   payload, so the exit never returns to its caller
//! - Threads the kernel did not create (the main thread, foreign threads)
//!   are adopted on first use: they get a handle and a thread-vars slot,
//!   but no table entry, so they cannot be waited on or closed
//!
//! # Thread States
//!
//! ```text
//! Created -> Running -> Exited
//! ```

use core::sync::atomic::{AtomicI32, AtomicU32, AtomicU64, Ordering};
use core::time::Duration;
use log::{trace, warn};
use parking_lot::{Condvar, Mutex};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use super::error::{SvcError, SvcResult};
use super::{
    CoreMask, Handle, Kernel, KernelEntry, ThreadVars, CORE_KEEP, CORE_PROCESS_DEFAULT,
    PRIORITY_LOWEST, YIELD_WITH_MIGRATION,
};

/// Smallest stack a host thread is given
pub const HOST_MIN_STACK_SIZE: usize = 256 * 1024;

/// Largest stack the kernel accepts
pub const MAX_STACK_SIZE: usize = 64 * 1024 * 1024;

/// Unwind payload used by `exit_thread`
struct ThreadExit;

/// Kernel instance ID allocator
static KERNEL_IDS: AtomicU32 = AtomicU32::new(1);

std::thread_local! {
    /// Thread objects of the calling host thread, one per kernel instance
    static CURRENT: RefCell<Vec<(u32, Arc<ThreadObject>)>> = const { RefCell::new(Vec::new()) };
}

/// ============================================================================
/// Configuration
/// ============================================================================

/// Hosted kernel configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostConfig {
    /// Number of cores in the process affinity mask (1..=64, 0 makes the
    /// mask unavailable)
    pub core_count: u32,
}

impl Default for HostConfig {
    fn default() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            core_count: u32::try_from(cores).unwrap_or(64).min(64),
        }
    }
}

/// ============================================================================
/// Thread Objects
/// ============================================================================

/// Thread state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ThreadState {
    /// Created but not yet started
    Created,
    /// Host thread is running the entry
    Running,
    /// Entry returned or the thread called `exit_thread`
    Exited,
}

/// Kernel thread object
struct ThreadObject {
    handle: Handle,
    stack_size: usize,
    priority: i32,
    preferred_core: AtomicI32,
    core_mask: AtomicU64,
    state: Mutex<ThreadState>,
    /// Signalled when the state becomes `Exited`
    exited: Condvar,
    entry: Mutex<Option<KernelEntry>>,
    vars: Mutex<Option<ThreadVars>>,
    host_thread: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl ThreadObject {
    fn new(handle: Handle, state: ThreadState) -> Self {
        Self {
            handle,
            stack_size: 0,
            priority: 0,
            preferred_core: AtomicI32::new(0),
            core_mask: AtomicU64::new(0),
            state: Mutex::new(state),
            exited: Condvar::new(),
            entry: Mutex::new(None),
            vars: Mutex::new(None),
            host_thread: Mutex::new(None),
        }
    }

    fn mark_exited(&self) {
        *self.state.lock() = ThreadState::Exited;
        self.exited.notify_all();
    }
}

/// ============================================================================
/// Host Kernel
/// ============================================================================

/// Kernel thread services backed by host threads
pub struct HostKernel {
    /// Distinguishes this instance in the per-thread bookkeeping
    id: u32,
    config: HostConfig,
    next_handle: AtomicU32,
    objects: spin::Mutex<BTreeMap<Handle, Arc<ThreadObject>>>,
}

impl HostKernel {
    /// Create a kernel with the default configuration
    pub fn new() -> Self {
        Self::with_config(HostConfig::default())
    }

    /// Create a kernel with an explicit configuration
    pub fn with_config(config: HostConfig) -> Self {
        Self {
            id: KERNEL_IDS.fetch_add(1, Ordering::Relaxed),
            config,
            next_handle: AtomicU32::new(1), // Handle 0 is reserved/invalid
            objects: spin::Mutex::new(BTreeMap::new()),
        }
    }

    /// Kernel configuration
    pub fn config(&self) -> HostConfig {
        self.config
    }

    /// Number of thread objects that have not been closed
    pub fn live_threads(&self) -> usize {
        self.objects.lock().len()
    }

    /// Core mask currently applied to a thread
    pub fn thread_core_mask(&self, thread: Handle) -> SvcResult<CoreMask> {
        let object = self.lookup(thread)?;
        Ok(CoreMask::from_bits_retain(object.core_mask.load(Ordering::Relaxed)))
    }

    /// Priority and stack size a thread was created with
    pub fn thread_params(&self, thread: Handle) -> SvcResult<(i32, usize)> {
        let object = self.lookup(thread)?;
        Ok((object.priority, object.stack_size))
    }

    fn allocate_handle(&self) -> Handle {
        Handle::from_raw(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    fn lookup(&self, thread: Handle) -> SvcResult<Arc<ThreadObject>> {
        self.objects
            .lock()
            .get(&thread)
            .cloned()
            .ok_or(SvcError::InvalidHandle)
    }

    /// Thread object of the calling thread, adopting it if needed
    fn current_object(&self) -> Arc<ThreadObject> {
        CURRENT.with(|current| {
            let mut current = current.borrow_mut();
            if let Some((_, object)) = current.iter().find(|(id, _)| *id == self.id) {
                return object.clone();
            }

            let object = Arc::new(ThreadObject::new(self.allocate_handle(), ThreadState::Running));
            trace!("adopted host thread as {:?}", object.handle);
            current.push((self.id, object.clone()));
            object
        })
    }

    fn resolve_core(&self, preferred_core: i32, mask: CoreMask) -> SvcResult<i32> {
        match preferred_core {
            CORE_PROCESS_DEFAULT => mask.lowest_core().ok_or(SvcError::InvalidCoreId),
            core if mask.has_core(core) => Ok(core),
            _ => Err(SvcError::InvalidCoreId),
        }
    }
}

impl Default for HostKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl Kernel for HostKernel {
    fn process_core_mask(&self) -> SvcResult<CoreMask> {
        match self.config.core_count {
            0 => Err(SvcError::NotFound),
            count => Ok(CoreMask::first(count)),
        }
    }

    fn thread_create(
        &self,
        entry: KernelEntry,
        vars: ThreadVars,
        stack_size: usize,
        priority: i32,
        preferred_core: i32,
    ) -> SvcResult<Handle> {
        if stack_size == 0 || stack_size > MAX_STACK_SIZE {
            return Err(SvcError::InvalidSize);
        }
        if !(0..=PRIORITY_LOWEST).contains(&priority) {
            return Err(SvcError::InvalidPriority);
        }
        let core = self.resolve_core(preferred_core, self.process_core_mask()?)?;

        let handle = self.allocate_handle();
        let object = ThreadObject {
            stack_size,
            priority,
            preferred_core: AtomicI32::new(core),
            core_mask: AtomicU64::new(1u64 << core),
            entry: Mutex::new(Some(entry)),
            vars: Mutex::new(Some(vars)),
            ..ThreadObject::new(handle, ThreadState::Created)
        };
        self.objects.lock().insert(handle, Arc::new(object));

        trace!("created thread {:?} (prio {:#x}, core {}, stack {:#x})", handle, priority, core, stack_size);
        Ok(handle)
    }

    fn thread_set_core_mask(&self, thread: Handle, preferred_core: i32, mask: CoreMask) -> SvcResult<()> {
        let object = self.lookup(thread)?;
        let process_mask = self.process_core_mask()?;

        if mask.is_empty() || !process_mask.contains(mask) {
            return Err(SvcError::InvalidCombination);
        }

        let core = match preferred_core {
            CORE_KEEP => {
                let current = object.preferred_core.load(Ordering::Relaxed);
                if mask.has_core(current) {
                    current
                } else {
                    mask.lowest_core().ok_or(SvcError::InvalidCombination)?
                }
            }
            core if mask.has_core(core) => core,
            _ => return Err(SvcError::InvalidCombination),
        };

        object.preferred_core.store(core, Ordering::Relaxed);
        object.core_mask.store(mask.bits(), Ordering::Relaxed);
        trace!("thread {:?} core mask {:#x}, preferred core {}", thread, mask.bits(), core);
        Ok(())
    }

    fn thread_start(&self, thread: Handle) -> SvcResult<()> {
        let object = self.lookup(thread)?;

        let entry = {
            let mut state = object.state.lock();
            if *state != ThreadState::Created {
                return Err(SvcError::InvalidState);
            }
            let entry = object.entry.lock().take().ok_or(SvcError::InvalidState)?;
            // Set before spawning so a fast exit cannot be overwritten
            *state = ThreadState::Running;
            entry
        };

        let body = {
            let object = object.clone();
            let kernel_id = self.id;
            move || {
                CURRENT.with(|current| current.borrow_mut().push((kernel_id, object.clone())));

                let result = panic::catch_unwind(AssertUnwindSafe(entry));
                object.mark_exited();

                if let Err(payload) = result {
                    if !payload.is::<ThreadExit>() {
                        panic::resume_unwind(payload);
                    }
                }
            }
        };

        let spawned = std::thread::Builder::new()
            .name(format!("thrd-{}", thread.raw()))
            .stack_size(object.stack_size.max(HOST_MIN_STACK_SIZE))
            .spawn(body);

        match spawned {
            Ok(host_thread) => {
                *object.host_thread.lock() = Some(host_thread);
                trace!("started thread {:?}", thread);
                Ok(())
            }
            Err(err) => {
                warn!("host refused to spawn thread {:?}: {}", thread, err);
                *object.state.lock() = ThreadState::Created;
                Err(SvcError::OutOfResource)
            }
        }
    }

    fn thread_wait_for_exit(&self, thread: Handle) -> SvcResult<()> {
        let object = self.lookup(thread)?;
        if Arc::ptr_eq(&object, &self.current_object()) {
            // Waiting for ourselves would never finish
            return Err(SvcError::InvalidState);
        }

        let mut state = object.state.lock();
        loop {
            match *state {
                ThreadState::Created => return Err(SvcError::InvalidState),
                ThreadState::Running => object.exited.wait(&mut state),
                ThreadState::Exited => return Ok(()),
            }
        }
    }

    fn thread_close(&self, thread: Handle) -> SvcResult<()> {
        let object = self
            .objects
            .lock()
            .remove(&thread)
            .ok_or(SvcError::InvalidHandle)?;

        let exited = *object.state.lock() == ThreadState::Exited;
        let host_thread = object.host_thread.lock().take();
        if let (true, Some(host_thread)) = (exited, host_thread) {
            // The entry is done; reap the host thread so it does not linger
            if host_thread.join().is_err() {
                warn!("thread {:?} ended with a panic", thread);
            }
        }

        trace!("closed thread {:?}", thread);
        Ok(())
    }

    fn thread_current(&self) -> Handle {
        self.current_object().handle
    }

    fn thread_vars(&self) -> Option<ThreadVars> {
        self.current_object().vars.lock().clone()
    }

    fn set_thread_vars(&self, vars: ThreadVars) {
        *self.current_object().vars.lock() = Some(vars);
    }

    /// Unwinds to the base frame of a thread started by this kernel.
    /// Adopted threads have no such frame: the unwind leaves their own
    /// entry point and the host thread ends as if it had panicked.
    fn exit_thread(&self) -> ! {
        panic::resume_unwind(Box::new(ThreadExit))
    }

    fn sleep_thread(&self, nanos: u64) {
        match nanos {
            0 | YIELD_WITH_MIGRATION => std::thread::yield_now(),
            nanos => std::thread::sleep(Duration::from_nanos(nanos)),
        }
    }
}
