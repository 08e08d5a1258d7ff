// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Thread management
//!
//! This module provides thread creation and management functionality.
//!
//! # Design
//!
//! - Every thread created here owns a *thread control record*: the kernel
//!   handle plus the return code slot the thread fills in when it exits
//! - The record is also the thread's kernel thread-vars pointer, which is
//!   how [`Threads::current`] finds it again
//! - [`Threads::create`] does not return until the new thread has started
//!   running its trampoline (the start handshake)
//! - Threads are created with a fixed stack size and priority and inherit
//!   the core affinity mask of the process
//!
//! Detached threads and thread-local storage keys are not provided.
//!
//! # Usage
//!
//! ```rust
//! use thrd::thread;
//!
//! let worker = thread::spawn(|| 7).unwrap();
//! assert_eq!(worker.join().unwrap(), 7);
//! ```

use core::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use core::time::Duration;
use log::{debug, warn};
use std::cell::RefCell;
use std::sync::Arc;

use crate::condvar::Condvar;
use crate::error::{Error, Result};
use crate::mutex::Mutex;
use crate::sys::{
    Handle, HostKernel, Kernel, KernelEntry, ThreadVars, CORE_KEEP, CORE_PROCESS_DEFAULT,
    YIELD_WITH_MIGRATION,
};
use crate::time::Timespec;

/// Stack size of every created thread (128 KiB)
pub const STACK_SIZE: usize = 128 * 1024;

/// Priority of every created thread
pub const PRIORITY: i32 = 0x3B;

/// Preferred core of every created thread
pub const PREFERRED_CORE: i32 = CORE_PROCESS_DEFAULT;

/// Default number of thread control records a manager hands out
pub const DEFAULT_MAX_THREADS: usize = 1024;

/// Thread body; its return value is the thread's exit code
pub type ThreadEntry = Box<dyn FnOnce() -> i32 + Send + 'static>;

std::thread_local! {
    /// Manager that created the calling thread, set by the trampoline
    static OWNER: RefCell<Option<Threads>> = const { RefCell::new(None) };
}

/// ============================================================================
/// Thread Control Record
/// ============================================================================

/// Budget of live thread control records
struct RecordQuota {
    live: AtomicUsize,
    max: usize,
}

impl RecordQuota {
    fn acquire(self: &Arc<Self>) -> Option<QuotaSlot> {
        self.live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                (live < self.max).then_some(live + 1)
            })
            .ok()
            .map(|_| QuotaSlot(self.clone()))
    }
}

/// One unit of the record budget, returned on drop
struct QuotaSlot(Arc<RecordQuota>);

impl Drop for QuotaSlot {
    fn drop(&mut self) {
        self.0.live.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Thread control record
///
/// Shared between the thread's handles and the kernel's thread-vars slot
/// of the thread itself.
pub struct ThreadRecord {
    /// Kernel thread object, set once right after creation
    handle: spin::Once<Handle>,
    /// Exit code, written by the thread just before it exits
    rc: AtomicI32,
    /// Budget slot; `None` for adopted threads
    _slot: Option<QuotaSlot>,
}

impl ThreadRecord {
    fn new(slot: Option<QuotaSlot>) -> Self {
        Self {
            handle: spin::Once::new(),
            rc: AtomicI32::new(0),
            _slot: slot,
        }
    }

    fn handle(&self) -> Handle {
        self.handle.get().copied().unwrap_or(Handle::INVALID)
    }
}

/// Transient state shared by a creator and the thread it spawns
struct StartHandshake {
    /// Taken by the trampoline
    entry: spin::Mutex<Option<ThreadEntry>>,
    /// Set by the trampoline under `mutex`
    started: AtomicBool,
    mutex: Mutex,
    cond: Condvar,
}

impl StartHandshake {
    fn new(entry: ThreadEntry) -> Self {
        Self::with_mutex(entry, Mutex::plain())
    }

    fn with_mutex(entry: ThreadEntry, mutex: Mutex) -> Self {
        Self {
            entry: spin::Mutex::new(Some(entry)),
            started: AtomicBool::new(false),
            mutex,
            cond: Condvar::new(),
        }
    }

    /// Block until the trampoline has set `started`
    ///
    /// The guard keeps `mutex` held around every wait, so the wait can only
    /// fail if the handshake was built with a mutex a condvar refuses.
    fn wait_started(&self) -> Result<()> {
        let _guard = self.mutex.guard();
        while !self.started.load(Ordering::Acquire) {
            self.cond.wait(&self.mutex)?;
        }
        Ok(())
    }
}

/// ============================================================================
/// Thread Handle
/// ============================================================================

/// Handle to a thread
///
/// Clones refer to the same thread. `join` consumes the handle it is
/// called on; other clones must not be joined again afterwards.
#[derive(Clone)]
pub struct Thread {
    record: Arc<ThreadRecord>,
    threads: Threads,
}

impl Thread {
    /// Spawn a new thread on the default manager
    pub fn spawn<F>(func: F) -> Result<Self>
    where
        F: FnOnce() -> i32 + Send + 'static,
    {
        Threads::global().spawn(func)
    }

    /// Kernel handle of the thread
    pub fn handle(&self) -> Handle {
        self.record.handle()
    }

    /// Join the thread, waiting for it to complete
    ///
    /// Returns the thread's exit code and releases its kernel object.
    pub fn join(self) -> Result<i32> {
        let handle = self.handle();
        let kernel = &self.threads.kernel;

        kernel.thread_wait_for_exit(handle).map_err(|err| {
            warn!("join: waiting for thread {:?} failed: {}", handle, err);
            Error::from(err)
        })?;

        let rc = self.record.rc.load(Ordering::Acquire);

        kernel.thread_close(handle).map_err(|err| {
            warn!("join: closing thread {:?} failed: {}", handle, err);
            Error::from(err)
        })?;

        debug!("joined thread {:?} (rc {})", handle, rc);
        Ok(rc)
    }

    /// Raw record pointer, as handed out through the C ABI
    pub(crate) fn as_ptr(&self) -> *const ThreadRecord {
        Arc::as_ptr(&self.record)
    }

    /// Give up this handle, keeping the record alive behind a raw pointer
    pub(crate) fn into_raw(self) -> *const ThreadRecord {
        Arc::into_raw(self.record)
    }

    /// Rebuild a handle of the default manager from [`Thread::into_raw`]
    ///
    /// # Safety
    ///
    /// `ptr` must come from `into_raw` and must not be used again.
    pub(crate) unsafe fn from_raw(ptr: *const ThreadRecord) -> Self {
        Self {
            record: Arc::from_raw(ptr),
            threads: Threads::global().clone(),
        }
    }
}

impl PartialEq for Thread {
    fn eq(&self, other: &Self) -> bool {
        equal(self, other)
    }
}

impl core::fmt::Debug for Thread {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Thread").field("handle", &self.handle()).finish()
    }
}

/// ============================================================================
/// Thread Manager
/// ============================================================================

/// Thread lifecycle manager over an injected kernel
#[derive(Clone)]
pub struct Threads {
    kernel: Arc<dyn Kernel>,
    quota: Arc<RecordQuota>,
}

impl Threads {
    /// Create a manager with the default record budget
    pub fn new(kernel: Arc<dyn Kernel>) -> Self {
        Self::with_capacity(kernel, DEFAULT_MAX_THREADS)
    }

    /// Create a manager that hands out at most `max_threads` live records
    pub fn with_capacity(kernel: Arc<dyn Kernel>, max_threads: usize) -> Self {
        Self {
            kernel,
            quota: Arc::new(RecordQuota {
                live: AtomicUsize::new(0),
                max: max_threads,
            }),
        }
    }

    /// Process-wide manager over a [`HostKernel`]
    pub fn global() -> &'static Threads {
        static GLOBAL: spin::Once<Threads> = spin::Once::new();
        GLOBAL.call_once(|| Threads::new(Arc::new(HostKernel::new())))
    }

    /// Manager of the calling thread
    ///
    /// The manager that created the thread, or [`Threads::global`] for
    /// threads created elsewhere.
    pub fn of_current() -> Threads {
        OWNER
            .with(|owner| owner.borrow().clone())
            .unwrap_or_else(|| Threads::global().clone())
    }

    /// The kernel this manager drives
    pub fn kernel(&self) -> &Arc<dyn Kernel> {
        &self.kernel
    }

    /// Number of thread control records currently alive
    pub fn live_records(&self) -> usize {
        self.quota.live.load(Ordering::Acquire)
    }

    /// Create and start a thread running `entry`
    ///
    /// Does not return until the new thread is running.
    pub fn create(&self, entry: ThreadEntry) -> Result<Thread> {
        self.create_with(StartHandshake::new(entry))
    }

    fn create_with(&self, handshake: StartHandshake) -> Result<Thread> {
        let core_mask = self.kernel.process_core_mask().map_err(|err| {
            warn!("create: process core mask unavailable: {}", err);
            Error::from(err)
        })?;

        let slot = self.quota.acquire().ok_or_else(|| {
            warn!("create: thread record budget exhausted");
            Error::OutOfMemory
        })?;
        let record = Arc::new(ThreadRecord::new(Some(slot)));
        let handshake = Arc::new(handshake);

        let trampoline: KernelEntry = {
            let threads = self.clone();
            let handshake = handshake.clone();
            Box::new(move || {
                threads.trampoline(handshake);
            })
        };
        let vars: ThreadVars = record.clone();

        // On failure the kernel drops the trampoline and vars; the record
        // and its budget slot go with the last reference here
        let handle = self
            .kernel
            .thread_create(trampoline, vars, STACK_SIZE, PRIORITY, PREFERRED_CORE)
            .map_err(|err| {
                warn!("create: kernel refused thread: {}", err);
                Error::from(err)
            })?;
        record.handle.call_once(|| handle);

        let started = self
            .kernel
            .thread_set_core_mask(handle, CORE_KEEP, core_mask)
            .and_then(|()| self.kernel.thread_start(handle));
        if let Err(err) = started {
            warn!("create: starting thread {:?} failed: {}", handle, err);
            if let Err(close_err) = self.kernel.thread_close(handle) {
                warn!("create: closing thread {:?} failed: {}", handle, close_err);
            }
            return Err(Error::from(err));
        }

        let thread = Thread {
            record,
            threads: self.clone(),
        };

        if let Err(err) = handshake.wait_started() {
            warn!("create: start handshake of thread {:?} failed: {}", handle, err);
            // Already running; reap it so no kernel object or record is left
            if let Err(join_err) = thread.join() {
                warn!("create: reaping thread {:?} failed: {}", handle, join_err);
            }
            return Err(err);
        }

        debug!("created thread {:?}", handle);
        Ok(thread)
    }

    /// Create a thread running a closure
    pub fn spawn<F>(&self, func: F) -> Result<Thread>
    where
        F: FnOnce() -> i32 + Send + 'static,
    {
        self.create(Box::new(func))
    }

    /// First code run by every created thread
    fn trampoline(&self, handshake: Arc<StartHandshake>) -> ! {
        OWNER.with(|owner| *owner.borrow_mut() = Some(self.clone()));
        let entry = handshake.entry.lock().take();

        handshake.mutex.lock();
        handshake.started.store(true, Ordering::Release);
        if let Err(err) = handshake.cond.signal() {
            warn!("trampoline: start signal failed: {}", err);
        }
        handshake.mutex.unlock();
        // The creator may return from `create` from here on
        drop(handshake);

        let rc = entry.map_or(0, |entry| entry());
        self.exit(rc)
    }

    /// Handle of the calling thread
    ///
    /// Threads this layer did not create are given a record on first use.
    pub fn current(&self) -> Thread {
        let record = self
            .kernel
            .thread_vars()
            .and_then(|vars| vars.downcast::<ThreadRecord>().ok())
            .unwrap_or_else(|| {
                let record = Arc::new(ThreadRecord::new(None));
                record.handle.call_once(|| self.kernel.thread_current());
                self.kernel.set_thread_vars(record.clone());
                record
            });

        Thread {
            record,
            threads: self.clone(),
        }
    }

    /// Record `code` as the calling thread's exit code and terminate it
    ///
    /// Only threads created by a manager have a base frame to return to.
    /// On an adopted thread (the main thread, a plain `std::thread`) the
    /// hosted kernel's exit unwinds out of the thread's own entry point,
    /// so the thread ends the way a panic would.
    pub fn exit(&self, code: i32) -> ! {
        self.current().record.rc.store(code, Ordering::Release);
        self.kernel.exit_thread()
    }

    /// Sleep for at least `duration`
    ///
    /// `remaining`, when given, is always set to zero: the kernel never
    /// wakes a sleeper early.
    pub fn sleep(&self, duration: &Timespec, remaining: Option<&mut Timespec>) {
        self.kernel.sleep_thread(duration.to_nanoseconds());
        if let Some(remaining) = remaining {
            *remaining = Timespec::ZERO;
        }
    }

    /// Give up the rest of the time slice
    pub fn yield_now(&self) {
        self.kernel.sleep_thread(YIELD_WITH_MIGRATION);
    }
}

impl core::fmt::Debug for Threads {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Threads")
            .field("live_records", &self.live_records())
            .field("max_records", &self.quota.max)
            .finish_non_exhaustive()
    }
}

/// ============================================================================
/// Default Manager Shortcuts
/// ============================================================================

/// Create a thread on the default manager
pub fn create(entry: ThreadEntry) -> Result<Thread> {
    Threads::global().create(entry)
}

/// Spawn a closure on the default manager
pub fn spawn<F>(func: F) -> Result<Thread>
where
    F: FnOnce() -> i32 + Send + 'static,
{
    Threads::global().spawn(func)
}

/// Handle of the calling thread, from the manager that created it
pub fn current() -> Thread {
    Threads::of_current().current()
}

/// Terminate the calling thread with `code`
///
/// The code goes to the record of the manager that created the thread.
/// See [`Threads::exit`] for threads no manager created.
pub fn exit(code: i32) -> ! {
    Threads::of_current().exit(code)
}

/// Check whether two handles refer to the same kernel thread
pub fn equal(a: &Thread, b: &Thread) -> bool {
    let same_kernel = core::ptr::eq(
        Arc::as_ptr(&a.threads.kernel) as *const (),
        Arc::as_ptr(&b.threads.kernel) as *const (),
    );
    same_kernel && a.handle().is_valid() && a.handle() == b.handle()
}

/// Sleep for at least `duration`; `remaining` is zeroed
pub fn sleep(duration: &Timespec, remaining: Option<&mut Timespec>) {
    Threads::of_current().sleep(duration, remaining)
}

/// Sleep for at least `duration`
pub fn sleep_for(duration: Duration) {
    Threads::of_current().sleep(&Timespec::from(duration), None)
}

/// Give up the rest of the time slice
pub fn yield_now() {
    Threads::of_current().yield_now()
}
