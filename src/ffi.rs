// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! C11 `<threads.h>` bindings
//!
//! Thin wrappers that translate between C pointers and status codes and
//! the Rust API. Every function reports a null required pointer as
//! `thrd_error` rather than faulting.
//!
//! The symbols are only exported unmangled with the `c-abi` feature, so
//! that the library can be linked next to a C runtime that ships its own
//! `<threads.h>`.

#![allow(non_camel_case_types, non_upper_case_globals, improper_ctypes_definitions)]

use core::ffi::{c_int, c_void};
use core::ptr;
use std::sync::Arc;

use crate::condvar::Condvar;
use crate::error::{Result, Status};
use crate::mutex::{Mutex, MTX_PLAIN, MTX_RECURSIVE};
use crate::once::OnceFlag;
use crate::thread::{self, Thread, ThreadRecord};
use crate::time::{self, Timespec};

/// ============================================================================
/// Constants
/// ============================================================================

pub const thrd_success: c_int = Status::Success as c_int;
pub const thrd_busy: c_int = Status::Busy as c_int;
pub const thrd_error: c_int = Status::Error as c_int;
pub const thrd_nomem: c_int = Status::NoMemory as c_int;
pub const thrd_timedout: c_int = Status::TimedOut as c_int;

pub const mtx_plain: c_int = MTX_PLAIN;
pub const mtx_recursive: c_int = MTX_RECURSIVE;

/// ============================================================================
/// Types
/// ============================================================================

/// `mtx_t`; the default value is an uninitialized mutex
#[derive(Debug, Default)]
pub struct mtx_t {
    inner: Option<Mutex>,
}

impl mtx_t {
    /// An uninitialized mutex; every operation on it fails
    pub const fn new() -> Self {
        Self { inner: None }
    }
}

/// `cnd_t`; the default value is an uninitialized condition variable
#[derive(Debug, Default)]
pub struct cnd_t {
    inner: Option<Condvar>,
}

impl cnd_t {
    /// An uninitialized condition variable; every operation on it fails
    pub const fn new() -> Self {
        Self { inner: None }
    }
}

/// `once_flag`
#[derive(Debug, Default)]
pub struct once_flag {
    flag: OnceFlag,
}

/// `ONCE_FLAG_INIT`
#[allow(clippy::declare_interior_mutable_const)]
pub const ONCE_FLAG_INIT: once_flag = once_flag {
    flag: OnceFlag::new(),
};

/// `thrd_t`, an opaque pointer to the thread control record
pub type thrd_t = *const ThreadRecord;

/// `struct timespec`
pub type timespec = Timespec;

/// `thrd_start_t`
pub type thrd_start_t = unsafe extern "C-unwind" fn(arg: *mut c_void) -> c_int;

/// Initializer passed to `call_once`
pub type once_func_t = unsafe extern "C-unwind" fn();

fn status<T>(result: Result<T>) -> c_int {
    Status::from(result).into_raw()
}

/// Thread argument carried across to the new thread
struct StartArg(*mut c_void);

// The pointer is only handed back to the caller's own start routine
unsafe impl Send for StartArg {}

impl StartArg {
    fn into_inner(self) -> *mut c_void {
        self.0
    }
}

/// ============================================================================
/// Mutexes
/// ============================================================================

/// Initialize `*mtx` as a mutex of kind `type_`
///
/// # Safety
///
/// `mtx` must be null or valid for writes; its previous contents are not
/// dropped.
#[cfg_attr(feature = "c-abi", no_mangle)]
pub unsafe extern "C" fn mtx_init(mtx: *mut mtx_t, type_: c_int) -> c_int {
    if mtx.is_null() {
        return thrd_error;
    }
    match Mutex::init(type_) {
        Ok(mutex) => {
            ptr::write(mtx, mtx_t { inner: Some(mutex) });
            thrd_success
        }
        Err(err) => err.status().into_raw(),
    }
}

/// # Safety
///
/// `mtx` must be null or point to a live `mtx_t`.
#[cfg_attr(feature = "c-abi", no_mangle)]
pub unsafe extern "C" fn mtx_lock(mtx: *mut mtx_t) -> c_int {
    match mtx.as_ref().and_then(|mtx| mtx.inner.as_ref()) {
        Some(mutex) => {
            mutex.lock();
            thrd_success
        }
        None => thrd_error,
    }
}

/// Returns `thrd_busy` when the mutex is held elsewhere
///
/// # Safety
///
/// `mtx` must be null or point to a live `mtx_t`.
#[cfg_attr(feature = "c-abi", no_mangle)]
pub unsafe extern "C" fn mtx_trylock(mtx: *mut mtx_t) -> c_int {
    match mtx.as_ref().and_then(|mtx| mtx.inner.as_ref()) {
        Some(mutex) => status(mutex.try_lock()),
        None => thrd_error,
    }
}

/// # Safety
///
/// `mtx` must be null or point to a live `mtx_t`.
#[cfg_attr(feature = "c-abi", no_mangle)]
pub unsafe extern "C" fn mtx_unlock(mtx: *mut mtx_t) -> c_int {
    match mtx.as_ref().and_then(|mtx| mtx.inner.as_ref()) {
        Some(mutex) => {
            mutex.unlock();
            thrd_success
        }
        None => thrd_error,
    }
}

/// # Safety
///
/// `mtx` must be null or point to a live `mtx_t` no thread is using.
#[cfg_attr(feature = "c-abi", no_mangle)]
pub unsafe extern "C" fn mtx_destroy(mtx: *mut mtx_t) {
    if let Some(mutex) = mtx.as_mut().and_then(|mtx| mtx.inner.take()) {
        mutex.destroy();
    }
}

/// ============================================================================
/// Condition Variables
/// ============================================================================

/// # Safety
///
/// `cond` must be null or valid for writes; its previous contents are not
/// dropped.
#[cfg_attr(feature = "c-abi", no_mangle)]
pub unsafe extern "C" fn cnd_init(cond: *mut cnd_t) -> c_int {
    if cond.is_null() {
        return thrd_error;
    }
    match Condvar::init() {
        Ok(condvar) => {
            ptr::write(cond, cnd_t { inner: Some(condvar) });
            thrd_success
        }
        Err(err) => err.status().into_raw(),
    }
}

/// # Safety
///
/// `cond` must be null or point to a live `cnd_t`.
#[cfg_attr(feature = "c-abi", no_mangle)]
pub unsafe extern "C" fn cnd_signal(cond: *mut cnd_t) -> c_int {
    match cond.as_ref().and_then(|cond| cond.inner.as_ref()) {
        Some(condvar) => status(condvar.signal()),
        None => thrd_error,
    }
}

/// # Safety
///
/// `cond` must be null or point to a live `cnd_t`.
#[cfg_attr(feature = "c-abi", no_mangle)]
pub unsafe extern "C" fn cnd_broadcast(cond: *mut cnd_t) -> c_int {
    match cond.as_ref().and_then(|cond| cond.inner.as_ref()) {
        Some(condvar) => status(condvar.broadcast()),
        None => thrd_error,
    }
}

/// # Safety
///
/// Both pointers must be null or point to live objects.
#[cfg_attr(feature = "c-abi", no_mangle)]
pub unsafe extern "C" fn cnd_wait(cond: *mut cnd_t, mtx: *mut mtx_t) -> c_int {
    let condvar = cond.as_ref().and_then(|cond| cond.inner.as_ref());
    let mutex = mtx.as_ref().and_then(|mtx| mtx.inner.as_ref());
    match (condvar, mutex) {
        (Some(condvar), Some(mutex)) => status(condvar.wait(mutex)),
        _ => thrd_error,
    }
}

/// Wait until woken or until the absolute deadline `*abs_time`
///
/// `abs_time` is a `TIME_UTC` time, as returned by `timespec_get`.
/// Returns `thrd_timedout` when the deadline passes first.
///
/// # Safety
///
/// All pointers must be null or point to live objects.
#[cfg_attr(feature = "c-abi", no_mangle)]
pub unsafe extern "C" fn cnd_timedwait(
    cond: *mut cnd_t,
    mtx: *mut mtx_t,
    abs_time: *const timespec,
) -> c_int {
    let condvar = cond.as_ref().and_then(|cond| cond.inner.as_ref());
    let mutex = mtx.as_ref().and_then(|mtx| mtx.inner.as_ref());
    match (condvar, mutex, abs_time.as_ref()) {
        (Some(condvar), Some(mutex), Some(deadline)) => {
            status(condvar.timed_wait(mutex, &time::utc_to_monotonic(deadline)))
        }
        _ => thrd_error,
    }
}

/// # Safety
///
/// `cond` must be null or point to a live `cnd_t` no thread waits on.
#[cfg_attr(feature = "c-abi", no_mangle)]
pub unsafe extern "C" fn cnd_destroy(cond: *mut cnd_t) {
    if let Some(condvar) = cond.as_mut().and_then(|cond| cond.inner.take()) {
        condvar.destroy();
    }
}

/// ============================================================================
/// Once
/// ============================================================================

/// # Safety
///
/// `flag` must be null or point to a live `once_flag`; `func` must be
/// safe to call.
#[cfg_attr(feature = "c-abi", no_mangle)]
pub unsafe extern "C-unwind" fn call_once(flag: *mut once_flag, func: Option<once_func_t>) {
    if let (Some(flag), Some(func)) = (flag.as_ref(), func) {
        flag.flag.call_once(|| func());
    }
}

/// ============================================================================
/// Threads
/// ============================================================================

/// Create a thread running `func(arg)` and store its handle in `*thr`
///
/// # Safety
///
/// `thr` must be null or valid for writes; `func` must be safe to call
/// with `arg` on another thread.
#[cfg_attr(feature = "c-abi", no_mangle)]
pub unsafe extern "C" fn thrd_create(
    thr: *mut thrd_t,
    func: Option<thrd_start_t>,
    arg: *mut c_void,
) -> c_int {
    let Some(func) = func else {
        return thrd_error;
    };
    if thr.is_null() {
        return thrd_error;
    }

    let arg = StartArg(arg);
    match thread::create(Box::new(move || func(arg.into_inner()))) {
        Ok(thread) => {
            *thr = thread.into_raw();
            thrd_success
        }
        Err(err) => err.status().into_raw(),
    }
}

/// Wait for `thr` to exit, store its exit code in `*res` (if non-null)
/// and release it
///
/// # Safety
///
/// `thr` must be null or a handle from `thrd_create` that has not been
/// joined; `res` must be null or valid for writes.
#[cfg_attr(feature = "c-abi", no_mangle)]
pub unsafe extern "C" fn thrd_join(thr: thrd_t, res: *mut c_int) -> c_int {
    if thr.is_null() {
        return thrd_error;
    }

    // Borrow the caller's reference; it is only given up on success
    Arc::increment_strong_count(thr);
    match Thread::from_raw(thr).join() {
        Ok(rc) => {
            Arc::decrement_strong_count(thr);
            if let Some(res) = res.as_mut() {
                *res = rc;
            }
            thrd_success
        }
        Err(err) => err.status().into_raw(),
    }
}

/// Terminate the calling thread with exit code `res`
///
/// Meant for threads made by `thrd_create`. On any other thread (the
/// main thread included) the exit unwinds out of the thread's own entry
/// point and ends it like a panic.
#[cfg_attr(feature = "c-abi", no_mangle)]
pub extern "C-unwind" fn thrd_exit(res: c_int) -> ! {
    thread::exit(res)
}

/// Handle of the calling thread
///
/// For a thread made by `thrd_create` this is the same handle the creator
/// received. The handle stays valid for the life of the thread.
#[cfg_attr(feature = "c-abi", no_mangle)]
pub extern "C" fn thrd_current() -> thrd_t {
    // The thread's own thread-vars slot keeps the record alive
    thread::current().as_ptr()
}

/// Nonzero iff both handles are non-null and name the same thread
///
/// # Safety
///
/// Non-null handles must be live.
#[cfg_attr(feature = "c-abi", no_mangle)]
pub unsafe extern "C" fn thrd_equal(a: thrd_t, b: thrd_t) -> c_int {
    if a.is_null() || b.is_null() {
        return 0;
    }
    Arc::increment_strong_count(a);
    Arc::increment_strong_count(b);
    let (a, b) = (Thread::from_raw(a), Thread::from_raw(b));
    c_int::from(thread::equal(&a, &b))
}

/// Sleep for `*duration`; `*remaining` (if non-null) is set to zero
///
/// Returns 0, or -1 when `duration` is null.
///
/// # Safety
///
/// `duration` must be null or readable; `remaining` must be null or
/// valid for writes.
#[cfg_attr(feature = "c-abi", no_mangle)]
pub unsafe extern "C" fn thrd_sleep(duration: *const timespec, remaining: *mut timespec) -> c_int {
    match duration.as_ref() {
        Some(duration) => {
            thread::sleep(duration, remaining.as_mut());
            0
        }
        None => -1,
    }
}

#[cfg_attr(feature = "c-abi", no_mangle)]
pub extern "C" fn thrd_yield() {
    thread::yield_now()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use core::sync::atomic::{AtomicUsize, Ordering};

    unsafe extern "C-unwind" fn double(arg: *mut c_void) -> c_int {
        *(arg as *const c_int) * 2
    }

    unsafe extern "C-unwind" fn exits_early(_arg: *mut c_void) -> c_int {
        thrd_exit(17)
    }

    unsafe extern "C-unwind" fn report_current(arg: *mut c_void) -> c_int {
        *(arg as *mut thrd_t) = thrd_current();
        0
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            [thrd_success, thrd_busy, thrd_error, thrd_nomem, thrd_timedout],
            [0, 1, 2, 3, 4]
        );
        assert_eq!(Error::OutOfMemory.status().into_raw(), thrd_nomem);
    }

    #[test]
    fn test_mutex_calls() {
        unsafe {
            let mut mtx = mtx_t::new();
            assert_eq!(mtx_lock(&mut mtx), thrd_error);
            assert_eq!(mtx_init(&mut mtx, 4), thrd_error);
            assert_eq!(mtx_init(ptr::null_mut(), mtx_plain), thrd_error);

            assert_eq!(mtx_init(&mut mtx, mtx_plain), thrd_success);
            assert_eq!(mtx_trylock(&mut mtx), thrd_success);
            assert_eq!(mtx_trylock(&mut mtx), thrd_busy);
            assert_eq!(mtx_unlock(&mut mtx), thrd_success);
            mtx_destroy(&mut mtx);
            assert_eq!(mtx_unlock(&mut mtx), thrd_error);

            assert_eq!(mtx_lock(ptr::null_mut()), thrd_error);
            mtx_destroy(ptr::null_mut());
        }
    }

    #[test]
    fn test_recursive_mutex_calls() {
        unsafe {
            let mut mtx = mtx_t::default();
            assert_eq!(mtx_init(&mut mtx, mtx_recursive), thrd_success);
            assert_eq!(mtx_lock(&mut mtx), thrd_success);
            assert_eq!(mtx_trylock(&mut mtx), thrd_success);
            assert_eq!(mtx_unlock(&mut mtx), thrd_success);
            assert_eq!(mtx_unlock(&mut mtx), thrd_success);
            mtx_destroy(&mut mtx);
        }
    }

    #[test]
    fn test_condvar_calls() {
        unsafe {
            let mut cond = cnd_t::new();
            let mut mtx = mtx_t::new();
            assert_eq!(cnd_signal(&mut cond), thrd_error);
            assert_eq!(cnd_init(ptr::null_mut()), thrd_error);

            assert_eq!(cnd_init(&mut cond), thrd_success);
            assert_eq!(cnd_wait(&mut cond, &mut mtx), thrd_error);
            assert_eq!(mtx_init(&mut mtx, mtx_plain), thrd_success);

            assert_eq!(mtx_lock(&mut mtx), thrd_success);
            let past = Timespec::ZERO;
            assert_eq!(cnd_timedwait(&mut cond, &mut mtx, &past), thrd_timedout);
            assert_eq!(cnd_timedwait(&mut cond, &mut mtx, ptr::null()), thrd_error);
            assert_eq!(mtx_unlock(&mut mtx), thrd_success);

            assert_eq!(cnd_broadcast(&mut cond), thrd_success);
            cnd_destroy(&mut cond);
            mtx_destroy(&mut mtx);
        }
    }

    #[test]
    fn test_timedwait_on_wall_clock_deadline() {
        use std::sync::mpsc;
        use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

        let (done, finished) = mpsc::channel();
        std::thread::spawn(move || unsafe {
            let mut cond = cnd_t::new();
            let mut mtx = mtx_t::new();
            assert_eq!(cnd_init(&mut cond), thrd_success);
            assert_eq!(mtx_init(&mut mtx, mtx_plain), thrd_success);

            // What a C caller gets from timespec_get(&ts, TIME_UTC) + 50ms
            let wall = SystemTime::now().duration_since(UNIX_EPOCH).unwrap() + Duration::from_millis(50);
            let deadline = timespec::from(wall);

            let start = Instant::now();
            assert_eq!(mtx_lock(&mut mtx), thrd_success);
            let rc = cnd_timedwait(&mut cond, &mut mtx, &deadline);
            assert_eq!(mtx_unlock(&mut mtx), thrd_success);
            let _ = done.send((rc, start.elapsed()));
        });

        let (rc, waited) = finished.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(rc, thrd_timedout);
        assert!(waited >= Duration::from_millis(40));
    }

    #[test]
    fn test_call_once() {
        static FLAG: once_flag = ONCE_FLAG_INIT;
        static RUNS: AtomicUsize = AtomicUsize::new(0);

        unsafe extern "C-unwind" fn init() {
            RUNS.fetch_add(1, Ordering::SeqCst);
        }

        unsafe {
            let flag = &FLAG as *const once_flag as *mut once_flag;
            call_once(flag, Some(init));
            call_once(flag, Some(init));
            call_once(ptr::null_mut(), Some(init));
            call_once(flag, None);
        }
        assert_eq!(RUNS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_create_and_join() {
        unsafe {
            let mut input: c_int = 21;
            let mut thr: thrd_t = ptr::null();
            let mut res: c_int = 0;

            assert_eq!(
                thrd_create(&mut thr, Some(double), &mut input as *mut c_int as *mut c_void),
                thrd_success
            );
            assert_eq!(thrd_join(thr, &mut res), thrd_success);
            assert_eq!(res, 42);

            assert_eq!(thrd_create(&mut thr, None, ptr::null_mut()), thrd_error);
            assert_eq!(thrd_create(ptr::null_mut(), Some(double), ptr::null_mut()), thrd_error);
            assert_eq!(thrd_join(ptr::null(), &mut res), thrd_error);
        }
    }

    #[test]
    fn test_exit_code() {
        unsafe {
            let mut thr: thrd_t = ptr::null();
            let mut res: c_int = 0;

            assert_eq!(thrd_create(&mut thr, Some(exits_early), ptr::null_mut()), thrd_success);
            assert_eq!(thrd_join(thr, &mut res), thrd_success);
            assert_eq!(res, 17);
        }
    }

    #[test]
    fn test_current_matches_created_handle() {
        unsafe {
            let mut seen: thrd_t = ptr::null();
            let mut thr: thrd_t = ptr::null();

            assert_eq!(
                thrd_create(&mut thr, Some(report_current), &mut seen as *mut thrd_t as *mut c_void),
                thrd_success
            );
            assert_eq!(thrd_join(thr, ptr::null_mut()), thrd_success);
            // Compared by address only; the record is gone after the join
            assert_eq!(seen, thr);
        }
    }

    #[test]
    fn test_equal_and_current() {
        unsafe {
            let me = thrd_current();
            assert_eq!(thrd_equal(me, thrd_current()), 1);
            assert_eq!(thrd_equal(me, ptr::null()), 0);
            assert_eq!(thrd_equal(ptr::null(), ptr::null()), 0);

            // The calling thread was not created here and cannot be joined
            assert_eq!(thrd_join(me, ptr::null_mut()), thrd_error);
            assert_eq!(thrd_equal(me, thrd_current()), 1);
        }
    }

    #[test]
    fn test_sleep_and_yield() {
        unsafe {
            let duration = Timespec::new(0, 1_000_000);
            let mut remaining = Timespec::new(1, 1);

            assert_eq!(thrd_sleep(&duration, &mut remaining), 0);
            assert_eq!(remaining, Timespec::ZERO);
            assert_eq!(thrd_sleep(&duration, ptr::null_mut()), 0);
            assert_eq!(thrd_sleep(ptr::null(), ptr::null_mut()), -1);
        }
        thrd_yield();
    }
}
