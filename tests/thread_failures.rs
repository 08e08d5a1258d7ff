// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Thread lifecycle failure paths
//!
//! Every failed creation must leave no kernel object and no thread record
//! behind, and must never run the entry.

mod common;

use common::{faulty_threads, Fault};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thrd::sys::SvcError;
use thrd::{Error, Mutex, Status};

fn check_create_fails(fault: Fault, expected: SvcError) {
    let (kernel, threads) = faulty_threads(8);
    let ran = Arc::new(AtomicBool::new(false));
    kernel.fail(fault);

    let result = {
        let ran = ran.clone();
        threads.spawn(move || {
            ran.store(true, Ordering::SeqCst);
            0
        })
    };

    let err = result.unwrap_err();
    assert_eq!(err, Error::OperationFailed(expected));
    assert_eq!(err.status(), Status::Error);
    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(kernel.host().live_threads(), 0);
    assert_eq!(threads.live_records(), 0);

    // The manager is still usable once the kernel recovers
    kernel.heal(fault);
    assert_eq!(threads.spawn(|| 3).and_then(|t| t.join()), Ok(3));
    assert_eq!(threads.live_records(), 0);
}

#[test]
fn core_mask_query_failure() {
    check_create_fails(Fault::CoreMask, SvcError::NotFound);
}

#[test]
fn kernel_create_failure() {
    check_create_fails(Fault::Create, SvcError::OutOfResource);
}

#[test]
fn core_mask_apply_failure() {
    check_create_fails(Fault::SetCoreMask, SvcError::InvalidCombination);
}

#[test]
fn start_failure() {
    check_create_fails(Fault::Start, SvcError::OutOfResource);
}

#[test]
fn record_exhaustion_is_out_of_memory() {
    let (kernel, threads) = faulty_threads(1);
    let gate = Arc::new(Mutex::plain());
    gate.lock();

    let first = {
        let gate = gate.clone();
        threads
            .spawn(move || {
                gate.lock();
                gate.unlock();
                1
            })
            .unwrap()
    };

    let err = threads.spawn(|| 2).unwrap_err();
    assert_eq!(err, Error::OutOfMemory);
    assert_eq!(err.status(), Status::NoMemory);
    assert_eq!(kernel.host().live_threads(), 1);

    gate.unlock();
    assert_eq!(first.join(), Ok(1));
    assert_eq!(threads.live_records(), 0);
}

#[test]
fn join_wait_failure_can_be_retried() {
    let (kernel, threads) = faulty_threads(2);
    let thread = threads.spawn(|| 5).unwrap();
    let retry = thread.clone();

    kernel.fail(Fault::Wait);
    assert_eq!(thread.join(), Err(Error::OperationFailed(SvcError::InvalidState)));

    kernel.heal(Fault::Wait);
    assert_eq!(retry.join(), Ok(5));
    assert_eq!(kernel.host().live_threads(), 0);
}

#[test]
fn join_close_failure_can_be_retried() {
    let (kernel, threads) = faulty_threads(2);
    let thread = threads.spawn(|| 6).unwrap();
    let retry = thread.clone();

    kernel.fail(Fault::Close);
    assert_eq!(thread.join(), Err(Error::OperationFailed(SvcError::InvalidHandle)));
    assert_eq!(kernel.host().live_threads(), 1);

    kernel.heal(Fault::Close);
    assert_eq!(retry.join(), Ok(6));
    assert_eq!(kernel.host().live_threads(), 0);
    assert_eq!(threads.live_records(), 0);
}
