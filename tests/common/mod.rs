// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Shared test helpers
//!
//! [`FaultyKernel`] forwards to a [`HostKernel`] and fails selected
//! services on demand. It also counts kernel entries as they begin, and
//! can hold each new thread back for a while before it enters.

#![allow(dead_code)]

use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use core::time::Duration;
use proptest::prelude::ProptestConfig;
use std::sync::Arc;

use thrd::sys::{
    CoreMask, Handle, HostConfig, HostKernel, Kernel, KernelEntry, SvcError, SvcResult, ThreadVars,
};
use thrd::Threads;

/// Kernel services that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    CoreMask,
    Create,
    SetCoreMask,
    Start,
    Wait,
    Close,
}

const FAULTS: usize = 6;

/// Host kernel with switchable failures
pub struct FaultyKernel {
    host: HostKernel,
    faults: [AtomicBool; FAULTS],
    /// Kernel entries that have begun running
    entered: Arc<AtomicUsize>,
    /// Pause before each kernel entry, in milliseconds
    start_delay_ms: AtomicU64,
}

impl FaultyKernel {
    pub fn new() -> Self {
        Self {
            host: HostKernel::with_config(HostConfig { core_count: 4 }),
            faults: Default::default(),
            entered: Arc::new(AtomicUsize::new(0)),
            start_delay_ms: AtomicU64::new(0),
        }
    }

    /// Number of kernel entries that have begun running
    pub fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }

    /// Hold every thread started from now on back by `delay`
    pub fn delay_start(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.start_delay_ms.store(millis, Ordering::SeqCst);
    }

    pub fn host(&self) -> &HostKernel {
        &self.host
    }

    pub fn fail(&self, fault: Fault) {
        self.faults[fault as usize].store(true, Ordering::SeqCst);
    }

    pub fn heal(&self, fault: Fault) {
        self.faults[fault as usize].store(false, Ordering::SeqCst);
    }

    fn check(&self, fault: Fault, err: SvcError) -> SvcResult<()> {
        if self.faults[fault as usize].load(Ordering::SeqCst) {
            Err(err)
        } else {
            Ok(())
        }
    }
}

impl Kernel for FaultyKernel {
    fn process_core_mask(&self) -> SvcResult<CoreMask> {
        self.check(Fault::CoreMask, SvcError::NotFound)?;
        self.host.process_core_mask()
    }

    fn thread_create(
        &self,
        entry: KernelEntry,
        vars: ThreadVars,
        stack_size: usize,
        priority: i32,
        preferred_core: i32,
    ) -> SvcResult<Handle> {
        self.check(Fault::Create, SvcError::OutOfResource)?;

        let entered = self.entered.clone();
        let delay = Duration::from_millis(self.start_delay_ms.load(Ordering::SeqCst));
        let entry: KernelEntry = Box::new(move || {
            std::thread::sleep(delay);
            entered.fetch_add(1, Ordering::SeqCst);
            entry()
        });
        self.host.thread_create(entry, vars, stack_size, priority, preferred_core)
    }

    fn thread_set_core_mask(&self, thread: Handle, preferred_core: i32, mask: CoreMask) -> SvcResult<()> {
        self.check(Fault::SetCoreMask, SvcError::InvalidCombination)?;
        self.host.thread_set_core_mask(thread, preferred_core, mask)
    }

    fn thread_start(&self, thread: Handle) -> SvcResult<()> {
        self.check(Fault::Start, SvcError::OutOfResource)?;
        self.host.thread_start(thread)
    }

    fn thread_wait_for_exit(&self, thread: Handle) -> SvcResult<()> {
        self.check(Fault::Wait, SvcError::InvalidState)?;
        self.host.thread_wait_for_exit(thread)
    }

    fn thread_close(&self, thread: Handle) -> SvcResult<()> {
        self.check(Fault::Close, SvcError::InvalidHandle)?;
        self.host.thread_close(thread)
    }

    fn thread_current(&self) -> Handle {
        self.host.thread_current()
    }

    fn thread_vars(&self) -> Option<ThreadVars> {
        self.host.thread_vars()
    }

    fn set_thread_vars(&self, vars: ThreadVars) {
        self.host.set_thread_vars(vars)
    }

    fn exit_thread(&self) -> ! {
        self.host.exit_thread()
    }

    fn sleep_thread(&self, nanos: u64) {
        self.host.sleep_thread(nanos)
    }
}

/// A manager over a fresh faulty kernel
pub fn faulty_threads(max_threads: usize) -> (Arc<FaultyKernel>, Threads) {
    let kernel = Arc::new(FaultyKernel::new());
    let threads = Threads::with_capacity(kernel.clone(), max_threads);
    (kernel, threads)
}

/// Proptest configuration with a small case count; thread tests are slow
pub fn test_proptest_config(cases: u32) -> ProptestConfig {
    ProptestConfig::with_cases(cases)
}
